//! Client authentication: each configured method in turn until one succeeds.

use std::path::Path;
use std::sync::Arc;

use russh::client::Handle;
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg};

use super::ClientHandler;
use crate::error::SshError;
use crate::remote::AuthMethod;

/// Load a private key, decrypting it with `passphrase` if given.
pub(super) async fn load_private_key(
    path: &Path,
    passphrase: Option<&str>,
) -> Result<Arc<PrivateKey>, SshError> {
    let key_err = |reason: String| SshError::Key {
        path: path.to_path_buf(),
        reason,
    };

    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| key_err(e.to_string()))?;
    let key = russh::keys::decode_secret_key(&contents, passphrase).map_err(|e| {
        if passphrase.is_none() && e.to_string().contains("encrypted") {
            key_err("key is encrypted and no passphrase was given".into())
        } else {
            key_err(e.to_string())
        }
    })?;
    Ok(Arc::new(key))
}

/// Try `methods` in order.
///
/// # Errors
///
/// Returns [`SshError::Authentication`] listing what was tried once every
/// method has failed.
pub(super) async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    user: &str,
    methods: &[AuthMethod],
) -> Result<(), SshError> {
    let mut tried = Vec::with_capacity(methods.len());

    for method in methods {
        tried.push(method.name());
        let accepted = match method {
            AuthMethod::Password(password) => {
                tracing::debug!(user, "trying password authentication");
                match handle.authenticate_password(user, password).await {
                    Ok(result) => result.success(),
                    Err(err) => {
                        tracing::debug!(user, error = %err, "password authentication error");
                        false
                    }
                }
            }
            AuthMethod::PrivateKey { path, passphrase } => {
                tracing::debug!(user, key = %path.display(), "trying public key authentication");
                match load_private_key(path, passphrase.as_deref()).await {
                    Ok(key) => {
                        let rsa_hash = handle
                            .best_supported_rsa_hash()
                            .await
                            .ok()
                            .flatten()
                            .flatten();
                        match handle
                            .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key, rsa_hash))
                            .await
                        {
                            Ok(result) => result.success(),
                            Err(err) => {
                                tracing::debug!(user, error = %err, "public key auth error");
                                false
                            }
                        }
                    }
                    Err(err) => {
                        tracing::debug!(user, error = %err, "skipping private key");
                        false
                    }
                }
            }
            AuthMethod::Agent => agent(handle, user).await,
        };

        if accepted {
            tracing::info!(user, method = method.name(), "authenticated");
            return Ok(());
        }
    }

    Err(SshError::authentication(
        user,
        format!("no method succeeded (tried: {})", tried.join(", ")),
    ))
}

#[cfg(unix)]
async fn agent(handle: &mut Handle<ClientHandler>, user: &str) -> bool {
    use russh::keys::agent::client::AgentClient;

    tracing::debug!(user, "trying SSH agent authentication");
    let mut agent = match AgentClient::connect_env().await {
        Ok(agent) => agent,
        Err(err) => {
            tracing::debug!(error = %err, "SSH agent unavailable");
            return false;
        }
    };
    let keys = match agent.request_identities().await {
        Ok(keys) => keys,
        Err(err) => {
            tracing::debug!(error = %err, "SSH agent did not list identities");
            return false;
        }
    };

    for key in keys {
        let rsa_hash = handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        match handle
            .authenticate_publickey_with(user, key.clone(), rsa_hash, &mut agent)
            .await
        {
            Ok(result) if result.success() => return true,
            Ok(_) => {
                tracing::debug!(user, key_type = %key.algorithm().as_str(), "agent key rejected");
            }
            Err(err) => tracing::debug!(user, error = %err, "agent authentication error"),
        }
    }
    false
}

#[cfg(not(unix))]
async fn agent(_handle: &mut Handle<ClientHandler>, user: &str) -> bool {
    tracing::debug!(user, "SSH agent authentication is only supported on Unix");
    false
}
