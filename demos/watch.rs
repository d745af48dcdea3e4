//! Watch a command and react to its output.
//!
//! ```text
//! cargo run --example watch --features logging -- [--pty] [--strict] \
//!     [--terminate PHRASE]... [--after PATTERN COMMAND] -- COMMAND...
//! cargo run --example watch --features logging -- --config session.toml
//! ```
//!
//! Logging follows `PROCWATCH_LOG` (or `RUST_LOG`); set
//! `PROCWATCH_LOG_FORMAT=json` for JSON lines. Ctrl-C cancels the session.

use std::process::ExitCode;

use procwatch::prelude::*;
use procwatch::{FileConfig, logging};

struct Args {
    config: Option<String>,
    pty: bool,
    strict: bool,
    terminate: Vec<String>,
    after: Option<(String, String)>,
    command: Vec<String>,
}

fn usage() -> String {
    [
        "usage: watch [--pty] [--strict] [--terminate PHRASE]... [--after PATTERN COMMAND] \\",
        "             -- COMMAND...",
        "       watch --config FILE",
    ]
    .join("\n")
}

fn parse_args() -> std::result::Result<Args, String> {
    let mut args = Args {
        config: None,
        pty: false,
        strict: false,
        terminate: Vec::new(),
        after: None,
        command: Vec::new(),
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => args.config = Some(it.next().ok_or_else(usage)?),
            "--pty" => args.pty = true,
            "--strict" => args.strict = true,
            "--terminate" => args.terminate.push(it.next().ok_or_else(usage)?),
            "--after" => {
                let pattern = it.next().ok_or_else(usage)?;
                let command = it.next().ok_or_else(usage)?;
                args.after = Some((pattern, command));
            }
            "--" => {
                args.command.extend(it.by_ref());
            }
            "-h" | "--help" => return Err(usage()),
            _ => {
                args.command.push(arg);
                args.command.extend(it.by_ref());
            }
        }
    }
    if args.config.is_none() && args.command.is_empty() {
        return Err(usage());
    }
    Ok(args)
}

fn build(args: &Args) -> Result<(CommandSpec, TriggerTable, SessionConfig)> {
    let base = SessionConfig::new().with_env_overrides()?;

    if let Some(path) = &args.config {
        let file = FileConfig::load(path)?;
        return Ok((
            file.command_spec()?,
            file.trigger_table()?,
            file.session_config(base),
        ));
    }

    let command_line = shell_words::join(&args.command);
    let mut spec = CommandSpec::builder(command_line);
    if args.pty {
        spec = spec.pty();
    }

    let mut table = TriggerTable::builder();
    for phrase in &args.terminate {
        table = table.terminate_on(phrase.clone());
    }
    if let Some((pattern, command)) = &args.after {
        table = table.after_line(pattern, command.clone());
    }

    Ok((spec.build()?, table.build()?, base.strict(args.strict)))
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = logging::init() {
        eprintln!("failed to initialise logging: {err}");
    }

    let args = match parse_args() {
        Ok(args) => args,
        Err(usage) => {
            eprintln!("{usage}");
            return ExitCode::from(2);
        }
    };

    match run(&args).await {
        Ok(report) => {
            match report.to_json() {
                Ok(json) => eprintln!("{json}"),
                Err(err) => eprintln!("failed to render report: {err}"),
            }
            ExitCode::SUCCESS
        }
        Err(SessionError::AbnormalExit { code, report, .. }) => {
            eprintln!("command exited with {code} after {} lines", report.lines);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args) -> Result<SessionReport> {
    let (spec, table, config) = build(args)?;
    let mut session = InteractiveSession::with_config(spec, table, config);
    #[cfg(unix)]
    let _interrupt = session.cancel_handle().cancel_on_interrupt()?;

    session.start().await?;
    let result = session.run_until_complete().await;
    session.close().await?;
    result
}
