//! The `pattern!` macro.

use proc_macro2::TokenStream;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::{LitStr, Result};

/// The pattern! macro input.
pub struct PatternInput {
    /// The regex literal.
    pub pattern: LitStr,
}

impl Parse for PatternInput {
    fn parse(input: ParseStream) -> Result<Self> {
        let pattern = input.parse()?;
        // Allow a trailing comma
        let _: Option<syn::Token![,]> = input.parse()?;
        Ok(Self { pattern })
    }
}

/// Check `lit` as a regex, reporting the error at its span.
pub fn validate(lit: &LitStr) -> Result<()> {
    regex::Regex::new(&lit.value())
        .map(drop)
        .map_err(|e| syn::Error::new(lit.span(), format!("invalid regex: {e}")))
}

/// Expand a regex literal into a `TriggerPattern` expression.
pub fn expand(lit: &LitStr) -> TokenStream {
    if let Err(err) = validate(lit) {
        return err.to_compile_error();
    }

    quote! {
        {
            static PATTERN: ::std::sync::OnceLock<::procwatch::__private::Regex> =
                ::std::sync::OnceLock::new();
            ::procwatch::trigger::TriggerPattern::from_regex(
                PATTERN
                    .get_or_init(|| {
                        ::procwatch::__private::Regex::new(#lit)
                            .expect("regex was validated at compile time")
                    })
                    .clone(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use syn::parse_quote;

    use super::*;

    #[test]
    fn parse_raw_literal() {
        let input: PatternInput = parse_quote! { r"Log ID: (\S+)" };
        assert_eq!(input.pattern.value(), r"Log ID: (\S+)");
    }

    #[test]
    fn parse_trailing_comma() {
        let input: PatternInput = parse_quote! { "ready", };
        assert_eq!(input.pattern.value(), "ready");
    }

    #[test]
    fn invalid_regex_becomes_compile_error() {
        let lit: LitStr = parse_quote! { "[unclosed" };
        let tokens = expand(&lit).to_string();
        assert!(tokens.contains("compile_error"));
        assert!(tokens.contains("invalid regex"));
    }

    #[test]
    fn valid_regex_expands_to_trigger_pattern() {
        let lit: LitStr = parse_quote! { "^ok$" };
        let tokens = expand(&lit).to_string();
        assert!(tokens.contains("TriggerPattern"));
        assert!(tokens.contains("OnceLock"));
    }
}
