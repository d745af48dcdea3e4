//! The `triggers!` macro.

use proc_macro2::TokenStream;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::{Expr, Ident, LitStr, Result, Token, braced};

/// One entry of a trigger table.
pub enum Entry {
    /// A rule with a regex and an action.
    Rule {
        /// Rule name.
        name: Option<Ident>,
        /// Fire on the first match only.
        once: bool,
        /// Regex literal.
        pattern: LitStr,
        /// Action expression.
        action: Expr,
    },
    /// The after-line trigger.
    After {
        /// Regex literal.
        pattern: LitStr,
        /// Command to send.
        command: Expr,
    },
    /// A termination phrase.
    Terminate(LitStr),
}

impl Parse for Entry {
    fn parse(input: ParseStream) -> Result<Self> {
        let name = if input.peek(Ident) && input.peek2(Token![:]) {
            let name: Ident = input.parse()?;
            let _: Token![:] = input.parse()?;
            Some(name)
        } else {
            None
        };

        let keyword: Ident = input.parse()?;
        match keyword.to_string().as_str() {
            kind @ ("once" | "repeat") => {
                let pattern: LitStr = input.parse()?;
                let _: Token![=>] = input.parse()?;
                let action: Expr = input.parse()?;
                Ok(Self::Rule {
                    name,
                    once: kind == "once",
                    pattern,
                    action,
                })
            }
            "after" | "terminate" if name.is_some() => Err(syn::Error::new(
                keyword.span(),
                format!("`{keyword}` entries cannot be named"),
            )),
            "after" => {
                let pattern: LitStr = input.parse()?;
                let _: Token![=>] = input.parse()?;
                let command: Expr = input.parse()?;
                Ok(Self::After { pattern, command })
            }
            "terminate" => {
                let phrase: LitStr = input.parse()?;
                if phrase.value().is_empty() {
                    return Err(syn::Error::new(
                        phrase.span(),
                        "termination phrase must not be empty",
                    ));
                }
                Ok(Self::Terminate(phrase))
            }
            _ => Err(syn::Error::new(
                keyword.span(),
                format!("expected `once`, `repeat`, `after` or `terminate`, found `{keyword}`"),
            )),
        }
    }
}

/// The triggers! macro input.
pub struct TriggersInput {
    /// Entries in declaration order.
    pub entries: Punctuated<Entry, Token![,]>,
}

impl Parse for TriggersInput {
    fn parse(input: ParseStream) -> Result<Self> {
        let entries = if input.peek(syn::token::Brace) {
            let content;
            braced!(content in input);
            Punctuated::parse_terminated(&content)?
        } else {
            Punctuated::parse_terminated(input)?
        };

        let afters = entries
            .iter()
            .filter(|e| matches!(e, Entry::After { .. }))
            .count();
        if afters > 1 {
            return Err(input.error("at most one `after` entry is allowed"));
        }

        Ok(Self { entries })
    }
}

/// Generate the builder chain.
pub fn expand(input: TriggersInput) -> TokenStream {
    let mut calls = Vec::with_capacity(input.entries.len());
    for entry in input.entries {
        let call = match entry {
            Entry::Rule {
                name,
                once,
                pattern,
                action,
            } => {
                let pattern = crate::pattern::expand(&pattern);
                let policy = if once {
                    quote! { ::procwatch::trigger::FirePolicy::Once }
                } else {
                    quote! { ::procwatch::trigger::FirePolicy::Repeatable }
                };
                let named = name.map(|n| {
                    let n = n.to_string();
                    quote! { .named(#n) }
                });
                quote! {
                    .rule(::procwatch::trigger::TriggerRule::new(#pattern, #policy, #action) #named)
                }
            }
            Entry::After { pattern, command } => {
                if let Err(err) = crate::pattern::validate(&pattern) {
                    return err.to_compile_error();
                }
                quote! { .after_line(#pattern, #command) }
            }
            Entry::Terminate(phrase) => quote! { .terminate_on(#phrase) },
        };
        calls.push(call);
    }

    quote! {
        ::procwatch::trigger::TriggerTable::builder()
            #(#calls)*
            .build()
    }
}

#[cfg(test)]
mod tests {
    use syn::parse_quote;

    use super::*;

    #[test]
    fn parse_all_entry_kinds() {
        let input: TriggersInput = parse_quote! {
            log_id: once r"Log ID: (\S+)" => |_ctx| Ok(()),
            repeat "error" => handler,
            after "ready" => "start",
            terminate "Bye bye!",
        };
        let entries: Vec<_> = input.entries.into_iter().collect();
        assert_eq!(entries.len(), 4);
        assert!(matches!(
            &entries[0],
            Entry::Rule { name: Some(n), once: true, .. } if n == "log_id"
        ));
        assert!(matches!(&entries[1], Entry::Rule { name: None, once: false, .. }));
        assert!(matches!(&entries[2], Entry::After { .. }));
        assert!(matches!(&entries[3], Entry::Terminate(p) if p.value() == "Bye bye!"));
    }

    #[test]
    fn parse_braced() {
        let input: TriggersInput = parse_quote! {
            { terminate "done" }
        };
        assert_eq!(input.entries.len(), 1);
    }

    #[test]
    fn unknown_keyword_is_rejected() {
        let result: Result<TriggersInput> = syn::parse2(quote! { sometimes "x" => f });
        assert!(result.is_err());
    }

    #[test]
    fn empty_phrase_is_rejected() {
        let result: Result<TriggersInput> = syn::parse2(quote! { terminate "" });
        assert!(result.is_err());
    }

    #[test]
    fn second_after_is_rejected() {
        let result: Result<TriggersInput> =
            syn::parse2(quote! { after "a" => "x", after "b" => "y" });
        assert!(result.is_err());
    }

    #[test]
    fn expansion_ends_in_build() {
        let input: TriggersInput = parse_quote! { once "ok" => f, terminate "bye" };
        let tokens = expand(input).to_string();
        assert!(tokens.contains("FirePolicy :: Once"));
        assert!(tokens.contains("terminate_on"));
        assert!(tokens.trim_end().ends_with("build ()"));
    }

    #[test]
    fn invalid_after_pattern_becomes_compile_error() {
        let input: TriggersInput = parse_quote! { after "(" => "x" };
        assert!(expand(input).to_string().contains("compile_error"));
    }
}
