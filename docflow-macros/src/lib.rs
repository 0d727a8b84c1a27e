//! Procedural macros for docflow.
//!
//! `#[derive(Record)]` implements `docflow::record::Record` for a struct with named fields:
//!
//! - `FIELDS` maps every declared field to its document name, honouring `#[serde(rename)]`,
//!   `#[serde(rename_all)]` and `#[serde(skip)]`
//! - `#[record(id)]`, `#[record(created_at)]` and `#[record(updated_at)]` on fields generate
//!   `custom_fields`
//! - `#[record(hooks)]` on the struct makes `hooks` return the record itself, which must then
//!   implement `RecordHooks`
//! - `#[validate(required, email, range(min = .., max = ..), min_len = .., max_len = ..)]` on
//!   fields generates `validate`
//!
//! ```ignore
//! #[derive(Serialize, Deserialize, Record)]
//! #[record(hooks)]
//! pub struct Account {
//!     #[serde(rename = "_id")]
//!     #[record(id)]
//!     pub id: ObjectId,
//!     #[record(created_at)]
//!     pub opened: DateTime,
//!     #[validate(required, email)]
//!     pub email: String,
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docflow_macros;

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    Data, DeriveInput, Expr, ExprLit, ExprUnary, Fields, Ident, Lit, LitStr, UnOp,
    meta::ParseNestedMeta, parse_macro_input, spanned::Spanned,
};

/// Derives `docflow::record::Record`. See the crate documentation for the attributes.
#[proc_macro_derive(Record, attributes(record, validate))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

#[derive(Default)]
struct FieldRoles {
    id: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
}

enum Check {
    Required,
    Email,
    Range { min: Option<TokenStream2>, max: Option<TokenStream2> },
    MinLen(TokenStream2),
    MaxLen(TokenStream2),
}

fn expand(input: DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new(
            input.span(),
            "Record can only be derived for structs with named fields",
        ));
    };
    let Fields::Named(fields) = &data.fields else {
        return Err(syn::Error::new(
            data.fields.span(),
            "Record can only be derived for structs with named fields",
        ));
    };

    let mut with_hooks = false;
    let mut rename_all = None;
    for attr in &input.attrs {
        if attr.path().is_ident("record") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("hooks") {
                    with_hooks = true;
                    Ok(())
                } else {
                    Err(meta.error("unknown record attribute, expected `hooks`"))
                }
            })?;
        } else if attr.path().is_ident("serde") {
            serde_meta(attr, |meta| {
                if meta.path.is_ident("rename_all") {
                    let value: LitStr = meta.value()?.parse()?;
                    rename_all = Some(value.value());
                }
                Ok(())
            })?;
        }
    }

    let mut mappings = Vec::new();
    let mut roles = FieldRoles::default();
    let mut checks = Vec::new();

    for field in &fields.named {
        let Some(ident) = &field.ident else { continue };
        let declared = ident.to_string().trim_start_matches("r#").to_string();

        let mut renamed = None;
        let mut skipped = false;
        let mut flattened = false;
        for attr in &field.attrs {
            if attr.path().is_ident("serde") {
                serde_meta(attr, |meta| {
                    if meta.path.is_ident("rename") {
                        let value: LitStr = meta.value()?.parse()?;
                        renamed = Some(value.value());
                    } else if meta.path.is_ident("skip") {
                        skipped = true;
                    } else if meta.path.is_ident("flatten") {
                        flattened = true;
                    }
                    Ok(())
                })?;
            } else if attr.path().is_ident("record") {
                attr.parse_nested_meta(|meta| {
                    let slot = if meta.path.is_ident("id") {
                        &mut roles.id
                    } else if meta.path.is_ident("created_at") {
                        &mut roles.created_at
                    } else if meta.path.is_ident("updated_at") {
                        &mut roles.updated_at
                    } else {
                        return Err(meta.error(
                            "unknown record attribute, expected `id`, `created_at` or `updated_at`",
                        ));
                    };
                    if slot.is_some() {
                        return Err(meta.error("field role declared twice"));
                    }
                    *slot = Some(declared.clone());
                    Ok(())
                })?;
            } else if attr.path().is_ident("validate") {
                attr.parse_nested_meta(|meta| {
                    checks.push((ident.clone(), parse_check(&meta)?));
                    Ok(())
                })?;
            }
        }

        // A flattened block contributes its own fields at the top level, which the
        // convention picks up by document name.
        if flattened {
            let has_role = [&roles.id, &roles.created_at, &roles.updated_at]
                .into_iter()
                .any(|role| role.as_deref() == Some(declared.as_str()));
            if has_role || checks.iter().any(|(checked, _)| checked == ident) {
                return Err(syn::Error::new(
                    field.span(),
                    "a flattened field cannot carry `record` roles or `validate` checks",
                ));
            }
            continue;
        }

        let document = renamed.unwrap_or_else(|| match &rename_all {
            Some(rule) => apply_rename_rule(&declared, rule),
            None => declared.clone(),
        });
        if !skipped {
            mappings.push((declared, document));
        }
    }

    let field_mappings = mappings.iter().map(|(declared, document)| {
        quote! {
            ::docflow::record::FieldMapping { declared: #declared, document: #document }
        }
    });

    let custom_fields = custom_fields(&roles);
    let hooks = with_hooks.then(|| {
        quote! {
            fn hooks(&self) -> ::core::option::Option<&dyn ::docflow::hook::RecordHooks> {
                ::core::option::Option::Some(self)
            }
        }
    });
    let validate = validate(&checks, &mappings);

    Ok(quote! {
        impl #impl_generics ::docflow::record::Record for #name #ty_generics #where_clause {
            const FIELDS: &'static [::docflow::record::FieldMapping] = &[#(#field_mappings),*];

            #custom_fields
            #hooks
            #validate
        }
    })
}

/// Walks a `#[serde(...)]` attribute, ignoring entries the callback does not consume.
fn serde_meta(
    attr: &syn::Attribute,
    mut visit: impl FnMut(&ParseNestedMeta<'_>) -> syn::Result<()>,
) -> syn::Result<()> {
    attr.parse_nested_meta(|meta| {
        // `rename(serialize = .., deserialize = ..)` is left alone.
        let renames = (meta.path.is_ident("rename") || meta.path.is_ident("rename_all"))
            && meta.input.peek(syn::Token![=]);
        let consumed = renames || meta.path.is_ident("skip") || meta.path.is_ident("flatten");
        if consumed {
            return visit(&meta);
        }

        // Skip `key = value` and `key(...)` entries of other serde options.
        if meta.input.peek(syn::Token![=]) {
            meta.value()?.parse::<Expr>()?;
        } else if meta.input.peek(syn::token::Paren) {
            meta.parse_nested_meta(|_| Ok(()))?;
        }
        Ok(())
    })
}

fn parse_check(meta: &ParseNestedMeta<'_>) -> syn::Result<Check> {
    if meta.path.is_ident("required") {
        Ok(Check::Required)
    } else if meta.path.is_ident("email") {
        Ok(Check::Email)
    } else if meta.path.is_ident("min_len") {
        Ok(Check::MinLen(length(meta)?))
    } else if meta.path.is_ident("max_len") {
        Ok(Check::MaxLen(length(meta)?))
    } else if meta.path.is_ident("range") {
        let mut min = None;
        let mut max = None;
        meta.parse_nested_meta(|bound| {
            let value = number(&bound.value()?.parse::<Expr>()?)?;
            if bound.path.is_ident("min") {
                min = Some(value);
            } else if bound.path.is_ident("max") {
                max = Some(value);
            } else {
                return Err(bound.error("expected `min` or `max`"));
            }
            Ok(())
        })?;
        if min.is_none() && max.is_none() {
            return Err(meta.error("range needs `min`, `max` or both"));
        }
        Ok(Check::Range { min, max })
    } else {
        Err(meta.error(
            "unknown validation, expected `required`, `email`, `range`, `min_len` or `max_len`",
        ))
    }
}

fn length(meta: &ParseNestedMeta<'_>) -> syn::Result<TokenStream2> {
    let value: syn::LitInt = meta.value()?.parse()?;
    let value: usize = value.base10_parse()?;
    Ok(quote! { #value })
}

/// A numeric literal, optionally negated, as an `f64` expression.
fn number(expr: &Expr) -> syn::Result<TokenStream2> {
    match expr {
        Expr::Lit(ExprLit { lit: Lit::Int(int), .. }) => {
            let value: f64 = int.base10_parse::<i64>()? as f64;
            Ok(quote! { #value })
        }
        Expr::Lit(ExprLit { lit: Lit::Float(float), .. }) => {
            let value: f64 = float.base10_parse()?;
            Ok(quote! { #value })
        }
        Expr::Unary(ExprUnary { op: UnOp::Neg(_), expr, .. }) => {
            let value = number(expr)?;
            Ok(quote! { -#value })
        }
        other => Err(syn::Error::new(other.span(), "expected a numeric literal")),
    }
}

fn custom_fields(roles: &FieldRoles) -> Option<TokenStream2> {
    if roles.id.is_none() && roles.created_at.is_none() && roles.updated_at.is_none() {
        return None;
    }

    let id = roles.id.as_ref().map(|field| quote! { .set_id(#field) });
    let created_at = roles.created_at.as_ref().map(|field| quote! { .set_created_at(#field) });
    let updated_at = roles.updated_at.as_ref().map(|field| quote! { .set_updated_at(#field) });

    Some(quote! {
        fn custom_fields() -> ::core::option::Option<::docflow::field::CustomFields> {
            ::core::option::Option::Some(
                ::docflow::field::CustomFields::new() #id #created_at #updated_at
            )
        }
    })
}

fn validate(checks: &[(Ident, Check)], mappings: &[(String, String)]) -> Option<TokenStream2> {
    if checks.is_empty() {
        return None;
    }

    let calls = checks.iter().map(|(ident, check)| {
        let declared = ident.to_string().trim_start_matches("r#").to_string();
        let field = mappings
            .iter()
            .find(|(name, _)| *name == declared)
            .map_or(declared.clone(), |(_, document)| document.clone());

        match check {
            Check::Required => quote! { violations.required(#field, &self.#ident); },
            Check::Email => quote! { violations.email(#field, &self.#ident); },
            Check::MinLen(min) => quote! { violations.min_len(#field, &self.#ident, #min); },
            Check::MaxLen(max) => quote! { violations.max_len(#field, &self.#ident, #max); },
            Check::Range { min, max } => {
                let min = option(min);
                let max = option(max);
                quote! { violations.range(#field, &self.#ident, #min, #max); }
            }
        }
    });

    Some(quote! {
        fn validate(&self) -> ::docflow::error::DocumentStoreResult<()> {
            let mut violations = ::docflow::validate::Violations::new();
            #(#calls)*
            violations.into_result()
        }
    })
}

fn option(value: &Option<TokenStream2>) -> TokenStream2 {
    match value {
        Some(value) => quote! { ::core::option::Option::Some(#value) },
        None => quote! { ::core::option::Option::None },
    }
}

/// Applies a serde `rename_all` rule to a snake_case field name.
fn apply_rename_rule(field: &str, rule: &str) -> String {
    let words = || field.split('_').filter(|word| !word.is_empty());
    let capitalize = |word: &str| {
        let mut chars = word.chars();
        chars
            .next()
            .map(|first| first.to_uppercase().chain(chars).collect::<String>())
            .unwrap_or_default()
    };

    match rule {
        "lowercase" => field.to_lowercase(),
        "UPPERCASE" => field.to_uppercase(),
        "PascalCase" => words().map(capitalize).collect(),
        "camelCase" => words()
            .enumerate()
            .map(|(i, word)| if i == 0 { word.to_string() } else { capitalize(word) })
            .collect(),
        "SCREAMING_SNAKE_CASE" => field.to_uppercase(),
        "kebab-case" => field.replace('_', "-"),
        "SCREAMING-KEBAB-CASE" => field.replace('_', "-").to_uppercase(),
        _ => field.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_rules_follow_serde() {
        assert_eq!(apply_rename_rule("created_at", "camelCase"), "createdAt");
        assert_eq!(apply_rename_rule("created_at", "PascalCase"), "CreatedAt");
        assert_eq!(apply_rename_rule("created_at", "kebab-case"), "created-at");
        assert_eq!(apply_rename_rule("created_at", "SCREAMING_SNAKE_CASE"), "CREATED_AT");
        assert_eq!(apply_rename_rule("age", "snake_case"), "age");
    }

    #[test]
    fn expands_fields_roles_and_checks() {
        let input: DeriveInput = syn::parse_quote! {
            #[serde(rename_all = "camelCase")]
            #[record(hooks)]
            struct Account {
                #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
                #[record(id)]
                id: Option<ObjectId>,
                #[record(created_at)]
                opened_at: DateTime,
                #[validate(required, email)]
                e_mail: String,
                #[validate(range(min = -1, max = 2.5))]
                score: f64,
                #[serde(skip)]
                cache: u8,
            }
        };

        let expanded = expand(input).unwrap().to_string();
        assert!(expanded.contains("declared : \"opened_at\" , document : \"openedAt\""));
        assert!(expanded.contains("declared : \"id\" , document : \"_id\""));
        assert!(!expanded.contains("\"cache\""));
        assert!(expanded.contains("set_id (\"id\")"));
        assert!(expanded.contains("set_created_at (\"opened_at\")"));
        assert!(expanded.contains("violations . email (\"eMail\""));
        assert!(expanded.contains("fn hooks"));
    }

    #[test]
    fn flattened_blocks_are_left_to_the_convention() {
        let input: DeriveInput = syn::parse_quote! {
            struct Post {
                #[serde(flatten)]
                base: DefaultField,
                title: String,
            }
        };
        let expanded = expand(input).unwrap().to_string();
        assert!(!expanded.contains("\"base\""));
        assert!(expanded.contains("declared : \"title\" , document : \"title\""));
        assert!(!expanded.contains("custom_fields"));

        let input: DeriveInput = syn::parse_quote! {
            struct Post {
                #[serde(flatten)]
                #[record(id)]
                base: DefaultField,
            }
        };
        assert!(expand(input).is_err());
    }

    #[test]
    fn rejects_unknown_attributes() {
        let input: DeriveInput = syn::parse_quote! {
            struct Broken {
                #[validate(uuid)]
                id: String,
            }
        };
        assert!(expand(input).is_err());

        let input: DeriveInput = syn::parse_quote! {
            struct Tuple(u8);
        };
        assert!(expand(input).is_err());
    }
}
