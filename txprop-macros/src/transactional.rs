//! transactional attribute macro implementation

use proc_macro2::{Span, TokenStream};
use quote::quote;
use syn::meta::ParseNestedMeta;
use syn::{spanned::Spanned, Error, Expr, Ident, ItemFn, LitStr, Result, ReturnType};

const PROPAGATIONS: &[(&str, &str)] = &[
    ("REQUIRED", "Required"),
    ("REQUIRES_NEW", "RequiresNew"),
    ("NESTED", "Nested"),
    ("MANDATORY", "Mandatory"),
    ("NEVER", "Never"),
    ("NOT_SUPPORTED", "NotSupported"),
    ("SUPPORTS", "Supports"),
];

const ISOLATION_LEVELS: &[(&str, &str)] = &[
    ("readuncommitted", "ReadUncommitted"),
    ("readcommitted", "ReadCommitted"),
    ("repeatableread", "RepeatableRead"),
    ("serializable", "Serializable"),
];

/// Parsed `#[transactional(...)]` arguments
#[derive(Default)]
pub struct TransactionalArgs {
    manager: Option<Expr>,
    propagation: Option<Ident>,
    isolation: Option<Ident>,
    client: Option<LitStr>,
}

impl TransactionalArgs {
    pub fn parse(&mut self, meta: ParseNestedMeta) -> Result<()> {
        if meta.path.is_ident("manager") {
            self.manager = Some(meta.value()?.parse()?);
        } else if meta.path.is_ident("propagation") {
            let lit: LitStr = meta.value()?.parse()?;
            self.propagation = Some(variant_ident(&lit, propagation_variant(&lit.value()), "propagation")?);
        } else if meta.path.is_ident("isolation") {
            let lit: LitStr = meta.value()?.parse()?;
            self.isolation = Some(variant_ident(&lit, isolation_variant(&lit.value()), "isolation level")?);
        } else if meta.path.is_ident("client") {
            self.client = Some(meta.value()?.parse()?);
        } else {
            return Err(meta.error(format!(
                "unknown transactional attribute `{}`",
                meta.path
                    .get_ident()
                    .map(|i| i.to_string())
                    .unwrap_or_default()
            )));
        }
        Ok(())
    }
}

fn variant_ident(lit: &LitStr, variant: Option<&str>, what: &str) -> Result<Ident> {
    variant
        .map(|name| Ident::new(name, lit.span()))
        .ok_or_else(|| Error::new(lit.span(), format!("unknown {} `{}`", what, lit.value())))
}

/// Map a propagation name such as `requires-new` to its variant name.
fn propagation_variant(value: &str) -> Option<&'static str> {
    let normalized = value.trim().replace('-', "_").to_ascii_uppercase();
    PROPAGATIONS
        .iter()
        .find(|(name, _)| *name == normalized)
        .map(|(_, variant)| *variant)
}

/// Map an isolation level name such as `READ COMMITTED` to its variant name.
fn isolation_variant(value: &str) -> Option<&'static str> {
    let normalized: String = value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    ISOLATION_LEVELS
        .iter()
        .find(|(name, _)| *name == normalized)
        .map(|(_, variant)| *variant)
}

pub fn transactional_impl(args: TransactionalArgs, item: ItemFn) -> Result<TokenStream> {
    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = item;

    if sig.asyncness.is_none() {
        return Err(Error::new(
            sig.fn_token.span(),
            "#[transactional] can only be applied to an async fn",
        ));
    }
    let output = match &sig.output {
        ReturnType::Type(_, ty) => ty,
        ReturnType::Default => {
            return Err(Error::new(
                sig.ident.span(),
                "#[transactional] functions must return a Result",
            ))
        }
    };
    let manager = args.manager.ok_or_else(|| {
        Error::new(
            Span::call_site(),
            "missing `manager = ...` in #[transactional]",
        )
    })?;

    let propagation = match args.propagation {
        Some(variant) => quote! { ::core::option::Option::Some(::txprop::Propagation::#variant) },
        None => quote! { ::core::option::Option::None },
    };
    let isolation = match args.isolation {
        Some(variant) => quote! { ::core::option::Option::Some(::txprop::IsolationLevel::#variant) },
        None => quote! { ::core::option::Option::None },
    };
    let client = match args.client {
        Some(name) => quote! { ::core::option::Option::Some(::std::string::String::from(#name)) },
        None => quote! { ::core::option::Option::None },
    };

    Ok(quote! {
        #(#attrs)*
        #vis #sig {
            let __txprop_options = ::txprop::TransactionOptions {
                propagation: #propagation,
                isolation: #isolation,
                client: #client,
            };
            (#manager)
                .run(__txprop_options, move || async move {
                    let __txprop_result: #output = #block;
                    __txprop_result
                })
                .await
        }
    })
}
