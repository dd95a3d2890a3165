//! Attribute macro for txprop
//!
//! This crate provides `#[transactional(...)]`, which turns an `async fn`
//! into a transactional unit of work run through a `TransactionManager`.
//!
//! The macro is re-exported from the `txprop` crate, so users typically
//! don't need to depend on this crate directly.

use proc_macro::TokenStream;
use syn::{parse_macro_input, ItemFn};

mod transactional;

/// Run an `async fn` as a transactional unit of work.
///
/// # Attributes
///
/// - `manager = <expr>` - Expression yielding the `TransactionManager` (required)
/// - `propagation = "REQUIRES_NEW"` - Propagation policy, defaults to the manager's configuration
/// - `isolation = "serializable"` - Isolation level for a newly started transaction
/// - `client = "name"` - Registered client to run against, defaults to `"default"`
///
/// The function must be `async` and return a `Result` whose error type
/// implements `From<txprop::Error>`. Its body must produce a `Send` future.
///
/// # Example
///
/// ```ignore
/// use txprop::transactional;
///
/// #[transactional(manager = app.manager(), propagation = "REQUIRES_NEW")]
/// async fn record_login(app: &App, user_id: i64) -> Result<(), AppError> {
///     app.audit().put(format!("login:{user_id}"), "ok")?;
///     Ok(())
/// }
/// ```
#[proc_macro_attribute]
pub fn transactional(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut args = transactional::TransactionalArgs::default();
    let parser = syn::meta::parser(|meta| args.parse(meta));
    parse_macro_input!(attr with parser);

    let item = parse_macro_input!(item as ItemFn);
    transactional::transactional_impl(args, item)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}
