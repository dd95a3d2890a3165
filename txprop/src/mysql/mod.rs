//! MySQL provider for txprop

mod client;
mod executor;
mod transaction;

pub use client::MySqlClient;
pub use executor::{ExecuteResult, Executor};
pub use transaction::MySqlTransaction;
