//! Core traits for txprop

mod provider;

pub use provider::{IsolationLevel, TransactionProvider};
