//! Configuration for the transaction engine

pub mod defaults;
mod settings;

pub use settings::TransactionalConfig;
