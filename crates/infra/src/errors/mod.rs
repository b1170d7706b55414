//! Error mapping between backend clients and the store port.

pub mod conversions;

pub use conversions::{is_missing_table, IntoStoreError};
