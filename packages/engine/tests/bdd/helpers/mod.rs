//! Shared helpers for the BDD steps

pub mod law_loader;
pub mod value_conversion;
