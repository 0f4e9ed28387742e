//! CLI command handlers.

pub(crate) mod demo;
pub(crate) mod pricing;
