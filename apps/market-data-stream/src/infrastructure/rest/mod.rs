//! REST adapters.

pub mod catalog;

pub use catalog::BybitRestCatalog;
