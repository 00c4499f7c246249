//! Core fiscal document types, tax calculation, numbering and access keys.
//!
//! Everything here is pure or storage-agnostic; signing, submission and
//! persistence live behind their own feature flags.

pub mod access_key;
mod builder;
mod error;
pub mod lifecycle;
mod numbering;
pub mod tax;
mod types;

pub use access_key::{AccessKey, AccessKeyParts, NumericCode};
pub use builder::*;
pub use error::*;
pub use numbering::*;
pub use tax::{ExciseTotal, TaxSummary, VatBucketTotal};
pub use types::*;
