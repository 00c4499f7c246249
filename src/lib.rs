//! # efactura
//!
//! Electronic fiscal documents for Ecuador's SRI: tax totals, gap-free
//! sequentials, 49-digit access keys, authority XML, XAdES-BES signing,
//! submission with retries and archiving of the authorized artifacts.
//!
//! All monetary values use [`rust_decimal::Decimal`], never floating point.
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::NaiveDate;
//! use efactura::core::*;
//! use rust_decimal_macros::dec;
//!
//! let invoice = FiscalDocumentBuilder::new(
//!         "acme",
//!         DocumentType::Invoice,
//!         NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
//!     )
//!     .buyer(PartyBuilder::final_consumer().build())
//!     .add_line(LineBuilder::new("SRV-1", "Mantenimiento", dec!(1), dec!(100)).build())
//!     .add_line(
//!         LineBuilder::new("LIB-1", "Libro", dec!(1), dec!(50))
//!             .vat(VatRate::Zero)
//!             .build(),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let totals = invoice.totals.unwrap();
//! assert_eq!(totals.vat_total, dec!(15.00));
//! assert_eq!(totals.grand_total, dec!(165.00));
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `core` (default) | Document types, tax calculator, sequencing, access keys, lifecycle |
//! | `xml` | Authority XML for invoices, notes, liquidations and withholdings |
//! | `sign` | PKCS#12 certificates, C14N, XAdES-BES signing, secret encryption |
//! | `submit` | SOAP reception/authorization client and submission state machine |
//! | `ride` | Printable PDF representation |
//! | `store` | Document repository and artifact storage |
//! | `service` | `generate` / `resend` / `download` / `cancel` facade |
//! | `all` | Everything |

pub mod logging;

#[cfg(feature = "core")]
pub mod core;

#[cfg(feature = "core")]
pub mod config;

#[cfg(feature = "xml")]
pub mod xml;

#[cfg(feature = "sign")]
pub mod sign;

#[cfg(feature = "submit")]
pub mod submit;

#[cfg(feature = "ride")]
pub mod ride;

#[cfg(feature = "store")]
pub mod store;

#[cfg(feature = "service")]
pub mod service;

// Re-export core types at crate root for convenience
#[cfg(feature = "core")]
pub use crate::core::*;
