//! PKCS#12 certificates, canonicalization and XAdES-BES signing.
//!
//! ```no_run
//! use efactura::sign::{CertificateBundle, XadesSigner};
//!
//! let p12 = std::fs::read("firma.p12").unwrap();
//! let bundle = CertificateBundle::from_pkcs12(&p12, "password").unwrap();
//! let signed = XadesSigner::new(&bundle)
//!     .sign(r#"<factura id="comprobante" version="1.1.0"></factura>"#, chrono::Utc::now())
//!     .unwrap();
//! assert!(signed.contains("<ds:SignatureValue"));
//! ```

pub mod c14n;
mod certificate;
mod encryptor;
mod xades;

pub use certificate::{CertificateBundle, public_key_of};
pub use encryptor::{AesGcmEncryptor, CryptoError, Encryptor};
pub use xades::{DS_NS, ETSI_NS, XadesSigner, verify_enveloped_signature};
