//! Service configuration and the explicit per-tenant fiscal context.
//!
//! Nothing here is process-global: callers build a [`TenantFiscalContext`]
//! for each request and pass it down the pipeline.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{
    DocumentType, Environment, FiscalError, IssuerProfile, RetryPolicy, ValidationError,
};

const TEST_HOST: &str = "https://celcer.sri.gob.ec";
const PRODUCTION_HOST: &str = "https://cel.sri.gob.ec";
const RECEPTION_PATH: &str =
    "/comprobantes-electronicos-ws/RecepcionComprobantesOffline";
const AUTHORIZATION_PATH: &str =
    "/comprobantes-electronicos-ws/AutorizacionComprobantesOffline";

/// Reception and authorization web service URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub reception: String,
    pub authorization: String,
}

impl Endpoints {
    /// Published endpoints for `environment`.
    pub fn for_environment(environment: Environment) -> Self {
        let host = match environment {
            Environment::Test => TEST_HOST,
            Environment::Production => PRODUCTION_HOST,
        };
        Self {
            reception: format!("{host}{RECEPTION_PATH}"),
            authorization: format!("{host}{AUTHORIZATION_PATH}"),
        }
    }
}

/// Process-level settings, loaded from `EFACTURA__*` environment variables.
///
/// ```text
/// EFACTURA__REQUEST_TIMEOUT_SECS=20
/// EFACTURA__SUBMISSION__MAX_ATTEMPTS=4
/// EFACTURA__ARTIFACT_DIR=/var/lib/efactura
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Per-request HTTP timeout towards the authority.
    pub request_timeout_secs: u64,
    /// Network retries for reception and authorization calls.
    pub submission: RetryPolicy,
    /// Authorization polls after a successful reception.
    pub max_polls: u32,
    pub poll_interval_ms: u64,
    /// Lock-conflict retries for sequential allocation.
    pub allocation: RetryPolicy,
    /// Root directory for XML/PDF/CDR artifacts.
    pub artifact_dir: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            submission: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(500),
                multiplier: 2,
                max_delay: Duration::from_secs(8),
            },
            max_polls: 5,
            poll_interval_ms: 1_000,
            allocation: RetryPolicy::default(),
            artifact_dir: PathBuf::from("artifacts"),
        }
    }
}

impl ServiceConfig {
    /// Load from the process environment, falling back to defaults.
    pub fn from_env() -> Result<Self, FiscalError> {
        config::Config::builder()
            .add_source(
                config::Environment::with_prefix("EFACTURA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| FiscalError::Config(e.to_string()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// A sensitive string whose `Debug` output is redacted.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Establishment and emission point used for a document type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    pub establishment: String,
    pub emission_point: String,
}

impl Series {
    pub fn validate(&self) -> Result<(), FiscalError> {
        let mut errors = Vec::new();
        for (field, value) in [
            ("establishment", &self.establishment),
            ("emission_point", &self.emission_point),
        ] {
            if value.len() != 3 || !value.bytes().all(|b| b.is_ascii_digit()) {
                errors.push(ValidationError::new(format!("series.{field}"), "must be 3 digits"));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(FiscalError::Validation(errors))
        }
    }
}

/// Stored tenant settings, as kept by the surrounding ERP.
///
/// The certificate password is only ever stored encrypted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantFiscalSettings {
    pub company_id: String,
    pub issuer: IssuerProfile,
    pub environment: Environment,
    pub certificate_path: PathBuf,
    /// `<key-id>:<base64>` ciphertext produced by an `Encryptor`.
    pub encrypted_certificate_password: String,
    #[serde(default)]
    pub series: HashMap<DocumentType, Series>,
    #[serde(default)]
    pub endpoints: Option<Endpoints>,
}

/// Everything one pipeline run needs to know about the issuing tenant.
#[derive(Debug, Clone)]
pub struct TenantFiscalContext {
    pub company_id: String,
    pub issuer: IssuerProfile,
    pub environment: Environment,
    /// Tenant overrides; `None` means the environment defaults.
    pub endpoints: Option<Endpoints>,
    /// Series per document type. Types without one keep the draft's own.
    pub series: HashMap<DocumentType, Series>,
    /// PKCS#12 bundle bytes.
    pub certificate: Vec<u8>,
    /// Decrypted bundle password. Dropped with the context.
    pub certificate_password: Secret,
}

impl TenantFiscalContext {
    /// Tenant overrides win over the environment defaults.
    pub fn endpoints(&self) -> Endpoints {
        self.endpoints
            .clone()
            .unwrap_or_else(|| Endpoints::for_environment(self.environment))
    }
}
