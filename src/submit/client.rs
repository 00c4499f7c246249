use std::time::Duration;

use async_trait::async_trait;

use super::soap::{self, AuthorizationResponse, ReceptionResponse};
use crate::config::Endpoints;

/// Error talking to the authority.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum GatewayError {
    /// Connection failure, timeout or a 5xx status. Worth retrying.
    #[error("authority network error: {0}")]
    Network(String),
    /// Non-retryable HTTP status.
    #[error("authority returned HTTP {0}: {1}")]
    Http(u16, String),
    /// The response could not be understood.
    #[error("authority response parse error: {0}")]
    Parse(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// The two authority operations a submission needs.
#[async_trait]
pub trait AuthorityGateway: Send + Sync {
    /// Submit a signed document for reception.
    async fn send(&self, signed_xml: &str) -> Result<ReceptionResponse, GatewayError>;

    /// Query the authorization state of an access key.
    async fn authorization(&self, access_key: &str) -> Result<AuthorizationResponse, GatewayError>;
}

/// SOAP client for the SRI offline reception and authorization services.
#[derive(Debug, Clone)]
pub struct SriSoapClient {
    http: reqwest::Client,
    endpoints: Endpoints,
}

impl SriSoapClient {
    pub fn new(endpoints: Endpoints, timeout: Duration) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Network(format!("HTTP client error: {e}")))?;
        Ok(Self { http, endpoints })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    async fn call(&self, url: &str, envelope: String) -> Result<String, GatewayError> {
        tracing::debug!(%url, bytes = envelope.len(), "SOAP request");
        let resp = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", "")
            .body(envelope)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| GatewayError::Network(format!("reading response: {e}")))?;

        // Faults come back as 500 with a SOAP body; let the parser report them.
        if status.is_server_error() && !body.contains("Fault>") {
            return Err(GatewayError::Network(format!("HTTP {status}")));
        }
        if !status.is_success() && !status.is_server_error() {
            return Err(GatewayError::Http(status.as_u16(), truncate(&body, 200)));
        }
        Ok(body)
    }
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[async_trait]
impl AuthorityGateway for SriSoapClient {
    async fn send(&self, signed_xml: &str) -> Result<ReceptionResponse, GatewayError> {
        let body = self
            .call(&self.endpoints.reception, soap::reception_envelope(signed_xml))
            .await?;
        soap::parse_reception(&body).map_err(GatewayError::Parse)
    }

    async fn authorization(&self, access_key: &str) -> Result<AuthorizationResponse, GatewayError> {
        let body = self
            .call(&self.endpoints.authorization, soap::authorization_envelope(access_key))
            .await?;
        soap::parse_authorization(&body).map_err(GatewayError::Parse)
    }
}
