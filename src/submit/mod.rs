//! Submission to the tax authority: SOAP transport and the
//! reception/authorization state machine.

mod client;
pub mod soap;
mod submitter;

pub use client::{AuthorityGateway, GatewayError, SriSoapClient};
pub use soap::{AuthorizationRecord, AuthorizationResponse, ReceptionResponse, ReceptionState};
pub use submitter::{SubmissionState, Submitter};
