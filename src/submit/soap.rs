//! SOAP envelopes for the reception and authorization web services and
//! parsers for their responses.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::core::{AttemptStatus, AuthorityMessage};
use crate::xml::tree::{self, Element};

pub const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const RECEPTION_NS: &str = "http://ec.gob.sri.ws.recepcion";
pub const AUTHORIZATION_NS: &str = "http://ec.gob.sri.ws.autorizacion";

/// Reception message id meaning the access key was already received.
pub const ALREADY_RECEIVED: &str = "43";

/// Envelope submitting a signed document (base64 in `<xml>`).
pub fn reception_envelope(signed_xml: &str) -> String {
    format!(
        "<soapenv:Envelope xmlns:soapenv=\"{SOAP_ENV_NS}\" xmlns:ec=\"{RECEPTION_NS}\">\
         <soapenv:Header/><soapenv:Body><ec:validarComprobante>\
         <xml>{}</xml>\
         </ec:validarComprobante></soapenv:Body></soapenv:Envelope>",
        STANDARD.encode(signed_xml.as_bytes())
    )
}

/// Envelope querying the authorization status of `access_key`.
pub fn authorization_envelope(access_key: &str) -> String {
    format!(
        "<soapenv:Envelope xmlns:soapenv=\"{SOAP_ENV_NS}\" xmlns:ec=\"{AUTHORIZATION_NS}\">\
         <soapenv:Header/><soapenv:Body><ec:autorizacionComprobante>\
         <claveAccesoComprobante>{access_key}</claveAccesoComprobante>\
         </ec:autorizacionComprobante></soapenv:Body></soapenv:Envelope>"
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceptionState {
    /// `RECIBIDA`: queued for authorization.
    Received,
    /// `DEVUELTA`: refused before authorization.
    Returned,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceptionResponse {
    pub state: ReceptionState,
    pub messages: Vec<AuthorityMessage>,
    pub raw: String,
}

impl ReceptionResponse {
    /// A `DEVUELTA` carrying message 43: the key is already on file, so
    /// the authorization endpoint has the real answer.
    pub fn already_received(&self) -> bool {
        self.messages.iter().any(|m| m.identifier == ALREADY_RECEIVED)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationRecord {
    pub status: AttemptStatus,
    pub number: Option<String>,
    pub authorized_at: Option<DateTime<Utc>>,
    /// Document as returned by the authority, usually the signed XML.
    pub document: Option<String>,
    pub messages: Vec<AuthorityMessage>,
    /// The `<autorizacion>` element, kept as the authorization receipt.
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationResponse {
    pub access_key: Option<String>,
    pub records: Vec<AuthorizationRecord>,
    pub raw: String,
}

impl AuthorizationResponse {
    /// The record that decides the outcome: an authorized one if any,
    /// otherwise the first.
    pub fn decisive(&self) -> Option<&AuthorizationRecord> {
        self.records
            .iter()
            .find(|r| r.status == AttemptStatus::Accepted)
            .or_else(|| self.records.first())
    }
}

fn body(envelope: &str) -> Result<Element, String> {
    let root = tree::parse(envelope)?;
    if let Some(fault) = root.find_local("Fault") {
        let reason = fault
            .child_text("faultstring")
            .unwrap_or_else(|| "unspecified fault".into());
        return Err(format!("SOAP fault: {reason}"));
    }
    root.find_local("Body")
        .cloned()
        .ok_or_else(|| "response has no SOAP body".into())
}

pub fn parse_reception(envelope: &str) -> Result<ReceptionResponse, String> {
    let body = body(envelope)?;
    let answer = body
        .find_local("RespuestaRecepcionComprobante")
        .ok_or("missing RespuestaRecepcionComprobante")?;
    let state = match answer.child_text("estado").as_deref() {
        Some("RECIBIDA") => ReceptionState::Received,
        Some("DEVUELTA") => ReceptionState::Returned,
        Some(other) => return Err(format!("unknown reception state {other:?}")),
        None => return Err("reception response without estado".into()),
    };
    let messages = answer
        .find_local("comprobantes")
        .map(|c| c.elements().flat_map(messages_of).collect())
        .unwrap_or_default();
    Ok(ReceptionResponse {
        state,
        messages,
        raw: envelope.to_string(),
    })
}

pub fn parse_authorization(envelope: &str) -> Result<AuthorizationResponse, String> {
    let body = body(envelope)?;
    let answer = body
        .find_local("RespuestaAutorizacionComprobante")
        .ok_or("missing RespuestaAutorizacionComprobante")?;

    let records = match answer.find_local("autorizaciones") {
        Some(list) => list
            .elements()
            .filter(|e| e.local_name() == "autorizacion")
            .map(record_of)
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    Ok(AuthorizationResponse {
        access_key: answer.child_text("claveAccesoConsultada"),
        records,
        raw: envelope.to_string(),
    })
}

fn record_of(element: &Element) -> Result<AuthorizationRecord, String> {
    let status = match element.child_text("estado").as_deref() {
        Some("AUTORIZADO") => AttemptStatus::Accepted,
        Some("NO AUTORIZADO") | Some("RECHAZADA") => AttemptStatus::Rejected,
        Some("EN PROCESO") | Some("EN PROCESAMIENTO") => AttemptStatus::Pending,
        Some(other) => return Err(format!("unknown authorization state {other:?}")),
        None => return Err("authorization without estado".into()),
    };
    Ok(AuthorizationRecord {
        status,
        number: element.child_text("numeroAutorizacion").filter(|n| !n.is_empty()),
        authorized_at: element
            .child_text("fechaAutorizacion")
            .and_then(|d| parse_timestamp(&d)),
        document: element.child_text("comprobante").filter(|c| !c.is_empty()),
        messages: messages_of(element),
        raw: element.to_xml(),
    })
}

/// Messages listed under a `<mensajes>` child of `parent`.
fn messages_of(parent: &Element) -> Vec<AuthorityMessage> {
    parent
        .elements()
        .filter(|e| e.local_name() == "mensajes")
        .flat_map(|list| list.elements())
        .filter(|e| e.local_name() == "mensaje")
        .map(|m| AuthorityMessage {
            identifier: m.child_text("identificador").unwrap_or_default(),
            message: m.child_text("mensaje").unwrap_or_default(),
            additional_info: m.child_text("informacionAdicional").filter(|i| !i.is_empty()),
            kind: m.child_text("tipo").unwrap_or_default(),
        })
        .collect()
}

/// Authorization timestamps come as RFC 3339 or as `dd/mm/yyyy HH:MM:SS`
/// in Ecuador time (UTC-5).
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(value, "%d/%m/%Y %H:%M:%S").ok()?;
    let offset = chrono::FixedOffset::west_opt(5 * 3600)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}
