//! XAdES-BES enveloped signatures (RSA-SHA1, inclusive C14N 1.0 via libxml2).

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, SecondsFormat, Utc};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use sha1::{Digest, Sha1};
use x509_cert::Certificate;
use x509_cert::der::Decode;

use super::c14n::{self, Element, NamespaceScope};
use super::certificate::{CertificateBundle, public_key_of};
use crate::core::FiscalError;

pub const DS_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const ETSI_NS: &str = "http://uri.etsi.org/01903/v1.3.2#";
const C14N_ALG: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
const RSA_SHA1_ALG: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
const SHA1_ALG: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
const ENVELOPED_ALG: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
const SIGNED_PROPERTIES_TYPE: &str = "http://uri.etsi.org/01903#SignedProperties";
const SIGNATURE_ELEMENT: &str = "ds:Signature";

fn build_error(message: impl Into<String>) -> FiscalError {
    FiscalError::Build(message.into())
}

fn sha1_base64(data: &[u8]) -> String {
    STANDARD.encode(Sha1::digest(data))
}

fn is_signature(element: &Element) -> bool {
    element.name == SIGNATURE_ELEMENT
}

fn signature_scope() -> NamespaceScope {
    NamespaceScope::from([
        ("ds".to_string(), DS_NS.to_string()),
        ("etsi".to_string(), ETSI_NS.to_string()),
    ])
}

fn digest_method() -> Element {
    Element::new("ds:DigestMethod").attr("Algorithm", SHA1_ALG)
}

/// Element ids, all derived from one number so output is reproducible.
struct Ids {
    signature: String,
    signed_info: String,
    signed_properties: String,
    signed_properties_ref: String,
    certificate: String,
    document_ref: String,
    signature_value: String,
    object: String,
}

impl Ids {
    fn new(seed: u32) -> Self {
        let signature = format!("Signature{seed}");
        Self {
            signed_info: format!("Signature-SignedInfo{seed}"),
            signed_properties: format!("{signature}-SignedProperties{seed}"),
            signed_properties_ref: format!("SignedPropertiesID{seed}"),
            certificate: format!("Certificate{seed}"),
            document_ref: format!("Reference-ID-{seed}"),
            signature_value: format!("SignatureValue{seed}"),
            object: format!("{signature}-Object{seed}"),
            signature,
        }
    }
}

/// Signs authority documents with the tenant's certificate.
pub struct XadesSigner<'a> {
    bundle: &'a CertificateBundle,
}

impl<'a> XadesSigner<'a> {
    pub fn new(bundle: &'a CertificateBundle) -> Self {
        Self { bundle }
    }

    /// Append an enveloped XAdES-BES signature to the root of `xml`.
    ///
    /// The result is re-verified before it is returned; a signature that
    /// does not verify is reported as [`FiscalError::Build`].
    pub fn sign(&self, xml: &str, signing_time: DateTime<Utc>) -> Result<String, FiscalError> {
        let mut root = c14n::parse(xml).map_err(|e| build_error(format!("unsigned XML: {e}")))?;
        let root_id = root
            .get_attr("id")
            .ok_or_else(|| build_error("root element has no id attribute"))?
            .to_string();
        if root.elements().any(is_signature) {
            return Err(build_error("document is already signed"));
        }

        let document_c14n = c14n::canonicalize_enveloped(xml)?;
        let document_digest = Sha1::digest(document_c14n.as_bytes());
        let seed = u32::from_be_bytes([
            document_digest[0],
            document_digest[1],
            document_digest[2],
            document_digest[3],
        ]) % 1_000_000;
        let ids = Ids::new(seed);
        let scope = signature_scope();

        let key_info = self.key_info(&ids);
        let key_info_digest = sha1_base64(c14n::canonicalize(&key_info, &scope)?.as_bytes());

        let signed_properties = self.signed_properties(&ids, signing_time);
        let signed_properties_digest =
            sha1_base64(c14n::canonicalize(&signed_properties, &scope)?.as_bytes());

        let signed_info = Element::new("ds:SignedInfo")
            .attr("Id", &ids.signed_info)
            .child(Element::new("ds:CanonicalizationMethod").attr("Algorithm", C14N_ALG))
            .child(Element::new("ds:SignatureMethod").attr("Algorithm", RSA_SHA1_ALG))
            .child(
                Element::new("ds:Reference")
                    .attr("Id", &ids.signed_properties_ref)
                    .attr("Type", SIGNED_PROPERTIES_TYPE)
                    .attr("URI", format!("#{}", ids.signed_properties))
                    .child(digest_method())
                    .child(Element::leaf("ds:DigestValue", signed_properties_digest)),
            )
            .child(
                Element::new("ds:Reference")
                    .attr("URI", format!("#{}", ids.certificate))
                    .child(digest_method())
                    .child(Element::leaf("ds:DigestValue", key_info_digest)),
            )
            .child(
                Element::new("ds:Reference")
                    .attr("Id", &ids.document_ref)
                    .attr("URI", format!("#{root_id}"))
                    .child(
                        Element::new("ds:Transforms").child(
                            Element::new("ds:Transform").attr("Algorithm", ENVELOPED_ALG),
                        ),
                    )
                    .child(digest_method())
                    .child(Element::leaf(
                        "ds:DigestValue",
                        STANDARD.encode(document_digest),
                    )),
            );

        let signed_info_c14n = c14n::canonicalize(&signed_info, &scope)?;
        let signing_key = SigningKey::<Sha1>::new(self.bundle.private_key().clone());
        let signature_value =
            STANDARD.encode(signing_key.sign(signed_info_c14n.as_bytes()).to_bytes());

        let signature = Element::new(SIGNATURE_ELEMENT)
            .attr("xmlns:ds", DS_NS)
            .attr("xmlns:etsi", ETSI_NS)
            .attr("Id", &ids.signature)
            .child(signed_info)
            .child(
                Element::leaf("ds:SignatureValue", signature_value)
                    .attr("Id", &ids.signature_value),
            )
            .child(key_info)
            .child(
                Element::new("ds:Object").attr("Id", &ids.object).child(
                    Element::new("etsi:QualifyingProperties")
                        .attr("Target", format!("#{}", ids.signature))
                        .child(signed_properties),
                ),
            );
        root.children.push(c14n::Node::Element(signature));

        let signed = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>{}",
            c14n::canonicalize(&root, &NamespaceScope::new())?
        );
        verify_enveloped_signature(&signed)
            .map_err(|e| build_error(format!("signature self-check failed: {e}")))?;
        Ok(signed)
    }

    fn key_info(&self, ids: &Ids) -> Element {
        let (modulus, exponent) = self.bundle.rsa_key_value();
        Element::new("ds:KeyInfo")
            .attr("Id", &ids.certificate)
            .child(Element::new("ds:X509Data").child(Element::leaf(
                "ds:X509Certificate",
                self.bundle.certificate_base64(),
            )))
            .child(
                Element::new("ds:KeyValue").child(
                    Element::new("ds:RSAKeyValue")
                        .child(Element::leaf("ds:Modulus", modulus))
                        .child(Element::leaf("ds:Exponent", exponent)),
                ),
            )
    }

    fn signed_properties(&self, ids: &Ids, signing_time: DateTime<Utc>) -> Element {
        Element::new("etsi:SignedProperties")
            .attr("Id", &ids.signed_properties)
            .child(
                Element::new("etsi:SignedSignatureProperties")
                    .child(Element::leaf(
                        "etsi:SigningTime",
                        signing_time.to_rfc3339_opts(SecondsFormat::Secs, true),
                    ))
                    .child(
                        Element::new("etsi:SigningCertificate").child(
                            Element::new("etsi:Cert")
                                .child(
                                    Element::new("etsi:CertDigest")
                                        .child(digest_method())
                                        .child(Element::leaf(
                                            "ds:DigestValue",
                                            self.bundle.certificate_digest(),
                                        )),
                                )
                                .child(
                                    Element::new("etsi:IssuerSerial")
                                        .child(Element::leaf(
                                            "ds:X509IssuerName",
                                            self.bundle.issuer_name(),
                                        ))
                                        .child(Element::leaf(
                                            "ds:X509SerialNumber",
                                            self.bundle.serial_number(),
                                        )),
                                ),
                        ),
                    ),
            )
            .child(
                Element::new("etsi:SignedDataObjectProperties").child(
                    Element::new("etsi:DataObjectFormat")
                        .attr("ObjectReference", format!("#{}", ids.document_ref))
                        .child(Element::leaf("etsi:Description", "contenido comprobante"))
                        .child(Element::leaf("etsi:MimeType", "text/xml")),
                ),
            )
    }
}

/// Check every reference digest and the RSA signature value of an
/// enveloped signature against the embedded certificate.
pub fn verify_enveloped_signature(signed_xml: &str) -> Result<(), FiscalError> {
    let root = c14n::parse(signed_xml).map_err(|e| build_error(format!("signed XML: {e}")))?;
    let signature = root
        .elements()
        .find(|e| is_signature(e))
        .ok_or_else(|| build_error("no enveloped ds:Signature"))?;
    let mut scope = NamespaceScope::new();
    for (prefix, uri) in signature.declared_namespaces() {
        scope.insert(prefix.to_string(), uri.to_string());
    }

    let signed_info = signature
        .first_child("ds:SignedInfo")
        .ok_or_else(|| build_error("missing ds:SignedInfo"))?;

    let mut references = 0;
    for reference in signed_info.elements().filter(|e| e.name == "ds:Reference") {
        references += 1;
        let uri = reference
            .get_attr("URI")
            .and_then(|u| u.strip_prefix('#'))
            .ok_or_else(|| build_error("reference without a same-document URI"))?;
        let expected = reference
            .first_child("ds:DigestValue")
            .map(|d| d.text_content())
            .ok_or_else(|| build_error("reference without ds:DigestValue"))?;

        let canonical = if root.get_attr("id") == Some(uri) {
            c14n::canonicalize_enveloped(signed_xml)?
        } else {
            let (target, inherited) = c14n::find_by_id(&root, uri)
                .ok_or_else(|| build_error(format!("reference target #{uri} not found")))?;
            c14n::canonicalize(target, &inherited)?
        };
        if sha1_base64(canonical.as_bytes()) != expected.trim() {
            return Err(build_error(format!("digest mismatch for #{uri}")));
        }
    }
    if references < 3 {
        return Err(build_error(format!("expected 3 references, found {references}")));
    }

    let certificate_b64 = signature
        .descendant("ds:X509Certificate")
        .map(|e| e.text_content())
        .ok_or_else(|| build_error("missing ds:X509Certificate"))?;
    let certificate_der = STANDARD
        .decode(certificate_b64.trim())
        .map_err(|e| build_error(format!("certificate base64: {e}")))?;
    let certificate = Certificate::from_der(&certificate_der)
        .map_err(|e| build_error(format!("embedded certificate: {e}")))?;
    let public_key = public_key_of(&certificate)?;

    let signature_value = signature
        .first_child("ds:SignatureValue")
        .map(|e| e.text_content())
        .ok_or_else(|| build_error("missing ds:SignatureValue"))?;
    let signature_bytes = STANDARD
        .decode(signature_value.trim())
        .map_err(|e| build_error(format!("signature base64: {e}")))?;
    let rsa_signature = Signature::try_from(signature_bytes.as_slice())
        .map_err(|e| build_error(format!("signature value: {e}")))?;

    let signed_info_c14n = c14n::canonicalize(signed_info, &scope)?;
    VerifyingKey::<Sha1>::new(public_key)
        .verify(signed_info_c14n.as_bytes(), &rsa_signature)
        .map_err(|_| build_error("RSA signature does not verify"))
}
