use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use x509_cert::Certificate;
use x509_cert::der::{Decode, Encode};

use crate::core::FiscalError;

/// Signing key and certificate unlocked from a PKCS#12 bundle.
pub struct CertificateBundle {
    key: RsaPrivateKey,
    certificate: Certificate,
    certificate_der: Vec<u8>,
}

impl std::fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("subject", &self.subject())
            .field("serial", &self.serial_number())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

fn invalid(message: impl Into<String>) -> FiscalError {
    FiscalError::InvalidCertificate(message.into())
}

impl CertificateBundle {
    /// Unlock `data` with `password` and check validity against the clock.
    pub fn from_pkcs12(data: &[u8], password: &str) -> Result<Self, FiscalError> {
        Self::from_pkcs12_at(data, password, Utc::now())
    }

    /// Unlock `data` and check that the certificate is valid at `now`.
    pub fn from_pkcs12_at(
        data: &[u8],
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, FiscalError> {
        let keystore = p12_keystore::KeyStore::from_pkcs12(data, password)
            .map_err(|e| invalid(format!("wrong password or unreadable bundle: {e}")))?;
        let (alias, chain) = keystore
            .private_key_chain()
            .ok_or_else(|| invalid("bundle has no private key entry"))?;
        let certificate_der = chain
            .chain()
            .first()
            .map(|c| c.as_der().to_vec())
            .ok_or_else(|| invalid(format!("key entry {alias} has no certificate")))?;

        let key = RsaPrivateKey::from_pkcs8_der(chain.key())
            .map_err(|e| invalid(format!("private key is not RSA: {e}")))?;
        let certificate = Certificate::from_der(&certificate_der)
            .map_err(|e| invalid(format!("malformed X.509 certificate: {e}")))?;

        let bundle = Self {
            key,
            certificate,
            certificate_der,
        };

        let (not_before, not_after) = bundle.validity();
        if now < not_before {
            return Err(invalid(format!("certificate not valid before {not_before}")));
        }
        if now > not_after {
            return Err(invalid(format!("certificate expired on {not_after}")));
        }
        if bundle.public_key()? != RsaPublicKey::from(&bundle.key) {
            return Err(invalid("private key does not match the certificate"));
        }

        tracing::debug!(
            subject = %bundle.subject(),
            expires = %not_after,
            "signing certificate loaded"
        );
        Ok(bundle)
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.key
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    pub fn certificate_base64(&self) -> String {
        STANDARD.encode(&self.certificate_der)
    }

    /// Base64 SHA-1 of the DER certificate (`CertDigest`).
    pub fn certificate_digest(&self) -> String {
        STANDARD.encode(Sha1::digest(&self.certificate_der))
    }

    pub fn subject(&self) -> String {
        self.certificate.tbs_certificate.subject.to_string()
    }

    /// RFC 4514 issuer name (`X509IssuerName`).
    pub fn issuer_name(&self) -> String {
        self.certificate.tbs_certificate.issuer.to_string()
    }

    /// Serial number in decimal (`X509SerialNumber`).
    pub fn serial_number(&self) -> String {
        bytes_to_decimal(self.certificate.tbs_certificate.serial_number.as_bytes())
    }

    pub fn validity(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let validity = &self.certificate.tbs_certificate.validity;
        (
            to_utc(validity.not_before.to_unix_duration()),
            to_utc(validity.not_after.to_unix_duration()),
        )
    }

    /// RSA public key from the certificate's SubjectPublicKeyInfo.
    pub fn public_key(&self) -> Result<RsaPublicKey, FiscalError> {
        public_key_of(&self.certificate)
    }

    /// Base64 modulus and exponent for `RSAKeyValue`.
    pub fn rsa_key_value(&self) -> (String, String) {
        let public = RsaPublicKey::from(&self.key);
        (
            STANDARD.encode(public.n().to_bytes_be()),
            STANDARD.encode(public.e().to_bytes_be()),
        )
    }
}

/// Extract the RSA public key from a certificate.
pub fn public_key_of(certificate: &Certificate) -> Result<RsaPublicKey, FiscalError> {
    let spki = certificate
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| invalid(format!("cannot encode public key info: {e}")))?;
    RsaPublicKey::from_public_key_der(&spki)
        .map_err(|e| invalid(format!("certificate key is not RSA: {e}")))
}

fn to_utc(since_epoch: std::time::Duration) -> DateTime<Utc> {
    DateTime::from_timestamp(since_epoch.as_secs() as i64, 0).unwrap_or_default()
}

/// Big-endian unsigned bytes to a decimal string.
fn bytes_to_decimal(bytes: &[u8]) -> String {
    let mut digits: Vec<u8> = vec![0];
    for &byte in bytes {
        let mut carry = byte as u32;
        for digit in digits.iter_mut() {
            let value = (*digit as u32) * 256 + carry;
            *digit = (value % 10) as u8;
            carry = value / 10;
        }
        while carry > 0 {
            digits.push((carry % 10) as u8);
            carry /= 10;
        }
    }
    while digits.len() > 1 && digits.last() == Some(&0) {
        digits.pop();
    }
    digits.iter().rev().map(|d| (b'0' + d) as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_to_decimal() {
        assert_eq!(bytes_to_decimal(&[]), "0");
        assert_eq!(bytes_to_decimal(&[0x01, 0x00]), "256");
        assert_eq!(bytes_to_decimal(&[0xff, 0xff, 0xff, 0xff]), "4294967295");
    }
}
