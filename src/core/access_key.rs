//! The 49-digit SRI access key (`claveAcceso`).
//!
//! Layout, left to right:
//!
//! | digits | content |
//! |---|---|
//! | 8 | issue date `ddmmyyyy` |
//! | 2 | document type (`codDoc`) |
//! | 13 | issuer RUC |
//! | 1 | environment |
//! | 3 + 3 | establishment, emission point |
//! | 9 | sequential |
//! | 8 | numeric code |
//! | 1 | emission type |
//! | 1 | modulo-11 check digit |

use chrono::NaiveDate;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::error::{FiscalError, ValidationError};
use super::types::{DocumentType, Environment};

/// Total key length including the check digit.
pub const ACCESS_KEY_LEN: usize = 49;

/// `tipoEmision` for normal (online) emission.
pub const EMISSION_TYPE_NORMAL: &str = "1";

/// Validated 49-digit access key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessKey(String);

/// Inputs needed to derive an access key.
#[derive(Debug, Clone)]
pub struct AccessKeyParts<'a> {
    pub issue_date: NaiveDate,
    pub document_type: DocumentType,
    pub ruc: &'a str,
    pub environment: Environment,
    pub establishment: &'a str,
    pub emission_point: &'a str,
    pub sequential: u64,
    pub numeric_code: &'a NumericCode,
}

impl AccessKey {
    /// Assemble the key and append its check digit.
    pub fn generate(parts: &AccessKeyParts<'_>) -> Result<Self, FiscalError> {
        let mut errors = Vec::new();
        expect_digits("ruc", parts.ruc, 13, &mut errors);
        expect_digits("establishment", parts.establishment, 3, &mut errors);
        expect_digits("emission_point", parts.emission_point, 3, &mut errors);
        if parts.sequential == 0 || parts.sequential > 999_999_999 {
            errors.push(ValidationError::new(
                "sequential",
                "sequential must be between 1 and 999999999",
            ));
        }
        if !parts.document_type.is_electronic() {
            errors.push(ValidationError::new(
                "document_type",
                "document type is not issued electronically",
            ));
        }
        if !errors.is_empty() {
            return Err(FiscalError::Validation(errors));
        }

        let body = format!(
            "{}{}{}{}{}{}{:09}{}{}",
            parts.issue_date.format("%d%m%Y"),
            parts.document_type.code(),
            parts.ruc,
            parts.environment.code(),
            parts.establishment,
            parts.emission_point,
            parts.sequential,
            parts.numeric_code.as_str(),
            EMISSION_TYPE_NORMAL,
        );
        let check = mod11_check_digit(&body)
            .ok_or_else(|| FiscalError::Build(format!("non-numeric access key body {body}")))?;
        Ok(Self(format!("{body}{check}")))
    }

    /// Parse and verify an existing key.
    pub fn parse(value: &str) -> Result<Self, FiscalError> {
        let value = value.trim();
        if value.len() != ACCESS_KEY_LEN {
            return Err(FiscalError::invalid(
                "access_key",
                format!("must have {ACCESS_KEY_LEN} digits, got {}", value.len()),
            ));
        }
        if !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(FiscalError::invalid("access_key", "must contain only digits"));
        }
        let (body, check) = value.split_at(ACCESS_KEY_LEN - 1);
        let expected = mod11_check_digit(body).unwrap_or(u8::MAX);
        if check.as_bytes()[0] - b'0' != expected {
            return Err(FiscalError::invalid(
                "access_key",
                format!("check digit {check} does not match computed {expected}"),
            ));
        }
        if DocumentType::from_code(&value[8..10]).is_none() {
            return Err(FiscalError::invalid(
                "access_key",
                format!("unknown document type {}", &value[8..10]),
            ));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn issue_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.0[0..8], "%d%m%Y").ok()
    }

    pub fn document_type(&self) -> Option<DocumentType> {
        DocumentType::from_code(&self.0[8..10])
    }

    pub fn ruc(&self) -> &str {
        &self.0[10..23]
    }

    pub fn environment(&self) -> Environment {
        if &self.0[23..24] == "2" {
            Environment::Production
        } else {
            Environment::Test
        }
    }

    pub fn establishment(&self) -> &str {
        &self.0[24..27]
    }

    pub fn emission_point(&self) -> &str {
        &self.0[27..30]
    }

    pub fn sequential(&self) -> u64 {
        self.0[30..39].parse().unwrap_or(0)
    }

    pub fn numeric_code(&self) -> &str {
        &self.0[39..47]
    }

    pub fn check_digit(&self) -> u8 {
        self.0.as_bytes()[48] - b'0'
    }
}

impl std::fmt::Display for AccessKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AccessKey {
    type Error = FiscalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AccessKey> for String {
    fn from(key: AccessKey) -> Self {
        key.0
    }
}

/// Modulo-11 check digit with weights 2..=7 cycling from the rightmost digit.
///
/// `11 - (sum mod 11)`, where 11 maps to 0 and 10 maps to 1.
/// Returns `None` if `digits` contains anything but ASCII digits.
pub fn mod11_check_digit(digits: &str) -> Option<u8> {
    let mut sum: u32 = 0;
    for (i, b) in digits.bytes().rev().enumerate() {
        if !b.is_ascii_digit() {
            return None;
        }
        let weight = 2 + (i as u32 % 6);
        sum += u32::from(b - b'0') * weight;
    }
    Some(match 11 - (sum % 11) {
        11 => 0,
        10 => 1,
        d => d as u8,
    })
}

/// The 8-digit random component of the access key.
///
/// Drawn once per document and persisted; re-issuing the same document
/// reuses it so the key stays stable across resends.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NumericCode(String);

impl NumericCode {
    pub fn random() -> Self {
        let n: u32 = rand::thread_rng().gen_range(0..100_000_000);
        Self(format!("{n:08}"))
    }

    pub fn parse(value: &str) -> Result<Self, FiscalError> {
        let mut errors = Vec::new();
        expect_digits("numeric_code", value, 8, &mut errors);
        if errors.is_empty() {
            Ok(Self(value.to_string()))
        } else {
            Err(FiscalError::Validation(errors))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for NumericCode {
    type Error = FiscalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NumericCode> for String {
    fn from(code: NumericCode) -> Self {
        code.0
    }
}

fn expect_digits(field: &str, value: &str, len: usize, errors: &mut Vec<ValidationError>) {
    if value.len() != len || !value.bytes().all(|b| b.is_ascii_digit()) {
        errors.push(ValidationError::new(
            field,
            format!("must be exactly {len} digits"),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(code: &NumericCode) -> AccessKeyParts<'_> {
        AccessKeyParts {
            issue_date: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            document_type: DocumentType::Invoice,
            ruc: "1790012345001",
            environment: Environment::Test,
            establishment: "001",
            emission_point: "002",
            sequential: 123,
            numeric_code: code,
        }
    }

    #[test]
    fn check_digit_weights_cycle_from_the_right() {
        // 2*1 = 2; 11 - 2 = 9
        assert_eq!(mod11_check_digit("1"), Some(9));
        // weights 2,3,4,5,6,7,2 over seven ones = 29; 29 % 11 = 7; 11 - 7 = 4
        assert_eq!(mod11_check_digit("1111111"), Some(4));
        // sum 0 → 11 → 0
        assert_eq!(mod11_check_digit("0000"), Some(0));
        // 2*5 = 10 → 11 - 10 = 1
        assert_eq!(mod11_check_digit("5"), Some(1));
        // 2*6 = 12, 12 % 11 = 1 → 10 → 1
        assert_eq!(mod11_check_digit("6"), Some(1));
        assert_eq!(mod11_check_digit("12a"), None);
    }

    #[test]
    fn generated_key_layout() {
        let code = NumericCode::parse("12345678").unwrap();
        let key = AccessKey::generate(&parts(&code)).unwrap();
        assert_eq!(key.as_str().len(), 49);
        assert!(key.as_str().starts_with("15032024011790012345001100100200000012312345678"));
        assert_eq!(&key.as_str()[47..48], "1");
        assert_eq!(key.sequential(), 123);
        assert_eq!(key.establishment(), "001");
        assert_eq!(key.emission_point(), "002");
        assert_eq!(key.numeric_code(), "12345678");
        assert_eq!(key.document_type(), Some(DocumentType::Invoice));
        assert_eq!(key.environment(), Environment::Test);
        assert_eq!(AccessKey::parse(key.as_str()).unwrap(), key);
    }

    #[test]
    fn parse_rejects_wrong_check_digit() {
        let code = NumericCode::parse("87654321").unwrap();
        let key = AccessKey::generate(&parts(&code)).unwrap();
        let mut tampered = key.as_str().to_string();
        let last = tampered.pop().unwrap();
        let wrong = if last == '0' { '1' } else { '0' };
        tampered.push(wrong);
        assert!(AccessKey::parse(&tampered).is_err());
        assert!(AccessKey::parse("123").is_err());
    }

    #[test]
    fn receipt_has_no_access_key() {
        let code = NumericCode::random();
        let mut p = parts(&code);
        p.document_type = DocumentType::Receipt;
        assert!(matches!(
            AccessKey::generate(&p),
            Err(FiscalError::Validation(_))
        ));
    }

    #[test]
    fn numeric_code_is_eight_digits() {
        for _ in 0..50 {
            let code = NumericCode::random();
            assert_eq!(code.as_str().len(), 8);
            assert!(code.as_str().bytes().all(|b| b.is_ascii_digit()));
        }
    }
}
