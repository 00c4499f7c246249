use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::access_key::{AccessKey, NumericCode};
use super::tax::TaxSummary;

/// Identifier of a stored fiscal document.
pub type DocumentId = Uuid;

/// One issued or draft tax document (invoice, note, liquidation, withholding).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiscalDocument {
    pub id: DocumentId,
    /// Tenant that issues the document.
    pub company_id: String,
    pub document_type: DocumentType,
    /// `estab`: 3-digit establishment code.
    pub establishment: String,
    /// `ptoEmi`: 3-digit emission point code.
    pub emission_point: String,
    /// `secuencial`: assigned once at first issuance, never reused.
    pub sequential: Option<u64>,
    pub issue_date: NaiveDate,
    /// ISO 4217 code. The authority only accepts one currency per document.
    pub currency: String,
    /// Buyer, supplier (purchase liquidation) or withheld subject.
    pub buyer: Party,
    pub lines: Vec<DocumentLine>,
    pub withholdings: Vec<WithholdingLine>,
    pub payments: Vec<Payment>,
    /// `infoAdicional` free-form name/value pairs.
    pub additional_fields: Vec<AdditionalField>,
    /// Document modified by a credit/debit note.
    pub modified_document: Option<SupportingDocument>,
    /// Credit note `motivo`.
    pub reason: Option<String>,
    /// Withholding fiscal period.
    pub fiscal_period: Option<FiscalPeriod>,
    /// Calculated totals (set by the builder).
    pub totals: Option<TaxSummary>,
    pub status: DocumentStatus,
    /// 8-digit component of the access key, drawn once and persisted.
    pub numeric_code: Option<NumericCode>,
    pub access_key: Option<AccessKey>,
    pub authorization_number: Option<String>,
    pub authorization_date: Option<DateTime<Utc>>,
    pub signed_xml: Option<String>,
    pub xml_path: Option<String>,
    pub pdf_path: Option<String>,
    pub cdr_path: Option<String>,
    /// Append-only submission audit trail.
    pub attempts: Vec<AuthorizationResult>,
}

impl FiscalDocument {
    /// `001-001-000000123` style series number, once a sequential exists.
    pub fn series_number(&self) -> Option<String> {
        self.sequential.map(|seq| {
            format!(
                "{}-{}-{}",
                self.establishment,
                self.emission_point,
                super::numbering::format_sequential_unchecked(seq)
            )
        })
    }

    /// Name used for downloadable artifacts: access key, else series number.
    pub fn artifact_stem(&self) -> String {
        match (&self.access_key, self.series_number()) {
            (Some(key), _) => key.as_str().to_string(),
            (None, Some(series)) => series,
            (None, None) => self.id.to_string(),
        }
    }

    /// Whether XML, access key and artifacts are frozen.
    pub fn is_sealed(&self) -> bool {
        matches!(
            self.status,
            DocumentStatus::Authorized | DocumentStatus::Canceled
        )
    }

    /// The single accepted attempt, if any.
    pub fn accepted_attempt(&self) -> Option<&AuthorizationResult> {
        self.attempts
            .iter()
            .find(|a| a.status == AttemptStatus::Accepted)
    }
}

/// SRI `codDoc` document types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DocumentType {
    /// 01: Factura.
    Invoice,
    /// 02: Nota de venta. Issued on pre-printed stock, never electronically.
    Receipt,
    /// 03: Liquidación de compra de bienes y prestación de servicios.
    PurchaseLiquidation,
    /// 04: Nota de crédito.
    CreditNote,
    /// 05: Nota de débito.
    DebitNote,
    /// 07: Comprobante de retención.
    Withholding,
}

impl DocumentType {
    /// Two-digit `codDoc`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Invoice => "01",
            Self::Receipt => "02",
            Self::PurchaseLiquidation => "03",
            Self::CreditNote => "04",
            Self::DebitNote => "05",
            Self::Withholding => "07",
        }
    }

    /// Parse from `codDoc`.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "01" => Some(Self::Invoice),
            "02" => Some(Self::Receipt),
            "03" => Some(Self::PurchaseLiquidation),
            "04" => Some(Self::CreditNote),
            "05" => Some(Self::DebitNote),
            "07" => Some(Self::Withholding),
            _ => None,
        }
    }

    /// Whether the authority receives this type electronically.
    pub fn is_electronic(&self) -> bool {
        !matches!(self, Self::Receipt)
    }

    /// Whether the document corrects another one.
    pub fn requires_modified_document(&self) -> bool {
        matches!(self, Self::CreditNote | Self::DebitNote)
    }
}

/// Document lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentStatus {
    Draft,
    /// Signed and handed to the authority, final answer unknown.
    Issued,
    Authorized,
    Rejected,
    Canceled,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Issued => "issued",
            Self::Authorized => "authorized",
            Self::Rejected => "rejected",
            Self::Canceled => "canceled",
        }
    }
}

/// Counterparty of the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Party {
    pub identification_type: IdentificationType,
    pub identification: String,
    /// `razonSocial` / legal name.
    pub name: String,
    pub address: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// SRI identification type codes (table 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentificationType {
    /// 04: RUC, 13 digits.
    Ruc,
    /// 05: Cédula, 10 digits.
    Cedula,
    /// 06: Passport.
    Passport,
    /// 07: Final consumer, fixed identification `9999999999999`.
    FinalConsumer,
    /// 08: Foreign identification.
    Foreign,
}

impl IdentificationType {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Ruc => "04",
            Self::Cedula => "05",
            Self::Passport => "06",
            Self::FinalConsumer => "07",
            Self::Foreign => "08",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "04" => Some(Self::Ruc),
            "05" => Some(Self::Cedula),
            "06" => Some(Self::Passport),
            "07" => Some(Self::FinalConsumer),
            "08" => Some(Self::Foreign),
            _ => None,
        }
    }
}

/// Identification the authority expects for anonymous final consumers.
pub const FINAL_CONSUMER_ID: &str = "9999999999999";

/// Product or service line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentLine {
    /// `codigoPrincipal`.
    pub code: String,
    /// `codigoAuxiliar`.
    pub auxiliary_code: Option<String>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// Absolute discount on the line.
    pub discount: Decimal,
    /// Currency the price was captured in.
    pub currency: String,
    pub vat: VatRate,
    /// ICE excise, if the product is subject to it.
    pub excise: Option<ExciseRate>,
    /// Set by the tax calculator.
    pub amounts: Option<LineAmounts>,
}

/// Computed line amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAmounts {
    /// `precioTotalSinImpuesto`.
    pub subtotal: Decimal,
    pub vat: Decimal,
    pub excise: Decimal,
    pub total: Decimal,
}

/// IVA rate buckets (`codigoPorcentaje` for tax code 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VatRate {
    /// 0: 0%.
    Zero,
    /// 2: 12%.
    Standard12,
    /// 3: 14%.
    Standard14,
    /// 4: 15%.
    Standard15,
    /// 5: 5%.
    Reduced5,
    /// 6: not subject to VAT.
    NotSubject,
    /// 7: exempt.
    Exempt,
    /// 10: 13%.
    Standard13,
}

impl VatRate {
    /// SRI tax code for IVA.
    pub const TAX_CODE: &'static str = "2";

    pub fn code(&self) -> &'static str {
        match self {
            Self::Zero => "0",
            Self::Standard12 => "2",
            Self::Standard14 => "3",
            Self::Standard15 => "4",
            Self::Reduced5 => "5",
            Self::NotSubject => "6",
            Self::Exempt => "7",
            Self::Standard13 => "10",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "0" => Some(Self::Zero),
            "2" => Some(Self::Standard12),
            "3" => Some(Self::Standard14),
            "4" => Some(Self::Standard15),
            "5" => Some(Self::Reduced5),
            "6" => Some(Self::NotSubject),
            "7" => Some(Self::Exempt),
            "10" => Some(Self::Standard13),
            _ => None,
        }
    }

    /// Rate in percent.
    pub fn percent(&self) -> Decimal {
        match self {
            Self::Zero | Self::NotSubject | Self::Exempt => Decimal::ZERO,
            Self::Standard12 => Decimal::new(12, 0),
            Self::Standard13 => Decimal::new(13, 0),
            Self::Standard14 => Decimal::new(14, 0),
            Self::Standard15 => Decimal::new(15, 0),
            Self::Reduced5 => Decimal::new(5, 0),
        }
    }
}

/// ICE excise classification (tax code 3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExciseRate {
    /// Product code from the ICE table (e.g. "3011" cigarettes).
    pub code: String,
    pub percent: Decimal,
}

impl ExciseRate {
    pub const TAX_CODE: &'static str = "3";
}

/// One withheld tax on a withholding document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithholdingLine {
    pub tax: WithholdingTax,
    /// `codigoRetencion` (e.g. "312" goods transfer, "1" 30% VAT).
    pub code: String,
    pub base: Decimal,
    pub percent: Decimal,
    /// Purchase document the withholding applies to.
    pub supporting: SupportingDocument,
    /// `valorRetenido`, set by the tax calculator.
    pub withheld: Option<Decimal>,
}

/// Taxes that can be withheld.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WithholdingTax {
    /// 1: Renta.
    Income,
    /// 2: IVA.
    Vat,
    /// 6: ISD.
    CurrencyOutflow,
}

impl WithholdingTax {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Income => "1",
            Self::Vat => "2",
            Self::CurrencyOutflow => "6",
        }
    }
}

/// Reference to another fiscal document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportingDocument {
    /// `codDocSustento` / `codDocModificado`.
    pub document_type: DocumentType,
    /// `001-001-000000123`.
    pub number: String,
    pub issue_date: NaiveDate,
}

/// Withholding fiscal period (month, year).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalPeriod {
    pub month: u32,
    pub year: i32,
}

/// Payment form declared on the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub method: PaymentMethod,
    pub amount: Decimal,
    /// Credit term in days, if any.
    pub term_days: Option<u32>,
}

/// SRI payment method codes (table 24).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    /// 01: Without the financial system (cash).
    Cash,
    /// 15: Debt compensation.
    Compensation,
    /// 16: Debit card.
    DebitCard,
    /// 17: Electronic money.
    ElectronicMoney,
    /// 18: Prepaid card.
    PrepaidCard,
    /// 19: Credit card.
    CreditCard,
    /// 20: Other, using the financial system (transfers).
    FinancialSystem,
    /// 21: Endorsement of securities.
    Endorsement,
}

impl PaymentMethod {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Cash => "01",
            Self::Compensation => "15",
            Self::DebitCard => "16",
            Self::ElectronicMoney => "17",
            Self::PrepaidCard => "18",
            Self::CreditCard => "19",
            Self::FinancialSystem => "20",
            Self::Endorsement => "21",
        }
    }
}

/// `campoAdicional` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalField {
    pub name: String,
    pub value: String,
}

/// Static issuer profile printed in `infoTributaria`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuerProfile {
    /// 13-digit RUC.
    pub ruc: String,
    pub legal_name: String,
    pub trade_name: Option<String>,
    pub head_office_address: String,
    /// Address of the issuing establishment, if different.
    pub establishment_address: Option<String>,
    /// `contribuyenteEspecial` resolution number.
    pub special_taxpayer: Option<String>,
    /// `obligadoContabilidad`.
    pub keeps_accounting: bool,
    /// `agenteRetencion` resolution number.
    pub withholding_agent: Option<String>,
    /// `contribuyenteRimpe` legend.
    pub rimpe_legend: Option<String>,
}

/// Outcome class of one submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttemptStatus {
    Accepted,
    Rejected,
    Pending,
}

/// Message attached by the authority to a reception or authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityMessage {
    pub identifier: String,
    pub message: String,
    pub additional_info: Option<String>,
    /// ERROR, ADVERTENCIA or INFORMATIVO.
    pub kind: String,
}

impl std::fmt::Display for AuthorityMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.identifier, self.message)?;
        if let Some(info) = &self.additional_info {
            write!(f, " ({info})")?;
        }
        Ok(())
    }
}

/// Result of one submission attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationResult {
    pub status: AttemptStatus,
    pub authorization_number: Option<String>,
    pub authorized_at: Option<DateTime<Utc>>,
    pub messages: Vec<AuthorityMessage>,
    /// Raw authorization record (CDR) as returned by the authority.
    pub raw_response: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

impl AuthorizationResult {
    /// Authority messages joined for display.
    pub fn reason(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// SRI environment (`ambiente`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// 1: Pruebas (certification endpoints).
    #[default]
    Test,
    /// 2: Producción.
    Production,
}

impl Environment {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Test => "1",
            Self::Production => "2",
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "test" | "pruebas" => Ok(Self::Test),
            "2" | "production" | "prod" | "produccion" => Ok(Self::Production),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Test => f.write_str("test"),
            Self::Production => f.write_str("production"),
        }
    }
}
