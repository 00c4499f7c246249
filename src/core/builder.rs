use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::error::{FiscalError, ValidationError};
use super::tax;
use super::types::*;

/// Builder for draft fiscal documents.
///
/// ```
/// use efactura::core::*;
/// use rust_decimal_macros::dec;
/// use chrono::NaiveDate;
///
/// let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
/// let doc = FiscalDocumentBuilder::new("acme", DocumentType::Invoice, date)
///     .series("001", "001")
///     .buyer(PartyBuilder::new(IdentificationType::Cedula, "1710034065", "Juan Pérez").build())
///     .add_line(LineBuilder::new("SKU-1", "Consultoría", dec!(2), dec!(50.00))
///         .vat(VatRate::Standard15)
///         .build())
///     .build()
///     .unwrap();
/// assert_eq!(doc.totals.unwrap().grand_total, dec!(115.00));
/// ```
pub struct FiscalDocumentBuilder {
    company_id: String,
    document_type: DocumentType,
    issue_date: NaiveDate,
    establishment: String,
    emission_point: String,
    currency: String,
    buyer: Option<Party>,
    lines: Vec<DocumentLine>,
    withholdings: Vec<WithholdingLine>,
    payments: Vec<Payment>,
    default_payment: PaymentMethod,
    additional_fields: Vec<AdditionalField>,
    modified_document: Option<SupportingDocument>,
    reason: Option<String>,
    fiscal_period: Option<FiscalPeriod>,
}

impl FiscalDocumentBuilder {
    pub fn new(
        company_id: impl Into<String>,
        document_type: DocumentType,
        issue_date: NaiveDate,
    ) -> Self {
        Self {
            company_id: company_id.into(),
            document_type,
            issue_date,
            establishment: "001".to_string(),
            emission_point: "001".to_string(),
            currency: "USD".to_string(),
            buyer: None,
            lines: Vec::new(),
            withholdings: Vec::new(),
            payments: Vec::new(),
            default_payment: PaymentMethod::FinancialSystem,
            additional_fields: Vec::new(),
            modified_document: None,
            reason: None,
            fiscal_period: None,
        }
    }

    /// Establishment and emission point codes.
    pub fn series(
        mut self,
        establishment: impl Into<String>,
        emission_point: impl Into<String>,
    ) -> Self {
        self.establishment = establishment.into();
        self.emission_point = emission_point.into();
        self
    }

    pub fn currency(mut self, code: impl Into<String>) -> Self {
        self.currency = code.into();
        self
    }

    pub fn buyer(mut self, party: Party) -> Self {
        self.buyer = Some(party);
        self
    }

    pub fn add_line(mut self, line: DocumentLine) -> Self {
        self.lines.push(line);
        self
    }

    pub fn add_withholding(mut self, line: WithholdingLine) -> Self {
        self.withholdings.push(line);
        self
    }

    pub fn add_payment(mut self, method: PaymentMethod, amount: Decimal) -> Self {
        self.payments.push(Payment {
            method,
            amount,
            term_days: None,
        });
        self
    }

    /// Method used for the single payment added when none was declared.
    pub fn default_payment(mut self, method: PaymentMethod) -> Self {
        self.default_payment = method;
        self
    }

    pub fn additional_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_fields.push(AdditionalField {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Document corrected by a credit or debit note.
    pub fn modifies(mut self, document: SupportingDocument) -> Self {
        self.modified_document = Some(document);
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn fiscal_period(mut self, month: u32, year: i32) -> Self {
        self.fiscal_period = Some(FiscalPeriod { month, year });
        self
    }

    /// Build the draft, calculating totals and running validation.
    /// Returns all validation errors (not just the first).
    pub fn build(self) -> Result<FiscalDocument, FiscalError> {
        let mut errors = Vec::new();

        if self.company_id.trim().is_empty() {
            errors.push(ValidationError::new("company_id", "company is required"));
        }
        check_code("establishment", &self.establishment, &mut errors);
        check_code("emission_point", &self.emission_point, &mut errors);
        if self.currency.len() != 3 {
            errors.push(ValidationError::new(
                "currency",
                "currency must be an ISO 4217 code",
            ));
        }

        match &self.buyer {
            Some(party) => validate_party(party, &mut errors),
            None => errors.push(ValidationError::new("buyer", "buyer is required")),
        }

        match self.document_type {
            DocumentType::Withholding => {
                if self.withholdings.is_empty() {
                    errors.push(ValidationError::new(
                        "withholdings",
                        "at least one withheld tax is required",
                    ));
                }
                match self.fiscal_period {
                    Some(p) if (1..=12).contains(&p.month) => {}
                    Some(_) => errors.push(ValidationError::new(
                        "fiscal_period.month",
                        "month must be between 1 and 12",
                    )),
                    None => errors.push(ValidationError::new(
                        "fiscal_period",
                        "withholdings require a fiscal period",
                    )),
                }
            }
            _ => {
                if self.lines.is_empty() {
                    errors.push(ValidationError::new(
                        "lines",
                        "at least one line is required",
                    ));
                }
                if self.lines.len() > 10_000 {
                    errors.push(ValidationError::new(
                        "lines",
                        "document cannot have more than 10,000 lines",
                    ));
                }
            }
        }

        if self.document_type.requires_modified_document() {
            match &self.modified_document {
                Some(m) if !is_series_number(&m.number) => errors.push(ValidationError::new(
                    "modified_document.number",
                    "expected establishment-emission point-sequential (001-001-000000001)",
                )),
                Some(m) if m.issue_date > self.issue_date => errors.push(ValidationError::new(
                    "modified_document.issue_date",
                    "modified document cannot be issued after the note",
                )),
                Some(_) => {}
                None => errors.push(ValidationError::new(
                    "modified_document",
                    "credit and debit notes must reference the modified document",
                )),
            }
        }
        if self.document_type == DocumentType::CreditNote
            && self.reason.as_deref().is_none_or(|r| r.trim().is_empty())
        {
            errors.push(ValidationError::new("reason", "credit notes require a reason"));
        }

        for (i, field) in self.additional_fields.iter().enumerate() {
            if field.name.trim().is_empty() || field.value.trim().is_empty() {
                errors.push(ValidationError::new(
                    format!("additional_fields[{i}]"),
                    "name and value are required",
                ));
            }
        }
        if self.additional_fields.len() > 15 {
            errors.push(ValidationError::new(
                "additional_fields",
                "at most 15 additional fields are allowed",
            ));
        }

        let Some(buyer) = self.buyer else {
            return Err(FiscalError::Validation(errors));
        };
        if !errors.is_empty() {
            return Err(FiscalError::Validation(errors));
        }

        let mut doc = FiscalDocument {
            id: Uuid::new_v4(),
            company_id: self.company_id,
            document_type: self.document_type,
            establishment: self.establishment,
            emission_point: self.emission_point,
            sequential: None,
            issue_date: self.issue_date,
            currency: self.currency.to_ascii_uppercase(),
            buyer,
            lines: self.lines,
            withholdings: self.withholdings,
            payments: self.payments,
            additional_fields: self.additional_fields,
            modified_document: self.modified_document,
            reason: self.reason,
            fiscal_period: self.fiscal_period,
            totals: None,
            status: DocumentStatus::Draft,
            numeric_code: None,
            access_key: None,
            authorization_number: None,
            authorization_date: None,
            signed_xml: None,
            xml_path: None,
            pdf_path: None,
            cdr_path: None,
            attempts: Vec::new(),
        };

        tax::apply(&mut doc)?;

        let grand_total = doc.totals.as_ref().map_or(Decimal::ZERO, |t| t.grand_total);
        if matches!(
            doc.document_type,
            DocumentType::Invoice | DocumentType::PurchaseLiquidation | DocumentType::DebitNote
        ) {
            if doc.payments.is_empty() {
                doc.payments.push(Payment {
                    method: self.default_payment,
                    amount: grand_total,
                    term_days: None,
                });
            } else {
                let paid: Decimal = doc.payments.iter().map(|p| p.amount).sum();
                if paid != grand_total {
                    return Err(FiscalError::invalid(
                        "payments",
                        format!("payments add up to {paid}, document total is {grand_total}"),
                    ));
                }
            }
        }

        Ok(doc)
    }
}

/// Builder for [`Party`].
pub struct PartyBuilder {
    identification_type: IdentificationType,
    identification: String,
    name: String,
    address: Option<String>,
    email: Option<String>,
    phone: Option<String>,
}

impl PartyBuilder {
    pub fn new(
        identification_type: IdentificationType,
        identification: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            identification_type,
            identification: identification.into(),
            name: name.into(),
            address: None,
            email: None,
            phone: None,
        }
    }

    /// Anonymous final consumer (`CONSUMIDOR FINAL`).
    pub fn final_consumer() -> Self {
        Self::new(
            IdentificationType::FinalConsumer,
            FINAL_CONSUMER_ID,
            "CONSUMIDOR FINAL",
        )
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn build(self) -> Party {
        Party {
            identification_type: self.identification_type,
            identification: self.identification,
            name: self.name,
            address: self.address,
            email: self.email,
            phone: self.phone,
        }
    }
}

/// Builder for [`DocumentLine`].
pub struct LineBuilder {
    code: String,
    auxiliary_code: Option<String>,
    description: String,
    quantity: Decimal,
    unit_price: Decimal,
    discount: Decimal,
    currency: String,
    vat: VatRate,
    excise: Option<ExciseRate>,
}

impl LineBuilder {
    pub fn new(
        code: impl Into<String>,
        description: impl Into<String>,
        quantity: Decimal,
        unit_price: Decimal,
    ) -> Self {
        Self {
            code: code.into(),
            auxiliary_code: None,
            description: description.into(),
            quantity,
            unit_price,
            discount: Decimal::ZERO,
            currency: "USD".to_string(),
            vat: VatRate::Standard15,
            excise: None,
        }
    }

    pub fn auxiliary_code(mut self, code: impl Into<String>) -> Self {
        self.auxiliary_code = Some(code.into());
        self
    }

    pub fn discount(mut self, amount: Decimal) -> Self {
        self.discount = amount;
        self
    }

    pub fn currency(mut self, code: impl Into<String>) -> Self {
        self.currency = code.into();
        self
    }

    pub fn vat(mut self, rate: VatRate) -> Self {
        self.vat = rate;
        self
    }

    pub fn excise(mut self, code: impl Into<String>, percent: Decimal) -> Self {
        self.excise = Some(ExciseRate {
            code: code.into(),
            percent,
        });
        self
    }

    pub fn build(self) -> DocumentLine {
        DocumentLine {
            code: self.code,
            auxiliary_code: self.auxiliary_code,
            description: self.description,
            quantity: self.quantity,
            unit_price: self.unit_price,
            discount: self.discount,
            currency: self.currency,
            vat: self.vat,
            excise: self.excise,
            amounts: None,
        }
    }
}

impl WithholdingLine {
    pub fn new(
        tax: WithholdingTax,
        code: impl Into<String>,
        base: Decimal,
        percent: Decimal,
        supporting: SupportingDocument,
    ) -> Self {
        Self {
            tax,
            code: code.into(),
            base,
            percent,
            supporting,
            withheld: None,
        }
    }
}

fn check_code(field: &str, value: &str, errors: &mut Vec<ValidationError>) {
    if value.len() != 3 || !value.bytes().all(|b| b.is_ascii_digit()) || value == "000" {
        errors.push(ValidationError::new(
            field,
            "must be a 3-digit code between 001 and 999",
        ));
    }
}

fn is_series_number(number: &str) -> bool {
    let parts: Vec<&str> = number.split('-').collect();
    parts.len() == 3
        && [3, 3, 9]
            .iter()
            .zip(&parts)
            .all(|(len, p)| p.len() == *len && p.bytes().all(|b| b.is_ascii_digit()))
}

fn validate_party(party: &Party, errors: &mut Vec<ValidationError>) {
    let id = party.identification.as_str();
    let digits = id.bytes().all(|b| b.is_ascii_digit());
    match party.identification_type {
        IdentificationType::Ruc if id.len() != 13 || !digits => errors.push(
            ValidationError::new("buyer.identification", "RUC must have 13 digits"),
        ),
        IdentificationType::Cedula if id.len() != 10 || !digits => errors.push(
            ValidationError::new("buyer.identification", "cédula must have 10 digits"),
        ),
        IdentificationType::FinalConsumer if id != FINAL_CONSUMER_ID => {
            errors.push(ValidationError::new(
                "buyer.identification",
                format!("final consumer identification must be {FINAL_CONSUMER_ID}"),
            ))
        }
        _ if id.trim().is_empty() || id.len() > 20 => errors.push(ValidationError::new(
            "buyer.identification",
            "identification is required (max 20 characters)",
        )),
        _ => {}
    }
    if party.name.trim().is_empty() {
        errors.push(ValidationError::new("buyer.name", "name is required"));
    }
    if party.name.chars().count() > 300 {
        errors.push(ValidationError::new(
            "buyer.name",
            "name cannot exceed 300 characters",
        ));
    }
}
