use std::collections::BTreeMap;

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::error::{FiscalError, ValidationError};
use super::types::*;

/// Document totals as printed in `infoFactura` / `totalConImpuestos`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxSummary {
    /// `totalSinImpuestos`: Σ line subtotals.
    pub subtotal: Decimal,
    /// `totalDescuento`.
    pub discount_total: Decimal,
    /// One entry per VAT bucket present, ordered by SRI percentage code.
    pub vat_buckets: Vec<VatBucketTotal>,
    /// One entry per ICE product code present.
    pub excise: Vec<ExciseTotal>,
    pub vat_total: Decimal,
    pub excise_total: Decimal,
    /// `propina`. Always zero; tips are not charged on issued documents.
    pub tip: Decimal,
    /// `importeTotal` / `valorModificacion` / `valorTotal`.
    pub grand_total: Decimal,
    /// Σ `valorRetenido` on withholding documents.
    pub withheld_total: Decimal,
    /// Per-line amounts in input order.
    pub lines: Vec<LineAmounts>,
}

impl TaxSummary {
    /// Bucket for `rate`, if any line used it.
    pub fn bucket(&self, rate: VatRate) -> Option<&VatBucketTotal> {
        self.vat_buckets.iter().find(|b| b.rate == rate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VatBucketTotal {
    pub rate: VatRate,
    /// `baseImponible`.
    pub base: Decimal,
    /// `valor`.
    pub vat: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExciseTotal {
    pub code: String,
    pub percent: Decimal,
    pub base: Decimal,
    pub amount: Decimal,
}

/// Round half away from zero (commercial rounding).
pub fn round_half_up(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}

/// Compute per-line and per-bucket amounts for `lines` priced in `currency`.
///
/// VAT is computed once per bucket and then spread back onto the lines by
/// largest remainder, so line totals always add up to the grand total.
pub fn calculate(lines: &[DocumentLine], currency: &str) -> Result<TaxSummary, FiscalError> {
    if lines.is_empty() {
        return Err(FiscalError::invalid("lines", "at least one line is required"));
    }

    for (i, line) in lines.iter().enumerate() {
        if !line.currency.eq_ignore_ascii_case(currency) {
            return Err(FiscalError::CurrencyMismatch {
                line: i,
                expected: currency.to_string(),
                found: line.currency.clone(),
            });
        }
    }

    let errors: Vec<ValidationError> = lines
        .iter()
        .enumerate()
        .flat_map(|(i, line)| validate_line(line, i))
        .collect();
    if !errors.is_empty() {
        return Err(FiscalError::Validation(errors));
    }

    let subtotals: Vec<Decimal> = lines
        .iter()
        .map(|l| round_half_up(l.quantity * l.unit_price - l.discount, 2))
        .collect();
    let excises: Vec<Decimal> = lines
        .iter()
        .zip(&subtotals)
        .map(|(l, sub)| match &l.excise {
            Some(rate) => round_half_up(*sub * rate.percent / dec!(100), 2),
            None => Decimal::ZERO,
        })
        .collect();

    // Group by bucket; BTreeMap keeps the output order stable.
    let mut buckets: BTreeMap<VatRate, Vec<usize>> = BTreeMap::new();
    for (i, line) in lines.iter().enumerate() {
        buckets.entry(line.vat).or_default().push(i);
    }

    let mut line_vat = vec![Decimal::ZERO; lines.len()];
    let mut vat_buckets = Vec::with_capacity(buckets.len());
    for (rate, members) in &buckets {
        let base: Decimal = members.iter().map(|&i| subtotals[i]).sum();
        let vat = round_half_up(base * rate.percent() / dec!(100), 2);
        distribute(vat, *rate, members, &subtotals, &mut line_vat);
        vat_buckets.push(VatBucketTotal {
            rate: *rate,
            base,
            vat,
        });
    }
    vat_buckets.sort_by_key(|b| bucket_order(b.rate));

    let mut excise: BTreeMap<(String, Decimal), ExciseTotal> = BTreeMap::new();
    for ((line, sub), amount) in lines.iter().zip(&subtotals).zip(&excises) {
        if let Some(rate) = &line.excise {
            let entry = excise
                .entry((rate.code.clone(), rate.percent))
                .or_insert_with(|| ExciseTotal {
                    code: rate.code.clone(),
                    percent: rate.percent,
                    base: Decimal::ZERO,
                    amount: Decimal::ZERO,
                });
            entry.base += *sub;
            entry.amount += *amount;
        }
    }

    let subtotal: Decimal = subtotals.iter().sum();
    let vat_total: Decimal = vat_buckets.iter().map(|b| b.vat).sum();
    let excise_total: Decimal = excises.iter().sum();
    let discount_total: Decimal = lines.iter().map(|l| l.discount).sum();

    let amounts = (0..lines.len())
        .map(|i| LineAmounts {
            subtotal: subtotals[i],
            vat: line_vat[i],
            excise: excises[i],
            total: subtotals[i] + line_vat[i] + excises[i],
        })
        .collect();

    Ok(TaxSummary {
        subtotal,
        discount_total,
        vat_buckets,
        excise: excise.into_values().collect(),
        vat_total,
        excise_total,
        tip: Decimal::ZERO,
        grand_total: subtotal + vat_total + excise_total,
        withheld_total: Decimal::ZERO,
        lines: amounts,
    })
}

/// Withheld amount per line plus the document total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithholdingSummary {
    pub amounts: Vec<Decimal>,
    pub total: Decimal,
}

/// `valorRetenido = round(base × percent / 100, 2)` for every line.
pub fn calculate_withholdings(
    lines: &[WithholdingLine],
) -> Result<WithholdingSummary, FiscalError> {
    if lines.is_empty() {
        return Err(FiscalError::invalid(
            "withholdings",
            "at least one withheld tax is required",
        ));
    }
    let mut errors = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if line.base < Decimal::ZERO {
            errors.push(ValidationError::new(
                format!("withholdings[{i}].base"),
                "base must not be negative",
            ));
        }
        if line.percent < Decimal::ZERO || line.percent > dec!(100) {
            errors.push(ValidationError::new(
                format!("withholdings[{i}].percent"),
                "percentage must be between 0 and 100",
            ));
        }
        if line.code.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("withholdings[{i}].code"),
                "withholding code is required",
            ));
        }
    }
    if !errors.is_empty() {
        return Err(FiscalError::Validation(errors));
    }

    let amounts: Vec<Decimal> = lines
        .iter()
        .map(|l| round_half_up(l.base * l.percent / dec!(100), 2))
        .collect();
    let total = amounts.iter().sum();
    Ok(WithholdingSummary { amounts, total })
}

/// Compute totals for `doc` and store them on the document and its lines.
pub fn apply(doc: &mut FiscalDocument) -> Result<(), FiscalError> {
    if doc.document_type == DocumentType::Withholding {
        let summary = calculate_withholdings(&doc.withholdings)?;
        for (line, amount) in doc.withholdings.iter_mut().zip(&summary.amounts) {
            line.withheld = Some(*amount);
        }
        doc.totals = Some(TaxSummary {
            withheld_total: summary.total,
            grand_total: summary.total,
            ..TaxSummary::default()
        });
        return Ok(());
    }

    let summary = calculate(&doc.lines, &doc.currency)?;
    for (line, amounts) in doc.lines.iter_mut().zip(&summary.lines) {
        line.amounts = Some(*amounts);
    }
    doc.totals = Some(summary);
    Ok(())
}

fn validate_line(line: &DocumentLine, index: usize) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let field = |name: &str| format!("lines[{index}].{name}");

    if line.quantity <= Decimal::ZERO {
        errors.push(ValidationError::new(
            field("quantity"),
            "quantity must be greater than zero",
        ));
    }
    if line.unit_price < Decimal::ZERO {
        errors.push(ValidationError::new(
            field("unit_price"),
            "unit price must not be negative",
        ));
    }
    if line.discount < Decimal::ZERO {
        errors.push(ValidationError::new(
            field("discount"),
            "discount must not be negative",
        ));
    } else if line.quantity > Decimal::ZERO && line.discount > line.quantity * line.unit_price {
        errors.push(ValidationError::new(
            field("discount"),
            "discount exceeds the line amount",
        ));
    }
    if line.excise.as_ref().is_some_and(|e| e.percent < Decimal::ZERO) {
        errors.push(ValidationError::new(
            field("excise.percent"),
            "excise percentage must not be negative",
        ));
    }
    if line.description.trim().is_empty() {
        errors.push(ValidationError::new(
            field("description"),
            "description is required",
        ));
    }
    errors
}

/// Spread `vat` over the bucket's lines: every line gets its truncated
/// share, leftover cents go to the largest truncation remainders first.
fn distribute(
    vat: Decimal,
    rate: VatRate,
    members: &[usize],
    subtotals: &[Decimal],
    out: &mut [Decimal],
) {
    let cent = dec!(0.01);
    let mut remainders = Vec::with_capacity(members.len());
    let mut assigned = Decimal::ZERO;
    for &i in members {
        let exact = subtotals[i] * rate.percent() / dec!(100);
        let floored = exact.round_dp_with_strategy(2, RoundingStrategy::ToZero);
        out[i] = floored;
        assigned += floored;
        remainders.push((exact - floored, i));
    }
    // Stable by position for equal remainders.
    remainders.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    let mut left = vat - assigned;
    for (_, i) in remainders.iter().cycle() {
        if left < cent {
            break;
        }
        out[*i] += cent;
        left -= cent;
    }
}

fn bucket_order(rate: VatRate) -> u32 {
    rate.code().parse().unwrap_or(u32::MAX)
}
