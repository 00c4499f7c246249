use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use rust_decimal::Decimal;
use std::io::Cursor;

use chrono::NaiveDate;

use crate::core::FiscalError;
use crate::core::tax::round_half_up;

fn xml_io(e: std::io::Error) -> FiscalError {
    FiscalError::Build(format!("XML write error: {e}"))
}

/// Compact (unindented) XML writer.
///
/// Whitespace between elements would become part of the signed content,
/// so nothing is pretty-printed.
pub struct XmlWriter {
    writer: Writer<Cursor<Vec<u8>>>,
}

impl XmlWriter {
    pub fn new() -> Result<Self, FiscalError> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_io)?;
        Ok(Self { writer })
    }

    pub fn into_string(self) -> Result<String, FiscalError> {
        let buf = self.writer.into_inner().into_inner();
        String::from_utf8(buf).map_err(|e| FiscalError::Build(format!("XML UTF-8 error: {e}")))
    }

    pub fn start_element(&mut self, name: &str) -> Result<&mut Self, FiscalError> {
        self.writer
            .write_event(Event::Start(BytesStart::new(name)))
            .map_err(xml_io)?;
        Ok(self)
    }

    pub fn start_element_with_attrs(
        &mut self,
        name: &str,
        attrs: &[(&str, &str)],
    ) -> Result<&mut Self, FiscalError> {
        let mut elem = BytesStart::new(name);
        for (k, v) in attrs {
            elem.push_attribute((*k, *v));
        }
        self.writer
            .write_event(Event::Start(elem))
            .map_err(xml_io)?;
        Ok(self)
    }

    pub fn end_element(&mut self, name: &str) -> Result<&mut Self, FiscalError> {
        self.writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(xml_io)?;
        Ok(self)
    }

    pub fn text_element(&mut self, name: &str, text: &str) -> Result<&mut Self, FiscalError> {
        self.start_element(name)?;
        self.writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(xml_io)?;
        self.end_element(name)
    }

    /// Skip the element entirely when `text` is `None`.
    pub fn optional_text_element(
        &mut self,
        name: &str,
        text: Option<&str>,
    ) -> Result<&mut Self, FiscalError> {
        match text {
            Some(t) => self.text_element(name, t),
            None => Ok(self),
        }
    }

    pub fn text_element_with_attrs(
        &mut self,
        name: &str,
        text: &str,
        attrs: &[(&str, &str)],
    ) -> Result<&mut Self, FiscalError> {
        self.start_element_with_attrs(name, attrs)?;
        self.writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(xml_io)?;
        self.end_element(name)
    }

    /// Monetary amount, exactly two decimals.
    pub fn amount_element(
        &mut self,
        name: &str,
        amount: Decimal,
    ) -> Result<&mut Self, FiscalError> {
        self.text_element(name, &format_amount(amount))
    }

    /// Quantity or unit price, exactly six decimals.
    pub fn quantity_element(&mut self, name: &str, qty: Decimal) -> Result<&mut Self, FiscalError> {
        self.text_element(name, &format_quantity(qty))
    }

    pub fn date_element(&mut self, name: &str, date: NaiveDate) -> Result<&mut Self, FiscalError> {
        self.text_element(name, &format_date(date))
    }
}

fn format_fixed(d: Decimal, dp: u32) -> String {
    let mut v = round_half_up(d, dp);
    v.rescale(dp);
    v.to_string()
}

/// `12.5` → `"12.50"`.
pub fn format_amount(d: Decimal) -> String {
    format_fixed(d, 2)
}

/// `3` → `"3.000000"`.
pub fn format_quantity(d: Decimal) -> String {
    format_fixed(d, 6)
}

/// `dd/mm/yyyy`.
pub fn format_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}
