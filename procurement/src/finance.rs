//! Finance capitalisation fields on delivery lines.
//!
//! These are the one part of a delivery that may change after it is
//! recorded. Finance edits them independently of receiving, and they never
//! affect order status, quantities or totals.

use crate::errors::ValidationError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Invoice and capitalisation details of one delivery line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinanceFields {
    /// Supplier invoice the line was billed on.
    pub invoice_number: Option<String>,
    /// Whether the received goods are booked as a capital asset.
    pub is_capitalised: bool,
    /// Accounting period the line was capitalised in.
    pub capitalised_date: Option<NaiveDate>,
}

/// How a single field is changed by a patch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op", content = "value")]
pub enum FieldUpdate<T> {
    /// Leave the current value.
    #[default]
    Unchanged,
    /// Remove the current value.
    Clear,
    /// Replace the current value.
    Set(T),
}

impl<T: Clone> FieldUpdate<T> {
    fn apply_to(&self, current: Option<T>) -> Option<T> {
        match self {
            Self::Unchanged => current,
            Self::Clear => None,
            Self::Set(value) => Some(value.clone()),
        }
    }
}

/// A partial update of a delivery line's finance fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapitalisationPatch {
    /// New capitalisation flag, if changing.
    pub is_capitalised: Option<bool>,
    /// Change to the capitalisation date.
    pub capitalised_date: FieldUpdate<NaiveDate>,
    /// Change to the invoice number.
    pub invoice_number: FieldUpdate<String>,
}

impl CapitalisationPatch {
    /// Marks the line capitalised in the period of `date`.
    pub fn capitalise(date: NaiveDate) -> Self {
        Self {
            is_capitalised: Some(true),
            capitalised_date: FieldUpdate::Set(date),
            ..Self::default()
        }
    }

    /// Reverses a capitalisation.
    pub fn uncapitalise() -> Self {
        Self {
            is_capitalised: Some(false),
            capitalised_date: FieldUpdate::Clear,
            ..Self::default()
        }
    }

    /// Records the invoice number.
    #[must_use]
    pub fn with_invoice(mut self, invoice_number: impl Into<String>) -> Self {
        self.invoice_number = FieldUpdate::Set(invoice_number.into());
        self
    }

    /// Whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.is_capitalised.is_none()
            && self.capitalised_date == FieldUpdate::Unchanged
            && self.invoice_number == FieldUpdate::Unchanged
    }
}

impl FinanceFields {
    /// Merges `patch` into these fields.
    ///
    /// The merged result must satisfy: `capitalised_date` is set exactly when
    /// `is_capitalised` is true. A blank invoice number clears it.
    pub fn merged(&self, patch: &CapitalisationPatch) -> Result<Self, ValidationError> {
        let invoice_number = patch
            .invoice_number
            .apply_to(self.invoice_number.clone())
            .map(|invoice| invoice.trim().to_string())
            .filter(|invoice| !invoice.is_empty());

        let merged = Self {
            invoice_number,
            is_capitalised: patch.is_capitalised.unwrap_or(self.is_capitalised),
            capitalised_date: patch.capitalised_date.apply_to(self.capitalised_date),
        };
        merged.validate()?;
        Ok(merged)
    }

    /// Checks the flag/date pairing.
    pub const fn validate(&self) -> Result<(), ValidationError> {
        match (self.is_capitalised, self.capitalised_date) {
            (true, None) => Err(ValidationError::CapitalisedWithoutDate),
            (false, Some(_)) => Err(ValidationError::DateWithoutCapitalisation),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn capitalise_sets_flag_and_date() {
        let fields = FinanceFields::default()
            .merged(&CapitalisationPatch::capitalise(date(31)))
            .unwrap();
        assert!(fields.is_capitalised);
        assert_eq!(fields.capitalised_date, Some(date(31)));
    }

    #[test]
    fn flag_without_date_is_rejected() {
        let patch = CapitalisationPatch {
            is_capitalised: Some(true),
            ..CapitalisationPatch::default()
        };
        assert_eq!(
            FinanceFields::default().merged(&patch),
            Err(ValidationError::CapitalisedWithoutDate)
        );
    }

    #[test]
    fn date_without_flag_is_rejected() {
        let patch = CapitalisationPatch {
            capitalised_date: FieldUpdate::Set(date(1)),
            ..CapitalisationPatch::default()
        };
        assert_eq!(
            FinanceFields::default().merged(&patch),
            Err(ValidationError::DateWithoutCapitalisation)
        );
    }

    #[test]
    fn clearing_only_the_flag_of_a_capitalised_line_is_rejected() {
        let capitalised = FinanceFields::default()
            .merged(&CapitalisationPatch::capitalise(date(5)))
            .unwrap();
        let patch = CapitalisationPatch {
            is_capitalised: Some(false),
            ..CapitalisationPatch::default()
        };
        assert!(capitalised.merged(&patch).is_err());
        assert_eq!(
            capitalised.merged(&CapitalisationPatch::uncapitalise()).unwrap(),
            FinanceFields::default()
        );
    }

    #[test]
    fn invoice_updates_leave_capitalisation_untouched() {
        let capitalised = FinanceFields::default()
            .merged(&CapitalisationPatch::capitalise(date(5)))
            .unwrap();
        let patch = CapitalisationPatch::default().with_invoice(" INV-77 ");

        let merged = capitalised.merged(&patch).unwrap();

        assert_eq!(merged.invoice_number.as_deref(), Some("INV-77"));
        assert!(merged.is_capitalised);
        assert_eq!(merged.capitalised_date, Some(date(5)));
    }

    #[test]
    fn blank_invoice_clears_it() {
        let with_invoice = FinanceFields {
            invoice_number: Some("INV-1".to_string()),
            ..FinanceFields::default()
        };
        let merged = with_invoice
            .merged(&CapitalisationPatch::default().with_invoice("   "))
            .unwrap();
        assert_eq!(merged.invoice_number, None);
    }

    #[test]
    fn patch_deserializes_with_omitted_fields() {
        let patch: CapitalisationPatch = serde_json::from_str(
            r#"{"is_capitalised": true, "capitalised_date": {"op": "set", "value": "2024-03-31"}}"#,
        )
        .unwrap();
        assert_eq!(patch, CapitalisationPatch::capitalise(date(31)));
        assert!(serde_json::from_str::<CapitalisationPatch>("{}").unwrap().is_empty());
    }
}
