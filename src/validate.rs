use crate::record::Month;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;

lazy_static! {
    /// Optionally-empty decimal: digits with at most one decimal point.
    /// This is the keystroke-level mask for the cost/consumption inputs.
    static ref DECIMAL_INPUT: Regex = Regex::new(r"^\d*\.?\d*$").unwrap();
}

/// Field names used as keys in the validation error map.
pub const FIELD_MONTH: &str = "month";
pub const FIELD_BASELINE: &str = "baseline";
pub const FIELD_CONSUMPTION: &str = "consumption";
pub const FIELD_FILES: &str = "files";

/// Check whether a text value is acceptable in a decimal input field
///
/// Used by the form layer to reject keystrokes as they happen; the
/// empty string is allowed so the field can be cleared. This is defense
/// in depth alongside [`validate_fields`], which re-checks on submit.
pub fn is_decimal_input(value: &str) -> bool {
    DECIMAL_INPUT.is_match(value)
}

/// Parse a form field as a non-negative decimal number
///
/// Returns `None` for empty, unparseable, or negative input.
pub fn parse_non_negative(value: &str) -> Option<f64> {
    let parsed: f64 = value.trim().parse().ok()?;
    if parsed.is_finite() && parsed >= 0.0 {
        Some(parsed)
    } else {
        None
    }
}

/// Validate the in-progress form state
///
/// Pure: returns a map from field name to error message for every
/// violated rule, empty when the form is submittable. The caller
/// decides whether to block submission.
///
/// # Arguments
/// * `month` - the month selector value ("" when nothing is selected)
/// * `baseline` - raw text of the baseline cost input
/// * `consumption` - raw text of the consumption input
/// * `attachment_count` - number of files currently staged
pub fn validate_fields(
    month: &str,
    baseline: &str,
    consumption: &str,
    attachment_count: usize,
) -> BTreeMap<&'static str, String> {
    let mut errors = BTreeMap::new();

    if month.is_empty() || month.parse::<Month>().is_err() {
        errors.insert(FIELD_MONTH, "Month is required.".to_string());
    }
    if baseline.is_empty() || parse_non_negative(baseline).is_none() {
        errors.insert(FIELD_BASELINE, "Baseline must be a positive number.".to_string());
    }
    if consumption.is_empty() || parse_non_negative(consumption).is_none() {
        errors.insert(
            FIELD_CONSUMPTION,
            "Consumption must be a positive number.".to_string(),
        );
    }
    if attachment_count == 0 {
        errors.insert(FIELD_FILES, "Please attach at least one file.".to_string());
    }

    errors
}
