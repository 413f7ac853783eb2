//! Line and balance validation for journal entry requests
//!
//! Monetary amounts arrive as decimals, are rounded to scale 2 with
//! half-even rounding, and are carried as integer minor units from here on.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// Balanced means |debits - credits| is within one minor unit (0.01).
pub const BALANCE_TOLERANCE_MINOR: i64 = 1;

const MAX_DESCRIPTION_LEN: usize = 500;

/// One requested posting line, before account resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct LineSpec {
    pub account_code: String,
    pub debit: Decimal,
    pub credit: Decimal,
    pub description: Option<String>,
    pub cost_center: Option<String>,
    pub project: Option<String>,
}

impl LineSpec {
    pub fn new(account_code: &str, debit: Decimal, credit: Decimal) -> Self {
        Self {
            account_code: account_code.to_string(),
            debit,
            credit,
            description: None,
            cost_center: None,
            project: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

/// A validated line in storage units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedLine {
    pub account_code: String,
    pub debit_minor: i64,
    pub credit_minor: i64,
    pub description: Option<String>,
    pub cost_center: Option<String>,
    pub project: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedLines {
    pub lines: Vec<ValidatedLine>,
    pub total_debit_minor: i64,
    pub total_credit_minor: i64,
}

/// Validation errors for journal entry requests
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Lines must have at least 2 items, got {0}")]
    InsufficientLines(usize),

    #[error("Line {0}: account code cannot be empty")]
    EmptyAccountCode(usize),

    #[error("Line {index}: {field} must be non-negative, got {amount}")]
    NegativeAmount {
        index: usize,
        field: &'static str,
        amount: Decimal,
    },

    #[error("Line {0}: exactly one of debit and credit must be positive")]
    BothSidesSet(usize),

    #[error("Line {0}: debit and credit are both zero")]
    ZeroLine(usize),

    #[error("Line {0}: description exceeds {MAX_DESCRIPTION_LEN} characters, got {1}")]
    DescriptionTooLong(usize, usize),

    #[error("Description must be between 1 and {MAX_DESCRIPTION_LEN} characters, got {0}")]
    InvalidDescriptionLength(usize),

    #[error("Total debits ({debits}) must equal total credits ({credits}), difference {difference}")]
    UnbalancedEntry {
        debits: Decimal,
        credits: Decimal,
        difference: Decimal,
    },
}

/// Round to scale 2 (half-even) and convert to minor units.
pub fn to_minor(amount: Decimal) -> i64 {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven);
    (rounded * Decimal::from(100)).round().to_i64().unwrap_or(i64::MAX)
}

/// Convert minor units back to a scale-2 decimal.
pub fn from_minor(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

/// Validate an entry description
pub fn validate_description(description: &str) -> Result<(), ValidationError> {
    let len = description.len();
    if len == 0 || len > MAX_DESCRIPTION_LEN {
        return Err(ValidationError::InvalidDescriptionLength(len));
    }
    Ok(())
}

/// Validate the line set of an entry request
///
/// # Validation Rules
///
/// - At least 2 lines
/// - Each line: non-empty account code, non-negative amounts, exactly one
///   of debit/credit positive, description within limits
/// - Total debits equal total credits within [`BALANCE_TOLERANCE_MINOR`]
pub fn validate_lines(lines: &[LineSpec]) -> Result<ValidatedLines, ValidationError> {
    if lines.len() < 2 {
        return Err(ValidationError::InsufficientLines(lines.len()));
    }

    let mut validated = Vec::with_capacity(lines.len());
    let mut total_debit_minor = 0i64;
    let mut total_credit_minor = 0i64;

    for (index, line) in lines.iter().enumerate() {
        if line.account_code.is_empty() {
            return Err(ValidationError::EmptyAccountCode(index));
        }

        if line.debit.is_sign_negative() && !line.debit.is_zero() {
            return Err(ValidationError::NegativeAmount {
                index,
                field: "debit",
                amount: line.debit,
            });
        }

        if line.credit.is_sign_negative() && !line.credit.is_zero() {
            return Err(ValidationError::NegativeAmount {
                index,
                field: "credit",
                amount: line.credit,
            });
        }

        let debit_minor = to_minor(line.debit);
        let credit_minor = to_minor(line.credit);

        if debit_minor > 0 && credit_minor > 0 {
            return Err(ValidationError::BothSidesSet(index));
        }

        if debit_minor == 0 && credit_minor == 0 {
            return Err(ValidationError::ZeroLine(index));
        }

        if let Some(ref description) = line.description {
            if description.len() > MAX_DESCRIPTION_LEN {
                return Err(ValidationError::DescriptionTooLong(index, description.len()));
            }
        }

        total_debit_minor += debit_minor;
        total_credit_minor += credit_minor;

        validated.push(ValidatedLine {
            account_code: line.account_code.clone(),
            debit_minor,
            credit_minor,
            description: line.description.clone(),
            cost_center: line.cost_center.clone(),
            project: line.project.clone(),
        });
    }

    if (total_debit_minor - total_credit_minor).abs() > BALANCE_TOLERANCE_MINOR {
        return Err(ValidationError::UnbalancedEntry {
            debits: from_minor(total_debit_minor),
            credits: from_minor(total_credit_minor),
            difference: from_minor(total_debit_minor - total_credit_minor),
        });
    }

    Ok(ValidatedLines {
        lines: validated,
        total_debit_minor,
        total_credit_minor,
    })
}
