// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! User-typed numerals.
//!
//! Amounts are entered and displayed in the regional format: `.` groups
//! thousands and `,` separates decimals (`1.234,56`). The `literal` entry
//! mode accepts the numeral as typed instead and keeps the original text so
//! it can be shown back verbatim.

use crate::error::{LedgerError, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How amount text typed by the user is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NumberEntryMode {
    /// Regional format, `.` thousands and `,` decimals.
    #[default]
    Automatic,
    /// Parsed as typed, original text preserved.
    Literal,
}

impl fmt::Display for NumberEntryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Automatic => f.write_str("automatic"),
            Self::Literal => f.write_str("literal"),
        }
    }
}

impl FromStr for NumberEntryMode {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "automatic" => Ok(Self::Automatic),
            "literal" => Ok(Self::Literal),
            other => Err(LedgerError::validation(format!(
                "unknown number entry mode \"{other}\""
            ))),
        }
    }
}

/// A parsed amount and, in literal mode, the text it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAmount {
    pub amount: Decimal,
    pub raw_text: Option<String>,
}

/// Parses an amount typed by the user.
///
/// # Errors
///
/// [`LedgerError::Validation`] if the text is empty or not a number.
pub fn parse_amount(text: &str, mode: NumberEntryMode) -> Result<ParsedAmount> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::validation("amount is missing"));
    }

    let normalized = match mode {
        NumberEntryMode::Automatic => trimmed.replace('.', "").replacen(',', ".", 1),
        NumberEntryMode::Literal if trimmed.contains(',') && !trimmed.contains('.') => {
            trimmed.replacen(',', ".", 1)
        }
        NumberEntryMode::Literal => trimmed.to_string(),
    };

    let amount = Decimal::from_str(&normalized)
        .map_err(|_| LedgerError::validation(format!("\"{trimmed}\" is not a number")))?;

    let raw_text = match mode {
        NumberEntryMode::Automatic => None,
        NumberEntryMode::Literal => Some(trimmed.to_string()),
    };

    Ok(ParsedAmount { amount, raw_text })
}

/// Parses a stored decimal setting such as an exchange rate or budget goal.
///
/// Accepts `.` or a single `,` as decimal separator. Returns `None` for
/// anything else.
pub fn parse_decimal(text: &str) -> Option<Decimal> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let normalized = if trimmed.contains(',') && !trimmed.contains('.') {
        trimmed.replacen(',', ".", 1)
    } else {
        trimmed.to_string()
    };
    Decimal::from_str(&normalized).ok()
}

/// Formats an amount in the regional format with two decimals.
pub fn format_amount(amount: Decimal) -> String {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let fixed = format!("{:.2}", rounded.abs());
    let (integer, fraction) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let digits: Vec<char> = integer.chars().collect();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, digit) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(*digit);
    }

    let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
        "-"
    } else {
        ""
    };
    format!("{sign}{grouped},{fraction}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn automatic_mode_reads_regional_format() {
        let parsed = parse_amount("1.234,56", NumberEntryMode::Automatic).unwrap();
        assert_eq!(parsed.amount, dec!(1234.56));
        assert_eq!(parsed.raw_text, None);
    }

    #[test]
    fn automatic_mode_treats_dots_as_grouping() {
        let parsed = parse_amount("1.000", NumberEntryMode::Automatic).unwrap();
        assert_eq!(parsed.amount, dec!(1000));
    }

    #[test]
    fn literal_mode_keeps_text() {
        let parsed = parse_amount(" 1234.50 ", NumberEntryMode::Literal).unwrap();
        assert_eq!(parsed.amount, dec!(1234.50));
        assert_eq!(parsed.raw_text.as_deref(), Some("1234.50"));
    }

    #[test]
    fn literal_mode_accepts_comma_decimal() {
        let parsed = parse_amount("12,5", NumberEntryMode::Literal).unwrap();
        assert_eq!(parsed.amount, dec!(12.5));
        assert_eq!(parsed.raw_text.as_deref(), Some("12,5"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_amount("", NumberEntryMode::Automatic).is_err());
        assert!(parse_amount("abc", NumberEntryMode::Literal).is_err());
    }

    #[test]
    fn formats_with_grouping() {
        assert_eq!(format_amount(dec!(1234567.891)), "1.234.567,89");
        assert_eq!(format_amount(dec!(0)), "0,00");
        assert_eq!(format_amount(dec!(999)), "999,00");
        assert_eq!(format_amount(dec!(-4000.5)), "-4.000,50");
        assert_eq!(format_amount(dec!(0.005)), "0,01");
    }

    #[test]
    fn parses_decimal_settings() {
        assert_eq!(parse_decimal("36.5"), Some(dec!(36.5)));
        assert_eq!(parse_decimal("36,5"), Some(dec!(36.5)));
        assert_eq!(parse_decimal("abc"), None);
        assert_eq!(parse_decimal(" "), None);
    }

    #[test]
    fn entry_mode_parses() {
        assert_eq!("literal".parse::<NumberEntryMode>().unwrap(), NumberEntryMode::Literal);
        assert_eq!("Automatic".parse::<NumberEntryMode>().unwrap(), NumberEntryMode::Automatic);
        assert!("fancy".parse::<NumberEntryMode>().is_err());
    }
}
