//! Phone number normalization (E.164) and one-time code shape checks.
//!
//! Both checks run before any network or datastore call so malformed input
//! never reaches the verification provider.

use phonenumber::Mode;
use regex_lite::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// E.164 allows at most 15 digits after the `+`.
const MAX_E164_DIGITS: usize = 15;
/// Shortest subscriber numbers in use (some small states) are 7 digits with code.
const MIN_E164_DIGITS: usize = 8;

/// Digits with the separators people commonly type.
static PHONE_INPUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9(][0-9 ().\-/]*$").expect("static phone regex"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhoneError {
    #[error("Please enter your phone number")]
    Empty,
    #[error("Please enter a valid phone number, including the country code")]
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeError {
    #[error("Please enter the {expected}-digit code we sent you")]
    WrongShape { expected: usize },
}

/// Parse a user-typed phone number into canonical E.164 (`+12015550123`).
///
/// Accepts `+` or `00` international prefixes and ignores spaces, dashes,
/// dots, slashes and parentheses. Numbers without an international prefix
/// are only accepted when `default_calling_code` is set; a single national
/// trunk `0` is dropped in that case.
pub fn normalize_e164(raw: &str, default_calling_code: Option<&str>) -> Result<String, PhoneError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PhoneError::Empty);
    }
    if !PHONE_INPUT_RE.is_match(trimmed) {
        return Err(PhoneError::Invalid);
    }

    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();

    let international = if trimmed.starts_with('+') {
        digits
    } else if let Some(rest) = digits.strip_prefix("00") {
        rest.to_string()
    } else {
        let code = default_calling_code
            .map(|c| c.trim().trim_start_matches('+'))
            .filter(|c| !c.is_empty() && c.chars().all(|ch| ch.is_ascii_digit()))
            .ok_or(PhoneError::Invalid)?;
        let national = digits.strip_prefix('0').unwrap_or(&digits);
        if national.starts_with(code) && code == "1" && national.len() == 11 {
            national.to_string()
        } else {
            format!("{code}{national}")
        }
    };

    if international.len() < MIN_E164_DIGITS
        || international.len() > MAX_E164_DIGITS
        || international.starts_with('0')
    {
        return Err(PhoneError::Invalid);
    }

    // Country code and national length/prefix come from libphonenumber metadata.
    let number =
        phonenumber::parse(None, format!("+{international}")).map_err(|_| PhoneError::Invalid)?;
    if !phonenumber::is_valid(&number) {
        return Err(PhoneError::Invalid);
    }
    Ok(number.format().mode(Mode::E164).to_string())
}

/// Last four digits of a number, the only part that is ever logged.
pub fn last4(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    let start = digits.len().saturating_sub(4);
    digits[start..].iter().collect()
}

/// Check a one-time code is exactly `expected_len` ASCII digits.
///
/// Surrounding whitespace is ignored; the trimmed code is returned.
pub fn validate_code(code: &str, expected_len: usize) -> Result<String, CodeError> {
    let code = code.trim();
    if code.len() != expected_len || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(CodeError::WrongShape {
            expected: expected_len,
        });
    }
    Ok(code.to_string())
}
