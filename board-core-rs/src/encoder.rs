//! Rate encoding: a 3-5 digit numeral split into main digits and an overflow digit

use crate::error::ValidationError;
use crate::types::MAIN_WIDTH;

/// Width of a padded rate (main digits plus one overflow digit)
pub const ENCODED_WIDTH: usize = MAIN_WIDTH + 1;

/// Shortest accepted rate numeral
pub const MIN_RATE_LEN: usize = 3;

/// A rate split for the display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRate {
    pub main_digits: String,
    pub overflow_digit: char,
}

impl EncodedRate {
    /// The zero-padded five digit form
    pub fn padded(&self) -> String {
        let mut s = self.main_digits.clone();
        s.push(self.overflow_digit);
        s
    }
}

/// Validate and encode a rate numeral.
///
/// Length is checked before content, so `"12"` reports `InvalidLength`
/// even though it is all digits, and `"1a"` also reports `InvalidLength`.
pub fn encode(rate: &str) -> Result<EncodedRate, ValidationError> {
    let len = rate.chars().count();
    if !(MIN_RATE_LEN..=ENCODED_WIDTH).contains(&len) {
        return Err(ValidationError::InvalidLength(len));
    }
    if !rate.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::NonDigitInput(rate.to_string()));
    }

    let padded = format!("{:0>width$}", rate, width = ENCODED_WIDTH);
    let (main, overflow) = padded.split_at(MAIN_WIDTH);

    Ok(EncodedRate {
        main_digits: main.to_string(),
        // Non-empty: padded is all ASCII and exactly ENCODED_WIDTH long
        overflow_digit: overflow.chars().next().unwrap_or('0'),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_five_digit_rate() {
        let enc = encode("12345").unwrap();
        assert_eq!(enc.main_digits, "1234");
        assert_eq!(enc.overflow_digit, '5');
        assert_eq!(enc.padded(), "12345");
    }

    #[test]
    fn test_three_digit_rate_is_left_padded() {
        let enc = encode("123").unwrap();
        assert_eq!(enc.main_digits, "0012");
        assert_eq!(enc.overflow_digit, '3');
        assert_eq!(enc.padded(), "00123");
    }

    #[test]
    fn test_four_digit_rate() {
        let enc = encode("9876").unwrap();
        assert_eq!(enc.main_digits, "0987");
        assert_eq!(enc.overflow_digit, '6');
    }

    #[test]
    fn test_invalid_length() {
        assert_eq!(encode(""), Err(ValidationError::InvalidLength(0)));
        assert_eq!(encode("12"), Err(ValidationError::InvalidLength(2)));
        assert_eq!(encode("123456"), Err(ValidationError::InvalidLength(6)));
        assert_eq!(encode("1a"), Err(ValidationError::InvalidLength(2)));
    }

    #[test]
    fn test_non_digit_input() {
        assert_eq!(
            encode("12a4"),
            Err(ValidationError::NonDigitInput("12a4".to_string()))
        );
        assert!(matches!(encode(" 123"), Err(ValidationError::NonDigitInput(_))));
        assert!(matches!(encode("١٢٣"), Err(ValidationError::NonDigitInput(_))));
    }
}
