use crate::error::PaymentError;
use chrono::{DateTime, Datelike, Utc};
use serde::Deserialize;
use std::fmt;

/// Card details submitted through the payment form.
///
/// Only the masked PAN ever leaves this struct; it is not persisted.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardData {
    pub pan: String,
    pub exp_month: u32,
    pub exp_year: i32,
    pub cvv: String,
    pub holder: Option<String>,
}

impl fmt::Debug for CardData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardData")
            .field("pan", &self.mask())
            .field("exp_month", &self.exp_month)
            .field("exp_year", &self.exp_year)
            .finish_non_exhaustive()
    }
}

impl CardData {
    /// Builds card data from a `MM/YY` expiry string.
    pub fn with_expiry(pan: &str, expiry: &str, cvv: &str) -> Result<Self, PaymentError> {
        let invalid = || PaymentError::ValidationFailed(format!("invalid card expiry '{}'", expiry));
        let (month, year) = expiry.split_once('/').ok_or_else(invalid)?;
        let exp_month: u32 = month.trim().parse().map_err(|_| invalid())?;
        let year: i32 = year.trim().parse().map_err(|_| invalid())?;
        let exp_year = if year < 100 { 2000 + year } else { year };
        Ok(Self {
            pan: pan.chars().filter(|c| !c.is_whitespace()).collect(),
            exp_month,
            exp_year,
            cvv: cvv.trim().to_string(),
            holder: None,
        })
    }

    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), PaymentError> {
        let len = self.pan.len();
        if !(13..=19).contains(&len) || !self.pan.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PaymentError::ValidationFailed(
                "card number must be 13 to 19 digits".to_string(),
            ));
        }
        if !luhn_valid(&self.pan) {
            return Err(PaymentError::ValidationFailed(
                "card number failed checksum".to_string(),
            ));
        }
        if !(1..=12).contains(&self.exp_month) {
            return Err(PaymentError::ValidationFailed(
                "card expiry month must be 1 to 12".to_string(),
            ));
        }
        if (self.exp_year, self.exp_month) < (now.year(), now.month()) {
            return Err(PaymentError::ValidationFailed("card has expired".to_string()));
        }
        let cvv_len = self.cvv.len();
        if !(3..=4).contains(&cvv_len) || !self.cvv.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PaymentError::ValidationFailed(
                "card CVV must be 3 or 4 digits".to_string(),
            ));
        }
        Ok(())
    }

    /// First six and last four digits, the rest masked.
    pub fn mask(&self) -> String {
        let len = self.pan.len();
        if len < 10 || !self.pan.is_ascii() {
            return "*".repeat(len);
        }
        format!(
            "{}{}{}",
            &self.pan[..6],
            "*".repeat(len - 10),
            &self.pan[len - 4..]
        )
    }
}

fn luhn_valid(pan: &str) -> bool {
    let sum: u32 = pan
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let digit = u32::from(b - b'0');
            if i % 2 == 1 {
                let doubled = digit * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                digit
            }
        })
        .sum();
    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_valid_test_card() {
        let card = CardData::with_expiry("4111 1111 1111 1111", "12/30", "123").unwrap();
        assert!(card.validate(now()).is_ok());
        assert_eq!(card.mask(), "411111******1111");
    }

    #[test]
    fn test_luhn_failure() {
        let card = CardData::with_expiry("4111111111111112", "12/30", "123").unwrap();
        assert!(matches!(
            card.validate(now()),
            Err(PaymentError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_expired_card() {
        let card = CardData::with_expiry("4111111111111111", "05/26", "123").unwrap();
        assert!(card.validate(now()).is_err());
        let current_month = CardData::with_expiry("4111111111111111", "06/26", "123").unwrap();
        assert!(current_month.validate(now()).is_ok());
    }

    #[test]
    fn test_bad_cvv_and_expiry_format() {
        let card = CardData::with_expiry("4111111111111111", "12/30", "12").unwrap();
        assert!(card.validate(now()).is_err());
        assert!(CardData::with_expiry("4111111111111111", "1230", "123").is_err());
        let month = CardData::with_expiry("4111111111111111", "13/30", "123").unwrap();
        assert!(month.validate(now()).is_err());
    }

    #[test]
    fn test_debug_never_prints_pan() {
        let card = CardData::with_expiry("4111111111111111", "12/30", "123").unwrap();
        let debug = format!("{:?}", card);
        assert!(!debug.contains("4111111111111111"));
        assert!(!debug.contains("123\""));
    }
}
