//! Request authentication tokens.
//!
//! A token is the lowercase hex SHA-256 of the string forms of a fixed set of
//! scalar request fields plus the team password, concatenated without
//! separators. Init, confirm and cancel sort their fields by name; check uses
//! the literal order `PaymentId, Password, TeamSlug`. Client integrations
//! depend on these exact bytes, so the two orders must not be unified.

use crate::error::PaymentError;
use serde_json::Value;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

pub const AMOUNT: &str = "Amount";
pub const CURRENCY: &str = "Currency";
pub const ORDER_ID: &str = "OrderId";
pub const PASSWORD: &str = "Password";
pub const PAYMENT_ID: &str = "PaymentId";
pub const TEAM_SLUG: &str = "TeamSlug";

pub struct TokenCodec;

impl TokenCodec {
    /// Token for `init`.
    pub fn compute_init_token(
        amount: &str,
        currency: &str,
        order_id: &str,
        password: &str,
        team_slug: &str,
    ) -> String {
        Self::compute_sorted(
            &[
                (AMOUNT, amount),
                (CURRENCY, currency),
                (ORDER_ID, order_id),
                (TEAM_SLUG, team_slug),
            ],
            password,
        )
    }

    /// Token for `confirm` and `cancel`. `amount` participates only when the
    /// request carries one.
    pub fn compute_payment_token(
        amount: Option<&str>,
        payment_id: &str,
        password: &str,
        team_slug: &str,
    ) -> String {
        let mut fields = Vec::with_capacity(3);
        if let Some(amount) = amount {
            fields.push((AMOUNT, amount));
        }
        fields.push((PAYMENT_ID, payment_id));
        fields.push((TEAM_SLUG, team_slug));
        Self::compute_sorted(&fields, password)
    }

    /// Token for `check`: fixed order, not alphabetical.
    pub fn compute_check_token(payment_id: &str, password: &str, team_slug: &str) -> String {
        digest([payment_id, password, team_slug])
    }

    /// Adds the password to `fields`, sorts by field name and hashes the
    /// concatenated values.
    pub fn compute_sorted(fields: &[(&str, &str)], password: &str) -> String {
        let mut fields: Vec<(&str, &str)> = fields.to_vec();
        fields.push((PASSWORD, password));
        fields.sort_by(|a, b| a.0.cmp(b.0));
        digest(fields.iter().map(|(_, value)| *value))
    }

    /// Computes a sorted-field token from a JSON request object.
    ///
    /// Only the named top-level fields are read; everything else, including
    /// nested receipts and metadata, is ignored. A missing or non-scalar named
    /// field is an authentication failure.
    pub fn compute_from_json(
        request: &Value,
        field_names: &[&str],
        password: &str,
    ) -> Result<String, PaymentError> {
        let object = request
            .as_object()
            .ok_or(PaymentError::AuthenticationFailed)?;
        let mut values = Vec::with_capacity(field_names.len());
        for name in field_names {
            let value = object
                .get(*name)
                .and_then(scalar_string)
                .ok_or(PaymentError::AuthenticationFailed)?;
            values.push((*name, value));
        }
        let fields: Vec<(&str, &str)> = values.iter().map(|(k, v)| (*k, v.as_str())).collect();
        Ok(Self::compute_sorted(&fields, password))
    }

    /// Timing-safe comparison of a presented token with the expected one.
    pub fn verify(candidate: &str, expected: &str) -> bool {
        let candidate = candidate.as_bytes();
        let expected = expected.as_bytes();
        // Digest length is public: always 64 hex characters.
        if candidate.len() != expected.len() {
            return false;
        }
        candidate.ct_eq(expected).into()
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn digest<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sha256_hex(input: &str) -> String {
        hex::encode(Sha256::digest(input.as_bytes()))
    }

    #[test]
    fn test_init_token_concatenates_alphabetically() {
        let token = TokenCodec::compute_init_token("150000", "RUB", "order-1", "secret", "demo");
        assert_eq!(token, sha256_hex("150000RUBorder-1secretdemo"));
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_check_token_uses_literal_order() {
        let token = TokenCodec::compute_check_token("pay-1", "secret", "demo");
        assert_eq!(token, sha256_hex("pay-1secretdemo"));
    }

    #[test]
    fn test_payment_token_sorts_password_before_payment_id() {
        let token = TokenCodec::compute_payment_token(None, "pay-1", "secret", "demo");
        assert_eq!(token, sha256_hex("secretpay-1demo"));
        assert_ne!(token, TokenCodec::compute_check_token("pay-1", "secret", "demo"));

        let with_amount =
            TokenCodec::compute_payment_token(Some("100"), "pay-1", "secret", "demo");
        assert_eq!(with_amount, sha256_hex("100secretpay-1demo"));
    }

    #[test]
    fn test_json_token_ignores_nested_and_unknown_fields() {
        let request = json!({
            "TeamSlug": "demo",
            "Amount": 150000,
            "OrderId": "order-1",
            "Currency": "RUB",
            "Description": "ignored",
            "Receipt": {"Items": [{"Name": "x"}]},
        });
        let token = TokenCodec::compute_from_json(
            &request,
            &[AMOUNT, CURRENCY, ORDER_ID, TEAM_SLUG],
            "secret",
        )
        .unwrap();
        assert_eq!(
            token,
            TokenCodec::compute_init_token("150000", "RUB", "order-1", "secret", "demo")
        );
    }

    #[test]
    fn test_json_token_rejects_missing_or_nested_field() {
        let missing = json!({"TeamSlug": "demo"});
        assert!(matches!(
            TokenCodec::compute_from_json(&missing, &[AMOUNT, TEAM_SLUG], "secret"),
            Err(PaymentError::AuthenticationFailed)
        ));

        let nested = json!({"TeamSlug": "demo", "Amount": {"value": 1}});
        assert!(matches!(
            TokenCodec::compute_from_json(&nested, &[AMOUNT, TEAM_SLUG], "secret"),
            Err(PaymentError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_verify() {
        let token = TokenCodec::compute_check_token("pay-1", "secret", "demo");
        assert!(TokenCodec::verify(&token, &token));
        assert!(!TokenCodec::verify(&token[..63], &token));
        let mut tampered = token.clone();
        tampered.replace_range(0..1, if token.starts_with('0') { "1" } else { "0" });
        assert!(!TokenCodec::verify(&tampered, &token));
    }
}
