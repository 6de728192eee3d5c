use crate::domain::payment::{Amount, Currency};
use crate::error::PaymentError;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_WEBHOOK_ATTEMPTS: u32 = 3;
pub const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 30;
const MAX_WEBHOOK_ATTEMPTS: u32 = 10;

/// Amount and volume limits enforced before a payment is created.
///
/// `None` disables a limit; an empty currency list accepts any currency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TeamLimits {
    pub currencies: Vec<Currency>,
    pub min_amount: Option<i64>,
    pub max_amount: Option<i64>,
    pub daily_amount_limit: Option<i64>,
    pub monthly_amount_limit: Option<i64>,
    pub daily_transaction_limit: Option<u32>,
}

impl TeamLimits {
    fn validate(&self) -> Result<(), PaymentError> {
        let positive = [
            ("minAmount", self.min_amount),
            ("maxAmount", self.max_amount),
            ("dailyAmountLimit", self.daily_amount_limit),
            ("monthlyAmountLimit", self.monthly_amount_limit),
        ];
        for (name, value) in positive {
            if matches!(value, Some(v) if v <= 0) {
                return Err(PaymentError::ValidationFailed(format!(
                    "{} must be positive",
                    name
                )));
            }
        }
        if let (Some(min), Some(max)) = (self.min_amount, self.max_amount)
            && min > max
        {
            return Err(PaymentError::ValidationFailed(
                "minAmount must not exceed maxAmount".to_string(),
            ));
        }
        if self.daily_transaction_limit == Some(0) {
            return Err(PaymentError::ValidationFailed(
                "dailyTransactionLimit must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Checks that do not depend on stored volume.
    pub fn check_amount(&self, amount: Amount, currency: &Currency) -> Result<(), PaymentError> {
        if !self.currencies.is_empty() && !self.currencies.contains(currency) {
            return Err(PaymentError::LimitExceeded(format!(
                "currency {} is not allowed",
                currency
            )));
        }
        if let Some(min) = self.min_amount
            && amount.value() < min
        {
            return Err(PaymentError::LimitExceeded(format!(
                "amount is below the minimum of {}",
                min
            )));
        }
        if let Some(max) = self.max_amount
            && amount.value() > max
        {
            return Err(PaymentError::LimitExceeded(format!(
                "amount exceeds the maximum of {}",
                max
            )));
        }
        Ok(())
    }
}

/// Webhook retry policy of a team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WebhookPolicy {
    pub attempts: u32,
    pub timeout_secs: u64,
}

impl Default for WebhookPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_WEBHOOK_ATTEMPTS,
            timeout_secs: DEFAULT_WEBHOOK_TIMEOUT_SECS,
        }
    }
}

impl WebhookPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Team configuration as written in a configuration file, before validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamConfig {
    pub slug: String,
    pub password_hash: String,
    #[serde(default = "default_active")]
    pub active: bool,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub success_url: Option<String>,
    pub fail_url: Option<String>,
    #[serde(default)]
    pub limits: TeamLimits,
    #[serde(default)]
    pub webhook_policy: WebhookPolicy,
}

fn default_active() -> bool {
    true
}

/// A validated, immutable merchant account.
///
/// `password_hash` is the shared secret for request tokens. It is persisted
/// with the team but never placed in responses or error messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TeamConfig", rename_all = "camelCase")]
pub struct Team {
    pub slug: String,
    pub password_hash: String,
    pub active: bool,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub success_url: Option<String>,
    pub fail_url: Option<String>,
    pub limits: TeamLimits,
    pub webhook_policy: WebhookPolicy,
}

impl TryFrom<TeamConfig> for Team {
    type Error = PaymentError;

    fn try_from(config: TeamConfig) -> Result<Self, Self::Error> {
        if config.slug.trim().is_empty() {
            return Err(PaymentError::ValidationFailed(
                "team slug must not be empty".to_string(),
            ));
        }
        if config.password_hash.is_empty() {
            return Err(PaymentError::ValidationFailed(format!(
                "team {} has no password hash",
                config.slug
            )));
        }
        for (name, url) in [
            ("webhookUrl", &config.webhook_url),
            ("successUrl", &config.success_url),
            ("failUrl", &config.fail_url),
        ] {
            if let Some(url) = url
                && !is_http_url(url)
            {
                return Err(PaymentError::ValidationFailed(format!(
                    "{} of team {} must be an absolute http(s) URL with a host",
                    name, config.slug
                )));
            }
        }
        if config.webhook_url.is_some() && config.webhook_secret.as_deref().unwrap_or("").is_empty()
        {
            return Err(PaymentError::ValidationFailed(format!(
                "team {} has a webhook URL but no webhook secret",
                config.slug
            )));
        }
        let policy = config.webhook_policy;
        if policy.attempts == 0 || policy.attempts > MAX_WEBHOOK_ATTEMPTS {
            return Err(PaymentError::ValidationFailed(format!(
                "webhook attempts must be between 1 and {}",
                MAX_WEBHOOK_ATTEMPTS
            )));
        }
        if policy.timeout_secs == 0 {
            return Err(PaymentError::ValidationFailed(
                "webhook timeout must be positive".to_string(),
            ));
        }
        config.limits.validate()?;

        Ok(Self {
            slug: config.slug,
            password_hash: config.password_hash,
            active: config.active,
            webhook_url: config.webhook_url,
            webhook_secret: config.webhook_secret,
            success_url: config.success_url,
            fail_url: config.fail_url,
            limits: config.limits,
            webhook_policy: policy,
        })
    }
}

fn is_http_url(raw: &str) -> bool {
    match Url::parse(raw) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https")
                && url.host_str().is_some_and(|host| !host.is_empty())
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Result<Team, serde_json::Error> {
        serde_json::from_value(value)
    }

    #[test]
    fn test_defaults_applied() {
        let team = parse(json!({"slug": "demo", "passwordHash": "secret"})).unwrap();
        assert!(team.active);
        assert_eq!(team.webhook_policy, WebhookPolicy::default());
        assert_eq!(team.webhook_policy.timeout(), Duration::from_secs(30));
        assert!(team.limits.currencies.is_empty());
    }

    #[test]
    fn test_invalid_limits_rejected_at_load() {
        let err = parse(json!({
            "slug": "demo",
            "passwordHash": "secret",
            "limits": {"minAmount": 500, "maxAmount": 100}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("minAmount"));
    }

    #[test]
    fn test_webhook_url_requires_secret() {
        assert!(
            parse(json!({
                "slug": "demo",
                "passwordHash": "secret",
                "webhookUrl": "https://merchant.example/hook"
            }))
            .is_err()
        );
    }

    #[test]
    fn test_webhook_attempts_bounds() {
        assert!(
            parse(json!({
                "slug": "demo",
                "passwordHash": "secret",
                "webhookPolicy": {"attempts": 0}
            }))
            .is_err()
        );
    }

    #[test]
    fn test_check_amount() {
        let limits = TeamLimits {
            currencies: vec![Currency::new("RUB").unwrap()],
            min_amount: Some(100),
            max_amount: Some(1_000_000),
            ..Default::default()
        };
        let rub = Currency::new("RUB").unwrap();
        assert!(limits.check_amount(Amount::new(150_000).unwrap(), &rub).is_ok());
        assert!(matches!(
            limits.check_amount(Amount::new(50).unwrap(), &rub),
            Err(PaymentError::LimitExceeded(_))
        ));
        assert!(matches!(
            limits.check_amount(Amount::new(2_000_000).unwrap(), &rub),
            Err(PaymentError::LimitExceeded(_))
        ));
        assert!(matches!(
            limits.check_amount(Amount::new(150_000).unwrap(), &Currency::new("USD").unwrap()),
            Err(PaymentError::LimitExceeded(_))
        ));
    }

    #[test]
    fn test_urls_must_parse_with_host() {
        for url in ["http://", "https://", "ftp://merchant.example/hook", "merchant.example/hook", "http:// bad host"] {
            let result = parse(json!({
                "slug": "demo",
                "passwordHash": "secret",
                "webhookUrl": url,
                "webhookSecret": "whsec"
            }));
            assert!(result.is_err(), "{url} should be rejected");
        }
        assert!(
            parse(json!({
                "slug": "demo",
                "passwordHash": "secret",
                "successUrl": "not a url"
            }))
            .is_err()
        );

        let team = parse(json!({
            "slug": "demo",
            "passwordHash": "secret",
            "webhookUrl": "http://127.0.0.1:8080/hook",
            "webhookSecret": "whsec",
            "failUrl": "https://merchant.example/fail?order=1"
        }))
        .unwrap();
        assert_eq!(team.webhook_url.as_deref(), Some("http://127.0.0.1:8080/hook"));
    }
}
