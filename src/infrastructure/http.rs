use crate::domain::ports::{SendFailure, WebhookRequest, WebhookSender};
use async_trait::async_trait;
use std::time::Duration;

/// Posts webhook bodies with a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestWebhookSender {
    client: reqwest::Client,
}

impl ReqwestWebhookSender {
    pub fn new(user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookSender for ReqwestWebhookSender {
    async fn send(&self, request: WebhookRequest, timeout: Duration) -> Result<u16, SendFailure> {
        let mut builder = self
            .client
            .post(&request.url)
            .timeout(timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        match builder.body(request.body).send().await {
            Ok(response) => Ok(response.status().as_u16()),
            Err(err) if err.is_timeout() => Err(SendFailure::Timeout),
            Err(err) => Err(SendFailure::Connection(err.to_string())),
        }
    }
}
