//! HTTP implementation of the remote account service.

use async_trait::async_trait;
use reqwest::StatusCode;

use opt_core::config::{ConfigRecord, SyncPayload};
use opt_core::hosts::{AccountError, AccountService};

/// Talks to an account service exposing `GET /options` (the remote record,
/// `204`/`404` when no session) and `PUT /options` (push the allow-listed
/// subset).
pub struct HttpAccountService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAccountService {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn options_url(&self) -> String {
        format!("{}/options", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl AccountService for HttpAccountService {
    async fn get_options(&self) -> Result<Option<ConfigRecord>, AccountError> {
        let response = self
            .client
            .get(self.options_url())
            .send()
            .await
            .map_err(|e| AccountError::Network(e.to_string()))?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND | StatusCode::UNAUTHORIZED => Ok(None),
            status if status.is_success() => {
                let record = response
                    .json::<ConfigRecord>()
                    .await
                    .map_err(|e| AccountError::Malformed(e.to_string()))?;
                Ok(Some(record))
            }
            status => Err(AccountError::Rejected(format!("GET /options: {status}"))),
        }
    }

    async fn set_options(&self, payload: &SyncPayload) -> Result<(), AccountError> {
        let response = self
            .client
            .put(self.options_url())
            .json(payload)
            .send()
            .await
            .map_err(|e| AccountError::Network(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(AccountError::Rejected(format!(
                "PUT /options: {}",
                response.status()
            )))
        }
    }
}
