//! Redmine-style REST client.
//!
//! Updates go over one persistent HTTP session as
//! `PUT /issues/{id}.json` with a partial `{"issue": {...}}` payload and a
//! static API-key header. Outcomes:
//!
//! - 2xx: success
//! - 404: success, the remote issue no longer exists and there is nothing to update
//! - 422: terminal validation failure, not retried
//! - anything else, timeouts, connection errors: retried with a fixed delay
//!
//! The API key header is marked sensitive so it cannot leak through request
//! logging.

use std::time::Duration;

use jiff::Zoned;
use reqwest::{Client, StatusCode, header};
use secrecy::{ExposeSecret, SecretBox};
use tracing::{error, info, warn};
use url::Url;

use crate::config::TrackerConfig;
use crate::error::{Error, Result};
use crate::tracker::{IssueUpdate, TrackerApi};

const API_KEY_HEADER: &str = "X-Redmine-API-Key";

/// How a response status disposes of the current attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Success,
    /// 404: the issue is gone upstream; treated as success, not retried.
    Gone,
    /// 422: the payload was rejected; retrying cannot help.
    Terminal,
    Retry,
}

fn classify(status: StatusCode) -> Disposition {
    if status.is_success() {
        Disposition::Success
    } else if status == StatusCode::NOT_FOUND {
        Disposition::Gone
    } else if status == StatusCode::UNPROCESSABLE_ENTITY {
        Disposition::Terminal
    } else {
        Disposition::Retry
    }
}

pub struct RedmineClient {
    http: Client,
    base: Url,
    api_key: SecretBox<String>,
    attempts: u32,
    retry_delay: Duration,
}

impl RedmineClient {
    pub fn new(config: &TrackerConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let mut base = config.endpoint.clone();
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }

        // Reject a key that cannot travel as a header before the first
        // request has to find out.
        header::HeaderValue::from_str(&config.api_key)
            .map_err(|_| Error::Config("tracker api_key is not a valid header value".to_string()))?;

        Ok(Self {
            http,
            base,
            api_key: SecretBox::new(Box::new(config.api_key.clone())),
            attempts: config.attempts.max(1),
            retry_delay: Duration::from_secs(config.retry_delay_secs),
        })
    }

    /// Authorization header, marked sensitive so request logging shows it
    /// redacted.
    fn auth_header(&self) -> header::HeaderValue {
        let mut value = header::HeaderValue::from_str(self.api_key.expose_secret())
            .expect("validated at construction");
        value.set_sensitive(true);
        value
    }

    fn issue_url(&self, issue_id: u64) -> Result<Url> {
        self.base
            .join(&format!("issues/{}.json", issue_id))
            .map_err(|e| Error::Config(format!("bad tracker endpoint: {}", e)))
    }

    /// Comment notes carry a timestamped system prefix, so tracker-side
    /// readers can tell synchronized notes from native ones.
    fn decorate_notes(update: &mut IssueUpdate) {
        if let Some(notes) = &update.notes {
            let stamp = Zoned::now().strftime("%d/%m/%Y %H:%M:%S").to_string();
            update.notes = Some(format!("**[{}] - triad**\n\n{}", stamp, notes));
        }
    }
}

impl TrackerApi for RedmineClient {
    async fn update_issue(&self, issue_id: u64, update: IssueUpdate) -> bool {
        if update.is_empty() {
            return true;
        }

        let mut update = update;
        Self::decorate_notes(&mut update);
        let payload = update.to_payload();

        let url = match self.issue_url(issue_id) {
            Ok(url) => url,
            Err(e) => {
                error!(issue_id, error = %e, "cannot build issue URL");
                return false;
            }
        };

        for attempt in 1..=self.attempts {
            let response = self
                .http
                .put(url.clone())
                .header(API_KEY_HEADER, self.auth_header())
                .json(&payload)
                .send()
                .await;

            match response {
                Ok(response) => match classify(response.status()) {
                    Disposition::Success => {
                        info!(issue_id, "tracker issue updated");
                        return true;
                    }
                    Disposition::Gone => {
                        warn!(issue_id, "tracker issue no longer exists, nothing to update");
                        return true;
                    }
                    Disposition::Terminal => {
                        error!(issue_id, status = %response.status(), "tracker rejected update");
                        return false;
                    }
                    Disposition::Retry => {
                        warn!(
                            issue_id,
                            status = %response.status(),
                            attempt,
                            attempts = self.attempts,
                            "tracker returned retryable status"
                        );
                    }
                },
                Err(e) => {
                    warn!(
                        issue_id,
                        attempt,
                        attempts = self.attempts,
                        error = %e,
                        "tracker request failed"
                    );
                }
            }

            if attempt < self.attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        error!(issue_id, attempts = self.attempts, "tracker update exhausted retries");
        false
    }

    async fn probe(&self) -> bool {
        let url = match self.base.join("issues.json?limit=1") {
            Ok(url) => url,
            Err(_) => return false,
        };
        match self
            .http
            .get(url)
            .header(API_KEY_HEADER, self.auth_header())
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!(error = %e, "tracker connectivity probe failed");
                false
            }
        }
    }
}
