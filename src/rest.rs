use std::time::Duration;

use reqwest::Client;

use crate::gateway::events::AccountIdentity;
use crate::token::Credential;

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of validating one credential against the REST endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    Valid(AccountIdentity),
    /// The endpoint rejected the credential (401).
    Invalid,
    /// The endpoint rate limited the request (429).
    RateLimited,
    /// Network failure, malformed response, or an unexpected status.
    Failed(String),
}

impl CheckOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, CheckOutcome::Valid(_))
    }
}

/// Minimal REST client for credential validation.
pub struct RestClient {
    client: Client,
    base_url: String,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Resolves the account behind a credential via `GET /users/@me`.
    pub async fn fetch_identity(&self, credential: &Credential) -> CheckOutcome {
        let url = format!("{}/users/@me", self.base_url);
        let raw = credential.expose();
        let authorization = if raw.starts_with("Bot ") {
            raw.to_string()
        } else {
            format!("Bot {raw}")
        };

        let response = self
            .client
            .get(&url)
            .header("Authorization", authorization)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await;

        match response {
            Ok(resp) => match resp.status().as_u16() {
                200 => match resp.json::<AccountIdentity>().await {
                    Ok(identity) => CheckOutcome::Valid(identity),
                    Err(e) => CheckOutcome::Failed(format!("malformed response: {e}")),
                },
                401 => CheckOutcome::Invalid,
                429 => CheckOutcome::RateLimited,
                status => CheckOutcome::Failed(format!("HTTP {status}")),
            },
            Err(e) => CheckOutcome::Failed(format!("network error: {e}")),
        }
    }
}
