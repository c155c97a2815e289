//! HTTP cast bridge client
//!
//! Talks to an external bridge that holds the actual receiver protocol:
//!
//! | Call | Request |
//! |---|---|
//! | connect | `POST {base}/connections` `{host}` -> `{connectionId}` |
//! | launch | `POST {conn}/launch` `{appId}` -> `{sessionId}` |
//! | receiver status | `GET {conn}/status` |
//! | fault | `GET {conn}/fault`, long poll: `200 {error}` or `204` |
//! | close | `DELETE {conn}` |
//! | player status | `GET {conn}/sessions/{id}/player` |
//! | load | `POST {conn}/sessions/{id}/load` with the media descriptor |
//! | stop | `POST {conn}/sessions/{id}/stop` |

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::error::CastError;
use crate::sdk::{CastConnection, CastConnector, MediaDescriptor, PlayerStatus, ReceiverSession, ReceiverStatus};

const FAULT_POLL_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectResponse {
    connection_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LaunchResponse {
    session_id: String,
}

#[derive(Deserialize)]
struct FaultResponse {
    error: String,
}

fn check_response(response: Response) -> Result<Response, CastError> {
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        return Err(CastError::Transport(format!("HTTP error {status} for {}", response.url())));
    }
    Ok(response)
}

pub struct HttpCastConnector {
    base: String,
    client: Client,
}

impl HttpCastConnector {
    pub fn new(base_url: &str) -> Result<Self, CastError> {
        url::Url::parse(base_url).map_err(|e| CastError::Transport(format!("invalid bridge url '{base_url}': {e}")))?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self {
            base: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base
    }
}

#[async_trait]
impl CastConnector for HttpCastConnector {
    async fn connect(&self, host: &str) -> Result<Box<dyn CastConnection>, CastError> {
        let response = self
            .client
            .post(format!("{}/connections", self.base))
            .json(&json!({ "host": host }))
            .send()
            .await
            .map_err(|e| CastError::Connect {
                host: host.to_string(),
                reason: e.to_string(),
            })?;
        let connected: ConnectResponse = check_response(response)?.json().await?;

        Ok(Box::new(HttpCastConnection {
            url: format!("{}/connections/{}", self.base, connected.connection_id),
            client: self.client.clone(),
        }))
    }
}

struct HttpCastConnection {
    url: String,
    client: Client,
}

#[async_trait]
impl CastConnection for HttpCastConnection {
    async fn launch(&self, app_id: &str) -> Result<Box<dyn ReceiverSession>, CastError> {
        let response = self
            .client
            .post(format!("{}/launch", self.url))
            .json(&json!({ "appId": app_id }))
            .send()
            .await?;
        let launched: LaunchResponse = check_response(response)?.json().await?;

        Ok(Box::new(HttpReceiverSession {
            url: format!("{}/sessions/{}", self.url, launched.session_id),
            client: self.client.clone(),
        }))
    }

    async fn receiver_status(&self) -> Result<ReceiverStatus, CastError> {
        let response = self
            .client
            .get(format!("{}/status", self.url))
            .send()
            .await
            .map_err(|e| CastError::Status(e.to_string()))?;
        Ok(check_response(response)?.json().await?)
    }

    async fn fault(&self) -> CastError {
        loop {
            let response = self
                .client
                .get(format!("{}/fault", self.url))
                .timeout(FAULT_POLL_TIMEOUT)
                .send()
                .await;

            match response {
                Ok(response) if response.status() == StatusCode::NO_CONTENT => {}
                Ok(response) => {
                    return match check_response(response) {
                        Ok(response) => match response.json::<FaultResponse>().await {
                            Ok(fault) => CastError::Transport(fault.error),
                            Err(e) => CastError::from(e),
                        },
                        Err(e) => e,
                    };
                }
                Err(e) if e.is_timeout() => {}
                Err(e) => return CastError::from(e),
            }
        }
    }

    async fn close(&self) {
        if let Err(e) = self.client.delete(&self.url).send().await {
            tracing::debug!(error = %e, "Closing bridge connection failed");
        }
    }
}

struct HttpReceiverSession {
    url: String,
    client: Client,
}

#[async_trait]
impl ReceiverSession for HttpReceiverSession {
    async fn player_status(&self) -> Result<PlayerStatus, CastError> {
        let response = self
            .client
            .get(format!("{}/player", self.url))
            .send()
            .await
            .map_err(|e| CastError::Status(e.to_string()))?;
        Ok(check_response(response)?.json().await?)
    }

    async fn load(&self, media: &MediaDescriptor) -> Result<PlayerStatus, CastError> {
        let response = self
            .client
            .post(format!("{}/load", self.url))
            .json(media)
            .send()
            .await
            .map_err(|e| CastError::Load(e.to_string()))?;
        Ok(check_response(response)?.json().await?)
    }

    async fn stop(&self) -> Result<(), CastError> {
        let response = self
            .client
            .post(format!("{}/stop", self.url))
            .send()
            .await
            .map_err(|e| CastError::Stop(e.to_string()))?;
        check_response(response)?;
        Ok(())
    }
}
