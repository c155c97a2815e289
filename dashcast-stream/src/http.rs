//! HTTP capture agent client
//!
//! The capture agent owns the browser and its capture extension. Endpoints:
//! `POST /browsers`, `POST /browsers/{id}/targets`,
//! `POST /browsers/{id}/targets/{target}/capture`,
//! `DELETE /browsers/{id}/targets/{target}`, `GET /browsers/{id}/closed`
//! (long poll, returns once the browser is gone) and `DELETE /browsers/{id}`.

use async_trait::async_trait;
use dashcast_core::config::ScreenConfig;
use dashcast_core::RoomId;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::capture::{CaptureBackend, CaptureProvider, TargetId};
use crate::error::CaptureError;

const CLOSED_POLL_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BrowserResponse {
    browser_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetResponse {
    target_id: String,
}

#[derive(Serialize)]
struct CookieRequest {
    name: String,
    value: String,
    domain: String,
}

#[derive(Serialize)]
struct TargetRequest<'a> {
    url: &'a str,
    cookies: Vec<CookieRequest>,
}

#[derive(Serialize)]
struct CaptureRequest<'a> {
    room: &'a str,
    zoom: f64,
}

fn check_response(response: Response) -> Result<Response, String> {
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        return Err(format!("HTTP error {status} for {}", response.url()));
    }
    Ok(response)
}

/// Cookies for a page, defaulting their domain to the page's host
fn page_cookies(screen: &ScreenConfig) -> Result<Vec<CookieRequest>, CaptureError> {
    let url = url::Url::parse(&screen.url).map_err(|e| CaptureError::Page(format!("invalid url '{}': {e}", screen.url)))?;
    let host = url.host_str().unwrap_or_default().to_string();

    Ok(screen
        .cookies
        .iter()
        .map(|cookie| CookieRequest {
            name: cookie.name.clone(),
            value: cookie.value_string(),
            domain: cookie.domain.clone().unwrap_or_else(|| host.clone()),
        })
        .collect())
}

pub struct HttpCaptureBackend {
    base: String,
    client: Client,
}

impl HttpCaptureBackend {
    pub fn new(endpoint: &str) -> Result<Self, CaptureError> {
        url::Url::parse(endpoint).map_err(|e| CaptureError::Browser(format!("invalid capture endpoint '{endpoint}': {e}")))?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self {
            base: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl CaptureBackend for HttpCaptureBackend {
    async fn launch(&self) -> Result<Arc<dyn CaptureProvider>, CaptureError> {
        let response = self.client.post(format!("{}/browsers", self.base)).send().await?;
        let browser: BrowserResponse = check_response(response)
            .map_err(CaptureError::Browser)?
            .json()
            .await?;

        Ok(Arc::new(HttpCaptureProvider {
            url: format!("{}/browsers/{}", self.base, browser.browser_id),
            client: self.client.clone(),
        }))
    }
}

pub struct HttpCaptureProvider {
    url: String,
    client: Client,
}

#[async_trait]
impl CaptureProvider for HttpCaptureProvider {
    async fn open_target(&self, screen: &ScreenConfig) -> Result<TargetId, CaptureError> {
        let request = TargetRequest {
            url: &screen.url,
            cookies: page_cookies(screen)?,
        };
        let response = self
            .client
            .post(format!("{}/targets", self.url))
            .json(&request)
            .send()
            .await
            .map_err(|e| CaptureError::Page(e.to_string()))?;
        let target: TargetResponse = check_response(response)
            .map_err(CaptureError::Page)?
            .json()
            .await
            .map_err(|e| CaptureError::Page(e.to_string()))?;

        Ok(TargetId::new(target.target_id))
    }

    async fn start_capture(&self, target: &TargetId, room: &RoomId, zoom: f64) -> Result<(), CaptureError> {
        let response = self
            .client
            .post(format!("{}/targets/{target}/capture", self.url))
            .json(&CaptureRequest {
                room: room.as_str(),
                zoom,
            })
            .send()
            .await
            .map_err(|e| CaptureError::Capture(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(CaptureError::NoTarget(format!("target {target} is gone")));
        }
        check_response(response).map_err(CaptureError::Capture)?;
        Ok(())
    }

    async fn close_target(&self, target: &TargetId) {
        if let Err(e) = self
            .client
            .delete(format!("{}/targets/{target}", self.url))
            .send()
            .await
        {
            debug!(target = %target, error = %e, "Closing page failed, ignoring");
        }
    }

    async fn closed(&self) {
        loop {
            let response = self
                .client
                .get(format!("{}/closed", self.url))
                .timeout(CLOSED_POLL_TIMEOUT)
                .send()
                .await;
            match response {
                Ok(response) if response.status() == StatusCode::NO_CONTENT => {}
                Ok(_) => return,
                Err(e) if e.is_timeout() => {}
                Err(e) => {
                    debug!(error = %e, "Capture agent unreachable, treating browser as gone");
                    return;
                }
            }
        }
    }

    async fn shutdown(&self) {
        if let Err(e) = self.client.delete(&self.url).send().await {
            debug!(error = %e, "Closing browser failed, ignoring");
        }
    }
}
