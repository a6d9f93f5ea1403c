//! WHEP HTTP signaling
//!
//! Offer upload, layer switching and session teardown against the WHEP
//! endpoint. All requests carry the bearer token when one is configured.

use std::time::Duration;

use reqwest::header::{self, HeaderMap};
use reqwest::{StatusCode, Url};
use tracing::{debug, info};

use super::layers::LayerSelection;
use super::link::{resolve_target, LinkDirectory};
use crate::config::WhepConfig;
use crate::error::{AppError, Result};

/// MIME type of SDP bodies
pub const SDP_CONTENT_TYPE: &str = "application/sdp";

/// Everything the endpoint returned for an offer
#[derive(Debug, Clone)]
pub struct OfferResponse {
    pub status: StatusCode,
    /// Remote SDP answer
    pub answer: String,
    pub links: LinkDirectory,
    /// Session resource from the `Location` header
    pub location: Option<Url>,
}

/// HTTP client bound to one WHEP endpoint
#[derive(Debug, Clone)]
pub struct SignalingClient {
    client: reqwest::Client,
    endpoint: Url,
    token: Option<String>,
    request_timeout: Duration,
}

impl SignalingClient {
    pub fn new(config: &WhepConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint_url()).map_err(|e| {
            AppError::Config(format!("Invalid WHEP endpoint {}: {}", config.endpoint_url(), e))
        })?;

        // No overall timeout here: the event stream is long-lived, signaling
        // requests set their own.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            token: config.token.clone().filter(|t| !t.is_empty()),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// POST the local offer and collect the answer, links and location
    pub async fn post_offer(&self, offer_sdp: &str) -> Result<OfferResponse> {
        info!("Sending offer to {}", self.endpoint);
        debug!("Local offer SDP:\n{}", offer_sdp);

        let response = self
            .authorize(self.client.post(self.endpoint.clone()))
            .timeout(self.request_timeout)
            .header(header::CONTENT_TYPE, SDP_CONTENT_TYPE)
            .body(offer_sdp.to_string())
            .send()
            .await
            .map_err(|e| AppError::NegotiationFailed(format!("Failed to send offer: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::NegotiationFailed(format!(
                "Server returned HTTP {}: {}",
                status,
                body.trim()
            )));
        }

        let links = LinkDirectory::parse(header_values(response.headers(), header::LINK), &self.endpoint);
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| resolve_target(v, &self.endpoint));

        let answer = response
            .text()
            .await
            .map_err(|e| AppError::NegotiationFailed(format!("Failed to read answer: {}", e)))?;
        if answer.trim().is_empty() {
            return Err(AppError::NegotiationFailed(
                "Server returned an empty SDP answer".to_string(),
            ));
        }

        debug!(
            "Offer accepted: status={}, links={}, location={:?}",
            status,
            links.len(),
            location.as_ref().map(Url::as_str)
        );

        Ok(OfferResponse {
            status,
            answer,
            links,
            location,
        })
    }

    /// Ask the server to forward a different simulcast layer
    pub async fn select_layer(&self, layer_url: &Url, selection: &LayerSelection) -> Result<()> {
        info!(
            "Selecting layer {} for media {}",
            selection.encoding_id, selection.media_id
        );

        self.authorize(self.client.post(layer_url.clone()))
            .timeout(self.request_timeout)
            .json(selection)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Tear down the session resource
    pub async fn delete_session(&self, resource: &Url) -> Result<()> {
        debug!("Deleting session resource {}", resource);

        self.authorize(self.client.delete(resource.clone()))
            .timeout(self.request_timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Streaming GET for the event stream
    pub(crate) fn event_stream_request(
        &self,
        url: &Url,
        last_event_id: Option<&str>,
    ) -> reqwest::RequestBuilder {
        let mut request = self
            .authorize(self.client.get(url.clone()))
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache");
        if let Some(id) = last_event_id {
            request = request.header("Last-Event-ID", id);
        }
        request
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

fn header_values(headers: &HeaderMap, name: header::HeaderName) -> impl Iterator<Item = &str> {
    headers
        .get_all(name)
        .into_iter()
        .filter_map(|v| v.to_str().ok())
}
