//! Bounded image downloads.

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response};
use url::Url;

use crate::config::ExportConfig;

use super::SkipReason;

/// Prefer formats every reader can show, so content-negotiating CDNs do not
/// hand out WebP unprompted.
const ACCEPT_IMAGES: &str = "image/jpeg,image/png,image/gif;q=0.9,image/*;q=0.8";

/// A downloaded image body and its declared type.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub data: Vec<u8>,
    pub content_type: Option<String>,
}

/// HTTP client enforcing the per-request timeout and payload cap.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(config: &ExportConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.fetch_timeout)
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            client,
            max_bytes: config.max_image_bytes,
        })
    }

    /// Download one image.
    ///
    /// Fails on timeouts, transport errors, non-2xx statuses, declared
    /// non-image types and bodies over the size cap. The body is read in
    /// chunks so an oversize response is abandoned as soon as it crosses
    /// the cap.
    pub async fn fetch(&self, url: &Url) -> Result<Fetched, SkipReason> {
        let mut response = self
            .client
            .get(url.clone())
            .header(ACCEPT, ACCEPT_IMAGES)
            .send()
            .await
            .map_err(SkipReason::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SkipReason::Status(status.as_u16()));
        }

        let content_type = declared_type(&response);
        if let Some(ref content_type) = content_type
            && !content_type.starts_with("image/")
        {
            return Err(SkipReason::NotAnImage(content_type.clone()));
        }

        if let Some(length) = response.content_length()
            && length > self.max_bytes
        {
            return Err(SkipReason::TooLarge {
                limit: self.max_bytes,
            });
        }

        let mut data = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(SkipReason::from)? {
            if (data.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(SkipReason::TooLarge {
                    limit: self.max_bytes,
                });
            }
            data.extend_from_slice(&chunk);
        }

        Ok(Fetched { data, content_type })
    }
}

/// Lower-cased `Content-Type`, or `None` when absent or blank.
fn declared_type(response: &Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty())
}
