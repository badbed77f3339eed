use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use picvault_core::validator::ImageValidator;
use reqwest::{header::USER_AGENT, Url};
use tracing::{debug, instrument};

/// Validator that downloads the URL and decodes it with the `image` crate.
pub struct HttpImageValidator {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpImageValidator {
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building http client")?;
        Ok(Self { client, max_bytes })
    }

    async fn probe(&self, url: &str) -> Result<()> {
        let parsed = Url::parse(url).context("not a url")?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("unsupported scheme {}", parsed.scheme());
        }

        let mut resp = self
            .client
            .get(parsed)
            .header(USER_AGENT, "picvault")
            .send()
            .await?
            .error_for_status()?;

        if let Some(len) = resp.content_length() {
            if len > self.max_bytes as u64 {
                bail!("body of {len} bytes exceeds limit");
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = resp.chunk().await? {
            body.extend_from_slice(&chunk);
            if body.len() > self.max_bytes {
                bail!("body exceeds {} bytes", self.max_bytes);
            }
        }

        // Decoding is CPU-bound; keep it off the async workers.
        tokio::task::spawn_blocking(move || image::load_from_memory(&body).map(|_| ()))
            .await
            .context("decode task")?
            .context("not a decodable image")
    }
}

#[async_trait]
impl ImageValidator for HttpImageValidator {
    #[instrument(skip_all)]
    async fn is_valid_image_url(&self, url: &str) -> bool {
        match self.probe(url).await {
            Ok(()) => true,
            Err(err) => {
                debug!(error = %format!("{err:#}"), "image rejected");
                false
            }
        }
    }
}
