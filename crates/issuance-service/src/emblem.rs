//! Emblem sources for the center of rendered QR codes

use async_trait::async_trait;
use khqr_common::{Error, Result};
use std::path::Path;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Provides the raw bytes of the emblem image
#[async_trait]
pub trait EmblemProvider: Send + Sync {
    /// `Ok(None)` when no emblem is configured
    async fn fetch(&self) -> Result<Option<Vec<u8>>>;
}

/// Render plain codes
pub struct NoEmblem;

#[async_trait]
impl EmblemProvider for NoEmblem {
    async fn fetch(&self) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// Emblem held in memory, typically read from disk at startup
pub struct StaticEmblem {
    bytes: Vec<u8>,
}

impl StaticEmblem {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        info!("Loaded emblem from {} ({} bytes)", path.as_ref().display(), bytes.len());
        Ok(Self::new(bytes))
    }
}

#[async_trait]
impl EmblemProvider for StaticEmblem {
    async fn fetch(&self) -> Result<Option<Vec<u8>>> {
        Ok(Some(self.bytes.clone()))
    }
}

/// Emblem downloaded over HTTP.
///
/// The first successful download is cached; failed attempts are retried on the next render.
pub struct HttpEmblem {
    url: String,
    client: reqwest::Client,
    cached: OnceCell<Vec<u8>>,
}

impl HttpEmblem {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Render(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url,
            client,
            cached: OnceCell::new(),
        })
    }

    async fn download(&self) -> Result<Vec<u8>> {
        debug!("Fetching emblem from {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::Render(format!("Emblem fetch failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Render(format!(
                "Emblem fetch returned {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Render(format!("Emblem body read failed: {}", e)))?;

        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl EmblemProvider for HttpEmblem {
    async fn fetch(&self) -> Result<Option<Vec<u8>>> {
        let bytes = self.cached.get_or_try_init(|| self.download()).await?;
        Ok(Some(bytes.clone()))
    }
}
