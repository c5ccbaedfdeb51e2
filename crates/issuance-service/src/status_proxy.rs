//! Client for the remote transaction status API

use khqr_common::{Error, Result};
use rand::Rng;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Bearer tokens for the status API. Never empty.
#[derive(Clone)]
pub struct TokenPool {
    tokens: Vec<String>,
}

impl TokenPool {
    pub fn new(tokens: Vec<String>) -> Result<Self> {
        if tokens.is_empty() {
            return Err(Error::InvalidInput(
                "At least one access token is required".to_string(),
            ));
        }
        Ok(Self { tokens })
    }

    /// Uniformly random token
    pub fn pick(&self) -> &str {
        let index = rand::thread_rng().gen_range(0..self.tokens.len());
        &self.tokens[index]
    }
}

impl std::fmt::Debug for TokenPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TokenPool({} tokens)", self.tokens.len())
    }
}

#[derive(Serialize)]
struct StatusRequest<'a> {
    md5: &'a str,
}

/// Forwards content-hash lookups to the status API. No retries.
pub struct StatusProxy {
    url: String,
    client: reqwest::Client,
    tokens: TokenPool,
}

impl StatusProxy {
    pub fn new(url: String, tokens: TokenPool, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Upstream(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url,
            client,
            tokens,
        })
    }

    /// Look up a transaction by content hash; the upstream JSON is returned untouched
    pub async fn check_status(&self, md5: &str) -> Result<serde_json::Value> {
        if md5.trim().is_empty() {
            return Err(Error::InvalidInput("MD5 parameter is required".to_string()));
        }

        debug!("Checking transaction status for md5: {}", md5);

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(self.tokens.pick())
            .json(&StatusRequest { md5 })
            .send()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?;

        if !response.status().is_success() {
            warn!("Status API returned {} for md5: {}", response.status(), md5);
            return Err(Error::Upstream(format!(
                "status API returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("Failed to parse status response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_empty_pool_rejected() {
        assert!(TokenPool::new(Vec::new()).is_err());
    }

    #[test]
    fn test_pick_covers_pool() {
        let pool = TokenPool::new(vec!["a".to_string(), "b".to_string(), "c".to_string()]).unwrap();
        let picked: HashSet<&str> = (0..500).map(|_| pool.pick()).collect();
        assert_eq!(picked.len(), 3);
    }

    #[test]
    fn test_debug_hides_tokens() {
        let pool = TokenPool::new(vec!["secret".to_string()]).unwrap();
        assert_eq!(format!("{:?}", pool), "TokenPool(1 tokens)");
    }

    #[tokio::test]
    async fn test_blank_md5_rejected_without_request() {
        let proxy = StatusProxy::new(
            "http://127.0.0.1:9".to_string(),
            TokenPool::new(vec!["t".to_string()]).unwrap(),
            Duration::from_secs(1),
        )
        .unwrap();
        let err = proxy.check_status(" ").await.unwrap_err();
        assert_eq!(err.kind(), khqr_common::ErrorKind::InvalidInput);
    }
}
