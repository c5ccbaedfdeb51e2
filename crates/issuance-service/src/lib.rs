//! KHQR Gateway issuance service
//!
//! Issues Bakong KHQR payment codes, keeps a ledger of issued bill numbers so none is
//! handed out twice, renders each code as a PNG and proxies transaction status lookups.
//!
//! ## Endpoints
//!
//! - `GET|POST /generateQR` - Issue a QR code (`amount`, `bakongAccountID`, `merchantName`)
//! - `GET /qr/{bill_number}` - Fetch the rendered PNG
//! - `GET|POST /check_transaction` - Forward an `md5` lookup to the status API
//! - `GET /health` - Health check

pub mod bill_number;
pub mod config;
pub mod emblem;
pub mod handlers;
pub mod image_store;
pub mod issuer;
pub mod ledger;
pub mod payload;
pub mod render;
pub mod status_proxy;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderMap},
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use bill_number::{BillNumberGenerator, RandomBillNumbers};
pub use config::{Config, EmblemSource, LedgerBackend};
pub use emblem::{EmblemProvider, HttpEmblem, NoEmblem, StaticEmblem};
pub use image_store::{FsImageStore, ImageStore};
pub use issuer::{IssuanceResult, Issuer};
pub use ledger::{FileLedger, Ledger, RedisLedger};
pub use payload::{MerchantProfile, PayloadBuilder, PayloadEncoder, TlvEncoder};
pub use render::{QrRenderer, RenderOptions, RenderedImage};
pub use status_proxy::{StatusProxy, TokenPool};

/// Shared application state
pub struct AppState {
    pub issuer: Issuer,
    pub status: StatusProxy,
    /// Base of image URLs; the request's Host header is used when unset
    pub public_base_url: Option<String>,
}

impl AppState {
    /// Wire up every component from configuration
    pub async fn from_config(config: &Config) -> Result<Self> {
        let ledger: Arc<dyn Ledger> = match config.ledger_backend {
            LedgerBackend::File => Arc::new(
                FileLedger::open(&config.ledger_path)
                    .await
                    .context("Failed to open ledger file")?,
            ),
            LedgerBackend::Redis => Arc::new(
                RedisLedger::new(&config.redis_url, RedisLedger::DEFAULT_KEY)
                    .await
                    .context("Failed to initialize Redis ledger")?,
            ),
        };

        let emblem: Arc<dyn EmblemProvider> = match &config.emblem {
            EmblemSource::None => Arc::new(NoEmblem),
            EmblemSource::Path(path) => Arc::new(
                StaticEmblem::load(path)
                    .await
                    .with_context(|| format!("Failed to read emblem {}", path.display()))?,
            ),
            EmblemSource::Url(url) => Arc::new(HttpEmblem::new(url.clone(), config.emblem_timeout)?),
        };

        let store = Arc::new(
            FsImageStore::new(&config.image_dir)
                .await
                .with_context(|| format!("Failed to create image directory {}", config.image_dir.display()))?,
        );
        let renderer = QrRenderer::new(RenderOptions::default(), emblem, store)?;

        let builder = PayloadBuilder::new(
            config.allowed_accounts.iter().cloned(),
            config.merchant.clone(),
            Arc::new(TlvEncoder),
        );
        let bills = Arc::new(RandomBillNumbers::new(&config.bill_prefix)?);

        let status = StatusProxy::new(
            config.status_url.clone(),
            TokenPool::new(config.access_tokens.clone())?,
            config.status_timeout,
        )?;

        info!(
            "Issuance ready: {} allowed accounts, {} access tokens",
            config.allowed_accounts.len(),
            config.access_tokens.len()
        );

        Ok(Self {
            issuer: Issuer::new(builder, bills, ledger, renderer),
            status,
            public_base_url: config.public_base_url.clone(),
        })
    }

    /// Base URL for links handed back to the caller
    pub fn base_url(&self, headers: &HeaderMap) -> String {
        if let Some(base) = &self.public_base_url {
            return base.clone();
        }
        headers
            .get(header::HOST)
            .and_then(|host| host.to_str().ok())
            .map(|host| format!("http://{}", host))
            .unwrap_or_default()
    }
}

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let shared_state = Arc::new(state);

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route(
            "/generateQR",
            get(handlers::generate_qr_handler).post(handlers::generate_qr_handler),
        )
        .route(
            "/check_transaction",
            get(handlers::check_transaction_handler).post(handlers::check_transaction_handler),
        )
        .route("/qr/{bill_number}", get(handlers::qr_image_handler))
        .with_state(shared_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
