//! QR rasterization and emblem compositing
//!
//! Codes are always encoded at error-correction level H (~30% recoverable). The emblem
//! footprint is capped well below that in `RenderOptions::validate`.

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use khqr_common::{BillNumber, Error, Result};
use qrcode::{Color, EcLevel, QrCode};
use std::io::Cursor;
use std::sync::Arc;
use tracing::{info, warn};

use crate::emblem::EmblemProvider;
use crate::image_store::ImageStore;

/// Largest share of the image area the emblem may cover
pub const MAX_EMBLEM_AREA_RATIO: f64 = 0.10;

const DARK: Rgba<u8> = Rgba([0, 0, 0, 255]);
const LIGHT: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Fixed geometry of rendered codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// Width and height of the image in pixels
    pub size: u32,
    /// Quiet zone on each side, in modules
    pub quiet_zone: u32,
    /// Emblem width and height in pixels
    pub emblem_size: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            size: 400,
            quiet_zone: 1,
            emblem_size: 80,
        }
    }
}

impl RenderOptions {
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(Error::InvalidInput("Image size must be greater than 0".to_string()));
        }
        let ratio = (self.emblem_size as f64 / self.size as f64).powi(2);
        if ratio > MAX_EMBLEM_AREA_RATIO {
            return Err(Error::InvalidInput(format!(
                "Emblem covers {:.1}% of the code, limit is {:.0}%",
                ratio * 100.0,
                MAX_EMBLEM_AREA_RATIO * 100.0
            )));
        }
        Ok(())
    }
}

/// PNG bytes of one issued code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    pub bill_number: BillNumber,
    pub png: Vec<u8>,
}

/// Renders encoded payloads and persists them by bill number
pub struct QrRenderer {
    options: RenderOptions,
    emblem: Arc<dyn EmblemProvider>,
    store: Arc<dyn ImageStore>,
}

impl QrRenderer {
    pub fn new(
        options: RenderOptions,
        emblem: Arc<dyn EmblemProvider>,
        store: Arc<dyn ImageStore>,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            emblem,
            store,
        })
    }

    /// Persist the payload, then render and store its image
    pub async fn render(&self, qr: &str, bill: &BillNumber) -> Result<RenderedImage> {
        self.store.put_payload(bill, qr).await?;
        self.render_and_store(qr, bill).await
    }

    /// Stored image for `bill`, rendered again from its stored payload if the image is missing
    pub async fn retrieve(&self, bill: &BillNumber) -> Result<RenderedImage> {
        if let Some(png) = self.store.image(bill).await? {
            return Ok(RenderedImage {
                bill_number: bill.clone(),
                png,
            });
        }

        match self.store.payload(bill).await? {
            Some(qr) => {
                info!("Image missing for {}, rendering from stored payload", bill);
                self.render_and_store(&qr, bill).await
            }
            None => Err(Error::NotFound("QR code image not found".to_string())),
        }
    }

    async fn render_and_store(&self, qr: &str, bill: &BillNumber) -> Result<RenderedImage> {
        let emblem = match self.emblem.fetch().await {
            Ok(emblem) => emblem,
            Err(e) => {
                warn!("Rendering {} without emblem: {}", bill, e);
                None
            }
        };

        let options = self.options;
        let qr = qr.to_string();
        let png = tokio::task::spawn_blocking(move || rasterize(&qr, options, emblem.as_deref()))
            .await
            .map_err(|e| Error::Render(format!("Render task failed: {}", e)))??;

        self.store.put_image(bill, &png).await?;

        Ok(RenderedImage {
            bill_number: bill.clone(),
            png,
        })
    }
}

/// Draw `qr` as a PNG, compositing `emblem` over the center when it decodes
pub fn rasterize(qr: &str, options: RenderOptions, emblem: Option<&[u8]>) -> Result<Vec<u8>> {
    let code = QrCode::with_error_correction_level(qr.as_bytes(), EcLevel::H)
        .map_err(|e| Error::Render(format!("QR encoding failed: {}", e)))?;

    let modules = code.width() as u32;
    let total = modules + 2 * options.quiet_zone;
    let scale = options.size / total;
    if scale == 0 {
        return Err(Error::Render(format!(
            "{} modules do not fit in {} pixels",
            total, options.size
        )));
    }
    // Center the symbol; leftover pixels widen the quiet zone evenly
    let origin = (options.size - scale * total) / 2 + options.quiet_zone * scale;

    let mut canvas = RgbaImage::from_pixel(options.size, options.size, LIGHT);
    for (i, color) in code.to_colors().iter().enumerate() {
        if *color != Color::Dark {
            continue;
        }
        let x0 = origin + (i as u32 % modules) * scale;
        let y0 = origin + (i as u32 / modules) * scale;
        for y in y0..y0 + scale {
            for x in x0..x0 + scale {
                canvas.put_pixel(x, y, DARK);
            }
        }
    }

    if let Some(bytes) = emblem.filter(|_| options.emblem_size > 0) {
        match image::load_from_memory(bytes) {
            Ok(decoded) => {
                let side = options.emblem_size;
                let resized = imageops::resize(&decoded.to_rgba8(), side, side, FilterType::Lanczos3);
                let pos = i64::from(options.size.saturating_sub(side) / 2);
                imageops::overlay(&mut canvas, &resized, pos, pos);
            }
            Err(e) => warn!("Emblem could not be decoded, rendering without it: {}", e),
        }
    }

    let mut png = Vec::new();
    DynamicImage::ImageRgba8(canvas)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| Error::Render(format!("PNG encoding failed: {}", e)))?;

    Ok(png)
}
