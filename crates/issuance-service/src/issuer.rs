//! Issuance pipeline: validate, number, encode, record, render

use khqr_common::{BillNumber, Error, IssuanceRequest, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::bill_number::BillNumberGenerator;
use crate::ledger::Ledger;
use crate::payload::PayloadBuilder;
use crate::render::{QrRenderer, RenderedImage};

/// Outcome of a successful issuance
#[derive(Debug, Clone)]
pub struct IssuanceResult {
    pub bill_number: BillNumber,
    /// Encoded payload carried by the QR symbol
    pub qr: String,
    pub md5: String,
    pub amount: f64,
    pub merchant_name: String,
    pub image: RenderedImage,
}

pub struct Issuer {
    builder: PayloadBuilder,
    bills: Arc<dyn BillNumberGenerator>,
    ledger: Arc<dyn Ledger>,
    renderer: QrRenderer,
}

impl Issuer {
    pub fn new(
        builder: PayloadBuilder,
        bills: Arc<dyn BillNumberGenerator>,
        ledger: Arc<dyn Ledger>,
        renderer: QrRenderer,
    ) -> Self {
        Self {
            builder,
            bills,
            ledger,
            renderer,
        }
    }

    /// Issue one payment QR code.
    ///
    /// Nothing is written before the request has been validated and encoded. Once the
    /// ledger has recorded the bill number the record stays, even if rendering fails;
    /// the stored payload lets `retrieve` render the image later.
    pub async fn issue(&self, request: &IssuanceRequest) -> Result<IssuanceResult> {
        self.builder.validate(request)?;

        let bill = self.bills.generate();
        let payload = self.builder.build(request, &bill)?;

        if !self.ledger.record_if_absent(&bill).await? {
            warn!("Rejected duplicate bill number: {}", bill);
            return Err(Error::DuplicateTransaction(bill.to_string()));
        }
        info!(
            "Recorded transaction {} for {} ({} {})",
            bill, request.account_id, payload.fields.amount, payload.fields.currency
        );

        let image = self
            .renderer
            .render(&payload.encoded.qr, &bill)
            .await
            .inspect_err(|e| error!("Rendering failed for recorded transaction {}: {}", bill, e))?;

        Ok(IssuanceResult {
            bill_number: bill,
            qr: payload.encoded.qr,
            md5: payload.encoded.md5,
            amount: payload.fields.amount,
            merchant_name: request.merchant_name.clone(),
            image,
        })
    }

    /// Image of a previously issued code
    pub async fn retrieve(&self, bill: &BillNumber) -> Result<RenderedImage> {
        self.renderer.retrieve(bill).await
    }
}
