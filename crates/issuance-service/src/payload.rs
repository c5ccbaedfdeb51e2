//! Merchant payment payload assembly and encoding
//!
//! `PayloadBuilder` validates a request and hands the canonical fields to a `PayloadEncoder`.
//! The encoder is a capability: `TlvEncoder` is the EMV-style default, not a certified
//! KHQR implementation.

use crc::{Crc, CRC_16_IBM_3740};
use khqr_common::{BillNumber, Currency, Error, IssuanceRequest, Result};
use md5::{Digest, Md5};
use std::collections::HashSet;
use std::sync::Arc;

/// CRC-16/CCITT-FALSE, the checksum used by EMV merchant QR payloads
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Longest value a two-digit length prefix can describe
const MAX_FIELD_LEN: usize = 99;

/// Longest amount string accepted in the amount field
const MAX_AMOUNT_LEN: usize = 13;

/// Static merchant metadata attached to every payload
#[derive(Debug, Clone, PartialEq)]
pub struct MerchantProfile {
    pub city: String,
    pub merchant_id: String,
    pub acquiring_bank: String,
    pub store_label: String,
    pub currency: Currency,
}

impl Default for MerchantProfile {
    fn default() -> Self {
        Self {
            city: "Phnom Penh".to_string(),
            merchant_id: "tg:@cambo_teamkh".to_string(),
            acquiring_bank: "Bakong Bank".to_string(),
            store_label: "cambotopup".to_string(),
            currency: Currency::Usd,
        }
    }
}

/// Canonical payment data for one transaction, before encoding
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadFields {
    pub account_id: String,
    pub merchant_name: String,
    pub amount: f64,
    pub bill_number: BillNumber,
    pub currency: Currency,
    pub city: String,
    pub merchant_id: String,
    pub acquiring_bank: String,
    pub store_label: String,
}

/// Output of the encoding capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    /// String carried by the QR symbol
    pub qr: String,
    /// MD5 of `qr`, lowercase hex
    pub md5: String,
}

/// An encoded payload bound to its transaction
#[derive(Debug, Clone)]
pub struct Payload {
    pub fields: PayloadFields,
    pub encoded: EncodedPayload,
}

impl Payload {
    pub fn bill_number(&self) -> &BillNumber {
        &self.fields.bill_number
    }
}

/// Turns payload fields into a scannable string and its content hash
pub trait PayloadEncoder: Send + Sync {
    fn encode(&self, fields: &PayloadFields) -> Result<EncodedPayload>;
}

/// EMV-style tag-length-value encoder with a CRC trailer
#[derive(Debug, Default, Clone, Copy)]
pub struct TlvEncoder;

impl PayloadEncoder for TlvEncoder {
    fn encode(&self, fields: &PayloadFields) -> Result<EncodedPayload> {
        let amount = format_amount(fields.amount)?;

        let account = [
            tlv("00", &fields.account_id)?,
            tlv("01", &fields.merchant_id)?,
            tlv("02", &fields.acquiring_bank)?,
        ]
        .concat();
        let additional = [
            tlv("01", fields.bill_number.as_str())?,
            tlv("03", &fields.store_label)?,
        ]
        .concat();

        let mut qr = [
            tlv("00", "01")?,
            tlv("01", "12")?,
            tlv("29", &account)?,
            tlv("52", "5999")?,
            tlv("53", fields.currency.numeric_code())?,
            tlv("54", &amount)?,
            tlv("58", "KH")?,
            tlv("59", &fields.merchant_name)?,
            tlv("60", &fields.city)?,
            tlv("62", &additional)?,
        ]
        .concat();

        // The checksum covers its own tag and length
        qr.push_str("6304");
        let crc = CRC16.checksum(qr.as_bytes());
        qr.push_str(&format!("{:04X}", crc));

        let md5 = content_hash(&qr);
        Ok(EncodedPayload { qr, md5 })
    }
}

/// MD5 of an encoded payload, lowercase hex
pub fn content_hash(qr: &str) -> String {
    hex::encode(Md5::digest(qr.as_bytes()))
}

fn tlv(tag: &str, value: &str) -> Result<String> {
    if value.len() > MAX_FIELD_LEN {
        return Err(Error::Encoding(format!(
            "field {} is {} bytes, limit is {}",
            tag,
            value.len(),
            MAX_FIELD_LEN
        )));
    }
    Ok(format!("{}{:02}{}", tag, value.len(), value))
}

/// At most two decimals, trailing zeros dropped: `5.00` -> `5`, `1.50` -> `1.5`
fn format_amount(amount: f64) -> Result<String> {
    let fixed = format!("{:.2}", amount);
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.').to_string();
    if trimmed.len() > MAX_AMOUNT_LEN {
        return Err(Error::Encoding(format!("amount {} is too large", trimmed)));
    }
    Ok(trimmed)
}

/// Round to whole cents. Amounts that round to zero are rejected.
pub fn normalize_amount(amount: f64) -> Result<f64> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(Error::InvalidInput(
            "Amount must be a positive number".to_string(),
        ));
    }
    let cents = (amount * 100.0).round();
    if cents < 1.0 {
        return Err(Error::InvalidInput(
            "Amount must be at least 0.01".to_string(),
        ));
    }
    Ok(cents / 100.0)
}

/// Validates issuance requests and builds their payloads
pub struct PayloadBuilder {
    allowed_accounts: HashSet<String>,
    profile: MerchantProfile,
    encoder: Arc<dyn PayloadEncoder>,
}

impl PayloadBuilder {
    pub fn new(
        allowed_accounts: impl IntoIterator<Item = String>,
        profile: MerchantProfile,
        encoder: Arc<dyn PayloadEncoder>,
    ) -> Self {
        Self {
            allowed_accounts: allowed_accounts.into_iter().collect(),
            profile,
            encoder,
        }
    }

    /// Check a request without touching any state
    pub fn validate(&self, request: &IssuanceRequest) -> Result<()> {
        normalize_amount(request.amount)?;

        if request.merchant_name.trim().is_empty() {
            return Err(Error::InvalidInput("Merchant name is required".to_string()));
        }

        if request.account_id.is_empty() || !self.allowed_accounts.contains(&request.account_id) {
            return Err(Error::Unauthorized(
                "Unauthorized Bakong account ID".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate `request` and encode its payload under `bill_number`.
    /// `fields.amount` carries the amount rounded to cents, as encoded.
    pub fn build(&self, request: &IssuanceRequest, bill_number: &BillNumber) -> Result<Payload> {
        self.validate(request)?;
        let amount = normalize_amount(request.amount)?;

        let fields = PayloadFields {
            account_id: request.account_id.clone(),
            merchant_name: request.merchant_name.clone(),
            amount,
            bill_number: bill_number.clone(),
            currency: self.profile.currency,
            city: self.profile.city.clone(),
            merchant_id: self.profile.merchant_id.clone(),
            acquiring_bank: self.profile.acquiring_bank.clone(),
            store_label: self.profile.store_label.clone(),
        };

        let encoded = self.encoder.encode(&fields)?;
        if encoded.qr.is_empty() || encoded.md5.is_empty() {
            return Err(Error::Encoding("encoder returned an empty payload".to_string()));
        }

        Ok(Payload { fields, encoded })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use khqr_common::ErrorKind;

    fn builder() -> PayloadBuilder {
        PayloadBuilder::new(
            vec!["sotheasok@aclb".to_string()],
            MerchantProfile::default(),
            Arc::new(TlvEncoder),
        )
    }

    fn request(amount: f64, account_id: &str, merchant_name: &str) -> IssuanceRequest {
        IssuanceRequest {
            amount,
            account_id: account_id.to_string(),
            merchant_name: merchant_name.to_string(),
        }
    }

    fn bill() -> BillNumber {
        BillNumber::parse("NV123456789012").unwrap()
    }

    struct BrokenEncoder(EncodedPayload);

    impl PayloadEncoder for BrokenEncoder {
        fn encode(&self, _fields: &PayloadFields) -> Result<EncodedPayload> {
            Ok(self.0.clone())
        }
    }

    struct FailingEncoder;

    impl PayloadEncoder for FailingEncoder {
        fn encode(&self, _fields: &PayloadFields) -> Result<EncodedPayload> {
            Err(Error::Encoding("unavailable".to_string()))
        }
    }

    #[test]
    fn test_build_valid_request() {
        let payload = builder()
            .build(&request(5.0, "sotheasok@aclb", "Test Shop"), &bill())
            .unwrap();

        let qr = &payload.encoded.qr;
        assert!(qr.starts_with("000201010212"));
        assert!(qr.contains("0114NV123456789012"));
        assert!(qr.contains("5303840"));
        assert!(qr.contains("54015"));
        assert!(qr.contains("5802KH"));
        assert!(qr.contains("5909Test Shop"));
        assert!(qr.contains("6010Phnom Penh"));
        assert_eq!(payload.encoded.md5, content_hash(qr));
        assert_eq!(payload.encoded.md5.len(), 32);
        assert_eq!(payload.bill_number(), &bill());
    }

    #[test]
    fn test_build_is_deterministic() {
        let b = builder();
        let req = request(12.5, "sotheasok@aclb", "Test Shop");
        let first = b.build(&req, &bill()).unwrap();
        let second = b.build(&req, &bill()).unwrap();
        assert_eq!(first.encoded, second.encoded);
    }

    #[test]
    fn test_crc_trailer_matches() {
        let payload = builder()
            .build(&request(1.5, "sotheasok@aclb", "Shop"), &bill())
            .unwrap();
        let qr = &payload.encoded.qr;
        let (body, crc) = qr.split_at(qr.len() - 4);
        assert!(body.ends_with("6304"));
        assert_eq!(crc, format!("{:04X}", CRC16.checksum(body.as_bytes())));
    }

    #[test]
    fn test_crc_check_value() {
        assert_eq!(CRC16.checksum(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(5.0).unwrap(), "5");
        assert_eq!(format_amount(1.5).unwrap(), "1.5");
        assert_eq!(format_amount(0.01).unwrap(), "0.01");
        assert_eq!(format_amount(100.0).unwrap(), "100");
        assert!(format_amount(1e15).is_err());
    }

    #[test]
    fn test_invalid_amounts() {
        let b = builder();
        for amount in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = b
                .validate(&request(amount, "sotheasok@aclb", "Shop"))
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);
        }
    }

    #[test]
    fn test_sub_cent_amount_rejected() {
        let err = builder()
            .build(&request(0.001, "sotheasok@aclb", "Shop"), &bill())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(normalize_amount(0.004).is_err());
        assert_eq!(normalize_amount(0.006).unwrap(), 0.01);
    }

    #[test]
    fn test_amount_rounded_once_for_payload_and_fields() {
        let payload = builder()
            .build(&request(1.999, "sotheasok@aclb", "Shop"), &bill())
            .unwrap();
        assert_eq!(payload.fields.amount, 2.0);
        assert!(payload.encoded.qr.contains("54012"));

        let payload = builder()
            .build(&request(12.345678, "sotheasok@aclb", "Shop"), &bill())
            .unwrap();
        assert_eq!(payload.fields.amount, 12.35);
        assert!(payload.encoded.qr.contains("540512.35"));
    }

    #[test]
    fn test_blank_merchant_name() {
        let err = builder()
            .validate(&request(1.0, "sotheasok@aclb", "   "))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_unknown_account_unauthorized() {
        let b = builder();
        let err = b.validate(&request(1.0, "unknown@bank", "Shop")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert!(err.to_string().contains("Unauthorized"));

        let err = b.validate(&request(1.0, "", "Shop")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[test]
    fn test_oversized_field_is_encoding_failure() {
        let long_name = "x".repeat(MAX_FIELD_LEN + 1);
        let err = builder()
            .build(&request(1.0, "sotheasok@aclb", &long_name), &bill())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EncodingFailure);
    }

    #[test]
    fn test_encoder_failures() {
        let req = request(1.0, "sotheasok@aclb", "Shop");

        let failing = PayloadBuilder::new(
            vec!["sotheasok@aclb".to_string()],
            MerchantProfile::default(),
            Arc::new(FailingEncoder),
        );
        assert_eq!(
            failing.build(&req, &bill()).unwrap_err().kind(),
            ErrorKind::EncodingFailure
        );

        let malformed = PayloadBuilder::new(
            vec!["sotheasok@aclb".to_string()],
            MerchantProfile::default(),
            Arc::new(BrokenEncoder(EncodedPayload {
                qr: String::new(),
                md5: "abc".to_string(),
            })),
        );
        assert_eq!(
            malformed.build(&req, &bill()).unwrap_err().kind(),
            ErrorKind::EncodingFailure
        );
    }
}
