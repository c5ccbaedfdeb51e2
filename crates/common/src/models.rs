//! Wire and domain models shared by the issuance service and its clients

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::{BillNumber, Error};

/// Transaction currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Khr,
}

impl Currency {
    /// ISO 4217 numeric code
    pub fn numeric_code(self) -> &'static str {
        match self {
            Currency::Usd => "840",
            Currency::Khr => "116",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Currency::Usd => f.write_str("USD"),
            Currency::Khr => f.write_str("KHR"),
        }
    }
}

impl FromStr for Currency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::Usd),
            "KHR" => Ok(Currency::Khr),
            other => Err(Error::InvalidInput(format!("Unsupported currency: {}", other))),
        }
    }
}

/// A request to issue one payment QR code
#[derive(Debug, Clone, PartialEq)]
pub struct IssuanceRequest {
    pub amount: f64,
    pub account_id: String,
    pub merchant_name: String,
}

/// Successful issuance as returned to HTTP callers
#[derive(Debug, Clone, Serialize)]
pub struct IssuanceResponse {
    /// URL of the rendered QR image
    pub qr: String,

    /// Content hash of the encoded payload, used for status checks
    pub md5: String,

    /// Bill number of this transaction
    pub tran: BillNumber,

    #[serde(rename = "merchantName")]
    pub merchant_name: String,

    #[serde(serialize_with = "serialize_amount")]
    pub amount: f64,
}

/// Whole amounts go out as integers (`5`, not `5.0`)
fn serialize_amount<S: Serializer>(amount: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if amount.fract() == 0.0 && amount.abs() < 9_007_199_254_740_992.0 {
        serializer.serialize_i64(*amount as i64)
    } else {
        serializer.serialize_f64(*amount)
    }
}
