use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// Transaction identifier embedded in a payment payload.
/// Always non-empty ASCII alphanumeric, so it is safe as a file name and as a ledger line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BillNumber(String);

impl BillNumber {
    /// Parse an identifier received from outside the process
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(Error::InvalidInput(format!("Invalid bill number: {:?}", s)));
        }
        Ok(Self(s.to_string()))
    }

    /// Build from a prefix and a numeric part
    pub fn from_parts(prefix: &str, number: u64) -> Result<Self> {
        Self::parse(&format!("{}{}", prefix, number))
    }

    /// Append the decimal digits of `number`; digits keep the value alphanumeric
    pub fn with_number(&self, number: u64) -> Self {
        Self(format!("{}{}", self.0, number))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BillNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for BillNumber {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<BillNumber> for String {
    fn from(value: BillNumber) -> Self {
        value.0
    }
}
