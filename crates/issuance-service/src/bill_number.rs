//! Bill number generation
//!
//! Numbers are random, not unique. Uniqueness is the ledger's job.

use khqr_common::{BillNumber, Error, Result};
use rand::Rng;

/// Smallest and largest 12-digit values
const NUMBER_RANGE: std::ops::RangeInclusive<u64> = 100_000_000_000..=999_999_999_999;

/// Source of bill numbers for new transactions
pub trait BillNumberGenerator: Send + Sync {
    fn generate(&self) -> BillNumber;
}

/// Alphabetic prefix followed by a uniformly random 12-digit number
#[derive(Debug, Clone)]
pub struct RandomBillNumbers {
    prefix: BillNumber,
}

impl RandomBillNumbers {
    pub fn new(prefix: &str) -> Result<Self> {
        if !prefix.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(Error::InvalidInput(format!(
                "Bill prefix must be alphabetic: {:?}",
                prefix
            )));
        }
        Ok(Self {
            prefix: BillNumber::parse(prefix)?,
        })
    }
}

impl BillNumberGenerator for RandomBillNumbers {
    fn generate(&self) -> BillNumber {
        let number = rand::thread_rng().gen_range(NUMBER_RANGE);
        self.prefix.with_number(number)
    }
}
