pub mod bill_number;
pub mod error;
pub mod models;

pub use bill_number::BillNumber;
pub use error::{Error, ErrorKind, Result};
pub use models::{Currency, IssuanceRequest, IssuanceResponse};
