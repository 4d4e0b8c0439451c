//! Transaction preparation and submission with exact amount handling

pub mod gas;
pub mod prepare;
pub mod sender;
pub mod units;

pub use gas::{GasEstimate, GasEstimator, GasPrice};
pub use prepare::{PreparedTransaction, TransactionPreparer, TransferRequest};
pub use sender::{PendingTransaction, TransactionSubmitter};
