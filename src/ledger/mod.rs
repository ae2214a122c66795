pub mod abi;
pub mod client;
pub mod source;
pub mod types;

pub use client::JsonRpcLedgerClient;
pub use source::{LedgerSource, RootChecker};
pub use types::{BlockInfo, BlockTag, LedgerError, LogFilter, RawLog, ReceiptInfo, TransactionInfo};
