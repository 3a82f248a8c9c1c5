pub mod error;
pub mod options;

pub use error::{BoxError, StoreError, StoreResult, TxError, TxErrorKind};
pub use options::{IsolationLevel, TxOptions};
