// ============================================================================
// Transaction Bookkeeping
// ============================================================================
//
// Identity, lifecycle state and buffered writes of a single session.
//
// ============================================================================

pub mod change;
pub mod state;

pub use change::Change;
pub use state::{TransactionId, TransactionState};
