// Application layer - the ledger engine and the errors it reports.
// Request layers (the CLI here, any network transport elsewhere) call the
// engine and translate `LedgerError` into their own responses.

pub mod engine;
pub mod error;

pub use engine::*;
pub use error::*;
