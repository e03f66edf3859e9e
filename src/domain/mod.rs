mod account;
mod amount;
mod ledger;
mod record;

pub use account::*;
pub use amount::*;
pub use ledger::*;
pub use record::*;
