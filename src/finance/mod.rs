//! Money: where it is held and where it is recorded.

pub mod custody;
pub mod ledger;
