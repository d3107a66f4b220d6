// Remote boundary: document store adapters and the payment return ledger
pub mod firebase;
pub mod memory;
pub mod payment;
pub mod store;
