//! Run ledger & cache interface (C8): abstracts the document store used as both a
//! per-run cache and a cross-run recency ledger.

pub mod memory;
pub mod model;
pub mod mongo;
pub mod trait_def;

pub use memory::InMemoryLedger;
pub use model::VulnVerification;
pub use mongo::MongoLedger;
pub use trait_def::RunLedger;
