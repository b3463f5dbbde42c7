pub mod claim_session;

pub use claim_session::{ClaimOutcomeRecord, ClaimSessionRecord};
