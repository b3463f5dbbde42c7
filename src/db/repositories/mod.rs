pub mod claim_sessions;
