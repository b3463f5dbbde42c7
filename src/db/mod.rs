mod connection;
mod helpers;
mod migrations;
mod models;
mod repositories;

pub use connection::Database;
pub use models::{ClaimOutcomeRecord, ClaimSessionRecord};
