pub mod item;
pub mod session;

pub use item::{Item, Outcome};
pub use session::{ClaimSession, ClaimedItem, MissedItem, SessionStatus};
