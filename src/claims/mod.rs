//! The watcher: keyword policy, candidate ordering, the counter state
//! machine, the claim session body, and the task that drives them.

pub mod controller;
pub mod filter;
pub mod loop_worker;
pub mod orchestrator;
pub mod selector;
pub mod state;

pub use controller::WatchController;
pub use filter::KeywordFilter;
pub use loop_worker::{watch_loop, WatchContext, WatchReport};
pub use orchestrator::ClaimOrchestrator;
pub use selector::select;
pub use state::{CounterTracker, PollEvent, StatusHandle, WatchState, WatchStatus};
