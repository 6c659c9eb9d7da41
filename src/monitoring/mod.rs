// Bounded view of the most recent scoring outcomes
pub mod recent;

pub use recent::{RecentEvents, DEFAULT_RECENT_EVENTS_CAPACITY};
