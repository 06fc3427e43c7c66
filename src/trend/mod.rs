// Trend Tracker Module
// Scored snapshots per subject and the improvement/decline metrics derived from them

pub mod tracker;

pub use tracker::{TrendTracker, DEFAULT_MAX_SNAPSHOTS};
