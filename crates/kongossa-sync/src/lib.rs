//! # kongossa-sync
//!
//! Cadence and gossip for a Kongossa node: the per-tunnel activity clocks
//! that turn load into a refresh interval, the pull-based [`SyncEngine`]
//! that polls subscribed peers and merges their state, and the periodic
//! [`SyncDriver`] that ties both to the store.

pub mod activity;
pub mod driver;
pub mod engine;
pub mod fetch;
pub mod link;

mod error;

pub use activity::{ActivityClock, ActivityClocks, ActivityConfig, ActivityMode, ActivityState, Phase};
pub use driver::SyncDriver;
pub use engine::{PollReport, SubscriptionStatus, SyncConfig, SyncEngine};
pub use error::{Result, SyncError};
pub use fetch::{HttpFetcher, PeerFetcher};
pub use link::{normalize_peer_url, ShareLink};
