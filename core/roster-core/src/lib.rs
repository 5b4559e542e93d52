//! # roster-core
//!
//! Core library for Roster: infers meeting attendance from serialized DOM
//! snapshots of a video-conferencing page.
//!
//! ## Design principles
//!
//! - **Synchronous**: no async runtime. Producers are plain threads; the
//!   participant map is owned by one consumer loop and never shared.
//! - **Snapshot in, snapshots out**: the core reads `PageSnapshot` values
//!   through a `PageAdapter` and hands copies to the registry through a
//!   `RegistrySink`. Neither side ever holds a live reference to core state.
//! - **Graceful degradation**: a missing snapshot, an unextractable node, or
//!   an unreachable registry each cost accuracy, never tracking. The only
//!   hard stops are StopTracking and host teardown.

pub mod config;
pub mod dom;
pub mod error;
pub mod extract;
pub mod lifecycle;
pub mod page;
pub mod patterns;
pub mod roster;
pub mod scanner;
pub mod scheduler;
pub mod session;
pub mod sink;

pub use config::{load_config, RosterPaths, TrackerConfig};
pub use dom::{DomNode, PageSnapshot, Selector};
pub use error::{Result, TrackerError};
pub use extract::{Candidate, ExtractStrategy, Extractor};
pub use lifecycle::{LifecycleController, TrackerPhase};
pub use page::{PageAdapter, SpoolPageAdapter};
pub use roster::{flush_leaves, reconcile, Roster, RosterChange};
pub use scanner::{ObservedSet, Scanner, Sighting};
pub use scheduler::{ScanTrigger, Scheduler, StopReason, TrackerStatus};
pub use session::{meeting_code_from_url, MeetingSession};
pub use sink::{RegistrySink, SocketRegistrySink};
