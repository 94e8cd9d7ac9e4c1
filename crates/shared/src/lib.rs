//! Reconciliation core for the live fleet map.
//!
//! Merges a REST snapshot, push updates and polled GPS fixes into one set of
//! map entities, spreads co-located entities on rings around the office, and
//! derives the filtered, highlighted list a map renderer draws.

pub mod diff;
pub mod engine;
pub mod filter;
pub mod models;
pub mod placement;
pub mod selection;
pub mod store;

pub use engine::{FleetMap, VisibleChange};
pub use store::{Ingest, MarkerStore, RejectReason, SnapshotReport};
