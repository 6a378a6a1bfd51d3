//! headroom — resource allocation and capacity engine.
//!
//! Assigns people to projects over date ranges, detects over-commitment,
//! derives per-day capacity figures, and reconciles planned allocation
//! against logged timesheet work. State is event-sourced to a write-ahead
//! log and rebuilt on startup; derived per-day caches are maintained by a
//! single event-application gateway so they always match the live sums.
//!
//! The crate is an in-process service boundary: the embedding application
//! owns persons, projects, and permissions, and feeds the engine through
//! [`engine::Engine`] plus the [`policy::ApprovalPolicy`] seam.

pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod policy;
pub mod wal;
