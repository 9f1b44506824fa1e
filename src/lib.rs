//! Multi-source article acquisition.
//!
//! An [`services::Orchestrator`] pulls candidates from feeds, JSON APIs and
//! scraped pages, drops duplicates and low-quality items, and hands the rest
//! to a [`services::ContentSink`]. Per-source rate budgets and a circuit
//! breaker keep misbehaving sources from dragging the run down.

pub mod cancel;
pub mod cli;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod services;
pub mod sources;
pub mod storage;
