//! cardstock — patch-layer reconciliation engine for a forked upstream.
//!
//! The fork's own changes live as an ordered stack of patch files per
//! domain (`api`, `server`); upstream's source tree is decompiled,
//! remapped, and then the stacks are materialized on top of it. This
//! crate provides:
//!
//! - the patch model and its text format ([`model::patch`]),
//! - deterministic stack application with fuzzy hunk matching
//!   ([`materialize`]),
//! - diff extraction from an edited tree back into patches ([`extract`]),
//! - an interactive rebase coordinator for upstream bumps ([`rebase`]),
//! - the staged build pipeline with resume ([`pipeline`]).

pub mod config;
pub mod error;
pub mod extract;
pub mod materialize;
pub mod model;
pub mod pipeline;
pub mod rebase;
pub mod telemetry;
pub mod tools;

pub use error::CardstockError;
