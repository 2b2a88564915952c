//! jobscout: a single-worker research-automation backend.
//!
//! A durable SQLite-backed task queue feeds one worker that runs a
//! multi-step company research pipeline over a canonical-company store with
//! alias resolution and referential merges. External concerns (search,
//! drafting, scraping, mail, spreadsheets) sit behind collaborator traits,
//! optionally backed by isolated helper processes.

pub mod cache;
pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod helpers;
pub mod isolation;
mod migrations;
pub mod pipeline;
pub mod sources;
pub mod state;
pub mod worker;
