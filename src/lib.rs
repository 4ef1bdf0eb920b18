//! Client-side sync layer for kanban boards: a TTL cache that coalesces
//! fetches, an optimistic mutation engine with rollback, and a reconciler
//! that turns drag gestures into task mutations.

pub mod api;
pub mod app;
pub mod backend;
pub mod board;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod inflight;
pub mod logging;
pub mod model;
pub mod notify;
pub mod optimistic;
pub mod ui;

pub use error::SyncError;
