//! sirocco — asynchronous media-generation task orchestrator.
//!
//! Tracks a generation request from submission to terminal outcome across
//! interchangeable external backends: synchronous ones return artifacts in
//! the submit call, asynchronous ones hand back a job id that is polled on
//! an adaptive schedule. Terminal outcomes are written exactly once to a
//! durable task store and fanned out to notification sinks; in-flight jobs
//! survive a process restart through startup recovery.

pub mod config;
pub mod error;
pub mod notify;
pub mod orchestrator;
pub mod provider;
pub mod store;
pub mod task;
