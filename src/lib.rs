//! Run-state core for ordered, interdependent hardware test cases.
//!
//! A host test runtime registers discovered cases, asks before each case
//! whether it may run, and reports outcomes. The engine keeps one
//! authoritative run document and publishes every change to subscribers such
//! as the JSON store and the dashboard event stream.

pub mod api;
pub mod cli;
pub mod engine;
pub mod plan;
pub mod storage;
