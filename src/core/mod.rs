//! Core primitives shared by every blackboard subsystem.
//!
//! Storage layout, the write broker, configuration, logging, and the read-only interfaces
//! to external collaborators (position state, version control, task tiering) live here.

pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod output;
pub mod position;
pub mod schemas;
pub mod scope;
pub mod store;
pub mod tiering;
pub mod time;
pub mod vcs;
