//! Starts the Cyan Next.js development server and keeps it supervised.
//!
//! The launch sequence lives in [`orchestrator`]; the other modules are the
//! individual steps it drives.

pub mod command;
pub mod config;
pub mod dependencies;
pub mod error;
pub mod logging;
pub mod opener;
pub mod orchestrator;
pub mod prerequisite;
pub mod readiness;
pub mod shutdown;
pub mod speech;
pub mod supervisor;
