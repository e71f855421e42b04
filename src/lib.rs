//! Bottleneck Survey - runtime contention tracking and reporting
//!
//! Instrumented code enters named bottlenecks (locks, pools, I/O channels)
//! and disposes the returned accessor when done. A detector fans every
//! enter/exit out to the surveyors registered by a coordinator, each of which
//! aggregates a per-bottleneck utilization score over its own scope: the
//! whole process, one thread, one logical call chain, or rolling time
//! windows.

pub mod accessor;
pub mod ambient;
pub mod bottleneck;
pub mod call_context;
pub mod cli;
pub mod clock;
pub mod coordinator;
pub mod detector;
pub mod error;
pub mod filter;
pub mod report;
pub mod settings;
pub mod survey;
pub mod surveyor;
