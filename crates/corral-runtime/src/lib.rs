//! Process lifecycle core for the Corral runtime.
//!
//! - [`engine`]: the engine contract and the build engine, which runs
//!   script phases and supervises the container's primary process.
//! - [`stop`]: the operator-side termination protocol.
//! - [`registry`]: the instance registry both sides meet at.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod engine;
pub mod registry;
pub mod signal;
pub mod stop;
pub mod user;
