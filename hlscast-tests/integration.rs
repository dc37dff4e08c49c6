//! Integration tests for hlscast
//!
//! These tests exercise the seams between modules: the ffprobe-backed prober
//! feeding the planner, the supervisor driving real sockets and child
//! processes, and the cleaner running against what they leave behind.

#[path = "integration/planning.rs"]
mod planning;

#[path = "integration/supervision.rs"]
mod supervision;

#[path = "integration/artifacts.rs"]
mod artifacts;
