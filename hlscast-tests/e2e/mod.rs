//! End-to-end tests for hlscast
//!
//! These tests run whole relay sessions through the orchestrator with a
//! scripted prober and a fake encoder, checking the encoder invocation, the
//! served playlist, exit codes, and the final state of the streaming directory.

mod relay_workflow;
