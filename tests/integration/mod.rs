//! Integration Tests Module
//!
//! End-to-end tests for the completion pipeline and the HTTP API, driven by
//! scripted in-process model backends.

// Shared fixtures
mod support;

// Completion pipeline tests
mod pipeline_test;

// Edit modes across turns
mod edit_flow_test;

// Router tests
mod api_test;
