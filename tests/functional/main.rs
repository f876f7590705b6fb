// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Functional tests for the Neo4jCluster reconciler.
//!
//! These tests drive whole reconcile passes WITHOUT a live Kubernetes
//! cluster. The object store, the Neo4j admin interface and the clock are
//! in-memory fakes, so every scenario is deterministic and fast.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_debounce_coalesces_successive_edits
//! ```
//!
//! ## Test Categories
//!
//! - **Lifecycle**: finalizer, conflicts, validation failures, deletion
//! - **Topology**: rendered configuration reaching the child resources
//! - **Consistency**: configuration debounce and split-brain repair
//! - **Upgrade**: rolling upgrades, pauses, resumes

mod consistency_tests;
mod mock_state;
mod topology_tests;

pub use mock_state::*;
