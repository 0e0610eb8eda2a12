// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared test utilities for integration and failure tests.
//!
//! This module provides:
//! - An in-memory, call-recording directory node
//! - Topology fixtures (supplier/consumer pairs)
//! - Opt-in log output via `RUST_LOG`

#![allow(dead_code)]

pub mod mock_directory;

pub use mock_directory::*;

use replication_topology::{TopologyConfig, TopologyController};
use std::sync::Arc;

/// Route `tracing` output to the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Controller with zero delays and small budgets.
pub fn controller() -> TopologyController {
    init_tracing();
    TopologyController::new(TopologyConfig::for_testing()).expect("test config is valid")
}

/// Two nodes serving `SUFFIX`, with writes on the first replayed on the second.
pub async fn supplier_consumer_pair() -> (Arc<MockDirectory>, Arc<MockDirectory>) {
    let supplier = MockDirectory::with_suffix("ldap1").await;
    let consumer = MockDirectory::with_suffix("ldap2").await;
    supplier.replicate_to(&consumer).await;
    (supplier, consumer)
}
