//! Test helpers for vaultmux integration tests.
//!
//! - Mock upstream MCP server on a Unix socket
//! - NDJSON test client and daemon harness

#![allow(unused_imports)] // Re-exports may not be used by all test files
#![allow(dead_code)]

pub mod mock_upstream;
pub mod test_client;

pub use mock_upstream::*;
pub use test_client::*;
