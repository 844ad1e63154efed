//! Integration test crate for the Weft mesh.
//!
//! This crate has no library code — it only contains integration tests
//! that exercise end-to-end mesh flows across multiple workspace crates.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p weft-integration-tests
//! ```
