// tests/property_test.rs

//! Property-based tests for IoliteDB
//!
//! These tests use property-based testing to verify invariants and properties
//! that should always hold, regardless of input values.

mod property {
    pub mod pressure_test;
    pub mod reconciler_test;
}
