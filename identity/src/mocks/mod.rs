//! Mock provider implementations for testing.
//!
//! This module provides simple, in-memory implementations of both
//! collaborator traits for use in unit and integration tests.

pub mod identity;
pub mod store;

pub use identity::{MockIdentityProvider, PopupResult};
pub use store::MockDocumentStore;
