//! Metric names and descriptions for the identity subsystem.
//!
//! The library only records through the `metrics` facade. Installing an
//! exporter is the host application's job; call [`register_metrics`] once
//! after installing it so the descriptions show up.

use metrics::{Unit, describe_counter};

// Re-export metrics macros for use in other modules
pub use metrics::counter;

/// Sign-in attempts, labelled `method` (`password`, `federated`, `restore`) and `outcome`.
pub const SIGN_IN_TOTAL: &str = "identity_sign_in_total";

/// Registrations, labelled `outcome`.
pub const REGISTRATION_TOTAL: &str = "identity_registration_total";

/// Access code uses consumed.
pub const ACCESS_CODE_CONSUMED_TOTAL: &str = "identity_access_code_consumed_total";

/// Reconciliation runs, labelled `outcome` (`existing`, `created`, `restored`, `bypass`).
pub const RECONCILIATION_TOTAL: &str = "identity_reconciliation_total";

/// Compensating actions executed, labelled `action`.
pub const COMPENSATION_TOTAL: &str = "identity_compensation_total";

/// Register all metric descriptions with the installed recorder.
pub fn register_metrics() {
    describe_counter!(SIGN_IN_TOTAL, Unit::Count, "Sign-in attempts by method and outcome");
    describe_counter!(REGISTRATION_TOTAL, Unit::Count, "Parent registrations by outcome");
    describe_counter!(ACCESS_CODE_CONSUMED_TOTAL, Unit::Count, "Access code uses consumed");
    describe_counter!(RECONCILIATION_TOTAL, Unit::Count, "Account reconciliation runs by outcome");
    describe_counter!(COMPENSATION_TOTAL, Unit::Count, "Compensating actions executed");
}
