//! # Daycare Identity & Access Linking
//!
//! Identity, session and access-linking subsystem for a daycare
//! management application: who may register, how a signed-in principal is
//! matched to an application account with a role, and how child records
//! created by staff get linked to parent accounts.
//!
//! ## Features
//!
//! - **Access-code gated registration**: parents self-register with a code
//!   handed out by the daycare; consumption is atomic
//! - **Role-aware sign-in**: password and Google popup, with role and
//!   disabled-federated checks layered on top of authentication
//! - **Orphan reconciliation**: accounts lost while child records survived
//!   are recreated and relinked, idempotently
//! - **Compensating actions**: no principal is left behind without an account
//! - **Observable session**: a `watch` channel consumed by route guards
//!
//! ## Architecture
//!
//! ```text
//! IdentityProvider ─┐                      ┌─▶ watch<SessionSnapshot> ─▶ RouteGuard
//!                   ├─▶ SessionManager ────┤
//! DocumentStore ────┘   (reducer + I/O)    └─▶ AuthOutcome / AuthError
//! ```
//!
//! ## Example: Parent registration
//!
//! ```rust,ignore
//! use daycare_identity::*;
//!
//! let manager = Arc::new(SessionManager::new(
//!     IdentityEnvironment::new(provider, store),
//!     IdentityConfig::default(),
//! ));
//! manager.start();
//!
//! let registration = manager
//!     .register(RegistrationRequest::parent("a@x.com", "secret1", "ABC123"))
//!     .await?;
//!
//! // Signed out until the e-mail is verified.
//! assert!(manager.snapshot().phase.is_signed_out());
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

// Public modules
pub mod access_code;
pub mod compensation;
pub mod config;
pub mod constants;
pub mod environment;
pub mod error;
pub mod guard;
pub mod manager;
pub mod metrics;
pub mod providers;
pub mod reconciliation;
pub mod reducer;
pub mod state;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

// Re-export commonly used types
pub use access_code::{AccessCodeRejection, AccessCodeValidator, IssueRequest, Validation};
pub use config::IdentityConfig;
pub use environment::{Clock, IdentityEnvironment, SystemClock};
pub use error::{AuthError, ProviderError, Result, StoreError};
pub use guard::{GuardDecision, RouteGuard};
pub use manager::{AuthOutcome, Credentials, DisableOutcome, Registration, RegistrationRequest, SessionManager};
pub use providers::{Account, DocumentStore, IdentityProvider, Principal, Profile};
pub use state::{AccountId, ChildId, Rejection, Role, SessionPhase, SessionSnapshot, SignInMethod};
