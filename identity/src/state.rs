//! Session state types.
//!
//! This module defines the identifiers, roles and the observable session
//! value published by the session manager. All types are `Clone` so route
//! guards can hold their own copy of the latest snapshot.

use crate::providers::Account;
use serde::{Deserialize, Serialize};
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════
// ID Types
// ═══════════════════════════════════════════════════════════════════════

/// Identifier of an application account.
///
/// Accounts are keyed by the identity provider's principal uid, so the same
/// value identifies both the principal and its account document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    /// Wrap a provider uid.
    #[must_use]
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    /// Borrow the raw uid.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a child record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChildId(pub uuid::Uuid);

impl ChildId {
    /// Generate a new random `ChildId`.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ChildId {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Roles and credentials
// ═══════════════════════════════════════════════════════════════════════

/// Application role. Immutable outside explicit administrative action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Daycare staff.
    Admin,
    /// Parent or guardian.
    Parent,
}

impl Role {
    /// Get the role name as stored in account documents.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Parent => "parent",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credential kinds a principal can authenticate with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignInMethod {
    /// Email and password.
    Password,
    /// Federated identity (Google).
    Federated,
}

impl SignInMethod {
    /// Provider id reported by the identity provider for this method.
    #[must_use]
    pub const fn provider_id(&self) -> &'static str {
        match self {
            Self::Password => crate::constants::provider_ids::PASSWORD,
            Self::Federated => crate::constants::provider_ids::GOOGLE,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Session value
// ═══════════════════════════════════════════════════════════════════════

/// Why the last sign-in attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rejection {
    /// The account holds a different role than the caller expected.
    RoleMismatch {
        /// The account's real role.
        actual: Role,
    },
    /// Federated sign-in is disabled for the account.
    FederatedSignInDisabled,
    /// A federated identity without an account tried to sign in.
    UnauthorizedFederatedBypass,
}

impl From<Rejection> for crate::error::AuthError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::RoleMismatch { actual } => Self::RoleMismatch { actual },
            Rejection::FederatedSignInDisabled => Self::FederatedSignInDisabled,
            Rejection::UnauthorizedFederatedBypass => Self::UnauthorizedFederatedBypass,
        }
    }
}

/// Phase of the session state machine.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionPhase {
    /// No principal is signed in.
    #[default]
    SignedOut,

    /// A principal exists but must verify its e-mail before signing in.
    PendingVerification {
        /// The address the verification mail was sent to.
        email: String,
    },

    /// Signed in with an account of the given role.
    Active {
        /// Role of the signed-in account.
        role: Role,
    },

    /// The last attempt was refused; the provider session is signed out.
    Blocked {
        /// The refusal.
        reason: Rejection,
    },
}

impl SessionPhase {
    /// Returns `true` for every phase without a live session.
    #[must_use]
    pub const fn is_signed_out(&self) -> bool {
        !matches!(self, Self::Active { .. })
    }

    /// Role of the live session, if any.
    #[must_use]
    pub const fn role(&self) -> Option<Role> {
        match self {
            Self::Active { role } => Some(*role),
            _ => None,
        }
    }
}

/// Observable session value: `{user, role, loading}` plus the phase.
///
/// # Examples
///
/// ```
/// # use daycare_identity::SessionSnapshot;
/// let snapshot = SessionSnapshot::default();
/// assert!(snapshot.loading);
/// assert!(snapshot.user.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Signed-in account (only while `Active`).
    pub user: Option<Account>,

    /// Role of the signed-in account (only while `Active`).
    pub role: Option<Role>,

    /// `true` until the first provider report, and while a transition runs.
    pub loading: bool,

    /// State machine phase.
    pub phase: SessionPhase,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            user: None,
            role: None,
            loading: true,
            phase: SessionPhase::SignedOut,
        }
    }
}

impl SessionSnapshot {
    /// Account id of the live session.
    #[must_use]
    pub fn account_id(&self) -> Option<&AccountId> {
        self.user.as_ref().map(|account| &account.id)
    }
}
