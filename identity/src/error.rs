//! Error types for identity, session and access-code operations.
//!
//! Collaborators report failures in their own vocabulary ([`ProviderError`]
//! for the identity provider, [`StoreError`] for the document store). The
//! session manager maps both into [`AuthError`] before anything reaches the
//! UI, so raw provider codes never leak out of this crate.

use crate::access_code::AccessCodeRejection;
use crate::state::Role;
use thiserror::Error;

/// Result type alias for identity operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Result type alias for identity provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Result type alias for document store calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Error taxonomy surfaced by the session manager.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    // ═══════════════════════════════════════════════════════════
    // Authentication Errors
    // ═══════════════════════════════════════════════════════════

    /// Wrong e-mail/password combination (or unknown e-mail).
    #[error("Invalid credentials")]
    InvalidCredential,

    /// The principal's e-mail address has not been verified yet.
    #[error("Email address has not been verified")]
    UnverifiedEmail,

    /// The e-mail address already has a credential at the identity provider.
    #[error("Email address is already in use")]
    EmailAlreadyInUse,

    /// Password rejected by the password policy.
    #[error("Password must be at least {min_length} characters")]
    WeakPassword {
        /// Minimum accepted length.
        min_length: usize,
    },

    /// Malformed e-mail address.
    #[error("Invalid email address")]
    InvalidEmail,

    /// Password reset code is unknown, used, or expired.
    #[error("Invalid or expired reset code")]
    InvalidResetCode,

    // ═══════════════════════════════════════════════════════════
    // Registration Errors
    // ═══════════════════════════════════════════════════════════

    /// The access code cannot be redeemed.
    #[error("Access code cannot be used: {reason}")]
    ExpiredOrExhaustedAccessCode {
        /// Why the code was rejected.
        reason: AccessCodeRejection,
    },

    /// Someone attempted to self-register with the admin role.
    #[error("Admin accounts cannot be self-registered")]
    AdminSelfRegistration,

    /// The initial admin has already been created.
    #[error("Admin setup has already been completed")]
    AdminAlreadyInitialized,

    // ═══════════════════════════════════════════════════════════
    // Authorization Errors
    // ═══════════════════════════════════════════════════════════

    /// The account exists but holds a different role than requested.
    #[error("Account is registered as {actual}")]
    RoleMismatch {
        /// The role the account actually has.
        actual: Role,
    },

    /// Federated sign-in has been disabled for this account.
    #[error("Google sign-in is disabled for this account")]
    FederatedSignInDisabled,

    /// A federated principal tried to bypass the access-code gate.
    #[error("No registered account for this Google identity")]
    UnauthorizedFederatedBypass,

    /// The federated identity is already attached to another account.
    #[error("This Google account is already linked to another user")]
    FederatedCredentialInUse,

    /// Operation requires a signed-in session.
    #[error("Not signed in")]
    NotSignedIn,

    /// No account document exists for the requested user.
    #[error("Account not found")]
    AccountNotFound,

    // ═══════════════════════════════════════════════════════════
    // Transient Errors
    // ═══════════════════════════════════════════════════════════

    /// The user closed the federated sign-in popup.
    #[error("Sign-in popup was closed")]
    ProviderPopupCancelled,

    /// The browser blocked the federated sign-in popup.
    #[error("Sign-in popup was blocked")]
    ProviderPopupBlocked,

    /// The identity provider could not be reached.
    #[error("Identity provider unavailable")]
    ProviderUnavailable,

    /// A conflicting write won the race; the operation was not applied.
    #[error("Concurrent modification, please retry")]
    ConcurrentModification,

    // ═══════════════════════════════════════════════════════════
    // System Errors
    // ═══════════════════════════════════════════════════════════

    /// Document store failure.
    #[error("Database error: {0}")]
    Store(String),

    /// Internal error (should not be exposed to users).
    #[error("Internal error")]
    Internal,
}

impl AuthError {
    /// Returns `true` if retrying the same operation may succeed.
    ///
    /// # Examples
    ///
    /// ```
    /// # use daycare_identity::AuthError;
    /// assert!(AuthError::ProviderPopupCancelled.is_retryable());
    /// assert!(!AuthError::FederatedSignInDisabled.is_retryable());
    /// ```
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredential
                | Self::ProviderPopupCancelled
                | Self::ProviderPopupBlocked
                | Self::ProviderUnavailable
                | Self::ConcurrentModification
        )
    }

    /// Returns `true` if the attempt was refused by an authorization rule.
    ///
    /// Terminal errors always leave the session signed out.
    ///
    /// # Examples
    ///
    /// ```
    /// # use daycare_identity::{AuthError, Role};
    /// assert!(AuthError::RoleMismatch { actual: Role::Admin }.is_terminal());
    /// assert!(!AuthError::InvalidCredential.is_terminal());
    /// ```
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RoleMismatch { .. }
                | Self::FederatedSignInDisabled
                | Self::UnauthorizedFederatedBypass
        )
    }
}

/// Failures reported by the identity provider client.
///
/// Variants mirror the provider's error codes. They are mapped into
/// [`AuthError`] through the `From` impl below.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Wrong password.
    #[error("auth/wrong-password")]
    WrongPassword,

    /// No principal for this e-mail.
    #[error("auth/user-not-found")]
    UserNotFound,

    /// E-mail already registered.
    #[error("auth/email-already-in-use")]
    EmailAlreadyInUse,

    /// Password too weak for the provider.
    #[error("auth/weak-password")]
    WeakPassword,

    /// Malformed e-mail.
    #[error("auth/invalid-email")]
    InvalidEmail,

    /// Popup closed before completion.
    #[error("auth/popup-closed-by-user")]
    PopupClosed,

    /// Popup blocked by the browser.
    #[error("auth/popup-blocked")]
    PopupBlocked,

    /// Network failure.
    #[error("auth/network-request-failed")]
    Network,

    /// Credential already attached to another principal.
    #[error("auth/credential-already-in-use")]
    CredentialAlreadyInUse,

    /// Provider is not linked to the principal.
    #[error("auth/no-such-provider")]
    NoSuchProvider,

    /// Reset/verification code is malformed or already used.
    #[error("auth/invalid-action-code")]
    InvalidActionCode,

    /// Reset/verification code expired.
    #[error("auth/expired-action-code")]
    ExpiredActionCode,

    /// No principal is signed in.
    #[error("auth/no-current-user")]
    NoCurrentUser,

    /// Sensitive operation requires a fresh sign-in.
    #[error("auth/requires-recent-login")]
    RequiresRecentLogin,

    /// Any other provider code.
    #[error("{code}")]
    Other {
        /// Raw provider code.
        code: String,
    },
}

impl From<ProviderError> for AuthError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::WrongPassword | ProviderError::UserNotFound => Self::InvalidCredential,
            ProviderError::EmailAlreadyInUse => Self::EmailAlreadyInUse,
            ProviderError::WeakPassword => Self::WeakPassword {
                min_length: crate::constants::PROVIDER_MIN_PASSWORD_LENGTH,
            },
            ProviderError::InvalidEmail => Self::InvalidEmail,
            ProviderError::PopupClosed => Self::ProviderPopupCancelled,
            ProviderError::PopupBlocked => Self::ProviderPopupBlocked,
            ProviderError::Network => Self::ProviderUnavailable,
            ProviderError::CredentialAlreadyInUse => Self::FederatedCredentialInUse,
            ProviderError::InvalidActionCode | ProviderError::ExpiredActionCode => {
                Self::InvalidResetCode
            }
            ProviderError::NoCurrentUser => Self::NotSignedIn,
            ProviderError::NoSuchProvider
            | ProviderError::RequiresRecentLogin
            | ProviderError::Other { .. } => {
                tracing::debug!(%error, "Unmapped identity provider error");
                Self::Internal
            }
        }
    }
}

/// Failures reported by the document store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Document does not exist.
    #[error("document not found")]
    NotFound,

    /// Create-if-absent found an existing document.
    #[error("document already exists")]
    AlreadyExists,

    /// Transaction aborted because of a conflicting write.
    #[error("transaction aborted by conflicting write")]
    Conflict,

    /// Backend unreachable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Document could not be (de)serialised.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl From<StoreError> for AuthError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound => Self::AccountNotFound,
            StoreError::AlreadyExists | StoreError::Conflict => Self::ConcurrentModification,
            StoreError::Unavailable(message) | StoreError::Serialization(message) => {
                Self::Store(message)
            }
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}
