//! Identity provider client trait.

use crate::error::ProviderResult;
use crate::state::{AccountId, SignInMethod};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio::sync::watch;

/// Authenticated identity returned by the provider for the current session,
/// before it is matched against an application account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Provider uid (also the account id).
    pub uid: AccountId,

    /// E-mail address as reported by the provider.
    pub email: String,

    /// Whether the provider considers the e-mail verified.
    pub email_verified: bool,

    /// Display name from the provider profile.
    pub display_name: Option<String>,

    /// Photo URL from the provider profile.
    pub photo_url: Option<String>,

    /// Credentials attached to this principal.
    pub methods: BTreeSet<SignInMethod>,
}

impl Principal {
    /// Returns `true` if the principal can only authenticate federated.
    #[must_use]
    pub fn is_federated_only(&self) -> bool {
        self.methods.contains(&SignInMethod::Federated) && !self.methods.contains(&SignInMethod::Password)
    }

    /// Returns `true` if a federated credential is attached.
    #[must_use]
    pub fn has_federated(&self) -> bool {
        self.methods.contains(&SignInMethod::Federated)
    }
}

/// Federated identity providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FederatedProvider {
    /// Google OAuth.
    Google,
}

impl FederatedProvider {
    /// Provider id as reported by the identity provider.
    #[must_use]
    pub const fn provider_id(&self) -> &'static str {
        match self {
            Self::Google => crate::constants::provider_ids::GOOGLE,
        }
    }
}

/// Result of a popup-based federated sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedSignIn {
    /// The signed-in principal.
    pub principal: Principal,

    /// `true` if the provider created the principal during this sign-in.
    pub is_new_principal: bool,
}

/// Identity provider client.
///
/// This trait abstracts over the external authentication service. All
/// calls act on the provider's single "current principal" for this process.
///
/// # Implementation Notes
///
/// - Every call that changes the current principal must publish the new
///   value on the channel returned by [`auth_state_changes`](Self::auth_state_changes).
/// - A cancelled popup must not change the current principal.
pub trait IdentityProvider: Send + Sync {
    /// Create a password principal and sign it in.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - E-mail already registered → `ProviderError::EmailAlreadyInUse`
    /// - Password rejected → `ProviderError::WeakPassword`
    fn create_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> impl std::future::Future<Output = ProviderResult<Principal>> + Send;

    /// Sign in with e-mail and password.
    ///
    /// # Errors
    ///
    /// Returns error if the credentials are wrong or the network fails.
    fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> impl std::future::Future<Output = ProviderResult<Principal>> + Send;

    /// Sign in through a provider popup.
    ///
    /// Creates a new principal if none exists for the federated identity.
    ///
    /// # Errors
    ///
    /// Returns error if the popup is closed or blocked, or the network fails.
    fn sign_in_with_popup(
        &self,
        provider: FederatedProvider,
    ) -> impl std::future::Future<Output = ProviderResult<FederatedSignIn>> + Send;

    /// Attach a federated credential to the current principal through a popup.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - No principal is signed in → `ProviderError::NoCurrentUser`
    /// - The identity belongs to another principal → `ProviderError::CredentialAlreadyInUse`
    fn link_popup(
        &self,
        provider: FederatedProvider,
    ) -> impl std::future::Future<Output = ProviderResult<Principal>> + Send;

    /// Detach a federated credential from the current principal.
    ///
    /// # Errors
    ///
    /// Returns error if the credential is not attached or the call fails.
    fn unlink(
        &self,
        provider: FederatedProvider,
    ) -> impl std::future::Future<Output = ProviderResult<Principal>> + Send;

    /// Send a verification e-mail to the current principal.
    ///
    /// # Errors
    ///
    /// Returns error if no principal is signed in or delivery fails.
    fn send_email_verification(&self) -> impl std::future::Future<Output = ProviderResult<()>> + Send;

    /// Send a password reset e-mail.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::UserNotFound` for unknown addresses.
    fn send_reset_email(&self, email: &str) -> impl std::future::Future<Output = ProviderResult<()>> + Send;

    /// Check a reset code and return the e-mail it belongs to.
    ///
    /// # Errors
    ///
    /// Returns error if the code is invalid or expired.
    fn verify_reset_code(&self, code: &str) -> impl std::future::Future<Output = ProviderResult<String>> + Send;

    /// Complete a password reset.
    ///
    /// # Errors
    ///
    /// Returns error if the code is invalid or the password is rejected.
    fn confirm_reset(
        &self,
        code: &str,
        new_password: &str,
    ) -> impl std::future::Future<Output = ProviderResult<()>> + Send;

    /// Delete the current principal and sign out.
    ///
    /// # Errors
    ///
    /// Returns error if no principal is signed in or the provider refuses.
    fn delete_current_principal(&self) -> impl std::future::Future<Output = ProviderResult<()>> + Send;

    /// Update the current principal's profile.
    ///
    /// `None` leaves the field unchanged.
    ///
    /// # Errors
    ///
    /// Returns error if no principal is signed in.
    fn update_profile(
        &self,
        display_name: Option<&str>,
        photo_url: Option<&str>,
    ) -> impl std::future::Future<Output = ProviderResult<Principal>> + Send;

    /// Sign the current principal out.
    ///
    /// # Errors
    ///
    /// Returns error if the provider call fails.
    fn sign_out(&self) -> impl std::future::Future<Output = ProviderResult<()>> + Send;

    /// The principal signed in right now.
    fn current_principal(&self) -> Option<Principal>;

    /// Subscribe to "auth state changed" notifications.
    ///
    /// The receiver always holds the latest principal (or `None`).
    fn auth_state_changes(&self) -> watch::Receiver<Option<Principal>>;
}
