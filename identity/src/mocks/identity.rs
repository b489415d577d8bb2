//! Mock identity provider for testing.

use crate::constants::PROVIDER_MIN_PASSWORD_LENGTH;
use crate::error::{ProviderError, ProviderResult};
use crate::providers::{FederatedProvider, FederatedSignIn, IdentityProvider, Principal};
use crate::state::{AccountId, SignInMethod};
use crate::utils::normalize_email;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// Scripted outcome of the next popup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopupResult {
    /// The user picks this federated account.
    Account {
        /// E-mail reported by the federated provider.
        email: String,
        /// Display name from the federated profile.
        display_name: Option<String>,
        /// Photo URL from the federated profile.
        photo_url: Option<String>,
    },
    /// The user closes the popup.
    Closed,
    /// The browser blocks the popup.
    Blocked,
    /// The provider cannot be reached.
    NetworkError,
}

impl PopupResult {
    /// Popup that picks an account with only an e-mail.
    #[must_use]
    pub fn account(email: &str) -> Self {
        Self::Account {
            email: email.to_string(),
            display_name: None,
            photo_url: None,
        }
    }
}

#[derive(Debug)]
struct StoredPrincipal {
    principal: Principal,
    password: Option<String>,
}

#[derive(Debug, Default)]
struct ProviderState {
    principals: HashMap<AccountId, StoredPrincipal>,
    by_email: HashMap<String, AccountId>,
    current: Option<AccountId>,
    popups: VecDeque<PopupResult>,
    reset_codes: HashMap<String, String>,
    verification_emails: Vec<String>,
    reset_emails: Vec<String>,
    fail_delete: bool,
    fail_unlink: bool,
    next_id: u64,
}

impl ProviderState {
    fn current_principal(&self) -> Option<Principal> {
        self.current
            .as_ref()
            .and_then(|uid| self.principals.get(uid))
            .map(|stored| stored.principal.clone())
    }

    fn current_mut(&mut self) -> ProviderResult<&mut Principal> {
        let uid = self.current.clone().ok_or(ProviderError::NoCurrentUser)?;
        self.principals
            .get_mut(&uid)
            .map(|stored| &mut stored.principal)
            .ok_or(ProviderError::NoCurrentUser)
    }

    fn insert(&mut self, principal: Principal, password: Option<String>) {
        self.by_email.insert(principal.email.clone(), principal.uid.clone());
        self.principals
            .insert(principal.uid.clone(), StoredPrincipal { principal, password });
    }

    fn next_uid(&mut self) -> AccountId {
        self.next_id += 1;
        AccountId::new(format!("uid-{}", self.next_id))
    }
}

/// Mock identity provider.
///
/// In-memory principals with a single "current principal". Popups are
/// scripted with [`queue_popup`](Self::queue_popup); an empty queue behaves
/// like a closed popup. State changes are published on the watch channel
/// after the state lock is released.
#[derive(Debug, Clone)]
pub struct MockIdentityProvider {
    state: Arc<Mutex<ProviderState>>,
    changes: Arc<watch::Sender<Option<Principal>>>,
}

impl MockIdentityProvider {
    /// Create a provider with no principals.
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = watch::channel(None);
        Self {
            state: Arc::new(Mutex::new(ProviderState::default())),
            changes: Arc::new(changes),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, current: Option<Principal>) {
        self.changes.send_replace(current);
    }

    /// Create a password principal without signing it in (for testing).
    pub fn seed_password_principal(&self, email: &str, password: &str, verified: bool) -> Principal {
        let mut state = self.lock();
        let principal = Principal {
            uid: state.next_uid(),
            email: normalize_email(email),
            email_verified: verified,
            display_name: None,
            photo_url: None,
            methods: BTreeSet::from([SignInMethod::Password]),
        };
        state.insert(principal.clone(), Some(password.to_string()));
        principal
    }

    /// Mark an e-mail address as verified (for testing).
    pub fn verify_email(&self, email: &str) {
        let mut state = self.lock();
        let Some(uid) = state.by_email.get(&normalize_email(email)).cloned() else {
            return;
        };
        if let Some(stored) = state.principals.get_mut(&uid) {
            stored.principal.email_verified = true;
        }
    }

    /// Sign a principal in without credentials, as a persisted session would (for testing).
    pub fn restore_session(&self, uid: &AccountId) {
        let current = {
            let mut state = self.lock();
            if !state.principals.contains_key(uid) {
                return;
            }
            state.current = Some(uid.clone());
            state.current_principal()
        };
        self.publish(current);
    }

    /// Script the next popup outcome (for testing).
    pub fn queue_popup(&self, result: PopupResult) {
        self.lock().popups.push_back(result);
    }

    /// Make `delete_current_principal` fail (for testing).
    pub fn set_fail_delete(&self, fail: bool) {
        self.lock().fail_delete = fail;
    }

    /// Make `unlink` fail (for testing).
    pub fn set_fail_unlink(&self, fail: bool) {
        self.lock().fail_unlink = fail;
    }

    /// Number of principals (for testing).
    #[must_use]
    pub fn principal_count(&self) -> usize {
        self.lock().principals.len()
    }

    /// Look up a principal by e-mail (for testing).
    #[must_use]
    pub fn principal_by_email(&self, email: &str) -> Option<Principal> {
        let state = self.lock();
        state
            .by_email
            .get(&normalize_email(email))
            .and_then(|uid| state.principals.get(uid))
            .map(|stored| stored.principal.clone())
    }

    /// Addresses verification mail was sent to (for testing).
    #[must_use]
    pub fn verification_emails(&self) -> Vec<String> {
        self.lock().verification_emails.clone()
    }

    /// Addresses reset mail was sent to (for testing).
    #[must_use]
    pub fn reset_emails(&self) -> Vec<String> {
        self.lock().reset_emails.clone()
    }

    /// Latest reset code mailed to an address (for testing).
    #[must_use]
    pub fn reset_code_for(&self, email: &str) -> Option<String> {
        let email = normalize_email(email);
        self.lock()
            .reset_codes
            .iter()
            .find(|(_, owner)| **owner == email)
            .map(|(code, _)| code.clone())
    }
}

impl Default for MockIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider for MockIdentityProvider {
    async fn create_with_password(&self, email: &str, password: &str) -> ProviderResult<Principal> {
        let principal = {
            let mut state = self.lock();
            let email = normalize_email(email);

            if state.by_email.contains_key(&email) {
                return Err(ProviderError::EmailAlreadyInUse);
            }
            if password.len() < PROVIDER_MIN_PASSWORD_LENGTH {
                return Err(ProviderError::WeakPassword);
            }

            let principal = Principal {
                uid: state.next_uid(),
                email,
                email_verified: false,
                display_name: None,
                photo_url: None,
                methods: BTreeSet::from([SignInMethod::Password]),
            };
            state.insert(principal.clone(), Some(password.to_string()));
            state.current = Some(principal.uid.clone());
            principal
        };

        self.publish(Some(principal.clone()));
        Ok(principal)
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> ProviderResult<Principal> {
        let principal = {
            let mut state = self.lock();
            let uid = state
                .by_email
                .get(&normalize_email(email))
                .cloned()
                .ok_or(ProviderError::UserNotFound)?;
            let stored = state.principals.get(&uid).ok_or(ProviderError::UserNotFound)?;

            if stored.password.as_deref() != Some(password) {
                return Err(ProviderError::WrongPassword);
            }

            let principal = stored.principal.clone();
            state.current = Some(uid);
            principal
        };

        self.publish(Some(principal.clone()));
        Ok(principal)
    }

    async fn sign_in_with_popup(&self, _provider: FederatedProvider) -> ProviderResult<FederatedSignIn> {
        let outcome = {
            let mut state = self.lock();
            let (email, display_name, photo_url) = match state.popups.pop_front() {
                Some(PopupResult::Account {
                    email,
                    display_name,
                    photo_url,
                }) => (normalize_email(&email), display_name, photo_url),
                Some(PopupResult::Blocked) => return Err(ProviderError::PopupBlocked),
                Some(PopupResult::NetworkError) => return Err(ProviderError::Network),
                Some(PopupResult::Closed) | None => return Err(ProviderError::PopupClosed),
            };

            let existing = state.by_email.get(&email).cloned();
            let outcome = if let Some(uid) = existing {
                let stored = state.principals.get_mut(&uid).ok_or(ProviderError::UserNotFound)?;
                stored.principal.methods.insert(SignInMethod::Federated);
                stored.principal.email_verified = true;
                FederatedSignIn {
                    principal: stored.principal.clone(),
                    is_new_principal: false,
                }
            } else {
                let principal = Principal {
                    uid: state.next_uid(),
                    email,
                    email_verified: true,
                    display_name,
                    photo_url,
                    methods: BTreeSet::from([SignInMethod::Federated]),
                };
                state.insert(principal.clone(), None);
                FederatedSignIn {
                    principal,
                    is_new_principal: true,
                }
            };

            state.current = Some(outcome.principal.uid.clone());
            outcome
        };

        self.publish(Some(outcome.principal.clone()));
        Ok(outcome)
    }

    async fn link_popup(&self, _provider: FederatedProvider) -> ProviderResult<Principal> {
        let mut state = self.lock();
        let uid = state.current.clone().ok_or(ProviderError::NoCurrentUser)?;

        let (email, display_name, photo_url) = match state.popups.pop_front() {
            Some(PopupResult::Account {
                email,
                display_name,
                photo_url,
            }) => (normalize_email(&email), display_name, photo_url),
            Some(PopupResult::Blocked) => return Err(ProviderError::PopupBlocked),
            Some(PopupResult::NetworkError) => return Err(ProviderError::Network),
            Some(PopupResult::Closed) | None => return Err(ProviderError::PopupClosed),
        };

        if state.by_email.get(&email).is_some_and(|owner| *owner != uid) {
            return Err(ProviderError::CredentialAlreadyInUse);
        }

        let principal = state.current_mut()?;
        principal.methods.insert(SignInMethod::Federated);
        if principal.display_name.is_none() {
            principal.display_name = display_name;
        }
        if principal.photo_url.is_none() {
            principal.photo_url = photo_url;
        }
        Ok(principal.clone())
    }

    async fn unlink(&self, _provider: FederatedProvider) -> ProviderResult<Principal> {
        let mut state = self.lock();
        if state.fail_unlink {
            return Err(ProviderError::RequiresRecentLogin);
        }

        let principal = state.current_mut()?;
        if !principal.methods.remove(&SignInMethod::Federated) {
            return Err(ProviderError::NoSuchProvider);
        }
        Ok(principal.clone())
    }

    async fn send_email_verification(&self) -> ProviderResult<()> {
        let mut state = self.lock();
        let email = state.current_mut()?.email.clone();
        state.verification_emails.push(email);
        Ok(())
    }

    async fn send_reset_email(&self, email: &str) -> ProviderResult<()> {
        let mut state = self.lock();
        let email = normalize_email(email);
        if !state.by_email.contains_key(&email) {
            return Err(ProviderError::UserNotFound);
        }

        state.next_id += 1;
        let code = format!("reset-{}", state.next_id);
        state.reset_codes.retain(|_, owner| *owner != email);
        state.reset_codes.insert(code, email.clone());
        state.reset_emails.push(email);
        Ok(())
    }

    async fn verify_reset_code(&self, code: &str) -> ProviderResult<String> {
        self.lock()
            .reset_codes
            .get(code)
            .cloned()
            .ok_or(ProviderError::InvalidActionCode)
    }

    async fn confirm_reset(&self, code: &str, new_password: &str) -> ProviderResult<()> {
        let mut state = self.lock();
        let email = state
            .reset_codes
            .get(code)
            .cloned()
            .ok_or(ProviderError::InvalidActionCode)?;

        if new_password.len() < PROVIDER_MIN_PASSWORD_LENGTH {
            return Err(ProviderError::WeakPassword);
        }

        state.reset_codes.remove(code);
        let uid = state.by_email.get(&email).cloned().ok_or(ProviderError::UserNotFound)?;
        if let Some(stored) = state.principals.get_mut(&uid) {
            stored.password = Some(new_password.to_string());
            stored.principal.methods.insert(SignInMethod::Password);
        }
        Ok(())
    }

    async fn delete_current_principal(&self) -> ProviderResult<()> {
        {
            let mut state = self.lock();
            if state.fail_delete {
                return Err(ProviderError::RequiresRecentLogin);
            }

            let uid = state.current.take().ok_or(ProviderError::NoCurrentUser)?;
            if let Some(stored) = state.principals.remove(&uid) {
                state.by_email.remove(&stored.principal.email);
            }
        }

        self.publish(None);
        Ok(())
    }

    async fn update_profile(&self, display_name: Option<&str>, photo_url: Option<&str>) -> ProviderResult<Principal> {
        let mut state = self.lock();
        let principal = state.current_mut()?;
        if let Some(name) = display_name {
            principal.display_name = Some(name.to_string());
        }
        if let Some(photo) = photo_url {
            principal.photo_url = Some(photo.to_string());
        }
        Ok(principal.clone())
    }

    async fn sign_out(&self) -> ProviderResult<()> {
        self.lock().current = None;
        self.publish(None);
        Ok(())
    }

    fn current_principal(&self) -> Option<Principal> {
        self.lock().current_principal()
    }

    fn auth_state_changes(&self) -> watch::Receiver<Option<Principal>> {
        self.changes.subscribe()
    }
}
