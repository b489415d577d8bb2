//! Session & role manager.
//!
//! One [`SessionManager`] per process owns the observable session value and
//! runs every transition that touches it. It is the only place where
//! identity-provider and document-store results meet, and the boundary at
//! which their errors are mapped into [`AuthError`].
//!
//! # Lifecycle
//!
//! ```text
//! SessionManager::new(env, config)  ── snapshot: loading
//!        │
//!   start()   ── spawns the auth-state listener (holds a Weak ref)
//!        │
//!   register / authenticate / disable_federated / ...   (serialised)
//!        │
//!   shutdown() ── aborts the listener
//! ```
//!
//! # Serialisation
//!
//! Every transition, explicit call or auth-state event, runs under one
//! in-flight guard. A second call waits for the first, so a double-clicked
//! sign-in cannot create two accounts or consume a code twice.

use crate::access_code::{AccessCodeValidator, IssueRequest, Validation};
use crate::compensation::{Compensation, compensate};
use crate::config::IdentityConfig;
use crate::environment::{Clock, IdentityEnvironment, SystemClock};
use crate::error::{AuthError, ProviderError, Result, StoreError};
use crate::metrics;
use crate::providers::{
    AccessCode, Account, AccountPatch, DocumentStore, FederatedProvider, IdentityProvider, Principal, Profile,
    SystemFlag,
};
use crate::reconciliation::{Reconciler, Reconciliation};
use crate::reducer::{SessionAction, SessionReducer};
use crate::state::{AccountId, Rejection, Role, SessionSnapshot, SignInMethod};
use crate::utils::{is_valid_email, normalize_access_code, normalize_email};
use std::fmt;
use std::sync::{Arc, PoisonError, Weak};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

// ═══════════════════════════════════════════════════════════════════════
// Requests and outcomes
// ═══════════════════════════════════════════════════════════════════════

/// Credentials for [`SessionManager::authenticate`].
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// E-mail and password.
    Password {
        /// E-mail address.
        email: String,
        /// Password.
        password: String,
    },

    /// Popup sign-in with a federated provider.
    Federated {
        /// Provider to open the popup for.
        provider: FederatedProvider,
        /// Role the caller expects the account to hold.
        expected_role: Role,
    },
}

impl Credentials {
    /// Password credentials.
    #[must_use]
    pub fn password(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Password {
            email: email.into(),
            password: password.into(),
        }
    }

    /// Google popup credentials.
    #[must_use]
    pub const fn google(expected_role: Role) -> Self {
        Self::Federated {
            provider: FederatedProvider::Google,
            expected_role,
        }
    }

    const fn method(&self) -> &'static str {
        match self {
            Self::Password { .. } => "password",
            Self::Federated { .. } => "federated",
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password { email, .. } => f
                .debug_struct("Password")
                .field("email", email)
                .field("password", &"<redacted>")
                .finish(),
            Self::Federated {
                provider,
                expected_role,
            } => f
                .debug_struct("Federated")
                .field("provider", provider)
                .field("expected_role", expected_role)
                .finish(),
        }
    }
}

/// Result of an authentication attempt that reached a decision.
///
/// Retryable failures (wrong password, cancelled popup, network) are
/// returned as `Err` instead and leave the session untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Session established.
    Authenticated(Account),

    /// The principal must verify its e-mail first; the session is signed out.
    VerificationRequired {
        /// Address awaiting verification.
        email: String,
    },

    /// Refused by an authorization rule; the session is signed out.
    Rejected(Rejection),
}

impl AuthOutcome {
    const fn label(&self) -> &'static str {
        match self {
            Self::Authenticated(_) => "success",
            Self::VerificationRequired { .. } => "verification_required",
            Self::Rejected(_) => "rejected",
        }
    }

    /// Collapse into a `Result`, turning refusals into their `AuthError`.
    ///
    /// # Errors
    ///
    /// Returns `UnverifiedEmail` or the rejection's error.
    pub fn into_account(self) -> Result<Account> {
        match self {
            Self::Authenticated(account) => Ok(account),
            Self::VerificationRequired { .. } => Err(AuthError::UnverifiedEmail),
            Self::Rejected(rejection) => Err(rejection.into()),
        }
    }
}

/// Parent self-registration request.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    /// E-mail address.
    pub email: String,

    /// Password.
    pub password: String,

    /// Profile fields.
    pub profile: Profile,

    /// Access code handed out by the daycare.
    pub access_code: String,

    /// Requested role. Anything but `Parent` is refused.
    pub role: Role,
}

impl RegistrationRequest {
    /// Parent registration without profile fields.
    #[must_use]
    pub fn parent(email: impl Into<String>, password: impl Into<String>, access_code: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            profile: Profile::default(),
            access_code: access_code.into(),
            role: Role::Parent,
        }
    }

    /// Set the profile fields.
    #[must_use]
    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profile = profile;
        self
    }
}

impl fmt::Debug for RegistrationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("profile", &self.profile)
            .field("access_code", &self.access_code)
            .field("role", &self.role)
            .finish()
    }
}

/// A completed registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// The new account.
    pub account: Account,

    /// Child records linked to it.
    pub linked_children: usize,
}

/// What `disable_federated` did to the live credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisableOutcome {
    /// The session only had a federated credential and was signed out.
    SignedOut,

    /// The federated credential was detached from the live principal.
    Unlinked,

    /// The flag is set but detaching failed. Federated sign-in is refused
    /// by the flag; the credential may still exist at the provider.
    UnlinkDeferred,

    /// Only the account document changed (not the live session, or no
    /// federated credential attached).
    FlagOnly,
}

// ═══════════════════════════════════════════════════════════════════════
// Manager
// ═══════════════════════════════════════════════════════════════════════

/// Session & role manager.
///
/// # Type Parameters
///
/// - `P`: Identity provider client
/// - `D`: Document store
/// - `C`: Clock
pub struct SessionManager<P, D, C = SystemClock>
where
    P: IdentityProvider,
    D: DocumentStore,
    C: Clock,
{
    env: IdentityEnvironment<P, D, C>,
    config: IdentityConfig,
    reducer: SessionReducer,
    in_flight: Mutex<()>,
    session_tx: watch::Sender<SessionSnapshot>,
    listener: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<P, D, C> fmt::Debug for SessionManager<P, D, C>
where
    P: IdentityProvider,
    D: DocumentStore,
    C: Clock,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("session", &*self.session_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl<P, D, C> SessionManager<P, D, C>
where
    P: IdentityProvider,
    D: DocumentStore,
    C: Clock,
{
    /// Create a manager. The session stays `loading` until [`start`](Self::start)
    /// evaluates the provider's current principal.
    #[must_use]
    pub fn new(env: IdentityEnvironment<P, D, C>, config: IdentityConfig) -> Self {
        let (session_tx, _) = watch::channel(SessionSnapshot::default());
        Self {
            env,
            config,
            reducer: SessionReducer::new(),
            in_flight: Mutex::new(()),
            session_tx,
            listener: std::sync::Mutex::new(None),
        }
    }

    /// Subscribe to the observable session value.
    #[must_use]
    pub fn session(&self) -> watch::Receiver<SessionSnapshot> {
        self.session_tx.subscribe()
    }

    /// Current session value.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.session_tx.borrow().clone()
    }

    /// Configuration.
    #[must_use]
    pub const fn config(&self) -> &IdentityConfig {
        &self.config
    }

    /// Injected collaborators.
    #[must_use]
    pub const fn environment(&self) -> &IdentityEnvironment<P, D, C> {
        &self.env
    }

    /// Start the auth-state listener.
    ///
    /// Evaluates the provider's current principal immediately (restoring a
    /// persisted session) and again on every auth-state change. Calling
    /// `start` twice is a no-op.
    pub fn start(self: &Arc<Self>)
    where
        P: 'static,
        D: 'static,
        C: 'static,
    {
        let mut listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if listener.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let changes = self.env.provider.auth_state_changes();
        *listener = Some(tokio::spawn(listen(Arc::downgrade(self), changes)));
        tracing::debug!("Auth-state listener started");
    }

    /// Stop the auth-state listener.
    pub fn shutdown(&self) {
        let handle = self.listener.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            handle.abort();
            tracing::debug!("Auth-state listener stopped");
        }
    }

    fn publish(&self, action: SessionAction) {
        let reducer = self.reducer;
        self.session_tx.send_if_modified(|snapshot| reducer.reduce(snapshot, action));
    }

    fn session_account(&self) -> Option<Account> {
        self.session_tx.borrow().user.clone()
    }

    /// Resolve the account a settings call acts on. Parents may only act on
    /// their own account; admins on any.
    fn authorized_target(&self, user_id: Option<&AccountId>) -> Result<AccountId> {
        let session = self.session_account().ok_or(AuthError::NotSignedIn)?;
        match user_id {
            None => Ok(session.id),
            Some(id) if *id == session.id => Ok(session.id),
            Some(id) if session.role == Role::Admin => Ok(id.clone()),
            Some(id) => {
                tracing::warn!(account_id = %session.id, target = %id, "Settings change for another account refused");
                Err(AuthError::RoleMismatch { actual: session.role })
            }
        }
    }

    fn check_password(&self, password: &str) -> Result<()> {
        if password.chars().count() < self.config.min_password_length {
            return Err(AuthError::WeakPassword {
                min_length: self.config.min_password_length,
            });
        }
        Ok(())
    }

    fn validator(&self) -> AccessCodeValidator<'_, D, C> {
        AccessCodeValidator::new(&self.env.store, &self.env.clock)
    }

    // ───────────────────────────────────────────────────────────────────
    // Authentication
    // ───────────────────────────────────────────────────────────────────

    /// Authenticate with password or federated credentials.
    ///
    /// Authorization refusals are returned as `Ok(AuthOutcome::Rejected)`
    /// after the provider session has been signed out; `Err` is reserved
    /// for failures that left the session unchanged.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Wrong password or unknown e-mail → `AuthError::InvalidCredential`
    /// - Popup closed or blocked → `AuthError::ProviderPopupCancelled` / `ProviderPopupBlocked`
    /// - Provider or store unreachable
    #[tracing::instrument(skip(self), fields(method = credentials.method()))]
    pub async fn authenticate(&self, credentials: Credentials) -> Result<AuthOutcome> {
        let method = credentials.method();
        let _guard = self.in_flight.lock().await;
        self.publish(SessionAction::TransitionStarted);

        let result = match credentials {
            Credentials::Password { email, password } => self.authenticate_password(&email, &password).await,
            Credentials::Federated {
                provider,
                expected_role,
            } => self.authenticate_federated(provider, expected_role).await,
        };

        self.publish(SessionAction::TransitionFinished);

        let outcome = match &result {
            Ok(outcome) => outcome.label(),
            Err(error) => {
                tracing::warn!(%error, "Authentication failed");
                "error"
            }
        };
        metrics::counter!(metrics::SIGN_IN_TOTAL, "method" => method, "outcome" => outcome).increment(1);

        result
    }

    /// Sign in with e-mail and password.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Credentials are wrong → `AuthError::InvalidCredential`
    /// - The e-mail is unverified → `AuthError::UnverifiedEmail` (session signed out)
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Account> {
        self.authenticate(Credentials::password(email, password))
            .await?
            .into_account()
    }

    /// Sign in through the Google popup, expecting an account of `expected_role`.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - No account exists → `AuthError::UnauthorizedFederatedBypass` (principal deleted)
    /// - The account holds another role → `AuthError::RoleMismatch`
    /// - Federated sign-in is disabled → `AuthError::FederatedSignInDisabled`
    /// - The popup was cancelled or blocked (retryable, nothing changed)
    pub async fn sign_in_with_google(&self, expected_role: Role) -> Result<Account> {
        match self.authenticate(Credentials::google(expected_role)).await? {
            AuthOutcome::Authenticated(account) => Ok(account),
            AuthOutcome::Rejected(rejection) => Err(rejection.into()),
            AuthOutcome::VerificationRequired { .. } => Err(AuthError::UnverifiedEmail),
        }
    }

    async fn authenticate_password(&self, email: &str, password: &str) -> Result<AuthOutcome> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(AuthError::InvalidEmail);
        }

        let principal = self.env.provider.sign_in_with_password(&email, password).await?;

        if self.config.require_verified_email && !principal.email_verified {
            tracing::info!(uid = %principal.uid, "Sign-in refused until e-mail is verified");
            Compensation::SignOut.run(&self.env.provider, &self.env.store).await;
            self.publish(SessionAction::VerificationRequired { email: email.clone() });
            return Ok(AuthOutcome::VerificationRequired { email });
        }

        let account = match self.resolve_account(&principal).await {
            Ok(Some(account)) => account,
            Ok(None) => return Ok(self.reject_bypass(false).await),
            Err(error) => {
                Compensation::SignOut.run(&self.env.provider, &self.env.store).await;
                return Err(error);
            }
        };

        let patch = AccountPatch {
            add_methods: vec![SignInMethod::Password],
            last_login: Some(self.env.clock.now()),
            ..AccountPatch::default()
        };
        let account = match self.env.store.merge_account(&account.id, &patch).await {
            Ok(account) => account,
            Err(error) => {
                Compensation::SignOut.run(&self.env.provider, &self.env.store).await;
                return Err(error.into());
            }
        };

        tracing::info!(account_id = %account.id, role = %account.role, "Signed in with password");
        self.publish(SessionAction::Established(account.clone()));
        Ok(AuthOutcome::Authenticated(account))
    }

    async fn authenticate_federated(&self, provider: FederatedProvider, expected_role: Role) -> Result<AuthOutcome> {
        // Popup failures are retryable and leave everything as it was.
        let signed_in = self.env.provider.sign_in_with_popup(provider).await?;
        let principal = signed_in.principal;
        let undo = if signed_in.is_new_principal {
            Compensation::DeletePrincipal
        } else {
            Compensation::SignOut
        };

        let account = match self.find_account(&principal).await {
            Ok(Some(account)) => account,
            Ok(None) => return Ok(self.reject_bypass(signed_in.is_new_principal).await),
            Err(error) => {
                undo.run(&self.env.provider, &self.env.store).await;
                return Err(error);
            }
        };

        // Authorization checks run before any write.
        if account.google_sign_in_disabled {
            return Ok(self.reject(Rejection::FederatedSignInDisabled, &undo).await);
        }
        if account.role != expected_role {
            return Ok(self
                .reject(Rejection::RoleMismatch { actual: account.role }, &undo)
                .await);
        }

        let patch = AccountPatch {
            add_methods: vec![SignInMethod::Federated],
            google_linked: Some(true),
            last_login: Some(self.env.clock.now()),
            ..backfill(&account, &principal)
        };
        let account = match self.env.store.merge_account(&account.id, &patch).await {
            Ok(account) => account,
            Err(error) => {
                Compensation::SignOut.run(&self.env.provider, &self.env.store).await;
                return Err(error.into());
            }
        };

        tracing::info!(account_id = %account.id, role = %account.role, "Signed in with {}", provider.provider_id());
        self.publish(SessionAction::Established(account.clone()));
        Ok(AuthOutcome::Authenticated(account))
    }

    async fn find_account(&self, principal: &Principal) -> Result<Option<Account>> {
        if let Some(account) = self.env.store.get_account(&principal.uid).await? {
            return Ok(Some(account));
        }
        Ok(self
            .env
            .store
            .find_account_by_email(&normalize_email(&principal.email))
            .await?)
    }

    async fn resolve_account(&self, principal: &Principal) -> Result<Option<Account>> {
        let reconciliation = Reconciler::new(&self.env.store, &self.env.clock)
            .with_orphan_linking(self.config.reconcile_orphans)
            .reconcile(principal)
            .await?;

        if let Reconciliation::Restored { account, linked } = &reconciliation {
            tracing::info!(account_id = %account.id, linked, "Account restored from orphaned children");
        }
        Ok(reconciliation.into_account())
    }

    async fn reject(&self, rejection: Rejection, undo: &Compensation) -> AuthOutcome {
        tracing::warn!(?rejection, "Sign-in refused");
        undo.run(&self.env.provider, &self.env.store).await;
        self.publish(SessionAction::Rejected(rejection));
        AuthOutcome::Rejected(rejection)
    }

    async fn reject_bypass(&self, delete_principal: bool) -> AuthOutcome {
        let undo = if delete_principal {
            Compensation::DeletePrincipal
        } else {
            Compensation::SignOut
        };
        self.reject(Rejection::UnauthorizedFederatedBypass, &undo).await
    }

    // ───────────────────────────────────────────────────────────────────
    // Auth-state events
    // ───────────────────────────────────────────────────────────────────

    async fn on_auth_state_changed(&self) {
        let _guard = self.in_flight.lock().await;

        let Some(principal) = self.env.provider.current_principal() else {
            self.publish(SessionAction::PrincipalLost);
            return;
        };

        let already_active = self.session_tx.borrow().user.as_ref().is_some_and(|account| {
            account.id == principal.uid || account.email == normalize_email(&principal.email)
        });
        if already_active {
            self.publish(SessionAction::TransitionFinished);
            return;
        }

        self.publish(SessionAction::TransitionStarted);
        let result = self.restore_session(&principal).await;
        self.publish(SessionAction::TransitionFinished);

        let outcome = match &result {
            Ok(outcome) => outcome.label(),
            Err(error) => {
                tracing::warn!(uid = %principal.uid, %error, "Session restore failed");
                "error"
            }
        };
        metrics::counter!(metrics::SIGN_IN_TOTAL, "method" => "restore", "outcome" => outcome).increment(1);
    }

    async fn restore_session(&self, principal: &Principal) -> Result<AuthOutcome> {
        if self.config.require_verified_email && !principal.email_verified {
            Compensation::SignOut.run(&self.env.provider, &self.env.store).await;
            let email = normalize_email(&principal.email);
            self.publish(SessionAction::VerificationRequired { email: email.clone() });
            return Ok(AuthOutcome::VerificationRequired { email });
        }

        let Some(account) = self.resolve_account(principal).await? else {
            return Ok(self.reject_bypass(true).await);
        };

        if account.google_sign_in_disabled && principal.is_federated_only() {
            return Ok(self
                .reject(Rejection::FederatedSignInDisabled, &Compensation::SignOut)
                .await);
        }

        tracing::info!(account_id = %account.id, role = %account.role, "Session restored");
        self.publish(SessionAction::Established(account.clone()));
        Ok(AuthOutcome::Authenticated(account))
    }

    // ───────────────────────────────────────────────────────────────────
    // Registration
    // ───────────────────────────────────────────────────────────────────

    /// Register a parent account with an access code.
    ///
    /// On success the account exists, one code use is consumed, child
    /// records issued with the code are linked, a verification e-mail is
    /// sent and the session ends in `PendingVerification`.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `role` is not `Parent` → `AuthError::AdminSelfRegistration`
    /// - The e-mail or password is rejected by policy
    /// - The access code is invalid → `AuthError::ExpiredOrExhaustedAccessCode`
    /// - The e-mail already has a credential → `AuthError::EmailAlreadyInUse`
    ///
    /// Failures after the provider principal was created delete it again.
    #[tracing::instrument(skip(self, request), fields(email = %request.email))]
    pub async fn register(&self, request: RegistrationRequest) -> Result<Registration> {
        let result = self.register_checked(request).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(AuthError::AdminSelfRegistration) => "admin_refused",
            Err(AuthError::ExpiredOrExhaustedAccessCode { .. }) => "invalid_code",
            Err(_) => "error",
        };
        metrics::counter!(metrics::REGISTRATION_TOTAL, "outcome" => outcome).increment(1);
        if let Err(error) = &result {
            tracing::warn!(%error, "Registration failed");
        }

        result
    }

    async fn register_checked(&self, request: RegistrationRequest) -> Result<Registration> {
        if request.role != Role::Parent {
            return Err(AuthError::AdminSelfRegistration);
        }

        let email = normalize_email(&request.email);
        if !is_valid_email(&email) {
            return Err(AuthError::InvalidEmail);
        }
        self.check_password(&request.password)?;

        // Pre-flight: fail before any principal exists.
        let code = normalize_access_code(&request.access_code);
        self.validator().validate(&code).await?.into_result()?;

        let _guard = self.in_flight.lock().await;
        self.publish(SessionAction::TransitionStarted);
        let result = self.register_locked(&email, &request.password, request.profile, &code).await;
        self.publish(SessionAction::TransitionFinished);
        result
    }

    async fn register_locked(&self, email: &str, password: &str, profile: Profile, code: &str) -> Result<Registration> {
        let principal = self.env.provider.create_with_password(email, password).await?;

        let mut account = Account::new_parent(principal.uid.clone(), email.to_string(), self.env.clock.now());
        account.profile = profile;
        account.profile.display_name = account.profile.resolved_display_name();
        account.access_code = Some(code.to_string());

        let linked = match self.redeem_into_account(&account, code).await {
            Ok(linked) => linked,
            Err(error) => {
                compensate(&[Compensation::DeletePrincipal], &self.env.provider, &self.env.store).await;
                return Err(error);
            }
        };

        if let Err(error) = self
            .env
            .provider
            .update_profile(account.profile.display_name.as_deref(), account.profile.photo_url.as_deref())
            .await
        {
            tracing::warn!(%error, "Provider profile update failed");
        }
        self.send_verification_and_sign_out(email).await;

        tracing::info!(account_id = %account.id, linked, "Parent registered");
        Ok(Registration {
            account,
            linked_children: linked,
        })
    }

    /// Account write, code redemption and child linking commit together.
    async fn redeem_into_account(&self, account: &Account, code: &str) -> Result<usize> {
        let children: Vec<_> = self
            .env
            .store
            .unregistered_children_for_code(code)
            .await?
            .into_iter()
            .map(|child| child.id)
            .collect();

        self.validator().consume_for_account(code, account, &children).await
    }

    async fn send_verification_and_sign_out(&self, email: &str) {
        if let Err(error) = self.env.provider.send_email_verification().await {
            tracing::warn!(%error, "Verification e-mail could not be sent");
        }
        Compensation::SignOut.run(&self.env.provider, &self.env.store).await;
        self.publish(SessionAction::VerificationRequired {
            email: email.to_string(),
        });
    }

    /// Create the first admin account.
    ///
    /// Runs once per deployment: the `system/admin_setup` flag is written
    /// create-if-absent after the account. The new admin must verify the
    /// e-mail like any other principal.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Bootstrap already ran → `AuthError::AdminAlreadyInitialized`
    /// - The e-mail or password is rejected
    #[tracing::instrument(skip(self, password, profile))]
    pub async fn bootstrap_admin(&self, email: &str, password: &str, profile: Profile) -> Result<Account> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(AuthError::InvalidEmail);
        }
        self.check_password(password)?;

        let _guard = self.in_flight.lock().await;
        if self.env.store.admin_setup().await?.is_some_and(|flag| flag.initialized) {
            return Err(AuthError::AdminAlreadyInitialized);
        }

        self.publish(SessionAction::TransitionStarted);
        let result = self.bootstrap_locked(&email, password, profile).await;
        self.publish(SessionAction::TransitionFinished);
        result
    }

    async fn bootstrap_locked(&self, email: &str, password: &str, profile: Profile) -> Result<Account> {
        let principal = self.env.provider.create_with_password(email, password).await?;
        let now = self.env.clock.now();

        let mut account = Account::new(principal.uid.clone(), email.to_string(), Role::Admin, now);
        account.profile = profile;
        account.profile.display_name = account.profile.resolved_display_name();

        if let Err(error) = self.env.store.create_account(&account).await {
            compensate(&[Compensation::DeletePrincipal], &self.env.provider, &self.env.store).await;
            return Err(error.into());
        }

        let flag = SystemFlag {
            initialized: true,
            initial_admin_id: Some(account.id.clone()),
            initialized_at: now,
        };
        if let Err(error) = self.env.store.initialize_admin_setup(&flag).await {
            compensate(
                &[Compensation::DeleteAccount(account.id.clone()), Compensation::DeletePrincipal],
                &self.env.provider,
                &self.env.store,
            )
            .await;
            return Err(match error {
                StoreError::AlreadyExists => AuthError::AdminAlreadyInitialized,
                other => other.into(),
            });
        }

        if let Some(name) = account.profile.display_name.as_deref() {
            if let Err(error) = self.env.provider.update_profile(Some(name), None).await {
                tracing::warn!(%error, "Provider profile update failed");
            }
        }
        self.send_verification_and_sign_out(email).await;

        tracing::info!(account_id = %account.id, "Initial admin created");
        Ok(account)
    }

    /// Sign the current principal out.
    ///
    /// # Errors
    ///
    /// Returns error if the provider call fails; the session is left as is.
    pub async fn sign_out(&self) -> Result<()> {
        let _guard = self.in_flight.lock().await;
        self.env.provider.sign_out().await?;
        self.publish(SessionAction::SignedOut);
        tracing::info!("Signed out");
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────
    // Federated credential management
    // ───────────────────────────────────────────────────────────────────

    /// Attach a Google credential to the live session through a popup.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - No session → `AuthError::NotSignedIn`
    /// - Federated sign-in is disabled for the account → `AuthError::FederatedSignInDisabled`
    /// - The Google identity belongs to another principal → `AuthError::FederatedCredentialInUse`
    pub async fn link_federated(&self) -> Result<Account> {
        let _guard = self.in_flight.lock().await;
        let session = self.session_account().ok_or(AuthError::NotSignedIn)?;

        let account = self
            .env
            .store
            .get_account(&session.id)
            .await?
            .ok_or(AuthError::AccountNotFound)?;
        if account.google_sign_in_disabled {
            return Err(AuthError::FederatedSignInDisabled);
        }

        let principal = self.env.provider.link_popup(FederatedProvider::Google).await?;

        let patch = AccountPatch {
            add_methods: vec![SignInMethod::Federated],
            google_linked: Some(true),
            ..backfill(&account, &principal)
        };
        let account = self.env.store.merge_account(&account.id, &patch).await?;

        tracing::info!(account_id = %account.id, "Federated credential linked");
        self.publish(SessionAction::AccountUpdated(account.clone()));
        Ok(account)
    }

    /// Whether federated sign-in is linked and allowed for an account
    /// (the session's account when `user_id` is `None`).
    ///
    /// Targeting another account requires an admin session.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - No session is signed in → `AuthError::NotSignedIn`
    /// - A parent targets another account → `AuthError::RoleMismatch`
    /// - The store fails
    pub async fn has_federated_linked(&self, user_id: Option<&AccountId>) -> Result<bool> {
        let target = self.authorized_target(user_id)?;
        Ok(self
            .env
            .store
            .get_account(&target)
            .await?
            .is_some_and(|account| account.google_linked && !account.google_sign_in_disabled))
    }

    /// Allow federated sign-in again.
    ///
    /// Only the account document changes; no credential is attached.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - No session is signed in → `AuthError::NotSignedIn`
    /// - A parent targets another account → `AuthError::RoleMismatch`
    /// - The store fails
    pub async fn enable_federated(&self, user_id: Option<&AccountId>) -> Result<Account> {
        let _guard = self.in_flight.lock().await;
        let target = self.authorized_target(user_id)?;

        let patch = AccountPatch {
            add_methods: vec![SignInMethod::Federated],
            google_linked: Some(true),
            google_sign_in_disabled: Some(false),
            ..AccountPatch::default()
        };
        let account = self.env.store.merge_account(&target, &patch).await?;

        tracing::info!(account_id = %account.id, "Federated sign-in enabled");
        self.publish(SessionAction::AccountUpdated(account.clone()));
        Ok(account)
    }

    /// Disable federated sign-in.
    ///
    /// The flag is persisted first. If the target is the live session, its
    /// federated credential is then detached; a session that has nothing
    /// but the federated credential is signed out instead.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - No session is signed in → `AuthError::NotSignedIn`
    /// - A parent targets another account → `AuthError::RoleMismatch`
    /// - The store fails
    ///
    /// Unlink failures are reported as [`DisableOutcome::UnlinkDeferred`].
    pub async fn disable_federated(&self, user_id: Option<&AccountId>) -> Result<DisableOutcome> {
        let _guard = self.in_flight.lock().await;
        let target = self.authorized_target(user_id)?;

        let patch = AccountPatch {
            remove_methods: vec![SignInMethod::Federated],
            google_linked: Some(false),
            google_sign_in_disabled: Some(true),
            ..AccountPatch::default()
        };
        let account = self.env.store.merge_account(&target, &patch).await?;
        tracing::info!(account_id = %account.id, "Federated sign-in disabled");

        let is_session = self.session_tx.borrow().account_id() == Some(&target);
        let principal = self
            .env
            .provider
            .current_principal()
            .filter(|principal| is_session && principal.has_federated());

        let Some(principal) = principal else {
            self.publish(SessionAction::AccountUpdated(account));
            return Ok(DisableOutcome::FlagOnly);
        };

        if principal.is_federated_only() {
            tracing::info!(account_id = %account.id, "Only credential was federated, signing out");
            Compensation::SignOut.run(&self.env.provider, &self.env.store).await;
            self.publish(SessionAction::SignedOut);
            return Ok(DisableOutcome::SignedOut);
        }

        let outcome = match self.env.provider.unlink(FederatedProvider::Google).await {
            Ok(_) => DisableOutcome::Unlinked,
            Err(error) => {
                tracing::warn!(account_id = %account.id, %error, "Federated unlink failed; flag still blocks sign-in");
                DisableOutcome::UnlinkDeferred
            }
        };

        self.publish(SessionAction::AccountUpdated(account));
        Ok(outcome)
    }

    // ───────────────────────────────────────────────────────────────────
    // Password reset and verification
    // ───────────────────────────────────────────────────────────────────

    /// Send a password reset e-mail.
    ///
    /// Unknown addresses are reported as success.
    ///
    /// # Errors
    ///
    /// Returns error if the address is malformed or the provider fails.
    pub async fn reset_password(&self, email: &str) -> Result<()> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(AuthError::InvalidEmail);
        }

        match self.env.provider.send_reset_email(&email).await {
            Ok(()) => {
                tracing::info!("Password reset e-mail sent");
                Ok(())
            }
            Err(ProviderError::UserNotFound) => {
                tracing::debug!("Password reset requested for unknown e-mail");
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Check a reset code and return the e-mail it was sent to.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidResetCode` if the code is unknown, used or expired.
    pub async fn verify_reset_code(&self, code: &str) -> Result<String> {
        Ok(self.env.provider.verify_reset_code(code).await?)
    }

    /// Set a new password with a reset code.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The password is too short → `AuthError::WeakPassword`
    /// - The code is invalid → `AuthError::InvalidResetCode`
    pub async fn confirm_reset(&self, code: &str, new_password: &str) -> Result<()> {
        self.check_password(new_password)?;
        self.env.provider.confirm_reset(code, new_password).await?;
        tracing::info!("Password reset completed");
        Ok(())
    }

    /// Re-send the verification e-mail.
    ///
    /// Signs the principal in, sends, and signs out again.
    ///
    /// # Returns
    ///
    /// `false` if the address was already verified (nothing sent).
    ///
    /// # Errors
    ///
    /// Returns error if the address is malformed, the credentials are
    /// wrong or sending fails.
    pub async fn resend_verification(&self, email: &str, password: &str) -> Result<bool> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(AuthError::InvalidEmail);
        }
        let _guard = self.in_flight.lock().await;

        let principal = self.env.provider.sign_in_with_password(&email, password).await?;
        let sent = if principal.email_verified {
            Ok(false)
        } else {
            self.env.provider.send_email_verification().await.map(|()| true)
        };
        Compensation::SignOut.run(&self.env.provider, &self.env.store).await;

        let sent = sent?;
        tracing::info!(sent, "Verification e-mail resend requested");
        Ok(sent)
    }

    // ───────────────────────────────────────────────────────────────────
    // Profile and access codes
    // ───────────────────────────────────────────────────────────────────

    /// Update display name and photo on both the provider and the account.
    ///
    /// # Errors
    ///
    /// Returns error if there is no session or either write fails.
    pub async fn update_profile(&self, display_name: Option<&str>, photo_url: Option<&str>) -> Result<Account> {
        let _guard = self.in_flight.lock().await;
        let session = self.session_account().ok_or(AuthError::NotSignedIn)?;

        self.env.provider.update_profile(display_name, photo_url).await?;

        let patch = AccountPatch {
            display_name: display_name.map(str::to_string),
            photo_url: photo_url.map(str::to_string),
            ..AccountPatch::default()
        };
        let account = self.env.store.merge_account(&session.id, &patch).await?;

        self.publish(SessionAction::AccountUpdated(account.clone()));
        Ok(account)
    }

    /// Check an access code without consuming it.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read.
    pub async fn validate_access_code(&self, code: &str) -> Result<Validation> {
        self.validator().validate(code).await
    }

    /// Issue a new access code. Requires an admin session.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - No session → `AuthError::NotSignedIn`
    /// - The session is not an admin → `AuthError::RoleMismatch`
    /// - The code cannot be stored
    pub async fn issue_access_code(&self, mut request: IssueRequest) -> Result<AccessCode> {
        let session = self.session_account().ok_or(AuthError::NotSignedIn)?;
        if session.role != Role::Admin {
            return Err(AuthError::RoleMismatch { actual: session.role });
        }

        if request.issued_by.is_none() {
            request.issued_by = Some(session.id);
        }
        self.validator().issue(request, &self.config).await
    }
}

impl<P, D, C> Drop for SessionManager<P, D, C>
where
    P: IdentityProvider,
    D: DocumentStore,
    C: Clock,
{
    fn drop(&mut self) {
        let listener = self.listener.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = listener.take() {
            handle.abort();
        }
    }
}

async fn listen<P, D, C>(manager: Weak<SessionManager<P, D, C>>, mut changes: watch::Receiver<Option<Principal>>)
where
    P: IdentityProvider + 'static,
    D: DocumentStore + 'static,
    C: Clock + 'static,
{
    loop {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        manager.on_auth_state_changed().await;
        drop(manager);

        if changes.changed().await.is_err() {
            tracing::debug!("Auth-state channel closed");
            break;
        }
    }
}

/// Profile fields to fill from the principal where the account has none.
fn backfill(account: &Account, principal: &Principal) -> AccountPatch {
    let missing = |value: &Option<String>| value.as_deref().is_none_or(|v| v.trim().is_empty());

    AccountPatch {
        display_name: principal
            .display_name
            .clone()
            .filter(|_| missing(&account.profile.display_name)),
        photo_url: principal
            .photo_url
            .clone()
            .filter(|_| missing(&account.profile.photo_url)),
        ..AccountPatch::default()
    }
}
