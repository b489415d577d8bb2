//! # Daycare Identity Testing
//!
//! Testing utilities for the daycare identity subsystem.
//!
//! This crate provides:
//! - A deterministic, advanceable clock
//! - Fixture builders for documents (access codes, child records, accounts)
//! - A [`TestHarness`] wiring a [`SessionManager`] to the in-memory mocks
//!
//! ## Example
//!
//! ```ignore
//! use daycare_identity_testing::TestHarness;
//!
//! #[tokio::test]
//! async fn test_registration() -> anyhow::Result<()> {
//!     let harness = TestHarness::new();
//!     harness.seed_access_code("ABC123", 1).await?;
//!
//!     harness
//!         .manager
//!         .register(RegistrationRequest::parent("a@x.com", "secret1", "ABC123"))
//!         .await?;
//!     Ok(())
//! }
//! ```

use chrono::{DateTime, Duration, Utc};
use daycare_identity::environment::Clock;
use daycare_identity::mocks::{MockDocumentStore, MockIdentityProvider};
use daycare_identity::providers::{AccessCode, Account, ChildRecord};
use daycare_identity::{IdentityConfig, IdentityEnvironment, SessionManager, SessionSnapshot};
use std::sync::Arc;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Duration, Utc};
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Returns the same time until [`advance`](Self::advance) or
    /// [`set`](Self::set) is called. Clones share the same time.
    ///
    /// # Example
    ///
    /// ```
    /// use daycare_identity_testing::mocks::FixedClock;
    /// use daycare_identity::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let before = clock.now();
    /// assert_eq!(clock.now(), before);
    ///
    /// clock.advance(Duration::days(1));
    /// assert_eq!(clock.now(), before + Duration::days(1));
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to a point in time.
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(1_735_689_600))
    }
}

/// Document fixtures.
pub mod fixtures {
    use super::{AccessCode, Account, ChildRecord, DateTime, Duration, Utc};
    use daycare_identity::{AccountId, ChildId, Role, SignInMethod};

    /// Access code valid for a week from `now`.
    #[must_use]
    pub fn access_code(code: &str, uses_left: u32, now: DateTime<Utc>) -> AccessCode {
        AccessCode {
            code: code.to_string(),
            uses_left,
            expires_at: now + Duration::days(7),
            used_by: Vec::new(),
            created_by: None,
            created_at: now,
        }
    }

    /// Child record waiting for its parent.
    #[must_use]
    pub fn orphan_child(parent_email: &str, parent_first_name: &str, access_code: Option<&str>) -> ChildRecord {
        ChildRecord {
            id: ChildId::new(),
            first_name: "Robin".to_string(),
            last_name: "Lee".to_string(),
            parent_email: parent_email.to_string(),
            parent_first_name: Some(parent_first_name.to_string()),
            parent_last_name: Some("Lee".to_string()),
            parent_id: None,
            parent_registered: false,
            access_code: access_code.map(str::to_string),
        }
    }

    /// Account with the given role and only a password credential.
    #[must_use]
    pub fn account(id: &str, email: &str, role: Role, now: DateTime<Utc>) -> Account {
        Account::new(AccountId::new(id), email.to_string(), role, now)
    }

    /// Account with both a password and a linked federated credential.
    #[must_use]
    pub fn dual_credential_account(id: &str, email: &str, role: Role, now: DateTime<Utc>) -> Account {
        let mut account = account(id, email, role, now);
        account.sign_in_methods.insert(SignInMethod::Federated);
        account.google_linked = true;
        account
    }

    /// Account that only ever signed in through Google.
    #[must_use]
    pub fn federated_only_account(id: &str, email: &str, role: Role, now: DateTime<Utc>) -> Account {
        let mut account = dual_credential_account(id, email, role, now);
        account.sign_in_methods.remove(&SignInMethod::Password);
        account
    }
}

/// Manager type used by the harness.
pub type TestManager = SessionManager<MockIdentityProvider, MockDocumentStore, mocks::FixedClock>;

/// Session manager wired to in-memory collaborators.
///
/// The provider, store and clock are clones sharing state with the ones
/// inside the manager, so tests can seed and inspect them directly.
#[derive(Debug, Clone)]
pub struct TestHarness {
    /// The manager under test.
    pub manager: Arc<TestManager>,
    /// Identity provider mock.
    pub provider: MockIdentityProvider,
    /// Document store mock.
    pub store: MockDocumentStore,
    /// Clock shared with the manager.
    pub clock: mocks::FixedClock,
}

impl TestHarness {
    /// Harness with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(IdentityConfig::default())
    }

    /// Harness with custom configuration.
    #[must_use]
    pub fn with_config(config: IdentityConfig) -> Self {
        let provider = MockIdentityProvider::new();
        let store = MockDocumentStore::new();
        let clock = mocks::test_clock();
        let env = IdentityEnvironment::with_clock(provider.clone(), store.clone(), clock.clone());

        Self {
            manager: Arc::new(SessionManager::new(env, config)),
            provider,
            store,
            clock,
        }
    }

    /// Start the auth-state listener. Must run inside a Tokio runtime.
    #[must_use]
    pub fn started(self) -> Self {
        self.manager.start();
        self
    }

    /// Store an access code valid for a week.
    ///
    /// # Errors
    ///
    /// Returns error if the code already exists.
    pub async fn seed_access_code(&self, code: &str, uses_left: u32) -> anyhow::Result<AccessCode> {
        use daycare_identity::DocumentStore;

        let code = fixtures::access_code(code, uses_left, self.clock.now());
        self.store.create_access_code(&code).await?;
        Ok(code)
    }

    /// Store an orphaned child record.
    ///
    /// # Errors
    ///
    /// Returns error if the record id is taken.
    pub async fn seed_orphan(
        &self,
        parent_email: &str,
        parent_first_name: &str,
        access_code: Option<&str>,
    ) -> anyhow::Result<ChildRecord> {
        use daycare_identity::DocumentStore;

        let child = fixtures::orphan_child(parent_email, parent_first_name, access_code);
        self.store.create_child_record(&child).await?;
        Ok(child)
    }

    /// Register a parent with a fresh single-use code and verify the e-mail.
    ///
    /// # Errors
    ///
    /// Returns error if registration fails.
    pub async fn register_verified_parent(&self, email: &str, password: &str) -> anyhow::Result<Account> {
        let code = format!("SEED{}", uuid::Uuid::new_v4().simple()).to_uppercase();
        self.seed_access_code(&code, 1).await?;

        let registration = self
            .manager
            .register(daycare_identity::RegistrationRequest::parent(email, password, code))
            .await?;
        self.provider.verify_email(email);
        Ok(registration.account)
    }

    /// Wait until the session satisfies `predicate` (one second at most).
    ///
    /// # Errors
    ///
    /// Returns error on timeout or if the manager was dropped.
    pub async fn wait_for_session(
        &self,
        predicate: impl FnMut(&SessionSnapshot) -> bool,
    ) -> anyhow::Result<SessionSnapshot> {
        let mut session = self.manager.session();
        let snapshot = tokio::time::timeout(std::time::Duration::from_secs(1), session.wait_for(predicate))
            .await??
            .clone();
        Ok(snapshot)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Install a `tracing` subscriber honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;
    use daycare_identity::SessionPhase;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");

        let shared = clock.clone();
        clock.advance(Duration::hours(1));
        assert_eq!(shared.now(), clock.now());
    }

    #[tokio::test]
    async fn test_harness_start_resolves_loading() {
        let harness = TestHarness::new().started();
        let snapshot = harness.wait_for_session(|s| !s.loading).await.unwrap();
        assert_eq!(snapshot.phase, SessionPhase::SignedOut);
    }
}
