//! Property tests for registration, access codes and the session reducer.

use chrono::{Duration, TimeZone, Utc};
use daycare_identity::mocks::{MockDocumentStore, PopupResult};
use daycare_identity::providers::{Account, DocumentStore};
use daycare_identity::reducer::{SessionAction, SessionReducer};
use daycare_identity::{
    AccessCodeValidator, AccountId, AuthError, Clock, IdentityProvider, Rejection, RegistrationRequest, Role,
    SessionPhase, SessionSnapshot,
};
use daycare_identity_testing::{TestHarness, fixtures, test_clock};
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn role() -> impl Strategy<Value = Role> + Clone {
    prop_oneof![Just(Role::Admin), Just(Role::Parent)]
}

fn action() -> impl Strategy<Value = SessionAction> {
    let account = (role(), "[a-c]").prop_map(|(role, id)| {
        let now = Utc.timestamp_opt(1_735_689_600, 0).unwrap();
        Account::new(AccountId::new(id.clone()), format!("{id}@x.com"), role, now)
    });

    prop_oneof![
        Just(SessionAction::TransitionStarted),
        Just(SessionAction::TransitionFinished),
        Just(SessionAction::SignedOut),
        Just(SessionAction::PrincipalLost),
        account.clone().prop_map(SessionAction::Established),
        account.prop_map(SessionAction::AccountUpdated),
        "[a-c]@x\\.com".prop_map(|email| SessionAction::VerificationRequired { email }),
        role().prop_map(|actual| SessionAction::Rejected(Rejection::RoleMismatch { actual })),
        Just(SessionAction::Rejected(Rejection::FederatedSignInDisabled)),
        Just(SessionAction::Rejected(Rejection::UnauthorizedFederatedBypass)),
    ]
}

proptest! {
    #[test]
    fn prop_admin_self_registration_always_fails(
        local in "[a-z]{1,8}",
        password in ".{0,12}",
        code in "[A-Z0-9]{0,8}",
    ) {
        let harness = TestHarness::new();
        let result = runtime().block_on(async {
            harness.seed_access_code("OPEN01", 1).await.unwrap();
            harness
                .manager
                .register(RegistrationRequest {
                    role: Role::Admin,
                    ..RegistrationRequest::parent(format!("{local}@x.com"), password, code)
                })
                .await
        });

        prop_assert_eq!(result.unwrap_err(), AuthError::AdminSelfRegistration);
        prop_assert_eq!(harness.provider.principal_count(), 0);
        prop_assert_eq!(harness.store.account_count(), 0);
        let untouched = runtime()
            .block_on(harness.store.get_access_code("OPEN01"))
            .unwrap()
            .unwrap();
        prop_assert_eq!(untouched.uses_left, 1);
    }

    #[test]
    fn prop_federated_sign_in_never_creates_accounts(
        local in "[a-z]{1,8}",
        expected in role(),
        known_password_principal in any::<bool>(),
    ) {
        let harness = TestHarness::new();
        let email = format!("{local}@x.com");
        if known_password_principal {
            harness.provider.seed_password_principal(&email, "secret1", true);
        }
        harness.provider.queue_popup(PopupResult::account(&email));

        let result = runtime().block_on(harness.manager.sign_in_with_google(expected));

        prop_assert_eq!(result.unwrap_err(), AuthError::UnauthorizedFederatedBypass);
        prop_assert_eq!(harness.store.account_count(), 0);
        prop_assert!(harness.provider.current_principal().is_none());
        prop_assert!(harness.manager.snapshot().user.is_none());
        prop_assert_eq!(harness.provider.principal_count(), usize::from(known_password_principal));
    }

    #[test]
    fn prop_consumes_never_go_below_zero(uses in 0u32..5, attempts in 0usize..10) {
        let store = MockDocumentStore::new();
        let clock = test_clock();

        let consumed = runtime().block_on(async {
            store
                .create_access_code(&fixtures::access_code("COUNT1", uses, clock.now()))
                .await
                .unwrap();
            let validator = AccessCodeValidator::new(&store, &clock);

            let mut consumed = 0usize;
            for i in 0..attempts {
                let account = AccountId::new(format!("acct-{i}"));
                if validator.consume("COUNT1", &account, "p@x.com").await.is_ok() {
                    consumed += 1;
                }
            }
            consumed
        });

        let expected = attempts.min(uses as usize);
        prop_assert_eq!(consumed, expected);

        let record = runtime().block_on(store.get_access_code("COUNT1")).unwrap().unwrap();
        prop_assert_eq!(record.uses_left as usize, uses as usize - expected);
        prop_assert_eq!(record.used_by.len(), expected);
    }

    #[test]
    fn prop_validation_matches_uses_and_expiry(uses in 0u32..3, expires_in in -120i64..120) {
        let store = MockDocumentStore::new();
        let clock = test_clock();
        let mut record = fixtures::access_code("CHECK1", uses, clock.now());
        record.expires_at = clock.now() + Duration::seconds(expires_in);

        let validation = runtime().block_on(async {
            store.create_access_code(&record).await.unwrap();
            AccessCodeValidator::new(&store, &clock).validate("check1").await.unwrap()
        });

        prop_assert_eq!(validation.valid, uses > 0 && expires_in > 0);
        prop_assert_eq!(validation.valid, validation.reason.is_none());
    }

    #[test]
    fn prop_reducer_populates_user_only_when_active(
        actions in proptest::collection::vec(action(), 0..32),
    ) {
        let reducer = SessionReducer::new();
        let mut snapshot = SessionSnapshot::default();

        for action in actions {
            reducer.reduce(&mut snapshot, action);

            let active = matches!(snapshot.phase, SessionPhase::Active { .. });
            prop_assert_eq!(snapshot.user.is_some(), active);
            prop_assert_eq!(snapshot.role, snapshot.phase.role());
            if let Some(user) = &snapshot.user {
                prop_assert_eq!(Some(user.role), snapshot.role);
            }
        }
    }
}
