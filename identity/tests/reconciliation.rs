//! Orphan reconciliation through sign-in and session restore.

use daycare_identity::mocks::PopupResult;
use daycare_identity::providers::{DocumentStore, FederatedProvider};
use daycare_identity::{
    AuthError, AuthOutcome, Credentials, IdentityConfig, IdentityProvider, Role, SessionPhase,
};
use daycare_identity_testing::{TestHarness, init_tracing};

#[tokio::test]
async fn test_password_sign_in_restores_lost_account() {
    init_tracing();
    let harness = TestHarness::new();
    let child = harness.seed_orphan("p@x.com", "Pat", Some("ABC123")).await.unwrap();
    harness.provider.seed_password_principal("p@x.com", "secret1", true);

    let account = harness.manager.sign_in("p@x.com", "secret1").await.unwrap();

    assert_eq!(account.role, Role::Parent);
    assert!(account.restored_account);
    assert_eq!(account.access_code.as_deref(), Some("ABC123"));
    assert_eq!(account.profile.first_name.as_deref(), Some("Pat"));

    let linked = harness.store.children_of(&account.id).await.unwrap();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].id, child.id);
    assert!(linked[0].parent_registered);
    assert_eq!(linked[0].parent_id.as_ref(), Some(&account.id));
    assert_eq!(harness.manager.snapshot().phase, SessionPhase::Active { role: Role::Parent });
}

#[tokio::test]
async fn test_reconciling_twice_links_once() {
    let harness = TestHarness::new();
    harness.seed_orphan("p@x.com", "Pat", None).await.unwrap();
    harness.seed_orphan("p@x.com", "Pat", None).await.unwrap();
    harness.provider.seed_password_principal("p@x.com", "secret1", true);

    harness.manager.sign_in("p@x.com", "secret1").await.unwrap();
    harness.manager.sign_out().await.unwrap();
    harness.manager.sign_in("p@x.com", "secret1").await.unwrap();

    assert_eq!(harness.store.account_count(), 1);
    assert_eq!(harness.store.link_batches(), 1);
    assert!(harness.store.orphaned_children("p@x.com").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_no_orphans_creates_minimal_account() {
    let harness = TestHarness::new();
    harness.provider.seed_password_principal("p@x.com", "secret1", true);

    let account = harness.manager.sign_in("p@x.com", "secret1").await.unwrap();

    assert!(!account.restored_account);
    assert_eq!(account.role, Role::Parent);
    assert_eq!(harness.store.link_batches(), 0);
}

#[tokio::test]
async fn test_orphan_linking_can_be_switched_off() {
    let harness = TestHarness::with_config(IdentityConfig::default().with_orphan_reconciliation(false));
    harness.seed_orphan("p@x.com", "Pat", None).await.unwrap();
    harness.provider.seed_password_principal("p@x.com", "secret1", true);

    let account = harness.manager.sign_in("p@x.com", "secret1").await.unwrap();

    assert!(!account.restored_account);
    assert_eq!(harness.store.orphaned_children("p@x.com").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unverified_principal_is_not_reconciled() {
    let harness = TestHarness::new();
    harness.seed_orphan("p@x.com", "Pat", None).await.unwrap();
    harness.provider.seed_password_principal("p@x.com", "secret1", false);

    let outcome = harness
        .manager
        .authenticate(Credentials::password("p@x.com", "secret1"))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        AuthOutcome::VerificationRequired {
            email: "p@x.com".to_string()
        }
    );
    assert_eq!(harness.store.account_count(), 0);
    assert!(harness.provider.current_principal().is_none());
}

#[tokio::test]
async fn test_listener_restores_persisted_session() {
    let harness = TestHarness::new().started();
    harness.wait_for_session(|s| !s.loading).await.unwrap();

    harness.seed_orphan("p@x.com", "Pat", None).await.unwrap();
    let principal = harness.provider.seed_password_principal("p@x.com", "secret1", true);
    harness.provider.restore_session(&principal.uid);

    let snapshot = harness
        .wait_for_session(|s| s.phase == SessionPhase::Active { role: Role::Parent })
        .await
        .unwrap();

    let account = snapshot.user.unwrap();
    assert_eq!(account.id, principal.uid);
    assert!(account.restored_account);
    assert_eq!(harness.store.link_batches(), 1);
}

#[tokio::test]
async fn test_listener_removes_federated_bypass() {
    let harness = TestHarness::new().started();
    harness.wait_for_session(|s| !s.loading).await.unwrap();

    // A federated principal left over without an account.
    harness.provider.queue_popup(PopupResult::account("stranger@x.com"));
    let principal = harness
        .provider
        .sign_in_with_popup(FederatedProvider::Google)
        .await
        .unwrap()
        .principal;

    harness
        .wait_for_session(|s| matches!(s.phase, SessionPhase::Blocked { .. }))
        .await
        .unwrap();

    assert!(harness.provider.principal_by_email(&principal.email).is_none());
    assert_eq!(harness.store.account_count(), 0);
}

#[tokio::test]
async fn test_listener_ends_session_when_principal_disappears() {
    let harness = TestHarness::new().started();
    harness.register_verified_parent("p@x.com", "secret1").await.unwrap();
    harness.manager.sign_in("p@x.com", "secret1").await.unwrap();

    harness.provider.sign_out().await.unwrap();

    let snapshot = harness
        .wait_for_session(|s| s.phase == SessionPhase::SignedOut)
        .await
        .unwrap();
    assert!(snapshot.user.is_none());
}

#[tokio::test]
async fn test_listener_stops_after_shutdown() {
    let harness = TestHarness::new().started();
    harness.wait_for_session(|s| !s.loading).await.unwrap();
    harness.manager.shutdown();

    let principal = harness.provider.seed_password_principal("p@x.com", "secret1", true);
    harness.provider.restore_session(&principal.uid);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert_eq!(harness.manager.snapshot().phase, SessionPhase::SignedOut);
    assert_eq!(harness.store.account_count(), 0);
}

#[tokio::test]
async fn test_store_outage_signs_principal_out() {
    let harness = TestHarness::new();
    harness.seed_orphan("p@x.com", "Pat", None).await.unwrap();
    harness.provider.seed_password_principal("p@x.com", "secret1", true);
    harness.store.set_unavailable(true);

    let error = harness.manager.sign_in("p@x.com", "secret1").await.unwrap_err();

    assert!(matches!(error, AuthError::Store(_)));
    assert!(harness.provider.current_principal().is_none());
    let snapshot = harness.manager.snapshot();
    assert!(!snapshot.loading);
    assert!(snapshot.user.is_none());

    // Nothing was half-written; the next attempt restores normally.
    harness.store.set_unavailable(false);
    harness.manager.sign_in("p@x.com", "secret1").await.unwrap();
    assert_eq!(harness.store.accounts().len(), 1);
    assert!(harness.store.children().iter().all(|child| child.parent_registered));
}
