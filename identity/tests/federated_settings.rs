//! Link, enable and disable federated sign-in.

use daycare_identity::mocks::PopupResult;
use daycare_identity::providers::{DocumentStore, Profile};
use daycare_identity::{
    AccountId, AuthError, Clock, DisableOutcome, IdentityProvider, Role, SessionPhase, SignInMethod,
};
use daycare_identity_testing::{TestHarness, fixtures};

/// Signed-in parent with both a password and a Google credential.
async fn dual_credential_session(harness: &TestHarness) -> daycare_identity::Account {
    harness
        .register_verified_parent("p@x.com", "secret1")
        .await
        .unwrap();
    harness.manager.sign_in("p@x.com", "secret1").await.unwrap();

    harness.provider.queue_popup(PopupResult::account("p@x.com"));
    harness.manager.link_federated().await.unwrap()
}

/// Signed-in admin.
async fn admin_session(harness: &TestHarness) -> daycare_identity::Account {
    harness
        .manager
        .bootstrap_admin("boss@x.com", "secret1", Profile::default())
        .await
        .unwrap();
    harness.provider.verify_email("boss@x.com");
    harness.manager.sign_in("boss@x.com", "secret1").await.unwrap()
}

#[tokio::test]
async fn test_link_marks_account_linked() {
    let harness = TestHarness::new();
    let account = dual_credential_session(&harness).await;

    assert!(account.google_linked);
    assert!(account.has_method(SignInMethod::Federated));
    assert!(harness.manager.has_federated_linked(None).await.unwrap());
    assert_eq!(harness.manager.snapshot().user, Some(account));
}

#[tokio::test]
async fn test_disable_with_both_credentials_keeps_session() {
    let harness = TestHarness::new();
    let account = dual_credential_session(&harness).await;

    let outcome = harness.manager.disable_federated(None).await.unwrap();

    assert_eq!(outcome, DisableOutcome::Unlinked);
    let stored = harness.store.get_account(&account.id).await.unwrap().unwrap();
    assert!(stored.google_sign_in_disabled);
    assert!(!stored.google_linked);
    assert!(!stored.has_method(SignInMethod::Federated));
    assert!(stored.has_method(SignInMethod::Password));

    let snapshot = harness.manager.snapshot();
    assert_eq!(snapshot.phase, SessionPhase::Active { role: Role::Parent });
    assert_eq!(snapshot.user, Some(stored));
    assert!(!harness.provider.current_principal().unwrap().has_federated());
    assert!(!harness.manager.has_federated_linked(None).await.unwrap());
}

#[tokio::test]
async fn test_disabled_flag_survives_sign_ins_until_enabled() {
    let harness = TestHarness::new();
    let account = dual_credential_session(&harness).await;
    harness.manager.disable_federated(None).await.unwrap();
    harness.manager.sign_out().await.unwrap();

    // Password sign-in does not reset the flag.
    harness.manager.sign_in("p@x.com", "secret1").await.unwrap();
    harness.manager.sign_out().await.unwrap();

    // Federated sign-in is refused and does not reset it either.
    harness.provider.queue_popup(PopupResult::account("p@x.com"));
    assert_eq!(
        harness.manager.sign_in_with_google(Role::Parent).await.unwrap_err(),
        AuthError::FederatedSignInDisabled
    );
    assert!(
        harness
            .store
            .get_account(&account.id)
            .await
            .unwrap()
            .unwrap()
            .google_sign_in_disabled
    );

    // Only an explicit enable from the account's own session clears it.
    harness.manager.sign_in("p@x.com", "secret1").await.unwrap();
    let enabled = harness.manager.enable_federated(Some(&account.id)).await.unwrap();
    assert!(!enabled.google_sign_in_disabled);
    assert!(enabled.google_linked);
    assert!(enabled.has_method(SignInMethod::Federated));
    harness.manager.sign_out().await.unwrap();

    harness.provider.queue_popup(PopupResult::account("p@x.com"));
    harness.manager.sign_in_with_google(Role::Parent).await.unwrap();
}

#[tokio::test]
async fn test_disable_with_only_federated_credential_signs_out() {
    let harness = TestHarness::new();
    let account = fixtures::federated_only_account("acct-g", "g@x.com", Role::Parent, harness.clock.now());
    harness.store.put_account(account.clone());
    harness.provider.queue_popup(PopupResult::account("g@x.com"));
    harness.manager.sign_in_with_google(Role::Parent).await.unwrap();

    let outcome = harness.manager.disable_federated(None).await.unwrap();

    assert_eq!(outcome, DisableOutcome::SignedOut);
    assert_eq!(harness.manager.snapshot().phase, SessionPhase::SignedOut);
    assert!(harness.provider.current_principal().is_none());

    // The flag was persisted before signing out.
    let stored = harness.store.get_account(&account.id).await.unwrap().unwrap();
    assert!(stored.google_sign_in_disabled);
}

#[tokio::test]
async fn test_unlink_failure_is_reported_not_raised() {
    let harness = TestHarness::new();
    let account = dual_credential_session(&harness).await;
    harness.provider.set_fail_unlink(true);

    let outcome = harness.manager.disable_federated(None).await.unwrap();

    assert_eq!(outcome, DisableOutcome::UnlinkDeferred);
    assert!(
        harness
            .store
            .get_account(&account.id)
            .await
            .unwrap()
            .unwrap()
            .google_sign_in_disabled
    );
    assert!(harness.provider.current_principal().unwrap().has_federated());
    assert!(!harness.manager.snapshot().phase.is_signed_out());
}

#[tokio::test]
async fn test_admin_disable_for_another_account_only_sets_flag() {
    let harness = TestHarness::new();
    let other = fixtures::dual_credential_account("acct-2", "q@x.com", Role::Parent, harness.clock.now());
    harness.store.put_account(other.clone());
    let admin = admin_session(&harness).await;

    let outcome = harness.manager.disable_federated(Some(&other.id)).await.unwrap();

    assert_eq!(outcome, DisableOutcome::FlagOnly);
    assert!(!harness.manager.has_federated_linked(Some(&other.id)).await.unwrap());
    assert_eq!(harness.manager.snapshot().user, Some(admin));

    harness.manager.enable_federated(Some(&other.id)).await.unwrap();
    assert!(harness.manager.has_federated_linked(Some(&other.id)).await.unwrap());
}

#[tokio::test]
async fn test_parent_cannot_change_another_account() {
    let harness = TestHarness::new();
    dual_credential_session(&harness).await;
    let other = fixtures::dual_credential_account("acct-2", "q@x.com", Role::Parent, harness.clock.now());
    harness.store.put_account(other.clone());

    let refused = Err(AuthError::RoleMismatch { actual: Role::Parent });
    assert_eq!(harness.manager.disable_federated(Some(&other.id)).await.map(|_| ()), refused);
    assert_eq!(harness.manager.enable_federated(Some(&other.id)).await.map(|_| ()), refused);
    assert_eq!(harness.manager.has_federated_linked(Some(&other.id)).await.map(|_| ()), refused);

    let stored = harness.store.get_account(&other.id).await.unwrap().unwrap();
    assert_eq!(stored, other);
    // The parent's own session is untouched.
    assert!(harness.manager.has_federated_linked(None).await.unwrap());
}

#[tokio::test]
async fn test_signed_out_caller_cannot_change_settings() {
    let harness = TestHarness::new();
    let account = fixtures::dual_credential_account("acct-2", "q@x.com", Role::Parent, harness.clock.now());
    harness.store.put_account(account.clone());

    assert_eq!(
        harness.manager.disable_federated(Some(&account.id)).await,
        Err(AuthError::NotSignedIn)
    );
    assert_eq!(
        harness.manager.enable_federated(Some(&account.id)).await,
        Err(AuthError::NotSignedIn)
    );
    assert_eq!(
        harness.manager.has_federated_linked(Some(&account.id)).await,
        Err(AuthError::NotSignedIn)
    );
    assert!(!harness.store.get_account(&account.id).await.unwrap().unwrap().google_sign_in_disabled);
}

#[tokio::test]
async fn test_link_refused_when_disabled() {
    let harness = TestHarness::new();
    dual_credential_session(&harness).await;
    harness.manager.disable_federated(None).await.unwrap();

    harness.provider.queue_popup(PopupResult::account("p@x.com"));
    assert_eq!(
        harness.manager.link_federated().await.unwrap_err(),
        AuthError::FederatedSignInDisabled
    );
}

#[tokio::test]
async fn test_link_with_identity_of_other_principal_fails() {
    let harness = TestHarness::new();
    harness.register_verified_parent("p@x.com", "secret1").await.unwrap();
    harness.provider.seed_password_principal("q@x.com", "secret1", true);
    harness.manager.sign_in("p@x.com", "secret1").await.unwrap();

    harness.provider.queue_popup(PopupResult::account("q@x.com"));
    assert_eq!(
        harness.manager.link_federated().await.unwrap_err(),
        AuthError::FederatedCredentialInUse
    );
}

#[tokio::test]
async fn test_missing_account_reports_not_linked() {
    let harness = TestHarness::new();
    admin_session(&harness).await;
    let ghost = AccountId::new("ghost");

    assert!(!harness.manager.has_federated_linked(Some(&ghost)).await.unwrap());
    assert_eq!(
        harness.manager.enable_federated(Some(&ghost)).await,
        Err(AuthError::AccountNotFound)
    );
}
