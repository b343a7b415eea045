use super::*;
use std::time::Duration;

use crate::error::{ErrorCode, RemoteError};
use crate::remote::test_helpers::{MockRemote, Op, session_for};
use crate::types::AuthEvent;

/// Wait until the store's state satisfies `pred`.
async fn wait_for(store: &SessionStore, pred: impl Fn(&AuthState) -> bool) {
    let mut rx = store.watch();
    tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|s| pred(s)))
        .await
        .expect("state change within timeout")
        .expect("state channel open");
}

#[tokio::test]
async fn starts_loading_and_signed_out() {
    let store = SessionStore::new(Arc::new(MockRemote::new()));
    let state = store.state();
    assert!(state.loading);
    assert!(!state.is_authenticated());
    assert!(store.user().is_none());
}

#[tokio::test]
async fn initialize_restores_persisted_session() {
    let (remote, me) = MockRemote::signed_in("ada@example.com");
    let store = SessionStore::new(Arc::new(remote));

    store.initialize().await.unwrap();

    let state = store.state();
    assert!(!state.loading);
    assert!(state.is_authenticated());
    assert_eq!(state.user.map(|u| u.id), Some(me.id));
    assert!(state.session.is_some());
}

#[tokio::test]
async fn initialize_without_session_clears_loading() {
    let store = SessionStore::new(Arc::new(MockRemote::new()));
    store.initialize().await.unwrap();
    let state = store.state();
    assert!(!state.loading);
    assert!(!state.is_authenticated());
}

#[tokio::test]
async fn initialize_failure_leaves_signed_out() {
    let remote = Arc::new(MockRemote::new());
    remote.fail_next(Op::GetSession, RemoteError::new("network unreachable"));
    let store = SessionStore::new(remote);

    let err = store.initialize().await.unwrap_err();
    assert_eq!(err.to_string(), "network unreachable");
    assert!(err.retryable());
    let state = store.state();
    assert!(!state.loading);
    assert!(!state.is_authenticated());
}

#[tokio::test]
async fn concurrent_initialize_queries_once() {
    let (remote, _) = MockRemote::signed_in("ada@example.com");
    remote.delay_session_lookups(Duration::from_millis(20));
    let remote = Arc::new(remote);
    let store = SessionStore::new(Arc::clone(&remote) as Arc<dyn RemoteService>);

    let (a, b) = tokio::join!(store.initialize(), store.initialize());
    a.unwrap();
    b.unwrap();

    assert_eq!(remote.calls(Op::GetSession), 1);
}

#[tokio::test]
async fn sign_in_sets_user_before_returning() {
    let remote = Arc::new(MockRemote::new());
    let me = remote.register("ada@example.com", "correct horse", Some("Ada"));
    let store = SessionStore::new(Arc::clone(&remote) as Arc<dyn RemoteService>);

    let auth = store.sign_in("ada@example.com", "correct horse").await.unwrap();

    assert_eq!(auth.user.map(|u| u.id), Some(me.id));
    assert!(store.is_authenticated());
    assert_eq!(store.user().map(|u| u.id), Some(me.id));
}

#[tokio::test]
async fn sign_in_with_bad_password_keeps_state() {
    let remote = Arc::new(MockRemote::new());
    remote.register("ada@example.com", "correct horse", None);
    let store = SessionStore::new(Arc::clone(&remote) as Arc<dyn RemoteService>);

    let err = store.sign_in("ada@example.com", "wrong").await.unwrap_err();

    assert_eq!(err.to_string(), "Invalid login credentials");
    assert!(!store.is_authenticated());
}

#[tokio::test]
async fn sign_up_creates_account_and_signs_in() {
    let remote = Arc::new(MockRemote::new());
    let store = SessionStore::new(Arc::clone(&remote) as Arc<dyn RemoteService>);

    let auth = store.sign_up("grace@example.com", "hopper123").await.unwrap();

    assert!(auth.session.is_some());
    assert!(store.is_authenticated());
    assert_eq!(remote.rows("profiles").len(), 1);
}

#[tokio::test]
async fn sign_up_duplicate_email_fails() {
    let remote = Arc::new(MockRemote::new());
    remote.register("grace@example.com", "hopper123", None);
    let store = SessionStore::new(Arc::clone(&remote) as Arc<dyn RemoteService>);

    let err = store.sign_up("grace@example.com", "other").await.unwrap_err();
    assert_eq!(err.to_string(), "User already registered");
    assert!(!store.is_authenticated());
}

#[tokio::test]
async fn sign_out_clears_state() {
    let (remote, _) = MockRemote::signed_in("ada@example.com");
    let store = SessionStore::new(Arc::new(remote));
    store.initialize().await.unwrap();
    assert!(store.is_authenticated());

    store.sign_out().await.unwrap();

    let state = store.state();
    assert!(state.user.is_none());
    assert!(state.session.is_none());
}

#[tokio::test]
async fn failed_sign_out_keeps_session() {
    let (remote, _) = MockRemote::signed_in("ada@example.com");
    let remote = Arc::new(remote);
    let store = SessionStore::new(Arc::clone(&remote) as Arc<dyn RemoteService>);
    store.initialize().await.unwrap();
    remote.fail_next(Op::SignOut, RemoteError::new("offline"));

    assert!(store.sign_out().await.is_err());
    assert!(store.is_authenticated());
}

#[tokio::test]
async fn pushed_sign_in_is_applied() {
    let remote = Arc::new(MockRemote::new());
    let store = SessionStore::new(Arc::clone(&remote) as Arc<dyn RemoteService>);
    store.initialize().await.unwrap();

    let me = remote.register("ada@example.com", "pw", None);
    remote.emit(AuthChange { event: AuthEvent::SignedIn, session: Some(session_for(&me)) });

    wait_for(&store, AuthState::is_authenticated).await;
    assert_eq!(store.user().map(|u| u.id), Some(me.id));
}

#[tokio::test]
async fn pushed_sign_out_is_applied() {
    let (remote, _) = MockRemote::signed_in("ada@example.com");
    let remote = Arc::new(remote);
    let store = SessionStore::new(Arc::clone(&remote) as Arc<dyn RemoteService>);
    store.initialize().await.unwrap();
    assert!(store.is_authenticated());

    remote.emit(AuthChange { event: AuthEvent::SignedOut, session: None });

    wait_for(&store, |s| !s.is_authenticated()).await;
    assert!(store.state().session.is_none());
}

#[tokio::test]
async fn pushed_refresh_replaces_session() {
    let (remote, me) = MockRemote::signed_in("ada@example.com");
    let remote = Arc::new(remote);
    let store = SessionStore::new(Arc::clone(&remote) as Arc<dyn RemoteService>);
    store.initialize().await.unwrap();

    let mut fresh = session_for(&me);
    fresh.access_token = "rotated".into();
    remote.emit(AuthChange { event: AuthEvent::TokenRefreshed, session: Some(fresh) });

    wait_for(&store, |s| s.session.as_ref().is_some_and(|s| s.access_token == "rotated")).await;
    assert_eq!(store.user().map(|u| u.id), Some(me.id));
}

#[tokio::test]
async fn closed_store_ignores_pushed_changes() {
    let remote = Arc::new(MockRemote::new());
    let store = SessionStore::new(Arc::clone(&remote) as Arc<dyn RemoteService>);
    store.initialize().await.unwrap();
    store.close();
    tokio::task::yield_now().await;

    let me = remote.register("ada@example.com", "pw", None);
    remote.emit(AuthChange { event: AuthEvent::SignedIn, session: Some(session_for(&me)) });
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(!store.is_authenticated());
}

#[tokio::test]
async fn quick_sign_in_then_out_does_not_replay_sign_in() {
    let remote = Arc::new(MockRemote::new());
    remote.register("ada@example.com", "pw", None);
    let store = SessionStore::new(Arc::clone(&remote) as Arc<dyn RemoteService>);
    store.initialize().await.unwrap();

    store.sign_in("ada@example.com", "pw").await.unwrap();
    store.sign_out().await.unwrap();
    let mut rx = store.watch();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Both queued changes were already applied; the listener must not flip state again.
    assert!(!rx.has_changed().unwrap());
    assert!(!store.is_authenticated());
}

#[tokio::test]
async fn pushed_change_after_own_sign_in_is_applied() {
    let remote = Arc::new(MockRemote::new());
    let me = remote.register("ada@example.com", "pw", None);
    let store = SessionStore::new(Arc::clone(&remote) as Arc<dyn RemoteService>);
    store.initialize().await.unwrap();

    store.sign_in("ada@example.com", "pw").await.unwrap();
    let mut fresh = session_for(&me);
    fresh.access_token = "rotated".into();
    remote.emit(AuthChange { event: AuthEvent::TokenRefreshed, session: Some(fresh) });

    wait_for(&store, |s| s.session.as_ref().is_some_and(|s| s.access_token == "rotated")).await;
    assert!(store.is_authenticated());
}

#[tokio::test]
async fn sign_in_before_initialize_is_not_replayed() {
    let remote = Arc::new(MockRemote::new());
    remote.register("ada@example.com", "pw", None);
    let store = SessionStore::new(Arc::clone(&remote) as Arc<dyn RemoteService>);

    store.sign_in("ada@example.com", "pw").await.unwrap();
    store.sign_out().await.unwrap();
    store.initialize().await.unwrap();
    let mut rx = store.watch();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(!rx.has_changed().unwrap());
    assert!(!store.is_authenticated());
}
