//! Current-user lifecycle as seen by subscribers.
//!
//! Covers:
//! - The three notifications of a login (initial, identity, profile)
//! - Session restore at startup
//! - Logout clearing every field
//! - Profile and avatar edits reaching the store

use plaza_backend::Upload;
use plaza_core::tables::AVATARS_BUCKET;
use plaza_core::{CurrentUser, ProfileDraft, ProfileUpdate, Readiness, UserId};
use plaza_test_utils::{seed_user, setup_plaza, setup_plaza_signed_in, Recorder, TEST_PASSWORD};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn login_notifies_blank_then_identity_then_profile() {
    let (backend, plaza) = setup_plaza();
    let id = seed_user(&backend, "ana@example.com", "Ana");
    plaza.ready().await.unwrap();

    let recorder = Recorder::new();
    let _subscription = plaza.auth().subscribe(recorder.callback());

    let signed_in = plaza.auth().login("ana@example.com", TEST_PASSWORD).await.unwrap();
    assert_eq!(UserId(signed_in.user.id), id);
    let profile = signed_in.profile.await.unwrap();
    assert_eq!(profile.display_name.as_deref(), Some("Ana"));

    let calls = recorder.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0], CurrentUser::default());
    assert_eq!(
        calls[1],
        CurrentUser {
            id: Some(id),
            email: Some("ana@example.com".into()),
            ..CurrentUser::default()
        }
    );
    assert_eq!(
        calls[2],
        CurrentUser {
            id: Some(id),
            email: Some("ana@example.com".into()),
            display_name: Some("Ana".into()),
            ..CurrentUser::default()
        }
    );
}

#[tokio::test]
async fn wrong_password_leaves_store_untouched() {
    let (backend, plaza) = setup_plaza();
    seed_user(&backend, "ana@example.com", "Ana");
    plaza.ready().await.unwrap();

    let err = plaza.auth().login("ana@example.com", "nope-nope").await.unwrap_err();
    assert_eq!(err.backend_message().as_deref(), Some("Invalid login credentials"));
    assert_eq!(plaza.users().current(), None);
}

#[tokio::test]
async fn stored_session_is_restored_with_profile() {
    let (_backend, plaza, id) = setup_plaza_signed_in("bo@example.com", "Bo");

    let user = plaza.ready().await.unwrap().expect("restored user");
    assert_eq!(user.id, Some(id));
    assert_eq!(user.display_name.as_deref(), Some("Bo"));
    assert!(matches!(plaza.auth().readiness(), Readiness::Ready(Some(_))));

    // a subscriber joining after the restore sees the full record at once
    let recorder = Recorder::new();
    let _subscription = plaza.auth().subscribe(recorder.callback());
    assert_eq!(recorder.calls(), vec![user]);
}

#[tokio::test]
async fn logout_clears_every_field() {
    let (_backend, plaza, _) = setup_plaza_signed_in("bo@example.com", "Bo");
    plaza.ready().await.unwrap();
    let recorder = Recorder::new();
    let _subscription = plaza.auth().subscribe(recorder.callback());

    plaza.auth().logout().await;

    assert_eq!(recorder.last(), Some(CurrentUser::default()));
    assert_eq!(recorder.len(), 2);
    assert_eq!(plaza.users().current(), None);
}

#[tokio::test]
async fn register_merges_drafted_profile() {
    let (backend, plaza) = setup_plaza();
    plaza.ready().await.unwrap();

    let user = plaza
        .auth()
        .register(
            "cy@example.com",
            "secret1",
            ProfileDraft::new().with_display_name("Cy").with_career("Physics"),
        )
        .await
        .unwrap();

    let current = plaza.users().current().unwrap();
    assert_eq!(current.id, Some(UserId(user.id)));
    assert_eq!(current.display_name.as_deref(), Some("Cy"));
    assert_eq!(current.career.as_deref(), Some("Physics"));
    assert_eq!(current.bio, None);

    let rows = backend.rows(plaza_core::tables::USER_PROFILES);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["display_name"], "Cy");
}

#[tokio::test]
async fn profile_edits_reach_subscribers() {
    let (backend, plaza, id) = setup_plaza_signed_in("bo@example.com", "Bo");
    plaza.ready().await.unwrap();
    let recorder = Recorder::new();
    let _subscription = plaza.auth().subscribe(recorder.callback());

    plaza
        .auth()
        .update_profile(&ProfileUpdate::new().with_bio("hello"))
        .await
        .unwrap();
    let url = plaza
        .auth()
        .update_avatar(&Upload::new("me.png", vec![1, 2, 3]))
        .await
        .unwrap();

    let last = recorder.last().unwrap();
    assert_eq!(last.bio.as_deref(), Some("hello"));
    assert_eq!(last.display_name.as_deref(), Some("Bo"));
    assert_eq!(last.avatar_url.as_deref(), Some(url.as_str()));

    let profile = plaza.profiles().by_id(id).await.unwrap();
    assert_eq!(profile.bio.as_deref(), Some("hello"));
    assert_eq!(profile.avatar_url, Some(url));

    let paths = backend.object_paths(AVATARS_BUCKET);
    assert_eq!(paths.len(), 1);
    assert!(paths[0].starts_with(&format!("{id}_")));
}

#[tokio::test]
async fn signed_out_edits_are_rejected() {
    let (_backend, plaza) = setup_plaza();
    plaza.ready().await.unwrap();

    let err = plaza
        .auth()
        .update_profile(&ProfileUpdate::new().with_bio("x"))
        .await
        .unwrap_err();
    assert!(err.is_not_authenticated());
    assert!(plaza.auth().change_password("another1").await.unwrap_err().is_not_authenticated());
}

#[tokio::test]
async fn changed_password_is_required_next_login() {
    let (_backend, plaza, _) = setup_plaza_signed_in("bo@example.com", "Bo");
    plaza.ready().await.unwrap();

    plaza.auth().change_password("brand-new-pw").await.unwrap();
    plaza.auth().logout().await;

    assert!(plaza.auth().login("bo@example.com", TEST_PASSWORD).await.is_err());
    let signed_in = plaza.auth().login("bo@example.com", "brand-new-pw").await.unwrap();
    signed_in.profile.await.unwrap();
    assert_eq!(
        plaza.users().current().unwrap().display_name.as_deref(),
        Some("Bo")
    );
}
