//! Posts, comments and chat over the in-memory backend.
//!
//! These run the full services the way the app does: a signed-in user
//! publishes, other rows arrive through realtime feeds, and stopping a watch
//! leaves its channel.

use plaza_backend::{Backend, Insert, Upload};
use plaza_core::tables::{COMMENTS, GLOBAL_CHAT, POST_IMAGES_BUCKET};
use plaza_core::{ChatMessage, Comment, Post, PostService, SubmitOutcome};
use plaza_test_utils::{eventually, seed_post, seed_user, setup_plaza_signed_in, Recorder};
use pretty_assertions::assert_eq;
use serde_json::json;

#[tokio::test]
async fn post_with_image_then_replace_and_delete() {
    let (backend, plaza, id) = setup_plaza_signed_in("ana@example.com", "Ana");
    plaza.ready().await.unwrap();
    let posts = plaza.posts();

    let url = posts
        .upload_image(&Upload::new("cat.png", vec![0xCA, 0x7]))
        .await
        .unwrap();
    let post = posts.create("look", Some(url.clone())).await.unwrap();
    assert_eq!(post.image_url.as_deref(), Some(url.as_str()));

    let first_path = PostService::storage_path_from_url(&url).unwrap();
    assert!(first_path.starts_with(&format!("{id}/")));
    assert!(first_path.ends_with("_cat.png"));

    let new_url = posts
        .update_with_image(post.id, "look again", Some(&Upload::new("dog.png", vec![1])), false)
        .await
        .unwrap()
        .unwrap();
    let paths = backend.object_paths(POST_IMAGES_BUCKET);
    assert_eq!(paths, vec![PostService::storage_path_from_url(&new_url).unwrap()]);

    let listed = posts.all().await.unwrap();
    assert_eq!(listed[0].content, "look again");
    assert_eq!(listed[0].author.as_ref().unwrap().name(), "Ana");

    posts.delete(post.id).await.unwrap();
    assert!(posts.all().await.unwrap().is_empty());
    assert!(backend.object_paths(POST_IMAGES_BUCKET).is_empty());
}

#[tokio::test]
async fn removing_an_image_clears_the_column() {
    let (backend, plaza, _) = setup_plaza_signed_in("ana@example.com", "Ana");
    plaza.ready().await.unwrap();
    let posts = plaza.posts();

    let url = posts.upload_image(&Upload::new("a.png", vec![1])).await.unwrap();
    let post = posts.create("x", Some(url)).await.unwrap();

    let uploaded = posts.update_with_image(post.id, "x", None, true).await.unwrap();
    assert_eq!(uploaded, None);
    assert_eq!(posts.all().await.unwrap()[0].image_url, None);
    assert!(backend.object_paths(POST_IMAGES_BUCKET).is_empty());
}

#[tokio::test]
async fn feed_shows_newest_posts_with_ordered_comments() {
    let (backend, plaza, id) = setup_plaza_signed_in("ana@example.com", "Ana");
    plaza.ready().await.unwrap();
    let older = seed_post(&backend, id, "older");
    let newer = seed_post(&backend, id, "newer");

    plaza.comments().add("one", older).await.unwrap();
    plaza.comments().add("two", older).await.unwrap();

    let feed = plaza.posts().all().await.unwrap();
    let ids: Vec<_> = feed.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![newer, older]);
    let bodies: Vec<_> = feed[1].comments.iter().map(|c| c.content.as_str()).collect();
    assert_eq!(bodies, vec!["one", "two"]);

    let mine = plaza.comments().by_user(id).await.unwrap();
    assert_eq!(mine[0].content, "two");
}

#[tokio::test]
async fn watches_deliver_until_stopped() {
    let (backend, plaza, _) = setup_plaza_signed_in("ana@example.com", "Ana");
    plaza.ready().await.unwrap();

    let new_posts: Recorder<Post> = Recorder::new();
    let new_comments: Recorder<Comment> = Recorder::new();
    let feeds: Recorder<Vec<Post>> = Recorder::new();
    let posts_watch = plaza.posts().watch_new_posts(new_posts.callback()).await.unwrap();
    let comments_watch = plaza
        .posts()
        .watch_new_comments(new_comments.callback())
        .await
        .unwrap();
    let feed_watch = plaza.posts().watch_feed(feeds.callback()).await.unwrap();
    assert_eq!(
        backend.feed_channels(),
        vec!["realtime-comments", "realtime-posts", "realtime-posts-comments"]
    );

    let post = plaza.posts().create("live", None).await.unwrap();
    plaza.comments().add("reply", post.id).await.unwrap();

    assert_eq!(new_posts.wait_for(1).await[0].content, "live");
    assert_eq!(new_comments.wait_for(1).await[0].content, "reply");
    eventually(|| {
        feeds
            .last()
            .is_some_and(|feed| feed.first().is_some_and(|p| p.comments.len() == 1))
    })
    .await;

    posts_watch.stop().await;
    comments_watch.stop().await;
    feed_watch.stop().await;
    assert_eq!(backend.feed_count(), 0);

    plaza.posts().create("after stop", None).await.unwrap();
    assert_eq!(new_posts.len(), 1);
}

#[tokio::test]
async fn comment_threads_merge_local_and_remote_comments() {
    let (backend, plaza, _) = setup_plaza_signed_in("ana@example.com", "Ana");
    plaza.ready().await.unwrap();
    let other = seed_user(&backend, "bo@example.com", "Bo");
    let post = plaza.posts().create("discuss", None).await.unwrap();

    let thread = plaza.comment_thread(post.id).await;
    assert!(thread.is_live());
    assert!(matches!(thread.submit("mine").await, SubmitOutcome::Posted(_)));

    backend
        .insert(&Insert::into(COMMENTS).row(json!({
            "content": "theirs", "post_id": post.id, "user_profile_id": other
        })))
        .await
        .unwrap();
    eventually(|| thread.comments().len() == 2).await;

    let names: Vec<_> = thread
        .comments()
        .iter()
        .map(|c| c.author.as_ref().map(|a| a.name()))
        .collect();
    assert_eq!(names, vec![Some("Ana".to_string()), Some("Bo".to_string())]);

    thread.close().await;
    assert_eq!(backend.feed_count(), 0);
}

#[tokio::test]
async fn post_comment_watch_ignores_other_posts() {
    let (backend, plaza, id) = setup_plaza_signed_in("ana@example.com", "Ana");
    plaza.ready().await.unwrap();
    let watched = seed_post(&backend, id, "watched");
    let other = seed_post(&backend, id, "other");

    let seen: Recorder<Comment> = Recorder::new();
    let watch = plaza
        .comments()
        .watch_post(watched, seen.callback())
        .await
        .unwrap();
    assert_eq!(watch.channel(), format!("post-comments-{watched}"));

    plaza.comments().add("elsewhere", other).await.unwrap();
    plaza.comments().add("here", watched).await.unwrap();

    let comments = seen.wait_for(1).await;
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].content, "here");
    assert_eq!(comments[0].author.as_ref().unwrap().name(), "Ana");
    watch.stop().await;
}

#[tokio::test]
async fn chat_history_and_live_messages() {
    let (backend, plaza, id) = setup_plaza_signed_in("ana@example.com", "Ana");
    plaza.ready().await.unwrap();
    let other = seed_user(&backend, "bo@example.com", "Bo");

    let live: Recorder<ChatMessage> = Recorder::new();
    let watch = plaza.chat().watch_new_messages(live.callback()).await.unwrap();

    plaza.chat().send_as_current("hola").await.unwrap();
    plaza.chat().send("qué tal", other).await.unwrap();

    let received = live.wait_for(2).await;
    let senders: Vec<_> = received
        .iter()
        .map(|m| m.author.as_ref().unwrap().name())
        .collect();
    assert_eq!(senders, vec!["Ana", "Bo"]);

    let history = plaza.chat().last_messages().await.unwrap();
    assert_eq!(history[0].body, "qué tal");
    assert_eq!(history[1].user_profile_id, Some(id));
    assert_eq!(backend.rows(GLOBAL_CHAT).len(), 2);

    watch.stop().await;
    assert!(plaza.chat().send_as_current("   ").await.is_err());
}
