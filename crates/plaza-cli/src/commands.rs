//! Subcommand handlers

use anyhow::{bail, Context};
use clap::ArgMatches;
use plaza_backend::Upload;
use plaza_core::{CommentId, Plaza, PostId, ProfileDraft, ProfileUpdate, UserId, Watch};
use std::path::{Path, PathBuf};

use crate::output;

pub(crate) async fn run(plaza: &Plaza, matches: &ArgMatches) -> anyhow::Result<()> {
    match matches.subcommand() {
        Some(("register", args)) => register(plaza, args).await,
        Some(("login", args)) => {
            let signed_in = plaza
                .auth()
                .login(required(args, "email")?, required(args, "password")?)
                .await?;
            let profile = signed_in.profile.await?;
            println!(
                "signed in as {}",
                profile.display_name.unwrap_or_else(|| signed_in.user.id.to_string())
            );
            Ok(())
        }
        Some(("logout", _)) => {
            plaza.auth().logout().await;
            println!("signed out");
            Ok(())
        }
        Some(("whoami", _)) => {
            match plaza.auth().current() {
                Some(user) => println!("{}", output::user(&user)),
                None => println!("not signed in"),
            }
            Ok(())
        }
        Some(("password", args)) => {
            plaza
                .auth()
                .change_password(required(args, "new-password")?)
                .await?;
            println!("password changed");
            Ok(())
        }
        Some(("posts", args)) => {
            let posts = match args.get_one::<String>("user") {
                Some(user) => plaza.posts().by_user(parse_user(user)?).await?,
                None => plaza.posts().all().await?,
            };
            for post in &posts {
                print!("{}", output::post(post));
            }
            Ok(())
        }
        Some(("feed", _)) => feed(plaza).await,
        Some(("post", args)) => {
            let image_url = match args.get_one::<PathBuf>("image") {
                Some(path) => Some(plaza.posts().upload_image(&read_upload(path).await?).await?),
                None => None,
            };
            let post = plaza
                .posts()
                .create(required(args, "content")?, image_url)
                .await?;
            println!("posted #{}", post.id);
            Ok(())
        }
        Some(("edit-post", args)) => {
            let id = PostId(*args.get_one::<i64>("id").context("missing post id")?);
            let upload = match args.get_one::<PathBuf>("image") {
                Some(path) => Some(read_upload(path).await?),
                None => None,
            };
            plaza
                .posts()
                .update_with_image(
                    id,
                    required(args, "content")?,
                    upload.as_ref(),
                    args.get_flag("remove-image"),
                )
                .await?;
            println!("updated #{id}");
            Ok(())
        }
        Some(("delete-post", args)) => {
            let id = PostId(*args.get_one::<i64>("id").context("missing post id")?);
            plaza.posts().delete(id).await?;
            println!("deleted #{id}");
            Ok(())
        }
        Some(("comments", args)) => {
            let comments = match (args.get_one::<i64>("post"), args.get_one::<String>("user")) {
                (Some(post), _) => plaza.comments().by_post(PostId(*post)).await?,
                (None, Some(user)) => plaza.comments().by_user(parse_user(user)?).await?,
                (None, None) => bail!("give a post ID or --user"),
            };
            for comment in &comments {
                println!("{}", output::comment(comment));
            }
            Ok(())
        }
        Some(("comment", args)) => {
            let post = PostId(*args.get_one::<i64>("post").context("missing post id")?);
            let comment = plaza
                .comments()
                .add(required(args, "content")?, post)
                .await?;
            println!("commented #{}", comment.id);
            Ok(())
        }
        Some(("delete-comment", args)) => {
            let id = CommentId(*args.get_one::<i64>("id").context("missing comment id")?);
            plaza.comments().delete(id).await?;
            println!("deleted comment #{id}");
            Ok(())
        }
        Some(("chat", args)) => chat(plaza, args.get_flag("follow")).await,
        Some(("say", args)) => {
            plaza
                .chat()
                .send_as_current(required(args, "message")?)
                .await?;
            Ok(())
        }
        Some(("profile", args)) => {
            let id = match args.get_one::<String>("id") {
                Some(id) => parse_user(id)?,
                None => plaza
                    .users()
                    .user_id()
                    .context("not signed in; pass a profile ID")?,
            };
            println!("{}", output::profile(&plaza.profiles().by_id(id).await?));
            Ok(())
        }
        Some(("edit-profile", args)) => {
            let mut update = ProfileUpdate::new();
            if let Some(name) = args.get_one::<String>("name") {
                update = update.with_display_name(name);
            }
            if let Some(bio) = args.get_one::<String>("bio") {
                update = update.with_bio(bio);
            }
            if let Some(career) = args.get_one::<String>("career") {
                update = update.with_career(career);
            }
            if args.get_flag("clear-bio") {
                update = update.without_bio();
            }
            if args.get_flag("clear-career") {
                update = update.without_career();
            }
            plaza.auth().update_profile(&update).await?;
            println!("profile updated");
            Ok(())
        }
        Some(("avatar", args)) => {
            let path = args.get_one::<PathBuf>("file").context("missing file")?;
            let url = plaza.auth().update_avatar(&read_upload(path).await?).await?;
            println!("{url}");
            Ok(())
        }
        Some((other, _)) => bail!("unknown command `{other}`"),
        None => bail!("no command given"),
    }
}

async fn register(plaza: &Plaza, args: &ArgMatches) -> anyhow::Result<()> {
    let mut draft = ProfileDraft::new();
    if let Some(name) = args.get_one::<String>("name") {
        draft = draft.with_display_name(name);
    }
    if let Some(bio) = args.get_one::<String>("bio") {
        draft = draft.with_bio(bio);
    }
    if let Some(career) = args.get_one::<String>("career") {
        draft = draft.with_career(career);
    }
    let user = plaza
        .auth()
        .register(required(args, "email")?, required(args, "password")?, draft)
        .await?;
    println!("registered {}", user.id);
    Ok(())
}

async fn feed(plaza: &Plaza) -> anyhow::Result<()> {
    for post in plaza.posts().all().await? {
        print!("{}", output::post(&post));
    }
    let posts = plaza
        .posts()
        .watch_new_posts(|post| println!("new post #{}: {}", post.id, post.content))
        .await?;
    let comments = plaza
        .posts()
        .watch_new_comments(|comment| {
            let post = comment.post_id.map_or_else(String::new, |id| format!(" on #{id}"));
            println!("new comment{post}: {}", comment.content);
        })
        .await?;
    follow_until_interrupted(vec![posts, comments]).await
}

async fn chat(plaza: &Plaza, follow: bool) -> anyhow::Result<()> {
    let mut history = plaza.chat().last_messages().await?;
    history.reverse();
    for message in &history {
        println!("{}", output::message(message));
    }
    if !follow {
        return Ok(());
    }
    let watch = plaza
        .chat()
        .watch_new_messages(|message| println!("{}", output::message(&message)))
        .await?;
    follow_until_interrupted(vec![watch]).await
}

async fn follow_until_interrupted(watches: Vec<Watch>) -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    for watch in watches {
        watch.stop().await;
    }
    Ok(())
}

fn required<'a>(args: &'a ArgMatches, name: &str) -> anyhow::Result<&'a str> {
    args.get_one::<String>(name)
        .map(String::as_str)
        .with_context(|| format!("missing --{name}"))
}

fn parse_user(text: &str) -> anyhow::Result<UserId> {
    text.parse()
        .with_context(|| format!("`{text}` is not a profile ID"))
}

async fn read_upload(path: &Path) -> anyhow::Result<Upload> {
    Upload::from_path(path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_ids_are_uuids() {
        let id = UserId::random();
        assert_eq!(parse_user(&id.to_string()).unwrap(), id);
        assert!(parse_user("ana").is_err());
    }

    #[tokio::test]
    async fn missing_upload_names_the_file() {
        let err = read_upload(Path::new("/definitely/not/here.png"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("here.png"));
    }
}
