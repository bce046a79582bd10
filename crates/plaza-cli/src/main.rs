//! `plaza` command-line client

mod commands;
mod output;
mod settings;

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use plaza_core::Plaza;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("plaza")
        .version(plaza_core::VERSION)
        .about("Posts, comments and chat from the terminal")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Configuration file (default: <config dir>/plaza/config.toml)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .help("Tracing filter; RUST_LOG takes precedence"),
        )
        .subcommand(
            Command::new("register")
                .about("Create an account and its profile")
                .arg(Arg::new("email").long("email").required(true))
                .arg(Arg::new("password").long("password").required(true))
                .arg(Arg::new("name").long("name").help("Display name"))
                .arg(Arg::new("bio").long("bio"))
                .arg(Arg::new("career").long("career")),
        )
        .subcommand(
            Command::new("login")
                .about("Sign in")
                .arg(Arg::new("email").long("email").required(true))
                .arg(Arg::new("password").long("password").required(true)),
        )
        .subcommand(Command::new("logout").about("Sign out"))
        .subcommand(Command::new("whoami").about("Show the signed-in user"))
        .subcommand(
            Command::new("password")
                .about("Change the password")
                .arg(Arg::new("new-password").required(true)),
        )
        .subcommand(
            Command::new("posts")
                .about("List posts, newest first")
                .arg(Arg::new("user").long("user").help("Only posts by this profile ID")),
        )
        .subcommand(
            Command::new("feed")
                .about("Print the feed, then follow new posts and comments until Ctrl-C"),
        )
        .subcommand(
            Command::new("post")
                .about("Publish a post")
                .arg(Arg::new("content").required(true))
                .arg(
                    Arg::new("image")
                        .long("image")
                        .value_parser(value_parser!(PathBuf))
                        .help("Image file to attach"),
                ),
        )
        .subcommand(
            Command::new("edit-post")
                .about("Change a post's text and image")
                .arg(Arg::new("id").required(true).value_parser(value_parser!(i64)))
                .arg(Arg::new("content").required(true))
                .arg(
                    Arg::new("image")
                        .long("image")
                        .value_parser(value_parser!(PathBuf))
                        .conflicts_with("remove-image")
                        .help("Replace the image"),
                )
                .arg(
                    Arg::new("remove-image")
                        .long("remove-image")
                        .action(ArgAction::SetTrue)
                        .help("Remove the current image"),
                ),
        )
        .subcommand(
            Command::new("delete-post")
                .about("Delete a post and its image")
                .arg(Arg::new("id").required(true).value_parser(value_parser!(i64))),
        )
        .subcommand(
            Command::new("comments")
                .about("List comments of a post, or by a user")
                .arg(
                    Arg::new("post")
                        .value_parser(value_parser!(i64))
                        .required_unless_present("user"),
                )
                .arg(Arg::new("user").long("user").conflicts_with("post")),
        )
        .subcommand(
            Command::new("comment")
                .about("Comment on a post")
                .arg(Arg::new("post").required(true).value_parser(value_parser!(i64)))
                .arg(Arg::new("content").required(true)),
        )
        .subcommand(
            Command::new("delete-comment")
                .about("Delete a comment")
                .arg(Arg::new("id").required(true).value_parser(value_parser!(i64))),
        )
        .subcommand(
            Command::new("chat")
                .about("Show recent chat messages")
                .arg(
                    Arg::new("follow")
                        .long("follow")
                        .short('f')
                        .action(ArgAction::SetTrue)
                        .help("Keep printing new messages until Ctrl-C"),
                ),
        )
        .subcommand(
            Command::new("say")
                .about("Send a chat message")
                .arg(Arg::new("message").required(true)),
        )
        .subcommand(
            Command::new("profile")
                .about("Show a profile (default: your own)")
                .arg(Arg::new("id")),
        )
        .subcommand(
            Command::new("edit-profile")
                .about("Change your profile")
                .arg(Arg::new("name").long("name"))
                .arg(Arg::new("bio").long("bio"))
                .arg(Arg::new("career").long("career"))
                .arg(
                    Arg::new("clear-bio")
                        .long("clear-bio")
                        .action(ArgAction::SetTrue)
                        .conflicts_with("bio"),
                )
                .arg(
                    Arg::new("clear-career")
                        .long("clear-career")
                        .action(ArgAction::SetTrue)
                        .conflicts_with("career"),
                ),
        )
        .subcommand(
            Command::new("avatar")
                .about("Upload a new avatar")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    let mut config = settings::load(matches.get_one::<PathBuf>("config"))?;
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.log_filter = level.clone();
    }
    init_tracing(&config.log_filter);

    let plaza = Plaza::connect(config)?;
    await_restore(&plaza, &matches).await?;

    commands::run(&plaza, &matches).await
}

/// Commands that act as the signed-in user's profile
fn needs_profile(matches: &ArgMatches) -> bool {
    match matches.subcommand() {
        Some(("whoami" | "say", _)) => true,
        Some(("profile", args)) => !args.contains_id("id"),
        _ => false,
    }
}

/// Wait for the session restore; a failure only stops profile commands
///
/// A session whose profile cannot be loaded still keeps its id and email, so
/// `logout`, `login` and `edit-profile` must stay usable.
async fn await_restore(plaza: &Plaza, matches: &ArgMatches) -> anyhow::Result<()> {
    match plaza.ready().await {
        Ok(_) => Ok(()),
        Err(e) if needs_profile(matches) => Err(e.into()),
        Err(e) => {
            tracing::warn!(error = %e, "session restore incomplete, continuing");
            Ok(())
        }
    }
}
