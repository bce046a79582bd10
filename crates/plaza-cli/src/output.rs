//! Plain-text rendering of rows

use plaza_core::{ChatMessage, Comment, CurrentUser, Post, ProfileSummary, UserProfile};
use std::fmt::Write;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

fn author(summary: Option<&ProfileSummary>) -> String {
    summary.map_or_else(|| "unknown".to_string(), ProfileSummary::name)
}

pub(crate) fn post(post: &Post) -> String {
    let mut out = format!(
        "#{} {} · {}\n  {}\n",
        post.id,
        author(post.author.as_ref()),
        post.created_at.format(TIME_FORMAT),
        post.content
    );
    if let Some(url) = &post.image_url {
        let _ = writeln!(out, "  [image] {url}");
    }
    for c in &post.comments {
        let _ = writeln!(out, "    {}", comment(c));
    }
    out
}

pub(crate) fn comment(comment: &Comment) -> String {
    format!(
        "#{} {}: {}",
        comment.id,
        author(comment.author.as_ref()),
        comment.content
    )
}

pub(crate) fn message(message: &ChatMessage) -> String {
    format!(
        "[{}] {}: {}",
        message.created_at.format("%H:%M"),
        author(message.author.as_ref()),
        message.body
    )
}

pub(crate) fn profile(profile: &UserProfile) -> String {
    let field = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
    format!(
        "id:      {}\nname:    {}\nbio:     {}\ncareer:  {}\navatar:  {}",
        profile.id,
        field(&profile.display_name),
        field(&profile.bio),
        field(&profile.career),
        field(&profile.avatar_url)
    )
}

pub(crate) fn user(user: &CurrentUser) -> String {
    let field = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
    format!(
        "id:      {}\nemail:   {}\nname:    {}\nbio:     {}\ncareer:  {}\navatar:  {}",
        user.id.map_or_else(|| "-".to_string(), |id| id.to_string()),
        field(&user.email),
        field(&user.display_name),
        field(&user.bio),
        field(&user.career),
        field(&user.avatar_url)
    )
}
