//! IRC text rendering: mIRC color codes and the commit notification line.

use crate::domain::{Commit, RepoName};

pub const GREEN: &str = "\x0303";
pub const RED: &str = "\x0304";
pub const YELLOW: &str = "\x0308";
pub const RESET: &str = "\x0f";

const MAX_MESSAGE_LEN: usize = 300;

/// `[owner/name] author abc1234 - subject (url)`
pub fn commit_line(repo: &RepoName, commit: &Commit) -> String {
    format!(
        "[{repo}] {} {} - {} ({})",
        commit.author,
        commit.short_sha(),
        subject(&commit.message),
        commit.url
    )
}

/// Summary used by `!repo last`.
pub fn last_commit_line(commit: &Commit) -> String {
    format!(
        "Latest commit: {} by {} - {} ({})",
        commit.short_sha(),
        commit.author,
        subject(&commit.message),
        commit.url
    )
}

pub fn success(text: &str) -> String {
    format!("{GREEN}{text}{RESET}")
}

pub fn denial(text: &str) -> String {
    format!("{RED}{text}{RESET}")
}

pub fn info(text: &str) -> String {
    format!("{YELLOW}{text}{RESET}")
}

/// IRC is line-oriented: collapse a commit message to its first line and keep
/// the notification under the protocol's practical length limit.
fn subject(message: &str) -> String {
    let first = message.lines().next().unwrap_or("").trim();
    if first.len() <= MAX_MESSAGE_LEN {
        return first.to_string();
    }
    let mut cut = MAX_MESSAGE_LEN;
    while !first.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &first[..cut])
}
