//! Inbound command handling.
//!
//! Parses the `!admin` / `!repo` command surface out of channel messages,
//! applies the matching store operation and produces exactly one reply per
//! recognized command. Everything else is silently ignored.

use std::sync::Arc;

use tracing::warn;

use crate::{
    domain::{Hostmask, RepoName},
    errors::Error,
    format,
    ports::CommitSource,
    store::RepoStore,
};

/// A single response, routed back through the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub target: String,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum BotCommand {
    AdminAdd(String),
    AdminDel(String),
    AdminCheck(String),
    RepoAdd(String),
    RepoDel(String),
    RepoLast(String),
}

pub struct CommandDispatcher {
    store: RepoStore,
    source: Arc<dyn CommitSource>,
}

impl CommandDispatcher {
    pub fn new(store: RepoStore, source: Arc<dyn CommitSource>) -> Self {
        Self { store, source }
    }

    /// Handle one inbound channel message.
    ///
    /// `sender` is the authorization principal, `sender_nick` the reply
    /// target for the one private response (unauthorized `!repo del`), and
    /// `target` the channel the message arrived on.
    pub async fn handle(
        &self,
        sender: &Hostmask,
        sender_nick: &str,
        target: &str,
        text: &str,
    ) -> Option<Reply> {
        let command = parse(text)?;
        let reply_to = target.to_string();

        let text = match command {
            BotCommand::AdminAdd(raw) => {
                let new_admin = Hostmask::from_raw(raw.clone());
                match self.store.add_admin(sender, &new_admin) {
                    Ok(true) => format::success(&format!("Admin added: {raw}")),
                    Ok(false) => format::info(&format!("{raw} is already an admin.")),
                    Err(Error::Unauthorized) => {
                        format::denial("You are not authorized to add admins.")
                    }
                    Err(e) => storage_failure("add admin", e),
                }
            }

            BotCommand::AdminDel(raw) => {
                let admin = Hostmask::from_raw(raw.clone());
                match self.store.remove_admin(sender, &admin) {
                    Ok(true) => format::denial(&format!("Admin removed: {raw}")),
                    Ok(false) => format::info(&format!("{raw} is not an admin.")),
                    Err(Error::Unauthorized) => {
                        format::denial("You are not authorized to remove admins.")
                    }
                    Err(e) => storage_failure("remove admin", e),
                }
            }

            BotCommand::AdminCheck(raw) => {
                let admin = Hostmask::from_raw(raw.clone());
                match self.store.is_admin(&admin) {
                    Ok(true) => format::success(&format!("{raw} is an admin.")),
                    Ok(false) => format::denial(&format!("{raw} is NOT an admin.")),
                    Err(e) => storage_failure("check admin", e),
                }
            }

            BotCommand::RepoAdd(raw) => match RepoName::parse(&raw) {
                None => format::info("Invalid repository name (expected owner/name)."),
                Some(repo) => match self.store.add_repository(sender, &repo) {
                    Ok(()) => format::success(&format!("Now tracking {repo}.")),
                    Err(Error::AlreadyTracked(_)) => {
                        format::info(&format!("{repo} is already tracked."))
                    }
                    Err(Error::Unauthorized) => {
                        format::denial("You are not authorized to add repositories.")
                    }
                    Err(e) => storage_failure("add repository", e),
                },
            },

            BotCommand::RepoDel(raw) => match RepoName::parse(&raw) {
                None => format::info("Invalid repository name (expected owner/name)."),
                Some(repo) => match self.store.remove_repository(sender, &repo) {
                    Ok(()) => format::success(&format!("Stopped tracking {repo}.")),
                    Err(Error::Unauthorized) => {
                        // Denials for destructive operations go to the sender
                        // privately, not to the channel.
                        return Some(Reply {
                            target: sender_nick.to_string(),
                            text: format::denial(
                                "You are not authorized to remove repositories.",
                            ),
                        });
                    }
                    Err(e) => storage_failure("remove repository", e),
                },
            },

            BotCommand::RepoLast(raw) => match RepoName::parse(&raw) {
                None => format::info("Invalid repository name (expected owner/name)."),
                Some(repo) => match self.source.fetch_recent(&repo, 1).await {
                    Ok(commits) => match commits.first() {
                        Some(commit) => format::last_commit_line(commit),
                        None => format::info(&format!("No commits found for {repo}.")),
                    },
                    Err(e) => {
                        warn!(repo = %repo, error = %e, "live commit lookup failed");
                        format::denial(&format!("Failed to fetch commits for {repo}."))
                    }
                },
            },
        };

        Some(Reply {
            target: reply_to,
            text,
        })
    }
}

fn storage_failure(what: &str, e: Error) -> String {
    warn!(error = %e, "database error during {what}");
    format::denial(&format!("Failed to {what}."))
}

fn parse(text: &str) -> Option<BotCommand> {
    let rest = text.trim().strip_prefix('!')?;
    let mut parts = rest.splitn(3, char::is_whitespace);
    let group = parts.next()?;
    let verb = parts.next()?;
    let arg = parts.next().unwrap_or("").trim();
    if arg.is_empty() || arg.contains(char::is_whitespace) {
        return None;
    }
    let arg = arg.to_string();

    match (group, verb) {
        ("admin", "add") => Some(BotCommand::AdminAdd(arg)),
        ("admin", "del") => Some(BotCommand::AdminDel(arg)),
        ("admin", "check") => Some(BotCommand::AdminCheck(arg)),
        ("repo", "add") => Some(BotCommand::RepoAdd(arg)),
        ("repo", "del") => Some(BotCommand::RepoDel(arg)),
        ("repo", "last") => Some(BotCommand::RepoLast(arg)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{domain::Commit, Result};

    struct FakeSource {
        commits: Vec<Commit>,
        fail: bool,
    }

    #[async_trait]
    impl CommitSource for FakeSource {
        async fn fetch_recent(&self, _repo: &RepoName, count: u32) -> Result<Vec<Commit>> {
            if self.fail {
                return Err(Error::SourceUnavailable("503".into()));
            }
            Ok(self.commits.iter().take(count as usize).cloned().collect())
        }
    }

    fn dispatcher(fail_source: bool) -> (CommandDispatcher, RepoStore, Hostmask) {
        let store = RepoStore::open_in_memory().unwrap();
        let admin = Hostmask::from_raw("alice!host.example");
        store.seed_admin(&admin).unwrap();
        let source = Arc::new(FakeSource {
            commits: vec![Commit {
                sha: "0123456789abcdef".into(),
                author: "Alice".into(),
                message: "Fix things".into(),
                url: "https://github.com/acme/widget/commit/0123456789abcdef".into(),
            }],
            fail: fail_source,
        });
        let dispatcher = CommandDispatcher::new(store.clone(), source);
        (dispatcher, store, admin)
    }

    #[test]
    fn parsing_recognizes_the_command_surface() {
        assert_eq!(
            parse("!admin add bob!h.example"),
            Some(BotCommand::AdminAdd("bob!h.example".into()))
        );
        assert_eq!(
            parse("  !repo last acme/widget  "),
            Some(BotCommand::RepoLast("acme/widget".into()))
        );
        assert_eq!(parse("!repo add"), None);
        assert_eq!(parse("!repo add a b"), None);
        assert_eq!(parse("!frob x"), None);
        assert_eq!(parse("hello there"), None);
        assert_eq!(parse("admin add x"), None);
    }

    #[tokio::test]
    async fn admin_lifecycle_over_commands() {
        let (dispatcher, store, admin) = dispatcher(false);
        let bob = "bob!h.example";

        let reply = dispatcher
            .handle(&admin, "alice", "#dev", &format!("!admin add {bob}"))
            .await
            .unwrap();
        assert_eq!(reply.target, "#dev");
        assert!(reply.text.contains("Admin added: bob!h.example"));
        assert!(store.is_admin(&Hostmask::from_raw(bob)).unwrap());

        let reply = dispatcher
            .handle(&admin, "alice", "#dev", &format!("!admin check {bob}"))
            .await
            .unwrap();
        assert!(reply.text.contains("is an admin"));

        let reply = dispatcher
            .handle(&admin, "alice", "#dev", &format!("!admin del {bob}"))
            .await
            .unwrap();
        assert!(reply.text.contains("Admin removed"));
        assert!(!store.is_admin(&Hostmask::from_raw(bob)).unwrap());
    }

    #[tokio::test]
    async fn unauthorized_repo_del_replies_privately() {
        let (dispatcher, _, _) = dispatcher(false);
        let mallory = Hostmask::from_raw("mallory!evil.example");

        let reply = dispatcher
            .handle(&mallory, "mallory", "#dev", "!repo del acme/widget")
            .await
            .unwrap();
        assert_eq!(reply.target, "mallory");
        assert!(reply.text.contains("not authorized"));

        // The additive counterpart is denied in the channel.
        let reply = dispatcher
            .handle(&mallory, "mallory", "#dev", "!repo add acme/widget")
            .await
            .unwrap();
        assert_eq!(reply.target, "#dev");
        assert!(reply.text.contains("not authorized"));
    }

    #[tokio::test]
    async fn repo_tracking_over_commands() {
        let (dispatcher, store, admin) = dispatcher(false);

        let reply = dispatcher
            .handle(&admin, "alice", "#dev", "!repo add acme/widget")
            .await
            .unwrap();
        assert!(reply.text.contains("Now tracking acme/widget"));

        let reply = dispatcher
            .handle(&admin, "alice", "#dev", "!repo add acme/widget")
            .await
            .unwrap();
        assert!(reply.text.contains("already tracked"));

        let reply = dispatcher
            .handle(&admin, "alice", "#dev", "!repo add not-a-repo")
            .await
            .unwrap();
        assert!(reply.text.contains("Invalid repository name"));

        let reply = dispatcher
            .handle(&admin, "alice", "#dev", "!repo del acme/widget")
            .await
            .unwrap();
        assert!(reply.text.contains("Stopped tracking"));
        assert!(store.list_repositories().unwrap().is_empty());
    }

    #[tokio::test]
    async fn repo_last_reports_the_live_head() {
        let (dispatcher, _, admin) = dispatcher(false);
        let reply = dispatcher
            .handle(&admin, "alice", "#dev", "!repo last acme/widget")
            .await
            .unwrap();
        assert!(reply.text.contains("Latest commit: 0123456 by Alice"));
    }

    #[tokio::test]
    async fn repo_last_failure_is_user_visible() {
        let (dispatcher, _, admin) = dispatcher(true);
        let reply = dispatcher
            .handle(&admin, "alice", "#dev", "!repo last acme/widget")
            .await
            .unwrap();
        assert!(reply.text.contains("Failed to fetch commits"));
    }

    #[tokio::test]
    async fn unrecognized_messages_are_ignored() {
        let (dispatcher, _, admin) = dispatcher(false);
        assert!(dispatcher
            .handle(&admin, "alice", "#dev", "good morning")
            .await
            .is_none());
        assert!(dispatcher
            .handle(&admin, "alice", "#dev", "!unknown thing")
            .await
            .is_none());
    }
}
