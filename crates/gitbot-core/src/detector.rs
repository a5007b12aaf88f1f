//! Change detection: which fetched commits are new, in what order to announce
//! them, and how far to advance the per-repository cursor.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    config::SharedConfig,
    domain::{Announcement, RepoName},
    ports::CommitSource,
    store::RepoStore,
    Result,
};

pub struct ChangeDetector {
    store: RepoStore,
    source: Arc<dyn CommitSource>,
    config: SharedConfig,
}

impl ChangeDetector {
    pub fn new(store: RepoStore, source: Arc<dyn CommitSource>, config: SharedConfig) -> Self {
        Self {
            store,
            source,
            config,
        }
    }

    /// One detection cycle over every tracked repository.
    ///
    /// A failing repository is logged and skipped; it never aborts the cycle
    /// for the others. Announcements come back oldest-first within each
    /// repository.
    pub async fn run_cycle(&self) -> Vec<Announcement> {
        let repos = match self.store.list_repositories() {
            Ok(repos) => repos,
            Err(e) => {
                warn!(error = %e, "cannot list tracked repositories, skipping cycle");
                return Vec::new();
            }
        };

        let fetch_count = { self.config.read().await.github.fetch_count };

        let mut out = Vec::new();
        for repo in repos {
            match self.check_repo(&repo, fetch_count).await {
                Ok(mut announcements) => out.append(&mut announcements),
                Err(e) => warn!(repo = %repo, error = %e, "skipping repository this cycle"),
            }
        }
        out
    }

    async fn check_repo(&self, repo: &RepoName, fetch_count: u32) -> Result<Vec<Announcement>> {
        let cursor = self.store.get_cursor(repo)?;
        let fetched = self.source.fetch_recent(repo, fetch_count).await?;
        if fetched.is_empty() {
            debug!(repo = %repo, "commit history is empty");
            return Ok(Vec::new());
        }

        // Scan newest → oldest; everything older than the cursor is known.
        // On the first run (no cursor) the whole fetched page is candidate,
        // which bounds the backlog to `fetch_count` commits.
        let mut candidates = Vec::new();
        for commit in &fetched {
            if cursor.as_deref() == Some(commit.sha.as_str()) {
                break;
            }
            candidates.push(commit);
        }
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        // Announce oldest-first. The ledger is re-checked right before each
        // emission: a commit recorded in an earlier cycle must stay silent
        // even if the cursor was reset underneath us.
        let mut announcements = Vec::new();
        for commit in candidates.iter().rev() {
            if self.store.has_commit(repo, &commit.sha)? {
                debug!(repo = %repo, sha = %commit.sha, "already announced");
                continue;
            }
            self.store.record_commit(repo, commit)?;
            announcements.push(Announcement {
                repo: repo.clone(),
                commit: (*commit).clone(),
            });
        }

        // The newest fetched SHA bounds the next scan, no matter how many of
        // the candidates were actually announced.
        self.store.set_cursor(repo, &fetched[0].sha)?;
        if !announcements.is_empty() {
            info!(repo = %repo, count = announcements.len(), "new commits detected");
        }

        Ok(announcements)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;
    use crate::{
        config::Config,
        domain::{Commit, Hostmask},
        errors::Error,
    };

    struct FakeSource {
        pages: Mutex<HashMap<String, Vec<Commit>>>,
        failing: Mutex<Vec<String>>,
    }

    impl FakeSource {
        fn new() -> Self {
            Self {
                pages: Mutex::new(HashMap::new()),
                failing: Mutex::new(Vec::new()),
            }
        }

        async fn set_page(&self, repo: &str, shas: &[&str]) {
            let commits = shas
                .iter()
                .map(|sha| Commit {
                    sha: sha.to_string(),
                    author: "Alice".into(),
                    message: format!("commit {sha}"),
                    url: format!("https://github.com/{repo}/commit/{sha}"),
                })
                .collect();
            self.pages.lock().await.insert(repo.to_string(), commits);
        }

        async fn fail(&self, repo: &str) {
            self.failing.lock().await.push(repo.to_string());
        }
    }

    #[async_trait]
    impl CommitSource for FakeSource {
        async fn fetch_recent(&self, repo: &RepoName, count: u32) -> Result<Vec<Commit>> {
            if self.failing.lock().await.iter().any(|r| r == repo.as_str()) {
                return Err(Error::SourceUnavailable("connection refused".into()));
            }
            let pages = self.pages.lock().await;
            let page = pages.get(repo.as_str()).cloned().unwrap_or_default();
            Ok(page.into_iter().take(count as usize).collect())
        }
    }

    const CONFIG: &str = r##"
        [irc]
        server = "irc.example.net"
        nick = "gitbot"
        sasl_account = "gitbot"
        sasl_password = "hunter2"
        channels = ["#dev"]
    "##;

    async fn detector() -> (ChangeDetector, RepoStore, Arc<FakeSource>, Hostmask) {
        let store = RepoStore::open_in_memory().unwrap();
        let admin = Hostmask::from_raw("alice!host.example");
        store.seed_admin(&admin).unwrap();
        let source = Arc::new(FakeSource::new());
        let config = Config::parse(CONFIG).unwrap().shared();
        let det = ChangeDetector::new(store.clone(), source.clone(), config);
        (det, store, source, admin)
    }

    fn shas(announcements: &[Announcement]) -> Vec<&str> {
        announcements.iter().map(|a| a.commit.sha.as_str()).collect()
    }

    #[tokio::test]
    async fn first_run_announces_page_oldest_first() {
        let (det, store, source, admin) = detector().await;
        let repo = RepoName::parse("acme/widget").unwrap();
        store.add_repository(&admin, &repo).unwrap();
        source.set_page("acme/widget", &["c3", "c2", "c1"]).await;

        let announcements = det.run_cycle().await;
        assert_eq!(shas(&announcements), vec!["c1", "c2", "c3"]);
        assert_eq!(store.get_cursor(&repo).unwrap(), Some("c3".into()));
    }

    #[tokio::test]
    async fn unchanged_history_announces_nothing() {
        let (det, store, source, admin) = detector().await;
        let repo = RepoName::parse("acme/widget").unwrap();
        store.add_repository(&admin, &repo).unwrap();
        source.set_page("acme/widget", &["c3", "c2", "c1"]).await;

        assert_eq!(det.run_cycle().await.len(), 3);
        // Same fetch result: nothing new, cursor unchanged.
        assert!(det.run_cycle().await.is_empty());
        assert_eq!(store.get_cursor(&repo).unwrap(), Some("c3".into()));
    }

    #[tokio::test]
    async fn scan_stops_at_the_cursor() {
        let (det, store, source, admin) = detector().await;
        let repo = RepoName::parse("acme/widget").unwrap();
        store.add_repository(&admin, &repo).unwrap();
        source.set_page("acme/widget", &["abc123"]).await;
        assert_eq!(det.run_cycle().await.len(), 1);

        source.set_page("acme/widget", &["def456", "abc123"]).await;
        let announcements = det.run_cycle().await;
        assert_eq!(shas(&announcements), vec!["def456"]);
        assert_eq!(store.get_cursor(&repo).unwrap(), Some("def456".into()));
        assert!(store.has_commit(&repo, "def456").unwrap());
        assert!(store.has_commit(&repo, "abc123").unwrap());
    }

    #[tokio::test]
    async fn recorded_commit_is_not_reannounced_after_cursor_reset() {
        let (det, store, source, admin) = detector().await;
        let repo = RepoName::parse("acme/widget").unwrap();
        store.add_repository(&admin, &repo).unwrap();
        source.set_page("acme/widget", &["c2", "c1"]).await;
        assert_eq!(det.run_cycle().await.len(), 2);

        // Simulate a cursor reset: the ledger must still silence both.
        store.set_cursor(&repo, "gone").unwrap();
        assert!(det.run_cycle().await.is_empty());
        assert_eq!(store.get_cursor(&repo).unwrap(), Some("c2".into()));
    }

    #[tokio::test]
    async fn one_failing_repository_does_not_poison_the_cycle() {
        let (det, store, source, admin) = detector().await;
        let good = RepoName::parse("a/b").unwrap();
        let bad = RepoName::parse("x/y").unwrap();
        store.add_repository(&admin, &good).unwrap();
        store.add_repository(&admin, &bad).unwrap();
        source.set_page("a/b", &["c1"]).await;
        source.fail("x/y").await;

        let announcements = det.run_cycle().await;
        assert_eq!(shas(&announcements), vec!["c1"]);
        // The failing repository's state is untouched.
        assert_eq!(store.get_cursor(&bad).unwrap(), None);
        assert!(!store.has_commit(&bad, "c1").unwrap());
    }

    #[tokio::test]
    async fn empty_history_is_a_noop() {
        let (det, store, source, admin) = detector().await;
        let repo = RepoName::parse("acme/widget").unwrap();
        store.add_repository(&admin, &repo).unwrap();
        source.set_page("acme/widget", &[]).await;

        assert!(det.run_cycle().await.is_empty());
        assert_eq!(store.get_cursor(&repo).unwrap(), None);
    }
}
