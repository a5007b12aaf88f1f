//! GitHub adapter: commit-history lookups over the REST API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use gitbot_core::{
    domain::{Commit, RepoName},
    errors::Error,
    ports::CommitSource,
    Result,
};

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("gitbot/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(token: Option<String>) -> Self {
        Self::with_base(API_BASE, token)
    }

    /// Override the API base URL (tests, GitHub Enterprise).
    pub fn with_base(api_base: impl Into<String>, token: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .expect("reqwest client build");
        Self {
            http,
            api_base: api_base.into(),
            token,
        }
    }
}

#[async_trait]
impl CommitSource for GithubClient {
    async fn fetch_recent(&self, repo: &RepoName, count: u32) -> Result<Vec<Commit>> {
        let url = format!(
            "{}/repos/{}/commits?per_page={}",
            self.api_base, repo, count
        );
        debug!(repo = %repo, count, "fetching commit history");

        let mut req = self
            .http
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            req = req.header(reqwest::header::AUTHORIZATION, format!("token {token}"));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::SourceUnavailable(format!("request to {url} failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::SourceUnavailable(format!(
                "HTTP {status} fetching commits for {repo}"
            )));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| Error::SourceUnavailable(format!("reading response body: {e}")))?;
        parse_commits(repo, &body)
    }
}

/// The subset of the commits payload the bridge cares about.
#[derive(Debug, Deserialize)]
struct CommitEntry {
    sha: String,
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    author: Option<CommitAuthor>,
    message: String,
}

#[derive(Debug, Deserialize)]
struct CommitAuthor {
    name: String,
}

fn parse_commits(repo: &RepoName, body: &str) -> Result<Vec<Commit>> {
    let entries: Vec<CommitEntry> = serde_json::from_str(body)
        .map_err(|e| Error::MalformedResponse(format!("commits payload for {repo}: {e}")))?;

    Ok(entries
        .into_iter()
        .map(|entry| {
            let url = format!("https://github.com/{repo}/commit/{}", entry.sha);
            Commit {
                url,
                author: entry
                    .commit
                    .author
                    .map(|a| a.name)
                    .unwrap_or_else(|| "unknown".to_string()),
                message: entry.commit.message,
                sha: entry.sha,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"[
        {
            "sha": "def4567890",
            "node_id": "C_kwANOg",
            "commit": {
                "author": {"name": "Alice", "email": "alice@example.com", "date": "2026-08-01T10:00:00Z"},
                "committer": {"name": "Alice", "email": "alice@example.com", "date": "2026-08-01T10:00:00Z"},
                "message": "Add frobnicator\n\nWith a longer body."
            },
            "html_url": "https://github.com/acme/widget/commit/def4567890"
        },
        {
            "sha": "abc1234567",
            "commit": {
                "author": null,
                "message": "Initial commit"
            }
        }
    ]"#;

    #[test]
    fn parses_the_commits_payload_newest_first() {
        let repo = RepoName::parse("acme/widget").unwrap();
        let commits = parse_commits(&repo, PAYLOAD).unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].sha, "def4567890");
        assert_eq!(commits[0].author, "Alice");
        assert_eq!(
            commits[0].url,
            "https://github.com/acme/widget/commit/def4567890"
        );
        // Null author degrades instead of failing the whole page.
        assert_eq!(commits[1].author, "unknown");
    }

    #[test]
    fn empty_history_parses_to_an_empty_page() {
        let repo = RepoName::parse("acme/widget").unwrap();
        assert!(parse_commits(&repo, "[]").unwrap().is_empty());
    }

    #[test]
    fn malformed_payload_is_a_typed_error() {
        let repo = RepoName::parse("acme/widget").unwrap();
        for body in ["not json", "{\"message\": \"Not Found\"}", "[{\"sha\": 42}]"] {
            assert!(matches!(
                parse_commits(&repo, body),
                Err(Error::MalformedResponse(_))
            ));
        }
    }
}
