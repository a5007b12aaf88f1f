use async_trait::async_trait;

use crate::{
    domain::{Commit, RepoName},
    Result,
};

/// Port for the external commit-history API.
///
/// GitHub is the first implementation; the shape is small enough that another
/// forge could fit behind it.
#[async_trait]
pub trait CommitSource: Send + Sync {
    /// Most recent `count` commits for `repo`, newest first.
    ///
    /// Fails with `SourceUnavailable` on a non-success response and
    /// `MalformedResponse` when the payload does not parse.
    async fn fetch_recent(&self, repo: &RepoName, count: u32) -> Result<Vec<Commit>>;
}

/// Outbound chat messages.
///
/// Delivery is best-effort: implementations fail (and callers log) when the
/// session is not ready. Messages are never queued for later.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send_message(&self, target: &str, text: &str) -> Result<()>;
}
