use std::fmt;

/// IRC identity used as the authorization principal: `nick!host`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Hostmask(String);

impl Hostmask {
    pub fn new(nick: &str, host: &str) -> Self {
        Self(format!("{nick}!{host}"))
    }

    /// Wrap an already-formed `nick!host` string (config, command arguments).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Hostmask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// GitHub repository identifier in `owner/name` form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoName(String);

impl RepoName {
    /// Accepts `owner/name` where both sides are non-empty and contain only
    /// characters GitHub allows in owner/repository slugs.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (owner, name) = raw.split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        let valid = |s: &str| {
            s.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };
        if !valid(owner) || !valid(name) {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single commit as returned by the commit source, carrying everything a
/// notification needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
    pub sha: String,
    pub author: String,
    pub message: String,
    pub url: String,
}

impl Commit {
    /// Abbreviated SHA as shown in notifications.
    pub fn short_sha(&self) -> &str {
        let end = self.sha.len().min(7);
        &self.sha[..end]
    }
}

/// A commit that passed deduplication and must be announced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Announcement {
    pub repo: RepoName,
    pub commit: Commit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_name_accepts_owner_slash_name() {
        assert!(RepoName::parse("acme/widget").is_some());
        assert!(RepoName::parse("acme-inc/widget.rs").is_some());
        assert!(RepoName::parse(" acme/widget ").is_some());
    }

    #[test]
    fn repo_name_rejects_malformed_input() {
        assert!(RepoName::parse("widget").is_none());
        assert!(RepoName::parse("/widget").is_none());
        assert!(RepoName::parse("acme/").is_none());
        assert!(RepoName::parse("a/b/c").is_none());
        assert!(RepoName::parse("acme/wid get").is_none());
    }

    #[test]
    fn short_sha_truncates_to_seven() {
        let c = Commit {
            sha: "0123456789abcdef".into(),
            author: "a".into(),
            message: "m".into(),
            url: "u".into(),
        };
        assert_eq!(c.short_sha(), "0123456");
    }

    #[test]
    fn hostmask_joins_nick_and_host() {
        assert_eq!(Hostmask::new("alice", "host.example").as_str(), "alice!host.example");
    }
}
