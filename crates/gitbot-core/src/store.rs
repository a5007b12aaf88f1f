//! SQLite-backed repository store.
//!
//! Owns the three persisted tables: `admins`, `tracked_repos` and the
//! `commits` dedup ledger. Every user-influenced value is bound as a
//! parameter; authorization checks for mutating operations happen inside the
//! store so no caller can skip them.

use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::{
    domain::{Commit, Hostmask, RepoName},
    errors::Error,
    Result,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS admins (
        id INTEGER PRIMARY KEY,
        hostmask TEXT UNIQUE NOT NULL
    );
    CREATE TABLE IF NOT EXISTS tracked_repos (
        id INTEGER PRIMARY KEY,
        repo_name TEXT UNIQUE NOT NULL,
        last_commit_sha TEXT
    );
    CREATE TABLE IF NOT EXISTS commits (
        id INTEGER PRIMARY KEY,
        repo_name TEXT NOT NULL,
        sha TEXT NOT NULL,
        author TEXT NOT NULL,
        message TEXT NOT NULL,
        url TEXT NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE(repo_name, sha)
    );
";

/// Handle to the bot database. Cheap to clone; all access is serialized
/// through an internal mutex so concurrent detection cycles cannot race on a
/// repository's cursor.
#[derive(Clone)]
pub struct RepoStore {
    conn: Arc<Mutex<Connection>>,
}

impl RepoStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("database mutex poisoned".to_string()))
    }

    // === Administrators ===

    /// Out-of-band seeding of the first administrator (from configuration).
    /// Insert-or-ignore; never requires authorization.
    pub fn seed_admin(&self, hostmask: &Hostmask) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO admins (hostmask) VALUES (?1)",
            params![hostmask.as_str()],
        )?;
        Ok(())
    }

    pub fn is_admin(&self, hostmask: &Hostmask) -> Result<bool> {
        let conn = self.lock()?;
        is_admin_inner(&conn, hostmask)
    }

    /// Returns `true` if inserted, `false` if the hostmask was already an
    /// administrator. Fails with `Unauthorized` unless the caller is one.
    pub fn add_admin(&self, caller: &Hostmask, new_admin: &Hostmask) -> Result<bool> {
        let conn = self.lock()?;
        if !is_admin_inner(&conn, caller)? {
            return Err(Error::Unauthorized);
        }
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO admins (hostmask) VALUES (?1)",
            params![new_admin.as_str()],
        )?;
        Ok(inserted > 0)
    }

    /// Idempotent delete; returns `true` if a row was removed.
    pub fn remove_admin(&self, caller: &Hostmask, target: &Hostmask) -> Result<bool> {
        let conn = self.lock()?;
        if !is_admin_inner(&conn, caller)? {
            return Err(Error::Unauthorized);
        }
        let removed = conn.execute(
            "DELETE FROM admins WHERE hostmask = ?1",
            params![target.as_str()],
        )?;
        Ok(removed > 0)
    }

    // === Tracked repositories ===

    pub fn add_repository(&self, caller: &Hostmask, repo: &RepoName) -> Result<()> {
        let conn = self.lock()?;
        if !is_admin_inner(&conn, caller)? {
            return Err(Error::Unauthorized);
        }
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO tracked_repos (repo_name, last_commit_sha) VALUES (?1, NULL)",
            params![repo.as_str()],
        )?;
        if inserted == 0 {
            return Err(Error::AlreadyTracked(repo.to_string()));
        }
        Ok(())
    }

    /// Idempotent: removing an untracked repository is not an error.
    pub fn remove_repository(&self, caller: &Hostmask, repo: &RepoName) -> Result<()> {
        let conn = self.lock()?;
        if !is_admin_inner(&conn, caller)? {
            return Err(Error::Unauthorized);
        }
        conn.execute(
            "DELETE FROM tracked_repos WHERE repo_name = ?1",
            params![repo.as_str()],
        )?;
        Ok(())
    }

    pub fn list_repositories(&self) -> Result<Vec<RepoName>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT repo_name FROM tracked_repos")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            let raw = row?;
            match RepoName::parse(&raw) {
                Some(name) => out.push(name),
                None => {
                    return Err(Error::Storage(format!(
                        "tracked_repos contains malformed name: {raw}"
                    )))
                }
            }
        }
        Ok(out)
    }

    pub fn get_cursor(&self, repo: &RepoName) -> Result<Option<String>> {
        let conn = self.lock()?;
        let cursor: Option<Option<String>> = conn
            .query_row(
                "SELECT last_commit_sha FROM tracked_repos WHERE repo_name = ?1",
                params![repo.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(cursor.flatten())
    }

    pub fn set_cursor(&self, repo: &RepoName, sha: &str) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE tracked_repos SET last_commit_sha = ?1 WHERE repo_name = ?2",
            params![sha, repo.as_str()],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(repo.to_string()));
        }
        Ok(())
    }

    // === Commit dedup ledger ===

    pub fn has_commit(&self, repo: &RepoName, sha: &str) -> Result<bool> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM commits WHERE repo_name = ?1 AND sha = ?2 LIMIT 1",
                params![repo.as_str(), sha],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Idempotent insert: a conflicting (repo, sha) pair is a silent success.
    pub fn record_commit(&self, repo: &RepoName, commit: &Commit) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO commits (repo_name, sha, author, message, url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                repo.as_str(),
                commit.sha,
                commit.author,
                commit.message,
                commit.url,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

fn is_admin_inner(conn: &Connection, hostmask: &Hostmask) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM admins WHERE hostmask = ?1 LIMIT 1",
            params![hostmask.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_admin() -> (RepoStore, Hostmask) {
        let store = RepoStore::open_in_memory().unwrap();
        let admin = Hostmask::from_raw("alice!host.example");
        store.seed_admin(&admin).unwrap();
        (store, admin)
    }

    fn commit(sha: &str) -> Commit {
        Commit {
            sha: sha.into(),
            author: "Alice".into(),
            message: "Fix things".into(),
            url: format!("https://github.com/acme/widget/commit/{sha}"),
        }
    }

    #[test]
    fn seeding_is_idempotent() {
        let (store, admin) = store_with_admin();
        store.seed_admin(&admin).unwrap();
        assert!(store.is_admin(&admin).unwrap());
    }

    #[test]
    fn non_admin_cannot_mutate() {
        let (store, _) = store_with_admin();
        let mallory = Hostmask::from_raw("mallory!evil.example");
        let repo = RepoName::parse("x/y").unwrap();

        assert!(matches!(
            store.add_repository(&mallory, &repo),
            Err(Error::Unauthorized)
        ));
        assert!(matches!(
            store.remove_repository(&mallory, &repo),
            Err(Error::Unauthorized)
        ));
        assert!(matches!(
            store.add_admin(&mallory, &mallory),
            Err(Error::Unauthorized)
        ));

        // The denied insert must not have left a row behind.
        assert!(store.list_repositories().unwrap().is_empty());
    }

    #[test]
    fn repository_tracking_round_trip() {
        let (store, admin) = store_with_admin();
        let repo = RepoName::parse("acme/widget").unwrap();

        store.add_repository(&admin, &repo).unwrap();
        assert!(matches!(
            store.add_repository(&admin, &repo),
            Err(Error::AlreadyTracked(_))
        ));
        assert_eq!(store.list_repositories().unwrap(), vec![repo.clone()]);
        assert_eq!(store.get_cursor(&repo).unwrap(), None);

        store.set_cursor(&repo, "abc123").unwrap();
        assert_eq!(store.get_cursor(&repo).unwrap(), Some("abc123".into()));

        store.remove_repository(&admin, &repo).unwrap();
        // Idempotent second delete.
        store.remove_repository(&admin, &repo).unwrap();
        assert!(store.list_repositories().unwrap().is_empty());
    }

    #[test]
    fn cursor_update_requires_tracked_repo() {
        let (store, _) = store_with_admin();
        let repo = RepoName::parse("acme/widget").unwrap();
        assert!(matches!(
            store.set_cursor(&repo, "abc123"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn recording_a_commit_twice_keeps_one_row() {
        let (store, _) = store_with_admin();
        let repo = RepoName::parse("acme/widget").unwrap();

        store.record_commit(&repo, &commit("abc123")).unwrap();
        store.record_commit(&repo, &commit("abc123")).unwrap();

        assert!(store.has_commit(&repo, "abc123").unwrap());
        let conn = store.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM commits", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn admin_add_and_remove_report_prior_state() {
        let (store, admin) = store_with_admin();
        let bob = Hostmask::from_raw("bob!host.example");

        assert!(store.add_admin(&admin, &bob).unwrap());
        assert!(!store.add_admin(&admin, &bob).unwrap());
        assert!(store.is_admin(&bob).unwrap());

        assert!(store.remove_admin(&admin, &bob).unwrap());
        assert!(!store.remove_admin(&admin, &bob).unwrap());
        assert!(!store.is_admin(&bob).unwrap());
    }
}
