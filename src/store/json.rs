//! JSON-file store backend
//!
//! Persists entities as pretty-printed JSON under a base directory:
//! `sessions/<id>.json`, `issues/<session>/<id>.json`,
//! `commits/<session>/<id>.json`. Writes are serialized per session id.

use super::{IssueFilter, Store};
use crate::error::{Error, Result};
use crate::git::CommitRecord;
use crate::issue::{Issue, IssueId};
use crate::session::{Session, SessionId};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;

pub struct JsonStore {
    base_dir: PathBuf,
    locks: Mutex<HashMap<SessionId, Arc<Mutex<()>>>>,
}

impl JsonStore {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    async fn session_lock(&self, id: &SessionId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(id.clone()).or_default())
    }

    fn session_file(&self, id: &SessionId) -> PathBuf {
        self.base_dir
            .join("sessions")
            .join(format!("{}.json", id.as_str()))
    }

    fn issues_dir(&self, session_id: &SessionId) -> PathBuf {
        self.base_dir.join("issues").join(session_id.as_str())
    }

    fn commits_dir(&self, session_id: &SessionId) -> PathBuf {
        self.base_dir.join("commits").join(session_id.as_str())
    }

    async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(value)?;
        fs::write(path, json).await?;
        Ok(())
    }

    async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|_| Error::NotFound(path.display().to_string()))?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn read_dir_json<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
        let mut values = Vec::new();
        if !dir.exists() {
            return Ok(values);
        }
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                values.push(Self::read_json(&path).await?);
            }
        }
        Ok(values)
    }
}

#[async_trait]
impl Store for JsonStore {
    async fn create_session(&self, session: Session) -> Result<()> {
        let lock = self.session_lock(&session.id).await;
        let _guard = lock.lock().await;
        Self::write_json(&self.session_file(&session.id), &session).await
    }

    async fn update_session(&self, session: Session) -> Result<()> {
        let lock = self.session_lock(&session.id).await;
        let _guard = lock.lock().await;
        let path = self.session_file(&session.id);
        if !path.exists() {
            return Err(Error::NotFound(session.id.to_string()));
        }
        Self::write_json(&path, &session).await
    }

    async fn get_session(&self, id: &SessionId) -> Result<Session> {
        Self::read_json(&self.session_file(id)).await
    }

    async fn create_issue(&self, issue: Issue) -> Result<()> {
        let lock = self.session_lock(&issue.session_id).await;
        let _guard = lock.lock().await;
        let path = self
            .issues_dir(&issue.session_id)
            .join(format!("{}.json", issue.id.as_str()));
        Self::write_json(&path, &issue).await
    }

    async fn update_issue(&self, issue: Issue) -> Result<()> {
        let lock = self.session_lock(&issue.session_id).await;
        let _guard = lock.lock().await;
        let path = self
            .issues_dir(&issue.session_id)
            .join(format!("{}.json", issue.id.as_str()));
        if !path.exists() {
            return Err(Error::NotFound(issue.id.to_string()));
        }
        Self::write_json(&path, &issue).await
    }

    async fn get_issue(&self, id: &IssueId) -> Result<Issue> {
        // Issue files are grouped by session; scan session directories.
        let issues_root = self.base_dir.join("issues");
        if issues_root.exists() {
            let mut sessions = fs::read_dir(&issues_root).await?;
            while let Some(session_dir) = sessions.next_entry().await? {
                let candidate = session_dir.path().join(format!("{}.json", id.as_str()));
                if candidate.exists() {
                    return Self::read_json(&candidate).await;
                }
            }
        }
        Err(Error::NotFound(id.to_string()))
    }

    async fn list_issues(&self, filter: IssueFilter) -> Result<Vec<Issue>> {
        let dir = self.issues_dir(&filter.session_id);
        let mut issues: Vec<Issue> = Self::read_dir_json(&dir)
            .await?
            .into_iter()
            .filter(|i: &Issue| filter.matches(i))
            .collect();
        issues.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(issues)
    }

    async fn create_commit(&self, commit: CommitRecord) -> Result<()> {
        let lock = self.session_lock(&commit.session_id).await;
        let _guard = lock.lock().await;
        let path = self
            .commits_dir(&commit.session_id)
            .join(format!("{}.json", commit.id.as_str()));
        Self::write_json(&path, &commit).await
    }

    async fn list_commits(&self, session_id: &SessionId) -> Result<Vec<CommitRecord>> {
        let mut commits: Vec<CommitRecord> =
            Self::read_dir_json(&self.commits_dir(session_id)).await?;
        commits.sort_by_key(|c| c.created_at);
        Ok(commits)
    }

    async fn mark_reverted(
        &self,
        session_id: &SessionId,
        hash: &str,
        reason: &str,
        revert_hash: Option<String>,
    ) -> Result<CommitRecord> {
        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;
        let dir = self.commits_dir(session_id);
        let commits: Vec<CommitRecord> = Self::read_dir_json(&dir).await?;
        let mut commit = commits
            .into_iter()
            .find(|c| c.hash == hash)
            .ok_or_else(|| Error::NotFound(format!("commit {hash}")))?;
        commit.reverted = true;
        commit.reverted_at = Some(Utc::now());
        commit.revert_reason = Some(reason.to_string());
        commit.revert_hash = revert_hash;
        let path = dir.join(format!("{}.json", commit.id.as_str()));
        Self::write_json(&path, &commit).await?;
        Ok(commit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MenderConfig;
    use crate::git::CommitId;

    fn session() -> Session {
        Session::new("/tmp/repo", "main", MenderConfig::default())
    }

    #[tokio::test]
    async fn session_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        let mut s = session();
        store.create_session(s.clone()).await.unwrap();

        s.transition(crate::session::SessionStatus::Running).unwrap();
        store.update_session(s.clone()).await.unwrap();

        let loaded = store.get_session(&s.id).await.unwrap();
        assert_eq!(loaded.status, crate::session::SessionStatus::Running);
        assert_eq!(loaded.repository_path, "/tmp/repo");
    }

    #[tokio::test]
    async fn update_missing_session_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        let err = store.update_session(session()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn mark_reverted_updates_commit_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        let s = session();
        let commit = CommitRecord {
            id: CommitId::new(),
            session_id: s.id.clone(),
            issue_id: None,
            hash: "deadbeef".to_string(),
            message: "fix".to_string(),
            diff_content: String::new(),
            files_changed: Vec::new(),
            insertions: 1,
            deletions: 0,
            reverted: false,
            reverted_at: None,
            revert_hash: None,
            revert_reason: None,
            author: "mender".to_string(),
            author_email: "mender@localhost".to_string(),
            created_at: Utc::now(),
        };
        store.create_commit(commit).await.unwrap();

        let reverted = store
            .mark_reverted(&s.id, "deadbeef", "regression", Some("cafe".to_string()))
            .await
            .unwrap();
        assert!(reverted.reverted);
        assert_eq!(reverted.revert_reason.as_deref(), Some("regression"));
        assert!(reverted.revert_state_valid());

        let listed = store.list_commits(&s.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].reverted);
    }
}
