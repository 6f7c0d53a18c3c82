//! In-memory store backend for tests

use super::{IssueFilter, Store};
use crate::error::{Error, Result};
use crate::git::CommitRecord;
use crate::issue::{Issue, IssueId};
use crate::session::{Session, SessionId};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, Session>,
    issues: HashMap<IssueId, Issue>,
    commits: Vec<CommitRecord>,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_session(&self, session: Session) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn update_session(&self, session: Session) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.sessions.contains_key(&session.id) {
            return Err(Error::NotFound(session.id.to_string()));
        }
        inner.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get_session(&self, id: &SessionId) -> Result<Session> {
        let inner = self.inner.lock().unwrap();
        inner
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn create_issue(&self, issue: Issue) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.issues.insert(issue.id.clone(), issue);
        Ok(())
    }

    async fn update_issue(&self, issue: Issue) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.issues.contains_key(&issue.id) {
            return Err(Error::NotFound(issue.id.to_string()));
        }
        inner.issues.insert(issue.id.clone(), issue);
        Ok(())
    }

    async fn get_issue(&self, id: &IssueId) -> Result<Issue> {
        let inner = self.inner.lock().unwrap();
        inner
            .issues
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn list_issues(&self, filter: IssueFilter) -> Result<Vec<Issue>> {
        let inner = self.inner.lock().unwrap();
        let mut issues: Vec<Issue> = inner
            .issues
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        issues.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(issues)
    }

    async fn create_commit(&self, commit: CommitRecord) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.commits.push(commit);
        Ok(())
    }

    async fn list_commits(&self, session_id: &SessionId) -> Result<Vec<CommitRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .commits
            .iter()
            .filter(|c| &c.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn mark_reverted(
        &self,
        session_id: &SessionId,
        hash: &str,
        reason: &str,
        revert_hash: Option<String>,
    ) -> Result<CommitRecord> {
        let mut inner = self.inner.lock().unwrap();
        let commit = inner
            .commits
            .iter_mut()
            .find(|c| &c.session_id == session_id && c.hash == hash)
            .ok_or_else(|| Error::NotFound(format!("commit {hash}")))?;
        commit.reverted = true;
        commit.reverted_at = Some(Utc::now());
        commit.revert_reason = Some(reason.to_string());
        commit.revert_hash = revert_hash;
        Ok(commit.clone())
    }
}
