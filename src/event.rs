//! Typed trigger input.
//!
//! The gate runs in response to `pull_request`, `pull_request_target` and
//! `pull_request_review` events. All of them carry the repository, the pull
//! request number and its head commit, which is all the gate needs. The
//! payload is validated here so the evaluator never sees a partial event.

use std::{fmt, path::Path};

use anyhow::Context;
use serde::Deserialize;

use crate::types::{PullRequestRef, PullRequestRefError, Repo, RepoError};

/// Boundary validation failures for trigger payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum EventError {
    Malformed(String),
    MissingField(&'static str),
    InvalidPullRequest(PullRequestRefError),
    InvalidSha(String),
    InvalidRepo(RepoError),
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::Malformed(msg) => write!(f, "event payload is not valid JSON: {}", msg),
            EventError::MissingField(path) => write!(f, "event payload is missing '{}'", path),
            EventError::InvalidPullRequest(err) => write!(f, "invalid pull request: {}", err),
            EventError::InvalidSha(sha) => write!(f, "head SHA is not a commit SHA: '{}'", sha),
            EventError::InvalidRepo(err) => write!(f, "invalid repository in event: {}", err),
        }
    }
}

impl std::error::Error for EventError {}

#[derive(Debug, Deserialize)]
struct RawEvent {
    pull_request: Option<RawPullRequest>,
    repository: Option<RawRepository>,
}

#[derive(Debug, Deserialize)]
struct RawPullRequest {
    number: Option<u64>,
    head: Option<RawHead>,
}

#[derive(Debug, Deserialize)]
struct RawHead {
    sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRepository {
    name: Option<String>,
    owner: Option<RawOwner>,
}

#[derive(Debug, Deserialize)]
struct RawOwner {
    login: Option<String>,
}

/// The pull request and commit a gate run applies to.
#[derive(Debug, Clone, PartialEq)]
pub struct PullRequestEvent {
    pub pull_request: PullRequestRef,
    /// Head commit at the time of the event. Not re-resolved by the gate.
    pub head_sha: String,
}

impl PullRequestEvent {
    pub fn new(repo: Repo, number: u64, head_sha: impl Into<String>) -> Result<Self, EventError> {
        let pull_request =
            PullRequestRef::new(repo, number).map_err(EventError::InvalidPullRequest)?;

        let head_sha = head_sha.into();
        if !is_commit_sha(&head_sha) {
            return Err(EventError::InvalidSha(head_sha));
        }

        Ok(Self {
            pull_request,
            head_sha,
        })
    }

    pub fn from_json(payload: &str) -> Result<Self, EventError> {
        let raw: RawEvent =
            serde_json::from_str(payload).map_err(|e| EventError::Malformed(e.to_string()))?;

        let pr = raw
            .pull_request
            .ok_or(EventError::MissingField("pull_request"))?;
        let number = pr
            .number
            .ok_or(EventError::MissingField("pull_request.number"))?;
        let sha = pr
            .head
            .and_then(|h| h.sha)
            .filter(|s| !s.is_empty())
            .ok_or(EventError::MissingField("pull_request.head.sha"))?;

        let repository = raw
            .repository
            .ok_or(EventError::MissingField("repository"))?;
        let name = repository
            .name
            .filter(|s| !s.is_empty())
            .ok_or(EventError::MissingField("repository.name"))?;
        let owner = repository
            .owner
            .and_then(|o| o.login)
            .filter(|s| !s.is_empty())
            .ok_or(EventError::MissingField("repository.owner.login"))?;

        let repo = Repo::new(owner, name).map_err(EventError::InvalidRepo)?;
        Self::new(repo, number, sha)
    }

    /// Reads and validates the payload file the CI runner wrote.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let payload = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read event payload from {}", path.display()))?;
        Self::from_json(&payload)
            .with_context(|| format!("Invalid event payload in {}", path.display()))
    }
}

fn is_commit_sha(sha: &str) -> bool {
    sha.len() == 40 && sha.chars().all(|c| c.is_ascii_hexdigit())
}
