use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Validation errors for `owner/repo` identifiers.
#[derive(Debug, Clone, PartialEq)]
pub enum RepoError {
    EmptyOwner,
    EmptyName,
    InvalidFormat(String),
}

impl fmt::Display for RepoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepoError::EmptyOwner => write!(f, "repository owner cannot be empty"),
            RepoError::EmptyName => write!(f, "repository name cannot be empty"),
            RepoError::InvalidFormat(s) => {
                write!(f, "repository must be in format 'owner/repo', got: '{}'", s)
            }
        }
    }
}

impl std::error::Error for RepoError {}

/// A GitHub repository identified by owner and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Repo {
    owner: String,
    name: String,
}

impl Repo {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Result<Self, RepoError> {
        let owner = owner.into();
        let name = name.into();

        if owner.trim().is_empty() {
            return Err(RepoError::EmptyOwner);
        }
        if name.trim().is_empty() {
            return Err(RepoError::EmptyName);
        }
        if owner.contains('/') || name.contains('/') {
            return Err(RepoError::InvalidFormat(format!("{}/{}", owner, name)));
        }

        Ok(Self { owner, name })
    }

    pub fn parse(repo: &str) -> Result<Self, RepoError> {
        match repo.split_once('/') {
            Some((owner, name)) if !name.contains('/') => Self::new(owner, name),
            _ => Err(RepoError::InvalidFormat(repo.to_string())),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Repo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Validation errors for pull request references.
#[derive(Debug, Clone, PartialEq)]
pub enum PullRequestRefError {
    ZeroNumber,
}

impl fmt::Display for PullRequestRefError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PullRequestRefError::ZeroNumber => write!(f, "pull request number must be positive"),
        }
    }
}

impl std::error::Error for PullRequestRefError {}

/// A pull request within a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PullRequestRef {
    repo: Repo,
    number: u64,
}

impl PullRequestRef {
    pub fn new(repo: Repo, number: u64) -> Result<Self, PullRequestRefError> {
        if number == 0 {
            return Err(PullRequestRefError::ZeroNumber);
        }
        Ok(Self { repo, number })
    }

    pub fn repo(&self) -> &Repo {
        &self.repo
    }

    pub fn number(&self) -> u64 {
        self.number
    }
}

impl fmt::Display for PullRequestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.repo, self.number)
    }
}

/// Review states as reported by the hosting platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Pending,
    Dismissed,
}

impl ReviewState {
    /// Whether this state changes an author's standing on the pull request.
    /// Plain comments and unsubmitted drafts do not.
    pub fn is_decisive(&self) -> bool {
        matches!(
            self,
            ReviewState::Approved | ReviewState::ChangesRequested | ReviewState::Dismissed
        )
    }
}

/// A single review on a pull request.
#[derive(Debug, Clone, PartialEq)]
pub struct Review {
    /// Login of the reviewer; `None` for deleted accounts.
    pub author: Option<String>,
    pub state: ReviewState,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl Review {
    pub fn new(author: impl Into<String>, state: ReviewState) -> Self {
        Self {
            author: Some(author.into()),
            state,
            submitted_at: None,
        }
    }

    pub fn submitted_at(mut self, at: DateTime<Utc>) -> Self {
        self.submitted_at = Some(at);
        self
    }
}

/// Commit status states the gate writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    Success,
    Failure,
    Pending,
}

impl CommitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitState::Success => "success",
            CommitState::Failure => "failure",
            CommitState::Pending => "pending",
        }
    }
}

impl fmt::Display for CommitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named status attached to a commit. Upserting a status with the same
/// context on the same SHA replaces the previous one.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitStatus {
    pub context: String,
    pub state: CommitState,
    pub description: String,
    pub target_url: Option<String>,
}

/// Outcome of evaluating reviews against the authorizing team.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// A roster member approved.
    Approved { reviewer: String },
    /// No qualifying approval was found.
    Denied,
    /// Nothing in scope changed, so no approval is needed.
    NoChanges,
}

impl Verdict {
    pub fn is_approved(&self) -> bool {
        !matches!(self, Verdict::Denied)
    }
}

/// What a single gate run did to the pull request.
#[derive(Debug, Clone, PartialEq)]
pub struct GateReport {
    pub verdict: Verdict,
    pub status: CommitStatus,
    pub label_added: bool,
    pub label_removed: bool,
}

/// Operations the gate needs from a repository-hosting platform.
///
/// Every call is a single attempt; failures propagate to the caller
/// unchanged so the surrounding workflow run is marked as errored.
#[async_trait]
pub trait Forge: Send + Sync {
    async fn list_reviews(&self, pr: &PullRequestRef) -> Result<Vec<Review>>;

    /// Returns the logins of every member of `org/team_slug`.
    async fn list_team_members(&self, org: &str, team_slug: &str) -> Result<Vec<String>>;

    async fn upsert_commit_status(
        &self,
        repo: &Repo,
        sha: &str,
        status: &CommitStatus,
    ) -> Result<()>;

    async fn list_labels(&self, pr: &PullRequestRef) -> Result<Vec<String>>;

    /// Adding a label that is already present is a no-op.
    async fn add_label(&self, pr: &PullRequestRef, label: &str) -> Result<()>;

    /// Fails when the label is absent; callers must check first.
    async fn remove_label(&self, pr: &PullRequestRef, label: &str) -> Result<()>;

    async fn list_changed_files(&self, pr: &PullRequestRef) -> Result<Vec<String>>;
}
