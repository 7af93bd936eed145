use std::process::Command;

use anyhow::{Context, Result};
use async_trait::async_trait;
use octocrab::{
    Octocrab,
    models::{StatusState, pulls::ReviewState as OctoReviewState},
};
use tracing::debug;
use url::Url;

use crate::types::{CommitState, CommitStatus, Forge, PullRequestRef, Repo, Review, ReviewState};

const PAGE_SIZE: u8 = 100;

pub fn get_github_token() -> Result<String> {
    // Actions runners export GITHUB_TOKEN; fall back to the gh CLI for local runs.
    if let Ok(token) = std::env::var("GITHUB_TOKEN") {
        if !token.trim().is_empty() {
            return Ok(token);
        }
    }

    if let Ok(token) = std::env::var("GH_TOKEN") {
        if !token.trim().is_empty() {
            return Ok(token);
        }
    }

    let output = Command::new("gh")
        .args(["auth", "token"])
        .output()
        .context("No GITHUB_TOKEN or GH_TOKEN set and the gh CLI could not be run")?;

    if !output.status.success() {
        anyhow::bail!("Failed to get GitHub token from gh CLI. Please run 'gh auth login' first");
    }

    let token = String::from_utf8(output.stdout)?.trim().to_string();

    if token.is_empty() {
        anyhow::bail!("Empty token returned from gh CLI");
    }

    Ok(token)
}

/// Creates an authenticated GitHub client, optionally against a GitHub
/// Enterprise API root.
pub fn setup_github_client(api_url: Option<&Url>) -> Result<Octocrab> {
    let token = get_github_token().context("Failed to obtain GitHub authentication token")?;
    let mut builder = Octocrab::builder().personal_token(token);

    if let Some(url) = api_url {
        builder = builder
            .base_uri(url.as_str())
            .with_context(|| format!("Invalid GitHub API URL: '{}'", url))?;
    }

    builder.build().context("Failed to create GitHub client")
}

fn convert_review_state(state: &OctoReviewState) -> Result<ReviewState> {
    match state {
        OctoReviewState::Approved => Ok(ReviewState::Approved),
        OctoReviewState::ChangesRequested => Ok(ReviewState::ChangesRequested),
        OctoReviewState::Commented => Ok(ReviewState::Commented),
        OctoReviewState::Pending => Ok(ReviewState::Pending),
        OctoReviewState::Dismissed => Ok(ReviewState::Dismissed),
        unknown => anyhow::bail!("Unknown review state encountered: {:?}", unknown),
    }
}

fn convert_commit_state(state: CommitState) -> StatusState {
    match state {
        CommitState::Success => StatusState::Success,
        CommitState::Failure => StatusState::Failure,
        CommitState::Pending => StatusState::Pending,
    }
}

/// [`Forge`] backed by the GitHub REST API.
pub struct GitHub {
    client: Octocrab,
}

impl GitHub {
    pub fn new(client: Octocrab) -> Self {
        Self { client }
    }

    pub fn from_env(api_url: Option<&Url>) -> Result<Self> {
        Ok(Self::new(setup_github_client(api_url)?))
    }
}

#[async_trait]
impl Forge for GitHub {
    async fn list_reviews(&self, pr: &PullRequestRef) -> Result<Vec<Review>> {
        let first = self
            .client
            .pulls(pr.repo().owner(), pr.repo().name())
            .list_reviews(pr.number())
            .per_page(PAGE_SIZE)
            .send()
            .await?;
        let reviews = self.client.all_pages(first).await?;
        debug!(count = reviews.len(), %pr, "Fetched reviews");

        reviews
            .into_iter()
            .filter_map(|review| {
                // GitHub omits the state only for reviews it cannot classify.
                let state = review.state?;
                Some(convert_review_state(&state).map(|state| Review {
                    author: review.user.map(|u| u.login),
                    state,
                    submitted_at: review.submitted_at,
                }))
            })
            .collect()
    }

    async fn list_team_members(&self, org: &str, team_slug: &str) -> Result<Vec<String>> {
        let first = self
            .client
            .teams(org)
            .members(team_slug)
            .per_page(PAGE_SIZE)
            .send()
            .await?;
        let members = self.client.all_pages(first).await?;
        debug!(count = members.len(), org, team_slug, "Fetched team members");

        Ok(members.into_iter().map(|m| m.login).collect())
    }

    async fn upsert_commit_status(
        &self,
        repo: &Repo,
        sha: &str,
        status: &CommitStatus,
    ) -> Result<()> {
        let repos = self.client.repos(repo.owner(), repo.name());
        let mut request = repos
            .create_status(sha.to_string(), convert_commit_state(status.state))
            .context(status.context.clone())
            .description(status.description.clone());

        if let Some(target) = &status.target_url {
            request = request.target(target.clone());
        }

        request.send().await?;
        Ok(())
    }

    async fn list_labels(&self, pr: &PullRequestRef) -> Result<Vec<String>> {
        let first = self
            .client
            .issues(pr.repo().owner(), pr.repo().name())
            .list_labels_for_issue(pr.number())
            .per_page(PAGE_SIZE)
            .send()
            .await?;
        let labels = self.client.all_pages(first).await?;

        Ok(labels.into_iter().map(|l| l.name).collect())
    }

    async fn add_label(&self, pr: &PullRequestRef, label: &str) -> Result<()> {
        self.client
            .issues(pr.repo().owner(), pr.repo().name())
            .add_labels(pr.number(), &[label.to_string()])
            .await?;
        Ok(())
    }

    async fn remove_label(&self, pr: &PullRequestRef, label: &str) -> Result<()> {
        self.client
            .issues(pr.repo().owner(), pr.repo().name())
            .remove_label(pr.number(), label)
            .await?;
        Ok(())
    }

    async fn list_changed_files(&self, pr: &PullRequestRef) -> Result<Vec<String>> {
        let first = self
            .client
            .pulls(pr.repo().owner(), pr.repo().name())
            .list_files(pr.number())
            .await?;
        let files = self.client.all_pages(first).await?;
        debug!(count = files.len(), %pr, "Fetched changed files");

        Ok(files.into_iter().map(|f| f.filename).collect())
    }
}
