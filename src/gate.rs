use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::{
    event::PullRequestEvent,
    scope::SchemaScope,
    types::{
        CommitState, CommitStatus, Forge, GateReport, PullRequestRef, Repo, Review, ReviewState,
        Verdict,
    },
};

pub const DEFAULT_CONTEXT: &str = "GraphQL Review";
pub const DEFAULT_TEAM: &str = "tooling";
pub const DEFAULT_LABEL: &str = "graphql-review-required";
pub const NO_CHANGES_DESCRIPTION: &str = "No GraphQL changes detected";

// GitHub rejects longer commit status descriptions.
const MAX_DESCRIPTION_LEN: usize = 140;

/// How multiple reviews from the same author are interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ReviewPolicy {
    /// Any approval from a team member counts, even if the same member
    /// later requested changes.
    #[default]
    AnyApproval,
    /// Only each author's most recent approving, change-requesting or
    /// dismissed review counts.
    LatestPerAuthor,
}

/// Settings for a gate run.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Organisation owning the team; defaults to the repository owner.
    pub org: Option<String>,
    pub team: String,
    pub label: String,
    pub context: String,
    pub review_policy: ReviewPolicy,
    pub scope: SchemaScope,
    pub target_url: Option<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            org: None,
            team: DEFAULT_TEAM.to_string(),
            label: DEFAULT_LABEL.to_string(),
            context: DEFAULT_CONTEXT.to_string(),
            review_policy: ReviewPolicy::default(),
            scope: SchemaScope::default(),
            target_url: None,
        }
    }
}

impl GateConfig {
    pub fn org_for<'a>(&'a self, repo: &'a Repo) -> &'a str {
        self.org.as_deref().unwrap_or(repo.owner())
    }
}

/// Everything a gate run needs: the hosting platform, the triggering event
/// and the settings.
pub struct ExecutionContext<'a, F: ?Sized> {
    pub forge: &'a F,
    pub event: &'a PullRequestEvent,
    pub config: &'a GateConfig,
}

impl<'a, F: Forge + ?Sized> ExecutionContext<'a, F> {
    pub fn new(forge: &'a F, event: &'a PullRequestEvent, config: &'a GateConfig) -> Self {
        Self {
            forge,
            event,
            config,
        }
    }

    fn pull_request(&self) -> &PullRequestRef {
        &self.event.pull_request
    }
}

/// Decides whether `reviews` contain an approval from a member of `roster`.
///
/// Logins are compared ASCII case-insensitively, matching how GitHub treats
/// them. Reviews from deleted accounts never count.
pub fn compute_verdict(reviews: &[Review], roster: &[String], policy: ReviewPolicy) -> Verdict {
    let is_member = |login: &str| roster.iter().any(|m| m.eq_ignore_ascii_case(login));

    let counted: Vec<&Review> = match policy {
        ReviewPolicy::AnyApproval => reviews.iter().collect(),
        ReviewPolicy::LatestPerAuthor => latest_decisive_reviews(reviews),
    };

    counted
        .into_iter()
        .filter(|r| r.state == ReviewState::Approved)
        .filter_map(|r| r.author.as_deref())
        .find(|&author| is_member(author))
        .map_or(Verdict::Denied, |reviewer| Verdict::Approved {
            reviewer: reviewer.to_string(),
        })
}

/// Keeps the latest decisive review per author, ordered by submission time
/// with ties going to the later entry in the list.
fn latest_decisive_reviews(reviews: &[Review]) -> Vec<&Review> {
    let mut latest: Vec<&Review> = Vec::new();

    for review in reviews.iter().filter(|r| r.state.is_decisive()) {
        let Some(author) = review.author.as_deref() else {
            continue;
        };

        let existing = latest.iter_mut().find(|r| {
            r.author
                .as_deref()
                .is_some_and(|a| a.eq_ignore_ascii_case(author))
        });

        match existing {
            Some(slot) => {
                if review.submitted_at >= slot.submitted_at {
                    *slot = review;
                }
            }
            None => latest.push(review),
        }
    }

    latest
}

fn truncate_description(description: String) -> String {
    if description.chars().count() <= MAX_DESCRIPTION_LEN {
        return description;
    }
    let mut truncated: String = description.chars().take(MAX_DESCRIPTION_LEN - 1).collect();
    truncated.push('…');
    truncated
}

/// Builds the commit status that reflects `verdict`.
pub fn status_for(verdict: &Verdict, config: &GateConfig) -> CommitStatus {
    let (state, description) = match verdict {
        Verdict::Approved { reviewer } => (
            CommitState::Success,
            format!("Approved by {} from the {} team", reviewer, config.team),
        ),
        Verdict::NoChanges => (CommitState::Success, NO_CHANGES_DESCRIPTION.to_string()),
        Verdict::Denied => (
            CommitState::Failure,
            format!("Requires approval from the {} team", config.team),
        ),
    };

    CommitStatus {
        context: config.context.clone(),
        state,
        description: truncate_description(description),
        target_url: config.target_url.clone(),
    }
}

/// Evaluates reviews against the authorizing team and makes the commit
/// status and gating label agree with the result.
///
/// A denial is a successful run: the returned report carries
/// [`Verdict::Denied`]. Only platform failures produce an `Err`.
#[tracing::instrument(skip_all, fields(pr = %ctx.event.pull_request, sha = %ctx.event.head_sha))]
pub async fn evaluate_and_reconcile<F>(ctx: &ExecutionContext<'_, F>) -> Result<GateReport>
where
    F: Forge + ?Sized,
{
    let pr = ctx.pull_request();
    let org = ctx.config.org_for(pr.repo());
    let team = ctx.config.team.as_str();

    let (reviews, roster) = futures::try_join!(
        async {
            ctx.forge
                .list_reviews(pr)
                .await
                .with_context(|| format!("Failed to list reviews for {}", pr))
        },
        async {
            ctx.forge
                .list_team_members(org, team)
                .await
                .with_context(|| format!("Failed to list members of team {}/{}", org, team))
        },
    )?;

    debug!(
        reviews = reviews.len(),
        members = roster.len(),
        "Fetched reviews and team roster"
    );

    if roster.is_empty() {
        anyhow::bail!(
            "Team {}/{} has no members; nobody could satisfy the gate",
            org,
            team
        );
    }

    let verdict = compute_verdict(&reviews, &roster, ctx.config.review_policy);
    match &verdict {
        Verdict::Approved { reviewer } => info!(%reviewer, "Approved by team member"),
        _ => info!(team, "No approval from team member"),
    }

    reconcile(ctx, verdict).await
}

/// Marks the gate as passed for a change that touches nothing in scope.
#[tracing::instrument(skip_all, fields(pr = %ctx.event.pull_request, sha = %ctx.event.head_sha))]
pub async fn clear_gate_for_noop<F>(ctx: &ExecutionContext<'_, F>) -> Result<GateReport>
where
    F: Forge + ?Sized,
{
    info!("No gated files changed");
    reconcile(ctx, Verdict::NoChanges).await
}

/// Runs the no-op path when no changed file is in scope, and evaluates
/// reviews otherwise.
pub async fn run_gate<F>(ctx: &ExecutionContext<'_, F>) -> Result<GateReport>
where
    F: Forge + ?Sized,
{
    let pr = ctx.pull_request();
    let files = ctx
        .forge
        .list_changed_files(pr)
        .await
        .with_context(|| format!("Failed to list changed files for {}", pr))?;

    match ctx.config.scope.first_match(&files) {
        Some(path) => {
            debug!(path, changed = files.len(), "Gated file changed");
            evaluate_and_reconcile(ctx).await
        }
        None => clear_gate_for_noop(ctx).await,
    }
}

async fn reconcile<F>(ctx: &ExecutionContext<'_, F>, verdict: Verdict) -> Result<GateReport>
where
    F: Forge + ?Sized,
{
    let pr = ctx.pull_request();
    let label = ctx.config.label.as_str();
    let status = status_for(&verdict, ctx.config);

    ctx.forge
        .upsert_commit_status(pr.repo(), &ctx.event.head_sha, &status)
        .await
        .with_context(|| {
            format!(
                "Failed to set '{}' status on {}@{}",
                status.context, pr, ctx.event.head_sha
            )
        })?;
    info!(context = %status.context, state = %status.state, "Updated commit status");

    let mut label_added = false;
    let mut label_removed = false;

    if verdict.is_approved() {
        label_removed = remove_label_if_present(ctx.forge, pr, label).await?;
    } else {
        ctx.forge
            .add_label(pr, label)
            .await
            .with_context(|| format!("Failed to add label '{}' to {}", label, pr))?;
        label_added = true;
        info!(label, "Applied gating label");
    }

    Ok(GateReport {
        verdict,
        status,
        label_added,
        label_removed,
    })
}

async fn remove_label_if_present<F>(forge: &F, pr: &PullRequestRef, label: &str) -> Result<bool>
where
    F: Forge + ?Sized,
{
    let labels = forge
        .list_labels(pr)
        .await
        .with_context(|| format!("Failed to list labels on {}", pr))?;

    // Label names are case-insensitive on the platform; remove it under the
    // name it is listed with.
    let Some(existing) = labels.iter().find(|l| l.eq_ignore_ascii_case(label)) else {
        debug!(label, "Gating label already absent");
        return Ok(false);
    };

    forge
        .remove_label(pr, existing)
        .await
        .with_context(|| format!("Failed to remove label '{}' from {}", existing, pr))?;
    info!(label = %existing, "Removed gating label");

    Ok(true)
}
