use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use url::Url;

use crate::{
    event::PullRequestEvent,
    gate::{DEFAULT_CONTEXT, DEFAULT_LABEL, DEFAULT_TEAM, GateConfig, ReviewPolicy},
    scope::{DEFAULT_SCHEMA_PATTERN, SchemaScope},
    types::Repo,
};

/// Which gate path to run.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateCommand {
    /// Check changed files first; evaluate reviews only if gated files changed
    #[default]
    Auto,
    /// Evaluate reviews regardless of which files changed
    Evaluate,
    /// Mark the gate as passed because no gated files changed
    NoOp,
}

/// Where the triggering pull request comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum EventSource {
    /// A webhook payload file written by the CI runner.
    Payload(PathBuf),
    /// Pull request given directly on the command line.
    Explicit(PullRequestEvent),
}

impl EventSource {
    pub fn load(self) -> Result<PullRequestEvent> {
        match self {
            EventSource::Payload(path) => PullRequestEvent::from_path(&path),
            EventSource::Explicit(event) => Ok(event),
        }
    }
}

/// A fully validated command line.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub command: GateCommand,
    pub config: GateConfig,
    pub event: EventSource,
    pub api_url: Option<Url>,
}

#[derive(Args, Debug, Clone, Default)]
struct EventArgs {
    /// Webhook payload of the triggering pull request event
    #[arg(
        long,
        env = "GITHUB_EVENT_PATH",
        global = true,
        help_heading = "Event",
        value_name = "FILE"
    )]
    pub event_path: Option<PathBuf>,

    /// Repository of the pull request (instead of a payload)
    #[arg(
        short = 'r',
        long,
        global = true,
        help_heading = "Event",
        value_name = "OWNER/REPO"
    )]
    pub repo: Option<String>,

    /// Pull request number (instead of a payload)
    #[arg(long, global = true, help_heading = "Event", value_name = "NUMBER")]
    pub pr: Option<u64>,

    /// Head commit SHA to attach the status to (instead of a payload)
    #[arg(long, global = true, help_heading = "Event", value_name = "SHA")]
    pub sha: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct GateArgs {
    /// Organisation owning the authorizing team [default: repository owner]
    #[arg(long, env = "REVIEW_GATE_ORG", global = true, help_heading = "Gate")]
    pub org: Option<String>,

    /// Slug of the team whose approval satisfies the gate
    #[arg(
        long,
        env = "REVIEW_GATE_TEAM",
        default_value = DEFAULT_TEAM,
        global = true,
        help_heading = "Gate",
        value_name = "SLUG"
    )]
    pub team: String,

    /// Label applied while the gate is unsatisfied
    #[arg(
        long,
        env = "REVIEW_GATE_LABEL",
        default_value = DEFAULT_LABEL,
        global = true,
        help_heading = "Gate",
        value_name = "NAME"
    )]
    pub label: String,

    /// Commit status context
    #[arg(
        long,
        default_value = DEFAULT_CONTEXT,
        global = true,
        help_heading = "Gate",
        value_name = "NAME"
    )]
    pub context: String,

    /// How repeated reviews from the same author are counted
    #[arg(
        long,
        env = "REVIEW_GATE_POLICY",
        value_enum,
        default_value_t = ReviewPolicy::AnyApproval,
        global = true,
        help_heading = "Gate"
    )]
    pub review_policy: ReviewPolicy,

    /// Regex for changed paths guarded by the gate (can specify multiple)
    #[arg(
        long = "schema-pattern",
        global = true,
        help_heading = "Gate",
        value_name = "REGEX",
        default_values_t = [DEFAULT_SCHEMA_PATTERN.to_string()]
    )]
    pub schema_patterns: Vec<String>,

    /// Link shown on the commit status [default: the Actions run, if known]
    #[arg(
        long,
        env = "REVIEW_GATE_TARGET_URL",
        global = true,
        help_heading = "Gate",
        value_name = "URL"
    )]
    pub target_url: Option<String>,
}

#[derive(Parser, Debug)]
#[command(
    name = "review-gate",
    version,
    about = "Block GraphQL schema changes until a member of the authorizing team approves"
)]
struct CliArgs {
    #[command(subcommand)]
    pub command: Option<GateCommand>,

    #[command(flatten)]
    pub event: EventArgs,

    #[command(flatten)]
    pub gate: GateArgs,

    /// GitHub API root, for GitHub Enterprise
    #[arg(long, env = "GITHUB_API_URL", global = true, value_name = "URL")]
    pub api_url: Option<String>,
}

impl CliArgs {
    pub fn validate(&self) -> Result<()> {
        if self.gate.team.trim().is_empty() {
            anyhow::bail!("--team cannot be empty");
        }
        if self.gate.label.trim().is_empty() {
            anyhow::bail!("--label cannot be empty");
        }
        if self.gate.context.trim().is_empty() {
            anyhow::bail!("--context cannot be empty");
        }
        Ok(())
    }
}

const MISSING_EVENT_SOURCE: &str =
    "No event payload: set GITHUB_EVENT_PATH, pass --event-path, or pass --repo, --pr and --sha";

fn resolve_event_source(args: &EventArgs) -> Result<EventSource> {
    match (&args.repo, args.pr, &args.sha) {
        (Some(repo), Some(pr), Some(sha)) => {
            let repo = Repo::parse(repo)
                .map_err(|e| anyhow::anyhow!("Invalid repository format '{}': {}", repo, e))?;
            let event = PullRequestEvent::new(repo, pr, sha.clone())?;
            Ok(EventSource::Explicit(event))
        }
        (None, None, None) => args
            .event_path
            .clone()
            .map(EventSource::Payload)
            .context(MISSING_EVENT_SOURCE),
        _ => anyhow::bail!("--repo, --pr and --sha must be given together"),
    }
}

/// Builds the link to the current GitHub Actions run from the variables the
/// runner exports.
pub fn actions_run_url<F>(lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let server = lookup("GITHUB_SERVER_URL")?;
    let repository = lookup("GITHUB_REPOSITORY")?;
    let run_id = lookup("GITHUB_RUN_ID")?;
    Some(format!(
        "{}/{}/actions/runs/{}",
        server.trim_end_matches('/'),
        repository,
        run_id
    ))
}

fn build_invocation(cli: CliArgs) -> Result<Invocation> {
    cli.validate()?;

    let event = resolve_event_source(&cli.event)?;

    let api_url = cli
        .api_url
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .map(|u| Url::parse(u).with_context(|| format!("Invalid GitHub API URL: '{}'", u)))
        .transpose()?;

    let scope = SchemaScope::new(&cli.gate.schema_patterns)?;

    let config = GateConfig {
        org: cli.gate.org.filter(|o| !o.trim().is_empty()),
        team: cli.gate.team,
        label: cli.gate.label,
        context: cli.gate.context,
        review_policy: cli.gate.review_policy,
        scope,
        target_url: cli.gate.target_url.filter(|t| !t.trim().is_empty()),
    };

    Ok(Invocation {
        command: cli.command.unwrap_or_default(),
        config,
        event,
        api_url,
    })
}

/// Parses and validates command-line arguments.
///
/// Clap errors (including help and version requests) are returned as
/// `clap::Error` inside the `anyhow::Error` so the caller can choose the
/// exit code.
pub fn parse_args<I, T>(args: I) -> Result<Invocation>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = CliArgs::try_parse_from(args)?;
    build_invocation(cli)
}
