//! GraphQL review gate: keeps a commit status and a blocking label on a pull
//! request in line with whether a member of the authorizing team has
//! approved its GraphQL schema changes.
//!
//! The decision itself is a pure function over the pull request's reviews
//! and the team roster. Everything that touches the hosting platform goes
//! through the [`Forge`] trait, with [`GitHub`] as the production binding.

pub mod cli;
pub mod event;
pub mod gate;
pub mod github;
pub mod scope;
pub mod types;

pub use cli::{EventSource, GateCommand, Invocation, actions_run_url, parse_args};
pub use event::{EventError, PullRequestEvent};
pub use gate::{
    ExecutionContext, GateConfig, ReviewPolicy, clear_gate_for_noop, compute_verdict,
    evaluate_and_reconcile, run_gate, status_for,
};
pub use github::GitHub;
pub use scope::SchemaScope;
pub use types::{
    CommitState, CommitStatus, Forge, GateReport, PullRequestRef, PullRequestRefError, Repo,
    RepoError, Review, ReviewState, Verdict,
};
