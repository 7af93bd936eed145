use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use graphql_review_gate::{
    CommitState, CommitStatus, ExecutionContext, Forge, GateConfig, PullRequestEvent,
    PullRequestRef, Repo, Review, ReviewPolicy, ReviewState, SchemaScope, Verdict,
    clear_gate_for_noop, evaluate_and_reconcile, run_gate,
};

const SHA: &str = "2adb30a27442c0ffee2adb30a27442c0ffee2adb";

/// A write issued against the fake hosting platform.
#[derive(Debug, Clone, PartialEq)]
enum Call {
    UpsertStatus {
        sha: String,
        state: CommitState,
        description: String,
    },
    AddLabel(String),
    RemoveLabel(String),
}

#[derive(Default)]
struct State {
    labels: Vec<String>,
    statuses: Vec<(String, CommitStatus)>,
    calls: Vec<Call>,
    list_label_calls: usize,
}

/// In-memory hosting platform that records every write.
struct MockHub {
    reviews: Vec<Review>,
    roster: Vec<String>,
    changed_files: Vec<String>,
    fail_reviews: bool,
    fail_status: bool,
    fail_add_label: bool,
    state: Mutex<State>,
}

impl MockHub {
    fn new(reviews: Vec<Review>, roster: &[&str]) -> Self {
        Self {
            reviews,
            roster: roster.iter().map(|m| m.to_string()).collect(),
            changed_files: vec!["schema/teams.graphqls".to_string()],
            fail_reviews: false,
            fail_status: false,
            fail_add_label: false,
            state: Mutex::new(State::default()),
        }
    }

    fn with_labels(self, labels: &[&str]) -> Self {
        self.state.lock().unwrap().labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    fn with_changed_files(mut self, files: &[&str]) -> Self {
        self.changed_files = files.iter().map(|f| f.to_string()).collect();
        self
    }

    fn failing_reviews(mut self) -> Self {
        self.fail_reviews = true;
        self
    }

    fn failing_status(mut self) -> Self {
        self.fail_status = true;
        self
    }

    fn failing_add_label(mut self) -> Self {
        self.fail_add_label = true;
        self
    }

    fn has_label(&self, label: &str) -> bool {
        self.state.lock().unwrap().labels.iter().any(|l| l == label)
    }

    /// The status currently shown for `context` on the head commit.
    fn current_status(&self, context: &str) -> Option<CommitStatus> {
        self.state
            .lock()
            .unwrap()
            .statuses
            .iter()
            .find(|(sha, s)| sha == SHA && s.context == context)
            .map(|(_, s)| s.clone())
    }

    fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    fn remove_label_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::RemoveLabel(_)))
            .count()
    }
}

#[async_trait]
impl Forge for MockHub {
    async fn list_reviews(&self, _pr: &PullRequestRef) -> Result<Vec<Review>> {
        if self.fail_reviews {
            anyhow::bail!("502 Bad Gateway");
        }
        Ok(self.reviews.clone())
    }

    async fn list_team_members(&self, _org: &str, team_slug: &str) -> Result<Vec<String>> {
        if team_slug != "tooling" {
            anyhow::bail!("404 Not Found");
        }
        Ok(self.roster.clone())
    }

    async fn upsert_commit_status(
        &self,
        _repo: &Repo,
        sha: &str,
        status: &CommitStatus,
    ) -> Result<()> {
        if self.fail_status {
            anyhow::bail!("403 Resource not accessible by integration");
        }
        let mut state = self.state.lock().unwrap();
        state
            .statuses
            .retain(|(s, existing)| !(s == sha && existing.context == status.context));
        state.statuses.push((sha.to_string(), status.clone()));
        state.calls.push(Call::UpsertStatus {
            sha: sha.to_string(),
            state: status.state,
            description: status.description.clone(),
        });
        Ok(())
    }

    async fn list_labels(&self, _pr: &PullRequestRef) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.list_label_calls += 1;
        Ok(state.labels.clone())
    }

    async fn add_label(&self, _pr: &PullRequestRef, label: &str) -> Result<()> {
        if self.fail_add_label {
            anyhow::bail!("403 Resource not accessible by integration");
        }
        let mut state = self.state.lock().unwrap();
        if !state.labels.iter().any(|l| l == label) {
            state.labels.push(label.to_string());
        }
        state.calls.push(Call::AddLabel(label.to_string()));
        Ok(())
    }

    async fn remove_label(&self, _pr: &PullRequestRef, label: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::RemoveLabel(label.to_string()));
        let before = state.labels.len();
        state.labels.retain(|l| l != label);
        if state.labels.len() == before {
            anyhow::bail!("404 Label does not exist");
        }
        Ok(())
    }

    async fn list_changed_files(&self, _pr: &PullRequestRef) -> Result<Vec<String>> {
        Ok(self.changed_files.clone())
    }
}

fn test_event() -> PullRequestEvent {
    PullRequestEvent::new(Repo::new("nais", "api").unwrap(), 42, SHA).unwrap()
}

const LABEL: &str = "graphql-review-required";
const CONTEXT: &str = "GraphQL Review";

fn approved_by(author: &str) -> Vec<Review> {
    vec![Review::new(author, ReviewState::Approved)]
}

async fn evaluate(hub: &MockHub, config: &GateConfig) -> Result<Verdict> {
    let event = test_event();
    let ctx = ExecutionContext::new(hub, &event, config);
    Ok(evaluate_and_reconcile(&ctx).await?.verdict)
}

#[tokio::test]
async fn test_scenario_a_member_approval_passes() {
    let hub = MockHub::new(approved_by("alice"), &["alice"]);
    let hub = hub.with_labels(&[LABEL, "enhancement"]);

    let verdict = evaluate(&hub, &GateConfig::default()).await.unwrap();

    let expected = Verdict::Approved {
        reviewer: "alice".to_string(),
    };
    assert_eq!(verdict, expected);
    let status = hub.current_status(CONTEXT).unwrap();
    assert_eq!(status.state, CommitState::Success);
    assert!(!hub.has_label(LABEL));
    assert!(hub.has_label("enhancement"));
    assert_eq!(hub.remove_label_calls(), 1);
}

#[tokio::test]
async fn test_scenario_b_non_member_approval_fails() {
    let hub = MockHub::new(approved_by("bob"), &["alice"]);

    let verdict = evaluate(&hub, &GateConfig::default()).await.unwrap();

    assert_eq!(verdict, Verdict::Denied);
    let status = hub.current_status(CONTEXT).unwrap();
    assert_eq!(status.state, CommitState::Failure);
    assert_eq!(status.description, "Requires approval from the tooling team");
    assert!(hub.has_label(LABEL));
}

#[tokio::test]
async fn test_scenario_c_no_reviews_fails() {
    let hub = MockHub::new(vec![], &["alice"]);

    let verdict = evaluate(&hub, &GateConfig::default()).await.unwrap();

    assert_eq!(verdict, Verdict::Denied);
    let status = hub.current_status(CONTEXT).unwrap();
    assert_eq!(status.state, CommitState::Failure);
    assert!(hub.has_label(LABEL));
    assert_eq!(hub.remove_label_calls(), 0);
}

#[tokio::test]
async fn test_scenario_d_noop_ignores_reviews() {
    let event = test_event();
    let config = GateConfig::default();

    // Label present: removed once.
    let reviews = vec![Review::new("bob", ReviewState::ChangesRequested)];
    let hub = MockHub::new(reviews, &["alice"]).with_labels(&[LABEL]);
    let ctx = ExecutionContext::new(&hub, &event, &config);
    let report = clear_gate_for_noop(&ctx).await.unwrap();

    assert_eq!(report.verdict, Verdict::NoChanges);
    assert!(report.label_removed);
    let status = hub.current_status(CONTEXT).unwrap();
    assert_eq!(status.state, CommitState::Success);
    assert_eq!(status.description, "No GraphQL changes detected");
    assert!(!hub.has_label(LABEL));
    assert_eq!(hub.remove_label_calls(), 1);

    // Label absent: checked but never removed.
    let hub = MockHub::new(vec![], &["alice"]);
    let ctx = ExecutionContext::new(&hub, &event, &config);
    let report = clear_gate_for_noop(&ctx).await.unwrap();

    assert!(!report.label_removed);
    assert_eq!(hub.remove_label_calls(), 0);
    assert_eq!(hub.state.lock().unwrap().list_label_calls, 1);
}

#[tokio::test]
async fn test_scenario_e_same_author_changes_requested_then_approved() {
    let reviews = vec![
        Review::new("alice", ReviewState::ChangesRequested),
        Review::new("alice", ReviewState::Approved),
    ];

    let hub = MockHub::new(reviews.clone(), &["alice"]);
    let verdict = evaluate(&hub, &GateConfig::default()).await.unwrap();
    assert!(verdict.is_approved());

    let hub = MockHub::new(reviews, &["alice"]);
    let config = GateConfig {
        review_policy: ReviewPolicy::LatestPerAuthor,
        ..GateConfig::default()
    };
    let verdict = evaluate(&hub, &config).await.unwrap();
    assert!(verdict.is_approved());
}

#[tokio::test]
async fn test_approval_then_changes_requested_depends_on_policy() {
    let reviews = vec![
        Review::new("alice", ReviewState::Approved),
        Review::new("alice", ReviewState::ChangesRequested),
    ];

    // Default policy: an earlier approval is never revoked.
    let hub = MockHub::new(reviews.clone(), &["alice"]);
    let verdict = evaluate(&hub, &GateConfig::default()).await.unwrap();
    assert!(verdict.is_approved());
    assert!(!hub.has_label(LABEL));

    let hub = MockHub::new(reviews, &["alice"]);
    let config = GateConfig {
        review_policy: ReviewPolicy::LatestPerAuthor,
        ..GateConfig::default()
    };
    let verdict = evaluate(&hub, &config).await.unwrap();
    assert_eq!(verdict, Verdict::Denied);
    assert!(hub.has_label(LABEL));
}

#[tokio::test]
async fn test_repeated_approval_is_idempotent() {
    let hub = MockHub::new(approved_by("alice"), &["alice"]);
    let hub = hub.with_labels(&[LABEL]);
    let config = GateConfig::default();

    evaluate(&hub, &config).await.unwrap();
    let first_status = hub.current_status(CONTEXT);
    assert_eq!(hub.remove_label_calls(), 1);

    evaluate(&hub, &config).await.unwrap();

    assert_eq!(hub.current_status(CONTEXT), first_status);
    assert!(!hub.has_label(LABEL));
    // Second run sees the label already gone and does not try again.
    assert_eq!(hub.remove_label_calls(), 1);
    assert_eq!(hub.state.lock().unwrap().statuses.len(), 1);
}

#[tokio::test]
async fn test_repeated_denial_is_idempotent() {
    let hub = MockHub::new(vec![], &["alice"]);
    let config = GateConfig::default();

    evaluate(&hub, &config).await.unwrap();
    evaluate(&hub, &config).await.unwrap();

    let state = hub.state.lock().unwrap();
    assert_eq!(state.labels, vec![LABEL.to_string()]);
    assert_eq!(state.statuses.len(), 1);
    assert_eq!(state.statuses[0].1.state, CommitState::Failure);
    assert!(!state.calls.iter().any(|c| matches!(c, Call::RemoveLabel(_))));
}

#[tokio::test]
async fn test_denial_writes_status_before_label() {
    let hub = MockHub::new(vec![], &["alice"]);

    evaluate(&hub, &GateConfig::default()).await.unwrap();

    assert_eq!(
        hub.calls(),
        vec![
            Call::UpsertStatus {
                sha: SHA.to_string(),
                state: CommitState::Failure,
                description: "Requires approval from the tooling team".to_string(),
            },
            Call::AddLabel(LABEL.to_string()),
        ]
    );
}

#[tokio::test]
async fn test_approval_then_denial_converges() {
    // Approved first, then the approving member leaves the team.
    let hub = MockHub::new(approved_by("alice"), &["alice"]);
    evaluate(&hub, &GateConfig::default()).await.unwrap();
    assert!(!hub.has_label(LABEL));

    let hub = MockHub {
        roster: vec!["carol".to_string()],
        ..hub
    };
    evaluate(&hub, &GateConfig::default()).await.unwrap();

    let status = hub.current_status(CONTEXT).unwrap();
    assert_eq!(status.state, CommitState::Failure);
    assert!(hub.has_label(LABEL));
}

#[tokio::test]
async fn test_api_failure_is_an_error_not_a_denial() {
    let hub = MockHub::new(vec![], &["alice"]).failing_reviews();

    let err = evaluate(&hub, &GateConfig::default()).await.unwrap_err();

    let message = err.to_string();
    assert!(message.contains("Failed to list reviews for nais/api#42"));
    assert!(hub.calls().is_empty());
}

#[tokio::test]
async fn test_missing_team_is_an_error() {
    let hub = MockHub::new(approved_by("alice"), &["alice"]);
    let config = GateConfig {
        team: "nonexistent".to_string(),
        ..GateConfig::default()
    };

    let err = evaluate(&hub, &config).await.unwrap_err();

    let message = err.to_string();
    assert!(message.contains("members of team nais/nonexistent"));
    assert!(hub.calls().is_empty());
}

#[tokio::test]
async fn test_empty_roster_is_an_error() {
    let hub = MockHub::new(approved_by("alice"), &[]);

    let err = evaluate(&hub, &GateConfig::default()).await.unwrap_err();

    assert!(err.to_string().contains("has no members"));
    assert!(hub.calls().is_empty());
}

#[tokio::test]
async fn test_run_gate_without_schema_changes_clears_gate() {
    let files = ["README.md", "internal/graph/teams.resolvers.go"];
    let hub = MockHub::new(vec![], &["alice"]).with_labels(&[LABEL]);
    let hub = hub.with_changed_files(&files);
    let event = test_event();
    let config = GateConfig::default();

    let ctx = ExecutionContext::new(&hub, &event, &config);
    let report = run_gate(&ctx).await.unwrap();

    assert_eq!(report.verdict, Verdict::NoChanges);
    assert!(!hub.has_label(LABEL));
}

#[tokio::test]
async fn test_run_gate_with_schema_changes_evaluates_reviews() {
    let files = ["README.md", "internal/graph/schema/teams.graphqls"];
    let hub = MockHub::new(vec![], &["alice"]).with_changed_files(&files);
    let event = test_event();
    let config = GateConfig::default();

    let ctx = ExecutionContext::new(&hub, &event, &config);
    let report = run_gate(&ctx).await.unwrap();

    assert_eq!(report.verdict, Verdict::Denied);
    assert!(report.label_added);
    assert!(hub.has_label(LABEL));
}

#[tokio::test]
async fn test_run_gate_uses_configured_scope() {
    let files = ["api/openapi.yaml"];
    let hub = MockHub::new(vec![], &["alice"]).with_changed_files(&files);
    let event = test_event();
    let config = GateConfig {
        scope: SchemaScope::new(&[r"openapi\.yaml$"]).unwrap(),
        ..GateConfig::default()
    };

    let ctx = ExecutionContext::new(&hub, &event, &config);
    let report = run_gate(&ctx).await.unwrap();

    assert_eq!(report.verdict, Verdict::Denied);
}

#[tokio::test]
async fn test_custom_label_context_and_target_url() {
    let hub = MockHub::new(vec![], &["alice"]);
    let config = GateConfig {
        label: "needs-api-review".to_string(),
        context: "API Review".to_string(),
        target_url: Some("https://github.com/nais/api/actions/runs/1".to_string()),
        ..GateConfig::default()
    };

    evaluate(&hub, &config).await.unwrap();

    assert!(hub.has_label("needs-api-review"));
    assert!(!hub.has_label(LABEL));
    let status = hub.current_status("API Review").unwrap();
    let target_url = status.target_url.unwrap();
    assert_eq!(target_url, "https://github.com/nais/api/actions/runs/1");
    assert!(hub.current_status(CONTEXT).is_none());
}

#[tokio::test]
async fn test_label_with_different_case_is_removed() {
    let hub = MockHub::new(approved_by("alice"), &["alice"]);
    let hub = hub.with_labels(&["GraphQL-Review-Required", "enhancement"]);

    let verdict = evaluate(&hub, &GateConfig::default()).await.unwrap();

    assert!(verdict.is_approved());
    assert!(!hub.has_label("GraphQL-Review-Required"));
    assert!(hub.has_label("enhancement"));
    let removed = Call::RemoveLabel("GraphQL-Review-Required".to_string());
    assert_eq!(hub.calls().last(), Some(&removed));
    assert_eq!(hub.remove_label_calls(), 1);
}

#[tokio::test]
async fn test_status_failure_stops_before_label_write() {
    let hub = MockHub::new(vec![], &["alice"]).failing_status();

    let err = evaluate(&hub, &GateConfig::default()).await.unwrap_err();

    let message = err.to_string();
    assert!(message.contains("Failed to set 'GraphQL Review' status"));
    assert!(hub.calls().is_empty());
    assert!(!hub.has_label(LABEL));
    assert_eq!(hub.state.lock().unwrap().list_label_calls, 0);
}

#[tokio::test]
async fn test_status_failure_on_approval_leaves_label() {
    let hub = MockHub::new(approved_by("alice"), &["alice"]);
    let hub = hub.with_labels(&[LABEL]).failing_status();

    let err = evaluate(&hub, &GateConfig::default()).await.unwrap_err();

    assert!(err.to_string().contains("Failed to set"));
    assert!(hub.has_label(LABEL));
    assert_eq!(hub.remove_label_calls(), 0);
}

#[tokio::test]
async fn test_add_label_failure_is_an_error_not_a_denial() {
    let hub = MockHub::new(vec![], &["alice"]).failing_add_label();

    let err = evaluate(&hub, &GateConfig::default()).await.unwrap_err();

    let message = err.to_string();
    assert!(message.contains("Failed to add label"));
    // The status write already landed; the next run converges the label.
    let status = hub.current_status(CONTEXT).unwrap();
    assert_eq!(status.state, CommitState::Failure);
    assert!(!hub.has_label(LABEL));
}
