use graphql_review_gate::{
    ExecutionContext, GateCommand, GitHub, Verdict, actions_run_url, clear_gate_for_noop,
    evaluate_and_reconcile, parse_args, run_gate,
};
use tracing::{info, warn};

fn handle_clap_help_version(clap_err: &clap::Error) -> ! {
    use clap::error::ErrorKind;
    match clap_err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            print!("{clap_err}");
            std::process::exit(0);
        }
        _ => {
            eprint!("{clap_err}");
            std::process::exit(2);
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let mut invocation = match parse_args(std::env::args()) {
        Ok(result) => result,
        Err(err) => {
            if let Some(clap_err) = err.downcast_ref::<clap::Error>() {
                handle_clap_help_version(clap_err);
            } else {
                return Err(err);
            }
        }
    };

    if invocation.config.target_url.is_none() {
        invocation.config.target_url = actions_run_url(|key| std::env::var(key).ok());
    }

    let event = invocation.event.load()?;
    let github = GitHub::from_env(invocation.api_url.as_ref())?;
    let ctx = ExecutionContext::new(&github, &event, &invocation.config);

    let report = match invocation.command {
        GateCommand::Auto => run_gate(&ctx).await?,
        GateCommand::Evaluate => evaluate_and_reconcile(&ctx).await?,
        GateCommand::NoOp => clear_gate_for_noop(&ctx).await?,
    };

    // A denial is reported through the status and label only; the run
    // itself succeeds.
    match &report.verdict {
        Verdict::Denied => warn!(
            pr = %event.pull_request,
            label = %invocation.config.label,
            "{}",
            report.status.description
        ),
        _ => info!(pr = %event.pull_request, "{}", report.status.description),
    }

    Ok(())
}
