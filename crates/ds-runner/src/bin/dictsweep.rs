use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use ds_optimizer::{ensemble_sweep, LocalTracker, SweepHandle, Tracker};
use ds_runner::{
    parse_override, BuildPolicy, RunCoordinator, Settings, SweepCoordinator, TokioLauncher,
    TrialFailurePolicy,
};
use ds_types::{Configuration, ParamValue};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Drive the dictionary trainer through single runs and hyperparameter sweeps
#[derive(Parser, Debug)]
#[command(name = "dictsweep", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build and train once with the default options
    Run {
        /// Override one option (repeatable)
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_override)]
        set: Vec<(String, ParamValue)>,
    },
    /// Register the ensemble sweep, or resume one, and run trials
    Sweep {
        /// Number of trials to run
        #[arg(long, default_value_t = 15)]
        count: usize,
        /// Resume this sweep instead of registering a new one
        #[arg(long)]
        sweep_id: Option<String>,
        /// Keep going when a trial fails
        #[arg(long)]
        isolate_failures: bool,
        /// Build once for the whole session instead of before every trial
        #[arg(long)]
        build_once: bool,
    },
    /// Show a sweep's progress and best trial
    Status {
        #[arg(long)]
        sweep_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;
    let tracker = LocalTracker::open(settings.identity.clone(), &settings.state_dir)?;

    // Dropping the in-flight command kills its child process.
    tokio::select! {
        outcome = execute(cli.command, &settings, tracker) => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, stopping");
            Err(anyhow!("interrupted"))
        }
    }
}

fn runner(settings: &Settings, policy: BuildPolicy) -> RunCoordinator<TokioLauncher> {
    RunCoordinator::from_settings(TokioLauncher, settings, policy)
}

async fn execute(command: Command, settings: &Settings, mut tracker: LocalTracker) -> Result<()> {
    match command {
        Command::Run { set } => {
            let overrides: Configuration = set.into_iter().collect();
            let result = runner(settings, BuildPolicy::Always)
                .run_once(&mut tracker, &overrides)
                .await?;
            println!("{}", serde_json::to_string(&result)?);
        }
        Command::Sweep {
            count,
            sweep_id,
            isolate_failures,
            build_once,
        } => {
            let policy = if build_once {
                BuildPolicy::OncePerSession
            } else {
                BuildPolicy::Always
            };
            let failure_policy = if isolate_failures {
                TrialFailurePolicy::Isolate
            } else {
                TrialFailurePolicy::Abort
            };
            let mut sweep = SweepCoordinator::new(runner(settings, policy), tracker)
                .with_failure_policy(failure_policy);

            let handle = match sweep_id {
                Some(id) => {
                    let handle = SweepHandle::from(id.as_str());
                    sweep.attach(handle.clone()).await?;
                    handle
                }
                None => sweep.register(&ensemble_sweep()).await?,
            };
            info!(sweep = %handle, "sweep ready");
            println!("sweep: {handle}");

            let summary = sweep.run(Some(count)).await?;
            println!(
                "trials: {} run, {} completed, {} failed ({:?})",
                summary.trials_run, summary.completed, summary.failed, summary.stop
            );
            if let Some(best) = &summary.best {
                println!("best: {} = {}", best.run_name, best.objective);
            }
        }
        Command::Status { sweep_id } => {
            let status = tracker
                .sweep_status(&SweepHandle::from(sweep_id.as_str()))
                .await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }
    Ok(())
}
