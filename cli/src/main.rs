use anyhow::{bail, Context, Result};
use chamber_rl::cli::{print_configuration, Cli};
use chamber_rl::utils::init_logging;
use chamber_rl::{get_version_string, run_training, TrainOutcome};
use clap::Parser;
use tracing::{debug, info, warn};

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.validate().context("invalid command-line arguments")?;

    let options = cli.load_run_options().context("failed to load the run configuration")?;
    init_logging(options.debug);

    info!("{}", get_version_string());
    print_configuration(&options);
    debug!("Configuration: {}", options.as_dict());

    let outcome = run_training(&options).with_context(|| format!("training run '{}' failed", options.run_id))?;
    match outcome {
        TrainOutcome::Completed { timesteps } => {
            info!("Run '{}' finished after {} steps", options.run_id, timesteps);
            Ok(())
        }
        TrainOutcome::EnvCheckFailed { reason } => {
            warn!("Run '{}' did not train", options.run_id);
            bail!("environment check failed: {}", reason)
        }
    }
}
