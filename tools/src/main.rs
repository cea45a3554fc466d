//! traffic-sim: synthetic experiment traffic for a feature flag.
//!
//! Usage:
//!   traffic-sim --sdk-key sdk-123 --num-records 500 --treatment-prob 0.4
//!   FLAG_SDK_KEY=sdk-123 traffic-sim --target-attribute tier --target-value Gold
//!   traffic-sim --sdk-key sdk-123 --profile demographic --flags-file flags.json

use anyhow::{Context, Result};
use clap::Parser;
use flagsim_core::{
    attributes::{AttributeSchema, UserGenerator},
    config::{self, SimulationConfig},
    error::SimError,
    events::LogEventSink,
    flag::{FlagOracle, FlagValue},
    logging::{self, LogSettings, LoggingContext},
    oracle::{FlagDefinition, RolloutOracle},
    policy::{self, TargetingRule},
    rng::{RngBank, StreamSlot},
    simulation::{RunSummary, Simulation},
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "traffic-sim")]
#[command(about = "Simulate user traffic against a feature flag and emit tracking events")]
#[command(version)]
struct Cli {
    /// SDK credential for the flag service
    #[arg(long, env = "FLAG_SDK_KEY", hide_env_values = true)]
    sdk_key: Option<String>,

    /// Flag to evaluate for every simulated user
    #[arg(long, default_value = config::DEFAULT_FLAG_KEY)]
    flag_key: String,

    /// Number of records to generate
    #[arg(long, default_value_t = config::DEFAULT_NUM_RECORDS)]
    num_records: u64,

    /// Tracking probability for users in the control arm
    #[arg(long, default_value_t = config::DEFAULT_CONTROL_PROB)]
    control_prob: f64,

    /// Tracking probability for users in the treatment arm
    #[arg(long, default_value_t = config::DEFAULT_TREATMENT_PROB)]
    treatment_prob: f64,

    /// Delay between records in seconds
    #[arg(long, default_value_t = 0.05)]
    delay: f64,

    /// Log file path
    #[arg(long, default_value = logging::DEFAULT_LOG_FILE)]
    log_file: PathBuf,

    /// Rotate the log file once it reaches this many bytes (0 disables)
    #[arg(long, default_value_t = logging::DEFAULT_MAX_BYTES)]
    log_max_bytes: u64,

    /// Number of rotated log files to keep
    #[arg(long, default_value_t = logging::DEFAULT_BACKUPS)]
    log_backups: usize,

    /// Run name stamped on every log line
    #[arg(long, default_value = logging::DEFAULT_RUN_NAME)]
    run_name: String,

    /// Evaluate flags without sending any tracking events
    #[arg(long)]
    no_tracking: bool,

    /// Name of the metric event (default: flag-<flag-key>-evaluation)
    #[arg(long)]
    metric_name: Option<String>,

    /// Extra conversion event sent with every tracked record (repeatable)
    #[arg(long = "extra-event")]
    extra_events: Vec<String>,

    /// User attribute to boost tracking probability for
    #[arg(long)]
    target_attribute: Option<String>,

    /// Value of the target attribute that receives the boost
    #[arg(long)]
    target_value: Option<String>,

    /// Multiplier applied to the base probability on a targeting match
    #[arg(long, default_value_t = policy::DEFAULT_BOOST_FACTOR)]
    boost_factor: f64,

    /// Built-in attribute profile: commerce or demographic
    #[arg(long, default_value = "commerce")]
    profile: String,

    /// JSON attribute schema; overrides --profile
    #[arg(long)]
    schema_file: Option<PathBuf>,

    /// JSON flag definitions; defaults to a boolean experiment on --flag-key
    #[arg(long)]
    flags_file: Option<PathBuf>,

    /// Share of users placed in treatment by the built-in experiment
    #[arg(long, default_value_t = 0.5)]
    rollout: f64,

    /// Value served when a flag evaluation fails
    #[arg(long, default_value = "false")]
    default_value: FlagValue,

    /// Fraction of evaluations that fail transiently and serve the default
    #[arg(long, default_value_t = 0.0)]
    fault_rate: f64,

    /// Master seed; a random seed is drawn and logged when omitted
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let logging = match LoggingContext::install(LogSettings {
        run_name: cli.run_name.clone(),
        file: cli.log_file.clone(),
        max_bytes: cli.log_max_bytes,
        backups: cli.log_backups,
        ..LogSettings::default()
    }) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Cannot set up logging at {}: {e}", cli.log_file.display());
            return ExitCode::from(1);
        }
    };
    log::info!("Starting {}", cli.run_name);

    match run(cli, &logging) {
        Ok(summary) => {
            log::debug!("summary: {}", serde_json::to_string(&summary).unwrap_or_default());
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Fatal error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli, logging: &LoggingContext) -> Result<RunSummary> {
    // Configuration errors first: nothing runs until these pass.
    let targeting = TargetingRule::from_parts(
        cli.target_attribute.as_deref(),
        cli.target_value.as_deref(),
        cli.boost_factor,
    )?;
    let sdk_key = cli
        .sdk_key
        .filter(|k| !k.trim().is_empty())
        .ok_or(SimError::MissingCredential)?;
    let delay = Duration::try_from_secs_f64(cli.delay)
        .with_context(|| format!("invalid --delay {}", cli.delay))?;

    let schema = match &cli.schema_file {
        Some(path) => AttributeSchema::load(path)?,
        None => AttributeSchema::profile(&cli.profile)?,
    };
    if let Some(rule) = &targeting {
        if schema.find(&rule.attribute).is_none() {
            log::warn!(
                "target attribute '{}' is not in the schema; no record will be boosted",
                rule.attribute
            );
        }
    }

    let config = SimulationConfig {
        num_records: cli.num_records,
        control_prob: cli.control_prob,
        treatment_prob: cli.treatment_prob,
        delay,
        tracking_enabled: !cli.no_tracking,
        metric_name: cli.metric_name,
        metric_attribute: schema.metric_attribute.clone(),
        extra_events: cli.extra_events,
        default_value: cli.default_value,
        seed: cli.seed,
        ..SimulationConfig::new(cli.flag_key)
    }
    .with_targeting(targeting)
    .validated()?;

    let bank = config.seed.map(RngBank::new).unwrap_or_else(RngBank::from_entropy);

    let mut oracle = match &cli.flags_file {
        Some(path) => RolloutOracle::load(sdk_key, path)?,
        None => RolloutOracle::new(
            sdk_key,
            vec![FlagDefinition::experiment(&config.flag_key, cli.rollout)],
        )?,
    };
    if cli.fault_rate > 0.0 {
        oracle = oracle.with_fault_injection(cli.fault_rate, bank.for_slot(StreamSlot::OracleFaults));
    }
    if oracle.flag(&config.flag_key).is_none() {
        log::warn!(
            "flag '{}' is not defined; every record will receive the default {}",
            config.flag_key,
            config.default_value
        );
    }
    if !oracle.is_ready() {
        return Err(anyhow::anyhow!("Flag client failed to initialize"));
    }

    let generator = UserGenerator::new(schema, bank.for_slot(StreamSlot::Attributes))?;
    let mut sink = LogEventSink::new();
    log::info!("Logging to {}", logging.file().display());

    let simulation = Simulation::new(
        config,
        bank.master_seed(),
        generator,
        bank.for_slot(StreamSlot::Tracking),
        &mut oracle,
        &mut sink,
        logging.reporter(),
    );
    let summary = simulation.run()?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("traffic-sim").chain(args.iter().copied()))
            .expect("arguments should parse")
    }

    #[test]
    fn defaults_match_documented_values() {
        let cli = parse(&["--sdk-key", "sdk-test"]);
        assert_eq!(cli.num_records, 100);
        assert_eq!(cli.control_prob, 0.3);
        assert_eq!(cli.treatment_prob, 0.35);
        assert_eq!(cli.delay, 0.05);
        assert_eq!(cli.flag_key, "show-sponsored-product");
        assert_eq!(cli.default_value, FlagValue::Bool(false));
        assert!(!cli.no_tracking);
    }

    #[test]
    fn half_a_targeting_pair_is_rejected_before_any_work() {
        let dir = std::env::temp_dir().join(format!("traffic-sim-cli-{}", std::process::id()));
        let cli = parse(&[
            "--sdk-key",
            "sdk-test",
            "--target-attribute",
            "tier",
            "--delay",
            "0",
        ]);
        let ctx = LoggingContext::install(LogSettings {
            file: dir.join("cli.log"),
            console: false,
            ..LogSettings::default()
        })
        .expect("only this test installs the logger");
        let err = run(cli, &ctx).expect_err("incomplete targeting must fail");
        assert!(matches!(
            err.downcast_ref::<SimError>(),
            Some(SimError::IncompleteTargeting)
        ));
    }
}
