//! Command line interface.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use thiserror::Error;

use crate::client::AwsClient;
use crate::config::{AwsSettingsBuilder, ProcessEnv};
use crate::logs::{
    LogFormatter, LogWatcher, DEFAULT_DATE_FORMAT, DEFAULT_EVENTS_LIMIT, DEFAULT_MAX_RETRY_ATTEMPTS,
    DEFAULT_PREFIX_PATTERN, DEFAULT_TEMPLATE,
};
use crate::metrics::{
    plot_unit, Aggregate, Dimension, MetricSelector, MetricSource, MetricWatcher, QueryParams,
};
use crate::preset::MetricWatcherSetup;

pub const DEFAULT_METRIC_NAME: &str = "mem_used";
pub const DEFAULT_METRIC_ID: &str = "provide_metric_id";
pub const DEFAULT_DIMENSION_NAME: &str = "InstanceId";

pub type CliResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}

#[derive(Parser, Debug)]
#[command(name = "cloudwatcher", version)]
#[command(about = "Poll AWS CloudWatch for EC2 metrics and log events", long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Interact with AWS CloudWatch metrics
    Metric(MetricArgs),
    /// Interact with AWS CloudWatch logs
    Log(LogArgs),
}

/// Credentials and region. Unset values fall back to the environment.
#[derive(Args, Clone, Default)]
pub struct AwsArgs {
    /// Region to query (default: $AWS_DEFAULT_REGION or us-east-1)
    #[arg(long)]
    pub aws_region: Option<String>,
    #[arg(long)]
    pub aws_access_key_id: Option<String>,
    #[arg(long)]
    pub aws_secret_access_key: Option<String>,
    #[arg(long)]
    pub aws_session_token: Option<String>,
    /// Send every request to this URL instead of the regional AWS endpoint
    #[arg(long)]
    pub aws_endpoint_url: Option<String>,
}

impl fmt::Debug for AwsArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsArgs")
            .field("aws_region", &self.aws_region)
            .field("aws_access_key_id", &self.aws_access_key_id)
            .field("aws_secret_access_key", &self.aws_secret_access_key.as_ref().map(|_| "***"))
            .field("aws_session_token", &self.aws_session_token.as_ref().map(|_| "***"))
            .field("aws_endpoint_url", &self.aws_endpoint_url)
            .finish()
    }
}

impl AwsArgs {
    /// Override the builder with whatever was passed on the command line.
    pub fn apply(&self, mut builder: AwsSettingsBuilder) -> AwsSettingsBuilder {
        if self.aws_region.is_some() {
            builder = builder.region(self.aws_region.clone());
        }
        if self.aws_access_key_id.is_some() {
            builder = builder.access_key_id(self.aws_access_key_id.clone());
        }
        if self.aws_secret_access_key.is_some() {
            builder = builder.secret_access_key(self.aws_secret_access_key.clone());
        }
        if self.aws_session_token.is_some() {
            builder = builder.session_token(self.aws_session_token.clone());
        }
        if self.aws_endpoint_url.is_some() {
            builder = builder.endpoint_url(self.aws_endpoint_url.clone());
        }
        builder
    }
}

#[derive(Args, Debug, Clone)]
pub struct OutputArgs {
    /// Save the results to files in --dir
    #[arg(long)]
    pub save: bool,
    /// Directory to store the results in
    #[arg(long, default_value = "./")]
    pub dir: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct MetricArgs {
    #[command(flatten)]
    pub aws: AwsArgs,
    #[command(flatten)]
    pub output: OutputArgs,

    /// Path to a query JSON file (not supported yet)
    #[arg(short = 'q', long)]
    pub query_json: Option<PathBuf>,

    /// Name of a built-in preset
    #[arg(long, conflicts_with = "preset_path")]
    pub preset_name: Option<String>,
    /// Path to a preset JSON file
    #[arg(long)]
    pub preset_path: Option<PathBuf>,

    /// Namespace the metric is published in
    #[arg(long, required_unless_present_any = ["preset_name", "preset_path"])]
    pub namespace: Option<String>,
    /// Name of the dimension to filter on
    #[arg(long, default_value = DEFAULT_DIMENSION_NAME)]
    pub dimension_name: String,
    /// Value of the dimension to filter on
    #[arg(long, required_unless_present_any = ["preset_name", "preset_path"])]
    pub dimension_value: Option<String>,
    /// Extra dimensions, upserted by name
    #[arg(long = "dimension", value_name = "NAME:VALUE")]
    pub dimensions: Vec<String>,

    /// Name of the metric (default: mem_used)
    #[arg(short, long)]
    pub metric: Option<String>,
    /// Identifier assigned to the metric data (default: provide_metric_id)
    #[arg(short, long)]
    pub id: Option<String>,
    /// Only return data collected with this unit, e.g. Bytes
    #[arg(short, long)]
    pub unit: Option<String>,

    /// Statistic applied per period
    #[arg(short, long, default_value = "Maximum")]
    pub stat: String,
    /// Granularity of the returned data points, in seconds
    #[arg(short, long, default_value_t = 60)]
    pub period: u32,
    #[arg(long, default_value_t = 1)]
    pub days: u32,
    #[arg(long, default_value_t = 0)]
    pub hours: u32,
    #[arg(long, default_value_t = 0)]
    pub minutes: u32,

    /// Aggregate logged for the series: max, min, mean or pNN
    #[arg(long, default_value = "max")]
    pub summary: Aggregate,
    /// Show the uptime of the instance
    #[arg(long)]
    pub uptime: bool,
    /// Plot the metric data to a PNG file
    #[arg(long)]
    pub plot: bool,
}

impl MetricArgs {
    /// The watcher setup described by the preset and flags.
    pub fn setup(&self) -> Result<MetricWatcherSetup, Box<dyn std::error::Error + Send + Sync>> {
        let preset = match (&self.preset_name, &self.preset_path) {
            (Some(name), _) => Some(MetricWatcherSetup::from_preset(name)?),
            (None, Some(path)) => Some(MetricWatcherSetup::from_json(path)?),
            (None, None) => None,
        };

        let mut setup = match preset {
            Some(mut setup) => {
                tracing::info!("Using preset: {}", self.preset_label());
                if let Some(namespace) = &self.namespace {
                    setup.selector.namespace = namespace.clone();
                }
                if let Some(metric) = &self.metric {
                    setup.selector.metric_name = metric.clone();
                }
                if let Some(id) = &self.id {
                    setup.selector.metric_id = id.clone();
                }
                if self.unit.is_some() {
                    setup.selector.metric_unit = self.unit.clone();
                }
                setup
            }
            None => MetricWatcherSetup::new(MetricSelector {
                namespace: self.namespace.clone().unwrap_or_default(),
                dimensions: Vec::new(),
                metric_name: self.metric.clone().unwrap_or_else(|| DEFAULT_METRIC_NAME.to_string()),
                metric_id: self.id.clone().unwrap_or_else(|| DEFAULT_METRIC_ID.to_string()),
                metric_unit: self.unit.clone(),
            }),
        };

        if let Some(value) = &self.dimension_value {
            crate::metrics::upsert_dimensions(
                &mut setup.selector.dimensions,
                [Dimension::new(self.dimension_name.clone(), value.clone())],
            );
        }
        setup.upsert_dimensions(&self.dimensions)?;
        Ok(setup)
    }

    pub fn query_params(&self) -> QueryParams {
        QueryParams {
            days: self.days,
            hours: self.hours,
            minutes: self.minutes,
            stat: self.stat.clone(),
            period: self.period,
        }
    }

    fn preset_label(&self) -> String {
        match (&self.preset_name, &self.preset_path) {
            (Some(name), _) => name.clone(),
            (None, Some(path)) => path.display().to_string(),
            (None, None) => String::new(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct LogArgs {
    #[command(flatten)]
    pub aws: AwsArgs,
    #[command(flatten)]
    pub output: OutputArgs,

    /// The log group name to read
    #[arg(short = 'g', long)]
    pub log_group_name: String,
    /// The log stream name to read
    #[arg(short = 's', long)]
    pub log_stream_name: String,
    /// Token to resume reading from
    #[arg(short = 't', long)]
    pub start_token: Option<String>,
    /// Events requested per page
    #[arg(long, default_value_t = DEFAULT_EVENTS_LIMIT)]
    pub events_limit: u32,
    /// Retries of an empty page before accepting it
    #[arg(long, default_value_t = DEFAULT_MAX_RETRY_ATTEMPTS)]
    pub max_retry_attempts: u32,
    /// Pause before each empty-page retry, in milliseconds
    #[arg(long, default_value_t = 0)]
    pub retry_delay_ms: u64,

    /// Print each page as it arrives instead of all at once
    #[arg(long)]
    pub stream: bool,
    /// Separator between events of one page with --stream
    #[arg(long, default_value = "\n")]
    pub separator: String,

    /// Regex matching the prefix stripped from each message
    #[arg(long, default_value = DEFAULT_PREFIX_PATTERN)]
    pub prefix_pattern: String,
    /// strftime format of the event time
    #[arg(long, default_value = DEFAULT_DATE_FORMAT)]
    pub date_format: String,
    /// Line template, may use {time} and {message}
    #[arg(long, default_value = DEFAULT_TEMPLATE)]
    pub template: String,
}

pub fn run(cli: Cli) -> CliResult {
    match cli.command {
        Command::Metric(args) => run_metric(&args),
        Command::Log(args) => run_log(&args),
    }
}

pub fn run_metric(args: &MetricArgs) -> CliResult {
    if args.query_json.is_some() {
        return Err(CliError::NotImplemented("querying via JSON").into());
    }

    let setup = args.setup()?;
    ensure_dir(&args.output.dir)?;

    let settings = args.aws.apply(setup.aws_settings_builder()).resolve(&ProcessEnv);
    tracing::debug!("Using {:?}", settings);
    let client = AwsClient::new(settings)?;
    let watcher = MetricWatcher::new(&client, setup.selector);
    let selector = watcher.selector();

    let params = args.query_params();
    let Some(response) = watcher.query_ec2_metrics(&params)? else {
        return Ok(());
    };
    let source = MetricSource::Response(&response);

    watcher.log_response(source)?;
    watcher.log_metric(source)?;
    watcher.log_metric_summary(source, args.summary)?;

    let prefix = file_prefix(selector, &args.dimension_name);
    let metric = sanitize(&selector.metric_name);
    let dir = &args.output.dir;

    if args.output.save {
        watcher.save_metric_json(&dir.join(format!("{}_{}.json", prefix, metric)), source)?;
        watcher.save_metric_csv(&dir.join(format!("{}_{}.csv", prefix, metric)), source)?;
        watcher.save_response_json(&dir.join(format!("{}_response.json", prefix)), source)?;
    }

    if args.plot {
        watcher.save_metric_plot(&dir.join(plot_file_name(&prefix, selector)), source)?;
    }

    if args.uptime {
        match selector.dimension_value(&args.dimension_name) {
            Some(instance_id) => {
                match watcher.get_ec2_uptime(&client, instance_id, &params.window()) {
                    Ok(Some(uptime)) => tracing::info!("Instance uptime is {} seconds", uptime.num_seconds()),
                    Ok(None) => {}
                    Err(e) => tracing::warn!("Failed to get instance uptime ({})", e),
                }
            }
            None => tracing::warn!(
                "Failed to get instance uptime (no '{}' dimension)",
                args.dimension_name
            ),
        }
    }

    Ok(())
}

pub fn run_log(args: &LogArgs) -> CliResult {
    let formatter = LogFormatter::new(&args.prefix_pattern, &args.date_format, &args.template)?;
    let settings = args.aws.apply(AwsSettingsBuilder::new()).resolve(&ProcessEnv);
    let client = AwsClient::new(settings)?;
    let watcher = LogWatcher::new(&client, args.log_group_name.clone(), args.log_stream_name.clone())
        .with_start_token(args.start_token.clone())
        .with_formatter(formatter)
        .with_retry_delay(Duration::from_millis(args.retry_delay_ms));

    if !watcher.check_log_exists() {
        tracing::warn!(
            "Log stream '{}/{}' not found",
            args.log_group_name,
            args.log_stream_name
        );
        return Ok(());
    }

    let token = if args.stream {
        let mut token = None;
        for page in watcher.stream_formatted_logs(args.events_limit, args.max_retry_attempts, &args.separator) {
            let (text, next) = page?;
            if !text.is_empty() {
                println!("{}", text);
            }
            token = next;
        }
        token
    } else {
        let (logs, token) = watcher.return_formatted_logs(args.events_limit, args.max_retry_attempts)?;
        println!("{}", logs);
        token
    };
    if let Some(token) = token {
        tracing::debug!("Next forward token: {}", token);
    }

    if args.output.save {
        ensure_dir(&args.output.dir)?;
        let path = args
            .output
            .dir
            .join(log_file_name(&args.log_group_name, &args.log_stream_name));
        watcher.save_log_file(&path)?;
    }

    Ok(())
}

fn ensure_dir(dir: &Path) -> std::io::Result<()> {
    if !dir.exists() {
        tracing::info!("Creating directory: {}", dir.display());
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Name of the saved log dump. Log group names usually contain slashes.
pub fn log_file_name(group: &str, stream: &str) -> String {
    format!("{}-{}.log", sanitize(group), sanitize(stream))
}

/// The value of the filtered dimension, used to prefix saved metric files.
/// Name of the saved plot. The image has no axis labels, so the unit goes into the name.
fn plot_file_name(prefix: &str, selector: &MetricSelector) -> String {
    let metric = sanitize(&selector.metric_name);
    match plot_unit(&selector.metric_name, selector.metric_unit.as_deref()) {
        Some(unit) => format!("{}_{}_{}.png", prefix, metric, sanitize(unit)),
        None => format!("{}_{}.png", prefix, metric),
    }
}

fn file_prefix(selector: &MetricSelector, dimension_name: &str) -> String {
    selector
        .dimension_value(dimension_name)
        .or_else(|| selector.dimensions.first().map(|d| d.value.as_str()))
        .map(sanitize)
        .unwrap_or_else(|| "metric".to_string())
}

fn sanitize(name: &str) -> String {
    name.trim_start_matches('/').replace('/', "_")
}
