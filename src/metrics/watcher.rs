//! Querying one metric and routing the result to handlers.

use std::path::Path;

use chrono::Duration as ChronoDuration;
use thiserror::Error;

use super::handlers::{HandlerArgs, HandlerError, ResponseHandler, SeriesHandler};
use super::models::{
    timed_metric_factory, GetMetricDataRequest, MetricResponse, MetricSelector, QueryWindow, SeriesError,
};
use super::summary::Aggregate;
use crate::client::{ClientError, InstanceDescription, InstanceLookup, MetricClient};

/// Minimum lookback when estimating the uptime of a stopped instance.
///
/// One-minute datapoints are kept for 15 days.
pub const UPTIME_LOOKBACK_DAYS: u32 = 15;
const UPTIME_STAT: &str = "Maximum";
const UPTIME_PERIOD: u32 = 60;

#[derive(Error, Debug)]
pub enum WatcherError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Series(#[from] SeriesError),
    #[error(transparent)]
    Handler(#[from] HandlerError),
    #[error("multiple EC2 instances matched by ID: {0}")]
    AmbiguousInstance(String),
}

/// Statistic, period and lookback of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParams {
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
    pub stat: String,
    pub period: u32,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            days: 1,
            hours: 0,
            minutes: 0,
            stat: "Maximum".to_string(),
            period: 60,
        }
    }
}

impl QueryParams {
    /// The lookback window ending now.
    pub fn window(&self) -> QueryWindow {
        QueryWindow::new(self.days, self.hours, self.minutes)
    }
}

/// Where a handler gets its response from. Exactly one of the two.
#[derive(Debug, Clone, Copy)]
pub enum MetricSource<'a> {
    /// Reuse a response fetched earlier.
    Response(&'a MetricResponse),
    /// Issue a fresh query. The CLI always reuses one response.
    #[cfg_attr(not(test), allow(dead_code))]
    Query(&'a QueryParams),
}

/// Watches a single metric of a single resource.
pub struct MetricWatcher<C> {
    client: C,
    selector: MetricSelector,
}

impl<C: MetricClient> MetricWatcher<C> {
    pub fn new(client: C, selector: MetricSelector) -> Self {
        Self { client, selector }
    }

    pub fn selector(&self) -> &MetricSelector {
        &self.selector
    }

    /// Query the metric over `window`.
    ///
    /// Returns `Ok(None)` when the service answered with a non-success status.
    pub fn query(
        &self,
        window: &QueryWindow,
        stat: &str,
        period: u32,
    ) -> Result<Option<MetricResponse>, ClientError> {
        let dimensions = self
            .selector
            .dimensions
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        tracing::info!(
            "Querying '{}' for dimension ({}) from {} to {}",
            self.selector.metric_name,
            dimensions,
            window.start_time().format("%H:%M:%S"),
            window.end_time().format("%H:%M:%S")
        );

        let request = GetMetricDataRequest::single(&self.selector, stat, period, window);
        let response = self.client.get_metric_data(&request)?;
        if !response.is_success() {
            tracing::error!("Invalid response status code: {}", response.status_code());
            return Ok(None);
        }
        tracing::debug!("Response status code: {}", response.status_code());
        Ok(Some(response))
    }

    pub fn query_ec2_metrics(&self, params: &QueryParams) -> Result<Option<MetricResponse>, ClientError> {
        self.query(&params.window(), &params.stat, params.period)
    }

    /// Resolve `source` and hand the response to `f`. Absent responses are skipped.
    fn with_response<F>(&self, source: MetricSource<'_>, f: F) -> Result<(), WatcherError>
    where
        F: FnOnce(&MetricResponse) -> Result<(), WatcherError>,
    {
        match source {
            MetricSource::Response(response) => f(response),
            MetricSource::Query(params) => match self.query_ec2_metrics(params)? {
                Some(response) => f(&response),
                None => Ok(()),
            },
        }
    }

    /// Run `handler` once for every non-empty series of the response.
    pub fn exec_series_handler(
        &self,
        handler: SeriesHandler,
        source: MetricSource<'_>,
        args: &HandlerArgs,
    ) -> Result<(), WatcherError> {
        tracing::debug!("Executing '{}'", handler.name());
        self.with_response(source, |response| {
            for series in timed_metric_factory(response)? {
                if series.is_empty() {
                    continue;
                }
                handler.handle(&series, args)?;
            }
            Ok(())
        })
    }

    pub fn exec_response_handler(
        &self,
        handler: ResponseHandler,
        source: MetricSource<'_>,
        args: &HandlerArgs,
    ) -> Result<(), WatcherError> {
        tracing::debug!("Executing '{}'", handler.name());
        self.with_response(source, |response| Ok(handler.handle(response, args)?))
    }

    fn file_args(&self, path: &Path) -> HandlerArgs {
        HandlerArgs::to_file(path).with_unit(self.selector.metric_unit.clone())
    }

    fn log_args(&self) -> HandlerArgs {
        HandlerArgs::default().with_unit(self.selector.metric_unit.clone())
    }

    pub fn save_metric_json(&self, path: &Path, source: MetricSource<'_>) -> Result<(), WatcherError> {
        self.exec_series_handler(SeriesHandler::JsonSaver, source, &self.file_args(path))
    }

    pub fn save_metric_csv(&self, path: &Path, source: MetricSource<'_>) -> Result<(), WatcherError> {
        self.exec_series_handler(SeriesHandler::CsvSaver, source, &self.file_args(path))
    }

    pub fn log_metric(&self, source: MetricSource<'_>) -> Result<(), WatcherError> {
        self.exec_series_handler(SeriesHandler::Logger, source, &self.log_args())
    }

    pub fn save_metric_plot(&self, path: &Path, source: MetricSource<'_>) -> Result<(), WatcherError> {
        self.exec_series_handler(SeriesHandler::Plotter, source, &self.file_args(path))
    }

    pub fn log_metric_summary(&self, source: MetricSource<'_>, aggregate: Aggregate) -> Result<(), WatcherError> {
        self.exec_series_handler(SeriesHandler::Summarizer(aggregate), source, &self.log_args())
    }

    pub fn save_response_json(&self, path: &Path, source: MetricSource<'_>) -> Result<(), WatcherError> {
        self.exec_response_handler(ResponseHandler::Saver, source, &HandlerArgs::to_file(path))
    }

    pub fn log_response(&self, source: MetricSource<'_>) -> Result<(), WatcherError> {
        self.exec_response_handler(ResponseHandler::Logger, source, &HandlerArgs::default())
    }

    /// How long the instance has been (or was) running.
    ///
    /// Active instances report the time since launch. For anything else the
    /// run length is estimated from the spread of the metric timestamps over
    /// a window of at least [`UPTIME_LOOKBACK_DAYS`], computed as first minus
    /// last timestamp of the last series. `Ok(None)` means there was no data
    /// to estimate from.
    pub fn get_ec2_uptime<L: InstanceLookup>(
        &self,
        lookup: &L,
        instance_id: &str,
        window: &QueryWindow,
    ) -> Result<Option<ChronoDuration>, WatcherError> {
        if is_ec2_running(lookup, instance_id)? {
            if let Some(instance) = describe_instance(lookup, instance_id)? {
                tracing::info!(
                    "Instance '{}' is still running. Launch time: {}",
                    instance_id,
                    instance.launch_time
                );
                return Ok(Some(window.now - instance.launch_time));
            }
        }

        let widened = window.widened_to_days(UPTIME_LOOKBACK_DAYS);
        tracing::info!(
            "Instance '{}' is not running anymore. Uptime will be estimated based on reported metrics in the last {} days",
            instance_id,
            widened.days
        );

        let span = match self.query(&widened, UPTIME_STAT, UPTIME_PERIOD)? {
            Some(response) => timed_metric_factory(&response)?
                .last()
                .and_then(|series| series.timespan()),
            None => None,
        };
        if span.is_none() {
            tracing::warn!("No metric data found for EC2: {}", instance_id);
        }
        Ok(span)
    }
}

/// The single instance matching `instance_id`, if any.
pub fn describe_instance<L: InstanceLookup>(
    lookup: &L,
    instance_id: &str,
) -> Result<Option<InstanceDescription>, WatcherError> {
    let mut instances = lookup.describe_instances(instance_id)?;
    match instances.len() {
        0 | 1 => Ok(instances.pop()),
        _ => Err(WatcherError::AmbiguousInstance(instance_id.to_string())),
    }
}

/// Whether the instance is pending or running. Unknown instances are not.
pub fn is_ec2_running<L: InstanceLookup>(lookup: &L, instance_id: &str) -> Result<bool, WatcherError> {
    Ok(describe_instance(lookup, instance_id)?.is_some_and(|i| i.is_active()))
}
