//! Consumers of metric responses.
//!
//! Two kinds exist: [`ResponseHandler`]s see the raw response, while
//! [`SeriesHandler`]s are called once per normalized, non-empty series.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::models::{MetricResponse, SeriesError, TimedSeries};
use super::plot::save_line_chart;
use super::summary::{format_timespan, summarize, Aggregate};
use super::units::{convert_mem, is_byte_series, mem_to_str, UnitError};

/// Unit the plotter forces for memory series reported in bytes.
const PLOT_MEMORY_UNIT: &str = "GB";

/// Decimal places used for memory values in tables.
const TABLE_PRECISION: usize = 3;

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
    #[error("{0} requires a target file")]
    MissingTarget(&'static str),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Unit(#[from] UnitError),
    #[error(transparent)]
    Series(#[from] SeriesError),
}

/// Arguments passed to every handler invocation.
#[derive(Debug, Clone, Default)]
pub struct HandlerArgs {
    /// File to write to. Handlers that only log reject a target.
    pub target: Option<PathBuf>,
    /// Unit the metric was queried with.
    pub metric_unit: Option<String>,
}

impl HandlerArgs {
    pub fn to_file(target: impl Into<PathBuf>) -> Self {
        Self {
            target: Some(target.into()),
            metric_unit: None,
        }
    }

    pub fn with_unit(mut self, unit: Option<String>) -> Self {
        self.metric_unit = unit;
        self
    }

    fn require_target(&self, handler: &'static str) -> Result<&Path, HandlerError> {
        self.target.as_deref().ok_or(HandlerError::MissingTarget(handler))
    }
}

/// Handlers operating on the unmodified response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseHandler {
    /// Dump the response at debug level.
    Logger,
    /// Write the response verbatim as JSON.
    Saver,
}

impl ResponseHandler {
    pub fn name(&self) -> &'static str {
        match self {
            ResponseHandler::Logger => "ResponseLogger",
            ResponseHandler::Saver => "ResponseSaver",
        }
    }

    pub fn handle(&self, response: &MetricResponse, args: &HandlerArgs) -> Result<(), HandlerError> {
        match self {
            ResponseHandler::Logger => {
                if args.target.is_some() {
                    return Err(HandlerError::NotImplemented("logging responses to a file"));
                }
                tracing::debug!("{}", response.to_json_pretty()?);
                Ok(())
            }
            ResponseHandler::Saver => {
                let target = args.require_target(self.name())?;
                std::fs::write(target, response.to_json_pretty()?)?;
                tracing::info!("Saved response to: {}", target.display());
                Ok(())
            }
        }
    }
}

/// Handlers operating on one series at a time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeriesHandler {
    JsonSaver,
    CsvSaver,
    /// Print the series as a two-column table.
    Logger,
    Plotter,
    Summarizer(Aggregate),
}

impl SeriesHandler {
    pub fn name(&self) -> &'static str {
        match self {
            SeriesHandler::JsonSaver => "TimedMetricJsonSaver",
            SeriesHandler::CsvSaver => "TimedMetricCsvSaver",
            SeriesHandler::Logger => "TimedMetricLogger",
            SeriesHandler::Plotter => "TimedMetricPlotter",
            SeriesHandler::Summarizer(_) => "TimedMetricSummarizer",
        }
    }

    pub fn handle(&self, series: &TimedSeries, args: &HandlerArgs) -> Result<(), HandlerError> {
        match self {
            SeriesHandler::JsonSaver => {
                let target = args.require_target(self.name())?;
                write_json(target, series)?;
                tracing::info!("Saved '{}' data to: {}", series.label(), target.display());
            }
            SeriesHandler::CsvSaver => {
                let target = args.require_target(self.name())?;
                write_csv(target, series)?;
                tracing::info!("Saved '{}' data to: {}", series.label(), target.display());
            }
            SeriesHandler::Logger => {
                if args.target.is_some() {
                    return Err(HandlerError::NotImplemented("logging tables to a file"));
                }
                tracing::info!("\n{}", render_table(series, args.metric_unit.as_deref()));
            }
            SeriesHandler::Plotter => {
                let target = args.require_target(self.name())?;
                plot(series, args.metric_unit.as_deref(), target)?;
            }
            SeriesHandler::Summarizer(aggregate) => {
                if args.target.is_some() {
                    return Err(HandlerError::NotImplemented("writing summaries to a file"));
                }
                log_summary(series, *aggregate, args.metric_unit.as_deref());
            }
        }
        Ok(())
    }
}

fn write_json<T: serde::Serialize>(target: &Path, value: &T) -> Result<(), HandlerError> {
    let mut writer = BufWriter::new(File::create(target)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

fn write_csv(target: &Path, series: &TimedSeries) -> Result<(), HandlerError> {
    let mut writer = BufWriter::new(File::create(target)?);
    writeln!(writer, "time,value")?;
    for (time, value) in series.timestamps().iter().zip(series.values()) {
        writeln!(writer, "{},{}", time.to_rfc3339(), value)?;
    }
    writer.flush()?;
    Ok(())
}

/// Two-column table of the series. Memory values in bytes are scaled per row.
pub fn render_table(series: &TimedSeries, metric_unit: Option<&str>) -> String {
    let as_memory = is_byte_series(series.label(), metric_unit);
    let rows: Vec<(String, String)> = series
        .timestamps()
        .iter()
        .zip(series.values())
        .map(|(time, &value)| {
            let shown = if as_memory {
                mem_to_str(value, TABLE_PRECISION)
            } else {
                value.to_string()
            };
            (time.format("%H:%M:%S").to_string(), shown)
        })
        .collect();

    let time_header = "Time (UTC)";
    let value_header = "Value";
    let time_width = rows.iter().map(|r| r.0.len()).chain([time_header.len()]).max().unwrap_or(0);
    let value_width = rows.iter().map(|r| r.1.len()).chain([value_header.len()]).max().unwrap_or(0);

    let mut out = String::new();
    out.push_str(&format!("{}\n", series.label()));
    out.push_str(&format!(" {:^tw$} | {:<vw$}\n", time_header, value_header, tw = time_width, vw = value_width));
    out.push_str(&format!("-{}-+-{}-\n", "-".repeat(time_width), "-".repeat(value_width)));
    for (time, value) in &rows {
        out.push_str(&format!(" {:^tw$} | {:<vw$}\n", time, value, tw = time_width, vw = value_width));
    }
    out
}

/// Unit the values of a plot are drawn in.
pub fn plot_unit<'a>(label: &str, metric_unit: Option<&'a str>) -> Option<&'a str> {
    if is_byte_series(label, metric_unit) {
        Some(PLOT_MEMORY_UNIT)
    } else {
        metric_unit
    }
}

fn plot(series: &TimedSeries, metric_unit: Option<&str>, target: &Path) -> Result<(), HandlerError> {
    let unit = plot_unit(series.label(), metric_unit);
    let values = if is_byte_series(series.label(), metric_unit) {
        series
            .values()
            .iter()
            .map(|&v| convert_mem(v, Some(PLOT_MEMORY_UNIT)).map(|(s, _)| s))
            .collect::<Result<Vec<f64>, UnitError>>()?
    } else {
        series.values().to_vec()
    };

    save_line_chart(series, &values, target)?;
    tracing::info!(
        "Saved '{}' plot ({}) to: {}",
        series.label(),
        unit.unwrap_or("no unit"),
        target.display()
    );
    Ok(())
}

fn log_summary(series: &TimedSeries, aggregate: Aggregate, metric_unit: Option<&str>) {
    let Some(summary) = summarize(series, aggregate, metric_unit) else {
        return;
    };
    let timespan = format_timespan(summary.timespan);
    tracing::info!(
        "Retrieved '{}' {} measurements over {} timespan",
        summary.label,
        summary.count,
        timespan
    );
    tracing::info!(
        "{} '{}' is {} over {} timespan",
        summary.aggregate,
        summary.label,
        summary.display_value(),
        timespan
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn mem_series() -> TimedSeries {
        TimedSeries::new("mem_used", vec![ts(120), ts(60), ts(0)], vec![100.0, 200.0, 300.0]).unwrap()
    }

    #[test]
    fn test_table_scales_small_memory_values_in_bytes() {
        let table = render_table(&mem_series(), Some("Bytes"));
        assert!(table.contains("100.000 B"));
        assert!(table.contains("200.000 B"));
        assert!(table.contains("300.000 B"));
        assert!(table.contains("00:02:00"));
        assert!(table.contains("Time (UTC)"));
    }

    #[test]
    fn test_table_scales_each_row_independently() {
        let series = TimedSeries::new("mem_used", vec![ts(0), ts(60)], vec![512.0, 2048.0]).unwrap();
        let table = render_table(&series, Some("Bytes"));
        assert!(table.contains("512.000 B"));
        assert!(table.contains("2.000 KB"));
    }

    #[test]
    fn test_table_leaves_other_metrics_alone() {
        let series = TimedSeries::new("cpu_usage_user", vec![ts(0)], vec![2048.0]).unwrap();
        let table = render_table(&series, Some("Percent"));
        assert!(table.contains("2048"));
        assert!(!table.contains("KB"));
    }

    #[test]
    fn test_table_needs_bytes_unit() {
        let series = TimedSeries::new("mem_used_percent", vec![ts(0), ts(60)], vec![45.0, 40.0]).unwrap();
        let table = render_table(&series, None);
        assert!(table.contains(" 45 "));
        assert!(table.contains(" 40 "));
        assert!(!table.contains(" B"));
    }

    #[test]
    fn test_json_saver() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metric.json");
        SeriesHandler::JsonSaver
            .handle(&mem_series(), &HandlerArgs::to_file(&path))
            .unwrap();

        let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["Label"], "mem_used");
        assert_eq!(saved["Values"], serde_json::json!([100.0, 200.0, 300.0]));
        assert_eq!(saved["Timestamps"][2], "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_csv_saver() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metric.csv");
        SeriesHandler::CsvSaver
            .handle(&mem_series(), &HandlerArgs::to_file(&path))
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "time,value");
        assert_eq!(lines[1], "1970-01-01T00:02:00+00:00,100");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_plotter_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metric.png");
        SeriesHandler::Plotter
            .handle(&mem_series(), &HandlerArgs::to_file(&path).with_unit(Some("Bytes".to_string())))
            .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_plot_unit() {
        assert_eq!(plot_unit("mem_used", Some("Bytes")), Some("GB"));
        assert_eq!(plot_unit("mem_used_percent", None), None);
        assert_eq!(plot_unit("cpu_usage_user", Some("Percent")), Some("Percent"));
    }

    #[test]
    fn test_savers_require_target() {
        let err = SeriesHandler::CsvSaver
            .handle(&mem_series(), &HandlerArgs::default())
            .unwrap_err();
        assert!(matches!(err, HandlerError::MissingTarget(_)));
    }

    #[test]
    fn test_log_handlers_reject_file_targets() {
        let args = HandlerArgs::to_file("out.txt");
        let err = ResponseHandler::Logger
            .handle(&MetricResponse::new(vec![]), &args)
            .unwrap_err();
        assert!(matches!(err, HandlerError::NotImplemented(_)));

        let err = SeriesHandler::Summarizer(Aggregate::Max)
            .handle(&mem_series(), &args)
            .unwrap_err();
        assert!(matches!(err, HandlerError::NotImplemented(_)));

        let err = SeriesHandler::Logger.handle(&mem_series(), &args).unwrap_err();
        assert!(matches!(err, HandlerError::NotImplemented(_)));
    }

    #[test]
    fn test_response_saver_is_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("response.json");
        let body = r#"{
            "MetricDataResults": [{
                "Id": "m",
                "Label": "mem_used",
                "Timestamps": [1710072000],
                "Values": [1.5],
                "StatusCode": "Complete",
                "Messages": [{"Code": "MaxQueryTimeRangeExceed", "Value": "partial"}]
            }],
            "NextToken": "tok-1",
            "Messages": []
        }"#;
        let response = MetricResponse::from_body(body).unwrap();

        ResponseHandler::Saver
            .handle(&response, &HandlerArgs::to_file(&path))
            .unwrap();

        let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let sent: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(saved, sent);
        assert_eq!(saved["MetricDataResults"][0]["Timestamps"][0], 1710072000);
    }

    #[test]
    fn test_response_saver_without_body_writes_typed_view() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("response.json");

        ResponseHandler::Saver
            .handle(&MetricResponse::with_status(503), &HandlerArgs::to_file(&path))
            .unwrap();

        let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["ResponseMetadata"]["HTTPStatusCode"], 503);
    }
}
