//! Metric query and response types.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Unit sent on the wire when no unit filter is configured.
///
/// CloudWatch treats the literal "None" as "no filtering", so it is sent
/// instead of omitting the field.
pub const NO_UNIT_FILTER: &str = "None";

/// Errors raised while normalizing a metric response.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SeriesError {
    #[error("series '{label}' has {timestamps} timestamps but {values} values")]
    LengthMismatch {
        label: String,
        timestamps: usize,
        values: usize,
    },
}

/// A name/value tag scoping a metric to a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

impl Dimension {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.value)
    }
}

impl FromStr for Dimension {
    type Err = String;

    /// Parse a `Name:Value` spec. Only the first colon separates the two.
    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        match spec.split_once(':') {
            Some((name, value)) if !name.is_empty() => Ok(Dimension::new(name, value)),
            _ => Err(format!("expected 'Name:Value', got '{}'", spec)),
        }
    }
}

/// Update dimensions in place by name, appending the ones not present yet.
pub fn upsert_dimensions(dimensions: &mut Vec<Dimension>, updates: impl IntoIterator<Item = Dimension>) {
    for update in updates {
        match dimensions.iter_mut().find(|d| d.name == update.name) {
            Some(existing) => existing.value = update.value,
            None => dimensions.push(update),
        }
    }
}

/// Identifies the single metric a watcher queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSelector {
    pub namespace: String,
    #[serde(rename = "dimensions_list")]
    pub dimensions: Vec<Dimension>,
    pub metric_name: String,
    pub metric_id: String,
    #[serde(default)]
    pub metric_unit: Option<String>,
}

impl MetricSelector {
    /// The unit as sent on the wire.
    pub fn wire_unit(&self) -> String {
        self.metric_unit
            .clone()
            .unwrap_or_else(|| NO_UNIT_FILTER.to_string())
    }

    pub fn dimension_value(&self, name: &str) -> Option<&str> {
        self.dimensions
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.value.as_str())
    }
}

/// A lookback window ending at `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
    pub now: DateTime<Utc>,
}

impl QueryWindow {
    pub fn new(days: u32, hours: u32, minutes: u32) -> Self {
        Self::at(days, hours, minutes, Utc::now())
    }

    pub fn at(days: u32, hours: u32, minutes: u32, now: DateTime<Utc>) -> Self {
        Self {
            days,
            hours,
            minutes,
            now,
        }
    }

    pub fn lookback(&self) -> ChronoDuration {
        ChronoDuration::days(self.days as i64)
            + ChronoDuration::hours(self.hours as i64)
            + ChronoDuration::minutes(self.minutes as i64)
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.now - self.lookback()
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.now
    }

    /// The same window reaching back at least `min_days` days.
    pub fn widened_to_days(&self, min_days: u32) -> Self {
        Self {
            days: self.days.max(min_days),
            ..*self
        }
    }
}

// --- GetMetricData wire types ---

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetMetricDataRequest {
    pub metric_data_queries: Vec<MetricDataQuery>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricDataQuery {
    pub id: String,
    pub metric_stat: MetricStat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricStat {
    pub metric: MetricDescriptor,
    pub period: u32,
    pub stat: String,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricDescriptor {
    pub namespace: String,
    pub metric_name: String,
    pub dimensions: Vec<Dimension>,
}

impl GetMetricDataRequest {
    /// A request for exactly one metric/dimension-set combination.
    pub fn single(selector: &MetricSelector, stat: &str, period: u32, window: &QueryWindow) -> Self {
        Self {
            metric_data_queries: vec![MetricDataQuery {
                id: selector.metric_id.clone(),
                metric_stat: MetricStat {
                    metric: MetricDescriptor {
                        namespace: selector.namespace.clone(),
                        metric_name: selector.metric_name.clone(),
                        dimensions: selector.dimensions.clone(),
                    },
                    period,
                    stat: stat.to_string(),
                    unit: selector.wire_unit(),
                },
            }],
            start_time: window.start_time(),
            end_time: window.end_time(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    #[serde(rename = "HTTPStatusCode")]
    pub http_status_code: u16,
    #[serde(rename = "RequestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// A GetMetricData response.
///
/// The typed fields feed the series handlers. When the response was parsed
/// from a body, `raw` keeps that payload untouched for the response handlers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricResponse {
    #[serde(default)]
    pub metric_data_results: Vec<MetricDataResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<serde_json::Value>,
    #[serde(default)]
    pub response_metadata: ResponseMetadata,
    #[serde(skip)]
    pub raw: Option<serde_json::Value>,
}

impl MetricResponse {
    /// A successful response carrying `results`.
    #[cfg(test)]
    pub fn new(results: Vec<MetricDataResult>) -> Self {
        Self {
            metric_data_results: results,
            response_metadata: ResponseMetadata {
                http_status_code: 200,
                request_id: None,
            },
            ..Default::default()
        }
    }

    /// Parse a GetMetricData body, keeping the payload as received.
    pub fn from_body(body: &str) -> Result<Self, serde_json::Error> {
        let raw: serde_json::Value = serde_json::from_str(body)?;
        let mut response: Self = serde_json::from_value(raw.clone())?;
        response.raw = Some(raw);
        Ok(response)
    }

    /// Pretty JSON of the payload as received, or of the typed view when
    /// there is none (e.g. an error status).
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        match &self.raw {
            Some(raw) => serde_json::to_string_pretty(raw),
            None => serde_json::to_string_pretty(self),
        }
    }

    /// An empty response with the given HTTP status.
    pub fn with_status(status: u16) -> Self {
        Self {
            response_metadata: ResponseMetadata {
                http_status_code: status,
                request_id: None,
            },
            ..Default::default()
        }
    }

    pub fn status_code(&self) -> u16 {
        self.response_metadata.http_status_code
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricDataResult {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, deserialize_with = "deserialize_timestamps")]
    pub timestamps: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub values: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<String>,
}

/// Accepts epoch seconds (integer or fractional) or RFC 3339 strings.
fn deserialize_timestamps<'de, D>(deserializer: D) -> Result<Vec<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<serde_json::Value> = Vec::deserialize(deserializer)?;
    raw.iter()
        .map(|v| parse_timestamp(v).ok_or_else(|| D::Error::custom(format!("invalid timestamp: {}", v))))
        .collect()
}

fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::Number(n) => {
            let secs = n.as_f64()?;
            DateTime::from_timestamp_millis((secs * 1000.0).round() as i64)
        }
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

/// A labelled series of values with one timestamp per value.
///
/// Order is whatever the API returned; nothing here sorts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TimedSeries {
    label: String,
    timestamps: Vec<DateTime<Utc>>,
    values: Vec<f64>,
}

impl TimedSeries {
    pub fn new(
        label: impl Into<String>,
        timestamps: Vec<DateTime<Utc>>,
        values: Vec<f64>,
    ) -> Result<Self, SeriesError> {
        let label = label.into();
        if timestamps.len() != values.len() {
            return Err(SeriesError::LengthMismatch {
                label,
                timestamps: timestamps.len(),
                values: values.len(),
            });
        }
        Ok(Self {
            label,
            timestamps,
            values,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// First timestamp minus last timestamp.
    ///
    /// Negative when the series is in ascending order.
    pub fn timespan(&self) -> Option<ChronoDuration> {
        let first = self.timestamps.first()?;
        let last = self.timestamps.last()?;
        Some(*first - *last)
    }
}

/// Reshape every result of `response` into a [`TimedSeries`], 1:1 and in order.
///
/// Fails on the first result whose timestamps and values disagree in length,
/// without returning any of the series built before it.
pub fn timed_metric_factory(response: &MetricResponse) -> Result<Vec<TimedSeries>, SeriesError> {
    response
        .metric_data_results
        .iter()
        .map(|r| TimedSeries::new(r.label.clone(), r.timestamps.clone(), r.values.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn result(label: &str, timestamps: Vec<DateTime<Utc>>, values: Vec<f64>) -> MetricDataResult {
        MetricDataResult {
            id: "m1".to_string(),
            label: label.to_string(),
            timestamps,
            values,
            status_code: Some("Complete".to_string()),
        }
    }

    #[test]
    fn test_upsert_dimensions() {
        let mut dims = vec![Dimension::new("InstanceId", "i-1")];
        let updates: Vec<Dimension> = ["InstanceId:i-2", "Env:prod"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        upsert_dimensions(&mut dims, updates);
        assert_eq!(
            dims,
            vec![Dimension::new("InstanceId", "i-2"), Dimension::new("Env", "prod")]
        );
    }

    #[test]
    fn test_dimension_parse() {
        let dim: Dimension = "Path:/dev/xvda1:extra".parse().unwrap();
        assert_eq!(dim, Dimension::new("Path", "/dev/xvda1:extra"));
        assert!("NoColon".parse::<Dimension>().is_err());
        assert!(":value".parse::<Dimension>().is_err());
        assert_eq!(Dimension::new("InstanceId", "i-1").to_string(), "InstanceId:i-1");
    }

    #[test]
    fn test_query_window() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let window = QueryWindow::at(1, 2, 30, now);
        assert_eq!(window.end_time(), now);
        assert_eq!(
            window.start_time(),
            Utc.with_ymd_and_hms(2024, 3, 9, 9, 30, 0).unwrap()
        );

        let wide = window.widened_to_days(15);
        assert_eq!(wide.days, 15);
        assert_eq!(wide.hours, 2);
        assert_eq!(QueryWindow::at(20, 0, 0, now).widened_to_days(15).days, 20);
    }

    #[test]
    fn test_request_uses_unit_sentinel() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let mut selector = MetricSelector {
            namespace: "CWAgent".to_string(),
            dimensions: vec![Dimension::new("InstanceId", "i-1")],
            metric_name: "mem_used".to_string(),
            metric_id: "mem".to_string(),
            metric_unit: None,
        };
        let request = GetMetricDataRequest::single(&selector, "Maximum", 60, &QueryWindow::at(1, 0, 0, now));
        let json = serde_json::to_value(&request).unwrap();
        let stat = &json["MetricDataQueries"][0]["MetricStat"];
        assert_eq!(stat["Unit"], "None");
        assert_eq!(stat["Period"], 60);
        assert_eq!(stat["Metric"]["Dimensions"][0]["Name"], "InstanceId");
        assert_eq!(json["EndTime"], now.timestamp());

        selector.metric_unit = Some("Bytes".to_string());
        let request = GetMetricDataRequest::single(&selector, "Maximum", 60, &QueryWindow::at(1, 0, 0, now));
        assert_eq!(request.metric_data_queries[0].metric_stat.unit, "Bytes");
    }

    #[test]
    fn test_response_timestamp_formats() {
        let body = r#"{
            "MetricDataResults": [{
                "Id": "mem",
                "Label": "mem_used",
                "Timestamps": [1710072000, 1710071940.0, "2024-03-10T11:58:00Z"],
                "Values": [1.0, 2.0, 3.0],
                "StatusCode": "Complete"
            }]
        }"#;
        let response: MetricResponse = serde_json::from_str(body).unwrap();
        let series = &response.metric_data_results[0];
        assert_eq!(series.timestamps[0], ts(1710072000));
        assert_eq!(series.timestamps[1], ts(1710071940));
        assert_eq!(series.timestamps[2], ts(1710071880));
        assert_eq!(response.status_code(), 0);
        assert!(!response.is_success());
    }

    #[test]
    fn test_factory_reshapes_results() {
        let response = MetricResponse::new(vec![
            result("mem_used", vec![ts(120), ts(60)], vec![2.0, 1.0]),
            result("cpu", vec![], vec![]),
        ]);
        let series = timed_metric_factory(&response).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].label(), "mem_used");
        assert_eq!(series[0].timestamps(), &[ts(120), ts(60)]);
        assert_eq!(series[0].values(), &[2.0, 1.0]);
        assert!(series[1].is_empty());
    }

    #[test]
    fn test_factory_rejects_length_mismatch() {
        let response = MetricResponse::new(vec![
            result("ok", vec![ts(1)], vec![1.0]),
            result("broken", vec![ts(1), ts(2)], vec![1.0]),
        ]);
        let err = timed_metric_factory(&response).unwrap_err();
        assert_eq!(
            err,
            SeriesError::LengthMismatch {
                label: "broken".to_string(),
                timestamps: 2,
                values: 1,
            }
        );
    }

    #[test]
    fn test_timespan_sign_follows_order() {
        let descending = TimedSeries::new("m", vec![ts(3600), ts(0)], vec![1.0, 2.0]).unwrap();
        assert_eq!(descending.timespan(), Some(ChronoDuration::seconds(3600)));

        let ascending = TimedSeries::new("m", vec![ts(0), ts(3600)], vec![1.0, 2.0]).unwrap();
        assert_eq!(ascending.timespan(), Some(ChronoDuration::seconds(-3600)));

        let empty = TimedSeries::new("m", vec![], vec![]).unwrap();
        assert!(empty.timespan().is_none());
    }

    #[test]
    fn test_series_json_shape() {
        let series = TimedSeries::new("mem_used", vec![ts(0)], vec![5.0]).unwrap();
        let json = serde_json::to_value(&series).unwrap();
        assert_eq!(json["Label"], "mem_used");
        assert_eq!(json["Timestamps"][0], "1970-01-01T00:00:00Z");
        assert_eq!(json["Values"][0], 5.0);
    }
}
