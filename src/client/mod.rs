//! Remote collaborators: CloudWatch Logs, CloudWatch metrics and EC2.
//!
//! The watchers only see the traits below; [`AwsClient`] is the HTTP
//! implementation used by the binary.

mod aws;
mod signing;

pub use aws::*;
pub use signing::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::metrics::{GetMetricDataRequest, MetricResponse};

/// Client error types.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("remote service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

// --- CloudWatch Logs wire types ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetLogEventsRequest {
    pub log_group_name: String,
    pub log_stream_name: String,
    pub limit: u32,
    pub start_from_head: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetLogEventsResponse {
    #[serde(default)]
    pub events: Vec<RawLogEvent>,
    #[serde(default)]
    pub next_forward_token: Option<String>,
    #[serde(default)]
    pub next_backward_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLogEvent {
    pub message: String,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub ingestion_time: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeLogStreamsRequest {
    pub log_group_name: String,
    pub log_stream_name_prefix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeLogStreamsResponse {
    #[serde(default)]
    pub log_streams: Vec<LogStreamDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStreamDescription {
    pub log_stream_name: String,
    #[serde(default)]
    pub creation_time: Option<i64>,
    #[serde(default)]
    pub last_event_timestamp: Option<i64>,
}

// --- EC2 ---

/// The parts of an EC2 instance the uptime estimation looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDescription {
    /// EC2 state code; 16 and below mean pending or running.
    pub state_code: u16,
    pub launch_time: DateTime<Utc>,
}

impl InstanceDescription {
    pub fn is_active(&self) -> bool {
        self.state_code <= 16
    }
}

// --- Traits ---

pub trait LogClient {
    fn get_log_events(&self, request: &GetLogEventsRequest) -> Result<GetLogEventsResponse, ClientError>;

    fn describe_log_streams(
        &self,
        request: &DescribeLogStreamsRequest,
    ) -> Result<DescribeLogStreamsResponse, ClientError>;
}

pub trait MetricClient {
    /// A non-success HTTP status is reported in the response, not as an error.
    fn get_metric_data(&self, request: &GetMetricDataRequest) -> Result<MetricResponse, ClientError>;
}

pub trait InstanceLookup {
    /// All instances matching `instance_id`.
    fn describe_instances(&self, instance_id: &str) -> Result<Vec<InstanceDescription>, ClientError>;
}

impl<T: LogClient + ?Sized> LogClient for &T {
    fn get_log_events(&self, request: &GetLogEventsRequest) -> Result<GetLogEventsResponse, ClientError> {
        (**self).get_log_events(request)
    }

    fn describe_log_streams(
        &self,
        request: &DescribeLogStreamsRequest,
    ) -> Result<DescribeLogStreamsResponse, ClientError> {
        (**self).describe_log_streams(request)
    }
}

impl<T: MetricClient + ?Sized> MetricClient for &T {
    fn get_metric_data(&self, request: &GetMetricDataRequest) -> Result<MetricResponse, ClientError> {
        (**self).get_metric_data(request)
    }
}

impl<T: InstanceLookup + ?Sized> InstanceLookup for &T {
    fn describe_instances(&self, instance_id: &str) -> Result<Vec<InstanceDescription>, ClientError> {
        (**self).describe_instances(instance_id)
    }
}
