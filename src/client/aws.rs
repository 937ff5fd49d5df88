//! Blocking HTTP client for the AWS endpoints.
//!
//! CloudWatch Logs and CloudWatch metrics are called with the JSON protocol.
//! EC2 only speaks the query protocol, so its XML reply is scanned for the
//! few fields the uptime estimation needs.

use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::signing::{uri_encode, Credentials, RequestSigner};
use super::{
    ClientError, DescribeLogStreamsRequest, DescribeLogStreamsResponse, GetLogEventsRequest,
    GetLogEventsResponse, InstanceDescription, InstanceLookup, LogClient, MetricClient,
};
use crate::config::AwsSettings;
use crate::metrics::{GetMetricDataRequest, MetricResponse};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const LOGS_SERVICE: &str = "logs";
const LOGS_TARGET_PREFIX: &str = "Logs_20140328";
const LOGS_CONTENT_TYPE: &str = "application/x-amz-json-1.1";

const MONITORING_SERVICE: &str = "monitoring";
const MONITORING_TARGET_PREFIX: &str = "GraniteServiceVersion20100801";
const MONITORING_CONTENT_TYPE: &str = "application/x-amz-json-1.0";

const EC2_SERVICE: &str = "ec2";
const EC2_API_VERSION: &str = "2016-11-15";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

/// Implements every remote collaborator over HTTPS.
pub struct AwsClient {
    http: reqwest::blocking::Client,
    settings: AwsSettings,
    credentials: Option<Credentials>,
    timeout: Duration,
}

impl AwsClient {
    pub fn new(settings: AwsSettings) -> Result<Self, ClientError> {
        Self::with_timeout(settings, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(settings: AwsSettings, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))?;

        let credentials = Credentials::from_settings(&settings);
        if credentials.is_none() {
            tracing::debug!("No AWS credentials configured, requests will be unsigned");
        }

        Ok(Self {
            http,
            settings,
            credentials,
            timeout,
        })
    }

    fn endpoint(&self, service: &str) -> String {
        match &self.settings.endpoint_url {
            Some(url) => url.clone(),
            None => format!("https://{}.{}.amazonaws.com", service, self.settings.region),
        }
    }

    /// POST `body` to `service`, signing it when credentials are available.
    ///
    /// Returns the status code, the request id and the response body.
    fn post(
        &self,
        service: &str,
        body: Vec<u8>,
        mut headers: Vec<(String, String)>,
    ) -> Result<(u16, Option<String>, String), ClientError> {
        let url = Url::parse(&self.endpoint(service))
            .map_err(|e| ClientError::Config(format!("invalid endpoint: {}", e)))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(ClientError::Config(format!("endpoint has no host: {}", url))),
        };

        if let Some(credentials) = &self.credentials {
            headers.push(("host".to_string(), host));
            RequestSigner::new(credentials, &self.settings.region, service).sign(
                "POST",
                url.path(),
                "",
                &mut headers,
                &body,
                Utc::now(),
            )?;
        }

        let mut request = self.http.post(url).body(body);
        for (name, value) in &headers {
            // reqwest derives Host from the URL.
            if name != "host" {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        let response = request.send().map_err(|e| {
            if e.is_timeout() {
                ClientError::Timeout(self.timeout)
            } else {
                ClientError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let request_id = response
            .headers()
            .get("x-amzn-requestid")
            .or_else(|| response.headers().get("x-amz-request-id"))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response
            .text()
            .map_err(|e| ClientError::Network(e.to_string()))?;

        Ok((status, request_id, text))
    }

    fn post_json<Req: Serialize>(
        &self,
        service: &str,
        target: String,
        content_type: &str,
        request: &Req,
    ) -> Result<(u16, Option<String>, String), ClientError> {
        let body = serde_json::to_vec(request).map_err(|e| ClientError::Config(e.to_string()))?;
        let headers = vec![
            ("content-type".to_string(), content_type.to_string()),
            ("x-amz-target".to_string(), target),
        ];
        self.post(service, body, headers)
    }

    fn call_logs<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        action: &str,
        request: &Req,
    ) -> Result<Resp, ClientError> {
        let target = format!("{}.{}", LOGS_TARGET_PREFIX, action);
        let (status, _, body) = self.post_json(LOGS_SERVICE, target, LOGS_CONTENT_TYPE, request)?;
        if !(200..300).contains(&status) {
            return Err(ClientError::Status { status, body });
        }
        serde_json::from_str(&body).map_err(|e| ClientError::Decode(e.to_string()))
    }
}

impl LogClient for AwsClient {
    fn get_log_events(&self, request: &GetLogEventsRequest) -> Result<GetLogEventsResponse, ClientError> {
        self.call_logs("GetLogEvents", request)
    }

    fn describe_log_streams(
        &self,
        request: &DescribeLogStreamsRequest,
    ) -> Result<DescribeLogStreamsResponse, ClientError> {
        self.call_logs("DescribeLogStreams", request)
    }
}

impl MetricClient for AwsClient {
    fn get_metric_data(&self, request: &GetMetricDataRequest) -> Result<MetricResponse, ClientError> {
        let target = format!("{}.GetMetricData", MONITORING_TARGET_PREFIX);
        let (status, request_id, body) =
            self.post_json(MONITORING_SERVICE, target, MONITORING_CONTENT_TYPE, request)?;

        if !(200..300).contains(&status) {
            tracing::debug!("GetMetricData failed with {}: {}", status, body);
            let mut response = MetricResponse::with_status(status);
            response.response_metadata.request_id = request_id;
            return Ok(response);
        }

        let mut response = MetricResponse::from_body(&body).map_err(|e| ClientError::Decode(e.to_string()))?;
        response.response_metadata.http_status_code = status;
        response.response_metadata.request_id = request_id;
        Ok(response)
    }
}

impl InstanceLookup for AwsClient {
    fn describe_instances(&self, instance_id: &str) -> Result<Vec<InstanceDescription>, ClientError> {
        let body = format!(
            "Action=DescribeInstances&Version={}&Filter.1.Name=instance-id&Filter.1.Value.1={}",
            EC2_API_VERSION,
            uri_encode(instance_id)
        );
        let headers = vec![("content-type".to_string(), FORM_CONTENT_TYPE.to_string())];
        let (status, _, text) = self.post(EC2_SERVICE, body.into_bytes(), headers)?;
        if !(200..300).contains(&status) {
            return Err(ClientError::Status { status, body: text });
        }
        parse_describe_instances(&text)
    }
}

/// Pull state codes and launch times out of a DescribeInstances reply.
pub fn parse_describe_instances(xml: &str) -> Result<Vec<InstanceDescription>, ClientError> {
    static STATE_RE: OnceLock<Regex> = OnceLock::new();
    let state_re = STATE_RE.get_or_init(|| Regex::new(r"<instanceState>\s*<code>(\d+)</code>").unwrap());

    static LAUNCH_RE: OnceLock<Regex> = OnceLock::new();
    let launch_re = LAUNCH_RE.get_or_init(|| Regex::new(r"<launchTime>([^<]+)</launchTime>").unwrap());

    let codes: Vec<u16> = state_re
        .captures_iter(xml)
        .map(|c| c[1].parse::<u16>().map_err(|e| ClientError::Decode(e.to_string())))
        .collect::<Result<_, _>>()?;
    let launch_times: Vec<DateTime<Utc>> = launch_re
        .captures_iter(xml)
        .map(|c| {
            DateTime::parse_from_rfc3339(c[1].trim())
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| ClientError::Decode(format!("invalid launch time '{}': {}", &c[1], e)))
        })
        .collect::<Result<_, _>>()?;

    if codes.len() != launch_times.len() {
        return Err(ClientError::Decode(format!(
            "found {} instance states but {} launch times",
            codes.len(),
            launch_times.len()
        )));
    }

    Ok(codes
        .into_iter()
        .zip(launch_times)
        .map(|(state_code, launch_time)| InstanceDescription {
            state_code,
            launch_time,
        })
        .collect())
}
