//! CloudWatch Logs retrieval.
//!
//! [`LogWatcher::stream_cloudwatch_logs`] pages through a log stream from the
//! oldest event, retrying empty pages a bounded number of times before
//! accepting them as the end of the stream.

mod format;

pub use format::*;

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::client::{
    ClientError, DescribeLogStreamsRequest, GetLogEventsRequest, GetLogEventsResponse, LogClient,
    RawLogEvent,
};

pub const DEFAULT_EVENTS_LIMIT: u32 = 1000;
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 5;

#[derive(Error, Debug)]
pub enum LogError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single log event as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl From<RawLogEvent> for LogEvent {
    fn from(raw: RawLogEvent) -> Self {
        Self {
            message: raw.message,
            timestamp: DateTime::from_timestamp_millis(raw.timestamp).unwrap_or_default(),
        }
    }
}

/// One page of a log stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogEventPage {
    pub events: Vec<LogEvent>,
    pub next_forward_token: Option<String>,
    pub next_backward_token: Option<String>,
}

impl LogEventPage {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl From<GetLogEventsResponse> for LogEventPage {
    fn from(response: GetLogEventsResponse) -> Self {
        Self {
            events: response.events.into_iter().map(LogEvent::from).collect(),
            next_forward_token: response.next_forward_token,
            next_backward_token: response.next_backward_token,
        }
    }
}

/// Reads one log stream of one log group.
pub struct LogWatcher<C> {
    client: C,
    log_group_name: String,
    log_stream_name: String,
    start_token: Option<String>,
    formatter: LogFormatter,
    retry_delay: Duration,
}

impl<C: LogClient> LogWatcher<C> {
    pub fn new(client: C, log_group_name: impl Into<String>, log_stream_name: impl Into<String>) -> Self {
        Self {
            client,
            log_group_name: log_group_name.into(),
            log_stream_name: log_stream_name.into(),
            start_token: None,
            formatter: LogFormatter::default(),
            retry_delay: Duration::ZERO,
        }
    }

    /// Resume from a token returned by an earlier run.
    pub fn with_start_token(mut self, token: Option<String>) -> Self {
        self.start_token = token;
        self
    }

    pub fn with_formatter(mut self, formatter: LogFormatter) -> Self {
        self.formatter = formatter;
        self
    }

    /// Pause before each empty-page retry. Jitter of up to half the delay is added.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Whether the log stream exists. Any failure counts as "no".
    pub fn check_log_exists(&self) -> bool {
        let request = DescribeLogStreamsRequest {
            log_group_name: self.log_group_name.clone(),
            log_stream_name_prefix: self.log_stream_name.clone(),
        };
        match self.client.describe_log_streams(&request) {
            Ok(response) => !response.log_streams.is_empty(),
            Err(e) => {
                tracing::error!("Error checking if log stream exists: {}", e);
                false
            }
        }
    }

    /// Lazily page through the stream.
    ///
    /// The first page is always yielded, even when empty. After that, empty
    /// pages are re-requested up to `max_retry_attempts` times; an empty page
    /// that survives the retries is yielded and ends the sequence. Request
    /// failures are yielded as they occur and also end it.
    pub fn stream_cloudwatch_logs(&self, events_limit: u32, max_retry_attempts: u32) -> LogPages<'_, C> {
        let request = GetLogEventsRequest {
            log_group_name: self.log_group_name.clone(),
            log_stream_name: self.log_stream_name.clone(),
            limit: events_limit,
            start_from_head: true,
            next_token: self.start_token.clone(),
        };

        LogPages {
            watcher: self,
            request,
            max_retry_attempts,
            state: PageState::First,
        }
    }

    /// Formatted pages, events joined by `sep`, paired with the next token.
    pub fn stream_formatted_logs<'a>(
        &'a self,
        events_limit: u32,
        max_retry_attempts: u32,
        sep: &'a str,
    ) -> impl Iterator<Item = Result<(String, Option<String>), ClientError>> + 'a {
        self.stream_cloudwatch_logs(events_limit, max_retry_attempts)
            .map(move |page| {
                page.map(|page| {
                    let text = self.formatter.format_events(&page.events).join(sep);
                    (text, page.next_forward_token)
                })
            })
    }

    /// Every page formatted into one newline-separated text, with the token
    /// to resume from.
    pub fn return_formatted_logs(
        &self,
        events_limit: u32,
        max_retry_attempts: u32,
    ) -> Result<(String, Option<String>), ClientError> {
        let mut lines: Vec<String> = Vec::new();
        let mut token = None;
        for page in self.stream_cloudwatch_logs(events_limit, max_retry_attempts) {
            let page = page?;
            lines.extend(self.formatter.format_events(&page.events));
            token = page.next_forward_token;
        }
        Ok((lines.join("\n"), token))
    }

    pub fn save_log_file(&self, path: &Path) -> Result<(), LogError> {
        let (logs, _) = self.return_formatted_logs(DEFAULT_EVENTS_LIMIT, DEFAULT_MAX_RETRY_ATTEMPTS)?;
        std::fs::write(path, logs)?;
        tracing::info!(
            "Logs '{}/{}' saved to: {}",
            self.log_group_name,
            self.log_stream_name,
            path.display()
        );
        Ok(())
    }
}

impl<C> std::fmt::Debug for LogWatcher<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LogWatcher('{}/{}')", self.log_group_name, self.log_stream_name)
    }
}

/// `delay` plus a random extra of less than half of it.
fn jittered(delay: Duration) -> Duration {
    let max_jitter = delay.as_millis() as u64 / 2;
    if max_jitter == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::random::<u64>() % max_jitter)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageState {
    First,
    Continue,
    Done,
}

/// Iterator returned by [`LogWatcher::stream_cloudwatch_logs`]. Not restartable.
pub struct LogPages<'a, C> {
    watcher: &'a LogWatcher<C>,
    request: GetLogEventsRequest,
    max_retry_attempts: u32,
    state: PageState,
}

impl<C: LogClient> LogPages<'_, C> {
    fn fetch(&mut self) -> Result<LogEventPage, ClientError> {
        let response = self.watcher.client.get_log_events(&self.request)?;
        let page = LogEventPage::from(response);
        if let Some(token) = &page.next_forward_token {
            self.request.next_token = Some(token.clone());
        }
        Ok(page)
    }

    fn pause(&self) {
        let delay = self.watcher.retry_delay;
        if !delay.is_zero() {
            std::thread::sleep(jittered(delay));
        }
    }

    fn next_page(&mut self) -> Result<LogEventPage, ClientError> {
        let mut page = self.fetch()?;
        let mut attempts = 0;
        while page.is_empty() && attempts < self.max_retry_attempts {
            self.pause();
            page = self.fetch()?;
            attempts += 1;
            tracing::debug!("Received empty log events list. Retry attempt: {}", attempts);
        }
        Ok(page)
    }
}

impl<C: LogClient> Iterator for LogPages<'_, C> {
    type Item = Result<LogEventPage, ClientError>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = match self.state {
            PageState::Done => return None,
            PageState::First => {
                tracing::debug!(
                    "Retrieving log events from: {}/{}",
                    self.watcher.log_group_name,
                    self.watcher.log_stream_name
                );
                self.fetch()
            }
            PageState::Continue => self.next_page(),
        };

        self.state = match &result {
            Ok(page) if !page.is_empty() => PageState::Continue,
            _ => PageState::Done,
        };
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{DescribeLogStreamsResponse, LogStreamDescription};
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Replays scripted responses, then answers with empty pages that echo
    /// the request token.
    #[derive(Default)]
    struct ScriptedLogs {
        script: RefCell<VecDeque<Result<GetLogEventsResponse, ClientError>>>,
        requests: RefCell<Vec<GetLogEventsRequest>>,
        streams: Option<Vec<LogStreamDescription>>,
    }

    impl ScriptedLogs {
        fn new(script: Vec<Result<GetLogEventsResponse, ClientError>>) -> Self {
            Self {
                script: RefCell::new(script.into()),
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.requests.borrow().len()
        }
    }

    impl LogClient for ScriptedLogs {
        fn get_log_events(&self, request: &GetLogEventsRequest) -> Result<GetLogEventsResponse, ClientError> {
            self.requests.borrow_mut().push(request.clone());
            self.script.borrow_mut().pop_front().unwrap_or_else(|| {
                Ok(GetLogEventsResponse {
                    events: vec![],
                    next_forward_token: request.next_token.clone(),
                    next_backward_token: None,
                })
            })
        }

        fn describe_log_streams(
            &self,
            _request: &DescribeLogStreamsRequest,
        ) -> Result<DescribeLogStreamsResponse, ClientError> {
            match &self.streams {
                Some(streams) => Ok(DescribeLogStreamsResponse {
                    log_streams: streams.clone(),
                }),
                None => Err(ClientError::Status {
                    status: 400,
                    body: "ResourceNotFoundException".to_string(),
                }),
            }
        }
    }

    fn page(messages: &[&str], token: &str) -> Result<GetLogEventsResponse, ClientError> {
        Ok(GetLogEventsResponse {
            events: messages
                .iter()
                .enumerate()
                .map(|(i, m)| RawLogEvent {
                    message: m.to_string(),
                    timestamp: 1_672_913_500_000 + i as i64 * 1000,
                    ingestion_time: None,
                })
                .collect(),
            next_forward_token: Some(token.to_string()),
            next_backward_token: Some("b".to_string()),
        })
    }

    fn empty(token: &str) -> Result<GetLogEventsResponse, ClientError> {
        page(&[], token)
    }

    #[test]
    fn test_empty_first_page_is_yielded() {
        let client = ScriptedLogs::new(vec![empty("f/0")]);
        let watcher = LogWatcher::new(&client, "group", "stream");

        let pages: Vec<_> = watcher.stream_cloudwatch_logs(10, 5).collect();
        assert_eq!(pages.len(), 1);
        assert!(pages[0].as_ref().unwrap().is_empty());
        assert_eq!(client.calls(), 1);
    }

    #[test]
    fn test_terminates_within_retry_budget() {
        let client = ScriptedLogs::new(vec![page(&["a", "b"], "f/1")]);
        let watcher = LogWatcher::new(&client, "group", "stream");

        let pages: Vec<_> = watcher
            .stream_cloudwatch_logs(10, 3)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].events.len(), 2);
        assert!(pages[1].is_empty());
        // First page, then one request plus three retries at the end of data.
        assert_eq!(client.calls(), 1 + 1 + 3);
    }

    #[test]
    fn test_empty_page_retry_recovers() {
        let client = ScriptedLogs::new(vec![page(&["a"], "f/1"), empty("f/1"), page(&["b"], "f/2")]);
        let watcher = LogWatcher::new(&client, "group", "stream");

        let pages: Vec<LogEventPage> = watcher
            .stream_cloudwatch_logs(10, 5)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[1].events[0].message, "b");
        assert!(pages[2].is_empty());
        assert_eq!(client.calls(), 1 + 2 + 6);
    }

    #[test]
    fn test_forward_token_is_threaded() {
        let client = ScriptedLogs::new(vec![page(&["a"], "f/1"), page(&["b"], "f/2")]);
        let watcher = LogWatcher::new(&client, "group", "stream");
        let _ = watcher.stream_cloudwatch_logs(25, 0).count();

        let requests = client.requests.borrow();
        assert_eq!(requests[0].next_token, None);
        assert!(requests[0].start_from_head);
        assert_eq!(requests[0].limit, 25);
        assert_eq!(requests[1].next_token.as_deref(), Some("f/1"));
        assert_eq!(requests[2].next_token.as_deref(), Some("f/2"));
    }

    #[test]
    fn test_resume_token_is_sent_first() {
        let client = ScriptedLogs::new(vec![empty("f/9")]);
        let watcher = LogWatcher::new(&client, "group", "stream").with_start_token(Some("f/8".to_string()));
        let _ = watcher.stream_cloudwatch_logs(10, 5).count();

        assert_eq!(client.requests.borrow()[0].next_token.as_deref(), Some("f/8"));
    }

    #[test]
    fn test_errors_propagate_without_retry() {
        let client = ScriptedLogs::new(vec![
            page(&["a"], "f/1"),
            Err(ClientError::Network("connection reset".to_string())),
        ]);
        let watcher = LogWatcher::new(&client, "group", "stream");

        let mut pages = watcher.stream_cloudwatch_logs(10, 5);
        assert!(pages.next().unwrap().is_ok());
        assert!(matches!(pages.next(), Some(Err(ClientError::Network(_)))));
        assert!(pages.next().is_none());
        assert_eq!(client.calls(), 2);
    }

    #[test]
    fn test_jitter_stays_within_half_the_delay() {
        let delay = Duration::from_millis(40);
        for _ in 0..100 {
            let pause = jittered(delay);
            assert!(pause >= delay);
            assert!(pause < Duration::from_millis(60));
        }
        assert_eq!(jittered(Duration::from_millis(1)), Duration::from_millis(1));
    }

    #[test]
    fn test_retry_delay_pauses_between_empty_pages() {
        let client = ScriptedLogs::new(vec![page(&["a"], "f/1")]);
        let watcher = LogWatcher::new(&client, "group", "stream").with_retry_delay(Duration::from_millis(20));

        let started = std::time::Instant::now();
        let pages: Vec<_> = watcher
            .stream_cloudwatch_logs(10, 2)
            .collect::<Result<_, _>>()
            .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(pages.len(), 2);
        assert_eq!(client.calls(), 1 + 1 + 2);
        // Only the two retries pause.
        assert!(elapsed >= Duration::from_millis(40));
    }

    #[test]
    fn test_stream_formatted_logs() {
        let client = ScriptedLogs::new(vec![page(&["[2023-01-05 10:11:12,345] one", "two"], "f/1")]);
        let watcher = LogWatcher::new(&client, "group", "stream");

        let pages: Vec<_> = watcher
            .stream_formatted_logs(10, 0, "<br>")
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            pages[0],
            (
                "[05-01-2023 10:11:40 UTC] one<br>[05-01-2023 10:11:41 UTC] two".to_string(),
                Some("f/1".to_string())
            )
        );
        assert_eq!(pages[1], (String::new(), Some("f/1".to_string())));
    }

    #[test]
    fn test_return_formatted_logs() {
        let client = ScriptedLogs::new(vec![page(&["one"], "f/1"), page(&["two", "three"], "f/2")]);
        let watcher = LogWatcher::new(&client, "group", "stream");

        let (text, token) = watcher.return_formatted_logs(10, 1).unwrap();
        assert_eq!(
            text,
            "[05-01-2023 10:11:40 UTC] one\n[05-01-2023 10:11:40 UTC] two\n[05-01-2023 10:11:41 UTC] three"
        );
        assert_eq!(token.as_deref(), Some("f/2"));
    }

    #[test]
    fn test_save_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("group-stream.log");
        let client = ScriptedLogs::new(vec![page(&["hello"], "f/1")]);
        let watcher = LogWatcher::new(&client, "group", "stream");

        watcher.save_log_file(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[05-01-2023 10:11:40 UTC] hello");
    }

    #[test]
    fn test_check_log_exists() {
        let mut client = ScriptedLogs::default();
        assert!(!LogWatcher::new(&client, "group", "stream").check_log_exists());

        client.streams = Some(vec![]);
        assert!(!LogWatcher::new(&client, "group", "stream").check_log_exists());

        client.streams = Some(vec![LogStreamDescription {
            log_stream_name: "stream".to_string(),
            creation_time: None,
            last_event_timestamp: None,
        }]);
        assert!(LogWatcher::new(&client, "group", "stream").check_log_exists());
    }

    #[test]
    fn test_event_timestamp_from_millis() {
        let event = LogEvent::from(RawLogEvent {
            message: "m".to_string(),
            timestamp: 1_500,
            ingestion_time: None,
        });
        assert_eq!(event.timestamp.timestamp_millis(), 1_500);
    }
}
