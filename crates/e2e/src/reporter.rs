//! Outcome reporting
//!
//! Each outcome becomes one form submission to the collector API, or,
//! when report-back is off, one structured log event with the same fields.
//! Reporting never fails a spec: errors are logged and dropped.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::ReportSettings;
use crate::error::{RunError, RunResult};
use crate::outcome::{ExecutionOutcome, ExecutionStatus};
use crate::request::ExecutionRequest;

/// Collector route, relative to the API base URL
pub const UPDATE_PATH: &str = "/api/v1/executions/update";

/// One form-encoded submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub result: String,
    #[serde(rename = "executionStatus")]
    pub execution_status: ExecutionStatus,
    #[serde(rename = "uniqId")]
    pub uniq_id: String,
    pub branch: String,
    pub spec: String,
    #[serde(rename = "executionErrorOutput")]
    pub execution_error_output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoded: Option<bool>,
}

/// Destination for submissions
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn submit(&self, submission: &Submission) -> RunResult<()>;
}

/// Posts submissions to the collector, retrying transport errors and 5xx
pub struct HttpSink {
    client: reqwest::Client,
    endpoint: String,
    max_retries: u32,
    backoff: Duration,
}

impl HttpSink {
    pub fn new(settings: &ReportSettings) -> RunResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}{}", settings.api_url.trim_end_matches('/'), UPDATE_PATH),
            max_retries: settings.max_retries,
            backoff: settings.retry_backoff(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ReportSink for HttpSink {
    async fn submit(&self, submission: &Submission) -> RunResult<()> {
        let mut attempt = 0;

        loop {
            let last_error = match self.client.post(&self.endpoint).form(submission).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(spec = %submission.spec, "Result reported");
                    return Ok(());
                }
                Ok(resp) if resp.status().is_server_error() => {
                    format!("collector returned {}", resp.status())
                }
                Ok(resp) => {
                    return Err(RunError::Report(format!("collector rejected submission: {}", resp.status())));
                }
                Err(e) => e.to_string(),
            };

            if attempt >= self.max_retries {
                return Err(RunError::Report(format!(
                    "{} (after {} attempt(s))",
                    last_error,
                    attempt + 1
                )));
            }

            attempt += 1;
            warn!(spec = %submission.spec, attempt, "Report failed, retrying: {}", last_error);
            tokio::time::sleep(self.backoff * attempt).await;
        }
    }
}

/// Writes submissions to the log instead of sending them
pub struct LogSink;

#[async_trait]
impl ReportSink for LogSink {
    async fn submit(&self, s: &Submission) -> RunResult<()> {
        info!(
            result = %s.result,
            execution_status = %s.execution_status,
            uniq_id = %s.uniq_id,
            branch = %s.branch,
            spec = %s.spec,
            execution_error_output = %s.execution_error_output,
            "Execution result"
        );
        Ok(())
    }
}

pub struct Reporter {
    sink: Arc<dyn ReportSink>,
    run_id: String,
    branch: String,
}

impl Reporter {
    pub fn new(sink: Arc<dyn ReportSink>, run_id: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            sink,
            run_id: run_id.into(),
            branch: branch.into(),
        }
    }

    /// HTTP when the request asks for report-back, log-only otherwise
    pub fn for_request(request: &ExecutionRequest, settings: &ReportSettings) -> RunResult<Self> {
        let sink: Arc<dyn ReportSink> = if request.report_back() {
            let sink = HttpSink::new(settings)?;
            info!("Reporting results to {}", sink.endpoint());
            Arc::new(sink)
        } else {
            Arc::new(LogSink)
        };
        Ok(Self::new(sink, request.run_id(), request.branch()))
    }

    pub fn submission(&self, spec: &str, outcome: &ExecutionOutcome) -> Submission {
        Submission {
            result: outcome.payload.as_str().to_string(),
            execution_status: outcome.status,
            uniq_id: self.run_id.clone(),
            branch: self.branch.clone(),
            spec: spec.to_string(),
            execution_error_output: outcome.error.clone(),
            encoded: outcome.payload.is_encoded().then_some(true),
        }
    }

    /// Report the outcome of a single spec
    pub async fn report(&self, spec: &str, outcome: &ExecutionOutcome) {
        let submission = self.submission(spec, outcome);
        if let Err(e) = self.sink.submit(&submission).await {
            error!(spec = %spec, "Fail to report back result: {}", e);
        }
    }

    /// Report the same outcome once for every spec of the batch
    pub async fn broadcast(&self, specs: &[String], outcome: &ExecutionOutcome) {
        for spec in specs {
            self.report(spec, outcome).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Payload;
    use parking_lot::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    struct Recording(Mutex<Vec<Submission>>);

    #[async_trait]
    impl ReportSink for Recording {
        async fn submit(&self, submission: &Submission) -> RunResult<()> {
            self.0.lock().push(submission.clone());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl ReportSink for Failing {
        async fn submit(&self, _: &Submission) -> RunResult<()> {
            Err(RunError::Report("unreachable".into()))
        }
    }

    /// Minimal collector: answers each connection with the next status and
    /// forwards the request body.
    async fn spawn_collector(statuses: Vec<u16>) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            for status in statuses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                let body = loop {
                    let n = socket.read(&mut chunk).await.unwrap();
                    buf.extend_from_slice(&chunk[..n]);
                    let text = String::from_utf8_lossy(&buf).to_string();
                    if let Some(split) = text.find("\r\n\r\n") {
                        let length = text[..split]
                            .lines()
                            .find_map(|l| {
                                let (k, v) = l.split_once(':')?;
                                k.eq_ignore_ascii_case("content-length").then(|| v.trim().parse::<usize>().ok())?
                            })
                            .unwrap_or(0);
                        if buf.len() >= split + 4 + length {
                            break text[split + 4..split + 4 + length].to_string();
                        }
                    }
                    if n == 0 {
                        break String::new();
                    }
                };
                let _ = tx.send(body);
                let response = format!("HTTP/1.1 {} Status\r\ncontent-length: 0\r\nconnection: close\r\n\r\n", status);
                socket.write_all(response.as_bytes()).await.unwrap();
            }
        });

        (format!("http://{}", addr), rx)
    }

    fn decode_form(body: &str) -> Vec<(String, String)> {
        reqwest::Url::parse(&format!("http://collector/?{}", body))
            .unwrap()
            .query_pairs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn settings(api_url: String, max_retries: u32) -> ReportSettings {
        ReportSettings {
            api_url,
            max_retries,
            retry_backoff_ms: 10,
            request_timeout_secs: 5,
        }
    }

    #[test]
    fn test_submission_fields() {
        let reporter = Reporter::new(Arc::new(LogSink), "uid", "main");
        let outcome = ExecutionOutcome::completed(true, String::new(), "7b7d".into());
        let s = reporter.submission("a.spec.js", &outcome);
        assert_eq!(s.result, "7b7d");
        assert_eq!(s.execution_status, ExecutionStatus::Done);
        assert_eq!(s.uniq_id, "uid");
        assert_eq!(s.branch, "main");
        assert_eq!(s.encoded, Some(true));

        let failed = reporter.submission("a.spec.js", &ExecutionOutcome::failed("boom"));
        assert_eq!(failed.result, "{}");
        assert_eq!(failed.execution_error_output, "boom");
        assert_eq!(failed.encoded, None);
    }

    #[tokio::test]
    async fn test_broadcast_reports_every_spec() {
        let sink = Arc::new(Recording(Mutex::new(Vec::new())));
        let reporter = Reporter::new(sink.clone(), "uid", "");
        let specs = vec!["a.spec.js".to_string(), "b.spec.js".to_string(), "a.spec.js".to_string()];
        reporter.broadcast(&specs, &ExecutionOutcome::failed("clone failed")).await;

        let recorded = sink.0.lock();
        assert_eq!(recorded.len(), 3);
        let spec_names: Vec<&str> = recorded.iter().map(|s| s.spec.as_str()).collect();
        assert_eq!(spec_names, vec!["a.spec.js", "b.spec.js", "a.spec.js"]);
        assert!(recorded.iter().all(|s| s.result == "{}" && s.execution_error_output == "clone failed"));
    }

    #[tokio::test]
    async fn test_sink_failure_is_swallowed() {
        let reporter = Reporter::new(Arc::new(Failing), "uid", "");
        reporter.report("a.spec.js", &ExecutionOutcome::failed("x")).await;
    }

    #[tokio::test]
    async fn test_http_sink_posts_form() {
        let (url, mut bodies) = spawn_collector(vec![200]).await;
        let sink = HttpSink::new(&settings(url, 0)).unwrap();
        let reporter = Reporter::new(Arc::new(sink), "run-1", "develop");
        let outcome = ExecutionOutcome {
            status: ExecutionStatus::Done,
            error: String::new(),
            payload: Payload::Encoded(hex::encode(b"{\"a\":1}")),
        };
        reporter.report("dir/foo.cy.js", &outcome).await;

        let body = bodies.recv().await.unwrap();
        let fields = decode_form(&body);
        let get = |k: &str| fields.iter().find(|(key, _)| key == k).map(|(_, v)| v.clone());
        assert_eq!(get("result").as_deref(), Some("7b2261223a317d"));
        assert_eq!(get("executionStatus").as_deref(), Some("DONE"));
        assert_eq!(get("uniqId").as_deref(), Some("run-1"));
        assert_eq!(get("branch").as_deref(), Some("develop"));
        assert_eq!(get("spec").as_deref(), Some("dir/foo.cy.js"));
        assert_eq!(get("executionErrorOutput").as_deref(), Some(""));
        assert_eq!(get("encoded").as_deref(), Some("true"));
    }

    #[tokio::test]
    async fn test_http_sink_retries_server_errors() {
        let (url, mut bodies) = spawn_collector(vec![500, 503, 200]).await;
        let sink = HttpSink::new(&settings(url, 3)).unwrap();
        let reporter = Reporter::new(Arc::new(sink), "uid", "");
        let submission = reporter.submission("a.spec.js", &ExecutionOutcome::failed("x"));
        reporter.sink.submit(&submission).await.unwrap();

        for _ in 0..3 {
            let fields = decode_form(&bodies.recv().await.unwrap());
            assert!(!fields.iter().any(|(k, _)| k == "encoded"));
        }
    }

    #[tokio::test]
    async fn test_http_sink_gives_up_after_retries() {
        let (url, _bodies) = spawn_collector(vec![500, 500]).await;
        let sink = HttpSink::new(&settings(url, 1)).unwrap();
        let submission = Reporter::new(Arc::new(LogSink), "uid", "")
            .submission("a.spec.js", &ExecutionOutcome::failed("x"));
        let err = sink.submit(&submission).await.unwrap_err();
        assert!(err.to_string().contains("after 2 attempt(s)"));
    }

    #[tokio::test]
    async fn test_http_sink_does_not_retry_client_errors() {
        let (url, mut bodies) = spawn_collector(vec![400]).await;
        let sink = HttpSink::new(&settings(url, 3)).unwrap();
        let submission = Reporter::new(Arc::new(LogSink), "uid", "")
            .submission("a.spec.js", &ExecutionOutcome::failed("x"));
        let err = sink.submit(&submission).await.unwrap_err();
        assert!(err.to_string().contains("rejected"));
        assert!(bodies.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_log_sink_emits_structured_line() {
        use std::io::Write;

        #[derive(Clone, Default)]
        struct Buffer(Arc<Mutex<Vec<u8>>>);

        impl Write for Buffer {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let buffer = Buffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let reporter = Reporter::new(Arc::new(LogSink), "uid-42", "release");
        reporter.report("login.cy.js", &ExecutionOutcome::failed("boom")).await;

        let output = String::from_utf8(buffer.0.lock().clone()).unwrap();
        assert_eq!(output.lines().count(), 1);
        assert!(output.contains("result={}"));
        assert!(output.contains("execution_status=FAILED"));
        assert!(output.contains("uniq_id=uid-42"));
        assert!(output.contains("branch=release"));
        assert!(output.contains("spec=login.cy.js"));
        assert!(output.contains("execution_error_output=boom"));
    }
}
