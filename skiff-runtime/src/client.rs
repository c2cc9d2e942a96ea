//! Runtime API client loop

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::context::{Clock, Context, SystemClock};
use crate::env::RuntimeEnv;
use crate::error::ErrorReport;
use crate::handler::Handler;
use crate::response::{
    classify, format_http_shaped, format_standard, FormatError, FormattedResponse, ResponseKind,
    STATUS_HEADER,
};

/// Header carrying the request id on `/invocation/next` responses
const REQUEST_ID_HEADER: &str = "lambda-runtime-aws-request-id";
/// Header carrying the deadline on `/invocation/next` responses
const DEADLINE_MS_HEADER: &str = "lambda-runtime-deadline-ms";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Malformed invocation envelope: {0}")]
    Envelope(String),

    #[error("Response formatting failed: {0}")]
    Format(#[from] FormatError),
}

/// One unit of work delivered by the Runtime API
#[derive(Debug, Clone)]
pub struct Invocation {
    pub request_id: String,
    pub deadline_ms: i64,
    pub event: Value,
}

/// Client for the host's Runtime API
///
/// Owns the resolved handler and the fixed base address. Handles exactly one
/// invocation at a time: the next poll is never issued before the current
/// invocation's terminal report has been posted.
pub struct RuntimeClient {
    http: reqwest::Client,
    base_url: String,
    handler: Arc<dyn Handler>,
    env: RuntimeEnv,
    clock: Arc<dyn Clock>,
}

impl RuntimeClient {
    pub fn new(base_url: impl Into<String>, handler: Arc<dyn Handler>, env: RuntimeEnv) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            handler,
            env,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the wall clock, for tests
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Report a fatal initialization failure to the host
    ///
    /// Used before any handler exists; the caller must terminate the process
    /// with a non-zero status afterward.
    pub async fn report_init_error(base_url: &str, report: &ErrorReport) -> Result<(), ClientError> {
        reqwest::Client::new()
            .post(format!("{}/init/error", base_url))
            .header("content-type", "application/json")
            .json(report)
            .send()
            .await?;
        Ok(())
    }

    /// Run the poll/invoke/report cycle until shut down
    ///
    /// The shutdown signal is consulted only between invocations; an
    /// in-flight handler is never aborted. Poll failures and malformed
    /// envelopes are logged and retried by polling again, unbounded.
    pub async fn run(&self, shutdown: Option<watch::Receiver<bool>>) {
        loop {
            if let Some(rx) = &shutdown {
                if *rx.borrow() {
                    info!("Shutdown requested, stopping poll loop");
                    return;
                }
            }

            let invocation = match self.next_invocation().await {
                Ok(invocation) => invocation,
                Err(err) => {
                    // No request id to report against, so log and poll again.
                    warn!(error = %err, "Failed to fetch next invocation");
                    continue;
                }
            };

            debug!(request_id = %invocation.request_id, "Received invocation");
            self.process(invocation).await;
        }
    }

    /// Poll the Runtime API for the next invocation
    pub async fn next_invocation(&self) -> Result<Invocation, ClientError> {
        let response = self
            .http
            .get(format!("{}/invocation/next", self.base_url))
            .send()
            .await?;

        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(ToString::to_string)
            .ok_or_else(|| ClientError::Envelope("missing request id header".to_string()))?;

        let deadline_ms = response
            .headers()
            .get(DEADLINE_MS_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
            .ok_or_else(|| {
                ClientError::Envelope("missing or invalid deadline header".to_string())
            })?;

        let body = response.bytes().await?;
        let event: Value = serde_json::from_slice(&body)
            .map_err(|e| ClientError::Envelope(format!("event body is not valid JSON: {}", e)))?;

        Ok(Invocation {
            request_id,
            deadline_ms,
            event,
        })
    }

    /// Post a formatted response for the given request
    pub async fn post_response(
        &self,
        request_id: &str,
        response: &FormattedResponse,
    ) -> Result<(), ClientError> {
        let mut request = self
            .http
            .post(format!("{}/invocation/{}/response", self.base_url, request_id))
            .header(STATUS_HEADER, response.status.to_string());
        for (name, value) in &response.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request.body(response.body.clone()).send().await?;
        Ok(())
    }

    /// Post an invocation error; never fatal to the loop
    pub async fn post_invocation_error(
        &self,
        request_id: &str,
        report: &ErrorReport,
    ) -> Result<(), ClientError> {
        self.http
            .post(format!("{}/invocation/{}/error", self.base_url, request_id))
            .header("content-type", "application/json")
            .json(report)
            .send()
            .await?;
        Ok(())
    }

    /// Run one invocation to its terminal report
    async fn process(&self, invocation: Invocation) {
        let Invocation {
            request_id,
            deadline_ms,
            event,
        } = invocation;

        let ctx = Context::new(&request_id, deadline_ms, &self.env, self.clock.clone());

        match self.handler.invoke(event.clone(), ctx).await {
            Ok(result) => {
                let formatted = match self.format(&event, &result) {
                    Ok(formatted) => formatted,
                    Err(err) => {
                        warn!(request_id = %request_id, error = %err, "Response formatting failed");
                        let report = ErrorReport::new("Runtime.FormatError", err.to_string());
                        self.report_invocation_error(&request_id, &report).await;
                        return;
                    }
                };

                if let Err(err) = self.post_response(&request_id, &formatted).await {
                    error!(request_id = %request_id, error = %err, "Failed to post response");
                    let report = ErrorReport::new("Runtime.ResponseError", err.to_string());
                    self.report_invocation_error(&request_id, &report).await;
                }
            }
            Err(handler_err) => {
                warn!(request_id = %request_id, error = %handler_err, "Handler failed");
                self.report_invocation_error(&request_id, &ErrorReport::from(&handler_err))
                    .await;
            }
        }
    }

    /// Choose the response encoding for this event/result pair
    ///
    /// The HTTP-shaped path is taken only when the event classifies as a
    /// Function URL event and the result carries a status code; an
    /// HTTP-looking result on a plain event still goes out as standard JSON.
    fn format(&self, event: &Value, result: &Value) -> Result<FormattedResponse, FormatError> {
        if classify(event) == ResponseKind::HttpShaped {
            if let Some(shaped) = format_http_shaped(result)? {
                return Ok(shaped);
            }
        }
        format_standard(result)
    }

    /// Post an invocation error, logging (not propagating) reporter failures
    async fn report_invocation_error(&self, request_id: &str, report: &ErrorReport) {
        if let Err(err) = self.post_invocation_error(request_id, report).await {
            error!(request_id = %request_id, error = %err, "Failed to post invocation error");
        }
    }
}
