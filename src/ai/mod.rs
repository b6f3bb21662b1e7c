//! AI collaboration scheduler.
//!
//! A priority job queue plus a five-state machine tracking what the AI side
//! of the editor is doing:
//!
//! ```text
//! Idle -> start_processing -> Analyzing -> set_generating -> Generating
//!      -> set_ready -> Ready -> reset -> Idle
//! any  -> set_error -> Error -> clear_error -> Idle
//!                      Error -> retry -> Analyzing
//! ```
//!
//! Suggestions and "still computing" are mutually exclusive: entering
//! Analyzing or Generating always clears the suggestion list.
//!
//! [`run_next_job`] drives one queued job through the machine against an
//! [`AiCollaborator`] and inserts the results into the navigation history.

pub mod collaborator;
pub mod pipeline;
pub mod retry;

pub use collaborator::{AiCollaborator, Variation, VariationRequest};
pub use pipeline::run_next_job;
pub use retry::{BackoffStrategy, RetryPolicy};

use crate::events::StateStream;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;

pub const DEFAULT_MAX_QUEUE_SIZE: usize = 64;

// === Enums ===

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiState {
    #[default]
    Idle,
    Analyzing,
    Generating,
    Ready,
    Error,
}

impl AiState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Analyzing => "analyzing",
            Self::Generating => "generating",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }

    /// Whether a request is in flight.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Analyzing | Self::Generating)
    }
}

impl fmt::Display for AiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Analyze,
    Generate,
    Variations,
    Trends,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the UI falls back to while the AI side is failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackStrategy {
    /// Offer the last successful suggestions again
    ShowCachedSuggestions,
    /// Tell the user to try again in a moment
    RetryLater,
    /// Hide AI affordances and let the user edit by hand
    ManualEditing,
}

impl FallbackStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "show-cached-suggestions" | "cached" => Some(Self::ShowCachedSuggestions),
            "retry-later" | "retry" => Some(Self::RetryLater),
            "manual-editing" | "manual" => Some(Self::ManualEditing),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShowCachedSuggestions => "show-cached-suggestions",
            Self::RetryLater => "retry-later",
            Self::ManualEditing => "manual-editing",
        }
    }
}

impl fmt::Display for FallbackStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === Jobs ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// History nodes created for the variations, in insertion order
    pub node_ids: Vec<String>,
    pub variation_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiJob {
    pub id: String,
    pub job_type: JobType,
    pub prompt: String,
    /// Higher runs first
    pub priority: i32,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub status: JobStatus,
    /// Collaborator calls made for this job so far
    #[serde(default)]
    pub attempts: u32,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub constraints: BTreeMap<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub preferences: BTreeMap<String, serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AiJob {
    pub fn new(job_type: JobType, prompt: impl Into<String>, priority: i32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_type,
            prompt: prompt.into(),
            priority,
            timestamp: Utc::now(),
            status: JobStatus::Pending,
            attempts: 0,
            constraints: BTreeMap::new(),
            preferences: BTreeMap::new(),
            result: None,
            error: None,
        }
    }

    pub fn with_constraint(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.constraints.insert(key.into(), value);
        self
    }

    pub fn with_preference(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.preferences.insert(key.into(), value);
        self
    }
}

// === Errors and metrics ===

/// A failure as reported by whoever ran the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub message: String,
    pub fallback_strategy: Option<FallbackStrategy>,
}

impl ErrorReport {
    pub fn new(message: impl Into<String>, fallback: FallbackStrategy) -> Self {
        Self {
            message: message.into(),
            fallback_strategy: Some(fallback),
        }
    }

    /// A report without a recovery path. Rejected by [`AiScheduler::set_error`].
    pub fn bare(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fallback_strategy: None,
        }
    }
}

/// Present exactly while the scheduler is in [`AiState::Error`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiErrorState {
    pub message: String,
    pub fallback_strategy: FallbackStrategy,
    pub retry_count: u32,
    pub max_retries: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Mean over successful requests only
    pub average_response_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_request_time: Option<DateTime<Utc>>,
    pub session_start_time: DateTime<Utc>,
}

impl SessionMetrics {
    fn new() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            average_response_time_ms: 0.0,
            last_request_time: None,
            session_start_time: Utc::now(),
        }
    }
}

/// A variation offered to the user, pointing at its history node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub node_id: String,
    pub title: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiCollaborationState {
    pub current_state: AiState,
    /// Node id of the variation currently shown
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub processing_queue: Vec<AiJob>,
    pub suggestions: Vec<Suggestion>,
    /// Last non-empty suggestion set, for the cached-suggestions fallback
    pub cached_suggestions: Vec<Suggestion>,
    pub session_metrics: SessionMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_state: Option<AiErrorState>,
}

impl AiCollaborationState {
    fn new() -> Self {
        Self {
            current_state: AiState::Idle,
            variation_id: None,
            prompt: None,
            processing_queue: Vec::new(),
            suggestions: Vec::new(),
            cached_suggestions: Vec::new(),
            session_metrics: SessionMetrics::new(),
            error_state: None,
        }
    }
}

// === Scheduler ===

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub retry: RetryPolicy,
    pub max_queue_size: usize,
    /// Recovery path attached to failures raised by the pipeline
    pub fallback: FallbackStrategy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            fallback: FallbackStrategy::ShowCachedSuggestions,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        if self.max_queue_size == 0 {
            return Err(Error::Validation(
                "max_queue_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Single-writer AI job queue and state machine.
#[derive(Debug)]
pub struct AiScheduler {
    state: AiCollaborationState,
    config: SchedulerConfig,
    /// Retries used by the current request; reset on success or clear_error
    retry_count: u32,
    stream: StateStream<AiCollaborationState>,
}

impl AiScheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        let state = AiCollaborationState::new();
        Ok(Self {
            stream: StateStream::new(state.clone()),
            state,
            config,
            retry_count: 0,
        })
    }

    pub fn state(&self) -> &AiCollaborationState {
        &self.state
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn current_state(&self) -> AiState {
        self.state.current_state
    }

    pub fn queue(&self) -> &[AiJob] {
        &self.state.processing_queue
    }

    pub fn job(&self, id: &str) -> Option<&AiJob> {
        self.state.processing_queue.iter().find(|j| j.id == id)
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn subscribe(&self) -> watch::Receiver<AiCollaborationState> {
        self.stream.subscribe()
    }

    // --- Queue ---

    /// Enqueue a job, keeping the queue sorted by descending priority.
    /// Equal priorities keep insertion order.
    pub fn add_to_queue(&mut self, job: AiJob) -> Result<String> {
        if job.prompt.trim().is_empty() {
            return Err(Error::Validation("prompt must not be empty".to_string()));
        }
        if job.status != JobStatus::Pending {
            return Err(Error::Validation(format!(
                "only pending jobs can be queued, job {} is {}",
                job.id, job.status
            )));
        }
        if self.state.processing_queue.len() >= self.config.max_queue_size {
            return Err(Error::Validation(format!(
                "AI queue is full ({} jobs)",
                self.config.max_queue_size
            )));
        }
        if self.job(&job.id).is_some() {
            return Err(Error::Validation(format!("job {} is already queued", job.id)));
        }

        let id = job.id.clone();
        self.state.processing_queue.push(job);
        self.state
            .processing_queue
            .sort_by(|a, b| b.priority.cmp(&a.priority));
        tracing::debug!(job_id = %id, queued = self.state.processing_queue.len(), "AI job queued");
        self.publish();
        Ok(id)
    }

    /// First pending job in priority order.
    pub fn get_next_queue_item(&self) -> Option<&AiJob> {
        self.state
            .processing_queue
            .iter()
            .find(|j| j.status == JobStatus::Pending)
    }

    /// Claim a pending job for execution.
    pub fn mark_processing(&mut self, id: &str) -> Result<()> {
        let job = self.job_mut(id)?;
        if job.status != JobStatus::Pending {
            return Err(Error::transition(job.status, "start processing a job"));
        }
        job.status = JobStatus::Processing;
        job.attempts += 1;
        self.publish();
        Ok(())
    }

    pub fn update_queue_item(
        &mut self,
        id: &str,
        status: JobStatus,
        result: Option<JobResult>,
        error: Option<String>,
    ) -> Result<()> {
        let job = self.job_mut(id)?;
        job.status = status;
        if result.is_some() {
            job.result = result;
        }
        if error.is_some() {
            job.error = error;
        }
        tracing::debug!(job_id = %id, status = %status, "AI job updated");
        self.publish();
        Ok(())
    }

    pub fn remove_from_queue(&mut self, id: &str) -> Result<AiJob> {
        let pos = self
            .state
            .processing_queue
            .iter()
            .position(|j| j.id == id)
            .ok_or_else(|| Error::NotFound(format!("AI job {}", id)))?;
        let job = self.state.processing_queue.remove(pos);
        self.publish();
        Ok(job)
    }

    /// Fail and drop a job. An already-dispatched collaborator call is not
    /// interrupted; its eventual result is simply discarded.
    pub fn cancel_job(&mut self, id: &str) -> Result<AiJob> {
        let job = self.job_mut(id)?;
        job.status = JobStatus::Failed;
        job.error = Some("cancelled".to_string());
        tracing::info!(job_id = %id, "AI job cancelled");
        self.remove_from_queue(id)
    }

    /// Drop completed and failed jobs. Returns how many were removed.
    pub fn clear_finished(&mut self) -> usize {
        let before = self.state.processing_queue.len();
        self.state
            .processing_queue
            .retain(|j| !j.status.is_finished());
        let removed = before - self.state.processing_queue.len();
        if removed > 0 {
            self.publish();
        }
        removed
    }

    pub(crate) fn record_attempt(&mut self, id: &str) -> Result<()> {
        self.job_mut(id)?.attempts += 1;
        Ok(())
    }

    fn job_mut(&mut self, id: &str) -> Result<&mut AiJob> {
        self.state
            .processing_queue
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| Error::NotFound(format!("AI job {}", id)))
    }

    // --- State machine ---

    pub fn start_processing(&mut self, prompt: &str) -> Result<()> {
        self.expect_state(AiState::Idle, "start processing")?;
        if prompt.trim().is_empty() {
            return Err(Error::Validation("prompt must not be empty".to_string()));
        }
        self.state.prompt = Some(prompt.to_string());
        self.state.error_state = None;
        self.state.suggestions.clear();
        self.transition(AiState::Analyzing);
        Ok(())
    }

    pub fn set_generating(&mut self) -> Result<()> {
        self.expect_state(AiState::Analyzing, "start generating")?;
        self.transition(AiState::Generating);
        Ok(())
    }

    /// Finish a request with its suggestions.
    pub fn set_ready(&mut self, suggestions: Vec<Suggestion>) -> Result<()> {
        self.expect_state(AiState::Generating, "become ready")?;
        if !suggestions.is_empty() {
            self.state.cached_suggestions = suggestions.clone();
        }
        self.state.variation_id = suggestions.last().map(|s| s.node_id.clone());
        self.state.suggestions = suggestions;
        self.retry_count = 0;
        self.transition(AiState::Ready);
        Ok(())
    }

    /// Dismiss results and return to Idle.
    pub fn reset(&mut self) -> Result<()> {
        self.expect_state(AiState::Ready, "reset")?;
        self.state.suggestions.clear();
        self.state.prompt = None;
        self.transition(AiState::Idle);
        Ok(())
    }

    /// Enter Error. Legal from any state, but the report must say how the
    /// UI should recover.
    pub fn set_error(&mut self, report: ErrorReport) -> Result<()> {
        let fallback = report.fallback_strategy.ok_or_else(|| {
            Error::Validation("an AI error must carry a fallback strategy".to_string())
        })?;
        if report.message.trim().is_empty() {
            return Err(Error::Validation("an AI error must carry a message".to_string()));
        }

        tracing::warn!(
            error = %report.message,
            fallback = %fallback,
            retry_count = self.retry_count,
            "AI request failed"
        );
        self.state.error_state = Some(AiErrorState {
            message: report.message,
            fallback_strategy: fallback,
            retry_count: self.retry_count,
            max_retries: self.config.retry.max_retries,
            occurred_at: Utc::now(),
        });
        self.state.suggestions.clear();
        self.transition(AiState::Error);
        Ok(())
    }

    pub fn can_retry(&self) -> bool {
        self.state
            .error_state
            .as_ref()
            .is_some_and(|e| e.retry_count < e.max_retries)
    }

    /// Leave Error for another attempt.
    ///
    /// Returns the backoff delay the caller should wait before re-issuing
    /// the request.
    pub fn retry(&mut self) -> Result<Duration> {
        self.expect_state(AiState::Error, "retry")?;
        if !self.can_retry() {
            return Err(Error::InvalidState(format!(
                "retries exhausted ({} of {})",
                self.retry_count, self.config.retry.max_retries
            )));
        }
        let delay = self.config.retry.delay(self.retry_count);
        self.retry_count += 1;
        self.state.error_state = None;
        tracing::debug!(attempt = self.retry_count, delay_ms = delay.as_millis() as u64, "Retrying AI request");
        self.transition(AiState::Analyzing);
        Ok(delay)
    }

    pub fn clear_error(&mut self) -> Result<()> {
        self.expect_state(AiState::Error, "clear the error")?;
        self.state.error_state = None;
        self.retry_count = 0;
        self.transition(AiState::Idle);
        Ok(())
    }

    /// Show a different variation.
    pub fn select_variation(&mut self, node_id: Option<String>) {
        self.state.variation_id = node_id;
        self.publish();
    }

    // --- Metrics ---

    pub fn record_request(&mut self, response_time: Duration, success: bool) {
        let metrics = &mut self.state.session_metrics;
        metrics.total_requests += 1;
        metrics.last_request_time = Some(Utc::now());
        if success {
            metrics.successful_requests += 1;
            let sample = response_time.as_secs_f64() * 1000.0;
            metrics.average_response_time_ms +=
                (sample - metrics.average_response_time_ms) / metrics.successful_requests as f64;
        } else {
            metrics.failed_requests += 1;
        }
        self.publish();
    }

    fn expect_state(&self, expected: AiState, action: &'static str) -> Result<()> {
        if self.state.current_state != expected {
            return Err(Error::transition(self.state.current_state, action));
        }
        Ok(())
    }

    fn transition(&mut self, next: AiState) {
        tracing::debug!(from = %self.state.current_state, to = %next, "AI state transition");
        self.state.current_state = next;
        self.publish();
    }

    fn publish(&self) {
        self.stream.publish(self.state.clone());
    }
}
