//! The external AI service, as seen by the scheduler.

use super::{AiJob, JobType};
use crate::Result;
use crate::models::CanvasSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;

/// What the collaborator is asked to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationRequest {
    pub prompt: String,
    pub job_type: JobType,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub constraints: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub preferences: BTreeMap<String, serde_json::Value>,
    /// 1-based attempt number, so a service can tell retries apart
    pub attempt: u32,
}

impl VariationRequest {
    pub fn for_job(job: &AiJob) -> Self {
        Self {
            prompt: job.prompt.clone(),
            job_type: job.job_type,
            constraints: job.constraints.clone(),
            preferences: job.preferences.clone(),
            attempt: job.attempts.max(1),
        }
    }
}

/// One generated design variation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variation {
    pub title: String,
    pub snapshot: CanvasSnapshot,
    /// Service-reported confidence in [0, 1]
    #[serde(default)]
    pub confidence: f64,
}

/// Source of AI-generated variations.
///
/// Implementations own the transport (HTTP client, local model, test
/// script). Timeouts are the implementation's business: a call that gives up
/// should return an error, which the scheduler treats like any other failure.
pub trait AiCollaborator {
    fn generate_variations(
        &self,
        request: VariationRequest,
    ) -> impl Future<Output = Result<Vec<Variation>>> + Send;
}
