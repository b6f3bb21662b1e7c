//! One job, end to end: queue -> collaborator -> history.

use super::{
    AiCollaborator, AiJob, AiScheduler, ErrorReport, JobResult, JobStatus, Suggestion, Variation,
    VariationRequest,
};
use crate::models::SnapshotSource;
use crate::navigation::NavigationController;
use crate::storage::HistoryStore;
use crate::{Error, Result};
use serde_json::json;
use tokio::time::Instant;

/// Run the highest-priority pending job.
///
/// Returns `Ok(None)` when nothing is pending. A job that fails after
/// exhausting its retries is still `Ok(Some(job))` with status
/// [`JobStatus::Failed`]; the scheduler is left in its error state with the
/// configured fallback. A job that cannot start at all (a malformed prompt)
/// is marked failed and returned without touching the scheduler state.
/// `Err` means the scheduler was not idle.
///
/// Variations become siblings: each one is recorded as a child of the node
/// that was current when the job started, and the cursor ends on the last.
pub async fn run_next_job<C, S>(
    scheduler: &mut AiScheduler,
    collaborator: &C,
    controller: &mut NavigationController<S>,
) -> Result<Option<AiJob>>
where
    C: AiCollaborator,
    S: HistoryStore + 'static,
{
    let Some(job) = scheduler.get_next_queue_item().cloned() else {
        return Ok(None);
    };

    match scheduler.start_processing(&job.prompt) {
        Ok(()) => {}
        Err(e @ Error::StateTransition { .. }) => return Err(e),
        // A job that can never start must not hold the head of the queue
        Err(e) => {
            scheduler.update_queue_item(&job.id, JobStatus::Failed, None, Some(e.to_string()))?;
            tracing::warn!(job_id = %job.id, error = %e, "AI job rejected");
            return Ok(scheduler.job(&job.id).cloned());
        }
    }
    scheduler.mark_processing(&job.id)?;
    let anchor = controller.current_node_id().map(str::to_string);
    tracing::info!(job_id = %job.id, job_type = ?job.job_type, priority = job.priority, "Running AI job");

    loop {
        let request = match scheduler.job(&job.id) {
            Some(current) => VariationRequest::for_job(current),
            None => return Err(Error::NotFound(format!("AI job {}", job.id))),
        };

        let started = Instant::now();
        let outcome = collaborator
            .generate_variations(request)
            .await
            .and_then(check_variations);
        let elapsed = started.elapsed();

        let failure = match outcome {
            Ok(variations) => {
                scheduler.record_request(elapsed, true);
                scheduler.set_generating()?;
                match insert_variations(controller, &job, anchor.as_deref(), variations) {
                    Ok(suggestions) => {
                        let result = JobResult {
                            node_ids: suggestions.iter().map(|s| s.node_id.clone()).collect(),
                            variation_count: suggestions.len(),
                        };
                        scheduler.set_ready(suggestions)?;
                        scheduler.update_queue_item(&job.id, JobStatus::Completed, Some(result), None)?;
                        tracing::info!(job_id = %job.id, "AI job completed");
                        return Ok(scheduler.job(&job.id).cloned());
                    }
                    // History rejected the result; retrying would get the same answer
                    Err(e) => {
                        fail_job(scheduler, &job.id, e.to_string())?;
                        return Ok(scheduler.job(&job.id).cloned());
                    }
                }
            }
            Err(e) => e,
        };

        scheduler.record_request(elapsed, false);
        let message = failure.to_string();
        scheduler.set_error(ErrorReport::new(message.clone(), scheduler.config().fallback))?;

        if !scheduler.can_retry() {
            scheduler.update_queue_item(&job.id, JobStatus::Failed, None, Some(message))?;
            tracing::warn!(job_id = %job.id, attempts = scheduler.job(&job.id).map_or(0, |j| j.attempts), "AI job failed");
            return Ok(scheduler.job(&job.id).cloned());
        }

        let delay = scheduler.retry()?;
        tokio::time::sleep(delay).await;
        scheduler.record_attempt(&job.id)?;
    }
}

/// An empty or malformed answer counts as a failed request.
fn check_variations(variations: Vec<Variation>) -> Result<Vec<Variation>> {
    if variations.is_empty() {
        return Err(Error::Collaborator("no variations returned".to_string()));
    }
    for (i, variation) in variations.iter().enumerate() {
        variation
            .snapshot
            .validate()
            .map_err(|e| Error::Collaborator(format!("variation {}: {}", i, e)))?;
    }
    Ok(variations)
}

/// Record `variations` as siblings under `anchor`.
///
/// The anchor and every variation already inserted are pinned while the
/// batch goes in, so a full history evicts around them. Pins taken here are
/// released afterwards, whatever the outcome.
fn insert_variations<S: HistoryStore + 'static>(
    controller: &mut NavigationController<S>,
    job: &AiJob,
    anchor: Option<&str>,
    variations: Vec<Variation>,
) -> Result<Vec<Suggestion>> {
    let mut pinned = Vec::new();
    let outcome = insert_pinned(controller, job, anchor, variations, &mut pinned);
    for id in &pinned {
        controller.unpin_node(id);
    }
    outcome
}

fn insert_pinned<S: HistoryStore + 'static>(
    controller: &mut NavigationController<S>,
    job: &AiJob,
    anchor: Option<&str>,
    variations: Vec<Variation>,
    pinned: &mut Vec<String>,
) -> Result<Vec<Suggestion>> {
    if let Some(anchor) = anchor
        && controller.graph().contains(anchor)
    {
        pin_for_job(controller, anchor, pinned)?;
    }

    let mut suggestions = Vec::with_capacity(variations.len());
    for (i, variation) in variations.into_iter().enumerate() {
        if i > 0
            && let Some(anchor) = anchor
            && controller.graph().contains(anchor)
        {
            controller.navigate_to_node(anchor)?;
        }

        let snapshot = variation
            .snapshot
            .with_source(SnapshotSource::Ai)
            .with_metadata("job_id", json!(job.id))
            .with_metadata("title", json!(variation.title));
        controller.create_snapshot(snapshot, None)?;

        let node_id = controller
            .current_node_id()
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidState("no current node after insert".to_string()))?;
        pin_for_job(controller, &node_id, pinned)?;
        suggestions.push(Suggestion {
            node_id,
            title: variation.title,
            confidence: variation.confidence.clamp(0.0, 1.0),
        });
    }

    Ok(suggestions)
}

/// Pin `id` unless something else already holds a pin on it.
fn pin_for_job<S: HistoryStore + 'static>(
    controller: &mut NavigationController<S>,
    id: &str,
    pinned: &mut Vec<String>,
) -> Result<()> {
    if !controller.is_pinned(id) {
        controller.pin_node(id)?;
        pinned.push(id.to_string());
    }
    Ok(())
}

fn fail_job(scheduler: &mut AiScheduler, job_id: &str, message: String) -> Result<()> {
    scheduler.set_error(ErrorReport::new(message.clone(), scheduler.config().fallback))?;
    scheduler.update_queue_item(job_id, JobStatus::Failed, None, Some(message))
}
