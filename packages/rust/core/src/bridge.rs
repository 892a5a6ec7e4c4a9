//! Bridges runner events onto the pollable job-status store.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{error, warn};

use outreach_pipeline::ProgressReporter;
use outreach_shared::{ArtifactId, JobId, JobStatus, OutreachError, Result, StatusPayload, StepTiming};
use outreach_storage::Storage;

/// Persisted error messages are truncated to this many characters.
const MAX_ERROR_LEN: usize = 1_000;

/// Maps internal run transitions onto `{JobStatus, StatusPayload}` rows.
///
/// The bridge owns a cumulative payload: fields are only ever added within a
/// run, never removed, and writes to the store are last-wins. Transitions
/// are monotonic — an update that would move the status backwards (or past a
/// terminal state) is ignored, so the payload freezes once terminal.
pub struct JobStatusBridge {
    storage: Arc<Storage>,
    job_id: JobId,
    state: Mutex<BridgeState>,
}

struct BridgeState {
    status: JobStatus,
    payload: StatusPayload,
}

impl JobStatusBridge {
    /// Create a bridge for a job whose `Pending` row already exists.
    pub fn new(storage: Arc<Storage>, job_id: JobId) -> Self {
        Self {
            storage,
            job_id,
            state: Mutex::new(BridgeState {
                status: JobStatus::Pending,
                payload: StatusPayload::default(),
            }),
        }
    }

    /// Apply a transition and persist the updated payload.
    async fn transition(
        &self,
        next: JobStatus,
        mutate: impl FnOnce(&mut StatusPayload),
    ) -> Result<()> {
        let mut state = self.state.lock().await;

        if !state.status.can_transition_to(next) {
            warn!(
                job_id = %self.job_id,
                from = %state.status,
                to = %next,
                "ignoring non-monotonic status transition"
            );
            return Ok(());
        }

        state.status = next;
        mutate(&mut state.payload);

        self.storage
            .update_job_status(&self.job_id, state.status, &state.payload)
            .await
    }

    /// Terminal success: artifact handle, total duration, final timings.
    pub async fn completed(
        &self,
        artifact_id: &ArtifactId,
        total_duration_ms: u64,
        timings: &[StepTiming],
    ) -> Result<()> {
        let artifact_id = artifact_id.clone();
        let timings = timings.to_vec();
        self.transition(JobStatus::Completed, move |payload| {
            payload.artifact_id = Some(artifact_id);
            payload.total_duration_ms = Some(total_duration_ms);
            payload.step_timings = timings;
        })
        .await
    }

    /// Terminal failure: step attribution, error class, truncated message.
    ///
    /// When the error carries no step of its own, the failure is attributed
    /// to the last step the bridge saw start.
    pub async fn failed(&self, error: &OutreachError) -> Result<()> {
        let explicit_step = error.failed_step().map(String::from);
        let error_type = error.error_type().to_string();
        let message = truncate_message(&error.to_string());

        self.transition(JobStatus::Failed, move |payload| {
            payload.failed_step = explicit_step.or_else(|| payload.current_step.clone());
            payload.error_type = Some(error_type);
            payload.error_message = Some(message);
        })
        .await
    }
}

#[async_trait]
impl ProgressReporter for JobStatusBridge {
    async fn step_started(&self, step: &str) {
        let step = step.to_string();
        let outcome = self
            .transition(JobStatus::Running, move |payload| {
                payload.current_step = Some(step);
                payload.step_status = Some("started".into());
            })
            .await;
        if let Err(e) = outcome {
            error!(job_id = %self.job_id, error = %e, "status write failed");
        }
    }

    async fn step_completed(&self, step: &str, timings: &[StepTiming]) {
        let step = step.to_string();
        let timings = timings.to_vec();
        let outcome = self
            .transition(JobStatus::Running, move |payload| {
                payload.current_step = Some(step);
                payload.step_status = Some("completed".into());
                payload.step_timings = timings;
            })
            .await;
        if let Err(e) = outcome {
            error!(job_id = %self.job_id, error = %e, "status write failed");
        }
    }
}

fn truncate_message(message: &str) -> String {
    if message.len() <= MAX_ERROR_LEN {
        return message.to_string();
    }
    let mut end = MAX_ERROR_LEN;
    while end > 0 && !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn setup() -> (Arc<Storage>, JobId, JobStatusBridge) {
        let tmp = std::env::temp_dir().join(format!("outreach_bridge_{}.db", Uuid::now_v7()));
        let storage = Arc::new(Storage::open(&tmp).await.expect("open test db"));
        let job_id = JobId::new();
        storage.insert_job(&job_id, "owner-1").await.unwrap();
        let bridge = JobStatusBridge::new(storage.clone(), job_id.clone());
        (storage, job_id, bridge)
    }

    fn timing(step: &str, ms: u64) -> StepTiming {
        StepTiming {
            step: step.into(),
            duration_ms: ms,
        }
    }

    #[tokio::test]
    async fn lifecycle_accumulates_payload() {
        let (storage, job_id, bridge) = setup().await;

        bridge.step_started("template_parser").await;
        let (status, payload) = storage.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(status, JobStatus::Running);
        assert_eq!(payload.step_status.as_deref(), Some("started"));

        let timings = vec![timing("template_parser", 5)];
        bridge.step_completed("template_parser", &timings).await;
        let (_, payload) = storage.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(payload.step_timings.len(), 1);

        let artifact_id = ArtifactId::new();
        bridge.completed(&artifact_id, 1234, &timings).await.unwrap();
        let (status, payload) = storage.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(status, JobStatus::Completed);
        assert_eq!(payload.artifact_id, Some(artifact_id));
        assert_eq!(payload.total_duration_ms, Some(1234));
        // Progress fields stay set; nothing is removed on terminal success.
        assert_eq!(payload.current_step.as_deref(), Some("template_parser"));
    }

    #[tokio::test]
    async fn failure_attributes_step_and_truncates_message() {
        let (storage, job_id, bridge) = setup().await;

        bridge.step_started("fact_gatherer").await;
        let long = "x".repeat(5_000);
        let err = OutreachError::step("fact_gatherer", long);
        bridge.failed(&err).await.unwrap();

        let (status, payload) = storage.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(status, JobStatus::Failed);
        assert_eq!(payload.failed_step.as_deref(), Some("fact_gatherer"));
        assert_eq!(payload.error_type.as_deref(), Some("step_execution_error"));
        assert_eq!(payload.error_message.unwrap().len(), MAX_ERROR_LEN);
    }

    #[tokio::test]
    async fn stepless_error_falls_back_to_current_step() {
        let (storage, job_id, bridge) = setup().await;

        bridge.step_started("message_composer").await;
        bridge
            .failed(&OutreachError::ExternalApi("gateway timeout".into()))
            .await
            .unwrap();

        let (_, payload) = storage.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(payload.failed_step.as_deref(), Some("message_composer"));
        assert_eq!(payload.error_type.as_deref(), Some("external_api_error"));
    }

    #[tokio::test]
    async fn terminal_state_is_frozen() {
        let (storage, job_id, bridge) = setup().await;

        let artifact_id = ArtifactId::new();
        bridge.step_started("template_parser").await;
        bridge.completed(&artifact_id, 10, &[]).await.unwrap();

        // Later events must not mutate the stored payload.
        bridge.step_started("fact_gatherer").await;
        bridge
            .failed(&OutreachError::Internal("late error".into()))
            .await
            .unwrap();

        let (status, payload) = storage.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(status, JobStatus::Completed);
        assert_eq!(payload.artifact_id, Some(artifact_id));
        assert!(payload.error_type.is_none());
        assert_eq!(payload.current_step.as_deref(), Some("template_parser"));
    }

    #[tokio::test]
    async fn cancelled_error_maps_to_failed_with_cancelled_type() {
        let (storage, job_id, bridge) = setup().await;

        bridge.failed(&OutreachError::Cancelled).await.unwrap();

        let (status, payload) = storage.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(status, JobStatus::Failed);
        assert_eq!(payload.error_type.as_deref(), Some("cancelled"));
    }
}
