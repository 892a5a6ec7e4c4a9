//! In-process job queue and worker loop.
//!
//! Jobs are delivered at most once over an mpsc channel shared by
//! `worker_slots` tasks. A job cancelled before pickup is dropped at pickup
//! (fully effective); a running job's flag is checked by the runner between
//! steps (best-effort).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

use outreach_pipeline::{CancelFlag, PipelineRunner, StepContext};
use outreach_shared::{JobId, JobInputs, OutreachError};
use outreach_storage::Storage;

use crate::bridge::JobStatusBridge;

/// Queue capacity before `submit` backpressures.
const QUEUE_CAPACITY: usize = 128;

/// One queued execution request.
#[derive(Debug)]
pub struct JobRequest {
    pub job_id: JobId,
    pub owner_id: String,
    pub inputs: JobInputs,
}

/// Builds a fresh runner per job, so steps never share mutable state.
pub type PipelineFactory = Arc<dyn Fn() -> PipelineRunner + Send + Sync>;

/// Cancellation flags for jobs that have not finished, keyed by job id.
pub(crate) type CancelRegistry = Arc<Mutex<HashMap<JobId, CancelFlag>>>;

/// Create the job channel with the fixed capacity.
pub(crate) fn job_channel() -> (mpsc::Sender<JobRequest>, mpsc::Receiver<JobRequest>) {
    mpsc::channel(QUEUE_CAPACITY)
}

/// Spawn `slots` worker tasks draining a shared receiver.
pub(crate) fn spawn_workers(
    slots: u32,
    receiver: mpsc::Receiver<JobRequest>,
    storage: Arc<Storage>,
    factory: PipelineFactory,
    registry: CancelRegistry,
) -> Vec<JoinHandle<()>> {
    let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

    (0..slots.max(1))
        .map(|slot| {
            let receiver = receiver.clone();
            let storage = storage.clone();
            let factory = factory.clone();
            let registry = registry.clone();

            tokio::spawn(async move {
                info!(slot, "worker slot started");
                loop {
                    let request = {
                        let mut rx = receiver.lock().await;
                        rx.recv().await
                    };
                    match request {
                        Some(request) => {
                            process_job(request, &storage, &factory, &registry).await;
                        }
                        None => {
                            info!(slot, "job queue closed, worker exiting");
                            break;
                        }
                    }
                }
            })
        })
        .collect()
}

/// Run one job to a terminal state, reporting through the status bridge.
#[instrument(skip_all, fields(job_id = %request.job_id))]
async fn process_job(
    request: JobRequest,
    storage: &Arc<Storage>,
    factory: &PipelineFactory,
    registry: &CancelRegistry,
) {
    let job_id = request.job_id.clone();
    let cancel = lookup_flag(registry, &job_id);
    let bridge = JobStatusBridge::new(storage.clone(), job_id.clone());

    if cancel.is_cancelled() {
        info!("job cancelled before pickup, dropping");
        report_failure(&bridge, &OutreachError::Cancelled).await;
        registry.lock().expect("cancel registry poisoned").remove(&job_id);
        return;
    }

    let mut ctx = StepContext::new(job_id.clone(), request.owner_id, request.inputs);
    let runner = factory();

    match runner.run(&mut ctx, &bridge, &cancel).await {
        Ok(artifact_id) => {
            let outcome = bridge
                .completed(&artifact_id, ctx.elapsed_ms(), &ctx.step_timings)
                .await;
            if let Err(e) = outcome {
                error!(error = %e, "failed to persist terminal success");
            }
        }
        Err(e) => report_failure(&bridge, &e).await,
    }

    registry.lock().expect("cancel registry poisoned").remove(&job_id);
}

fn lookup_flag(registry: &CancelRegistry, job_id: &JobId) -> CancelFlag {
    registry
        .lock()
        .expect("cancel registry poisoned")
        .get(job_id)
        .cloned()
        .unwrap_or_default()
}

async fn report_failure(bridge: &JobStatusBridge, error: &OutreachError) {
    if let Err(e) = bridge.failed(error).await {
        error!(error = %e, "failed to persist terminal failure");
    }
}
