//! The service facade: submit, poll, cancel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, instrument};

use outreach_fetch::PageFetcher;
use outreach_pipeline::{
    CancelFlag, CitationEnrichStep, FactGatherStep, MessageComposeStep, PipelineRunner,
    PipelineStep, TemplateParseStep,
};
use outreach_providers::{
    HttpCitationProvider, HttpSearchProvider, HttpSynthesizer, TieredSynthesizer,
};
use outreach_shared::{
    AppConfig, ArtifactId, ArtifactRecord, JobId, JobInputs, JobStatus, OutreachError, Result,
    StatusPayload,
};
use outreach_storage::Storage;

use crate::worker::{
    CancelRegistry, JobRequest, PipelineFactory, job_channel, spawn_workers,
};

/// Owns the queue, the worker slots, and the status/artifact store.
///
/// `submit` writes a `Pending` row then enqueues; delivery is at most once
/// and there is no job-level retry. `get_status` reads the latest payload;
/// after a terminal state repeated polls return identical payloads.
pub struct OutreachService {
    storage: Arc<Storage>,
    sender: mpsc::Sender<JobRequest>,
    registry: CancelRegistry,
    workers: Vec<JoinHandle<()>>,
}

impl OutreachService {
    /// Start the service with an explicit pipeline factory (used in tests
    /// and by callers wiring their own providers).
    pub fn start(storage: Arc<Storage>, factory: PipelineFactory, worker_slots: u32) -> Self {
        let (sender, receiver) = job_channel();
        let registry: CancelRegistry = Arc::new(Mutex::new(HashMap::new()));
        let workers = spawn_workers(
            worker_slots,
            receiver,
            storage.clone(),
            factory,
            registry.clone(),
        );

        Self {
            storage,
            sender,
            registry,
            workers,
        }
    }

    /// Start the service with the production pipeline built from config.
    pub fn start_from_config(storage: Arc<Storage>, config: &AppConfig) -> Result<Self> {
        let factory = production_pipeline_factory(storage.clone(), config)?;
        Ok(Self::start(storage, factory, config.defaults.worker_slots))
    }

    /// Submit a job. Returns the id to poll.
    #[instrument(skip_all, fields(owner_id = %owner_id))]
    pub async fn submit(&self, owner_id: &str, inputs: JobInputs) -> Result<JobId> {
        let job_id = JobId::new();
        self.storage.insert_job(&job_id, owner_id).await?;

        self.registry
            .lock()
            .expect("cancel registry poisoned")
            .insert(job_id.clone(), CancelFlag::new());

        self.sender
            .send(JobRequest {
                job_id: job_id.clone(),
                owner_id: owner_id.to_string(),
                inputs,
            })
            .await
            .map_err(|_| OutreachError::Internal("job queue is closed".into()))?;

        info!(job_id = %job_id, "job submitted");
        Ok(job_id)
    }

    /// Latest status and payload for a job.
    pub async fn get_status(&self, job_id: &JobId) -> Result<Option<(JobStatus, StatusPayload)>> {
        self.storage.get_job(job_id).await
    }

    /// Best-effort cancellation. Returns whether a cancellable job was found.
    ///
    /// A job still in the queue is dropped at pickup; a running job finishes
    /// its in-flight step before the flag is observed.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        let registry = self.registry.lock().expect("cancel registry poisoned");
        match registry.get(job_id) {
            Some(flag) => {
                flag.cancel();
                info!(job_id = %job_id, "cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Fetch a stored artifact.
    pub async fn get_artifact(&self, artifact_id: &ArtifactId) -> Result<Option<ArtifactRecord>> {
        self.storage.get_artifact(artifact_id).await
    }

    /// Close the queue and wait for in-flight jobs to finish.
    pub async fn shutdown(self) {
        drop(self.sender);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

/// Wire the four production steps from config and environment credentials.
fn production_pipeline_factory(storage: Arc<Storage>, config: &AppConfig) -> Result<PipelineFactory> {
    let search = Arc::new(HttpSearchProvider::from_config(&config.search)?);
    let citations = Arc::new(HttpCitationProvider::from_config(&config.citations));
    let synthesizer = Arc::new(HttpSynthesizer::from_config(&config.synthesis)?);
    let fetcher = PageFetcher::new()?;

    let search_config = config.search.clone();
    let gather_config = config.gather.clone();
    let citations_config = config.citations.clone();
    let synthesis_config = config.synthesis.clone();

    let factory: PipelineFactory = Arc::new(move || {
        let tiered = TieredSynthesizer::new(synthesizer.clone(), synthesis_config.clone());

        let steps: Vec<Box<dyn PipelineStep>> = vec![
            Box::new(TemplateParseStep),
            Box::new(FactGatherStep::new(
                search.clone(),
                fetcher.clone(),
                tiered,
                search_config.clone(),
                gather_config.clone(),
            )),
            Box::new(CitationEnrichStep::new(
                citations.clone(),
                citations_config.clone(),
            )),
            Box::new(MessageComposeStep::new(
                synthesizer.clone(),
                storage.clone(),
            )),
        ];
        PipelineRunner::new(steps)
    });

    Ok(factory)
}
