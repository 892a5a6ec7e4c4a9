//! libSQL storage layer for the outreach pipeline.
//!
//! The [`Storage`] struct wraps a local libSQL database holding two tables:
//! - `jobs` — the pollable status store, one row per job, payload last-wins
//! - `artifacts` — durable pipeline outputs, keyed by [`ArtifactId`]
//!
//! A single worker process is the sole writer for a given job, so no
//! optimistic locking is needed on status updates.

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use sha2::{Digest, Sha256};

use outreach_shared::{
    ArtifactId, ArtifactRecord, JobId, JobInputs, JobStatus, OutreachError, Result, StatusPayload,
};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path`, applying pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| OutreachError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| OutreachError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| OutreachError::Storage(e.to_string()))?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    OutreachError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Job status store
    // -----------------------------------------------------------------------

    /// Insert a new job row in `Pending` state with an empty payload.
    pub async fn insert_job(&self, job_id: &JobId, owner_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let payload = serde_json::to_string(&StatusPayload::default())
            .map_err(|e| OutreachError::Storage(e.to_string()))?;

        self.conn
            .execute(
                "INSERT INTO jobs (id, owner_id, status, payload_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    job_id.to_string(),
                    owner_id,
                    JobStatus::Pending.as_str(),
                    payload.as_str(),
                    now.as_str(),
                    now.as_str()
                ],
            )
            .await
            .map_err(|e| OutreachError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Overwrite a job's status and payload (last-wins).
    pub async fn update_job_status(
        &self,
        job_id: &JobId,
        status: JobStatus,
        payload: &StatusPayload,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let payload_json =
            serde_json::to_string(payload).map_err(|e| OutreachError::Storage(e.to_string()))?;

        self.conn
            .execute(
                "UPDATE jobs SET status = ?1, payload_json = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    status.as_str(),
                    payload_json.as_str(),
                    now.as_str(),
                    job_id.to_string()
                ],
            )
            .await
            .map_err(|e| OutreachError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Read a job's latest status and payload.
    pub async fn get_job(&self, job_id: &JobId) -> Result<Option<(JobStatus, StatusPayload)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT status, payload_json FROM jobs WHERE id = ?1",
                params![job_id.to_string()],
            )
            .await
            .map_err(|e| OutreachError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let status_str = row
                    .get::<String>(0)
                    .map_err(|e| OutreachError::Storage(e.to_string()))?;
                let payload_json = row
                    .get::<String>(1)
                    .map_err(|e| OutreachError::Storage(e.to_string()))?;

                let status: JobStatus = status_str
                    .parse()
                    .map_err(|e: String| OutreachError::Storage(e))?;
                let payload: StatusPayload = serde_json::from_str(&payload_json)
                    .map_err(|e| OutreachError::Storage(e.to_string()))?;

                Ok(Some((status, payload)))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(OutreachError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Artifacts
    // -----------------------------------------------------------------------

    /// Write a completed pipeline output. Returns the generated artifact id.
    pub async fn insert_artifact(
        &self,
        job_id: &JobId,
        owner_id: &str,
        body: &str,
        inputs: &JobInputs,
        metadata: &serde_json::Value,
    ) -> Result<ArtifactId> {
        let artifact_id = ArtifactId::new();
        let now = Utc::now().to_rfc3339();
        let inputs_json =
            serde_json::to_string(inputs).map_err(|e| OutreachError::Storage(e.to_string()))?;
        let metadata_json =
            serde_json::to_string(metadata).map_err(|e| OutreachError::Storage(e.to_string()))?;
        let content_hash = hash_body(body);

        self.conn
            .execute(
                "INSERT INTO artifacts
                   (id, job_id, owner_id, body, inputs_json, metadata_json, content_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    artifact_id.to_string(),
                    job_id.to_string(),
                    owner_id,
                    body,
                    inputs_json.as_str(),
                    metadata_json.as_str(),
                    content_hash.as_str(),
                    now.as_str()
                ],
            )
            .await
            .map_err(|e| OutreachError::Storage(e.to_string()))?;

        Ok(artifact_id)
    }

    /// Read an artifact by id.
    pub async fn get_artifact(&self, artifact_id: &ArtifactId) -> Result<Option<ArtifactRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, job_id, owner_id, body, inputs_json, metadata_json, content_hash, created_at
                 FROM artifacts WHERE id = ?1",
                params![artifact_id.to_string()],
            )
            .await
            .map_err(|e| OutreachError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let get_str = |i: i32| -> Result<String> {
                    row.get::<String>(i)
                        .map_err(|e| OutreachError::Storage(e.to_string()))
                };

                let id: ArtifactId = get_str(0)?
                    .parse()
                    .map_err(|e: uuid::Error| OutreachError::Storage(e.to_string()))?;
                let inputs: JobInputs = serde_json::from_str(&get_str(4)?)
                    .map_err(|e| OutreachError::Storage(e.to_string()))?;
                let metadata: serde_json::Value = serde_json::from_str(&get_str(5)?)
                    .map_err(|e| OutreachError::Storage(e.to_string()))?;
                let created_at: DateTime<Utc> = get_str(7)?
                    .parse()
                    .map_err(|e: chrono::ParseError| OutreachError::Storage(e.to_string()))?;

                Ok(Some(ArtifactRecord {
                    id,
                    job_id: get_str(1)?,
                    owner_id: get_str(2)?,
                    body: get_str(3)?,
                    inputs,
                    metadata,
                    content_hash: get_str(6)?,
                    created_at,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(OutreachError::Storage(e.to_string())),
        }
    }
}

/// SHA-256 hash of an artifact body.
fn hash_body(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use outreach_shared::StepTiming;
    use uuid::Uuid;

    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("outreach_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn inputs() -> JobInputs {
        JobInputs {
            template_text: "Dear {{name}}, I read your work on {{research}}.".into(),
            recipient_name: "Jane Smith".into(),
            recipient_interest: "protein folding".into(),
            template_kind: None,
        }
    }

    #[tokio::test]
    async fn job_lifecycle_roundtrip() {
        let storage = test_storage().await;
        let job_id = JobId::new();

        storage.insert_job(&job_id, "owner-1").await.unwrap();

        let (status, payload) = storage.get_job(&job_id).await.unwrap().expect("job row");
        assert_eq!(status, JobStatus::Pending);
        assert!(payload.current_step.is_none());

        let running = StatusPayload {
            current_step: Some("template_parser".into()),
            step_status: Some("started".into()),
            ..Default::default()
        };
        storage
            .update_job_status(&job_id, JobStatus::Running, &running)
            .await
            .unwrap();

        let (status, payload) = storage.get_job(&job_id).await.unwrap().expect("job row");
        assert_eq!(status, JobStatus::Running);
        assert_eq!(payload.current_step.as_deref(), Some("template_parser"));
    }

    #[tokio::test]
    async fn status_updates_are_last_wins() {
        let storage = test_storage().await;
        let job_id = JobId::new();
        storage.insert_job(&job_id, "owner-1").await.unwrap();

        for step in ["template_parser", "fact_gatherer", "message_composer"] {
            let payload = StatusPayload {
                current_step: Some(step.into()),
                step_status: Some("completed".into()),
                ..Default::default()
            };
            storage
                .update_job_status(&job_id, JobStatus::Running, &payload)
                .await
                .unwrap();
        }

        let (_, payload) = storage.get_job(&job_id).await.unwrap().expect("job row");
        assert_eq!(payload.current_step.as_deref(), Some("message_composer"));
    }

    #[tokio::test]
    async fn missing_job_is_none() {
        let storage = test_storage().await;
        assert!(storage.get_job(&JobId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn artifact_roundtrip() {
        let storage = test_storage().await;
        let job_id = JobId::new();
        storage.insert_job(&job_id, "owner-1").await.unwrap();

        let metadata = serde_json::json!({
            "template_kind": "research",
            "step_timings": [StepTiming { step: "template_parser".into(), duration_ms: 12 }],
            "attempts": 1,
        });

        let artifact_id = storage
            .insert_artifact(&job_id, "owner-1", "Dear Jane, ...", &inputs(), &metadata)
            .await
            .unwrap();

        let record = storage
            .get_artifact(&artifact_id)
            .await
            .unwrap()
            .expect("artifact row");

        assert_eq!(record.id, artifact_id);
        assert_eq!(record.job_id, job_id.to_string());
        assert_eq!(record.body, "Dear Jane, ...");
        assert_eq!(record.inputs.recipient_name, "Jane Smith");
        assert_eq!(record.content_hash.len(), 64);
        assert_eq!(record.metadata["attempts"], 1);
    }

    #[tokio::test]
    async fn missing_artifact_is_none() {
        let storage = test_storage().await;
        assert!(
            storage
                .get_artifact(&ArtifactId::new())
                .await
                .unwrap()
                .is_none()
        );
    }
}
