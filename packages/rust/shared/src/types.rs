//! Core domain types for the outreach pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// JobId / ArtifactId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for job identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new time-sortable job identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A UUID v7 wrapper for artifact identifiers — the durable handle to a
/// completed job's output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(pub Uuid);

impl ArtifactId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ArtifactId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Pollable job lifecycle state.
///
/// Monotonic for a given job: `Pending → Running → Completed | Failed`.
/// No transition ever moves back to an earlier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Whether this state is terminal (no further transitions allowed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a transition from `self` to `next` preserves monotonicity.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Running) | (Pending, Failed) => true,
            (Running, Running) | (Running, Completed) | (Running, Failed) => true,
            (a, b) => *a == b && !a.is_terminal(),
        }
    }

    /// Stable string form used in the status store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TemplateKind
// ---------------------------------------------------------------------------

/// Kind of outreach template, determining which enrichment the pipeline runs.
///
/// `Research` templates get the optional citation-enrichment step; `Book`
/// and `General` templates skip it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    Research,
    Book,
    General,
}

impl TemplateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Book => "book",
            Self::General => "general",
        }
    }
}

impl std::str::FromStr for TemplateKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "research" => Ok(Self::Research),
            "book" => Ok(Self::Book),
            "general" => Ok(Self::General),
            other => Err(format!("unknown template kind: {other}")),
        }
    }
}

impl std::fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Citation
// ---------------------------------------------------------------------------

/// A citable work attributed to the recipient.
///
/// The `url` is the identity key for de-duplication when merging citation
/// lists from multiple sub-queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// Canonical URL of the work (identity key).
    pub url: String,
    /// Title of the work.
    pub title: String,
    /// Abstract or short summary, when the provider supplies one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Publication year, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u16>,
    /// Author names, when known.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
}

// ---------------------------------------------------------------------------
// JobInputs
// ---------------------------------------------------------------------------

/// Caller-supplied inputs for one outreach job. Immutable after submission,
/// except that `template_kind` may be inferred by the first step when unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInputs {
    /// Template string with placeholders like `{{name}}` or `{{research}}`.
    pub template_text: String,
    /// Full name of the recipient.
    pub recipient_name: String,
    /// The recipient's area of interest (used for search and relevance).
    pub recipient_interest: String,
    /// Template kind; inferred by the parse step when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_kind: Option<TemplateKind>,
}

// ---------------------------------------------------------------------------
// StepTiming / StatusPayload
// ---------------------------------------------------------------------------

/// Duration of one executed step. Appended in execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTiming {
    /// Step name.
    pub step: String,
    /// Wall-clock duration of the step's execute phase, in milliseconds.
    pub duration_ms: u64,
}

/// The structured payload a polling client sees alongside [`JobStatus`].
///
/// All fields start absent and are only ever added within a run — a field is
/// never removed once set. After a terminal state the payload is frozen.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusPayload {
    /// Name of the step currently (or last) executing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    /// "started" or "completed" for `current_step`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_status: Option<String>,
    /// Cumulative per-step timings, in execution order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub step_timings: Vec<StepTiming>,
    /// Durable artifact handle; set only on terminal success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<ArtifactId>,
    /// Total pipeline duration, in milliseconds; set on terminal success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration_ms: Option<u64>,
    /// Name of the failing step; set on terminal failure when attributable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    /// Stable error class; set on terminal failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Human-readable error message (truncated); set on terminal failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

// ---------------------------------------------------------------------------
// ArtifactRecord
// ---------------------------------------------------------------------------

/// A durably stored pipeline output, as read back from the artifact store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Artifact identifier.
    pub id: ArtifactId,
    /// The job that produced this artifact.
    pub job_id: String,
    /// Owner of the job.
    pub owner_id: String,
    /// The final composed message.
    pub body: String,
    /// Snapshot of the job inputs at submission time.
    pub inputs: JobInputs,
    /// Structured metadata blob (timings, warnings, token counts).
    pub metadata: serde_json::Value,
    /// SHA-256 hash of `body`.
    pub content_hash: String,
    /// When the artifact was written.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_roundtrip() {
        let id = JobId::new();
        let s = id.to_string();
        let parsed: JobId = s.parse().expect("parse JobId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn status_transitions_are_monotonic() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Failed));

        // No backwards transitions
        assert!(!Running.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Failed));
    }

    #[test]
    fn status_string_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            let parsed: JobStatus = status.as_str().parse().expect("parse status");
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn template_kind_parsing() {
        assert_eq!("research".parse::<TemplateKind>(), Ok(TemplateKind::Research));
        assert_eq!("general".parse::<TemplateKind>(), Ok(TemplateKind::General));
        assert!("poem".parse::<TemplateKind>().is_err());
    }

    #[test]
    fn status_payload_omits_unset_fields() {
        let payload = StatusPayload {
            current_step: Some("template_parser".into()),
            step_status: Some("started".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&payload).expect("serialize");
        assert!(json.contains("template_parser"));
        assert!(!json.contains("artifact_id"));
        assert!(!json.contains("failed_step"));
    }

    #[test]
    fn status_payload_roundtrip() {
        let payload = StatusPayload {
            current_step: Some("message_composer".into()),
            step_status: Some("completed".into()),
            step_timings: vec![StepTiming {
                step: "template_parser".into(),
                duration_ms: 42,
            }],
            artifact_id: Some(ArtifactId::new()),
            total_duration_ms: Some(1234),
            ..Default::default()
        };
        let json = serde_json::to_string(&payload).expect("serialize");
        let parsed: StatusPayload = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.step_timings.len(), 1);
        assert_eq!(parsed.total_duration_ms, Some(1234));
    }
}
