//! Job orchestration for the outreach pipeline: the status bridge, the
//! in-process queue and worker loop, and the [`OutreachService`] facade
//! exposing `submit` / `get_status` / `cancel`.

pub mod bridge;
pub mod service;
pub mod worker;

pub use bridge::JobStatusBridge;
pub use service::OutreachService;
pub use worker::{JobRequest, PipelineFactory};
