//! Execution layer: file transfers, workflow reconciliation and the retry
//! and logging plumbing they share.

pub mod archive;
pub mod logging;
pub mod reconciler;
pub mod retry;
pub mod transfer;
pub mod validation;

pub use logging::{LogFormat, init_tracing};
pub use reconciler::{MonitorOptions, MonitorOutcome, SubmissionOutcome, WorkflowReconciler};
pub use retry::RetryPolicy;
pub use transfer::{DownloadRequest, TransferDirection, TransferFailure, TransferManager, TransferReport};
pub use validation::{InputResolver, PreparedInputs, check_local_files, check_pipeline, prepare_submission};
