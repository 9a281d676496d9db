//! Caption job lifecycle: admission, dispatch, status reports and usage credit

pub mod controller;
pub mod error;
pub mod submission;

pub use controller::{LifecycleController, ReportOutcome, RetryPolicy, StatusReport};
pub use error::{LifecycleError, Result};
pub use submission::{Submission, SubmissionReceipt, SubmissionService};
