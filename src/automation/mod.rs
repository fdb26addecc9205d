//! Scheduling and execution of per-location automations.
//!
//! Two automations exist per location:
//! - Auto-posting: a cron-scheduled job that generates and publishes a local post.
//! - Review monitoring: a polling job that replies to unanswered reviews.
//!
//! [`SchedulerRuntime`] owns the jobs; the pipelines do the actual work and
//! record every outcome in the [`ActivityLog`].

pub mod activity;
pub mod credentials;
pub mod cta;
mod locks;
pub mod posting;
pub mod reviews;
pub mod runtime;
pub mod schedule;
pub mod types;

pub use activity::{ActivityLog, ActivityRecord, ActivityType};
pub use credentials::{
    Credential, CredentialPolicy, CredentialProvider, ResolvedCredential, TokenResolver,
    TokenSource,
};
pub use cta::{ActionType, CallToAction};
pub use posting::{GeneratedContent, PostResult, PostingPipeline};
pub use reviews::{CheckResult, ReviewReplyPipeline, should_reply_to_review};
pub use runtime::{
    JobKind, PostingStatus, ReplyStatus, RuntimeDeps, SchedulerRuntime, StatusView,
};
pub use schedule::{RecurrenceRule, ScheduleCompiler};
pub use types::{
    AutoPostingConfig, AutoPostingUpdate, AutoReplyConfig, AutoReplyUpdate, AutomationConfig,
    AutomationUpdate, BusinessAddress, ButtonType, CallToActionSpec, DEFAULT_USER_ID, Frequency,
};
