//! Owner of the live recurring jobs and single entry point for callers.
//!
//! Each enabled (location, kind) pair runs as one tokio task. Posting tasks
//! sleep until the next cron fire; review tasks tick on a fixed interval and
//! fire once immediately. A job is stopped through a watch channel, so a run
//! that is already in flight finishes but no further fire happens.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::automation::activity::{ActivityLog, ActivityRecord};
use crate::automation::credentials::{CredentialProvider, TokenResolver, TokenSource};
use crate::automation::locks::LocationLocks;
use crate::automation::posting::{GeneratedContent, PostResult, PostingPipeline};
use crate::automation::reviews::{CheckResult, ReviewReplyPipeline};
use crate::automation::schedule::{RecurrenceRule, ScheduleCompiler};
use crate::automation::types::{
    AutoPostingConfig, AutoReplyConfig, AutomationConfig, AutomationUpdate,
};
use crate::config::AutomationSettings;
use crate::error::{AutomationError, Result};
use crate::google::BusinessProfileApi;
use crate::llm::ContentGenerator;
use crate::store::{RepliedReviewStore, SettingsStore};

/// The two job kinds a location can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Posting,
    ReviewMonitoring,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct JobKey {
    location_id: String,
    kind: JobKind,
}

impl JobKey {
    fn new(location_id: &str, kind: JobKind) -> Self {
        Self {
            location_id: location_id.to_string(),
            kind,
        }
    }
}

struct JobHandle {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl JobHandle {
    fn is_live(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signal the task; an in-flight run is allowed to complete.
    fn stop(self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Collaborators the runtime is assembled from.
pub struct RuntimeDeps {
    pub settings: Arc<dyn SettingsStore>,
    pub replied: Arc<dyn RepliedReviewStore>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub generator: Arc<dyn ContentGenerator>,
    pub api: Arc<dyn BusinessProfileApi>,
    pub activity: Arc<ActivityLog>,
}

/// Status of one location as reported to callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub location_id: String,
    pub auto_posting: Option<PostingStatus>,
    pub auto_reply: Option<ReplyStatus>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostingStatus {
    pub enabled: bool,
    pub is_running: bool,
    pub frequency: String,
    pub schedule: String,
    pub timezone: String,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    /// Present when the schedule cannot be compiled.
    pub schedule_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyStatus {
    pub enabled: bool,
    pub is_running: bool,
    pub poll_interval_secs: u64,
    pub last_check: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct SchedulerRuntime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    settings: Arc<dyn SettingsStore>,
    compiler: ScheduleCompiler,
    posting: PostingPipeline,
    reviews: ReviewReplyPipeline,
    activity: Arc<ActivityLog>,
    jobs: Mutex<HashMap<JobKey, JobHandle>>,
    /// Held across a settings write and the job reconcile that follows it.
    updates: LocationLocks,
    review_poll_interval: Duration,
    initialized: AtomicBool,
}

impl SchedulerRuntime {
    pub fn new(deps: RuntimeDeps, settings: &AutomationSettings) -> Self {
        let resolver = TokenResolver::new(
            deps.credentials,
            settings.credential_policy,
            settings.request_timeout,
        );

        let posting = PostingPipeline::new(
            resolver.clone(),
            Arc::clone(&deps.generator),
            Arc::clone(&deps.api),
            Arc::clone(&deps.activity),
            settings.request_timeout,
        );
        let reviews = ReviewReplyPipeline::new(
            resolver,
            deps.generator,
            deps.api,
            deps.replied,
            Arc::clone(&deps.activity),
            settings.request_timeout,
            settings.reply_delay,
        );

        Self {
            inner: Arc::new(RuntimeInner {
                settings: deps.settings,
                compiler: ScheduleCompiler::new(&settings.default_timezone),
                posting,
                reviews,
                activity: deps.activity,
                jobs: Mutex::new(HashMap::new()),
                updates: LocationLocks::new(),
                review_poll_interval: settings.review_poll_interval,
                initialized: AtomicBool::new(false),
            }),
        }
    }

    /// Merge `update` into the stored settings and reconcile the location's jobs.
    pub async fn update_settings(
        &self,
        location_id: &str,
        update: AutomationUpdate,
    ) -> Result<AutomationConfig> {
        let _guard = self.inner.updates.acquire(location_id).await;
        let (previous_tx, previous_rx) = oneshot::channel();
        let now = Utc::now();
        let config = self
            .inner
            .settings
            .update(
                location_id,
                Box::new(move |base| {
                    let _ = previous_tx.send(base.clone());
                    update.apply_to(base, now)
                }),
            )
            .await?;
        let previous = previous_rx.await.ok().flatten();

        tracing::info!(
            location_id,
            posting = config.posting_enabled(),
            reply = config.reply_enabled(),
            "Automation settings updated"
        );

        self.inner
            .reconcile(location_id, previous.as_ref(), &config)
            .await;
        Ok(config)
    }

    pub async fn get_status(&self, location_id: &str) -> Result<StatusView> {
        let config = self
            .inner
            .settings
            .get(location_id)
            .await?
            .ok_or_else(|| AutomationError::NotConfigured(location_id.to_string()))?;

        let jobs = self.inner.jobs.lock().await;
        let is_live = |kind| {
            jobs.get(&JobKey::new(location_id, kind))
                .is_some_and(JobHandle::is_live)
        };

        let auto_posting = config.auto_posting.as_ref().map(|posting| {
            let is_running = is_live(JobKind::Posting);
            let compiled = self.inner.compiler.compile_posting(posting);
            let (timezone, next_run, schedule_error) = match &compiled {
                Ok(rule) => (
                    rule.timezone().to_string(),
                    is_running
                        .then(|| rule.next_after(Utc::now()))
                        .flatten(),
                    None,
                ),
                Err(e) => (
                    self.inner.compiler.default_timezone().to_string(),
                    None,
                    Some(e.to_string()),
                ),
            };
            PostingStatus {
                enabled: posting.enabled,
                is_running,
                frequency: posting.frequency.to_string(),
                schedule: posting.schedule.clone(),
                timezone,
                next_run,
                last_run: posting.last_run,
                schedule_error,
            }
        });

        let auto_reply = config.auto_reply.as_ref().map(|reply| ReplyStatus {
            enabled: reply.enabled,
            is_running: is_live(JobKind::ReviewMonitoring),
            poll_interval_secs: self.inner.review_poll_interval.as_secs(),
            last_check: reply.last_check,
        });

        Ok(StatusView {
            location_id: location_id.to_string(),
            auto_posting,
            auto_reply,
            updated_at: config.updated_at,
        })
    }

    /// Stop the posting job, if any. Settings are left untouched.
    pub async fn stop_auto_posting(&self, location_id: &str) {
        self.inner
            .stop_job(&JobKey::new(location_id, JobKind::Posting))
            .await;
    }

    /// Stop the review monitoring job, if any. Settings are left untouched.
    pub async fn stop_review_monitoring(&self, location_id: &str) {
        self.inner
            .stop_job(&JobKey::new(location_id, JobKind::ReviewMonitoring))
            .await;
    }

    /// Disable both automations for a location and stop its jobs.
    pub async fn disable_location(&self, location_id: &str) -> Result<AutomationConfig> {
        let _guard = self.inner.updates.acquire(location_id).await;
        if self.inner.settings.get(location_id).await?.is_none() {
            return Err(AutomationError::NotConfigured(location_id.to_string()));
        }

        let now = Utc::now();
        let config = self
            .inner
            .settings
            .update(
                location_id,
                Box::new(move |base| {
                    let mut config = base.unwrap_or_default();
                    if let Some(posting) = config.auto_posting.as_mut() {
                        posting.enabled = false;
                    }
                    if let Some(reply) = config.auto_reply.as_mut() {
                        reply.enabled = false;
                    }
                    config.updated_at = now;
                    config
                }),
            )
            .await?;

        self.stop_auto_posting(location_id).await;
        self.stop_review_monitoring(location_id).await;
        tracing::info!(location_id, "Automation disabled");
        Ok(config)
    }

    /// Start jobs for every enabled automation in the settings store.
    ///
    /// Returns the number of live jobs afterwards.
    pub async fn initialize_all(&self) -> Result<usize> {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            tracing::warn!("initialize_all called more than once, restarting existing jobs");
        }

        let entries = self.inner.settings.list().await?;
        for (location_id, config) in &entries {
            if let Some(posting) = config.auto_posting.as_ref().filter(|p| p.enabled) {
                self.inner.start_posting_job(location_id, posting).await;
            }
            if config.reply_enabled() {
                self.inner.start_review_job(location_id).await;
            }
        }

        let live = self.job_count().await;
        tracing::info!(locations = entries.len(), jobs = live, "Automation jobs initialized");
        Ok(live)
    }

    /// Stop every job. Settings are untouched.
    pub async fn stop_all(&self) {
        let mut jobs = self.inner.jobs.lock().await;
        let count = jobs.len();
        for (_, job) in jobs.drain() {
            job.stop();
        }
        self.inner.initialized.store(false, Ordering::SeqCst);
        tracing::info!(jobs = count, "All automation jobs stopped");
    }

    /// Number of live jobs.
    pub async fn job_count(&self) -> usize {
        self.inner
            .jobs
            .lock()
            .await
            .values()
            .filter(|j| j.is_live())
            .count()
    }

    /// Post now. Failures are recorded in the activity log and yield `None`.
    pub async fn create_automated_post(
        &self,
        location_id: &str,
        override_config: Option<AutoPostingConfig>,
    ) -> Option<PostResult> {
        self.trigger_post(location_id, override_config).await.ok()
    }

    /// Post now with a caller-supplied bearer token.
    pub async fn create_automated_post_with_token(
        &self,
        location_id: &str,
        token: SecretString,
        override_config: Option<AutoPostingConfig>,
    ) -> Result<PostResult> {
        let config = self.posting_config(location_id, override_config).await?;
        self.inner
            .posting
            .run(location_id, &config, &TokenSource::Supplied(token))
            .await
    }

    /// Post now, surfacing the typed error.
    pub async fn trigger_post(
        &self,
        location_id: &str,
        override_config: Option<AutoPostingConfig>,
    ) -> Result<PostResult> {
        let from_store = override_config.is_none();
        let config = self.posting_config(location_id, override_config).await?;
        let result = self
            .inner
            .posting
            .run(location_id, &config, &TokenSource::Provider)
            .await?;
        if from_store {
            self.inner.mark_posted(location_id).await;
        }
        Ok(result)
    }

    /// Check reviews now. Failures are recorded and yield `None`.
    pub async fn check_and_reply_to_reviews(&self, location_id: &str) -> Option<CheckResult> {
        self.trigger_review_check(location_id).await.ok()
    }

    /// Check reviews now, surfacing the typed error.
    pub async fn trigger_review_check(&self, location_id: &str) -> Result<CheckResult> {
        let config = self
            .inner
            .settings
            .get(location_id)
            .await?
            .and_then(|c| c.auto_reply)
            .ok_or_else(|| AutomationError::NotConfigured(location_id.to_string()))?;
        self.inner.run_review_check(location_id, &config).await
    }

    /// Generate a post preview without publishing it.
    pub async fn generate_post_content(
        &self,
        location_id: &str,
        override_config: Option<AutoPostingConfig>,
    ) -> Result<GeneratedContent> {
        let config = self.posting_config(location_id, override_config).await?;
        self.inner.posting.generate_post_content(&config).await
    }

    /// Every activity record, oldest first.
    pub async fn activity(&self) -> Vec<ActivityRecord> {
        self.inner.activity.read_all().await
    }

    pub async fn recent_activity(&self, limit: usize) -> Vec<ActivityRecord> {
        self.inner.activity.recent(limit).await
    }

    async fn posting_config(
        &self,
        location_id: &str,
        override_config: Option<AutoPostingConfig>,
    ) -> Result<AutoPostingConfig> {
        if let Some(config) = override_config {
            return Ok(config);
        }
        self.inner
            .settings
            .get(location_id)
            .await?
            .and_then(|c| c.auto_posting)
            .ok_or_else(|| AutomationError::NotConfigured(location_id.to_string()))
    }
}

impl RuntimeInner {
    async fn reconcile(
        self: &Arc<Self>,
        location_id: &str,
        previous: Option<&AutomationConfig>,
        config: &AutomationConfig,
    ) {
        let posting_key = JobKey::new(location_id, JobKind::Posting);
        match config.auto_posting.as_ref().filter(|p| p.enabled) {
            None => self.stop_job(&posting_key).await,
            Some(posting) => {
                let changed = previous
                    .and_then(|p| p.auto_posting.as_ref())
                    .is_none_or(|prev| prev.schedule_differs(posting));
                if changed || !self.is_live(&posting_key).await {
                    self.start_posting_job(location_id, posting).await;
                }
            }
        }

        let review_key = JobKey::new(location_id, JobKind::ReviewMonitoring);
        if config.reply_enabled() {
            if !self.is_live(&review_key).await {
                self.start_review_job(location_id).await;
            }
        } else {
            self.stop_job(&review_key).await;
        }
    }

    async fn is_live(&self, key: &JobKey) -> bool {
        self.jobs.lock().await.get(key).is_some_and(JobHandle::is_live)
    }

    async fn stop_job(&self, key: &JobKey) {
        if let Some(job) = self.jobs.lock().await.remove(key) {
            job.stop();
            tracing::info!(location_id = %key.location_id, kind = ?key.kind, "Job stopped");
        }
    }

    /// Replace the posting job. A schedule that does not compile leaves no job.
    async fn start_posting_job(self: &Arc<Self>, location_id: &str, config: &AutoPostingConfig) {
        let key = JobKey::new(location_id, JobKind::Posting);
        let mut jobs = self.jobs.lock().await;
        if let Some(old) = jobs.remove(&key) {
            old.stop();
        }

        let rule = match self.compiler.compile_posting(config) {
            Ok(rule) => rule,
            Err(e) => {
                tracing::warn!(location_id, error = %e, "Posting schedule rejected, no job started");
                return;
            }
        };

        tracing::info!(
            location_id,
            cron = rule.expression(),
            timezone = %rule.timezone(),
            "Posting job scheduled"
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(posting_loop(
            Arc::clone(self),
            location_id.to_string(),
            rule,
            stop_rx,
        ));
        jobs.insert(key, JobHandle { stop_tx, handle });
    }

    async fn start_review_job(self: &Arc<Self>, location_id: &str) {
        let key = JobKey::new(location_id, JobKind::ReviewMonitoring);
        let mut jobs = self.jobs.lock().await;
        if let Some(old) = jobs.remove(&key) {
            old.stop();
        }

        tracing::info!(
            location_id,
            interval = ?self.review_poll_interval,
            "Review monitoring scheduled"
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(review_loop(
            Arc::clone(self),
            location_id.to_string(),
            stop_rx,
        ));
        jobs.insert(key, JobHandle { stop_tx, handle });
    }

    /// Scheduled posting fire: uses the latest stored settings.
    async fn fire_posting(&self, location_id: &str) {
        let config = match self.settings.get(location_id).await {
            Ok(Some(AutomationConfig {
                auto_posting: Some(posting),
                ..
            })) if posting.enabled => posting,
            Ok(_) => {
                tracing::debug!(location_id, "Posting disabled since scheduling, skipping fire");
                return;
            }
            Err(e) => {
                tracing::error!(location_id, error = %e, "Could not load settings for scheduled post");
                return;
            }
        };

        if self
            .posting
            .run(location_id, &config, &TokenSource::Provider)
            .await
            .is_ok()
        {
            self.mark_posted(location_id).await;
        }
    }

    /// Scheduled review fire: uses the latest stored settings.
    async fn fire_review_check(&self, location_id: &str) {
        let config = match self.settings.get(location_id).await {
            Ok(Some(AutomationConfig {
                auto_reply: Some(reply),
                ..
            })) if reply.enabled => reply,
            Ok(_) => {
                tracing::debug!(location_id, "Review monitoring disabled, skipping fire");
                return;
            }
            Err(e) => {
                tracing::error!(location_id, error = %e, "Could not load settings for review check");
                return;
            }
        };

        let _ = self.run_review_check(location_id, &config).await;
    }

    async fn run_review_check(&self, location_id: &str, config: &AutoReplyConfig) -> Result<CheckResult> {
        let result = self.reviews.run(location_id, config).await?;
        let now = Utc::now();
        let updated = self
            .settings
            .update(
                location_id,
                Box::new(move |base| {
                    let mut config = base.unwrap_or_default();
                    if let Some(reply) = config.auto_reply.as_mut() {
                        reply.last_check = Some(now);
                    }
                    config
                }),
            )
            .await;
        if let Err(e) = updated {
            tracing::warn!(location_id, error = %e, "Could not record last review check");
        }
        Ok(result)
    }

    async fn mark_posted(&self, location_id: &str) {
        let now = Utc::now();
        let updated = self
            .settings
            .update(
                location_id,
                Box::new(move |base| {
                    let mut config = base.unwrap_or_default();
                    if let Some(posting) = config.auto_posting.as_mut() {
                        posting.last_run = Some(now);
                    }
                    config
                }),
            )
            .await;
        if let Err(e) = updated {
            tracing::warn!(location_id, error = %e, "Could not record last post time");
        }
    }
}

async fn posting_loop(
    inner: Arc<RuntimeInner>,
    location_id: String,
    rule: RecurrenceRule,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut last_fire: Option<DateTime<Utc>> = None;
    loop {
        let now = Utc::now();
        let after = last_fire.map_or(now, |fired| fired.max(now));
        let Some(next) = rule.next_after(after) else {
            tracing::warn!(location_id = %location_id, cron = rule.expression(), "Schedule has no future fire");
            return;
        };
        let wait = (next - now).to_std().unwrap_or_default();
        tracing::debug!(location_id = %location_id, next = %next, "Waiting for next post");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = stop_rx.changed() => return,
        }
        if *stop_rx.borrow() {
            return;
        }

        last_fire = Some(next);
        inner.fire_posting(&location_id).await;
    }
}

async fn review_loop(
    inner: Arc<RuntimeInner>,
    location_id: String,
    mut stop_rx: watch::Receiver<bool>,
) {
    let period = inner.review_poll_interval.max(Duration::from_secs(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop_rx.changed() => return,
        }
        if *stop_rx.borrow() {
            return;
        }

        inner.fire_review_check(&location_id).await;
    }
}
