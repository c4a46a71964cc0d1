//! Orchestration: the singleton lock, the due-task loop, and the alert
//! retry loop described as "the core" of this crate.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::json;

use crate::config::Settings;
use crate::models::RunStatus;
use crate::notifier::{HttpNotifier, Notifier};
use crate::registry::SOURCE_DEFINITIONS;
use crate::sources::Source;
use crate::store::Store;

/// Operation counters attached to the `worker_runs.stats` column. Matches the
/// counter vocabulary named throughout the pipeline design, not a schema the
/// store enforces — unknown/zero fields simply serialize as `0`.
#[derive(Debug, Default, Serialize)]
pub struct RunStats {
    pub tasks_polled: u64,
    pub tasks_succeeded: u64,
    pub task_errors: u64,
    pub tasks_deferred_budget: u64,
    pub source_mentions_fetched: u64,
    pub mentions_upserted: u64,
    pub matches_created: u64,
    pub matches_deduped: u64,
    pub alerts_enqueued: u64,
    pub alerts_deduped: u64,
    pub alerts_attempted: u64,
    pub alerts_sent: u64,
    pub alerts_failed: u64,
}

/// Everything `run_once` needs besides the store: HTTP client + settings are
/// bundled so constructing it once in `main` and threading it through is a
/// single argument, matching the teacher's `ServerDeps`-style bundling.
pub struct Pipeline {
    store: Arc<dyn Store>,
    settings: Settings,
    adapters: HashMap<&'static str, Arc<dyn Source>>,
    notifier: Arc<dyn Notifier>,
}

impl Pipeline {
    /// Production constructor: builds one `reqwest::Client` shared by every
    /// adapter and the notifier, and constructs adapters from the registry
    /// in registry order (logging `source_disabled` for anything declined).
    pub fn new(store: Arc<dyn Store>, settings: Settings) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(
                settings.request_timeout_seconds,
            ))
            .build()?;
        let adapters = build_adapters(&settings, &http_client);
        let notifier = Arc::new(HttpNotifier::new(http_client));
        Ok(Self {
            store,
            settings,
            adapters,
            notifier,
        })
    }

    /// Test constructor: bypasses registry-based adapter/notifier
    /// construction entirely so the orchestration logic can be driven by
    /// fakes, without a database or outbound network access.
    pub fn with_adapters(
        store: Arc<dyn Store>,
        settings: Settings,
        adapters: HashMap<&'static str, Arc<dyn Source>>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            settings,
            adapters,
            notifier,
        }
    }

    /// Runs one pass end to end; returns the process exit code.
    pub async fn run_once(&self) -> i32 {
        let locked = match self.store.try_acquire_singleton_lock(self.settings.worker_lock_key).await
        {
            Ok(locked) => locked,
            Err(error) => {
                tracing::error!(event = "worker_failed", error = %error, "failed acquiring lock");
                return 1;
            }
        };
        if !locked {
            tracing::info!(event = "worker_skip", reason = "lock_not_acquired");
            return 0;
        }

        let run_id = match self.store.create_run().await {
            Ok(id) => id,
            Err(error) => {
                tracing::error!(event = "worker_failed", error = %error, "failed creating run");
                return 1;
            }
        };
        tracing::info!(event = "worker_start", run_id = %run_id);

        match self.drive_run(run_id).await {
            Ok(stats) => {
                let _ = self
                    .store
                    .finish_run(run_id, RunStatus::Success, json!(stats), None)
                    .await;
                tracing::info!(event = "worker_success", run_id = %run_id, stats = ?stats);
                0
            }
            Err((stats, error)) => {
                let message = error.to_string();
                let _ = self
                    .store
                    .finish_run(run_id, RunStatus::Failed, json!(stats), Some(&message))
                    .await;
                tracing::error!(event = "worker_failed", run_id = %run_id, error = %message);
                1
            }
        }
    }

    async fn drive_run(&self, _run_id: uuid::Uuid) -> Result<RunStats, (RunStats, anyhow::Error)> {
        let mut stats = RunStats::default();

        let mut today = self
            .store
            .fetch_today_source_requests(&self.settings.source_keys)
            .await
            .map_err(|e| (RunStats::default(), e.into()))?;

        let mut this_run: HashMap<String, i64> = HashMap::new();
        if let Err(error) = self
            .process_source_tasks(&mut stats, &mut this_run, &mut today)
            .await
        {
            return Err((stats, error));
        }

        if let Err(error) = self.process_alerts(&mut stats).await {
            return Err((stats, error));
        }

        if let Err(error) = self.store.record_source_requests(&this_run).await {
            return Err((stats, error.into()));
        }

        Ok(stats)
    }

    async fn process_source_tasks(
        &self,
        stats: &mut RunStats,
        this_run: &mut HashMap<String, i64>,
        today: &mut HashMap<String, i64>,
    ) -> anyhow::Result<()> {
        let mut enabled_sources: Vec<String> =
            self.adapters.keys().map(|k| k.to_string()).collect();
        enabled_sources.sort();

        let tasks = self
            .store
            .fetch_due_source_tasks(&enabled_sources, self.settings.source_task_batch_size)
            .await?;
        stats.tasks_polled += tasks.len() as u64;

        for task in tasks {
            let Some(adapter) = self.adapters.get(task.source.as_str()) else {
                self.store
                    .mark_source_task_error(
                        task.keyword_id,
                        &task.source,
                        "Source not enabled in worker",
                        self.settings.poll_interval_minutes,
                    )
                    .await?;
                stats.task_errors += 1;
                continue;
            };

            if let Some(limit) = self.settings.daily_request_limit_for_source(&task.source) {
                let used = today.get(&task.source).copied().unwrap_or(0);
                if used >= limit {
                    let backoff = minutes_until_utc_day_rollover(Utc::now());
                    self.store
                        .mark_source_task_error(
                            task.keyword_id,
                            &task.source,
                            "Daily source request budget reached; deferred until UTC day rollover",
                            backoff,
                        )
                        .await?;
                    stats.tasks_deferred_budget += 1;
                    continue;
                }
            }

            let now = Utc::now();
            let default_since = now - Duration::days(1);
            let since = task.last_checked_at.unwrap_or(default_since)
                - Duration::minutes(self.settings.overlap_minutes.max(0));

            let poll_interval = self.settings.poll_interval_for_source(&task.source);

            match adapter
                .search(&task.query, since, self.settings.per_source_limit)
                .await
            {
                Ok(mentions) => {
                    *today.entry(task.source.clone()).or_insert(0) += 1;
                    *this_run.entry(task.source.clone()).or_insert(0) += 1;
                    stats.source_mentions_fetched += mentions.len() as u64;

                    let mut task_failed = None;
                    for mention in &mentions {
                        match self.persist_mention(&task, mention, stats).await {
                            Ok(()) => {}
                            Err(error) => {
                                task_failed = Some(error);
                                break;
                            }
                        }
                    }

                    if let Some(error) = task_failed {
                        self.store
                            .mark_source_task_error(
                                task.keyword_id,
                                &task.source,
                                &error.to_string(),
                                poll_interval,
                            )
                            .await?;
                        stats.task_errors += 1;
                        continue;
                    }

                    self.store
                        .mark_source_task_success(task.keyword_id, &task.source, now, poll_interval)
                        .await?;
                    stats.tasks_succeeded += 1;
                }
                Err(error) => {
                    self.store
                        .mark_source_task_error(
                            task.keyword_id,
                            &task.source,
                            &error.to_string(),
                            poll_interval,
                        )
                        .await?;
                    stats.task_errors += 1;
                }
            }
        }

        Ok(())
    }

    async fn persist_mention(
        &self,
        task: &crate::models::SourceTask,
        mention: &crate::models::MentionCandidate,
        stats: &mut RunStats,
    ) -> anyhow::Result<()> {
        let mention_id = self.store.upsert_mention(mention).await?;
        stats.mentions_upserted += 1;

        let created = self
            .store
            .insert_match(
                task.user_id,
                task.keyword_id,
                task.brand_id,
                mention_id,
                &task.query,
            )
            .await?;
        if !created {
            stats.matches_deduped += 1;
            return Ok(());
        }
        stats.matches_created += 1;

        let enqueued = self
            .store
            .enqueue_alert(task.user_id, task.keyword_id, mention_id)
            .await?;
        if enqueued {
            stats.alerts_enqueued += 1;
        } else {
            stats.alerts_deduped += 1;
        }
        Ok(())
    }

    async fn process_alerts(&self, stats: &mut RunStats) -> anyhow::Result<()> {
        let alerts = self
            .store
            .fetch_pending_alerts(self.settings.alert_batch_size, self.settings.max_alert_retries)
            .await?;
        stats.alerts_attempted += alerts.len() as u64;

        for alert in alerts {
            let valid_endpoint = alert
                .webhook_url
                .as_deref()
                .is_some_and(|url| url.starts_with("http"));

            if !valid_endpoint {
                self.schedule_retry(&alert, "Slack webhook missing or invalid").await?;
                stats.alerts_failed += 1;
                continue;
            }

            let endpoint = alert.webhook_url.as_deref().unwrap();
            match self.notifier.send(endpoint, &alert).await {
                Ok(()) => {
                    self.store.mark_alert_sent(alert.alert_id).await?;
                    stats.alerts_sent += 1;
                }
                Err(error) => {
                    self.schedule_retry(&alert, &error.to_string()).await?;
                    stats.alerts_failed += 1;
                }
            }
        }

        Ok(())
    }

    async fn schedule_retry(
        &self,
        alert: &crate::models::PendingAlert,
        error: &str,
    ) -> anyhow::Result<()> {
        let next_retry = alert.retry_count + 1;
        let delay = retry_delay_seconds(
            next_retry,
            self.settings.retry_base_seconds,
            self.settings.retry_max_seconds,
        );
        let next_attempt_at = Utc::now() + Duration::seconds(delay);
        self.store
            .mark_alert_retry(
                alert.alert_id,
                next_retry,
                self.settings.max_alert_retries,
                next_attempt_at,
                error,
            )
            .await?;
        Ok(())
    }
}

/// Constructs one adapter per enabled, built source in registry order,
/// logging `source_disabled` for anything the registry declines.
fn build_adapters(
    settings: &Settings,
    http_client: &Client,
) -> HashMap<&'static str, Arc<dyn Source>> {
    let mut adapters = HashMap::new();
    for definition in SOURCE_DEFINITIONS {
        if !settings.is_source_enabled(definition.key) {
            continue;
        }

        let Some(builder) = definition.builder else {
            tracing::info!(
                event = "source_disabled",
                source = definition.key,
                reason = "unsupported_adapter"
            );
            continue;
        };

        let (adapter, reason) = builder(http_client, settings);
        match adapter {
            Some(adapter) => {
                adapters.insert(definition.key, adapter);
            }
            None => {
                tracing::info!(
                    event = "source_disabled",
                    source = definition.key,
                    reason = reason.unwrap_or("missing_credentials")
                );
            }
        }
    }
    adapters
}

/// `delay = min(base * 2^(next_retry - 1), max)`.
fn retry_delay_seconds(next_retry: i32, base_seconds: i64, max_seconds: i64) -> i64 {
    let exponent = (next_retry - 1).max(0) as u32;
    let delay = base_seconds.saturating_mul(2i64.saturating_pow(exponent));
    delay.min(max_seconds)
}

/// Minutes until the next UTC midnight, floor-divided, minimum 1.
fn minutes_until_utc_day_rollover(now: DateTime<Utc>) -> i64 {
    let seconds_into_day =
        i64::from(now.hour()) * 3600 + i64::from(now.minute()) * 60 + i64::from(now.second());
    let remaining_seconds = (86_400 - seconds_into_day).max(0);
    (remaining_seconds / 60).max(1).min(1440)
}
