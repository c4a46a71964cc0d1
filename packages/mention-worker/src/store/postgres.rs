use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres, Row};
use tokio::sync::Mutex;

use super::{truncate_error, Store};
use crate::error::WorkerError;
use crate::ids::{BrandId, KeywordId, UserId};
use crate::models::{MentionCandidate, PendingAlert, RunStatus, SourceTask};

/// Postgres-backed implementation of [`Store`].
///
/// Holds the connection that won the advisory lock for the run's lifetime in
/// `lock_conn`, rather than returning it to the pool; dropping a `PgStore`
/// (end of `run_once`, on every exit path) drops that connection and with it
/// the `pg_advisory_lock`. All other queries borrow a fresh connection from
/// the pool as usual.
pub struct PgStore {
    pool: PgPool,
    lock_conn: Mutex<Option<PoolConnection<Postgres>>>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_conn: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn try_acquire_singleton_lock(&self, key: i64) -> Result<bool, WorkerError> {
        let mut conn = self.pool.acquire().await?;
        let locked: bool = sqlx::query_scalar("select pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await?;
        if locked {
            *self.lock_conn.lock().await = Some(conn);
        }
        Ok(locked)
    }

    async fn create_run(&self) -> Result<uuid::Uuid, WorkerError> {
        let run_id: uuid::Uuid = sqlx::query_scalar(
            "insert into public.worker_runs (status) values ('running') returning id",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(run_id)
    }

    async fn finish_run(
        &self,
        run_id: uuid::Uuid,
        status: RunStatus,
        stats: Value,
        error: Option<&str>,
    ) -> Result<(), WorkerError> {
        sqlx::query(
            r#"
            update public.worker_runs
            set status = $1, stats = $2, error = $3, finished_at = now()
            where id = $4
            "#,
        )
        .bind(status.as_str())
        .bind(stats)
        .bind(error)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_today_source_requests(
        &self,
        source_keys: &[&str],
    ) -> Result<HashMap<String, i64>, WorkerError> {
        if source_keys.is_empty() {
            return Ok(HashMap::new());
        }
        let keys: Vec<String> = source_keys.iter().map(|k| k.to_string()).collect();
        let rows = sqlx::query(
            r#"
            select source_key, count
            from public.source_request_counters
            where utc_date = current_date and source_key = any($1)
            "#,
        )
        .bind(&keys)
        .fetch_all(&self.pool)
        .await?;

        let mut totals = HashMap::new();
        for row in rows {
            let key: String = row.try_get("source_key")?;
            let count: i64 = row.try_get("count")?;
            totals.insert(key, count);
        }
        Ok(totals)
    }

    async fn record_source_requests(
        &self,
        counts: &HashMap<String, i64>,
    ) -> Result<(), WorkerError> {
        for (source_key, count) in counts {
            if *count == 0 {
                continue;
            }
            sqlx::query(
                r#"
                insert into public.source_request_counters (utc_date, source_key, count)
                values (current_date, $1, $2)
                on conflict (utc_date, source_key) do update
                set count = public.source_request_counters.count + excluded.count
                "#,
            )
            .bind(source_key)
            .bind(count)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn fetch_due_source_tasks(
        &self,
        enabled_sources: &[String],
        batch_size: i64,
    ) -> Result<Vec<SourceTask>, WorkerError> {
        if enabled_sources.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            select
              ks.keyword_id,
              k.user_id,
              k.brand_id,
              k.query,
              ks.source_key as source,
              st.last_checked_at
            from public.keyword_sources ks
            join public.keywords k on k.id = ks.keyword_id
            join public.profiles p on p.id = k.user_id
            left join public.keyword_source_state st
              on st.keyword_id = ks.keyword_id
             and st.source_key = ks.source_key
            where ks.enabled = true
              and k.is_active = true
              and p.is_active = true
              and ks.source_key = any($1)
              and coalesce(st.next_poll_at, now()) <= now()
            order by coalesce(st.next_poll_at, now()) asc
            limit $2
            "#,
        )
        .bind(enabled_sources)
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            tasks.push(SourceTask {
                keyword_id: KeywordId::from_uuid(row.try_get("keyword_id")?),
                user_id: UserId::from_uuid(row.try_get("user_id")?),
                brand_id: row
                    .try_get::<Option<uuid::Uuid>, _>("brand_id")?
                    .map(BrandId::from_uuid),
                query: row.try_get("query")?,
                source: row.try_get("source")?,
                last_checked_at: row.try_get("last_checked_at")?,
            });
        }
        Ok(tasks)
    }

    async fn mark_source_task_success(
        &self,
        keyword_id: KeywordId,
        source: &str,
        checked_at: DateTime<Utc>,
        poll_interval_minutes: i64,
    ) -> Result<(), WorkerError> {
        let next_poll = checked_at + Duration::minutes(poll_interval_minutes.max(1));
        sqlx::query(
            r#"
            insert into public.keyword_source_state
              (keyword_id, source_key, last_checked_at, next_poll_at, last_error, updated_at)
            values ($1, $2, $3, $4, null, now())
            on conflict (keyword_id, source_key) do update
            set last_checked_at = excluded.last_checked_at,
                next_poll_at = excluded.next_poll_at,
                last_error = null,
                updated_at = now()
            "#,
        )
        .bind(keyword_id.into_uuid())
        .bind(source)
        .bind(checked_at)
        .bind(next_poll)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_source_task_error(
        &self,
        keyword_id: KeywordId,
        source: &str,
        error: &str,
        backoff_minutes: i64,
    ) -> Result<(), WorkerError> {
        let next_poll = Utc::now() + Duration::minutes(backoff_minutes.max(1));
        sqlx::query(
            r#"
            insert into public.keyword_source_state
              (keyword_id, source_key, next_poll_at, last_error, updated_at)
            values ($1, $2, $3, $4, now())
            on conflict (keyword_id, source_key) do update
            set next_poll_at = excluded.next_poll_at,
                last_error = excluded.last_error,
                updated_at = now()
            "#,
        )
        .bind(keyword_id.into_uuid())
        .bind(source)
        .bind(next_poll)
        .bind(truncate_error(error))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_mention(&self, candidate: &MentionCandidate) -> Result<i64, WorkerError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            insert into public.mentions (
              platform, external_id, url, title, body_excerpt,
              author, community, published_at, raw_payload, fetched_at
            )
            values ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
            on conflict (platform, external_id) do update
            set url = excluded.url,
                title = excluded.title,
                body_excerpt = excluded.body_excerpt,
                author = excluded.author,
                community = excluded.community,
                published_at = excluded.published_at,
                raw_payload = excluded.raw_payload,
                fetched_at = now()
            returning id
            "#,
        )
        .bind(&candidate.platform)
        .bind(&candidate.external_id)
        .bind(&candidate.url)
        .bind(&candidate.title)
        .bind(&candidate.body_excerpt)
        .bind(&candidate.author)
        .bind(&candidate.community)
        .bind(candidate.published_at)
        .bind(&candidate.raw_payload)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn insert_match(
        &self,
        user_id: UserId,
        keyword_id: KeywordId,
        brand_id: Option<BrandId>,
        mention_id: i64,
        matched_query: &str,
    ) -> Result<bool, WorkerError> {
        let inserted: Option<i64> = sqlx::query_scalar(
            r#"
            insert into public.mention_matches
              (user_id, keyword_id, brand_id, mention_id, matched_query)
            values ($1, $2, $3, $4, $5)
            on conflict (user_id, mention_id, keyword_id) do nothing
            returning id
            "#,
        )
        .bind(user_id.into_uuid())
        .bind(keyword_id.into_uuid())
        .bind(brand_id.map(BrandId::into_uuid))
        .bind(mention_id)
        .bind(matched_query)
        .fetch_optional(&self.pool)
        .await?;
        Ok(inserted.is_some())
    }

    async fn enqueue_alert(
        &self,
        user_id: UserId,
        keyword_id: KeywordId,
        mention_id: i64,
    ) -> Result<bool, WorkerError> {
        let inserted: Option<i64> = sqlx::query_scalar(
            r#"
            insert into public.alert_deliveries
              (user_id, keyword_id, mention_id, channel, status, next_attempt_at)
            values ($1, $2, $3, 'slack', 'pending', now())
            on conflict (user_id, mention_id, keyword_id, channel) do nothing
            returning id
            "#,
        )
        .bind(user_id.into_uuid())
        .bind(keyword_id.into_uuid())
        .bind(mention_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(inserted.is_some())
    }

    async fn fetch_pending_alerts(
        &self,
        limit: i64,
        max_retries: i32,
    ) -> Result<Vec<PendingAlert>, WorkerError> {
        let rows = sqlx::query(
            r#"
            select
              ad.id as alert_id,
              ad.retry_count,
              ad.user_id,
              ad.keyword_id,
              p.webhook_endpoint as webhook_url,
              k.query,
              b.name as brand_name,
              m.platform,
              m.external_id,
              m.url,
              coalesce(m.title, 'Mention') as title,
              coalesce(m.body_excerpt, '') as body_excerpt,
              m.author,
              m.community,
              m.published_at,
              m.raw_payload
            from public.alert_deliveries ad
            join public.profiles p on p.id = ad.user_id
            join public.keywords k on k.id = ad.keyword_id
            left join public.brands b on b.id = k.brand_id
            join public.mentions m on m.id = ad.mention_id
            where ad.status in ('pending', 'failed')
              and ad.next_attempt_at <= now()
              and ad.retry_count < $1
            order by ad.next_attempt_at asc
            limit $2
            "#,
        )
        .bind(max_retries)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut alerts = Vec::with_capacity(rows.len());
        for row in rows {
            let raw_payload: Option<Value> = row.try_get("raw_payload")?;
            alerts.push(PendingAlert {
                alert_id: row.try_get("alert_id")?,
                retry_count: row.try_get("retry_count")?,
                user_id: UserId::from_uuid(row.try_get("user_id")?),
                keyword_id: KeywordId::from_uuid(row.try_get("keyword_id")?),
                webhook_url: row.try_get("webhook_url")?,
                query: row.try_get("query")?,
                brand_name: row.try_get("brand_name")?,
                mention: MentionCandidate {
                    platform: row.try_get("platform")?,
                    external_id: row.try_get("external_id")?,
                    url: row.try_get("url")?,
                    title: row.try_get("title")?,
                    body_excerpt: row.try_get("body_excerpt")?,
                    author: row.try_get("author")?,
                    community: row.try_get("community")?,
                    published_at: row.try_get("published_at")?,
                    raw_payload: raw_payload.unwrap_or(Value::Null),
                },
            });
        }
        Ok(alerts)
    }

    async fn mark_alert_sent(&self, alert_id: i64) -> Result<(), WorkerError> {
        sqlx::query(
            r#"
            update public.alert_deliveries
            set status = 'sent', sent_at = now(), last_error = null, updated_at = now()
            where id = $1
            "#,
        )
        .bind(alert_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_alert_retry(
        &self,
        alert_id: i64,
        retry_count: i32,
        max_retries: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), WorkerError> {
        let final_status = if retry_count < max_retries {
            "failed"
        } else {
            "dead_letter"
        };
        sqlx::query(
            r#"
            update public.alert_deliveries
            set status = $1, retry_count = $2, next_attempt_at = $3, last_error = $4, updated_at = now()
            where id = $5
            "#,
        )
        .bind(final_status)
        .bind(retry_count)
        .bind(next_attempt_at)
        .bind(truncate_error(error))
        .bind(alert_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
