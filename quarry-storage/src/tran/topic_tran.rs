//! Topic transactions
//!
//! Binds the retry engine to a topic's lock table. The caller supplies the
//! key fields of the lock row and a closure that does the work; the closure
//! sees the freshly re-read row and may run further statements on the same
//! session inside the lock.

use super::{run_with_retries, TranSteps};
use crate::session::PooledSession;
use crate::topic::Topic;
use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use futures_util::future::BoxFuture;
use quarry_core::{
    CodeError, ExecCxt, QuarryResult, Record, Value, CREATED_DATE, ENABLED, INITIAL_INSERT,
    LAST_TRAN_ID, MODIFIED_DATE, TOUCHED_DATE,
};
use quarry_sql::CompiledStatement;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Bookkeeping fields ignored when comparing rows.
pub const AUDIT_FIELDS: [&str; 4] = [TOUCHED_DATE, LAST_TRAN_ID, CREATED_DATE, MODIFIED_DATE];

/// Window in which a new modified date would not move forward.
const MODIFIED_DATE_SLACK_MS: i64 = 2_000;

/// State shared between the engine and the caller's closure.
pub struct TranContext {
    topic: Arc<Topic>,
    cxt: ExecCxt,
    tran_name: String,
    data: Record,
    insert_performed: bool,
    completed: bool,
    session: PooledSession,
}

impl TranContext {
    pub fn topic(&self) -> &Arc<Topic> {
        &self.topic
    }

    pub fn cxt(&self) -> &ExecCxt {
        &self.cxt
    }

    pub fn tran_name(&self) -> &str {
        &self.tran_name
    }

    /// The working record: the caller's key data merged with the locked row.
    pub fn data(&self) -> &Record {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Record {
        &mut self.data
    }

    /// Whether this call inserted the lock row.
    pub fn insert_performed(&self) -> bool {
        self.insert_performed
    }

    /// Skip the automatic write-back of the lock row for this attempt.
    pub fn mark_completed(&mut self) {
        self.completed = true;
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// The session holding the lock, for statements the topic does not own.
    pub fn session(&mut self) -> &mut PooledSession {
        &mut self.session
    }

    pub async fn execute(&mut self, stmt: &CompiledStatement, params: &Record) -> QuarryResult<u64> {
        self.topic
            .database()
            .execute_statement(&mut self.session, stmt, params)
            .await
    }

    pub async fn query(&mut self, stmt: &CompiledStatement, params: &Record) -> QuarryResult<Vec<Record>> {
        self.topic
            .database()
            .query_statement(&mut self.session, stmt, params)
            .await
    }

    pub async fn query_one(
        &mut self,
        stmt: &CompiledStatement,
        params: &Record,
    ) -> QuarryResult<Option<Record>> {
        self.topic
            .database()
            .query_one_statement(&mut self.session, stmt, params)
            .await
    }

    fn key_description(&self) -> String {
        self.topic
            .lock_table()
            .primary_key
            .iter()
            .map(|k| match self.data.get(k) {
                Some(v) => format!("{}={}", k, v.to_json()),
                None => format!("{}=null", k),
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Run `body` under the topic's touch lock for the row keyed by `data`.
///
/// Returns the working record as written back, or as the closure left it
/// when it marked the transaction completed.
pub async fn execute_topic_tran<F>(
    cxt: &ExecCxt,
    topic: Arc<Topic>,
    tran_name: &str,
    data: Record,
    body: F,
) -> QuarryResult<Record>
where
    F: for<'a> FnMut(&'a mut TranContext) -> BoxFuture<'a, QuarryResult<()>> + Send,
{
    let lock_table = topic.lock_table();
    for key in &lock_table.primary_key {
        if data.get_present(key).is_none() {
            return Err(CodeError::MissingKeyValue {
                table: lock_table.name.clone(),
                field: key.clone(),
            }
            .into());
        }
    }
    let statements = topic.statements();
    statements.touch_lock()?;
    statements.update()?;
    if statements.insert.returns_generated_keys {
        return Err(CodeError::AutoIncrementLockTable {
            table: lock_table.name.clone(),
        }
        .into());
    }

    let session = topic.database().session().await?;
    let topic_name = topic.name().to_string();
    let mut tran = TopicTran {
        ctx: TranContext {
            topic,
            cxt: cxt.clone(),
            tran_name: tran_name.to_string(),
            data,
            insert_performed: false,
            completed: false,
            session,
        },
        body,
    };
    run_with_retries(&topic_name, tran_name, &mut tran).await?;
    Ok(tran.ctx.data)
}

struct TopicTran<F> {
    ctx: TranContext,
    body: F,
}

#[async_trait]
impl<F> TranSteps for TopicTran<F>
where
    F: for<'a> FnMut(&'a mut TranContext) -> BoxFuture<'a, QuarryResult<()>> + Send,
{
    async fn insert_placeholder(&mut self) -> QuarryResult<()> {
        let topic = Arc::clone(&self.ctx.topic);
        let now = self.ctx.cxt.now();

        let mut row = self.ctx.data.clone();
        row.merge_missing(&topic.info().insert_defaults);
        row.set(TOUCHED_DATE, now);
        row.set(LAST_TRAN_ID, INITIAL_INSERT);
        row.set(CREATED_DATE, now);
        row.set(MODIFIED_DATE, now);
        if row.get_present(ENABLED).is_none() {
            row.set(ENABLED, true);
        }

        topic
            .database()
            .insert_statement(&mut self.ctx.session, &topic.statements().insert, &row)
            .await?;
        self.ctx.insert_performed = true;
        debug!(
            topic = %topic.name(),
            tran = %self.ctx.tran_name,
            key = %self.ctx.key_description(),
            "Inserted lock row"
        );
        Ok(())
    }

    async fn begin(&mut self) -> QuarryResult<()> {
        self.ctx.session.begin().await?;
        Ok(())
    }

    async fn take_lock(&mut self) -> QuarryResult<bool> {
        let topic = Arc::clone(&self.ctx.topic);
        self.ctx.completed = false;
        self.ctx.data.set(TOUCHED_DATE, self.ctx.cxt.now());
        let touched = self
            .ctx
            .session
            .execute(topic.statements().touch_lock()?, &self.ctx.data)
            .await?;
        Ok(touched > 0)
    }

    async fn execute(&mut self) -> QuarryResult<()> {
        let topic = Arc::clone(&self.ctx.topic);
        let statements = topic.statements();

        let row = topic
            .database()
            .query_one_statement(&mut self.ctx.session, &statements.select, &self.ctx.data)
            .await?
            .ok_or_else(|| CodeError::RowMissing {
                table: topic.lock_table().name.clone(),
                key: self.ctx.key_description(),
            })?;
        self.ctx.data.merge_from(&row, &[TOUCHED_DATE, LAST_TRAN_ID]);

        (self.body)(&mut self.ctx).await?;

        if self.ctx.completed {
            return Ok(());
        }
        prepare_for_write(&mut self.ctx.data, self.ctx.cxt.now(), Uuid::now_v7());
        self.ctx
            .session
            .execute(statements.update()?, &self.ctx.data)
            .await?;
        Ok(())
    }

    async fn commit(&mut self) -> QuarryResult<()> {
        self.ctx.session.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) {
        if !self.ctx.session.in_transaction() {
            return;
        }
        if let Err(e) = self.ctx.session.rollback().await {
            warn!(
                topic = %self.ctx.topic.name(),
                tran = %self.ctx.tran_name,
                error = %e,
                "Rollback failed"
            );
        }
    }
}

/// Stamp the audit fields of a record about to be written back.
///
/// The modified date always moves forward: when `now` falls at or up to two
/// seconds before the stored value, it becomes the stored value plus one
/// millisecond. Dates are truncated to milliseconds first.
pub fn prepare_for_write(data: &mut Record, now: DateTime<Utc>, tran_id: Uuid) {
    // Stored timestamps keep milliseconds only.
    let now = now.trunc_subsecs(3);
    data.set(LAST_TRAN_ID, tran_id.to_string());
    if data.get_present(CREATED_DATE).is_none() {
        data.set(CREATED_DATE, now);
    }
    let modified = match data.get_timestamp(MODIFIED_DATE) {
        Some(prev) if now <= prev && now >= prev - Duration::milliseconds(MODIFIED_DATE_SLACK_MS) => {
            prev + Duration::milliseconds(1)
        }
        _ => now,
    };
    data.set(MODIFIED_DATE, modified);
    data.set(ENABLED, true);
}

/// Whether two rows hold different data, ignoring audit fields. A field
/// missing on one side counts as null.
pub fn rows_differ(a: &Record, b: &Record) -> bool {
    let differs = |x: &Record, y: &Record| {
        x.iter().any(|(k, v)| {
            !AUDIT_FIELDS.contains(&k) && y.get(k).unwrap_or(&Value::Null) != v
        })
    };
    differs(a, b) || differs(b, a)
}
