//! Touch-lock transaction engine
//!
//! A unit of work runs as a small state machine, retried as a whole:
//!
//! ```text
//! START -> [INSERT_PLACEHOLDER] -> TAKE_LOCK -> EXECUTE -> DONE
//! ```
//!
//! TAKE_LOCK and EXECUTE share one database transaction per attempt. When
//! the lock touches no row the attempt rolls back and the next attempt first
//! inserts a placeholder row, outside any transaction. Database-sourced
//! failures are retried; anything else aborts at once.

pub mod topic_tran;

pub use topic_tran::{execute_topic_tran, prepare_for_write, rows_differ, TranContext, AUDIT_FIELDS};

use async_trait::async_trait;
use quarry_core::{QuarryError, QuarryResult};
use tracing::{debug, error, warn};

/// Attempts per unit of work, counting the first.
pub const MAX_ATTEMPTS: u32 = 3;

/// Result of one step, tagged with what the engine should do next.
#[derive(Debug)]
pub enum StepOutcome<T> {
    Success(T),
    Retryable(QuarryError),
    Fatal(QuarryError),
}

impl<T> StepOutcome<T> {
    /// Database-sourced failures are retryable; every other failure is fatal.
    pub fn classify(result: QuarryResult<T>) -> Self {
        match result {
            Ok(v) => StepOutcome::Success(v),
            Err(e) if e.is_database_sourced() => StepOutcome::Retryable(e),
            Err(e) => StepOutcome::Fatal(e),
        }
    }
}

/// The steps of one unit of work.
#[async_trait]
pub trait TranSteps: Send {
    /// Insert the row to lock on. Runs outside any transaction.
    async fn insert_placeholder(&mut self) -> QuarryResult<()>;

    async fn begin(&mut self) -> QuarryResult<()>;

    /// Touch the lock row. Returns whether a row was touched.
    async fn take_lock(&mut self) -> QuarryResult<bool>;

    /// Re-read the locked row, run the caller's work and write back.
    async fn execute(&mut self) -> QuarryResult<()>;

    async fn commit(&mut self) -> QuarryResult<()>;

    /// Abandon the open transaction, if any.
    async fn rollback(&mut self);
}

/// Drive `steps` to completion under the retry policy.
pub async fn run_with_retries<S: TranSteps + ?Sized>(
    topic: &str,
    tran: &str,
    steps: &mut S,
) -> QuarryResult<()> {
    let mut need_insert = false;
    let mut last_error: Option<QuarryError> = None;

    for attempt in 1..=MAX_ATTEMPTS {
        if need_insert {
            need_insert = false;
            match StepOutcome::classify(steps.insert_placeholder().await) {
                StepOutcome::Success(()) => {
                    debug!(topic, tran, attempt, "Inserted lock placeholder");
                }
                StepOutcome::Retryable(e) => {
                    // Usually another caller inserted the same key first.
                    warn!(topic, tran, attempt, error = %e, "Placeholder insert failed, retrying");
                    last_error = Some(e);
                    continue;
                }
                StepOutcome::Fatal(e) => return Err(e),
            }
        }

        match locked_attempt(steps).await {
            StepOutcome::Success(true) => {
                debug!(topic, tran, attempt, "Transaction committed");
                return Ok(());
            }
            StepOutcome::Success(false) => {
                debug!(topic, tran, attempt, "Lock row missing");
                need_insert = true;
                last_error = Some(QuarryError::invariant(format!(
                    "lock not acquired for transaction {}",
                    tran
                )));
            }
            StepOutcome::Retryable(e) => {
                warn!(topic, tran, attempt, error = %e, "Transaction attempt failed, retrying");
                last_error = Some(e);
            }
            StepOutcome::Fatal(e) => return Err(e),
        }
    }

    let cause = last_error
        .unwrap_or_else(|| QuarryError::invariant(format!("transaction {} never ran", tran)));
    error!(topic, tran, attempts = MAX_ATTEMPTS, error = %cause, "Transaction retries exhausted");
    Err(QuarryError::RetriesExhausted {
        topic: topic.to_string(),
        tran: tran.to_string(),
        attempts: MAX_ATTEMPTS,
        cause: Box::new(cause),
    })
}

/// One TAKE_LOCK + EXECUTE pass inside a transaction. Anything short of a
/// commit rolls back.
async fn locked_attempt<S: TranSteps + ?Sized>(steps: &mut S) -> StepOutcome<bool> {
    let result = locked_steps(steps).await;
    if !matches!(result, Ok(true)) {
        steps.rollback().await;
    }
    StepOutcome::classify(result)
}

async fn locked_steps<S: TranSteps + ?Sized>(steps: &mut S) -> QuarryResult<bool> {
    steps.begin().await?;
    if !steps.take_lock().await? {
        return Ok(false);
    }
    steps.execute().await?;
    steps.commit().await?;
    Ok(true)
}
