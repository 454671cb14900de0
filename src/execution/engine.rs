//! Batch execution engine
//!
//! Runs a batch of work units under a concurrency strategy with per-unit
//! linear-backoff retry. At most `max_concurrent_batches` batches run at once;
//! further batches wait for a slot in arrival order.

use super::context::{
    BatchStatus, ExecutionConfig, ExecutionContext, ExecutionStrategy, UnitResult, UnitStatus,
};
use super::runner::UnitRunner;
use crate::budget::{BudgetController, LimitRequest};
use crate::events::{batch_topic, Event, EventBus, EventKind};
use crate::metrics;
use crate::retry::{RetryDecision, RetryPolicy, RetryableError};
use crate::{GodelError, Result};
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Engine counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub total_batches: u64,
    pub completed_batches: u64,
    pub failed_batches: u64,
    pub cancelled_batches: u64,
    /// Batches currently queued or running
    pub active_batches: usize,
    pub units_succeeded: u64,
    pub units_failed: u64,
    pub total_cost: f64,
}

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    units_succeeded: AtomicU64,
    units_failed: AtomicU64,
    /// Cost in micro-dollars
    cost_micros: AtomicU64,
}

#[derive(Default)]
struct Handles {
    tokens: HashMap<String, CancellationToken>,
    permits: HashMap<String, OwnedSemaphorePermit>,
}

struct Inner {
    config: ExecutionConfig,
    runner: Arc<dyn UnitRunner>,
    budget: Arc<BudgetController>,
    bus: EventBus,
    contexts: RwLock<HashMap<String, ExecutionContext>>,
    handles: Mutex<Handles>,
    slots: Arc<Semaphore>,
    counters: Counters,
}

/// Execution engine
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ExecutionEngine {
    inner: Arc<Inner>,
}

impl ExecutionEngine {
    pub fn new(
        config: ExecutionConfig,
        runner: Arc<dyn UnitRunner>,
        budget: Arc<BudgetController>,
        bus: EventBus,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent_batches.max(1)));
        Self {
            inner: Arc::new(Inner {
                config,
                runner,
                budget,
                bus,
                contexts: RwLock::new(HashMap::new()),
                handles: Mutex::new(Handles::default()),
                slots,
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.inner.config
    }

    fn handles(&self) -> MutexGuard<'_, Handles> {
        self.inner
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a batch with the engine's configured strategy
    pub async fn execute(
        &self,
        batch_id: impl Into<String>,
        unit_ids: Vec<String>,
    ) -> Result<ExecutionContext> {
        let config = self.inner.config.clone();
        self.execute_with(batch_id, unit_ids, config).await
    }

    /// Run a batch with an explicit configuration
    ///
    /// The engine-wide batch slots and unit cap still apply.
    pub async fn execute_with(
        &self,
        batch_id: impl Into<String>,
        unit_ids: Vec<String>,
        config: ExecutionConfig,
    ) -> Result<ExecutionContext> {
        let batch_id = batch_id.into();

        let limit = self.inner.config.max_units_per_batch;
        if unit_ids.len() > limit {
            return Err(GodelError::MaxAgentsExceeded {
                requested: unit_ids.len(),
                limit,
            });
        }

        let check = self.inner.budget.check_limits(LimitRequest::default());
        if !check.allowed {
            return Err(GodelError::BudgetExceeded(check.reason_or_default()));
        }

        let token = CancellationToken::new();
        {
            let mut contexts = self.inner.contexts.write().await;
            if contexts
                .get(&batch_id)
                .is_some_and(|ctx| !ctx.status.is_finished())
            {
                return Err(GodelError::Other(format!(
                    "batch '{}' is already active",
                    batch_id
                )));
            }
            contexts.insert(
                batch_id.clone(),
                ExecutionContext::new(batch_id.clone(), config.clone(), &unit_ids),
            );
            self.handles()
                .tokens
                .insert(batch_id.clone(), token.clone());
        }
        self.inner.counters.total.fetch_add(1, Ordering::Relaxed);

        // Fair semaphore: waiters are admitted in arrival order
        let permit = tokio::select! {
            permit = self.inner.slots.clone().acquire_owned() => permit
                .map_err(|_| GodelError::Execution("batch slots closed".to_string()))?,
            _ = token.cancelled() => {
                debug!(batch_id = %batch_id, "Queued batch cancelled");
                return self.finish(&batch_id).await;
            }
        };
        self.handles().permits.insert(batch_id.clone(), permit);

        {
            let mut contexts = self.inner.contexts.write().await;
            if let Some(ctx) = contexts.get_mut(&batch_id) {
                if ctx.status == BatchStatus::Pending {
                    ctx.status = BatchStatus::Running;
                    ctx.started_at = Some(Utc::now());
                }
            }
        }

        info!(batch_id = %batch_id, units = unit_ids.len(), strategy = %config.strategy, "Batch started");
        self.inner.bus.publish(
            Event::new(batch_topic(&batch_id), batch_id.clone(), EventKind::BatchStarted)
                .with_transition(BatchStatus::Pending, BatchStatus::Running)
                .with_payload(json!({
                    "units": unit_ids.len(),
                    "strategy": config.strategy,
                })),
        );

        let units: Vec<(usize, String)> = unit_ids.into_iter().enumerate().collect();
        match config.strategy {
            ExecutionStrategy::Serial => {
                for (index, unit_id) in units {
                    if token.is_cancelled() {
                        break;
                    }
                    self.run_unit(&batch_id, index, unit_id, &config, &token)
                        .await;
                }
            }
            ExecutionStrategy::Parallel => {
                join_all(units.into_iter().map(|(index, unit_id)| {
                    self.run_unit(&batch_id, index, unit_id, &config, &token)
                }))
                .await;
            }
            ExecutionStrategy::Hybrid => {
                for chunk in units.chunks(config.batch_size.max(1)) {
                    if token.is_cancelled() {
                        break;
                    }
                    join_all(chunk.iter().cloned().map(|(index, unit_id)| {
                        self.run_unit(&batch_id, index, unit_id, &config, &token)
                    }))
                    .await;
                }
            }
        }

        self.finish(&batch_id).await
    }

    /// Run one unit with retry, writing its result into the batch context
    async fn run_unit(
        &self,
        batch_id: &str,
        index: usize,
        unit_id: String,
        config: &ExecutionConfig,
        token: &CancellationToken,
    ) {
        let policy = RetryPolicy::linear(config.retry_attempts.saturating_sub(1), config.retry_delay());
        let started_at = Utc::now();
        self.update_unit(batch_id, index, |slot| {
            slot.status = UnitStatus::Running;
            slot.started_at = Some(started_at);
        })
        .await;

        let mut retries = 0u32;
        let result = loop {
            let attempt = tokio::select! {
                res = self.inner.runner.run(batch_id, &unit_id, retries + 1) => res,
                _ = token.cancelled() => return,
            };

            let error = match attempt {
                Ok(outcome) => break Ok(outcome),
                Err(e) => e,
            };

            retries += 1;
            let delay = match error.retry_decision() {
                RetryDecision::NoRetry => None,
                RetryDecision::Retry => Some(policy.backoff_duration(retries)),
                RetryDecision::RetryAfter(delay) => Some(delay),
            };

            match delay {
                Some(delay) if policy.allows_retry(retries) => {
                    debug!(batch_id, unit_id = %unit_id, retries, delay_ms = delay.as_millis() as u64, error = %error, "Retrying unit");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = token.cancelled() => return,
                    }
                }
                _ => break Err(error),
            }
        };

        let completed_at = Utc::now();
        match result {
            Ok(outcome) => {
                self.inner
                    .counters
                    .units_succeeded
                    .fetch_add(1, Ordering::Relaxed);
                self.update_unit(batch_id, index, |slot| {
                    slot.status = UnitStatus::Succeeded;
                    slot.cost = outcome.cost;
                    slot.output = outcome.output;
                    slot.retries = retries;
                    slot.completed_at = Some(completed_at);
                })
                .await;
            }
            Err(error) => {
                self.inner
                    .counters
                    .units_failed
                    .fetch_add(1, Ordering::Relaxed);
                warn!(batch_id, unit_id = %unit_id, retries, error = %error, "Unit failed permanently");
                self.update_unit(batch_id, index, |slot| {
                    slot.status = UnitStatus::Failed;
                    slot.error = Some(error.to_string());
                    slot.retries = retries;
                    slot.completed_at = Some(completed_at);
                })
                .await;
            }
        }
    }

    /// Apply `f` to a unit slot unless the batch was cancelled
    async fn update_unit(&self, batch_id: &str, index: usize, f: impl FnOnce(&mut UnitResult)) {
        let mut contexts = self.inner.contexts.write().await;
        let Some(ctx) = contexts.get_mut(batch_id) else {
            return;
        };
        if ctx.status == BatchStatus::Cancelled {
            return;
        }
        if let Some(slot) = ctx.results.get_mut(index) {
            f(slot);
        }
        ctx.refresh();
    }

    /// Settle the batch status, record spend and release the slot
    async fn finish(&self, batch_id: &str) -> Result<ExecutionContext> {
        let ctx = {
            let mut contexts = self.inner.contexts.write().await;
            let ctx = contexts
                .get_mut(batch_id)
                .ok_or_else(|| GodelError::BatchNotFound(batch_id.to_string()))?;

            let settled_here = !ctx.status.is_finished();
            if settled_here {
                ctx.refresh();
                ctx.status = if ctx.failed() > 0 {
                    BatchStatus::Failed
                } else {
                    BatchStatus::Completed
                };
                ctx.completed_at = Some(Utc::now());
            }
            (ctx.clone(), settled_here)
        };
        let (ctx, settled_here) = ctx;

        {
            let mut handles = self.handles();
            handles.tokens.remove(batch_id);
            handles.permits.remove(batch_id);
        }

        if ctx.total_cost > 0.0 {
            self.inner.budget.record_spend(ctx.total_cost);
        }
        self.inner
            .counters
            .cost_micros
            .fetch_add((ctx.total_cost * 1_000_000.0).round() as u64, Ordering::Relaxed);

        match ctx.status {
            BatchStatus::Completed => {
                self.inner.counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            BatchStatus::Failed => {
                self.inner.counters.failed.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        metrics::record_batch(ctx.status, ctx.duration().unwrap_or_default());

        if settled_here {
            self.inner.bus.publish(
                Event::new(batch_topic(batch_id), batch_id.to_string(), EventKind::BatchCompleted)
                    .with_transition(BatchStatus::Running, ctx.status)
                    .with_payload(json!({
                        "succeeded": ctx.succeeded(),
                        "failed": ctx.failed(),
                        "total_cost": ctx.total_cost,
                    })),
            );
        }

        info!(
            batch_id,
            status = %ctx.status,
            succeeded = ctx.succeeded(),
            failed = ctx.failed(),
            total_cost = ctx.total_cost,
            "Batch finished"
        );

        self.schedule_discard(batch_id.to_string());
        Ok(ctx)
    }

    /// Cancel a queued or running batch; a no-op once finished
    pub async fn cancel_batch(&self, batch_id: &str) -> Result<ExecutionContext> {
        let ctx = {
            let mut contexts = self.inner.contexts.write().await;
            let ctx = contexts
                .get_mut(batch_id)
                .ok_or_else(|| GodelError::BatchNotFound(batch_id.to_string()))?;

            if ctx.status.is_finished() {
                return Ok(ctx.clone());
            }

            let previous = ctx.status;
            ctx.cancel_pending();
            (ctx.clone(), previous)
        };
        let (ctx, previous) = ctx;

        {
            let mut handles = self.handles();
            if let Some(token) = handles.tokens.get(batch_id) {
                token.cancel();
            }
            // Frees the slot for the next queued batch
            handles.permits.remove(batch_id);
        }

        self.inner.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        self.inner.bus.publish(
            Event::new(batch_topic(batch_id), batch_id.to_string(), EventKind::BatchCancelled)
                .with_transition(previous, BatchStatus::Cancelled)
                .with_payload(json!({
                    "succeeded": ctx.succeeded(),
                    "cancelled": ctx.cancelled(),
                })),
        );
        info!(batch_id, "Batch cancelled");
        Ok(ctx)
    }

    fn schedule_discard(&self, batch_id: String) {
        let cooldown = self.inner.config.cooldown();
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let mut contexts = inner.contexts.write().await;
            if contexts
                .get(&batch_id)
                .is_some_and(|ctx| ctx.status.is_finished())
            {
                contexts.remove(&batch_id);
                debug!(batch_id = %batch_id, "Discarded batch context after cooldown");
            }
        });
    }

    pub async fn get_context(&self, batch_id: &str) -> Option<ExecutionContext> {
        self.inner.contexts.read().await.get(batch_id).cloned()
    }

    /// Ids of batches that are queued or running
    pub async fn active_batches(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .contexts
            .read()
            .await
            .values()
            .filter(|ctx| !ctx.status.is_finished())
            .map(|ctx| ctx.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Discard every finished context now
    pub async fn cleanup_completed(&self) -> usize {
        let mut contexts = self.inner.contexts.write().await;
        let before = contexts.len();
        contexts.retain(|_, ctx| !ctx.status.is_finished());
        before - contexts.len()
    }

    pub async fn stats(&self) -> EngineStats {
        let c = &self.inner.counters;
        EngineStats {
            total_batches: c.total.load(Ordering::Relaxed),
            completed_batches: c.completed.load(Ordering::Relaxed),
            failed_batches: c.failed.load(Ordering::Relaxed),
            cancelled_batches: c.cancelled.load(Ordering::Relaxed),
            active_batches: self.active_batches().await.len(),
            units_succeeded: c.units_succeeded.load(Ordering::Relaxed),
            units_failed: c.units_failed.load(Ordering::Relaxed),
            total_cost: c.cost_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::BudgetLimits;
    use crate::execution::SimulatedRunner;
    use std::time::Duration;

    fn units(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("unit-{}", i)).collect()
    }

    fn engine_with(
        config: ExecutionConfig,
        runner: Arc<SimulatedRunner>,
    ) -> (ExecutionEngine, Arc<BudgetController>, EventBus) {
        let budget = Arc::new(BudgetController::default());
        let bus = EventBus::new(256);
        let engine = ExecutionEngine::new(config, runner, budget.clone(), bus.clone());
        (engine, budget, bus)
    }

    fn fast(strategy: ExecutionStrategy) -> ExecutionConfig {
        ExecutionConfig::default()
            .with_strategy(strategy)
            .with_retry(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_serial_batch() {
        let runner = Arc::new(SimulatedRunner::new(0.5, Duration::from_millis(1)));
        let (engine, budget, _) = engine_with(fast(ExecutionStrategy::Serial), runner.clone());

        let ctx = engine.execute("b1", units(3)).await.unwrap();
        assert_eq!(ctx.status, BatchStatus::Completed);
        assert_eq!(ctx.progress, 100.0);
        assert_eq!(ctx.total_cost, 1.5);
        assert_eq!(runner.peak_concurrency(), 1);
        assert_eq!(budget.status().total_spend, 1.5);
    }

    #[tokio::test]
    async fn test_parallel_settles_all() {
        let runner = Arc::new(
            SimulatedRunner::new(1.0, Duration::from_millis(5)).with_failing_unit("unit-2"),
        );
        let (engine, _, _) = engine_with(fast(ExecutionStrategy::Parallel), runner.clone());

        let ctx = engine.execute("b1", units(4)).await.unwrap();
        assert_eq!(ctx.status, BatchStatus::Failed);
        assert_eq!(ctx.succeeded(), 3);
        assert_eq!(ctx.results[1].status, UnitStatus::Failed);
        assert_eq!(ctx.results[1].retries, 3);
        assert!(ctx.results[1].error.is_some());
        assert_eq!(runner.peak_concurrency(), 4);
    }

    #[tokio::test]
    async fn test_hybrid_single_chunk_counts_successes_only() {
        let runner = Arc::new(
            SimulatedRunner::new(0.25, Duration::from_millis(10)).with_failing_unit("unit-3"),
        );
        let (engine, _, _) = engine_with(
            fast(ExecutionStrategy::Hybrid).with_batch_size(5),
            runner.clone(),
        );

        let ctx = engine.execute("b1", units(5)).await.unwrap();
        assert_eq!(runner.peak_concurrency(), 5);
        assert_eq!(ctx.succeeded(), 4);
        assert_eq!(ctx.failed(), 1);
        assert_eq!(ctx.total_cost, 1.0);
        assert_eq!(ctx.status, BatchStatus::Failed);
    }

    #[tokio::test]
    async fn test_hybrid_chunks() {
        let runner = Arc::new(SimulatedRunner::new(0.1, Duration::from_millis(5)));
        let (engine, _, _) = engine_with(
            fast(ExecutionStrategy::Hybrid).with_batch_size(2),
            runner.clone(),
        );

        let ctx = engine.execute("b1", units(5)).await.unwrap();
        assert_eq!(ctx.succeeded(), 5);
        assert_eq!(runner.peak_concurrency(), 2);
    }

    #[tokio::test]
    async fn test_flaky_unit_recovers() {
        let runner = Arc::new(
            SimulatedRunner::new(0.1, Duration::ZERO).with_flaky_unit("unit-1", 2),
        );
        let (engine, _, _) = engine_with(fast(ExecutionStrategy::Serial), runner.clone());

        let ctx = engine.execute("b1", units(1)).await.unwrap();
        assert_eq!(ctx.status, BatchStatus::Completed);
        assert_eq!(ctx.results[0].retries, 2);
        assert_eq!(runner.calls(), 3);
    }

    #[tokio::test]
    async fn test_unit_cap() {
        let runner = Arc::new(SimulatedRunner::new(0.1, Duration::ZERO));
        let mut config = fast(ExecutionStrategy::Serial);
        config.max_units_per_batch = 2;
        let (engine, _, _) = engine_with(config, runner);

        let err = engine.execute("b1", units(3)).await.unwrap_err();
        assert!(matches!(err, GodelError::MaxAgentsExceeded { requested: 3, limit: 2 }));
    }

    #[tokio::test]
    async fn test_budget_denies_batch() {
        let runner = Arc::new(SimulatedRunner::new(0.1, Duration::ZERO));
        let budget = Arc::new(BudgetController::new(BudgetLimits {
            emergency_stop_spend: 1.0,
            ..Default::default()
        }));
        budget.record_spend(1.0);
        let engine = ExecutionEngine::new(
            fast(ExecutionStrategy::Serial),
            runner,
            budget,
            EventBus::default(),
        );

        let err = engine.execute("b1", units(1)).await.unwrap_err();
        assert!(matches!(err, GodelError::BudgetExceeded(_)));
    }

    #[tokio::test]
    async fn test_cancel_running_batch() {
        let runner = Arc::new(SimulatedRunner::new(0.1, Duration::from_millis(200)));
        let (engine, _, bus) = engine_with(fast(ExecutionStrategy::Serial), runner);
        let mut events = bus.subscribe_topic(batch_topic("b1"));

        let handle = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.execute("b1", units(3)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let cancelled = engine.cancel_batch("b1").await.unwrap();
        assert_eq!(cancelled.status, BatchStatus::Cancelled);
        assert_eq!(cancelled.cancelled(), 3);

        let ctx = handle.await.unwrap().unwrap();
        assert_eq!(ctx.status, BatchStatus::Cancelled);
        assert!(engine.active_batches().await.is_empty());

        let kinds: Vec<EventKind> = events.drain().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::BatchStarted, EventKind::BatchCancelled]);

        // Second cancel is a no-op
        assert!(engine.cancel_batch("b1").await.is_ok());
        assert_eq!(engine.stats().await.cancelled_batches, 1);
    }

    #[tokio::test]
    async fn test_queued_batches_admitted_in_order() {
        let runner = Arc::new(SimulatedRunner::new(0.1, Duration::from_millis(30)));
        let (engine, _, _) = engine_with(
            fast(ExecutionStrategy::Parallel).with_max_concurrent_batches(1),
            runner.clone(),
        );

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.execute("b1", units(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.execute("b2", units(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        let queued = engine.get_context("b2").await.unwrap();
        assert_eq!(queued.status, BatchStatus::Pending);

        let a = first.await.unwrap().unwrap();
        let b = second.await.unwrap().unwrap();
        assert_eq!(a.status, BatchStatus::Completed);
        assert_eq!(b.status, BatchStatus::Completed);
        assert!(b.started_at.unwrap() >= a.completed_at.unwrap());
        assert_eq!(runner.peak_concurrency(), 2);
    }

    #[tokio::test]
    async fn test_cancel_queued_batch() {
        let runner = Arc::new(SimulatedRunner::new(0.1, Duration::from_millis(50)));
        let (engine, _, _) = engine_with(
            fast(ExecutionStrategy::Serial).with_max_concurrent_batches(1),
            runner,
        );

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.execute("b1", units(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.execute("b2", units(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        engine.cancel_batch("b2").await.unwrap();
        let b = second.await.unwrap().unwrap();
        assert_eq!(b.status, BatchStatus::Cancelled);
        assert!(b.started_at.is_none());

        let a = first.await.unwrap().unwrap();
        assert_eq!(a.status, BatchStatus::Completed);
    }

    #[tokio::test]
    async fn test_cleanup_and_stats() {
        let runner = Arc::new(SimulatedRunner::new(0.5, Duration::ZERO));
        let (engine, _, _) = engine_with(fast(ExecutionStrategy::Serial), runner);

        engine.execute("b1", units(2)).await.unwrap();
        assert!(engine.get_context("b1").await.is_some());

        let stats = engine.stats().await;
        assert_eq!(stats.total_batches, 1);
        assert_eq!(stats.completed_batches, 1);
        assert_eq!(stats.units_succeeded, 2);
        assert_eq!(stats.total_cost, 1.0);

        assert_eq!(engine.cleanup_completed().await, 1);
        assert!(engine.get_context("b1").await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_unknown_batch() {
        let runner = Arc::new(SimulatedRunner::new(0.5, Duration::ZERO));
        let (engine, _, _) = engine_with(fast(ExecutionStrategy::Serial), runner);
        let err = engine.cancel_batch("nope").await.unwrap_err();
        assert!(matches!(err, GodelError::BatchNotFound(_)));
    }
}
