//! SchedulingService processor.
//!
//! The SchedulingService is responsible for:
//! - Receiving `SweepTick` events via the `Processor` trait
//! - Listing orders whose `fire_at` passed since the previous sweep
//! - Walking each due order to `preparing` through the order state machine
//! - Carrying orders that hit a retryable failure over to the next sweep
//!
//! A sweep never fails. Listing errors leave the watermark where it was, so
//! the next sweep looks at the same window again.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;

use kanau::processor::Processor;
use time::OffsetDateTime;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broadcast::EventBroadcaster;
use crate::config::{EnginePolicy, PolicyStore};
use crate::entities::Actor;
use crate::entities::order::{DueCursor, DueOrder, OrderStatus};
use crate::error::EngineError;
use crate::fsm::order::OrderStateMachine;
use crate::store::OrderStore;

/// Asks for one sweep covering everything due at `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepTick {
    pub now: OffsetDateTime,
}

impl SweepTick {
    pub fn now() -> Self {
        Self {
            now: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub fired: usize,
    pub already_fired: usize,
    pub skipped: usize,
    pub carried_over: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FireOutcome {
    Fired,
    AlreadyFired,
    Skipped,
    Retry,
}

#[derive(Default)]
struct SweepState {
    watermark: Option<DueCursor>,
    carry_over: BTreeMap<DueCursor, DueOrder>,
}

/// The hop that moves a scheduled order one step closer to the kitchen.
const fn next_hop(status: OrderStatus) -> Option<OrderStatus> {
    match status {
        OrderStatus::New => Some(OrderStatus::Pending),
        OrderStatus::Pending => Some(OrderStatus::Confirmed),
        OrderStatus::Confirmed => Some(OrderStatus::Preparing),
        _ => None,
    }
}

pub struct SchedulingService {
    orders: Arc<dyn OrderStore>,
    machine: OrderStateMachine,
    broadcaster: Arc<EventBroadcaster>,
    policy: PolicyStore<EnginePolicy>,
    state: Mutex<SweepState>,
}

impl SchedulingService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        broadcaster: Arc<EventBroadcaster>,
        policy: PolicyStore<EnginePolicy>,
    ) -> Self {
        Self {
            machine: OrderStateMachine::new(orders.clone()),
            orders,
            broadcaster,
            policy,
            state: Mutex::new(SweepState::default()),
        }
    }

    /// Sweep every `sweep_interval` until shutdown is signaled. A policy
    /// reload takes effect from the next sleep.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("SchedulingService started");
        let mut policy_changes = self.policy.watch();

        loop {
            let interval = self.policy.current().scheduler.sweep_interval;
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("SchedulingService received shutdown signal");
                        break;
                    }
                }

                Some(policy) = policy_changes.changed() => {
                    debug!(
                        sweep_interval = ?policy.scheduler.sweep_interval,
                        "Scheduler policy reloaded, restarting the sweep timer"
                    );
                }

                _ = tokio::time::sleep(interval) => {
                    let Ok(report) = self.process(SweepTick::now()).await;
                    if report != SweepReport::default() {
                        info!(
                            fired = report.fired,
                            already_fired = report.already_fired,
                            skipped = report.skipped,
                            carried_over = report.carried_over,
                            "Sweep finished"
                        );
                    }
                }
            }
        }

        info!("SchedulingService shutdown complete");
    }

    /// Fire one scheduled order, walking `new → pending → confirmed → preparing`.
    async fn fire_order(&self, due: &DueOrder) -> FireOutcome {
        let retries = self.policy.current().scheduler.max_conflict_retries;
        let actor = Actor::scheduler();

        'attempt: for attempt in 0..=retries {
            let mut order = match self.orders.get_order(due.tenant_id, due.order_id).await {
                Ok(Some(order)) => order,
                Ok(None) => {
                    warn!(order_id = %due.order_id, "Scheduled order disappeared, skipping");
                    return FireOutcome::Skipped;
                }
                Err(e) => {
                    warn!(order_id = %due.order_id, error = %e, "Could not load scheduled order");
                    return FireOutcome::Retry;
                }
            };
            if order.status == OrderStatus::Cancelled {
                warn!(
                    order_id = %due.order_id,
                    tenant_id = %due.tenant_id,
                    "Scheduled order was cancelled before its fire time, skipping"
                );
                return FireOutcome::Skipped;
            }
            if order.status.is_fired() {
                debug!(order_id = %due.order_id, status = %order.status, "Order already fired");
                return FireOutcome::AlreadyFired;
            }

            while let Some(target) = next_hop(order.status) {
                match self
                    .machine
                    .transition(due.tenant_id, due.order_id, target, &actor, order.version)
                    .await
                {
                    Ok(transitioned) => {
                        self.broadcaster.publish(transitioned.event);
                        order = transitioned.order;
                    }
                    Err(EngineError::Conflict { current, .. }) => {
                        debug!(
                            order_id = %due.order_id,
                            attempt,
                            current_version = current,
                            "Scheduled order changed underneath the sweep, re-reading"
                        );
                        continue 'attempt;
                    }
                    Err(EngineError::InvalidTransition(e)) => {
                        warn!(order_id = %due.order_id, error = %e, "Scheduled order cannot be fired");
                        return FireOutcome::Skipped;
                    }
                    Err(e) => {
                        warn!(order_id = %due.order_id, error = %e, "Could not fire scheduled order");
                        return FireOutcome::Retry;
                    }
                }
            }
            info!(order_id = %due.order_id, tenant_id = %due.tenant_id, "Scheduled order fired");
            return FireOutcome::Fired;
        }

        warn!(
            order_id = %due.order_id,
            retries,
            "Scheduled order kept changing, carrying over"
        );
        FireOutcome::Retry
    }

    fn tally(report: &mut SweepReport, state: &mut SweepState, due: DueOrder, outcome: FireOutcome) {
        match outcome {
            FireOutcome::Fired => report.fired += 1,
            FireOutcome::AlreadyFired => report.already_fired += 1,
            FireOutcome::Skipped => report.skipped += 1,
            FireOutcome::Retry => {
                report.carried_over += 1;
                state.carry_over.insert(due.cursor(), due);
            }
        }
    }
}

impl Processor<SweepTick> for SchedulingService {
    type Output = SweepReport;
    type Error = Infallible;

    async fn process(&self, tick: SweepTick) -> Result<SweepReport, Infallible> {
        let mut state = self.state.lock().await;
        let policy = self.policy.current().scheduler.clone();
        let mut report = SweepReport::default();

        for (_, due) in std::mem::take(&mut state.carry_over) {
            let outcome = self.fire_order(&due).await;
            Self::tally(&mut report, &mut state, due, outcome);
        }

        let mut cursor = state.watermark.unwrap_or(DueCursor {
            fire_at: tick.now - policy.catch_up_window,
            order_id: Uuid::nil().into(),
        });
        loop {
            let batch = match self
                .orders
                .due_orders(cursor, tick.now, policy.batch_size)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    error!(error = %e, "Failed to list due orders");
                    return Ok(report);
                }
            };
            let exhausted = batch.len() < policy.batch_size;
            for due in batch {
                cursor = due.cursor();
                let outcome = self.fire_order(&due).await;
                Self::tally(&mut report, &mut state, due, outcome);
            }
            if exhausted {
                break;
            }
        }

        state.watermark = Some(DueCursor {
            fire_at: tick.now,
            order_id: Uuid::max().into(),
        });
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::entities::order::Order;
    use crate::testing::{self, Harness, create_request, line};

    fn scheduler(h: &Harness) -> SchedulingService {
        SchedulingService::new(h.store.clone(), h.broadcaster.clone(), h.policy.clone())
    }

    async fn scheduled(h: &Harness, in_secs: i64) -> Order {
        let mut request = create_request(vec![line("soda", 1, &[])]);
        request.fire_at = Some(OffsetDateTime::now_utc().unix_timestamp() + in_secs);
        h.service.create_order(&h.identity, request).await.unwrap()
    }

    fn at(secs_from_now: i64) -> SweepTick {
        SweepTick {
            now: OffsetDateTime::now_utc() + time::Duration::seconds(secs_from_now),
        }
    }

    #[tokio::test]
    async fn test_due_order_walks_to_preparing() {
        let h = Harness::new();
        let order = scheduled(&h, 2).await;
        let sweeper = scheduler(&h);

        let report = sweeper.process(at(10)).await.unwrap();
        assert_eq!(report.fired, 1);

        let fired = h.service.get_order(&h.identity, order.id).await.unwrap();
        assert_eq!(fired.status, OrderStatus::Preparing);
        assert_eq!(fired.version, order.version + 3);
        let hops: Vec<_> = fired.audit_log.iter().map(|e| e.to).collect();
        assert_eq!(
            hops,
            [OrderStatus::Pending, OrderStatus::Confirmed, OrderStatus::Preparing]
        );
        assert!(fired.audit_log.iter().all(|e| e.actor == Actor::scheduler()));
        // created + three status changes
        assert_eq!(h.broadcaster.latest_sequence(h.tenant_id), 4);
    }

    #[tokio::test]
    async fn test_cancelled_order_is_skipped() {
        let h = Harness::new();
        let order = scheduled(&h, 2).await;
        h.service
            .cancel_order(&h.identity, order.id, order.version)
            .await
            .unwrap();
        let sweeper = scheduler(&h);

        let report = sweeper.process(at(10)).await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                skipped: 1,
                ..SweepReport::default()
            }
        );
        let due = DueOrder {
            tenant_id: h.tenant_id,
            order_id: order.id,
            fire_at: order.fire_at.unwrap(),
        };
        assert_eq!(sweeper.fire_order(&due).await, FireOutcome::Skipped);

        let stored = h.service.get_order(&h.identity, order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Cancelled);
        assert_eq!(stored.version, order.version + 1);
        let changes = h.broadcaster.latest_sequence(h.tenant_id);
        // created + cancelled, nothing from the sweeps
        assert_eq!(changes, 2);
    }

    #[tokio::test]
    async fn test_sweeps_are_idempotent() {
        let h = Harness::new();
        let order = scheduled(&h, 2).await;
        let sweeper = scheduler(&h);

        assert_eq!(sweeper.process(at(10)).await.unwrap().fired, 1);
        assert_eq!(
            sweeper.process(at(20)).await.unwrap(),
            SweepReport::default()
        );

        let due = DueOrder {
            tenant_id: h.tenant_id,
            order_id: order.id,
            fire_at: order.fire_at.unwrap(),
        };
        assert_eq!(sweeper.fire_order(&due).await, FireOutcome::AlreadyFired);
        let stored = h.service.get_order(&h.identity, order.id).await.unwrap();
        assert_eq!(stored.version, order.version + 3);
    }

    #[tokio::test]
    async fn test_future_orders_wait() {
        let h = Harness::new();
        let order = scheduled(&h, 3600).await;
        let sweeper = scheduler(&h);

        assert_eq!(sweeper.process(at(10)).await.unwrap().fired, 0);
        assert_eq!(sweeper.process(at(3700)).await.unwrap().fired, 1);
        let stored = h.service.get_order(&h.identity, order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Preparing);
    }

    #[tokio::test]
    async fn test_first_sweep_only_catches_up_the_window() {
        let h = Harness::new();
        let now = OffsetDateTime::now_utc();
        let mut stale = testing::order(h.tenant_id, 1);
        stale.fire_at = Some(now - time::Duration::days(2));
        let mut recent = testing::order(h.tenant_id, 1);
        recent.fire_at = Some(now - time::Duration::hours(1));
        h.store.insert_order(&stale).await.unwrap();
        h.store.insert_order(&recent).await.unwrap();

        let report = scheduler(&h).process(SweepTick { now }).await.unwrap();
        assert_eq!(report.fired, 1);
        let stale = h.service.get_order(&h.identity, stale.id).await.unwrap();
        assert_eq!(stale.status, OrderStatus::New);
    }

    #[tokio::test]
    async fn test_pages_through_large_backlogs() {
        let mut policy = EnginePolicy::default();
        policy.scheduler.batch_size = 2;
        let h = Harness::with_policy(policy);
        for _ in 0..5 {
            scheduled(&h, 2).await;
        }

        let report = scheduler(&h).process(at(10)).await.unwrap();
        assert_eq!(report.fired, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let h = Harness::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler(&h).run(shutdown_rx));

        testing::advance(Duration::from_secs(40)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
