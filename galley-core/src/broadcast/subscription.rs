use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use galley_sdk::objects::EventEnvelope;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::Registry;
use crate::entities::TenantId;

/// What a subscriber receives next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Event(Arc<EventEnvelope>),
    /// The queue overflowed and events up to `last_dropped` were discarded.
    Gap { last_dropped: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    IdleTimeout,
}

pub(super) struct SubscriberQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

struct QueueState {
    events: VecDeque<Arc<EventEnvelope>>,
    capacity: usize,
    gap: Option<u64>,
    closed: Option<CloseReason>,
    last_acked: u64,
    last_active: Instant,
}

impl SubscriberQueue {
    pub(super) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                events: VecDeque::with_capacity(capacity.min(1024)),
                capacity,
                gap: None,
                closed: None,
                last_acked: 0,
                last_active: Instant::now(),
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue without waiting. A full queue sheds its oldest event.
    pub(super) fn push(&self, event: Arc<EventEnvelope>) {
        {
            let mut state = self.lock();
            if state.closed.is_some() {
                return;
            }
            if state.events.len() >= state.capacity {
                if let Some(dropped) = state.events.pop_front() {
                    state.gap = Some(dropped.sequence);
                }
            }
            state.events.push_back(event);
        }
        self.notify.notify_one();
    }

    pub(super) fn close(&self, reason: CloseReason) {
        self.lock().closed = Some(reason);
        self.notify.notify_one();
    }

    pub(super) fn idle_since(&self) -> Instant {
        self.lock().last_active
    }
}

/// A live, tenant-scoped event feed.
///
/// Dropping the handle unregisters it from the broadcaster.
pub struct Subscription {
    id: u64,
    tenant_id: TenantId,
    queue: Arc<SubscriberQueue>,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub(super) fn new(
        id: u64,
        tenant_id: TenantId,
        queue: Arc<SubscriberQueue>,
        registry: Weak<Mutex<Registry>>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            queue,
            registry,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Wait for the next delivery. Returns `None` once the subscription has
    /// been closed by the broadcaster.
    pub async fn recv(&self) -> Option<Delivery> {
        loop {
            if let Some(next) = self.poll_state() {
                return next;
            }
            self.queue.notify.notified().await;
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv). `None` means nothing is queued.
    pub fn try_recv(&self) -> Option<Delivery> {
        self.poll_state().flatten()
    }

    fn poll_state(&self) -> Option<Option<Delivery>> {
        let mut state = self.queue.lock();
        if let Some(last_dropped) = state.gap.take() {
            return Some(Some(Delivery::Gap { last_dropped }));
        }
        if let Some(event) = state.events.pop_front() {
            return Some(Some(Delivery::Event(event)));
        }
        if state.closed.is_some() {
            return Some(None);
        }
        None
    }

    /// Record that the client has processed everything up to `sequence`.
    pub fn ack(&self, sequence: u64) {
        let mut state = self.queue.lock();
        state.last_acked = state.last_acked.max(sequence);
        state.last_active = Instant::now();
    }

    pub fn last_acked(&self) -> u64 {
        self.queue.lock().last_acked
    }

    /// Refresh liveness without acknowledging anything.
    pub fn touch(&self) {
        self.queue.lock().last_active = Instant::now();
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.queue.lock().closed
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry.remove(self.tenant_id, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("tenant_id", &self.tenant_id)
            .finish_non_exhaustive()
    }
}
