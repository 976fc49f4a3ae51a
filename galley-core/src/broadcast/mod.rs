//! Tenant-scoped publish/subscribe hub.
//!
//! Each tenant has its own gapless sequence, a retained buffer for replay
//! after reconnects, and a set of subscriber queues. The registry is only
//! reachable through [`EventBroadcaster`]; publishing takes a short
//! `std::sync::Mutex` section and never awaits.

mod subscription;

pub use subscription::{CloseReason, Delivery, Subscription};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use galley_sdk::objects::EventEnvelope;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::{EnginePolicy, PolicyStore};
use crate::entities::{AuthContext, Identity, TenantId, unix_millis};
use crate::error::AuthError;
use crate::events::DomainEvent;
use subscription::SubscriberQueue;

/// Result of reconnecting with a last-seen sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replay {
    /// Every retained event after the client's last-seen sequence, in order.
    Events(Vec<Arc<EventEnvelope>>),
    /// The retained buffer cannot fill the client's gap; it must refetch state.
    ResyncRequired { latest_sequence: u64 },
}

struct Retained {
    event: Arc<EventEnvelope>,
    published_at: Instant,
}

#[derive(Default)]
struct TenantChannel {
    last_sequence: u64,
    retained: VecDeque<Retained>,
    subscribers: HashMap<u64, Arc<SubscriberQueue>>,
}

impl TenantChannel {
    fn prune(&mut self, max_events: usize, window: Duration, now: Instant) {
        while self.retained.len() > max_events {
            self.retained.pop_front();
        }
        while self
            .retained
            .front()
            .is_some_and(|r| now.saturating_duration_since(r.published_at) > window)
        {
            self.retained.pop_front();
        }
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    tenants: HashMap<TenantId, TenantChannel>,
}

impl Registry {
    fn remove(&mut self, tenant_id: TenantId, subscription_id: u64) {
        if let Some(channel) = self.tenants.get_mut(&tenant_id) {
            channel.subscribers.remove(&subscription_id);
        }
    }
}

pub struct EventBroadcaster {
    registry: Arc<Mutex<Registry>>,
    policy: PolicyStore<EnginePolicy>,
    next_subscription_id: AtomicU64,
}

impl EventBroadcaster {
    pub fn new(policy: PolicyStore<EnginePolicy>) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            policy,
            next_subscription_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn authorize(tenant_id: TenantId, auth: &AuthContext) -> Result<&Identity, AuthError> {
        match auth {
            AuthContext::Anonymous => Err(AuthError::Anonymous),
            AuthContext::Authenticated(identity) if identity.tenant_id != tenant_id => {
                Err(AuthError::TenantMismatch {
                    expected: tenant_id,
                    actual: identity.tenant_id,
                })
            }
            AuthContext::Authenticated(identity) => Ok(identity),
        }
    }

    fn register(&self, registry: &mut Registry, tenant_id: TenantId) -> Subscription {
        let capacity = self.policy.current().broadcast.subscriber_queue_capacity;
        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue::new(capacity));
        registry
            .tenants
            .entry(tenant_id)
            .or_default()
            .subscribers
            .insert(id, Arc::clone(&queue));
        Subscription::new(id, tenant_id, queue, Arc::downgrade(&self.registry))
    }

    /// Start receiving live events of `tenant_id`.
    pub fn subscribe(
        &self,
        tenant_id: TenantId,
        auth: &AuthContext,
    ) -> Result<Subscription, AuthError> {
        let identity = Self::authorize(tenant_id, auth)?;
        let mut registry = self.lock();
        let subscription = self.register(&mut registry, tenant_id);
        debug!(
            tenant_id = %tenant_id,
            actor = %identity.actor,
            subscription_id = subscription.id(),
            "Subscriber registered"
        );
        Ok(subscription)
    }

    /// Reconnect after `last_seen`.
    ///
    /// Registration and the replay snapshot happen under one lock, so no
    /// event published concurrently is either missed or delivered twice.
    pub fn resubscribe(
        &self,
        tenant_id: TenantId,
        auth: &AuthContext,
        last_seen: u64,
    ) -> Result<(Subscription, Replay), AuthError> {
        let identity = Self::authorize(tenant_id, auth)?;
        let policy = self.policy.current();
        let mut registry = self.lock();
        let channel = registry.tenants.entry(tenant_id).or_default();
        channel.prune(
            policy.broadcast.retained_events,
            policy.broadcast.retention_window,
            Instant::now(),
        );

        let latest = channel.last_sequence;
        let oldest = channel.retained.front().map(|r| r.event.sequence);
        let replay = if last_seen == latest {
            Replay::Events(Vec::new())
        } else if last_seen < latest && oldest.is_some_and(|o| o <= last_seen + 1) {
            Replay::Events(
                channel
                    .retained
                    .iter()
                    .filter(|r| r.event.sequence > last_seen)
                    .map(|r| Arc::clone(&r.event))
                    .collect(),
            )
        } else {
            Replay::ResyncRequired {
                latest_sequence: latest,
            }
        };

        let subscription = self.register(&mut registry, tenant_id);
        debug!(
            tenant_id = %tenant_id,
            actor = %identity.actor,
            subscription_id = subscription.id(),
            last_seen,
            latest,
            resync = matches!(replay, Replay::ResyncRequired { .. }),
            "Subscriber reconnected"
        );
        Ok((subscription, replay))
    }

    /// Sequence, stamp, retain and fan out an event. Returns its sequence.
    pub fn publish(&self, event: DomainEvent) -> u64 {
        let tenant_id = event.tenant_id();
        let event_type = event.event_type();
        let payload = event.to_payload();
        let policy = self.policy.current();
        let now = Instant::now();

        let mut registry = self.lock();
        let channel = registry.tenants.entry(tenant_id).or_default();
        channel.last_sequence += 1;
        let envelope = Arc::new(EventEnvelope {
            tenant_id: tenant_id.0,
            sequence: channel.last_sequence,
            event_type,
            timestamp_ms: unix_millis(OffsetDateTime::now_utc()),
            payload,
        });
        channel.retained.push_back(Retained {
            event: Arc::clone(&envelope),
            published_at: now,
        });
        channel.prune(
            policy.broadcast.retained_events,
            policy.broadcast.retention_window,
            now,
        );
        for queue in channel.subscribers.values() {
            queue.push(Arc::clone(&envelope));
        }
        debug!(
            tenant_id = %tenant_id,
            sequence = envelope.sequence,
            event_type = %event_type,
            subscribers = channel.subscribers.len(),
            "Event published"
        );
        envelope.sequence
    }

    /// Last sequence assigned for a tenant, `0` before the first event.
    pub fn latest_sequence(&self, tenant_id: TenantId) -> u64 {
        self.lock()
            .tenants
            .get(&tenant_id)
            .map_or(0, |c| c.last_sequence)
    }

    pub fn subscriber_count(&self, tenant_id: TenantId) -> usize {
        self.lock()
            .tenants
            .get(&tenant_id)
            .map_or(0, |c| c.subscribers.len())
    }

    /// Close and forget subscriptions that have been idle for longer than the
    /// configured idle timeout. Returns how many were evicted.
    pub fn reap_idle(&self) -> usize {
        let idle_timeout = self.policy.current().broadcast.idle_timeout;
        let now = Instant::now();
        let mut evicted = 0;
        let mut registry = self.lock();
        for (tenant_id, channel) in registry.tenants.iter_mut() {
            channel.subscribers.retain(|id, queue| {
                let idle = now.saturating_duration_since(queue.idle_since()) > idle_timeout;
                if idle {
                    queue.close(CloseReason::IdleTimeout);
                    info!(tenant_id = %tenant_id, subscription_id = id, "Evicted idle subscriber");
                    evicted += 1;
                }
                !idle
            });
        }
        evicted
    }

    pub fn keepalive_interval(&self) -> Duration {
        self.policy.current().broadcast.keepalive_interval
    }

    pub fn idle_timeout(&self) -> Duration {
        self.policy.current().broadcast.idle_timeout
    }
}
