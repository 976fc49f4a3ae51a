use std::time::Duration;

/// Timeouts and limits of the payment driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentPolicy {
    /// Upper bound for any single gateway call.
    pub gateway_timeout: Duration,
    /// Upper bound for a whole terminal checkout, from device hand-off to approval.
    pub device_timeout: Duration,
    pub device_poll_interval: Duration,
    /// Transitions kept in each attempt's history ring buffer.
    pub history_capacity: usize,
}

impl Default for PaymentPolicy {
    fn default() -> Self {
        Self {
            gateway_timeout: Duration::from_secs(15),
            device_timeout: Duration::from_secs(120),
            device_poll_interval: Duration::from_secs(2),
            history_capacity: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastPolicy {
    pub subscriber_queue_capacity: usize,
    /// Events retained per tenant for replay, bounded by count...
    pub retained_events: usize,
    /// ...and by age.
    pub retention_window: Duration,
    pub idle_timeout: Duration,
    pub keepalive_interval: Duration,
}

impl Default for BroadcastPolicy {
    fn default() -> Self {
        Self {
            subscriber_queue_capacity: 256,
            retained_events: 1024,
            retention_window: Duration::from_secs(300),
            idle_timeout: Duration::from_secs(90),
            keepalive_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerPolicy {
    pub sweep_interval: Duration,
    /// How far back the first sweep after start looks for due orders.
    pub catch_up_window: Duration,
    /// Due orders listed per page within a sweep.
    pub batch_size: usize,
    pub max_conflict_retries: u32,
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(15),
            catch_up_window: Duration::from_secs(24 * 60 * 60),
            batch_size: 500,
            max_conflict_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnginePolicy {
    pub payment: PaymentPolicy,
    pub broadcast: BroadcastPolicy,
    pub scheduler: SchedulerPolicy,
}
