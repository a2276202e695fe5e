use std::num::NonZeroUsize;

/// What happens to undelivered values when a new value arrives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Every value is queued per subscriber and delivered exactly once, in order.
    #[default]
    Preserve,
    /// At most `n` undelivered values per subscriber, the oldest is dropped first.
    Bounded(NonZeroUsize),
    /// Only the newest undelivered value is kept.
    Overwrite,
}

impl DeliveryPolicy {
    /// Maximum number of undelivered values kept per subscriber.
    pub(crate) fn capacity(&self) -> Option<usize> {
        match self {
            DeliveryPolicy::Preserve => None,
            DeliveryPolicy::Bounded(n) => Some(n.get()),
            DeliveryPolicy::Overwrite => Some(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    pub delivery: DeliveryPolicy,
    /// Buffer of the control channel, on top of one slot per handle.
    pub control_capacity: usize,
    /// Name of the worker thread running the broadcast loop.
    pub thread_name: String,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            delivery: DeliveryPolicy::default(),
            control_capacity: 0,
            thread_name: "broadcast".to_string(),
        }
    }
}
