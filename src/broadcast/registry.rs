use core::task::Context;
use core::task::Poll;
use futures::ready;
use std::collections::HashMap;
use std::collections::VecDeque;
use tracing::debug;

use crate::broadcast::config::DeliveryPolicy;
use crate::error::BroadcastError;
use crate::error::Result;
use crate::error::SinkDisconnected;
use crate::port::BoxSink;
use crate::port::SinkKey;

/// A registered sink and the values it still has to receive.
pub(crate) struct Subscriber<T> {
    key: SinkKey,
    sink: BoxSink<T>,
    pending: VecDeque<T>,
    unflushed: bool,
}

impl<T> Subscriber<T> {
    fn new(key: SinkKey, sink: BoxSink<T>) -> Self {
        Self {
            key,
            sink,
            pending: VecDeque::new(),
            unflushed: false,
        }
    }

    /// Hands pending values to the sink, one at a time and in order.
    fn poll_deliver(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<std::result::Result<(), SinkDisconnected>> {
        loop {
            if self.pending.is_empty() {
                if self.unflushed {
                    ready!(self.sink.as_mut().poll_flush(cx))?;
                    self.unflushed = false;
                }

                return Poll::Ready(Ok(()));
            }

            ready!(self.sink.as_mut().poll_ready(cx))?;

            if let Some(value) = self.pending.pop_front() {
                self.sink.as_mut().start_send(value)?;
                self.unflushed = true;
            }
        }
    }
}

/// The set of subscribers, owned by the broadcast loop.
///
/// `subscribers` is walked on every delivery pass, `index` maps a sink's
/// identity to its position for constant time membership and removal.
pub(crate) struct Registry<T> {
    subscribers: Vec<Subscriber<T>>,
    index: HashMap<SinkKey, usize>,
}

impl<T: Clone> Registry<T> {
    pub(crate) fn new() -> Self {
        Self {
            subscribers: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub(crate) fn contains(&self, key: &SinkKey) -> bool {
        self.index.contains_key(key)
    }

    /// Number of values accepted but not yet handed to a sink.
    pub(crate) fn pending(&self) -> usize {
        self.subscribers.iter().map(|it| it.pending.len()).sum()
    }

    pub(crate) fn insert(&mut self, key: SinkKey, sink: BoxSink<T>) -> Result<()> {
        if self.contains(&key) {
            return Err(BroadcastError::AlreadySubscribed);
        }

        self.index.insert(key.clone(), self.subscribers.len());
        self.subscribers.push(Subscriber::new(key, sink));

        Ok(())
    }

    pub(crate) fn remove(&mut self, key: &SinkKey) -> Result<()> {
        let position = self.index.remove(key).ok_or(BroadcastError::NotSubscribed)?;

        self.subscribers.swap_remove(position);

        if let Some(moved) = self.subscribers.get(position) {
            self.index.insert(moved.key.clone(), position);
        }

        Ok(())
    }

    /// Queues `value` for every subscriber. Returns how many undelivered
    /// values the policy dropped to make room.
    pub(crate) fn accept(&mut self, value: T, policy: DeliveryPolicy) -> usize {
        let capacity = policy.capacity();
        let mut dropped = 0;

        for subscriber in &mut self.subscribers {
            subscriber.pending.push_back(value.clone());

            if let Some(capacity) = capacity {
                while subscriber.pending.len() > capacity {
                    subscriber.pending.pop_front();
                    dropped += 1;
                }
            }
        }

        dropped
    }

    /// `true` once every accepted value has been handed to its sink and
    /// flushed.
    pub(crate) fn is_settled(&self) -> bool {
        self.subscribers
            .iter()
            .all(|it| it.pending.is_empty() && !it.unflushed)
    }

    /// Makes progress on every outstanding delivery. Subscribers whose sink
    /// has disconnected are removed, their count is returned.
    pub(crate) fn drive(&mut self, cx: &mut Context<'_>) -> usize {
        let before = self.subscribers.len();

        self.subscribers
            .retain_mut(|subscriber| match subscriber.poll_deliver(cx) {
                Poll::Ready(Err(SinkDisconnected)) => {
                    debug!(
                        key = ?subscriber.key,
                        lost = subscriber.pending.len(),
                        "sink disconnected, removing subscriber"
                    );

                    false
                }
                _ => true,
            });

        let disconnected = before - self.subscribers.len();

        if disconnected > 0 {
            self.index = self
                .subscribers
                .iter()
                .enumerate()
                .map(|(position, it)| (it.key.clone(), position))
                .collect();
        }

        disconnected
    }

    /// Drops every subscriber along with its undelivered values.
    pub(crate) fn clear(&mut self) {
        self.subscribers.clear();
        self.index.clear();
    }
}
