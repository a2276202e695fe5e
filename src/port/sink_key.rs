use std::{
    any::{type_name, Any},
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use futures::channel::mpsc;

trait Identity: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn same_as(&self, other: &dyn Identity) -> bool;
    fn hash_into(&self, state: &mut dyn Hasher);
    fn name(&self) -> &'static str;
}

struct Keyed<K>(K);

impl<K: Hash + Eq + Send + Sync + 'static> Identity for Keyed<K> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn same_as(&self, other: &dyn Identity) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|other| self.0 == other.0)
    }

    fn hash_into(&self, mut state: &mut dyn Hasher) {
        self.0.hash(&mut state);
    }

    fn name(&self) -> &'static str {
        type_name::<K>()
    }
}

struct BoundedChannel<U>(mpsc::Sender<U>);

impl<U: Send + 'static> Identity for BoundedChannel<U> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn same_as(&self, other: &dyn Identity) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|other| self.0.same_receiver(&other.0))
    }

    fn hash_into(&self, mut state: &mut dyn Hasher) {
        self.0.hash_receiver(&mut state);
    }

    fn name(&self) -> &'static str {
        type_name::<mpsc::Sender<U>>()
    }
}

struct UnboundedChannel<U>(mpsc::UnboundedSender<U>);

impl<U: Send + 'static> Identity for UnboundedChannel<U> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn same_as(&self, other: &dyn Identity) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|other| self.0.same_receiver(&other.0))
    }

    fn hash_into(&self, mut state: &mut dyn Hasher) {
        self.0.hash_receiver(&mut state);
    }

    fn name(&self) -> &'static str {
        type_name::<mpsc::UnboundedSender<U>>()
    }
}

/// Identity of a sink.
///
/// Two keys are equal when they denote the same destination. For the
/// `futures` channels that means "same receiver", so every clone of a
/// sender maps to one key. Caller-defined sinks pick their own key with
/// [`SinkKey::new`].
#[derive(Clone)]
pub struct SinkKey(Arc<dyn Identity>);

impl SinkKey {
    pub fn new<K: Hash + Eq + Send + Sync + 'static>(key: K) -> Self {
        Self(Arc::new(Keyed(key)))
    }
}

impl<U: Send + 'static> From<&mpsc::Sender<U>> for SinkKey {
    fn from(sender: &mpsc::Sender<U>) -> Self {
        Self(Arc::new(BoundedChannel(sender.clone())))
    }
}

impl<U: Send + 'static> From<&mpsc::UnboundedSender<U>> for SinkKey {
    fn from(sender: &mpsc::UnboundedSender<U>) -> Self {
        Self(Arc::new(UnboundedChannel(sender.clone())))
    }
}

impl PartialEq for SinkKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.same_as(other.0.as_ref())
    }
}

impl Eq for SinkKey {}

impl Hash for SinkKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash_into(state);
    }
}

impl fmt::Debug for SinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SinkKey").field(&self.0.name()).finish()
    }
}
