use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::Arc,
};

use futures::{future, SinkExt};

use crate::{
    error::{BroadcastError, Result, SinkDisconnected},
    port::{BoxSink, Port, SinkKey, TypeTag},
};

type Binder<T> = Arc<dyn Fn(Box<dyn Any + Send>) -> Option<BoxSink<T>> + Send + Sync>;

/// The sink element types a producer of `T` may deliver to.
///
/// Only `T` itself is accepted until a conversion is registered with
/// [`allow`](Assignability::allow). There is no implicit widening.
pub struct Assignability<T> {
    elem: TypeTag,
    binders: HashMap<TypeId, Binder<T>>,
}

impl<T: Send + 'static> Assignability<T> {
    pub fn new() -> Self {
        let identity: Binder<T> = Arc::new(|sink: Box<dyn Any + Send>| {
            sink.downcast::<BoxSink<T>>().ok().map(|sink| *sink)
        });

        Self {
            elem: TypeTag::of::<T>(),
            binders: HashMap::from([(TypeId::of::<T>(), identity)]),
        }
    }

    /// Accept sinks of `U`, converting each value with `convert`.
    pub fn allow<U, F>(&mut self, convert: F)
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let convert = Arc::new(convert);
        let binder: Binder<T> = Arc::new(move |sink: Box<dyn Any + Send>| {
            let sink = *sink.downcast::<BoxSink<U>>().ok()?;
            let convert = Arc::clone(&convert);
            let sink: BoxSink<T> = Box::pin(sink.with(move |value: T| {
                future::ready(Ok::<U, SinkDisconnected>((*convert)(value)))
            }));

            Some(sink)
        });

        self.binders.insert(TypeId::of::<U>(), binder);
    }

    pub fn elem(&self) -> TypeTag {
        self.elem
    }

    pub fn accepts(&self, tag: &TypeTag) -> bool {
        self.binders.contains_key(&tag.id())
    }

    /// Checks kind, direction, then element type, and turns the port into
    /// a sink of `T`.
    pub(crate) fn bind(&self, port: Port) -> Result<(SinkKey, BoxSink<T>)> {
        let found = port.elem();
        let (sink, key) = port.into_writer()?;
        let incompatible = || BroadcastError::IncompatibleType {
            expected: self.elem.name(),
            found: found.name(),
        };
        let binder = self.binders.get(&found.id()).ok_or_else(incompatible)?;

        binder(sink).map(|sink| (key, sink)).ok_or_else(incompatible)
    }
}

impl<T: Send + 'static> Default for Assignability<T> {
    fn default() -> Self {
        Self::new()
    }
}
