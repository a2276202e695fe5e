pub mod sink_key;
pub mod type_tag;

use core::fmt;
use core::pin::Pin;
use futures::channel::mpsc;
use futures::stream::BoxStream;
use futures::Sink;
use futures::SinkExt;
use futures::Stream;
use futures::StreamExt;
use std::any::Any;

use crate::error::BroadcastError;
use crate::error::Result;
use crate::error::SinkDisconnected;

pub use sink_key::SinkKey;
pub use type_tag::TypeTag;

/// A pinned, boxed [`Sink`] of `U` with the erased error type.
pub type BoxSink<U> = Pin<Box<dyn Sink<U, Error = SinkDisconnected> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

enum Endpoint {
    Value,
    // BoxStream<'static, U>
    Reader(Box<dyn Any + Send>),
    // BoxSink<U>
    Writer { sink: Box<dyn Any + Send>, key: SinkKey },
}

/// An erased handle to a stream, a sink, or a bare value.
///
/// A broadcaster takes its source and its subscribers as ports so that the
/// kind, direction and element type of a handle can be checked when it is
/// handed over, rather than when values start flowing.
pub struct Port {
    elem: TypeTag,
    endpoint: Endpoint,
}

impl Port {
    /// A bare value. Never accepted as a source or a sink.
    pub fn value<V: 'static>(_value: V) -> Self {
        Self {
            elem: TypeTag::of::<V>(),
            endpoint: Endpoint::Value,
        }
    }

    pub fn reader<S>(stream: S) -> Self
    where
        S: Stream + Send + 'static,
        S::Item: 'static,
    {
        let stream: BoxStream<'static, S::Item> = stream.boxed();

        Self {
            elem: TypeTag::of::<S::Item>(),
            endpoint: Endpoint::Reader(Box::new(stream)),
        }
    }

    /// A writable port for any sink, identified by `key`.
    pub fn writer<U, Si>(sink: Si, key: SinkKey) -> Self
    where
        U: 'static,
        Si: Sink<U> + Send + 'static,
    {
        let sink: BoxSink<U> = Box::pin(sink.sink_map_err(|_| SinkDisconnected));

        Self {
            elem: TypeTag::of::<U>(),
            endpoint: Endpoint::Writer {
                sink: Box::new(sink),
                key,
            },
        }
    }

    pub fn elem(&self) -> TypeTag {
        self.elem
    }

    /// `None` for bare values.
    pub fn direction(&self) -> Option<Direction> {
        match &self.endpoint {
            Endpoint::Value => None,
            Endpoint::Reader(_) => Some(Direction::Read),
            Endpoint::Writer { .. } => Some(Direction::Write),
        }
    }

    pub fn is_stream(&self) -> bool {
        self.direction().is_some()
    }

    pub(crate) fn into_reader<T: 'static>(self) -> Result<BoxStream<'static, T>> {
        let found = self.elem.name();

        match self.endpoint {
            Endpoint::Value => Err(BroadcastError::NotAStream { found }),
            Endpoint::Writer { .. } => Err(BroadcastError::NotReadable { elem: found }),
            Endpoint::Reader(stream) => stream
                .downcast::<BoxStream<'static, T>>()
                .map(|stream| *stream)
                .map_err(|_| BroadcastError::IncompatibleType {
                    expected: std::any::type_name::<T>(),
                    found,
                }),
        }
    }

    pub(crate) fn into_writer(self) -> Result<(Box<dyn Any + Send>, SinkKey)> {
        let found = self.elem.name();

        match self.endpoint {
            Endpoint::Value => Err(BroadcastError::NotAStream { found }),
            Endpoint::Reader(_) => Err(BroadcastError::WrongDirection { elem: found }),
            Endpoint::Writer { sink, key } => Ok((sink, key)),
        }
    }

    pub(crate) fn into_key(self) -> Option<SinkKey> {
        match self.endpoint {
            Endpoint::Writer { key, .. } => Some(key),
            _ => None,
        }
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("elem", &self.elem.name())
            .field("direction", &self.direction())
            .finish()
    }
}

impl<U: Send + 'static> From<mpsc::Sender<U>> for Port {
    fn from(sender: mpsc::Sender<U>) -> Self {
        let key = SinkKey::from(&sender);

        Self::writer(sender, key)
    }
}

impl<U: Send + 'static> From<&mpsc::Sender<U>> for Port {
    fn from(sender: &mpsc::Sender<U>) -> Self {
        Self::from(sender.clone())
    }
}

impl<U: Send + 'static> From<mpsc::UnboundedSender<U>> for Port {
    fn from(sender: mpsc::UnboundedSender<U>) -> Self {
        let key = SinkKey::from(&sender);

        Self::writer(sender, key)
    }
}

impl<U: Send + 'static> From<&mpsc::UnboundedSender<U>> for Port {
    fn from(sender: &mpsc::UnboundedSender<U>) -> Self {
        Self::from(sender.clone())
    }
}

impl<U: Send + 'static> From<mpsc::Receiver<U>> for Port {
    fn from(receiver: mpsc::Receiver<U>) -> Self {
        Self::reader(receiver)
    }
}

impl<U: Send + 'static> From<mpsc::UnboundedReceiver<U>> for Port {
    fn from(receiver: mpsc::UnboundedReceiver<U>) -> Self {
        Self::reader(receiver)
    }
}
