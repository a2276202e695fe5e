use futures::channel::oneshot;

use crate::{error::Result, port::Port};

/// A control message for the broadcast loop, answered on its own reply channel.
#[derive(Debug)]
pub(crate) enum Request {
    Subscribe {
        port: Port,
        reply: oneshot::Sender<Result<()>>,
    },
    Unsubscribe {
        port: Port,
        reply: oneshot::Sender<Result<()>>,
    },
    Len {
        reply: oneshot::Sender<usize>,
    },
}

impl Request {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Request::Subscribe { .. } => "subscribe",
            Request::Unsubscribe { .. } => "unsubscribe",
            Request::Len { .. } => "len",
        }
    }
}
