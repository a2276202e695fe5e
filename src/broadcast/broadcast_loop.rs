use core::future::Future;
use core::pin::Pin;
use core::task::Context;
use core::task::Poll;
use futures::channel::mpsc;
use futures::channel::oneshot;
use futures::stream::Fuse;
use futures::stream::FusedStream;
use futures::Stream;
use futures::StreamExt;
use pin_project_lite::pin_project;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;
use tracing::info;
use tracing::trace;

use crate::broadcast::assignability::Assignability;
use crate::broadcast::config::DeliveryPolicy;
use crate::broadcast::registry::Registry;
use crate::broadcast::request::Request;
use crate::error::BroadcastError;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    Starting,
    Running,
    Dead,
}

pin_project! {
    /// Future that owns a broadcaster's registry and drives every state
    /// transition: values from the source, control requests, and the
    /// deliveries still outstanding.
    ///
    /// Once the source has ended the future only hands over what was
    /// already accepted, it resolves when every subscriber is settled or
    /// disconnected.
    #[must_use = "futures do nothing unless polled"]
    pub(crate) struct BroadcastLoop<S: Stream> {
        #[pin]
        source: Fuse<S>,
        control: mpsc::Receiver<Request>,
        registry: Registry<S::Item>,
        assignability: Assignability<S::Item>,
        policy: DeliveryPolicy,
        state: State,
        ready: Option<oneshot::Sender<()>>,
        alive: Arc<AtomicBool>,
    }
}

impl<S> BroadcastLoop<S>
where
    S: Stream,
    S::Item: Clone + Send + 'static,
{
    pub(crate) fn new(
        source: S,
        control: mpsc::Receiver<Request>,
        assignability: Assignability<S::Item>,
        policy: DeliveryPolicy,
        ready: oneshot::Sender<()>,
        alive: Arc<AtomicBool>,
    ) -> Self {
        Self {
            source: source.fuse(),
            control,
            registry: Registry::new(),
            assignability,
            policy,
            state: State::Starting,
            ready: Some(ready),
            alive,
        }
    }
}

impl<S> Future for BroadcastLoop<S>
where
    S: Stream,
    S::Item: Clone + Send + 'static,
{
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();

        if *this.state == State::Starting {
            *this.state = State::Running;

            if let Some(ready) = this.ready.take() {
                let _ = ready.send(());
            }

            info!(policy = ?this.policy, "broadcast loop running");
        }

        while *this.state == State::Running {
            let mut progressed = false;

            match this.source.as_mut().poll_next(cx) {
                Poll::Ready(Some(value)) => {
                    let dropped = this.registry.accept(value, *this.policy);

                    trace!(subscribers = this.registry.len(), dropped, "value accepted");

                    progressed = true;
                }
                Poll::Ready(None) => {
                    *this.state = State::Dead;
                    this.alive.store(false, Ordering::Release);
                    this.control.close();

                    // queued requests are dropped unanswered, their callers see a dead broadcaster
                    let mut rejected = 0usize;

                    while let Ok(Some(_)) = this.control.try_next() {
                        rejected += 1;
                    }

                    info!(
                        rejected,
                        pending = this.registry.pending(),
                        "source ended, broadcaster is dead"
                    );

                    break;
                }
                Poll::Pending => {}
            }

            this.registry.drive(cx);

            if !this.control.is_terminated() {
                match this.control.poll_next_unpin(cx) {
                    Poll::Ready(Some(request)) => {
                        handle(request, this.registry, this.assignability);

                        progressed = true;
                    }
                    Poll::Ready(None) => {
                        debug!(
                            subscribers = this.registry.len(),
                            "all handles dropped, subscribers are frozen"
                        );
                    }
                    Poll::Pending => {}
                }
            }

            if !progressed {
                return Poll::Pending;
            }
        }

        this.registry.drive(cx);

        if !this.registry.is_settled() {
            return Poll::Pending;
        }

        this.registry.clear();

        debug!("accepted values handed over, subscribers released");

        Poll::Ready(())
    }
}

fn handle<T: Clone + Send + 'static>(
    request: Request,
    registry: &mut Registry<T>,
    assignability: &Assignability<T>,
) {
    let kind = request.kind();
    let delivered = match request {
        Request::Subscribe { port, reply } => {
            let result = assignability
                .bind(port)
                .and_then(|(key, sink)| registry.insert(key, sink));

            debug!(subscribers = registry.len(), ?result, "subscribe");

            reply.send(result).is_ok()
        }
        Request::Unsubscribe { port, reply } => {
            let result: Result<()> = port
                .into_key()
                .ok_or(BroadcastError::NotSubscribed)
                .and_then(|key| registry.remove(&key));

            debug!(subscribers = registry.len(), ?result, "unsubscribe");

            reply.send(result).is_ok()
        }
        Request::Len { reply } => reply.send(registry.len()).is_ok(),
    };

    if !delivered {
        trace!(kind, "caller went away before the reply");
    }
}
