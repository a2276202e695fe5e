pub mod assignability;
pub(crate) mod broadcast_loop;
pub mod config;
pub(crate) mod registry;
pub(crate) mod request;

use core::fmt;
use core::marker::PhantomData;
use futures::channel::mpsc;
use futures::channel::oneshot;
use futures::executor::block_on;
use futures::future;
use futures::future::Shared;
use futures::FutureExt;
use futures::SinkExt;
use futures::Stream;
use futures::StreamExt;
use futures::TryStream;
use futures::TryStreamExt;
use std::any::type_name;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use tracing::debug;
use tracing::warn;

use crate::error::BroadcastError;
use crate::error::Result;
use crate::port::Port;

use assignability::Assignability;
use broadcast_loop::BroadcastLoop;
use config::BroadcastConfig;
use config::DeliveryPolicy;
use request::Request;

/// Forwards every value of one source to a changing set of sinks.
///
/// The broadcaster runs its loop on a dedicated thread. The handle is a thin,
/// clonable front: [`subscribe`](Broadcaster::subscribe) and
/// [`unsubscribe`](Broadcaster::unsubscribe) are synchronous round trips to
/// that loop and may be called from any number of threads.
///
/// The blocking methods must not be called from within a `futures` executor
/// running on the same thread.
///
/// Once the source ends (or fails, see
/// [`from_try_stream`](Broadcaster::from_try_stream)) the broadcaster is dead:
/// every call returns [`BroadcastError::BroadcasterDead`]. Values accepted
/// before the end are still handed to their subscribers, then the sinks are
/// released. Dropping every handle does not stop
/// the loop, values keep flowing to the current subscribers until the source
/// ends.
pub struct Broadcaster<T> {
    control: mpsc::Sender<Request>,
    alive: Arc<AtomicBool>,
    terminated: Shared<oneshot::Receiver<()>>,
    _item: PhantomData<fn() -> T>,
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
    pub fn builder() -> Builder<T> {
        Builder::new()
    }

    /// Starts broadcasting from `source`, which must be a readable stream of `T`.
    pub fn create(source: impl Into<Port>) -> Result<Self> {
        Self::builder().create(source)
    }

    pub fn from_stream<S>(source: S) -> Result<Self>
    where
        S: Stream<Item = T> + Send + 'static,
    {
        Self::builder().from_stream(source)
    }

    /// Like [`from_stream`](Broadcaster::from_stream), the first error ends
    /// the source.
    pub fn from_try_stream<S>(source: S) -> Result<Self>
    where
        S: TryStream<Ok = T> + Send + 'static,
        S::Error: fmt::Display + Send + 'static,
    {
        Self::builder().from_try_stream(source)
    }
}

impl<T> Broadcaster<T> {
    /// Registers `sink`, which from now on receives every value the source
    /// produces.
    pub fn subscribe(&self, sink: impl Into<Port>) -> Result<()> {
        let port = sink.into();

        self.call(|reply| Request::Subscribe { port, reply })?
    }

    pub fn unsubscribe(&self, sink: impl Into<Port>) -> Result<()> {
        let port = sink.into();

        self.call(|reply| Request::Unsubscribe { port, reply })?
    }

    pub fn subscriber_count(&self) -> Result<usize> {
        self.call(|reply| Request::Len { reply })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.control.is_closed()
    }

    /// Blocks until the source has ended and every accepted value has been
    /// handed over, or its sink has disconnected.
    pub fn wait(&self) {
        let _ = block_on(self.terminated.clone());
    }

    fn call<R>(&self, request: impl FnOnce(oneshot::Sender<R>) -> Request) -> Result<R> {
        if !self.is_alive() {
            return Err(BroadcastError::BroadcasterDead);
        }

        let (reply, response) = oneshot::channel();
        let mut control = self.control.clone();

        block_on(async move {
            control
                .send(request(reply))
                .await
                .map_err(|_| BroadcastError::BroadcasterDead)?;

            response.await.map_err(|_| BroadcastError::BroadcasterDead)
        })
    }
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            control: self.control.clone(),
            alive: Arc::clone(&self.alive),
            terminated: self.terminated.clone(),
            _item: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Broadcaster<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broadcaster")
            .field("elem", &type_name::<T>())
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Configures a [`Broadcaster`] before it starts.
pub struct Builder<T> {
    config: BroadcastConfig,
    assignability: Assignability<T>,
}

impl<T: Clone + Send + 'static> Builder<T> {
    pub fn new() -> Self {
        Self {
            config: BroadcastConfig::default(),
            assignability: Assignability::new(),
        }
    }

    pub fn config(mut self, config: BroadcastConfig) -> Self {
        self.config = config;
        self
    }

    pub fn delivery(mut self, policy: DeliveryPolicy) -> Self {
        self.config.delivery = policy;
        self
    }

    /// Also accept sinks of `U`, each value is converted with `convert`.
    pub fn assignable<U, F>(mut self, convert: F) -> Self
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.assignability.allow(convert);
        self
    }

    pub fn create(self, source: impl Into<Port>) -> Result<Broadcaster<T>> {
        let source = source.into().into_reader::<T>()?;

        self.spawn(source)
    }

    pub fn from_stream<S>(self, source: S) -> Result<Broadcaster<T>>
    where
        S: Stream<Item = T> + Send + 'static,
    {
        self.spawn(source)
    }

    pub fn from_try_stream<S>(self, source: S) -> Result<Broadcaster<T>>
    where
        S: TryStream<Ok = T> + Send + 'static,
        S::Error: fmt::Display + Send + 'static,
    {
        let source = source
            .inspect_err(|error| {
                warn!(%error, "source failed, treating it as the end of the stream");
            })
            .take_while(|item| future::ready(item.is_ok()))
            .filter_map(|item| future::ready(item.ok()));

        self.spawn(source)
    }

    fn spawn<S>(self, source: S) -> Result<Broadcaster<T>>
    where
        S: Stream<Item = T> + Send + 'static,
    {
        let Self {
            config,
            assignability,
        } = self;
        let (control, control_rx) = mpsc::channel(config.control_capacity);
        let (ready, running) = oneshot::channel();
        let (terminated_tx, terminated) = oneshot::channel::<()>();
        let alive = Arc::new(AtomicBool::new(true));
        let broadcast_loop = BroadcastLoop::new(
            source,
            control_rx,
            assignability,
            config.delivery,
            ready,
            Arc::clone(&alive),
        );

        thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || {
                block_on(broadcast_loop);
                drop(terminated_tx);
            })?;

        block_on(running).map_err(|_| BroadcastError::BroadcasterDead)?;

        debug!(
            elem = type_name::<T>(),
            thread = %config.thread_name,
            "broadcaster created"
        );

        Ok(Broadcaster {
            control,
            alive,
            terminated: terminated.shared(),
            _item: PhantomData,
        })
    }
}

impl<T: Clone + Send + 'static> Default for Builder<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use futures::channel::mpsc;
    use futures::executor::block_on;
    use futures::stream;
    use futures::SinkExt;
    use futures::StreamExt;
    use futures_time::future::FutureExt;
    use futures_time::time::Duration;
    use std::thread;

    use super::Broadcaster;
    use crate::broadcast::config::DeliveryPolicy;
    use crate::error::BroadcastError;
    use crate::port::Port;

    #[derive(Debug, Clone, PartialEq)]
    struct Celsius(i32);

    fn push<T>(tx: &mut mpsc::Sender<T>, value: T) {
        block_on(tx.send(value)).expect("source is open");
    }

    fn recv<T>(rx: &mut mpsc::Receiver<T>) -> Option<T> {
        block_on(rx.next().timeout(Duration::from_millis(5_000))).expect("no value within 5s")
    }

    fn broadcaster() -> (mpsc::Sender<i32>, Broadcaster<i32>) {
        let (tx, rx) = mpsc::channel::<i32>(0);
        let broadcaster = Broadcaster::<i32>::create(rx).expect("readable source of i32");

        (tx, broadcaster)
    }

    #[test]
    fn create_rejects_non_readable_sources() {
        for port in [
            Port::value(5),
            Port::value("hello"),
            Port::value(4.2),
            Port::value(false),
        ] {
            assert!(matches!(
                Broadcaster::<i32>::create(port),
                Err(BroadcastError::NotAStream { .. })
            ));
        }

        let (tx, _rx) = mpsc::channel::<i32>(0);

        assert!(matches!(
            Broadcaster::<i32>::create(tx),
            Err(BroadcastError::NotReadable { .. })
        ));

        let (_tx, rx) = mpsc::channel::<i64>(0);

        assert!(matches!(
            Broadcaster::<i32>::create(rx),
            Err(BroadcastError::IncompatibleType { .. })
        ));

        let (_tx, rx) = mpsc::unbounded::<bool>();

        assert!(Broadcaster::<bool>::create(rx).is_ok());
    }

    #[test]
    fn subscribe_validates_sinks() {
        let (_tx, broadcaster) = broadcaster();
        let (bools, _bools_rx) = mpsc::channel::<bool>(0);
        let (celsius, _celsius_rx) = mpsc::channel::<Celsius>(0);
        let (_ints_tx, ints_rx) = mpsc::channel::<i32>(0);
        let (ints, _ints) = mpsc::channel::<i32>(0);

        assert!(matches!(
            broadcaster.subscribe(Port::value(5)),
            Err(BroadcastError::NotAStream { .. })
        ));
        assert!(matches!(
            broadcaster.subscribe(Port::value(true)),
            Err(BroadcastError::NotAStream { .. })
        ));
        assert!(matches!(
            broadcaster.subscribe(bools),
            Err(BroadcastError::IncompatibleType { .. })
        ));
        assert!(matches!(
            broadcaster.subscribe(celsius),
            Err(BroadcastError::IncompatibleType { .. })
        ));
        assert!(matches!(
            broadcaster.subscribe(ints_rx),
            Err(BroadcastError::WrongDirection { .. })
        ));
        assert!(broadcaster.subscribe(ints).is_ok());
    }

    #[test]
    fn newtype_source_rejects_inner_type() {
        let (_tx, rx) = mpsc::channel::<Celsius>(0);
        let broadcaster = Broadcaster::<Celsius>::create(rx).expect("readable source");
        let (ints, _ints_rx) = mpsc::channel::<i32>(0);
        let (celsius, _celsius_rx) = mpsc::channel::<Celsius>(0);

        assert!(matches!(
            broadcaster.subscribe(ints),
            Err(BroadcastError::IncompatibleType { .. })
        ));
        assert!(broadcaster.subscribe(celsius).is_ok());
    }

    #[test]
    fn repeated_subscribe_and_unsubscribe() {
        let (_tx, broadcaster) = broadcaster();
        let (sink, _rx) = mpsc::channel::<i32>(0);

        for _ in 0..10 {
            broadcaster.subscribe(&sink).expect("not yet subscribed");

            assert!(matches!(
                broadcaster.subscribe(&sink),
                Err(BroadcastError::AlreadySubscribed)
            ));

            broadcaster.unsubscribe(&sink).expect("subscribed");

            assert!(matches!(
                broadcaster.unsubscribe(&sink),
                Err(BroadcastError::NotSubscribed)
            ));
        }

        assert!(matches!(
            broadcaster.unsubscribe(Port::value(1)),
            Err(BroadcastError::NotSubscribed)
        ));
        assert_eq!(broadcaster.subscriber_count().expect("alive"), 0);
    }

    #[test]
    fn dead_after_source_ends() {
        let (tx, broadcaster) = broadcaster();
        let (sink, _rx) = mpsc::channel::<i32>(0);

        drop(tx);
        broadcaster.wait();

        assert!(!broadcaster.is_alive());
        assert!(matches!(
            broadcaster.subscribe(&sink),
            Err(BroadcastError::BroadcasterDead)
        ));
        assert!(matches!(
            broadcaster.unsubscribe(&sink),
            Err(BroadcastError::BroadcasterDead)
        ));
        assert!(matches!(
            broadcaster.subscriber_count(),
            Err(BroadcastError::BroadcasterDead)
        ));
    }

    #[test]
    fn fan_out_follows_subscriptions() {
        let (mut source, broadcaster) = broadcaster();
        let (a, mut a_rx) = mpsc::channel::<i32>(0);
        let (b, mut b_rx) = mpsc::channel::<i32>(0);
        let (c, mut c_rx) = mpsc::channel::<i32>(0);
        let (d, _d_rx) = mpsc::channel::<i32>(0);

        broadcaster.subscribe(&a).expect("subscribe a");
        broadcaster.subscribe(&b).expect("subscribe b");

        push(&mut source, 5);

        assert_eq!(recv(&mut a_rx), Some(5));
        assert_eq!(recv(&mut b_rx), Some(5));

        broadcaster.subscribe(&c).expect("subscribe c");
        broadcaster.unsubscribe(&b).expect("unsubscribe b");

        push(&mut source, 42);
        push(&mut source, 6);

        assert_eq!(recv(&mut a_rx), Some(42));
        assert_eq!(recv(&mut a_rx), Some(6));
        assert_eq!(recv(&mut c_rx), Some(42));
        assert_eq!(recv(&mut c_rx), Some(6));
        assert!(b_rx.try_next().is_err());

        drop(source);
        broadcaster.wait();

        assert!(matches!(
            broadcaster.subscribe(&d),
            Err(BroadcastError::BroadcasterDead)
        ));
        assert!(b_rx.try_next().is_err());

        drop((a, b, c));

        assert!(block_on(a_rx.collect::<Vec<_>>()).is_empty());
        assert!(block_on(b_rx.collect::<Vec<_>>()).is_empty());
        assert!(block_on(c_rx.collect::<Vec<_>>()).is_empty());
    }

    #[test]
    fn accepted_values_survive_source_end() {
        let (mut source, broadcaster) = broadcaster();
        let (a, a_rx) = mpsc::channel::<i32>(0);
        let (late, _late_rx) = mpsc::channel::<i32>(0);

        broadcaster.subscribe(a).expect("subscribe");

        push(&mut source, 42);
        push(&mut source, 6);
        drop(source);

        while broadcaster.is_alive() {
            thread::yield_now();
        }

        assert!(matches!(
            broadcaster.subscribe(&late),
            Err(BroadcastError::BroadcasterDead)
        ));

        let received = block_on(a_rx.collect::<Vec<_>>().timeout(Duration::from_millis(5_000)))
            .expect("sink released within 5s");

        assert_eq!(received, [42, 6]);

        broadcaster.wait();
    }

    #[test]
    fn duplicate_subscription_delivers_once() {
        let (mut source, broadcaster) = broadcaster();
        let (a, a_rx) = mpsc::unbounded::<i32>();

        broadcaster.subscribe(&a).expect("first subscription");

        assert!(matches!(
            broadcaster.subscribe(a.clone()),
            Err(BroadcastError::AlreadySubscribed)
        ));

        push(&mut source, 1);
        drop(source);
        broadcaster.wait();
        drop(a);

        assert_eq!(block_on(a_rx.collect::<Vec<_>>()), [1]);
    }

    #[test]
    fn failed_subscribe_leaves_registry_untouched() {
        let (_tx, broadcaster) = broadcaster();
        let (bools, _bools_rx) = mpsc::channel::<bool>(0);
        let (ints, _ints_rx) = mpsc::channel::<i32>(0);

        assert_eq!(broadcaster.subscriber_count().expect("alive"), 0);
        assert!(matches!(
            broadcaster.subscribe(bools),
            Err(BroadcastError::IncompatibleType { .. })
        ));
        assert_eq!(broadcaster.subscriber_count().expect("alive"), 0);

        broadcaster.subscribe(ints).expect("compatible");

        assert_eq!(broadcaster.subscriber_count().expect("alive"), 1);
    }

    #[test]
    fn slow_subscriber_keeps_every_value() {
        let (mut source, broadcaster) = broadcaster();
        let (slow, mut slow_rx) = mpsc::channel::<i32>(0);
        let (fast, mut fast_rx) = mpsc::channel::<i32>(0);

        broadcaster.subscribe(&slow).expect("subscribe slow");
        broadcaster.subscribe(&fast).expect("subscribe fast");

        for value in 1..=20 {
            push(&mut source, value);

            assert_eq!(recv(&mut fast_rx), Some(value));
        }

        let slow_values = (0..20).map(|_| recv(&mut slow_rx)).collect::<Vec<_>>();

        assert_eq!(slow_values, (1..=20).map(Some).collect::<Vec<_>>());
    }

    #[test]
    fn overwrite_drops_stale_values() {
        let (mut source, rx) = mpsc::channel::<i32>(0);
        let broadcaster = Broadcaster::<i32>::builder()
            .delivery(DeliveryPolicy::Overwrite)
            .create(rx)
            .expect("readable source");
        let (slow, mut slow_rx) = mpsc::channel::<i32>(0);

        broadcaster.subscribe(&slow).expect("subscribe");

        for value in 1..=4 {
            push(&mut source, value);
        }

        let mut received = Vec::new();

        while received.last() != Some(&4) {
            received.extend(recv(&mut slow_rx));
        }

        assert_eq!(received[0], 1);
        assert!(!received.contains(&2));
        assert!(received.len() <= 3);
    }

    #[test]
    fn registered_conversion_delivers_converted_values() {
        let (mut source, rx) = mpsc::channel::<i32>(0);
        let broadcaster = Broadcaster::<i32>::builder()
            .assignable(Celsius)
            .create(rx)
            .expect("readable source");
        let (celsius, mut celsius_rx) = mpsc::channel::<Celsius>(0);
        let (ints, mut ints_rx) = mpsc::channel::<i32>(0);
        let (wide, _wide_rx) = mpsc::channel::<i64>(0);

        broadcaster.subscribe(&celsius).expect("Celsius is assignable");
        broadcaster.subscribe(&ints).expect("identity");

        assert!(matches!(
            broadcaster.subscribe(wide),
            Err(BroadcastError::IncompatibleType { .. })
        ));

        push(&mut source, 21);

        assert_eq!(recv(&mut celsius_rx), Some(Celsius(21)));
        assert_eq!(recv(&mut ints_rx), Some(21));
    }

    #[test]
    fn concurrent_callers() {
        let (_tx, broadcaster) = broadcaster();
        let sinks = (0..8).map(|_| mpsc::unbounded::<i32>()).collect::<Vec<_>>();

        thread::scope(|scope| {
            for (sink, _) in &sinks {
                let broadcaster = broadcaster.clone();

                scope.spawn(move || {
                    broadcaster.subscribe(sink).expect("own sink");

                    assert!(matches!(
                        broadcaster.subscribe(sink),
                        Err(BroadcastError::AlreadySubscribed)
                    ));
                });
            }
        });

        assert_eq!(broadcaster.subscriber_count().expect("alive"), 8);

        thread::scope(|scope| {
            for (sink, _) in &sinks {
                let broadcaster = &broadcaster;

                scope.spawn(move || broadcaster.unsubscribe(sink).expect("subscribed"));
            }
        });

        assert_eq!(broadcaster.subscriber_count().expect("alive"), 0);
    }

    #[test]
    fn disconnected_sink_is_removed() {
        let (mut source, broadcaster) = broadcaster();
        let (gone, gone_rx) = mpsc::channel::<i32>(0);

        broadcaster.subscribe(&gone).expect("subscribe");
        drop(gone_rx);

        push(&mut source, 1);
        push(&mut source, 2);

        assert_eq!(broadcaster.subscriber_count().expect("alive"), 0);
        assert!(matches!(
            broadcaster.unsubscribe(&gone),
            Err(BroadcastError::NotSubscribed)
        ));
    }

    #[test]
    fn dropped_handles_freeze_subscribers() {
        let (mut source, broadcaster) = broadcaster();
        let (a, mut a_rx) = mpsc::channel::<i32>(0);

        broadcaster.subscribe(&a).expect("subscribe");
        drop(broadcaster);

        push(&mut source, 9);

        assert_eq!(recv(&mut a_rx), Some(9));
    }

    #[test]
    fn failing_source_kills_broadcaster() {
        let (mut source, rx) = mpsc::channel::<Result<i32, &'static str>>(0);
        let broadcaster = Broadcaster::from_try_stream(rx).expect("spawned");
        let (a, mut a_rx) = mpsc::channel::<i32>(0);

        broadcaster.subscribe(&a).expect("subscribe");

        push(&mut source, Ok(1));

        assert_eq!(recv(&mut a_rx), Some(1));

        push(&mut source, Err("boom"));
        broadcaster.wait();

        assert!(!broadcaster.is_alive());
        assert!(matches!(
            broadcaster.subscribe(&a),
            Err(BroadcastError::BroadcasterDead)
        ));
    }

    #[test]
    fn from_stream_drains_finite_source() {
        let broadcaster = Broadcaster::from_stream(stream::iter([1, 2, 3])).expect("spawned");

        broadcaster.wait();

        assert!(!broadcaster.is_alive());
    }
}
