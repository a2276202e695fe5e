use futures::Stream;

use crate::{broadcast::Broadcaster, error::Result};

impl<T: ?Sized> BroadcastExt for T where T: Stream {}
pub trait BroadcastExt: Stream {
    /// Moves this stream onto a new [`Broadcaster`] with the default
    /// configuration.
    fn broadcast(self) -> Result<Broadcaster<Self::Item>>
    where
        Self: Sized + Send + 'static,
        Self::Item: Clone + Send + 'static,
    {
        Broadcaster::from_stream(self)
    }
}
