pub mod broadcast;
pub mod error;
pub mod port;
pub mod stream_ext;

pub use broadcast::{
    assignability::Assignability,
    config::{BroadcastConfig, DeliveryPolicy},
    Broadcaster, Builder,
};
pub use error::{BroadcastError, Result, SinkDisconnected};
pub use port::{BoxSink, Direction, Port, SinkKey, TypeTag};

pub mod prelude {
    pub use crate::broadcast::assignability::*;
    pub use crate::broadcast::config::*;
    pub use crate::broadcast::*;
    pub use crate::error::*;
    pub use crate::port::*;
    pub use crate::stream_ext::*;
}
