//! Live push channel: connection lifecycle, room subscriptions, and the
//! mapping from pushed events to cache actions.

mod channel;
mod connector;
mod router;
mod state;

pub use channel::{LiveChannel, Subscription};
pub use connector::{Connector, FrameSink, FrameStream, PushConnection, WsConnector};
pub use router::{CacheAction, EventRouter};
pub use state::{ConnectionState, ReconnectPolicy, StateMachine};
