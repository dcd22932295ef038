/// Viewer transport: the connection hub and the WebSocket session actor
pub mod hub;
pub mod session;

pub use hub::{
    forward_resyncs, BroadcastError, BroadcastReport, ConnectionHub, ConnectionId,
    ConnectionSink, SinkError,
};
pub use session::{Evict, OutboundFrame, SessionSettings, ViewerSocket};
