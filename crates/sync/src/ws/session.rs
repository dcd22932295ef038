/// WebSocket session actor for one viewer
///
/// Attaches itself to the [`ConnectionHub`] when it starts and detaches when
/// it stops. Frames from the hub arrive through the actor mailbox, whose
/// capacity bounds how far a slow viewer may fall behind before it is
/// evicted.
use actix::prelude::SendError;
use actix::{Actor, ActorContext, Addr, AsyncContext, Handler, Message, StreamHandler};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::envelope::ViewerFrame;
use crate::ws::hub::{ConnectionHub, ConnectionId, ConnectionSink, SinkError};

/// Timing and buffering for viewer sockets
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
    pub mailbox_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            client_timeout: Duration::from_secs(60),
            mailbox_capacity: 64,
        }
    }
}

/// Serialized frame queued for the viewer
#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct OutboundFrame(pub Arc<str>);

/// Close the socket after the hub has detached it
#[derive(Message)]
#[rtype(result = "()")]
pub struct Evict;

/// WebSocket session actor
pub struct ViewerSocket {
    hub: Arc<ConnectionHub>,

    /// Set once attached to the hub
    conn_id: Option<ConnectionId>,

    /// Last heartbeat timestamp
    hb: Instant,

    settings: SessionSettings,
}

impl ViewerSocket {
    pub fn new(hub: Arc<ConnectionHub>, settings: SessionSettings) -> Self {
        Self {
            hub,
            conn_id: None,
            hb: Instant::now(),
            settings,
        }
    }

    /// Start heartbeat process
    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.settings.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.hb) > act.settings.client_timeout {
                tracing::warn!(
                    conn_id = ?act.conn_id,
                    "Viewer heartbeat timeout, disconnecting"
                );
                ctx.stop();
                return;
            }

            ctx.ping(b"");
        });
    }
}

impl Actor for ViewerSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        ctx.set_mailbox_capacity(self.settings.mailbox_capacity);
        self.start_heartbeat(ctx);

        let conn_id = self.hub.attach(Arc::new(ctx.address()));
        self.conn_id = Some(conn_id);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(conn_id) = self.conn_id.take() {
            self.hub.detach(conn_id);
        }
    }
}

impl Handler<OutboundFrame> for ViewerSocket {
    type Result = ();

    fn handle(&mut self, msg: OutboundFrame, ctx: &mut Self::Context) -> Self::Result {
        ctx.text(msg.0.as_ref());
    }
}

impl Handler<Evict> for ViewerSocket {
    type Result = ();

    fn handle(&mut self, _msg: Evict, ctx: &mut Self::Context) -> Self::Result {
        // Already detached by the hub
        self.conn_id = None;
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Again,
            description: Some("viewer fell behind, reconnect to resync".to_string()),
        }));
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ViewerSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                // Viewers write through the HTTP API, never the socket
                self.hb = Instant::now();
                match ViewerFrame::parse(&text) {
                    Ok(frame) => tracing::debug!(?frame, "Ignoring frame sent by viewer"),
                    Err(e) => tracing::debug!(error = %e, "Ignoring unparseable viewer message"),
                }
            }
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!("Binary WebSocket messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::debug!(?reason, "Viewer closed the socket");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                tracing::warn!("WebSocket continuation frames not supported");
            }
            Ok(ws::Message::Nop) => {}
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

impl ConnectionSink for Addr<ViewerSocket> {
    fn send(&self, frame: Arc<str>) -> Result<(), SinkError> {
        self.try_send(OutboundFrame(frame)).map_err(|e| match e {
            SendError::Full(_) => SinkError::Full,
            SendError::Closed(_) => SinkError::Closed,
        })
    }

    fn close(&self) {
        self.do_send(Evict);
    }
}
