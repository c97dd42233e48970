//! Socket front end: one actor per connection.
//!
//! The actor binds to the session named by the `session=` query parameter,
//! attaches as a subscriber, and then pumps frames both ways: ingress text
//! frames decode into [`ClientFrame`]s and are forwarded into the session;
//! egress payloads arrive on the subscriber channel and are drained into
//! the websocket by a forwarding task.

use std::collections::HashMap;

use actix::{
    Actor, ActorContext, ActorFutureExt, AsyncContext, Handler, Message, Running, StreamHandler,
    WrapFuture,
};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws::{self, CloseCode, CloseReason};
use bytes::Bytes;
use bytestring::ByteString;

use crate::protocol::ClientFrame;
use crate::registry::Registry;
use crate::session::{Origin, SessionCommand, SessionHandle, OUTBOUND_QUEUE_DEPTH};

pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    registry: web::Data<Registry>,
) -> Result<HttpResponse, Error> {
    let session_id = web::Query::<HashMap<String, String>>::from_query(req.query_string())
        .ok()
        .and_then(|query| query.get("session").cloned())
        .filter(|id| !id.is_empty());

    ws::start(
        ConnectionActor {
            registry: registry.get_ref().clone(),
            session_id,
            state: ConnectionState::Pending,
        },
        &req,
        stream,
    )
}

enum ConnectionState {
    Pending,
    Attached {
        session: SessionHandle,
        user_id: String,
    },
}

pub struct ConnectionActor {
    registry: Registry,
    session_id: Option<String>,
    state: ConnectionState,
}

#[derive(Message)]
#[rtype(result = "()")]
struct OutboundFrame(Bytes);

#[derive(Message)]
#[rtype(result = "()")]
struct SessionGone;

impl Actor for ConnectionActor {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let Some(session_id) = self.session_id.clone() else {
            ctx.close(Some(CloseReason {
                code: CloseCode::Policy,
                description: Some("missing session parameter".to_owned()),
            }));
            ctx.stop();
            return;
        };

        let registry = self.registry.clone();
        let addr = ctx.address();
        let attach = async move {
            let session = registry
                .get_or_create(&session_id)
                .await
                .map_err(|e| e.to_string())?;
            let (tx, mut rx) = tokio::sync::mpsc::channel::<Bytes>(OUTBOUND_QUEUE_DEPTH);
            let user_id = session.attach(tx).await.map_err(|e| e.to_string())?;

            tokio::spawn(async move {
                while let Some(payload) = rx.recv().await {
                    addr.do_send(OutboundFrame(payload));
                }
                // The session dropped our channel; tell the actor to hang up.
                addr.do_send(SessionGone);
            });

            Ok::<_, String>((session, user_id))
        };

        // Incoming frames are not processed until the attach completes, so
        // the client never races its own `init`.
        ctx.wait(attach.into_actor(self).map(|result, act, ctx| match result {
            Ok((session, user_id)) => {
                act.state = ConnectionState::Attached { session, user_id };
            }
            Err(err) => {
                log::error!("socket attach failed: {}", err);
                ctx.close(Some(CloseReason {
                    code: CloseCode::Error,
                    description: None,
                }));
                ctx.stop();
            }
        }));
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        if let ConnectionState::Attached { session, user_id } = &self.state {
            let _ = session.try_send(SessionCommand::Detach {
                user_id: user_id.clone(),
            });
            if let Some(session_id) = &self.session_id {
                self.registry.schedule_eviction(session_id);
            }
        }
        Running::Stop
    }
}

/// Ingress
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ConnectionActor {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => ctx.pong(&msg),
            Ok(ws::Message::Text(text)) => self.handle_frame(&text),
            Ok(ws::Message::Binary(bin)) => {
                log::debug!("ignoring binary frame ({} bytes)", bin.len());
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => (),
            Err(err) => {
                log::warn!("socket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

impl ConnectionActor {
    fn handle_frame(&mut self, text: &str) {
        let ConnectionState::Attached { session, user_id } = &self.state else {
            log::debug!("dropping frame received before attach");
            return;
        };

        let frame = match serde_json::from_str::<ClientFrame>(text) {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("user {}: ignoring undecodable frame: {}", user_id, err);
                return;
            }
        };
        log::debug!("user {}: ingress {:?}", user_id, frame);

        let origin = Origin::Subscriber(user_id.clone());
        let command = match frame {
            ClientFrame::Draw { element } => match element.kind() {
                Ok(_) => SessionCommand::Create {
                    element,
                    origin,
                    reply: None,
                },
                Err(err) => {
                    log::warn!("user {}: ignoring draw: {}", user_id, err);
                    return;
                }
            },
            ClientFrame::Erase { element_id } => SessionCommand::Delete {
                element_id,
                origin,
                reply: None,
            },
            ClientFrame::Clear => SessionCommand::Clear {
                origin,
                reply: None,
            },
            ClientFrame::Move {
                element_id,
                element,
            } => SessionCommand::MoveElement {
                element_id,
                element,
                origin,
            },
            ClientFrame::Reorder {
                element_id,
                position,
            } => SessionCommand::Reorder {
                element_id,
                position,
                origin,
            },
            ClientFrame::Cursor { x, y } => SessionCommand::Cursor { x, y, origin },
        };

        if session.try_send(command).is_err() {
            log::warn!("user {}: session inbox unavailable, frame dropped", user_id);
        }
    }
}

/// Egress
impl Handler<OutboundFrame> for ConnectionActor {
    type Result = ();

    fn handle(&mut self, msg: OutboundFrame, ctx: &mut Self::Context) -> Self::Result {
        match ByteString::try_from(msg.0) {
            Ok(text) => ctx.text(text),
            Err(err) => log::error!("skipping non-utf8 outbound frame: {}", err),
        }
    }
}

impl Handler<SessionGone> for ConnectionActor {
    type Result = ();

    fn handle(&mut self, _: SessionGone, ctx: &mut Self::Context) -> Self::Result {
        ctx.close(None);
        ctx.stop();
    }
}
