//! STOMP over WebSocket
//!
//! Connects with `tokio-tungstenite`, performs the STOMP CONNECT/CONNECTED
//! exchange, then splits the socket into a writer task draining an outbound
//! frame queue and a reader task routing MESSAGE frames to subscription
//! handlers by their `subscription` header.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use dispatchlink_protocol::{Command, Frame};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::{
    ConnectRequest, FrameHandler, Link, PushSession, PushTransport, SubscriptionHandle,
    TransportError,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Routes = Arc<Mutex<HashMap<String, FrameHandler>>>;

/// STOMP 1.2 over a plain WebSocket endpoint
#[derive(Debug, Default, Clone)]
pub struct StompWsTransport;

impl StompWsTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PushTransport for StompWsTransport {
    async fn open(&self, request: ConnectRequest) -> Result<Link, TransportError> {
        let mut ws_request = request
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        if let Some(token) = &request.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| TransportError::Handshake(e.to_string()))?;
            ws_request.headers_mut().insert(AUTHORIZATION, value);
        }
        let host = ws_request
            .uri()
            .host()
            .unwrap_or("localhost")
            .to_string();

        let (socket, _response) = connect_async(ws_request)
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        let (mut sink, mut stream) = socket.split();

        let connect = Frame::connect(&host, request.token.as_deref());
        sink.send(Message::Text(connect.encode().into()))
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        await_connected(&mut stream).await?;
        info!(
            component = "transport",
            event = "transport.stomp.connected",
            url = %request.url,
            "STOMP session established"
        );

        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
        let (closed_tx, closed_rx) = oneshot::channel();

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let is_disconnect = frame.command == Command::Disconnect;
                if let Err(e) = sink.send(Message::Text(frame.encode().into())).await {
                    debug!(
                        component = "transport",
                        event = "transport.stomp.send_failed",
                        error = %e,
                        "WebSocket send failed"
                    );
                    break;
                }
                if is_disconnect {
                    let _ = sink.close().await;
                    break;
                }
            }
        });

        let reader_routes = routes.clone();
        tokio::spawn(async move {
            let reason = read_loop(stream, reader_routes).await;
            let _ = closed_tx.send(reason);
        });

        let session = StompSession {
            next_subscription: AtomicU64::new(0),
            routes,
            outbound_tx,
            closed: AtomicBool::new(false),
        };
        Ok(Link {
            session: Arc::new(session),
            closed: closed_rx,
        })
    }
}

/// Read until CONNECTED; an ERROR frame or a close first fails the handshake.
async fn await_connected(stream: &mut SplitStream<WsStream>) -> Result<(), TransportError> {
    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => return Err(TransportError::Handshake(e.to_string())),
        };
        match Frame::decode(text.as_str()) {
            Ok(None) => continue,
            Ok(Some(frame)) => match frame.command {
                Command::Connected => return Ok(()),
                Command::Error => {
                    let reason = frame.header("message").unwrap_or(frame.body.as_str());
                    return Err(TransportError::Rejected(reason.to_string()));
                }
                other => {
                    return Err(TransportError::Protocol(format!(
                        "expected CONNECTED, got {}",
                        other.as_str()
                    )))
                }
            },
            Err(e) => return Err(TransportError::Protocol(e.to_string())),
        }
    }
    Err(TransportError::Handshake(
        "connection closed during handshake".to_string(),
    ))
}

/// Route inbound frames until the socket ends; returns the close reason.
async fn read_loop(mut stream: SplitStream<WsStream>, routes: Routes) -> String {
    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(frame)) => {
                return frame
                    .map(|f| f.reason.as_str().to_string())
                    .filter(|reason| !reason.is_empty())
                    .unwrap_or_else(|| "closed by server".to_string());
            }
            Ok(_) => continue,
            Err(e) => return e.to_string(),
        };

        match Frame::decode(text.as_str()) {
            Ok(None) => {}
            Ok(Some(frame)) => match frame.command {
                Command::Message => route_message(&routes, &frame),
                Command::Error => {
                    let reason = frame.header("message").unwrap_or(frame.body.as_str());
                    return format!("broker error: {reason}");
                }
                other => debug!(
                    component = "transport",
                    event = "transport.stomp.frame_ignored",
                    command = other.as_str(),
                    "Ignoring frame"
                ),
            },
            Err(e) => warn!(
                component = "transport",
                event = "transport.stomp.decode_failed",
                error = %e,
                payload_bytes = text.len(),
                "Dropping undecodable frame"
            ),
        }
    }
    "stream ended".to_string()
}

fn route_message(routes: &Routes, frame: &Frame) {
    let Some(subscription) = frame.header("subscription") else {
        warn!(
            component = "transport",
            event = "transport.stomp.unrouted",
            "MESSAGE frame without subscription header"
        );
        return;
    };
    // Clone the handler out so the lock is not held while it runs.
    let handler = routes
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(subscription)
        .cloned();
    match handler {
        Some(handler) => handler(&frame.body),
        None => debug!(
            component = "transport",
            event = "transport.stomp.stale_subscription",
            subscription = %subscription,
            "Frame for a subscription that is gone"
        ),
    }
}

struct StompSession {
    next_subscription: AtomicU64,
    routes: Routes,
    outbound_tx: mpsc::UnboundedSender<Frame>,
    closed: AtomicBool,
}

impl PushSession for StompSession {
    fn subscribe(&self, destination: &str, on_frame: FrameHandler) -> SubscriptionHandle {
        let id = format!(
            "sub-{}",
            self.next_subscription.fetch_add(1, Ordering::Relaxed)
        );
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), on_frame);
        if self
            .outbound_tx
            .send(Frame::subscribe(&id, destination))
            .is_err()
        {
            warn!(
                component = "transport",
                event = "transport.stomp.subscribe_dropped",
                destination = %destination,
                "Writer gone, SUBSCRIBE not sent"
            );
        }

        let routes = self.routes.clone();
        let outbound_tx = self.outbound_tx.clone();
        let handle_id = id.clone();
        SubscriptionHandle::new(id, move || {
            routes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&handle_id);
            let _ = outbound_tx.send(Frame::unsubscribe(&handle_id));
        })
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        let _ = self.outbound_tx.send(Frame::disconnect());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
    use axum::routing::get;
    use axum::Router;

    #[derive(Clone, Copy)]
    enum BrokerMode {
        Accept,
        Reject,
        DropAfterSubscribe,
    }

    async fn send_frame(socket: &mut WebSocket, frame: Frame) {
        socket
            .send(WsMessage::Text(frame.encode().into()))
            .await
            .unwrap();
    }

    async fn next_frame(socket: &mut WebSocket) -> Option<Frame> {
        loop {
            match socket.recv().await? {
                Ok(WsMessage::Text(text)) => {
                    if let Some(frame) = Frame::decode(text.as_str()).unwrap() {
                        return Some(frame);
                    }
                }
                Ok(WsMessage::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
    }

    /// Minimal broker: answers CONNECT, echoes one MESSAGE per SUBSCRIBE.
    async fn broker(mut socket: WebSocket, mode: BrokerMode) {
        let Some(connect) = next_frame(&mut socket).await else {
            return;
        };
        assert_eq!(connect.command, Command::Connect);
        if let BrokerMode::Reject = mode {
            send_frame(
                &mut socket,
                Frame::new(Command::Error).with_header("message", "bad token"),
            )
            .await;
            return;
        }
        let auth = connect.header("Authorization").unwrap_or_default().to_string();
        send_frame(
            &mut socket,
            Frame::new(Command::Connected).with_header("version", "1.2"),
        )
        .await;

        while let Some(frame) = next_frame(&mut socket).await {
            match frame.command {
                Command::Subscribe => {
                    let id = frame.header("id").unwrap().to_string();
                    let destination = frame.header("destination").unwrap().to_string();
                    send_frame(
                        &mut socket,
                        Frame::new(Command::Message)
                            .with_header("subscription", id)
                            .with_header("destination", destination.clone())
                            .with_body(format!("{destination}|{auth}")),
                    )
                    .await;
                    if let BrokerMode::DropAfterSubscribe = mode {
                        let _ = socket.send(WsMessage::Close(None)).await;
                        return;
                    }
                }
                Command::Disconnect => return,
                _ => {}
            }
        }
    }

    async fn spawn_broker(mode: BrokerMode) -> String {
        let app = Router::new().route(
            "/ws",
            get(move |ws: WebSocketUpgrade| async move {
                ws.on_upgrade(move |socket| broker(socket, mode))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("ws://{addr}/ws")
    }

    fn request(url: String) -> ConnectRequest {
        ConnectRequest {
            url,
            token: Some("t0k".to_string()),
        }
    }

    #[tokio::test]
    async fn subscription_receives_routed_message_bodies() {
        let url = spawn_broker(BrokerMode::Accept).await;
        let link = StompWsTransport::new().open(request(url)).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let handle = link.session.subscribe(
            "/topic/dispatcher-notifications",
            Arc::new(move |body: &str| {
                let _ = tx.send(body.to_string());
            }),
        );
        assert_eq!(handle.id(), "sub-0");

        let body = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body, "/topic/dispatcher-notifications|Bearer t0k");

        handle.unsubscribe();
        link.session.close();
        link.session.close();
    }

    #[tokio::test]
    async fn broker_error_rejects_the_handshake() {
        let url = spawn_broker(BrokerMode::Reject).await;
        let err = StompWsTransport::new()
            .open(request(url))
            .await
            .err()
            .unwrap();
        assert_eq!(err, TransportError::Rejected("bad token".to_string()));
    }

    #[tokio::test]
    async fn remote_close_resolves_the_closed_signal() {
        let url = spawn_broker(BrokerMode::DropAfterSubscribe).await;
        let link = StompWsTransport::new().open(request(url)).await.unwrap();
        let _handle = link
            .session
            .subscribe("/topic/admin-notifications", Arc::new(|_: &str| {}));

        let reason = tokio::time::timeout(Duration::from_secs(5), link.closed)
            .await
            .unwrap();
        assert!(reason.is_ok());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_handshake_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = StompWsTransport::new()
            .open(request(format!("ws://{addr}/ws")))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::Handshake(_)));
    }
}
