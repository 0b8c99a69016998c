//! Socket.IO client over tokio-tungstenite.
//!
//! One background task owns the WebSocket for the lifetime of a call. It
//! serialises every outbound frame (so frames leave in emit order), answers
//! the server's heartbeat pings, decodes inbound events, and reconnects with
//! exponential backoff when the connection is lost. Only drops of a live
//! connection are retried: a failed first connect is reported to the caller
//! with its cause.
//!
//! ```text
//!  connect() ──spawn──► worker: open ─► pump ──transient──► backoff ─► open ─► ...
//!      ▲                  │ ready                │ definitive / cancelled
//!      └──────────────────┘                      ▼
//!                                               exit
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::io::ErrorKind;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::error::{Error as WsError, ProtocolError};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::packet::{event_parts, EnginePacket, Handshake, SocketPacket};
use super::{ChannelTransport, DisconnectReason, InboundEvent, OutboundMessage, TransportEvent};
use crate::config::BackendConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::session::CallEvents;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = futures_util::stream::SplitSink<WsStream, Message>;
type WsRead = futures_util::stream::SplitStream<WsStream>;

/// How long [`SocketIoTransport::closed`] waits for queued frames to go out.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

enum Outgoing {
    Frame(String),
    Close,
}

pub struct SocketIoTransport {
    backend: BackendConfig,
    outbound: Option<mpsc::UnboundedSender<Outgoing>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    /// The worker of a disconnected channel, still flushing.
    closing: Option<JoinHandle<()>>,
}

impl SocketIoTransport {
    pub fn new(backend: BackendConfig) -> Self {
        Self {
            backend,
            outbound: None,
            cancel: CancellationToken::new(),
            task: None,
            closing: None,
        }
    }
}

#[async_trait]
impl ChannelTransport for SocketIoTransport {
    async fn connect(&mut self, events: CallEvents) -> VoiceResult<()> {
        if self.task.is_some() {
            debug!("Voice channel already connected");
            return Ok(());
        }

        let url = self.backend.websocket_url()?;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        self.cancel = CancellationToken::new();

        let worker = ConnectionWorker {
            url,
            namespace: self.backend.namespace.clone(),
            backend: self.backend.clone(),
            outbound: outbound_rx,
            events,
            cancel: self.cancel.clone(),
        };

        info!(url = %worker.url, namespace = %worker.namespace, "Connecting voice channel");
        self.task = Some(tokio::spawn(worker.run(ready_tx)));
        self.outbound = Some(outbound_tx);

        let outcome = match ready_rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(VoiceError::Transport("connection task ended unexpectedly".to_string())),
        };

        if outcome.is_err() {
            self.cancel.cancel();
            self.outbound = None;
            self.task = None;
        }
        outcome
    }

    fn emit(&mut self, message: &OutboundMessage) -> VoiceResult<()> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| VoiceError::Transport("channel is not connected".to_string()))?;

        let frame = SocketPacket::event(&self.backend.namespace, message.event_name(), message.payload()).to_frame();
        outbound
            .send(Outgoing::Frame(frame))
            .map_err(|_| VoiceError::Transport("connection task has stopped".to_string()))
    }

    fn disconnect(&mut self) {
        if let Some(outbound) = self.outbound.take() {
            // Queued behind everything already emitted.
            let _ = outbound.send(Outgoing::Close);
        }
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            self.closing = Some(task);
        }
    }

    async fn closed(&mut self) {
        let Some(task) = self.closing.take() else {
            return;
        };
        if tokio::time::timeout(CLOSE_GRACE, task).await.is_err() {
            warn!(grace_ms = CLOSE_GRACE.as_millis() as u64, "Voice channel did not finish closing in time");
        }
    }
}

impl Drop for SocketIoTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct ConnectionWorker {
    url: String,
    namespace: String,
    backend: BackendConfig,
    outbound: mpsc::UnboundedReceiver<Outgoing>,
    events: CallEvents,
    cancel: CancellationToken,
}

impl ConnectionWorker {
    async fn run(mut self, ready: oneshot::Sender<VoiceResult<()>>) {
        let mut ready = Some(ready);
        let mut attempt: u32 = 0;

        loop {
            let opened = tokio::select! {
                _ = self.cancel.cancelled() => {
                    Err(VoiceError::Transport("connection cancelled".to_string()))
                }
                opened = tokio::time::timeout(self.backend.connect_timeout(), self.open()) => {
                    opened.unwrap_or_else(|_| Err(VoiceError::Transport("handshake timed out".to_string())))
                }
            };

            let last_error = match opened {
                Ok((write, read, handshake)) => {
                    attempt = 0;
                    match ready.take() {
                        Some(tx) => {
                            let _ = tx.send(Ok(()));
                        }
                        None => {
                            let dropped = self.discard_stale_frames();
                            info!(dropped, "Voice channel reconnected");
                            self.events.transport(TransportEvent::Reconnected);
                        }
                    }

                    let reason = self.pump(write, read, &handshake).await;
                    info!(reason = reason.as_str(), "Voice channel disconnected");
                    self.events.transport(TransportEvent::Disconnected(reason));

                    if !reason.is_transient() {
                        return;
                    }
                    reason.as_str().to_string()
                }
                Err(e) => {
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Err(e));
                        return;
                    }
                    if self.cancel.is_cancelled() {
                        return;
                    }
                    warn!(attempt, error = %e, "Voice channel reconnection attempt failed");
                    e.to_string()
                }
            };

            attempt += 1;
            if attempt > self.backend.reconnection_attempts {
                let message = format!(
                    "gave up after {} attempts: {}",
                    self.backend.reconnection_attempts, last_error
                );
                error!(%message, "Voice channel reconnection failed");
                self.events.transport(TransportEvent::ReconnectFailed(message));
                return;
            }

            self.events.transport(TransportEvent::Reconnecting { attempt });

            let delay = self.backend.reconnect_delay(attempt);
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying voice channel");
                }
            }
        }
    }

    /// Drop frames emitted for the lost connection before the new one is
    /// announced, so the resumed call starts with a fresh `start_conversation`.
    fn discard_stale_frames(&mut self) -> usize {
        let mut dropped = 0;
        while let Ok(outgoing) = self.outbound.try_recv() {
            match outgoing {
                Outgoing::Frame(_) => dropped += 1,
                // The session already let go of this channel.
                Outgoing::Close => self.cancel.cancel(),
            }
        }
        dropped
    }

    /// WebSocket connect, Engine.IO handshake and namespace connect.
    async fn open(&self) -> VoiceResult<(WsWrite, WsRead, Handshake)> {
        let (stream, _) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        let (mut write, mut read) = stream.split();

        let handshake = loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => match EnginePacket::parse(&text)? {
                    EnginePacket::Open(handshake) => break handshake,
                    other => debug!(?other, "Ignoring packet before handshake"),
                },
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Err(VoiceError::Transport("closed before handshake".to_string())),
            }
        };
        debug!(sid = %handshake.sid, ping_interval = handshake.ping_interval, "Engine.IO session opened");

        let connect = SocketPacket::Connect {
            namespace: self.namespace.clone(),
            data: None,
        };
        write.send(Message::Text(connect.to_frame())).await?;

        loop {
            let text = match read.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(_))) | None => {
                    return Err(VoiceError::Transport("closed before namespace connect".to_string()))
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            };

            match EnginePacket::parse(&text)? {
                EnginePacket::Ping(data) => {
                    write.send(Message::Text(EnginePacket::Pong(data).encode())).await?;
                }
                EnginePacket::Message(body) => match SocketPacket::parse(&body)? {
                    SocketPacket::Connect { namespace, .. } if namespace == self.namespace => {
                        info!(namespace = %namespace, "Voice channel connected");
                        return Ok((write, read, handshake));
                    }
                    SocketPacket::ConnectError { data, .. } => {
                        let reason = data
                            .as_ref()
                            .and_then(|d| d.get("message"))
                            .and_then(|m| m.as_str())
                            .unwrap_or("connection refused")
                            .to_string();
                        return Err(VoiceError::Transport(format!("namespace rejected: {}", reason)));
                    }
                    other => debug!(?other, "Ignoring packet before namespace connect"),
                },
                EnginePacket::Close => {
                    return Err(VoiceError::Transport("closed before namespace connect".to_string()))
                }
                _ => {}
            }
        }
    }

    /// Move frames in both directions until the connection ends.
    async fn pump(&mut self, mut write: WsWrite, mut read: WsRead, handshake: &Handshake) -> DisconnectReason {
        let heartbeat = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
        let deadline = tokio::time::sleep(heartbeat);
        tokio::pin!(deadline);

        let outbound = &mut self.outbound;
        let cancel = &self.cancel;
        let events = &self.events;
        let namespace = self.namespace.as_str();

        loop {
            tokio::select! {
                biased;

                outgoing = outbound.recv() => match outgoing {
                    Some(Outgoing::Frame(frame)) => {
                        if let Err(e) = write.send(Message::Text(frame)).await {
                            warn!(error = %e, "Failed to send frame");
                            return lost_reason(&e);
                        }
                    }
                    Some(Outgoing::Close) | None => {
                        let leave = SocketPacket::Disconnect { namespace: namespace.to_string() };
                        let _ = write.send(Message::Text(leave.to_frame())).await;
                        let _ = write.close().await;
                        return DisconnectReason::ClientDisconnect;
                    }
                },
                _ = cancel.cancelled() => {
                    let _ = write.close().await;
                    return DisconnectReason::ClientDisconnect;
                }
                _ = &mut deadline => {
                    warn!(timeout_ms = heartbeat.as_millis() as u64, "No heartbeat from voice backend");
                    return DisconnectReason::PingTimeout;
                }
                incoming = read.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        deadline.as_mut().reset(tokio::time::Instant::now() + heartbeat);
                        match EnginePacket::parse(&text) {
                            Ok(EnginePacket::Ping(data)) => {
                                if let Err(e) = write.send(Message::Text(EnginePacket::Pong(data).encode())).await {
                                    warn!(error = %e, "Failed to answer ping");
                                    return lost_reason(&e);
                                }
                            }
                            Ok(EnginePacket::Message(body)) => {
                                if let Some(reason) = dispatch(&body, namespace, events) {
                                    let _ = write.close().await;
                                    return reason;
                                }
                            }
                            Ok(EnginePacket::Close) => return DisconnectReason::TransportClose,
                            Ok(_) => {}
                            Err(e) => {
                                events.transport(TransportEvent::Malformed(e.to_string()));
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return DisconnectReason::TransportClose,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let reason = lost_reason(&e);
                        if reason == DisconnectReason::TransportError {
                            warn!(error = %e, "Voice channel read failed");
                        }
                        return reason;
                    }
                }
            }
        }
    }
}

/// The peer going away (close frame, EOF or reset) is a transport close;
/// anything else is a transport error.
fn lost_reason(error: &WsError) -> DisconnectReason {
    let closed = match error {
        WsError::ConnectionClosed | WsError::AlreadyClosed => true,
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => true,
        WsError::Io(e) => matches!(
            e.kind(),
            ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
        ),
        _ => false,
    };
    if closed {
        DisconnectReason::TransportClose
    } else {
        DisconnectReason::TransportError
    }
}

/// Decode one Socket.IO packet and forward it to the session.
///
/// Returns the reason to stop pumping, if any: the server left the
/// namespace, or the session is gone.
fn dispatch(body: &str, namespace: &str, events: &CallEvents) -> Option<DisconnectReason> {
    let packet = match SocketPacket::parse(body) {
        Ok(packet) => packet,
        Err(e) => {
            let delivered = events.transport(TransportEvent::Malformed(e.to_string()));
            return (!delivered).then_some(DisconnectReason::ClientDisconnect);
        }
    };

    if packet.namespace() != namespace {
        debug!(namespace = packet.namespace(), "Ignoring packet for another namespace");
        return None;
    }

    let delivered = match packet {
        SocketPacket::Event { data, .. } => {
            let event = event_parts(data).and_then(|(name, payload)| InboundEvent::from_wire(&name, payload));
            match event {
                Ok(event) => events.transport(TransportEvent::Message(event)),
                Err(e) => events.transport(TransportEvent::Malformed(e.to_string())),
            }
        }
        SocketPacket::Disconnect { .. } => return Some(DisconnectReason::ServerDisconnect),
        other => {
            debug!(?other, "Ignoring socket packet");
            true
        }
    };

    (!delivered).then_some(DisconnectReason::ClientDisconnect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::session::events::{CallEvent, SessionEvent};
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    const OPEN: &str = r#"0{"sid":"s1","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#;

    fn call_events() -> (CallEvents, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (CallEvents::new(1, tx), rx)
    }

    fn backend_for(addr: SocketAddr, attempts: u32, delay_ms: u64) -> BackendConfig {
        let mut backend = AppConfig::default().backend;
        backend.url = format!("http://{}", addr);
        backend.reconnection_attempts = attempts;
        backend.reconnection_delay_ms = delay_ms;
        backend.reconnection_delay_max_ms = delay_ms;
        backend
    }

    fn next_transport_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> TransportEvent {
        match rx.try_recv() {
            Ok(SessionEvent::Call { event: CallEvent::Transport(event), .. }) => event,
            other => panic!("unexpected {:?}", other),
        }
    }

    async fn recv_transport_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> TransportEvent {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(SessionEvent::Call { event: CallEvent::Transport(event), .. })) => event,
            other => panic!("unexpected {:?}", other),
        }
    }

    /// Accept one client, run the Engine.IO open and acknowledge `/voice`.
    async fn accept_voice(listener: &TcpListener, open: &str) -> WebSocketStream<TcpStream> {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        ws.send(Message::Text(open.to_string())).await.unwrap();
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                if text == "40/voice," {
                    ws.send(Message::Text(r#"40/voice,{"sid":"n1"}"#.to_string())).await.unwrap();
                    return ws;
                }
            }
        }
        panic!("client never joined the namespace");
    }

    /// Collect text frames until the client leaves the namespace.
    async fn frames_until_leave(ws: &mut WebSocketStream<TcpStream>) -> Vec<String> {
        let mut received = Vec::new();
        while let Some(Ok(message)) = ws.next().await {
            let Message::Text(text) = message else { continue };
            let done = text == "41/voice,";
            received.push(text);
            if done {
                break;
            }
        }
        received
    }

    #[test]
    fn test_dispatch_delivers_typed_events() {
        let (events, mut rx) = call_events();
        let body = r#"2/voice,["audio_delta",{"audio":"AAAA"}]"#;
        assert_eq!(dispatch(body, "/voice", &events), None);
        match next_transport_event(&mut rx) {
            TransportEvent::Message(InboundEvent::AudioDelta { audio }) => assert_eq!(audio, "AAAA"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_dispatch_reports_unknown_events_as_malformed() {
        let (events, mut rx) = call_events();
        assert_eq!(dispatch(r#"2/voice,["dance"]"#, "/voice", &events), None);
        assert!(matches!(next_transport_event(&mut rx), TransportEvent::Malformed(_)));

        assert_eq!(dispatch("garbage", "/voice", &events), None);
        assert!(matches!(next_transport_event(&mut rx), TransportEvent::Malformed(_)));
    }

    #[test]
    fn test_dispatch_server_disconnect_and_other_namespaces() {
        let (events, mut rx) = call_events();
        assert_eq!(
            dispatch("1/voice,", "/voice", &events),
            Some(DisconnectReason::ServerDisconnect)
        );
        assert_eq!(dispatch(r#"2/chat,["audio_done"]"#, "/voice", &events), None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dispatch_stops_when_session_is_gone() {
        let (events, rx) = call_events();
        drop(rx);
        assert_eq!(
            dispatch(r#"2/voice,["audio_done"]"#, "/voice", &events),
            Some(DisconnectReason::ClientDisconnect)
        );
    }

    #[test]
    fn test_peer_going_away_is_a_transport_close() {
        assert_eq!(lost_reason(&WsError::ConnectionClosed), DisconnectReason::TransportClose);
        assert_eq!(
            lost_reason(&WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)),
            DisconnectReason::TransportClose
        );
        assert_eq!(
            lost_reason(&WsError::Io(std::io::Error::from(ErrorKind::ConnectionReset))),
            DisconnectReason::TransportClose
        );
        assert_eq!(
            lost_reason(&WsError::Io(std::io::Error::from(ErrorKind::PermissionDenied))),
            DisconnectReason::TransportError
        );
    }

    #[tokio::test]
    async fn test_emit_before_connect_fails() {
        let mut transport = SocketIoTransport::new(AppConfig::default().backend);
        assert!(transport.emit(&OutboundMessage::Interrupt).is_err());
        transport.disconnect();
        transport.closed().await;
    }

    #[tokio::test]
    async fn test_handshake_events_and_clean_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let mut ws = accept_voice(&listener, OPEN).await;
            ws.send(Message::Text("2".to_string())).await.unwrap();
            ws.send(Message::Text(
                r#"42/voice,["conversation_started",{"conversationId":"c1","agentName":"Ada","language":"en"}]"#
                    .to_string(),
            ))
            .await
            .unwrap();
            frames_until_leave(&mut ws).await
        });

        let mut transport = SocketIoTransport::new(backend_for(addr, 5, 1000));
        let (events, mut rx) = call_events();
        transport.connect(events).await.unwrap();

        match recv_transport_event(&mut rx).await {
            TransportEvent::Message(InboundEvent::ConversationStarted { agent_name, .. }) => {
                assert_eq!(agent_name, "Ada")
            }
            other => panic!("unexpected {:?}", other),
        }

        transport
            .emit(&OutboundMessage::StartConversation { language: "en".to_string() })
            .unwrap();
        transport.emit(&OutboundMessage::EndConversation).unwrap();
        transport.disconnect();
        transport.closed().await;

        let received = tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
        assert_eq!(
            received,
            vec![
                "3".to_string(),
                r#"42/voice,["start_conversation",{"language":"en"}]"#.to_string(),
                r#"42/voice,["end_conversation"]"#.to_string(),
                "41/voice,".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_rejected_namespace_fails_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let _ = ws.send(Message::Text(OPEN.to_string())).await;
            while let Some(Ok(Message::Text(text))) = ws.next().await {
                if text == "40/voice," {
                    let _ = ws
                        .send(Message::Text(r#"44/voice,{"message":"not authorized"}"#.to_string()))
                        .await;
                }
            }
        });

        let mut transport = SocketIoTransport::new(backend_for(addr, 5, 10));
        let (events, _rx) = call_events();
        let err = tokio::time::timeout(Duration::from_secs(5), transport.connect(events))
            .await
            .unwrap()
            .unwrap_err();
        assert!(err.to_string().contains("not authorized"));
    }

    #[tokio::test]
    async fn test_refused_first_connect_reports_its_cause() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        // Five attempts at one second each would outlast the assertion below.
        let mut transport = SocketIoTransport::new(backend_for(addr, 5, 1000));
        let (events, mut rx) = call_events();

        let started = std::time::Instant::now();
        let err = transport.connect(events).await.unwrap_err();

        assert!(started.elapsed() < Duration::from_millis(900));
        assert!(matches!(err, VoiceError::Transport(_)));
        assert!(!err.to_string().contains("timed out"), "{}", err);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_connection_is_resumed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let first = accept_voice(&listener, OPEN).await;
            drop(first);
            let mut second = accept_voice(&listener, OPEN).await;
            frames_until_leave(&mut second).await
        });

        let mut transport = SocketIoTransport::new(backend_for(addr, 3, 200));
        let (events, mut rx) = call_events();
        transport.connect(events).await.unwrap();

        assert!(matches!(
            recv_transport_event(&mut rx).await,
            TransportEvent::Disconnected(DisconnectReason::TransportClose)
        ));
        // Emitted for the lost connection; must not reach the new one.
        transport
            .emit(&OutboundMessage::AudioData { audio: "AAAA".to_string() })
            .unwrap();

        assert!(matches!(
            recv_transport_event(&mut rx).await,
            TransportEvent::Reconnecting { attempt: 1 }
        ));
        assert!(matches!(recv_transport_event(&mut rx).await, TransportEvent::Reconnected));

        transport
            .emit(&OutboundMessage::StartConversation { language: "de".to_string() })
            .unwrap();
        transport.disconnect();
        transport.closed().await;

        let received = tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
        assert_eq!(
            received,
            vec![
                r#"42/voice,["start_conversation",{"language":"de"}]"#.to_string(),
                "41/voice,".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_reconnect_gives_up_after_configured_attempts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let first = accept_voice(&listener, OPEN).await;
            // Every retry is refused from here on.
            drop(listener);
            drop(first);
        });

        let mut transport = SocketIoTransport::new(backend_for(addr, 2, 10));
        let (events, mut rx) = call_events();
        transport.connect(events).await.unwrap();

        assert!(matches!(
            recv_transport_event(&mut rx).await,
            TransportEvent::Disconnected(DisconnectReason::TransportClose)
        ));
        assert!(matches!(
            recv_transport_event(&mut rx).await,
            TransportEvent::Reconnecting { attempt: 1 }
        ));
        assert!(matches!(
            recv_transport_event(&mut rx).await,
            TransportEvent::Reconnecting { attempt: 2 }
        ));
        match recv_transport_event(&mut rx).await {
            TransportEvent::ReconnectFailed(message) => {
                assert!(message.starts_with("gave up after 2 attempts"), "{}", message)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_silent_backend_is_a_ping_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let open = r#"0{"sid":"s2","upgrades":[],"pingInterval":100,"pingTimeout":100}"#;
            let mut ws = accept_voice(&listener, open).await;
            // Never ping; just hold the socket until the client gives up.
            while let Some(Ok(_)) = ws.next().await {}
        });

        let mut transport = SocketIoTransport::new(backend_for(addr, 0, 10));
        let (events, mut rx) = call_events();
        transport.connect(events).await.unwrap();

        assert!(matches!(
            recv_transport_event(&mut rx).await,
            TransportEvent::Disconnected(DisconnectReason::PingTimeout)
        ));
        assert!(matches!(
            recv_transport_event(&mut rx).await,
            TransportEvent::ReconnectFailed(_)
        ));
    }
}
