//! Session to a remote inference service over WebSocket.
//!
//! [`InferenceSession::open`] connects and completes the `hello`/`ready`
//! handshake. Each [`InferenceSession::infer`] call is one complete round
//! trip bounded by the request timeout; calls never overlap and are never
//! retried here. Dropping the session releases the socket on every exit
//! path; [`InferenceSession::close`] additionally sends a close frame.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::inference::protocol::{ClientFrame, ServerFrame, PROTOCOL_VERSION};
use crate::types::{Action, ClientConfig, ConnectionError, InferenceError, Observation};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Closing,
    Failed,
}

/// What the control loop needs from a policy endpoint.
#[async_trait]
pub trait PolicyClient: Send {
    /// One observation in, one action out.
    async fn infer(&mut self, observation: Observation) -> Result<Action, InferenceError>;

    /// Release the connection. Safe to call more than once.
    async fn close(&mut self);

    fn state(&self) -> ConnectionState;
}

pub struct InferenceSession {
    endpoint: String,
    config: ClientConfig,
    client_id: Uuid,
    stream: Option<WsStream>,
    state: ConnectionState,
    next_request_id: u64,
    send_in_progress: bool,
    policy_name: Option<String>,
}

impl InferenceSession {
    /// Connect to `endpoint` (`ws://` or `wss://`) and complete the handshake
    /// within `config.connect_timeout`.
    pub async fn open(endpoint: &str, config: ClientConfig) -> Result<Self, ConnectionError> {
        validate_endpoint(endpoint)?;

        let mut session = Self {
            endpoint: endpoint.to_string(),
            config,
            client_id: Uuid::new_v4(),
            stream: None,
            state: ConnectionState::Disconnected,
            next_request_id: 0,
            send_in_progress: false,
            policy_name: None,
        };
        session.establish().await?;

        info!(
            "Inference session {} ready at {} (policy: {})",
            session.client_id,
            session.endpoint,
            session.policy_name.as_deref().unwrap_or("unnamed")
        );
        Ok(session)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn policy_name(&self) -> Option<&str> {
        self.policy_name.as_deref()
    }

    /// Send one observation and wait for its action.
    ///
    /// A session left in `Failed` by an earlier call reconnects first, inside
    /// this call's timeout.
    pub async fn infer(&mut self, observation: Observation) -> Result<Action, InferenceError> {
        let timeout = self.config.request_timeout;

        match tokio::time::timeout(timeout, self.round_trip(observation)).await {
            Ok(result) => result,
            Err(_) => {
                if self.send_in_progress || self.state == ConnectionState::Connecting {
                    // Half-written frame or half-open socket: unusable.
                    self.mark_failed("request timed out before it was fully sent");
                }
                Err(InferenceError::Timeout(timeout))
            }
        }
    }

    /// Send a close frame (bounded by `close_timeout`) and drop the socket.
    pub async fn close(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            self.state = ConnectionState::Disconnected;
            return;
        };

        self.state = ConnectionState::Closing;
        match tokio::time::timeout(self.config.close_timeout, stream.close(None)).await {
            Ok(Ok(())) => debug!("Close frame sent to {}", self.endpoint),
            Ok(Err(e)) => debug!("Close handshake with {} failed: {}", self.endpoint, e),
            Err(_) => warn!("Close handshake with {} timed out", self.endpoint),
        }
        self.state = ConnectionState::Disconnected;
        info!("Inference session {} closed", self.client_id);
    }

    async fn establish(&mut self) -> Result<(), ConnectionError> {
        self.state = ConnectionState::Connecting;
        let hello = ClientFrame::Hello {
            client_id: self.client_id,
            protocol_version: PROTOCOL_VERSION,
            robot_type: self.config.robot_type.clone(),
            device: self.config.device.clone(),
        };

        let timeout = self.config.connect_timeout;
        let result = match tokio::time::timeout(timeout, connect_and_handshake(&self.endpoint, &hello)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout(timeout)),
        };

        match result {
            Ok((stream, policy_name)) => {
                self.stream = Some(stream);
                self.policy_name = policy_name;
                self.state = ConnectionState::Ready;
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Failed;
                Err(e)
            }
        }
    }

    async fn round_trip(&mut self, observation: Observation) -> Result<Action, InferenceError> {
        if self.stream.is_none() {
            debug!("Re-establishing inference session to {}", self.endpoint);
            self.establish()
                .await
                .map_err(|e| InferenceError::Transport(format!("reconnect failed: {}", e)))?;
        }

        for (name, tensor) in &observation.tensors {
            tensor
                .validate()
                .map_err(|e| InferenceError::Protocol(format!("observation '{}': {}", name, e)))?;
        }

        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let frame = ClientFrame::Observation {
            request_id,
            observation: observation.tensors,
            task: observation.task,
        };
        let text = frame
            .to_json()
            .map_err(|e| InferenceError::Protocol(format!("cannot encode observation: {}", e)))?;

        let Some(stream) = self.stream.as_mut() else {
            return Err(InferenceError::Transport("no connection".to_string()));
        };

        self.send_in_progress = true;
        if let Err(e) = stream.send(Message::Text(text)).await {
            self.mark_failed("send failed");
            return Err(InferenceError::Transport(e.to_string()));
        }
        self.send_in_progress = false;

        loop {
            let message = match stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    self.mark_failed("receive failed");
                    return Err(InferenceError::Transport(e.to_string()));
                }
                None => {
                    self.mark_failed("stream ended");
                    return Err(InferenceError::Transport("connection closed by service".to_string()));
                }
            };

            let text = match message {
                Message::Text(text) => text,
                Message::Close(frame) => {
                    let reason = frame.map(|f| f.reason.into_owned()).unwrap_or_default();
                    self.mark_failed("close frame received");
                    return Err(InferenceError::Transport(format!(
                        "service closed connection: {}",
                        reason
                    )));
                }
                _ => continue,
            };

            match ServerFrame::from_json(&text) {
                Ok(ServerFrame::Action { request_id: id, action }) if id == request_id => {
                    return Action::from_tensor(action, self.config.action_dim)
                        .map_err(InferenceError::Protocol);
                }
                Ok(ServerFrame::Error { request_id: id, message }) if id == request_id => {
                    return Err(InferenceError::Rejected(message));
                }
                Ok(ServerFrame::Action { request_id: id, .. })
                | Ok(ServerFrame::Error { request_id: id, .. })
                    if id < request_id =>
                {
                    debug!("Discarding stale response {} (waiting for {})", id, request_id);
                }
                Ok(ServerFrame::Action { request_id: id, .. })
                | Ok(ServerFrame::Error { request_id: id, .. }) => {
                    return Err(InferenceError::Protocol(format!(
                        "response for request {} while {} is outstanding",
                        id, request_id
                    )));
                }
                Ok(other) => {
                    return Err(InferenceError::Protocol(format!(
                        "unexpected '{}' frame",
                        other.kind()
                    )));
                }
                Err(e) => return Err(InferenceError::Protocol(e.to_string())),
            }
        }
    }

    fn mark_failed(&mut self, reason: &str) {
        warn!("Inference session to {} failed: {}", self.endpoint, reason);
        self.stream = None;
        self.state = ConnectionState::Failed;
        self.send_in_progress = false;
    }
}

impl Drop for InferenceSession {
    fn drop(&mut self) {
        if self.stream.is_some() {
            debug!("Inference session {} dropped while open, releasing socket", self.client_id);
        }
    }
}

#[async_trait]
impl PolicyClient for InferenceSession {
    async fn infer(&mut self, observation: Observation) -> Result<Action, InferenceError> {
        InferenceSession::infer(self, observation).await
    }

    async fn close(&mut self) {
        InferenceSession::close(self).await
    }

    fn state(&self) -> ConnectionState {
        self.state
    }
}

fn validate_endpoint(endpoint: &str) -> Result<(), ConnectionError> {
    match endpoint.split_once("://") {
        Some(("ws" | "wss", rest)) if !rest.is_empty() => Ok(()),
        _ => Err(ConnectionError::InvalidEndpoint(endpoint.to_string())),
    }
}

async fn connect_and_handshake(
    endpoint: &str,
    hello: &ClientFrame,
) -> Result<(WsStream, Option<String>), ConnectionError> {
    let (mut stream, _response) = connect_async(endpoint).await.map_err(|e| match e {
        tungstenite::Error::Http(response) => {
            ConnectionError::HandshakeRejected(format!("HTTP {}", response.status()))
        }
        tungstenite::Error::Url(e) => ConnectionError::InvalidEndpoint(format!("{}: {}", endpoint, e)),
        other => ConnectionError::Unreachable(other.to_string()),
    })?;

    let hello = hello
        .to_json()
        .map_err(|e| ConnectionError::Protocol(format!("cannot encode hello: {}", e)))?;
    stream
        .send(Message::Text(hello))
        .await
        .map_err(|e| ConnectionError::Unreachable(e.to_string()))?;

    loop {
        let text = match stream.next().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(frame))) => {
                let reason = frame
                    .map(|f| f.reason.into_owned())
                    .unwrap_or_else(|| "connection closed".to_string());
                return Err(ConnectionError::HandshakeRejected(reason));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(ConnectionError::Unreachable(e.to_string())),
            None => {
                return Err(ConnectionError::HandshakeRejected(
                    "connection closed before ready".to_string(),
                ))
            }
        };

        return match ServerFrame::from_json(&text) {
            Ok(ServerFrame::Ready {
                protocol_version,
                policy,
            }) => {
                if protocol_version != PROTOCOL_VERSION {
                    Err(ConnectionError::HandshakeRejected(format!(
                        "service speaks protocol {}, client speaks {}",
                        protocol_version, PROTOCOL_VERSION
                    )))
                } else {
                    Ok((stream, policy))
                }
            }
            Ok(ServerFrame::Rejected { reason }) => Err(ConnectionError::HandshakeRejected(reason)),
            Ok(other) => Err(ConnectionError::Protocol(format!(
                "expected 'ready', got '{}'",
                other.kind()
            ))),
            Err(e) => Err(ConnectionError::Protocol(e.to_string())),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Tensor, STATE_KEY};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_tungstenite::accept_async;

    #[derive(Clone, Copy)]
    enum Behavior {
        Echo,
        Silent,
        SlowFirst(Duration),
        WrongShape,
        Reject,
        HangUpFirstConnection,
        /// Accepts the socket but never answers `hello`.
        NeverReady,
        /// First connection hangs up on its first request; later ones
        /// stall in the handshake.
        HangUpThenStall,
    }

    async fn spawn_service(behavior: Behavior) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut connection = 0usize;
            while let Ok((tcp, _)) = listener.accept().await {
                connection += 1;
                tokio::spawn(serve(tcp, behavior, connection));
            }
        });
        format!("ws://{}", addr)
    }

    fn doubled(request_id: u64, state: &[f32]) -> ServerFrame {
        ServerFrame::Action {
            request_id,
            action: Tensor::float32(vec![1, state.len()], state.iter().map(|v| v * 2.0).collect()),
        }
    }

    async fn serve(tcp: TcpStream, behavior: Behavior, connection: usize) {
        let Ok(mut ws) = accept_async(tcp).await else {
            return;
        };

        let Some(Ok(Message::Text(hello))) = ws.next().await else {
            return;
        };
        assert!(matches!(
            serde_json::from_str::<ClientFrame>(&hello),
            Ok(ClientFrame::Hello { .. })
        ));

        let stalls = match behavior {
            Behavior::NeverReady => true,
            Behavior::HangUpThenStall => connection > 1,
            _ => false,
        };
        if stalls {
            while let Some(Ok(_)) = ws.next().await {}
            return;
        }

        let reply = match behavior {
            Behavior::Reject => ServerFrame::Rejected {
                reason: "unsupported robot".to_string(),
            },
            _ => ServerFrame::Ready {
                protocol_version: PROTOCOL_VERSION,
                policy: Some("doubler".to_string()),
            },
        };
        if ws.send(Message::Text(serde_json::to_string(&reply).unwrap())).await.is_err() {
            return;
        }

        let mut handled = 0usize;
        while let Some(Ok(Message::Text(text))) = ws.next().await {
            let Ok(ClientFrame::Observation {
                request_id,
                observation,
                ..
            }) = serde_json::from_str::<ClientFrame>(&text)
            else {
                continue;
            };
            handled += 1;
            let state = observation
                .get(STATE_KEY)
                .and_then(|t| t.data.as_f32())
                .map(|values| values.to_vec())
                .unwrap_or_default();

            let reply = match behavior {
                Behavior::Silent => continue,
                Behavior::HangUpFirstConnection | Behavior::HangUpThenStall if connection == 1 => return,
                Behavior::SlowFirst(delay) if handled == 1 => {
                    tokio::time::sleep(delay).await;
                    doubled(request_id, &state)
                }
                Behavior::WrongShape => ServerFrame::Action {
                    request_id,
                    action: Tensor::float32(vec![2, state.len()], [state.clone(), state].concat()),
                },
                _ => doubled(request_id, &state),
            };

            if ws.send(Message::Text(serde_json::to_string(&reply).unwrap())).await.is_err() {
                return;
            }
        }
    }

    fn observation(values: Vec<f32>) -> Observation {
        let mut observation = Observation::new();
        observation.insert(STATE_KEY, Tensor::vector(values));
        observation
    }

    fn fast_config() -> ClientConfig {
        ClientConfig {
            connect_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_responses_follow_request_order() {
        let endpoint = spawn_service(Behavior::Echo).await;
        let mut session = InferenceSession::open(&endpoint, fast_config()).await.unwrap();
        assert_eq!(session.state(), ConnectionState::Ready);
        assert_eq!(session.policy_name(), Some("doubler"));

        for i in 0..5 {
            let action = session.infer(observation(vec![i as f32, 1.0])).await.unwrap();
            assert_eq!(action.values, vec![2.0 * i as f32, 2.0]);
        }

        session.close().await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_rejects_non_websocket_endpoint() {
        let err = InferenceSession::open("http://localhost:8765", fast_config())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectionError::InvalidEndpoint(_)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = InferenceSession::open(&format!("ws://{}", addr), fast_config())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectionError::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_handshake_rejection() {
        let endpoint = spawn_service(Behavior::Reject).await;
        let err = InferenceSession::open(&endpoint, fast_config()).await.err().unwrap();
        assert_eq!(err, ConnectionError::HandshakeRejected("unsupported robot".to_string()));
    }

    #[tokio::test]
    async fn test_silent_service_times_out() {
        let endpoint = spawn_service(Behavior::Silent).await;
        let mut session = InferenceSession::open(&endpoint, fast_config()).await.unwrap();

        let err = session.infer(observation(vec![1.0])).await.unwrap_err();

        assert_eq!(err, InferenceError::Timeout(Duration::from_millis(200)));
        assert_eq!(session.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_late_answer_is_discarded() {
        let endpoint = spawn_service(Behavior::SlowFirst(Duration::from_millis(250))).await;
        let mut session = InferenceSession::open(&endpoint, fast_config()).await.unwrap();

        let first = session.infer(observation(vec![1.0])).await;
        assert!(matches!(first, Err(InferenceError::Timeout(_))));

        let second = session.infer(observation(vec![5.0])).await.unwrap();
        assert_eq!(second.values, vec![10.0]);
    }

    #[tokio::test]
    async fn test_wrong_action_shape_is_protocol_error() {
        let endpoint = spawn_service(Behavior::WrongShape).await;
        let mut session = InferenceSession::open(&endpoint, fast_config()).await.unwrap();

        let err = session.infer(observation(vec![1.0, 2.0])).await.unwrap_err();

        assert!(matches!(err, InferenceError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_unexpected_action_width_is_protocol_error() {
        let endpoint = spawn_service(Behavior::Echo).await;
        let config = ClientConfig {
            action_dim: Some(6),
            ..fast_config()
        };
        let mut session = InferenceSession::open(&endpoint, config).await.unwrap();

        let err = session.infer(observation(vec![1.0, 2.0])).await.unwrap_err();

        assert!(matches!(err, InferenceError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_lost_connection_then_reconnect() {
        let endpoint = spawn_service(Behavior::HangUpFirstConnection).await;
        let mut session = InferenceSession::open(&endpoint, fast_config()).await.unwrap();

        let err = session.infer(observation(vec![1.0])).await.unwrap_err();
        assert!(matches!(err, InferenceError::Transport(_)));
        assert_eq!(session.state(), ConnectionState::Failed);

        let action = session.infer(observation(vec![3.0])).await.unwrap();
        assert_eq!(action.values, vec![6.0]);
        assert_eq!(session.state(), ConnectionState::Ready);
    }
    /// Service that reports how each connection ended: `"close"` when a
    /// close frame arrived, `"ended"` when the socket just went away.
    async fn spawn_recording_service() -> (String, mpsc::UnboundedReceiver<&'static str>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (events, received) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let events = events.clone();
                tokio::spawn(async move {
                    let Ok(mut ws) = accept_async(tcp).await else {
                        return;
                    };
                    let Some(Ok(Message::Text(_))) = ws.next().await else {
                        return;
                    };
                    let ready = ServerFrame::Ready {
                        protocol_version: PROTOCOL_VERSION,
                        policy: None,
                    };
                    if ws.send(Message::Text(serde_json::to_string(&ready).unwrap())).await.is_err() {
                        return;
                    }
                    let event = loop {
                        match ws.next().await {
                            Some(Ok(Message::Close(_))) => break "close",
                            Some(Ok(_)) => continue,
                            Some(Err(_)) | None => break "ended",
                        }
                    };
                    let _ = events.send(event);
                });
            }
        });
        (format!("ws://{}", addr), received)
    }

    #[tokio::test]
    async fn test_open_times_out_without_ready() {
        let endpoint = spawn_service(Behavior::NeverReady).await;
        let config = ClientConfig {
            connect_timeout: Duration::from_millis(200),
            ..fast_config()
        };

        let err = InferenceSession::open(&endpoint, config).await.err().unwrap();

        assert_eq!(err, ConnectionError::Timeout(Duration::from_millis(200)));
    }

    #[tokio::test]
    async fn test_timeout_during_reconnect_leaves_session_failed() {
        let endpoint = spawn_service(Behavior::HangUpThenStall).await;
        let mut session = InferenceSession::open(&endpoint, fast_config()).await.unwrap();

        let err = session.infer(observation(vec![1.0])).await.unwrap_err();
        assert!(matches!(err, InferenceError::Transport(_)));
        assert_eq!(session.state(), ConnectionState::Failed);

        // The reconnect handshake stalls past the request timeout.
        let err = session.infer(observation(vec![2.0])).await.unwrap_err();
        assert_eq!(err, InferenceError::Timeout(Duration::from_millis(200)));
        assert_eq!(session.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_close_sends_close_frame() {
        let (endpoint, mut events) = spawn_recording_service().await;
        let mut session = InferenceSession::open(&endpoint, fast_config()).await.unwrap();

        session.close().await;

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv()).await.unwrap();
        assert_eq!(event, Some("close"));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_drop_releases_socket() {
        let (endpoint, mut events) = spawn_recording_service().await;
        let session = InferenceSession::open(&endpoint, fast_config()).await.unwrap();

        drop(session);

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv()).await.unwrap();
        assert_eq!(event, Some("ended"));
    }

    #[tokio::test]
    async fn test_overflowing_action_shape_is_protocol_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let Ok((tcp, _)) = listener.accept().await else {
                return;
            };
            let Ok(mut ws) = accept_async(tcp).await else {
                return;
            };
            let _ = ws.next().await;
            let ready = r#"{"type":"ready","protocol_version":1}"#;
            let _ = ws.send(Message::Text(ready.to_string())).await;
            let _ = ws.next().await;
            let action = r#"{"type":"action","request_id":0,"action":{"dtype":"float32","shape":[4294967296,4294967296,2],"data":[1.0]}}"#;
            let _ = ws.send(Message::Text(action.to_string())).await;
            while let Some(Ok(_)) = ws.next().await {}
        });
        let mut session = InferenceSession::open(&format!("ws://{}", addr), fast_config())
            .await
            .unwrap();

        let err = session.infer(observation(vec![1.0])).await.unwrap_err();

        assert!(matches!(err, InferenceError::Protocol(_)));
        assert_eq!(session.state(), ConnectionState::Ready);
    }
}
