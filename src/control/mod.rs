//! Control socket client.
//!
//! One [`ControlChannel`] owns one socket. On connect it asks for the media
//! server, then runs two tasks until the socket closes: a keepalive sending
//! `heartbeat` every 30 seconds and a receive loop that records the host
//! grant and the number of inbound messages. Callers wait on that record.

use std::{sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::{WebSocketStream, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::common::{
    errors::{Fc2Error, Result},
    types::ChannelId,
};

pub mod constants;
pub mod handler;
pub mod heartbeat;
pub mod sender;
pub mod types;

use self::{
    constants::{
        CHANNEL_SHUTDOWN_MS, GET_MEDIA_SERVER_INFORMATION, HEARTBEAT_INTERVAL,
        WRITE_TASK_SHUTDOWN_MS,
    },
    handler::{LoopExit, ReceiveState},
    heartbeat::spawn_heartbeat,
    sender::ControlSender,
    types::{ChannelFailure, ChannelStatus, ControlEndpoint, ControlState, HostGrant},
};

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub heartbeat_interval: Duration,
    /// Wall-clock bound on `wait_for_host`, on top of the message-count limit.
    pub grant_timeout: Option<Duration>,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: HEARTBEAT_INTERVAL,
            grant_timeout: None,
        }
    }
}

pub struct ControlChannel {
    channel_id: ChannelId,
    status: Arc<watch::Sender<ChannelStatus>>,
    cancel: CancellationToken,
    grant_timeout: Option<Duration>,
    reader: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status.borrow();
        f.debug_struct("ControlChannel")
            .field("channel_id", &self.channel_id)
            .field("state", &status.state)
            .field("message_count", &status.message_count)
            .finish()
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl ControlChannel {
    /// Connect, wait for the host grant and hand back the live channel.
    /// The socket is closed before any error is returned.
    pub async fn open(
        channel_id: ChannelId,
        endpoint: &ControlEndpoint,
        options: ChannelOptions,
    ) -> Result<(Self, HostGrant)> {
        let channel = Self::connect(channel_id, endpoint, options).await?;
        channel.into_granted().await
    }

    async fn into_granted(self) -> Result<(Self, HostGrant)> {
        match self.wait_for_host().await {
            Ok(grant) => Ok((self, grant)),
            Err(e) => {
                self.shutdown().await;
                Err(e)
            }
        }
    }

    pub async fn connect(
        channel_id: ChannelId,
        endpoint: &ControlEndpoint,
        options: ChannelOptions,
    ) -> Result<Self> {
        debug!("[{}] Connecting to control server: {}", channel_id, endpoint.url);
        let (ws_stream, _) = tokio_tungstenite::connect_async(endpoint.url.as_str()).await?;
        Self::start(channel_id, ws_stream, options).await
    }

    /// Drive an already established socket.
    pub async fn start<S>(
        channel_id: ChannelId,
        ws_stream: WebSocketStream<S>,
        options: ChannelOptions,
    ) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut write, mut read) = ws_stream.split();
        let status = Arc::new(watch::channel(ChannelStatus::default()).0);
        let cancel = CancellationToken::new();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Message>();
        let sender = ControlSender::new(tx);

        let request = sender.payload(GET_MEDIA_SERVER_INFORMATION)?;
        write.send(Message::Text(request.into())).await?;
        status.send_modify(|s| s.state = ControlState::AwaitingHost);

        let write_cancel = cancel.clone();
        let write_id = channel_id.clone();
        let write_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = write_cancel.cancelled() => break,
                    msg = rx.recv() => {
                        let Some(msg) = msg else { break };
                        if let Err(e) = write.send(msg).await {
                            warn!("[{}] WS write error: {}", write_id, e);
                            break;
                        }
                    }
                }
            }
            let _ = write.close().await;
        });

        spawn_heartbeat(sender, cancel.clone(), options.heartbeat_interval);

        let read_cancel = cancel.clone();
        let mut state = ReceiveState::new(channel_id.clone(), status.clone());
        let read_id = channel_id.clone();
        let reader = tokio::spawn(async move {
            let exit = loop {
                tokio::select! {
                    _ = read_cancel.cancelled() => break LoopExit::Closed,
                    msg = read.next() => {
                        let msg = match msg {
                            Some(Ok(msg)) => msg,
                            Some(Err(e)) => {
                                warn!("[{}] WS read error: {}", read_id, e);
                                break LoopExit::Failed(ChannelFailure::Transport(e.to_string()));
                            }
                            None => {
                                debug!("[{}] WS stream ended", read_id);
                                break LoopExit::Closed;
                            }
                        };

                        match msg {
                            Message::Text(text) => {
                                if let Some(exit) = state.handle_text(text.as_str()) {
                                    break exit;
                                }
                            }
                            Message::Close(frame) => {
                                let (code, reason) = frame
                                    .map(|cf| (u16::from(cf.code), cf.reason.to_string()))
                                    .unwrap_or((1000u16, "No reason".into()));
                                debug!("[{}] WS closed: code={}, reason='{}'", read_id, code, reason);
                                break LoopExit::Closed;
                            }
                            _ => {}
                        }
                    }
                }
            };

            state.finish(exit);
            read_cancel.cancel();
            let _ = tokio::time::timeout(
                Duration::from_millis(WRITE_TASK_SHUTDOWN_MS),
                write_task,
            )
            .await;
            debug!("[{}] Control channel closed", read_id);
        });

        Ok(Self {
            channel_id,
            status,
            cancel,
            grant_timeout: options.grant_timeout,
            reader: Some(reader),
        })
    }

    /// Block until a host grant arrives or the channel gives up.
    ///
    /// Gives up after the patience threshold of inbound messages, when the
    /// receive loop ends without a grant, or when the optional wall-clock
    /// limit passes.
    pub async fn wait_for_host(&self) -> Result<HostGrant> {
        let mut rx = self.status.subscribe();
        let wait = async {
            match rx.wait_for(ChannelStatus::is_settled).await {
                Ok(status) => status.resolution(),
                // Sender lives in `self`, so this is unreachable in practice.
                Err(_) => self.status.borrow().resolution(),
            }
        };

        let resolution = match self.grant_timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(r) => r,
                Err(_) => {
                    warn!(
                        "[{}] No host grant within {:?}",
                        self.channel_id, limit
                    );
                    Err(Fc2Error::Timeout {
                        messages: self.message_count(),
                    })
                }
            },
            None => wait.await,
        };

        match &resolution {
            Ok(grant) => info!("[{}] Media server granted: {}", self.channel_id, grant.host),
            Err(e) => {
                self.status.send_if_modified(|s| {
                    if s.grant.is_none() && !s.state.is_terminal() {
                        s.state = ControlState::TimedOut;
                        true
                    } else {
                        false
                    }
                });
                debug!("[{}] host_timeout: {}", self.channel_id, e);
            }
        }
        resolution
    }

    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    pub fn state(&self) -> ControlState {
        self.status.borrow().state
    }

    pub fn message_count(&self) -> u32 {
        self.status.borrow().message_count
    }

    pub fn host_grant(&self) -> Option<HostGrant> {
        self.status.borrow().grant.clone()
    }

    /// Observe status changes (state, count, grant).
    pub fn subscribe(&self) -> watch::Receiver<ChannelStatus> {
        self.status.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the receive loop has ended.
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }

    /// Stop the keepalive and receive loop and close the socket.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Like [`close`](Self::close), but waits until the socket is closed.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(reader) = self.reader.take() {
            if tokio::time::timeout(Duration::from_millis(CHANNEL_SHUTDOWN_MS), reader)
                .await
                .is_err()
            {
                warn!("[{}] Receive loop did not stop in time", self.channel_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use tokio::io::DuplexStream;
    use tokio_tungstenite::tungstenite::protocol::Role;

    async fn pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
        (client, server)
    }

    fn options() -> ChannelOptions {
        ChannelOptions {
            heartbeat_interval: Duration::from_secs(3600),
            grant_timeout: Some(Duration::from_secs(10)),
        }
    }

    async fn next_json(server: &mut WebSocketStream<DuplexStream>) -> Value {
        loop {
            match server.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                _ => continue,
            }
        }
    }

    async fn push(server: &mut WebSocketStream<DuplexStream>, name: &str, arguments: Value) {
        let frame = json!({ "name": name, "arguments": arguments }).to_string();
        server.send(Message::Text(frame.into())).await.unwrap();
    }

    fn grant_args(host: &str) -> Value {
        json!({
            "host": host,
            "media_token": "mtok",
            "application": "live",
            "play_rtmp_stream": "play_1",
        })
    }

    #[tokio::test]
    async fn requests_media_server_then_heartbeats() {
        let (client, mut server) = pair().await;
        let _channel = ControlChannel::start(ChannelId::from("1"), client, options())
            .await
            .unwrap();

        let first = next_json(&mut server).await;
        assert_eq!(first["name"], "get_media_server_information");
        assert_eq!(first["id"], 1);
        assert_eq!(first["arguments"], json!({}));

        let second = next_json(&mut server).await;
        assert_eq!(second["name"], "heartbeat");
        assert_eq!(second["id"], 2);
    }

    #[tokio::test]
    async fn grant_after_29_chatter_messages() {
        let (client, mut server) = pair().await;
        let channel = ControlChannel::start(ChannelId::from("1"), client, options())
            .await
            .unwrap();

        for _ in 0..29 {
            push(&mut server, "comment", json!({ "comment": "hi" })).await;
        }
        push(&mut server, "_response_", grant_args("serverA")).await;

        let grant = channel.wait_for_host().await.unwrap();
        assert_eq!(grant.host, "serverA");
        assert_eq!(channel.state(), ControlState::Streaming);
        assert!(!channel.is_closed());
    }

    #[tokio::test]
    async fn thirty_chatter_messages_time_out() {
        let (client, mut server) = pair().await;
        let channel = ControlChannel::start(ChannelId::from("1"), client, options())
            .await
            .unwrap();

        for _ in 0..30 {
            push(&mut server, "user_count", json!({ "count": 10 })).await;
        }

        let err = channel.wait_for_host().await.unwrap_err();
        assert!(matches!(err, Fc2Error::Timeout { messages } if messages >= 30));
        assert_eq!(channel.state(), ControlState::TimedOut);
    }

    #[tokio::test]
    async fn early_control_disconnection_reports_timeout() {
        let (client, mut server) = pair().await;
        let channel = ControlChannel::start(ChannelId::from("1"), client, options())
            .await
            .unwrap();

        for _ in 0..4 {
            push(&mut server, "comment", json!({})).await;
        }
        push(&mut server, "control_disconnection", json!({ "code": 4512 })).await;

        let err = channel.wait_for_host().await.unwrap_err();
        assert!(matches!(err, Fc2Error::Timeout { messages: 30 }));

        channel.closed().await;
        assert_eq!(channel.message_count(), 30);
        assert_eq!(channel.state(), ControlState::Closed);
    }

    #[tokio::test]
    async fn fee_change_fails_channel() {
        let (client, mut server) = pair().await;
        let channel = ControlChannel::start(ChannelId::from("1"), client, options())
            .await
            .unwrap();

        push(&mut server, "channel_information", json!({ "fee": 500 })).await;

        let err = channel.wait_for_host().await.unwrap_err();
        assert!(matches!(err, Fc2Error::FeeRequired));
        channel.closed().await;
        assert_eq!(channel.state(), ControlState::Failed);
    }

    #[tokio::test]
    async fn grant_survives_later_traffic() {
        let (client, mut server) = pair().await;
        let channel = ControlChannel::start(ChannelId::from("1"), client, options())
            .await
            .unwrap();

        push(&mut server, "_response_", grant_args("serverA")).await;
        assert_eq!(channel.wait_for_host().await.unwrap().host, "serverA");

        push(&mut server, "_response_", grant_args("serverB")).await;
        push(&mut server, "publish_stop", json!({})).await;
        push(&mut server, "control_disconnection", json!({})).await;
        channel.closed().await;

        assert_eq!(channel.host_grant().unwrap().host, "serverA");
        assert_eq!(channel.state(), ControlState::Closed);
    }

    #[tokio::test]
    async fn malformed_frame_is_protocol_error() {
        let (client, mut server) = pair().await;
        let channel = ControlChannel::start(ChannelId::from("1"), client, options())
            .await
            .unwrap();

        server
            .send(Message::Text("not json".to_string().into()))
            .await
            .unwrap();

        let err = channel.wait_for_host().await.unwrap_err();
        assert!(matches!(err, Fc2Error::Protocol(_)));
    }

    #[tokio::test]
    async fn silent_server_hits_wall_clock_limit() {
        let (client, _server) = pair().await;
        let channel = ControlChannel::start(
            ChannelId::from("1"),
            client,
            ChannelOptions {
                heartbeat_interval: Duration::from_secs(3600),
                grant_timeout: Some(Duration::from_millis(50)),
            },
        )
        .await
        .unwrap();

        let err = channel.wait_for_host().await.unwrap_err();
        assert!(matches!(err, Fc2Error::Timeout { messages: 0 }));
        assert_eq!(channel.state(), ControlState::TimedOut);
    }

    #[tokio::test]
    async fn failed_wait_closes_socket_before_returning() {
        let (client, mut server) = pair().await;
        let channel = ControlChannel::start(ChannelId::from("1"), client, options())
            .await
            .unwrap();
        let status = channel.subscribe();

        for _ in 0..30 {
            push(&mut server, "comment", json!({})).await;
        }
        let err = channel.into_granted().await.unwrap_err();
        assert!(matches!(err, Fc2Error::Timeout { .. }));

        // The receive loop has exited and released the status.
        assert!(status.has_changed().is_err());

        let mut saw_close = false;
        while let Some(Ok(msg)) = server.next().await {
            if let Message::Close(_) = msg {
                saw_close = true;
                break;
            }
        }
        assert!(saw_close);
    }

    #[tokio::test]
    async fn dropping_channel_closes_socket() {
        let (client, mut server) = pair().await;
        let channel = ControlChannel::start(ChannelId::from("1"), client, options())
            .await
            .unwrap();
        drop(channel);

        let mut saw_close = false;
        while let Some(Ok(msg)) = server.next().await {
            if let Message::Close(_) = msg {
                saw_close = true;
                break;
            }
        }
        assert!(saw_close);
    }
}
