use std::sync::Arc;

use serde_json::{Map, Value};
use time::{OffsetDateTime, macros::format_description};
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use super::{
    constants::{GRANT_PATIENCE_MESSAGES, MULTIPLE_CONNECTIONS_CODE, SERVER_DISCONNECT_CODE},
    types::{ChannelFailure, ChannelStatus, ControlMessage, ControlState, HostGrant, MessageKind},
};
use crate::common::types::ChannelId;

/// How the receive loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    Closed,
    Failed(ChannelFailure),
}

/// Status changes produced by one inbound message, applied atomically.
#[derive(Default)]
struct Effect {
    grant: Option<HostGrant>,
    saturate_count: bool,
    exit: Option<LoopExit>,
}

impl Effect {
    fn exit(exit: LoopExit) -> Self {
        Self {
            exit: Some(exit),
            ..Default::default()
        }
    }
}

/// Per-connection receive state. Owns the write side of the shared status.
pub struct ReceiveState {
    channel_id: ChannelId,
    status: Arc<watch::Sender<ChannelStatus>>,
}

impl ReceiveState {
    pub fn new(channel_id: ChannelId, status: Arc<watch::Sender<ChannelStatus>>) -> Self {
        Self { channel_id, status }
    }

    /// Handle one text frame. `Some` ends the loop.
    pub fn handle_text(&mut self, text: &str) -> Option<LoopExit> {
        // Only this loop writes the counter.
        let count = self.status.borrow().message_count.saturating_add(1);

        let effect = match serde_json::from_str::<ControlMessage>(text) {
            Ok(msg) => self.dispatch(count, msg),
            Err(e) => {
                warn!(
                    "[{}] Failed to parse control message: {} - Text: {}",
                    self.channel_id, e, text
                );
                Effect::exit(LoopExit::Failed(ChannelFailure::Protocol(e.to_string())))
            }
        };

        self.apply(count, effect)
    }

    fn dispatch(&self, count: u32, msg: ControlMessage) -> Effect {
        let kind = MessageKind::from_name(&msg.name);
        if !kind.is_chatter() {
            let time_utc = OffsetDateTime::now_utc()
                .format(format_description!("[hour]:[minute]:[second] UTC"))
                .unwrap_or_default();
            debug!("[{}] {} - {} - {}", self.channel_id, time_utc, count, msg.name);
        }

        match kind {
            MessageKind::Response => self.handle_response(&msg.arguments),
            MessageKind::MediaConnection => {
                debug!("[{}] Successfully opened stream", self.channel_id);
                Effect::default()
            }
            MessageKind::ControlDisconnection => self.handle_control_disconnection(&msg.arguments),
            MessageKind::PublishStop => {
                info!("[{}] Stream ended", self.channel_id);
                Effect::default()
            }
            MessageKind::ChannelInformation => self.handle_channel_information(&msg.arguments),
            MessageKind::MediaDisconnection => {
                self.handle_media_disconnection(&msg.arguments);
                Effect::default()
            }
            MessageKind::HeartbeatAck
            | MessageKind::Comment
            | MessageKind::NgComment
            | MessageKind::UserCount => Effect::default(),
            MessageKind::Unknown(name) => {
                trace!("[{}] Ignoring control message {}", self.channel_id, name);
                Effect::default()
            }
        }
    }

    fn apply(&self, count: u32, effect: Effect) -> Option<LoopExit> {
        let Effect {
            grant,
            saturate_count,
            exit,
        } = effect;

        self.status.send_modify(|s| {
            s.message_count = count;
            // A points-restricted broadcast disconnects before any real
            // traffic; saturate the counter so the waiter reports a timeout.
            if saturate_count && s.message_count <= GRANT_PATIENCE_MESSAGES {
                s.message_count = GRANT_PATIENCE_MESSAGES;
            }
            if let Some(grant) = grant {
                if s.grant.is_none() {
                    s.grant = Some(grant);
                    if !s.state.is_terminal() {
                        s.state = ControlState::Streaming;
                    }
                }
            }
            if let Some(exit) = &exit {
                record_exit(s, exit);
            }
        });
        exit
    }

    fn handle_response(&self, arguments: &Map<String, Value>) -> Effect {
        let grant = match HostGrant::from_arguments(arguments) {
            Ok(Some(grant)) => grant,
            Ok(None) => return Effect::default(),
            Err(e) => {
                error!("[{}] {}", self.channel_id, e);
                return Effect::exit(LoopExit::Failed(ChannelFailure::Protocol(e.to_string())));
            }
        };

        if self.status.borrow().grant.is_some() {
            debug!("[{}] Ignoring repeated host grant", self.channel_id);
            return Effect::default();
        }

        debug!("[{}] Found host data: {}", self.channel_id, grant.host);
        Effect {
            grant: Some(grant),
            ..Default::default()
        }
    }

    fn handle_control_disconnection(&self, arguments: &Map<String, Value>) -> Effect {
        match code(arguments) {
            Some(SERVER_DISCONNECT_CODE) => debug!("[{}] Disconnected from Server", self.channel_id),
            Some(other) => debug!("[{}] Control disconnection, code {}", self.channel_id, other),
            None => debug!("[{}] Control disconnection", self.channel_id),
        }
        Effect {
            saturate_count: true,
            exit: Some(LoopExit::Closed),
            ..Default::default()
        }
    }

    fn handle_channel_information(&self, arguments: &Map<String, Value>) -> Effect {
        let fee = arguments.get("fee");
        if fee.is_some_and(is_zero) {
            return Effect::default();
        }
        match fee {
            Some(fee) => error!("[{}] Stream requires a fee now ({})", self.channel_id, fee),
            None => error!("[{}] Channel information without a fee", self.channel_id),
        }
        Effect::exit(LoopExit::Failed(ChannelFailure::FeeRequired))
    }

    fn handle_media_disconnection(&self, arguments: &Map<String, Value>) {
        match code(arguments) {
            Some(MULTIPLE_CONNECTIONS_CODE) => warn!(
                "[{}] Disconnected. Multiple connections has been detected.",
                self.channel_id
            ),
            Some(c) if c != 0 => debug!("[{}] error code {}", self.channel_id, c),
            _ => {}
        }
    }

    /// Record a loop exit that did not come from a message (socket closed,
    /// read error, cancellation).
    pub fn finish(&self, exit: LoopExit) {
        self.status.send_modify(|s| record_exit(s, &exit));
    }
}

/// A state that is already terminal (e.g. `TimedOut` set by the waiter) is kept.
fn record_exit(status: &mut ChannelStatus, exit: &LoopExit) {
    if status.state.is_terminal() {
        return;
    }
    match exit {
        LoopExit::Closed => status.state = ControlState::Closed,
        LoopExit::Failed(failure) => {
            status.state = ControlState::Failed;
            status.failure = Some(failure.clone());
        }
    }
}

/// Numeric zero, as a number or a numeric string. A missing fee is not zero.
fn is_zero(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.trim().parse::<f64>().is_ok_and(|f| f == 0.0),
        _ => false,
    }
}

fn code(arguments: &Map<String, Value>) -> Option<i64> {
    arguments.get("code").and_then(Value::as_i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> (ReceiveState, watch::Receiver<ChannelStatus>) {
        let (tx, rx) = watch::channel(ChannelStatus {
            state: ControlState::AwaitingHost,
            ..Default::default()
        });
        (ReceiveState::new(ChannelId::from("1234"), Arc::new(tx)), rx)
    }

    fn frame(name: &str, arguments: Value) -> String {
        json!({ "name": name, "arguments": arguments }).to_string()
    }

    fn grant_frame(host: &str) -> String {
        frame(
            "_response_",
            json!({
                "host": host,
                "media_token": "mtok",
                "application": "live",
                "play_rtmp_stream": "play_1",
            }),
        )
    }

    #[test]
    fn counts_every_message_once() {
        let (mut st, rx) = state();
        for i in 1..=5u32 {
            assert!(st.handle_text(&frame("comment", json!({}))).is_none());
            assert_eq!(rx.borrow().message_count, i);
        }
        st.handle_text(&frame("mystery", json!({})));
        assert_eq!(rx.borrow().message_count, 6);
    }

    #[test]
    fn grant_moves_to_streaming_and_keeps_looping() {
        let (mut st, rx) = state();
        assert!(st.handle_text(&grant_frame("serverA")).is_none());
        let status = rx.borrow();
        assert_eq!(status.state, ControlState::Streaming);
        assert_eq!(status.grant.as_ref().unwrap().host, "serverA");
    }

    #[test]
    fn first_grant_is_never_overwritten() {
        let (mut st, rx) = state();
        st.handle_text(&grant_frame("serverA"));
        st.handle_text(&grant_frame("serverB"));
        st.handle_text(&frame("publish_stop", json!({})));
        st.handle_text(&frame("channel_information", json!({ "fee": 0 })));
        assert_eq!(rx.borrow().grant.as_ref().unwrap().host, "serverA");
    }

    #[test]
    fn response_without_host_is_ignored() {
        let (mut st, rx) = state();
        assert!(st.handle_text(&frame("_response_", json!({ "code": 0 }))).is_none());
        assert!(rx.borrow().grant.is_none());
    }

    #[test]
    fn control_disconnection_saturates_count() {
        let (mut st, rx) = state();
        for _ in 0..4 {
            st.handle_text(&frame("user_count", json!({ "count": 3 })));
        }
        let exit = st.handle_text(&frame("control_disconnection", json!({ "code": 4512 })));
        assert_eq!(exit, Some(LoopExit::Closed));
        assert_eq!(rx.borrow().message_count, GRANT_PATIENCE_MESSAGES);

        st.finish(exit.unwrap());
        let status = rx.borrow();
        assert_eq!(status.state, ControlState::Closed);
        assert!(matches!(
            status.resolution(),
            Err(crate::common::errors::Fc2Error::Timeout { messages: 30 })
        ));
    }

    #[test]
    fn late_control_disconnection_keeps_higher_count() {
        let (mut st, rx) = state();
        for _ in 0..40 {
            st.handle_text(&frame("comment", json!({})));
        }
        st.handle_text(&frame("control_disconnection", json!({})));
        assert_eq!(rx.borrow().message_count, 41);
    }

    #[test]
    fn fee_change_fails_the_channel() {
        let (mut st, rx) = state();
        let exit = st.handle_text(&frame("channel_information", json!({ "fee": 500 })));
        assert_eq!(exit, Some(LoopExit::Failed(ChannelFailure::FeeRequired)));
        st.finish(exit.unwrap());
        assert_eq!(rx.borrow().state, ControlState::Failed);
    }

    #[test]
    fn free_channel_information_continues() {
        let (mut st, _rx) = state();
        assert!(st.handle_text(&frame("channel_information", json!({ "fee": 0 }))).is_none());
        assert!(st.handle_text(&frame("channel_information", json!({ "fee": 0.0 }))).is_none());
        assert!(st.handle_text(&frame("channel_information", json!({ "fee": "0" }))).is_none());
    }

    #[test]
    fn non_integer_fee_fails_the_channel() {
        for fee in [json!(500.0), json!("500")] {
            let (mut st, _rx) = state();
            let exit = st.handle_text(&frame("channel_information", json!({ "fee": fee })));
            assert_eq!(exit, Some(LoopExit::Failed(ChannelFailure::FeeRequired)), "fee {}", fee);
        }
    }

    #[test]
    fn missing_fee_fails_the_channel() {
        let (mut st, rx) = state();
        let exit = st.handle_text(&frame("channel_information", json!({ "title": "x" })));
        assert_eq!(exit, Some(LoopExit::Failed(ChannelFailure::FeeRequired)));
        assert_eq!(rx.borrow().message_count, 1);
    }

    #[test]
    fn null_arguments_are_tolerated() {
        let (mut st, rx) = state();
        assert!(st.handle_text(r#"{"name":"user_count","arguments":null}"#).is_none());
        assert!(st.handle_text(r#"{"name":"comment"}"#).is_none());
        let status = rx.borrow();
        assert_eq!(status.message_count, 2);
        assert_eq!(status.state, ControlState::AwaitingHost);
    }

    #[test]
    fn media_disconnection_does_not_end_loop() {
        let (mut st, _rx) = state();
        assert!(st.handle_text(&frame("media_disconnection", json!({ "code": 104 }))).is_none());
        assert!(st.handle_text(&frame("media_disconnection", json!({ "code": 7 }))).is_none());
        assert!(st.handle_text(&frame("media_connection", json!({}))).is_none());
    }

    #[test]
    fn malformed_frame_is_protocol_failure() {
        let (mut st, rx) = state();
        let exit = st.handle_text("{\"arguments\":{}}");
        assert!(matches!(exit, Some(LoopExit::Failed(ChannelFailure::Protocol(_)))));
        assert_eq!(rx.borrow().message_count, 1);
    }

    #[test]
    fn finish_keeps_timed_out() {
        let (st, rx) = state();
        st.status.send_modify(|s| s.state = ControlState::TimedOut);
        st.finish(LoopExit::Closed);
        assert_eq!(rx.borrow().state, ControlState::TimedOut);
    }
}
