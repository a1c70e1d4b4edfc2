use std::time::Duration;

/// Interval between keepalive `heartbeat` messages.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Inbound messages tolerated without a host grant before giving up.
/// Independent of `HEARTBEAT_INTERVAL` even though both are 30.
pub const GRANT_PATIENCE_MESSAGES: u32 = 30;

/// Timeout (ms) allowed for the writer task to flush its close frame.
pub const WRITE_TASK_SHUTDOWN_MS: u64 = 500;

/// Timeout (ms) for the receive loop to wind down when a channel is shut down.
pub const CHANNEL_SHUTDOWN_MS: u64 = 1000;

/// Outbound capability request sent once per connection.
pub const GET_MEDIA_SERVER_INFORMATION: &str = "get_media_server_information";

/// Outbound keepalive.
pub const HEARTBEAT: &str = "heartbeat";

/// `media_disconnection` code for a second viewer session on the same account.
pub const MULTIPLE_CONNECTIONS_CODE: i64 = 104;

/// `control_disconnection` code for a server-side disconnect.
pub const SERVER_DISCONNECT_CODE: i64 = 4512;
