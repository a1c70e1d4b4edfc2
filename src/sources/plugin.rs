use async_trait::async_trait;

use crate::{common::errors::Result, control::ControlChannel, sources::fc2::rtmp::RtmpParams};

/// A playable stream plus the control connection keeping it alive.
///
/// The platform stops serving media once the control socket closes, so the
/// channel must outlive playback. Dropping it closes the socket.
#[derive(Debug)]
pub struct ResolvedStream {
    pub name: String,
    pub params: RtmpParams,
    pub channel: ControlChannel,
}

/// Trait that live-stream sources implement.
#[async_trait]
pub trait LivePlugin: Send + Sync {
    /// Unique identifier for this source (e.g., "fc2")
    fn name(&self) -> &str;

    /// Check if this source can handle the given page URL.
    fn can_handle(&self, url: &str) -> bool;

    /// Resolve a page URL into a playable stream.
    async fn resolve(&self, url: &str) -> Result<ResolvedStream>;
}

pub type BoxedPlugin = Box<dyn LivePlugin>;
