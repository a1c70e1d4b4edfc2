//! Resolve FC2 Live channel pages into RTMP connection parameters.
//!
//! ```no_run
//! # async fn run() -> fc2live::Result<()> {
//! let config = fc2live::configs::Config::load(None)?;
//! let manager = fc2live::sources::SourceManager::new(&config)?;
//! let stream = manager.resolve("https://live.fc2.com/39153575/").await?;
//! println!("{}", stream.params.tc_url);
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod configs;
pub mod control;
pub mod sources;

pub use common::errors::{Fc2Error, Result};
pub use common::types::{ChannelId, Credentials};
pub use control::{ChannelOptions, ControlChannel, types::HostGrant};
pub use sources::{
    SourceManager,
    fc2::{Fc2Source, rtmp::RtmpParams},
    plugin::{LivePlugin, ResolvedStream},
};
