use serde::Serialize;

use crate::control::types::HostGrant;

pub const FLASH_VERSION: &str = "WIN 29,0,0,140";
pub const SWF_URL: &str = "https://live.fc2.com/swf/liveVideo.swf";

/// Connection parameters for an RTMP client, keyed the way rtmpdump and
/// librtmp name them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RtmpParams {
    pub app: String,
    #[serde(rename = "flashVer")]
    pub flash_ver: String,
    #[serde(rename = "swfUrl")]
    pub swf_url: String,
    #[serde(rename = "tcUrl")]
    pub tc_url: String,
    pub live: String,
    #[serde(rename = "pageUrl")]
    pub page_url: String,
    pub playpath: String,
    pub host: String,
}

impl RtmpParams {
    pub fn build(grant: &HostGrant, page_url: &str) -> Self {
        let app = format!("{}?media_token={}", grant.application, grant.media_token);
        Self {
            tc_url: format!("rtmp://{}/{}", grant.host, app),
            app,
            flash_ver: FLASH_VERSION.to_string(),
            swf_url: SWF_URL.to_string(),
            live: "yes".to_string(),
            page_url: page_url.to_string(),
            playpath: grant.play_path.clone(),
            host: grant.host.clone(),
        }
    }

    /// Arguments for `rtmpdump` (without the output flag).
    pub fn rtmpdump_args(&self) -> Vec<String> {
        vec![
            "-r".into(),
            self.tc_url.clone(),
            "-a".into(),
            self.app.clone(),
            "-y".into(),
            self.playpath.clone(),
            "-W".into(),
            self.swf_url.clone(),
            "-p".into(),
            self.page_url.clone(),
            "-f".into(),
            self.flash_ver.clone(),
            "-v".into(),
        ]
    }
}
