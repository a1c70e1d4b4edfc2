use serde::Deserialize;

use crate::common::{
    errors::{Fc2Error, Result},
    types::ChannelId,
};

/// `memberApi.php` response. Every field is required with exactly this type.
#[derive(Debug, Deserialize)]
pub struct MemberApiResponse {
    pub status: i64,
    pub data: MemberApiData,
}

#[derive(Debug, Deserialize)]
pub struct MemberApiData {
    pub channel_data: ChannelData,
    pub user_data: UserData,
}

#[derive(Debug, Deserialize)]
pub struct ChannelData {
    pub channelid: String,
    pub userid: String,
    pub adult: i64,
    pub login_only: i64,
    pub version: String,
    pub fee: i64,
}

#[derive(Debug, Deserialize)]
pub struct UserData {
    pub is_login: i64,
    pub userid: i64,
    pub fc2id: i64,
    pub name: String,
    pub point: i64,
    pub adult_access: i64,
    pub recauth: i64,
}

/// What the member API says about a channel and the viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelState {
    pub channel_id: ChannelId,
    pub protocol_version: String,
    pub is_paid: bool,
    pub requires_login: bool,
    pub is_user_logged_in: bool,
    pub user_display_name: String,
}

impl ChannelState {
    pub fn from_response(channel_id: ChannelId, resp: MemberApiResponse) -> Self {
        let MemberApiData {
            channel_data,
            user_data,
        } = resp.data;
        Self {
            channel_id,
            protocol_version: channel_data.version,
            is_paid: channel_data.fee != 0,
            requires_login: channel_data.login_only != 0,
            is_user_logged_in: user_data.is_login == 1,
            user_display_name: user_data.name,
        }
    }

    /// Reject channels this client cannot play.
    pub fn ensure_playable(&self) -> Result<()> {
        if self.requires_login && !self.is_user_logged_in {
            return Err(Fc2Error::LoginRequired);
        }
        if self.is_paid {
            return Err(Fc2Error::FeeRequired);
        }
        Ok(())
    }
}

/// Status code of `getControlServer.php` for an offline broadcaster.
pub const STATUS_UNAVAILABLE: i64 = 11;

/// `getControlServer.php` response. Only `status` is always present.
#[derive(Debug, Deserialize)]
pub struct ControlServerResponse {
    pub status: i64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub control_token: Option<String>,
}
