use reqwest::{Client, Url, header::REFERER};
use tracing::{debug, info};

use super::types::{
    ChannelState, ControlServerResponse, MemberApiResponse, STATUS_UNAVAILABLE,
};
use crate::{
    common::{
        errors::{Fc2Error, Result, check_response, json_with_limit},
        types::ChannelId,
    },
    control::types::ControlEndpoint,
};

/// The two HTTP calls that turn a channel id into a control socket address.
pub struct SessionNegotiator<'a> {
    client: Client,
    member_api_url: &'a Url,
    control_server_url: &'a Url,
    page_url: &'a str,
}

impl<'a> SessionNegotiator<'a> {
    pub fn new(
        client: Client,
        member_api_url: &'a Url,
        control_server_url: &'a Url,
        page_url: &'a str,
    ) -> Self {
        Self {
            client,
            member_api_url,
            control_server_url,
            page_url,
        }
    }

    /// Fetch channel and viewer flags, rejecting channels we cannot play.
    pub async fn get_channel_state(&self, channel_id: &ChannelId) -> Result<ChannelState> {
        let stream_id = channel_id
            .as_number()
            .ok_or_else(|| Fc2Error::InvalidUrl(format!("channel id {} is not numeric", channel_id)))?;

        let form = [
            ("user", "1".to_string()),
            ("channel", "1".to_string()),
            ("profile", "1".to_string()),
            ("streamid", stream_id.to_string()),
        ];
        let resp = self
            .client
            .post(self.member_api_url.clone())
            .header(REFERER, self.page_url)
            .form(&form)
            .send()
            .await?;
        let body: MemberApiResponse = json_with_limit(check_response(resp)?).await?;

        let state = ChannelState::from_response(channel_id.clone(), body);
        state.ensure_playable()?;

        if state.is_user_logged_in {
            info!("Logged in as {}", state.user_display_name);
        }
        debug!("[{}] Found version: {}", channel_id, state.protocol_version);
        Ok(state)
    }

    /// Look up the control server for a live channel.
    pub async fn get_control_endpoint(
        &self,
        channel_id: &ChannelId,
        protocol_version: &str,
    ) -> Result<ControlEndpoint> {
        let form = [
            ("channel_id", channel_id.0.as_str()),
            ("channel_version", protocol_version),
            ("client_type", "pc"),
            ("client_app", "browser"),
        ];
        let resp = self
            .client
            .post(self.control_server_url.clone())
            .header(REFERER, self.page_url)
            .form(&form)
            .send()
            .await?;
        let body: ControlServerResponse = json_with_limit(check_response(resp)?).await?;

        if body.status == STATUS_UNAVAILABLE {
            return Err(Fc2Error::Unavailable);
        }

        let (Some(base), Some(token)) = (body.url, body.control_token) else {
            return Err(Fc2Error::Validation(format!(
                "control server response (status {}) without url/control_token",
                body.status
            )));
        };

        let url = control_url(&base, &token);
        debug!("[{}] WS URL: {}", channel_id, url);
        Ok(ControlEndpoint {
            url,
            control_token: token,
        })
    }
}

/// Append the token and fixed mode flags to the server's base URL.
pub fn control_url(base: &str, token: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!(
        "{}{}control_token={}&mode=pay&comment=0",
        base,
        separator,
        urlencoding::encode(token)
    )
}
