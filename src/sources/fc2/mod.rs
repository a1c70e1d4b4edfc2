//! FC2 Live source.
//!
//! Resolution runs four stages, each feeding the next, and any failure
//! aborts the whole run: cookie authentication, channel state lookup,
//! control server lookup, and the control socket handshake that yields
//! the RTMP server grant.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;
use tracing::{debug, warn};

pub mod api;
pub mod auth;
pub mod rtmp;
pub mod types;

use self::{
    api::SessionNegotiator,
    auth::CookieAuthenticator,
    rtmp::RtmpParams,
};
use crate::{
    common::{
        errors::{Fc2Error, Result},
        http::{HttpSession, parse_url},
        types::{ChannelId, Credentials},
    },
    configs::Fc2Config,
    control::{ChannelOptions, ControlChannel},
    sources::plugin::{LivePlugin, ResolvedStream},
};

static RE_CHANNEL_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://live\.fc2\.com/(?P<user_id>\d+)/?$").expect("invalid channel URL regex")
});

/// Extract the channel id from a channel page URL.
pub fn channel_id_from_url(url: &str) -> Option<ChannelId> {
    RE_CHANNEL_URL
        .captures(url)
        .and_then(|c| c.name("user_id"))
        .map(|m| ChannelId::from(m.as_str()))
}

pub struct Fc2Source {
    http: HttpSession,
    login_url: Url,
    member_api_url: Url,
    control_server_url: Url,
    credentials: Credentials,
    channel_options: ChannelOptions,
}

impl Fc2Source {
    pub fn new(config: &Fc2Config) -> Result<Self> {
        let login_url = parse_url(&config.login_url)?;
        let member_api_url = parse_url(&config.member_api_url)?;
        let control_server_url = parse_url(&config.control_server_url)?;

        let mut cookie_urls: Vec<Url> = Vec::new();
        for url in [&member_api_url, &login_url, &control_server_url] {
            if let Ok(root) = url.join("/") {
                if !cookie_urls.contains(&root) {
                    cookie_urls.push(root);
                }
            }
        }

        let http = HttpSession::new(cookie_urls, config.http_timeout())?;
        for (name, value) in &config.cookies {
            http.add_cookie(name, value);
        }

        Ok(Self {
            http,
            login_url,
            member_api_url,
            control_server_url,
            credentials: Credentials {
                username: config.username.clone(),
                password: config.password.clone(),
                purge: config.purge_credentials,
            },
            channel_options: ChannelOptions {
                grant_timeout: config.grant_timeout(),
                ..Default::default()
            },
        })
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_channel_options(mut self, options: ChannelOptions) -> Self {
        self.channel_options = options;
        self
    }

    pub fn http(&self) -> &HttpSession {
        &self.http
    }

    pub async fn resolve_with(&self, url: &str, credentials: &Credentials) -> Result<ResolvedStream> {
        let channel_id =
            channel_id_from_url(url).ok_or_else(|| Fc2Error::InvalidUrl(url.to_string()))?;
        debug!("[{}] Resolving {}", channel_id, url);

        let auth = CookieAuthenticator::new(&self.http, &self.login_url)
            .authenticate(url, credentials)
            .await;
        debug!(
            "[{}] Authentication: {:?} (purged: {})",
            channel_id, auth.outcome, auth.purged
        );

        let negotiator = SessionNegotiator::new(
            self.http.client(),
            &self.member_api_url,
            &self.control_server_url,
            url,
        );
        let state = negotiator.get_channel_state(&channel_id).await?;
        let endpoint = negotiator
            .get_control_endpoint(&channel_id, &state.protocol_version)
            .await?;

        let (channel, grant) =
            ControlChannel::open(channel_id.clone(), &endpoint, self.channel_options.clone())
                .await
                .inspect_err(|e| warn!("[{}] No playable stream: {}", channel_id, e))?;

        debug!("[{}] _get_rtmp ...", channel_id);
        Ok(ResolvedStream {
            name: "live".to_string(),
            params: RtmpParams::build(&grant, url),
            channel,
        })
    }
}

#[async_trait]
impl LivePlugin for Fc2Source {
    fn name(&self) -> &str {
        "fc2"
    }

    fn can_handle(&self, url: &str) -> bool {
        RE_CHANNEL_URL.is_match(url)
    }

    async fn resolve(&self, url: &str) -> Result<ResolvedStream> {
        self.resolve_with(url, &self.credentials).await
    }
}
