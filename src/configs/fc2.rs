use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

pub const DEFAULT_LOGIN_URL: &str = "https://secure.id.fc2.com/?mode=login&switch_language=en";
pub const DEFAULT_MEMBER_API_URL: &str = "https://live.fc2.com/api/memberApi.php";
pub const DEFAULT_CONTROL_SERVER_URL: &str = "https://live.fc2.com/api/getControlServer.php";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Fc2Config {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub purge_credentials: bool,
    /// Cached session cookies to start from (name -> value).
    #[serde(default)]
    pub cookies: HashMap<String, String>,
    #[serde(default = "default_login_url")]
    pub login_url: String,
    #[serde(default = "default_member_api_url")]
    pub member_api_url: String,
    #[serde(default = "default_control_server_url")]
    pub control_server_url: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Wall-clock cap on waiting for the media server grant; 0 disables it.
    #[serde(default = "default_grant_timeout_secs")]
    pub grant_timeout_secs: u64,
}

fn default_login_url() -> String {
    DEFAULT_LOGIN_URL.to_string()
}

fn default_member_api_url() -> String {
    DEFAULT_MEMBER_API_URL.to_string()
}

fn default_control_server_url() -> String {
    DEFAULT_CONTROL_SERVER_URL.to_string()
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_grant_timeout_secs() -> u64 {
    60
}

impl Fc2Config {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn grant_timeout(&self) -> Option<Duration> {
        (self.grant_timeout_secs > 0).then(|| Duration::from_secs(self.grant_timeout_secs))
    }
}

impl Default for Fc2Config {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            purge_credentials: false,
            cookies: HashMap::new(),
            login_url: default_login_url(),
            member_api_url: default_member_api_url(),
            control_server_url: default_control_server_url(),
            http_timeout_secs: default_http_timeout_secs(),
            grant_timeout_secs: default_grant_timeout_secs(),
        }
    }
}
