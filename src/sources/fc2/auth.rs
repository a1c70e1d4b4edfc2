use reqwest::{Url, header::REFERER};
use tracing::{debug, error, info};

use crate::common::{
    errors::{Result, check_response},
    http::{CookieStore, HttpSession},
    types::Credentials,
};

/// Cookies that together make up a logged-in FC2 session.
pub const REQUIRED_COOKIES: [&str; 7] = [
    "FCSID",
    "fcu",
    "fgcv",
    "glgd_val",
    "login_status",
    "PHPSESSID",
    "secure_check_fc2",
];

/// True iff every required cookie name is present. Extras are ignored.
pub fn has_required_cookies<S: AsRef<str>>(names: &[S]) -> bool {
    let found = REQUIRED_COOKIES
        .iter()
        .filter(|required| names.iter().any(|n| n.as_ref() == **required))
        .count();
    debug!("Same Cookies: {}", found);
    found == REQUIRED_COOKIES.len()
}

/// How the session ended up after authentication. Never fatal by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The stored cookies already form a session.
    Cached,
    LoggedIn,
    /// Login was attempted but the cookie set is still incomplete.
    LoginFailed,
    Anonymous,
}

/// Result of [`CookieAuthenticator::authenticate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthReport {
    /// Stored cookies were dropped before the session was checked.
    pub purged: bool,
    pub outcome: AuthOutcome,
}

pub struct CookieAuthenticator<'a> {
    http: &'a HttpSession,
    login_url: &'a Url,
}

impl<'a> CookieAuthenticator<'a> {
    pub fn new(http: &'a HttpSession, login_url: &'a Url) -> Self {
        Self { http, login_url }
    }

    pub async fn authenticate(&self, page_url: &str, credentials: &Credentials) -> AuthReport {
        let purged = credentials.purge;
        if purged {
            self.http.clear();
            info!("All credentials were successfully removed.");
        }

        AuthReport {
            purged,
            outcome: self.establish(page_url, credentials).await,
        }
    }

    async fn establish(&self, page_url: &str, credentials: &Credentials) -> AuthOutcome {
        if has_required_cookies(&self.http.cookie_names()) {
            info!("Attempting to authenticate using cached cookies");
            return AuthOutcome::Cached;
        }

        let Some((username, password)) = credentials.login_pair() else {
            debug!("No cached session and no credentials, continuing anonymously");
            return AuthOutcome::Anonymous;
        };

        match self.login(page_url, username, password).await {
            Ok(true) => {
                info!("Logged in with the supplied credentials");
                AuthOutcome::LoggedIn
            }
            Ok(false) => {
                error!("Failed to login, check your username/password");
                AuthOutcome::LoginFailed
            }
            Err(e) => {
                error!("Failed to login: {}", e);
                AuthOutcome::LoginFailed
            }
        }
    }

    /// Prime cookies from the channel page, then post the login form.
    async fn login(&self, page_url: &str, username: &str, password: &str) -> Result<bool> {
        debug!("login ...");
        let client = self.http.client();

        check_response(client.get(page_url).send().await?)?;

        let form = [
            ("pass", password),
            ("email", username),
            ("done", "livechat"),
            ("keep_login", "1"),
        ];
        check_response(
            client
                .post(self.login_url.clone())
                .header(REFERER, page_url)
                .form(&form)
                .send()
                .await?,
        )?;

        Ok(has_required_cookies(&self.http.cookie_names()))
    }
}
