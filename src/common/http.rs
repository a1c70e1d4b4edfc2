use std::{sync::Arc, time::Duration};

use parking_lot::{Mutex, RwLock};
use reqwest::{
    Client, Url,
    cookie::{self, Jar},
    header::HeaderValue,
};
use tracing::debug;

use crate::common::errors::{Fc2Error, Result};

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0";

/// Read/clear access to the session cookies shared by every HTTP call.
pub trait CookieStore: Send + Sync {
    /// Names of every live cookie, whatever host or path it is scoped to.
    fn cookie_names(&self) -> Vec<String>;

    /// Drop every stored cookie.
    fn clear(&self);
}

/// A `Jar` that also remembers the host and path each cookie was scoped to,
/// so cookies outside the tracked origins' root can still be listed.
#[derive(Default)]
struct ScopedJar {
    jar: Jar,
    scopes: Mutex<Vec<Url>>,
}

impl ScopedJar {
    fn remember(&self, scope: Url) {
        let mut scopes = self.scopes.lock();
        if !scopes.contains(&scope) {
            scopes.push(scope);
        }
    }

    fn add_cookie_str(&self, cookie: &str, url: &Url) {
        if let Some(scope) = cookie_scope(cookie, url) {
            self.remember(scope);
        }
        self.jar.add_cookie_str(cookie, url);
    }

    fn scopes(&self) -> Vec<Url> {
        self.scopes.lock().clone()
    }
}

impl cookie::CookieStore for ScopedJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let headers: Vec<&HeaderValue> = cookie_headers.collect();
        for header in &headers {
            if let Some(scope) = header.to_str().ok().and_then(|h| cookie_scope(h, url)) {
                self.remember(scope);
            }
        }
        cookie::CookieStore::set_cookies(&self.jar, &mut headers.into_iter(), url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        cookie::CookieStore::cookies(&self.jar, url)
    }
}

/// URL a `Set-Cookie` value would be sent back to, from its `Domain` and
/// `Path` attributes (defaulting to the request host and directory).
fn cookie_scope(set_cookie: &str, url: &Url) -> Option<Url> {
    let mut parts = set_cookie.split(';');
    let name = parts.next()?.split('=').next()?.trim();
    if name.is_empty() {
        return None;
    }

    let mut scope = url.clone();
    scope.set_query(None);
    scope.set_fragment(None);
    let mut path = match url.path().rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => url.path()[..i].to_string(),
    };

    for attr in parts {
        let (key, value) = attr.split_once('=').unwrap_or((attr, ""));
        let value = value.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "domain" if !value.is_empty() => {
                scope.set_host(Some(value.trim_start_matches('.'))).ok()?;
            }
            "path" if value.starts_with('/') => path = value.to_string(),
            _ => {}
        }
    }
    scope.set_path(&path);
    Some(scope)
}

struct Inner {
    client: Client,
    jar: Arc<ScopedJar>,
}

/// A `reqwest` client bound to a cookie jar that can be inspected and purged.
pub struct HttpSession {
    inner: RwLock<Inner>,
    cookie_urls: Vec<Url>,
    timeout: Duration,
}

impl HttpSession {
    pub fn default_user_agent() -> String {
        DEFAULT_USER_AGENT.to_string()
    }

    /// `cookie_urls` are the origins whose cookies count towards the session.
    pub fn new(cookie_urls: Vec<Url>, timeout: Duration) -> Result<Self> {
        let jar = Arc::new(ScopedJar::default());
        let client = Self::build_client(jar.clone(), timeout)?;
        Ok(Self {
            inner: RwLock::new(Inner { client, jar }),
            cookie_urls,
            timeout,
        })
    }

    fn build_client(jar: Arc<ScopedJar>, timeout: Duration) -> Result<Client> {
        Client::builder()
            .user_agent(Self::default_user_agent())
            .cookie_provider(jar)
            .timeout(timeout)
            .build()
            .map_err(Into::into)
    }

    pub fn client(&self) -> Client {
        self.inner.read().client.clone()
    }

    /// Seed a cached cookie for every tracked origin.
    pub fn add_cookie(&self, name: &str, value: &str) {
        let inner = self.inner.read();
        for url in &self.cookie_urls {
            inner
                .jar
                .add_cookie_str(&format!("{}={}; Path=/", name, value), url);
        }
    }
}

impl CookieStore for HttpSession {
    fn cookie_names(&self) -> Vec<String> {
        let inner = self.inner.read();
        let mut urls = self.cookie_urls.clone();
        urls.extend(inner.jar.scopes());

        let mut names: Vec<String> = Vec::new();
        for url in &urls {
            let Some(header) = cookie::CookieStore::cookies(inner.jar.as_ref(), url) else {
                continue;
            };
            let Ok(header) = header.to_str() else {
                continue;
            };
            for pair in header.split(';') {
                let name = pair.split('=').next().unwrap_or("").trim();
                if !name.is_empty() && !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        names
    }

    fn clear(&self) {
        let jar = Arc::new(ScopedJar::default());
        match Self::build_client(jar.clone(), self.timeout) {
            Ok(client) => {
                *self.inner.write() = Inner { client, jar };
                debug!("Cookie jar replaced");
            }
            Err(e) => {
                // Same builder settings already succeeded once in `new`.
                tracing::error!("Failed to rebuild HTTP client: {}", e);
            }
        }
    }
}

/// Parse a configured endpoint into a `Url`.
pub fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| Fc2Error::Config(format!("invalid URL {}: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> HttpSession {
        let urls = vec![
            Url::parse("https://live.fc2.com/").unwrap(),
            Url::parse("https://secure.id.fc2.com/").unwrap(),
        ];
        HttpSession::new(urls, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn seeded_cookies_are_listed_once() {
        let http = session();
        http.add_cookie("PHPSESSID", "abc");
        http.add_cookie("fcu", "1");

        let mut names = http.cookie_names();
        names.sort();
        assert_eq!(names, vec!["PHPSESSID".to_string(), "fcu".to_string()]);
    }

    #[test]
    fn clear_empties_the_jar() {
        let http = session();
        http.add_cookie("FCSID", "x");
        assert!(!http.cookie_names().is_empty());

        http.clear();
        assert!(http.cookie_names().is_empty());
    }

    #[test]
    fn cookies_on_other_hosts_and_paths_are_listed() {
        use reqwest::cookie::CookieStore as _;

        let http = session();
        let login = Url::parse("https://id.fc2.com/member/login.php").unwrap();
        let headers = [
            HeaderValue::from_static("FCSID=1; Path=/member"),
            HeaderValue::from_static("glgd_val=2; Domain=.fc2.com; Path=/account"),
            HeaderValue::from_static("fgcv=3"),
        ];
        http.inner.read().jar.set_cookies(&mut headers.iter(), &login);

        let mut names = http.cookie_names();
        names.sort();
        assert_eq!(names, vec!["FCSID", "fgcv", "glgd_val"]);

        http.clear();
        assert!(http.cookie_names().is_empty());
    }

    #[test]
    fn expired_cookies_drop_out() {
        use reqwest::cookie::CookieStore as _;

        let http = session();
        let url = Url::parse("https://live.fc2.com/member/").unwrap();
        let set = [HeaderValue::from_static("fcu=1; Path=/member")];
        http.inner.read().jar.set_cookies(&mut set.iter(), &url);
        assert_eq!(http.cookie_names(), vec!["fcu"]);

        let expire = [HeaderValue::from_static("fcu=; Path=/member; Expires=Thu, 01 Jan 1970 00:00:00 GMT")];
        http.inner.read().jar.set_cookies(&mut expire.iter(), &url);
        assert!(http.cookie_names().is_empty());
    }

    #[test]
    fn scope_defaults_to_request_directory() {
        let url = Url::parse("https://live.fc2.com/a/b/page?x=1").unwrap();
        assert_eq!(cookie_scope("k=v", &url).unwrap().as_str(), "https://live.fc2.com/a/b");
        assert_eq!(
            cookie_scope("k=v; domain=.fc2.com; path=/", &url).unwrap().as_str(),
            "https://fc2.com/"
        );
        assert!(cookie_scope("=v", &url).is_none());
    }

    #[test]
    fn parse_url_rejects_garbage() {
        assert!(matches!(parse_url("not a url"), Err(Fc2Error::Config(_))));
    }
}
