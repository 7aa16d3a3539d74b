//! Encrypted session cookies.
//!
//! [`SessionTransport`] keeps the whole session client-side in one cookie
//! whose value is an authenticated-encrypted JSON object. Opening is lenient
//! and saving is strict:
//!
//! - no transport key on open disables secure sessions (`None`);
//! - a tampered, expired, or malformed cookie opens as an empty session;
//! - saving a session that needs a cookie without a transport key is a
//!   [`TipguardError::Configuration`] error.
//!
//! Reads of membership or size mark the session accessed so the response
//! carries `Vary: Cookie` even when nothing was mutated.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::{CryptoSettings, SameSite, SessionSettings};
use crate::crypto::key::SymmetricKey;
use crate::crypto::token::{self, MaxAge};
use crate::error::{Result, TipguardError};

/// Header name added to responses whose content depends on the cookie.
pub const VARY_COOKIE: &str = "Cookie";

const COOKIE_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Key/value session state for one request.
#[derive(Debug, Default)]
pub struct Session {
    data: BTreeMap<String, Value>,
    permanent: bool,
    modified: bool,
    accessed: Cell<bool>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    fn from_payload(payload: Payload) -> Self {
        Self {
            data: payload.data,
            permanent: payload.permanent,
            modified: false,
            accessed: Cell::new(false),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.accessed.set(true);
        self.data.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.accessed.set(true);
        self.data.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.accessed.set(true);
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accessed.set(true);
        self.data.is_empty()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.touch();
        self.data.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.touch();
        self.data.remove(key)
    }

    pub fn clear(&mut self) {
        self.touch();
        self.data.clear();
    }

    /// Iterate over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.accessed.set(true);
        self.data.iter()
    }

    /// Permanent sessions get an `Expires` attribute; others are browser-session cookies.
    pub fn set_permanent(&mut self, permanent: bool) {
        if self.permanent != permanent {
            self.permanent = permanent;
            self.modified = true;
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.permanent
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn is_accessed(&self) -> bool {
        self.accessed.get()
    }

    fn touch(&mut self) {
        self.modified = true;
        self.accessed.set(true);
    }

    /// Canonical JSON payload: keys sorted, permanent flag beside the data.
    fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&PayloadRef {
            data: &self.data,
            permanent: self.permanent,
        })?)
    }
}

/// Cookie payload. The permanent flag sits outside the caller's map, so no
/// session key can collide with it.
#[derive(Deserialize)]
struct Payload {
    #[serde(rename = "d")]
    data: BTreeMap<String, Value>,
    #[serde(rename = "p", default)]
    permanent: bool,
}

#[derive(Serialize)]
struct PayloadRef<'a> {
    #[serde(rename = "d")]
    data: &'a BTreeMap<String, Value>,
    #[serde(rename = "p")]
    permanent: bool,
}

/// Cookie attributes shared by set and delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieSettings {
    pub name: String,
    pub domain: Option<String>,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
    pub partitioned: bool,
}

impl From<&SessionSettings> for CookieSettings {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            name: settings.cookie_name.clone(),
            domain: settings.cookie_domain.clone(),
            path: settings.cookie_path.clone(),
            secure: settings.secure,
            http_only: settings.http_only,
            same_site: settings.same_site,
            partitioned: settings.partitioned,
        }
    }
}

/// A `Set-Cookie` instruction for the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub expires: Option<DateTime<Utc>>,
    pub max_age: Option<i64>,
    pub domain: Option<String>,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
    pub partitioned: bool,
}

impl SetCookie {
    fn new(settings: &CookieSettings, value: String, expires: Option<DateTime<Utc>>) -> Self {
        Self {
            name: settings.name.clone(),
            value,
            expires,
            max_age: None,
            domain: settings.domain.clone(),
            path: settings.path.clone(),
            secure: settings.secure,
            http_only: settings.http_only,
            same_site: settings.same_site,
            partitioned: settings.partitioned,
        }
    }

    /// A cookie that makes the browser drop `settings.name`.
    fn deletion(settings: &CookieSettings) -> Self {
        let mut cookie = Self::new(settings, String::new(), Utc.timestamp_opt(0, 0).single());
        cookie.max_age = Some(0);
        cookie
    }

    pub fn is_deletion(&self) -> bool {
        self.max_age == Some(0)
    }

    /// Render as a `Set-Cookie` header value.
    pub fn to_header_value(&self) -> String {
        let mut header = format!("{}={}", self.name, self.value);
        if let Some(domain) = &self.domain {
            header.push_str(&format!("; Domain={}", domain));
        }
        if let Some(expires) = self.expires {
            header.push_str(&format!("; Expires={}", expires.format(COOKIE_DATE_FORMAT)));
        }
        if let Some(max_age) = self.max_age {
            header.push_str(&format!("; Max-Age={}", max_age));
        }
        if self.secure {
            header.push_str("; Secure");
        }
        if self.http_only {
            header.push_str("; HttpOnly");
        }
        header.push_str(&format!("; Path={}", self.path));
        if let Some(same_site) = self.same_site {
            header.push_str(&format!("; SameSite={}", same_site.as_str()));
        }
        if self.partitioned {
            header.push_str("; Partitioned");
        }
        header
    }
}

/// The response side of a web framework, as far as sessions need it.
pub trait SessionResponse {
    fn set_cookie(&mut self, cookie: SetCookie);

    /// Add `header` to the response's `Vary` set. Repeats must be harmless.
    fn add_vary(&mut self, header: &str);
}

/// Plain header list implementing [`SessionResponse`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResponseHeaders {
    pub cookies: Vec<SetCookie>,
    pub vary: Vec<String>,
}

impl ResponseHeaders {
    /// Headers as `(name, value)` pairs.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .cookies
            .iter()
            .map(|cookie| ("Set-Cookie".to_string(), cookie.to_header_value()))
            .collect();
        if !self.vary.is_empty() {
            pairs.push(("Vary".to_string(), self.vary.join(", ")));
        }
        pairs
    }
}

impl SessionResponse for ResponseHeaders {
    fn set_cookie(&mut self, cookie: SetCookie) {
        self.cookies.retain(|existing| existing.name != cookie.name);
        self.cookies.push(cookie);
    }

    fn add_vary(&mut self, header: &str) {
        if !self.vary.iter().any(|v| v.eq_ignore_ascii_case(header)) {
            self.vary.push(header.to_string());
        }
    }
}

/// Loads and stores [`Session`]s as encrypted cookies.
pub struct SessionTransport {
    key: Option<SymmetricKey>,
    lifetime: Duration,
    cookie: CookieSettings,
    refresh_each_request: bool,
}

impl SessionTransport {
    pub fn new(key: Option<SymmetricKey>, settings: &SessionSettings) -> Self {
        Self {
            key,
            lifetime: Duration::from_secs(settings.lifetime_seconds),
            cookie: CookieSettings::from(settings),
            refresh_each_request: settings.refresh_each_request,
        }
    }

    /// Build from settings. A malformed session key is fatal; an absent one
    /// disables the transport.
    pub fn from_settings(settings: &CryptoSettings) -> Result<Self> {
        Ok(Self::new(settings.session_key()?, &settings.session))
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie.name
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Open the session carried by `cookie_value`.
    ///
    /// `None` means secure sessions are disabled. Any decoding failure gives
    /// a fresh empty session.
    pub fn open(&self, cookie_value: Option<&str>) -> Option<Session> {
        self.open_at(cookie_value, unix_now())
    }

    pub fn open_at(&self, cookie_value: Option<&str>, now: u64) -> Option<Session> {
        let key = self.key.as_ref()?;
        let value = match cookie_value {
            Some(value) if !value.is_empty() => value,
            _ => return Some(Session::new()),
        };

        let max_age = MaxAge {
            ttl_secs: self.lifetime.as_secs(),
            now,
        };
        let plaintext = match token::open(key, value, Some(max_age)) {
            Ok(plaintext) => plaintext,
            Err(_) => {
                debug!("Discarding unreadable session cookie");
                return Some(Session::new());
            }
        };
        match serde_json::from_slice::<Payload>(&plaintext) {
            Ok(payload) => Some(Session::from_payload(payload)),
            Err(_) => {
                debug!("Discarding session cookie with malformed payload");
                Some(Session::new())
            }
        }
    }

    /// Write `session` to `response`.
    pub fn save<R: SessionResponse>(&self, session: &Session, response: &mut R) -> Result<()> {
        self.save_at(session, response, unix_now())
    }

    pub fn save_at<R: SessionResponse>(
        &self,
        session: &Session,
        response: &mut R,
        now: u64,
    ) -> Result<()> {
        if session.is_accessed() {
            response.add_vary(VARY_COOKIE);
        }

        if session.data.is_empty() {
            if session.is_modified() {
                debug!("Session emptied, clearing cookie");
                response.set_cookie(SetCookie::deletion(&self.cookie));
                response.add_vary(VARY_COOKIE);
            }
            return Ok(());
        }

        if !self.should_set_cookie(session) {
            return Ok(());
        }

        let key = self.key.as_ref().ok_or_else(|| {
            TipguardError::Configuration("Session encryption key not set".to_string())
        })?;
        let expires = self.expiration_time(session, now);
        let value = token::seal(key, now, &session.to_payload()?)?;
        response.set_cookie(SetCookie::new(&self.cookie, value, expires));
        response.add_vary(VARY_COOKIE);
        Ok(())
    }

    fn should_set_cookie(&self, session: &Session) -> bool {
        session.is_modified() || (session.is_permanent() && self.refresh_each_request)
    }

    fn expiration_time(&self, session: &Session, now: u64) -> Option<DateTime<Utc>> {
        if !session.is_permanent() {
            return None;
        }
        let expires = now.saturating_add(self.lifetime.as_secs());
        Utc.timestamp_opt(i64::try_from(expires).ok()?, 0).single()
    }
}

impl std::fmt::Debug for SessionTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTransport")
            .field("enabled", &self.is_enabled())
            .field("lifetime", &self.lifetime)
            .field("cookie", &self.cookie)
            .field("refresh_each_request", &self.refresh_each_request)
            .finish()
    }
}

fn unix_now() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: u64 = 1_700_000_000;

    fn settings() -> SessionSettings {
        SessionSettings {
            lifetime_seconds: 3600,
            ..SessionSettings::default()
        }
    }

    fn transport() -> SessionTransport {
        SessionTransport::new(Some(SymmetricKey::generate().unwrap()), &settings())
    }

    fn saved_cookie(transport: &SessionTransport, session: &Session, now: u64) -> String {
        let mut response = ResponseHeaders::default();
        transport.save_at(session, &mut response, now).unwrap();
        response.cookies[0].value.clone()
    }

    #[test]
    fn test_round_trip_within_ttl() {
        let transport = transport();
        let mut session = Session::new();
        session.insert("user_id", 42);
        session.insert("username", "alice");
        let cookie = saved_cookie(&transport, &session, NOW);

        let reopened = transport.open_at(Some(&cookie), NOW + 60).unwrap();
        assert_eq!(reopened.get("user_id"), Some(&json!(42)));
        assert_eq!(reopened.get("username"), Some(&json!("alice")));
        assert!(!reopened.is_modified());
    }

    #[test]
    fn test_expired_cookie_opens_empty() {
        let transport = transport();
        let mut session = Session::new();
        session.insert("user_id", 42);
        let cookie = saved_cookie(&transport, &session, NOW);
        let reopened = transport.open_at(Some(&cookie), NOW + 3601).unwrap();
        assert!(reopened.is_empty());
    }

    #[test]
    fn test_corrupted_cookie_opens_empty() {
        let transport = transport();
        assert!(transport.open_at(Some("garbage"), NOW).unwrap().is_empty());
        let mut session = Session::new();
        session.insert("k", "v");
        let mut cookie = saved_cookie(&transport, &session, NOW);
        cookie.replace_range(20..21, if &cookie[20..21] == "A" { "B" } else { "A" });
        assert!(transport.open_at(Some(&cookie), NOW).unwrap().is_empty());
    }

    #[test]
    fn test_cookie_from_other_key_opens_empty() {
        let mut session = Session::new();
        session.insert("k", "v");
        let cookie = saved_cookie(&transport(), &session, NOW);
        assert!(transport().open_at(Some(&cookie), NOW).unwrap().is_empty());
    }

    #[test]
    fn test_non_object_payload_opens_empty() {
        let key = SymmetricKey::generate().unwrap();
        let cookie = token::seal(&key, NOW, b"[1, 2, 3]").unwrap();
        let transport = SessionTransport::new(Some(key), &settings());
        assert!(transport.open_at(Some(&cookie), NOW).unwrap().is_empty());
    }

    #[test]
    fn test_missing_cookie_opens_empty() {
        assert!(transport().open_at(None, NOW).unwrap().is_empty());
        assert!(transport().open_at(Some(""), NOW).unwrap().is_empty());
    }

    #[test]
    fn test_disabled_without_key() {
        let transport = SessionTransport::new(None, &settings());
        assert!(!transport.is_enabled());
        assert!(transport.open_at(Some("anything"), NOW).is_none());
    }

    #[test]
    fn test_save_without_key_is_configuration_error() {
        let transport = SessionTransport::new(None, &settings());
        let mut session = Session::new();
        session.insert("k", "v");
        let mut response = ResponseHeaders::default();
        let err = transport.save_at(&session, &mut response, NOW).unwrap_err();
        assert!(matches!(err, TipguardError::Configuration(_)));
        assert!(response.cookies.is_empty());
    }

    #[test]
    fn test_emptied_session_clears_cookie() {
        let transport = transport();
        let mut session = Session::new();
        session.insert("k", "v");
        let cookie = saved_cookie(&transport, &session, NOW);

        let mut reopened = transport.open_at(Some(&cookie), NOW).unwrap();
        reopened.clear();
        let mut response = ResponseHeaders::default();
        transport.save_at(&reopened, &mut response, NOW).unwrap();

        assert_eq!(response.cookies.len(), 1);
        assert!(response.cookies[0].is_deletion());
        assert_eq!(response.vary, vec![VARY_COOKIE.to_string()]);
        let header = response.cookies[0].to_header_value();
        assert!(header.starts_with("session=; "));
        assert!(header.contains("Expires=Thu, 01 Jan 1970 00:00:00 GMT"));
        assert!(header.contains("Max-Age=0"));
    }

    #[test]
    fn test_unmodified_session_skips_cookie() {
        let transport = transport();
        let mut session = Session::new();
        session.insert("k", "v");
        let cookie = saved_cookie(&transport, &session, NOW);

        let reopened = transport.open_at(Some(&cookie), NOW).unwrap();
        let mut response = ResponseHeaders::default();
        transport.save_at(&reopened, &mut response, NOW).unwrap();
        assert!(response.cookies.is_empty());
        assert!(response.vary.is_empty());
    }

    #[test]
    fn test_reads_mark_accessed_and_vary() {
        let transport = transport();
        let mut session = Session::new();
        session.insert("k", "v");
        let cookie = saved_cookie(&transport, &session, NOW);

        let reopened = transport.open_at(Some(&cookie), NOW).unwrap();
        assert!(!reopened.is_accessed());
        assert!(reopened.contains_key("k"));
        assert!(reopened.is_accessed());

        let mut response = ResponseHeaders::default();
        transport.save_at(&reopened, &mut response, NOW).unwrap();
        assert!(response.cookies.is_empty());
        assert_eq!(response.vary, vec![VARY_COOKIE.to_string()]);

        let counted = transport.open_at(Some(&cookie), NOW).unwrap();
        assert_eq!(counted.len(), 1);
        assert!(counted.is_accessed());
    }

    #[test]
    fn test_permanent_session_refreshes_with_expiry() {
        let transport = transport();
        let mut session = Session::new();
        session.insert("k", "v");
        session.set_permanent(true);
        let cookie = saved_cookie(&transport, &session, NOW);

        let reopened = transport.open_at(Some(&cookie), NOW + 10).unwrap();
        assert!(reopened.is_permanent());
        assert_eq!(reopened.len(), 1);

        let mut response = ResponseHeaders::default();
        transport.save_at(&reopened, &mut response, NOW + 10).unwrap();
        assert_eq!(response.cookies.len(), 1);
        let expected = Utc.timestamp_opt((NOW + 10 + 3600) as i64, 0).unwrap();
        assert_eq!(response.cookies[0].expires, Some(expected));
    }

    #[test]
    fn test_permanent_without_refresh_skips_cookie() {
        let mut config = settings();
        config.refresh_each_request = false;
        let transport = SessionTransport::new(Some(SymmetricKey::generate().unwrap()), &config);
        let mut session = Session::new();
        session.insert("k", "v");
        session.set_permanent(true);
        let cookie = saved_cookie(&transport, &session, NOW);

        let reopened = transport.open_at(Some(&cookie), NOW).unwrap();
        let mut response = ResponseHeaders::default();
        transport.save_at(&reopened, &mut response, NOW).unwrap();
        assert!(response.cookies.is_empty());
    }

    #[test]
    fn test_browser_session_cookie_has_no_expiry() {
        let transport = transport();
        let mut session = Session::new();
        session.insert("k", "v");
        let mut response = ResponseHeaders::default();
        transport.save_at(&session, &mut response, NOW).unwrap();
        assert_eq!(response.cookies[0].expires, None);
        let header = response.cookies[0].to_header_value();
        assert!(!header.contains("Expires"));
        assert!(header.contains("; Secure; HttpOnly; Path=/; SameSite=Lax"));
    }

    #[test]
    fn test_payload_is_canonical() {
        let mut first = Session::new();
        first.insert("b", 2);
        first.insert("a", 1);
        let mut second = Session::new();
        second.insert("a", 1);
        second.insert("b", 2);
        assert_eq!(first.to_payload().unwrap(), second.to_payload().unwrap());
        assert_eq!(
            first.to_payload().unwrap(),
            br#"{"d":{"a":1,"b":2},"p":false}"#.to_vec()
        );
    }

    #[test]
    fn test_reserved_looking_keys_do_not_set_permanent() {
        let transport = transport();
        let mut session = Session::new();
        session.insert("_permanent", true);
        session.insert("p", true);
        let cookie = saved_cookie(&transport, &session, NOW);

        let reopened = transport.open_at(Some(&cookie), NOW).unwrap();
        assert!(!reopened.is_permanent());
        assert_eq!(reopened.get("_permanent"), Some(&Value::Bool(true)));
        assert_eq!(reopened.get("p"), Some(&Value::Bool(true)));

        let mut response = ResponseHeaders::default();
        transport.save_at(&session, &mut response, NOW).unwrap();
        assert_eq!(response.cookies[0].expires, None);
    }

    #[test]
    fn test_permanent_flag_survives_colliding_key() {
        let transport = transport();
        let mut session = Session::new();
        session.set_permanent(true);
        session.insert("_permanent", false);
        let cookie = saved_cookie(&transport, &session, NOW);

        let reopened = transport.open_at(Some(&cookie), NOW).unwrap();
        assert!(reopened.is_permanent());
        assert_eq!(reopened.get("_permanent"), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_response_headers_pairs() {
        let mut response = ResponseHeaders::default();
        response.add_vary("Cookie");
        response.add_vary("cookie");
        response.add_vary("Accept");
        assert_eq!(
            response.to_pairs(),
            vec![("Vary".to_string(), "Cookie, Accept".to_string())]
        );
    }
}
