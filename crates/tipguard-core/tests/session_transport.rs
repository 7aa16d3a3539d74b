use serde_json::json;

use tipguard_core::config::{CryptoSettings, SessionSettings, ENV_SESSION_KEY};
use tipguard_core::session::{ResponseHeaders, Session, SessionTransport};
use tipguard_core::{SymmetricKey, TipguardError};

const NOW: u64 = 1_700_000_000;

fn transport(lifetime_seconds: u64) -> SessionTransport {
    let settings = SessionSettings {
        lifetime_seconds,
        cookie_name: "__Host-session".to_string(),
        ..SessionSettings::default()
    };
    let key = SymmetricKey::generate().expect("key generation should succeed");
    SessionTransport::new(Some(key), &settings)
}

fn issue(transport: &SessionTransport, session: &Session, now: u64) -> String {
    let mut response = ResponseHeaders::default();
    transport
        .save_at(session, &mut response, now)
        .expect("save should succeed");
    assert_eq!(response.cookies.len(), 1);
    assert_eq!(response.cookies[0].name, "__Host-session");
    response.cookies[0].value.clone()
}

#[test]
fn test_login_session_round_trip() {
    let transport = transport(600);
    let mut session = Session::new();
    session.insert("user_id", 7);
    session.insert("is_authenticated", false);
    session.insert("roles", json!(["admin"]));
    let cookie = issue(&transport, &session, NOW);

    let reopened = transport
        .open_at(Some(&cookie), NOW + 599)
        .expect("transport should be enabled");
    let pairs: Vec<_> = reopened.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    assert_eq!(
        pairs,
        vec![
            ("is_authenticated".to_string(), json!(false)),
            ("roles".to_string(), json!(["admin"])),
            ("user_id".to_string(), json!(7)),
        ]
    );
}

#[test]
fn test_expired_and_corrupted_cookies_open_empty() {
    let transport = transport(600);
    let mut session = Session::new();
    session.insert("user_id", 7);
    let cookie = issue(&transport, &session, NOW);

    let expired = transport
        .open_at(Some(&cookie), NOW + 601)
        .expect("transport should be enabled");
    assert!(expired.is_empty());

    let truncated = &cookie[..cookie.len() / 2];
    let corrupted = transport
        .open_at(Some(truncated), NOW)
        .expect("transport should be enabled");
    assert!(corrupted.is_empty());
}

#[test]
fn test_logout_clears_cookie_and_varies() {
    let transport = transport(600);
    let mut session = Session::new();
    session.insert("user_id", 7);
    let cookie = issue(&transport, &session, NOW);

    let mut reopened = transport
        .open_at(Some(&cookie), NOW)
        .expect("transport should be enabled");
    reopened.clear();
    let mut response = ResponseHeaders::default();
    transport
        .save_at(&reopened, &mut response, NOW)
        .expect("save should succeed");

    let pairs = response.to_pairs();
    assert!(pairs
        .iter()
        .any(|(name, value)| name == "Set-Cookie" && value.contains("Max-Age=0")));
    assert!(pairs
        .iter()
        .any(|(name, value)| name == "Vary" && value == "Cookie"));
}

#[test]
fn test_settings_without_session_key_disable_transport() {
    let settings = CryptoSettings::default();
    let transport = SessionTransport::from_settings(&settings).expect("settings should load");
    assert!(transport.open(None).is_none());

    let mut session = Session::new();
    session.insert("k", "v");
    let mut response = ResponseHeaders::default();
    let err = transport
        .save(&session, &mut response)
        .expect_err("saving without a key must fail");
    assert!(err.is_fatal());
    assert!(err.to_string().contains("Session encryption key"));
}

#[test]
fn test_settings_with_session_key_from_env() {
    let key = SymmetricKey::generate()
        .expect("key generation should succeed")
        .to_base64();
    let mut settings = CryptoSettings::default();
    settings.apply_env(|name| (name == ENV_SESSION_KEY).then(|| key.clone()));
    let transport = SessionTransport::from_settings(&settings).expect("settings should load");
    assert!(transport.is_enabled());
    assert!(matches!(
        SessionTransport::from_settings(&CryptoSettings {
            session_key: Some("bad".to_string()),
            ..CryptoSettings::default()
        }),
        Err(TipguardError::Configuration(_))
    ));
}
