//! Cookie-aware HTTP client (C1, SPEC_FULL.md §4.1).
//!
//! Wraps a single `reqwest::Client` with the vendor's fixed headers, decodes
//! every response into a unified [`Envelope`], and classifies transport
//! failures and the two vendor-special status codes (412 ban, 429 overload)
//! into synthetic [`VendorCode`]s so every caller above this module switches
//! on a code instead of catching an exception (Design Note 1).

use crate::core_types::VendorCode;
use rand::seq::SliceRandom;
use reqwest::cookie::CookieStore;
use reqwest::header::HeaderValue;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, error, warn};

const ORIGIN: &str = "https://show.bilibili.com/";
const REFERER: &str = "https://show.bilibili.com";

/// A handful of real mobile UA strings. `original_source` pulls a random one
/// from `fake_useragent`'s live-updated android/mobile pool; this crate bakes
/// in a small fixed set instead of depending on an external UA database.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Linux; Android 13; Pixel 7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36",
    "Mozilla/5.0 (Linux; Android 13; SM-G991B) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Mobile Safari/537.36",
    "Mozilla/5.0 (Linux; Android 12; M2012K11AC) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Mobile Safari/537.36",
];

/// Process-scoped cookie jar keyed by name (SPEC_FULL.md §3 "Session").
///
/// Implements `reqwest::cookie::CookieStore` so the HTTP client reads and
/// writes through it on every request/response, while also exposing a plain
/// `get`/`set` so the FSM can read `bili_jct` for CSRF and inject
/// `x-bili-gaia-vtoken` after a successful risk challenge (§5 "Shared
/// resources": cookies are mutated only by the client and, between calls, by
/// the FSM — trivially atomic under the single-threaded model).
#[derive(Debug, Default)]
pub struct SessionCookieJar {
    inner: RwLock<HashMap<String, String>>,
}

impl SessionCookieJar {
    pub fn new(initial: &HashMap<String, String>) -> Self {
        SessionCookieJar {
            inner: RwLock::new(initial.clone()),
        }
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.inner.read().unwrap().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: &str) {
        self.inner
            .write()
            .unwrap()
            .insert(name.to_string(), value.to_string());
    }
}

impl CookieStore for SessionCookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, _url: &reqwest::Url) {
        let mut map = self.inner.write().unwrap();
        for header in cookie_headers {
            if let Ok(raw) = header.to_str() {
                if let Ok(parsed) = reqwest::cookie::Cookie::parse(raw) {
                    map.insert(parsed.name().to_string(), parsed.value().to_string());
                }
            }
        }
    }

    fn cookies(&self, _url: &reqwest::Url) -> Option<HeaderValue> {
        let map = self.inner.read().unwrap();
        if map.is_empty() {
            return None;
        }
        let joined = map
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ");
        HeaderValue::from_str(&joined).ok()
    }
}

/// The decoded `{code|errno, msg|message, data}` JSON shape every vendor
/// response, and every synthetic transport-error response, is normalized
/// into (SPEC_FULL.md "Envelope", §4.1 contract).
#[derive(Debug, Clone)]
pub struct Envelope {
    pub code: VendorCode,
    pub msg: String,
    pub data: Value,
}

impl Envelope {
    fn transport(msg: impl Into<String>) -> Self {
        Envelope {
            code: VendorCode::TRANSPORT_ERROR,
            msg: msg.into(),
            data: Value::Null,
        }
    }

    fn overloaded() -> Self {
        Envelope {
            code: VendorCode::OVERLOADED,
            msg: "server overloaded (429)".to_string(),
            data: Value::Null,
        }
    }

    pub fn data_field(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(default, alias = "errno")]
    code: Option<i64>,
    #[serde(default, alias = "message")]
    msg: Option<String>,
    #[serde(default)]
    data: Value,
}

/// Cookie-aware session wrapping a `reqwest::Client`. The client owns the
/// cookie jar; the FSM only ever injects `x-bili-gaia-vtoken` into it
/// between calls (SPEC_FULL.md §5 "Shared resources").
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    jar: Arc<SessionCookieJar>,
    rest_seconds: f64,
}

impl HttpClient {
    pub fn new(
        timeout: Duration,
        rest_seconds: f64,
        proxy: Option<&str>,
        extra_headers: &HashMap<String, String>,
        initial_cookies: &HashMap<String, String>,
    ) -> Result<Self, reqwest::Error> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::ORIGIN, ORIGIN.parse().unwrap());
        headers.insert(reqwest::header::REFERER, REFERER.parse().unwrap());
        let ua = USER_AGENTS.choose(&mut rand::thread_rng()).unwrap();
        headers.insert(reqwest::header::USER_AGENT, ua.parse().unwrap());
        for (k, v) in extra_headers {
            if let (Ok(name), Ok(value)) = (
                reqwest::header::HeaderName::from_bytes(k.as_bytes()),
                reqwest::header::HeaderValue::from_str(v),
            ) {
                headers.insert(name, value);
            }
        }

        let jar = Arc::new(SessionCookieJar::new(initial_cookies));

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .cookie_provider(jar.clone())
            .redirect(reqwest::redirect::Policy::limited(5));

        if let Some(proxy_url) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }

        Ok(HttpClient {
            client: builder.build()?,
            jar,
            rest_seconds,
        })
    }

    /// `GET` with query params, decoded into an [`Envelope`] (§4.1 contract).
    pub async fn get(&self, url: &str, params: &[(&str, String)], debug_mode: bool) -> Envelope {
        let request = self.client.get(url).query(params);
        self.send(request, url, debug_mode).await
    }

    /// `POST` form with params, decoded into an [`Envelope`].
    pub async fn post_form(&self, url: &str, params: &[(&str, String)], debug_mode: bool) -> Envelope {
        let request = self.client.post(url).form(params);
        self.send(request, url, debug_mode).await
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &str, debug_mode: bool) -> Envelope {
        if debug_mode {
            debug!(url, "http request");
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, url, "transport error");
                return Envelope::transport(format!("transport error: {e}"));
            }
        };

        let status = response.status();
        if debug_mode {
            debug!(url, status = status.as_u16(), "http response");
        }

        if status.as_u16() == 412 {
            error!(
                "IP banned by vendor (412) — pausing {}s before resuming",
                self.rest_seconds
            );
            tokio::time::sleep(Duration::from_secs_f64(self.rest_seconds)).await;
            return Envelope::transport("412 banned");
        }

        if status.as_u16() == 429 {
            return Envelope::overloaded();
        }

        if !status.is_success() {
            warn!(url, status = status.as_u16(), "non-2xx response");
            return Envelope::transport(format!("http status {status}"));
        }

        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => return Envelope::transport(format!("body read error: {e}")),
        };

        match serde_json::from_str::<RawEnvelope>(&text) {
            Ok(raw) => Envelope {
                code: VendorCode(raw.code.unwrap_or(VendorCode::TRANSPORT_ERROR.0)),
                msg: raw.msg.unwrap_or_default(),
                data: raw.data,
            },
            Err(e) => {
                warn!(url, error = %e, "envelope decode failure");
                Envelope::transport(format!("decode error: {e}"))
            }
        }
    }

    /// Reads the CSRF token out of the cookie jar. Every risk-endpoint call
    /// must carry `csrf == cookieJar["bili_jct"]` (Testable Property 4).
    pub fn csrf_token(&self) -> Option<String> {
        self.jar.get("bili_jct")
    }

    /// Injects the gaia vtoken cookie after a successful risk challenge
    /// (SPEC_FULL.md §4.1: "the FSM injects `x-bili-gaia-vtoken`").
    pub fn set_gaia_vtoken(&self, token: &str) {
        self.jar.set("x-bili-gaia-vtoken", token);
    }

    #[cfg(test)]
    pub(crate) fn cookie(&self, name: &str) -> Option<String> {
        self.jar.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_normalizes_errno_alias() {
        let raw: RawEnvelope = serde_json::from_str(r#"{"errno":-401,"msg":"risk","data":{}}"#).unwrap();
        assert_eq!(raw.code, Some(-401));
    }

    #[test]
    fn envelope_normalizes_code_field() {
        let raw: RawEnvelope = serde_json::from_str(r#"{"code":0,"message":"ok","data":{"token":"t"}}"#).unwrap();
        assert_eq!(raw.code, Some(0));
        assert_eq!(raw.msg, Some("ok".to_string()));
    }

    #[test]
    fn transport_envelope_uses_sentinel_code() {
        let env = Envelope::transport("boom");
        assert_eq!(env.code, VendorCode::TRANSPORT_ERROR);
    }

    #[test]
    fn overloaded_envelope_uses_429() {
        let env = Envelope::overloaded();
        assert_eq!(env.code, VendorCode::OVERLOADED);
    }

    #[test]
    fn session_cookie_jar_roundtrips_bili_jct() {
        let jar = SessionCookieJar::new(&HashMap::new());
        jar.set("bili_jct", "abc123");
        assert_eq!(jar.get("bili_jct"), Some("abc123".to_string()));
        assert_eq!(jar.get("missing"), None);
    }
}
