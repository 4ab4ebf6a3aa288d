//! Credential extraction middleware.
//!
//! Reads the caller's credential from the request and attaches it as a
//! [`PresentedCredential`] extension. Whether it is any good is decided later
//! against the keyring, so this layer never rejects a request.

use crate::domain::keyring::Credential;
use axum::{
    body::Body,
    http::{header, HeaderMap, Request, Uri},
    response::Response,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use tower::{Layer, Service};

/// Header carrying an access key.
pub const ACCESS_HEADER: &str = "x-access";

/// Query parameter and cookie name carrying an access key.
pub const ACCESS_PARAM: &str = "access-key";

/// The credential found on a request, if any.
#[derive(Clone, Debug, Default)]
pub struct PresentedCredential(pub Option<Credential>);

impl PresentedCredential {
    pub fn credential(&self) -> Option<&Credential> {
        self.0.as_ref()
    }
}

/// Credential extraction layer
#[derive(Clone, Default)]
pub struct CredentialLayer;

impl CredentialLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for CredentialLayer {
    type Service = CredentialService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CredentialService { inner }
    }
}

/// Credential extraction service
#[derive(Clone)]
pub struct CredentialService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for CredentialService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();

        let credential = extract_credential(req.headers(), req.uri());
        req.extensions_mut().insert(PresentedCredential(credential));

        Box::pin(async move { inner.call(req).await })
    }
}

/// Find a credential on a request.
///
/// Checked in order: `X-Access` header, `Authorization: Bearer <key>`,
/// `Authorization: Basic <login>`, `access-key` query parameter and
/// `access-key` cookie.
pub fn extract_credential(headers: &HeaderMap, uri: &Uri) -> Option<Credential> {
    if let Some(key) = header_str(headers, ACCESS_HEADER) {
        if !key.is_empty() {
            return Some(Credential::AccessKey(key.to_string()));
        }
    }

    if let Some(auth) = header_str(headers, header::AUTHORIZATION.as_str()) {
        if let Some(token) = auth.strip_prefix("Bearer ").map(str::trim) {
            if !token.is_empty() {
                return Some(Credential::AccessKey(token.to_string()));
            }
        }
        if let Some(encoded) = auth.strip_prefix("Basic ") {
            if let Some(login) = decode_basic(encoded.trim()) {
                return Some(Credential::Login(login));
            }
        }
    }

    if let Some(query) = uri.query() {
        if let Some(key) = find_pair(query.split('&'), ACCESS_PARAM) {
            return Some(Credential::AccessKey(percent_decode(key)));
        }
    }

    if let Some(cookies) = header_str(headers, header::COOKIE.as_str()) {
        if let Some(key) = find_pair(cookies.split(';'), ACCESS_PARAM) {
            return Some(Credential::AccessKey(percent_decode(key)));
        }
    }

    None
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

fn find_pair<'a>(mut pairs: impl Iterator<Item = &'a str>, name: &str) -> Option<&'a str> {
    pairs.find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name && !value.is_empty()).then_some(value)
    })
}

/// Decode `%XX` escapes. A `+` stays literal since keys may contain it, and
/// malformed escapes or non-UTF-8 results leave the value as sent.
fn percent_decode(value: &str) -> String {
    if !value.contains('%') {
        return value.to_string();
    }

    let raw = value.as_bytes();
    let mut bytes = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let escaped = (raw[i] == b'%')
            .then(|| value.get(i + 1..i + 3))
            .flatten()
            .filter(|hex| hex.bytes().all(|b| b.is_ascii_hexdigit()))
            .and_then(|hex| u8::from_str_radix(hex, 16).ok());
        match escaped {
            Some(byte) => {
                bytes.push(byte);
                i += 3;
            }
            None => {
                bytes.push(raw[i]);
                i += 1;
            }
        }
    }
    String::from_utf8(bytes).unwrap_or_else(|_| value.to_string())
}

fn decode_basic(encoded: &str) -> Option<String> {
    let bytes = STANDARD.decode(encoded).ok()?;
    let login = String::from_utf8(bytes).ok()?;
    login.contains(':').then_some(login)
}
