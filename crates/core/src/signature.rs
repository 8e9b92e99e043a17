//! Webhook authenticity gate.
//!
//! The provider signs `url + concat(sorted(key + value))` with HMAC-SHA1 keyed by the
//! shared auth token and sends the base64 digest in `X-Twilio-Signature`. The URL is the
//! public one the provider called, rebuilt from forwarded headers, without its query string.
//! Every failure mode yields `false`: this gate fails closed.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use sha1::Sha1;
use subtle::ConstantTimeEq;
use tracing::debug;

type HmacSha1 = Hmac<Sha1>;

pub const SIGNATURE_HEADER: &str = "x-twilio-signature";

/// Borrowed view of an inbound request. The body is a buffered copy so verification never
/// consumes the stream the handler later parses.
#[derive(Clone, Debug)]
pub struct InboundRequest<'a> {
    pub headers: Vec<(String, &'a str)>,
    pub path_and_query: &'a str,
    pub body: &'a [u8],
}

impl<'a> InboundRequest<'a> {
    pub fn new(path_and_query: &'a str, body: &'a [u8]) -> Self {
        Self { headers: Vec::new(), path_and_query, body }
    }

    pub fn with_header(mut self, name: &str, value: &'a str) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value));
        self
    }

    pub fn header(&self, name: &str) -> Option<&'a str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value)
            .filter(|value| !value.trim().is_empty())
    }
}

#[derive(Debug)]
pub struct WebhookGate {
    auth_token: SecretString,
    public_base_url: Option<String>,
}

impl WebhookGate {
    pub fn new(auth_token: SecretString, public_base_url: Option<String>) -> Self {
        Self { auth_token, public_base_url }
    }

    pub fn verify(&self, request: &InboundRequest<'_>) -> bool {
        let Some(url) = signing_url(request, self.public_base_url.as_deref()) else {
            debug!(event_name = "webhook.signature.url_unresolved", "could not rebuild signing url");
            return false;
        };
        verify_with_url(request, &url, self.auth_token.expose_secret())
    }
}

/// Verifies using only forwarded/direct headers for URL reconstruction.
pub fn verify(request: &InboundRequest<'_>, shared_secret: &str) -> bool {
    match signing_url(request, None) {
        Some(url) => verify_with_url(request, &url, shared_secret),
        None => false,
    }
}

fn verify_with_url(request: &InboundRequest<'_>, url: &str, shared_secret: &str) -> bool {
    let Some(provided) = request.header(SIGNATURE_HEADER) else {
        return false;
    };
    if shared_secret.is_empty() {
        return false;
    }
    let Some(params) = canonical_params(request) else {
        debug!(event_name = "webhook.signature.body_unparseable", "webhook body could not be parsed");
        return false;
    };
    let Some(expected) = compute_signature(url, &params, shared_secret) else {
        return false;
    };

    expected.as_bytes().ct_eq(provided.trim().as_bytes()).into()
}

pub fn compute_signature(url: &str, params: &[(String, String)], shared_secret: &str) -> Option<String> {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort();

    let mut mac = <HmacSha1 as Mac>::new_from_slice(shared_secret.as_bytes()).ok()?;
    mac.update(url.as_bytes());
    for (key, value) in sorted {
        mac.update(key.as_bytes());
        mac.update(value.as_bytes());
    }
    Some(BASE64.encode(mac.finalize().into_bytes()))
}

/// Forwarded proto/host win over the direct `Host` header; the query string is dropped.
pub fn signing_url(request: &InboundRequest<'_>, public_base_url: Option<&str>) -> Option<String> {
    let path = request.path_and_query.split('?').next().unwrap_or_default();
    let path = if path.is_empty() { "/" } else { path };

    if let Some(base) = public_base_url.map(str::trim).filter(|base| !base.is_empty()) {
        return Some(format!("{}{path}", base.trim_end_matches('/')));
    }

    let proto = request
        .header("x-forwarded-proto")
        .and_then(first_hop)
        .unwrap_or("https")
        .to_ascii_lowercase();
    let host = request
        .header("x-forwarded-host")
        .and_then(first_hop)
        .or_else(|| request.header("host").and_then(first_hop))?;
    if host.contains('/') || host.contains(char::is_whitespace) {
        return None;
    }

    Some(format!("{proto}://{host}{path}"))
}

fn first_hop(value: &str) -> Option<&str> {
    value.split(',').next().map(str::trim).filter(|hop| !hop.is_empty())
}

/// Form bodies are decoded as-is; JSON objects are flattened to string values.
pub fn canonical_params(request: &InboundRequest<'_>) -> Option<Vec<(String, String)>> {
    if request.body.is_empty() {
        return Some(Vec::new());
    }

    let is_json = request
        .header("content-type")
        .map(|value| value.to_ascii_lowercase().contains("application/json"))
        .unwrap_or(false);

    if is_json {
        let Value::Object(map) = serde_json::from_slice::<Value>(request.body).ok()? else {
            return None;
        };
        Some(map.into_iter().map(|(key, value)| (key, flatten_value(value))).collect())
    } else {
        serde_urlencoded::from_bytes::<Vec<(String, String)>>(request.body).ok()
    }
}

fn flatten_value(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::{
        canonical_params, compute_signature, signing_url, verify, InboundRequest, WebhookGate,
        SIGNATURE_HEADER,
    };

    const SECRET: &str = "12345";
    const BODY: &[u8] = b"CallSid=CA1234567890ABCDE&Caller=%2B14158675310&Digits=1234&From=%2B14158675310&To=%2B18005551212";

    fn sign(url: &str, body: &[u8]) -> String {
        let request = InboundRequest::new("/", body);
        let params = canonical_params(&request).expect("form body");
        compute_signature(url, &params, SECRET).expect("hmac accepts any key")
    }

    fn request<'a>(body: &'a [u8], signature: &'a str) -> InboundRequest<'a> {
        InboundRequest::new("/webhooks/voice?agent_id=a-1", body)
            .with_header("X-Forwarded-Proto", "https")
            .with_header("X-Forwarded-Host", "voice.example.com")
            .with_header("Host", "internal:8080")
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_header(SIGNATURE_HEADER, signature)
    }

    #[test]
    fn correctly_signed_request_is_accepted() {
        let signature = sign("https://voice.example.com/webhooks/voice", BODY);

        assert!(verify(&request(BODY, &signature), SECRET));
    }

    #[test]
    fn any_single_byte_body_mutation_is_rejected() {
        let signature = sign("https://voice.example.com/webhooks/voice", BODY);

        for index in 0..BODY.len() {
            let mut mutated = BODY.to_vec();
            mutated[index] ^= 0x01;
            assert!(!verify(&request(&mutated, &signature), SECRET), "mutation at byte {index}");
        }
    }

    #[test]
    fn url_and_signature_mutations_are_rejected() {
        let signature = sign("https://voice.example.com/webhooks/voice", BODY);
        let mut tampered = signature.clone().into_bytes();
        tampered[3] = if tampered[3] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(tampered).expect("ascii");

        assert!(!verify(&request(BODY, &tampered), SECRET));

        let other_host = InboundRequest::new("/webhooks/voice", BODY)
            .with_header("Host", "voice.example.org")
            .with_header(SIGNATURE_HEADER, &signature);
        assert!(!verify(&other_host, SECRET));
    }

    #[test]
    fn missing_signature_or_wrong_secret_is_rejected() {
        let signature = sign("https://voice.example.com/webhooks/voice", BODY);
        let unsigned = InboundRequest::new("/webhooks/voice", BODY)
            .with_header("X-Forwarded-Host", "voice.example.com");

        assert!(!verify(&unsigned, SECRET));
        assert!(!verify(&request(BODY, &signature), "54321"));
        assert!(!verify(&request(BODY, &signature), ""));
    }

    #[test]
    fn query_string_is_excluded_and_direct_host_is_a_fallback() {
        let direct = InboundRequest::new("/webhooks/status?x=1", b"");
        let direct = direct.with_header("Host", "voice.example.com");

        assert_eq!(
            signing_url(&direct, None).as_deref(),
            Some("https://voice.example.com/webhooks/status")
        );
        assert_eq!(signing_url(&InboundRequest::new("/webhooks/status", b""), None), None);
    }

    #[test]
    fn configured_public_base_url_overrides_headers() {
        let signature = sign("https://public.example.com/webhooks/voice", BODY);
        let gate = WebhookGate::new(
            SecretString::from(SECRET.to_string()),
            Some("https://public.example.com/".to_string()),
        );

        assert!(gate.verify(&request(BODY, &signature)));
    }

    #[test]
    fn json_bodies_are_flattened_to_string_values() {
        let body = br#"{"CallSid":"CA1","CallDuration":42,"Recording":null}"#;
        let request = InboundRequest::new("/", body).with_header("Content-Type", "application/json");
        let mut params = canonical_params(&request).expect("json object");
        params.sort();

        assert_eq!(
            params,
            vec![
                ("CallDuration".to_string(), "42".to_string()),
                ("CallSid".to_string(), "CA1".to_string()),
                ("Recording".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn malformed_json_is_rejected_without_panicking() {
        let body = b"{not json";
        let request = InboundRequest::new("/webhooks/voice", body)
            .with_header("Host", "voice.example.com")
            .with_header("Content-Type", "application/json")
            .with_header(SIGNATURE_HEADER, "c2lnbmF0dXJl");

        assert!(!verify(&request, SECRET));
    }
}
