use crate::error::{Error, Result};
use crate::settings::RestSettings;
use governor::{Quota, RateLimiter};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

type DirectRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Rate-limited JSON REST client bound to one base URL
///
/// Cloneable; clones share the rate limiter.
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    base_url: String,
    rate_limiter: Arc<DirectRateLimiter>,
}

impl RestClient {
    pub fn new(base_url: &str, settings: &RestSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        let rpm = NonZeroU32::new(settings.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limiter,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a request and decode the JSON body
    ///
    /// `query` is appended verbatim so signed query strings reach the
    /// exchange byte-for-byte as signed. Transport errors are stripped of the
    /// URL, which may carry a signature. Non-2xx responses become
    /// `Error::Exchange` carrying the body.
    pub async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &str,
        headers: HeaderMap,
    ) -> Result<T> {
        self.rate_limiter.until_ready().await;

        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let response = self
            .http
            .request(method, &url)
            .headers(headers)
            .send()
            .await
            .map_err(|err| Error::Transport(err.without_url()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| Error::Transport(err.without_url()))?;

        if !status.is_success() {
            return Err(Error::Exchange {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|err| Error::decode(path, err))
    }
}

/// Encode unsigned query parameters in insertion order
pub fn encode_query(params: &[(&str, String)]) -> Result<String> {
    serde_urlencoded::to_string(params).map_err(|err| Error::decode("query", err))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    String(String),
}

/// Accept numbers sent either as JSON numbers or as strings
pub fn flexible_f64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Like `flexible_f64`, with null or missing mapped to 0
pub fn flexible_f64_or_zero<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<f64, D::Error> {
    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(0.0),
        Some(NumberOrString::Number(n)) => Ok(n),
        Some(NumberOrString::String(s)) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[derive(Deserialize)]
    struct Sample {
        #[serde(deserialize_with = "flexible_f64")]
        a: f64,
        #[serde(default, deserialize_with = "flexible_f64_or_zero")]
        b: f64,
    }

    #[test]
    fn test_flexible_numbers() {
        let s: Sample = serde_json::from_str(r#"{"a": "1.5", "b": 2}"#).unwrap();
        assert_eq!(s.a, 1.5);
        assert_eq!(s.b, 2.0);

        let s: Sample = serde_json::from_str(r#"{"a": 3, "b": null}"#).unwrap();
        assert_eq!(s.a, 3.0);
        assert_eq!(s.b, 0.0);

        let s: Sample = serde_json::from_str(r#"{"a": 3}"#).unwrap();
        assert_eq!(s.b, 0.0);

        assert!(serde_json::from_str::<Sample>(r#"{"a": "abc"}"#).is_err());
    }

    #[test]
    fn test_encode_query_keeps_order() {
        let query = encode_query(&[
            ("symbol", "XBTUSD".to_string()),
            ("binSize", "1m".to_string()),
            ("count", "500".to_string()),
        ])
        .unwrap();
        assert_eq!(query, "symbol=XBTUSD&binSize=1m&count=500");
    }

    #[tokio::test]
    async fn test_send_maps_non_success_to_exchange_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/fail")
            .with_status(400)
            .with_body(r#"{"code":-1100,"msg":"Illegal characters"}"#)
            .create_async()
            .await;

        let client = RestClient::new(&server.url(), &RestSettings::default()).unwrap();
        let result: Result<Value> = client.send(Method::GET, "/fail", "", HeaderMap::new()).await;

        mock.assert_async().await;
        match result {
            Err(Error::Exchange { status, body }) => {
                assert_eq!(status, 400);
                assert!(body.contains("Illegal characters"));
            }
            other => panic!("expected exchange error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_malformed_body_is_decode_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/garbage")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let client = RestClient::new(&server.url(), &RestSettings::default()).unwrap();
        let result: Result<Value> = client
            .send(Method::GET, "/garbage", "", HeaderMap::new())
            .await;

        assert!(matches!(result, Err(Error::Decode(_))));
    }
}
