use reqwest::{header::RETRY_AFTER, StatusCode};
use snafu::prelude::*;

use super::error::variant::*;
use super::types::*;
use super::Result;

/// Default REST base url
pub static BASE_URL: &str = "https://discord.com/api/v10";

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// HTTP API client, only covers gateway discovery
#[derive(Debug, Clone)]
pub struct Client {
    client: reqwest::Client,
    base_url: String,
}

impl Client {
    fn new<S: AsRef<str> + ?Sized>(auth_type: &'static str, token: &S) -> Result<Self> {
        let auth_header_value = format!("{} {}", auth_type, token.as_ref())
            .parse()
            .map_err(|_| TokenInvalid.build())?;

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::AUTHORIZATION, auth_header_value);

        let client = reqwest::Client::builder()
            .gzip(true)
            .deflate(true)
            .user_agent(APP_USER_AGENT)
            .default_headers(headers)
            .build()
            .context(ClientCreateFailed)?;

        Ok(Self {
            client,
            base_url: BASE_URL.to_string(),
        })
    }

    /// create a new api client using bot token
    pub fn new_from_bot_token<S: AsRef<str> + ?Sized>(token: &S) -> Result<Self> {
        Self::new("Bot", token)
    }

    /// use another REST base url, e.g. a proxy or a local mock
    pub fn with_base_url<S: AsRef<str> + ?Sized>(mut self, base_url: &S) -> Result<Self> {
        let url = base_url.as_ref().trim_end_matches('/');
        url::Url::parse(url).with_context(|_| BaseURLInvalid { url })?;
        self.base_url = url.to_string();
        Ok(self)
    }

    /// the REST base url in use
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn request<R>(&self, endpoint: &str) -> Result<R>
    where
        R: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, endpoint);

        log::trace!("Requesting {}", url);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context(RequestFailed { endpoint })?;

        match resp.status() {
            StatusCode::OK => {}
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = resp
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok());
                return RateLimited {
                    endpoint,
                    retry_after,
                }
                .fail();
            }
            status => return HTTPStatusNotOK { endpoint, status }.fail(),
        }

        let body = resp.bytes().await.context(RequestFailed { endpoint })?;

        serde_json::from_slice(&body).with_context(|_| ParseBodyFailed { endpoint, body })
    }

    /// Call /gateway, get gateway url
    pub async fn gateway(&self) -> Result<GatewayInfo> {
        self.request("/gateway").await
    }

    /// Call /gateway/bot, get gateway url with recommended shard count and identify limits
    pub async fn gateway_bot(&self) -> Result<GatewayBotInfo> {
        self.request("/gateway/bot").await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_client_base_url() {
        let client = Client::new_from_bot_token("token").unwrap();
        assert_eq!(client.base_url(), BASE_URL);

        let client = client.with_base_url("http://127.0.0.1:3000/api/").unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:3000/api");

        assert!(client.with_base_url("::").is_err());
    }

    #[test]
    fn test_client_rejects_invalid_token() {
        assert!(matches!(
            Client::new_from_bot_token("bad\ntoken"),
            Err(super::super::Error::TokenInvalid)
        ));
    }
}
