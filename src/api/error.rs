use snafu::prelude::*;

/// API Error
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(variant), context(suffix(false)))]
pub enum Error {
    /// bot token contains characters that cannot be sent in a HTTP header
    #[snafu(display("bot token is invalid"))]
    TokenInvalid,

    /// api base url is not a valid url
    #[snafu(display("api base url {url} is invalid: {source}"))]
    BaseURLInvalid {
        /// input url
        url: String,
        /// source error
        source: url::ParseError,
    },

    /// create HTTP client failed
    #[snafu(display("create api client failed: {source}"))]
    ClientCreateFailed {
        /// source error
        source: reqwest::Error,
    },

    /// request could not be sent or its body could not be read
    #[snafu(display("GET {endpoint} failed: {source}"))]
    RequestFailed {
        /// requested endpoint
        endpoint: String,
        /// source http error
        source: reqwest::Error,
    },

    /// the api answered 429
    #[snafu(display("GET {endpoint} rate limited, retry after {retry_after:?}s"))]
    RateLimited {
        /// requested endpoint
        endpoint: String,
        /// seconds to wait, from the `Retry-After` header
        retry_after: Option<f64>,
    },

    /// the api answered with another non 200 status
    #[snafu(display("GET {endpoint} got http status {status}"))]
    HTTPStatusNotOK {
        /// requested endpoint
        endpoint: String,
        /// received http status
        status: reqwest::StatusCode,
    },

    /// response body is not the expected json
    #[snafu(display("parse {endpoint} response {body:?} failed: {source}"))]
    ParseBodyFailed {
        /// requested endpoint
        endpoint: String,
        /// http response body
        body: bytes::Bytes,
        /// source parse error
        source: serde_json::Error,
    },
}
