//! Caller details (ip, user agent, country) taken from the request.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::{Extensions, HeaderMap, Method, Uri};
use keygate_core::models::auth::ClientInfo;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const CF_IPCOUNTRY: &str = "cf-ipcountry";

/// Extractor wrapping [`ClientInfo`].
#[derive(Debug, Clone)]
pub struct Client(pub ClientInfo);

impl<S> FromRequestParts<S> for Client
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Client(client_info(
            &parts.method,
            &parts.uri,
            &parts.headers,
            &parts.extensions,
        )))
    }
}

/// Build [`ClientInfo`] from request parts.
///
/// The ip is the first `x-forwarded-for` hop when present, else the peer
/// address (only known when served with connect info).
pub fn client_info(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    extensions: &Extensions,
) -> ClientInfo {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let ip = header(X_FORWARDED_FOR)
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        });

    ClientInfo {
        ip,
        user_agent: header("user-agent").map(str::to_string),
        country: header(CF_IPCOUNTRY).map(|c| c.to_uppercase()),
        method: Some(method.to_string()),
        path: Some(uri.path().to_string()),
    }
}
