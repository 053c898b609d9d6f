//! WebSocket endpoint URLs.

use signalr_core::TransportError;
use url::Url;

/// Query parameter carrying the bearer token during the upgrade.
pub const ACCESS_TOKEN_PARAM: &str = "access_token";

/// Rewrite an HTTP endpoint into its WebSocket form.
///
/// `http` becomes `ws` and `https` becomes `wss`; WebSocket URLs pass
/// through. A token, if given, is appended as `access_token`.
///
/// # Errors
///
/// Returns [`TransportError::InvalidUrl`] for any other scheme.
pub fn websocket_url(url: &Url, access_token: Option<&str>) -> Result<Url, TransportError> {
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme '{other}' in {url}"
            )));
        }
    };

    let mut ws = url.clone();
    ws.set_scheme(scheme)
        .map_err(|()| TransportError::InvalidUrl(url.to_string()))?;

    if let Some(token) = access_token {
        ws.query_pairs_mut().append_pair(ACCESS_TOKEN_PARAM, token);
    }

    Ok(ws)
}
