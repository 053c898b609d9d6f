//! Request helpers shared by the HTTP transports.

use std::time::{SystemTime, UNIX_EPOCH};

use signalr_core::{
    TransferFormat, TransportError,
    http_client::{HttpClient, HttpRequest, content_type},
    transport::factory::TransportOptions,
};
use url::Url;

/// Query parameter carrying the bearer token where headers cannot be set.
pub(crate) const ACCESS_TOKEN_PARAM: &str = "access_token";

/// POST one message to the connection endpoint.
pub(crate) async fn post_message<H: HttpClient>(
    http: &H,
    url: &Url,
    format: TransferFormat,
    options: &TransportOptions,
    body: Vec<u8>,
) -> Result<(), TransportError> {
    let request = HttpRequest::post(url.clone(), body)
        .with_header("Content-Type", content_type(format))
        .with_headers(&options.headers)
        .with_bearer(options.access_token.as_deref());

    let response = http.send(request).await?;
    if (200..300).contains(&response.status) {
        Ok(())
    } else {
        Err(TransportError::UnexpectedStatus {
            status: response.status,
            body: response.body_text(),
        })
    }
}

/// `url` with `access_token` appended when a token is present.
pub(crate) fn with_access_token(url: &Url, token: Option<&str>) -> Url {
    let mut url = url.clone();
    if let Some(token) = token {
        url.query_pairs_mut().append_pair(ACCESS_TOKEN_PARAM, token);
    }
    url
}

/// `url` with a `_={unix millis}` cache buster.
pub(crate) fn with_cache_buster(url: &Url) -> Url {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis());
    let mut url = url.clone();
    url.query_pairs_mut().append_pair("_", &millis.to_string());
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use testresult::TestResult;

    #[test]
    fn token_goes_into_the_query() -> TestResult {
        let url = Url::parse("http://localhost/chat?id=1")?;
        assert_eq!(
            with_access_token(&url, Some("t")).as_str(),
            "http://localhost/chat?id=1&access_token=t"
        );
        assert_eq!(with_access_token(&url, None), url);
        Ok(())
    }

    #[test]
    fn cache_buster_is_numeric() -> TestResult {
        let url = Url::parse("http://localhost/chat?id=1")?;
        let busted = with_cache_buster(&url);
        let (key, value) = busted
            .query_pairs()
            .last()
            .ok_or("missing cache buster")?;
        assert_eq!(key, "_");
        assert!(value.parse::<u128>()? > 0);
        Ok(())
    }
}
