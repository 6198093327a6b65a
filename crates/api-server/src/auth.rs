//! Cookie authentication. The caller's identity is the page URL it serves,
//! carried in a `page_url` cookie.

use crate::rest::ApiError;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::COOKIE;
use axum::http::request::Parts;
use axum::http::HeaderMap;

pub const PAGE_URL_COOKIE: &str = "page_url";

/// Authenticated page URL of the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageUrl(pub String);

/// First non-empty `page_url` cookie across all `Cookie` headers.
pub fn page_url_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == PAGE_URL_COOKIE && !value.is_empty())
        .map(|(_, value)| value.trim_matches('"').to_string())
}

#[async_trait]
impl<S> FromRequestParts<S> for PageUrl
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        page_url_from_headers(&parts.headers)
            .map(PageUrl)
            .ok_or_else(|| ApiError::unauthorized("missing page_url cookie"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(values: &[&str]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for value in values {
            headers.append(COOKIE, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[test]
    fn test_page_url_cookie() {
        let h = headers(&["session=abc; page_url=site.com; theme=dark"]);
        assert_eq!(page_url_from_headers(&h).as_deref(), Some("site.com"));
    }

    #[test]
    fn test_first_cookie_wins() {
        let h = headers(&["page_url=first.com", "page_url=second.com"]);
        assert_eq!(page_url_from_headers(&h).as_deref(), Some("first.com"));
    }

    #[test]
    fn test_missing_or_empty_cookie() {
        assert_eq!(page_url_from_headers(&HeaderMap::new()), None);
        assert_eq!(page_url_from_headers(&headers(&["page_url="])), None);
        assert_eq!(page_url_from_headers(&headers(&["other=site.com"])), None);
    }
}
