use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use std::sync::Arc;

use crate::error::Error;
use crate::model::AuthContext;
use crate::store::traits::Store;

/// Axum extractor resolving `Authorization: Bearer <token>` to the tenant and
/// capabilities the token grants.
///
/// Capability checks are left to the handler (`require_read` /
/// `require_write`) since endpoints differ in what they need.
#[async_trait]
impl<S> FromRequestParts<Arc<S>> for AuthContext
where
    S: Store + 'static,
{
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut Parts,
        store: &Arc<S>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| Error::Unauthorized("Missing token".to_string()))?;

        store
            .authenticate(token)
            .await?
            .ok_or_else(|| Error::Unauthorized("Invalid token".to_string()))
    }
}

/// The token of a well-formed bearer `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn extracts_bearer_tokens() {
        assert_eq!(bearer_token(&headers("Bearer abc123")), Some("abc123"));
        assert_eq!(bearer_token(&headers("bearer   abc123 ")), Some("abc123"));
    }

    #[test]
    fn rejects_other_schemes_and_blanks() {
        assert_eq!(bearer_token(&headers("Basic dXNlcjpwYXNz")), None);
        assert_eq!(bearer_token(&headers("Bearer")), None);
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
