use poem::http::StatusCode;
use poem::Endpoint;
use poem::Middleware;
use poem::Request;
use poem::Result as PoemResult;
use tracing::warn;

/// Requires a non-empty `Authorization: Bearer` header. The token itself is
/// not verified here.
pub struct BearerAuthMiddleware;

impl<E> Middleware<E> for BearerAuthMiddleware
where E: Endpoint
{
    type Output = BearerAuthEndpoint<E>;

    fn transform(&self, ep: E) -> Self::Output {
        BearerAuthEndpoint { inner: ep }
    }
}

pub struct BearerAuthEndpoint<E> {
    inner: E,
}

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

impl<E> Endpoint for BearerAuthEndpoint<E>
where E: Endpoint
{
    type Output = E::Output;

    async fn call(&self, req: Request) -> PoemResult<Self::Output> {
        if bearer_token(&req).is_none() {
            warn!(path = %req.uri().path(), "rejecting request without bearer token");
            return Err(poem::Error::from_string(
                "Missing or malformed bearer token",
                StatusCode::UNAUTHORIZED,
            ));
        }
        self.inner.call(req).await
    }
}
