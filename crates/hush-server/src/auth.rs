use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};

use crate::policy::Caller;

/// Axum middleware that resolves the caller identity and threads it
/// through as an extension. The identity is opaque: upstream (reverse
/// proxy, gateway, session layer) is responsible for authenticating it;
/// this server never validates credentials itself. Absent headers mean
/// an anonymous caller — handlers decide what anonymity is allowed to do.
pub async fn resolve_caller(mut request: Request, next: Next) -> Response {
    let caller = caller_from_headers(request.headers());
    request.extensions_mut().insert(caller);
    next.run(request).await
}

fn caller_from_headers(headers: &HeaderMap) -> Caller {
    let owner_id = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned);

    let display = headers
        .get("x-hush-owner-name")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned);

    Caller { owner_id, display }
}
