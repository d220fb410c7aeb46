use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

/// Correlation id carried by every request and stamped on every response,
/// including errors.
pub const REQUEST_ID_HEADER: &str = "x-shoal-request-id";

pub async fn correlation_id(mut req: Request, next: Next) -> Response {
    let header = HeaderName::from_static(REQUEST_ID_HEADER);
    let id = req
        .headers()
        .get(&header)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    match HeaderValue::from_str(&id) {
        Ok(value) => {
            req.headers_mut().insert(header.clone(), value.clone());
            let mut res = next.run(req).await;
            res.headers_mut().insert(header, value);
            res
        }
        Err(_) => next.run(req).await,
    }
}
