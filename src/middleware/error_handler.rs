use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;

/// Logs every request that ends in a server error, with method and path.
pub async fn log_errors(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    if response.status().is_server_error() {
        tracing::error!(%method, %uri, status = %response.status().as_u16(), "request failed");
    }

    response
}
