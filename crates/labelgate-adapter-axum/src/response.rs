use axum::body::Body as AxumBody;
use axum::http::{header, HeaderValue, Response};
use axum::response::IntoResponse;

use labelgate_core::endpoints::EndpointReply;
use labelgate_core::error::EdgeError;
use labelgate_core::proxy::ProxyResponse;

use crate::request::forwardable_headers;

const JSON: HeaderValue = HeaderValue::from_static("application/json");

/// Convert an upstream response into one consumable by Axum/Hyper.
///
/// Framing headers are dropped because hyper recomputes them for the buffered body.
/// Extensions, including the call's `CallMetadata`, carry over to the axum response.
pub fn into_axum_response(response: ProxyResponse) -> Response<AxumBody> {
    let (status, headers, body, extensions) = response.into_parts();
    let mut response = Response::new(AxumBody::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = forwardable_headers(headers);
    *response.extensions_mut() = extensions;
    response
}

/// Wrapper so handlers can return an [`EndpointReply`] directly.
pub struct Reply(pub EndpointReply);

impl IntoResponse for Reply {
    fn into_response(self) -> axum::response::Response {
        let EndpointReply { status, body } = self.0;
        let mut response = Response::new(AxumBody::from(body));
        *response.status_mut() = status;
        response.headers_mut().insert(header::CONTENT_TYPE, JSON);
        response
    }
}

/// Wrapper rendering an [`EdgeError`] as its JSON error document.
pub struct ErrorReply(pub EdgeError);

impl IntoResponse for ErrorReply {
    fn into_response(self) -> axum::response::Response {
        let mut response = Response::new(AxumBody::from(self.0.to_json_body()));
        *response.status_mut() = self.0.status();
        response.headers_mut().insert(header::CONTENT_TYPE, JSON);
        response
    }
}
