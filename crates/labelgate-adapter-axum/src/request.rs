use axum::body::Body as AxumBody;
use axum::http::Request;
use labelgate_core::error::EdgeError;
use labelgate_core::http::{header, HeaderMap, HeaderName, Uri};
use labelgate_core::proxy::ProxyRequest;

/// Largest inbound body buffered for forwarding.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::HOST,
    header::CONTENT_LENGTH,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Upstream base URL that inbound paths are appended to.
#[derive(Clone, Debug)]
pub struct UpstreamTarget {
    base: String,
}

impl UpstreamTarget {
    pub fn parse(url: &str) -> Result<Self, EdgeError> {
        let uri: Uri = url
            .parse()
            .map_err(|err| EdgeError::bad_request(format!("invalid upstream url {url}: {err}")))?;
        if uri.scheme().is_none() || uri.authority().is_none() {
            return Err(EdgeError::bad_request(format!(
                "upstream url must be absolute: {url}"
            )));
        }
        Ok(Self {
            base: url.trim_end_matches('/').to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.base
    }

    /// Join the inbound path and query onto the base URL.
    pub fn resolve(&self, inbound: &Uri) -> Result<Uri, EdgeError> {
        let path_and_query = inbound
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        format!("{}{}", self.base, path_and_query)
            .parse()
            .map_err(EdgeError::internal)
    }
}

/// Buffer an inbound axum request and aim it at the upstream.
pub async fn into_proxy_request(
    request: Request<AxumBody>,
    target: &UpstreamTarget,
) -> Result<ProxyRequest, EdgeError> {
    let (parts, body) = request.into_parts();
    let uri = target.resolve(&parts.uri)?;
    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|err| EdgeError::bad_request(format!("failed to read request body: {err}")))?;

    let mut proxy_request = ProxyRequest::new(parts.method, uri);
    *proxy_request.headers_mut() = forwardable_headers(parts.headers);
    *proxy_request.body_mut() = bytes;
    Ok(proxy_request)
}

pub(crate) fn forwardable_headers(mut headers: HeaderMap) -> HeaderMap {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    headers
}
