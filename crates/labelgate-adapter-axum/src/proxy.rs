use std::time::Duration;

use async_trait::async_trait;
use labelgate_core::error::EdgeError;
use labelgate_core::http::{HeaderName, HeaderValue, Method, StatusCode};
use labelgate_core::proxy::{ProxyClient, ProxyRequest, ProxyResponse};
use reqwest::{header, Client};

pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// reqwest-backed client used to reach the upstream LLM endpoint.
#[derive(Clone, Debug)]
pub struct AxumProxyClient {
    client: Client,
}

impl AxumProxyClient {
    pub fn new() -> Result<Self, EdgeError> {
        Self::with_timeout(DEFAULT_UPSTREAM_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, EdgeError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(EdgeError::internal)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ProxyClient for AxumProxyClient {
    async fn send(&self, request: ProxyRequest) -> Result<ProxyResponse, EdgeError> {
        let (method, uri, headers, body, _extensions) = request.into_parts();
        let reqwest_method = reqwest_method(&method)?;
        let mut builder = self.client.request(reqwest_method, uri.to_string());

        for (name, value) in headers.iter() {
            let header_name = header::HeaderName::from_bytes(name.as_str().as_bytes())
                .map_err(EdgeError::internal)?;
            let header_value =
                header::HeaderValue::from_bytes(value.as_bytes()).map_err(EdgeError::internal)?;
            builder = builder.header(header_name, header_value);
        }

        let response = builder
            .body(body)
            .send()
            .await
            .map_err(|err| EdgeError::upstream(err.to_string()))?;
        let status =
            StatusCode::from_u16(response.status().as_u16()).map_err(EdgeError::internal)?;

        let mut response_headers = Vec::with_capacity(response.headers().len());
        for (name, value) in response.headers().iter() {
            let header_name =
                HeaderName::from_bytes(name.as_str().as_bytes()).map_err(EdgeError::internal)?;
            let header_value =
                HeaderValue::from_bytes(value.as_bytes()).map_err(EdgeError::internal)?;
            response_headers.push((header_name, header_value));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| EdgeError::upstream(err.to_string()))?;
        let mut proxy_response = ProxyResponse::new(status, bytes);
        for (name, value) in response_headers {
            proxy_response.headers_mut().append(name, value);
        }

        Ok(proxy_response)
    }
}

fn reqwest_method(method: &Method) -> Result<reqwest::Method, EdgeError> {
    reqwest::Method::from_bytes(method.as_str().as_bytes()).map_err(EdgeError::internal)
}
