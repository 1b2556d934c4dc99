//! Axum adapter for labelgate: label stores, the reqwest upstream client and the HTTP server.

mod proxy;
mod request;
mod response;
mod router;
mod server;
mod store;

pub use proxy::{AxumProxyClient, DEFAULT_UPSTREAM_TIMEOUT};
pub use request::{into_proxy_request, UpstreamTarget, MAX_BODY_BYTES};
pub use response::{into_axum_response, ErrorReply, Reply};
pub use router::{build_router, context_routes, LabelGateState, Passthrough};
pub use server::{init_logging, label_handle, LabelGateServer, LabelGateServerConfig, Overrides};
pub use store::{FileLabelStore, MemoryLabelStore};
