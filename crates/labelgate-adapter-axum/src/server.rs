use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::path::PathBuf;

use anyhow::Context;
use axum::Router;
use tokio::runtime::Builder as RuntimeBuilder;
use tokio::signal;

use labelgate_core::hook::{CompletionHooks, FeatureLabelHook};
use labelgate_core::label::LabelHandle;
use labelgate_core::manifest::{Manifest, ResolvedLoggingConfig, StoreKind};
use labelgate_core::proxy::ProxyService;
use simple_logger::SimpleLogger;

use crate::proxy::AxumProxyClient;
use crate::request::UpstreamTarget;
use crate::router::{build_router, LabelGateState};
use crate::store::{FileLabelStore, MemoryLabelStore};

/// Configuration used when running the gateway server.
#[derive(Clone, Debug)]
pub struct LabelGateServerConfig {
    pub addr: SocketAddr,
    pub enable_ctrl_c: bool,
}

impl Default for LabelGateServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 4000)),
            enable_ctrl_c: true,
        }
    }
}

/// Values that take precedence over the manifest, typically from command-line flags.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub addr: Option<SocketAddr>,
    pub upstream: Option<String>,
    pub state_file: Option<PathBuf>,
}

/// Blocking server runner used by the `labelgate` binary.
pub struct LabelGateServer {
    router: Router,
    config: LabelGateServerConfig,
}

impl LabelGateServer {
    pub fn new(router: Router) -> Self {
        Self {
            router,
            config: LabelGateServerConfig::default(),
        }
    }

    pub fn with_config(router: Router, config: LabelGateServerConfig) -> Self {
        Self { router, config }
    }

    /// Assemble the label store, completion hook and routes described by `manifest`.
    pub fn from_manifest(manifest: &Manifest, overrides: &Overrides) -> anyhow::Result<Self> {
        let labels = label_handle(manifest, overrides.state_file.clone());
        log::info!("active feature label stored in {}", labels.describe());

        let mut state =
            LabelGateState::new(labels.clone()).with_policy(manifest.error_status_policy());

        let upstream = overrides
            .upstream
            .as_deref()
            .or_else(|| manifest.upstream_url());
        if let Some(url) = upstream {
            let target = UpstreamTarget::parse(url)
                .with_context(|| format!("invalid upstream url {url}"))?;
            let client = AxumProxyClient::with_timeout(manifest.upstream_timeout())
                .context("failed to build upstream client")?;
            let hooks = CompletionHooks::new();
            hooks
                .register(FeatureLabelHook::new(labels))
                .context("failed to register completion hook")?;
            log::info!("forwarding unmatched requests to {}", target.as_str());
            state = state.with_passthrough(ProxyService::with_client(client, hooks), target);
        } else {
            log::info!("no upstream configured; only context endpoints are served");
        }

        let config = LabelGateServerConfig {
            addr: overrides.addr.unwrap_or_else(|| manifest.listen_addr()),
            ..LabelGateServerConfig::default()
        };
        Ok(Self::with_config(build_router(state), config))
    }

    #[must_use]
    pub fn with_ctrl_c(mut self, enabled: bool) -> Self {
        self.config.enable_ctrl_c = enabled;
        self
    }

    pub fn config(&self) -> &LabelGateServerConfig {
        &self.config
    }

    pub fn run(self) -> anyhow::Result<()> {
        let runtime = RuntimeBuilder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to build tokio runtime")?;

        runtime.block_on(async move { self.run_async().await })
    }

    async fn run_async(self) -> anyhow::Result<()> {
        let LabelGateServer { router, config } = self;

        let listener = StdTcpListener::bind(config.addr)
            .with_context(|| format!("failed to bind server to {}", config.addr))?;
        listener
            .set_nonblocking(true)
            .context("failed to set listener to non-blocking")?;

        let listener = tokio::net::TcpListener::from_std(listener)
            .context("failed to adopt std listener into tokio")?;

        log::info!("labelgate listening on {}", config.addr);
        serve_with_listener(router, listener, config.enable_ctrl_c).await
    }

    /// Serve on an already-bound listener. Used by tests that need an ephemeral port.
    pub async fn run_with_listener(self, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
        let LabelGateServer { router, config } = self;
        serve_with_listener(router, listener, config.enable_ctrl_c).await
    }
}

async fn serve_with_listener(
    router: Router,
    listener: tokio::net::TcpListener,
    enable_ctrl_c: bool,
) -> anyhow::Result<()> {
    let server = axum::serve(listener, router);
    if enable_ctrl_c {
        server
            .with_graceful_shutdown(async {
                let _ = signal::ctrl_c().await;
                log::info!("shutting down");
            })
            .await
            .context("axum server error")?;
    } else {
        server.await.context("axum server error")?;
    }

    Ok(())
}

/// Store selected by the manifest; an explicit state file always means a file store.
pub fn label_handle(manifest: &Manifest, state_file: Option<PathBuf>) -> LabelHandle {
    match (state_file, manifest.store.kind) {
        (Some(path), _) => LabelHandle::with_store(FileLabelStore::new(path)),
        (None, StoreKind::File) => {
            LabelHandle::with_store(FileLabelStore::new(manifest.label_path()))
        }
        (None, StoreKind::Memory) => LabelHandle::with_store(MemoryLabelStore::new()),
    }
}

/// Install `simple_logger` at the configured level. Later calls are no-ops.
pub fn init_logging(logging: &ResolvedLoggingConfig) {
    SimpleLogger::new()
        .with_level(logging.level_filter())
        .init()
        .ok();
}
