//! labelgate CLI.

mod args;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use labelgate_adapter_axum::{init_logging, label_handle, LabelGateServer, Overrides};
use labelgate_core::label::LabelHandle;
use labelgate_core::manifest::{Manifest, ManifestLoader};

use args::{Args, Command, ServeArgs};

const DEFAULT_MANIFEST: &str = "labelgate.toml";

fn main() {
    let args = Args::parse();
    if let Err(err) = run(args) {
        eprintln!("[labelgate] error: {err:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let manifest = load_manifest(args.config.as_deref(), Path::new(DEFAULT_MANIFEST))?;
    match args.cmd {
        Command::Serve(serve) => serve_gateway(&manifest, serve, args.state_file),
        Command::Get => {
            let labels = label_handle(&manifest, args.state_file);
            let label = block_on(async move { labels.read().await })?;
            println!("{label}");
            Ok(())
        }
        Command::Set { feature } => {
            let labels = label_handle(&manifest, args.state_file);
            write_label(labels, &feature)?;
            println!("Context updated to '{feature}'.");
            Ok(())
        }
    }
}

fn serve_gateway(
    manifest: &Manifest,
    serve: ServeArgs,
    state_file: Option<PathBuf>,
) -> anyhow::Result<()> {
    init_logging(&manifest.logging());
    let overrides = Overrides {
        addr: serve.addr,
        upstream: serve.upstream,
        state_file,
    };
    LabelGateServer::from_manifest(manifest, &overrides)?.run()
}

fn write_label(labels: LabelHandle, feature: &str) -> anyhow::Result<()> {
    let description = labels.describe();
    let feature = feature.to_string();
    block_on(async move { labels.write(&feature).await })?
        .with_context(|| format!("failed to write label to {description}"))
}

/// An explicit `--config` must exist; the default manifest is optional.
fn load_manifest(explicit: Option<&Path>, fallback: &Path) -> anyhow::Result<Manifest> {
    let path = match explicit {
        Some(path) => path,
        None if fallback.is_file() => fallback,
        None => return Ok(Manifest::default()),
    };
    let loader = ManifestLoader::from_path(path)
        .with_context(|| format!("failed to load manifest {}", path.display()))?;
    Ok(loader.manifest().clone())
}

fn block_on<F: std::future::Future>(future: F) -> anyhow::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    Ok(runtime.block_on(future))
}
