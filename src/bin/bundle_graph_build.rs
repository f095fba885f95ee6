//! Bundle Graph Build Binary
//!
//! Loads a declarative catalog, builds the upgrade graph, writes the full
//! snapshot, optionally writes a selector-pruned snapshot next to it, plus an
//! optional diagram and an optional published catalog.
//!
//! ## Configuration
//!
//! Environment variables (see `bundle_graph::config` for the full list):
//! - `CATALOG_SOURCE`: source locator (default: `dir:./catalog`)
//! - `GRAPH_SNAPSHOT`: snapshot path (default: `graph.json`)
//! - `GRAPH_SELECTOR`: selector expression for the pruned snapshot (optional)
//! - `GRAPH_PRUNED_SNAPSHOT`: pruned snapshot path (default: `graph.pruned.json`)
//! - `RUST_LOG`: Log level filter (default: bundle_graph=info)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: json)
//!
//! ## Usage
//!
//! ```bash
//! CATALOG_SOURCE=dir:./catalog GRAPH_SELECTOR='"stable" in entry.tags.channel' cargo run --bin bundle_graph_build
//! ```

use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use bundle_graph::config::BuildConfig;
use bundle_graph::pipeline;
use bundle_graph::source::SourceRegistry;

/// Initialize the tracing subscriber with JSON or pretty format
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "bundle_graph=info,bundle_graph_build=info".into());

    if log_format == "pretty" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_span_events(FmtSpan::CLOSE))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .flatten_event(true),
            )
            .init();
    }
}

fn main() -> ExitCode {
    init_tracing();

    info!(version = env!("CARGO_PKG_VERSION"), "starting bundle graph build");

    let config = match BuildConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let registry = SourceRegistry::with_defaults();
    info!(
        source = %config.source,
        snapshot = %config.snapshot.display(),
        selector = config.selector.as_deref().unwrap_or(""),
        source_kinds = ?registry.kinds().collect::<Vec<_>>(),
        "configuration loaded"
    );

    match pipeline::run(&config, &registry) {
        Ok(summary) => {
            info!(
                packages = summary.packages,
                nodes = summary.nodes,
                edges = summary.edges,
                reference_only = summary.reference_only,
                dangling_references = summary.build.dangling_references,
                pruned_snapshot = summary.pruned.as_ref().map(|p| p.path.display().to_string()).unwrap_or_default(),
                pruned_nodes = summary.pruned.as_ref().map(|p| p.nodes).unwrap_or_default(),
                published = summary.published.as_ref().map(|d| d.digest.to_string()).unwrap_or_default(),
                "build complete"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "build failed");
            ExitCode::FAILURE
        }
    }
}
