//! FlowSentry - Website Availability & Synthetic Flow Monitoring
//!
//! One run: probe every configured URL, execute synthetic checkout flows,
//! persist results, aggregate per-client availability, and push the health
//! signal to the metrics and log backends.

mod browser;
mod config;
mod export;
mod flow;
mod probe;
mod report;
mod store;

use browser::HttpBrowser;
use config::{RunConfig, SiteRegistry};
use export::Exporter;
use flow::SyntheticFlowEngine;
use probe::ProbeExecutor;
use store::ResultStore;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("flowsentry=info".parse()?))
        .init();

    // Load configuration; a malformed site list aborts before any probing.
    let cfg = RunConfig::load();
    let registry = SiteRegistry::load(&cfg.sites_path)?;
    tracing::info!(
        sites = registry.sites.len(),
        path = %cfg.sites_path.display(),
        "Starting FlowSentry run"
    );

    let store = ResultStore::new(&cfg.results_dir);
    let exporter = Exporter::from_env(&cfg.region);

    // Availability probes, strictly sequential.
    let browser = HttpBrowser::new()?;
    let executor = ProbeExecutor::new(browser);
    let probe_results = executor.run(&registry).await;
    let probes_passed = probe_results.iter().filter(|r| r.success).count();
    tracing::info!(
        passed = probes_passed,
        total = probe_results.len(),
        "uptime checks finished"
    );

    // Synthetic checkout flows for enabled sites.
    let browser = HttpBrowser::new()?;
    let engine = SyntheticFlowEngine::new(browser, &cfg.screenshots_dir);
    let flow_results = engine.run(&registry).await;
    let flows_passed = flow_results.iter().filter(|r| r.success).count();
    tracing::info!(
        passed = flows_passed,
        total = flow_results.len(),
        "synthetic flows finished"
    );

    // Persist before exporting, so export failures cannot lose results.
    let path = store.save_probe_results(&probe_results)?;
    tracing::info!(path = %path.display(), "probe results saved");
    if !flow_results.is_empty() {
        let path = store.save_flow_results(&flow_results)?;
        tracing::info!(path = %path.display(), "flow results saved");
    }

    let statuses = report::aggregate(&registry, &probe_results);
    let path = store.save_status(&statuses)?;
    tracing::info!(path = %path.display(), "status snapshot saved");

    exporter.export_probes(&probe_results).await;
    exporter.export_flows(&flow_results).await;

    // Check failures are reported, not fatal: the run exits successfully so
    // downstream status-page generation always gets its input.
    tracing::info!(
        probes = format!("{probes_passed}/{}", probe_results.len()),
        flows = format!("{flows_passed}/{}", flow_results.len()),
        "run complete"
    );

    Ok(())
}
