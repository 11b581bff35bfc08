//! Controller service demonstration
//!
//! Runs a deployment controller against the in-memory source, then drives a
//! few changes through it: a scale-up, a bad image that fails until it is
//! fixed, and a deletion.
//!
//! Run with:
//! ```bash
//! # Pretty format (default in debug)
//! cargo run -p core-service --example controller_demo
//!
//! # JSON format
//! cargo run -p core-service --example controller_demo -- json
//!
//! # With custom filter
//! cargo run -p core-service --example controller_demo -- pretty "core_controller=trace"
//! ```

use async_trait::async_trait;
use bridge_memory::{Deployment, InMemorySource};
use bridge_traits::LogLevel;
use core_async::time::{sleep, Duration};
use core_controller::{ObjectKey, ReconcileError, Reconciler, ResourceVersionChanged};
use core_runtime::events::{ControllerEvent, EventSeverity};
use core_runtime::logging::LogFormat;
use core_service::{init_logging, ControllerConfig, ControllerService, LoggingConfig};
use std::env;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Pretends to roll out deployments; refuses images tagged `broken`.
struct RolloutReconciler;

#[async_trait]
impl Reconciler<Deployment> for RolloutReconciler {
    #[instrument(skip_all, fields(key = %key))]
    async fn reconcile(
        &self,
        key: &ObjectKey,
        object: Option<Arc<Deployment>>,
    ) -> Result<(), ReconcileError> {
        let Some(deployment) = object else {
            info!("Deployment gone, cleaning up");
            return Ok(());
        };
        if deployment.image.ends_with(":broken") {
            return Err(ReconcileError::new(format!(
                "cannot pull image {}",
                deployment.image
            )));
        }

        sleep(Duration::from_millis(20)).await;
        info!(replicas = deployment.replicas, image = %deployment.image, "Rolled out");
        Ok(())
    }
}

#[core_async::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let format = match args.get(1).map(String::as_str) {
        Some("json") => LogFormat::Json,
        Some("compact") => LogFormat::Compact,
        Some("pretty") => LogFormat::Pretty,
        _ => LogFormat::default(),
    };

    let mut logging = LoggingConfig::default()
        .with_format(format)
        .with_level(LogLevel::Debug)
        .with_spans(true);
    if let Some(filter) = args.get(2) {
        logging = logging.with_filter(filter.clone());
    }
    init_logging(logging)?;

    let source = InMemorySource::new();
    source.create(Deployment::new("default", "web", 1))?;
    source.create(Deployment::new("default", "api", 2))?;

    let config = ControllerConfig::builder()
        .name("deployments")
        .worker_count(2)
        .max_retries(3)
        .resync_period(Duration::from_secs(2))
        .build()?;
    let service = ControllerService::builder(config)
        .source(Arc::new(source.clone()))
        .reconciler(Arc::new(RolloutReconciler))
        .update_filter(ResourceVersionChanged)
        .build()?;

    let mut warnings = service.subscribe().min_severity(EventSeverity::Warning);
    let reporter = core_async::spawn(async move {
        while let Ok(event) = warnings.recv().await {
            if let ControllerEvent::Reconcile(reconcile) = &event {
                warn!(key = reconcile.key(), "{}", event.description());
            }
        }
    });

    service.start()?;
    service.wait_until_synced().await;
    info!(cached = service.store().len(), "Cache synced");

    let mut web = source
        .get(Some("default"), "web")
        .ok_or_else(|| anyhow::anyhow!("web deployment missing"))?;
    web.replicas = 3;
    source.update(web.clone())?;

    web = source.update(web.with_image("nginx:broken"))?;
    sleep(Duration::from_millis(100)).await;
    source.update(web.with_image("nginx:1.27"))?;

    source.delete(Some("default"), "api")?;
    sleep(Duration::from_secs(3)).await;

    service.shutdown().await?;
    reporter.abort();
    info!("Demo complete");
    Ok(())
}
