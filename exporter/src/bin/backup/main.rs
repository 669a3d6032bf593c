use clap::Parser;
use exporter::{config::CliArgs, metrics::Metrics, orchestrator::Orchestrator};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = CliArgs::parse();
    if args.health_check {
        println!("OK");
        return;
    }

    exporter::logger::init(&args.log_level);
    exporter::config::warn_unknown_vars();

    let config = match args.into_config() {
        Ok(config) => Arc::new(config),
        Err(error) => {
            error!(component = "config", %error, "configuration rejected");
            std::process::exit(1);
        }
    };
    info!(
        component = "main",
        cluster = %config.cluster_name,
        domain = %config.cluster_domain,
        bucket = %config.store.bucket,
        "starting backup run"
    );

    let metrics = Arc::new(Metrics::new());
    exporter::http::spawn(metrics.clone(), config.metrics_port);

    let orchestrator = Orchestrator::new(config, metrics);
    match orchestrator.run().await {
        Ok(report) => {
            // PARTIAL SUCCESS and FAILED completions still exit 0; the
            // summary record carries the detail.
            info!(
                component = "main",
                status = %report.status,
                duration_ms = report.duration.as_millis() as u64,
                "backup run finished"
            );
        }
        Err(error) => {
            error!(component = "main", %error, "backup run aborted");
            std::process::exit(1);
        }
    }
}
