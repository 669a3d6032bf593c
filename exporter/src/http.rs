//! Health and metrics exposition server. Runs on its own thread with
//! its own actix system so the backup driver stays single-threaded.

use crate::metrics::Metrics;
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use std::sync::Arc;
use tracing::{error, info};

async fn health() -> impl Responder {
    HttpResponse::Ok().body("OK")
}

async fn metrics(data: web::Data<Arc<Metrics>>) -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(data.encode())
}

/// Spawn the HTTP surface in the background; failures to bind are
/// logged, never fatal for the backup itself.
pub fn spawn(shared: Arc<Metrics>, port: u16) {
    let builder = std::thread::Builder::new().name("metrics-server".to_string());
    let spawned = builder.spawn(move || {
        actix_web::rt::System::new().block_on(async move {
            let server = HttpServer::new(move || {
                App::new()
                    .app_data(web::Data::new(shared.clone()))
                    .route("/health", web::get().to(health))
                    .route("/metrics", web::get().to(metrics))
            })
            .workers(1)
            .disable_signals()
            .bind(("0.0.0.0", port));
            match server {
                Ok(server) => {
                    info!(port, "metrics server listening");
                    if let Err(error) = server.run().await {
                        error!(%error, "metrics server terminated");
                    }
                }
                Err(error) => error!(port, %error, "failed to bind metrics server"),
            }
        });
    });
    if let Err(error) = spawned {
        error!(%error, "failed to start metrics server thread");
    }
}
