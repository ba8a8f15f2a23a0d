use actix_web::{get, post, web, App, HttpResponse, HttpServer, Responder};
use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::api::AlphaVantageClient;
use crate::pipeline::EtlPipeline;

/// Shared state for the control surface: the pipeline plus a lock that
/// serializes runs, since the provider quota is a single process-wide budget.
pub struct AppState {
    pipeline: EtlPipeline<AlphaVantageClient>,
    run_lock: Mutex<()>,
}

impl AppState {
    pub fn new(pipeline: EtlPipeline<AlphaVantageClient>) -> Self {
        Self {
            pipeline,
            run_lock: Mutex::new(()),
        }
    }
}

/// Synchronously run one full pipeline invocation and report its summary.
#[post("/run-etl")]
async fn run_etl(state: web::Data<AppState>) -> impl Responder {
    let _guard = state.run_lock.lock().await;
    info!("pipeline run requested via control surface");
    let summary = state.pipeline.run().await;
    HttpResponse::Ok().json(summary)
}

/// Most recent run row; the scheduler polls this for health.
#[get("/status")]
async fn status(state: web::Data<AppState>) -> impl Responder {
    match state.pipeline.database().latest_run().await {
        Ok(Some(run)) => HttpResponse::Ok().json(json!({ "last_run": run })),
        Ok(None) => HttpResponse::NotFound().json(json!({ "message": "no runs recorded yet" })),
        Err(err) => {
            error!("failed to read latest run: {}", err);
            HttpResponse::InternalServerError().json(json!({ "message": err.to_string() }))
        }
    }
}

/// Liveness probe, independent of pipeline state.
#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "service": "fundamentals-etl",
    }))
}

/// Run the control surface until shutdown.
pub async fn serve(state: AppState, bind_address: &str) -> std::io::Result<()> {
    let data = web::Data::new(state);
    info!("control surface listening on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .service(run_etl)
            .service(status)
            .service(health)
    })
    .bind(bind_address)?
    .run()
    .await
}
