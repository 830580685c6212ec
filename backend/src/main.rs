use axum::{http::Method, routing::get, Router};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod database;
mod error;
mod events;
mod handlers;
mod jobs;
mod middleware;
mod services;
mod store;
mod validation;
mod workflows;

pub use error::{ApiError, ApiResult, AppError};


use config::{Config, LogFormat};
use events::{EventBus, EventEnvelope, EventType};
use services::{HttpWebhookSender, SmtpMailer};
use store::{CrmStore, PgCrmStore, PgWorkflowStore, WorkflowStore};
use workflows::{
    ActionLimits, ExecutionScheduler, HandlerDeps, HandlerRegistry, WorkflowEngine, WorkflowExecutor,
};

pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
    pub bus: Arc<EventBus>,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("atrium_backend=info,tower_http=info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "Atrium CRM workflow API v0.1.0" }))
        .nest("/api/v1/health", handlers::health_routes())
        .nest("/api/v1/workflows", handlers::workflow_routes())
        .nest("/api/v1/executions", handlers::execution_routes())
        .nest("/api/v1/events", handlers::event_routes())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(state)
}

/// Wire stores, collaborators and the engine together.
fn build_engine(
    workflow_store: Arc<dyn WorkflowStore>,
    crm_store: Arc<dyn CrmStore>,
    config: &Config,
) -> anyhow::Result<Arc<WorkflowEngine>> {
    let handlers = HandlerRegistry::new(HandlerDeps {
        crm: crm_store,
        mailer: Arc::new(SmtpMailer::new(&config.smtp)?),
        webhooks: Arc::new(HttpWebhookSender::new(config.engine.webhook_timeout)?),
        max_delay_minutes: config.engine.max_delay_minutes,
    });

    let executor = Arc::new(WorkflowExecutor::new(workflow_store.clone(), Arc::new(handlers)));
    let scheduler = Arc::new(ExecutionScheduler::new(workflow_store.clone(), executor));
    let limits = ActionLimits {
        max_delay_minutes: config.engine.max_delay_minutes,
    };
    Ok(Arc::new(WorkflowEngine::new(workflow_store, scheduler, limits)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(config.log_format);

    let db_pool = database::create_pool(&config.database_url, database::PoolConfig::from_env()).await?;
    database::migrate(&db_pool).await?;

    let workflow_store: Arc<dyn WorkflowStore> = Arc::new(PgWorkflowStore::new(db_pool.clone()));
    let crm_store: Arc<dyn CrmStore> = Arc::new(PgCrmStore::new(db_pool));

    let bus = Arc::new(EventBus::new(config.engine.max_listeners));
    bus.subscribe_all(Arc::new(|event_type: EventType, envelope: &EventEnvelope| {
        tracing::debug!(
            event = %event_type,
            tenant_id = %envelope.tenant_id,
            entity_id = %envelope.entity_id,
            "Domain event"
        );
    }));

    let engine = build_engine(workflow_store, crm_store.clone(), &config)?;
    engine.start(&bus);

    let shutdown = CancellationToken::new();
    let reminder_job = jobs::ReminderDueJob::new(crm_store, bus.clone(), config.engine.reminder_scan_interval);
    let job_handle = tokio::spawn(reminder_job.run_forever(shutdown.clone()));

    let app_state = Arc::new(AppState {
        engine: engine.clone(),
        bus: bus.clone(),
    });
    let app = create_router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Server running on {}", config.server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    engine.stop(&bus);
    if let Err(e) = job_handle.await {
        tracing::warn!("Reminder job did not stop cleanly: {}", e);
    }

    Ok(())
}
