use actix_web::{web, App, HttpResponse, HttpServer, middleware::Compress};
use actix_cors::Cors;
use anyhow::Context;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use utoipa_swagger_ui::SwaggerUi;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;
use tracing_actix_web::TracingLogger;

use askboard::config::AppConfig;
use askboard::models::{NewUser, Role};
use askboard::openapi::ApiDoc;
use askboard::rate_limit::{InMemoryRateLimiter, RateLimiterFacade};
use askboard::repo::Repo;
use askboard::services::AuditLog;
use askboard::{config, AppState, SecurityHeaders};

#[cfg(not(any(feature = "inmem-store", feature = "postgres-store")))]
compile_error!("enable a storage backend: `inmem-store` or `postgres-store`");

#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
async fn build_repo(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    use askboard::repo::inmem::InMemRepo;
    let repo = match &cfg.data_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "Using in-memory repository backend with snapshot");
            InMemRepo::with_snapshot(dir)
        }
        None => {
            info!("Using ephemeral in-memory repository backend");
            InMemRepo::new()
        }
    };
    Ok(Arc::new(repo))
}

#[cfg(feature = "postgres-store")]
async fn build_repo(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    use askboard::repo::pg::PgRepo;
    use sqlx::postgres::PgPoolOptions;
    let db_url = cfg.database_url.as_deref().context("DATABASE_URL must be set for postgres-store")?;
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(db_url)
        .await
        .context("failed to connect to Postgres")?;
    sqlx::migrate!("./migrations").run(&pool).await.context("failed to run migrations")?;
    info!("Using Postgres repository backend");
    Ok(Arc::new(PgRepo::new(pool)))
}

async fn metrics_endpoint(handle: web::Data<PrometheusHandle>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(handle.render())
}

/// Create the configured admin account if it does not exist yet.
async fn bootstrap_admin(state: &AppState, username: &str) -> anyhow::Result<()> {
    let user = state
        .services
        .users
        .ensure(NewUser { username: username.to_string(), email: format!("{username}@localhost"), role: Role::Admin })
        .await
        .context("failed to bootstrap admin account")?;
    if user.role != Role::Admin {
        warn!(user_id = user.id, %username, role = %user.role, "bootstrap admin exists without ADMIN role");
    } else {
        info!(user_id = user.id, %username, "bootstrap admin ready");
    }
    Ok(())
}

/// Periodic activity-log retention sweep.
fn spawn_log_purge(audit: AuditLog, retention_days: u32, every: Duration) {
    actix_web::rt::spawn(async move {
        let mut ticker = actix_web::rt::time::interval(every);
        loop {
            ticker.tick().await;
            if let Err(e) = audit.purge_older_than(retention_days).await {
                warn!(error = %e, "activity log purge failed");
            }
        }
    });
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds to reduce manual setup overhead.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = AppConfig::from_env().context("invalid configuration")?;
    info!(config = ?cfg, "Bootstrapping askboard");

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install metrics recorder")?;

    let repo = build_repo(&cfg).await?;
    let mut state = AppState::new(repo);
    if cfg.rate_limit_enabled {
        state = state.with_rate_limiter(RateLimiterFacade::new(InMemoryRateLimiter::new(true), cfg.rate_limits.clone()));
    }
    if let Some(username) = &cfg.bootstrap_admin {
        bootstrap_admin(&state, username).await?;
    }

    spawn_log_purge(
        state.services.audit.clone(),
        cfg.log_retention_days,
        Duration::from_secs(cfg.log_purge_interval_secs),
    );

    let openapi = ApiDoc::openapi();
    info!("OpenAPI document generated");

    let bind = (cfg.bind_addr.clone(), cfg.port);
    let server_cfg = cfg.clone();
    let server = HttpServer::new(move || {
        let cors = server_cfg
            .cors_origins
            .iter()
            .fold(Cors::default(), |c, origin| c.allowed_origin(origin))
            .allow_any_header()
            .allowed_methods(["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(SecurityHeaders::new().with_hsts(server_cfg.enable_hsts))
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .app_data(web::Data::new(prometheus.clone()))
            .configure(config)
            .route("/metrics", web::get().to(metrics_endpoint))
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind(bind.clone())?;

    info!("Listening on http://{}:{}", bind.0, bind.1);

    server.run().await?;
    Ok(())
}
