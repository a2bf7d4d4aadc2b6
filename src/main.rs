use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use postfeed::config::AppConfig;
use postfeed::openapi::ApiDoc;
use postfeed::repo::Repo;
use postfeed::routes::{config, AppState};
use postfeed::storage::build_image_store;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds; production sets the environment externally.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = AppConfig::from_env()?;
    info!("Bootstrapping postfeed server");
    info!(
        media_root = %cfg.media_root.display(),
        cache_ttl_secs = cfg.index_cache_ttl.as_secs(),
        invalidate_on_write = cfg.invalidate_on_write,
        "configuration loaded"
    );

    let repo = build_repo(&cfg).await?;
    let image_store = build_image_store(&cfg.media_root);
    let openapi = ApiDoc::openapi();
    let state = AppState::new(repo, image_store, cfg.clone());
    let frontend_url = cfg.frontend_url.clone();

    let server = HttpServer::new(move || {
        let mut cors = Cors::default()
            // local dev frontends
            .allowed_origin("http://localhost:5173")
            .allowed_origin("http://127.0.0.1:5173")
            .allow_any_header()
            .allowed_methods(["GET", "POST", "DELETE", "OPTIONS"])
            .supports_credentials()
            .max_age(3600);
        if let Some(front) = frontend_url.as_deref() {
            cors = cors.allowed_origin(front);
        }

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            // before `config`: its catch-all username routes would shadow /docs
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
            .configure(config)
    })
    .bind(cfg.bind_addr.as_str())?;

    info!("Listening on http://{}", cfg.bind_addr);
    server.run().await?;
    Ok(())
}

#[cfg(feature = "postgres-store")]
async fn build_repo(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    use anyhow::Context;
    use sqlx::postgres::PgPoolOptions;

    let db_url = cfg
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set for postgres-store")?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("failed to connect to Postgres")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to apply migrations")?;
    info!("Using Postgres repository backend");
    Ok(Arc::new(postfeed::repo::pg::PgRepo::new(pool)))
}

#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
async fn build_repo(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    use postfeed::repo::inmem::InMemRepo;

    let repo = if cfg.persist_snapshot {
        info!(dir = %cfg.data_dir.display(), "Using in-memory repository backend with snapshot");
        InMemRepo::with_snapshot_dir(&cfg.data_dir)
    } else {
        info!("Using in-memory repository backend");
        InMemRepo::new()
    };
    Ok(Arc::new(repo))
}
