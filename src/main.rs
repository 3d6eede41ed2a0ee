use std::{env, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use robomission_export::{app, config::Config, db, store::PgStore, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "robomission_export=info,tower_http=info".into())
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let pool = db::connect(&config).await?;
    if config.run_migrations {
        // crate-relative path for sqlx migrations
        sqlx::migrate!("./migrations").run(&pool).await?;
    }

    let store = PgStore::new(pool, config.relation_loading());
    let state = AppState::new(Arc::new(store), &config.latest_bundle_url);
    let app = app(state, &config.media_dir);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(
        media_dir = %config.media_dir.display(),
        latest_bundle = %config.latest_bundle_url,
        "listening on http://{}", addr
    );

    axum::serve(listener, app).await?;
    Ok(())
}
