use axum::{
    extract::{rejection::PathRejection, Path, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::{Map, Value};
use std::path::Path as FsPath;
use tower_http::services::ServeDir;

use crate::{
    auth::{Access, Credentials},
    entity::Entity,
    error::ApiError,
    models::*,
    projection::Exportable,
    render::{self, Format, Table},
    store::Scope,
    AppState,
};

pub fn router(state: AppState, media_dir: &FsPath) -> Router {
    let router = Router::new()
        .route("/", get(api_root))
        .route("/latest-bundle/", get(latest_bundle));

    let router = export::<Block>(router);
    let router = export::<Toolbox>(router);
    let router = export::<Level>(router);
    let router = export::<Instruction>(router);
    let router = export::<Task>(router);
    let router = export::<Student>(router);
    let router = export::<TaskSession>(router);
    let router = export::<ProgramSnapshot>(router);
    let router = export::<Action>(router);

    router
        // the resource server behind latest-bundle
        .nest_service("/media", ServeDir::new(media_dir))
        .with_state(state)
}

fn export<E: Exportable>(router: Router<AppState>) -> Router<AppState> {
    let path = E::ENTITY.path();
    router
        .route(&format!("/{path}/"), get(list::<E>))
        .route(&format!("/{path}/:id/"), get(retrieve::<E>))
}

async fn list<E: Exportable>(
    State(state): State<AppState>,
    credentials: Credentials,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Table, ApiError> {
    Access::ModelRead(E::ENTITY).check(&credentials)?;
    let format = Format::negotiate(&uri, &headers)?;
    table::<E>(&state, Scope::All, format).await
}

async fn retrieve<E: Exportable>(
    State(state): State<AppState>,
    credentials: Credentials,
    id: Result<Path<i64>, PathRejection>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Table, ApiError> {
    Access::ModelRead(E::ENTITY).check(&credentials)?;
    let Path(id) = id.map_err(|_| ApiError::NotFound)?;
    let format = Format::negotiate(&uri, &headers)?;

    let table = table::<E>(&state, Scope::One(id), format).await?;
    if table.rows == 0 {
        return Err(ApiError::NotFound);
    }
    Ok(table)
}

async fn table<E: Exportable>(
    state: &AppState,
    scope: Scope,
    format: Format,
) -> Result<Table, ApiError> {
    let records = E::load(state.store.as_ref(), scope).await?;
    let rows: Vec<E::Row> = records.iter().map(E::project).collect();
    let body = render::render(E::ENTITY, &rows, format)?;

    tracing::debug!(
        entity = E::ENTITY.path(),
        rows = rows.len(),
        format = format.name(),
        "rendered export"
    );
    Ok(Table { entity: E::ENTITY, format, rows: rows.len(), body })
}

async fn api_root(credentials: Credentials) -> Result<Json<Value>, ApiError> {
    Access::Authenticated.check(&credentials)?;
    let mut index = Map::new();
    for entity in Entity::ALL {
        index.insert(entity.path().into(), Value::String(format!("/{}/", entity.path())));
    }
    index.insert("latest-bundle".into(), Value::String("/latest-bundle/".into()));
    Ok(Json(Value::Object(index)))
}

/// Points at the most recent full-data archive; never checks it exists.
async fn latest_bundle(
    State(state): State<AppState>,
    credentials: Credentials,
) -> Result<impl IntoResponse, ApiError> {
    Access::Authenticated.check(&credentials)?;
    Ok((StatusCode::FOUND, [(header::LOCATION, state.latest_bundle_url.to_string())]))
}
