//! Write-side shapes of the labelled single-valued relations.
//!
//! Nothing here is persisted: resolving an input only checks that its
//! labels name exactly one stored record and swaps them for ids.

use serde::Deserialize;

use crate::{entity::Entity, error::ApiError, store::ExportStore};

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct LevelInput {
    pub level: i32,
    pub name: String,
    pub credits: i32,
    /// Toolbox name.
    pub toolbox: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLevel {
    pub level: i32,
    pub name: String,
    pub credits: i32,
    pub toolbox_id: i64,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct TaskInput {
    pub name: String,
    /// Level name.
    pub level: String,
    pub setting: String,
    pub solution: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTask {
    pub name: String,
    pub level_id: i64,
    pub setting: String,
    pub solution: String,
}

/// Looks up the single record of `entity` named `label`.
pub async fn resolve_label(
    store: &dyn ExportStore,
    field: &'static str,
    entity: Entity,
    label: &str,
) -> Result<i64, ApiError> {
    let ids = store.ids_labelled(entity, label).await?;
    match ids.as_slice() {
        [id] => Ok(*id),
        [] => Err(ApiError::Validation {
            field,
            message: format!("Object with name={label} does not exist."),
        }),
        _ => Err(ApiError::Validation { field, message: "Invalid value.".into() }),
    }
}

impl LevelInput {
    pub async fn resolve(self, store: &dyn ExportStore) -> Result<ResolvedLevel, ApiError> {
        let toolbox_id = resolve_label(store, "toolbox", Entity::Toolbox, &self.toolbox).await?;
        Ok(ResolvedLevel {
            level: self.level,
            name: self.name,
            credits: self.credits,
            toolbox_id,
        })
    }
}

impl TaskInput {
    pub async fn resolve(self, store: &dyn ExportStore) -> Result<ResolvedTask, ApiError> {
        let level_id = resolve_label(store, "level", Entity::Level, &self.level).await?;
        Ok(ResolvedTask {
            name: self.name,
            level_id,
            setting: self.setting,
            solution: self.solution,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use axum::{http::StatusCode, response::IntoResponse};

    fn store() -> MemoryStore {
        MemoryStore::new()
            .with_toolbox(1, "basic", &[])
            .with_toolbox(2, "twin", &[])
            .with_toolbox(3, "twin", &[])
            .with_level(1, 1, "moves", 2, 1)
    }

    fn task(level: &str) -> TaskInput {
        serde_json::from_value(serde_json::json!({
            "name": "one-step",
            "level": level,
            "setting": "{}",
            "solution": "f",
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn task_level_resolves_by_name() {
        let resolved = task("moves").resolve(&store()).await.unwrap();
        assert_eq!(resolved.level_id, 1);
        assert_eq!(resolved.name, "one-step");
    }

    #[tokio::test]
    async fn unknown_level_is_unprocessable() {
        let err = task("nowhere").resolve(&store()).await.unwrap_err();
        match &err {
            ApiError::Validation { field, message } => {
                assert_eq!(*field, "level");
                assert_eq!(message, "Object with name=nowhere does not exist.");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(err.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn ambiguous_toolbox_is_invalid() {
        let input = LevelInput { level: 2, name: "loops".into(), credits: 3, toolbox: "twin".into() };
        let err = input.resolve(&store()).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation { field: "toolbox", .. }));
    }
}
