use async_trait::async_trait;
use thiserror::Error;

use crate::{auth::Principal, entity::Entity, models::*};

pub mod memory;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0:?} records have no label")]
    Unlabelled(Entity),
}

/// Which records a fetch returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    All,
    One(i64),
}

impl Scope {
    pub fn id(self) -> Option<i64> {
        match self {
            Scope::All => None,
            Scope::One(id) => Some(id),
        }
    }

    pub fn includes(self, id: i64) -> bool {
        self.id().map_or(true, |wanted| wanted == id)
    }
}

/// How many-valued relations are loaded. Only latency differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelationLoading {
    /// One query per relation for the whole result set.
    #[default]
    Batched,
    /// One query per relation per record.
    PerRecord,
}

/// Read-only access to the learn schema.
///
/// Every fetch returns records ordered by the entity's natural order
/// (`order` for blocks, `level` for levels, id otherwise), with relations
/// already reduced to labels.
#[async_trait]
pub trait ExportStore: Send + Sync {
    async fn blocks(&self, scope: Scope) -> Result<Vec<Block>, StoreError>;
    async fn toolboxes(&self, scope: Scope) -> Result<Vec<Toolbox>, StoreError>;
    async fn levels(&self, scope: Scope) -> Result<Vec<Level>, StoreError>;
    async fn instructions(&self, scope: Scope) -> Result<Vec<Instruction>, StoreError>;
    async fn tasks(&self, scope: Scope) -> Result<Vec<Task>, StoreError>;
    async fn students(&self, scope: Scope) -> Result<Vec<Student>, StoreError>;
    async fn task_sessions(&self, scope: Scope) -> Result<Vec<TaskSession>, StoreError>;
    async fn program_snapshots(&self, scope: Scope) -> Result<Vec<ProgramSnapshot>, StoreError>;
    async fn actions(&self, scope: Scope) -> Result<Vec<Action>, StoreError>;

    /// Ids of the records of `entity` whose label equals `label`.
    async fn ids_labelled(&self, entity: Entity, label: &str) -> Result<Vec<i64>, StoreError>;

    /// Resolves an API token to its owner, if the token is active.
    async fn principal(&self, token: &str) -> Result<Option<Principal>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_filters_by_id() {
        assert!(Scope::All.includes(7));
        assert!(Scope::One(7).includes(7));
        assert!(!Scope::One(7).includes(8));
    }
}
