//! Record-to-row projections, one per exported entity.
//!
//! A row carries exactly the entity's columns in order. Relations that have
//! a label (blocks, toolboxes, levels, tasks, instructions) are exported as
//! that label; event tables keep their foreign keys as ids.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    entity::Entity,
    models::*,
    store::{ExportStore, Scope, StoreError},
};

/// A stored record that can be listed and projected into a row.
#[async_trait]
pub trait Exportable: Sized + Send + Sync + 'static {
    type Row: Serialize + Send + Sync;

    const ENTITY: Entity;

    async fn load(store: &dyn ExportStore, scope: Scope) -> Result<Vec<Self>, StoreError>;

    fn project(&self) -> Self::Row;
}

fn labels(related: &[Related]) -> Vec<String> {
    related.iter().map(|r| r.name.clone()).collect()
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct BlockRow {
    pub id: i64,
    pub name: String,
    pub order: i32,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ToolboxRow {
    pub id: i64,
    pub name: String,
    pub blocks: Vec<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct LevelRow {
    pub id: i64,
    pub level: i32,
    pub name: String,
    pub credits: i32,
    pub toolbox: String,
    pub tasks: Vec<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct InstructionRow {
    pub id: i64,
    pub name: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TaskRow {
    pub id: i64,
    pub name: String,
    pub level: String,
    pub setting: String,
    pub solution: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct StudentRow {
    pub id: i64,
    pub credits: i64,
    pub seen_instructions: Vec<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TaskSessionRow {
    pub id: i64,
    pub student: i64,
    pub task: i64,
    pub solved: bool,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ProgramSnapshotRow {
    pub id: i64,
    pub task_session: i64,
    pub time: DateTime<Utc>,
    pub program: String,
    pub granularity: Granularity,
    pub correct: Option<bool>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ActionRow {
    pub id: i64,
    pub name: String,
    pub student: i64,
    pub task: Option<i64>,
    pub time: DateTime<Utc>,
    pub randomness: Option<f64>,
    pub data: String,
}

#[async_trait]
impl Exportable for Block {
    type Row = BlockRow;
    const ENTITY: Entity = Entity::Block;

    async fn load(store: &dyn ExportStore, scope: Scope) -> Result<Vec<Self>, StoreError> {
        store.blocks(scope).await
    }

    fn project(&self) -> BlockRow {
        BlockRow { id: self.id, name: self.name.clone(), order: self.order }
    }
}

#[async_trait]
impl Exportable for Toolbox {
    type Row = ToolboxRow;
    const ENTITY: Entity = Entity::Toolbox;

    async fn load(store: &dyn ExportStore, scope: Scope) -> Result<Vec<Self>, StoreError> {
        store.toolboxes(scope).await
    }

    fn project(&self) -> ToolboxRow {
        ToolboxRow { id: self.id, name: self.name.clone(), blocks: labels(&self.blocks) }
    }
}

#[async_trait]
impl Exportable for Level {
    type Row = LevelRow;
    const ENTITY: Entity = Entity::Level;

    async fn load(store: &dyn ExportStore, scope: Scope) -> Result<Vec<Self>, StoreError> {
        store.levels(scope).await
    }

    fn project(&self) -> LevelRow {
        LevelRow {
            id: self.id,
            level: self.level,
            name: self.name.clone(),
            credits: self.credits,
            toolbox: self.toolbox.name.clone(),
            tasks: labels(&self.tasks),
        }
    }
}

#[async_trait]
impl Exportable for Instruction {
    type Row = InstructionRow;
    const ENTITY: Entity = Entity::Instruction;

    async fn load(store: &dyn ExportStore, scope: Scope) -> Result<Vec<Self>, StoreError> {
        store.instructions(scope).await
    }

    fn project(&self) -> InstructionRow {
        InstructionRow { id: self.id, name: self.name.clone() }
    }
}

#[async_trait]
impl Exportable for Task {
    type Row = TaskRow;
    const ENTITY: Entity = Entity::Task;

    async fn load(store: &dyn ExportStore, scope: Scope) -> Result<Vec<Self>, StoreError> {
        store.tasks(scope).await
    }

    fn project(&self) -> TaskRow {
        TaskRow {
            id: self.id,
            name: self.name.clone(),
            level: self.level.name.clone(),
            setting: self.setting.clone(),
            solution: self.solution.clone(),
        }
    }
}

#[async_trait]
impl Exportable for Student {
    type Row = StudentRow;
    const ENTITY: Entity = Entity::Student;

    async fn load(store: &dyn ExportStore, scope: Scope) -> Result<Vec<Self>, StoreError> {
        store.students(scope).await
    }

    fn project(&self) -> StudentRow {
        StudentRow {
            id: self.id,
            credits: self.credits,
            seen_instructions: labels(&self.seen_instructions),
        }
    }
}

#[async_trait]
impl Exportable for TaskSession {
    type Row = TaskSessionRow;
    const ENTITY: Entity = Entity::TaskSession;

    async fn load(store: &dyn ExportStore, scope: Scope) -> Result<Vec<Self>, StoreError> {
        store.task_sessions(scope).await
    }

    fn project(&self) -> TaskSessionRow {
        TaskSessionRow {
            id: self.id,
            student: self.student_id,
            task: self.task_id,
            solved: self.solved,
            start: self.start,
            end: self.end,
        }
    }
}

#[async_trait]
impl Exportable for ProgramSnapshot {
    type Row = ProgramSnapshotRow;
    const ENTITY: Entity = Entity::ProgramSnapshot;

    async fn load(store: &dyn ExportStore, scope: Scope) -> Result<Vec<Self>, StoreError> {
        store.program_snapshots(scope).await
    }

    fn project(&self) -> ProgramSnapshotRow {
        ProgramSnapshotRow {
            id: self.id,
            task_session: self.task_session_id,
            time: self.time,
            program: self.program.clone(),
            granularity: self.granularity,
            // edits are never judged
            correct: match self.granularity {
                Granularity::Execution => self.correct,
                Granularity::Edit => None,
            },
        }
    }
}

#[async_trait]
impl Exportable for Action {
    type Row = ActionRow;
    const ENTITY: Entity = Entity::Action;

    async fn load(store: &dyn ExportStore, scope: Scope) -> Result<Vec<Self>, StoreError> {
        store.actions(scope).await
    }

    fn project(&self) -> ActionRow {
        ActionRow {
            id: self.id,
            name: self.name.clone(),
            student: self.student_id,
            task: self.task_id,
            time: self.time,
            randomness: self.randomness,
            data: self.data.clone(),
        }
    }
}
