use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};

use super::{ExportStore, Scope, StoreError};
use crate::{auth::Principal, entity::Entity, models::*};

/// In-memory learn schema, built up with the `with_*` methods.
///
/// Relations are stored as ids, like the Postgres tables, and reduced to
/// labels on fetch so both stores answer identically.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    blocks: Vec<Block>,
    toolboxes: Vec<(i64, String, Vec<i64>)>,
    levels: Vec<(i64, i32, String, i32, i64)>,
    instructions: Vec<Instruction>,
    tasks: Vec<(i64, String, i64, String, String)>,
    students: Vec<(i64, Vec<i64>)>,
    task_sessions: Vec<TaskSession>,
    program_snapshots: Vec<ProgramSnapshot>,
    actions: Vec<Action>,
    tokens: HashMap<String, Principal>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block(mut self, id: i64, name: &str, order: i32) -> Self {
        self.blocks.push(Block { id, name: name.into(), order });
        self
    }

    pub fn with_toolbox(mut self, id: i64, name: &str, block_ids: &[i64]) -> Self {
        self.toolboxes.push((id, name.into(), block_ids.to_vec()));
        self
    }

    pub fn with_level(
        mut self,
        id: i64,
        level: i32,
        name: &str,
        credits: i32,
        toolbox_id: i64,
    ) -> Self {
        self.levels.push((id, level, name.into(), credits, toolbox_id));
        self
    }

    pub fn with_instruction(mut self, id: i64, name: &str) -> Self {
        self.instructions.push(Instruction { id, name: name.into() });
        self
    }

    pub fn with_task(
        mut self,
        id: i64,
        name: &str,
        level_id: i64,
        setting: &str,
        solution: &str,
    ) -> Self {
        self.tasks
            .push((id, name.into(), level_id, setting.into(), solution.into()));
        self
    }

    pub fn with_student(mut self, id: i64, seen_instruction_ids: &[i64]) -> Self {
        self.students.push((id, seen_instruction_ids.to_vec()));
        self
    }

    pub fn with_task_session(mut self, session: TaskSession) -> Self {
        self.task_sessions.push(session);
        self
    }

    /// Snapshots go away with their session, as the foreign key cascades.
    pub fn without_task_session(mut self, id: i64) -> Self {
        self.task_sessions.retain(|s| s.id != id);
        self.program_snapshots.retain(|p| p.task_session_id != id);
        self
    }

    pub fn with_program_snapshot(mut self, snapshot: ProgramSnapshot) -> Self {
        self.program_snapshots.push(snapshot);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_token(mut self, key: &str, principal: Principal) -> Self {
        self.tokens.insert(key.into(), principal);
        self
    }

    fn block_label(&self, id: i64) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    fn toolbox_label(&self, id: i64) -> Option<Related> {
        self.toolboxes
            .iter()
            .find(|(tid, ..)| *tid == id)
            .map(|(tid, name, _)| Related::new(*tid, name.clone()))
    }

    fn level_of(&self, id: i64) -> Option<&(i64, i32, String, i32, i64)> {
        self.levels.iter().find(|(lid, ..)| *lid == id)
    }

    fn credits_of(&self, student_id: i64) -> i64 {
        let solved: BTreeSet<i64> = self
            .task_sessions
            .iter()
            .filter(|s| s.student_id == student_id && s.solved)
            .map(|s| s.task_id)
            .collect();

        self.tasks
            .iter()
            .filter(|(id, ..)| solved.contains(id))
            .filter_map(|(_, _, level_id, ..)| self.level_of(*level_id))
            .map(|(_, _, _, credits, _)| i64::from(*credits))
            .sum()
    }
}

fn sorted_by_id<T: Clone>(items: &[T], scope: Scope, id: impl Fn(&T) -> i64) -> Vec<T> {
    let mut out: Vec<T> = items.iter().filter(|t| scope.includes(id(t))).cloned().collect();
    out.sort_by_key(|t| id(t));
    out
}

#[async_trait]
impl ExportStore for MemoryStore {
    async fn blocks(&self, scope: Scope) -> Result<Vec<Block>, StoreError> {
        let mut out = sorted_by_id(&self.blocks, scope, |b| b.id);
        out.sort_by_key(|b| (b.order, b.id));
        Ok(out)
    }

    async fn toolboxes(&self, scope: Scope) -> Result<Vec<Toolbox>, StoreError> {
        Ok(sorted_by_id(&self.toolboxes, scope, |t| t.0)
            .into_iter()
            .map(|(id, name, block_ids)| {
                let mut members: Vec<&Block> =
                    block_ids.iter().filter_map(|b| self.block_label(*b)).collect();
                members.sort_by_key(|b| (b.order, b.id));
                Toolbox {
                    id,
                    name,
                    blocks: members
                        .into_iter()
                        .map(|b| Related::new(b.id, b.name.clone()))
                        .collect(),
                }
            })
            .collect())
    }

    async fn levels(&self, scope: Scope) -> Result<Vec<Level>, StoreError> {
        let mut out: Vec<Level> = sorted_by_id(&self.levels, scope, |l| l.0)
            .into_iter()
            .filter_map(|(id, level, name, credits, toolbox_id)| {
                // inner join, as in the Postgres query
                let toolbox = self.toolbox_label(toolbox_id)?;
                let mut tasks: Vec<Related> = self
                    .tasks
                    .iter()
                    .filter(|t| t.2 == id)
                    .map(|t| Related::new(t.0, t.1.clone()))
                    .collect();
                tasks.sort_by_key(|t| t.id);
                Some(Level { id, level, name, credits, toolbox, tasks })
            })
            .collect();
        out.sort_by_key(|l| (l.level, l.id));
        Ok(out)
    }

    async fn instructions(&self, scope: Scope) -> Result<Vec<Instruction>, StoreError> {
        Ok(sorted_by_id(&self.instructions, scope, |i| i.id))
    }

    async fn tasks(&self, scope: Scope) -> Result<Vec<Task>, StoreError> {
        Ok(sorted_by_id(&self.tasks, scope, |t| t.0)
            .into_iter()
            .filter_map(|(id, name, level_id, setting, solution)| {
                let (lid, _, level_name, ..) = self.level_of(level_id)?;
                Some(Task {
                    id,
                    name,
                    level: Related::new(*lid, level_name.clone()),
                    setting,
                    solution,
                })
            })
            .collect())
    }

    async fn students(&self, scope: Scope) -> Result<Vec<Student>, StoreError> {
        Ok(sorted_by_id(&self.students, scope, |s| s.0)
            .into_iter()
            .map(|(id, seen)| {
                let mut seen_instructions: Vec<Related> = self
                    .instructions
                    .iter()
                    .filter(|i| seen.contains(&i.id))
                    .map(|i| Related::new(i.id, i.name.clone()))
                    .collect();
                seen_instructions.sort_by_key(|i| i.id);
                Student { id, credits: self.credits_of(id), seen_instructions }
            })
            .collect())
    }

    async fn task_sessions(&self, scope: Scope) -> Result<Vec<TaskSession>, StoreError> {
        Ok(sorted_by_id(&self.task_sessions, scope, |s| s.id))
    }

    async fn program_snapshots(&self, scope: Scope) -> Result<Vec<ProgramSnapshot>, StoreError> {
        Ok(sorted_by_id(&self.program_snapshots, scope, |p| p.id))
    }

    async fn actions(&self, scope: Scope) -> Result<Vec<Action>, StoreError> {
        Ok(sorted_by_id(&self.actions, scope, |a| a.id))
    }

    async fn ids_labelled(&self, entity: Entity, label: &str) -> Result<Vec<i64>, StoreError> {
        let mut ids: Vec<i64> = match entity {
            Entity::Block => self.blocks.iter().filter(|b| b.name == label).map(|b| b.id).collect(),
            Entity::Toolbox => self.toolboxes.iter().filter(|t| t.1 == label).map(|t| t.0).collect(),
            Entity::Level => self.levels.iter().filter(|l| l.2 == label).map(|l| l.0).collect(),
            Entity::Instruction => self
                .instructions
                .iter()
                .filter(|i| i.name == label)
                .map(|i| i.id)
                .collect(),
            Entity::Task => self.tasks.iter().filter(|t| t.1 == label).map(|t| t.0).collect(),
            other => return Err(StoreError::Unlabelled(other)),
        };
        ids.sort_unstable();
        Ok(ids)
    }

    async fn principal(&self, token: &str) -> Result<Option<Principal>, StoreError> {
        Ok(self.tokens.get(token).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn session(id: i64, student_id: i64, task_id: i64, solved: bool) -> TaskSession {
        TaskSession {
            id,
            student_id,
            task_id,
            solved,
            start: Utc.with_ymd_and_hms(2017, 10, 14, 9, 0, 0).unwrap(),
            end: None,
        }
    }

    fn course() -> MemoryStore {
        MemoryStore::new()
            .with_block(1, "move", 1)
            .with_toolbox(1, "basic", &[1])
            .with_level(1, 1, "moves", 2, 1)
            .with_level(2, 2, "loops", 5, 1)
            .with_task(1, "one-step", 1, "{}", "f")
            .with_task(2, "two-steps", 1, "{}", "ff")
            .with_task(3, "repeat", 2, "{}", "R{f}")
            .with_student(1, &[])
    }

    #[tokio::test]
    async fn credits_count_each_solved_task_once() {
        let store = course()
            .with_task_session(session(1, 1, 1, true))
            .with_task_session(session(2, 1, 1, true))
            .with_task_session(session(3, 1, 3, true))
            .with_task_session(session(4, 1, 2, false));

        let students = store.students(Scope::All).await.unwrap();
        assert_eq!(students[0].credits, 2 + 5);
    }

    #[tokio::test]
    async fn deleting_a_session_drops_its_snapshots() {
        let store = course()
            .with_task_session(session(1, 1, 1, false))
            .with_program_snapshot(ProgramSnapshot {
                id: 1,
                task_session_id: 1,
                time: Utc.with_ymd_and_hms(2017, 10, 14, 9, 1, 0).unwrap(),
                program: "f".into(),
                granularity: Granularity::Edit,
                correct: None,
            })
            .without_task_session(1);

        assert!(store.program_snapshots(Scope::All).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn labels_without_a_name_column_are_rejected() {
        let err = course().ids_labelled(Entity::Student, "1").await.unwrap_err();
        assert!(matches!(err, StoreError::Unlabelled(Entity::Student)));
    }
}
