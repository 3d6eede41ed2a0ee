use async_trait::async_trait;
use sqlx::{query_as, query_scalar};
use std::collections::{BTreeSet, HashMap};

use super::{ExportStore, RelationLoading, Scope, StoreError};
use crate::{auth::Principal, db::Db, entity::Entity, models::*};

const TOOLBOX_BLOCKS: &str = r#"
    SELECT tb.toolbox_id AS owner_id, b.id, b.name
    FROM toolbox_blocks tb JOIN blocks b ON b.id = tb.block_id
    WHERE tb.toolbox_id = ANY($1)
    ORDER BY b."order", b.id
"#;

const LEVEL_TASKS: &str = r#"
    SELECT level_id AS owner_id, id, name
    FROM tasks
    WHERE level_id = ANY($1)
    ORDER BY id
"#;

const SEEN_INSTRUCTIONS: &str = r#"
    SELECT si.student_id AS owner_id, i.id, i.name
    FROM student_seen_instructions si JOIN instructions i ON i.id = si.instruction_id
    WHERE si.student_id = ANY($1)
    ORDER BY i.id
"#;

/// Postgres-backed store over the learn schema.
#[derive(Clone)]
pub struct PgStore {
    db: Db,
    relations: RelationLoading,
}

#[derive(sqlx::FromRow)]
struct OwnedRelated {
    owner_id: i64,
    id: i64,
    name: String,
}

#[derive(sqlx::FromRow)]
struct LevelWithToolbox {
    id: i64,
    level: i32,
    name: String,
    credits: i32,
    toolbox_id: i64,
    toolbox_name: String,
}

#[derive(sqlx::FromRow)]
struct TaskWithLevel {
    id: i64,
    name: String,
    setting: String,
    solution: String,
    level_id: i64,
    level_name: String,
}

#[derive(sqlx::FromRow)]
struct TokenOwner {
    username: String,
    is_superuser: bool,
}

impl PgStore {
    pub fn new(db: Db, relations: RelationLoading) -> Self {
        Self { db, relations }
    }

    async fn related(
        &self,
        sql: &str,
        owners: &[i64],
    ) -> Result<HashMap<i64, Vec<Related>>, StoreError> {
        match self.relations {
            RelationLoading::Batched => self.related_batch(sql, owners).await,
            RelationLoading::PerRecord => {
                let mut out = HashMap::new();
                for owner in owners {
                    out.extend(self.related_batch(sql, std::slice::from_ref(owner)).await?);
                }
                Ok(out)
            }
        }
    }

    async fn related_batch(
        &self,
        sql: &str,
        owners: &[i64],
    ) -> Result<HashMap<i64, Vec<Related>>, StoreError> {
        if owners.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<OwnedRelated> = query_as(sql).bind(owners).fetch_all(&self.db).await?;

        let mut out: HashMap<i64, Vec<Related>> = HashMap::new();
        for r in rows {
            out.entry(r.owner_id).or_default().push(Related::new(r.id, r.name));
        }
        Ok(out)
    }
}

#[async_trait]
impl ExportStore for PgStore {
    async fn blocks(&self, scope: Scope) -> Result<Vec<Block>, StoreError> {
        let rows = query_as::<_, Block>(
            r#"SELECT id, name, "order" FROM blocks
               WHERE ($1::BIGINT IS NULL OR id = $1)
               ORDER BY "order", id"#,
        )
        .bind(scope.id())
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn toolboxes(&self, scope: Scope) -> Result<Vec<Toolbox>, StoreError> {
        let mut rows = query_as::<_, Toolbox>(
            r#"SELECT id, name FROM toolboxes
               WHERE ($1::BIGINT IS NULL OR id = $1)
               ORDER BY id"#,
        )
        .bind(scope.id())
        .fetch_all(&self.db)
        .await?;

        let ids: Vec<i64> = rows.iter().map(|t| t.id).collect();
        let mut blocks = self.related(TOOLBOX_BLOCKS, &ids).await?;
        for t in &mut rows {
            t.blocks = blocks.remove(&t.id).unwrap_or_default();
        }
        Ok(rows)
    }

    async fn levels(&self, scope: Scope) -> Result<Vec<Level>, StoreError> {
        let rows = query_as::<_, LevelWithToolbox>(
            r#"SELECT l.id, l.level, l.name, l.credits,
                      t.id AS toolbox_id, t.name AS toolbox_name
               FROM levels l JOIN toolboxes t ON t.id = l.toolbox_id
               WHERE ($1::BIGINT IS NULL OR l.id = $1)
               ORDER BY l.level, l.id"#,
        )
        .bind(scope.id())
        .fetch_all(&self.db)
        .await?;

        let ids: Vec<i64> = rows.iter().map(|l| l.id).collect();
        let mut tasks = self.related(LEVEL_TASKS, &ids).await?;
        Ok(rows
            .into_iter()
            .map(|l| Level {
                tasks: tasks.remove(&l.id).unwrap_or_default(),
                id: l.id,
                level: l.level,
                name: l.name,
                credits: l.credits,
                toolbox: Related::new(l.toolbox_id, l.toolbox_name),
            })
            .collect())
    }

    async fn instructions(&self, scope: Scope) -> Result<Vec<Instruction>, StoreError> {
        let rows = query_as::<_, Instruction>(
            r#"SELECT id, name FROM instructions
               WHERE ($1::BIGINT IS NULL OR id = $1)
               ORDER BY id"#,
        )
        .bind(scope.id())
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn tasks(&self, scope: Scope) -> Result<Vec<Task>, StoreError> {
        let rows = query_as::<_, TaskWithLevel>(
            r#"SELECT t.id, t.name, t.setting, t.solution,
                      l.id AS level_id, l.name AS level_name
               FROM tasks t JOIN levels l ON l.id = t.level_id
               WHERE ($1::BIGINT IS NULL OR t.id = $1)
               ORDER BY t.id"#,
        )
        .bind(scope.id())
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|t| Task {
                id: t.id,
                name: t.name,
                level: Related::new(t.level_id, t.level_name),
                setting: t.setting,
                solution: t.solution,
            })
            .collect())
    }

    async fn students(&self, scope: Scope) -> Result<Vec<Student>, StoreError> {
        // credits: sum over the distinct solved tasks of their level's credits
        let mut rows = query_as::<_, Student>(
            r#"SELECT s.id,
                      COALESCE((
                          SELECT SUM(l.credits)
                          FROM tasks t JOIN levels l ON l.id = t.level_id
                          WHERE t.id IN (
                              SELECT ts.task_id FROM task_sessions ts
                              WHERE ts.student_id = s.id AND ts.solved
                          )
                      ), 0)::BIGINT AS credits
               FROM students s
               WHERE ($1::BIGINT IS NULL OR s.id = $1)
               ORDER BY s.id"#,
        )
        .bind(scope.id())
        .fetch_all(&self.db)
        .await?;

        let ids: Vec<i64> = rows.iter().map(|s| s.id).collect();
        let mut seen = self.related(SEEN_INSTRUCTIONS, &ids).await?;
        for s in &mut rows {
            s.seen_instructions = seen.remove(&s.id).unwrap_or_default();
        }
        Ok(rows)
    }

    async fn task_sessions(&self, scope: Scope) -> Result<Vec<TaskSession>, StoreError> {
        let rows = query_as::<_, TaskSession>(
            r#"SELECT id, student_id, task_id, solved, "start", "end"
               FROM task_sessions
               WHERE ($1::BIGINT IS NULL OR id = $1)
               ORDER BY id"#,
        )
        .bind(scope.id())
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn program_snapshots(&self, scope: Scope) -> Result<Vec<ProgramSnapshot>, StoreError> {
        let rows = query_as::<_, ProgramSnapshot>(
            r#"SELECT id, task_session_id, "time", program, granularity, correct
               FROM program_snapshots
               WHERE ($1::BIGINT IS NULL OR id = $1)
               ORDER BY id"#,
        )
        .bind(scope.id())
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn actions(&self, scope: Scope) -> Result<Vec<Action>, StoreError> {
        let rows = query_as::<_, Action>(
            r#"SELECT id, name, student_id, task_id, "time", randomness, data
               FROM actions
               WHERE ($1::BIGINT IS NULL OR id = $1)
               ORDER BY id"#,
        )
        .bind(scope.id())
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn ids_labelled(&self, entity: Entity, label: &str) -> Result<Vec<i64>, StoreError> {
        let table = entity.label_table().ok_or(StoreError::Unlabelled(entity))?;
        // table names come from a fixed list, never from input
        let sql = format!("SELECT id FROM {table} WHERE name = $1 ORDER BY id");
        let ids = query_scalar::<_, i64>(&sql)
            .bind(label)
            .fetch_all(&self.db)
            .await?;
        Ok(ids)
    }

    async fn principal(&self, token: &str) -> Result<Option<Principal>, StoreError> {
        let owner: Option<TokenOwner> = query_as(
            "SELECT username, is_superuser FROM api_tokens WHERE key = $1 AND is_active",
        )
        .bind(token)
        .fetch_optional(&self.db)
        .await?;

        let Some(owner) = owner else {
            return Ok(None);
        };

        let permissions: Vec<String> =
            query_scalar("SELECT codename FROM api_token_permissions WHERE key = $1")
                .bind(token)
                .fetch_all(&self.db)
                .await?;

        tracing::trace!(user = %owner.username, "token resolved");

        Ok(Some(Principal {
            username: owner.username,
            is_superuser: owner.is_superuser,
            permissions: permissions.into_iter().collect::<BTreeSet<_>>(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};
    use sqlx::{Executor, PgPool};

    const SEED: &str = r#"
        INSERT INTO blocks (id, name, "order") VALUES (2, 'turn', 2), (1, 'move', 1), (3, 'repeat', 0);
        INSERT INTO toolboxes (id, name) VALUES (1, 'basic'), (2, 'empty'), (3, 'loops');
        INSERT INTO toolbox_blocks (toolbox_id, block_id) VALUES (1, 2), (1, 1), (3, 3), (3, 1);
        INSERT INTO levels (id, level, name, credits, toolbox_id) VALUES
            (2, 2, 'turns', 3, 1), (1, 1, 'moves', 2, 1), (3, 3, 'loops', 5, 3);
        INSERT INTO tasks (id, name, level_id, setting, solution) VALUES
            (1, 'one-step', 1, '{}', 'f'), (2, 'turn-left', 2, '{}', 'l'), (3, 'two-steps', 1, '{}', 'ff');
        INSERT INTO instructions (id, name) VALUES (1, 'intro'), (2, 'toolbox');
        INSERT INTO students (id) VALUES (1), (2), (3);
        INSERT INTO student_seen_instructions (student_id, instruction_id) VALUES (1, 2), (1, 1), (3, 1);
        INSERT INTO task_sessions (id, student_id, task_id, solved, "start") VALUES
            (1, 1, 1, TRUE, '2017-10-14T09:00:00Z'),
            (2, 1, 1, TRUE, '2017-10-14T09:00:00Z'),
            (3, 1, 2, TRUE, '2017-10-14T09:00:00Z'),
            (4, 3, 3, FALSE, '2017-10-14T09:00:00Z');
        INSERT INTO api_tokens (key, username, is_superuser) VALUES ('analyst-key', 'analyst', FALSE);
        INSERT INTO api_token_permissions (key, codename) VALUES
            ('analyst-key', 'learn.view_level'), ('analyst-key', 'learn.view_task');
        INSERT INTO api_tokens (key, username, is_active) VALUES ('revoked', 'old', FALSE);
    "#;

    fn same_data_in_memory() -> MemoryStore {
        let t0 = Utc.with_ymd_and_hms(2017, 10, 14, 9, 0, 0).unwrap();
        let session = |id, student_id, task_id, solved| TaskSession {
            id,
            student_id,
            task_id,
            solved,
            start: t0,
            end: None,
        };
        MemoryStore::new()
            .with_block(2, "turn", 2)
            .with_block(1, "move", 1)
            .with_block(3, "repeat", 0)
            .with_toolbox(1, "basic", &[2, 1])
            .with_toolbox(2, "empty", &[])
            .with_toolbox(3, "loops", &[3, 1])
            .with_level(2, 2, "turns", 3, 1)
            .with_level(1, 1, "moves", 2, 1)
            .with_level(3, 3, "loops", 5, 3)
            .with_task(1, "one-step", 1, "{}", "f")
            .with_task(2, "turn-left", 2, "{}", "l")
            .with_task(3, "two-steps", 1, "{}", "ff")
            .with_instruction(1, "intro")
            .with_instruction(2, "toolbox")
            .with_student(1, &[2, 1])
            .with_student(2, &[])
            .with_student(3, &[1])
            .with_task_session(session(1, 1, 1, true))
            .with_task_session(session(2, 1, 1, true))
            .with_task_session(session(3, 1, 2, true))
            .with_task_session(session(4, 3, 3, false))
    }

    async fn seeded(pool: &PgPool) {
        pool.execute(SEED).await.unwrap();
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn relation_loading_does_not_change_output(pool: PgPool) {
        seeded(&pool).await;
        let batched = PgStore::new(pool.clone(), RelationLoading::Batched);
        let per_record = PgStore::new(pool, RelationLoading::PerRecord);
        let memory = same_data_in_memory();

        for scope in [Scope::All, Scope::One(1), Scope::One(2)] {
            let expected = memory.toolboxes(scope).await.unwrap();
            assert_eq!(batched.toolboxes(scope).await.unwrap(), expected);
            assert_eq!(per_record.toolboxes(scope).await.unwrap(), expected);

            let expected = memory.levels(scope).await.unwrap();
            assert_eq!(batched.levels(scope).await.unwrap(), expected);
            assert_eq!(per_record.levels(scope).await.unwrap(), expected);

            let expected = memory.students(scope).await.unwrap();
            assert_eq!(batched.students(scope).await.unwrap(), expected);
            assert_eq!(per_record.students(scope).await.unwrap(), expected);
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn relations_are_ordered_and_credited(pool: PgPool) {
        seeded(&pool).await;
        let store = PgStore::new(pool, RelationLoading::Batched);

        let toolboxes = store.toolboxes(Scope::All).await.unwrap();
        let names: Vec<&str> = toolboxes[0].blocks.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, ["move", "turn"]);
        assert!(toolboxes[1].blocks.is_empty());

        let levels = store.levels(Scope::All).await.unwrap();
        let ids: Vec<i64> = levels.iter().map(|l| l.id).collect();
        assert_eq!(ids, [1, 2, 3]);
        assert_eq!(levels[0].toolbox, Related::new(1, "basic"));
        assert_eq!(levels[0].tasks, [Related::new(1, "one-step"), Related::new(3, "two-steps")]);

        let students = store.students(Scope::All).await.unwrap();
        let credits: Vec<i64> = students.iter().map(|s| s.credits).collect();
        assert_eq!(credits, [2 + 3, 0, 0]);

        let tasks = store.tasks(Scope::One(3)).await.unwrap();
        assert_eq!(tasks[0].level, Related::new(1, "moves"));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn labels_and_tokens_resolve(pool: PgPool) {
        seeded(&pool).await;
        let store = PgStore::new(pool, RelationLoading::default());

        assert_eq!(store.ids_labelled(Entity::Toolbox, "loops").await.unwrap(), [3]);
        assert!(store.ids_labelled(Entity::Task, "nope").await.unwrap().is_empty());
        assert!(matches!(
            store.ids_labelled(Entity::Action, "x").await,
            Err(StoreError::Unlabelled(Entity::Action))
        ));

        let analyst = store.principal("analyst-key").await.unwrap().unwrap();
        assert_eq!(
            analyst,
            Principal::with_permissions("analyst", ["learn.view_level", "learn.view_task"])
        );
        assert!(store.principal("revoked").await.unwrap().is_none());
        assert!(store.principal("missing").await.unwrap().is_none());
    }
}
