/// The exported tables. Each has one listing route and one column layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Block,
    Toolbox,
    Level,
    Instruction,
    Task,
    Student,
    TaskSession,
    ProgramSnapshot,
    Action,
}

impl Entity {
    pub const ALL: [Entity; 9] = [
        Entity::Block,
        Entity::Toolbox,
        Entity::Level,
        Entity::Instruction,
        Entity::Task,
        Entity::Student,
        Entity::TaskSession,
        Entity::ProgramSnapshot,
        Entity::Action,
    ];

    /// Route segment, e.g. `task-sessions` for `/task-sessions/`.
    pub fn path(self) -> &'static str {
        match self {
            Entity::Block => "blocks",
            Entity::Toolbox => "toolboxes",
            Entity::Level => "levels",
            Entity::Instruction => "instructions",
            Entity::Task => "tasks",
            Entity::Student => "students",
            Entity::TaskSession => "task-sessions",
            Entity::ProgramSnapshot => "program-snapshots",
            Entity::Action => "actions",
        }
    }

    /// Output columns, in order. Rows serialize exactly these keys.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Entity::Block => &["id", "name", "order"],
            Entity::Toolbox => &["id", "name", "blocks"],
            Entity::Level => &["id", "level", "name", "credits", "toolbox", "tasks"],
            Entity::Instruction => &["id", "name"],
            Entity::Task => &["id", "name", "level", "setting", "solution"],
            Entity::Student => &["id", "credits", "seen_instructions"],
            Entity::TaskSession => &["id", "student", "task", "solved", "start", "end"],
            Entity::ProgramSnapshot => {
                &["id", "task_session", "time", "program", "granularity", "correct"]
            }
            Entity::Action => &["id", "name", "student", "task", "time", "randomness", "data"],
        }
    }

    /// Model read permission required to list this entity.
    pub fn view_permission(self) -> &'static str {
        match self {
            Entity::Block => "learn.view_block",
            Entity::Toolbox => "learn.view_toolbox",
            Entity::Level => "learn.view_level",
            Entity::Instruction => "learn.view_instruction",
            Entity::Task => "learn.view_task",
            Entity::Student => "learn.view_student",
            Entity::TaskSession => "learn.view_tasksession",
            Entity::ProgramSnapshot => "learn.view_programsnapshot",
            Entity::Action => "learn.view_action",
        }
    }

    /// Table whose `name` column labels this entity when it appears as a relation.
    pub fn label_table(self) -> Option<&'static str> {
        match self {
            Entity::Block => Some("blocks"),
            Entity::Toolbox => Some("toolboxes"),
            Entity::Level => Some("levels"),
            Entity::Instruction => Some("instructions"),
            Entity::Task => Some("tasks"),
            Entity::Student | Entity::TaskSession | Entity::ProgramSnapshot | Entity::Action => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn paths_and_permissions_are_distinct() {
        let paths: HashSet<_> = Entity::ALL.iter().map(|e| e.path()).collect();
        let perms: HashSet<_> = Entity::ALL.iter().map(|e| e.view_permission()).collect();
        assert_eq!(paths.len(), Entity::ALL.len());
        assert_eq!(perms.len(), Entity::ALL.len());
    }

    #[test]
    fn every_table_starts_with_id() {
        for entity in Entity::ALL {
            assert_eq!(entity.columns()[0], "id", "{entity:?}");
        }
    }
}
