use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// A related record reduced to its id and label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Related {
    pub id: i64,
    pub name: String,
}

impl Related {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct Block {
    pub id: i64,
    pub name: String,
    pub order: i32,
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct Toolbox {
    pub id: i64,
    pub name: String,
    #[sqlx(skip)]
    pub blocks: Vec<Related>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Level {
    pub id: i64,
    pub level: i32,
    pub name: String,
    pub credits: i32,
    pub toolbox: Related,
    pub tasks: Vec<Related>,
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct Instruction {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: i64,
    pub name: String,
    pub level: Related,
    pub setting: String,
    pub solution: String,
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct Student {
    pub id: i64,
    // computed in the query, never stored
    pub credits: i64,
    #[sqlx(skip)]
    pub seen_instructions: Vec<Related>,
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct TaskSession {
    pub id: i64,
    pub student_id: i64,
    pub task_id: i64,
    pub solved: bool,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

/// How often a program snapshot is taken.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Execution,
    Edit,
}

impl Granularity {
    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Execution => "execution",
            Granularity::Edit => "edit",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("unknown snapshot granularity {0:?}")]
pub struct UnknownGranularity(pub String);

impl FromStr for Granularity {
    type Err = UnknownGranularity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "execution" => Ok(Granularity::Execution),
            "edit" => Ok(Granularity::Edit),
            other => Err(UnknownGranularity(other.to_string())),
        }
    }
}

impl TryFrom<String> for Granularity {
    type Error = UnknownGranularity;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct ProgramSnapshot {
    pub id: i64,
    pub task_session_id: i64,
    pub time: DateTime<Utc>,
    pub program: String,
    #[sqlx(try_from = "String")]
    pub granularity: Granularity,
    /// `None` is "unknown"; only executions are ever judged.
    pub correct: Option<bool>,
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct Action {
    pub id: i64,
    pub name: String,
    pub student_id: i64,
    pub task_id: Option<i64>,
    pub time: DateTime<Utc>,
    pub randomness: Option<f64>,
    pub data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn granularity_parses_stored_values() {
        assert_eq!("edit".parse::<Granularity>().unwrap(), Granularity::Edit);
        assert_eq!(
            Granularity::try_from("execution".to_string()).unwrap(),
            Granularity::Execution
        );
        assert!("Edit".parse::<Granularity>().is_err());
    }

    #[test]
    fn granularity_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Granularity::Edit).unwrap(), "\"edit\"");
    }
}
