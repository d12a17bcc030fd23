//! Query builders for batched, parameterized table mutations.
//!
//! Every statement binds its values through named parameters drawn from a
//! process-wide [`ParameterGenerator`], so any number of statements can be
//! combined into one [`Command`] without two of them ever sharing a
//! parameter name.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use appvirt_core::{ActionType, DatabaseAction, Row, TableRow};

use crate::error::{Result, StoreError};

static PARAMETER_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Source of globally unique `@paramN` parameter names.
pub struct ParameterGenerator;

impl ParameterGenerator {
    pub fn next_name() -> String {
        format!("@param{}", PARAMETER_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// The mutation a [`Statement`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl From<ActionType> for Operation {
    fn from(action_type: ActionType) -> Self {
        match action_type {
            ActionType::Set => Operation::Insert,
            ActionType::Update => Operation::Update,
            ActionType::Remove => Operation::Delete,
        }
    }
}

/// One parameterized SQL statement, together with the row it was built
/// from so non-SQL backends can apply it directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    operation: Operation,
    sql: String,
    parameters: Vec<(String, String)>,
    row: Row,
}

impl Statement {
    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// `(name, value)` bindings, in the order they appear in the SQL.
    pub fn parameters(&self) -> &[(String, String)] {
        &self.parameters
    }

    pub fn row(&self) -> &Row {
        &self.row
    }
}

/// An ordered batch of statements committed as one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    statements: Vec<Statement>,
}

impl Command {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, statement: Statement) {
        self.statements.push(statement);
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

impl fmt::Display for Command {
    /// The multi-statement SQL text of the batch.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for statement in &self.statements {
            writeln!(f, "{};", statement.sql)?;
        }
        Ok(())
    }
}

/// Builds statements against one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryBuilder {
    table: String,
}

impl QueryBuilder {
    pub fn new(table: &str) -> Result<Self> {
        let mut chars = table.chars();
        let valid = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(StoreError::InvalidTableName {
                name: table.to_string(),
            });
        }
        Ok(Self {
            table: table.to_string(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn create_table(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\"key\" TEXT PRIMARY KEY NOT NULL, \"value\" TEXT NOT NULL, \"kind\" TEXT NOT NULL)",
            self.table
        )
    }

    pub fn select_all(&self) -> String {
        format!(
            "SELECT \"key\", \"value\", \"kind\" FROM {} ORDER BY \"key\"",
            self.table
        )
    }

    pub fn insert(&self, row: Row) -> Statement {
        let (key, value, kind) = (
            ParameterGenerator::next_name(),
            ParameterGenerator::next_name(),
            ParameterGenerator::next_name(),
        );
        Statement {
            operation: Operation::Insert,
            sql: format!(
                "INSERT OR REPLACE INTO {} (\"key\", \"value\", \"kind\") VALUES ({}, {}, {})",
                self.table, key, value, kind
            ),
            parameters: vec![
                (key, row.key.clone()),
                (value, row.value.clone()),
                (kind, row.kind.clone()),
            ],
            row,
        }
    }

    pub fn update(&self, row: Row) -> Statement {
        let (value, kind, key) = (
            ParameterGenerator::next_name(),
            ParameterGenerator::next_name(),
            ParameterGenerator::next_name(),
        );
        Statement {
            operation: Operation::Update,
            sql: format!(
                "UPDATE {} SET \"value\" = {}, \"kind\" = {} WHERE \"key\" = {}",
                self.table, value, kind, key
            ),
            parameters: vec![
                (value, row.value.clone()),
                (kind, row.kind.clone()),
                (key, row.key.clone()),
            ],
            row,
        }
    }

    pub fn delete(&self, row: Row) -> Statement {
        let key = ParameterGenerator::next_name();
        Statement {
            operation: Operation::Delete,
            sql: format!("DELETE FROM {} WHERE \"key\" = {}", self.table, key),
            parameters: vec![(key, row.key.clone())],
            row,
        }
    }

    /// The statement that applies `action` to this table.
    pub fn for_action<T: TableRow>(&self, action: &DatabaseAction<T>) -> Result<Statement> {
        let row = action.item().to_row()?;
        Ok(match Operation::from(action.action_type()) {
            Operation::Insert => self.insert(row),
            Operation::Update => self.update(row),
            Operation::Delete => self.delete(row),
        })
    }
}
