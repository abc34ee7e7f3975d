use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::MultiDbError;
use crate::types::{BoundValue, FieldValues};

/// When a registered compensating action runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CleanupScope {
    /// Never; the registration is dropped.
    Never,
    /// When the current test finishes.
    #[default]
    AfterTest,
    /// When the whole suite finishes.
    AfterSuite,
}

/// What a compensating action does.
#[derive(Debug, Clone, PartialEq)]
pub enum CleanupKind {
    /// Run a raw statement with bound parameters.
    RunSql {
        sql: String,
        params: Vec<BoundValue>,
    },
    /// `DELETE FROM table WHERE criteria`.
    Delete { table: String, criteria: FieldValues },
}

impl CleanupKind {
    #[must_use]
    pub fn run_sql(sql: impl Into<String>, params: Vec<BoundValue>) -> Self {
        CleanupKind::RunSql {
            sql: sql.into(),
            params,
        }
    }

    #[must_use]
    pub fn delete(table: impl Into<String>, criteria: FieldValues) -> Self {
        CleanupKind::Delete {
            table: table.into(),
            criteria,
        }
    }
}

/// A compensating action bound to the connector that was chosen when it was registered.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupAction {
    pub connector: String,
    pub kind: CleanupKind,
}

/// Test-scoped and suite-scoped stacks of pending actions.
#[derive(Debug, Default)]
pub struct CleanupRegistry {
    test: Vec<CleanupAction>,
    suite: Vec<CleanupAction>,
}

impl CleanupRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `action` for `scope`. Returns whether anything was queued.
    pub fn push(&mut self, scope: CleanupScope, action: CleanupAction) -> bool {
        match scope {
            CleanupScope::Never => return false,
            CleanupScope::AfterTest => self.test.push(action),
            CleanupScope::AfterSuite => self.suite.push(action),
        }
        true
    }

    /// Take every action queued for `scope`, most recently registered first.
    pub fn drain(&mut self, scope: CleanupScope) -> Vec<CleanupAction> {
        let stack = match scope {
            CleanupScope::Never => return Vec::new(),
            CleanupScope::AfterTest => &mut self.test,
            CleanupScope::AfterSuite => &mut self.suite,
        };
        let mut drained = std::mem::take(stack);
        drained.reverse();
        drained
    }

    #[must_use]
    pub fn pending(&self, scope: CleanupScope) -> &[CleanupAction] {
        match scope {
            CleanupScope::Never => &[],
            CleanupScope::AfterTest => &self.test,
            CleanupScope::AfterSuite => &self.suite,
        }
    }
}

/// What happened while draining a cleanup stack.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub executed: usize,
    pub failures: Vec<(CleanupAction, MultiDbError)>,
}

impl CleanupReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}
