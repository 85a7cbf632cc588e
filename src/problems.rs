//! Diagnostic sink for recoverable problems found during optimization.
//!
//! Schema-resolution failures are reported here and the offending node is
//! skipped; the driver stops dequeuing rules once any error is present, and
//! callers must check the sink before trusting the returned plan.

use thiserror::Error;

use crate::model::SelectorName;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProblemKind {
    #[error("the table or view '{0}' does not exist")]
    TableDoesNotExist(SelectorName),
    #[error("the column '{column}' does not exist on the table '{table}'")]
    ColumnDoesNotExist {
        table: SelectorName,
        column: String,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    pub severity: Severity,
    pub kind: ProblemKind,
}

#[derive(Debug, Default)]
pub struct Problems {
    problems: Vec<Problem>,
}

impl Problems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, kind: ProblemKind) {
        self.problems.push(Problem {
            severity: Severity::Error,
            kind,
        });
    }

    pub fn add_warning(&mut self, kind: ProblemKind) {
        self.problems.push(Problem {
            severity: Severity::Warning,
            kind,
        });
    }

    pub fn has_errors(&self) -> bool {
        self.problems
            .iter()
            .any(|p| p.severity == Severity::Error)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Problem> {
        self.problems.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }
}
