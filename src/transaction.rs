//! Nested transaction bookkeeping for a single connector.
//!
//! Only the outermost level issues real statements; inner `start`/`commit` pairs just move the
//! nesting level. A rollback at any depth collapses the whole transaction.

use crate::error::MultiDbError;

/// The physical statement a transition requires, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatement {
    Begin,
    Commit,
    Rollback,
}

impl TxStatement {
    #[must_use]
    pub fn sql(self) -> &'static str {
        match self {
            TxStatement::Begin => "BEGIN",
            TxStatement::Commit => "COMMIT",
            TxStatement::Rollback => "ROLLBACK",
        }
    }
}

/// Nesting level plus the connector that owns the open transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionState {
    level: u32,
    connector: Option<String>,
}

impl TransactionState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn level(&self) -> u32 {
        self.level
    }

    #[must_use]
    pub fn connector(&self) -> Option<&str> {
        self.connector.as_deref()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.level > 0
    }

    /// The owner is set exactly when the level is positive, and matches the chosen connector.
    ///
    /// # Errors
    /// Returns the fatal `MultiDbError::InvalidTransactionState` on violation.
    pub fn check(&self, current_connector: Option<&str>) -> Result<(), MultiDbError> {
        let consistent = match &self.connector {
            Some(owner) => self.level > 0 && current_connector == Some(owner.as_str()),
            None => self.level == 0,
        };
        if consistent {
            Ok(())
        } else {
            Err(MultiDbError::InvalidTransactionState {
                level: self.level,
                connector: self.connector.clone().unwrap_or_default(),
            })
        }
    }

    /// Whether `connector` may become the chosen connector.
    ///
    /// # Errors
    /// Returns `MultiDbError::UsageError` if a transaction is open on another connector.
    pub fn ensure_can_switch(&self, connector: &str) -> Result<(), MultiDbError> {
        match &self.connector {
            Some(owner) if self.level > 0 && owner != connector => {
                Err(MultiDbError::UsageError(format!(
                    "Cannot switch connector while a transaction is in progress on another connector '{owner}'"
                )))
            }
            _ => Ok(()),
        }
    }

    /// Open a transaction on `current_connector`, or nest one level deeper.
    ///
    /// # Errors
    /// Returns `MultiDbError::UsageError` if no connector is chosen, or the fatal
    /// `InvalidTransactionState` if the bookkeeping is inconsistent.
    pub fn start(&mut self, current_connector: Option<&str>) -> Result<Option<TxStatement>, MultiDbError> {
        self.check(current_connector)?;
        if self.level == 0 {
            let Some(connector) = current_connector else {
                return Err(MultiDbError::UsageError(
                    "No connector was chosen before starting a transaction".into(),
                ));
            };
            self.level = 1;
            self.connector = Some(connector.to_string());
            Ok(Some(TxStatement::Begin))
        } else {
            self.level += 1;
            Ok(None)
        }
    }

    /// Leave one nesting level; the outermost commit returns `Commit`.
    ///
    /// # Errors
    /// Returns `MultiDbError::UsageError` when no transaction is open.
    pub fn commit(&mut self, current_connector: Option<&str>) -> Result<Option<TxStatement>, MultiDbError> {
        self.check(current_connector)?;
        match self.level {
            0 => Err(no_transaction()),
            1 => {
                self.reset();
                Ok(Some(TxStatement::Commit))
            }
            _ => {
                self.level -= 1;
                Ok(None)
            }
        }
    }

    /// Collapse every nesting level at once.
    ///
    /// # Errors
    /// Returns `MultiDbError::UsageError` when no transaction is open.
    pub fn rollback(&mut self, current_connector: Option<&str>) -> Result<TxStatement, MultiDbError> {
        self.check(current_connector)?;
        if self.level == 0 {
            return Err(no_transaction());
        }
        self.reset();
        Ok(TxStatement::Rollback)
    }

    pub(crate) fn reset(&mut self) {
        self.level = 0;
        self.connector = None;
    }
}

fn no_transaction() -> MultiDbError {
    MultiDbError::UsageError("Invalid call sequence; no transaction in progress".into())
}

/// Result of running a block under a transaction.
///
/// `RolledBack` is only produced after the rollback was issued.
#[derive(Debug)]
#[must_use]
pub enum TxOutcome<T, E = MultiDbError> {
    Committed(T),
    RolledBack(E),
}

impl<T, E> TxOutcome<T, E> {
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, TxOutcome::Committed(_))
    }

    /// Turn the outcome back into a plain `Result`.
    ///
    /// # Errors
    /// Returns the block's error if the transaction was rolled back.
    pub fn into_result(self) -> Result<T, E> {
        match self {
            TxOutcome::Committed(value) => Ok(value),
            TxOutcome::RolledBack(err) => Err(err),
        }
    }
}
