use std::ops::{Deref, DerefMut};

use tracing::warn;

use crate::cleanup::CleanupReport;
use crate::error::MultiDbError;
use crate::multidb::MultiDb;

/// Guard around one test's hooks.
///
/// Created by [`MultiDb::test_scope`], which runs `before_test`. Call [`TestScope::finish`]
/// when the test passes. A scope dropped without finishing (an early `?` return or a panic)
/// counts as a failed test: any open transaction is rolled back and the test's cleanup runs.
#[must_use = "dropping the scope immediately ends the test as failed"]
pub struct TestScope<'a> {
    db: &'a mut MultiDb,
    name: String,
    finished: bool,
}

impl MultiDb {
    /// Start a test named `name`.
    ///
    /// # Errors
    /// `LeakedTransaction` if an earlier test left a transaction open.
    pub fn test_scope(&mut self, name: impl Into<String>) -> Result<TestScope<'_>, MultiDbError> {
        let name = name.into();
        self.before_test(&name)?;
        Ok(TestScope {
            db: self,
            name,
            finished: false,
        })
    }
}

impl TestScope<'_> {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// End the test normally, running `after_test`.
    ///
    /// # Errors
    /// `LeakedTransaction` if the test left a transaction open.
    pub fn finish(mut self) -> Result<CleanupReport, MultiDbError> {
        self.finished = true;
        self.db.after_test(&self.name)
    }
}

impl Deref for TestScope<'_> {
    type Target = MultiDb;

    fn deref(&self) -> &MultiDb {
        &*self.db
    }
}

impl DerefMut for TestScope<'_> {
    fn deref_mut(&mut self) -> &mut MultiDb {
        &mut *self.db
    }
}

impl Drop for TestScope<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.db.on_test_failed(&self.name);
        if let Err(err) = self.db.after_test(&self.name) {
            warn!(test = %self.name, error = %err, "cleanup after failed test reported an error");
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::cleanup::{CleanupKind, CleanupScope};
    use crate::config::{ConnectorConfig, MultiDbConfig};
    use crate::error::MultiDbError;
    use crate::multidb::MultiDb;
    use crate::test_utils::RecordingDriver;

    fn engine() -> (MultiDb, RecordingDriver) {
        let driver = RecordingDriver::new();
        let config = MultiDbConfig::new()
            .with_connector("Primary", ConnectorConfig::new("mysql:host=a", "root", ""));
        (MultiDb::with_driver(config, driver.clone()).unwrap(), driver)
    }

    fn register(db: &mut MultiDb, sql: &str) {
        db.register_cleanup(CleanupKind::run_sql(sql, vec![]), CleanupScope::AfterTest)
            .unwrap();
    }

    #[test]
    fn finished_scope_runs_cleanup() {
        let (mut db, driver) = engine();
        let mut scope = db.test_scope("passes").unwrap();
        scope.connect_to("Primary").unwrap();
        register(&mut scope, "DELETE FROM t");
        let report = scope.finish().unwrap();
        assert_eq!(report.executed, 1);
        assert_eq!(driver.sql_log().last().map(String::as_str), Some("DELETE FROM t"));
        assert_eq!(db.current_connector(), None);
    }

    #[test]
    fn dropped_scope_rolls_back_and_cleans_up() {
        let (mut db, driver) = engine();
        {
            let mut scope = db.test_scope("fails").unwrap();
            scope.connect_to("Primary").unwrap();
            register(&mut scope, "DELETE FROM t");
            scope.start_transaction().unwrap();
        }
        assert!(!db.transaction_state().is_active());
        assert_eq!(
            driver.sql_log(),
            vec!["SET time_zone = 'UTC'", "BEGIN", "ROLLBACK", "DELETE FROM t"]
        );
        assert!(db.pending_cleanup(CleanupScope::AfterTest).is_empty());
    }

    #[test]
    fn leaked_transaction_blocks_the_next_scope() {
        let (mut db, _) = engine();
        db.connect_to("Primary").unwrap();
        db.start_transaction().unwrap();
        let err = db.test_scope("next").err().unwrap();
        assert!(matches!(err, MultiDbError::LeakedTransaction { when: "before", .. }));
    }
}
