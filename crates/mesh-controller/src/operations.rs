//! Periodic operations
//!
//! Operations are simpler than tasks: no events, no responses, just a callback at a
//! fixed period. The controller ticks the pool on its own timer, independent from the
//! task scheduler.

use std::path::PathBuf;

use mesh_core::config::ControllerConfig;
use mesh_core::Timestamp;
use tracing::{debug, info, warn};

use crate::db::Database;

// ----------------------------------------------------------------------------
// Operation Trait
// ----------------------------------------------------------------------------

pub trait Operation: Send {
    fn name(&self) -> &'static str;

    /// Period between two runs
    fn interval_ms(&self) -> u64;

    fn run(&mut self, db: &mut Database, config: &ControllerConfig, now: Timestamp);
}

struct Scheduled {
    operation: Box<dyn Operation>,
    next_run: Timestamp,
}

/// Operations with their next due time
#[derive(Default)]
pub struct OperationPool {
    operations: Vec<Scheduled>,
}

impl OperationPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// First run happens one interval after `now`
    pub fn add(&mut self, operation: Box<dyn Operation>, now: Timestamp) {
        debug!(operation = operation.name(), interval_ms = operation.interval_ms(), "operation added");
        let next_run = now + operation.interval_ms();
        self.operations.push(Scheduled { operation, next_run });
    }

    /// Run every due operation; returns how many ran
    pub fn run_due(&mut self, db: &mut Database, config: &ControllerConfig, now: Timestamp) -> usize {
        let mut ran = 0;
        for scheduled in &mut self.operations {
            if now < scheduled.next_run {
                continue;
            }
            scheduled.operation.run(db, config, now);
            scheduled.next_run = now + scheduled.operation.interval_ms();
            ran += 1;
        }
        ran
    }
}

// ----------------------------------------------------------------------------
// Persistent Database Operations
// ----------------------------------------------------------------------------

/// Drops persisted clients that were not seen for too long
pub struct DbAging {
    interval_ms: u64,
}

impl DbAging {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            interval_ms: config.persistent_db.aging_interval_sec * 1000,
        }
    }
}

impl Operation for DbAging {
    fn name(&self) -> &'static str {
        "db_aging"
    }

    fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    fn run(&mut self, db: &mut Database, config: &ControllerConfig, now: Timestamp) {
        let max_age_ms = config.persistent_db.max_client_age_sec * 1000;
        let removed = db.persistent.age(now, max_age_ms);
        if removed > 0 {
            info!(removed, "aged out persistent clients");
        }
    }
}

/// Writes the persistent snapshot when something changed
pub struct DbCommit {
    interval_ms: u64,
    path: Option<PathBuf>,
}

impl DbCommit {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            interval_ms: config.persistent_db.commit_interval_sec * 1000,
            path: config.persistent_db.path.as_ref().map(PathBuf::from),
        }
    }
}

impl Operation for DbCommit {
    fn name(&self) -> &'static str {
        "db_commit"
    }

    fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    fn run(&mut self, db: &mut Database, _config: &ControllerConfig, _now: Timestamp) {
        if !db.persistent.is_dirty() {
            return;
        }
        let Some(path) = &self.path else {
            return;
        };
        match db.persistent.commit(path) {
            Ok(()) => debug!(clients = db.persistent.len(), path = %path.display(), "persistent db committed"),
            Err(e) => warn!(error = %e, "persistent db commit failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::MacAddress;

    use crate::db::PersistentClient;

    #[test]
    fn test_operations_run_at_their_interval() {
        let config = ControllerConfig::testing();
        let mut db = Database::new();
        let mut pool = OperationPool::new();
        pool.add(Box::new(DbAging::new(&config)), Timestamp::new(0));

        assert_eq!(pool.run_due(&mut db, &config, Timestamp::new(500)), 0);
        assert_eq!(pool.run_due(&mut db, &config, Timestamp::new(1_000)), 1);
        assert_eq!(pool.run_due(&mut db, &config, Timestamp::new(1_500)), 0);
        assert_eq!(pool.run_due(&mut db, &config, Timestamp::new(2_000)), 1);
    }

    #[test]
    fn test_aging_drops_old_clients() {
        let mut config = ControllerConfig::testing();
        config.persistent_db.max_client_age_sec = 10;
        let mut db = Database::new();
        db.persistent.upsert(
            PersistentClient {
                mac: MacAddress::new([0x02, 0, 0, 0, 0, 1]),
                name: String::new(),
                last_seen: Timestamp::new(0),
                last_bssid: None,
                btm_supported: false,
            },
            16,
        );

        let mut aging = DbAging::new(&config);
        aging.run(&mut db, &config, Timestamp::new(5_000));
        assert_eq!(db.persistent.len(), 1);
        aging.run(&mut db, &config, Timestamp::new(20_000));
        assert!(db.persistent.is_empty());
    }
}
