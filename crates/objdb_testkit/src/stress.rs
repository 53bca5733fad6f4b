//! Stress tests for objdb.
//!
//! These tests verify behavior under heavy load and concurrent access.

use crate::fixtures::{Person, AGE};
use crate::oracle::insert_people;
use objdb_core::{CoreResult, Filter, Instance};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent reader threads.
    pub threads: usize,
    /// Length of generated names in bytes.
    pub name_len: usize,
    /// Number of people to populate before reading.
    pub entity_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            name_len: 32,
            entity_count: 1_000,
        }
    }
}

fn person(config: &StressConfig, i: usize) -> Person {
    let mut name = format!("p{i}-");
    while name.len() < config.name_len {
        name.push('x');
    }
    Person::new(&name, (i % 90) as i32)
}

fn commit_people(db: &Instance, people: &[Person]) -> CoreResult<Vec<i64>> {
    let mut txn = db.begin_txn(true)?;
    match insert_people(db, &mut txn, people) {
        Ok(ids) => {
            db.commit_txn(txn)?;
            Ok(ids)
        }
        Err(err) => {
            db.abort_txn(txn)?;
            Err(err)
        }
    }
}

fn populate(db: &Instance, config: &StressConfig) -> Vec<i64> {
    let people: Vec<Person> = (0..config.entity_count).map(|i| person(config, i)).collect();
    commit_people(db, &people).unwrap_or_default()
}

/// Run a sequential insert stress test, one transaction per person.
pub fn stress_sequential_inserts(db: &Instance, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        match commit_people(db, &[person(config, i)]) {
            Ok(_) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a point read stress test.
pub fn stress_point_reads(db: &Instance, config: &StressConfig) -> StressTestResult {
    let ids = populate(db, config);

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    let Ok(txn) = db.begin_txn(false) else {
        return StressTestResult::new(0, config.operations, start.elapsed());
    };
    for i in 0..config.operations {
        let id = ids.get(i % ids.len().max(1)).copied().unwrap_or(0);
        match db.get(&txn, 0, id) {
            Ok(Some(_)) => successful += 1,
            Ok(None) | Err(_) => failed += 1,
        }
    }
    let _ = db.abort_txn(txn);

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a mixed insert/read/delete stress test.
pub fn stress_mixed_operations(db: &Instance, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;
    let mut live: Vec<i64> = Vec::new();

    for i in 0..config.operations {
        let result = if i % 3 == 0 || live.is_empty() {
            commit_people(db, &[person(config, i)]).map(|ids| live.extend(ids))
        } else if i % 3 == 1 {
            let id = live[i % live.len()];
            db.begin_txn(false).and_then(|txn| {
                let found = db.get(&txn, 0, id).map(|o| o.is_some());
                db.abort_txn(txn)?;
                found.map(|found| assert!(found, "live object {id} was not found"))
            })
        } else {
            let id = live.swap_remove(i % live.len());
            db.begin_txn(true).and_then(|mut txn| {
                db.delete(&mut txn, 0, id)?;
                db.commit_txn(txn)
            })
        };

        match result {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run concurrent readers against a committing writer.
///
/// Each read runs a filtered count and a full cursor scan in the same
/// transaction; a torn snapshot shows up as a disagreement and is counted
/// as a failure.
pub fn stress_concurrent_readers(db: &Instance, config: &StressConfig) -> StressTestResult {
    populate(db, config);

    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let reads_per_thread = config.operations / config.threads.max(1);
    let Ok(older) = db.query(0).and_then(|mut builder| {
        builder.set_filter(Filter::greater_or_equal(AGE, 45));
        builder.build()
    }) else {
        return StressTestResult::new(0, config.operations, Duration::ZERO);
    };

    let start = Instant::now();
    thread::scope(|scope| {
        scope.spawn(|| {
            for i in 0..reads_per_thread {
                let _ = commit_people(db, &[person(config, config.entity_count + i)]);
            }
        });

        for _ in 0..config.threads {
            scope.spawn(|| {
                for _ in 0..reads_per_thread {
                    let consistent = db.begin_txn(false).and_then(|txn| {
                        let count = db.count(&txn, 0)?;
                        let older_count = db
                            .cursor(&txn, &older, 0, None)?
                            .collect::<CoreResult<Vec<_>>>()?
                            .len();
                        let scanned = db.export_json(&txn, 0)?;
                        let again = db.count(&txn, 0)?;
                        db.abort_txn(txn)?;
                        let people: Vec<Person> =
                            serde_json::from_str(&scanned).unwrap_or_default();
                        let expected_older =
                            people.iter().filter(|p| p.age.is_some_and(|a| a >= 45)).count();
                        Ok(count == again
                            && people.len() == count as usize
                            && older_count == expected_older)
                    });
                    match consistent {
                        Ok(true) => successful.fetch_add(1, Ordering::Relaxed),
                        Ok(false) | Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            });
        }
    });

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Run a transaction abort stress test. Every other transaction is
/// aborted and counted as failed.
pub fn stress_transaction_aborts(db: &Instance, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let should_abort = i % 2 == 0;
        let result = db.begin_txn(true).and_then(|mut txn| {
            insert_people(db, &mut txn, &[person(config, i)])?;
            if should_abort {
                db.abort_txn(txn)?;
                Ok(false)
            } else {
                db.commit_txn(txn)?;
                Ok(true)
            }
        });

        match result {
            Ok(true) => successful += 1,
            Ok(false) | Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a large transaction stress test, 100 people per transaction.
pub fn stress_large_transactions(db: &Instance, config: &StressConfig) -> StressTestResult {
    let batch_size = 100;

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for batch in 0..(config.operations / batch_size) {
        let people: Vec<Person> = (0..batch_size)
            .map(|i| person(config, batch * batch_size + i))
            .collect();
        match commit_people(db, &people) {
            Ok(_) => successful += batch_size,
            Err(_) => failed += batch_size,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestInstance;

    #[test]
    fn test_sequential_inserts() {
        let test = TestInstance::memory();
        let config = StressConfig {
            operations: 1_000,
            name_len: 8,
            ..Default::default()
        };

        let result = stress_sequential_inserts(&test, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 1_000);
        assert_eq!(test.people().len(), 1_000);
    }

    #[test]
    fn test_point_reads() {
        let test = TestInstance::memory();
        let config = StressConfig {
            operations: 1_000,
            entity_count: 100,
            name_len: 8,
            ..Default::default()
        };

        let result = stress_point_reads(&test, &config);
        assert_eq!(result.failed_ops, 0);
    }

    #[test]
    fn test_mixed_operations() {
        let test = TestInstance::memory();
        let config = StressConfig {
            operations: 1_000,
            name_len: 8,
            ..Default::default()
        };

        let result = stress_mixed_operations(&test, &config);
        assert_eq!(result.failed_ops, 0);
    }

    #[test]
    fn test_concurrent_readers() {
        let test = TestInstance::memory();
        let config = StressConfig {
            operations: 200,
            threads: 4,
            entity_count: 100,
            name_len: 8,
        };

        let result = stress_concurrent_readers(&test, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(test.people().len(), 150);
    }

    #[test]
    fn test_transaction_aborts() {
        let test = TestInstance::memory();
        let config = StressConfig {
            operations: 100,
            name_len: 8,
            ..Default::default()
        };

        let result = stress_transaction_aborts(&test, &config);
        assert_eq!(result.successful_ops, 50);
        assert_eq!(result.failed_ops, 50);
        assert_eq!(test.people().len(), 50);
    }

    #[test]
    fn test_large_transactions_on_disk() {
        let test = TestInstance::native();
        let config = StressConfig {
            operations: 1_000,
            name_len: 8,
            ..Default::default()
        };

        let result = stress_large_transactions(&test, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(test.people().len(), 1_000);
    }
}
