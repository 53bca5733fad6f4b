//! Crash recovery testing.
//!
//! A crash leaves the log with a torn tail: some prefix of the last batch
//! reached the disk and the rest did not. These helpers produce such logs
//! by cutting a real log at arbitrary points, and check that reopening
//! keeps exactly the transactions whose commit record survived.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use objdb_testkit::crash::CrashRecoveryHarness;
//!
//! let mut harness = CrashRecoveryHarness::new();
//! let report = harness.cut_last_batch_at(5);
//! assert!(report.passed);
//! ```

use crate::fixtures::{Person, TestInstance};
use objdb_core::log_file;
use std::fs::OpenOptions;
use std::path::Path;

/// Result of a crash recovery check.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether recovery kept exactly the committed people.
    pub passed: bool,
    /// What was simulated.
    pub description: String,
    /// People expected after recovery.
    pub expected: usize,
    /// People found after recovery.
    pub actual: usize,
}

/// Runs crash simulations against one native instance.
pub struct CrashRecoveryHarness {
    test: TestInstance,
    durable: Vec<Person>,
}

impl CrashRecoveryHarness {
    /// A harness whose instance holds two committed people.
    pub fn new() -> Self {
        let test = TestInstance::native();
        test.insert_people(&[Person::new("ada", 36), Person::new("alan", 41)]);
        let durable = test.people();
        Self { test, durable }
    }

    /// Commits one more batch, then cuts the log `keep` bytes into that
    /// batch and reopens.
    pub fn cut_last_batch_at(&mut self, keep: u64) -> CrashRecoveryResult {
        let before = self.test.log_size().expect("log size");
        self.test.insert_people(&[Person::new("grace", 85), Person::new("edsger", 72)]);
        let after = self.test.log_size().expect("log size");
        assert!(keep < after - before, "cut must fall inside the last batch");

        self.test
            .reopen_after(|dir| truncate(&log_file(dir), before + keep));
        self.check(&format!("log cut {keep} bytes into the last batch"))
    }

    /// Writes `garbage` after the last commit and reopens.
    pub fn append_garbage(&mut self, garbage: &[u8]) -> CrashRecoveryResult {
        self.test.reopen_after(|dir| {
            let mut file = OpenOptions::new()
                .append(true)
                .open(log_file(dir))
                .expect("Failed to open log");
            std::io::Write::write_all(&mut file, garbage).expect("Failed to write");
        });
        self.check(&format!("{} garbage bytes after the last commit", garbage.len()))
    }

    /// Leaves a half-written compaction output behind and reopens.
    pub fn abandoned_compaction(&mut self) -> CrashRecoveryResult {
        self.test.reopen_after(|dir| {
            let leftover = compact_file(dir);
            std::fs::write(&leftover, b"partial").expect("Failed to write");
        });
        let path = self.test.path().expect("native instance");
        assert!(!compact_file(&path).exists(), "leftover compaction output was kept");
        self.check("abandoned compaction output")
    }

    /// The instance under test.
    pub fn instance(&self) -> &TestInstance {
        &self.test
    }

    fn check(&self, description: &str) -> CrashRecoveryResult {
        let people = self.test.people();
        CrashRecoveryResult {
            passed: people == self.durable,
            description: description.to_string(),
            expected: self.durable.len(),
            actual: people.len(),
        }
    }
}

impl Default for CrashRecoveryHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn compact_file(dir: &Path) -> std::path::PathBuf {
    let mut name = log_file(dir).into_os_string();
    name.push(".compact");
    name.into()
}

/// Shortens the file at `path` to `len` bytes.
pub fn truncate(path: &Path, len: u64) {
    OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|file| file.set_len(len))
        .expect("Failed to truncate");
}

/// Flips every bit of the byte at `offset` of the file at `path`.
pub fn flip_byte(path: &Path, offset: u64) {
    let mut bytes = std::fs::read(path).expect("Failed to read");
    let index = usize::try_from(offset).expect("offset fits");
    bytes[index] ^= 0xFF;
    std::fs::write(path, bytes).expect("Failed to write");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::people_schema;
    use objdb_core::{CoreError, Instance, InstanceConfig, StorageKind};
    use proptest::prelude::*;

    #[test]
    fn torn_batches_are_discarded() {
        for keep in [0, 1, 7, 20, 40] {
            let mut harness = CrashRecoveryHarness::new();
            let result = harness.cut_last_batch_at(keep);
            assert!(result.passed, "{result:?}");
        }
    }

    #[test]
    fn recovery_truncates_the_torn_tail() {
        let mut harness = CrashRecoveryHarness::new();
        let clean = harness.instance().log_size().unwrap();
        let result = harness.append_garbage(&[0x4F, 0x42, 0x00, 0x01]);
        assert!(result.passed, "{result:?}");
        assert_eq!(harness.instance().log_size().unwrap(), clean);

        // New commits land after the surviving prefix.
        harness.instance().insert_people(&[Person::new("barbara", 80)]);
        assert_eq!(harness.instance().people().len(), 3);
    }

    #[test]
    fn abandoned_compaction_is_ignored() {
        let mut harness = CrashRecoveryHarness::new();
        let result = harness.abandoned_compaction();
        assert!(result.passed, "{result:?}");
    }

    #[test]
    fn damage_before_the_tail_fails_open() {
        let test = TestInstance::native();
        test.insert_people(&[Person::new("ada", 36)]);
        test.insert_people(&[Person::new("alan", 41)]);
        let dir = test.path().unwrap();
        let parent = test.parent_dir().unwrap().to_path_buf();
        test.instance.close(false).unwrap();

        flip_byte(&log_file(&dir), 12);
        let config = InstanceConfig::new("test", parent, StorageKind::Native);
        let err = Instance::open(crate::next_instance_id(), people_schema(), config).unwrap_err();
        assert!(matches!(err, CoreError::Corrupted { .. }), "{err:?}");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn any_cut_inside_the_last_batch_recovers(keep in 0u64..48) {
            let mut harness = CrashRecoveryHarness::new();
            let result = harness.cut_last_batch_at(keep);
            prop_assert!(result.passed, "{:?}", result);
        }
    }
}
