//! Per-job exclusive lock
//!
//! Two processes crawling the same job would double-fetch and race each
//! other's transitions, so a run holds an OS file lock for its whole life.

use crate::ArchiveError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Held for the duration of a run; released on drop
#[derive(Debug)]
pub struct JobLock {
    file: File,
    path: PathBuf,
}

impl JobLock {
    /// Takes the lock for `job_id` inside `lock_dir` without blocking
    ///
    /// # Arguments
    ///
    /// * `lock_dir` - Directory holding the lock files (the database's directory)
    /// * `job_id` - The job to lock
    ///
    /// # Returns
    ///
    /// * `Ok(JobLock)` - The lock is held until the value is dropped
    /// * `Err(ArchiveError::JobLocked)` - Another process is running this job
    pub fn acquire(lock_dir: &Path, job_id: &str) -> Result<Self, ArchiveError> {
        std::fs::create_dir_all(lock_dir)?;
        let path = lock_dir.join(format!("{}.lock", job_id));

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                return Err(ArchiveError::JobLocked {
                    job_id: job_id.to_string(),
                });
            }
            return Err(e.into());
        }

        tracing::debug!("Acquired lock {}", path.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for JobLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_lock_is_refused() {
        let dir = tempfile::tempdir().unwrap();

        let held = JobLock::acquire(dir.path(), "forum-14").unwrap();
        assert!(held.path().ends_with("forum-14.lock"));

        let second = JobLock::acquire(dir.path(), "forum-14");
        assert!(matches!(second, Err(ArchiveError::JobLocked { .. })));
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();

        drop(JobLock::acquire(dir.path(), "forum-14").unwrap());
        assert!(JobLock::acquire(dir.path(), "forum-14").is_ok());
    }

    #[test]
    fn test_jobs_lock_independently() {
        let dir = tempfile::tempdir().unwrap();

        let _a = JobLock::acquire(dir.path(), "a").unwrap();
        assert!(JobLock::acquire(dir.path(), "b").is_ok());
    }
}
