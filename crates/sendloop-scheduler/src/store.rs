//! File-based job store — one durable JSON document per tenant.
//! Human-readable, and only touched on job changes, never on ticks.
//!
//! Writes are atomic (temp file + rename) so a crash mid-write can never
//! leave a half-written document behind. Reads that fail to parse fall
//! back to an empty collection: availability over strictness.

use std::path::{Path, PathBuf};

use sendloop_core::error::{Result, SendloopError};

use crate::job::Job;

/// Per-tenant job collection on disk.
pub struct JobStore {
    dir: PathBuf,
}

impl JobStore {
    /// Create a store rooted at the tenant's data directory.
    pub fn new(dir: &Path) -> Self {
        std::fs::create_dir_all(dir).ok();
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn file(&self) -> PathBuf {
        self.dir.join("jobs.json")
    }

    /// Load all jobs. Missing or corrupt documents yield an empty list.
    pub fn load(&self) -> Vec<Job> {
        let file = self.file();
        if !file.exists() {
            return Vec::new();
        }
        match std::fs::read_to_string(&file) {
            Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!("⚠️ Failed to parse {}: {e}", file.display());
                Vec::new()
            }),
            Err(e) => {
                tracing::warn!("⚠️ Failed to read {}: {e}", file.display());
                Vec::new()
            }
        }
    }

    /// Save the whole collection atomically: write a temp file, then
    /// rename it over the document.
    pub fn save(&self, jobs: &[Job]) -> Result<()> {
        let file = self.file();
        let tmp = self.dir.join("jobs.json.tmp");
        let json = serde_json::to_string_pretty(jobs)?;
        std::fs::write(&tmp, &json)
            .map_err(|e| SendloopError::store(format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &file)
            .map_err(|e| SendloopError::store(format!("rename {}: {e}", file.display())))?;
        tracing::debug!("💾 Saved {} jobs to {}", jobs.len(), file.display());
        Ok(())
    }

    /// Fetch one job by id.
    pub fn get(&self, id: &str) -> Option<Job> {
        self.load().into_iter().find(|j| j.id == id)
    }

    /// Insert or replace a job.
    pub fn upsert(&self, job: &Job) -> Result<()> {
        let mut jobs = self.load();
        match jobs.iter_mut().find(|j| j.id == job.id) {
            Some(slot) => *slot = job.clone(),
            None => jobs.push(job.clone()),
        }
        self.save(&jobs)
    }

    /// Remove a job by id. Returns whether it existed.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let mut jobs = self.load();
        let before = jobs.len();
        jobs.retain(|j| j.id != id);
        if jobs.len() == before {
            return Ok(false);
        }
        self.save(&jobs)?;
        Ok(true)
    }

    /// Delete the tenant's document and directory (tenant destroy).
    pub fn purge(&self) -> Result<()> {
        if self.dir.exists() {
            std::fs::remove_dir_all(&self.dir)
                .map_err(|e| SendloopError::store(format!("purge {}: {e}", self.dir.display())))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::RepeatPolicy;
    use chrono::Utc;
    use sendloop_core::types::Recipient;

    fn tmp_store(name: &str) -> (JobStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!("sendloop-store-{name}"));
        std::fs::remove_dir_all(&dir).ok();
        (JobStore::new(&dir), dir)
    }

    fn sample_job() -> Job {
        Job::new(
            vec![Recipient::new("addr-a", "hello")],
            Utc::now(),
            RepeatPolicy::Once,
        )
    }

    #[test]
    fn roundtrip_upsert_get_remove() {
        let (store, dir) = tmp_store("roundtrip");
        let job = sample_job();
        store.upsert(&job).unwrap();

        let loaded = store.get(&job.id).unwrap();
        assert_eq!(loaded.recipients, job.recipients);

        assert!(store.remove(&job.id).unwrap());
        assert!(!store.remove(&job.id).unwrap());
        assert!(store.load().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn corrupt_document_loads_empty() {
        let (store, dir) = tmp_store("corrupt");
        std::fs::write(dir.join("jobs.json"), "{not json").unwrap();
        assert!(store.load().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn save_leaves_no_temp_file() {
        let (store, dir) = tmp_store("tmpfile");
        store.save(&[sample_job()]).unwrap();
        assert!(dir.join("jobs.json").exists());
        assert!(!dir.join("jobs.json.tmp").exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn purge_removes_directory() {
        let (store, dir) = tmp_store("purge");
        store.upsert(&sample_job()).unwrap();
        store.purge().unwrap();
        assert!(!dir.exists());
    }
}
