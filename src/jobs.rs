use crate::error::{FoundryError, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildJob {
    pub id: Uuid,
    pub device_id: String,
    pub build_system: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl BuildJob {
    fn new(device_id: String, build_system: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id,
            build_system,
            status: JobStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    pub fn complete(&mut self) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: String) {
        self.status = JobStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error);
    }
}

/// Ledger of builds. At most one build per device is running at a time.
#[derive(Clone, Default)]
pub struct JobManager {
    jobs: Arc<RwLock<HashMap<Uuid, BuildJob>>>,
}

impl JobManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a running build for `device_id`, refusing if one is active.
    pub fn begin(&self, device_id: &str, build_system: &str) -> Result<Uuid> {
        let mut jobs = self.jobs.write();
        let busy = jobs
            .values()
            .any(|job| job.status == JobStatus::Running && job.device_id == device_id);
        if busy {
            return Err(FoundryError::BuildInProgress(device_id.to_string()));
        }

        let job = BuildJob::new(device_id.to_string(), build_system.to_string());
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    pub fn get_job(&self, job_id: &Uuid) -> Option<BuildJob> {
        self.jobs.read().get(job_id).cloned()
    }

    pub fn update_job<F>(&self, job_id: &Uuid, update_fn: F) -> Result<()>
    where
        F: FnOnce(&mut BuildJob),
    {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(job_id) {
            Some(job) => {
                update_fn(job);
                Ok(())
            }
            None => Err(FoundryError::UnknownJob(*job_id)),
        }
    }

    pub fn complete(&self, job_id: &Uuid) -> Result<()> {
        self.update_job(job_id, |job| job.complete())
    }

    pub fn fail(&self, job_id: &Uuid, error: impl Into<String>) -> Result<()> {
        let error = error.into();
        self.update_job(job_id, move |job| job.fail(error))
    }

    pub fn active_job(&self, device_id: &str) -> Option<BuildJob> {
        self.jobs
            .read()
            .values()
            .find(|job| job.status == JobStatus::Running && job.device_id == device_id)
            .cloned()
    }

    pub fn list_jobs(&self) -> Vec<BuildJob> {
        self.jobs.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_build_for_device_is_refused() {
        let jobs = JobManager::new();
        let first = jobs.begin("local", "make").unwrap();

        let err = jobs.begin("local", "make").unwrap_err();
        assert!(matches!(err, FoundryError::BuildInProgress(ref d) if d == "local"));

        // Other devices are independent.
        assert!(jobs.begin("phone", "make").is_ok());

        jobs.complete(&first).unwrap();
        assert!(jobs.begin("local", "make").is_ok());
    }

    #[test]
    fn test_fail_records_error() {
        let jobs = JobManager::new();
        let id = jobs.begin("local", "cmake").unwrap();
        jobs.fail(&id, "exit 2").unwrap();

        let job = jobs.get_job(&id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("exit 2"));
        assert!(job.completed_at.is_some());
        assert!(jobs.active_job("local").is_none());
    }

    #[test]
    fn test_unknown_job() {
        let jobs = JobManager::new();
        let id = Uuid::new_v4();
        assert!(matches!(jobs.complete(&id), Err(FoundryError::UnknownJob(_))));
    }
}
