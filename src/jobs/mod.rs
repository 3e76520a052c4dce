//! Scheduled Jobs
//!
//! Background status maintenance for the roster.
//! The graduation sweep moves students past their school's last grade to
//! Finished and repairs students that were finished too early.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep};

use crate::domain::StudentStatus;
use crate::roster::{Registry, RosterError, School};

/// Operator recorded on writes made by the sweep
pub const SWEEP_OPERATOR: &str = "system";

// =========================================================================
// Graduation Sweep
// =========================================================================

/// Outcome of one pass over the students of a status
#[derive(Debug, Clone, Default)]
pub struct SweepOutcome {
    pub moved: u64,
    /// One entry per student whose update failed
    pub failures: Vec<String>,
}

/// Students whose stored status is `from` and whose grade satisfies `rule`
/// against their school's maximum grade are moved to `to`.
///
/// A failure on one student is logged and recorded; the pass continues.
async fn sweep(
    registry: &Registry,
    from: StudentStatus,
    to: StudentStatus,
    now: DateTime<Utc>,
    rule: fn(u32, u32) -> bool,
) -> Result<SweepOutcome, JobError> {
    let mut schools: HashMap<String, Arc<School>> = HashMap::new();
    let mut outcome = SweepOutcome::default();

    for student in registry.students_by_status(from).await? {
        let school = match schools.get(student.school()) {
            Some(school) => school.clone(),
            None => match registry.school(student.school()).await {
                Ok(school) => {
                    schools.insert(student.school().to_string(), school.clone());
                    school
                }
                Err(err) if err.is_not_found() => {
                    tracing::warn!(student = %student.id(), school = %student.school(), "Student without a school");
                    continue;
                }
                Err(err) => {
                    tracing::error!(student = %student.id(), error = %err, "Failed to load school");
                    outcome.failures.push(format!("student {}: {}", student.id(), err));
                    continue;
                }
            },
        };

        if !rule(student.grade_at(now), school.max_grade().await) {
            continue;
        }
        match school
            .update_student_status(student.id(), to, SWEEP_OPERATOR)
            .await
        {
            Ok(_) => outcome.moved += 1,
            Err(err) => {
                tracing::error!(student = %student.id(), error = %err, "Failed to update student status");
                outcome.failures.push(format!("student {}: {}", student.id(), err));
            }
        }
    }

    Ok(outcome)
}

/// Mark every Active student past its school's maximum grade as Finished
pub async fn graduate_students_at(
    registry: &Registry,
    now: DateTime<Utc>,
) -> Result<SweepOutcome, JobError> {
    let outcome = sweep(
        registry,
        StudentStatus::Active,
        StudentStatus::Finished,
        now,
        |grade, max| grade > max,
    )
    .await?;

    if outcome.moved > 0 {
        tracing::info!(graduated = outcome.moved, "Graduated students");
    }

    Ok(outcome)
}

pub async fn graduate_students(registry: &Registry) -> Result<SweepOutcome, JobError> {
    graduate_students_at(registry, Utc::now()).await
}

/// Reactivate every Finished student still below its school's maximum grade
pub async fn restore_students_at(
    registry: &Registry,
    now: DateTime<Utc>,
) -> Result<SweepOutcome, JobError> {
    let outcome = sweep(
        registry,
        StudentStatus::Finished,
        StudentStatus::Active,
        now,
        |grade, max| grade < max,
    )
    .await?;

    if outcome.moved > 0 {
        tracing::warn!(restored = outcome.moved, "Restored prematurely finished students");
    }

    Ok(outcome)
}

pub async fn restore_students(registry: &Registry) -> Result<SweepOutcome, JobError> {
    restore_students_at(registry, Utc::now()).await
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval between graduation sweeps (default: 1 day)
    pub sweep_interval: Duration,
    /// Delay before the first sweep (default: 5 seconds)
    pub initial_delay: Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(86_400),
            initial_delay: Duration::from_secs(5),
        }
    }
}

/// Job Scheduler - runs the graduation sweep periodically
pub struct JobScheduler {
    registry: Arc<Registry>,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            config: JobSchedulerConfig::default(),
        }
    }

    pub fn with_config(registry: Arc<Registry>, config: JobSchedulerConfig) -> Self {
        Self { registry, config }
    }

    /// Start the job scheduler in the background
    /// Returns a handle that can be used to abort the scheduler
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        tracing::info!(
            interval_secs = self.config.sweep_interval.as_secs(),
            "Job scheduler started"
        );

        sleep(self.config.initial_delay).await;
        let mut sweep_interval = interval(self.config.sweep_interval);

        loop {
            sweep_interval.tick().await;
            let report = self.run_all_once().await;
            for error in &report.errors {
                tracing::error!(error = %error, "Graduation sweep failed");
            }
        }
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> SweepReport {
        self.run_all_at(Utc::now()).await
    }

    pub async fn run_all_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        match graduate_students_at(&self.registry, now).await {
            Ok(outcome) => {
                report.graduated = outcome.moved;
                report.errors.extend(
                    outcome.failures.into_iter().map(|e| format!("Graduation: {}", e)),
                );
            }
            Err(e) => report.errors.push(format!("Graduation: {}", e)),
        }

        match restore_students_at(&self.registry, now).await {
            Ok(outcome) => {
                report.restored = outcome.moved;
                report
                    .errors
                    .extend(outcome.failures.into_iter().map(|e| format!("Restore: {}", e)));
            }
            Err(e) => report.errors.push(format!("Restore: {}", e)),
        }

        report.completed_at = Utc::now();
        report
    }
}

/// Report from running the sweep
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub graduated: u64,
    pub restored: u64,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Roster error: {0}")]
    Roster(#[from] RosterError),
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::{NewSchool, NewStudent};
    use crate::store::{InMemoryStore, Repository};
    use chrono::TimeZone;

    async fn registry_with_school() -> (Arc<Registry>, Arc<School>, InMemoryStore) {
        let store = InMemoryStore::new();
        let registry = Arc::new(Registry::new(Repository::new(Arc::new(store.clone()))));
        let school = registry
            .create_school(NewSchool {
                name: "North".to_string(),
                scene: "north".to_string(),
                entity: "entity-north".to_string(),
                max_grade: 6,
                operator: "admin".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        (registry, school, store)
    }

    async fn enroll(school: &School, name: &str, enrol: &str, status: StudentStatus) -> String {
        let (student, _) = school
            .create_student(NewStudent {
                name: name.to_string(),
                enrol: enrol.to_string(),
                status,
                operator: "admin".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        student.id().to_string()
    }

    #[test]
    fn test_job_scheduler_config_default() {
        let config = JobSchedulerConfig::default();
        assert_eq!(config.sweep_interval, Duration::from_secs(86_400));
        assert_eq!(config.initial_delay, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_graduation_follows_cutover() {
        let (registry, school, _) = registry_with_school().await;
        let id = enroll(&school, "Lin", "2020/9/1", StudentStatus::Active).await;

        let march = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(graduate_students_at(&registry, march).await.unwrap().moved, 0);

        let september = Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap();
        let outcome = graduate_students_at(&registry, september).await.unwrap();
        assert_eq!(outcome.moved, 1);
        assert!(outcome.failures.is_empty());

        let student = registry.student(&id).await.unwrap();
        assert_eq!(student.status(), StudentStatus::Finished);
    }

    #[tokio::test]
    async fn test_restore_reactivates_early_finish() {
        let (registry, school, _) = registry_with_school().await;
        let id = enroll(&school, "Zhou", "2024/9/1", StudentStatus::Finished).await;

        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let scheduler = JobScheduler::new(registry.clone());
        let report = scheduler.run_all_at(now).await;

        assert_eq!(report.graduated, 0);
        assert_eq!(report.restored, 1);
        assert!(report.errors.is_empty());
        assert_eq!(registry.student(&id).await.unwrap().status(), StudentStatus::Active);
    }

    #[tokio::test]
    async fn test_sweep_reports_storage_failures() {
        let (registry, school, store) = registry_with_school().await;
        enroll(&school, "Qian", "2010/9/1", StudentStatus::Active).await;
        store.set_fail_writes(true);

        let report = JobScheduler::new(registry).run_all_once().await;

        assert_eq!(report.graduated, 0);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("Graduation"));
    }

    #[tokio::test]
    async fn test_sweep_continues_past_failed_student() {
        let (registry, school, store) = registry_with_school().await;
        let first = enroll(&school, "Sun", "2010/9/1", StudentStatus::Active).await;
        let second = enroll(&school, "Feng", "2011/9/1", StudentStatus::Active).await;
        store.set_fail_writes(true);

        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let outcome = graduate_students_at(&registry, now).await.unwrap();

        assert_eq!(outcome.moved, 0);
        assert_eq!(outcome.failures.len(), 2);
        assert!(outcome.failures.iter().any(|e| e.contains(&first)));
        assert!(outcome.failures.iter().any(|e| e.contains(&second)));

        store.set_fail_writes(false);
        let outcome = graduate_students_at(&registry, now).await.unwrap();
        assert_eq!(outcome.moved, 2);
        assert!(outcome.failures.is_empty());
    }
}
