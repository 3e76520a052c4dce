//! Schedule aggregate
//!
//! A dated session of a lesson with a registration window and an optional
//! capacity. Schedules start Frozen and are published explicitly.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::error::{require, RosterError, RosterResult};
use crate::domain::{parse_schedule_date, RecordMeta, ScheduleRecord, ScheduleStatus};
use crate::store::{Filter, Repository};

/// Fields accepted when creating a schedule
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewSchedule {
    pub lesson: String,
    pub place: String,
    /// `YYYY-MM-DD`
    pub date: String,
    pub times: String,
    pub limit_min: u32,
    pub limit_max: u32,
    pub teachers: Vec<String>,
    pub operator: String,
}

#[derive(Debug, Clone)]
pub struct Schedule {
    record: ScheduleRecord,
    repo: Repository,
}

impl Schedule {
    pub fn from_record(record: ScheduleRecord, repo: Repository) -> Self {
        Self { record, repo }
    }

    pub async fn create(repo: &Repository, scene: &str, request: NewSchedule) -> RosterResult<Self> {
        require(scene, "scene")?;
        let date = parse_schedule_date(&request.date)?;
        let mut record = ScheduleRecord {
            meta: RecordMeta::created_by(request.operator),
            scene: scene.to_string(),
            lesson: request.lesson,
            place: request.place,
            date: date.format("%Y-%m-%d").to_string(),
            times: request.times,
            limit_min: request.limit_min,
            limit_max: request.limit_max,
            status: ScheduleStatus::Frozen,
            teachers: request.teachers,
            ..Default::default()
        };
        repo.create(&mut record).await?;
        info!(schedule = %record.meta.id, %scene, date = %record.date, "Schedule created");
        Ok(Self::from_record(record, repo.clone()))
    }

    pub async fn load(repo: &Repository, id: &str) -> RosterResult<Self> {
        require(id, "schedule id")?;
        let record = repo.get::<ScheduleRecord>(id).await?;
        Ok(Self::from_record(record, repo.clone()))
    }

    pub async fn find(repo: &Repository, filter: &Filter) -> RosterResult<Vec<Self>> {
        Ok(repo
            .find::<ScheduleRecord>(filter)
            .await?
            .into_iter()
            .map(|record| Self::from_record(record, repo.clone()))
            .collect())
    }

    /// Schedules of `scene` dated within `from..=to`
    pub async fn between(
        repo: &Repository,
        scene: &str,
        from: &str,
        to: &str,
    ) -> RosterResult<Vec<Self>> {
        let from = parse_schedule_date(from)?;
        let to = parse_schedule_date(to)?;
        let all = Self::find(repo, &Filter::by("scene", scene)).await?;
        Ok(all
            .into_iter()
            .filter(|s| s.date().map(|d| d >= from && d <= to).unwrap_or(false))
            .collect())
    }

    pub fn record(&self) -> &ScheduleRecord {
        &self.record
    }

    pub fn into_record(self) -> ScheduleRecord {
        self.record
    }

    pub fn id(&self) -> &str {
        &self.record.meta.id
    }

    pub fn date(&self) -> Option<NaiveDate> {
        parse_schedule_date(&self.record.date).ok()
    }

    fn touch(&mut self, operator: &str, now: DateTime<Utc>) {
        self.record.meta.operator = operator.to_string();
        self.record.meta.updated_at = now;
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn update_info(
        &mut self,
        lesson: &str,
        place: &str,
        times: &str,
        limit_max: u32,
        limit_min: u32,
        teachers: Vec<String>,
        operator: &str,
    ) -> RosterResult<()> {
        let now = self
            .repo
            .update::<ScheduleRecord>(
                self.id(),
                operator,
                json!({
                    "lesson": lesson,
                    "place": place,
                    "times": times,
                    "limit_max": limit_max,
                    "limit_min": limit_min,
                    "teachers": teachers,
                }),
            )
            .await?;
        self.record.lesson = lesson.to_string();
        self.record.place = place.to_string();
        self.record.times = times.to_string();
        self.record.limit_max = limit_max;
        self.record.limit_min = limit_min;
        self.record.teachers = teachers;
        self.touch(operator, now);
        Ok(())
    }

    pub async fn update_tags(&mut self, tags: Vec<String>, operator: &str) -> RosterResult<()> {
        let now = self
            .repo
            .update::<ScheduleRecord>(self.id(), operator, json!({ "tags": tags }))
            .await?;
        self.record.tags = tags;
        self.touch(operator, now);
        Ok(())
    }

    /// Set the registration window and publication state
    pub async fn update_status(
        &mut self,
        start_time: u64,
        end_time: u64,
        status: ScheduleStatus,
        operator: &str,
    ) -> RosterResult<()> {
        if end_time < start_time {
            return Err(RosterError::validation("registration ends before it starts"));
        }
        let now = self
            .repo
            .update::<ScheduleRecord>(
                self.id(),
                operator,
                json!({ "start_time": start_time, "end_time": end_time, "status": status }),
            )
            .await?;
        self.record.start_time = start_time;
        self.record.end_time = end_time;
        self.record.status = status;
        self.touch(operator, now);
        Ok(())
    }

    /// Register users; already registered users are skipped
    pub async fn append_users(&mut self, users: &[String], operator: &str) -> RosterResult<()> {
        let mut merged = self.record.users.clone();
        for user in users {
            if !user.is_empty() && !merged.contains(user) {
                merged.push(user.clone());
            }
        }
        if merged.len() == self.record.users.len() {
            return Ok(());
        }
        if self.record.limit_max > 0 && merged.len() > self.record.limit_max as usize {
            warn!(schedule = %self.id(), "Schedule is full");
            return Err(RosterError::conflict(format!(
                "schedule {} allows at most {} users",
                self.id(),
                self.record.limit_max
            )));
        }
        self.write_users(merged, operator).await
    }

    pub async fn subtract_users(&mut self, users: &[String], operator: &str) -> RosterResult<()> {
        let remaining: Vec<String> = self
            .record
            .users
            .iter()
            .filter(|u| !users.contains(u))
            .cloned()
            .collect();
        if remaining.len() == self.record.users.len() {
            return Ok(());
        }
        self.write_users(remaining, operator).await
    }

    async fn write_users(&mut self, users: Vec<String>, operator: &str) -> RosterResult<()> {
        let now = self
            .repo
            .update::<ScheduleRecord>(self.id(), operator, json!({ "users": users }))
            .await?;
        self.record.users = users;
        self.touch(operator, now);
        Ok(())
    }

    pub async fn remove(&mut self, operator: &str) -> RosterResult<()> {
        self.repo.remove::<ScheduleRecord>(self.id(), operator).await?;
        let now = Utc::now();
        self.record.meta.deleted_at = Some(now);
        self.touch(operator, now);
        Ok(())
    }
}
