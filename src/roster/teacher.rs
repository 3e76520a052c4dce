//! Teacher aggregate and directory
//!
//! Teachers can belong to several schools over time, so every `Teacher` is
//! shared as `Arc<Teacher>` and guards its record with its own lock. The
//! [`TeacherDirectory`] is the flat, append-only teacher cache shared by the
//! registry and every school.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::error::{require, RosterError, RosterResult};
use crate::domain::{paginate, HistoryInfo, Page, RecordMeta, TeacherRecord};
use crate::store::{ArrayMatcher, Filter, Repository};

/// Shared teacher aggregate
#[derive(Debug)]
pub struct Teacher {
    id: String,
    repo: Repository,
    record: RwLock<TeacherRecord>,
}

impl Teacher {
    pub fn from_record(record: TeacherRecord, repo: Repository) -> Self {
        Self {
            id: record.meta.id.clone(),
            repo,
            record: RwLock::new(record),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Copy of the current record
    pub async fn snapshot(&self) -> TeacherRecord {
        self.record.read().await.clone()
    }

    pub async fn name(&self) -> String {
        self.record.read().await.name.clone()
    }

    /// False once the teacher has left `school`
    pub async fn is_active(&self, school: &str) -> bool {
        !self
            .record
            .read()
            .await
            .histories
            .iter()
            .any(|h| h.school == school)
    }

    pub async fn had_class(&self, class: &str) -> bool {
        self.record.read().await.classes.iter().any(|c| c == class)
    }

    pub async fn had_subject(&self, subject: &str) -> bool {
        self.record.read().await.subjects.iter().any(|s| s == subject)
    }

    /// Record that the teacher left `school`
    pub async fn leave(&self, school: &str, remark: &str) -> RosterResult<HistoryInfo> {
        require(school, "school")?;
        let mut record = self.record.write().await;
        let history = HistoryInfo {
            id: format!("{}-{}", self.id, record.histories.len() + 1),
            school: school.to_string(),
            remark: remark.to_string(),
            created_at: Utc::now(),
        };
        self.repo
            .push::<TeacherRecord>(&self.id, "histories", &history)
            .await?;
        record.histories.push(history.clone());
        info!(teacher = %self.id, %school, "Teacher left school");
        Ok(history)
    }

    pub async fn update_base(
        &self,
        name: &str,
        classes: Vec<String>,
        subjects: Vec<String>,
        operator: &str,
    ) -> RosterResult<()> {
        require(name, "name")?;
        let mut record = self.record.write().await;
        let name = name.trim_end();
        let now = self
            .repo
            .update::<TeacherRecord>(
                &self.id,
                operator,
                json!({ "name": name, "classes": classes, "subjects": subjects }),
            )
            .await?;
        record.name = name.to_string();
        record.classes = classes;
        record.subjects = subjects;
        record.meta.operator = operator.to_string();
        record.meta.updated_at = now;
        Ok(())
    }

    pub async fn update_tags(&self, tags: Vec<String>, operator: &str) -> RosterResult<()> {
        let mut record = self.record.write().await;
        let now = self
            .repo
            .update::<TeacherRecord>(&self.id, operator, json!({ "tags": tags }))
            .await?;
        record.tags = tags;
        record.meta.operator = operator.to_string();
        record.meta.updated_at = now;
        Ok(())
    }

    pub async fn append_tag(&self, tag: &str) -> RosterResult<()> {
        require(tag, "tag")?;
        let mut record = self.record.write().await;
        if record.tags.iter().any(|t| t == tag) {
            return Err(RosterError::conflict(format!("tag {} already exists", tag)));
        }
        self.repo
            .push::<TeacherRecord>(&self.id, "tags", &tag)
            .await?;
        record.tags.push(tag.to_string());
        Ok(())
    }

    pub async fn subtract_tag(&self, tag: &str) -> RosterResult<()> {
        require(tag, "tag")?;
        let mut record = self.record.write().await;
        if !record.tags.iter().any(|t| t == tag) {
            return Err(RosterError::not_found("tag", tag));
        }
        self.repo
            .pull::<TeacherRecord>(&self.id, "tags", &ArrayMatcher::Equals(json!(tag)))
            .await?;
        record.tags.retain(|t| t != tag);
        Ok(())
    }
}

// =========================================================================
// Directory
// =========================================================================

/// Fields accepted when creating a teacher
#[derive(Debug, Clone, Default)]
pub struct NewTeacher {
    pub name: String,
    pub entity: String,
    pub user: String,
    pub scene: String,
    pub classes: Vec<String>,
    pub subjects: Vec<String>,
    pub operator: String,
}

/// Flat teacher cache: lookups scan the cache, fall back to the store and
/// append what they fetch
#[derive(Debug)]
pub struct TeacherDirectory {
    repo: Repository,
    teachers: RwLock<Vec<Arc<Teacher>>>,
}

impl TeacherDirectory {
    pub fn new(repo: Repository) -> Self {
        Self {
            repo,
            teachers: RwLock::new(Vec::new()),
        }
    }

    /// Number of cached teachers
    pub async fn len(&self) -> usize {
        self.teachers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.teachers.read().await.is_empty()
    }

    /// Append unless a teacher with the same identifier is already cached
    async fn insert(&self, record: TeacherRecord) -> Arc<Teacher> {
        let mut teachers = self.teachers.write().await;
        if let Some(existing) = teachers.iter().find(|t| t.id() == record.meta.id) {
            return existing.clone();
        }
        let teacher = Arc::new(Teacher::from_record(record, self.repo.clone()));
        teachers.push(teacher.clone());
        teacher
    }

    async fn find_cached<F>(&self, predicate: F) -> Option<Arc<Teacher>>
    where
        F: Fn(&TeacherRecord) -> bool,
    {
        let teachers = self.teachers.read().await.clone();
        for teacher in teachers {
            if predicate(&*teacher.record.read().await) {
                return Some(teacher);
            }
        }
        None
    }

    async fn load(&self, kind: &'static str, key: &str, filter: Filter) -> RosterResult<Arc<Teacher>> {
        debug!(%key, "Teacher cache miss, querying store");
        match self.repo.find_one::<TeacherRecord>(&filter).await? {
            Some(record) => Ok(self.insert(record).await),
            None => Err(RosterError::not_found(kind, key)),
        }
    }

    pub async fn teacher(&self, id: &str) -> RosterResult<Arc<Teacher>> {
        require(id, "teacher id")?;
        if let Some(teacher) = self.teachers.read().await.iter().find(|t| t.id() == id) {
            return Ok(teacher.clone());
        }
        debug!(%id, "Teacher cache miss, querying store");
        let record = self.repo.get::<TeacherRecord>(id).await?;
        Ok(self.insert(record).await)
    }

    pub async fn teacher_by_entity(&self, entity: &str) -> RosterResult<Arc<Teacher>> {
        require(entity, "entity")?;
        if let Some(teacher) = self.find_cached(|r| r.entity == entity).await {
            return Ok(teacher);
        }
        self.load("teacher", entity, Filter::by("entity", entity)).await
    }

    pub async fn teacher_by_user(&self, user: &str) -> RosterResult<Arc<Teacher>> {
        require(user, "user")?;
        if let Some(teacher) = self.find_cached(|r| r.user == user).await {
            return Ok(teacher);
        }
        self.load("teacher", user, Filter::by("user", user)).await
    }

    pub async fn teacher_by_name(&self, name: &str) -> RosterResult<Arc<Teacher>> {
        require(name, "name")?;
        if let Some(teacher) = self.find_cached(|r| r.name == name).await {
            return Ok(teacher);
        }
        self.load("teacher", name, Filter::by("name", name)).await
    }

    /// Teachers with an employment-history entry for `school`
    pub async fn leave_teachers(&self, school: &str) -> RosterResult<Vec<Arc<Teacher>>> {
        require(school, "school")?;
        let records = self
            .repo
            .find::<TeacherRecord>(&Filter::by("histories.school", school))
            .await?;
        let mut list = Vec::with_capacity(records.len());
        for record in records {
            list.push(self.insert(record).await);
        }
        Ok(list)
    }

    /// Persist a new teacher and cache it
    pub async fn create(&self, request: NewTeacher) -> RosterResult<Arc<Teacher>> {
        require(&request.name, "name")?;
        let mut record = TeacherRecord {
            meta: RecordMeta::created_by(request.operator),
            name: request.name.trim_end().to_string(),
            entity: request.entity,
            user: request.user,
            scene: request.scene,
            classes: request.classes,
            subjects: request.subjects,
            ..Default::default()
        };
        self.repo.create(&mut record).await?;
        info!(teacher = %record.meta.id, name = %record.name, "Teacher created");
        Ok(self.insert(record).await)
    }

    /// Page over the cached teachers in cache order
    pub async fn page(&self, page: u32, page_size: u32) -> Page<Arc<Teacher>> {
        let teachers = self.teachers.read().await.clone();
        paginate(page, page_size, teachers)
    }
}
