//! School aggregate
//!
//! A school owns its lazily loaded class list (and through it every class
//! roster), its honor and subject catalogs and its teacher membership.
//! One `tokio::sync::RwLock` guards all of it; mutations hold the write
//! lock across the store call so the store sees changes in the same order
//! as the cache.

mod activities;
mod classes;
mod staff;
mod students;

pub use classes::GradeCount;
pub use students::NewStudent;

use serde_json::json;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use super::class::Class;
use super::error::{require, RosterError, RosterResult};
use super::teacher::{Teacher, TeacherDirectory};
use crate::domain::{
    clamp_max_grade, ClassRecord, HonorInfo, SchoolRecord, SchoolStatus, SubjectInfo,
    HONOR_SEQUENCE, SUBJECT_SEQUENCE,
};
use crate::store::{ArrayMatcher, Filter, Repository};

/// Which honor catalog an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HonorKind {
    Student,
    Teacher,
}

impl HonorKind {
    fn field(&self) -> &'static str {
        match self {
            HonorKind::Student => "honors",
            HonorKind::Teacher => "teacher_honors",
        }
    }

    fn prefix(&self) -> char {
        match self {
            HonorKind::Student => 's',
            HonorKind::Teacher => 't',
        }
    }
}

/// Mutable state behind the school lock
#[derive(Debug)]
pub(crate) struct SchoolState {
    record: SchoolRecord,
    /// `None` until first access
    classes: Option<Vec<Class>>,
    /// Resolved member teachers, `None` until first access
    teachers: Option<Vec<Arc<Teacher>>>,
}

impl SchoolState {
    fn classes(&self) -> &[Class] {
        self.classes.as_deref().unwrap_or(&[])
    }

    fn classes_mut(&mut self) -> &mut Vec<Class> {
        self.classes.get_or_insert_with(Vec::new)
    }

    fn max_grade(&self) -> u32 {
        clamp_max_grade(self.record.max_grade)
    }

    fn honors(&self, kind: HonorKind) -> &Vec<HonorInfo> {
        match kind {
            HonorKind::Student => &self.record.honors,
            HonorKind::Teacher => &self.record.teacher_honors,
        }
    }

    fn honors_mut(&mut self, kind: HonorKind) -> &mut Vec<HonorInfo> {
        match kind {
            HonorKind::Student => &mut self.record.honors,
            HonorKind::Teacher => &mut self.record.teacher_honors,
        }
    }
}

/// Cached school aggregate
#[derive(Debug)]
pub struct School {
    id: String,
    repo: Repository,
    directory: Arc<TeacherDirectory>,
    state: RwLock<SchoolState>,
}

impl School {
    pub(crate) fn new(
        record: SchoolRecord,
        repo: Repository,
        directory: Arc<TeacherDirectory>,
    ) -> Self {
        Self {
            id: record.meta.id.clone(),
            repo,
            directory,
            state: RwLock::new(SchoolState {
                record,
                classes: None,
                teachers: None,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Copy of the school record
    pub async fn snapshot(&self) -> SchoolRecord {
        self.state.read().await.record.clone()
    }

    pub async fn scene(&self) -> String {
        self.state.read().await.record.scene.clone()
    }

    /// Highest grade before classes count as finished
    pub async fn max_grade(&self) -> u32 {
        self.state.read().await.max_grade()
    }

    // =========================================================================
    // Lazy class loading
    // =========================================================================

    async fn load_classes(&self, state: &mut SchoolState) -> RosterResult<()> {
        if state.classes.is_some() {
            return Ok(());
        }
        let records = self
            .repo
            .find::<ClassRecord>(&Filter::by("school", self.id.as_str()))
            .await?;
        let max_grade = state.max_grade();
        debug!(school = %self.id, count = records.len(), "Loaded classes");
        state.classes = Some(
            records
                .into_iter()
                .map(|record| Class::from_record(record, max_grade, self.repo.clone()))
                .collect(),
        );
        Ok(())
    }

    /// Read access with the class list loaded
    pub(crate) async fn read_classes(&self) -> RosterResult<RwLockReadGuard<'_, SchoolState>> {
        {
            let state = self.state.read().await;
            if state.classes.is_some() {
                return Ok(state);
            }
        }
        let mut state = self.state.write().await;
        self.load_classes(&mut state).await?;
        Ok(state.downgrade())
    }

    /// Write access with the class list loaded
    pub(crate) async fn write_classes(&self) -> RosterResult<RwLockWriteGuard<'_, SchoolState>> {
        let mut state = self.state.write().await;
        self.load_classes(&mut state).await?;
        Ok(state)
    }

    // =========================================================================
    // School fields
    // =========================================================================

    pub async fn update_info(&self, name: &str, remark: &str, operator: &str) -> RosterResult<()> {
        require(name, "name")?;
        let mut state = self.state.write().await;
        let now = self
            .repo
            .update::<SchoolRecord>(&self.id, operator, json!({ "name": name, "remark": remark }))
            .await?;
        state.record.name = name.to_string();
        state.record.remark = remark.to_string();
        state.record.meta.operator = operator.to_string();
        state.record.meta.updated_at = now;
        Ok(())
    }

    /// Change the max grade (floor 6); loaded classes re-derive their status
    pub async fn update_max_grade(&self, max_grade: u32, operator: &str) -> RosterResult<()> {
        let max_grade = clamp_max_grade(max_grade);
        let mut state = self.state.write().await;
        if state.record.max_grade == max_grade {
            return Ok(());
        }
        let now = self
            .repo
            .update::<SchoolRecord>(&self.id, operator, json!({ "max_grade": max_grade }))
            .await?;
        state.record.max_grade = max_grade;
        state.record.meta.operator = operator.to_string();
        state.record.meta.updated_at = now;
        if let Some(classes) = state.classes.as_mut() {
            for class in classes.iter_mut() {
                class.set_max_grade(max_grade);
            }
        }
        info!(school = %self.id, max_grade, "School max grade updated");
        Ok(())
    }

    pub async fn update_status(&self, status: SchoolStatus, operator: &str) -> RosterResult<()> {
        let mut state = self.state.write().await;
        if state.record.status == status {
            return Ok(());
        }
        let now = self
            .repo
            .update::<SchoolRecord>(&self.id, operator, json!({ "status": status }))
            .await?;
        state.record.status = status;
        state.record.meta.operator = operator.to_string();
        state.record.meta.updated_at = now;
        Ok(())
    }

    pub async fn update_cover(&self, cover: &str, operator: &str) -> RosterResult<()> {
        let mut state = self.state.write().await;
        let now = self
            .repo
            .update::<SchoolRecord>(&self.id, operator, json!({ "cover": cover }))
            .await?;
        state.record.cover = cover.to_string();
        state.record.meta.operator = operator.to_string();
        state.record.meta.updated_at = now;
        Ok(())
    }

    // =========================================================================
    // Honor and subject catalogs
    // =========================================================================

    /// Add an honor; names are unique within a catalog
    pub async fn create_honor(
        &self,
        kind: HonorKind,
        name: &str,
        remark: &str,
        parent: &str,
    ) -> RosterResult<HonorInfo> {
        require(name, "name")?;
        let mut state = self.state.write().await;
        if state.honors(kind).iter().any(|h| h.name == name) {
            return Err(RosterError::conflict(format!("honor {} already exists", name)));
        }
        let seq = self.repo.next_sequence(HONOR_SEQUENCE).await?;
        let honor = HonorInfo {
            id: format!("{}-{}{}", self.id, kind.prefix(), seq),
            name: name.to_string(),
            remark: remark.to_string(),
            parent: parent.to_string(),
        };
        self.repo
            .push::<SchoolRecord>(&self.id, kind.field(), &honor)
            .await?;
        state.honors_mut(kind).push(honor.clone());
        Ok(honor)
    }

    pub async fn honor(&self, kind: HonorKind, id: &str) -> Option<HonorInfo> {
        let state = self.state.read().await;
        state.honors(kind).iter().find(|h| h.id == id).cloned()
    }

    pub async fn remove_honor(&self, kind: HonorKind, id: &str) -> RosterResult<()> {
        require(id, "honor id")?;
        let mut state = self.state.write().await;
        if !state.honors(kind).iter().any(|h| h.id == id) {
            return Err(RosterError::not_found("honor", id));
        }
        self.repo
            .pull::<SchoolRecord>(&self.id, kind.field(), &ArrayMatcher::field("id", id))
            .await?;
        state.honors_mut(kind).retain(|h| h.id != id);
        Ok(())
    }

    /// Add a subject; names are unique within the school
    pub async fn create_subject(&self, name: &str, remark: &str) -> RosterResult<SubjectInfo> {
        require(name, "name")?;
        let mut state = self.state.write().await;
        if state.record.subjects.iter().any(|s| s.name == name) {
            return Err(RosterError::conflict(format!("subject {} already exists", name)));
        }
        let seq = self.repo.next_sequence(SUBJECT_SEQUENCE).await?;
        let subject = SubjectInfo {
            id: format!("{}-{}", self.id, seq),
            name: name.to_string(),
            remark: remark.to_string(),
        };
        self.repo
            .push::<SchoolRecord>(&self.id, "subjects", &subject)
            .await?;
        state.record.subjects.push(subject.clone());
        Ok(subject)
    }

    pub async fn subject(&self, id: &str) -> Option<SubjectInfo> {
        let state = self.state.read().await;
        state.record.subjects.iter().find(|s| s.id == id).cloned()
    }

    pub async fn remove_subject(&self, id: &str) -> RosterResult<()> {
        require(id, "subject id")?;
        let mut state = self.state.write().await;
        if !state.record.subjects.iter().any(|s| s.id == id) {
            return Err(RosterError::not_found("subject", id));
        }
        self.repo
            .pull::<SchoolRecord>(&self.id, "subjects", &ArrayMatcher::field("id", id))
            .await?;
        state.record.subjects.retain(|s| s.id != id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Collection, RecordMeta};
    use crate::store::InMemoryStore;

    pub(super) async fn school_with_store() -> (School, InMemoryStore) {
        let store = InMemoryStore::new();
        let repo = Repository::new(Arc::new(store.clone()));
        let mut record = SchoolRecord {
            meta: RecordMeta::created_by("admin"),
            name: "No.1 Primary".to_string(),
            scene: "scene-1".to_string(),
            entity: "entity-1".to_string(),
            max_grade: 6,
            ..Default::default()
        };
        repo.create(&mut record).await.unwrap();
        let directory = Arc::new(TeacherDirectory::new(repo.clone()));
        (School::new(record, repo, directory), store)
    }

    #[tokio::test]
    async fn test_honor_catalogs_are_separate() {
        let (school, _) = school_with_store().await;

        let student = school
            .create_honor(HonorKind::Student, "Merit", "", "")
            .await
            .unwrap();
        let teacher = school
            .create_honor(HonorKind::Teacher, "Merit", "", "")
            .await
            .unwrap();

        assert_eq!(student.id, format!("{}-s1", school.id()));
        assert_eq!(teacher.id, format!("{}-t2", school.id()));

        let err = school
            .create_honor(HonorKind::Student, "Merit", "", "")
            .await
            .unwrap_err();
        assert!(matches!(err, RosterError::Conflict(_)));

        school.remove_honor(HonorKind::Student, &student.id).await.unwrap();
        assert!(school.honor(HonorKind::Student, &student.id).await.is_none());
        assert!(school.honor(HonorKind::Teacher, &teacher.id).await.is_some());
    }

    #[tokio::test]
    async fn test_subjects() {
        let (school, store) = school_with_store().await;
        let maths = school.create_subject("Maths", "").await.unwrap();
        assert_eq!(maths.id, format!("{}-1", school.id()));
        assert!(school.create_subject("Maths", "").await.is_err());

        school.remove_subject(&maths.id).await.unwrap();
        assert!(school.remove_subject(&maths.id).await.unwrap_err().is_not_found());

        let doc = store.raw(Collection::Schools, school.id()).unwrap();
        assert!(doc["subjects"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_max_grade_floor() {
        let (school, _) = school_with_store().await;
        school.update_max_grade(3, "admin").await.unwrap();
        assert_eq!(school.max_grade().await, 6);
        school.update_max_grade(9, "admin").await.unwrap();
        assert_eq!(school.max_grade().await, 9);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_name() {
        let (school, store) = school_with_store().await;
        store.set_fail_writes(true);
        assert!(school.update_info("Renamed", "", "admin").await.is_err());
        assert_eq!(school.snapshot().await.name, "No.1 Primary");
    }
}
