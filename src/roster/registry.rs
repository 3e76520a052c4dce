//! Roster registry
//!
//! The cache root handed to every caller. It holds the known schools in an
//! append-only, insertion-ordered set and shares one teacher directory with
//! them. Lookups scan the cache first, then query the store and cache what
//! they find; nothing is ever evicted.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::class::ClassView;
use super::error::{require, RosterError, RosterResult};
use super::lesson::Lesson;
use super::schedule::Schedule;
use super::school::School;
use super::student::Student;
use super::teacher::{Teacher, TeacherDirectory};
use crate::domain::{
    clamp_max_grade, paginate, ClassRecord, EnrolDate, Page, RecordMeta, SchoolRecord,
    SchoolStatus, StatusFilter, StudentRecord, StudentStatus,
};
use crate::store::{Filter, Repository};

/// Fields accepted when creating a school
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewSchool {
    pub name: String,
    pub remark: String,
    pub scene: String,
    pub entity: String,
    pub max_grade: u32,
    pub cover: String,
    pub operator: String,
}

/// Insertion-ordered school set keyed by identifier
#[derive(Debug, Default)]
struct SchoolIndex {
    order: Vec<Arc<School>>,
    by_id: HashMap<String, Arc<School>>,
}

impl SchoolIndex {
    /// Append unless already present; returns the cached aggregate
    fn insert(&mut self, school: School) -> Arc<School> {
        if let Some(existing) = self.by_id.get(school.id()) {
            return existing.clone();
        }
        let school = Arc::new(school);
        self.by_id.insert(school.id().to_string(), school.clone());
        self.order.push(school.clone());
        school
    }
}

/// Cache root for schools and teachers
#[derive(Debug)]
pub struct Registry {
    repo: Repository,
    teachers: Arc<TeacherDirectory>,
    schools: RwLock<SchoolIndex>,
}

impl Registry {
    /// Empty registry over `repo`
    pub fn new(repo: Repository) -> Self {
        Self {
            teachers: Arc::new(TeacherDirectory::new(repo.clone())),
            repo,
            schools: RwLock::new(SchoolIndex::default()),
        }
    }

    /// Registry preloaded with every usable school.
    ///
    /// Fails when the store cannot be read; callers treat that as fatal.
    pub async fn initialize(repo: Repository) -> RosterResult<Self> {
        let registry = Self::new(repo);
        let filter = Filter::by("status", u8::from(SchoolStatus::Usable));
        let records = registry.repo.find::<SchoolRecord>(&filter).await?;
        {
            let mut schools = registry.schools.write().await;
            for record in records {
                schools.insert(registry.wrap(record));
            }
        }
        info!(schools = registry.school_count().await, "Roster registry initialized");
        Ok(registry)
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn teachers(&self) -> &Arc<TeacherDirectory> {
        &self.teachers
    }

    fn wrap(&self, record: SchoolRecord) -> School {
        School::new(record, self.repo.clone(), self.teachers.clone())
    }

    async fn cache(&self, record: SchoolRecord) -> Arc<School> {
        let school = self.wrap(record);
        self.schools.write().await.insert(school)
    }

    pub async fn school_count(&self) -> usize {
        self.schools.read().await.order.len()
    }

    /// Cached schools in insertion order
    pub async fn schools(&self) -> Vec<Arc<School>> {
        self.schools.read().await.order.clone()
    }

    // =========================================================================
    // School lookups
    // =========================================================================

    pub async fn school(&self, id: &str) -> RosterResult<Arc<School>> {
        require(id, "school id")?;
        if let Some(school) = self.schools.read().await.by_id.get(id) {
            return Ok(school.clone());
        }
        debug!(school = %id, "School cache miss, querying store");
        let record = self.repo.get::<SchoolRecord>(id).await?;
        Ok(self.cache(record).await)
    }

    async fn school_by_field<F>(
        &self,
        field: &'static str,
        key: &str,
        predicate: F,
    ) -> RosterResult<Arc<School>>
    where
        F: Fn(&SchoolRecord) -> bool,
    {
        require(key, field)?;
        for school in self.schools().await {
            if predicate(&school.snapshot().await) {
                return Ok(school);
            }
        }
        debug!(%field, %key, "School cache miss, querying store");
        match self
            .repo
            .find_one::<SchoolRecord>(&Filter::by(field, key))
            .await?
        {
            Some(record) => Ok(self.cache(record).await),
            None => Err(RosterError::not_found("school", key)),
        }
    }

    pub async fn school_by_scene(&self, scene: &str) -> RosterResult<Arc<School>> {
        self.school_by_field("scene", scene, |r| r.scene == scene)
            .await
    }

    pub async fn school_by_name(&self, name: &str) -> RosterResult<Arc<School>> {
        self.school_by_field("name", name, |r| r.name == name).await
    }

    pub async fn school_by_entity(&self, entity: &str) -> RosterResult<Arc<School>> {
        self.school_by_field("entity", entity, |r| r.entity == entity)
            .await
    }

    /// Resolve a scene key, falling back to a school identifier
    pub async fn school_by(&self, key: &str) -> RosterResult<Arc<School>> {
        match self.school_by_scene(key).await {
            Err(err) if err.is_not_found() => self.school(key).await,
            other => other,
        }
    }

    /// The school owning `class`
    pub async fn school_by_class(&self, class: &str) -> RosterResult<Arc<School>> {
        require(class, "class id")?;
        for school in self.schools().await {
            if school.had_class(class).await? {
                return Ok(school);
            }
        }
        let record = self.repo.get::<ClassRecord>(class).await?;
        self.school(&record.school).await
    }

    /// The first school whose rosters hold `student` under `filter`
    pub async fn school_by_student(
        &self,
        student: &str,
        filter: StatusFilter,
    ) -> RosterResult<Arc<School>> {
        require(student, "student id")?;
        for school in self.schools().await {
            if school.had_student_by_status(student, filter).await? {
                return Ok(school);
            }
        }
        Err(RosterError::not_found("school", student))
    }

    /// Every school whose rosters mention `student`, whatever the status
    pub async fn schools_by_student(&self, student: &str) -> RosterResult<Vec<Arc<School>>> {
        require(student, "student id")?;
        let mut list = Vec::new();
        for school in self.schools().await {
            if school.had_student_by_status(student, StatusFilter::All).await? {
                list.push(school);
            }
        }
        Ok(list)
    }

    /// The school named on the stored student record
    pub async fn school_by_student_record(&self, student: &str) -> RosterResult<Arc<School>> {
        require(student, "student id")?;
        let record = self.repo.get::<StudentRecord>(student).await?;
        self.school(&record.school).await
    }

    pub async fn school_by_teacher(&self, teacher: &str) -> RosterResult<Arc<School>> {
        require(teacher, "teacher id")?;
        for school in self.schools().await {
            if school.had_teacher(teacher).await {
                return Ok(school);
            }
        }
        Err(RosterError::not_found("school", teacher))
    }

    /// The school of the teacher holding external user `user`
    pub async fn school_by_user(&self, user: &str) -> RosterResult<Arc<School>> {
        let teacher = self.teachers.teacher_by_user(user).await?;
        self.school_by_teacher(teacher.id()).await
    }

    pub async fn schools_page(&self, page: u32, page_size: u32) -> Page<Arc<School>> {
        paginate(page, page_size, self.schools().await)
    }

    pub async fn teachers_page(&self, page: u32, page_size: u32) -> Page<Arc<Teacher>> {
        self.teachers.page(page, page_size).await
    }

    /// Persist, cache and return a new school
    pub async fn create_school(&self, request: NewSchool) -> RosterResult<Arc<School>> {
        require(&request.scene, "scene")?;
        require(&request.entity, "entity")?;
        let mut record = SchoolRecord {
            meta: RecordMeta::created_by(request.operator),
            name: request.name,
            remark: request.remark,
            scene: request.scene,
            entity: request.entity,
            status: SchoolStatus::Usable,
            max_grade: clamp_max_grade(request.max_grade),
            cover: request.cover,
            ..Default::default()
        };
        self.repo.create(&mut record).await?;
        info!(school = %record.meta.id, name = %record.name, "School created");
        Ok(self.cache(record).await)
    }

    // =========================================================================
    // Class lookups
    // =========================================================================

    pub async fn class(&self, id: &str) -> RosterResult<(Arc<School>, ClassView)> {
        let school = self.school_by_class(id).await?;
        let class = school.class(id).await?;
        Ok((school, class))
    }

    /// The class holding the student's Active entry
    pub async fn class_by_student(&self, student: &str) -> RosterResult<(Arc<School>, ClassView)> {
        let active = StatusFilter::Only(StudentStatus::Active);
        let school = self.school_by_student(student, active).await?;
        let class = school
            .class_by_student(student, active)
            .await?
            .ok_or_else(|| RosterError::not_found("class", student))?;
        Ok((school, class))
    }

    /// The class of a school's intake and number, created when missing
    pub async fn class_by_enrol(
        &self,
        school: &str,
        enrol: &str,
        number: u32,
        operator: &str,
    ) -> RosterResult<ClassView> {
        let enrol: EnrolDate = enrol.parse()?;
        if number == 0 {
            return Err(RosterError::validation("class number must be at least 1"));
        }
        self.school_by(school)
            .await?
            .class_for_intake(enrol, number, operator)
            .await
    }

    // =========================================================================
    // Student lookups
    // =========================================================================

    fn wrap_students(&self, records: Vec<StudentRecord>) -> Vec<Student> {
        let mut seen = HashSet::new();
        records
            .into_iter()
            .filter(|r| seen.insert(r.meta.id.clone()))
            .map(|record| Student::from_record(record, self.repo.clone()))
            .collect()
    }

    pub async fn student(&self, id: &str) -> RosterResult<Student> {
        require(id, "student id")?;
        let record = self.repo.get::<StudentRecord>(id).await?;
        Ok(Student::from_record(record, self.repo.clone()))
    }

    pub async fn students_by_entity(&self, entity: &str) -> RosterResult<Vec<Student>> {
        require(entity, "entity")?;
        let records = self.repo.find(&Filter::by("entity", entity)).await?;
        Ok(self.wrap_students(records))
    }

    /// Students with a custodian phone, optionally limited to a name
    pub async fn students_by_custodian(
        &self,
        phone: &str,
        name: Option<&str>,
    ) -> RosterResult<Vec<Student>> {
        require(phone, "phone")?;
        let mut filter = Filter::by("custodians.phones", phone);
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            filter = filter.eq("name", name);
        }
        let records = self.repo.find(&filter).await?;
        Ok(self.wrap_students(records))
    }

    /// Students with identity card `card` whose custodians include `phone`
    pub async fn students_by_card(&self, card: &str, phone: &str) -> RosterResult<Vec<Student>> {
        require(card, "card")?;
        let records: Vec<StudentRecord> = self
            .repo
            .find::<StudentRecord>(&Filter::by("id_card", card))
            .await?
            .into_iter()
            .filter(|r: &StudentRecord| r.has_custodian_phone(phone))
            .collect();
        Ok(self.wrap_students(records))
    }

    /// Students whose stored status is `status`, across all schools
    pub async fn students_by_status(&self, status: StudentStatus) -> RosterResult<Vec<Student>> {
        let records = self
            .repo
            .find(&Filter::by("status", u8::from(status)))
            .await?;
        Ok(self.wrap_students(records))
    }

    /// The first student bound to `entity` that is Active in a class
    pub async fn active_student_by_entity(
        &self,
        entity: &str,
    ) -> RosterResult<(ClassView, Student)> {
        require(entity, "entity")?;
        for school in self.schools().await {
            let student = match school.student_by_entity(entity).await {
                Ok(student) => student,
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            };
            if let (student, Some(class)) = school.student(student.id()).await? {
                return Ok((class, student));
            }
        }
        Err(RosterError::not_found("student", entity))
    }

    // =========================================================================
    // Lessons and schedules
    // =========================================================================

    pub async fn lesson(&self, id: &str) -> RosterResult<Lesson> {
        Lesson::load(&self.repo, id).await
    }

    pub async fn lessons_by_scene(&self, scene: &str) -> RosterResult<Vec<Lesson>> {
        require(scene, "scene")?;
        Lesson::find(&self.repo, &Filter::by("scene", scene)).await
    }

    pub async fn lessons_by_creator(&self, creator: &str) -> RosterResult<Vec<Lesson>> {
        require(creator, "creator")?;
        Lesson::find(&self.repo, &Filter::by("creator", creator)).await
    }

    pub async fn schedule(&self, id: &str) -> RosterResult<Schedule> {
        Schedule::load(&self.repo, id).await
    }

    pub async fn schedules_by_scene(&self, scene: &str) -> RosterResult<Vec<Schedule>> {
        require(scene, "scene")?;
        Schedule::find(&self.repo, &Filter::by("scene", scene)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Collection;
    use crate::store::InMemoryStore;

    fn registry() -> (Registry, InMemoryStore) {
        let store = InMemoryStore::new();
        let repo = Repository::new(Arc::new(store.clone()));
        (Registry::new(repo), store)
    }

    fn new_school(scene: &str) -> NewSchool {
        NewSchool {
            name: format!("School {}", scene),
            scene: scene.to_string(),
            entity: format!("entity-{}", scene),
            max_grade: 3,
            operator: "admin".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_school_validates_and_clamps() {
        let (registry, store) = registry();

        let err = registry
            .create_school(NewSchool {
                scene: String::new(),
                ..new_school("a")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RosterError::Validation(_)));
        assert!(store.is_empty(Collection::Schools));

        let school = registry.create_school(new_school("a")).await.unwrap();
        assert_eq!(school.max_grade().await, 6);
        assert_eq!(registry.school_count().await, 1);
    }

    #[tokio::test]
    async fn test_lookup_falls_through_to_store_once() {
        let (registry, store) = registry();
        let created = registry.create_school(new_school("b")).await.unwrap();

        let fresh = Registry::new(Repository::new(Arc::new(store.clone())));
        let a = fresh.school_by_scene("scene-missing").await;
        assert!(a.unwrap_err().is_not_found());

        let by_scene = fresh.school_by_scene("b").await.unwrap();
        let by_id = fresh.school(created.id()).await.unwrap();
        assert!(Arc::ptr_eq(&by_scene, &by_id));
        assert_eq!(fresh.school_count().await, 1);
    }

    #[tokio::test]
    async fn test_school_by_prefers_scene_then_id() {
        let (registry, _) = registry();
        let school = registry.create_school(new_school("c")).await.unwrap();

        assert_eq!(registry.school_by("c").await.unwrap().id(), school.id());
        assert_eq!(registry.school_by(school.id()).await.unwrap().id(), school.id());
        assert!(registry.school_by("nowhere").await.unwrap_err().is_not_found());
        assert!(matches!(
            registry.school_by("").await.unwrap_err(),
            RosterError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_initialize_loads_usable_schools() {
        let (registry, store) = registry();
        let kept = registry.create_school(new_school("d")).await.unwrap();
        let disabled = registry.create_school(new_school("e")).await.unwrap();
        disabled
            .update_status(SchoolStatus::Disabled, "admin")
            .await
            .unwrap();

        let loaded = Registry::initialize(Repository::new(Arc::new(store))).await.unwrap();
        let schools = loaded.schools().await;
        assert_eq!(schools.len(), 1);
        assert_eq!(schools[0].id(), kept.id());
    }

    #[tokio::test]
    async fn test_cross_school_student_and_teacher_lookups() {
        use crate::domain::CustodianInfo;
        use crate::roster::school::NewStudent;

        let (registry, _) = registry();
        let school = registry.create_school(new_school("g")).await.unwrap();
        let custodian = CustodianInfo {
            name: "mum".to_string(),
            phones: vec!["13800000000".to_string()],
            ..Default::default()
        };
        let (student, _) = school
            .create_student(NewStudent {
                name: "Yang".to_string(),
                card: "110105201409010011".to_string(),
                entity: "token-g".to_string(),
                custodians: vec![custodian],
                operator: "admin".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let by_phone = registry
            .students_by_custodian("13800000000", Some("Yang"))
            .await
            .unwrap();
        assert_eq!(by_phone.len(), 1);
        assert!(registry
            .students_by_custodian("13800000000", Some("Other"))
            .await
            .unwrap()
            .is_empty());
        let by_card = registry
            .students_by_card("110105201409010011", "13800000000")
            .await
            .unwrap();
        assert_eq!(by_card[0].id(), student.id());
        assert_eq!(registry.students_by_entity("token-g").await.unwrap().len(), 1);
        assert_eq!(
            registry.school_by_student_record(student.id()).await.unwrap().id(),
            school.id()
        );

        let teacher = school
            .create_teacher("Ms Gao", "te", "user-g", "admin")
            .await
            .unwrap();
        assert_eq!(
            registry.school_by_teacher(teacher.id()).await.unwrap().id(),
            school.id()
        );
        assert_eq!(registry.school_by_user("user-g").await.unwrap().id(), school.id());
    }

    #[tokio::test]
    async fn test_class_by_enrol_validates_number() {
        let (registry, _) = registry();
        registry.create_school(new_school("f")).await.unwrap();

        let err = registry
            .class_by_enrol("f", "2020/9/1", 0, "admin")
            .await
            .unwrap_err();
        assert!(matches!(err, RosterError::Validation(_)));

        let class = registry
            .class_by_enrol("f", "2020/9/1", 1, "admin")
            .await
            .unwrap();
        let (school, found) = registry.class(&class.id).await.unwrap();
        assert_eq!(found.id, class.id);
        assert_eq!(school.scene().await, "f");
    }
}
