//! School student operations
//!
//! Students are queried from the store on every call; only class rosters
//! are cached.

use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::{School, SchoolState};
use crate::domain::{
    identity, paginate, CustodianInfo, EnrolDate, Page, RecordMeta, StatusFilter, StudentRecord,
    StudentStatus,
};
use crate::roster::class::ClassView;
use crate::roster::error::{require, RosterError, RosterResult};
use crate::roster::student::Student;
use crate::store::Filter;

/// Fields accepted when enrolling a student
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewStudent {
    pub name: String,
    pub sn: String,
    /// Identity card or registration number
    pub card: String,
    pub sex: u8,
    /// `Y/M/D`; unparseable values fall back to an unknown date
    pub enrol: String,
    /// Class to enroll into, optional
    pub class: String,
    pub class_number: u32,
    pub status: StudentStatus,
    pub entity: String,
    pub custodians: Vec<CustodianInfo>,
    pub tags: Vec<String>,
    pub operator: String,
}

impl School {
    fn student_filter(&self) -> Filter {
        Filter::by("school", self.id.as_str())
    }

    fn wrap_students(&self, records: Vec<StudentRecord>) -> Vec<Student> {
        records
            .into_iter()
            .map(|record| Student::from_record(record, self.repo.clone()))
            .collect()
    }

    /// Fetch a student of this school
    async fn load_student(&self, id: &str) -> RosterResult<Student> {
        require(id, "student id")?;
        let record = self.repo.get::<StudentRecord>(id).await?;
        if record.school != self.id {
            return Err(RosterError::not_found("student", id));
        }
        Ok(Student::from_record(record, self.repo.clone()))
    }

    /// An existing student matching the card, or a custodian phone and name
    async fn find_duplicate(
        &self,
        name: &str,
        id_card: &str,
        custodians: &[CustodianInfo],
    ) -> RosterResult<Option<StudentRecord>> {
        if !id_card.is_empty() {
            let filter = self.student_filter().eq("id_card", id_card);
            return Ok(self.repo.find_one::<StudentRecord>(&filter).await?);
        }
        for phone in custodians.iter().flat_map(|c| c.phones.iter()) {
            let filter = self
                .student_filter()
                .eq("custodians.phones", phone.as_str())
                .eq("name", name);
            if let Some(record) = self.repo.find_one::<StudentRecord>(&filter).await? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Enroll `student` in the class at `index` and align its enrollment date
    async fn attach(
        &self,
        state: &mut SchoolState,
        index: usize,
        student: &mut Student,
        operator: &str,
    ) -> RosterResult<String> {
        let class = &mut state.classes_mut()[index];
        class.add_student(student.record()).await?;
        let enrol = class.enrol();
        let class_id = class.id().to_string();
        student.update_enrol(enrol, operator).await?;
        Ok(class_id)
    }

    /// Create a student, or reuse the one already registered with the same
    /// card or custodian phone and name.
    ///
    /// Returns the student and the class it is enrolled in, if any.
    pub async fn create_student(
        &self,
        request: NewStudent,
    ) -> RosterResult<(Student, Option<String>)> {
        let name = request.name.trim_end().to_string();
        require(&name, "name")?;
        let operator = request.operator.as_str();

        let mut state = self.write_classes().await?;
        let class_index = if request.class.is_empty() {
            None
        } else {
            let index = state
                .classes()
                .iter()
                .position(|c| c.id() == request.class)
                .ok_or_else(|| RosterError::not_found("class", request.class.as_str()))?;
            Some(index)
        };

        let custodians: Vec<CustodianInfo> = request
            .custodians
            .into_iter()
            .map(|mut c| {
                c.phones.retain(|p| !p.trim().is_empty());
                c
            })
            .filter(|c| !c.phones.is_empty())
            .collect();
        let (id_card, sid) = identity::split_card(&request.card);

        if let Some(record) = self.find_duplicate(&name, &id_card, &custodians).await? {
            let mut student = Student::from_record(record, self.repo.clone());
            if request.class_number > 0 {
                student
                    .update_class_number(request.class_number, operator)
                    .await?;
            }
            if !request.entity.is_empty() {
                student.bind_entity(&request.entity, operator).await?;
            }
            let mut class_id = state
                .classes()
                .iter()
                .find(|c| c.had_student(student.id()))
                .map(|c| c.id().to_string());
            if class_id.is_none() {
                if let Some(index) = class_index {
                    class_id = Some(self.attach(&mut state, index, &mut student, operator).await?);
                }
            }
            info!(school = %self.id, student = %student.id(), "Reused existing student");
            return Ok((student, class_id));
        }

        let status = match request.status {
            StudentStatus::Deleted => StudentStatus::Active,
            other => other,
        };
        let enrol = request
            .enrol
            .parse::<EnrolDate>()
            .unwrap_or_else(|_| EnrolDate::unknown());
        let mut record = StudentRecord {
            meta: RecordMeta::created_by(operator),
            school: self.id.clone(),
            name,
            sex: request.sex,
            sn: request.sn,
            id_card,
            sid,
            class_number: request.class_number,
            enrol,
            status,
            entity: request.entity,
            custodians,
            tags: request.tags,
        };
        self.repo.create(&mut record).await?;
        info!(school = %self.id, student = %record.meta.id, "Student created");

        let mut student = Student::from_record(record, self.repo.clone());
        let class_id = match class_index {
            Some(index) => Some(self.attach(&mut state, index, &mut student, operator).await?),
            None => None,
        };
        Ok((student, class_id))
    }

    /// Soft-delete a student and drop its current roster entry.
    ///
    /// Students bound to an external entity cannot be removed.
    pub async fn remove_student(&self, id: &str, operator: &str) -> RosterResult<()> {
        let mut state = self.write_classes().await?;
        let mut student = self.load_student(id).await?;
        if !student.entity().is_empty() {
            warn!(school = %self.id, student = %id, "Refused to remove a bound student");
            return Err(RosterError::conflict(format!(
                "student {} is bound to an entity",
                id
            )));
        }
        student.remove(operator).await?;
        if let Some(class) = state
            .classes_mut()
            .iter_mut()
            .find(|c| c.had_student(id))
        {
            class
                .remove_student(id, "", student.seq(), StudentStatus::Deleted)
                .await?;
        }
        info!(school = %self.id, student = %id, "Student removed");
        Ok(())
    }

    /// Change a student's status.
    ///
    /// Activating an Unregistered student first enrolls it in the class of
    /// its intake year and class number, creating that class if needed. A
    /// student already Active in some class keeps that membership.
    pub async fn update_student_status(
        &self,
        id: &str,
        status: StudentStatus,
        operator: &str,
    ) -> RosterResult<Student> {
        let mut state = self.write_classes().await?;
        let mut student = self.load_student(id).await?;
        if student.status() == status {
            return Ok(student);
        }
        let attached = state.classes().iter().any(|c| c.had_student(id));
        if student.status() == StudentStatus::Unregistered
            && status == StudentStatus::Active
            && !attached
        {
            let index = self
                .intake_class_index(&mut state, student.enrol(), student.class_number(), operator)
                .await?;
            state.classes_mut()[index]
                .add_student(student.record())
                .await?;
        }
        student.update_status(status, operator).await?;
        Ok(student)
    }

    /// Transfer a student: Left in its current class, then Active in `class`
    pub async fn move_student(
        &self,
        id: &str,
        class: &str,
        remark: &str,
        operator: &str,
    ) -> RosterResult<ClassView> {
        require(class, "class id")?;
        let mut state = self.write_classes().await?;
        let mut student = self.load_student(id).await?;
        let target = state
            .classes()
            .iter()
            .position(|c| c.id() == class)
            .ok_or_else(|| RosterError::not_found("class", class))?;
        if state.classes()[target].had_student(id) {
            return Ok(state.classes()[target].view());
        }
        if let Some(current) = state
            .classes_mut()
            .iter_mut()
            .find(|c| c.had_student(id))
        {
            current
                .remove_student(id, remark, student.seq(), StudentStatus::Left)
                .await?;
        }
        self.attach(&mut state, target, &mut student, operator).await?;
        info!(school = %self.id, student = %id, %class, "Student moved");
        Ok(state.classes()[target].view())
    }

    /// Bind an external identity to a student of this school
    pub async fn bind_student_entity(
        &self,
        id: &str,
        entity: &str,
        operator: &str,
    ) -> RosterResult<Student> {
        let mut student = self.load_student(id).await?;
        student.bind_entity(entity, operator).await?;
        Ok(student)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// A student together with the class holding its Active entry
    pub async fn student(&self, id: &str) -> RosterResult<(Student, Option<ClassView>)> {
        let student = self.load_student(id).await?;
        let class = self
            .class_by_student(id, StatusFilter::Only(StudentStatus::Active))
            .await?;
        Ok((student, class))
    }

    pub async fn student_by_entity(&self, entity: &str) -> RosterResult<Student> {
        require(entity, "entity")?;
        let filter = self.student_filter().eq("entity", entity);
        self.repo
            .find_one::<StudentRecord>(&filter)
            .await?
            .map(|record| Student::from_record(record, self.repo.clone()))
            .ok_or_else(|| RosterError::not_found("student", entity))
    }

    pub async fn student_by_card(&self, card: &str) -> RosterResult<Student> {
        require(card, "card")?;
        let (id_card, _) = identity::split_card(card);
        let filter = self.student_filter().eq("id_card", id_card.as_str());
        self.repo
            .find_one::<StudentRecord>(&filter)
            .await?
            .map(|record| Student::from_record(record, self.repo.clone()))
            .ok_or_else(|| RosterError::not_found("student", card))
    }

    pub async fn had_student_by_sn(&self, sn: &str) -> RosterResult<bool> {
        if sn.is_empty() {
            return Ok(false);
        }
        let filter = self.student_filter().eq("sn", sn);
        Ok(self.repo.find_one::<StudentRecord>(&filter).await?.is_some())
    }

    pub async fn students_by_custodian(&self, phone: &str) -> RosterResult<Vec<Student>> {
        require(phone, "phone")?;
        let filter = self.student_filter().eq("custodians.phones", phone);
        Ok(self.wrap_students(self.repo.find(&filter).await?))
    }

    pub async fn students_by_name(&self, name: &str) -> RosterResult<Vec<Student>> {
        require(name, "name")?;
        let filter = self.student_filter().eq("name", name);
        Ok(self.wrap_students(self.repo.find(&filter).await?))
    }

    /// Whether any student of this school lists `phone` for a custodian
    pub async fn is_custodian(&self, phone: &str) -> RosterResult<bool> {
        if phone.is_empty() {
            return Ok(false);
        }
        Ok(!self.students_by_custodian(phone).await?.is_empty())
    }

    async fn students_by_ids(&self, ids: Vec<String>) -> RosterResult<Vec<Student>> {
        let mut list = Vec::with_capacity(ids.len());
        for id in ids {
            match self.repo.get::<StudentRecord>(&id).await {
                Ok(record) => list.push(Student::from_record(record, self.repo.clone())),
                Err(err) if err.is_not_found() => {
                    debug!(student = %id, "Roster entry without a live student");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(list)
    }

    /// Active members of one class
    pub async fn students_by_class(&self, class: &str) -> RosterResult<Vec<Student>> {
        let ids = self
            .class(class)
            .await?
            .members
            .into_iter()
            .filter(|m| m.status == StudentStatus::Active)
            .map(|m| m.student)
            .collect();
        self.students_by_ids(ids).await
    }

    /// Students with a roster entry matching `filter` in any class
    pub async fn students_by_status(&self, filter: StatusFilter) -> RosterResult<Vec<Student>> {
        let ids: Vec<String> = {
            let state = self.read_classes().await?;
            let mut seen = HashSet::new();
            let ids: Vec<String> = state
                .classes()
                .iter()
                .flat_map(|c| c.students_by_status(filter))
                .filter(|id| seen.insert(id.clone()))
                .collect();
            ids
        };
        self.students_by_ids(ids).await
    }

    pub async fn all_students(&self) -> RosterResult<Vec<Student>> {
        Ok(self.wrap_students(self.repo.find(&self.student_filter()).await?))
    }

    pub async fn students_by_page(&self, page: u32, page_size: u32) -> RosterResult<Page<Student>> {
        Ok(paginate(page, page_size, self.all_students().await?))
    }

    /// Page over students whose stored status is Active
    pub async fn active_students_by_page(
        &self,
        page: u32,
        page_size: u32,
    ) -> RosterResult<Page<Student>> {
        let filter = self
            .student_filter()
            .eq("status", u8::from(StudentStatus::Active));
        let students = self.wrap_students(self.repo.find(&filter).await?);
        Ok(paginate(page, page_size, students))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ClassKind, Collection};
    use crate::roster::school::tests::school_with_store;

    const CARD: &str = "11010519491231002X";

    fn request(name: &str) -> NewStudent {
        NewStudent {
            name: name.to_string(),
            operator: "admin".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_student_into_class() {
        let (school, _) = school_with_store().await;
        let class = school
            .create_classes("a", "2020/9/1", "admin", 1, ClassKind::Standard)
            .await
            .unwrap()
            .remove(0);

        let (student, class_id) = school
            .create_student(NewStudent {
                class: class.id.clone(),
                card: CARD.to_string(),
                status: StudentStatus::Deleted,
                ..request("Han Meimei ")
            })
            .await
            .unwrap();

        assert_eq!(class_id.as_deref(), Some(class.id.as_str()));
        assert_eq!(student.name(), "Han Meimei");
        assert_eq!(student.status(), StudentStatus::Active);
        assert_eq!(student.enrol(), EnrolDate::new(2020, 9, 1));
        assert_eq!(student.record().sid, format!("G{}", CARD));
        assert!(school.class(&class.id).await.unwrap().had_student_by_status(
            student.id(),
            StatusFilter::Only(StudentStatus::Active)
        ));
    }

    #[tokio::test]
    async fn test_create_student_dedupes_by_card() {
        let (school, store) = school_with_store().await;
        let (first, _) = school
            .create_student(NewStudent {
                card: CARD.to_string(),
                ..request("Li Lei")
            })
            .await
            .unwrap();
        let (second, _) = school
            .create_student(NewStudent {
                card: CARD.to_string(),
                class_number: 3,
                ..request("Li Lei")
            })
            .await
            .unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(second.class_number(), 3);
        assert_eq!(store.len(Collection::Students), 1);
    }

    #[tokio::test]
    async fn test_create_student_dedupes_by_custodian() {
        let (school, store) = school_with_store().await;
        let custodians = vec![CustodianInfo {
            name: "Mum".to_string(),
            phones: vec!["13800000000".to_string()],
            identity: "mother".to_string(),
        }];
        let (first, _) = school
            .create_student(NewStudent {
                custodians: custodians.clone(),
                ..request("Li Lei")
            })
            .await
            .unwrap();
        let (second, _) = school
            .create_student(NewStudent {
                custodians: custodians.clone(),
                ..request("Li Lei")
            })
            .await
            .unwrap();
        let (sibling, _) = school
            .create_student(NewStudent {
                custodians,
                ..request("Li Mei")
            })
            .await
            .unwrap();

        assert_eq!(first.id(), second.id());
        assert_ne!(first.id(), sibling.id());
        assert_eq!(store.len(Collection::Students), 2);
        assert!(school.is_custodian("13800000000").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_student_unknown_class_writes_nothing() {
        let (school, store) = school_with_store().await;
        let err = school
            .create_student(NewStudent {
                class: "missing".to_string(),
                ..request("Li Lei")
            })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(store.is_empty(Collection::Students));
    }

    #[tokio::test]
    async fn test_remove_student() {
        let (school, _) = school_with_store().await;
        let class = school
            .create_classes("a", "2020/9/1", "admin", 1, ClassKind::Standard)
            .await
            .unwrap()
            .remove(0);
        let (student, _) = school
            .create_student(NewStudent {
                class: class.id.clone(),
                ..request("Li Lei")
            })
            .await
            .unwrap();

        school.remove_student(student.id(), "admin").await.unwrap();

        assert!(!school
            .class(&class.id)
            .await
            .unwrap()
            .had_student_by_status(student.id(), StatusFilter::All));
        assert!(school
            .remove_student(student.id(), "admin")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_remove_bound_student_conflicts() {
        let (school, _) = school_with_store().await;
        let (student, _) = school
            .create_student(NewStudent {
                entity: "token".to_string(),
                ..request("Li Lei")
            })
            .await
            .unwrap();

        let err = school.remove_student(student.id(), "admin").await.unwrap_err();
        assert!(matches!(err, RosterError::Conflict(_)));
        assert!(school.student(student.id()).await.is_ok());
    }

    #[tokio::test]
    async fn test_activate_unregistered_student_attaches_class() {
        let (school, _) = school_with_store().await;
        let (student, _) = school
            .create_student(NewStudent {
                enrol: "2021/9/1".to_string(),
                class_number: 2,
                status: StudentStatus::Unregistered,
                ..request("Li Lei")
            })
            .await
            .unwrap();

        let updated = school
            .update_student_status(student.id(), StudentStatus::Active, "admin")
            .await
            .unwrap();
        assert_eq!(updated.status(), StudentStatus::Active);

        let class = school.class_by_enrol(2021, 2).await.unwrap().unwrap();
        assert!(class.had_student_by_status(student.id(), StatusFilter::Only(StudentStatus::Active)));
        let (_, found) = school.student(student.id()).await.unwrap();
        assert_eq!(found.unwrap().id, class.id);
    }

    #[tokio::test]
    async fn test_activate_student_already_in_class_keeps_membership() {
        let (school, _) = school_with_store().await;
        let class = school
            .create_classes("a", "2021/9/1", "admin", 1, ClassKind::Standard)
            .await
            .unwrap()
            .remove(0);
        let (student, _) = school
            .create_student(NewStudent {
                enrol: "2021/9/1".to_string(),
                class: class.id.clone(),
                class_number: 2,
                status: StudentStatus::Unregistered,
                ..request("Han Meimei")
            })
            .await
            .unwrap();

        let updated = school
            .update_student_status(student.id(), StudentStatus::Active, "admin")
            .await
            .unwrap();
        assert_eq!(updated.status(), StudentStatus::Active);

        let active = StatusFilter::Only(StudentStatus::Active);
        let holding: Vec<_> = school
            .classes()
            .await
            .unwrap()
            .into_iter()
            .filter(|c| c.had_student_by_status(student.id(), active))
            .collect();
        assert_eq!(holding.len(), 1);
        assert_eq!(holding[0].id, class.id);
        assert!(school.class_by_enrol(2021, 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_move_student_keeps_single_active_membership() {
        let (school, _) = school_with_store().await;
        let classes = school
            .create_classes("a", "2020/9/1", "admin", 2, ClassKind::Standard)
            .await
            .unwrap();
        let (student, _) = school
            .create_student(NewStudent {
                class: classes[0].id.clone(),
                ..request("Li Lei")
            })
            .await
            .unwrap();

        school
            .move_student(student.id(), &classes[1].id, "transfer", "admin")
            .await
            .unwrap();

        let active = StatusFilter::Only(StudentStatus::Active);
        let from = school.class(&classes[0].id).await.unwrap();
        let to = school.class(&classes[1].id).await.unwrap();
        assert!(!from.had_student_by_status(student.id(), active));
        assert!(from.had_student_by_status(student.id(), StatusFilter::Only(StudentStatus::Left)));
        assert!(to.had_student_by_status(student.id(), active));

        let left = school
            .students_by_status(StatusFilter::Only(StudentStatus::Left))
            .await
            .unwrap();
        assert_eq!(left.len(), 1);
    }

    #[tokio::test]
    async fn test_paged_students() {
        let (school, _) = school_with_store().await;
        for i in 0..5 {
            school
                .create_student(request(&format!("Student {}", i)))
                .await
                .unwrap();
        }
        let page = school.students_by_page(2, 2).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.max_page, 3);
        assert_eq!(page.items[0].name(), "Student 2");

        let active = school.active_students_by_page(0, 10).await.unwrap();
        assert_eq!(active.total, 5);
    }
}
