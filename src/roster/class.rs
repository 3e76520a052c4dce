//! Class roster
//!
//! One class and its membership roster. Memberships are keyed by student
//! identifier; every change is written to the store before the in-memory
//! roster is touched.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

use super::error::{RosterError, RosterResult};
use crate::domain::{
    calculate_grade, class_full_name, ClassKind, ClassMember, ClassRecord, ClassStatus,
    EnrolDate, StatusFilter, StudentRecord, StudentStatus,
};
use crate::store::{ArrayMatcher, Repository};

/// Cached class aggregate
#[derive(Debug)]
pub struct Class {
    /// Record without its member list; members live in `members`
    record: ClassRecord,
    members: BTreeMap<String, ClassMember>,
    max_grade: u32,
    repo: Repository,
}

impl Class {
    /// Wrap a stored record.
    ///
    /// When the stored roster holds several entries for one student, a
    /// current (Active or Unregistered) entry wins over historical ones.
    pub fn from_record(mut record: ClassRecord, max_grade: u32, repo: Repository) -> Self {
        let mut members: BTreeMap<String, ClassMember> = BTreeMap::new();
        for member in std::mem::take(&mut record.members) {
            let keep_existing = members
                .get(&member.student)
                .map(|existing| existing.is_current() && !member.is_current())
                .unwrap_or(false);
            if !keep_existing {
                members.insert(member.student.clone(), member);
            }
        }
        Self {
            record,
            members,
            max_grade,
            repo,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> &str {
        &self.record.meta.id
    }

    pub fn school(&self) -> &str {
        &self.record.school
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn number(&self) -> u32 {
        self.record.number
    }

    pub fn enrol(&self) -> EnrolDate {
        self.record.enrol
    }

    pub fn kind(&self) -> ClassKind {
        self.record.kind
    }

    pub fn master(&self) -> &str {
        &self.record.master
    }

    pub fn assistant(&self) -> &str {
        &self.record.assistant
    }

    pub fn teachers(&self) -> &[String] {
        &self.record.teachers
    }

    pub fn max_grade(&self) -> u32 {
        self.max_grade
    }

    pub(crate) fn set_max_grade(&mut self, max_grade: u32) {
        self.max_grade = max_grade;
    }

    pub fn members(&self) -> impl Iterator<Item = &ClassMember> {
        self.members.values()
    }

    pub fn member(&self, student: &str) -> Option<&ClassMember> {
        self.members.get(student)
    }

    /// Number of roster entries, historical ones included
    pub fn student_count(&self) -> usize {
        self.members.len()
    }

    // =========================================================================
    // Derived values
    // =========================================================================

    pub fn grade_at(&self, now: DateTime<Utc>) -> u32 {
        calculate_grade(self.record.enrol.year, now)
    }

    pub fn grade(&self) -> u32 {
        self.grade_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> ClassStatus {
        ClassStatus::derive(self.grade_at(now), self.max_grade)
    }

    pub fn status(&self) -> ClassStatus {
        self.status_at(Utc::now())
    }

    pub fn full_name(&self) -> String {
        class_full_name(self.grade(), self.record.number)
    }

    // =========================================================================
    // Roster queries
    // =========================================================================

    /// Whether the student holds an Active membership here
    pub fn had_student(&self, student: &str) -> bool {
        self.had_student_by_status(student, StatusFilter::Only(StudentStatus::Active))
    }

    /// Whether the student has an entry matching `filter`; `All` ignores status
    pub fn had_student_by_status(&self, student: &str, filter: StatusFilter) -> bool {
        if student.is_empty() {
            return false;
        }
        self.members
            .get(student)
            .map(|m| filter.matches(m.status))
            .unwrap_or(false)
    }

    /// Student identifiers whose entry matches `filter`
    pub fn students_by_status(&self, filter: StatusFilter) -> Vec<String> {
        self.members
            .values()
            .filter(|m| filter.matches(m.status))
            .map(|m| m.student.clone())
            .collect()
    }

    /// Effective status of a student in this class.
    ///
    /// Everyone in a finished class reads as Finished; a student without an
    /// entry reads as Deleted.
    pub fn student_status(&self, student: &str) -> StudentStatus {
        if self.status() == ClassStatus::Finished {
            return StudentStatus::Finished;
        }
        self.members
            .get(student)
            .map(|m| m.status)
            .unwrap_or(StudentStatus::Deleted)
    }

    // =========================================================================
    // Roster mutations
    // =========================================================================

    fn member_id(&self, seq: u64) -> String {
        format!("{}-{}", self.record.meta.id, seq)
    }

    /// Enroll a student as Active; no-op when already Active here
    pub async fn add_student(&mut self, student: &StudentRecord) -> RosterResult<()> {
        let student_id = student.meta.id.as_str();
        if student_id.is_empty() {
            return Err(RosterError::validation("student id is empty"));
        }
        if self.had_student(student_id) {
            return Ok(());
        }
        let member = ClassMember {
            id: self.member_id(student.meta.seq),
            student: student_id.to_string(),
            status: StudentStatus::Active,
            remark: String::new(),
            updated_at: Utc::now(),
        };
        self.repo
            .push::<ClassRecord>(self.id(), "members", &member)
            .await?;
        debug!(class = %self.id(), student = %student_id, "Student added to class");
        self.members.insert(member.student.clone(), member);
        Ok(())
    }

    /// Transition an Active membership.
    ///
    /// `Deleted` drops the entry; `Left` replaces it in place with a Left
    /// entry carrying `remark`. Students without an Active entry are left
    /// untouched.
    pub async fn remove_student(
        &mut self,
        student: &str,
        remark: &str,
        seq: u64,
        target: StudentStatus,
    ) -> RosterResult<()> {
        if !matches!(target, StudentStatus::Deleted | StudentStatus::Left) {
            return Err(RosterError::validation(format!(
                "cannot remove a student from a class into status {:?}",
                target
            )));
        }
        if !self.had_student(student) {
            return Ok(());
        }

        if target == StudentStatus::Deleted {
            let matcher = ArrayMatcher::field("student", student);
            self.repo
                .pull::<ClassRecord>(self.id(), "members", &matcher)
                .await?;
            self.members.remove(student);
            return Ok(());
        }

        let left = ClassMember {
            id: self.member_id(seq),
            student: student.to_string(),
            status: StudentStatus::Left,
            remark: remark.to_string(),
            updated_at: Utc::now(),
        };
        // Swap the current entry for the Left one in a single write, keeping
        // the student's earlier Left entries from previous enrollments.
        let stored: ClassRecord = self.repo.get(self.id()).await?;
        let mut replaced = false;
        let mut members = Vec::with_capacity(stored.members.len());
        for member in stored.members {
            if member.student != student || !member.is_current() {
                members.push(member);
            } else if !replaced {
                members.push(left.clone());
                replaced = true;
            }
        }
        if !replaced {
            members.push(left.clone());
        }
        self.repo
            .replace_field::<ClassRecord>(self.id(), "members", &members)
            .await?;
        self.members.insert(student.to_string(), left);
        Ok(())
    }

    // =========================================================================
    // Record fields
    // =========================================================================

    pub async fn update_info(&mut self, name: &str, operator: &str) -> RosterResult<()> {
        if self.record.name == name {
            return Ok(());
        }
        let now = self
            .repo
            .update::<ClassRecord>(self.id(), operator, json!({ "name": name }))
            .await?;
        self.record.name = name.to_string();
        self.touch(operator, now);
        Ok(())
    }

    pub async fn update_master(&mut self, master: &str, operator: &str) -> RosterResult<()> {
        if self.record.master == master {
            return Ok(());
        }
        let now = self
            .repo
            .update::<ClassRecord>(self.id(), operator, json!({ "master": master }))
            .await?;
        self.record.master = master.to_string();
        self.touch(operator, now);
        Ok(())
    }

    pub async fn update_assistant(&mut self, assistant: &str, operator: &str) -> RosterResult<()> {
        if self.record.assistant == assistant {
            return Ok(());
        }
        let now = self
            .repo
            .update::<ClassRecord>(self.id(), operator, json!({ "assistant": assistant }))
            .await?;
        self.record.assistant = assistant.to_string();
        self.touch(operator, now);
        Ok(())
    }

    pub fn had_teacher(&self, teacher: &str) -> bool {
        self.record.teachers.iter().any(|t| t == teacher)
    }

    /// Assign a teacher; no-op when already assigned
    pub async fn append_teacher(&mut self, teacher: &str) -> RosterResult<()> {
        if teacher.is_empty() || self.had_teacher(teacher) {
            return Ok(());
        }
        self.repo
            .push::<ClassRecord>(self.id(), "teachers", &teacher)
            .await?;
        self.record.teachers.push(teacher.to_string());
        Ok(())
    }

    /// Unassign a teacher; no-op when not assigned
    pub async fn subtract_teacher(&mut self, teacher: &str) -> RosterResult<()> {
        if !self.had_teacher(teacher) {
            return Ok(());
        }
        self.repo
            .pull::<ClassRecord>(self.id(), "teachers", &ArrayMatcher::Equals(json!(teacher)))
            .await?;
        self.record.teachers.retain(|t| t != teacher);
        Ok(())
    }

    /// Soft-delete the class record
    pub(crate) async fn remove(&self, operator: &str) -> RosterResult<()> {
        self.repo.remove::<ClassRecord>(self.id(), operator).await?;
        Ok(())
    }

    fn touch(&mut self, operator: &str, now: DateTime<Utc>) {
        self.record.meta.operator = operator.to_string();
        self.record.meta.updated_at = now;
    }

    /// Serializable snapshot
    pub fn view(&self) -> ClassView {
        let now = Utc::now();
        ClassView {
            id: self.record.meta.id.clone(),
            seq: self.record.meta.seq,
            school: self.record.school.clone(),
            name: self.record.name.clone(),
            full_name: class_full_name(self.grade_at(now), self.record.number),
            number: self.record.number,
            enrol: self.record.enrol.to_string(),
            kind: self.record.kind,
            grade: self.grade_at(now),
            status: self.status_at(now),
            master: self.record.master.clone(),
            assistant: self.record.assistant.clone(),
            teachers: self.record.teachers.clone(),
            members: self.members.values().cloned().collect(),
            creator: self.record.meta.creator.clone(),
            operator: self.record.meta.operator.clone(),
            created_at: self.record.meta.created_at,
            updated_at: self.record.meta.updated_at,
        }
    }
}

/// Point-in-time copy of a class handed out to callers
#[derive(Debug, Clone, Serialize)]
pub struct ClassView {
    pub id: String,
    pub seq: u64,
    pub school: String,
    pub name: String,
    pub full_name: String,
    pub number: u32,
    pub enrol: String,
    pub kind: ClassKind,
    pub grade: u32,
    pub status: ClassStatus,
    pub master: String,
    pub assistant: String,
    pub teachers: Vec<String>,
    pub members: Vec<ClassMember>,
    pub creator: String,
    pub operator: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClassView {
    pub fn had_student_by_status(&self, student: &str, filter: StatusFilter) -> bool {
        self.members
            .iter()
            .any(|m| m.student == student && filter.matches(m.status))
    }
}
