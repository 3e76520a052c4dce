//! School class operations

use serde::Serialize;
use std::collections::HashSet;
use tokio::sync::{RwLockMappedWriteGuard, RwLockWriteGuard};
use tracing::info;

use super::{School, SchoolState};
use crate::domain::{
    paginate, ClassKind, ClassRecord, ClassStatus, EnrolDate, Page, RecordMeta, StatusFilter,
};
use crate::roster::class::{Class, ClassView};
use crate::roster::error::{require, RosterError, RosterResult};

/// Roster size of one grade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GradeCount {
    pub grade: u32,
    pub students: usize,
}

impl School {
    /// Persist and cache one class, returning its index in the class list
    pub(super) async fn create_class(
        &self,
        state: &mut SchoolState,
        name: &str,
        enrol: EnrolDate,
        number: u32,
        kind: ClassKind,
        operator: &str,
    ) -> RosterResult<usize> {
        let mut record = ClassRecord {
            meta: RecordMeta::created_by(operator),
            school: self.id.clone(),
            name: name.to_string(),
            number,
            enrol,
            kind,
            ..Default::default()
        };
        self.repo.create(&mut record).await?;
        info!(school = %self.id, class = %record.meta.id, %enrol, number, "Class created");
        let max_grade = state.max_grade();
        let classes = state.classes_mut();
        classes.push(Class::from_record(record, max_grade, self.repo.clone()));
        Ok(classes.len() - 1)
    }

    /// Create classes for an intake.
    ///
    /// `count == 0` creates a single class numbered 0. Otherwise the intake
    /// is topped up to `count` classes, numbering the new ones after the
    /// existing ones; when the intake already has `count` or more classes
    /// the existing ones are returned and nothing is created.
    pub async fn create_classes(
        &self,
        name: &str,
        enrol: &str,
        operator: &str,
        count: u32,
        kind: ClassKind,
    ) -> RosterResult<Vec<ClassView>> {
        let enrol: EnrolDate = enrol.parse()?;
        let mut state = self.write_classes().await?;

        if count == 0 {
            let index = self
                .create_class(&mut state, name, enrol, 0, kind, operator)
                .await?;
            return Ok(vec![state.classes()[index].view()]);
        }

        let existing: Vec<ClassView> = state
            .classes()
            .iter()
            .filter(|c| c.enrol().same_intake(enrol.year, enrol.month))
            .map(Class::view)
            .collect();
        let have = existing.len() as u32;
        if have >= count {
            return Ok(existing);
        }

        let mut created = Vec::with_capacity((count - have) as usize);
        for number in (have + 1)..=count {
            let index = self
                .create_class(&mut state, name, enrol, number, kind, operator)
                .await?;
            created.push(state.classes()[index].view());
        }
        Ok(created)
    }

    /// Index of the class for intake year `enrol.year` and `number`,
    /// creating it as `"{enrol}-{number}"` when missing
    pub(super) async fn intake_class_index(
        &self,
        state: &mut SchoolState,
        enrol: EnrolDate,
        number: u32,
        operator: &str,
    ) -> RosterResult<usize> {
        if number == 0 {
            return Err(RosterError::validation("class number must be at least 1"));
        }
        if let Some(index) = state
            .classes()
            .iter()
            .position(|c| c.enrol().year == enrol.year && c.number() == number)
        {
            return Ok(index);
        }
        let name = format!("{}-{}", enrol, number);
        self.create_class(state, &name, enrol, number, ClassKind::Standard, operator)
            .await
    }

    /// The class of an intake year and number, created on demand
    pub async fn class_for_intake(
        &self,
        enrol: EnrolDate,
        number: u32,
        operator: &str,
    ) -> RosterResult<ClassView> {
        let mut state = self.write_classes().await?;
        let index = self
            .intake_class_index(&mut state, enrol, number, operator)
            .await?;
        Ok(state.classes()[index].view())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    async fn select_classes<F>(&self, predicate: F) -> RosterResult<Vec<ClassView>>
    where
        F: Fn(&Class) -> bool,
    {
        let state = self.read_classes().await?;
        Ok(state
            .classes()
            .iter()
            .filter(|c| predicate(*c))
            .map(Class::view)
            .collect())
    }

    pub async fn classes(&self) -> RosterResult<Vec<ClassView>> {
        self.select_classes(|_| true).await
    }

    pub async fn class(&self, id: &str) -> RosterResult<ClassView> {
        require(id, "class id")?;
        self.select_classes(|c| c.id() == id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RosterError::not_found("class", id))
    }

    /// Exclusive access to one class for roster and field edits
    pub async fn class_mut(&self, id: &str) -> RosterResult<RwLockMappedWriteGuard<'_, Class>> {
        require(id, "class id")?;
        let state = self.write_classes().await?;
        RwLockWriteGuard::try_map(state, |s| s.classes_mut().iter_mut().find(|c| c.id() == id))
            .map_err(|_| RosterError::not_found("class", id))
    }

    pub async fn classes_by_status(&self, status: ClassStatus) -> RosterResult<Vec<ClassView>> {
        self.select_classes(|c| c.status() == status).await
    }

    /// Classes ordered by intake year, optionally limited to one status
    pub async fn classes_by_page(
        &self,
        page: u32,
        page_size: u32,
        status: Option<ClassStatus>,
    ) -> RosterResult<Page<ClassView>> {
        let state = self.read_classes().await?;
        let mut classes: Vec<&Class> = state
            .classes()
            .iter()
            .filter(|c| status.map(|s| c.status() == s).unwrap_or(true))
            .collect();
        classes.sort_by_key(|c| c.enrol().year);
        Ok(paginate(page, page_size, classes).map(Class::view))
    }

    pub async fn classes_by_grade(&self, grade: u32) -> RosterResult<Vec<ClassView>> {
        self.select_classes(|c| c.grade() == grade).await
    }

    /// Classes of the intake around `year`/`month`
    pub async fn classes_by_intake(&self, year: u32, month: u32) -> RosterResult<Vec<ClassView>> {
        self.select_classes(|c| c.enrol().same_intake(year, month))
            .await
    }

    pub async fn class_by_enrol(&self, year: u32, number: u32) -> RosterResult<Option<ClassView>> {
        Ok(self
            .select_classes(|c| c.enrol().year == year && c.number() == number)
            .await?
            .into_iter()
            .next())
    }

    pub async fn class_by_number(&self, grade: u32, number: u32) -> RosterResult<Option<ClassView>> {
        Ok(self
            .select_classes(|c| c.grade() == grade && c.number() == number)
            .await?
            .into_iter()
            .next())
    }

    pub async fn classes_by_master(&self, teacher: &str) -> RosterResult<Vec<ClassView>> {
        self.select_classes(|c| !teacher.is_empty() && c.master() == teacher)
            .await
    }

    pub async fn classes_by_assistant(&self, teacher: &str) -> RosterResult<Vec<ClassView>> {
        self.select_classes(|c| !teacher.is_empty() && c.assistant() == teacher)
            .await
    }

    /// Classes the teacher is assigned to, masters or assists, without repeats
    pub async fn classes_by_teacher(&self, teacher: &str) -> RosterResult<Vec<ClassView>> {
        let mut seen = HashSet::new();
        let mut list = Vec::new();
        for class in self.classes_by_assigned(teacher).await? {
            if seen.insert(class.id.clone()) {
                list.push(class);
            }
        }
        Ok(list)
    }

    async fn classes_by_assigned(&self, teacher: &str) -> RosterResult<Vec<ClassView>> {
        if teacher.is_empty() {
            return Ok(Vec::new());
        }
        let mut list = self.select_classes(|c| c.had_teacher(teacher)).await?;
        list.extend(self.classes_by_master(teacher).await?);
        list.extend(self.classes_by_assistant(teacher).await?);
        Ok(list)
    }

    /// The class holding `student` with an entry matching `filter`
    pub async fn class_by_student(
        &self,
        student: &str,
        filter: StatusFilter,
    ) -> RosterResult<Option<ClassView>> {
        Ok(self
            .select_classes(|c| c.had_student_by_status(student, filter))
            .await?
            .into_iter()
            .next())
    }

    /// Whether any class has an entry for `student` matching `filter`
    pub async fn had_student_by_status(
        &self,
        student: &str,
        filter: StatusFilter,
    ) -> RosterResult<bool> {
        Ok(self.class_by_student(student, filter).await?.is_some())
    }

    pub async fn had_class(&self, id: &str) -> RosterResult<bool> {
        let state = self.read_classes().await?;
        Ok(state.classes().iter().any(|c| c.id() == id))
    }

    /// Roster entries per grade, grades `1..=max_grade`
    pub async fn grade_statistics(&self) -> RosterResult<Vec<GradeCount>> {
        let state = self.read_classes().await?;
        let classes = state.classes();
        Ok((1..=state.max_grade())
            .map(|grade| GradeCount {
                grade,
                students: classes
                    .iter()
                    .filter(|c| c.grade() == grade)
                    .map(Class::student_count)
                    .sum(),
            })
            .collect())
    }

    /// Soft-delete a class and drop it from the cache
    pub async fn remove_class(&self, id: &str, operator: &str) -> RosterResult<()> {
        require(id, "class id")?;
        let mut state = self.write_classes().await?;
        let index = state
            .classes()
            .iter()
            .position(|c| c.id() == id)
            .ok_or_else(|| RosterError::not_found("class", id))?;
        state.classes()[index].remove(operator).await?;
        state.classes_mut().remove(index);
        info!(school = %self.id, class = %id, "Class removed");
        Ok(())
    }
}
