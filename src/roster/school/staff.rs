//! School teacher membership
//!
//! The school record stores member teacher identifiers; the teachers
//! themselves are resolved through the shared directory on first use.

use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use super::{School, SchoolState};
use crate::domain::{paginate, Page, SchoolRecord};
use crate::roster::error::{require, RosterError, RosterResult};
use crate::roster::teacher::{NewTeacher, Teacher};
use crate::store::ArrayMatcher;

impl School {
    async fn load_teachers(&self, state: &mut SchoolState) -> RosterResult<()> {
        if state.teachers.is_some() {
            return Ok(());
        }
        let mut teachers = Vec::with_capacity(state.record.teachers.len());
        for id in &state.record.teachers {
            match self.directory.teacher(id).await {
                Ok(teacher) => teachers.push(teacher),
                Err(err) if err.is_not_found() => {
                    warn!(school = %self.id, teacher = %id, "Member teacher is missing");
                }
                Err(err) => return Err(err),
            }
        }
        state.teachers = Some(teachers);
        Ok(())
    }

    /// Member teachers, resolved on first access
    pub async fn teachers(&self) -> RosterResult<Vec<Arc<Teacher>>> {
        {
            let state = self.state.read().await;
            if let Some(teachers) = &state.teachers {
                return Ok(teachers.clone());
            }
        }
        let mut state = self.state.write().await;
        self.load_teachers(&mut state).await?;
        Ok(state.teachers.clone().unwrap_or_default())
    }

    pub async fn had_teacher(&self, teacher: &str) -> bool {
        let state = self.state.read().await;
        state.record.teachers.iter().any(|t| t == teacher)
    }

    async fn find_teacher<F, Fut>(&self, predicate: F) -> RosterResult<Option<Arc<Teacher>>>
    where
        F: Fn(Arc<Teacher>) -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for teacher in self.teachers().await? {
            if predicate(teacher.clone()).await {
                return Ok(Some(teacher));
            }
        }
        Ok(None)
    }

    async fn filter_teachers<F, Fut>(&self, predicate: F) -> RosterResult<Vec<Arc<Teacher>>>
    where
        F: Fn(Arc<Teacher>) -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let mut list = Vec::new();
        for teacher in self.teachers().await? {
            if predicate(teacher.clone()).await {
                list.push(teacher);
            }
        }
        Ok(list)
    }

    pub async fn teacher_by_entity(&self, entity: &str) -> RosterResult<Arc<Teacher>> {
        require(entity, "entity")?;
        self.find_teacher(|t| async move { t.snapshot().await.entity == entity })
            .await?
            .ok_or_else(|| RosterError::not_found("teacher", entity))
    }

    pub async fn teacher_by_user(&self, user: &str) -> RosterResult<Arc<Teacher>> {
        require(user, "user")?;
        self.find_teacher(|t| async move { t.snapshot().await.user == user })
            .await?
            .ok_or_else(|| RosterError::not_found("teacher", user))
    }

    pub async fn teacher_by_name(&self, name: &str) -> RosterResult<Arc<Teacher>> {
        require(name, "name")?;
        self.find_teacher(|t| async move { t.name().await == name })
            .await?
            .ok_or_else(|| RosterError::not_found("teacher", name))
    }

    pub async fn teachers_by_subject(&self, subject: &str) -> RosterResult<Vec<Arc<Teacher>>> {
        self.filter_teachers(|t| async move { t.had_subject(subject).await })
            .await
    }

    pub async fn teachers_by_class(&self, class: &str) -> RosterResult<Vec<Arc<Teacher>>> {
        self.filter_teachers(|t| async move { t.had_class(class).await })
            .await
    }

    pub async fn teachers_by_page(
        &self,
        page: u32,
        page_size: u32,
    ) -> RosterResult<Page<Arc<Teacher>>> {
        Ok(paginate(page, page_size, self.teachers().await?))
    }

    /// Create a teacher for this school.
    ///
    /// A member with the same user token is returned as is.
    pub async fn create_teacher(
        &self,
        name: &str,
        entity: &str,
        user: &str,
        operator: &str,
    ) -> RosterResult<Arc<Teacher>> {
        if !user.is_empty() {
            match self.teacher_by_user(user).await {
                Ok(existing) => return Ok(existing),
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        let teacher = self
            .directory
            .create(NewTeacher {
                name: name.to_string(),
                entity: entity.to_string(),
                user: user.to_string(),
                scene: self.scene().await,
                operator: operator.to_string(),
                ..Default::default()
            })
            .await?;
        self.append_teacher(teacher.id()).await?;
        Ok(teacher)
    }

    /// Add a member teacher; existing members are left alone
    pub async fn append_teacher(&self, teacher: &str) -> RosterResult<()> {
        require(teacher, "teacher id")?;
        let resolved = self.directory.teacher(teacher).await?;
        let mut state = self.state.write().await;
        if state.record.teachers.iter().any(|t| t == teacher) {
            return Ok(());
        }
        self.repo
            .push::<SchoolRecord>(&self.id, "teachers", &teacher)
            .await?;
        state.record.teachers.push(teacher.to_string());
        if let Some(teachers) = state.teachers.as_mut() {
            teachers.push(resolved);
        }
        info!(school = %self.id, %teacher, "Teacher joined school");
        Ok(())
    }

    /// Drop a member teacher, recording the departure on the teacher
    pub async fn remove_teacher(&self, teacher: &str, remark: &str) -> RosterResult<()> {
        require(teacher, "teacher id")?;
        let mut state = self.state.write().await;
        if !state.record.teachers.iter().any(|t| t == teacher) {
            return Err(RosterError::not_found("teacher", teacher));
        }
        let resolved = self.directory.teacher(teacher).await?;
        resolved.leave(&self.id, remark).await?;
        self.repo
            .pull::<SchoolRecord>(&self.id, "teachers", &ArrayMatcher::Equals(json!(teacher)))
            .await?;
        state.record.teachers.retain(|t| t != teacher);
        if let Some(teachers) = state.teachers.as_mut() {
            teachers.retain(|t| t.id() != teacher);
        }
        Ok(())
    }
}
