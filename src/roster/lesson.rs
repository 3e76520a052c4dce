//! Lesson aggregate

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::info;

use super::error::{require, RosterResult};
use crate::domain::{LessonRecord, RecordMeta};
use crate::store::{Filter, Repository};

/// Lesson owned by a school scene
#[derive(Debug, Clone)]
pub struct Lesson {
    record: LessonRecord,
    repo: Repository,
}

impl Lesson {
    pub fn from_record(record: LessonRecord, repo: Repository) -> Self {
        Self { record, repo }
    }

    /// Persist a new lesson under `scene`
    pub async fn create(
        repo: &Repository,
        scene: &str,
        name: &str,
        remark: &str,
        cover: &str,
        tags: Vec<String>,
        operator: &str,
    ) -> RosterResult<Self> {
        require(scene, "scene")?;
        require(name, "name")?;
        let mut record = LessonRecord {
            meta: RecordMeta::created_by(operator),
            scene: scene.to_string(),
            name: name.trim_end().to_string(),
            remark: remark.to_string(),
            cover: cover.to_string(),
            tags,
            ..Default::default()
        };
        repo.create(&mut record).await?;
        info!(lesson = %record.meta.id, %scene, "Lesson created");
        Ok(Self::from_record(record, repo.clone()))
    }

    pub async fn load(repo: &Repository, id: &str) -> RosterResult<Self> {
        require(id, "lesson id")?;
        let record = repo.get::<LessonRecord>(id).await?;
        Ok(Self::from_record(record, repo.clone()))
    }

    pub async fn find(repo: &Repository, filter: &Filter) -> RosterResult<Vec<Self>> {
        Ok(repo
            .find::<LessonRecord>(filter)
            .await?
            .into_iter()
            .map(|record| Self::from_record(record, repo.clone()))
            .collect())
    }

    pub fn record(&self) -> &LessonRecord {
        &self.record
    }

    pub fn into_record(self) -> LessonRecord {
        self.record
    }

    pub fn id(&self) -> &str {
        &self.record.meta.id
    }

    fn touch(&mut self, operator: &str, now: DateTime<Utc>) {
        self.record.meta.operator = operator.to_string();
        self.record.meta.updated_at = now;
    }

    pub async fn update_info(
        &mut self,
        name: &str,
        remark: &str,
        tags: Vec<String>,
        operator: &str,
    ) -> RosterResult<()> {
        require(name, "name")?;
        let now = self
            .repo
            .update::<LessonRecord>(
                self.id(),
                operator,
                json!({ "name": name, "remark": remark, "tags": tags }),
            )
            .await?;
        self.record.name = name.to_string();
        self.record.remark = remark.to_string();
        self.record.tags = tags;
        self.touch(operator, now);
        Ok(())
    }

    pub async fn update_cover(&mut self, cover: &str, operator: &str) -> RosterResult<()> {
        let now = self
            .repo
            .update::<LessonRecord>(self.id(), operator, json!({ "cover": cover }))
            .await?;
        self.record.cover = cover.to_string();
        self.touch(operator, now);
        Ok(())
    }

    pub async fn update_weight(&mut self, weight: u32, operator: &str) -> RosterResult<()> {
        let now = self
            .repo
            .update::<LessonRecord>(self.id(), operator, json!({ "weight": weight }))
            .await?;
        self.record.weight = weight;
        self.touch(operator, now);
        Ok(())
    }

    pub async fn update_assets(&mut self, assets: Vec<String>, operator: &str) -> RosterResult<()> {
        let now = self
            .repo
            .update::<LessonRecord>(self.id(), operator, json!({ "assets": assets }))
            .await?;
        self.record.assets = assets;
        self.touch(operator, now);
        Ok(())
    }

    pub async fn remove(&mut self, operator: &str) -> RosterResult<()> {
        self.repo.remove::<LessonRecord>(self.id(), operator).await?;
        let now = Utc::now();
        self.record.meta.deleted_at = Some(now);
        self.touch(operator, now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_lesson_lifecycle() {
        let repo = Repository::new(Arc::new(InMemoryStore::new()));
        let mut lesson = Lesson::create(&repo, "scene-1", "Painting", "", "", vec![], "admin")
            .await
            .unwrap();

        lesson.update_weight(3, "admin").await.unwrap();
        lesson
            .update_assets(vec!["a1".to_string()], "admin")
            .await
            .unwrap();

        let loaded = Lesson::load(&repo, lesson.id()).await.unwrap();
        assert_eq!(loaded.record().weight, 3);
        assert_eq!(loaded.record().assets, vec!["a1".to_string()]);

        lesson.remove("admin").await.unwrap();
        let remaining = Lesson::find(&repo, &Filter::by("scene", "scene-1")).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn test_lesson_requires_name() {
        let repo = Repository::new(Arc::new(InMemoryStore::new()));
        let err = Lesson::create(&repo, "scene-1", " ", "", "", vec![], "admin")
            .await
            .unwrap_err();
        assert!(err.is_client_error());
    }
}
