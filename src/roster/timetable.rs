//! Timetable aggregate
//!
//! The weekly timetable of one class for one school year.

use chrono::Utc;
use serde_json::json;
use tracing::info;

use super::error::{require, RosterError, RosterResult};
use crate::domain::{RecordMeta, TimetableItem, TimetableRecord};
use crate::store::{Filter, Repository};

/// Weekday numbers run from Sunday (0) to Saturday (6)
const MAX_WEEKDAY: u8 = 6;

fn validate_items(items: &[TimetableItem]) -> RosterResult<()> {
    match items.iter().find(|item| item.weekday > MAX_WEEKDAY) {
        Some(item) => Err(RosterError::validation(format!(
            "invalid weekday {} in timetable",
            item.weekday
        ))),
        None => Ok(()),
    }
}

#[derive(Debug, Clone)]
pub struct Timetable {
    record: TimetableRecord,
    repo: Repository,
}

impl Timetable {
    pub fn from_record(record: TimetableRecord, repo: Repository) -> Self {
        Self { record, repo }
    }

    pub async fn create(
        repo: &Repository,
        school: &str,
        class: &str,
        year: u32,
        items: Vec<TimetableItem>,
        operator: &str,
    ) -> RosterResult<Self> {
        require(class, "class")?;
        validate_items(&items)?;
        let mut record = TimetableRecord {
            meta: RecordMeta::created_by(operator),
            school: school.to_string(),
            class: class.to_string(),
            year,
            items,
        };
        repo.create(&mut record).await?;
        info!(timetable = %record.meta.id, %class, year, "Timetable created");
        Ok(Self::from_record(record, repo.clone()))
    }

    pub async fn find(repo: &Repository, filter: &Filter) -> RosterResult<Vec<Self>> {
        Ok(repo
            .find::<TimetableRecord>(filter)
            .await?
            .into_iter()
            .map(|record| Self::from_record(record, repo.clone()))
            .collect())
    }

    pub fn record(&self) -> &TimetableRecord {
        &self.record
    }

    pub fn into_record(self) -> TimetableRecord {
        self.record
    }

    pub fn id(&self) -> &str {
        &self.record.meta.id
    }

    pub async fn update_items(
        &mut self,
        items: Vec<TimetableItem>,
        operator: &str,
    ) -> RosterResult<()> {
        validate_items(&items)?;
        let now = self
            .repo
            .update::<TimetableRecord>(self.id(), operator, json!({ "items": items }))
            .await?;
        self.record.items = items;
        self.record.meta.operator = operator.to_string();
        self.record.meta.updated_at = now;
        Ok(())
    }

    pub async fn remove(&mut self, operator: &str) -> RosterResult<()> {
        self.repo
            .remove::<TimetableRecord>(self.id(), operator)
            .await?;
        self.record.meta.deleted_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::sync::Arc;

    fn item(weekday: u8, number: u8, name: &str) -> TimetableItem {
        TimetableItem {
            weekday,
            number,
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_and_update_items() {
        let repo = Repository::new(Arc::new(InMemoryStore::new()));
        let mut table = Timetable::create(
            &repo,
            "school-1",
            "class-1",
            2024,
            vec![item(1, 1, "Maths")],
            "admin",
        )
        .await
        .unwrap();

        table
            .update_items(vec![item(1, 1, "Maths"), item(2, 1, "Music")], "admin")
            .await
            .unwrap();

        let stored = Timetable::find(&repo, &Filter::by("class", "class-1").eq("year", 2024))
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].record().items.len(), 2);
    }

    #[tokio::test]
    async fn test_rejects_bad_weekday() {
        let repo = Repository::new(Arc::new(InMemoryStore::new()));
        let err = Timetable::create(&repo, "school-1", "class-1", 2024, vec![item(7, 1, "PE")], "admin")
            .await
            .unwrap_err();
        assert!(matches!(err, RosterError::Validation(_)));
    }
}
