//! Student aggregate
//!
//! Students are not cached by their school; every lookup materializes a
//! fresh `Student` from the store. Mutations write the store first and
//! mirror the change into the wrapped record on success.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};

use super::error::{require, RosterError, RosterResult};
use crate::domain::{
    calculate_grade, identity, CustodianInfo, EnrolDate, StudentRecord, StudentStatus,
};
use crate::store::{ArrayMatcher, Filter, Repository};

/// Custodian name stored when the submitted one is too short
const DEFAULT_CUSTODIAN_NAME: &str = "default";

/// Student aggregate over one stored record
#[derive(Debug, Clone)]
pub struct Student {
    record: StudentRecord,
    repo: Repository,
}

impl Student {
    pub fn from_record(record: StudentRecord, repo: Repository) -> Self {
        Self { record, repo }
    }

    pub fn record(&self) -> &StudentRecord {
        &self.record
    }

    pub fn into_record(self) -> StudentRecord {
        self.record
    }

    pub fn id(&self) -> &str {
        &self.record.meta.id
    }

    pub fn seq(&self) -> u64 {
        self.record.meta.seq
    }

    pub fn school(&self) -> &str {
        &self.record.school
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn status(&self) -> StudentStatus {
        self.record.status
    }

    pub fn entity(&self) -> &str {
        &self.record.entity
    }

    pub fn enrol(&self) -> EnrolDate {
        self.record.enrol
    }

    pub fn class_number(&self) -> u32 {
        self.record.class_number
    }

    pub fn custodians(&self) -> &[CustodianInfo] {
        &self.record.custodians
    }

    pub fn tags(&self) -> &[String] {
        &self.record.tags
    }

    pub fn grade_at(&self, now: DateTime<Utc>) -> u32 {
        calculate_grade(self.record.enrol.year, now)
    }

    pub fn grade(&self) -> u32 {
        self.grade_at(Utc::now())
    }

    /// `YYYYMMDD` taken from the registration number or card
    pub fn birthday(&self) -> Option<String> {
        identity::birthday(&self.record.id_card, &self.record.sid)
    }

    pub fn had_custodian(&self, phone: &str) -> bool {
        self.record.has_custodian_phone(phone)
    }

    fn touch(&mut self, operator: &str, now: DateTime<Utc>) {
        self.record.meta.operator = operator.to_string();
        self.record.meta.updated_at = now;
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Attach an external identity.
    ///
    /// Rebinding the same token is a no-op; a different token on an already
    /// bound student is a conflict and leaves the binding unchanged. The
    /// store only accepts the write while the stored binding is still empty,
    /// so a stale handle cannot overwrite a concurrent bind.
    pub async fn bind_entity(&mut self, entity: &str, operator: &str) -> RosterResult<()> {
        require(entity, "entity")?;
        if self.record.entity == entity {
            return Ok(());
        }
        if !self.record.entity.is_empty() {
            return Err(self.rebind_conflict());
        }

        let unbound = Filter::by("entity", "");
        let written = self
            .repo
            .update_if::<StudentRecord>(self.id(), operator, &unbound, json!({ "entity": entity }))
            .await?;
        let Some(now) = written else {
            let stored: StudentRecord = self.repo.get(self.id()).await?;
            self.record.entity = stored.entity;
            self.record.meta.operator = stored.meta.operator;
            self.record.meta.updated_at = stored.meta.updated_at;
            if self.record.entity == entity {
                return Ok(());
            }
            return Err(self.rebind_conflict());
        };

        self.record.entity = entity.to_string();
        self.touch(operator, now);
        info!(student = %self.id(), "Student bound to entity");
        Ok(())
    }

    fn rebind_conflict(&self) -> RosterError {
        warn!(student = %self.id(), "Rejected rebinding of a bound student");
        RosterError::conflict(format!("student {} is already bound to an entity", self.id()))
    }

    /// Overwrite the stored status; class rosters are handled by the school
    pub async fn update_status(&mut self, status: StudentStatus, operator: &str) -> RosterResult<()> {
        if self.record.status == status {
            return Ok(());
        }
        let now = self
            .repo
            .update::<StudentRecord>(self.id(), operator, json!({ "status": status }))
            .await?;
        self.record.status = status;
        self.touch(operator, now);
        Ok(())
    }

    pub async fn update_class_number(&mut self, number: u32, operator: &str) -> RosterResult<()> {
        if self.record.class_number == number {
            return Ok(());
        }
        let now = self
            .repo
            .update::<StudentRecord>(self.id(), operator, json!({ "class_number": number }))
            .await?;
        self.record.class_number = number;
        self.touch(operator, now);
        Ok(())
    }

    pub async fn update_enrol(&mut self, enrol: EnrolDate, operator: &str) -> RosterResult<()> {
        if self.record.enrol == enrol {
            return Ok(());
        }
        let now = self
            .repo
            .update::<StudentRecord>(self.id(), operator, json!({ "enrol": enrol }))
            .await?;
        self.record.enrol = enrol;
        self.touch(operator, now);
        Ok(())
    }

    /// Update name, student number, card and sex.
    ///
    /// An empty `card` keeps the current one; a new card recomputes both the
    /// identity card and the registration number.
    pub async fn update_base(
        &mut self,
        name: &str,
        sn: &str,
        card: &str,
        sex: u8,
        operator: &str,
    ) -> RosterResult<()> {
        require(name, "name")?;
        let (id_card, sid) = if card.trim().is_empty() {
            (self.record.id_card.clone(), self.record.sid.clone())
        } else {
            let split = identity::split_card(card);
            if split.0.is_empty() {
                return Err(RosterError::validation(format!("unrecognized card: {}", card)));
            }
            split
        };
        let name = name.trim_end();
        let now = self
            .repo
            .update::<StudentRecord>(
                self.id(),
                operator,
                json!({
                    "name": name,
                    "sn": sn,
                    "id_card": id_card,
                    "sid": sid,
                    "sex": sex,
                }),
            )
            .await?;
        self.record.name = name.to_string();
        self.record.sn = sn.to_string();
        self.record.id_card = id_card;
        self.record.sid = sid;
        self.record.sex = sex;
        self.touch(operator, now);
        Ok(())
    }

    /// Replace the custodian entry with the same name
    pub async fn update_custodian(
        &mut self,
        name: &str,
        phones: Vec<String>,
        identity: &str,
    ) -> RosterResult<()> {
        if phones.is_empty() {
            return Err(RosterError::validation("custodian phones are empty"));
        }
        let name = if name.chars().count() < 2 {
            DEFAULT_CUSTODIAN_NAME
        } else {
            name
        };
        let custodian = CustodianInfo {
            name: name.to_string(),
            phones,
            identity: identity.to_string(),
        };
        self.repo
            .pull::<StudentRecord>(self.id(), "custodians", &ArrayMatcher::field("name", name))
            .await?;
        self.repo
            .push::<StudentRecord>(self.id(), "custodians", &custodian)
            .await?;
        self.record.custodians.retain(|c| c.name != name);
        self.record.custodians.push(custodian);
        Ok(())
    }

    pub async fn update_tags(&mut self, tags: Vec<String>, operator: &str) -> RosterResult<()> {
        let now = self
            .repo
            .update::<StudentRecord>(self.id(), operator, json!({ "tags": tags }))
            .await?;
        self.record.tags = tags;
        self.touch(operator, now);
        Ok(())
    }

    pub async fn append_tag(&mut self, tag: &str) -> RosterResult<()> {
        require(tag, "tag")?;
        if self.record.tags.iter().any(|t| t == tag) {
            return Err(RosterError::conflict(format!("tag {} already exists", tag)));
        }
        self.repo
            .push::<StudentRecord>(self.id(), "tags", &tag)
            .await?;
        self.record.tags.push(tag.to_string());
        Ok(())
    }

    pub async fn subtract_tag(&mut self, tag: &str) -> RosterResult<()> {
        require(tag, "tag")?;
        if !self.record.tags.iter().any(|t| t == tag) {
            return Err(RosterError::not_found("tag", tag));
        }
        self.repo
            .pull::<StudentRecord>(self.id(), "tags", &ArrayMatcher::Equals(json!(tag)))
            .await?;
        self.record.tags.retain(|t| t != tag);
        Ok(())
    }

    /// Soft-delete the student record
    pub(crate) async fn remove(&mut self, operator: &str) -> RosterResult<()> {
        self.repo.remove::<StudentRecord>(self.id(), operator).await?;
        let now = Utc::now();
        self.record.meta.deleted_at = Some(now);
        self.touch(operator, now);
        Ok(())
    }
}
