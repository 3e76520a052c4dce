//! Persisted records
//!
//! Document shapes for every roster collection. Each record embeds
//! [`RecordMeta`] at the top level of its document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DomainError, EnrolDate};

// =========================================================================
// Collections
// =========================================================================

/// Named document collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Schools,
    Classes,
    Students,
    Teachers,
    Lessons,
    Schedules,
    Timetables,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Schools => "schools",
            Collection::Classes => "classes",
            Collection::Students => "students",
            Collection::Teachers => "teachers",
            Collection::Lessons => "lessons",
            Collection::Schedules => "schedules",
            Collection::Timetables => "timetables",
        }
    }
}

/// Sequence counter for student and teacher honor identifiers
pub const HONOR_SEQUENCE: &str = "school_honor";

/// Sequence counter for subject identifiers
pub const SUBJECT_SEQUENCE: &str = "school_subject";

/// Trait implemented by every persisted record type
pub trait Record: Serialize + serde::de::DeserializeOwned + Send + Sync {
    /// Collection the record lives in
    const COLLECTION: Collection;

    fn meta(&self) -> &RecordMeta;

    fn meta_mut(&mut self) -> &mut RecordMeta;

    fn id(&self) -> &str {
        &self.meta().id
    }
}

macro_rules! impl_record {
    ($ty:ty, $collection:expr) => {
        impl Record for $ty {
            const COLLECTION: Collection = $collection;

            fn meta(&self) -> &RecordMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut RecordMeta {
                &mut self.meta
            }
        }
    };
}

/// Attributes shared by every record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordMeta {
    /// Store-assigned identifier, immutable after creation
    pub id: String,
    /// Per-collection sequence number
    pub seq: u64,
    pub creator: String,
    pub operator: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RecordMeta {
    /// Metadata for a record about to be inserted by `creator`
    pub fn created_by(creator: impl Into<String>) -> Self {
        let creator = creator.into();
        Self {
            operator: creator.clone(),
            creator,
            ..Default::default()
        }
    }
}

// =========================================================================
// Status codes
// =========================================================================

/// Student and class-membership status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StudentStatus {
    Deleted = 0,
    #[default]
    Active = 1,
    Finished = 2,
    Left = 3,
    Unregistered = 4,
}

impl From<StudentStatus> for u8 {
    fn from(status: StudentStatus) -> Self {
        status as u8
    }
}

impl TryFrom<u8> for StudentStatus {
    type Error = DomainError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Deleted),
            1 => Ok(Self::Active),
            2 => Ok(Self::Finished),
            3 => Ok(Self::Left),
            4 => Ok(Self::Unregistered),
            _ => Err(DomainError::unknown_status("student", code)),
        }
    }
}

/// Query-side status selector; `All` matches any stored status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    All,
    Only(StudentStatus),
}

impl StatusFilter {
    /// Wire code of the `All` pseudo-status
    pub const ALL_CODE: u8 = 99;

    pub fn from_code(code: u8) -> Result<Self, DomainError> {
        if code == Self::ALL_CODE {
            Ok(Self::All)
        } else {
            StudentStatus::try_from(code).map(Self::Only)
        }
    }

    pub fn matches(&self, status: StudentStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Only(s) => *s == status,
        }
    }
}

impl From<StudentStatus> for StatusFilter {
    fn from(status: StudentStatus) -> Self {
        Self::Only(status)
    }
}

/// School availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SchoolStatus {
    #[default]
    Usable = 0,
    Disabled = 1,
}

impl From<SchoolStatus> for u8 {
    fn from(status: SchoolStatus) -> Self {
        status as u8
    }
}

impl TryFrom<u8> for SchoolStatus {
    type Error = DomainError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Usable),
            1 => Ok(Self::Disabled),
            _ => Err(DomainError::unknown_status("school", code)),
        }
    }
}

/// Administrative class or a virtual grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ClassKind {
    #[default]
    Standard = 0,
    Virtual = 1,
}

impl From<ClassKind> for u8 {
    fn from(kind: ClassKind) -> Self {
        kind as u8
    }
}

impl TryFrom<u8> for ClassKind {
    type Error = DomainError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Standard),
            1 => Ok(Self::Virtual),
            _ => Err(DomainError::unknown_status("class kind", code)),
        }
    }
}

/// Schedule publication state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ScheduleStatus {
    #[default]
    Frozen = 0,
    Published = 1,
}

impl From<ScheduleStatus> for u8 {
    fn from(status: ScheduleStatus) -> Self {
        status as u8
    }
}

impl TryFrom<u8> for ScheduleStatus {
    type Error = DomainError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Frozen),
            1 => Ok(Self::Published),
            _ => Err(DomainError::unknown_status("schedule", code)),
        }
    }
}

// =========================================================================
// Embedded values
// =========================================================================

/// Entry in a school's student or teacher honor catalog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HonorInfo {
    pub id: String,
    pub name: String,
    pub remark: String,
    pub parent: String,
}

/// Entry in a school's subject catalog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubjectInfo {
    pub id: String,
    pub name: String,
    pub remark: String,
}

/// Guardian of a student
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustodianInfo {
    pub name: String,
    pub phones: Vec<String>,
    pub identity: String,
}

impl CustodianInfo {
    pub fn has_phone(&self, phone: &str) -> bool {
        self.phones.iter().any(|p| p == phone)
    }
}

/// A school a teacher has left
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryInfo {
    pub id: String,
    pub school: String,
    pub remark: String,
    pub created_at: DateTime<Utc>,
}

/// Roster entry binding a student to a class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassMember {
    pub id: String,
    pub student: String,
    pub status: StudentStatus,
    #[serde(default)]
    pub remark: String,
    pub updated_at: DateTime<Utc>,
}

impl ClassMember {
    /// Whether this entry occupies the student's single current seat
    pub fn is_current(&self) -> bool {
        matches!(
            self.status,
            StudentStatus::Active | StudentStatus::Unregistered
        )
    }
}

/// One period in a weekly timetable
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimetableItem {
    /// 0 = Sunday
    pub weekday: u8,
    /// Period of the day
    pub number: u8,
    /// Subject name
    pub name: String,
}

// =========================================================================
// Records
// =========================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchoolRecord {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub name: String,
    pub remark: String,
    /// External scene key
    pub scene: String,
    pub entity: String,
    pub status: SchoolStatus,
    pub max_grade: u32,
    pub cover: String,
    pub honors: Vec<HonorInfo>,
    pub teacher_honors: Vec<HonorInfo>,
    pub subjects: Vec<SubjectInfo>,
    /// Member teacher identifiers
    pub teachers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassRecord {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub school: String,
    pub name: String,
    /// Sequence within its intake
    pub number: u32,
    pub enrol: EnrolDate,
    pub kind: ClassKind,
    pub master: String,
    pub assistant: String,
    pub teachers: Vec<String>,
    pub members: Vec<ClassMember>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudentRecord {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub school: String,
    pub name: String,
    pub sex: u8,
    /// School-issued student number
    pub sn: String,
    pub id_card: String,
    /// Registration number derived from the card
    pub sid: String,
    /// Class number within the intake, used when attaching to a class
    pub class_number: u32,
    pub enrol: EnrolDate,
    pub status: StudentStatus,
    pub entity: String,
    pub custodians: Vec<CustodianInfo>,
    pub tags: Vec<String>,
}

impl StudentRecord {
    pub fn has_custodian_phone(&self, phone: &str) -> bool {
        !phone.is_empty() && self.custodians.iter().any(|c| c.has_phone(phone))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeacherRecord {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub name: String,
    pub entity: String,
    /// External user account
    pub user: String,
    /// Scene of the school that created the teacher
    pub scene: String,
    pub classes: Vec<String>,
    pub subjects: Vec<String>,
    pub tags: Vec<String>,
    pub histories: Vec<HistoryInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LessonRecord {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub scene: String,
    pub name: String,
    pub remark: String,
    pub cover: String,
    pub weight: u32,
    pub tags: Vec<String>,
    pub assets: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleRecord {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub scene: String,
    pub lesson: String,
    pub place: String,
    /// `YYYY-MM-DD`
    pub date: String,
    /// Time window within the day, e.g. `12:30-13:30`
    pub times: String,
    pub limit_min: u32,
    pub limit_max: u32,
    pub status: ScheduleStatus,
    /// Registration window, unix seconds
    pub start_time: u64,
    pub end_time: u64,
    pub teachers: Vec<String>,
    pub tags: Vec<String>,
    pub users: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimetableRecord {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub school: String,
    pub class: String,
    pub year: u32,
    pub items: Vec<TimetableItem>,
}

impl_record!(SchoolRecord, Collection::Schools);
impl_record!(ClassRecord, Collection::Classes);
impl_record!(StudentRecord, Collection::Students);
impl_record!(TeacherRecord, Collection::Teachers);
impl_record!(LessonRecord, Collection::Lessons);
impl_record!(ScheduleRecord, Collection::Schedules);
impl_record!(TimetableRecord, Collection::Timetables);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_codes() {
        assert_eq!(u8::from(StudentStatus::Left), 3);
        assert_eq!(StudentStatus::try_from(4).unwrap(), StudentStatus::Unregistered);
        assert!(StudentStatus::try_from(99).is_err());
    }

    #[test]
    fn test_status_filter_from_code() {
        assert_eq!(StatusFilter::from_code(99).unwrap(), StatusFilter::All);
        assert_eq!(
            StatusFilter::from_code(2).unwrap(),
            StatusFilter::Only(StudentStatus::Finished)
        );
        assert!(StatusFilter::from_code(7).is_err());
        assert!(StatusFilter::All.matches(StudentStatus::Deleted));
        assert!(!StatusFilter::Only(StudentStatus::Active).matches(StudentStatus::Left));
    }

    #[test]
    fn test_meta_is_flattened() {
        let mut record = StudentRecord {
            meta: RecordMeta::created_by("admin"),
            name: "Li Lei".to_string(),
            ..Default::default()
        };
        record.meta.id = "s1".to_string();

        let doc = serde_json::to_value(&record).unwrap();
        assert_eq!(doc["id"], json!("s1"));
        assert_eq!(doc["creator"], json!("admin"));
        assert_eq!(doc["status"], json!(1));
        assert!(doc.get("deleted_at").is_none());

        let back: StudentRecord = serde_json::from_value(doc).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_missing_fields_default() {
        let record: ClassRecord = serde_json::from_value(json!({
            "id": "c1",
            "school": "sc1",
            "enrol": {"year": 2020, "month": 9, "day": 1}
        }))
        .unwrap();
        assert_eq!(record.meta.id, "c1");
        assert!(record.members.is_empty());
        assert_eq!(record.kind, ClassKind::Standard);
    }

    #[test]
    fn test_current_membership() {
        let member = ClassMember {
            id: "c1-1".to_string(),
            student: "s1".to_string(),
            status: StudentStatus::Left,
            remark: String::new(),
            updated_at: Utc::now(),
        };
        assert!(!member.is_current());
    }
}
