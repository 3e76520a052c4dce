//! Domain module
//!
//! Record shapes, status codes and the pure roster rules (grades, paging,
//! dates, identity cards).

pub mod date;
pub mod error;
pub mod grade;
pub mod identity;
pub mod page;
pub mod records;

pub use date::{parse_schedule_date, EnrolDate};
pub use error::DomainError;
pub use grade::{calculate_grade, class_full_name, clamp_max_grade, ClassStatus, DEFAULT_MAX_GRADE};
pub use page::{paginate, Page};
pub use records::{
    ClassKind, ClassMember, ClassRecord, Collection, CustodianInfo, HistoryInfo, HonorInfo,
    LessonRecord, Record, RecordMeta, ScheduleRecord, ScheduleStatus, SchoolRecord, SchoolStatus,
    StatusFilter, StudentRecord, StudentStatus, SubjectInfo, TeacherRecord, TimetableItem,
    TimetableRecord, HONOR_SEQUENCE, SUBJECT_SEQUENCE,
};
