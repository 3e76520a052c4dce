//! Roster module
//!
//! The in-memory roster cache and entity lifecycle layer. Callers resolve a
//! [`School`] through the [`Registry`] and operate on it; every mutation is
//! written to the store first and applied to the cache only when the write
//! succeeds.

pub mod class;
pub mod error;
pub mod lesson;
pub mod registry;
pub mod schedule;
pub mod school;
pub mod student;
pub mod teacher;
pub mod timetable;

pub use class::{Class, ClassView};
pub use error::{RosterError, RosterResult};
pub use lesson::Lesson;
pub use registry::{NewSchool, Registry};
pub use schedule::{NewSchedule, Schedule};
pub use school::{GradeCount, HonorKind, NewStudent, School};
pub use student::Student;
pub use teacher::{NewTeacher, Teacher, TeacherDirectory};
pub use timetable::Timetable;
