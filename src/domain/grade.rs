//! Grade Calculator
//!
//! Maps an enrollment year to the current academic grade. The academic year
//! starts after the cutover month, so a pupil enrolled in year Y stays in
//! grade 1 until the cutover of year Y+1.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// Last month of the academic year; grades advance once it has passed
pub const ACADEMIC_CUTOVER_MONTH: u32 = 7;

/// Default and minimum number of grades in a school
pub const DEFAULT_MAX_GRADE: u32 = 6;

/// Compute the academic grade for an enrollment year as of `now`.
///
/// `diff = now.year - enrol_year`; past the cutover month the grade is
/// `diff + 1`, otherwise `max(diff, 1)`. Negative differences (enrollment in
/// the future) saturate at zero.
pub fn calculate_grade(enrol_year: u32, now: DateTime<Utc>) -> u32 {
    let diff = now.year() as i64 - enrol_year as i64;
    let grade = if now.month() > ACADEMIC_CUTOVER_MONTH {
        diff + 1
    } else {
        diff.max(1)
    };
    grade.max(0) as u32
}

/// Effective class status, always derived from grade and the school's max grade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassStatus {
    Active,
    Finished,
}

impl ClassStatus {
    /// Derive the status for `grade` under a school allowing `max_grade` grades
    pub fn derive(grade: u32, max_grade: u32) -> Self {
        if grade > max_grade {
            Self::Finished
        } else {
            Self::Active
        }
    }
}

/// Clamp a requested max grade to the supported floor
pub fn clamp_max_grade(max_grade: u32) -> u32 {
    max_grade.max(DEFAULT_MAX_GRADE)
}

/// Human readable class label, e.g. `Grade 3 Class 2`
pub fn class_full_name(grade: u32, number: u32) -> String {
    format!("Grade {} Class {}", grade, number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(year: i32, month: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, 15, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_grade_before_and_after_cutover() {
        assert_eq!(calculate_grade(2020, at(2026, 3)), 6);
        assert_eq!(calculate_grade(2020, at(2026, 7)), 6);
        assert_eq!(calculate_grade(2020, at(2026, 8)), 7);
        assert_eq!(calculate_grade(2020, at(2026, 9)), 7);
    }

    #[test]
    fn test_grade_in_enrollment_year() {
        // Enrolled in September, still grade 1 through the next summer
        assert_eq!(calculate_grade(2024, at(2024, 9)), 1);
        assert_eq!(calculate_grade(2024, at(2025, 2)), 1);
        assert_eq!(calculate_grade(2024, at(2025, 7)), 1);
        assert_eq!(calculate_grade(2024, at(2025, 8)), 2);
    }

    #[test]
    fn test_grade_future_enrollment_saturates() {
        assert_eq!(calculate_grade(2030, at(2026, 1)), 1);
        assert_eq!(calculate_grade(2030, at(2026, 9)), 0);
    }

    #[test]
    fn test_grade_is_monotonic() {
        let mut last = 0;
        for year in 2020..2030 {
            for month in 1..=12 {
                let grade = calculate_grade(2020, at(year, month));
                assert!(grade >= last, "grade dropped at {}-{}", year, month);
                last = grade;
            }
        }
    }

    #[test]
    fn test_grade_steps_by_one_at_cutover() {
        for year in 2021..2028 {
            let before = calculate_grade(2020, at(year, 7));
            let after = calculate_grade(2020, at(year, 8));
            assert_eq!(after, before + 1);
        }
    }

    #[test]
    fn test_class_status_derivation() {
        assert_eq!(ClassStatus::derive(6, 6), ClassStatus::Active);
        assert_eq!(ClassStatus::derive(7, 6), ClassStatus::Finished);
        assert_eq!(ClassStatus::derive(7, 9), ClassStatus::Active);
    }

    #[test]
    fn test_clamp_max_grade() {
        assert_eq!(clamp_max_grade(0), 6);
        assert_eq!(clamp_max_grade(3), 6);
        assert_eq!(clamp_max_grade(9), 9);
    }

    #[test]
    fn test_class_full_name() {
        assert_eq!(class_full_name(3, 2), "Grade 3 Class 2");
    }
}
