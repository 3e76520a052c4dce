//! Lessons, schedules and timetables of a school
//!
//! Lessons and schedules belong to the school scene; timetables belong to
//! one of the school's classes.

use super::School;
use crate::domain::{parse_schedule_date, TimetableItem};
use crate::roster::error::{require, RosterError, RosterResult};
use crate::roster::lesson::Lesson;
use crate::roster::schedule::{NewSchedule, Schedule};
use crate::roster::timetable::Timetable;
use crate::store::Filter;

impl School {
    pub async fn create_lesson(
        &self,
        name: &str,
        remark: &str,
        cover: &str,
        tags: Vec<String>,
        operator: &str,
    ) -> RosterResult<Lesson> {
        let scene = self.scene().await;
        Lesson::create(&self.repo, &scene, name, remark, cover, tags, operator).await
    }

    pub async fn lessons(&self) -> RosterResult<Vec<Lesson>> {
        let scene = self.scene().await;
        Lesson::find(&self.repo, &Filter::by("scene", scene)).await
    }

    pub async fn create_schedule(&self, request: NewSchedule) -> RosterResult<Schedule> {
        let scene = self.scene().await;
        Schedule::create(&self.repo, &scene, request).await
    }

    pub async fn schedules(&self) -> RosterResult<Vec<Schedule>> {
        let scene = self.scene().await;
        Schedule::find(&self.repo, &Filter::by("scene", scene)).await
    }

    /// Schedules on one `YYYY-MM-DD` date
    pub async fn schedules_by_date(&self, date: &str) -> RosterResult<Vec<Schedule>> {
        let date = parse_schedule_date(date)?;
        let scene = self.scene().await;
        let filter = Filter::by("scene", scene).eq("date", date.format("%Y-%m-%d").to_string());
        Schedule::find(&self.repo, &filter).await
    }

    /// Schedules dated within `from..=to`
    pub async fn schedules_between(&self, from: &str, to: &str) -> RosterResult<Vec<Schedule>> {
        let scene = self.scene().await;
        Schedule::between(&self.repo, &scene, from, to).await
    }

    /// Create the timetable of one of this school's classes
    pub async fn create_timetable(
        &self,
        class: &str,
        year: u32,
        items: Vec<TimetableItem>,
        operator: &str,
    ) -> RosterResult<Timetable> {
        require(class, "class id")?;
        if !self.had_class(class).await? {
            return Err(RosterError::not_found("class", class));
        }
        if self.timetable(class, year).await.is_ok() {
            return Err(RosterError::conflict(format!(
                "class {} already has a timetable for {}",
                class, year
            )));
        }
        Timetable::create(&self.repo, &self.id, class, year, items, operator).await
    }

    pub async fn timetable(&self, class: &str, year: u32) -> RosterResult<Timetable> {
        let filter = Filter::by("school", self.id.as_str())
            .eq("class", class)
            .eq("year", year);
        Timetable::find(&self.repo, &filter)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RosterError::not_found("timetable", format!("{}/{}", class, year)))
    }

    pub async fn timetables(&self, year: u32) -> RosterResult<Vec<Timetable>> {
        let filter = Filter::by("school", self.id.as_str()).eq("year", year);
        Timetable::find(&self.repo, &filter).await
    }
}
