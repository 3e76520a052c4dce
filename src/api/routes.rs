//! API Routes
//!
//! HTTP endpoint definitions over the roster registry.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::domain::{
    paginate, ClassKind, ClassStatus, Page, SchoolRecord, StatusFilter, StudentRecord,
    StudentStatus,
};
use crate::error::AppError;
use crate::roster::{ClassView, NewSchool, NewStudent, Registry, Student};

/// Shared handler state
pub type AppState = Arc<Registry>;

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_number")]
    pub number: u32,
}

fn default_number() -> u32 {
    10
}

#[derive(Debug, Deserialize)]
pub struct ClassesQuery {
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_number")]
    pub number: u32,
    #[serde(default)]
    pub status: Option<ClassStatus>,
}

#[derive(Debug, Deserialize)]
pub struct StudentsQuery {
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_number")]
    pub number: u32,
    /// Student status code; 99 selects every status
    #[serde(default)]
    pub status: Option<u8>,
}

#[derive(Debug, Deserialize)]
pub struct CreateClassesRequest {
    pub name: String,
    /// `Y/M/D`
    pub enrol: String,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub kind: ClassKind,
    #[serde(default)]
    pub operator: String,
}

#[derive(Debug, Serialize)]
pub struct CreateStudentResponse {
    pub student: StudentRecord,
    pub class: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OperatorQuery {
    #[serde(default)]
    pub operator: String,
}

#[derive(Debug, Deserialize)]
pub struct BindEntityRequest {
    pub entity: String,
    #[serde(default)]
    pub operator: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: u8,
    #[serde(default)]
    pub operator: String,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/schools", get(list_schools).post(create_school))
        .route("/schools/:id", get(get_school))
        .route("/schools/:id/classes", get(list_classes).post(create_classes))
        .route("/schools/:id/students", get(list_students).post(create_student))
        .route("/schools/:id/students/:student_id", delete(remove_student))
        .route("/schools/:id/students/:student_id/entity", post(bind_entity))
        .route("/schools/:id/students/:student_id/status", put(update_status))
}

fn student_records(page: Page<Student>) -> Page<StudentRecord> {
    page.map(Student::into_record)
}

// =========================================================================
// Schools
// =========================================================================

async fn list_schools(
    State(registry): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<SchoolRecord>>, AppError> {
    let page = registry.schools_page(query.page, query.number).await;
    let mut records = Vec::with_capacity(page.items.len());
    for school in &page.items {
        records.push(school.snapshot().await);
    }
    Ok(Json(Page {
        total: page.total,
        max_page: page.max_page,
        items: records,
    }))
}

async fn create_school(
    State(registry): State<AppState>,
    Json(request): Json<NewSchool>,
) -> Result<(StatusCode, Json<SchoolRecord>), AppError> {
    let school = registry.create_school(request).await?;
    Ok((StatusCode::CREATED, Json(school.snapshot().await)))
}

/// Resolve by scene key, then by identifier
async fn get_school(
    State(registry): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SchoolRecord>, AppError> {
    let school = registry.school_by(&id).await?;
    Ok(Json(school.snapshot().await))
}

// =========================================================================
// Classes
// =========================================================================

async fn list_classes(
    State(registry): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ClassesQuery>,
) -> Result<Json<Page<ClassView>>, AppError> {
    let school = registry.school_by(&id).await?;
    let page = school
        .classes_by_page(query.page, query.number, query.status)
        .await?;
    Ok(Json(page))
}

async fn create_classes(
    State(registry): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CreateClassesRequest>,
) -> Result<(StatusCode, Json<Vec<ClassView>>), AppError> {
    let school = registry.school_by(&id).await?;
    let classes = school
        .create_classes(
            &request.name,
            &request.enrol,
            &request.operator,
            request.count,
            request.kind,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(classes)))
}

// =========================================================================
// Students
// =========================================================================

async fn list_students(
    State(registry): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StudentsQuery>,
) -> Result<Json<Page<StudentRecord>>, AppError> {
    let school = registry.school_by(&id).await?;
    let page = match query.status.map(StatusFilter::from_code).transpose()? {
        None | Some(StatusFilter::All) => school.students_by_page(query.page, query.number).await?,
        Some(StatusFilter::Only(StudentStatus::Active)) => {
            school
                .active_students_by_page(query.page, query.number)
                .await?
        }
        Some(filter) => {
            let students = school.students_by_status(filter).await?;
            paginate(query.page, query.number, students)
        }
    };
    Ok(Json(student_records(page)))
}

async fn create_student(
    State(registry): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<NewStudent>,
) -> Result<(StatusCode, Json<CreateStudentResponse>), AppError> {
    let school = registry.school_by(&id).await?;
    let (student, class) = school.create_student(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateStudentResponse {
            student: student.into_record(),
            class,
        }),
    ))
}

async fn remove_student(
    State(registry): State<AppState>,
    Path((id, student_id)): Path<(String, String)>,
    Query(query): Query<OperatorQuery>,
) -> Result<StatusCode, AppError> {
    let school = registry.school_by(&id).await?;
    school.remove_student(&student_id, &query.operator).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn bind_entity(
    State(registry): State<AppState>,
    Path((id, student_id)): Path<(String, String)>,
    Json(request): Json<BindEntityRequest>,
) -> Result<Json<StudentRecord>, AppError> {
    let school = registry.school_by(&id).await?;
    let student = school
        .bind_student_entity(&student_id, &request.entity, &request.operator)
        .await?;
    Ok(Json(student.into_record()))
}

/// Change a stored status; the 99 query code is not a storable status
async fn update_status(
    State(registry): State<AppState>,
    Path((id, student_id)): Path<(String, String)>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<StudentRecord>, AppError> {
    let status = match StatusFilter::from_code(request.status)? {
        StatusFilter::Only(status) => status,
        StatusFilter::All => {
            return Err(AppError::InvalidRequest(
                "status 99 selects every status and cannot be stored".to_string(),
            ))
        }
    };
    let school = registry.school_by(&id).await?;
    let student = school
        .update_student_status(&student_id, status, &request.operator)
        .await?;
    Ok(Json(student.into_record()))
}
