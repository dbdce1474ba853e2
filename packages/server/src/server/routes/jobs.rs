use std::collections::BTreeMap;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use voc_pipeline::{ClassifiedStatus, DebugStep, Job, JobStatus, NewJob, SourceType, TaskRecord};

use crate::server::app::AppState;
use crate::server::error::ApiError;

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub id: String,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct TasksResponse {
    pub job_id: String,
    pub statuses: BTreeMap<SourceType, ClassifiedStatus>,
    pub records: Vec<TaskRecord>,
}

/// Submit a research job
pub async fn submit_job_handler(
    Extension(state): Extension<AppState>,
    Json(new_job): Json<NewJob>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let job = state.pipeline.submit(new_job).await?;
    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            id: job.id,
            status: job.status,
        }),
    ))
}

pub async fn get_job_handler(
    Extension(state): Extension<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.pipeline.job(&job_id).await?))
}

/// Classified status per source, plus retry bookkeeping
pub async fn job_tasks_handler(
    Extension(state): Extension<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<TasksResponse>, ApiError> {
    let statuses = state.pipeline.task_statuses(&job_id).await?;
    let records = state.pipeline.task_records(&job_id).await?;
    Ok(Json(TasksResponse {
        job_id,
        statuses,
        records,
    }))
}

/// Debug steps; unknown IDs return an empty list
pub async fn job_steps_handler(
    Extension(state): Extension<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Vec<DebugStep>>, ApiError> {
    Ok(Json(state.pipeline.debug_steps(&job_id).await?))
}
