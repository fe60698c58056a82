use serde::Deserialize;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::job::{EmploymentType, JobPosting};

#[derive(Debug, Clone, Deserialize)]
pub struct NewJobPosting {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub location: Option<String>,
    pub employment_type: EmploymentType,
    #[serde(default)]
    pub is_published: bool,
}

fn validate_title(title: &str) -> Result<String, AppError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("Job title must not be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

/// Postings of a company, newest first. Rows are only visible to members.
pub async fn list_jobs(
    pool: &PgPool,
    company_id: Uuid,
    user_id: Uuid,
) -> Result<Vec<JobPosting>, AppError> {
    Ok(sqlx::query_as::<_, JobPosting>(
        r#"
        SELECT j.*
        FROM job_postings j
        WHERE j.company_id = $1
          AND EXISTS (
              SELECT 1 FROM company_members m
              WHERE m.company_id = $1 AND m.user_id = $2
          )
        ORDER BY j.created_at DESC
        "#,
    )
    .bind(company_id)
    .bind(user_id)
    .fetch_all(pool)
    .await?)
}

/// Inserts a posting if the user is owner or admin of the company.
pub async fn create_job(
    pool: &PgPool,
    company_id: Uuid,
    user_id: Uuid,
    new: &NewJobPosting,
) -> Result<JobPosting, AppError> {
    let title = validate_title(&new.title)?;

    let created = sqlx::query_as::<_, JobPosting>(
        r#"
        INSERT INTO job_postings
            (company_id, title, description, location, employment_type, is_published, created_by)
        SELECT $1, $3, $4, $5, $6, $7, $2
        WHERE EXISTS (
            SELECT 1 FROM company_members m
            WHERE m.company_id = $1 AND m.user_id = $2 AND m.role IN ('owner', 'admin')
        )
        RETURNING *
        "#,
    )
    .bind(company_id)
    .bind(user_id)
    .bind(&title)
    .bind(&new.description)
    .bind(&new.location)
    .bind(new.employment_type.as_str())
    .bind(new.is_published)
    .fetch_optional(pool)
    .await?;

    let job = created.ok_or(AppError::Forbidden)?;
    info!("Job {} '{}' posted to company {company_id}", job.id, job.title);
    Ok(job)
}
