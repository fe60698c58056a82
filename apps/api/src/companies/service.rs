use serde::Deserialize;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::company::{Company, CompanySize, MembershipRole};

#[derive(Debug, Clone, Deserialize)]
pub struct NewCompany {
    pub name: String,
    pub description: Option<String>,
    pub industry: Option<String>,
    pub website: Option<String>,
    pub logo_url: Option<String>,
    pub location: Option<String>,
    pub size: Option<String>,
}

/// Partial profile edit; `None` leaves a column unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompanyUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub industry: Option<String>,
    pub website: Option<String>,
    pub logo_url: Option<String>,
    pub location: Option<String>,
    pub size: Option<String>,
}

fn validate_name(name: &str) -> Result<String, AppError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("Company name must not be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

fn validate_size(size: Option<&str>) -> Result<Option<&'static str>, AppError> {
    size.map(|raw| {
        CompanySize::parse(raw)
            .map(|s| s.as_str())
            .ok_or_else(|| AppError::Validation(format!("Unknown company size '{raw}'")))
    })
    .transpose()
}

fn validate_website(website: Option<&str>) -> Result<(), AppError> {
    match website {
        Some(url) if !(url.starts_with("https://") || url.starts_with("http://")) => Err(
            AppError::Validation(format!("Website '{url}' must start with http:// or https://")),
        ),
        _ => Ok(()),
    }
}

/// Inserts the company and the creator's `owner` membership in one transaction.
pub async fn create_company(
    pool: &PgPool,
    owner_id: Uuid,
    new: &NewCompany,
) -> Result<Company, AppError> {
    let name = validate_name(&new.name)?;
    let size = validate_size(new.size.as_deref())?;
    validate_website(new.website.as_deref())?;

    let mut tx = pool.begin().await?;

    let company = sqlx::query_as::<_, Company>(
        r#"
        INSERT INTO companies (name, description, industry, website, logo_url, location, size)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(&name)
    .bind(&new.description)
    .bind(&new.industry)
    .bind(&new.website)
    .bind(&new.logo_url)
    .bind(&new.location)
    .bind(size)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO company_members (company_id, user_id, role) VALUES ($1, $2, $3)")
        .bind(company.id)
        .bind(owner_id)
        .bind(MembershipRole::Owner.as_str())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    info!("Created company {} ({}) owned by {owner_id}", company.id, company.name);
    Ok(company)
}

/// Loads a company the user belongs to.
pub async fn get_company(pool: &PgPool, company_id: Uuid, user_id: Uuid) -> Result<Company, AppError> {
    sqlx::query_as::<_, Company>(
        r#"
        SELECT c.*
        FROM companies c
        JOIN company_members m ON m.company_id = c.id
        WHERE c.id = $1 AND m.user_id = $2
        "#,
    )
    .bind(company_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Company {company_id} not found")))
}

/// Applies a profile edit. The membership check is repeated in SQL, so a
/// stale client-side role can never widen access.
pub async fn update_company(
    pool: &PgPool,
    company_id: Uuid,
    user_id: Uuid,
    update: &CompanyUpdate,
) -> Result<Company, AppError> {
    let name = update.name.as_deref().map(validate_name).transpose()?;
    let size = validate_size(update.size.as_deref())?;
    validate_website(update.website.as_deref())?;

    let updated = sqlx::query_as::<_, Company>(
        r#"
        UPDATE companies SET
            name        = COALESCE($3, name),
            description = COALESCE($4, description),
            industry    = COALESCE($5, industry),
            website     = COALESCE($6, website),
            logo_url    = COALESCE($7, logo_url),
            location    = COALESCE($8, location),
            size        = COALESCE($9, size)
        WHERE id = $1
          AND EXISTS (
              SELECT 1 FROM company_members m
              WHERE m.company_id = $1 AND m.user_id = $2 AND m.role IN ('owner', 'admin')
          )
        RETURNING *
        "#,
    )
    .bind(company_id)
    .bind(user_id)
    .bind(name)
    .bind(&update.description)
    .bind(&update.industry)
    .bind(&update.website)
    .bind(&update.logo_url)
    .bind(&update.location)
    .bind(size)
    .fetch_optional(pool)
    .await?;

    match updated {
        Some(company) => {
            info!("Company {company_id} profile updated by {user_id}");
            Ok(company)
        }
        None => Err(AppError::Forbidden),
    }
}
