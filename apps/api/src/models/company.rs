use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// An employer organization. Role is never stored here; it lives on the
/// membership edge between a user and the company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub industry: Option<String>,
    pub website: Option<String>,
    pub logo_url: Option<String>,
    pub location: Option<String>,
    pub size: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Headcount band. Stored on `Company.size` in its `as_str` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompanySize {
    Micro,
    Small,
    Medium,
    Large,
    Enterprise,
}

impl CompanySize {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompanySize::Micro => "1-10",
            CompanySize::Small => "11-50",
            CompanySize::Medium => "51-200",
            CompanySize::Large => "201-500",
            CompanySize::Enterprise => "500+",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "1-10" => Some(CompanySize::Micro),
            "11-50" => Some(CompanySize::Small),
            "51-200" => Some(CompanySize::Medium),
            "201-500" => Some(CompanySize::Large),
            "500+" => Some(CompanySize::Enterprise),
            _ => None,
        }
    }
}

/// Caller's role inside a company. Strict hierarchy: owner ⊇ admin ⊇ member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipRole {
    Owner,
    Admin,
    Member,
}

impl MembershipRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipRole::Owner => "owner",
            MembershipRole::Admin => "admin",
            MembershipRole::Member => "member",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "owner" => Some(MembershipRole::Owner),
            "admin" => Some(MembershipRole::Admin),
            "member" => Some(MembershipRole::Member),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            MembershipRole::Owner => 3,
            MembershipRole::Admin => 2,
            MembershipRole::Member => 1,
        }
    }

    /// True when this role may perform an action that requires `required`.
    pub fn satisfies(&self, required: MembershipRole) -> bool {
        self.rank() >= required.rank()
    }
}

/// Flat row produced by the membership join. Converted into
/// [`CompanyMembership`] once the role string is decoded.
#[derive(Debug, Clone, FromRow)]
pub struct CompanyMembershipRow {
    pub company_id: Uuid,
    pub role: String,
    pub member_since: DateTime<Utc>,
    #[sqlx(flatten)]
    pub company: Company,
}

/// A company as seen by one user: the membership edge plus the joined company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyMembership {
    pub company_id: Uuid,
    pub role: MembershipRole,
    pub created_at: DateTime<Utc>,
    pub company: Company,
}

impl TryFrom<CompanyMembershipRow> for CompanyMembership {
    type Error = anyhow::Error;

    fn try_from(row: CompanyMembershipRow) -> Result<Self, Self::Error> {
        let role = MembershipRole::parse(&row.role).ok_or_else(|| {
            anyhow::anyhow!(
                "unknown membership role '{}' for company {}",
                row.role,
                row.company_id
            )
        })?;
        Ok(CompanyMembership {
            company_id: row.company_id,
            role,
            created_at: row.member_since,
            company: row.company,
        })
    }
}
