//! Users and the caller identity passed into billing operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
    Internal,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::Internal => "internal",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "admin" => Role::Admin,
            "internal" => Role::Internal,
            _ => Role::User,
        }
    }
}

/// User account as stored.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub email: String,
    pub role: String,
    pub created_utc: DateTime<Utc>,
}

impl User {
    pub fn actor(&self) -> BillingActor {
        BillingActor {
            user_id: self.user_id,
            company_id: self.company_id,
            role: Role::from_string(&self.role),
        }
    }

    pub fn contact(&self) -> UserContact {
        UserContact {
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }
}

/// Input for creating a user.
#[derive(Debug, Clone)]
pub struct CreateUser {
    pub company_id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
}

/// Where notifications for a user are delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContact {
    pub name: String,
    pub email: String,
}

/// Authenticated caller of a billing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingActor {
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub role: Role,
}

impl BillingActor {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Admins and internal reviewers manage company-wide records.
    pub fn is_staff(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Internal)
    }
}
