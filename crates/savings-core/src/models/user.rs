use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{timestamp, Record};
use crate::api::ApiError;

/// A registered user. The logged-in one is held in the current-user slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "fechaRegistro", with = "timestamp::option", default)]
    pub registered_at: Option<NaiveDateTime>,
    #[serde(rename = "activo", default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Record for User {
    fn id(&self) -> i64 {
        self.id
    }
}

fn require(value: &str, what: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        Err(ApiError::validation(format!("{} is required", what)))
    } else {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        require(&self.email, "Email")?;
        require(&self.password, "Password")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub email: String,
    #[serde(rename = "nombre")]
    pub name: String,
    pub password: String,
}

impl Registration {
    pub fn validate(&self) -> Result<(), ApiError> {
        require(&self.email, "Email")?;
        require(&self.name, "Name")?;
        require(&self.password, "Password")
    }

    pub fn login_request(&self) -> LoginRequest {
        LoginRequest {
            email: self.email.clone(),
            password: self.password.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserUpdate {
    #[serde(rename = "nombre")]
    pub name: String,
    pub email: String,
}

impl UserUpdate {
    pub fn validate(&self) -> Result<(), ApiError> {
        require(&self.name, "Name")?;
        require(&self.email, "Email")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PasswordChange {
    pub password: String,
}

impl PasswordChange {
    pub fn validate(&self) -> Result<(), ApiError> {
        require(&self.password, "Password")
    }
}
