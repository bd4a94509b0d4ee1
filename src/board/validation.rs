//! Request payload parsing and validation.
//!
//! A body is first deserialized into its request struct; a malformed body
//! (bad JSON, wrong types, unknown enum values, missing required fields)
//! becomes one payload-level `FieldError`. Field constraints are then
//! checked with `validator`, and every violation is reported at once.
//! Unknown keys are ignored.

use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use taskdeck_common::{Role, TaskStatus};
use validator::{Validate, ValidationErrors};

use super::api::ApiError;
use crate::errors::{BoardError, FieldError};

/// JSON body extractor that rejects with a 400 field-error list.
#[derive(Debug, Clone)]
pub struct ValidJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let body = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        Ok(Self(parse(&body)?))
    }
}

/// Deserialize `body` as `T` and run its field validators.
pub fn parse<T>(body: &[u8]) -> Result<T, BoardError>
where
    T: DeserializeOwned + Validate,
{
    let value: T = serde_json::from_slice(body).map_err(|e| {
        let message = match e.classify() {
            serde_json::error::Category::Data => e.to_string(),
            _ => format!("Invalid JSON: {}", e),
        };
        BoardError::Validation(vec![FieldError::new("", message)])
    })?;
    value
        .validate()
        .map_err(|errors| BoardError::Validation(field_errors(&errors)))?;
    Ok(value)
}

/// Flatten `validator` output into `{path, message}` pairs, ordered by field.
pub fn field_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut out: Vec<FieldError> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            let field = field.to_string();
            errs.iter().map(move |e| {
                let message = match &e.message {
                    Some(m) => m.to_string(),
                    None => format!("Invalid value ({})", e.code),
                };
                FieldError::new(&field, message)
            })
        })
        .collect();
    out.sort_by(|a, b| a.path.cmp(&b.path));
    out
}

/// An optional field that, when present, must not be `null`.
pub fn present<'de, D, T>(de: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(de).map(Some)
}

/// An optional field where `null` means "clear": `Some(None)`.
pub fn nullable<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

/// `POST /api/projects`
#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
pub struct CreateProject {
    #[validate(length(min = 1, message = "String must contain at least 1 character(s)"))]
    pub title: String,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<String>,
}

fn default_member_role() -> Role {
    Role::Viewer
}

/// `POST /api/projects/{id}/members`
#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
pub struct AddMember {
    #[validate(length(min = 1, message = "String must contain at least 1 character(s)"))]
    pub email: String,
    #[serde(default = "default_member_role")]
    pub role: Role,
}

/// `PATCH /api/tasks/{id}/move`: the drop target of a drag.
#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
pub struct MoveTask {
    pub status: TaskStatus,
    #[validate(range(min = 0, message = "Number must be greater than or equal to 0"))]
    pub order: i32,
}
