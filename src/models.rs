//! Data models and DTOs (Data Transfer Objects)
//!
//! Request and response structures used by the HTTP API.

use crate::validation::{Artifact, ArtifactKind, FieldRef};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Generic success response
#[derive(Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn with_data(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct MigrateRequest {
    pub force: bool,
    pub retry_failed: bool,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateMigrationRequest {
    #[validate(length(min = 1, max = 100, message = "Migration name must be between 1 and 100 characters"))]
    pub name: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRequest {
    #[validate(range(min = 1, max = 1000, message = "steps must be between 1 and 1000"))]
    #[serde(default = "default_steps")]
    pub steps: usize,
}

fn default_steps() -> usize {
    1
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct DriftFixRequest {
    /// Run the generated migrations right away
    pub apply: bool,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyzeRequest {
    pub set_baseline: bool,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorStartRequest {
    #[validate(range(min = 1, max = 86400, message = "intervalSecs must be between 1 and 86400"))]
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FieldPayload {
    #[validate(length(min = 1, max = 63, message = "Table name must be between 1 and 63 characters"))]
    pub table: String,
    #[validate(length(min = 1, max = 63, message = "Column name must be between 1 and 63 characters"))]
    pub column: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactPayload {
    #[validate(length(min = 1, message = "Artifact name is required"))]
    pub name: String,
    #[validate(nested)]
    pub fields: Vec<FieldPayload>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    #[validate(length(min = 1, message = "At least one artifact is required"))]
    #[validate(nested)]
    pub artifacts: Vec<ArtifactPayload>,
}

impl ValidateRequest {
    pub fn into_artifacts(self, kind: ArtifactKind) -> Vec<Artifact> {
        self.artifacts
            .into_iter()
            .map(|a| Artifact {
                kind,
                name: a.name,
                fields: a
                    .fields
                    .into_iter()
                    .map(|f| FieldRef {
                        table: f.table,
                        column: f.column,
                        required: f.required,
                    })
                    .collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_steps_bounds() {
        let request: RollbackRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request.steps, 1);
        assert!(request.validate().is_ok());

        let request: RollbackRequest = serde_json::from_str(r#"{"steps": 0}"#).unwrap();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_validate_request_nested() {
        let request: ValidateRequest = serde_json::from_str(
            r#"{"artifacts": [{"name": "signup", "fields": [{"table": "", "column": "email"}]}]}"#,
        )
        .unwrap();
        assert!(request.validate().is_err());

        let request: ValidateRequest = serde_json::from_str(
            r#"{"artifacts": [{"name": "signup", "fields": [{"table": "users", "column": "email", "required": true}]}]}"#,
        )
        .unwrap();
        assert!(request.validate().is_ok());
        let artifacts = request.into_artifacts(ArtifactKind::Form);
        assert_eq!(artifacts[0].kind, ArtifactKind::Form);
        assert!(artifacts[0].fields[0].required);
    }

    #[test]
    fn test_validate_request_needs_artifacts() {
        let request: ValidateRequest = serde_json::from_str(r#"{"artifacts": []}"#).unwrap();
        let errors = request.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("artifacts"));

        let payload = ArtifactPayload {
            name: "signup".into(),
            fields: vec![FieldPayload {
                table: "users".into(),
                column: "email".into(),
                required: false,
            }],
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["fields"][0]["required"], false);
    }
}
