use serde::Serialize;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeskError {
    #[error("config error: {0}")]
    Config(String),
    #[error("secrets missing: {message} (expected {})", path.display())]
    SecretsMissing { message: String, path: PathBuf },
    #[error("missing required environment variables: {}", .0.join(", "))]
    MissingEnvironment(Vec<String>),
    #[error("remote command error: {message}")]
    RemoteCommand {
        message: String,
        details: ProcessErrorDetails,
    },
    #[error("upload error: {message}")]
    Upload {
        message: String,
        details: ProcessErrorDetails,
    },
    #[error("provision error: {0}")]
    Provision(String),
    #[error("start verification failed: {0}")]
    StartVerification(String),
    #[error("could not parse provider response: {0}")]
    ResponseParse(String),
    #[error("unexpected provider response shape: {0}")]
    UnexpectedResponseShape(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProcessErrorDetails {
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_stderr: Option<String>,
}

impl DeskError {
    pub fn process_details(&self) -> Option<&ProcessErrorDetails> {
        match self {
            DeskError::RemoteCommand { details, .. } | DeskError::Upload { details, .. } => {
                Some(details)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_environment_lists_every_name() {
        let err = DeskError::MissingEnvironment(vec![
            "PROFILE_NAME".to_string(),
            "PROJECT_ID".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "missing required environment variables: PROFILE_NAME, PROJECT_ID"
        );
    }

    #[test]
    fn process_details_only_for_process_errors() {
        let details = ProcessErrorDetails {
            error_code: "ssh_auth_failed".to_string(),
            hint: None,
            command: Some("ssh host".to_string()),
            raw_stderr: None,
        };
        let err = DeskError::Upload {
            message: "scp failed".to_string(),
            details: details.clone(),
        };
        assert_eq!(err.process_details(), Some(&details));
        assert!(DeskError::Provision("boom".to_string())
            .process_details()
            .is_none());
    }
}
