use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::GitHubConfig;
use crate::error::{AppError, Result};

/// How the adapter authenticates against the GitHub API.
#[derive(Clone)]
pub enum GitHubAuth {
    /// Personal access token used as-is.
    Token(String),
    /// GitHub App; installation tokens are minted from a signed JWT.
    App {
        app_id: u64,
        private_key_path: PathBuf,
        installation_id: u64,
    },
}

impl GitHubAuth {
    pub fn from_config(config: &GitHubConfig) -> Result<Self> {
        if let Some(token) = config.token.as_ref().filter(|t| !t.is_empty()) {
            return Ok(GitHubAuth::Token(token.clone()));
        }

        match (config.app_id, &config.private_key_path, config.installation_id) {
            (Some(app_id), Some(path), Some(installation_id)) => {
                if !path.exists() {
                    return Err(AppError::Config(format!(
                        "GitHub App private key not found at: {}",
                        path.display()
                    )));
                }
                Ok(GitHubAuth::App {
                    app_id,
                    private_key_path: path.clone(),
                    installation_id,
                })
            }
            _ => Err(AppError::Config(
                "set github.token, or github.app_id + github.private_key_path + github.installation_id"
                    .to_string(),
            )),
        }
    }
}

impl std::fmt::Debug for GitHubAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GitHubAuth::Token(_) => f.write_str("Token([REDACTED])"),
            GitHubAuth::App {
                app_id,
                installation_id,
                ..
            } => f
                .debug_struct("App")
                .field("app_id", app_id)
                .field("installation_id", installation_id)
                .finish(),
        }
    }
}

#[derive(Debug, Serialize)]
struct JwtClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

/// Generate a JWT for GitHub App authentication.
pub fn generate_app_jwt(app_id: u64, private_key_path: &Path) -> Result<String> {
    let key_pem = std::fs::read(private_key_path).map_err(|e| {
        AppError::Config(format!(
            "Failed to read private key at {}: {e}",
            private_key_path.display()
        ))
    })?;

    let encoding_key = EncodingKey::from_rsa_pem(&key_pem)
        .map_err(|e| AppError::Config(format!("Invalid RSA private key: {e}")))?;

    let now = chrono::Utc::now().timestamp();
    let claims = JwtClaims {
        iat: now - 60,      // clock drift allowance
        exp: now + 10 * 60, // 10 minute maximum
        iss: app_id.to_string(),
    };

    encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
        .map_err(|e| AppError::Config(format!("Failed to generate JWT: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_takes_precedence() {
        let config = GitHubConfig {
            token: Some("ghp_abc".to_string()),
            app_id: Some(1),
            ..GitHubConfig::default()
        };
        assert!(matches!(
            GitHubAuth::from_config(&config).unwrap(),
            GitHubAuth::Token(t) if t == "ghp_abc"
        ));
    }

    #[test]
    fn test_missing_credentials_is_config_error() {
        let err = GitHubAuth::from_config(&GitHubConfig::default()).unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_app_requires_existing_key() {
        let config = GitHubConfig {
            app_id: Some(1),
            private_key_path: Some(PathBuf::from("/nonexistent/key.pem")),
            installation_id: Some(2),
            ..GitHubConfig::default()
        };
        let err = GitHubAuth::from_config(&config).unwrap_err().to_string();
        assert!(err.contains("private key not found"));
    }

    #[test]
    fn test_jwt_rejects_garbage_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.pem");
        std::fs::write(&path, "not a key").unwrap();
        assert!(generate_app_jwt(1, &path).is_err());
    }
}
