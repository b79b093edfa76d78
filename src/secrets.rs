/// Secret installation: substitute literal placeholder tokens in the
/// verifier's config file with host-supplied secret values.
use crate::config::PlaceholderSpec;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Named secret values supplied by the host environment.
#[derive(Debug, Default, Clone)]
pub struct SecretsRecord {
    values: HashMap<String, String>,
}

impl SecretsRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect secrets from environment variables, one per placeholder key.
    /// Absent or empty variables are treated as not provided.
    pub fn from_env(specs: &[PlaceholderSpec]) -> Self {
        let mut record = Self::new();
        for spec in specs {
            if let Ok(value) = std::env::var(&spec.key) {
                if !value.is_empty() {
                    record.insert(&spec.key, value);
                }
            }
        }
        record
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Errors that can occur during secret installation.
#[derive(Debug)]
pub enum SecretsError {
    /// A required secret key was not provided by the host.
    MissingSecret { key: String },
    /// Failed to read or write the config file.
    ConfigFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for SecretsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretsError::MissingSecret { key } => {
                write!(f, "{} is required but not provided", key)
            }
            SecretsError::ConfigFile { path, source } => {
                write!(
                    f,
                    "failed to update config file {}: {}",
                    path.display(),
                    source
                )
            }
        }
    }
}

impl std::error::Error for SecretsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SecretsError::MissingSecret { .. } => None,
            SecretsError::ConfigFile { source, .. } => Some(source),
        }
    }
}

/// Install secrets into the config file at `config_path`.
///
/// Validates required keys before touching the file, then reads the file
/// fully, replaces the first occurrence of each placeholder token whose
/// secret is present, and writes the file back in full. This is single-pass
/// literal substring substitution, not templating: a token that has already
/// been substituted simply no longer matches, so a re-run is a no-op.
pub fn install_secrets(
    secrets: &SecretsRecord,
    config_path: &Path,
    placeholders: &[PlaceholderSpec],
) -> Result<(), SecretsError> {
    for spec in placeholders {
        if spec.required && secrets.get(&spec.key).is_none() {
            return Err(SecretsError::MissingSecret {
                key: spec.key.clone(),
            });
        }
    }

    let mut content =
        std::fs::read_to_string(config_path).map_err(|e| SecretsError::ConfigFile {
            path: config_path.to_path_buf(),
            source: e,
        })?;

    let mut substituted = 0usize;
    for spec in placeholders {
        let Some(value) = secrets.get(&spec.key) else {
            continue;
        };
        if content.contains(&spec.token) {
            content = content.replacen(&spec.token, value, 1);
            substituted += 1;
        }
    }

    std::fs::write(config_path, &content).map_err(|e| SecretsError::ConfigFile {
        path: config_path.to_path_buf(),
        source: e,
    })?;

    tracing::info!(
        path = %config_path.display(),
        substituted,
        "configuration file updated with secrets"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecretsConfig;

    const PRIVATE_KEY: &str = "CARV_PRIVATE_KEY";
    const CLAIMER: &str = "CARV_REWARD_CLAIMER_ADDR";

    fn default_placeholders() -> Vec<PlaceholderSpec> {
        SecretsConfig::default().placeholders
    }

    fn write_template(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config_docker.yaml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_missing_required_key_fails_without_writing() {
        let template = "private_key: ${CARV_PRIVATE_KEY}\n";
        let (_dir, path) = write_template(template);

        let mut secrets = SecretsRecord::new();
        secrets.insert(CLAIMER, "0xabc");

        let err = install_secrets(&secrets, &path, &default_placeholders()).unwrap_err();
        assert!(matches!(err, SecretsError::MissingSecret { ref key } if key == PRIVATE_KEY));
        assert!(err.to_string().contains("required but not provided"));

        // File untouched
        assert_eq!(std::fs::read_to_string(&path).unwrap(), template);
    }

    #[test]
    fn test_missing_required_key_checked_before_file_access() {
        let secrets = SecretsRecord::new();
        let err = install_secrets(
            &secrets,
            Path::new("/nonexistent/config.yaml"),
            &default_placeholders(),
        )
        .unwrap_err();
        // Validation failure, not a file error
        assert!(matches!(err, SecretsError::MissingSecret { .. }));
    }

    #[test]
    fn test_both_placeholders_substituted_exactly_once() {
        let (_dir, path) = write_template(
            "private_key: ${CARV_PRIVATE_KEY}\n\
             reward_claimer: ${CARV_REWARD_CLAIMER_ADDR:-0x0000000000000000000000000000000000000000}\n",
        );

        let mut secrets = SecretsRecord::new();
        secrets.insert(PRIVATE_KEY, "0xdeadbeef");
        secrets.insert(CLAIMER, "0xclaimer");

        install_secrets(&secrets, &path, &default_placeholders()).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(!written.contains("${CARV_PRIVATE_KEY}"));
        assert!(!written.contains("${CARV_REWARD_CLAIMER_ADDR"));
        assert_eq!(written.matches("0xdeadbeef").count(), 1);
        assert_eq!(written.matches("0xclaimer").count(), 1);
    }

    #[test]
    fn test_optional_secret_without_matching_token_is_noop() {
        let template = "private_key: ${CARV_PRIVATE_KEY}\nreward_claimer: already-set\n";
        let (_dir, path) = write_template(template);

        let mut secrets = SecretsRecord::new();
        secrets.insert(PRIVATE_KEY, "0xkey");
        secrets.insert(CLAIMER, "0xclaimer");

        install_secrets(&secrets, &path, &default_placeholders()).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("reward_claimer: already-set"));
        assert!(!written.contains("0xclaimer"));
    }

    #[test]
    fn test_optional_placeholder_left_alone_when_secret_absent() {
        let (_dir, path) = write_template(
            "private_key: ${CARV_PRIVATE_KEY}\n\
             reward_claimer: ${CARV_REWARD_CLAIMER_ADDR:-0x0000000000000000000000000000000000000000}\n",
        );

        let mut secrets = SecretsRecord::new();
        secrets.insert(PRIVATE_KEY, "0xkey");

        install_secrets(&secrets, &path, &default_placeholders()).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        // The optional token survives verbatim, default suffix included
        assert!(written.contains(
            "${CARV_REWARD_CLAIMER_ADDR:-0x0000000000000000000000000000000000000000}"
        ));
    }

    #[test]
    fn test_rerun_after_substitution_is_noop() {
        let (_dir, path) = write_template("private_key: ${CARV_PRIVATE_KEY}\n");

        let mut secrets = SecretsRecord::new();
        secrets.insert(PRIVATE_KEY, "0xkey");
        let placeholders = default_placeholders();

        install_secrets(&secrets, &path, &placeholders).unwrap();
        let first = std::fs::read_to_string(&path).unwrap();

        install_secrets(&secrets, &path, &placeholders).unwrap();
        let second = std::fs::read_to_string(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_only_first_occurrence_replaced() {
        let (_dir, path) =
            write_template("a: ${CARV_PRIVATE_KEY}\nb: ${CARV_PRIVATE_KEY}\n");

        let mut secrets = SecretsRecord::new();
        secrets.insert(PRIVATE_KEY, "0xkey");

        install_secrets(&secrets, &path, &default_placeholders()).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written.matches("0xkey").count(), 1);
        assert_eq!(written.matches("${CARV_PRIVATE_KEY}").count(), 1);
    }

    #[test]
    fn test_unreadable_config_is_file_error() {
        let mut secrets = SecretsRecord::new();
        secrets.insert(PRIVATE_KEY, "0xkey");

        let err = install_secrets(
            &secrets,
            Path::new("/nonexistent/config.yaml"),
            &default_placeholders(),
        )
        .unwrap_err();
        assert!(matches!(err, SecretsError::ConfigFile { .. }));
        assert!(err.to_string().contains("failed to update config file"));
    }

    #[test]
    fn test_get_and_insert() {
        let mut record = SecretsRecord::new();
        assert!(record.get("K").is_none());
        record.insert("K", "v");
        assert_eq!(record.get("K"), Some("v"));
    }
}
