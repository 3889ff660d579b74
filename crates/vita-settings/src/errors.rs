use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The file is not JSON, or a merged value has the wrong shape.
    #[error("settings are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{key} {reason}")]
    Invalid { key: &'static str, reason: &'static str },
}

pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_error_names_the_file() {
        let err = SettingsError::Read {
            path: PathBuf::from("/etc/vita/settings.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let shown = err.to_string();
        assert!(shown.starts_with("cannot read /etc/vita/settings.json"));
        assert!(shown.contains("denied"));
    }

    #[test]
    fn invalid_value_reads_as_a_sentence() {
        let err = SettingsError::Invalid { key: "runtime.maxToolRounds", reason: "must be at least 1" };
        assert_eq!(err.to_string(), "runtime.maxToolRounds must be at least 1");
    }

    #[test]
    fn json_errors_convert() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: SettingsError = parse.into();
        assert!(err.to_string().starts_with("settings are not valid JSON"));
    }
}
