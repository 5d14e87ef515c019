use std::path::Path;

use crate::config::model::LoadConfig;
use crate::error::PmeterError;

/// Read a JSON [`LoadConfig`] from disk. Missing fields take their defaults.
pub async fn read_config(path: impl AsRef<Path>) -> Result<LoadConfig, PmeterError> {
    let content = tokio::fs::read_to_string(path.as_ref()).await?;
    let config: LoadConfig = serde_json::from_str(&content)?;
    Ok(config)
}

/// Write a [`LoadConfig`] as pretty-printed JSON.
pub async fn write_config(config: &LoadConfig, path: impl AsRef<Path>) -> Result<(), PmeterError> {
    let content = serde_json::to_string_pretty(config)?;
    tokio::fs::write(path.as_ref(), content).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{LoopCount, SummaryOutput};
    use crate::pattern::KeyMode;

    #[tokio::test]
    async fn round_trip_write_then_read_preserves_config() {
        let config = LoadConfig {
            base_url: "http://127.0.0.1:9999".to_string(),
            users: 25,
            loop_count: LoopCount::Finite { count: 40 },
            key_mode: KeyMode::Canonical,
            output: SummaryOutput::Fixed {
                path: "out.json".into(),
            },
            ..LoadConfig::default()
        };
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join("load.json");

        write_config(&config, &path).await.expect("write_config should succeed");
        let loaded = read_config(&path).await.expect("read_config should succeed");
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn read_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_config(dir.path().join("absent.json")).await.unwrap_err();
        assert!(matches!(err, PmeterError::Io(_)));
    }

    #[tokio::test]
    async fn read_malformed_file_is_serde_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        tokio::fs::write(&path, "{ users: ").await.unwrap();
        let err = read_config(&path).await.unwrap_err();
        assert!(matches!(err, PmeterError::Serde(_)));
    }
}
