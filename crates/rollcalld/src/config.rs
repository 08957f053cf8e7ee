use rollcall_core::StorageLayout;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address (default: 127.0.0.1:5000).
    pub bind: String,
    /// Directory holding the gallery blob and the attendance workbook.
    pub data_dir: PathBuf,
    /// Cache of downloaded roster photos, one file per name.
    pub image_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Maximum Euclidean distance accepted as a match. Defaults to the ArcFace
    /// cosine threshold converted to distance, not the core's 0.6.
    pub tolerance: f32,
    /// Timeout in seconds for each roster photo download.
    pub download_timeout_secs: u64,
    /// Request body cap in megabytes.
    pub max_upload_mb: usize,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = var("ROLLCALL_DATA_DIR").map(PathBuf::from).unwrap_or_else(|| {
            var("XDG_DATA_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| {
                    let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                    PathBuf::from(home).join(".local/share")
                })
                .join("rollcall")
        });

        let image_dir = var("ROLLCALL_IMAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("images"));

        let model_dir = var("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(rollcall_vision::default_model_dir);

        Self {
            bind: var("ROLLCALL_BIND").unwrap_or_else(|| "127.0.0.1:5000".to_string()),
            data_dir,
            image_dir,
            model_dir,
            tolerance: parsed(&var, "ROLLCALL_TOLERANCE", rollcall_vision::default_tolerance()),
            download_timeout_secs: parsed(&var, "ROLLCALL_DOWNLOAD_TIMEOUT_SECS", 30),
            max_upload_mb: parsed(&var, "ROLLCALL_MAX_UPLOAD_MB", 25),
        }
    }

    pub fn storage_layout(&self) -> StorageLayout {
        StorageLayout {
            image_dir: self.image_dir.clone(),
            ..StorageLayout::under(&self.data_dir)
        }
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

fn parsed<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match var(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "unparseable setting, using default");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[("HOME", "/home/ada")]);
        assert_eq!(c.bind, "127.0.0.1:5000");
        assert_eq!(c.data_dir, PathBuf::from("/home/ada/.local/share/rollcall"));
        assert_eq!(c.image_dir, c.data_dir.join("images"));
        assert_eq!(c.model_dir, rollcall_vision::default_model_dir());
        assert_eq!(c.tolerance, rollcall_vision::default_tolerance());
        assert!((c.tolerance - 1.0954).abs() < 1e-3, "tolerance = {}", c.tolerance);
        assert_eq!(c.download_timeout(), Duration::from_secs(30));
        assert_eq!(c.max_upload_bytes(), 25 * 1024 * 1024);
    }

    #[test]
    fn test_xdg_data_home() {
        let c = config(&[("XDG_DATA_HOME", "/xdg"), ("HOME", "/home/ada")]);
        assert_eq!(c.data_dir, PathBuf::from("/xdg/rollcall"));
    }

    #[test]
    fn test_overrides() {
        let c = config(&[
            ("ROLLCALL_BIND", "0.0.0.0:8080"),
            ("ROLLCALL_DATA_DIR", "/srv/rollcall"),
            ("ROLLCALL_IMAGE_DIR", "/cache/photos"),
            ("ROLLCALL_MODEL_DIR", "/opt/models"),
            ("ROLLCALL_TOLERANCE", "0.45"),
            ("ROLLCALL_DOWNLOAD_TIMEOUT_SECS", "5"),
            ("ROLLCALL_MAX_UPLOAD_MB", "2"),
        ]);
        assert_eq!(c.bind, "0.0.0.0:8080");
        assert_eq!(c.tolerance, 0.45);
        assert_eq!(c.download_timeout_secs, 5);
        assert_eq!(c.max_upload_bytes(), 2 * 1024 * 1024);

        let layout = c.storage_layout();
        assert_eq!(layout.gallery_path, PathBuf::from("/srv/rollcall/model.json"));
        assert_eq!(layout.ledger_path, PathBuf::from("/srv/rollcall/attendance.xlsx"));
        assert_eq!(layout.image_dir, PathBuf::from("/cache/photos"));
        assert_eq!(c.model_dir, PathBuf::from("/opt/models"));
    }

    #[test]
    fn test_garbage_falls_back_to_default() {
        let c = config(&[("HOME", "/h"), ("ROLLCALL_TOLERANCE", "loose")]);
        assert_eq!(c.tolerance, rollcall_vision::default_tolerance());
    }
}
