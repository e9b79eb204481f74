use std::net::SocketAddr;
use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "RetiNet";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default listen address for the HTTP API.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

/// Base URL clients use to reach uploaded images.
pub const DEFAULT_PUBLIC_URL: &str = "http://localhost:8000";

/// Multipart body limit in megabytes.
pub const DEFAULT_MAX_UPLOAD_MB: usize = 20;

/// File name of the fine-tuned classification head inside the models directory.
pub const FINE_TUNED_WEIGHTS_FILE: &str = "retinet_v1.json";

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "retinet=info,retinet_lib=info,tower_http=info"
}

/// Get the application data directory.
/// `$RETINET_HOME` when set, otherwise ~/RetiNet/.
pub fn app_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("RETINET_HOME") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Get the uploads directory (served under `/uploads`)
pub fn uploads_dir() -> PathBuf {
    app_data_dir().join("uploads")
}

/// Get the models directory (backbone exports, fine-tuned heads)
pub fn models_dir() -> PathBuf {
    app_data_dir().join("models")
}

/// Path of the SQLite database holding scans and patients.
pub fn database_path() -> PathBuf {
    app_data_dir().join("retinet.db")
}

/// Runtime configuration for the HTTP service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    pub public_url: String,
    pub uploads_dir: PathBuf,
    pub database_path: PathBuf,
    pub weights_path: PathBuf,
    /// ONNX feature extractor. Ignored unless built with the `onnx` feature.
    pub backbone_path: Option<PathBuf>,
    pub max_upload_bytes: usize,
}

impl ServiceConfig {
    /// Build the configuration from `RETINET_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    /// Invalid values fall back to defaults with a warning.
    pub fn from_vars<F>(var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = match var("RETINET_BIND") {
            Some(raw) => raw.trim().parse().unwrap_or_else(|e| {
                tracing::warn!(value = %raw, error = %e, "Invalid RETINET_BIND, using default");
                default_bind_addr()
            }),
            None => default_bind_addr(),
        };

        let public_url = var("RETINET_PUBLIC_URL")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PUBLIC_URL.to_string());

        let max_upload_bytes = match var("RETINET_MAX_UPLOAD_MB") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|mb| *mb > 0)
                .and_then(megabytes)
                .unwrap_or_else(|| {
                    tracing::warn!(value = %raw, "Invalid RETINET_MAX_UPLOAD_MB, using default");
                    DEFAULT_MAX_UPLOAD_MB * 1024 * 1024
                }),
            None => DEFAULT_MAX_UPLOAD_MB * 1024 * 1024,
        };

        let backbone_path = var("RETINET_BACKBONE")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Self {
            bind_addr,
            public_url: normalize_public_url(&public_url),
            uploads_dir: uploads_dir(),
            database_path: database_path(),
            weights_path: models_dir().join(FINE_TUNED_WEIGHTS_FILE),
            backbone_path,
            max_upload_bytes,
        }
    }

    /// Configuration rooted at an arbitrary directory (tests, embedded use).
    pub fn rooted_at(root: &std::path::Path) -> Self {
        Self {
            bind_addr: default_bind_addr(),
            public_url: DEFAULT_PUBLIC_URL.to_string(),
            uploads_dir: root.join("uploads"),
            database_path: root.join("retinet.db"),
            weights_path: root.join("models").join(FINE_TUNED_WEIGHTS_FILE),
            backbone_path: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_MB * 1024 * 1024,
        }
    }

    /// Public URL for an uploaded file name.
    pub fn file_url(&self, file_name: &str) -> String {
        format!("{}/uploads/{}", self.public_url, file_name)
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

/// `mb` megabytes in bytes, `None` on overflow.
fn megabytes(mb: usize) -> Option<usize> {
    mb.checked_mul(1024 * 1024)
}

fn normalize_public_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_name_is_retinet() {
        assert_eq!(APP_NAME, "RetiNet");
    }

    #[test]
    fn default_bind_matches_constant() {
        assert_eq!(default_bind_addr().to_string(), DEFAULT_BIND_ADDR);
    }

    #[test]
    fn derived_dirs_under_app_data() {
        let app = app_data_dir();
        assert!(uploads_dir().starts_with(&app));
        assert!(models_dir().starts_with(&app));
        assert!(database_path().ends_with("retinet.db"));
    }

    #[test]
    fn rooted_config_keeps_everything_under_root() {
        let root = std::path::Path::new("/tmp/retinet-test");
        let cfg = ServiceConfig::rooted_at(root);
        assert!(cfg.uploads_dir.starts_with(root));
        assert!(cfg.database_path.starts_with(root));
        assert!(cfg.weights_path.ends_with("models/retinet_v1.json"));
        assert_eq!(cfg.max_upload_bytes, 20 * 1024 * 1024);
    }

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: std::collections::HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn unset_vars_give_defaults() {
        let cfg = ServiceConfig::from_vars(vars(&[]));
        assert_eq!(cfg.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(cfg.public_url, DEFAULT_PUBLIC_URL);
        assert_eq!(cfg.max_upload_bytes, DEFAULT_MAX_UPLOAD_MB * 1024 * 1024);
        assert!(cfg.backbone_path.is_none());
        assert!(cfg.weights_path.ends_with("models/retinet_v1.json"));
    }

    #[test]
    fn valid_vars_are_honoured() {
        let cfg = ServiceConfig::from_vars(vars(&[
            ("RETINET_BIND", "127.0.0.1:9100"),
            ("RETINET_PUBLIC_URL", "https://scans.example.org/"),
            ("RETINET_MAX_UPLOAD_MB", " 5 "),
            ("RETINET_BACKBONE", "/opt/models/backbone.onnx"),
        ]));
        assert_eq!(cfg.bind_addr.to_string(), "127.0.0.1:9100");
        assert_eq!(cfg.public_url, "https://scans.example.org");
        assert_eq!(cfg.max_upload_bytes, 5 * 1024 * 1024);
        assert_eq!(
            cfg.backbone_path.as_deref(),
            Some(std::path::Path::new("/opt/models/backbone.onnx"))
        );
    }

    #[test]
    fn invalid_vars_fall_back_to_defaults() {
        let default_bytes = DEFAULT_MAX_UPLOAD_MB * 1024 * 1024;
        let overflowing = (usize::MAX / 1024).to_string();
        for upload in ["0", "-3", "lots", overflowing.as_str()] {
            let cfg = ServiceConfig::from_vars(vars(&[
                ("RETINET_BIND", "not-an-address"),
                ("RETINET_PUBLIC_URL", "   "),
                ("RETINET_MAX_UPLOAD_MB", upload),
                ("RETINET_BACKBONE", ""),
            ]));
            assert_eq!(cfg.bind_addr.to_string(), DEFAULT_BIND_ADDR);
            assert_eq!(cfg.public_url, DEFAULT_PUBLIC_URL);
            assert_eq!(cfg.max_upload_bytes, default_bytes, "RETINET_MAX_UPLOAD_MB={upload}");
            assert!(cfg.backbone_path.is_none());
        }
    }

    #[test]
    fn megabytes_rejects_overflow() {
        assert_eq!(megabytes(20), Some(20 * 1024 * 1024));
        assert_eq!(megabytes(usize::MAX), None);
    }

    #[test]
    fn file_url_joins_without_double_slash() {
        let mut cfg = ServiceConfig::rooted_at(std::path::Path::new("/tmp"));
        cfg.public_url = normalize_public_url("http://example.org:9000/");
        assert_eq!(
            cfg.file_url("abc_scan.png"),
            "http://example.org:9000/uploads/abc_scan.png"
        );
    }
}
