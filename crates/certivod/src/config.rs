use std::path::PathBuf;
use std::str::FromStr;

use certivo_core::{ConfigError, LivenessConfig};

/// Service configuration, loaded from `CERTIVO_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: 127.0.0.1:8080).
    pub bind_addr: String,
    /// Where uploads are staged while a session is verified.
    pub upload_dir: PathBuf,
    /// Path to the SQLite trusted-device database.
    pub db_path: PathBuf,
    /// Face-mesh ONNX model.
    pub model_path: PathBuf,
    /// Face-detector ONNX model that locates the face before the mesh runs.
    /// The mesh falls back to whole frames when this file does not exist.
    pub detector_path: PathBuf,
    /// Expected SHA-256 of the model; checked at startup when set.
    pub model_sha256: Option<String>,
    /// HMAC key for device credentials; generated on first start.
    pub token_key_path: PathBuf,
    /// Lifetime of an issued credential, in seconds.
    pub token_ttl_secs: u64,
    /// Timeout in seconds for one verification.
    pub verify_timeout_secs: u64,
    /// Largest accepted request body, in bytes.
    pub max_upload_bytes: usize,
    /// Device-trust score reported for every device.
    pub device_trust_score: f64,
    pub liveness: LivenessConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values are errors, never defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = get("CERTIVO_DATA_DIR").map(PathBuf::from).unwrap_or_else(|| {
            let base = get("XDG_DATA_HOME").map(PathBuf::from).unwrap_or_else(|| {
                let home = get("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            });
            base.join("certivo")
        });

        let path = |key: &str, default: PathBuf| get(key).map(PathBuf::from).unwrap_or(default);

        let liveness = match get("CERTIVO_LIVENESS_CONFIG") {
            Some(file) => LivenessConfig::load(std::path::Path::new(&file))?,
            None => LivenessConfig::default(),
        };

        let config = Self {
            bind_addr: get("CERTIVO_BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8080".to_string()),
            upload_dir: path("CERTIVO_UPLOAD_DIR", data_dir.join("uploads")),
            db_path: path("CERTIVO_DB_PATH", data_dir.join("certivo.db")),
            model_path: path("CERTIVO_MODEL_PATH", data_dir.join("models/face_mesh.onnx")),
            detector_path: path(
                "CERTIVO_DETECTOR_PATH",
                data_dir.join("models/face_detector.onnx"),
            ),
            model_sha256: get("CERTIVO_MODEL_SHA256"),
            token_key_path: path("CERTIVO_TOKEN_KEY_PATH", data_dir.join(".token_key")),
            token_ttl_secs: parse(&get, "CERTIVO_TOKEN_TTL_SECS", 900)?,
            verify_timeout_secs: parse(&get, "CERTIVO_VERIFY_TIMEOUT_SECS", 60)?,
            max_upload_bytes: upload_limit(&get)?,
            device_trust_score: parse(&get, "CERTIVO_DEVICE_TRUST_SCORE", 0.97)?,
            liveness,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.device_trust_score) {
            return Err(ConfigError::OutOfUnitRange {
                field: "device_trust_score",
                value: self.device_trust_score,
            });
        }
        for (field, value) in [
            ("token_ttl_secs", self.token_ttl_secs),
            ("verify_timeout_secs", self.verify_timeout_secs),
            ("max_upload_bytes", self.max_upload_bytes as u64),
        ] {
            if value == 0 {
                return Err(ConfigError::NotPositive {
                    field,
                    value: value as f64,
                });
            }
        }
        self.liveness.validate()
    }
}

fn upload_limit(get: &impl Fn(&str) -> Option<String>) -> Result<usize, ConfigError> {
    const KEY: &str = "CERTIVO_MAX_UPLOAD_MB";
    parse::<usize>(get, KEY, 64)?
        .checked_mul(1024 * 1024)
        .ok_or_else(|| ConfigError::Parse {
            key: KEY.to_string(),
            value: get(KEY).unwrap_or_default(),
        })
}

fn parse<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Parse {
            key: key.to_string(),
            value: raw,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_under_data_dir() {
        let config = Config::from_lookup(lookup(&[("CERTIVO_DATA_DIR", "/srv/certivo")])).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.db_path, PathBuf::from("/srv/certivo/certivo.db"));
        assert_eq!(config.upload_dir, PathBuf::from("/srv/certivo/uploads"));
        assert_eq!(
            config.model_path,
            PathBuf::from("/srv/certivo/models/face_mesh.onnx")
        );
        assert_eq!(
            config.detector_path,
            PathBuf::from("/srv/certivo/models/face_detector.onnx")
        );
        assert_eq!(config.token_ttl_secs, 900);
        assert_eq!(config.max_upload_bytes, 64 * 1024 * 1024);
        assert_eq!(config.device_trust_score, 0.97);
        assert!(config.model_sha256.is_none());
    }

    #[test]
    fn falls_back_to_home() {
        let config = Config::from_lookup(lookup(&[("HOME", "/home/dev")])).unwrap();
        assert_eq!(
            config.db_path,
            PathBuf::from("/home/dev/.local/share/certivo/certivo.db")
        );
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("CERTIVO_BIND_ADDR", "0.0.0.0:9000"),
            ("CERTIVO_VERIFY_TIMEOUT_SECS", "15"),
            ("CERTIVO_DEVICE_TRUST_SCORE", " 0.8 "),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.verify_timeout_secs, 15);
        assert_eq!(config.device_trust_score, 0.8);
    }

    #[test]
    fn garbage_is_an_error_not_a_default() {
        let err = Config::from_lookup(lookup(&[("CERTIVO_TOKEN_TTL_SECS", "soon")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Parse {
                key: "CERTIVO_TOKEN_TTL_SECS".to_string(),
                value: "soon".to_string()
            }
        );
    }

    #[test]
    fn oversized_upload_limit_is_a_parse_error() {
        let huge = usize::MAX.to_string();
        let err = Config::from_lookup(lookup(&[("CERTIVO_MAX_UPLOAD_MB", huge.as_str())])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Parse {
                key: "CERTIVO_MAX_UPLOAD_MB".to_string(),
                value: huge.clone()
            }
        );

        let config = Config::from_lookup(lookup(&[("CERTIVO_MAX_UPLOAD_MB", "8")])).unwrap();
        assert_eq!(config.max_upload_bytes, 8 * 1024 * 1024);
    }

    #[test]
    fn rejects_out_of_range_trust() {
        let err =
            Config::from_lookup(lookup(&[("CERTIVO_DEVICE_TRUST_SCORE", "1.2")])).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfUnitRange { .. }));
    }

    #[test]
    fn rejects_zero_timeout() {
        let err =
            Config::from_lookup(lookup(&[("CERTIVO_VERIFY_TIMEOUT_SECS", "0")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::NotPositive {
                field: "verify_timeout_secs",
                ..
            }
        ));
    }

    #[test]
    fn missing_liveness_file_is_fatal() {
        let err = Config::from_lookup(lookup(&[(
            "CERTIVO_LIVENESS_CONFIG",
            "/nonexistent/liveness.toml",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::File { .. }));
    }
}
