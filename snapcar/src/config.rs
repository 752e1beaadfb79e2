use crate::error::{ConfigError, Result, SidecarError};
use serde::Deserialize;
use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_bind() -> String {
    "[::]:8080".into()
}

fn default_workers() -> usize {
    4
}

fn default_connection_rate() -> usize {
    256
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/rancher/informer_object_cache.db")
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_artifact_stem() -> String {
    "snapshot".into()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_extension() -> String {
    ".db".into()
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Backend {
    #[default]
    S3,
    Local,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub(crate) struct RemoteConfig {
    #[serde(default)]
    pub(crate) backend: Backend,
    #[serde(default)]
    pub(crate) bucket: Option<String>,
    #[serde(default)]
    pub(crate) prefix: String,
    #[serde(default)]
    pub(crate) instance_id: Option<String>,
    #[serde(default = "default_extension")]
    pub(crate) extension: String,

    #[serde(default)]
    pub(crate) region: Option<String>,
    #[serde(default)]
    pub(crate) endpoint: Option<String>,
    #[serde(default)]
    pub(crate) allow_http: bool,
    #[serde(default)]
    pub(crate) max_retries: usize,

    #[serde(default)]
    pub(crate) local_root: Option<PathBuf>,

    #[serde(default)]
    pub(crate) upload_timeout_secs: Option<u64>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            bucket: None,
            prefix: String::new(),
            instance_id: None,
            extension: default_extension(),
            region: None,
            endpoint: None,
            allow_http: false,
            max_retries: 0,
            local_root: None,
            upload_timeout_secs: None,
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    #[serde(default = "default_bind")]
    pub(crate) bind: String,
    #[serde(default = "default_workers")]
    pub(crate) workers: usize,
    #[serde(default = "default_connection_rate")]
    pub(crate) max_connection_rate: usize,

    #[serde(default = "default_db_path")]
    pub(crate) db_path: PathBuf,
    #[serde(default = "default_scratch_dir")]
    pub(crate) scratch_dir: PathBuf,
    #[serde(default = "default_artifact_stem")]
    pub(crate) artifact_stem: String,
    #[serde(default = "default_busy_timeout_ms")]
    pub(crate) busy_timeout_ms: u64,

    #[serde(default)]
    pub(crate) remote: RemoteConfig,
}

impl Config {
    pub(crate) fn from_toml(contents: &str) -> Result<Config> {
        toml::from_str(contents).map_err(|e| SidecarError::from(ConfigError::from(e)))
    }

    pub(crate) fn load(settings_file: &Path) -> Result<Config> {
        let contents = read_to_string(settings_file).map_err(|e| ConfigError::ReadFile {
            path: settings_file.display().to_string(),
            source: e,
        })?;
        Self::from_toml(&contents)
    }

    /// Overlay settings injected through the environment (e.g. a pod spec).
    pub(crate) fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(bind) = var("BIND") {
            self.bind = bind;
        }
        if let Some(db_path) = var("SNAPSHOT_DB_PATH") {
            self.db_path = PathBuf::from(db_path);
        }
        if let Some(scratch_dir) = var("SNAPSHOT_SCRATCH_DIR") {
            self.scratch_dir = PathBuf::from(scratch_dir);
        }
        if let Some(bucket) = var("SNAPSHOT_BUCKET") {
            self.remote.bucket = Some(bucket);
        }
        if let Some(prefix) = var("SNAPSHOT_PREFIX") {
            self.remote.prefix = prefix;
        }
        if let Some(pod) = var("POD_NAME") {
            self.remote.instance_id = Some(pod);
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid {
                reason: "workers must be greater than 0".to_string(),
            }
            .into());
        }

        let bucket = self.bucket()?;
        if bucket.contains('/') {
            return Err(ConfigError::Invalid {
                reason: format!("bucket '{bucket}' must not contain '/'"),
            }
            .into());
        }

        let instance_id = self.instance_id()?;
        if instance_id.contains('/') {
            return Err(ConfigError::Invalid {
                reason: format!("instance id '{instance_id}' must not contain '/'"),
            }
            .into());
        }

        if self.remote.extension.contains('/') {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "extension '{}' must not contain '/'",
                    self.remote.extension
                ),
            }
            .into());
        }

        if self.remote.backend == Backend::Local && self.remote.local_root.is_none() {
            return Err(ConfigError::Invalid {
                reason: "the local backend requires remote.local_root".to_string(),
            }
            .into());
        }

        if !self.remote.prefix.is_empty() && !self.remote.prefix.ends_with('/') {
            log::warn!(
                "snapshot prefix '{}' does not end with '/'; keys are formed by plain concatenation",
                self.remote.prefix
            );
        }

        Ok(())
    }

    pub(crate) fn bucket(&self) -> Result<&str> {
        match self.remote.bucket.as_deref() {
            Some(bucket) if !bucket.is_empty() => Ok(bucket),
            _ => Err(ConfigError::Missing {
                field: "remote.bucket",
                env: "SNAPSHOT_BUCKET",
            }
            .into()),
        }
    }

    pub(crate) fn instance_id(&self) -> Result<&str> {
        match self.remote.instance_id.as_deref() {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(ConfigError::Missing {
                field: "remote.instance_id",
                env: "POD_NAME",
            }
            .into()),
        }
    }

    pub(crate) fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub(crate) fn upload_timeout(&self) -> Option<Duration> {
        self.remote.upload_timeout_secs.map(Duration::from_secs)
    }
}

pub(crate) fn load() -> Result<Config> {
    let mut settings = match std::env::var("CONFIG_FILE") {
        Err(_) => {
            if Path::new("settings.toml").exists() {
                Config::load(Path::new("settings.toml"))?
            } else {
                Config::from_toml("")?
            }
        }
        Ok(settings_file) => Config::load(Path::new(&settings_file))?,
    };

    settings.apply_env(|key| std::env::var(key).ok().filter(|v| !v.is_empty()));
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_from_empty_file() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.bind, "[::]:8080");
        assert_eq!(config.workers, 4);
        assert_eq!(config.scratch_dir, PathBuf::from("/tmp"));
        assert_eq!(config.remote.backend, Backend::S3);
        assert_eq!(config.remote.extension, ".db");
        assert_eq!(config.remote.prefix, "");
        assert_eq!(config.busy_timeout(), Duration::from_secs(5));
        assert!(config.upload_timeout().is_none());
    }

    #[test]
    fn missing_bucket_and_instance_are_fatal() {
        let config = Config::from_toml("").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("SNAPSHOT_BUCKET"), "{err}");

        let mut config = Config::from_toml("").unwrap();
        config.apply_env(env(&[("SNAPSHOT_BUCKET", "vai-snapshots")]));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("POD_NAME"), "{err}");
    }

    #[test]
    fn env_overrides_file() {
        let mut config = Config::from_toml(
            r#"
db_path = "/data/app.db"

[remote]
bucket = "from-file"
prefix = "dev/"
instance_id = "pod-a"
"#,
        )
        .unwrap();
        config.apply_env(env(&[
            ("SNAPSHOT_BUCKET", "from-env"),
            ("POD_NAME", "pod-b"),
            ("SNAPSHOT_DB_PATH", "/other.db"),
        ]));
        config.validate().unwrap();

        assert_eq!(config.bucket().unwrap(), "from-env");
        assert_eq!(config.instance_id().unwrap(), "pod-b");
        assert_eq!(config.remote.prefix, "dev/");
        assert_eq!(config.db_path, PathBuf::from("/other.db"));
    }

    #[test]
    fn rejects_invalid_values() {
        for toml in [
            "workers = 0\n[remote]\nbucket = \"b\"\ninstance_id = \"i\"",
            "[remote]\nbucket = \"b\"\ninstance_id = \"a/b\"",
            "[remote]\nbackend = \"local\"\nbucket = \"b\"\ninstance_id = \"i\"",
        ] {
            let config = Config::from_toml(toml).unwrap();
            assert!(config.validate().is_err(), "accepted: {toml}");
        }
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(Config::from_toml("colour = \"blue\"").is_err());
        assert!(Config::from_toml("[remote]\nbuckett = \"b\"").is_err());
    }
}
