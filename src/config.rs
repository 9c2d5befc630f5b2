use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::VaultError;

/// Folder identifier the host application uses for its local data.
pub const APP_DATA_NAME: &str = "PekoCMS";

/// Configuration keys in the host YAML that reference logo files.
pub const DEFAULT_LOGO_KEYS: [&str; 2] = ["BRANDING_LOGO", "REPORT_LOGO"];

const ENV_PREFIX: &str = "CLINIC_VAULT_";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: Option<PathBuf>,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const DEFAULT_LEVEL: &str = "info";

    fn default() -> Self {
        LoggingConfig {
            level: Self::DEFAULT_LEVEL.to_string(),
            dir: None,
        }
    }

    fn ensure_valid(&mut self) {
        let str_original = self.level.clone();
        self.level = self.level.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&self.level.as_str()) {
            eprintln!(
                "Config error: log level of '{}' is invalid - using default of '{}'",
                str_original,
                Self::DEFAULT_LEVEL
            );
            self.level = Self::DEFAULT_LEVEL.to_owned();
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PathsConfig {
    pub db_dir: PathBuf,
    pub config_file: PathBuf,
    pub assets_dir: PathBuf,
    /// Where logos extracted by a restore are placed. Defaults to `<assets_dir>/custom`.
    pub restored_assets_dir: Option<PathBuf>,
}

impl PathsConfig {
    fn default() -> Self {
        let data_dir = ProjectDirs::from("", "", APP_DATA_NAME)
            .map(|dirs| dirs.data_local_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        PathsConfig {
            db_dir: data_dir.join("databases"),
            config_file: data_dir.join("config.yaml"),
            assets_dir: data_dir.join("assets"),
            restored_assets_dir: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrandingConfig {
    pub logo_keys: Vec<String>,
}

impl BrandingConfig {
    fn default() -> Self {
        BrandingConfig {
            logo_keys: DEFAULT_LOGO_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }

    fn ensure_valid(&mut self) {
        self.logo_keys.retain(|k| !k.trim().is_empty());
        if self.logo_keys.is_empty() {
            eprintln!("Config error: no logo keys configured - using defaults");
            *self = Self::default();
        }
    }
}

/// Command-line values that take precedence over the settings file and environment.
#[derive(Debug, Default, Clone)]
pub struct PathOverrides {
    pub db_dir: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
    pub assets_dir: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub paths: PathsConfig,
    pub branding: BrandingConfig,
}

impl Config {
    fn default() -> Self {
        Config {
            logging: LoggingConfig::default(),
            paths: PathsConfig::default(),
            branding: BrandingConfig::default(),
        }
    }

    /// Builds the configuration from defaults, an optional TOML settings file,
    /// `CLINIC_VAULT_*` environment variables and finally command-line overrides.
    pub fn load(settings_file: Option<&Path>, overrides: &PathOverrides) -> Result<Self, VaultError> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        if let Some(settings_file) = settings_file {
            if !settings_file.exists() {
                return Err(VaultError::Error(format!(
                    "Settings file '{}' does not exist",
                    settings_file.display()
                )));
            }
            figment = figment.merge(Toml::file(settings_file));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config: Config = figment.extract().map_err(Box::new)?;
        config.apply_overrides(overrides);
        config.ensure_valid();

        Ok(config)
    }

    fn apply_overrides(&mut self, overrides: &PathOverrides) {
        if let Some(db_dir) = &overrides.db_dir {
            self.paths.db_dir = db_dir.clone();
        }
        if let Some(config_file) = &overrides.config_file {
            self.paths.config_file = config_file.clone();
        }
        if let Some(assets_dir) = &overrides.assets_dir {
            self.paths.assets_dir = assets_dir.clone();
        }
    }

    fn ensure_valid(&mut self) {
        self.logging.ensure_valid();
        self.branding.ensure_valid();
    }

    pub fn engine_paths(&self) -> EnginePaths {
        EnginePaths::new(
            &self.paths.db_dir,
            &self.paths.config_file,
            &self.paths.assets_dir,
        )
        .with_restored_assets_dir(self.paths.restored_assets_dir.clone())
    }
}

/// Locations of everything the engine reads or writes. Resolved once by the caller and
/// handed to every component; no component looks paths up on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnginePaths {
    pub db_dir: PathBuf,
    pub config_file: PathBuf,
    pub assets_dir: PathBuf,
    pub restored_assets_dir: PathBuf,
}

impl EnginePaths {
    pub fn new(db_dir: &Path, config_file: &Path, assets_dir: &Path) -> Self {
        EnginePaths {
            db_dir: db_dir.to_path_buf(),
            config_file: config_file.to_path_buf(),
            assets_dir: assets_dir.to_path_buf(),
            restored_assets_dir: assets_dir.join("custom"),
        }
    }

    pub fn with_restored_assets_dir(mut self, dir: Option<PathBuf>) -> Self {
        if let Some(dir) = dir {
            self.restored_assets_dir = dir;
        }
        self
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.db_dir.join("backups")
    }

    /// Logs of runs that archived no snapshot. Not a snapshot id, so rollback never picks it.
    pub fn run_logs_dir(&self) -> PathBuf {
        self.backups_dir().join("logs")
    }
}
