use std::{
    error::Error,
    fmt,
    path::{Path, PathBuf},
};

use figment::{
    Figment,
    providers::{Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::{
    route::controller::{ControllerOptions, interface_regex},
    runtime::{cli::Cli, conf::conf_serde::level},
};

/// Daemon configuration.
///
/// Layered as defaults < YAML file < environment < CLI flags; the last two
/// both arrive through [`Cli`], which clap fills from flags first and env
/// second.
#[derive(Debug, Deserialize, Serialize)]
pub struct Conf {
    /// Regex selecting the interfaces to manage. Matched against the whole
    /// interface name.
    pub interface_pattern: String,

    /// `rule priority = rule_priority_base + ifindex`
    pub rule_priority_base: u32,

    /// `table id = rt_table_base + ifindex`
    pub rt_table_base: u32,

    #[serde(with = "level")]
    pub log_level: Level,

    /// Path the configuration was loaded from, if any. Not part of the file
    /// format.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for Conf {
    fn default() -> Self {
        Self {
            interface_pattern: defaults::interface_pattern(),
            rule_priority_base: defaults::rule_priority_base(),
            rt_table_base: defaults::rt_table_base(),
            log_level: Level::INFO,
            config_path: None,
        }
    }
}

mod defaults {
    pub fn interface_pattern() -> String {
        r"eth\d+".to_string()
    }

    pub fn rule_priority_base() -> u32 {
        1000
    }

    pub fn rt_table_base() -> u32 {
        10000
    }
}

impl Conf {
    /// Builds the configuration from `cli`, reading the YAML file it points
    /// at when one is given. Returns the `Cli` alongside so the caller keeps
    /// the selected command.
    ///
    /// # Errors
    /// * `ConfError::NoConfigFile` - the config path does not exist.
    /// * `ConfError::InvalidConfigPath` - the config path is not a file.
    /// * `ConfError::InvalidExtension` - the config file is not `.yaml`/`.yml`.
    /// * `ConfError::Extraction` - a layer could not be merged or parsed.
    /// * `ConfError::InvalidPattern` - `interface_pattern` is not a valid regex.
    pub fn new(cli: Cli) -> Result<(Self, Cli), ConfError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Conf::default()));

        let config_path_to_store = if let Some(config_path) = &cli.config {
            validate_config_path(config_path)?;
            figment = figment.merge(Yaml::file(config_path));
            Some(config_path.clone())
        } else {
            None
        };

        figment = figment.merge(Serialized::defaults(&cli));

        let mut conf: Conf = figment.extract()?;
        conf.config_path = config_path_to_store;

        // compile once so a bad pattern fails at load
        conf.controller_options()?;

        Ok((conf, cli))
    }

    /// Route controller settings derived from this configuration.
    pub fn controller_options(&self) -> Result<ControllerOptions, ConfError> {
        let interface_pattern =
            interface_regex(&self.interface_pattern).map_err(|e| ConfError::InvalidPattern {
                pattern: self.interface_pattern.clone(),
                source: Box::new(e),
            })?;

        Ok(ControllerOptions {
            interface_pattern,
            rule_priority_base: self.rule_priority_base,
            rt_table_base: self.rt_table_base,
        })
    }
}

/// Validates that the given path points to an existing file with a supported extension.
///
/// # Errors
///
/// * `ConfError::NoConfigFile` - If the path does not exist.
/// * `ConfError::InvalidConfigPath` - If the path points to a directory.
/// * `ConfError::InvalidExtension` - If the file extension is not `yaml` or `yml`.
fn validate_config_path(path: &Path) -> Result<(), ConfError> {
    if !path.is_file() {
        if path.exists() {
            return Err(ConfError::InvalidConfigPath(
                path.to_string_lossy().into_owned(),
            ));
        } else {
            return Err(ConfError::NoConfigFile);
        }
    }

    match path.extension().and_then(|s| s.to_str()) {
        Some("yaml") | Some("yml") => Ok(()),
        Some(ext) => Err(ConfError::InvalidExtension(ext.to_string())),
        None => Err(ConfError::InvalidExtension("none".to_string())),
    }
}

#[derive(Debug)]
pub enum ConfError {
    /// The specified configuration file does not exist.
    NoConfigFile,
    /// The path exists but is not a file (e.g., it's a directory).
    InvalidConfigPath(String),
    /// The file has an unsupported extension.
    InvalidExtension(String),
    /// Failed to extract configuration data.
    Extraction(Box<figment::Error>),
    /// The interface pattern does not compile.
    InvalidPattern {
        pattern: String,
        source: Box<regex::Error>,
    },
}

impl fmt::Display for ConfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfError::NoConfigFile => write!(f, "no config file provided"),
            ConfError::InvalidConfigPath(p) => write!(f, "path '{p}' is not a valid file"),
            ConfError::InvalidExtension(ext) => {
                write!(
                    f,
                    "invalid file extension '.{ext}', expected 'yaml' or 'yml'"
                )
            }
            ConfError::Extraction(e) => write!(f, "configuration error: {e}"),
            ConfError::InvalidPattern { pattern, source } => {
                write!(f, "invalid interface pattern '{pattern}': {source}")
            }
        }
    }
}

impl Error for ConfError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfError::Extraction(e) => Some(e),
            ConfError::InvalidPattern { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<figment::Error> for ConfError {
    fn from(e: figment::Error) -> Self {
        ConfError::Extraction(Box::from(e))
    }
}

pub mod conf_serde {
    pub mod level {
        use serde::{self, Deserialize, Deserializer, Serializer};
        use tracing::Level;

        pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.serialize_str(level.as_str())
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s = String::deserialize(deserializer)?;
            s.parse::<Level>().map_err(serde::de::Error::custom)
        }

        pub mod option {
            use super::*;

            pub fn serialize<S>(level: &Option<Level>, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                match level {
                    Some(l) => serializer.serialize_str(l.as_str()),
                    None => serializer.serialize_none(),
                }
            }

            pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Level>, D::Error>
            where
                D: Deserializer<'de>,
            {
                let opt = Option::<String>::deserialize(deserializer)?;
                match opt {
                    Some(s) => s
                        .parse::<Level>()
                        .map(Some)
                        .map_err(serde::de::Error::custom),
                    None => Ok(None),
                }
            }
        }
    }
}
