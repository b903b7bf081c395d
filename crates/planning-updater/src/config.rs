use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::classifier::anchored;
use crate::sweep::RetentionPolicy;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 27017;
pub const DEFAULT_DELIMITER: &str = "\n";

/// Absolute http(s) URL with a host. Spaces or markup in the address fail to parse.
fn is_http_address(address: &str) -> bool {
    match Url::parse(address) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("The params file {0} was not found")]
    NotFound(PathBuf),

    #[error("Could not read the params file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("The params file could not be decoded: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid parameter at {location}: {message}")]
    Invalid { location: String, message: String },
}

impl ConfigError {
    fn invalid(location: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            location: location.into(),
            message: message.into(),
        }
    }
}

/// Root of the JSON parameter file.
#[derive(Debug, Clone, Deserialize)]
pub struct Params {
    pub updater: UpdaterParams,
    pub database: DatabaseParams,
    pub branches: Vec<BranchParams>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdaterParams {
    /// Seconds between the end of a pass and the start of the next one.
    /// Absent or null means a single pass.
    #[serde(default)]
    pub frequency: Option<u64>,

    /// Consecutive failed passes tolerated before scheduling stops (0 = no limit)
    pub error_tolerance: u32,

    #[serde(default)]
    pub retention: Option<RetentionPolicy>,
}

impl UpdaterParams {
    pub fn retention(&self) -> RetentionPolicy {
        self.retention.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseParams {
    pub name: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

impl DatabaseParams {
    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_HOST)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn uri(&self) -> String {
        format!("mongodb://{}:{}", self.host(), self.port())
    }
}

/// A school branch, reconciled into its own pair of collections.
#[derive(Debug, Clone, Deserialize)]
pub struct BranchParams {
    pub name: String,
    pub parser: ParserParams,
    pub groups: Vec<GroupParams>,
}

/// Feed format of a branch, selected by the `mode` tag.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode")]
pub enum ParserParams {
    #[serde(rename = "ENT")]
    Ent {
        teachers_patterns: Vec<String>,
        groups_patterns: Vec<String>,
        #[serde(default)]
        blacklist: Vec<String>,
        #[serde(default)]
        delimiter: Option<String>,
    },
    #[serde(rename = "Nextcloud")]
    Nextcloud {
        #[serde(default)]
        delimiter: Option<String>,
    },
}

impl ParserParams {
    pub fn mode(&self) -> &str {
        match self {
            ParserParams::Ent { .. } => "ENT",
            ParserParams::Nextcloud { .. } => "Nextcloud",
        }
    }

    pub fn delimiter(&self) -> &str {
        let delimiter = match self {
            ParserParams::Ent { delimiter, .. } => delimiter,
            ParserParams::Nextcloud { delimiter } => delimiter,
        };
        delimiter.as_deref().unwrap_or(DEFAULT_DELIMITER)
    }

    fn delimiter_is_set(&self) -> bool {
        match self {
            ParserParams::Ent { delimiter, .. } => delimiter.is_some(),
            ParserParams::Nextcloud { delimiter } => delimiter.is_some(),
        }
    }
}

/// A class within a branch; its name becomes the affiliation of its events.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupParams {
    pub name: String,
    pub addresses: Vec<String>,
}

impl Params {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::NotFound(path.to_path_buf()),
            _ => ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            },
        })?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let params: Params = serde_json::from_str(content)?;
        params.validate()?;
        Ok(params)
    }

    /// Command-line / environment overrides for the database location
    pub fn with_database_overrides(mut self, host: Option<String>, port: Option<u16>) -> Self {
        if host.is_some() {
            self.database.host = host;
        }
        if port.is_some() {
            self.database.port = port;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.updater.frequency.is_none() {
            tracing::warn!("No \"frequency\" in the \"updater\" node, the updater will run once");
        }
        if self.updater.retention.is_none() {
            tracing::warn!(
                "No \"retention\" in the \"updater\" node, using the default value {:?}",
                RetentionPolicy::default()
            );
        }

        if self.database.name.is_empty() {
            return Err(ConfigError::invalid("database.name", "must not be empty"));
        }
        if self.database.host.is_none() {
            tracing::warn!(
                "No \"host\" in the \"database\" node, using the default value {}",
                DEFAULT_HOST
            );
        }
        if self.database.port.is_none() {
            tracing::warn!(
                "No \"port\" in the \"database\" node, using the default value {}",
                DEFAULT_PORT
            );
        }

        let mut branch_names = HashSet::new();
        for (b_i, branch) in self.branches.iter().enumerate() {
            let location = format!("branches[{}]", b_i);
            validate_collection_suffix(&branch.name, &format!("{}.name", location))?;
            if !branch_names.insert(branch.name.as_str()) {
                return Err(ConfigError::invalid(
                    format!("{}.name", location),
                    format!("branch \"{}\" already exists", branch.name),
                ));
            }

            validate_parser(&branch.parser, &format!("{}.parser", location))?;

            if branch.groups.is_empty() {
                tracing::warn!("Branch {} has no group to download", branch.name);
            }

            let mut group_names = HashSet::new();
            for (g_i, group) in branch.groups.iter().enumerate() {
                let group_location = format!("{}.groups[{}]", location, g_i);
                if !group_names.insert(group.name.as_str()) {
                    return Err(ConfigError::invalid(
                        format!("{}.name", group_location),
                        format!("group \"{}\" already exists", group.name),
                    ));
                }

                for (a_i, address) in group.addresses.iter().enumerate() {
                    if !is_http_address(address) {
                        return Err(ConfigError::invalid(
                            format!("{}.addresses[{}]", group_location, a_i),
                            format!("\"{}\" is not an http(s) URI", address),
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}

fn validate_collection_suffix(name: &str, location: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::invalid(location, "must not be empty"));
    }
    if name.contains('$') || name.contains('\0') {
        return Err(ConfigError::invalid(
            location,
            format!("\"{}\" cannot be used in a collection name", name),
        ));
    }
    Ok(())
}

fn validate_parser(parser: &ParserParams, location: &str) -> Result<(), ConfigError> {
    if !parser.delimiter_is_set() {
        tracing::warn!(
            "No \"delimiter\" in {}, using the default value {:?}",
            location,
            DEFAULT_DELIMITER
        );
    }
    if parser.delimiter().is_empty() {
        return Err(ConfigError::invalid(
            format!("{}.delimiter", location),
            "must not be empty",
        ));
    }

    if let ParserParams::Ent {
        teachers_patterns,
        groups_patterns,
        blacklist,
        ..
    } = parser
    {
        for (key, patterns) in [
            ("teachers_patterns", teachers_patterns),
            ("groups_patterns", groups_patterns),
            ("blacklist", blacklist),
        ] {
            for (p_i, pattern) in patterns.iter().enumerate() {
                if let Err(e) = Regex::new(&anchored(pattern)) {
                    return Err(ConfigError::invalid(
                        format!("{}.{}[{}]", location, key, p_i),
                        e.to_string(),
                    ));
                }
            }
        }
    }

    Ok(())
}
