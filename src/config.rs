//! Server configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `GPKGFS_<SECTION>_<KEY>` environment variables, then command line flags.
//! The result is validated once and shared read-only afterwards.

use crate::crs::{SUPPORTED, WGS84};
use crate::error::{Error, Result};
use crate::ident::is_plain_identifier;
use crate::sql_functions::MAX_PRECISION;
use crate::types::DEFAULT_SCHEMA;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Prefix of environment variables that override configuration values.
pub const ENV_PREFIX: &str = "GPKGFS";

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub paging: PagingConfig,
    pub metadata: MetadataConfig,
    pub output: OutputConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default, deny_unknown_fields)]
pub struct ServerConfig {
    pub http_host: String,
    pub http_port: u16,
    /// Public base URL used in links; derived from the `Host` header when unset.
    pub url_base: Option<String>,
    pub debug: bool,
    /// Allowed CORS origins; `*` admits any.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_host: "0.0.0.0".to_string(),
            http_port: 9000,
            url_base: None,
            debug: false,
            cors_origins: vec!["*".to_string()],
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub database_path: Option<PathBuf>,
    pub table_includes: Vec<String>,
    pub table_excludes: Vec<String>,
    pub pool_size: usize,
    /// Extra database files served under their own schema name.
    pub attach: BTreeMap<String, String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            table_includes: Vec::new(),
            table_excludes: Vec::new(),
            pool_size: 4,
            attach: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default, deny_unknown_fields)]
pub struct PagingConfig {
    pub limit_default: u64,
    pub limit_max: u64,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            limit_default: 10,
            limit_max: 10_000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default, deny_unknown_fields)]
pub struct MetadataConfig {
    pub title: String,
    pub description: String,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            title: "gpkg-featureserv".to_string(),
            description: "Features from a GeoPackage".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default, deny_unknown_fields)]
pub struct OutputConfig {
    pub default_crs: i32,
    pub default_precision: Option<u32>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            default_crs: WGS84,
            default_precision: None,
        }
    }
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            Error::Config(format!("cannot read config file {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Defaults, overlaid with `path` when given and then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Override values from variables returned by `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |section: &str, key: &str| {
            let name = format!(
                "{ENV_PREFIX}_{}_{}",
                section.to_ascii_uppercase(),
                key.to_ascii_uppercase()
            );
            lookup(&name).map(|value| (name, value))
        };

        if let Some((_, v)) = var("Server", "HttpHost") {
            self.server.http_host = v;
        }
        if let Some((name, v)) = var("Server", "HttpPort") {
            self.server.http_port = parse_var(&name, &v)?;
        }
        if let Some((_, v)) = var("Server", "UrlBase") {
            self.server.url_base = Some(v).filter(|v| !v.is_empty());
        }
        if let Some((name, v)) = var("Server", "Debug") {
            self.server.debug = parse_var(&name, &v)?;
        }
        if let Some((_, v)) = var("Server", "CorsOrigins") {
            self.server.cors_origins = split_list(&v);
        }
        if let Some((_, v)) = var("Database", "DatabasePath") {
            self.database.database_path = Some(PathBuf::from(v));
        }
        if let Some((_, v)) = var("Database", "TableIncludes") {
            self.database.table_includes = split_list(&v);
        }
        if let Some((_, v)) = var("Database", "TableExcludes") {
            self.database.table_excludes = split_list(&v);
        }
        if let Some((name, v)) = var("Database", "PoolSize") {
            self.database.pool_size = parse_var(&name, &v)?;
        }
        if let Some((name, v)) = var("Paging", "LimitDefault") {
            self.paging.limit_default = parse_var(&name, &v)?;
        }
        if let Some((name, v)) = var("Paging", "LimitMax") {
            self.paging.limit_max = parse_var(&name, &v)?;
        }
        if let Some((_, v)) = var("Metadata", "Title") {
            self.metadata.title = v;
        }
        if let Some((_, v)) = var("Metadata", "Description") {
            self.metadata.description = v;
        }
        if let Some((name, v)) = var("Output", "DefaultCrs") {
            self.output.default_crs = parse_var(&name, &v)?;
        }
        if let Some((name, v)) = var("Output", "DefaultPrecision") {
            self.output.default_precision = if v.trim().is_empty() {
                None
            } else {
                Some(parse_var(&name, &v)?)
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.pool_size == 0 {
            return Err(Error::Config("Database.PoolSize must be positive".to_string()));
        }
        if self.paging.limit_default > self.paging.limit_max {
            return Err(Error::Config(format!(
                "Paging.LimitDefault ({}) exceeds Paging.LimitMax ({})",
                self.paging.limit_default, self.paging.limit_max
            )));
        }
        if !SUPPORTED.contains(&self.output.default_crs) {
            return Err(Error::Config(format!(
                "Output.DefaultCrs {} is not one of {SUPPORTED:?}",
                self.output.default_crs
            )));
        }
        if let Some(precision) = self.output.default_precision {
            if i64::from(precision) > MAX_PRECISION {
                return Err(Error::Config(format!(
                    "Output.DefaultPrecision must be at most {MAX_PRECISION}"
                )));
            }
        }
        for name in self.database.attach.keys() {
            if !is_plain_identifier(name)
                || name.eq_ignore_ascii_case(DEFAULT_SCHEMA)
                || name.eq_ignore_ascii_case("temp")
            {
                return Err(Error::Config(format!(
                    "invalid schema name in Database.Attach: {name:?}"
                )));
            }
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid value for {name}: {value:?}")))
}

/// Comma-separated list; items are trimmed and empty items dropped.
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
