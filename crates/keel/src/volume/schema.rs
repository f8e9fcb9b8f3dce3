//! Backend configuration schemas.
//!
//! Each backend declares its fields explicitly. Decoding walks a JSON object
//! once, rejecting unknown keys and collecting every failure as a
//! [`FieldError`] instead of stopping at the first one.

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use keel_common::{FieldError, KeelError, KeelResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Option keys that carry integers when supplied as plugin `Opts` strings.
const INTEGER_OPTIONS: &[&str] = &["port"];

/// Option keys that carry booleans when supplied as plugin `Opts` strings.
const BOOLEAN_OPTIONS: &[&str] = &["readOnly"];

/// Storage backend a volume is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Plain directory on the host.
    Local,
    /// NFS export.
    Nfs,
    /// SMB/CIFS share.
    Smb,
}

impl BackendType {
    /// All backend types, in display order.
    pub const ALL: [Self; 3] = [Self::Local, Self::Nfs, Self::Smb];

    /// Canonical tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Nfs => "nfs",
            Self::Smb => "smb",
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendType {
    type Err = KeelError;

    /// Parse a backend tag. Tags are case-insensitive and `directory` is an
    /// alias of `local`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "directory" => Ok(Self::Local),
            "nfs" => Ok(Self::Nfs),
            "smb" => Ok(Self::Smb),
            other => Err(KeelError::field(
                "type",
                "oneof",
                format!("invalid backend type '{other}', allowed types are: local, nfs, smb"),
            )),
        }
    }
}

/// NFS protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NfsVersion {
    /// NFSv3.
    #[serde(rename = "3")]
    V3,
    /// NFSv4.
    #[serde(rename = "4")]
    V4,
}

impl NfsVersion {
    const ALLOWED: &'static str = "3, 4";

    /// Value of the `vers=` mount option.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V3 => "3",
            Self::V4 => "4",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "3" => Some(Self::V3),
            "4" => Some(Self::V4),
            _ => None,
        }
    }
}

/// SMB dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SmbVersion {
    /// SMB 1.0 (CIFS).
    #[serde(rename = "1.0")]
    V1_0,
    /// SMB 2.0.
    #[serde(rename = "2.0")]
    V2_0,
    /// SMB 2.1.
    #[serde(rename = "2.1")]
    V2_1,
    /// SMB 3.0.
    #[serde(rename = "3.0")]
    V3_0,
}

impl SmbVersion {
    const ALLOWED: &'static str = "1.0, 2.0, 2.1, 3.0";

    /// Value of the `vers=` mount option.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V1_0 => "1.0",
            Self::V2_0 => "2.0",
            Self::V2_1 => "2.1",
            Self::V3_0 => "3.0",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "1.0" => Some(Self::V1_0),
            "2.0" => Some(Self::V2_0),
            "2.1" => Some(Self::V2_1),
            "3.0" => Some(Self::V3_0),
            _ => None,
        }
    }
}

/// Configuration of a local directory volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalConfig {
    /// Informational source directory recorded with the volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl LocalConfig {
    const FIELDS: &'static [&'static str] = &["path"];

    fn decode(object: &Map<String, Value>) -> KeelResult<Self> {
        let mut fields = Fields::new(object, Self::FIELDS);
        let path = fields.optional_string("path");
        if let Some(path) = &path {
            fields.absolute_path("path", path);
        }
        fields.finish()?;

        Ok(Self {
            path: path.map(PathBuf::from),
        })
    }
}

/// Configuration of an NFS-backed volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NfsConfig {
    /// Server hostname or IP address.
    pub server: String,
    /// Absolute path of the export on the server.
    pub export_path: String,
    /// Protocol version.
    pub version: NfsVersion,
    /// Server port.
    pub port: u16,
    /// Mount read-only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
}

impl NfsConfig {
    const FIELDS: &'static [&'static str] = &["server", "exportPath", "version", "port", "readOnly"];

    fn decode(object: &Map<String, Value>) -> KeelResult<Self> {
        let mut fields = Fields::new(object, Self::FIELDS);

        let server = fields.required_string("server");
        if let Some(server) = &server {
            fields.host("server", server);
        }
        let export_path = fields.required_string("exportPath");
        if let Some(export_path) = &export_path {
            fields.absolute_path("exportPath", export_path);
        }
        let version = fields.required_enum("version", NfsVersion::ALLOWED, NfsVersion::parse);
        let port = fields.required_port("port");
        let read_only = fields.optional_bool("readOnly");

        fields.finish()?;
        match (server, export_path, version, port) {
            (Some(server), Some(export_path), Some(version), Some(port)) => Ok(Self {
                server,
                export_path,
                version,
                port,
                read_only,
            }),
            _ => Err(internal_decode_error("nfs")),
        }
    }

    /// Mount source in `server:/export` form; IPv6 servers are bracketed.
    #[must_use]
    pub fn source(&self) -> String {
        if self.server.parse::<Ipv6Addr>().is_ok() {
            format!("[{}]:{}", self.server, self.export_path)
        } else {
            format!("{}:{}", self.server, self.export_path)
        }
    }

    /// Mount options passed to `mount -o`.
    #[must_use]
    pub fn mount_options(&self) -> Vec<String> {
        let mut options = vec![
            format!("vers={}", self.version.as_str()),
            format!("port={}", self.port),
        ];
        if self.read_only == Some(true) {
            options.push("ro".to_string());
        }
        options
    }
}

/// Configuration of an SMB-backed volume.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmbConfig {
    /// Server hostname or IP address.
    pub server: String,
    /// Share name.
    pub share: String,
    /// User to authenticate as; guest access when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Password for `username`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Authentication domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Dialect; 3.0 when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vers: Option<SmbVersion>,
    /// Server port; 445 when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Mount read-only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
}

impl SmbConfig {
    /// Default SMB port.
    pub const DEFAULT_PORT: u16 = 445;

    const FIELDS: &'static [&'static str] = &[
        "server", "share", "username", "password", "domain", "vers", "port", "readOnly",
    ];

    fn decode(object: &Map<String, Value>) -> KeelResult<Self> {
        let mut fields = Fields::new(object, Self::FIELDS);

        let server = fields.required_string("server");
        if let Some(server) = &server {
            fields.host("server", server);
        }
        let share = fields.required_string("share");
        if let Some(share) = &share {
            if share.contains(['/', '\\']) {
                fields.push("share", "format", "must be a share name without path separators");
            }
        }
        let username = fields.optional_string("username");
        let password = fields.optional_string("password");
        if password.is_some() && username.is_none() {
            fields.push("password", "requires", "requires username");
        }
        let domain = fields.optional_string("domain");
        // Values are spliced into the comma-separated `mount -o` list.
        let credentials = [
            ("username", &username),
            ("password", &password),
            ("domain", &domain),
        ];
        for (field, value) in credentials {
            if value.as_deref().is_some_and(|v| v.contains(',')) {
                fields.push(field, "format", "must not contain ','");
            }
        }
        let vers = fields.optional_enum("vers", SmbVersion::ALLOWED, SmbVersion::parse);
        let port = fields.optional_port("port");
        let read_only = fields.optional_bool("readOnly");

        fields.finish()?;
        match (server, share) {
            (Some(server), Some(share)) => Ok(Self {
                server,
                share,
                username,
                password,
                domain,
                vers,
                port,
                read_only,
            }),
            _ => Err(internal_decode_error("smb")),
        }
    }

    /// Mount source in `//server/share` form.
    #[must_use]
    pub fn source(&self) -> String {
        format!("//{}/{}", self.server, self.share)
    }

    /// Mount options passed to `mount -o`.
    #[must_use]
    pub fn mount_options(&self) -> Vec<String> {
        let mut options = vec![
            format!("vers={}", self.vers.unwrap_or(SmbVersion::V3_0).as_str()),
            format!("port={}", self.port.unwrap_or(Self::DEFAULT_PORT)),
        ];
        match &self.username {
            Some(username) => {
                options.push(format!("username={username}"));
                if let Some(password) = &self.password {
                    options.push(format!("password={password}"));
                }
            }
            None => options.push("guest".to_string()),
        }
        if let Some(domain) = &self.domain {
            options.push(format!("domain={domain}"));
        }
        if self.read_only == Some(true) {
            options.push("ro".to_string());
        }
        options
    }
}

impl fmt::Debug for SmbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmbConfig")
            .field("server", &self.server)
            .field("share", &self.share)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("domain", &self.domain)
            .field("vers", &self.vers)
            .field("port", &self.port)
            .field("read_only", &self.read_only)
            .finish()
    }
}

/// Validated, backend-specific volume configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    /// Local directory.
    Local(LocalConfig),
    /// NFS export.
    Nfs(NfsConfig),
    /// SMB share.
    Smb(SmbConfig),
}

impl BackendConfig {
    /// Backend this configuration belongs to.
    #[must_use]
    pub const fn backend_type(&self) -> BackendType {
        match self {
            Self::Local(_) => BackendType::Local,
            Self::Nfs(_) => BackendType::Nfs,
            Self::Smb(_) => BackendType::Smb,
        }
    }

    /// Strictly decode a JSON configuration for `backend`.
    ///
    /// A missing or `null` config is accepted for local volumes only.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Validation`] listing every failing field.
    pub fn decode(backend: BackendType, raw: Option<&Value>) -> KeelResult<Self> {
        let empty = Map::new();
        let object = match raw {
            None | Some(Value::Null) if backend == BackendType::Local => &empty,
            None | Some(Value::Null) => {
                return Err(KeelError::field("config", "required", "config is required"));
            }
            Some(Value::Object(object)) => object,
            Some(_) => {
                return Err(KeelError::field(
                    "config",
                    "type",
                    "config must be a JSON object",
                ));
            }
        };

        match backend {
            BackendType::Local => LocalConfig::decode(object).map(Self::Local),
            BackendType::Nfs => NfsConfig::decode(object).map(Self::Nfs),
            BackendType::Smb => SmbConfig::decode(object).map(Self::Smb),
        }
    }

    /// Decode plugin `Opts` (`-o key=value`) into a configuration.
    ///
    /// The `type` key selects the backend and defaults to `local`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unknown type or invalid fields.
    pub fn from_options(options: &BTreeMap<String, String>) -> KeelResult<Self> {
        let backend = options
            .get("type")
            .map_or(Ok(BackendType::Local), |tag| tag.parse())?;

        let object: Map<String, Value> = options
            .iter()
            .filter(|(key, _)| key.as_str() != "type")
            .map(|(key, value)| (key.clone(), option_value(key, value)))
            .collect();

        Self::decode(backend, Some(&Value::Object(object)))
    }

    /// Configuration as stored and returned by the admin API.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if encoding fails.
    pub fn to_value(&self) -> KeelResult<Value> {
        let value = match self {
            Self::Local(config) => serde_json::to_value(config)?,
            Self::Nfs(config) => serde_json::to_value(config)?,
            Self::Smb(config) => serde_json::to_value(config)?,
        };
        Ok(value)
    }
}

fn option_value(key: &str, value: &str) -> Value {
    if INTEGER_OPTIONS.contains(&key) {
        if let Ok(number) = value.trim().parse::<i64>() {
            return Value::from(number);
        }
    }
    if BOOLEAN_OPTIONS.contains(&key) {
        if let Ok(flag) = value.trim().parse::<bool>() {
            return Value::Bool(flag);
        }
    }
    Value::String(value.to_string())
}

fn internal_decode_error(backend: &str) -> KeelError {
    KeelError::Internal {
        message: format!("{backend} config decoded without errors but is incomplete"),
    }
}

/// Single-pass field reader over a JSON object.
struct Fields<'a> {
    object: &'a Map<String, Value>,
    errors: Vec<FieldError>,
}

impl<'a> Fields<'a> {
    fn new(object: &'a Map<String, Value>, allowed: &[&str]) -> Self {
        let errors = object
            .keys()
            .filter(|key| !allowed.contains(&key.as_str()))
            .map(|key| FieldError::new(key.as_str(), "unknown", "unknown field"))
            .collect();
        Self { object, errors }
    }

    fn push(&mut self, field: &str, rule: &str, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, rule, message));
    }

    fn present(&self, field: &str) -> Option<&'a Value> {
        self.object.get(field).filter(|value| !value.is_null())
    }

    fn required_string(&mut self, field: &str) -> Option<String> {
        if self.present(field).is_none() {
            self.push(field, "required", "is required");
            return None;
        }
        self.optional_string(field)
    }

    fn optional_string(&mut self, field: &str) -> Option<String> {
        match self.present(field)? {
            Value::String(s) if s.trim().is_empty() => {
                self.push(field, "required", "must not be empty");
                None
            }
            Value::String(s) => Some(s.clone()),
            _ => {
                self.push(field, "type", "must be a string");
                None
            }
        }
    }

    fn optional_bool(&mut self, field: &str) -> Option<bool> {
        match self.present(field)? {
            Value::Bool(flag) => Some(*flag),
            _ => {
                self.push(field, "type", "must be a boolean");
                None
            }
        }
    }

    fn required_port(&mut self, field: &str) -> Option<u16> {
        if self.present(field).is_none() {
            self.push(field, "required", "is required");
            return None;
        }
        self.optional_port(field)
    }

    fn optional_port(&mut self, field: &str) -> Option<u16> {
        let value = self.present(field)?;
        let Some(number) = value.as_i64() else {
            self.push(field, "type", "must be an integer");
            return None;
        };
        match u16::try_from(number) {
            Ok(port) if port >= 1 => Some(port),
            _ => {
                self.push(field, "range", "must be between 1 and 65535");
                None
            }
        }
    }

    fn required_enum<T>(
        &mut self,
        field: &str,
        allowed: &str,
        parse: fn(&str) -> Option<T>,
    ) -> Option<T> {
        if self.present(field).is_none() {
            self.push(field, "required", "is required");
            return None;
        }
        self.optional_enum(field, allowed, parse)
    }

    fn optional_enum<T>(
        &mut self,
        field: &str,
        allowed: &str,
        parse: fn(&str) -> Option<T>,
    ) -> Option<T> {
        let value = self.present(field)?;
        let parsed = value.as_str().and_then(parse);
        if parsed.is_none() {
            self.push(field, "oneof", format!("must be one of: {allowed}"));
        }
        parsed
    }

    fn host(&mut self, field: &str, value: &str) {
        if value.parse::<IpAddr>().is_err() && !is_hostname(value) {
            self.push(field, "host", "must be a valid hostname or IP address");
        }
    }

    fn absolute_path(&mut self, field: &str, value: &str) {
        if !Path::new(value).is_absolute() {
            self.push(field, "absolute", "must be an absolute path");
        }
    }

    fn finish(self) -> KeelResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(KeelError::Validation {
                errors: self.errors,
            })
        }
    }
}

/// RFC 1123 hostname check.
fn is_hostname(value: &str) -> bool {
    let value = value.strip_suffix('.').unwrap_or(value);
    if value.is_empty() || value.len() > 253 {
        return false;
    }
    value.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}
