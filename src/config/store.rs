use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{ConfigError, ConfigKey, ConnectionConfig, DEFAULT_PORT};

/// Persisted connection record: one shell-exportable `KEY=value` line per key.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a record has been saved.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Reads and parses the record.
    pub fn load(&self) -> Result<ConnectionConfig, ConfigError> {
        let contents = fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            path: self.path.clone(),
            source,
        })?;
        let config = parse_config(&contents, &self.path)?;
        debug!(path = %self.path.display(), "loaded connection config");
        Ok(config)
    }

    /// Overwrites the file with the whole record (mode 0644).
    pub fn save(&self, config: &ConnectionConfig) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let write_err = |source| ConfigError::Write {
            path: self.path.clone(),
            source,
        };
        fs::write(&self.path, render_config(config)).map_err(write_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o644))
                .map_err(write_err)?;
        }
        info!(path = %self.path.display(), "saved connection config");
        Ok(())
    }
}

/// Renders the record in file form.
pub fn render_config(config: &ConnectionConfig) -> String {
    let mut out = String::new();
    for key in ConfigKey::ALL {
        out.push_str(key.as_str());
        out.push('=');
        out.push_str(&shell_quote(&config.value(key)));
        out.push('\n');
    }
    out
}

/// Parses file contents. Every key must be present; unknown keys are ignored.
pub fn parse_config(contents: &str, path: &Path) -> Result<ConnectionConfig, ConfigError> {
    let mut values: BTreeMap<ConfigKey, String> = BTreeMap::new();
    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line).trim_start();
        let (name, raw_value) = line.split_once('=').ok_or_else(|| ConfigError::Malformed {
            path: path.to_path_buf(),
            line: idx + 1,
        })?;
        match ConfigKey::from_name(name.trim()) {
            Some(key) => {
                values.insert(key, shell_unquote(raw_value.trim()));
            }
            None => debug!(key = name.trim(), "ignoring unknown config key"),
        }
    }

    let mut config = ConnectionConfig {
        host: String::new(),
        port: DEFAULT_PORT,
        user: String::new(),
        password: String::new(),
        database: String::new(),
        base_dir: PathBuf::new(),
        debug: false,
    };
    for key in ConfigKey::ALL {
        let value = values.get(&key).ok_or_else(|| ConfigError::MissingKey {
            path: path.to_path_buf(),
            key,
        })?;
        config.set(key, value)?;
    }
    Ok(config)
}

fn is_bare_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '@' | '%' | '+' | ',')
}

/// Quotes `value` for POSIX shells; `'` becomes `'\''`.
pub(crate) fn shell_quote(value: &str) -> String {
    if !value.is_empty() && value.chars().all(is_bare_safe) {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn shell_unquote(raw: &str) -> String {
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return raw[1..raw.len() - 1].replace(r"'\''", "'");
    }
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        let inner = &raw[1..raw.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some(next @ ('"' | '\\' | '$' | '`')) => out.push(next),
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => out.push('\\'),
                }
            } else {
                out.push(c);
            }
        }
        return out;
    }
    raw.to_string()
}
