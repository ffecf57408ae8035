// src/sys/secrets.rs

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use secrecy::SecretString;
use tracing::info;

use crate::error::{SetupError, SetupResult};

/// Companion suffix: `MYSQL_PASSWORD_FILE` points at a file holding `MYSQL_PASSWORD`.
pub const FILE_SUFFIX: &str = "_FILE";

/// Snapshot of the process environment taken once at startup.
///
/// Every read goes through the snapshot and secret resolution writes back into
/// it, so the snapshot (not the live process environment) is what the handoff
/// process finally inherits. `_FILE` companions are dropped as they are
/// resolved and never reach child processes.
#[derive(Clone, Default)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

/// 🛡️ Values are resolved secrets too; only names are ever printed.
impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.vars.keys()).finish()
    }
}

impl Environment {
    pub fn capture() -> Self {
        std::env::vars().collect()
    }

    /// Shell `${VAR:-}` semantics: an empty variable counts as unset.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn get_or(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or(default).to_string()
    }

    /// `true` only for a case-insensitive literal "true".
    pub fn flag(&self, name: &str) -> bool {
        self.get(name)
            .is_some_and(|value| value.eq_ignore_ascii_case("true"))
    }

    pub fn set(&mut self, name: &str, value: &str) {
        self.vars.insert(name.to_string(), value.to_string());
    }

    pub fn remove(&mut self, name: &str) {
        self.vars.remove(name);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Resolves `var` from its direct value or from the file named by
    /// `var_FILE`, falling back to `default`.
    ///
    /// Setting both is a fatal configuration error and nothing is exported.
    /// On success the value is stored under `var` and `var_FILE` is removed.
    pub fn resolve(&mut self, var: &str, default: &str) -> SetupResult<String> {
        let file_var = format!("{var}{FILE_SUFFIX}");

        let value = match (self.get(var), self.get(&file_var)) {
            (Some(_), Some(_)) => {
                return Err(SetupError::AmbiguousSecret {
                    var: var.to_string(),
                    file_var,
                });
            }
            (Some(direct), None) => {
                info!("** Using {} variable from ENV", var);
                direct.to_string()
            }
            (None, Some(path)) => {
                let value = read_secret_file(Path::new(path))?;
                info!("** Using {} variable from secret file", var);
                value
            }
            (None, None) => default.to_string(),
        };

        self.set(var, &value);
        self.remove(&file_var);
        Ok(value)
    }

    /// Same as [`Environment::resolve`], wrapped so the value cannot be
    /// printed through `Debug` by accident.
    pub fn resolve_secret(&mut self, var: &str, default: &str) -> SetupResult<SecretString> {
        self.resolve(var, default).map(SecretString::new)
    }
}

impl FromIterator<(String, String)> for Environment {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}

/// Reads a secret file the way `$(< file)` does: the whole content with
/// trailing newlines removed.
fn read_secret_file(path: &Path) -> SetupResult<String> {
    if !path.is_file() {
        return Err(SetupError::MissingSecretFile {
            path: path.to_path_buf(),
        });
    }

    let raw = fs::read_to_string(path).map_err(|source| SetupError::SecretFileRead {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(raw.trim_end_matches('\n').to_string())
}
