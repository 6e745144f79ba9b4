use crate::runtime::ContainerRuntime;
use bench_core::{EngineError, EngineResult};
use regex::Regex;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// File operations routed to either the container filesystem or the host,
/// so callers never branch on the execution mode themselves.
#[derive(Clone, Copy)]
pub enum FileAccess<'a> {
    Container {
        id: &'a str,
        runtime: &'a dyn ContainerRuntime,
    },
    Host,
}

impl<'a> FileAccess<'a> {
    /// Returns `None` when the file does not exist.
    pub fn read_file(&self, path: &Path) -> EngineResult<Option<String>> {
        let bytes = match self {
            Self::Container { id, runtime } => runtime.read_file(id, path)?,
            Self::Host => {
                if !path.is_file() {
                    return Ok(None);
                }
                Some(fs::read(path)?)
            }
        };
        Ok(bytes.map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    pub fn read_json(&self, path: &Path) -> EngineResult<Option<Value>> {
        match self.read_file(path)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn append_file(&self, contents: &str, path: &Path) -> EngineResult<()> {
        match self {
            Self::Container { id, runtime } => {
                runtime.write_file(id, path, contents.as_bytes(), true)
            }
            Self::Host => {
                let mut file = OpenOptions::new().create(true).append(true).open(path)?;
                file.write_all(contents.as_bytes())?;
                Ok(())
            }
        }
    }

    pub fn write_file(&self, contents: &str, path: &Path) -> EngineResult<()> {
        match self {
            Self::Container { id, runtime } => {
                runtime.write_file(id, path, contents.as_bytes(), false)
            }
            Self::Host => {
                fs::write(path, contents)?;
                Ok(())
            }
        }
    }

    pub fn write_json(&self, value: &Value, path: &Path) -> EngineResult<()> {
        let raw = serde_json::to_string_pretty(value)?;
        self.write_file(&raw, path)
    }

    /// Lists entries of `dir`, optionally keeping only names matching `pattern`.
    /// A missing directory lists as empty.
    pub fn list_dir(&self, dir: &Path, pattern: Option<&str>) -> EngineResult<Vec<PathBuf>> {
        let filter = pattern
            .map(Regex::new)
            .transpose()
            .map_err(|err| EngineError::runtime("invalid list_dir pattern", err.to_string()))?;
        if !self.is_dir(dir)? {
            return Ok(Vec::new());
        }
        let mut names = match self {
            Self::Container { id, runtime } => runtime.list_dir(id, dir)?,
            Self::Host => {
                let mut names = Vec::new();
                for entry in fs::read_dir(dir)? {
                    names.push(entry?.file_name().to_string_lossy().into_owned());
                }
                names
            }
        };
        names.sort();
        Ok(names
            .into_iter()
            .filter(|name| filter.as_ref().map_or(true, |re| re.is_match(name)))
            .map(|name| dir.join(name))
            .collect())
    }

    pub fn is_dir(&self, path: &Path) -> EngineResult<bool> {
        match self {
            Self::Container { id, runtime } => runtime.is_dir(id, path),
            Self::Host => Ok(path.is_dir()),
        }
    }

    pub fn is_file(&self, path: &Path) -> EngineResult<bool> {
        match self {
            Self::Container { id, runtime } => runtime.is_file(id, path),
            Self::Host => Ok(path.is_file()),
        }
    }
}
