//! Extension discovery and module loading.
//!
//! # Responsibility
//! - Map the extensions directory to one descriptor per extension name.
//! - Turn a descriptor's entry file into a live `Extension`.
//!
//! # Invariants
//! - Discovery output is sorted by name and stable across runs.
//! - A directory extension wins over a same-named top-level module file.

use super::script::ScriptExtension;
use super::{Extension, MODULE_SUFFIX};
use crate::BoxError;
use log::debug;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const README_FILE_NAME: &str = "README.md";
const ENTRY_MAIN: &str = "main";
const ENTRY_INIT: &str = "__init__";

/// Identity and location of one discovered extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionDescriptor {
    pub name: String,
    /// Entry module file.
    pub path: PathBuf,
    pub directory: PathBuf,
    pub readme: Option<PathBuf>,
}

/// Scans `dir` for extensions.
///
/// A top-level `name.sed` is extension `name`; a directory `name/` is
/// extension `name` with entry `name/name.sed`, `name/main.sed`,
/// `name/__init__.sed` or else the first `*.sed` file by name. Directories
/// without any module are skipped.
pub fn discover(dir: &Path) -> io::Result<Vec<ExtensionDescriptor>> {
    let mut found = BTreeMap::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        if path.is_dir() {
            match resolve_entry(&path, &name) {
                Some(entry_path) => {
                    found.insert(name.clone(), descriptor(name, entry_path));
                }
                None => debug!(
                    "event=extension_scan module=extension status=skipped reason=no_module dir={}",
                    path.display()
                ),
            }
        } else if is_module(&path) {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if dir.join(stem).is_dir() {
                continue;
            }
            found.insert(stem.to_string(), descriptor(stem.to_string(), path.clone()));
        }
    }
    Ok(found.into_values().collect())
}

fn resolve_entry(dir: &Path, name: &str) -> Option<PathBuf> {
    let preferred = [name, ENTRY_MAIN, ENTRY_INIT]
        .iter()
        .map(|stem| dir.join(format!("{stem}.{MODULE_SUFFIX}")))
        .find(|candidate| candidate.is_file());
    if preferred.is_some() {
        return preferred;
    }
    let mut modules: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_module(path))
        .collect();
    modules.sort();
    modules.into_iter().next()
}

fn descriptor(name: String, path: PathBuf) -> ExtensionDescriptor {
    let directory = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let readme = Some(directory.join(README_FILE_NAME)).filter(|p| p.is_file());
    ExtensionDescriptor {
        name,
        path,
        directory,
        readme,
    }
}

fn is_module(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(MODULE_SUFFIX)
}

/// Turns an entry module into an extension instance.
pub trait ExtensionLoader: Send + Sync {
    fn load(&self, name: &str, entry: &Path) -> Result<Arc<dyn Extension>, BoxError>;
}

type ExtensionFactory = Box<dyn Fn() -> Arc<dyn Extension> + Send + Sync>;

/// Resolves built-in native extensions by name, else runs the entry as a
/// script module.
#[derive(Default)]
pub struct DefaultExtensionLoader {
    builtins: BTreeMap<String, ExtensionFactory>,
}

impl DefaultExtensionLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a native extension served whenever `name` is discovered.
    pub fn with_builtin(
        mut self,
        name: &str,
        factory: impl Fn() -> Arc<dyn Extension> + Send + Sync + 'static,
    ) -> Self {
        self.builtins.insert(name.to_string(), Box::new(factory));
        self
    }
}

impl ExtensionLoader for DefaultExtensionLoader {
    fn load(&self, name: &str, entry: &Path) -> Result<Arc<dyn Extension>, BoxError> {
        if let Some(factory) = self.builtins.get(name) {
            return Ok(factory());
        }
        let source = fs::read_to_string(entry)?;
        let module = ScriptExtension::load(name, &source, &entry.to_string_lossy())?;
        Ok(Arc::new(module))
    }
}
