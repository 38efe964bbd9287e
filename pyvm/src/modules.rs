use std::fs;
use std::path::PathBuf;

use ahash::AHashMap;
use log::debug;

/// Supplies compiled module images by module name.
pub trait ModuleSource {
    fn load(&mut self, name: &str) -> Option<Vec<u8>>;
}

/// Module images held in memory, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemorySource {
    modules: AHashMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        self.modules.insert(name.into(), bytes);
    }

    pub fn with(mut self, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.insert(name, bytes);
        self
    }
}

impl ModuleSource for MemorySource {
    fn load(&mut self, name: &str) -> Option<Vec<u8>> {
        self.modules.get(name).cloned()
    }
}

/// Looks for `<name>.pyc`, then `__pycache__/<name>.cpython-34.pyc`, in
/// each search path in order.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    paths: Vec<PathBuf>,
}

impl DirectorySource {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    fn candidates(&self, name: &str) -> impl Iterator<Item = PathBuf> + '_ {
        let relative = name.replace('.', "/");
        self.paths.iter().flat_map(move |dir| {
            let (package, leaf) = match relative.rsplit_once('/') {
                Some((package, leaf)) => (dir.join(package), leaf.to_string()),
                None => (dir.clone(), relative.clone()),
            };
            [
                package.join(format!("{leaf}.pyc")),
                package
                    .join("__pycache__")
                    .join(format!("{leaf}.cpython-34.pyc")),
            ]
        })
    }
}

impl ModuleSource for DirectorySource {
    fn load(&mut self, name: &str) -> Option<Vec<u8>> {
        self.candidates(name).find_map(|path| {
            let bytes = fs::read(&path).ok()?;
            debug!("module {name} found at {}", path.display());
            Some(bytes)
        })
    }
}
