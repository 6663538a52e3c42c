use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use rustc_hash::FxHashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Where the server gets the documents it serves from
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DocumentSource: Send + Sync + 'static {
    /// Returns `None` if there is no document of that name
    async fn load(&self, name: &str) -> anyhow::Result<Option<Vec<u8>>>;
}

/// Serves files below a root directory. Names that would escape the root directory are treated
///  as non-existent.
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> DirectorySource {
        DirectorySource { root: root.into() }
    }

    fn resolve(&self, name: &str) -> Option<PathBuf> {
        let relative = Path::new(name.trim_start_matches('/'));
        if relative.as_os_str().is_empty() {
            return None;
        }
        if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            return None;
        }
        Some(self.root.join(relative))
    }
}

#[async_trait]
impl DocumentSource for DirectorySource {
    async fn load(&self, name: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let Some(path) = self.resolve(name) else {
            warn!("rejecting document name {:?} outside the document root", name);
            return Ok(None);
        };

        match tokio::fs::read(&path).await {
            Ok(document) => {
                debug!("loaded {:?} ({} bytes)", path, document.len());
                Ok(Some(document))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Default)]
pub struct InMemorySource {
    documents: FxHashMap<String, Vec<u8>>,
}

impl InMemorySource {
    pub fn with_document(mut self, name: &str, content: impl Into<Vec<u8>>) -> InMemorySource {
        self.documents.insert(name.to_string(), content.into());
        self
    }
}

#[async_trait]
impl DocumentSource for InMemorySource {
    async fn load(&self, name: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.documents.get(name.trim_start_matches('/')).cloned())
    }
}
