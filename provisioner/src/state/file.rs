//! Local cache backing: one JSON file per session

use async_trait::async_trait;
use tracing::debug;

use crate::errors::ProvisionError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::state::StateBacking;

/// Local file cache under the storage layout
#[derive(Debug, Clone)]
pub struct FileBacking {
    dir: Dir,
}

impl FileBacking {
    pub fn new(dir: Dir) -> Self {
        Self { dir }
    }

    fn file(&self, key: &str) -> File {
        self.dir.file(&format!("{key}.json"))
    }
}

#[async_trait]
impl StateBacking for FileBacking {
    fn name(&self) -> &str {
        "local"
    }

    async fn fetch(&self, key: &str) -> Result<Option<serde_json::Value>, ProvisionError> {
        let file = self.file(key);
        if !file.exists().await {
            return Ok(None);
        }

        let contents = file.read_string().await?;
        let document = serde_json::from_str(&contents).map_err(|e| {
            ProvisionError::StateCorruption(format!("{}: {}", file.path().display(), e))
        })?;
        Ok(Some(document))
    }

    async fn store(&self, key: &str, document: &serde_json::Value) -> Result<(), ProvisionError> {
        let file = self.file(key);
        debug!("Writing deployment state to {}", file.path().display());
        file.write_json(document).await
    }

    async fn delete(&self, key: &str) -> Result<(), ProvisionError> {
        self.file(key).delete().await
    }
}
