use std::{
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use picvault_core::{
    records::EncryptedRecord,
    store::{DocumentStore, StoreError, UserDocument},
};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::instrument;

/// File-backed document store: one JSON document per user under `root`.
/// Writes go through a temp file and an atomic rename.
pub struct FileDocumentStore {
    root: PathBuf,
}

impl FileDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, user_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize_user(user_id)))
    }
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    fn name(&self) -> &'static str {
        "file"
    }

    #[instrument(skip_all)]
    async fn get(&self, user_id: &str) -> Result<Option<UserDocument>, StoreError> {
        match read_object(&self.path_for(user_id))? {
            Some(object) => serde_json::from_value(Value::Object(object))
                .map(Some)
                .map_err(storage_err),
            None => Ok(None),
        }
    }

    #[instrument(skip_all, fields(records = urls.len()))]
    async fn set_urls(&self, user_id: &str, urls: &[EncryptedRecord]) -> Result<(), StoreError> {
        let path = self.path_for(user_id);
        let mut object = read_object(&path)?.unwrap_or_default();
        object.insert(
            "urls".to_string(),
            serde_json::to_value(urls).map_err(storage_err)?,
        );
        write_object(&path, &object)
    }
}

fn read_object(path: &Path) -> Result<Option<Map<String, Value>>, StoreError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(storage_err(err)),
    };

    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(storage_err)?;
    match serde_json::from_slice(&buf).map_err(storage_err)? {
        Value::Object(object) => Ok(Some(object)),
        other => Err(StoreError::Storage {
            reason: format!("document is not a JSON object: {other}"),
        }),
    }
}

fn write_object(path: &Path, object: &Map<String, Value>) -> Result<(), StoreError> {
    let parent = path.parent().ok_or_else(|| StoreError::Storage {
        reason: "invalid storage path".to_string(),
    })?;
    fs::create_dir_all(parent).map_err(storage_err)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(storage_err)?;
    let json = serde_json::to_vec_pretty(object).map_err(storage_err)?;
    tmp.write_all(&json).map_err(storage_err)?;
    tmp.flush().map_err(storage_err)?;
    tmp.persist(path).map_err(|e| storage_err(e.error))?;
    Ok(())
}

// User ids are opaque; keep them out of the file name verbatim.
fn sanitize_user(user_id: &str) -> String {
    URL_SAFE_NO_PAD.encode(user_id)
}

fn storage_err<E: ToString>(err: E) -> StoreError {
    StoreError::Storage {
        reason: err.to_string(),
    }
}
