//! Versioned artifact storage and the best-effort writer used after each call.
//!
//! Every model response can be persisted as a named artifact. The writer
//! saves it to an [`ArtifactStore`], reads back the stored version, and
//! mirrors that content to the output directory. Persistence never aborts a
//! run: failures are logged and the caller proceeds.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::core::sanitize::Sanitizer;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const TEXT_CONTENT_TYPE: &str = "text/plain";

/// How a stage's response is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    /// Parsed (or wrapped) JSON, `story_response_<id>.json`.
    #[default]
    Json,
    /// Sanitized text, `story_response_<id>.txt`.
    Text,
    /// Not persisted.
    None,
}

impl ArtifactFormat {
    /// Artifact file name for an invocation, `None` when not persisted.
    pub fn filename(self, invocation_id: &str) -> Option<String> {
        match self {
            ArtifactFormat::Json => Some(format!("story_response_{invocation_id}.json")),
            ArtifactFormat::Text => Some(format!("story_response_{invocation_id}.txt")),
            ArtifactFormat::None => None,
        }
    }
}

/// A named blob with its content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Persistence failures. Always caught at the [`ArtifactWriter`] boundary.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("no artifact store is configured")]
    NotConfigured,
    #[error("artifact store: {0}")]
    Store(String),
    #[error("mirror artifact to {}: {source}", path.display())]
    Mirror {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("serialize artifact: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Versioned blob storage keyed by filename.
pub trait ArtifactStore {
    /// Store a new version of `artifact.filename` and return its version.
    fn save(&self, artifact: &Artifact) -> Result<u32, PersistError>;

    /// Load one stored version, `None` if it does not exist.
    fn load(&self, filename: &str, version: u32) -> Result<Option<Artifact>, PersistError>;
}

/// Process-local store; versions start at 0 per filename.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    versions: RefCell<BTreeMap<String, Vec<Artifact>>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored versions of `filename`.
    pub fn version_count(&self, filename: &str) -> usize {
        self.versions
            .borrow()
            .get(filename)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn filenames(&self) -> Vec<String> {
        self.versions.borrow().keys().cloned().collect()
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    fn save(&self, artifact: &Artifact) -> Result<u32, PersistError> {
        let mut versions = self.versions.borrow_mut();
        let entry = versions.entry(artifact.filename.clone()).or_default();
        let version = u32::try_from(entry.len())
            .map_err(|_| PersistError::Store("too many versions".to_string()))?;
        entry.push(artifact.clone());
        Ok(version)
    }

    fn load(&self, filename: &str, version: u32) -> Result<Option<Artifact>, PersistError> {
        Ok(self
            .versions
            .borrow()
            .get(filename)
            .and_then(|entries| entries.get(version as usize))
            .cloned())
    }
}

/// Store under a directory: `<root>/<filename>/v<version>` plus a
/// `v<version>.type` file holding the content type.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn artifact_dir(&self, filename: &str) -> Result<PathBuf, PersistError> {
        check_filename(filename)?;
        Ok(self.root.join(filename))
    }

    fn next_version(dir: &Path) -> Result<u32, PersistError> {
        if !dir.exists() {
            return Ok(0);
        }
        let entries = fs::read_dir(dir).map_err(|err| store_io("list", dir, err))?;
        let mut next = 0u32;
        for entry in entries {
            let entry = entry.map_err(|err| store_io("list", dir, err))?;
            let name = entry.file_name();
            let Some(version) = name
                .to_str()
                .and_then(|name| name.strip_prefix('v'))
                .and_then(|rest| rest.parse::<u32>().ok())
            else {
                continue;
            };
            let following = version.checked_add(1).ok_or_else(|| {
                PersistError::Store(format!("{}: no versions left", dir.display()))
            })?;
            next = next.max(following);
        }
        Ok(next)
    }
}

impl ArtifactStore for FsArtifactStore {
    fn save(&self, artifact: &Artifact) -> Result<u32, PersistError> {
        let dir = self.artifact_dir(&artifact.filename)?;
        fs::create_dir_all(&dir).map_err(|err| store_io("create", &dir, err))?;
        let version = Self::next_version(&dir)?;
        let data_path = dir.join(format!("v{version}"));
        let type_path = dir.join(format!("v{version}.type"));
        fs::write(&type_path, &artifact.content_type)
            .map_err(|err| store_io("write", &type_path, err))?;
        fs::write(&data_path, &artifact.bytes).map_err(|err| store_io("write", &data_path, err))?;
        Ok(version)
    }

    fn load(&self, filename: &str, version: u32) -> Result<Option<Artifact>, PersistError> {
        let dir = self.artifact_dir(filename)?;
        let data_path = dir.join(format!("v{version}"));
        if !data_path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&data_path).map_err(|err| store_io("read", &data_path, err))?;
        let type_path = dir.join(format!("v{version}.type"));
        let content_type = fs::read_to_string(&type_path)
            .map_err(|err| store_io("read", &type_path, err))?;
        Ok(Some(Artifact {
            filename: filename.to_string(),
            bytes,
            content_type,
        }))
    }
}

fn check_filename(filename: &str) -> Result<(), PersistError> {
    let invalid = filename.is_empty()
        || filename == "."
        || filename == ".."
        || filename.contains(['/', '\\']);
    if invalid {
        return Err(PersistError::Store(format!(
            "invalid artifact name '{filename}'"
        )));
    }
    Ok(())
}

fn store_io(action: &str, path: &Path, err: io::Error) -> PersistError {
    PersistError::Store(format!("{action} {}: {err}", path.display()))
}

/// What a successful write produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactReceipt {
    pub filename: String,
    pub version: u32,
    /// Path of the mirrored copy, `None` when the store returned no content.
    pub mirrored: Option<PathBuf>,
}

/// Turns model responses into artifacts and mirrors them to disk.
pub struct ArtifactWriter {
    store: Option<Box<dyn ArtifactStore>>,
    output_dir: PathBuf,
    sanitizer: Sanitizer,
}

impl ArtifactWriter {
    /// `store = None` models a run without an artifact service: every write
    /// fails with [`PersistError::NotConfigured`] and nothing is mirrored.
    pub fn new(store: Option<Box<dyn ArtifactStore>>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            output_dir: output_dir.into(),
            sanitizer: Sanitizer::default(),
        }
    }

    /// Sanitizer used by the text variant.
    pub fn with_sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Persist `raw` in the given format. Logs and swallows every failure.
    pub fn write(
        &self,
        format: ArtifactFormat,
        invocation_id: &str,
        raw: &str,
    ) -> Option<ArtifactReceipt> {
        let filename = format.filename(invocation_id)?;
        match format {
            ArtifactFormat::Json => self.write_json(&filename, raw),
            ArtifactFormat::Text => self.write_text(&filename, raw),
            ArtifactFormat::None => None,
        }
    }

    /// JSON variant: parse `raw`, or wrap it as `{"response": raw}`.
    pub fn write_json(&self, filename: &str, raw: &str) -> Option<ArtifactReceipt> {
        swallow(filename, self.try_write_json(filename, raw))
    }

    /// Text variant: sanitized `raw` as plain text.
    pub fn write_text(&self, filename: &str, raw: &str) -> Option<ArtifactReceipt> {
        swallow(filename, self.try_write_text(filename, raw))
    }

    pub fn try_write_json(&self, filename: &str, raw: &str) -> Result<ArtifactReceipt, PersistError> {
        let bytes = json_artifact_bytes(raw)?;
        self.persist(Artifact {
            filename: filename.to_string(),
            bytes,
            content_type: JSON_CONTENT_TYPE.to_string(),
        })
    }

    pub fn try_write_text(&self, filename: &str, raw: &str) -> Result<ArtifactReceipt, PersistError> {
        let text = self.sanitizer.clean(raw);
        self.persist(Artifact {
            filename: filename.to_string(),
            bytes: text.into_bytes(),
            content_type: TEXT_CONTENT_TYPE.to_string(),
        })
    }

    #[instrument(skip_all, fields(filename = %artifact.filename, content_type = %artifact.content_type))]
    fn persist(&self, artifact: Artifact) -> Result<ArtifactReceipt, PersistError> {
        let store = self.store.as_ref().ok_or(PersistError::NotConfigured)?;
        let version = store.save(&artifact)?;
        info!(version, "saved artifact");

        let mirrored = match store.load(&artifact.filename, version)? {
            Some(stored) => Some(self.mirror(&stored)?),
            None => {
                warn!(version, "stored artifact could not be read back, not mirrored");
                None
            }
        };
        Ok(ArtifactReceipt {
            filename: artifact.filename,
            version,
            mirrored,
        })
    }

    fn mirror(&self, artifact: &Artifact) -> Result<PathBuf, PersistError> {
        check_filename(&artifact.filename)?;
        let path = self.output_dir.join(&artifact.filename);
        let mirror_err = |source: io::Error| PersistError::Mirror {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&self.output_dir).map_err(mirror_err)?;
        fs::write(&path, &artifact.bytes).map_err(mirror_err)?;
        debug!(path = %path.display(), "mirrored artifact");
        Ok(path)
    }
}

/// Pretty-printed JSON for `raw`: parsed when it is JSON, wrapped otherwise.
pub fn json_artifact_bytes(raw: &str) -> Result<Vec<u8>, PersistError> {
    let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| json!({ "response": raw }));
    let mut buf = serde_json::to_string_pretty(&value)?;
    buf.push('\n');
    Ok(buf.into_bytes())
}

fn swallow(filename: &str, result: Result<ArtifactReceipt, PersistError>) -> Option<ArtifactReceipt> {
    match result {
        Ok(receipt) => Some(receipt),
        Err(PersistError::NotConfigured) => {
            warn!(filename, "artifact not saved: no artifact store is configured");
            None
        }
        Err(err) => {
            warn!(filename, err = %err, "artifact not saved");
            None
        }
    }
}
