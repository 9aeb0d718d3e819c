//! Per-channel archive documents and their on-disk layout.
//!
//! Each channel owns one JSON document at
//! `<store_root>/<slug(guild)>/<slug(channel)>.json`. The [`StateStore`] owns
//! every document it has loaded or created and hands out [`DocumentId`]
//! handles; collaborators never hold the documents themselves.

pub mod identity;

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::model::{string_or_number, ChannelScope, ConversationScope, Record, RecordKind, SourceMessage};
use crate::slug::slug;

use identity::{RecordSet, Resolution};

pub const DOCUMENT_EXTENSION: &str = "json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// On-disk shape of a channel document.
#[derive(Deserialize)]
struct DocumentFile {
    #[serde(default)]
    guild: String,
    #[serde(default, deserialize_with = "string_or_number")]
    guild_id: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    channel: String,
    #[serde(default, deserialize_with = "string_or_number")]
    channel_id: String,
    #[serde(default)]
    surveys: Vec<Record>,
    #[serde(default)]
    assets: Vec<Record>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Serialize)]
struct DocumentView<'a> {
    guild: &'a str,
    guild_id: &'a str,
    category: &'a str,
    channel: &'a str,
    channel_id: &'a str,
    surveys: &'a [Record],
    assets: &'a [Record],
    #[serde(flatten)]
    extra: &'a Map<String, Value>,
}

/// Everything archived for one channel.
#[derive(Debug)]
pub struct StateDocument {
    scope: ChannelScope,
    surveys: RecordSet,
    assets: RecordSet,
    /// Top-level keys this crate does not interpret, written back unchanged.
    extra: Map<String, Value>,
    path: PathBuf,
    /// Files this document was read from; removed once it is written elsewhere.
    sources: Vec<PathBuf>,
}

impl StateDocument {
    fn empty(scope: ChannelScope, path: PathBuf) -> Self {
        Self {
            scope,
            surveys: RecordSet::default(),
            assets: RecordSet::default(),
            extra: Map::new(),
            path,
            sources: Vec::new(),
        }
    }

    fn from_file(file: DocumentFile, path: PathBuf) -> Self {
        let scope = ChannelScope {
            guild_name: file.guild,
            guild_id: file.guild_id,
            category_name: file.category,
            channel_name: file.channel,
            channel_id: file.channel_id,
        };
        Self {
            surveys: RecordSet::from_records(&scope, file.surveys),
            assets: RecordSet::from_records(&scope, file.assets),
            extra: file.extra,
            scope,
            sources: vec![path.clone()],
            path,
        }
    }

    pub fn scope(&self) -> &ChannelScope {
        &self.scope
    }

    /// Where the document will be written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self, kind: RecordKind) -> &[Record] {
        self.set(kind).records()
    }

    pub fn count(&self, kind: RecordKind) -> usize {
        self.set(kind).records().len()
    }

    pub fn resolve(
        &mut self,
        kind: RecordKind,
        scope: &ConversationScope,
        message: &SourceMessage,
    ) -> (&mut Record, Resolution) {
        self.set_mut(kind).resolve(scope, message)
    }

    pub fn to_json(&self) -> String {
        let view = DocumentView {
            guild: &self.scope.guild_name,
            guild_id: &self.scope.guild_id,
            category: &self.scope.category_name,
            channel: &self.scope.channel_name,
            channel_id: &self.scope.channel_id,
            surveys: self.surveys.records(),
            assets: self.assets.records(),
            extra: &self.extra,
        };
        // Serializing plain strings and vectors cannot fail.
        let body = serde_json::to_string_pretty(&view).unwrap_or_default();
        format!("{body}\n")
    }

    /// Folds a second copy of this channel's document into this one.
    fn absorb(&mut self, other: StateDocument) -> usize {
        let mut appended = 0usize;
        for record in other.surveys.records().iter().cloned() {
            if self.surveys.absorb(&other.scope, record) {
                appended += 1;
            }
        }
        for record in other.assets.records().iter().cloned() {
            if self.assets.absorb(&other.scope, record) {
                appended += 1;
            }
        }
        for (key, value) in other.extra {
            self.extra.entry(key).or_insert(value);
        }
        self.sources.extend(other.sources);
        appended
    }

    fn set(&self, kind: RecordKind) -> &RecordSet {
        match kind {
            RecordKind::Survey => &self.surveys,
            RecordKind::Asset => &self.assets,
        }
    }

    fn set_mut(&mut self, kind: RecordKind) -> &mut RecordSet {
        match kind {
            RecordKind::Survey => &mut self.surveys,
            RecordKind::Asset => &mut self.assets,
        }
    }
}

/// Handle to a document owned by a [`StateStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(usize);

pub struct StateStore {
    root: PathBuf,
    documents: Vec<StateDocument>,
    by_channel_id: HashMap<String, DocumentId>,
    by_name: HashMap<(String, String), DocumentId>,
    touched: BTreeSet<DocumentId>,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            documents: Vec::new(),
            by_channel_id: HashMap::new(),
            by_name: HashMap::new(),
            touched: BTreeSet::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn document_path(&self, guild_name: &str, channel_name: &str) -> PathBuf {
        self.root
            .join(slug(guild_name))
            .join(format!("{}.{}", slug(channel_name), DOCUMENT_EXTENSION))
    }

    /// Reads one document. `Ok(None)` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<StateDocument>, StoreError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(path, e)),
        };
        let file: DocumentFile = serde_json::from_str(&raw).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(StateDocument::from_file(file, path.to_path_buf())))
    }

    /// Loads every document under the store root. Unreadable files are
    /// skipped; copies of the same channel are merged. Returns the number of
    /// files read.
    pub fn load_all(&mut self) -> Result<usize, StoreError> {
        let mut files = Vec::new();
        collect_documents(&self.root, &mut files)?;
        files.sort();

        let mut loaded = 0usize;
        for file in files {
            match Self::load(&file) {
                Ok(Some(document)) => {
                    self.insert_loaded(document);
                    loaded += 1;
                }
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable archive file: {}", e),
            }
        }
        info!(
            "Loaded {} archive files ({} channels) from {}",
            loaded,
            self.documents.len(),
            self.root.display()
        );
        Ok(loaded)
    }

    fn insert_loaded(&mut self, document: StateDocument) {
        let channel_id = document.scope.channel_id.clone();
        if !channel_id.is_empty() {
            if let Some(&existing) = self.by_channel_id.get(&channel_id) {
                let target = &mut self.documents[existing.0];
                let appended = target.absorb(document);
                info!(
                    "Merged duplicate archive for channel {} into {} ({} records added)",
                    channel_id,
                    target.path.display(),
                    appended
                );
                return;
            }
        }

        let id = DocumentId(self.documents.len());
        let name = (
            document.scope.guild_name.clone(),
            document.scope.channel_name.clone(),
        );
        self.documents.push(document);
        if !channel_id.is_empty() {
            self.by_channel_id.insert(channel_id, id);
        }
        self.by_name.insert(name, id);
    }

    /// Finds the document for a channel by id, then by guild and channel
    /// name, creating an empty one if neither matches. The document's scope
    /// and target path are refreshed to the current names.
    pub fn find_or_create(&mut self, scope: &ChannelScope) -> DocumentId {
        let name = (scope.guild_name.clone(), scope.channel_name.clone());
        let found = Some(scope.channel_id.as_str())
            .filter(|id| !id.is_empty())
            .and_then(|id| self.by_channel_id.get(id))
            .or_else(|| self.by_name.get(&name))
            .copied();

        let path = self.document_path(&scope.guild_name, &scope.channel_name);
        let id = match found {
            Some(id) => id,
            None => {
                debug!("Starting new archive for #{} at {}", scope.channel_name, path.display());
                let id = DocumentId(self.documents.len());
                self.documents
                    .push(StateDocument::empty(scope.clone(), path.clone()));
                id
            }
        };

        if !scope.channel_id.is_empty() {
            self.by_channel_id.insert(scope.channel_id.clone(), id);
        }
        self.by_name.retain(|key, value| *value != id || *key == name);
        self.by_name.insert(name, id);

        let document = &mut self.documents[id.0];
        if document.path != path {
            info!(
                "Archive for #{} moves from {} to {}",
                scope.channel_name,
                document.path.display(),
                path.display()
            );
        }
        document.scope = scope.clone();
        document.path = path;
        self.touched.insert(id);
        id
    }

    pub fn get(&self, id: DocumentId) -> &StateDocument {
        &self.documents[id.0]
    }

    pub fn get_mut(&mut self, id: DocumentId) -> &mut StateDocument {
        &mut self.documents[id.0]
    }

    pub fn documents(&self) -> impl Iterator<Item = &StateDocument> {
        self.documents.iter()
    }

    /// Writes a document atomically, then removes any file it was previously
    /// read from at a different location.
    pub fn persist(&mut self, id: DocumentId) -> Result<PathBuf, StoreError> {
        let document = &mut self.documents[id.0];
        let path = document.path.clone();
        write_atomic(&path, &document.to_json())?;

        for stale in document.sources.drain(..) {
            if stale == path {
                continue;
            }
            match fs::remove_file(&stale) {
                Ok(()) => info!("Removed relocated archive {}", stale.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove stale archive {}: {}", stale.display(), e),
            }
        }
        document.sources.push(path.clone());
        Ok(path)
    }

    /// Persists every document touched by `find_or_create`. Failures are
    /// logged; returns the number of documents written.
    pub fn persist_touched(&mut self) -> usize {
        let touched: Vec<DocumentId> = self.touched.iter().copied().collect();
        let mut written = 0usize;
        for id in touched {
            match self.persist(id) {
                Ok(_) => written += 1,
                Err(e) => error!("Failed to save archive: {}", e),
            }
        }
        written
    }

    /// Record totals across every known document: `(surveys, assets)`.
    pub fn totals(&self) -> (usize, usize) {
        self.documents.iter().fold((0, 0), |(surveys, assets), doc| {
            (
                surveys + doc.count(RecordKind::Survey),
                assets + doc.count(RecordKind::Asset),
            )
        })
    }
}

fn collect_documents(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(StoreError::io(dir, e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            collect_documents(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some(DOCUMENT_EXTENSION) {
            out.push(path);
        }
    }
    Ok(())
}

fn write_atomic(path: &Path, payload: &str) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }

    let temp_path = match path.file_name() {
        Some(name) => path.with_file_name(format!("{}.tmp", name.to_string_lossy())),
        None => path.with_extension("tmp"),
    };

    fs::write(&temp_path, payload).map_err(|e| StoreError::io(&temp_path, e))?;
    fs::rename(&temp_path, path).map_err(|e| StoreError::io(path, e))?;
    Ok(())
}
