use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const VOLUMES_FILE: &str = "volumes.json";
pub const AUTHORS_FILE: &str = "authors.json";
pub const LEMMA_ITEMS_FILE: &str = "lemma_items.json";

/// Key of the per-volume author mapping that applies to every other volume.
pub const ANY_VOLUME: &str = "*";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Volume {
    pub name: String,
    pub year: i32,
    #[serde(default)]
    pub item: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Volumes {
    volumes: Vec<Volume>,
}

impl Volumes {
    pub fn new(volumes: Vec<Volume>) -> Self {
        Self { volumes }
    }

    pub fn get(&self, name: &str) -> Option<&Volume> {
        let name = name.trim();
        self.volumes.iter().find(|volume| volume.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Volume> {
        self.volumes.iter()
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct AuthorRecord {
    pub name: String,
    #[serde(default)]
    pub birth: Option<i32>,
    #[serde(default)]
    pub death: Option<i32>,
    #[serde(default)]
    pub item: Option<String>,
}

/// How an `REAutor` short name resolves: one author everywhere, or one per
/// volume with an optional `"*"` fallback.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AuthorMapping {
    Single(String),
    PerVolume(BTreeMap<String, String>),
}

impl AuthorMapping {
    fn resolve(&self, volume: &str) -> Option<&str> {
        match self {
            Self::Single(name) => Some(name),
            Self::PerVolume(per_volume) => per_volume
                .get(volume.trim())
                .or_else(|| per_volume.get(ANY_VOLUME))
                .map(String::as_str),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Authors {
    #[serde(default)]
    authors: Vec<AuthorRecord>,
    #[serde(default)]
    mapping: BTreeMap<String, AuthorMapping>,
}

impl Authors {
    pub fn new(authors: Vec<AuthorRecord>, mapping: BTreeMap<String, AuthorMapping>) -> Self {
        Self { authors, mapping }
    }

    pub fn by_name(&self, name: &str) -> Option<&AuthorRecord> {
        self.authors.iter().find(|author| author.name == name)
    }

    /// Resolve the name used in `REAutor` for the given volume. Unmapped
    /// short names are looked up as full names.
    pub fn resolve(&self, short_name: &str, volume: &str) -> Option<&AuthorRecord> {
        let short_name = short_name.trim();
        let full_name = self
            .mapping
            .get(short_name)
            .and_then(|mapping| mapping.resolve(volume))
            .unwrap_or(short_name);
        self.by_name(full_name)
    }

    pub fn len(&self) -> usize {
        self.authors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.authors.is_empty()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct LemmaItems {
    /// `RE:` lemma -> item
    #[serde(default)]
    lemmas: BTreeMap<String, String>,
    /// Wikipedia article title -> item
    #[serde(default)]
    wikipedia: BTreeMap<String, String>,
}

impl LemmaItems {
    pub fn new(lemmas: BTreeMap<String, String>, wikipedia: BTreeMap<String, String>) -> Self {
        Self { lemmas, wikipedia }
    }

    pub fn lemma(&self, lemma: &str) -> Option<&str> {
        self.lemmas.get(lemma.trim()).map(String::as_str)
    }

    pub fn wikipedia(&self, title: &str) -> Option<&str> {
        self.wikipedia.get(title.trim()).map(String::as_str)
    }

    pub fn lemma_item_ids(&self) -> impl Iterator<Item = &str> {
        self.lemmas.values().map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceTables {
    pub volumes: Volumes,
    pub authors: Authors,
    pub lemma_items: LemmaItems,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePaths {
    pub volumes: PathBuf,
    pub authors: PathBuf,
    pub lemma_items: PathBuf,
}

impl TablePaths {
    /// The default file names inside one directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            volumes: dir.join(VOLUMES_FILE),
            authors: dir.join(AUTHORS_FILE),
            lemma_items: dir.join(LEMMA_ITEMS_FILE),
        }
    }
}

/// Load all tables. A missing file yields an empty table.
pub fn load_tables(paths: &TablePaths) -> Result<ReferenceTables> {
    Ok(ReferenceTables {
        volumes: load_table(&paths.volumes)?,
        authors: load_table(&paths.authors)?,
        lemma_items: load_table(&paths.lemma_items)?,
    })
}

fn load_table<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "reference table missing, using empty table");
        return Ok(T::default());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}
