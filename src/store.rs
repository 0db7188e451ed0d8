//! Persistent key/value cache of per-target build inputs.
//!
//! One JSON file per `{link_type}_{build_type}` flavor under the output
//! root. Keys are target output paths plus the `__globals__` header; the
//! encoding is versioned and deterministic (`BTreeMap` ordering), and a
//! file that fails to decode is treated as empty rather than fatal.

use crate::options::{OptionGroup, OptionSet, BuildType, LinkType};
use crate::project::Globals;
use crate::toolchain::Toolchain;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const STORE_SCHEMA: u32 = 1;

/// Modification time as a stable, comparable fingerprint.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Mtime {
    pub secs: u64,
    pub nanos: u32,
}

impl From<SystemTime> for Mtime {
    fn from(t: SystemTime) -> Mtime {
        let d = t.duration_since(UNIX_EPOCH).unwrap_or_default();
        Mtime {
            secs: d.as_secs(),
            nanos: d.subsec_nanos(),
        }
    }
}

impl Mtime {
    /// Current mtime of a file, if it exists.
    pub fn of(path: &Path) -> Option<Mtime> {
        fs::metadata(path).and_then(|m| m.modified()).ok().map(Mtime::from)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepFingerprint {
    pub path: PathBuf,
    pub mtime: Mtime,
}

/// The exact inputs a target was last built from. Any field-wise
/// mismatch against the freshly computed record forces a rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub out_path: PathBuf,
    /// Dependency paths in declared order, with the fingerprint each had
    /// when the target was built.
    pub deps: Vec<DepFingerprint>,
    /// The effective option group the command was rendered from.
    pub opts: OptionGroup,
    /// The tool that ran the command.
    pub tool: PathBuf,
    /// Set for targets whose dependency list carries no discovered
    /// headers (assembler sources, archives).
    #[serde(default)]
    pub no_header_deps: bool,
}

/// The single `__globals__` entry. A mismatch on any field invalidates
/// every record: option and root changes are assumed to affect every
/// artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalHeader {
    pub src_root: PathBuf,
    pub obj_root: PathBuf,
    pub cc_path: PathBuf,
    pub cxx_path: PathBuf,
    /// The eight canonical sets, keyed by their store names.
    pub option_sets: BTreeMap<String, OptionSet>,
}

impl GlobalHeader {
    pub fn new(globals: &Globals, toolchain: &Toolchain) -> GlobalHeader {
        let option_sets = globals
            .group
            .sets()
            .map(|s| (s.processor.store_key().to_string(), s.clone()))
            .collect();
        GlobalHeader {
            src_root: globals.src_root.clone(),
            obj_root: globals.out_root.clone(),
            cc_path: toolchain.cc_path.clone(),
            cxx_path: toolchain.cxx_path.clone(),
            option_sets,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreData {
    version: u32,
    globals: Option<GlobalHeader>,
    records: BTreeMap<String, CacheRecord>,
}

impl Default for StoreData {
    fn default() -> StoreData {
        StoreData {
            version: STORE_SCHEMA,
            globals: None,
            records: BTreeMap::new(),
        }
    }
}

pub struct Store {
    path: PathBuf,
    data: StoreData,
}

impl Store {
    /// Cache file location for one flavor pair.
    pub fn file_path(out_root: &Path, lt: LinkType, bt: BuildType) -> PathBuf {
        out_root.join(format!("mason_{}_{}.cache.json", lt.suffix(), bt.suffix()))
    }

    /// Open a store; a missing, corrupt or schema-mismatched file starts
    /// empty (its records would have been stale anyway).
    pub fn open(path: PathBuf) -> Store {
        let data = fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str::<StoreData>(&s).ok())
            .filter(|d| d.version == STORE_SCHEMA)
            .unwrap_or_default();
        Store { path, data }
    }

    /// A fresh store at `path`, ignoring whatever is on disk (the
    /// `--no-cache` path).
    pub fn empty(path: PathBuf) -> Store {
        Store {
            path,
            data: StoreData::default(),
        }
    }

    /// Compare the stored global header against the current one; on any
    /// mismatch every record is dropped. Returns true if the store was
    /// cleared.
    pub fn validate_globals(&mut self, current: &GlobalHeader) -> bool {
        let invalidated = match &self.data.globals {
            Some(stored) => stored != current,
            None => !self.data.records.is_empty(),
        };
        if invalidated {
            self.data.records.clear();
        }
        self.data.globals = Some(current.clone());
        invalidated
    }

    pub fn get(&self, out_path: &Path) -> Option<&CacheRecord> {
        self.data.records.get(&key_of(out_path))
    }

    pub fn put(&mut self, record: CacheRecord) {
        self.data.records.insert(key_of(&record.out_path), record);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CacheRecord)> {
        self.data.records.iter()
    }

    pub fn len(&self) -> usize {
        self.data.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.records.is_empty()
    }

    pub fn globals(&self) -> Option<&GlobalHeader> {
        self.data.globals.as_ref()
    }

    /// Write the store back to disk.
    pub fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.data)?;
        fs::write(&self.path, json)
            .with_context(|| format!("failed to write cache {}", self.path.display()))
    }
}

fn key_of(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
