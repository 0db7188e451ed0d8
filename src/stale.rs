//! The staleness oracle.
//!
//! A pure decision over a target, the persistent cache and filesystem
//! mtimes. Clauses are checked in a fixed order and the first match is
//! the reason reported for the rebuild; staleness then propagates to
//! every transitive consumer.

use crate::cmd;
use crate::project::{effective_group, Globals};
use crate::store::{CacheRecord, Mtime, Store};
use crate::target::{Graph, TargetId, TargetKind};
use crate::toolchain::Toolchain;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub enum StaleReason {
    MissingOutput,
    NoCacheRecord,
    DepMissing(PathBuf),
    DepNewer(PathBuf),
    OptionsChanged,
    DepSetChanged,
    ToolChanged,
    GeneratorNewer,
    /// A transitive dependency is itself stale.
    StaleDep(TargetId),
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaleReason::MissingOutput => write!(f, "output does not exist"),
            StaleReason::NoCacheRecord => write!(f, "no cache record"),
            StaleReason::DepMissing(p) => write!(f, "dependency '{}' is missing", p.display()),
            StaleReason::DepNewer(p) => write!(f, "dependency '{}' is newer", p.display()),
            StaleReason::OptionsChanged => write!(f, "options changed"),
            StaleReason::DepSetChanged => write!(f, "dependency set changed"),
            StaleReason::ToolChanged => write!(f, "tool path changed"),
            StaleReason::GeneratorNewer => write!(f, "generator script is newer"),
            StaleReason::StaleDep(id) => write!(f, "depends on stale target {id}"),
        }
    }
}

/// Decide staleness for one target from its cached record and current
/// inputs. `current_deps` is the dependency path list in graph order;
/// `order_sensitive` selects linker-input comparison semantics.
pub fn check(
    out_path: &PathBuf,
    kind: &TargetKind,
    current_deps: &[PathBuf],
    record: Option<&CacheRecord>,
    current: &CacheRecord,
) -> Option<StaleReason> {
    let out_mtime = Mtime::of(out_path);
    if out_mtime.is_none() {
        return Some(StaleReason::MissingOutput);
    }
    let Some(record) = record else {
        return Some(StaleReason::NoCacheRecord);
    };
    let out_mtime = out_mtime.unwrap();

    for dep in &record.deps {
        match Mtime::of(&dep.path) {
            None => return Some(StaleReason::DepMissing(dep.path.clone())),
            Some(m) if m > out_mtime => {
                return Some(StaleReason::DepNewer(dep.path.clone()))
            }
            Some(_) => {}
        }
    }

    if record.opts != current.opts {
        return Some(StaleReason::OptionsChanged);
    }

    let recorded: Vec<&PathBuf> = record.deps.iter().map(|d| &d.path).collect();
    let changed = if order_insensitive(kind) {
        let was: BTreeSet<&PathBuf> = recorded.iter().copied().collect();
        let now: BTreeSet<&PathBuf> = current_deps.iter().collect();
        was != now
    } else {
        recorded.len() != current_deps.len()
            || recorded.iter().zip(current_deps).any(|(a, b)| **a != *b)
    };
    if changed {
        return Some(StaleReason::DepSetChanged);
    }

    if record.tool != current.tool {
        return Some(StaleReason::ToolChanged);
    }

    if let TargetKind::GeneratedSource { script, .. } = kind {
        if Mtime::of(script).is_some_and(|m| m > out_mtime) {
            return Some(StaleReason::GeneratorNewer);
        }
    }

    None
}

/// Object header lists compare as sets; linker inputs compare in order.
fn order_insensitive(kind: &TargetKind) -> bool {
    matches!(kind, TargetKind::Object { .. })
}

/// Current dependency paths of a target, in graph order.
pub fn current_dep_paths(graph: &Graph, id: TargetId) -> Vec<PathBuf> {
    graph
        .get(id)
        .deps
        .iter()
        .map(|&d| graph.get(d).path.clone())
        .collect()
}

/// The record a successful build of this target would store, minus the
/// dependency fingerprints that only exist after the build.
pub fn expected_record(
    globals: &Globals,
    graph: &Graph,
    toolchain: &Toolchain,
    id: TargetId,
) -> Option<CacheRecord> {
    let target = graph.get(id);
    let command = cmd::command_for(globals, graph, toolchain, id)?;
    let deps = current_dep_paths(graph, id)
        .into_iter()
        .map(|path| crate::store::DepFingerprint {
            mtime: Mtime::of(&path).unwrap_or_default(),
            path,
        })
        .collect();
    Some(CacheRecord {
        out_path: target.path.clone(),
        deps,
        opts: effective_group(globals, graph, id).clone(),
        tool: PathBuf::from(command.program()),
        no_header_deps: matches!(
            target.kind,
            TargetKind::StaticLibrary { .. }
                | TargetKind::GeneratedSource { .. }
        ),
    })
}

/// Apply the oracle across the whole graph in dependency order,
/// propagating staleness to consumers.
pub fn analyze(
    globals: &Globals,
    graph: &Graph,
    toolchain: &Toolchain,
    store: &Store,
) -> BTreeMap<TargetId, StaleReason> {
    let mut stale: BTreeMap<TargetId, StaleReason> = BTreeMap::new();
    for id in graph.topo_order() {
        let target = graph.get(id);
        if !target.kind.has_command() {
            continue;
        }
        let Some(current) = expected_record(globals, graph, toolchain, id) else {
            continue;
        };
        let deps = current_dep_paths(graph, id);
        let reason = check(
            &target.path,
            &target.kind,
            &deps,
            store.get(&target.path),
            &current,
        )
        .or_else(|| {
            target
                .deps
                .iter()
                .copied()
                .find(|d| stale.contains_key(d))
                .map(StaleReason::StaleDep)
        });
        if let Some(reason) = reason {
            stale.insert(id, reason);
        }
    }
    stale
}
