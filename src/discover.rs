//! Header dependency discovery.
//!
//! Each compilable object gets one preprocessor run in dependency-emitting
//! mode (`-M -MG`); the make-rule output is parsed, system headers are
//! filtered against the probed search path, and what remains becomes
//! dependency edges. Results from the previous run are reused when the
//! source fingerprint and the options are unchanged.

use crate::options::Processor;
use crate::project::{effective_group, Globals};
use crate::store::{Mtime, Store};
use crate::target::{Graph, Lang, TargetId, TargetKind};
use crate::toolchain::Toolchain;
use anyhow::Result;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::process::Command;

/// What discovery did across the whole graph.
#[derive(Debug, Default)]
pub struct DiscoveryOutcome {
    pub ran: usize,
    pub reused: usize,
    /// Per-object failures; each blocks that object and its consumers.
    pub failures: Vec<(TargetId, String)>,
}

/// Fold backslash-continuations and pull the path list out of a
/// make-rule dependency line (`out.o: src.c a.h b.h`).
pub fn parse_make_deps(output: &str) -> Option<Vec<PathBuf>> {
    let flat = output.replace("\\\r\n", " ").replace("\\\n", " ");
    let (_, deps) = flat.split_once(':')?;
    Some(deps.split_whitespace().map(PathBuf::from).collect())
}

enum Job {
    Run {
        id: TargetId,
        argv: Vec<String>,
        source: PathBuf,
    },
    Reuse {
        id: TargetId,
        headers: Vec<PathBuf>,
    },
}

/// Run discovery for every compilable object in the graph, reusing
/// cached results where the source and options are unchanged.
pub fn discover_all(
    globals: &Globals,
    graph: &mut Graph,
    toolchain: &Toolchain,
    store: &Store,
) -> Result<DiscoveryOutcome> {
    let mut jobs = Vec::new();
    for target in graph.iter() {
        let TargetKind::Object { source, lang } = target.kind else {
            continue;
        };
        let src_path = graph.get(source).path.clone();
        if !preprocessable(lang, &src_path) {
            continue;
        }
        // A source that is itself generated may not exist yet; its
        // headers are unknowable until the generator has run.
        if !src_path.exists() {
            continue;
        }
        if let Some(headers) = reusable_headers(globals, graph, store, toolchain, target.id, &src_path) {
            jobs.push(Job::Reuse {
                id: target.id,
                headers,
            });
            continue;
        }
        let group = effective_group(globals, graph, target.id);
        let driver = toolchain.driver(lang == Lang::Cxx);
        let mut argv = vec![
            driver.to_string_lossy().into_owned(),
            "-M".to_string(),
            "-MG".to_string(),
        ];
        argv.extend(group.get(Processor::Cpp).argv());
        argv.push(src_path.to_string_lossy().into_owned());
        jobs.push(Job::Run {
            id: target.id,
            argv,
            source: src_path,
        });
    }

    let mut outcome = DiscoveryOutcome::default();
    let mut discovered: Vec<(TargetId, Vec<PathBuf>)> = Vec::new();

    let results: Vec<(TargetId, Result<Vec<PathBuf>, String>)> = jobs
        .par_iter()
        .filter_map(|job| match job {
            Job::Reuse { .. } => None,
            Job::Run { id, argv, source } => {
                Some((*id, run_preprocessor(argv, source)))
            }
        })
        .collect();

    for job in &jobs {
        if let Job::Reuse { id, headers } = job {
            outcome.reused += 1;
            discovered.push((*id, headers.clone()));
        }
    }
    for (id, result) in results {
        match result {
            Ok(paths) => {
                outcome.ran += 1;
                discovered.push((id, paths));
            }
            Err(msg) => outcome.failures.push((id, msg)),
        }
    }

    for (id, paths) in discovered {
        apply_headers(globals, graph, toolchain, id, &paths);
    }
    Ok(outcome)
}

fn preprocessable(lang: Lang, src: &Path) -> bool {
    match lang {
        Lang::C | Lang::Cxx => true,
        // Only uppercase .S assembler sources see the preprocessor.
        Lang::Asm => src.extension().is_some_and(|e| e == "S"),
    }
}

/// Cached header list for an object whose source fingerprint, options
/// and tool are unchanged since the recorded build.
fn reusable_headers(
    globals: &Globals,
    graph: &Graph,
    store: &Store,
    toolchain: &Toolchain,
    id: TargetId,
    src_path: &Path,
) -> Option<Vec<PathBuf>> {
    let target = graph.get(id);
    let record = store.get(&target.path)?;
    if record.no_header_deps {
        return None;
    }
    let recorded_src = record.deps.first()?;
    if recorded_src.path != src_path {
        return None;
    }
    if Mtime::of(src_path)? != recorded_src.mtime {
        return None;
    }
    if record.opts != *effective_group(globals, graph, id) {
        return None;
    }
    let TargetKind::Object { lang, .. } = target.kind else {
        return None;
    };
    if record.tool != *toolchain.driver(lang == Lang::Cxx) {
        return None;
    }
    Some(record.deps[1..].iter().map(|d| d.path.clone()).collect())
}

fn run_preprocessor(argv: &[String], source: &Path) -> Result<Vec<PathBuf>, String> {
    let output = Command::new(&argv[0])
        .args(&argv[1..])
        .output()
        .map_err(|e| format!("failed to spawn '{}': {e}", argv[0]))?;
    if !output.status.success() {
        return Err(format!(
            "preprocessor failed on '{}':\n{}",
            source.display(),
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let deps = parse_make_deps(&stdout).ok_or_else(|| {
        format!(
            "unparseable dependency output for '{}'",
            source.display()
        )
    })?;
    Ok(deps)
}

/// Turn discovered paths into graph edges: user headers become source
/// nodes, generated headers become edges to their generator.
fn apply_headers(
    globals: &Globals,
    graph: &mut Graph,
    toolchain: &Toolchain,
    object: TargetId,
    paths: &[PathBuf],
) {
    let source = match graph.get(object).kind {
        TargetKind::Object { source, .. } => source,
        _ => return,
    };
    let src_path = graph.get(source).path.clone();
    for path in paths {
        if *path == src_path || toolchain.is_system_header(path) {
            continue;
        }
        // -MG emits not-yet-generated headers as bare names; resolve
        // them through the generated-file index under the output root.
        let resolved = if path.is_relative() {
            globals.out_root.join(path)
        } else {
            path.clone()
        };
        if let Some(generator) = graph.generator_of(&resolved) {
            graph.add_header_dep(object, generator);
        } else if path.is_absolute() || path.exists() {
            // Normalize so records compare stably regardless of the
            // working directory the preprocessor printed them from.
            let header = path.canonicalize().unwrap_or_else(|_| path.clone());
            let header = graph.add_source(header);
            graph.add_header_dep(object, header);
        }
    }
}
