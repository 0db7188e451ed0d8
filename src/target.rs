//! Nodes and edges of the build DAG.
//!
//! Targets live in an id-indexed arena; edges are `TargetId` lists. Output
//! paths are unique within the graph, and the path index doubles as the
//! dedup point for header sources discovered more than once.

use crate::options::{BuildType, LinkType, OptionGroup};
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub type TargetId = usize;

/// Language of a compilable source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lang {
    C,
    Cxx,
    Asm,
}

impl Lang {
    /// Classify by extension; `.C` (uppercase) is C++, `.S` (uppercase)
    /// is assembler that wants the preprocessor.
    pub fn of(path: &Path) -> Option<Lang> {
        let ext = path.extension()?.to_str()?;
        match ext {
            "c" => Some(Lang::C),
            "C" | "cc" | "cpp" | "cxx" => Some(Lang::Cxx),
            "s" | "S" => Some(Lang::Asm),
            _ => None,
        }
    }
}

/// Which compiler front end drives a link step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDriver {
    Cc,
    Cxx,
}

#[derive(Debug, Clone)]
pub enum TargetKind {
    /// A user file on disk. Terminal: no build command.
    Source,
    /// A file produced by an auxiliary command (script interpreter).
    GeneratedSource {
        script: PathBuf,
        interpreter: String,
        inputs: Vec<PathBuf>,
    },
    Object {
        source: TargetId,
        lang: Lang,
    },
    StaticLibrary {
        objects: Vec<TargetId>,
        /// Recorded for consumers' transitive link lines; the archive
        /// command itself ignores them.
        libs: Vec<TargetId>,
    },
    SharedLibrary {
        objects: Vec<TargetId>,
        libs: Vec<TargetId>,
    },
    Executable {
        objects: Vec<TargetId>,
        libs: Vec<TargetId>,
    },
}

impl TargetKind {
    pub fn is_library(&self) -> bool {
        matches!(
            self,
            TargetKind::StaticLibrary { .. } | TargetKind::SharedLibrary { .. }
        )
    }

    pub fn has_command(&self) -> bool {
        !matches!(self, TargetKind::Source)
    }
}

#[derive(Debug, Clone)]
pub struct Target {
    pub id: TargetId,
    /// Absolute output path (for sources, the file itself).
    pub path: PathBuf,
    /// All dependency edges, in declared order.
    pub deps: Vec<TargetId>,
    pub kind: TargetKind,
    /// Logical name for libraries and executables.
    pub name: Option<String>,
    pub linker: Option<LinkDriver>,
    /// Per-target option overrides, materialized lazily from the globals.
    pub local_opts: Option<OptionGroup>,
    /// Set by the worker that ran this target's command.
    pub rebuilt: bool,
}

#[derive(Debug, Default)]
pub struct Graph {
    targets: Vec<Target>,
    by_path: HashMap<PathBuf, TargetId>,
    by_name: HashMap<String, TargetId>,
    /// Library edges that closed a cycle: kept for link order, excluded
    /// from scheduling.
    link_cycles: Vec<(TargetId, TargetId)>,
    /// Output path of a generated file -> its generator target.
    generated: HashMap<PathBuf, TargetId>,
}

impl Graph {
    pub fn new() -> Graph {
        Graph::default()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn get(&self, id: TargetId) -> &Target {
        &self.targets[id]
    }

    pub fn get_mut(&mut self, id: TargetId) -> &mut Target {
        &mut self.targets[id]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter()
    }

    pub fn by_path(&self, path: &Path) -> Option<TargetId> {
        self.by_path.get(path).copied()
    }

    pub fn by_name(&self, name: &str) -> Option<TargetId> {
        self.by_name.get(name).copied()
    }

    pub fn generator_of(&self, path: &Path) -> Option<TargetId> {
        self.generated.get(path).copied()
    }

    pub fn link_cycles(&self) -> &[(TargetId, TargetId)] {
        &self.link_cycles
    }

    fn insert(&mut self, path: PathBuf, kind: TargetKind) -> Result<TargetId> {
        if let Some(&existing) = self.by_path.get(&path) {
            bail!(
                "output path collision: '{}' already produced by target {existing}",
                path.display()
            );
        }
        let id = self.targets.len();
        self.by_path.insert(path.clone(), id);
        self.targets.push(Target {
            id,
            path,
            deps: Vec::new(),
            kind,
            name: None,
            linker: None,
            local_opts: None,
            rebuilt: false,
        });
        Ok(id)
    }

    /// Add a plain source file, reusing an existing node for the same path.
    pub fn add_source(&mut self, path: PathBuf) -> TargetId {
        if let Some(&id) = self.by_path.get(&path) {
            return id;
        }
        self.insert(path, TargetKind::Source)
            .expect("checked for existing path")
    }

    pub fn add_generated_source(
        &mut self,
        output: PathBuf,
        script: PathBuf,
        interpreter: String,
        inputs: Vec<PathBuf>,
    ) -> Result<TargetId> {
        let input_ids: Vec<TargetId> =
            inputs.iter().map(|p| self.add_source(p.clone())).collect();
        let script_id = self.add_source(script.clone());
        let id = self.insert(
            output.clone(),
            TargetKind::GeneratedSource {
                script,
                interpreter,
                inputs,
            },
        )?;
        self.targets[id].deps.push(script_id);
        self.targets[id].deps.extend(input_ids);
        self.generated.insert(output, id);
        Ok(id)
    }

    pub fn add_object(&mut self, out: PathBuf, source: TargetId, lang: Lang) -> Result<TargetId> {
        let id = self.insert(out, TargetKind::Object { source, lang })?;
        self.targets[id].deps.push(source);
        Ok(id)
    }

    /// Append a discovered header edge to an object, once.
    pub fn add_header_dep(&mut self, object: TargetId, header: TargetId) {
        let deps = &mut self.targets[object].deps;
        if !deps.contains(&header) {
            deps.push(header);
        }
    }

    pub fn add_library(
        &mut self,
        out: PathBuf,
        name: String,
        link_type: LinkType,
        objects: Vec<TargetId>,
        linker: LinkDriver,
    ) -> Result<TargetId> {
        let kind = match link_type {
            LinkType::Static => TargetKind::StaticLibrary {
                objects: objects.clone(),
                libs: Vec::new(),
            },
            LinkType::Dynamic => TargetKind::SharedLibrary {
                objects: objects.clone(),
                libs: Vec::new(),
            },
        };
        let id = self.insert(out, kind)?;
        self.targets[id].name = Some(name.clone());
        self.targets[id].linker = Some(linker);
        self.targets[id].deps.extend(objects);
        self.by_name.insert(name, id);
        Ok(id)
    }

    pub fn add_executable(
        &mut self,
        out: PathBuf,
        name: String,
        objects: Vec<TargetId>,
        linker: LinkDriver,
    ) -> Result<TargetId> {
        let id = self.insert(
            out,
            TargetKind::Executable {
                objects: objects.clone(),
                libs: Vec::new(),
            },
        )?;
        self.targets[id].name = Some(name.clone());
        self.targets[id].linker = Some(linker);
        self.targets[id].deps.extend(objects);
        self.by_name.insert(name, id);
        Ok(id)
    }

    /// Wire a link edge from an artifact to a library. Declared order is
    /// preserved in the artifact's link line; an edge that would close a
    /// cycle among libraries is recorded but excluded from scheduling.
    pub fn add_lib_dep(&mut self, owner: TargetId, lib: TargetId) -> Result<()> {
        if !self.targets[lib].kind.is_library() {
            bail!(
                "'{}' can only link libraries, not '{}'",
                self.targets[owner].path.display(),
                self.targets[lib].path.display()
            );
        }
        match &mut self.targets[owner].kind {
            TargetKind::StaticLibrary { libs, .. }
            | TargetKind::SharedLibrary { libs, .. }
            | TargetKind::Executable { libs, .. } => libs.push(lib),
            _ => bail!(
                "'{}' cannot carry link edges",
                self.targets[owner].path.display()
            ),
        }
        if self.reaches(lib, owner) {
            self.link_cycles.push((owner, lib));
        } else {
            self.targets[owner].deps.push(lib);
        }
        Ok(())
    }

    /// True if `from` can reach `to` over dependency edges.
    fn reaches(&self, from: TargetId, to: TargetId) -> bool {
        if from == to {
            return true;
        }
        let mut stack = vec![from];
        let mut seen = vec![false; self.targets.len()];
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if seen[id] {
                continue;
            }
            seen[id] = true;
            stack.extend(self.targets[id].deps.iter().copied());
        }
        false
    }

    /// Ids in dependency order (every target after all of its deps).
    pub fn topo_order(&self) -> Vec<TargetId> {
        let mut order = Vec::with_capacity(self.targets.len());
        let mut mark = vec![0u8; self.targets.len()];
        let mut stack: Vec<(TargetId, usize)> = Vec::new();
        for root in 0..self.targets.len() {
            if mark[root] != 0 {
                continue;
            }
            stack.push((root, 0));
            while let Some(&mut (id, ref mut next)) = stack.last_mut() {
                if mark[id] == 2 {
                    stack.pop();
                    continue;
                }
                mark[id] = 1;
                if let Some(&dep) = self.targets[id].deps.get(*next) {
                    *next += 1;
                    if mark[dep] == 0 {
                        stack.push((dep, 0));
                    }
                } else {
                    mark[id] = 2;
                    order.push(id);
                    stack.pop();
                }
            }
        }
        order
    }

    /// Reverse adjacency: for each target, the targets that depend on it.
    pub fn consumers(&self) -> Vec<Vec<TargetId>> {
        let mut rev = vec![Vec::new(); self.targets.len()];
        for t in &self.targets {
            for &d in &t.deps {
                rev[d].push(t.id);
            }
        }
        rev
    }

    /// The requested target plus everything it transitively depends on.
    pub fn closure(&self, roots: &[TargetId]) -> Vec<TargetId> {
        let mut seen = vec![false; self.targets.len()];
        let mut stack: Vec<TargetId> = roots.to_vec();
        let mut out = Vec::new();
        while let Some(id) = stack.pop() {
            if seen[id] {
                continue;
            }
            seen[id] = true;
            out.push(id);
            stack.extend(self.targets[id].deps.iter().copied());
        }
        out
    }
}

/// Artifact naming, shared by project setup and the cache dump.
pub mod naming {
    use super::*;

    pub fn object(out_root: &Path, stem: &str, bt: BuildType) -> PathBuf {
        out_root.join(format!("{stem}_{}.o", bt.suffix()))
    }

    pub fn library(
        out_root: &Path,
        name: &str,
        bt: BuildType,
        lt: LinkType,
        version: Option<&str>,
    ) -> PathBuf {
        let base = format!("lib{name}_{}_{}", lt.suffix(), bt.suffix());
        match lt {
            LinkType::Static => out_root.join(format!("{base}.a")),
            LinkType::Dynamic => match version {
                Some(v) => out_root.join(format!("{base}.so.{v}")),
                None => out_root.join(format!("{base}.so")),
            },
        }
    }

    pub fn executable(out_root: &Path, name: &str, bt: BuildType) -> PathBuf {
        out_root.join(format!("{name}_{}", bt.suffix()))
    }
}
