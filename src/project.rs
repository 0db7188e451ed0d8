//! Evaluation of a project description into a target graph.
//!
//! The config layer hands over raw declarations; this module resolves
//! source files under the bundle include/exclude roots and feeds the
//! narrow operation set (`set_globals`, `add_library`, `add_executable`,
//! `add_target_options`, `delete_target_options`,
//! `register_generated_source`) that builds the DAG.

use crate::config::{BundleSection, MasonConfig, TargetOptionsSection};
use crate::options::{parse, BuildType, LinkType, OptionGroup, Processor};
use crate::target::{naming, Graph, Lang, LinkDriver, TargetId, TargetKind};
use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use walkdir::WalkDir;

/// Artifact version, `X.Y[.Z]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: Option<u32>,
}

impl Version {
    /// The three-component form embedded in shared library names.
    pub fn full(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch.unwrap_or(0))
    }
}

impl FromStr for Version {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('.');
        let major = parts
            .next()
            .and_then(|p| p.parse().ok())
            .with_context(|| format!("bad version '{s}': expected X.Y[.Z]"))?;
        let minor = parts
            .next()
            .and_then(|p| p.parse().ok())
            .with_context(|| format!("bad version '{s}': expected X.Y[.Z]"))?;
        let patch = match parts.next() {
            Some(p) => Some(
                p.parse()
                    .map_err(|_| anyhow::anyhow!("bad version '{s}': expected X.Y[.Z]"))?,
            ),
            None => None,
        };
        if parts.next().is_some() {
            bail!("bad version '{s}': expected X.Y[.Z]");
        }
        Ok(Version {
            major,
            minor,
            patch,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.patch {
            Some(p) => write!(f, "{}.{}.{}", self.major, self.minor, p),
            None => write!(f, "{}.{}", self.major, self.minor),
        }
    }
}

/// Per-invocation globals: roots, flavors, and the global option group.
#[derive(Debug, Clone)]
pub struct Globals {
    pub name: String,
    pub src_root: PathBuf,
    pub out_root: PathBuf,
    pub build_type: BuildType,
    pub link_type: LinkType,
    pub version: Option<Version>,
    pub group: OptionGroup,
}

pub struct Project {
    pub globals: Globals,
    pub graph: Graph,
    pub default_targets: Vec<String>,
    /// Declared lib names per artifact, wired once every declaration is
    /// in so libraries can reference each other in any order.
    pending_libs: Vec<(TargetId, Vec<String>)>,
}

impl Project {
    /// `set_globals`: pin roots, flavors and the global option group.
    pub fn set_globals(globals: Globals) -> Project {
        Project {
            globals,
            graph: Graph::new(),
            default_targets: Vec::new(),
            pending_libs: Vec::new(),
        }
    }

    /// `add_library`: one output target plus one object per listed file.
    pub fn add_library(
        &mut self,
        resolver: &SourceResolver,
        name: &str,
        files: &[String],
        libs: &[String],
        linker: LinkDriver,
    ) -> Result<TargetId> {
        let objects = self.add_objects(resolver, files)?;
        let version = self.globals.version.as_ref().map(|v| v.full());
        let out = naming::library(
            &self.globals.out_root,
            name,
            self.globals.build_type,
            self.globals.link_type,
            version.as_deref(),
        );
        let id = self.graph.add_library(
            out,
            name.to_string(),
            self.globals.link_type,
            objects,
            linker,
        )?;
        self.pending_libs.push((id, libs.to_vec()));
        Ok(id)
    }

    /// `add_executable`: one output target plus one object per listed file.
    pub fn add_executable(
        &mut self,
        resolver: &SourceResolver,
        name: &str,
        files: &[String],
        libs: &[String],
        linker: LinkDriver,
    ) -> Result<TargetId> {
        let objects = self.add_objects(resolver, files)?;
        let out = naming::executable(&self.globals.out_root, name, self.globals.build_type);
        let id = self
            .graph
            .add_executable(out, name.to_string(), objects, linker)?;
        self.pending_libs.push((id, libs.to_vec()));
        Ok(id)
    }

    /// Resolve every declared lib name into a graph edge. Part of the
    /// pre-build invariant check: unknown names fail here, before any
    /// subprocess.
    pub fn resolve_link_edges(&mut self) -> Result<()> {
        for (owner, names) in std::mem::take(&mut self.pending_libs) {
            for name in names {
                let lib = self.graph.by_name(&name).with_context(|| {
                    format!(
                        "'{}' links unknown library '{name}'",
                        self.graph.get(owner).name.as_deref().unwrap_or("?")
                    )
                })?;
                self.graph.add_lib_dep(owner, lib)?;
            }
        }
        Ok(())
    }

    /// `register_generated_source`: declare a rule producing a source
    /// file under the output root.
    pub fn register_generated_source(
        &mut self,
        output: &str,
        script: &str,
        interpreter: &str,
        inputs: &[String],
    ) -> Result<TargetId> {
        let out = self.globals.out_root.join(output);
        let script = self.globals.src_root.join(script);
        let inputs: Vec<PathBuf> = inputs
            .iter()
            .map(|i| self.globals.src_root.join(i))
            .collect();
        for p in std::iter::once(&script).chain(inputs.iter()) {
            if !p.exists() {
                bail!("generator input '{}' does not exist", p.display());
            }
        }
        self.graph
            .add_generated_source(out, script, interpreter.to_string(), inputs)
    }

    /// `add_target_options`: apply additions on top of the global group
    /// for one artifact and its member objects.
    pub fn add_target_options(
        &mut self,
        name: &str,
        proc: Processor,
        tokens: &[String],
    ) -> Result<()> {
        let ids = self.artifact_and_objects(name)?;
        let opts = parse(proc, tokens)?;
        for id in ids {
            let globals = &self.globals.group;
            let target = self.graph.get_mut(id);
            let group = target.local_opts.get_or_insert_with(|| globals.clone());
            for opt in &opts {
                group.get_mut(proc).add(opt.clone(), true)?;
            }
        }
        Ok(())
    }

    /// `delete_target_options`: remove items from one artifact's
    /// effective group.
    pub fn delete_target_options(
        &mut self,
        name: &str,
        proc: Processor,
        tokens: &[String],
    ) -> Result<()> {
        let ids = self.artifact_and_objects(name)?;
        let opts = parse(proc, tokens)?;
        for id in ids {
            let globals = &self.globals.group;
            let target = self.graph.get_mut(id);
            let group = target.local_opts.get_or_insert_with(|| globals.clone());
            for opt in &opts {
                group.get_mut(proc).remove(opt);
            }
        }
        Ok(())
    }

    fn artifact_and_objects(&self, name: &str) -> Result<Vec<TargetId>> {
        let id = self
            .graph
            .by_name(name)
            .with_context(|| format!("target options name an unknown target '{name}'"))?;
        let mut ids = vec![id];
        match &self.graph.get(id).kind {
            TargetKind::StaticLibrary { objects, .. }
            | TargetKind::SharedLibrary { objects, .. }
            | TargetKind::Executable { objects, .. } => ids.extend(objects.iter().copied()),
            _ => {}
        }
        Ok(ids)
    }

    fn add_objects(
        &mut self,
        resolver: &SourceResolver,
        files: &[String],
    ) -> Result<Vec<TargetId>> {
        let mut objects = Vec::with_capacity(files.len());
        for file in files {
            let path = resolver.resolve(file)?;
            let lang = Lang::of(&path)
                .with_context(|| format!("'{}' is not a compilable source", path.display()))?;
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .with_context(|| format!("'{}' has no usable stem", path.display()))?
                .to_string();
            let src_id = match self.graph.by_path(&path) {
                // Generated sources are already in the graph.
                Some(id) => id,
                None => self.graph.add_source(path.clone()),
            };
            let out = naming::object(&self.globals.out_root, &stem, self.globals.build_type);
            objects.push(self.graph.add_object(out, src_id, lang)?);
        }
        Ok(objects)
    }

}

/// Finds declared source files under a bundle's include roots.
pub struct SourceResolver {
    /// file name -> paths seen under the include roots.
    index: HashMap<String, Vec<PathBuf>>,
    /// Generated outputs resolvable by file name.
    generated: HashMap<String, PathBuf>,
}

const SOURCE_EXTS: &[&str] = &["c", "C", "cc", "cpp", "cxx", "s", "S"];

impl SourceResolver {
    pub fn scan(src_root: &Path, bundle: &BundleSection) -> Result<SourceResolver> {
        let excludes: Vec<PathBuf> = bundle.exclude.iter().map(|e| src_root.join(e)).collect();
        let mut index: HashMap<String, Vec<PathBuf>> = HashMap::new();

        let roots = if bundle.include.is_empty() {
            vec![src_root.to_path_buf()]
        } else {
            bundle.include.iter().map(|i| src_root.join(i)).collect()
        };
        for root in roots {
            if !root.is_dir() {
                bail!("include root '{}' is not a directory", root.display());
            }
            for entry in WalkDir::new(&root).into_iter().filter_map(|e| e.ok()) {
                let path = entry.path();
                if excludes.iter().any(|ex| path.starts_with(ex)) {
                    continue;
                }
                let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                    continue;
                };
                if !SOURCE_EXTS.contains(&ext) {
                    continue;
                }
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    index
                        .entry(name.to_string())
                        .or_default()
                        .push(path.to_path_buf());
                }
            }
        }
        Ok(SourceResolver {
            index,
            generated: HashMap::new(),
        })
    }

    pub fn add_generated(&mut self, name: &str, path: PathBuf) {
        self.generated.insert(name.to_string(), path);
    }

    /// Resolve a declared file (stem or full name) to a unique path.
    /// Generated outputs win over on-disk files of the same name.
    pub fn resolve(&self, declared: &str) -> Result<PathBuf> {
        if let Some(path) = self.generated.get(declared) {
            return Ok(path.clone());
        }
        let mut hits: Vec<&PathBuf> = Vec::new();
        if declared.contains('.') {
            if let Some(paths) = self.index.get(declared) {
                hits.extend(paths);
            }
        } else {
            for ext in SOURCE_EXTS {
                if let Some(path) = self.generated.get(&format!("{declared}.{ext}")) {
                    return Ok(path.clone());
                }
                if let Some(paths) = self.index.get(&format!("{declared}.{ext}")) {
                    hits.extend(paths);
                }
            }
        }
        match hits.len() {
            0 => bail!("no source file found for '{declared}'"),
            1 => Ok(hits[0].clone()),
            _ => bail!(
                "'{declared}' is ambiguous: {}",
                hits.iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

/// Evaluate a parsed config into a populated project.
pub fn evaluate(config: &MasonConfig, globals: Globals) -> Result<Project> {
    let mut globals = globals;
    let opt = &config.options;
    for (proc, tokens) in [
        (Processor::Cpp, &opt.cpp),
        (Processor::Cc, &opt.cc),
        (Processor::Cxx, &opt.cxx),
        (Processor::As, &opt.asm),
        (Processor::LdCcLib, &opt.link_cc_lib),
        (Processor::LdCxxLib, &opt.link_cxx_lib),
        (Processor::LdCcExec, &opt.link_cc_exe),
        (Processor::LdCxxExec, &opt.link_cxx_exe),
    ] {
        globals
            .group
            .get_mut(proc)
            .add_tokens(tokens, false)
            .with_context(|| format!("in global [options] for {proc}"))?;
    }

    let mut project = Project::set_globals(globals);
    project.default_targets = config.project.default_targets.clone();

    for bundle in &config.bundles {
        let mut resolver = SourceResolver::scan(&project.globals.src_root, bundle)?;

        for gen in &bundle.generated {
            let id = project.register_generated_source(
                &gen.output,
                &gen.script,
                &gen.interpreter,
                &gen.inputs,
            )?;
            resolver.add_generated(&gen.output, project.graph.get(id).path.clone());
        }
        for lib in &bundle.libraries {
            let linker = parse_linker(&lib.linker)?;
            project.add_library(&resolver, &lib.name, &lib.files, &lib.libs, linker)?;
        }
        for exe in &bundle.executables {
            let linker = parse_linker(&exe.linker)?;
            project.add_executable(&resolver, &exe.name, &exe.files, &exe.libs, linker)?;
        }
    }
    project.resolve_link_edges()?;

    for (name, adjust) in &config.target_options {
        apply_target_options(&mut project, name, adjust)?;
    }

    Ok(project)
}

fn apply_target_options(
    project: &mut Project,
    name: &str,
    adjust: &TargetOptionsSection,
) -> Result<()> {
    let link_proc = |project: &Project| -> Result<Processor> {
        let id = project
            .graph
            .by_name(name)
            .with_context(|| format!("target options name an unknown target '{name}'"))?;
        let t = project.graph.get(id);
        Ok(match (t.kind.is_library(), t.linker) {
            (true, Some(LinkDriver::Cc)) => Processor::LdCcLib,
            (true, _) => Processor::LdCxxLib,
            (false, Some(LinkDriver::Cc)) => Processor::LdCcExec,
            (false, _) => Processor::LdCxxExec,
        })
    };

    for (proc, tokens) in [
        (Processor::Cpp, &adjust.add_cpp),
        (Processor::Cc, &adjust.add_cc),
        (Processor::Cxx, &adjust.add_cxx),
        (Processor::As, &adjust.add_asm),
    ] {
        if !tokens.is_empty() {
            project.add_target_options(name, proc, tokens)?;
        }
    }
    if !adjust.add_link.is_empty() {
        let proc = link_proc(project)?;
        project.add_target_options(name, proc, &adjust.add_link)?;
    }
    for (proc, tokens) in [
        (Processor::Cpp, &adjust.del_cpp),
        (Processor::Cc, &adjust.del_cc),
        (Processor::Cxx, &adjust.del_cxx),
        (Processor::As, &adjust.del_asm),
    ] {
        if !tokens.is_empty() {
            project.delete_target_options(name, proc, tokens)?;
        }
    }
    Ok(())
}

pub fn parse_linker(s: &str) -> Result<LinkDriver> {
    match s {
        "cc" => Ok(LinkDriver::Cc),
        "cxx" => Ok(LinkDriver::Cxx),
        other => bail!("unknown linker '{other}' (expected 'cc' or 'cxx')"),
    }
}

/// The effective option group for a target: its local override, or the
/// globals.
pub fn effective_group<'a>(globals: &'a Globals, graph: &'a Graph, id: TargetId) -> &'a OptionGroup {
    graph
        .get(id)
        .local_opts
        .as_ref()
        .unwrap_or(&globals.group)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("mason_project_test").join(name);
        if dir.exists() {
            fs::remove_dir_all(&dir).ok();
        }
        fs::create_dir_all(dir.join("src")).unwrap();
        dir
    }

    fn hello_globals(root: &Path) -> Globals {
        Globals {
            name: "hello".into(),
            src_root: root.to_path_buf(),
            out_root: root.join("build"),
            build_type: BuildType::Debug,
            link_type: LinkType::Dynamic,
            version: None,
            group: OptionGroup::new(BuildType::Debug, LinkType::Dynamic),
        }
    }

    fn write_hello(root: &Path) {
        fs::write(root.join("src/planet.c"), "int planet;\n").unwrap();
        fs::write(root.join("src/main.C"), "int main(){}\n").unwrap();
    }

    const HELLO_TOML: &str = r#"
[project]
name = "hello"
default-targets = ["hello"]

[[bundle]]
include = ["src"]

[[bundle.library]]
name = "Planet"
files = ["planet"]
linker = "cc"

[[bundle.executable]]
name = "hello"
files = ["main"]
libs = ["Planet"]
linker = "cxx"
"#;

    #[test]
    fn hello_world_graph_shape() {
        let root = scratch("hello_shape");
        write_hello(&root);
        let cfg: MasonConfig = toml::from_str(HELLO_TOML).unwrap();
        let project = evaluate(&cfg, hello_globals(&root)).unwrap();
        let g = &project.graph;

        // Two sources, two objects, one shared library, one executable.
        let mut objects = 0;
        let mut libs = 0;
        let mut exes = 0;
        for t in g.iter() {
            match t.kind {
                TargetKind::Object { .. } => objects += 1,
                TargetKind::SharedLibrary { .. } => libs += 1,
                TargetKind::Executable { .. } => exes += 1,
                _ => {}
            }
        }
        assert_eq!((objects, libs, exes), (2, 1, 1));

        let exe = g.by_name("hello").unwrap();
        let lib = g.by_name("Planet").unwrap();
        assert!(g.get(exe).deps.contains(&lib));
        assert_eq!(
            g.get(lib).path,
            root.join("build").join("libPlanet_dyn_debug.so")
        );
    }

    #[test]
    fn object_language_follows_extension() {
        let root = scratch("lang");
        write_hello(&root);
        let cfg: MasonConfig = toml::from_str(HELLO_TOML).unwrap();
        let project = evaluate(&cfg, hello_globals(&root)).unwrap();
        let g = &project.graph;
        let lang_of = |name: &str| {
            g.iter()
                .find_map(|t| match t.kind {
                    TargetKind::Object { source, lang }
                        if g.get(source).path.file_name().unwrap() == name =>
                    {
                        Some(lang)
                    }
                    _ => None,
                })
                .unwrap()
        };
        assert_eq!(lang_of("planet.c"), Lang::C);
        assert_eq!(lang_of("main.C"), Lang::Cxx);
    }

    #[test]
    fn excluded_roots_hide_sources() {
        let root = scratch("exclude");
        write_hello(&root);
        fs::create_dir_all(root.join("src/attic")).unwrap();
        fs::write(root.join("src/attic/planet.c"), "int dup;\n").unwrap();
        let cfg: MasonConfig = toml::from_str(
            r#"
[project]
name = "x"

[[bundle]]
include = ["src"]
exclude = ["src/attic"]

[[bundle.library]]
name = "Planet"
files = ["planet"]
"#,
        )
        .unwrap();
        // Without the exclude this would be ambiguous.
        let project = evaluate(&cfg, hello_globals(&root)).unwrap();
        assert!(project.graph.by_name("Planet").is_some());
    }

    #[test]
    fn ambiguous_stem_is_rejected() {
        let root = scratch("ambiguous");
        write_hello(&root);
        fs::create_dir_all(root.join("src/other")).unwrap();
        fs::write(root.join("src/other/planet.c"), "int dup;\n").unwrap();
        let cfg: MasonConfig = toml::from_str(
            r#"
[project]
name = "x"

[[bundle]]
include = ["src"]

[[bundle.library]]
name = "Planet"
files = ["planet"]
"#,
        )
        .unwrap();
        assert!(evaluate(&cfg, hello_globals(&root)).is_err());
    }

    #[test]
    fn unknown_library_reference_fails() {
        let root = scratch("unknown_lib");
        write_hello(&root);
        let cfg: MasonConfig = toml::from_str(
            r#"
[project]
name = "x"

[[bundle]]
include = ["src"]

[[bundle.executable]]
name = "hello"
files = ["main"]
libs = ["Nope"]
linker = "cxx"
"#,
        )
        .unwrap();
        assert!(evaluate(&cfg, hello_globals(&root)).is_err());
    }

    #[test]
    fn target_options_override_globals() {
        let root = scratch("topts");
        write_hello(&root);
        let mut cfg: MasonConfig = toml::from_str(HELLO_TOML).unwrap();
        cfg.options.cc = vec!["-Wall".into()];
        cfg.target_options.insert(
            "Planet".into(),
            TargetOptionsSection {
                add_cc: vec!["-Wshadow".into()],
                del_cc: vec!["-Wall".into()],
                ..Default::default()
            },
        );
        let project = evaluate(&cfg, hello_globals(&root)).unwrap();
        let g = &project.graph;
        let lib = g.by_name("Planet").unwrap();
        let group = effective_group(&project.globals, g, lib);
        assert_eq!(group.get(Processor::Cc).argv(), vec!["-Wshadow"]);
        // The executable keeps the untouched globals.
        let exe = g.by_name("hello").unwrap();
        let group = effective_group(&project.globals, g, exe);
        assert_eq!(group.get(Processor::Cc).argv(), vec!["-Wall"]);
    }

    #[test]
    fn version_parsing() {
        let v: Version = "1.2".parse().unwrap();
        assert_eq!(v.full(), "1.2.0");
        let v: Version = "1.2.3".parse().unwrap();
        assert_eq!(v.full(), "1.2.3");
        assert!("1".parse::<Version>().is_err());
        assert!("1.2.3.4".parse::<Version>().is_err());
        assert!("a.b".parse::<Version>().is_err());
    }
}
