//! Rendering targets into tool invocations.
//!
//! Every command is a fully qualified argv; no shell ever interpolates
//! user strings. Token order is fixed: options in declared set order,
//! objects in declared list order, dependency libraries in link order.

use crate::options::Processor;
use crate::project::{effective_group, Globals};
use crate::target::{Graph, Lang, LinkDriver, TargetId, TargetKind};
use crate::toolchain::Toolchain;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Compile,
    Archive,
    Link,
    Generate,
}

/// One ready-to-spawn tool invocation.
#[derive(Debug, Clone)]
pub struct BuildCommand {
    pub target: TargetId,
    pub kind: CommandKind,
    /// The file this command produces.
    pub out_path: std::path::PathBuf,
    /// Program followed by its arguments.
    pub argv: Vec<String>,
    /// Short human-readable label for progress output.
    pub desc: String,
}

impl BuildCommand {
    pub fn program(&self) -> &str {
        &self.argv[0]
    }
}

fn path_str(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

/// Expand a declared lib list into link-line inputs: each library in
/// declared order, followed by the transitive closure of the static
/// archives it depends on (archives carry no link edges themselves).
fn link_inputs(graph: &Graph, libs: &[TargetId]) -> Vec<String> {
    fn visit(graph: &Graph, id: TargetId, seen: &mut Vec<TargetId>, out: &mut Vec<String>) {
        if seen.contains(&id) {
            return;
        }
        seen.push(id);
        out.push(path_str(&graph.get(id).path));
        if let TargetKind::StaticLibrary { libs, .. } = &graph.get(id).kind {
            for &l in libs {
                visit(graph, l, seen, out);
            }
        }
    }
    let mut seen = Vec::new();
    let mut out = Vec::new();
    for &l in libs {
        visit(graph, l, &mut seen, &mut out);
    }
    out
}

fn file_name(p: &Path) -> String {
    p.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path_str(p))
}

/// Build the command for one target; sources have none.
pub fn command_for(
    globals: &Globals,
    graph: &Graph,
    toolchain: &Toolchain,
    id: TargetId,
) -> Option<BuildCommand> {
    let target = graph.get(id);
    let group = effective_group(globals, graph, id);

    match &target.kind {
        TargetKind::Source => None,

        TargetKind::GeneratedSource {
            script,
            interpreter,
            inputs,
        } => {
            // Contract with generator scripts: argv is the script, its
            // inputs, then the output path to produce.
            let mut argv = vec![interpreter.clone(), path_str(script)];
            argv.extend(inputs.iter().map(|p| path_str(p)));
            argv.push(path_str(&target.path));
            Some(BuildCommand {
                target: id,
                kind: CommandKind::Generate,
                out_path: target.path.clone(),
                argv,
                desc: format!("generate {}", file_name(&target.path)),
            })
        }

        TargetKind::Object { source, lang } => {
            let src = &graph.get(*source).path;
            let driver = toolchain.driver(*lang == Lang::Cxx);
            let mut argv = vec![
                path_str(driver),
                "-c".to_string(),
                path_str(src),
                "-o".to_string(),
                path_str(&target.path),
            ];
            match lang {
                Lang::C => {
                    argv.extend(group.get(Processor::Cpp).argv());
                    argv.extend(group.get(Processor::Cc).argv());
                }
                Lang::Cxx => {
                    argv.extend(group.get(Processor::Cpp).argv());
                    argv.extend(group.get(Processor::Cxx).argv());
                }
                Lang::Asm => {
                    // Uppercase .S wants the preprocessor; plain .s does not.
                    if src.extension().is_some_and(|e| e == "S") {
                        argv.extend(group.get(Processor::Cpp).argv());
                    }
                    argv.extend(group.get(Processor::As).argv());
                }
            }
            Some(BuildCommand {
                target: id,
                kind: CommandKind::Compile,
                out_path: target.path.clone(),
                argv,
                desc: format!("compile {}", file_name(src)),
            })
        }

        TargetKind::StaticLibrary { objects, .. } => {
            let mut argv = vec![
                path_str(&toolchain.ar_path),
                "rcs".to_string(),
                path_str(&target.path),
            ];
            argv.extend(objects.iter().map(|&o| path_str(&graph.get(o).path)));
            Some(BuildCommand {
                target: id,
                kind: CommandKind::Archive,
                out_path: target.path.clone(),
                argv,
                desc: format!("archive {}", file_name(&target.path)),
            })
        }

        TargetKind::SharedLibrary { objects, libs } => {
            let proc = match target.linker {
                Some(LinkDriver::Cxx) => Processor::LdCxxLib,
                _ => Processor::LdCcLib,
            };
            let driver = toolchain.driver(target.linker == Some(LinkDriver::Cxx));
            let set = group.get(proc);
            let mut argv = vec![path_str(driver)];
            if !set.iter().any(|o| o.name == "-shared") {
                argv.push("-shared".to_string());
            }
            argv.extend(set.argv_pre());
            argv.push("-o".to_string());
            argv.push(path_str(&target.path));
            argv.extend(objects.iter().map(|&o| path_str(&graph.get(o).path)));
            argv.extend(link_inputs(graph, libs));
            argv.extend(set.argv_post());
            Some(BuildCommand {
                target: id,
                kind: CommandKind::Link,
                out_path: target.path.clone(),
                argv,
                desc: format!("link {}", file_name(&target.path)),
            })
        }

        TargetKind::Executable { objects, libs } => {
            let proc = match target.linker {
                Some(LinkDriver::Cxx) => Processor::LdCxxExec,
                _ => Processor::LdCcExec,
            };
            let driver = toolchain.driver(target.linker == Some(LinkDriver::Cxx));
            let set = group.get(proc);
            let mut argv = vec![path_str(driver)];
            argv.extend(set.argv_pre());
            argv.push("-o".to_string());
            argv.push(path_str(&target.path));
            argv.extend(objects.iter().map(|&o| path_str(&graph.get(o).path)));
            argv.extend(link_inputs(graph, libs));
            argv.extend(set.argv_post());
            Some(BuildCommand {
                target: id,
                kind: CommandKind::Link,
                out_path: target.path.clone(),
                argv,
                desc: format!("link {}", file_name(&target.path)),
            })
        }
    }
}
