//! The build driver: probe, evaluate, discover, decide, schedule,
//! persist.
//!
//! Everything up to the scheduler hand-off runs on the main thread and
//! aborts before any build command is spawned; cache writes happen only
//! after the scheduler has drained.

use crate::cmd;
use crate::config;
use crate::discover;
use crate::options::{BuildType, LinkType, Opt, OptionGroup, Processor};
use crate::project::{self, Globals, Project, Version};
use crate::scheduler::{self, Event, Plan, PlanNode};
use crate::stale::{self, StaleReason};
use crate::store::{GlobalHeader, Store};
use crate::target::{Graph, TargetId};
use crate::toolchain;
use crate::ui;
use anyhow::{bail, Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::time::Instant;

pub struct BuildRequest {
    pub project_file: PathBuf,
    pub src_root: Option<PathBuf>,
    pub out_root: Option<PathBuf>,
    pub cc: Option<PathBuf>,
    pub cxx: Option<PathBuf>,
    pub jobs: Option<usize>,
    pub build_type: BuildType,
    pub link_type: LinkType,
    pub version: Option<String>,
    pub targets: Vec<String>,
    pub no_cache: bool,
    pub verbose: bool,
}

pub fn build(req: &BuildRequest) -> Result<()> {
    let start_time = Instant::now();

    let toolchain = toolchain::get_or_detect_toolchain(
        req.cc.as_deref(),
        req.cxx.as_deref(),
        req.no_cache,
    )?;
    if req.verbose {
        println!(
            "{} toolchain: {} ({})",
            "·".dimmed(),
            toolchain.cc_path.display(),
            toolchain.version
        );
    }

    let config = config::load_config(&req.project_file)?;
    let project = evaluate_project(req, &config)?;
    let graph = &project.graph;

    let goals = select_goals(req, &project)?;
    let closure = graph.closure(&goals);

    let store_path = Store::file_path(
        &project.globals.out_root,
        req.link_type,
        req.build_type,
    );
    let mut store = if req.no_cache {
        Store::empty(store_path)
    } else {
        Store::open(store_path)
    };
    let header = GlobalHeader::new(&project.globals, &toolchain);
    if store.validate_globals(&header) && req.verbose {
        println!("{} cache invalidated: globals changed", "·".dimmed());
    }

    let mut graph = project.graph;
    let outcome = discover::discover_all(&project.globals, &mut graph, &toolchain, &store)?;
    if req.verbose {
        println!(
            "{} discovery: {} run, {} cached",
            "·".dimmed(),
            outcome.ran,
            outcome.reused
        );
    }
    if !outcome.failures.is_empty() {
        for (id, msg) in &outcome.failures {
            println!(
                "{} dependency discovery failed for '{}': {msg}",
                "x".red(),
                graph.get(*id).path.display()
            );
        }
        let blocked: Vec<TargetId> = outcome
            .failures
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| closure.contains(id))
            .collect();
        if !blocked.is_empty() {
            bail!("{} target(s) are unbuildable", blocked.len());
        }
    }

    let stale = stale::analyze(&project.globals, &graph, &toolchain, &store);
    let stale: BTreeMap<TargetId, StaleReason> = stale
        .into_iter()
        .filter(|(id, _)| closure.contains(id))
        .collect();
    if req.verbose {
        for (id, reason) in &stale {
            println!(
                "{} stale: {} ({reason})",
                "·".dimmed(),
                graph.get(*id).path.display()
            );
        }
    }

    if stale.is_empty() {
        store.persist()?;
        println!("{} Up to date", "⚡".green());
        return Ok(());
    }

    std::fs::create_dir_all(&project.globals.out_root).with_context(|| {
        format!(
            "failed to create output root {}",
            project.globals.out_root.display()
        )
    })?;

    let plan = make_plan(&project.globals, &graph, &toolchain, &stale)?;
    let jobs = req.jobs.unwrap_or(toolchain.cores).max(1);

    let pb = ProgressBar::new(plan.nodes.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );

    let remaining = AtomicUsize::new(plan.nodes.len());
    let outcome = scheduler::run(&plan, jobs, &remaining, |event| match event {
        Event::Started(command) => {
            pb.set_message(command.desc.clone());
            if req.verbose {
                pb.println(format!("{} {}", "·".dimmed(), command.argv.join(" ")));
            }
        }
        Event::Finished(command, warnings) => {
            if let Some(warnings) = warnings {
                pb.println(format!(
                    "{} warnings from {}:\n{warnings}",
                    "!".yellow(),
                    command.desc
                ));
            }
            pb.inc(1);
        }
    });
    pb.finish_and_clear();

    for &id in &outcome.rebuilt {
        graph.get_mut(id).rebuilt = true;
        if let Some(record) = stale::expected_record(&project.globals, &graph, &toolchain, id) {
            store.put(record);
        }
    }
    store.persist()?;

    if let Some(failure) = outcome.failure {
        println!("{} {failure}", "x".red());
        if !failure.stderr.trim().is_empty() {
            eprintln!("{}", failure.stderr.trim_end());
        }
        bail!("build failed");
    }

    let stats = outcome.stats;
    let up_to_date = closure
        .iter()
        .filter(|&&id| graph.get(id).kind.has_command() && !stale.contains_key(&id))
        .count();
    let mut table = ui::Table::new(&["Step", "Count"]);
    table.add_row(vec!["Compiled".into(), stats.compiled.to_string()]);
    table.add_row(vec!["Archived".into(), stats.archived.to_string()]);
    table.add_row(vec!["Linked".into(), stats.linked.to_string()]);
    table.add_row(vec!["Generated".into(), stats.generated.to_string()]);
    table.add_row(vec!["Up to date".into(), up_to_date.to_string()]);
    table.print();
    println!(
        "{} Build finished in {:.2?}",
        "✓".green(),
        start_time.elapsed()
    );
    Ok(())
}

/// Assemble globals and evaluate the project description.
fn evaluate_project(req: &BuildRequest, config: &config::MasonConfig) -> Result<Project> {
    let project_dir = req
        .project_file
        .parent()
        .map(PathBuf::from)
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from("."));
    let src_root = req
        .src_root
        .clone()
        .unwrap_or(project_dir)
        .canonicalize()
        .context("source root does not exist")?;
    let out_root = req
        .out_root
        .clone()
        .unwrap_or_else(|| src_root.join("build"));
    std::fs::create_dir_all(&out_root)
        .with_context(|| format!("failed to create output root {}", out_root.display()))?;
    let out_root = out_root.canonicalize()?;

    let version = match req.version.as_deref().or(config.project.version.as_deref()) {
        Some(v) => Some(v.parse::<Version>()?),
        None => None,
    };

    let mut group = OptionGroup::new(req.build_type, req.link_type);
    if req.link_type == LinkType::Dynamic {
        // Objects destined for shared libraries are compiled relocatable.
        for proc in [Processor::Cc, Processor::Cxx] {
            group.get_mut(proc).add(Opt::feature("PIC"), true)?;
        }
    }

    let globals = Globals {
        name: config.project.name.clone(),
        src_root,
        out_root,
        build_type: req.build_type,
        link_type: req.link_type,
        version,
        group,
    };
    let project = project::evaluate(config, globals)?;

    // Pre-build invariants: something to build, and a coherent graph.
    if project.graph.is_empty() {
        bail!("project declares no targets");
    }
    Ok(project)
}

/// Resolve the requested target names (or the project defaults) to ids.
fn select_goals(req: &BuildRequest, project: &Project) -> Result<Vec<TargetId>> {
    let names: Vec<String> = if !req.targets.is_empty() {
        req.targets.clone()
    } else if !project.default_targets.is_empty() {
        project.default_targets.clone()
    } else {
        project
            .graph
            .iter()
            .filter_map(|t| t.name.clone())
            .collect()
    };
    if names.is_empty() {
        bail!("nothing to build: no targets requested and no defaults declared");
    }
    names
        .iter()
        .map(|n| {
            project
                .graph
                .by_name(n)
                .with_context(|| format!("unknown target '{n}'"))
        })
        .collect()
}

/// Project the stale set into a schedulable plan: one node per stale
/// target, edges restricted to stale-to-stale dependencies.
fn make_plan(
    globals: &Globals,
    graph: &Graph,
    toolchain: &toolchain::Toolchain,
    stale: &BTreeMap<TargetId, StaleReason>,
) -> Result<Plan> {
    let ids: Vec<TargetId> = stale.keys().copied().collect();
    let index_of: BTreeMap<TargetId, usize> =
        ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();

    let mut nodes = Vec::with_capacity(ids.len());
    for &id in &ids {
        let command = cmd::command_for(globals, graph, toolchain, id)
            .with_context(|| format!("target '{}' has no command", graph.get(id).path.display()))?;
        let preds = graph
            .get(id)
            .deps
            .iter()
            .filter(|d| index_of.contains_key(d))
            .count();
        nodes.push(PlanNode {
            command,
            succs: Vec::new(),
            preds,
        });
    }
    for (&id, &i) in &index_of {
        for dep in &graph.get(id).deps {
            if let Some(&d) = index_of.get(dep) {
                nodes[d].succs.push(i);
            }
        }
    }
    Ok(Plan { nodes })
}

/// Print the persisted cache for one flavor pair.
pub fn dump_cache(out_root: &PathBuf, link_type: LinkType, build_type: BuildType) -> Result<()> {
    let path = Store::file_path(out_root, link_type, build_type);
    let store = Store::open(path.clone());
    println!("{} cache {}", "·".dimmed(), path.display());
    match store.globals() {
        Some(g) => {
            println!("  src_root: {}", g.src_root.display());
            println!("  obj_root: {}", g.obj_root.display());
            println!("  cc_path:  {}", g.cc_path.display());
            println!("  cxx_path: {}", g.cxx_path.display());
        }
        None => println!("  (no global header)"),
    }
    let mut table = ui::Table::new(&["Target", "Deps", "Tool"]);
    for (key, record) in store.iter() {
        table.add_row(vec![
            key.clone(),
            record.deps.len().to_string(),
            record.tool.display().to_string(),
        ]);
    }
    table.print();
    Ok(())
}
