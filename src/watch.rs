//! Rebuild on source changes.

use crate::driver::{self, BuildRequest};
use anyhow::Result;
use colored::Colorize;
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::time::Duration;

pub fn watch(req: &BuildRequest) -> Result<()> {
    let src_root = req
        .src_root
        .clone()
        .or_else(|| req.project_file.parent().map(PathBuf::from))
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from("."));
    let out_root = req
        .out_root
        .clone()
        .unwrap_or_else(|| src_root.join("build"));

    println!(
        "{} Watching for changes in {}...",
        "👀".cyan(),
        src_root.display()
    );
    let (tx, rx) = channel();
    let config = Config::default().with_poll_interval(Duration::from_secs(1));
    let mut watcher = RecommendedWatcher::new(tx, config)?;
    watcher.watch(&src_root, RecursiveMode::Recursive)?;

    run_once(req);

    while let Ok(event) = rx.recv() {
        let mut relevant = touches_sources(&event, &out_root);
        // Debounce: drain the burst a save typically produces.
        std::thread::sleep(Duration::from_millis(100));
        while let Ok(event) = rx.try_recv() {
            relevant |= touches_sources(&event, &out_root);
        }
        if relevant {
            println!("{} Change detected. Rebuilding...", "🔄".yellow());
            run_once(req);
        }
    }
    Ok(())
}

/// Our own outputs land under the output root; changes there must not
/// retrigger the build.
fn touches_sources(event: &notify::Result<notify::Event>, out_root: &Path) -> bool {
    match event {
        Ok(event) => event.paths.iter().any(|p| !p.starts_with(out_root)),
        Err(_) => false,
    }
}

fn run_once(req: &BuildRequest) {
    if let Err(e) = driver::build(req) {
        println!("{} {e:#}", "x".red());
    }
}
