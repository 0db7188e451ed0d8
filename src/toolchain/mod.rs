//! Host probe: compiler drivers, system include path, core count.
//!
//! The probe runs external commands, so its result is cached under
//! `~/.mason/toolchain.toml` and revalidated on load. Everything after
//! the probe treats [`Toolchain`] as plain data.

pub mod types;

pub use types::Toolchain;

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Probe the host, honoring explicit driver paths when given.
pub fn detect_toolchain(cc: Option<&Path>, cxx: Option<&Path>) -> Result<Toolchain> {
    let cc_path = match cc {
        Some(p) => p.to_path_buf(),
        None => find_driver(&["cc", "gcc", "clang"], "CC")?,
    };
    let cxx_path = match cxx {
        Some(p) => p.to_path_buf(),
        None => find_driver(&["c++", "g++", "clang++"], "CXX")?,
    };
    let ar_path = find_driver(&["ar"], "AR")?;
    for p in [&cc_path, &cxx_path, &ar_path] {
        if !p.exists() {
            bail!("tool '{}' does not exist", p.display());
        }
    }

    let version = Command::new(&cc_path)
        .arg("--version")
        .output()
        .with_context(|| format!("failed to run '{}' --version", cc_path.display()))
        .map(|o| {
            String::from_utf8_lossy(&o.stdout)
                .lines()
                .next()
                .unwrap_or("unknown")
                .to_string()
        })?;

    let system_includes = probe_system_includes(&cc_path)?;
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let endianness = if cfg!(target_endian = "big") {
        "big".to_string()
    } else {
        "little".to_string()
    };

    Ok(Toolchain {
        cc_path,
        cxx_path,
        ar_path,
        version,
        system_includes,
        endianness,
        cores,
    })
}

/// Probe once per path pair, reusing the cached result when its tool
/// paths still exist.
pub fn get_or_detect_toolchain(
    cc: Option<&Path>,
    cxx: Option<&Path>,
    force_detect: bool,
) -> Result<Toolchain> {
    let cache_path = toolchain_cache_path();
    if !force_detect {
        if let Some(cached) = load_cached_toolchain(cc, cxx, &cache_path) {
            return Ok(cached);
        }
    }
    let toolchain = detect_toolchain(cc, cxx)?;
    cache_toolchain(&cache_path, &toolchain);
    Ok(toolchain)
}

fn find_driver(candidates: &[&str], env_var: &str) -> Result<PathBuf> {
    if let Ok(env) = std::env::var(env_var) {
        if !env.is_empty() {
            return resolve_on_path(&env)
                .with_context(|| format!("${env_var}='{env}' does not resolve to a tool"));
        }
    }
    for cmd in candidates {
        if let Ok(path) = resolve_on_path(cmd) {
            return Ok(path);
        }
    }
    bail!(
        "no {} found (tried {})",
        env_var.to_lowercase(),
        candidates.join(", ")
    );
}

fn resolve_on_path(cmd: &str) -> Result<PathBuf> {
    if cmd.contains('/') {
        let p = PathBuf::from(cmd);
        if p.exists() {
            return Ok(p);
        }
        bail!("'{cmd}' does not exist");
    }
    let output = Command::new("which").arg(cmd).output()?;
    if !output.status.success() {
        bail!("'{cmd}' not found on PATH");
    }
    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if path.is_empty() {
        bail!("'{cmd}' not found on PATH");
    }
    Ok(PathBuf::from(path))
}

/// Run the driver in verbose preprocess mode and lift the
/// `#include <...>` search list from its stderr.
fn probe_system_includes(cc: &Path) -> Result<Vec<PathBuf>> {
    let output = Command::new(cc)
        .args(["-E", "-x", "c", "-v", "/dev/null"])
        .output()
        .with_context(|| format!("failed to run '{}' -E -v", cc.display()))?;
    let stderr = String::from_utf8_lossy(&output.stderr);
    let dirs = parse_include_search_list(&stderr);
    if dirs.is_empty() {
        bail!(
            "could not parse the include search list from '{}' -E -v output",
            cc.display()
        );
    }
    Ok(dirs)
}

fn parse_include_search_list(stderr: &str) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    let mut in_list = false;
    for line in stderr.lines() {
        if line.starts_with("#include <...> search starts here:") {
            in_list = true;
            continue;
        }
        if line.starts_with("End of search list.") {
            break;
        }
        if in_list {
            let dir = line.trim();
            // Apple drivers tag framework directories; strip the note.
            let dir = dir.strip_suffix(" (framework directory)").unwrap_or(dir);
            if !dir.is_empty() {
                dirs.push(PathBuf::from(dir));
            }
        }
    }
    dirs
}

fn load_cached_toolchain(
    cc: Option<&Path>,
    cxx: Option<&Path>,
    cache_path: &Path,
) -> Option<Toolchain> {
    if !cache_path.exists() {
        return None;
    }
    let contents = std::fs::read_to_string(cache_path).ok()?;
    let cached: Toolchain = toml::from_str(&contents).ok()?;
    let matches_request = cc.map_or(true, |p| cached.cc_path == p)
        && cxx.map_or(true, |p| cached.cxx_path == p);
    if matches_request && cached.cc_path.exists() && cached.cxx_path.exists() {
        Some(cached)
    } else {
        None
    }
}

fn cache_toolchain(cache_path: &Path, toolchain: &Toolchain) {
    if let Ok(toml_str) = toml::to_string_pretty(toolchain) {
        if let Some(parent) = cache_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = std::fs::write(cache_path, toml_str);
    }
}

fn toolchain_cache_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mason")
        .join("toolchain.toml")
}
