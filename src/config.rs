//! `mason.toml` project description.
//!
//! The file is deserialized as-is; evaluation into a target graph happens
//! in [`crate::project`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct MasonConfig {
    pub project: ProjectSection,
    #[serde(default)]
    pub options: OptionsSection,
    #[serde(default, rename = "bundle")]
    pub bundles: Vec<BundleSection>,
    #[serde(default)]
    pub target_options: BTreeMap<String, TargetOptionsSection>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ProjectSection {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    /// Targets built when none are named on the command line.
    #[serde(default)]
    pub default_targets: Vec<String>,
}

/// The eight canonical option sets, each a list of raw flag tokens.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct OptionsSection {
    #[serde(default)]
    pub cpp: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub cxx: Vec<String>,
    #[serde(default)]
    pub asm: Vec<String>,
    #[serde(default)]
    pub link_cc_lib: Vec<String>,
    #[serde(default)]
    pub link_cxx_lib: Vec<String>,
    #[serde(default)]
    pub link_cc_exe: Vec<String>,
    #[serde(default)]
    pub link_cxx_exe: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct BundleSection {
    /// Directories searched for source files, relative to the source root.
    #[serde(default)]
    pub include: Vec<String>,
    /// Subtrees excluded from the search.
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default, rename = "library")]
    pub libraries: Vec<ArtifactSection>,
    #[serde(default, rename = "executable")]
    pub executables: Vec<ArtifactSection>,
    #[serde(default, rename = "generated")]
    pub generated: Vec<GeneratedSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ArtifactSection {
    pub name: String,
    /// Source file stems (or full file names) resolved under the
    /// bundle's include roots.
    pub files: Vec<String>,
    /// Libraries linked in, by name, in link order.
    #[serde(default)]
    pub libs: Vec<String>,
    /// `cc` or `cxx`.
    #[serde(default = "default_linker")]
    pub linker: String,
}

fn default_linker() -> String {
    "cc".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct GeneratedSection {
    /// File name produced under the output root.
    pub output: String,
    /// Generator script, relative to the source root.
    pub script: String,
    pub interpreter: String,
    #[serde(default)]
    pub inputs: Vec<String>,
}

/// Per-target option adjustments: `add-<set>` / `del-<set>` token lists.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct TargetOptionsSection {
    #[serde(default)]
    pub add_cpp: Vec<String>,
    #[serde(default)]
    pub add_cc: Vec<String>,
    #[serde(default)]
    pub add_cxx: Vec<String>,
    #[serde(default)]
    pub add_asm: Vec<String>,
    #[serde(default)]
    pub add_link: Vec<String>,
    #[serde(default)]
    pub del_cpp: Vec<String>,
    #[serde(default)]
    pub del_cc: Vec<String>,
    #[serde(default)]
    pub del_cxx: Vec<String>,
    #[serde(default)]
    pub del_asm: Vec<String>,
}

pub fn load_config(path: &Path) -> Result<MasonConfig> {
    if !path.exists() {
        anyhow::bail!("{} not found", path.display());
    }
    let config_str = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&config_str).with_context(|| format!("failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = r#"
[project]
name = "hello"
version = "1.0"
default-targets = ["hello"]

[options]
cpp = ["-Iinclude"]
cc = ["-Wall"]
cxx = ["-Wall", "-Wshadow"]

[[bundle]]
include = ["src"]
exclude = ["src/attic"]

[[bundle.library]]
name = "Planet"
files = ["planet"]
linker = "cc"

[[bundle.executable]]
name = "hello"
files = ["main"]
libs = ["Planet"]
linker = "cxx"

[target-options.hello]
add-cxx = ["-Wextra"]
del-cc = ["-Wall"]
"#;

    #[test]
    fn parse_full_project() {
        let cfg: MasonConfig = toml::from_str(HELLO).unwrap();
        assert_eq!(cfg.project.name, "hello");
        assert_eq!(cfg.project.default_targets, vec!["hello"]);
        assert_eq!(cfg.options.cxx, vec!["-Wall", "-Wshadow"]);
        assert_eq!(cfg.bundles.len(), 1);
        let b = &cfg.bundles[0];
        assert_eq!(b.libraries[0].name, "Planet");
        assert_eq!(b.executables[0].libs, vec!["Planet"]);
        assert_eq!(b.executables[0].linker, "cxx");
        let t = &cfg.target_options["hello"];
        assert_eq!(t.add_cxx, vec!["-Wextra"]);
        assert_eq!(t.del_cc, vec!["-Wall"]);
    }

    #[test]
    fn linker_defaults_to_cc() {
        let cfg: MasonConfig = toml::from_str(
            r#"
[project]
name = "x"

[[bundle]]
include = ["."]

[[bundle.library]]
name = "a"
files = ["a"]
"#,
        )
        .unwrap();
        assert_eq!(cfg.bundles[0].libraries[0].linker, "cc");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<MasonConfig>(
            r#"
[project]
name = "x"
flavour = "no"
"#
        )
        .is_err());
    }

    #[test]
    fn generated_rule_parses() {
        let cfg: MasonConfig = toml::from_str(
            r#"
[project]
name = "x"

[[bundle]]
include = ["src"]

[[bundle.generated]]
output = "tables.s"
script = "gen/tables.pl"
interpreter = "perl"
inputs = ["gen/planets.dat"]
"#,
        )
        .unwrap();
        let g = &cfg.bundles[0].generated[0];
        assert_eq!(g.output, "tables.s");
        assert_eq!(g.interpreter, "perl");
    }
}
