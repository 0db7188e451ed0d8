//! Ordered, validated option collections.
//!
//! An [`OptionSet`] owns the flags for one processor kind and refuses
//! duplicates and unresolved conflicts at insertion time. Linker sets keep
//! two sequences, before and after the object-file list, because the
//! relative order of `-L`/`-l`/`-Wl,` tokens matters.

use super::parse::OPT_CLASS_FEATURES;
use super::{BuildType, LinkType, Opt, Processor};
use anyhow::{bail, Result};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptionSet {
    pub processor: Processor,
    pub build_type: BuildType,
    items: Vec<Opt>,
    /// Linker options placed after the object-file list.
    post: Vec<Opt>,
}

impl OptionSet {
    pub fn new(processor: Processor, build_type: BuildType) -> OptionSet {
        OptionSet {
            processor,
            build_type,
            items: Vec::new(),
            post: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.post.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Opt> {
        self.items.iter().chain(self.post.iter())
    }

    /// Insert with build-type gates and conflict resolution. With
    /// `replace` set, a conflicting existing entry is evicted (exact
    /// duplicates warn and keep the original); without it, any conflict
    /// is an error.
    pub fn add(&mut self, opt: Opt, replace: bool) -> Result<()> {
        self.check_build_type(&opt)?;
        self.add_unchecked(opt, replace)
    }

    /// Insert without build-type gates. This is the explicit escape hatch
    /// for projects that deliberately optimize a debug build.
    pub fn add_unchecked(&mut self, opt: Opt, replace: bool) -> Result<()> {
        if let Some(pos) = self.position(|o| *o == opt) {
            if replace {
                println!(
                    "{} duplicate option '{}' ignored",
                    "!".yellow(),
                    self.seq(pos.0)[pos.1].render()
                );
                return Ok(());
            }
            bail!("duplicate option '{}'", opt.render());
        }

        if let Some(pos) = self.conflict_position(&opt) {
            if replace {
                self.seq_mut(pos.0).remove(pos.1);
            } else {
                let old = self.seq(pos.0)[pos.1].render();
                bail!(
                    "option '{}' conflicts with '{}' already in {}",
                    opt.render(),
                    old,
                    self.processor
                );
            }
        }

        if self.processor.is_linker() && opt.is_post_link() {
            self.post.push(opt);
        } else {
            self.items.push(opt);
        }
        Ok(())
    }

    /// Parse raw tokens and add them all.
    pub fn add_tokens(&mut self, tokens: &[String], replace: bool) -> Result<()> {
        for opt in super::parse(self.processor, tokens)? {
            self.add(opt, replace)?;
        }
        Ok(())
    }

    /// Remove an exact option; removing a `-W` flag also drops its
    /// opposite-polarity form.
    pub fn remove(&mut self, opt: &Opt) -> bool {
        let mut inverse = opt.clone();
        inverse.negated = !inverse.negated;
        let before = self.items.len() + self.post.len();
        self.items.retain(|o| o != opt && (opt.name != "-W" || *o != inverse));
        self.post.retain(|o| o != opt);
        before != self.items.len() + self.post.len()
    }

    fn check_build_type(&self, opt: &Opt) -> Result<()> {
        let bt = self.build_type;
        match opt.name.as_str() {
            "-g" if bt == BuildType::Release => {
                bail!("'-g' is not accepted in a release build")
            }
            "-s" if bt != BuildType::Release => {
                bail!("'-s' is only accepted in a release build")
            }
            "-O" => {
                let level = opt.param.as_deref().unwrap_or("");
                if bt == BuildType::Release && level == "0" {
                    bail!("'-O0' is not accepted in a release build");
                }
                if bt == BuildType::Debug && level != "0" {
                    bail!("'-O{level}' is not accepted in a debug build");
                }
            }
            "-f" if bt == BuildType::Debug => {
                let name = opt.param.as_deref().unwrap_or("");
                if OPT_CLASS_FEATURES.contains(&name) {
                    bail!("'-f{name}' is not accepted in a debug build");
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Index of an entry that the new option conflicts with.
    fn conflict_position(&self, opt: &Opt) -> Option<(bool, usize)> {
        match opt.name.as_str() {
            // Define vs undefine of the same symbol.
            "-D" | "-U" => {
                let sym = opt.key.as_deref().or(opt.param.as_deref())?;
                let other = if opt.name == "-D" { "-U" } else { "-D" };
                self.position(|o| {
                    (o.name == other || o.name == opt.name)
                        && o.key.as_deref().or(o.param.as_deref()) == Some(sym)
                })
            }
            // -W<x> vs -Wno-<x>, and differing values of the same warning.
            "-W" => {
                let name = warning_name(opt);
                self.position(|o| o.name == "-W" && warning_name(o) == name)
            }
            // Second -O with a differing level.
            "-O" => self.position(|o| o.name == "-O"),
            // Single-valued options.
            "-m" | "-install_name" | "-compatibility_version" | "-current_version"
            | "-Wl,-soname" => self.position(|o| o.name == opt.name),
            _ => None,
        }
    }

    fn position(&self, pred: impl Fn(&Opt) -> bool) -> Option<(bool, usize)> {
        if let Some(i) = self.items.iter().position(&pred) {
            return Some((false, i));
        }
        self.post.iter().position(&pred).map(|i| (true, i))
    }

    fn seq(&self, post: bool) -> &Vec<Opt> {
        if post {
            &self.post
        } else {
            &self.items
        }
    }

    fn seq_mut(&mut self, post: bool) -> &mut Vec<Opt> {
        if post {
            &mut self.post
        } else {
            &mut self.items
        }
    }

    /// Argv tokens before the object-file list (everything, for
    /// non-linker sets).
    pub fn argv_pre(&self) -> Vec<String> {
        self.items.iter().flat_map(|o| o.argv()).collect()
    }

    /// Argv tokens after the object-file list.
    pub fn argv_post(&self) -> Vec<String> {
        self.post.iter().flat_map(|o| o.argv()).collect()
    }

    /// Full argv contribution in declared order.
    pub fn argv(&self) -> Vec<String> {
        let mut v = self.argv_pre();
        v.extend(self.argv_post());
        v
    }
}

fn warning_name(o: &Opt) -> &str {
    o.key
        .as_deref()
        .or(o.param.as_deref())
        .unwrap_or_default()
}

/// The eight canonical sets plus the pinned build and link flavors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptionGroup {
    pub build_type: BuildType,
    pub link_type: LinkType,
    sets: BTreeMap<Processor, OptionSet>,
}

impl OptionGroup {
    pub fn new(build_type: BuildType, link_type: LinkType) -> OptionGroup {
        let sets = Processor::ALL
            .iter()
            .map(|&p| (p, OptionSet::new(p, build_type)))
            .collect();
        OptionGroup {
            build_type,
            link_type,
            sets,
        }
    }

    pub fn get(&self, proc: Processor) -> &OptionSet {
        &self.sets[&proc]
    }

    pub fn get_mut(&mut self, proc: Processor) -> &mut OptionSet {
        self.sets.get_mut(&proc).expect("all processors present")
    }

    pub fn sets(&self) -> impl Iterator<Item = &OptionSet> {
        self.sets.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cc_set() -> OptionSet {
        OptionSet::new(Processor::Cc, BuildType::Optimized)
    }

    #[test]
    fn define_undefine_conflict_is_rejected() {
        let mut set = OptionSet::new(Processor::Cpp, BuildType::Debug);
        set.add(Opt::define("FOO=1"), false).unwrap();
        assert!(set.add(Opt::undefine("FOO"), false).is_err());
    }

    #[test]
    fn define_undefine_conflict_evicts_with_replace() {
        let mut set = OptionSet::new(Processor::Cpp, BuildType::Debug);
        set.add(Opt::define("FOO=1"), false).unwrap();
        set.add(Opt::undefine("FOO"), true).unwrap();
        let rendered: Vec<String> = set.iter().map(|o| o.render()).collect();
        assert_eq!(rendered, vec!["-UFOO"]);
    }

    #[test]
    fn warning_polarity_conflict() {
        let mut set = cc_set();
        set.add(Opt::warning("shadow", false), false).unwrap();
        assert!(set.add(Opt::warning("shadow", true), false).is_err());
        set.add(Opt::warning("shadow", true), true).unwrap();
        assert_eq!(set.argv(), vec!["-Wno-shadow"]);
    }

    #[test]
    fn second_opt_level_conflicts() {
        let mut set = cc_set();
        set.add(Opt::opt_level("2"), false).unwrap();
        assert!(set.add(Opt::opt_level("3"), false).is_err());
        set.add(Opt::opt_level("3"), true).unwrap();
        assert_eq!(set.argv(), vec!["-O3"]);
    }

    #[test]
    fn exact_duplicate_kept_under_replace() {
        let mut set = cc_set();
        set.add(Opt::warning("all", false), false).unwrap();
        set.add(Opt::warning("all", false), true).unwrap();
        assert_eq!(set.argv(), vec!["-Wall"]);
        assert!(set.add(Opt::warning("all", false), false).is_err());
    }

    #[test]
    fn debug_rejects_optimization() {
        let mut set = OptionSet::new(Processor::Cc, BuildType::Debug);
        assert!(set.add(Opt::opt_level("2"), false).is_err());
        assert!(set.add(Opt::feature("lto"), false).is_err());
        set.add(Opt::opt_level("0"), false).unwrap();
        // Explicit override path.
        set.add_unchecked(Opt::feature("lto"), true).unwrap();
    }

    #[test]
    fn release_gates() {
        let mut set = OptionSet::new(Processor::Cc, BuildType::Release);
        assert!(set.add(Opt::debug_info(), false).is_err());
        assert!(set.add(Opt::opt_level("0"), false).is_err());
        set.add(Opt::strip(), false).unwrap();
        let mut dbg = OptionSet::new(Processor::Cc, BuildType::Debug);
        assert!(dbg.add(Opt::strip(), false).is_err());
    }

    #[test]
    fn linker_routes_post_options() {
        let mut set = OptionSet::new(Processor::LdCcExec, BuildType::Debug);
        set.add(Opt::lib("m"), false).unwrap();
        set.add(Opt::linker_flag("-nostdlib"), false).unwrap();
        set.add(Opt::lib_dir("/usr/lib"), false).unwrap();
        assert_eq!(set.argv_pre(), vec!["-nostdlib"]);
        assert_eq!(set.argv_post(), vec!["-lm", "-L/usr/lib"]);
    }

    #[test]
    fn soname_is_single_valued() {
        let mut set = OptionSet::new(Processor::LdCxxLib, BuildType::Debug);
        set.add(Opt::soname("libp.so.1"), false).unwrap();
        assert!(set.add(Opt::soname("libp.so.2"), false).is_err());
        set.add(Opt::soname("libp.so.2"), true).unwrap();
        assert_eq!(set.argv_post(), vec!["-Wl,-soname", "-Wl,libp.so.2"]);
    }

    #[test]
    fn argv_is_deterministic() {
        let mut a = cc_set();
        let mut b = cc_set();
        for set in [&mut a, &mut b] {
            set.add(Opt::warning("all", false), false).unwrap();
            set.add(Opt::opt_level("2"), false).unwrap();
            set.add(Opt::dialect("c11"), false).unwrap();
        }
        assert_eq!(a, b);
        assert_eq!(a.argv(), b.argv());
        assert_eq!(a.argv(), vec!["-Wall", "-O2", "-std=c11"]);
    }

    #[test]
    fn group_equality_tracks_contents() {
        let mut a = OptionGroup::new(BuildType::Debug, LinkType::Dynamic);
        let b = OptionGroup::new(BuildType::Debug, LinkType::Dynamic);
        assert_eq!(a, b);
        a.get_mut(Processor::Cc)
            .add(Opt::warning("all", false), false)
            .unwrap();
        assert_ne!(a, b);
    }
}
