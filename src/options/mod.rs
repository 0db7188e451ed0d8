//! Typed model of compiler, assembler and linker flags.
//!
//! Every flag the orchestrator passes to a tool is an [`Opt`] value: parsing
//! happens once, up front, and the rest of the system deals in typed values
//! with field-wise equality. Rendering back to argv tokens is deterministic,
//! so two runs over identical inputs produce identical command lines.

mod parse;
mod set;

pub use parse::parse;
pub use set::{OptionGroup, OptionSet};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Build flavor, pinned for the whole invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BuildType {
    Debug,
    Optimized,
    Release,
}

impl BuildType {
    /// Suffix embedded in artifact file names so flavors coexist.
    pub fn suffix(&self) -> &'static str {
        match self {
            BuildType::Debug => "debug",
            BuildType::Optimized => "opt",
            BuildType::Release => "release",
        }
    }
}

impl FromStr for BuildType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(BuildType::Debug),
            "optimized" | "opt" => Ok(BuildType::Optimized),
            "release" => Ok(BuildType::Release),
            other => Err(anyhow::anyhow!("unknown build type '{other}'")),
        }
    }
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// How libraries are produced and consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LinkType {
    Static,
    Dynamic,
}

impl LinkType {
    pub fn suffix(&self) -> &'static str {
        match self {
            LinkType::Static => "static",
            LinkType::Dynamic => "dyn",
        }
    }
}

impl FromStr for LinkType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "static" => Ok(LinkType::Static),
            "dynamic" | "dyn" => Ok(LinkType::Dynamic),
            other => Err(anyhow::anyhow!("unknown link type '{other}'")),
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// The tool invocation an [`OptionSet`] feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Processor {
    /// Preprocessor flags, shared by every compile step.
    Cpp,
    /// C compile step.
    Cc,
    /// C++ compile step.
    Cxx,
    /// Assembler step.
    As,
    /// Library link driven by the C compiler.
    LdCcLib,
    /// Library link driven by the C++ compiler.
    LdCxxLib,
    /// Executable link driven by the C compiler.
    LdCcExec,
    /// Executable link driven by the C++ compiler.
    LdCxxExec,
}

impl Processor {
    pub const ALL: [Processor; 8] = [
        Processor::Cpp,
        Processor::Cc,
        Processor::Cxx,
        Processor::As,
        Processor::LdCcLib,
        Processor::LdCxxLib,
        Processor::LdCcExec,
        Processor::LdCxxExec,
    ];

    pub fn is_linker(&self) -> bool {
        matches!(
            self,
            Processor::LdCcLib | Processor::LdCxxLib | Processor::LdCcExec | Processor::LdCxxExec
        )
    }

    /// Store key for this set in the persistent cache header.
    pub fn store_key(&self) -> &'static str {
        match self {
            Processor::Cpp => "opt_cpp",
            Processor::Cc => "opt_compile_cc",
            Processor::Cxx => "opt_compile_cxx",
            Processor::As => "opt_asm",
            Processor::LdCcLib => "opt_link_cc_lib",
            Processor::LdCxxLib => "opt_link_cxx_lib",
            Processor::LdCcExec => "opt_link_cc_exe",
            Processor::LdCxxExec => "opt_link_cxx_exe",
        }
    }
}

impl fmt::Display for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.store_key())
    }
}

/// Which tool a flag belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptKind {
    Preprocessor,
    Assembler,
    Compiler,
    Linker,
    Other,
}

/// Whether a flag carries a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamKind {
    None,
    Required,
    Optional,
}

/// How the parameter attaches to the flag name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sep {
    /// Glued on: `-DFOO=1`, `-Wall`, `-O2`.
    None,
    /// Joined with `=`: `-std=c11`.
    Equals,
    /// Separate token: `--param k=v`, `-install_name n`.
    Space,
}

/// One flag, as a value object. Equality and hash cover every field; the
/// persistent cache relies on that to detect option changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Opt {
    /// Flag name including leading hyphens (`-D`, `-W`, `-std`, `-Wl,-rpath`).
    pub name: String,
    pub kind: OptKind,
    pub param_kind: ParamKind,
    /// Raw parameter text (for `-W` options the warning name, possibly
    /// with a `=value` tail; never includes a `no-` prefix).
    pub param: Option<String>,
    /// A `no-` segment was present (`-Wno-shadow`).
    pub negated: bool,
    pub sep: Sep,
    /// Key half of a `k=v` parameter.
    pub key: Option<String>,
    /// Value half of a `k=v` parameter.
    pub value: Option<String>,
}

impl Opt {
    fn build(name: &str, kind: OptKind, param_kind: ParamKind, sep: Sep) -> Opt {
        Opt {
            name: name.to_string(),
            kind,
            param_kind,
            param: None,
            negated: false,
            sep,
            key: None,
            value: None,
        }
    }

    fn with_param(mut self, param: &str) -> Opt {
        if let Some((k, v)) = param.split_once('=') {
            self.key = Some(k.to_string());
            self.value = Some(v.to_string());
        }
        self.param = Some(param.to_string());
        self
    }

    /// `-D<sym>[=<val>]`
    pub fn define(param: &str) -> Opt {
        Opt::build("-D", OptKind::Preprocessor, ParamKind::Required, Sep::None).with_param(param)
    }

    /// `-U<sym>`
    pub fn undefine(sym: &str) -> Opt {
        Opt::build("-U", OptKind::Preprocessor, ParamKind::Required, Sep::None).with_param(sym)
    }

    /// `-I<path>`
    pub fn include_dir(path: &str) -> Opt {
        Opt::build("-I", OptKind::Preprocessor, ParamKind::Required, Sep::None).with_param(path)
    }

    /// `-W<name>[=<val>]` / `-Wno-<name>`
    pub fn warning(param: &str, negated: bool) -> Opt {
        let mut o =
            Opt::build("-W", OptKind::Compiler, ParamKind::Required, Sep::None).with_param(param);
        o.negated = negated;
        o
    }

    /// `-Wa,<tok>` assembler pass-through.
    pub fn asm_passthrough(tok: &str) -> Opt {
        Opt::build("-Wa,", OptKind::Assembler, ParamKind::Required, Sep::None).with_param(tok)
    }

    /// `-Wl,<tok>` linker pass-through.
    pub fn linker_passthrough(tok: &str) -> Opt {
        Opt::build("-Wl,", OptKind::Linker, ParamKind::Required, Sep::None).with_param(tok)
    }

    /// `-Wl,-rpath -Wl,<path>`, one logical option rendered as two tokens.
    pub fn rpath(path: &str) -> Opt {
        Opt::build("-Wl,-rpath", OptKind::Linker, ParamKind::Required, Sep::Space).with_param(path)
    }

    /// `-Wl,-soname -Wl,<name>`, one logical option rendered as two tokens.
    pub fn soname(name: &str) -> Opt {
        Opt::build("-Wl,-soname", OptKind::Linker, ParamKind::Required, Sep::Space)
            .with_param(name)
    }

    /// `-f<name>`
    pub fn feature(name: &str) -> Opt {
        Opt::build("-f", OptKind::Compiler, ParamKind::Required, Sep::None).with_param(name)
    }

    /// `-m<param>`
    pub fn machine(param: &str) -> Opt {
        Opt::build("-m", OptKind::Compiler, ParamKind::Required, Sep::None).with_param(param)
    }

    /// `-std=<dialect>`
    pub fn dialect(dialect: &str) -> Opt {
        Opt::build("-std", OptKind::Compiler, ParamKind::Required, Sep::Equals).with_param(dialect)
    }

    /// `-O<level>`
    pub fn opt_level(level: &str) -> Opt {
        Opt::build("-O", OptKind::Compiler, ParamKind::Required, Sep::None).with_param(level)
    }

    /// `-g`
    pub fn debug_info() -> Opt {
        Opt::build("-g", OptKind::Compiler, ParamKind::None, Sep::None)
    }

    /// `-s`
    pub fn strip() -> Opt {
        Opt::build("-s", OptKind::Compiler, ParamKind::None, Sep::None)
    }

    /// `--param <key>=<val>`
    pub fn tuning(param: &str) -> Opt {
        Opt::build("--param", OptKind::Compiler, ParamKind::Required, Sep::Space).with_param(param)
    }

    /// Parameterless linker flag (`-shared`, `-static`, `-nostdlib`, ...).
    pub fn linker_flag(name: &str) -> Opt {
        Opt::build(name, OptKind::Linker, ParamKind::None, Sep::None)
    }

    /// Linker flag whose parameter is the next argv token
    /// (`-install_name`, `-framework`, ...).
    pub fn linker_named(name: &str, param: &str) -> Opt {
        Opt::build(name, OptKind::Linker, ParamKind::Required, Sep::Space).with_param(param)
    }

    /// `-l<lib>`
    pub fn lib(name: &str) -> Opt {
        Opt::build("-l", OptKind::Linker, ParamKind::Required, Sep::None).with_param(name)
    }

    /// `-L<dir>`
    pub fn lib_dir(dir: &str) -> Opt {
        Opt::build("-L", OptKind::Linker, ParamKind::Required, Sep::None).with_param(dir)
    }

    /// Argv tokens for this option. Most options render as one token;
    /// `Sep::Space` options contribute two.
    pub fn argv(&self) -> Vec<String> {
        let neg = if self.negated { "no-" } else { "" };
        match self.sep {
            Sep::None => {
                let param = self.param.as_deref().unwrap_or("");
                vec![format!("{}{}{}", self.name, neg, param)]
            }
            Sep::Equals => {
                let param = self.param.as_deref().unwrap_or("");
                vec![format!("{}={}", self.name, param)]
            }
            Sep::Space => {
                let param = self.param.as_deref().unwrap_or("");
                if self.name.starts_with("-Wl,") {
                    vec![self.name.clone(), format!("-Wl,{param}")]
                } else {
                    vec![self.name.clone(), param.to_string()]
                }
            }
        }
    }

    /// Deterministic textual form; `Sep::Space` options join their two
    /// tokens with a single space.
    pub fn render(&self) -> String {
        self.argv().join(" ")
    }

    /// Options the linker wants after the object-file list (`-L`, `-l`,
    /// raw pass-throughs). Everything else goes before it.
    pub fn is_post_link(&self) -> bool {
        self.name == "-l" || self.name == "-L" || self.name.starts_with("-Wl,")
    }
}

impl fmt::Display for Opt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
