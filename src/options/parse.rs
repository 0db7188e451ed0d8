//! Token-stream parser turning raw flag strings into typed [`Opt`] values.
//!
//! Each [`Processor`] kind accepts only its own flag classes; anything else
//! is a configuration error surfaced before any subprocess runs.

use super::{Opt, Processor};
use anyhow::{bail, Result};

/// Warning names accepted after `-W` / `-Wno-`.
const WARNING_NAMES: &[&str] = &[
    "all",
    "extra",
    "error",
    "pedantic",
    "shadow",
    "conversion",
    "sign-conversion",
    "unused",
    "unused-parameter",
    "unused-variable",
    "unused-function",
    "uninitialized",
    "format",
    "strict-overflow",
    "cast-align",
    "cast-qual",
    "pointer-arith",
    "write-strings",
    "switch-enum",
    "switch-default",
    "float-equal",
    "undef",
    "redundant-decls",
    "missing-declarations",
    "old-style-cast",
    "overloaded-virtual",
    "non-virtual-dtor",
];

/// Names accepted after `-f`.
const FEATURE_NAMES: &[&str] = &[
    "PIC",
    "pic",
    "lto",
    "signed-char",
    "unsigned-char",
    "no-common",
    "inline-functions",
    "strict-aliasing",
    "omit-frame-pointer",
    "unroll-loops",
    "stack-protector",
    "no-exceptions",
    "no-rtti",
    "diagnostics-show-option",
];

/// Optimization-class `-f` names, rejected in debug builds.
pub(crate) const OPT_CLASS_FEATURES: &[&str] = &[
    "lto",
    "inline-functions",
    "strict-aliasing",
    "omit-frame-pointer",
    "unroll-loops",
];

/// Params accepted after `-m`.
const MACHINE_PARAMS: &[&str] = &[
    "32",
    "64",
    "arch=native",
    "tune=native",
    "fpmath=sse",
    "sse4.2",
    "avx",
    "avx2",
];

/// Dialects accepted after `-std=`.
const DIALECTS: &[&str] = &[
    "c89", "c99", "c11", "c17", "c2x", "gnu99", "gnu11", "gnu17", "c++11", "c++14", "c++17",
    "c++20", "c++23", "gnu++14", "gnu++17", "gnu++20",
];

/// Keys accepted in `--param <key>=<val>`.
const PARAM_KEYS: &[&str] = &[
    "max-inline-insns-single",
    "max-inline-insns-auto",
    "inline-unit-growth",
    "large-function-growth",
    "max-unrolled-insns",
];

const OPT_LEVELS: &[&str] = &["0", "1", "2", "3", "s", "fast"];

/// Parameterless linker flags.
const LINKER_FLAGS: &[&str] = &["-shared", "-static", "-nostdlib", "-dynamiclib"];

/// Linker flags whose parameter is the following argv token.
const LINKER_NAMED: &[&str] = &[
    "-install_name",
    "-compatibility_version",
    "-current_version",
    "-framework",
];

/// State for recognizing the two-token `-Wl,-rpath -Wl,<p>` and
/// `-Wl,-soname -Wl,<n>` sequences.
#[derive(PartialEq)]
enum PassState {
    Idle,
    SeenRpath,
    SeenSoname,
}

/// Parse a sequence of raw tokens for one processor kind.
pub fn parse(proc: Processor, tokens: &[String]) -> Result<Vec<Opt>> {
    let mut opts = Vec::with_capacity(tokens.len());
    let mut state = PassState::Idle;
    let mut iter = tokens.iter().peekable();

    while let Some(tok) = iter.next() {
        if state != PassState::Idle {
            // The only legal follower is the second half of the pair.
            let param = tok
                .strip_prefix("-Wl,")
                .filter(|rest| !rest.is_empty())
                .ok_or_else(|| {
                    anyhow::anyhow!("expected '-Wl,<arg>' after '-Wl,-rpath'/'-Wl,-soname', got '{tok}'")
                })?;
            opts.push(match state {
                PassState::SeenRpath => Opt::rpath(param),
                PassState::SeenSoname => Opt::soname(param),
                PassState::Idle => unreachable!(),
            });
            state = PassState::Idle;
            continue;
        }

        let opt = match proc {
            Processor::Cpp => parse_preprocessor(tok)?,
            Processor::As => {
                if let Some(rest) = tok.strip_prefix("-Wa,") {
                    require_param(tok, rest)?;
                    Some(Opt::asm_passthrough(rest))
                } else {
                    parse_preprocessor(tok)?
                }
            }
            Processor::Cc | Processor::Cxx => parse_compiler(tok, &mut iter)?,
            _ if proc.is_linker() => {
                match parse_linker(tok, &mut iter)? {
                    Linker::Opt(o) => Some(o),
                    Linker::AwaitRpath => {
                        state = PassState::SeenRpath;
                        None
                    }
                    Linker::AwaitSoname => {
                        state = PassState::SeenSoname;
                        None
                    }
                }
            }
            _ => None,
        };

        match opt {
            Some(o) => opts.push(o),
            None if state == PassState::Idle => {
                bail!("unrecognized {proc} option '{tok}'")
            }
            None => {}
        }
    }

    if state != PassState::Idle {
        bail!("dangling '-Wl,-rpath'/'-Wl,-soname' at end of option list");
    }
    Ok(opts)
}

fn require_param(tok: &str, rest: &str) -> Result<()> {
    if rest.is_empty() {
        bail!("option '{tok}' requires a parameter");
    }
    Ok(())
}

fn parse_preprocessor(tok: &str) -> Result<Option<Opt>> {
    if let Some(rest) = tok.strip_prefix("-D") {
        require_param(tok, rest)?;
        if rest.matches('=').count() > 1 {
            bail!("'{tok}' carries more than one '='");
        }
        return Ok(Some(Opt::define(rest)));
    }
    if let Some(rest) = tok.strip_prefix("-U") {
        require_param(tok, rest)?;
        return Ok(Some(Opt::undefine(rest)));
    }
    if let Some(rest) = tok.strip_prefix("-I") {
        require_param(tok, rest)?;
        return Ok(Some(Opt::include_dir(rest)));
    }
    Ok(None)
}

fn parse_compiler<'a, I>(tok: &str, iter: &mut std::iter::Peekable<I>) -> Result<Option<Opt>>
where
    I: Iterator<Item = &'a String>,
{
    match tok {
        "-g" => return Ok(Some(Opt::debug_info())),
        "-s" => return Ok(Some(Opt::strip())),
        "--param" => {
            let param = iter
                .next()
                .ok_or_else(|| anyhow::anyhow!("'--param' requires a following <key>=<val>"))?;
            let (key, _val) = param
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("'--param {param}' is not of the form k=v"))?;
            if !PARAM_KEYS.contains(&key) {
                bail!("unknown --param key '{key}'");
            }
            return Ok(Some(Opt::tuning(param)));
        }
        _ => {}
    }

    if let Some(rest) = tok.strip_prefix("-std=") {
        if !DIALECTS.contains(&rest) {
            bail!("unknown language dialect '-std={rest}'");
        }
        return Ok(Some(Opt::dialect(rest)));
    }
    if let Some(rest) = tok.strip_prefix("-O") {
        if !OPT_LEVELS.contains(&rest) {
            bail!("unknown optimization level '{tok}'");
        }
        return Ok(Some(Opt::opt_level(rest)));
    }
    if tok.starts_with("-Wa,") || tok.starts_with("-Wl,") {
        // Pass-throughs belong to the assembler/linker sets.
        return Ok(None);
    }
    if let Some(rest) = tok.strip_prefix("-W") {
        require_param(tok, rest)?;
        let (negated, body) = match rest.strip_prefix("no-") {
            Some(b) => (true, b),
            None => (false, rest),
        };
        let (name, value) = match body.split_once('=') {
            Some((n, v)) => (n, Some(v)),
            None => (body, None),
        };
        if !WARNING_NAMES.contains(&name) {
            bail!("unknown warning '-W{rest}'");
        }
        if negated && value.is_some() {
            bail!("'-Wno-{body}' cannot carry a value");
        }
        match (name, value) {
            ("strict-overflow", Some(v)) => {
                let n: u8 = v
                    .parse()
                    .map_err(|_| anyhow::anyhow!("'-W{rest}': level must be a number"))?;
                if !(1..=5).contains(&n) {
                    bail!("'-Wstrict-overflow={v}': level must be in 1..5");
                }
            }
            ("format", Some(v)) if v != "2" => {
                bail!("'-Wformat={v}': only -Wformat=2 is accepted");
            }
            (_, Some(v)) if name != "format" && name != "strict-overflow" => {
                bail!("warning '-W{name}' does not take a value (got '{v}')");
            }
            _ => {}
        }
        return Ok(Some(Opt::warning(body, negated)));
    }
    if let Some(rest) = tok.strip_prefix("-f") {
        if !FEATURE_NAMES.contains(&rest) {
            bail!("unknown compiler feature '-f{rest}'");
        }
        return Ok(Some(Opt::feature(rest)));
    }
    if let Some(rest) = tok.strip_prefix("-m") {
        if !MACHINE_PARAMS.contains(&rest) {
            bail!("unknown machine flag '-m{rest}'");
        }
        return Ok(Some(Opt::machine(rest)));
    }
    Ok(None)
}

enum Linker {
    Opt(Opt),
    AwaitRpath,
    AwaitSoname,
}

fn parse_linker<'a, I>(tok: &str, iter: &mut std::iter::Peekable<I>) -> Result<Linker>
where
    I: Iterator<Item = &'a String>,
{
    if LINKER_FLAGS.contains(&tok) {
        return Ok(Linker::Opt(Opt::linker_flag(tok)));
    }
    if LINKER_NAMED.contains(&tok) {
        let param = iter
            .next()
            .ok_or_else(|| anyhow::anyhow!("'{tok}' requires a following parameter"))?;
        return Ok(Linker::Opt(Opt::linker_named(tok, param)));
    }
    if let Some(rest) = tok.strip_prefix("-Wl,") {
        require_param(tok, rest)?;
        return Ok(match rest {
            "-rpath" => Linker::AwaitRpath,
            "-soname" => Linker::AwaitSoname,
            _ => Linker::Opt(Opt::linker_passthrough(rest)),
        });
    }
    if let Some(rest) = tok.strip_prefix("-L") {
        require_param(tok, rest)?;
        return Ok(Linker::Opt(Opt::lib_dir(rest)));
    }
    if let Some(rest) = tok.strip_prefix("-l") {
        require_param(tok, rest)?;
        return Ok(Linker::Opt(Opt::lib(rest)));
    }
    bail!("unrecognized linker option '{tok}'");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &[&str]) -> Vec<String> {
        s.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn parse_preprocessor_set() {
        let opts = parse(Processor::Cpp, &toks(&["-DFOO=1", "-UBAR", "-Iinclude"])).unwrap();
        assert_eq!(opts.len(), 3);
        assert_eq!(opts[0], Opt::define("FOO=1"));
        assert_eq!(opts[1], Opt::undefine("BAR"));
        assert_eq!(opts[2], Opt::include_dir("include"));
    }

    #[test]
    fn include_order_is_preserved() {
        let opts = parse(Processor::Cpp, &toks(&["-Ib", "-Ia"])).unwrap();
        assert_eq!(opts[0].render(), "-Ib");
        assert_eq!(opts[1].render(), "-Ia");
    }

    #[test]
    fn parse_warnings_and_negation() {
        let opts = parse(Processor::Cc, &toks(&["-Wall", "-Wno-shadow"])).unwrap();
        assert!(!opts[0].negated);
        assert!(opts[1].negated);
        assert_eq!(opts[1].render(), "-Wno-shadow");
    }

    #[test]
    fn unknown_warning_is_rejected() {
        assert!(parse(Processor::Cc, &toks(&["-Wbogus"])).is_err());
    }

    #[test]
    fn strict_overflow_bounds() {
        assert!(parse(Processor::Cc, &toks(&["-Wstrict-overflow=3"])).is_ok());
        assert!(parse(Processor::Cc, &toks(&["-Wstrict-overflow=6"])).is_err());
        assert!(parse(Processor::Cc, &toks(&["-Wformat=2"])).is_ok());
        assert!(parse(Processor::Cc, &toks(&["-Wformat=1"])).is_err());
    }

    #[test]
    fn parse_param_takes_next_token() {
        let opts = parse(
            Processor::Cc,
            &toks(&["--param", "max-inline-insns-single=400"]),
        )
        .unwrap();
        assert_eq!(opts[0].argv(), vec!["--param", "max-inline-insns-single=400"]);
    }

    #[test]
    fn param_without_value_is_rejected() {
        assert!(parse(Processor::Cc, &toks(&["--param"])).is_err());
        assert!(parse(Processor::Cc, &toks(&["--param", "nonsense"])).is_err());
    }

    #[test]
    fn rpath_pair_state_machine() {
        let opts = parse(
            Processor::LdCcExec,
            &toks(&["-Wl,-rpath", "-Wl,/opt/lib"]),
        )
        .unwrap();
        assert_eq!(opts.len(), 1);
        assert_eq!(opts[0], Opt::rpath("/opt/lib"));
    }

    #[test]
    fn dangling_rpath_is_rejected() {
        assert!(parse(Processor::LdCcExec, &toks(&["-Wl,-rpath"])).is_err());
        assert!(parse(Processor::LdCcExec, &toks(&["-Wl,-rpath", "-lm"])).is_err());
    }

    #[test]
    fn soname_pair_parses() {
        let opts = parse(
            Processor::LdCxxLib,
            &toks(&["-Wl,-soname", "-Wl,libp.so.1"]),
        )
        .unwrap();
        assert_eq!(opts[0], Opt::soname("libp.so.1"));
    }

    #[test]
    fn linker_rejects_compile_flags() {
        assert!(parse(Processor::LdCcExec, &toks(&["-O2"])).is_err());
        assert!(parse(Processor::Cpp, &toks(&["-lm"])).is_err());
    }

    #[test]
    fn assembler_takes_preprocessor_and_passthrough() {
        let opts = parse(Processor::As, &toks(&["-DASM", "-Wa,--fatal-warnings"])).unwrap();
        assert_eq!(opts[0], Opt::define("ASM"));
        assert_eq!(opts[1].render(), "-Wa,--fatal-warnings");
    }

    #[test]
    fn double_equals_rejected() {
        assert!(parse(Processor::Cpp, &toks(&["-DA=B=C"])).is_err());
    }

    #[test]
    fn round_trip_parse_render() {
        let cases: Vec<(Processor, Vec<&str>)> = vec![
            (Processor::Cpp, vec!["-DFOO=1", "-Iinclude", "-UBAR"]),
            (
                Processor::Cc,
                vec!["-Wall", "-Wno-shadow", "-O2", "-std=c11", "-fPIC", "-m64"],
            ),
            (
                Processor::LdCxxExec,
                vec!["-shared", "-L/usr/lib", "-lm", "-Wl,-rpath", "-Wl,/opt/lib"],
            ),
        ];
        for (proc, raw) in cases {
            let opts = parse(proc, &toks(&raw)).unwrap();
            let rendered: Vec<String> = opts.iter().flat_map(|o| o.argv()).collect();
            let reparsed = parse(proc, &rendered).unwrap();
            assert_eq!(opts, reparsed, "round-trip failed for {proc}");
        }
    }
}
