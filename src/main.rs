use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::PathBuf;

use mason::driver::{self, BuildRequest};
use mason::options::{BuildType, LinkType};
use mason::watch;

#[derive(Parser)]
#[command(name = "mason")]
#[command(about = "Parallel build orchestrator for C/C++/assembler projects")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the project (the default command)
    Build(BuildArgs),
    /// Watch sources and rebuild on change
    Watch(BuildArgs),
    /// Print the persisted build cache
    DumpCache {
        /// Output root holding the cache file
        #[arg(long, default_value = "build")]
        out_root: PathBuf,
        /// debug, optimized or release
        #[arg(long, default_value = "debug")]
        build_type: String,
        /// dynamic or static
        #[arg(long, default_value = "dynamic")]
        link_type: String,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate for
        shell: Shell,
    },
}

#[derive(Args, Clone)]
struct BuildArgs {
    /// Project description file
    #[arg(long, default_value = "mason.toml")]
    project: PathBuf,
    /// Root of the source tree [default: the project file's directory]
    #[arg(long)]
    src_root: Option<PathBuf>,
    /// Root for build artifacts [default: <src-root>/build]
    #[arg(long)]
    out_root: Option<PathBuf>,
    /// C compiler driver [default: probed]
    #[arg(long)]
    cc: Option<PathBuf>,
    /// C++ compiler driver [default: probed]
    #[arg(long)]
    cxx: Option<PathBuf>,
    /// Worker threads [default: detected core count]
    #[arg(short, long)]
    jobs: Option<usize>,
    /// debug, optimized or release
    #[arg(long, default_value = "debug")]
    build_type: String,
    /// dynamic or static
    #[arg(long, default_value = "dynamic")]
    link_type: String,
    /// Artifact version X.Y[.Z], embedded in shared library names
    #[arg(long)]
    artifact_version: Option<String>,
    /// Ignore the persisted cache and rebuild everything
    #[arg(long)]
    no_cache: bool,
    /// Show build decisions and full command lines
    #[arg(short, long)]
    verbose: bool,
    /// Targets to build [default: the project's default set]
    targets: Vec<String>,
}

impl Default for BuildArgs {
    fn default() -> BuildArgs {
        BuildArgs {
            project: PathBuf::from("mason.toml"),
            src_root: None,
            out_root: None,
            cc: None,
            cxx: None,
            jobs: None,
            build_type: "debug".into(),
            link_type: "dynamic".into(),
            artifact_version: None,
            no_cache: false,
            verbose: false,
            targets: Vec::new(),
        }
    }
}

impl BuildArgs {
    fn into_request(self) -> Result<BuildRequest> {
        Ok(BuildRequest {
            project_file: self.project,
            src_root: self.src_root,
            out_root: self.out_root,
            cc: self.cc,
            cxx: self.cxx,
            jobs: self.jobs,
            build_type: self.build_type.parse::<BuildType>()?,
            link_type: self.link_type.parse::<LinkType>()?,
            version: self.artifact_version,
            targets: self.targets,
            no_cache: self.no_cache,
            verbose: self.verbose,
        })
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Build(BuildArgs::default())) {
        Commands::Build(args) => driver::build(&args.into_request()?),
        Commands::Watch(args) => watch::watch(&args.into_request()?),
        Commands::DumpCache {
            out_root,
            build_type,
            link_type,
        } => driver::dump_cache(
            &out_root,
            link_type.parse::<LinkType>()?,
            build_type.parse::<BuildType>()?,
        ),
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "mason", &mut std::io::stdout());
            Ok(())
        }
    }
}
