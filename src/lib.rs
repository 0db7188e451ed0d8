//! # mason - Parallel Build Orchestrator for C/C++/Assembler
//!
//! mason reads a `mason.toml` project description, discovers source files
//! and their transitive header dependencies, builds a DAG of objects,
//! libraries and executables, and runs the minimal set of compile and
//! link commands in parallel.
//!
//! ## Quick Start
//!
//! ```bash
//! # Build the project's default targets
//! mason build
//!
//! # Optimized static build of one executable, eight workers
//! mason build --build-type optimized --link-type static -j 8 hello
//! ```
//!
//! ## Module Organization
//!
//! - [`options`] - Typed compiler/assembler/linker flag model
//! - [`target`] - The build DAG: sources, objects, libraries, executables
//! - [`project`] - Project evaluation and source resolution
//! - [`discover`] - Preprocessor-driven header dependency discovery
//! - [`store`] - Persistent per-target input cache
//! - [`stale`] - The staleness oracle
//! - [`scheduler`] - Worker pool with fail-fast shutdown
//! - [`driver`] - End-to-end build sequencing

/// Rendering targets into tool invocations.
pub mod cmd;

/// Project description parsing (`mason.toml`).
pub mod config;

/// Header dependency discovery via the preprocessor.
pub mod discover;

/// End-to-end build sequencing.
pub mod driver;

/// Typed option model with validation and conflict resolution.
pub mod options;

/// Project evaluation into a target graph.
pub mod project;

/// Parallel scheduler and worker pool.
pub mod scheduler;

/// The staleness oracle.
pub mod stale;

/// Persistent per-target input cache.
pub mod store;

/// The build DAG.
pub mod target;

/// Host probe: compilers, system includes, core count.
pub mod toolchain;

/// Terminal UI utilities.
pub mod ui;

/// Rebuild-on-change loop.
pub mod watch;
