//! Parallel execution of the stale target set.
//!
//! A fixed pool of worker threads drains a single ready queue guarded by
//! a mutex and condvar. A target is enqueued only once every predecessor
//! reached a final state; a poison sentinel shuts the pool down, either
//! after the queue drains or immediately after the first failure.
//! In-flight child processes always run to completion.

use crate::cmd::{BuildCommand, CommandKind};
use crate::target::TargetId;
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

/// The first build error, as reported to the user.
#[derive(Debug, Clone)]
pub struct BuildFailure {
    pub out_path: PathBuf,
    pub program: String,
    pub code: Option<i32>,
    pub stderr: String,
}

impl fmt::Display for BuildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(c) => write!(
                f,
                "'{}' failed building '{}' (exit status {c})",
                self.program,
                self.out_path.display()
            ),
            None => write!(
                f,
                "'{}' failed building '{}'",
                self.program,
                self.out_path.display()
            ),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BuildStats {
    pub compiled: usize,
    pub archived: usize,
    pub linked: usize,
    pub generated: usize,
}

impl BuildStats {
    fn bump(&mut self, kind: CommandKind) {
        match kind {
            CommandKind::Compile => self.compiled += 1,
            CommandKind::Archive => self.archived += 1,
            CommandKind::Link => self.linked += 1,
            CommandKind::Generate => self.generated += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.compiled + self.archived + self.linked + self.generated
    }
}

/// Worker-to-driver notifications, delivered from worker threads.
pub enum Event<'a> {
    Started(&'a BuildCommand),
    /// Command succeeded; carries captured stderr (warnings) if any.
    Finished(&'a BuildCommand, Option<String>),
}

/// One schedulable node: a command plus its position in the stale
/// subgraph.
pub struct PlanNode {
    pub command: BuildCommand,
    /// Indices of plan nodes that consume this one.
    pub succs: Vec<usize>,
    /// Number of plan nodes this one waits for.
    pub preds: usize,
}

#[derive(Default)]
pub struct Plan {
    pub nodes: Vec<PlanNode>,
}

pub struct RunOutcome {
    /// Targets whose command ran and succeeded.
    pub rebuilt: Vec<TargetId>,
    pub stats: BuildStats,
    pub failure: Option<BuildFailure>,
}

enum WorkItem {
    Build(usize),
    Poison,
}

struct State {
    preds: Vec<usize>,
    remaining: usize,
    rebuilt: Vec<TargetId>,
    stats: BuildStats,
    failure: Option<BuildFailure>,
    shutdown: bool,
}

struct Shared {
    queue: Mutex<VecDeque<WorkItem>>,
    cond: Condvar,
    state: Mutex<State>,
}

impl Shared {
    fn push_ready(&self, item: WorkItem) {
        self.queue.lock().unwrap().push_back(item);
        self.cond.notify_one();
    }

    fn poison_all(&self, workers: usize) {
        let mut q = self.queue.lock().unwrap();
        for _ in 0..workers {
            q.push_back(WorkItem::Poison);
        }
        drop(q);
        self.cond.notify_all();
    }

    fn pop(&self) -> WorkItem {
        let mut q = self.queue.lock().unwrap();
        loop {
            if let Some(item) = q.pop_front() {
                return item;
            }
            q = self.cond.wait(q).unwrap();
        }
    }
}

/// Run the plan across `workers` threads. `remaining` is continuously
/// updated for the driver's progress display; `events` fires from worker
/// threads.
pub fn run<F>(plan: &Plan, workers: usize, remaining: &AtomicUsize, events: F) -> RunOutcome
where
    F: Fn(Event<'_>) + Sync,
{
    let workers = workers.max(1);
    let total = plan.nodes.len();
    remaining.store(total, Ordering::SeqCst);

    let shared = Shared {
        queue: Mutex::new(VecDeque::new()),
        cond: Condvar::new(),
        state: Mutex::new(State {
            preds: plan.nodes.iter().map(|n| n.preds).collect(),
            remaining: total,
            rebuilt: Vec::new(),
            stats: BuildStats::default(),
            failure: None,
            shutdown: false,
        }),
    };

    {
        let mut q = shared.queue.lock().unwrap();
        for (i, node) in plan.nodes.iter().enumerate() {
            if node.preds == 0 {
                q.push_back(WorkItem::Build(i));
            }
        }
        if total == 0 {
            for _ in 0..workers {
                q.push_back(WorkItem::Poison);
            }
        }
    }
    shared.cond.notify_all();

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| worker_loop(plan, &shared, workers, remaining, &events));
        }
    });

    let state = shared.state.into_inner().unwrap();
    RunOutcome {
        rebuilt: state.rebuilt,
        stats: state.stats,
        failure: state.failure,
    }
}

fn worker_loop<F>(
    plan: &Plan,
    shared: &Shared,
    workers: usize,
    remaining: &AtomicUsize,
    events: &F,
) where
    F: Fn(Event<'_>) + Sync,
{
    loop {
        let index = match shared.pop() {
            WorkItem::Poison => return,
            WorkItem::Build(i) => i,
        };
        let node = &plan.nodes[index];
        events(Event::Started(&node.command));

        match spawn_command(&node.command) {
            Ok(warnings) => {
                events(Event::Finished(&node.command, warnings));
                let mut state = shared.state.lock().unwrap();
                if state.shutdown {
                    // A failure elsewhere already stopped the run; this
                    // result is kept but nothing new is enqueued.
                    state.rebuilt.push(node.command.target);
                    state.stats.bump(node.command.kind);
                    continue;
                }
                state.rebuilt.push(node.command.target);
                state.stats.bump(node.command.kind);
                state.remaining -= 1;
                remaining.store(state.remaining, Ordering::SeqCst);
                let mut ready = Vec::new();
                for &succ in &node.succs {
                    state.preds[succ] -= 1;
                    if state.preds[succ] == 0 {
                        ready.push(succ);
                    }
                }
                let drained = state.remaining == 0;
                drop(state);
                for succ in ready {
                    shared.push_ready(WorkItem::Build(succ));
                }
                if drained {
                    shared.poison_all(workers);
                }
            }
            Err(failure) => {
                let mut state = shared.state.lock().unwrap();
                if state.failure.is_none() {
                    state.failure = Some(failure);
                }
                state.shutdown = true;
                drop(state);
                shared.poison_all(workers);
            }
        }
    }
}

/// Spawn the command, capture both streams, and map a non-zero exit to a
/// failure. Returns captured stderr on success so warnings surface.
fn spawn_command(command: &BuildCommand) -> Result<Option<String>, BuildFailure> {
    let output = Command::new(command.program())
        .args(&command.argv[1..])
        .output()
        .map_err(|e| BuildFailure {
            out_path: command.out_path.clone(),
            program: command.program().to_string(),
            code: None,
            stderr: e.to_string(),
        })?;
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if output.status.success() {
        Ok((!stderr.trim().is_empty()).then_some(stderr))
    } else {
        Err(BuildFailure {
            out_path: command.out_path.clone(),
            program: command.program().to_string(),
            code: output.status.code(),
            stderr,
        })
    }
}
