//! Minimizer bridge.
//!
//! [`MinimizerBridge`] shards a candidate list over `num_processors` solver
//! instances, runs them through a [`Minimizer`], and returns the classified
//! data slots of all shards concatenated in candidate order. The default
//! [`ProcessMinimizer`] starts one child process per shard and blocks until
//! every child has exited.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::process::{Child, Command as ProcessCommand, Stdio};
use std::time::Instant;

use tracing::{debug, info, warn};

use super::output::{Slot, data_slots};
use super::protocol::{Script, StageSession};
use crate::domain::{ModePlan, SolutionRecord};
use crate::error::{AppError, Result};

/// Runs solver scripts. Implementations must return one output per script, in order.
pub trait Minimizer: Sync {
    /// `label` names the job (file stems, log lines).
    fn run(&self, label: &str, scripts: &[Script]) -> Result<Vec<Vec<String>>>;
}

/// Split `n` items over at most `parts` contiguous shards. The remainder goes
/// to the first shards one item each; empty shards are omitted.
pub fn partition_even(n: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.max(1);
    let base = n / parts;
    let extra = n % parts;
    let mut out = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let len = base + usize::from(i < extra);
        if len == 0 {
            continue;
        }
        out.push(start..start + len);
        start += len;
    }
    out
}

pub struct MinimizerBridge<'a> {
    minimizer: &'a dyn Minimizer,
    processors: usize,
}

impl<'a> MinimizerBridge<'a> {
    pub fn new(minimizer: &'a dyn Minimizer, processors: usize) -> Self {
        Self {
            minimizer,
            processors: processors.max(1),
        }
    }

    /// Evaluate `candidates` under `plan`; data slots come back in candidate order.
    pub fn evaluate(
        &self,
        label: &str,
        session: &StageSession<'_>,
        candidates: &[SolutionRecord],
        plan: &ModePlan,
    ) -> Result<Vec<Slot>> {
        let shards = partition_even(candidates.len(), self.processors);
        let scripts: Vec<Script> = shards
            .iter()
            .map(|r| session.evaluation(&candidates[r.clone()], plan))
            .collect();
        debug!(
            label,
            candidates = candidates.len(),
            shards = scripts.len(),
            mode = plan.name,
            "evaluating"
        );
        self.collect(label, &scripts)
    }

    /// Run one script on a single solver instance.
    pub fn run_single(&self, label: &str, script: Script) -> Result<Vec<Slot>> {
        self.collect(label, std::slice::from_ref(&script))
    }

    fn collect(&self, label: &str, scripts: &[Script]) -> Result<Vec<Slot>> {
        if scripts.is_empty() {
            return Ok(Vec::new());
        }
        let outputs = self.minimizer.run(label, scripts)?;
        if outputs.len() != scripts.len() {
            return Err(AppError::Process(format!(
                "{label}: {} scripts submitted but {} outputs returned",
                scripts.len(),
                outputs.len()
            )));
        }
        let mut slots = Vec::new();
        for lines in &outputs {
            slots.extend(data_slots(lines)?);
        }
        Ok(slots)
    }
}

/// Solver binary driven through stdin/stdout files in the run directory.
#[derive(Debug, Clone)]
pub struct ProcessMinimizer {
    pub program: PathBuf,
    pub work_dir: PathBuf,
}

impl ProcessMinimizer {
    pub fn new(program: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            work_dir: work_dir.into(),
        }
    }

    fn paths(&self, label: &str, shard: usize) -> (PathBuf, PathBuf) {
        let stem = format!("{label}-{shard}");
        (
            self.work_dir.join(format!("{stem}.inp")),
            self.work_dir.join(format!("{stem}.out")),
        )
    }

    fn spawn(&self, input: &Path, output: &Path) -> Result<Child> {
        let stdin = File::open(input)
            .map_err(|e| AppError::io(format!("failed to open '{}': {e}", input.display())))?;
        let stdout = File::create(output)
            .map_err(|e| AppError::io(format!("failed to create '{}': {e}", output.display())))?;
        ProcessCommand::new(&self.program)
            .current_dir(&self.work_dir)
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                AppError::Process(format!("failed to start '{}': {e}", self.program.display()))
            })
    }
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path)
        .map_err(|e| AppError::io(format!("failed to open '{}': {e}", path.display())))?;
    BufReader::new(file)
        .lines()
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| AppError::io(format!("failed to read '{}': {e}", path.display())))
}

/// Children of one solver run. Whatever is still held on drop is killed and
/// reaped, so an aborted launch leaves no solver writing into the run directory.
struct RunningShards {
    jobs: Vec<(Child, PathBuf)>,
}

impl RunningShards {
    fn join(mut self, label: &str) -> Result<Vec<PathBuf>> {
        let mut outputs = Vec::with_capacity(self.jobs.len());
        let mut failure = None;
        let jobs = std::mem::take(&mut self.jobs);
        for (shard, (mut child, output)) in jobs.into_iter().enumerate() {
            match child.wait() {
                Ok(status) if status.success() => outputs.push(output),
                Ok(status) => {
                    failure.get_or_insert(format!("{label} shard {shard} exited with {status}"));
                }
                Err(e) => {
                    failure.get_or_insert(format!("{label} shard {shard}: {e}"));
                }
            }
        }
        match failure {
            Some(msg) => Err(AppError::Process(msg)),
            None => Ok(outputs),
        }
    }
}

impl Drop for RunningShards {
    fn drop(&mut self) {
        if self.jobs.is_empty() {
            return;
        }
        warn!(shards = self.jobs.len(), "stopping solver shards of an aborted run");
        for (child, _) in &mut self.jobs {
            // kill fails on an already exited child; wait reaps it either way
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Minimizer for ProcessMinimizer {
    fn run(&self, label: &str, scripts: &[Script]) -> Result<Vec<Vec<String>>> {
        let started = Instant::now();
        let mut running = RunningShards {
            jobs: Vec::with_capacity(scripts.len()),
        };
        for (shard, script) in scripts.iter().enumerate() {
            let (input, output) = self.paths(label, shard);
            fs::write(&input, script.render())
                .map_err(|e| AppError::io(format!("failed to write '{}': {e}", input.display())))?;
            let child = self.spawn(&input, &output)?;
            running.jobs.push((child, output));
        }

        // join all shards before reading any output
        let outputs = running.join(label)?;
        info!(
            label,
            shards = scripts.len(),
            elapsed_s = started.elapsed().as_secs_f64(),
            "solver run finished"
        );
        outputs.iter().map(|p| read_lines(p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn partition_covers_every_item_once() {
        let shards = partition_even(10, 3);
        assert_eq!(shards, vec![0..4, 4..7, 7..10]);
        let total: usize = shards.iter().map(|r| r.len()).sum();
        assert_eq!(total, 10);
    }

    #[test]
    fn partition_skips_empty_shards() {
        assert_eq!(partition_even(2, 4), vec![0..1, 1..2]);
        assert!(partition_even(0, 3).is_empty());
        assert_eq!(partition_even(5, 0), vec![0..5]);
    }

    struct Echo {
        seen: Mutex<Vec<usize>>,
    }

    impl Minimizer for Echo {
        fn run(&self, _: &str, scripts: &[Script]) -> Result<Vec<Vec<String>>> {
            let mut seen = self.seen.lock().unwrap();
            Ok(scripts
                .iter()
                .map(|s| {
                    seen.push(s.commands.len());
                    (0..s.expected_data_lines())
                        .flat_map(|i| vec!["ok".to_string(), format!("{i}")])
                        .collect()
                })
                .collect())
        }
    }

    #[test]
    fn slots_are_concatenated_in_shard_order() {
        let echo = Echo {
            seen: Mutex::new(Vec::new()),
        };
        let bridge = MinimizerBridge::new(&echo, 2);
        let mut script = Script::default();
        script.push(crate::solver::protocol::Command::GetGlobalMisfit);
        let slots = bridge.run_single("probe", script).unwrap();
        assert_eq!(slots, vec![Slot::Data("0".into())]);
        assert_eq!(echo.seen.lock().unwrap().len(), 1);
    }

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rapidinv-bridge-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Processes whose working directory is `dir`.
    #[cfg(target_os = "linux")]
    fn processes_in(dir: &Path) -> Vec<String> {
        let dir = fs::canonicalize(dir).unwrap();
        fs::read_dir("/proc")
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().chars().all(|c| c.is_ascii_digit()))
            .filter(|e| fs::read_link(e.path().join("cwd")).is_ok_and(|cwd| cwd == dir))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_launch_stops_the_shards_already_running() {
        use std::os::unix::fs::PermissionsExt;

        let dir = scratch("abort");
        let program = dir.join("slow-solver.sh");
        fs::write(&program, "#!/bin/sh\nexec sleep 30\n").unwrap();
        fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();
        // the second shard's input path is a directory, so writing it fails
        fs::create_dir(dir.join("job-1.inp")).unwrap();

        let minimizer = ProcessMinimizer::new(&program, &dir);
        let mut script = Script::default();
        script.push(crate::solver::protocol::Command::GetGlobalMisfit);
        let started = Instant::now();
        let err = minimizer.run("job", &[script.clone(), script]).unwrap_err();

        assert!(matches!(err, AppError::Io(ref m) if m.contains("job-1.inp")), "{err:?}");
        assert!(dir.join("job-0.out").exists());
        assert!(processes_in(&dir).is_empty(), "{:?}", processes_in(&dir));
        assert!(started.elapsed().as_secs() < 20);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn shards_are_joined_and_read_in_order() {
        let dir = scratch("join");
        let minimizer = ProcessMinimizer::new("cat", &dir);
        let mut first = Script::default();
        first.push(crate::solver::protocol::Command::GetGlobalMisfit);
        let mut second = first.clone();
        second.push(crate::solver::protocol::Command::GetGlobalMisfit);

        let outputs = minimizer.run("echo", &[first.clone(), second.clone()]).unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].len(), first.render().lines().count());
        assert_eq!(outputs[1].len(), second.render().lines().count());
        let _ = fs::remove_dir_all(&dir);
    }
}
