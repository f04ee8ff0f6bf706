//! Script executor that runs programs as local child processes.
//!
//! Each request gets its own work directory `<base>/<run>/<service>/<step>`.
//! The input document is written to `bootconf.json` there, the program runs
//! with that directory as its cwd, and whatever it leaves in `bootout.json`
//! becomes the output document. Completion is detected with `try_wait`, so
//! `poll` never blocks.

use super::{Progress, ScriptExecutor, ScriptOutcome, ScriptRequest, TaskId};
use crate::error::RemoteError;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::{debug, info, warn};

pub const INPUT_FILE: &str = "bootconf.json";
pub const OUTPUT_FILE: &str = "bootout.json";
const STDOUT_FILE: &str = "stdout.log";
const STDERR_FILE: &str = "stderr.log";

struct RunningScript {
    child: Child,
    dir: PathBuf,
    program: String,
}

pub struct LocalExecutor {
    base_dir: PathBuf,
    next_task: u64,
    running: HashMap<TaskId, RunningScript>,
}

impl LocalExecutor {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            next_task: 0,
            running: HashMap::new(),
        }
    }

    fn step_dir(&self, request: &ScriptRequest) -> PathBuf {
        self.base_dir
            .join(request.run_id.as_str())
            .join(request.service.as_str())
            .join(request.step.as_str())
    }
}

fn io_error(context: &str, path: &Path, err: std::io::Error) -> RemoteError {
    RemoteError::new(format!("{} {}: {}", context, path.display(), err))
}

/// Split a program reference into command and arguments. A relative command
/// path is anchored at the caller's cwd, since the child runs elsewhere.
fn build_command(program: &str, dir: &Path) -> Result<Command, RemoteError> {
    let mut parts = program.split_whitespace();
    let head = parts
        .next()
        .ok_or_else(|| RemoteError::new("empty program reference"))?;
    let head_path = Path::new(head);
    let resolved = if head.contains('/') && head_path.is_relative() {
        std::env::current_dir()
            .map(|cwd| cwd.join(head_path))
            .map_err(|e| RemoteError::new(format!("cannot resolve {}: {}", head, e)))?
    } else {
        head_path.to_path_buf()
    };
    let mut command = Command::new(resolved);
    command.args(parts).current_dir(dir);
    Ok(command)
}

impl ScriptExecutor for LocalExecutor {
    fn spawn(&mut self, request: ScriptRequest) -> Result<TaskId, RemoteError> {
        let dir = self.step_dir(&request);
        fs::create_dir_all(&dir).map_err(|e| io_error("cannot create", &dir, e))?;

        // A retry must not pick up the output of an earlier attempt.
        let output_path = dir.join(OUTPUT_FILE);
        if output_path.exists() {
            fs::remove_file(&output_path)
                .map_err(|e| io_error("cannot remove", &output_path, e))?;
        }

        let input_path = dir.join(INPUT_FILE);
        let input = serde_json::to_vec_pretty(&request.input)
            .map_err(|e| RemoteError::new(format!("cannot encode input document: {}", e)))?;
        fs::write(&input_path, input).map_err(|e| io_error("cannot write", &input_path, e))?;

        let stdout_path = dir.join(STDOUT_FILE);
        let stderr_path = dir.join(STDERR_FILE);
        let stdout =
            fs::File::create(&stdout_path).map_err(|e| io_error("cannot create", &stdout_path, e))?;
        let stderr =
            fs::File::create(&stderr_path).map_err(|e| io_error("cannot create", &stderr_path, e))?;

        let mut command = build_command(&request.program, &dir)?;
        command
            .env("CLOUDBOOT_HOST", &request.host)
            .env("CLOUDBOOT_SERVICE", request.service.as_str())
            .env("CLOUDBOOT_STEP", request.step.as_str())
            .env("CLOUDBOOT_RUN", request.run_id.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        info!(
            service = %request.service,
            step = %request.step,
            program = %request.program,
            dir = %dir.display(),
            "Spawning script"
        );

        let child = command.spawn().map_err(|e| {
            RemoteError::new(format!("failed to spawn '{}': {}", request.program, e))
        })?;

        let task = TaskId(self.next_task);
        self.next_task += 1;
        self.running.insert(
            task,
            RunningScript {
                child,
                dir,
                program: request.program,
            },
        );
        Ok(task)
    }

    fn poll(&mut self, task: TaskId) -> Result<Progress<ScriptOutcome>, RemoteError> {
        let script = self
            .running
            .get_mut(&task)
            .ok_or_else(|| RemoteError::new(format!("unknown script task {}", task.0)))?;

        let status = match script.child.try_wait() {
            Ok(Some(status)) => status,
            Ok(None) => return Ok(Progress::Pending),
            Err(e) => {
                return Err(RemoteError::new(format!(
                    "cannot query '{}': {}",
                    script.program, e
                )))
            }
        };

        let Some(script) = self.running.remove(&task) else {
            return Err(RemoteError::new(format!("unknown script task {}", task.0)));
        };
        let output_path = script.dir.join(OUTPUT_FILE);
        let output = if output_path.exists() {
            Some(
                fs::read_to_string(&output_path)
                    .map_err(|e| io_error("cannot read", &output_path, e))?,
            )
        } else {
            None
        };
        let stderr = fs::read_to_string(script.dir.join(STDERR_FILE)).unwrap_or_default();

        if status.success() {
            debug!(program = %script.program, "Script finished");
        } else {
            warn!(
                program = %script.program,
                exit_code = ?status.code(),
                "Script exited unsuccessfully"
            );
        }

        Ok(Progress::Done(ScriptOutcome {
            exit_code: status.code(),
            output,
            stderr,
        }))
    }
}

impl Drop for LocalExecutor {
    fn drop(&mut self) {
        for (_, mut script) in self.running.drain() {
            if let Err(e) = script.child.kill() {
                debug!(program = %script.program, error = %e, "Could not kill script");
            }
            let _ = script.child.wait();
        }
    }
}
