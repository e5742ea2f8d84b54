//! One external-program invocation and its outcome.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

/// An external program run on one input, writing one output.
///
/// The job is complete when `output` exists after execution; there is no
/// other status. Any `output` left from an earlier run is removed before the
/// program starts.
///
/// The program may write `output` itself. Otherwise its standard output
/// becomes `output` when non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub input: PathBuf,
    pub output: PathBuf,
    pub executable: PathBuf,
    pub args: Vec<String>,
    /// Pass `input` before `args` instead of after them.
    pub arg_first: bool,
}

/// What happened to one job once the scheduler barrier returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Whether `output` exists. The only success criterion.
    pub produced: bool,
    /// Process exit code when it is known. Diagnostic only.
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

impl JobOutcome {
    /// Outcome derived from the filesystem alone.
    pub fn observe(job: &Job, exit_code: Option<i32>, duration_ms: u64) -> Self {
        Self {
            input: job.input.clone(),
            output: job.output.clone(),
            produced: job.output_exists(),
            exit_code,
            duration_ms,
        }
    }
}

impl Job {
    pub fn new(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        executable: impl Into<PathBuf>,
        args: Vec<String>,
    ) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            executable: executable.into(),
            args,
            arg_first: false,
        }
    }

    /// Put the input path first on the command line.
    pub fn input_first(mut self) -> Self {
        self.arg_first = true;
        self
    }

    /// Ordered command-line arguments, executable excluded.
    pub fn argv(&self) -> Vec<OsString> {
        let args = self.args.iter().map(OsString::from);
        let input = std::iter::once(self.input.clone().into_os_string());
        if self.arg_first {
            input.chain(args).collect()
        } else {
            args.chain(input).collect()
        }
    }

    pub fn output_exists(&self) -> bool {
        self.output.exists()
    }

    /// Shell line running the job in a batch script.
    ///
    /// Same rules as [`Job::execute`]: `output` is removed first, and standard
    /// output goes to a temporary file that becomes `output` only when
    /// non-empty and the program did not write `output` itself.
    pub fn shell_line(&self) -> String {
        let mut words = vec![shell_quote(&self.executable.to_string_lossy())];
        words.extend(self.argv().iter().map(|arg| shell_quote(&arg.to_string_lossy())));

        let output = self.output.to_string_lossy();
        let partial = format!("{}.partial", output);
        format!(
            "rm -f {out}; {cmd} > {tmp}; if [ ! -e {out} ] && [ -s {tmp} ]; then mv {tmp} {out}; else rm -f {tmp}; fi",
            cmd = words.join(" "),
            tmp = shell_quote(&partial),
            out = shell_quote(&output),
        )
    }

    /// Run the job as a child process.
    ///
    /// Captured stdout is written to `output` when non-empty, unless the
    /// program wrote `output` itself. Spawn errors, non-zero exits and
    /// timeouts are logged, never returned.
    pub async fn execute(&self, timeout: Option<Duration>) -> JobOutcome {
        let start = Instant::now();

        if let Err(e) = tokio::fs::remove_file(&self.output).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(job = %self.input.display(), error = %e, "failed to remove stale output");
            }
        }

        let child = Command::new(&self.executable)
            .args(self.argv())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!(job = %self.input.display(), error = %e, "failed to start job");
                return JobOutcome::observe(self, None, start.elapsed().as_millis() as u64);
            }
        };

        let output = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        job = %self.input.display(),
                        timeout_secs = limit.as_secs(),
                        "job timed out and was killed"
                    );
                    return JobOutcome::observe(self, None, start.elapsed().as_millis() as u64);
                }
            },
            None => child.wait_with_output().await,
        };

        let exit_code = match output {
            Ok(output) => {
                if !output.stdout.is_empty() && !self.output_exists() {
                    if let Err(e) = tokio::fs::write(&self.output, &output.stdout).await {
                        warn!(job = %self.input.display(), error = %e, "failed to write job output");
                    }
                }
                if !output.status.success() {
                    debug!(
                        job = %self.input.display(),
                        code = ?output.status.code(),
                        stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                        "job exited with failure status"
                    );
                }
                output.status.code()
            }
            Err(e) => {
                warn!(job = %self.input.display(), error = %e, "failed to wait for job");
                None
            }
        };

        JobOutcome::observe(self, exit_code, start.elapsed().as_millis() as u64)
    }
}

/// Quote a word for POSIX shells.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:,+@%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// `path` with its extension replaced, e.g. `model_1.pdb` -> `model_1.con`.
pub fn swap_extension(path: &Path, extension: &str) -> PathBuf {
    path.with_extension(extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(arg_first: bool) -> Job {
        let job = Job::new(
            "/data/model_1.pdb",
            "/data/model_1.con",
            "/opt/fcc/contact_fcc",
            vec!["5.0".to_string()],
        );
        if arg_first {
            job.input_first()
        } else {
            job
        }
    }

    #[test]
    fn test_argv_order() {
        assert_eq!(job(true).argv(), vec![OsString::from("/data/model_1.pdb"), OsString::from("5.0")]);
        assert_eq!(job(false).argv(), vec![OsString::from("5.0"), OsString::from("/data/model_1.pdb")]);
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/data/model_1.pdb"), "/data/model_1.pdb");
        assert_eq!(shell_quote("with space"), "'with space'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_shell_line_redirects_through_partial_file() {
        let line = job(true).shell_line();
        assert!(line.starts_with(
            "rm -f /data/model_1.con; /opt/fcc/contact_fcc /data/model_1.pdb 5.0 > /data/model_1.con.partial;"
        ));
        assert!(line.contains("[ ! -e /data/model_1.con ]"));
        assert!(line.contains("mv /data/model_1.con.partial /data/model_1.con"));
    }

    #[test]
    fn test_swap_extension() {
        assert_eq!(swap_extension(Path::new("a/model_1.pdb"), "con"), PathBuf::from("a/model_1.con"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_writes_stdout_to_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        std::fs::write(&input, "A 1 B 2\n").unwrap();
        let job = Job::new(&input, dir.path().join("out.txt"), "cat", vec![]);

        let outcome = job.execute(None).await;
        assert!(outcome.produced);
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(std::fs::read_to_string(dir.path().join("out.txt")).unwrap(), "A 1 B 2\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_empty_stdout_produces_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("empty.txt");
        std::fs::write(&input, "").unwrap();
        let job = Job::new(&input, dir.path().join("out.txt"), "cat", vec![]);

        let outcome = job.execute(None).await;
        assert!(!outcome.produced);
        assert_eq!(outcome.exit_code, Some(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stale_output_is_removed_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("empty.txt");
        std::fs::write(&input, "").unwrap();
        let output = dir.path().join("out.txt");
        std::fs::write(&output, "from an earlier run\n").unwrap();
        let job = Job::new(&input, &output, "cat", vec![]);

        let outcome = job.execute(None).await;
        assert!(!outcome.produced);
        assert!(!output.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_written_by_program_is_kept() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("tool.sh");
        // writes its result next to the input and chatters on stdout
        std::fs::write(&tool, "#!/bin/sh\necho result > \"$1.out\"\necho progress\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        let input = dir.path().join("in.txt");
        let job = Job::new(&input, dir.path().join("in.txt.out"), &tool, vec![]);

        let outcome = job.execute(None).await;
        assert!(outcome.produced);
        assert_eq!(std::fs::read_to_string(dir.path().join("in.txt.out")).unwrap(), "result\n");
    }

    #[tokio::test]
    async fn test_missing_executable_is_an_outcome_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let job = Job::new(
            dir.path().join("in.pdb"),
            dir.path().join("out.con"),
            dir.path().join("no_such_tool"),
            vec![],
        );

        let outcome = job.execute(None).await;
        assert!(!outcome.produced);
        assert_eq!(outcome.exit_code, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_job() {
        let dir = tempfile::tempdir().unwrap();
        let job = Job::new("10", dir.path().join("out.txt"), "sleep", vec![]);

        let outcome = job.execute(Some(Duration::from_millis(100))).await;
        assert!(!outcome.produced);
        assert_eq!(outcome.exit_code, None);
        assert!(outcome.duration_ms < 5_000);
    }
}
