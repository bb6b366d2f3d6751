use std::collections::BTreeMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::{Result, SnapshotError};

/// Where a command's standard output goes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputTarget {
    Truncate(String),
    Append(String),
}

/// A program invocation with its arguments and redirections. Nothing here is
/// ever handed to a shell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<String>,
    pub stdout: Option<OutputTarget>,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), args: Vec::new(), env: Vec::new(), stdin: None, stdout: None }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin_from(mut self, path: impl Into<String>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    pub fn stdout_to(mut self, target: OutputTarget) -> Self {
        self.stdout = Some(target);
        self
    }

    /// True when `value` is passed as an argument on its own.
    #[cfg(test)]
    pub fn has_arg(&self, value: &str) -> bool {
        self.args.iter().any(|a| a == value)
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut words: Vec<String> = self
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, shell_words::quote(v)))
            .collect();
        words.push(shell_words::quote(&self.program).into_owned());
        words.extend(self.args.iter().map(|a| shell_words::quote(a).into_owned()));
        if let Some(input) = &self.stdin {
            words.push(format!("< {}", shell_words::quote(input)));
        }
        match &self.stdout {
            Some(OutputTarget::Truncate(p)) => words.push(format!("> {}", shell_words::quote(p))),
            Some(OutputTarget::Append(p)) => words.push(format!(">> {}", shell_words::quote(p))),
            None => {}
        }
        write!(f, "{}", words.join(" "))
    }
}

/// `{placeholder}` to value replacements applied to every part of a command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Substitutions(BTreeMap<String, String>);

impl Substitutions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, placeholder: &str, value: impl Into<String>) {
        self.0.insert(placeholder.to_string(), value.into());
    }

    #[cfg(test)]
    pub fn get(&self, placeholder: &str) -> Option<&str> {
        self.0.get(placeholder).map(String::as_str)
    }

    pub fn apply_str(&self, text: &str) -> String {
        self.0
            .iter()
            .fold(text.to_string(), |acc, (placeholder, value)| acc.replace(placeholder, value))
    }

    pub fn apply(&self, command: &ShellCommand) -> ShellCommand {
        ShellCommand {
            program: self.apply_str(&command.program),
            args: command.args.iter().map(|a| self.apply_str(a)).collect(),
            env: command.env.iter().map(|(k, v)| (k.clone(), self.apply_str(v))).collect(),
            stdin: command.stdin.as_deref().map(|p| self.apply_str(p)),
            stdout: command.stdout.as_ref().map(|t| match t {
                OutputTarget::Truncate(p) => OutputTarget::Truncate(self.apply_str(p)),
                OutputTarget::Append(p) => OutputTarget::Append(self.apply_str(p)),
            }),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[cfg(test)]
    pub fn ok() -> Self {
        Self { success: true, ..Default::default() }
    }

    #[cfg(test)]
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self { success: false, stdout: String::new(), stderr: stderr.into() }
    }

    /// `label: <stderr | stdout | Unknown error>`
    pub fn failure_message(&self, label: &str) -> String {
        let detail = [self.stderr.trim(), self.stdout.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
            .unwrap_or("Unknown error");
        format!("{}: {}", label, detail)
    }
}

/// Runs external programs. Calls block until the program exits.
pub trait CommandExecutor: Send + Sync {
    fn run(&self, command: &ShellCommand) -> Result<CommandOutput>;
}

/// Executes commands as child processes, without a timeout.
#[derive(Default)]
pub struct ProcessExecutor;

impl CommandExecutor for ProcessExecutor {
    fn run(&self, command: &ShellCommand) -> Result<CommandOutput> {
        debug!(program = %command.program, args = command.args.len(), "spawning");

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args);
        for (key, value) in &command.env {
            cmd.env(key, value);
        }

        match &command.stdin {
            Some(input) => cmd.stdin(File::open(input)?),
            None => cmd.stdin(Stdio::null()),
        };
        match &command.stdout {
            Some(OutputTarget::Truncate(p)) => cmd.stdout(File::create(p)?),
            Some(OutputTarget::Append(p)) => {
                cmd.stdout(OpenOptions::new().create(true).append(true).open(p)?)
            }
            None => cmd.stdout(Stdio::piped()),
        };
        cmd.stderr(Stdio::piped());

        let output = cmd.output().map_err(|e| {
            SnapshotError::execution(format!("failed to start {}: {}", command.program, e))
        })?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[cfg(test)]
pub mod testing {
    use std::collections::BTreeMap;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use std::sync::Mutex;

    use super::*;

    /// Records every command and imitates dump, gzip and zcat output on disk.
    #[derive(Default)]
    pub struct RecordingExecutor {
        commands: Mutex<Vec<ShellCommand>>,
        failures: Mutex<BTreeMap<String, String>>,
    }

    impl RecordingExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every run of `program` fail with `stderr`.
        pub fn fail_program(&self, program: &str, stderr: &str) {
            self.failures.lock().unwrap().insert(program.to_string(), stderr.to_string());
        }

        pub fn commands(&self) -> Vec<ShellCommand> {
            self.commands.lock().unwrap().clone()
        }

        pub fn programs(&self) -> Vec<String> {
            self.commands().into_iter().map(|c| c.program).collect()
        }

        fn write_stdout(target: &OutputTarget, bytes: &[u8]) {
            let mut file = match target {
                OutputTarget::Truncate(p) => fs::File::create(p).unwrap(),
                OutputTarget::Append(p) => {
                    OpenOptions::new().create(true).append(true).open(p).unwrap()
                }
            };
            file.write_all(bytes).unwrap();
        }
    }

    impl CommandExecutor for RecordingExecutor {
        fn run(&self, command: &ShellCommand) -> Result<CommandOutput> {
            self.commands.lock().unwrap().push(command.clone());

            let failure = self.failures.lock().unwrap().get(&command.program).cloned();
            let last_arg = command.args.last().cloned().unwrap_or_default();

            match command.program.as_str() {
                "gzip" => {
                    if let Some(stderr) = failure {
                        fs::write(format!("{}.gz", last_arg), b"partial").unwrap();
                        return Ok(CommandOutput::failed(stderr));
                    }
                    let content = fs::read(&last_arg).unwrap();
                    fs::write(format!("{}.gz", last_arg), content).unwrap();
                    fs::remove_file(&last_arg).unwrap();
                    Ok(CommandOutput::ok())
                }
                "zcat" => {
                    let content = fs::read(&last_arg).unwrap();
                    if let Some(target) = &command.stdout {
                        Self::write_stdout(target, &content);
                    }
                    Ok(CommandOutput::ok())
                }
                _ => {
                    if let Some(target) = &command.stdout {
                        let line = format!("-- {} {}\n", command.program, command.args.join(" "));
                        Self::write_stdout(target, line.as_bytes());
                    }
                    match failure {
                        Some(stderr) => Ok(CommandOutput::failed(stderr)),
                        None => Ok(CommandOutput::ok()),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitutions_reach_every_part() {
        let cmd = ShellCommand::new("pg_dump")
            .env("PGPASSFILE", "{credentials_file}")
            .args(["-h", "{host}", "{database}"])
            .stdout_to(OutputTarget::Append("/tmp/{database}.sql".into()));

        let mut subs = Substitutions::new();
        subs.insert("{credentials_file}", "/scratch/pgpass");
        subs.insert("{host}", "db.internal");
        subs.insert("{database}", "app");

        let resolved = subs.apply(&cmd);
        assert_eq!(resolved.env, vec![("PGPASSFILE".to_string(), "/scratch/pgpass".to_string())]);
        assert_eq!(resolved.args, vec!["-h", "db.internal", "app"]);
        assert_eq!(resolved.stdout, Some(OutputTarget::Append("/tmp/app.sql".into())));
        // original is left untouched
        assert_eq!(cmd.args[1], "{host}");
    }

    #[test]
    fn test_display_quotes_arguments() {
        let cmd = ShellCommand::new("mysql")
            .arg("-e")
            .arg("UPDATE users SET name = 'x'")
            .stdin_from("/tmp/in.sql");
        let rendered = cmd.to_string();
        let words = shell_words::split(&rendered).unwrap();
        assert_eq!(words, vec!["mysql", "-e", "UPDATE users SET name = 'x'", "<", "/tmp/in.sql"]);
    }

    #[test]
    fn test_failure_message_fallbacks() {
        let both = CommandOutput { success: false, stdout: "out".into(), stderr: "err\n".into() };
        assert_eq!(both.failure_message("Command failed"), "Command failed: err");

        let stdout_only = CommandOutput { success: false, stdout: "out".into(), stderr: " ".into() };
        assert_eq!(stdout_only.failure_message("Command failed"), "Command failed: out");

        let neither = CommandOutput::default();
        assert_eq!(neither.failure_message("gzip command failed"), "gzip command failed: Unknown error");
    }

    #[cfg(unix)]
    #[test]
    fn test_process_executor_redirects_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let out_str = out.to_string_lossy().to_string();

        let exec = ProcessExecutor;
        let first = ShellCommand::new("echo").arg("one").stdout_to(OutputTarget::Truncate(out_str.clone()));
        let second = ShellCommand::new("echo").arg("two").stdout_to(OutputTarget::Append(out_str));
        assert!(exec.run(&first).unwrap().success);
        assert!(exec.run(&second).unwrap().success);

        assert_eq!(std::fs::read_to_string(&out).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn test_process_executor_missing_program() {
        let err = ProcessExecutor
            .run(&ShellCommand::new("definitely-not-a-real-program-xyz"))
            .unwrap_err();
        assert!(matches!(err, SnapshotError::Execution(_)));
    }
}
