//! Command execution abstraction for testability
//!
//! The docker CLI wrappers and the SSH backend run their subprocesses through
//! [`CommandExecutor`] so tests can substitute canned output.

use anyhow::Result;
use std::process::Output;
use std::time::Duration;

/// Abstraction for command execution, enabling mocking in tests
pub trait CommandExecutor: Send + Sync {
    /// Run a command with optional timeout
    fn run_command(&self, program: &str, args: &[&str], timeout: Option<Duration>)
        -> Result<Output>;

    /// Run a command and return stdout as string
    fn run_command_stdout(
        &self,
        program: &str,
        args: &[&str],
        timeout: Option<Duration>,
    ) -> Result<String> {
        let output = self.run_command(program, args, timeout)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Default implementation using real subprocess calls
#[derive(Debug, Clone, Default)]
pub struct RealExecutor;

impl RealExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl CommandExecutor for RealExecutor {
    fn run_command(
        &self,
        program: &str,
        args: &[&str],
        timeout: Option<Duration>,
    ) -> Result<Output> {
        super::command::run_command(program, args, timeout)
    }
}

/// A mock executor for testing that records calls and returns configured responses
/// Available for use in external test crates
pub mod mock {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Recorded command invocation
    #[derive(Clone, Debug)]
    pub struct CommandCall {
        pub program: String,
        pub args: Vec<String>,
    }

    /// Response configuration for mock
    #[derive(Clone, Debug)]
    pub enum MockResponse {
        Success { stdout: String },
        Failure { stderr: String, exit_code: i32 },
        Timeout,
    }

    impl MockResponse {
        pub fn stdout(stdout: impl Into<String>) -> Self {
            MockResponse::Success {
                stdout: stdout.into(),
            }
        }

        pub fn failure(stderr: impl Into<String>) -> Self {
            MockResponse::Failure {
                stderr: stderr.into(),
                exit_code: 1,
            }
        }
    }

    impl Default for MockResponse {
        fn default() -> Self {
            MockResponse::Success {
                stdout: String::new(),
            }
        }
    }

    #[derive(Clone, Debug)]
    struct Expectation {
        program: String,
        args_prefix: Vec<String>,
        response: MockResponse,
    }

    /// Mock executor for testing
    #[derive(Clone, Default)]
    pub struct MockExecutor {
        /// Recorded command invocations
        pub calls: Arc<Mutex<Vec<CommandCall>>>,
        expectations: Arc<Mutex<Vec<Expectation>>>,
        /// Response when no expectation matches
        default_response: Arc<Mutex<MockResponse>>,
    }

    impl MockExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        /// Configure a response for every invocation of a program
        pub fn expect(self, program: &str, response: MockResponse) -> Self {
            self.expect_args(program, &[], response)
        }

        /// Configure a response for invocations whose arguments start with `args_prefix`
        ///
        /// The longest matching prefix wins.
        pub fn expect_args(self, program: &str, args_prefix: &[&str], response: MockResponse) -> Self {
            self.expectations.lock().unwrap().push(Expectation {
                program: program.to_string(),
                args_prefix: args_prefix.iter().map(|s| s.to_string()).collect(),
                response,
            });
            self
        }

        /// Set the default response for unconfigured programs
        pub fn with_default_response(self, response: MockResponse) -> Self {
            *self.default_response.lock().unwrap() = response;
            self
        }

        /// Get all recorded calls
        pub fn get_calls(&self) -> Vec<CommandCall> {
            self.calls.lock().unwrap().clone()
        }

        /// Check if a program was called
        pub fn was_called(&self, program: &str) -> bool {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .any(|c| c.program == program)
        }

        /// Get number of calls to a specific program
        pub fn call_count(&self, program: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.program == program)
                .count()
        }

        /// Calls to `program` whose arguments start with `args_prefix`
        pub fn calls_with_args(&self, program: &str, args_prefix: &[&str]) -> Vec<CommandCall> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.program == program && c.args.starts_with(&to_strings(args_prefix)))
                .cloned()
                .collect()
        }

        fn record_call(&self, program: &str, args: &[&str]) {
            self.calls.lock().unwrap().push(CommandCall {
                program: program.to_string(),
                args: to_strings(args),
            });
        }

        fn get_response(&self, program: &str, args: &[&str]) -> MockResponse {
            let args = to_strings(args);
            self.expectations
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.program == program && args.starts_with(&e.args_prefix))
                .max_by_key(|e| e.args_prefix.len())
                .map(|e| e.response.clone())
                .unwrap_or_else(|| self.default_response.lock().unwrap().clone())
        }
    }

    fn to_strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    fn execute_response(response: MockResponse) -> Result<Output> {
        match response {
            MockResponse::Success { stdout } => Ok(Output {
                status: std::process::ExitStatus::default(),
                stdout: stdout.into_bytes(),
                stderr: Vec::new(),
            }),
            MockResponse::Failure { stderr, exit_code } => {
                anyhow::bail!("Command failed with exit code {:?}: {}", exit_code, stderr)
            }
            MockResponse::Timeout => {
                anyhow::bail!("Command timed out")
            }
        }
    }

    impl CommandExecutor for MockExecutor {
        fn run_command(
            &self,
            program: &str,
            args: &[&str],
            _timeout: Option<Duration>,
        ) -> Result<Output> {
            self.record_call(program, args);
            let response = self.get_response(program, args);
            execute_response(response)
        }
    }
}
