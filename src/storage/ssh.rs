use super::{file_name, BackupObject, StorageBackend};
use crate::config::SshStorageConfig;
use crate::utils::command::shell_quote;
use crate::utils::executor::CommandExecutor;
use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Remote host reached with the `ssh` and `scp` binaries
///
/// Authentication is key based; `BatchMode` makes password prompts fail
/// instead of hanging the run.
pub struct SshStorage {
    executor: Arc<dyn CommandExecutor>,
    host: String,
    port: u16,
    user: String,
    remote_path: String,
    identity_file: Option<String>,
}

impl SshStorage {
    pub fn new(config: &SshStorageConfig, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            host: config.host.clone(),
            port: config.port,
            user: config.user.clone(),
            remote_path: config.remote_path.trim_end_matches('/').to_string(),
            identity_file: config
                .identity_file
                .as_ref()
                .map(|path| path.to_string_lossy().to_string()),
        }
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    fn common_options(&self) -> Vec<&str> {
        let mut options = vec!["-o", "BatchMode=yes", "-o", "StrictHostKeyChecking=accept-new"];
        if let Some(ref identity) = self.identity_file {
            options.push("-i");
            options.push(identity);
        }
        options
    }

    /// Run a shell command on the remote host
    fn remote(&self, command: &str) -> Result<String> {
        let port = self.port.to_string();
        let destination = self.destination();
        let mut args = vec!["-p", port.as_str()];
        args.extend(self.common_options());
        args.push(&destination);
        args.push(command);

        self.executor.run_command_stdout("ssh", &args, None)
    }
}

/// Parse `<mtime> <name>` lines printed by the listing command
fn parse_listing(output: &str) -> Result<Vec<BackupObject>> {
    let mut objects = Vec::new();
    for line in output.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let (mtime, path) = line
            .split_once(' ')
            .with_context(|| format!("Unexpected listing line {:?}", line))?;
        let seconds: i64 = mtime
            .parse()
            .with_context(|| format!("Invalid modification time in {:?}", line))?;
        let modified = Utc
            .timestamp_opt(seconds, 0)
            .single()
            .with_context(|| format!("Invalid modification time in {:?}", line))?;
        let name = path.rsplit('/').next().unwrap_or(path);

        objects.push(BackupObject {
            key: name.to_string(),
            modified,
        });
    }
    Ok(objects)
}

impl StorageBackend for SshStorage {
    fn name(&self) -> &str {
        "SSH"
    }

    fn copy(&self, file: &Path) -> Result<()> {
        let name = file_name(file)?;
        let source = file.to_string_lossy();
        let target = format!("{}:{}/{}", self.destination(), self.remote_path, name);
        let port = self.port.to_string();

        let mut args = vec!["-P", port.as_str()];
        args.extend(self.common_options());
        args.push(&source);
        args.push(&target);

        self.executor
            .run_command("scp", &args, None)
            .with_context(|| format!("Failed to copy {:?} to {}", file, target))?;
        debug!("SSH: Copied {} to {}", name, target);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<BackupObject>> {
        let command = format!(
            "cd {} && for f in {}*; do [ -f \"$f\" ] && [ ! -L \"$f\" ] && stat -c '%Y %n' \"$f\"; done; true",
            shell_quote(&self.remote_path),
            shell_quote(prefix)
        );
        let output = self
            .remote(&command)
            .with_context(|| format!("Failed to list {} on {}", self.remote_path, self.host))?;
        parse_listing(&output)
    }

    fn remove(&self, object: &BackupObject) -> Result<()> {
        let path = format!("{}/{}", self.remote_path, object.key);
        self.remote(&format!("rm -f {}", shell_quote(&path)))
            .with_context(|| format!("Failed to remove {} on {}", path, self.host))?;
        Ok(())
    }
}
