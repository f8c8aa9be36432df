use std::fmt;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result};

const MASK: &str = "***";

/// `-D` system property handed to the analysis JVM.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SystemProperty {
    pub(crate) key: String,
    pub(crate) value: String,
    pub(crate) secret: bool,
}

impl SystemProperty {
    pub(crate) fn plain(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            secret: false,
        }
    }

    pub(crate) fn secret(key: &str, value: &str) -> Self {
        Self {
            secret: true,
            ..Self::plain(key, value)
        }
    }
}

/// Command line for one run of the analysis jar.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ToolInvocation {
    pub(crate) runtime: String,
    pub(crate) properties: Vec<SystemProperty>,
    pub(crate) jar: PathBuf,
    pub(crate) tool_args: Vec<String>,
}

impl ToolInvocation {
    /// Arguments passed to the runtime. Secret properties are left out; they
    /// reach the child through [`ToolInvocation::env`] only.
    pub(crate) fn args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.properties.len() + self.tool_args.len() + 2);
        for property in self.properties.iter().filter(|property| !property.secret) {
            args.push(format!("-D{}={}", property.key, property.value));
        }
        args.push("-jar".to_string());
        args.push(self.jar.display().to_string());
        args.extend(self.tool_args.iter().cloned());
        args
    }

    /// Variables set on the child process only, never on this process.
    pub(crate) fn env(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties
            .iter()
            .map(|property| (property.key.as_str(), property.value.as_str()))
    }
}

/// Loggable command line with secret values masked.
impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for property in self.properties.iter().filter(|property| property.secret) {
            write!(f, "{}={MASK} ", property.key)?;
        }
        write!(f, "{}", self.runtime)?;
        for arg in self.args() {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Executes the analysis tool to completion.
pub(crate) trait ToolRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<()>;
}

/// Runs the tool as a child process sharing this process's stdout and stderr.
pub(crate) struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<()> {
        let status = Command::new(&invocation.runtime)
            .args(invocation.args())
            .envs(invocation.env())
            .status()
            .with_context(|| format!("failed to start {}", invocation.runtime))?;
        if !status.success() {
            anyhow::bail!("analysis process exited with {status}");
        }
        Ok(())
    }
}
