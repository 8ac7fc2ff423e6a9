use async_trait::async_trait;
use semver::Version;
use tracing::{debug, info, warn};

use super::DependencyChecker;
use crate::shell::ShellRunner;
use crate::{Error, Result};

/// A program on `PATH` that must report at least `minimum` when asked for
/// its version.
#[derive(Debug, Clone)]
pub struct BinaryDependency {
    name: String,
    program: String,
    version_args: Vec<String>,
    minimum: Version,
    /// Command line that installs the binary, if it can be installed.
    install: Option<Vec<String>>,
    shell: ShellRunner,
}

impl BinaryDependency {
    pub fn new(name: impl Into<String>, minimum: Version, shell: ShellRunner) -> Self {
        let name = name.into();
        Self {
            program: name.clone(),
            name,
            version_args: vec!["version".to_string()],
            minimum,
            install: None,
            shell,
        }
    }

    pub fn with_version_args(mut self, args: &[&str]) -> Self {
        self.version_args = args.iter().map(|a| (*a).to_string()).collect();
        self
    }

    pub fn with_install(mut self, command: &[&str]) -> Self {
        self.install = Some(command.iter().map(|a| (*a).to_string()).collect());
        self
    }

    /// `kubectl` and `helm` with the minimum versions the charts need.
    pub fn defaults(shell: &ShellRunner) -> Vec<Self> {
        vec![
            Self::new("kubectl", Version::new(1, 27, 0), shell.clone())
                .with_version_args(&["version", "--client"]),
            Self::new("helm", Version::new(3, 12, 0), shell.clone())
                .with_version_args(&["version", "--short"]),
        ]
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn installed_version(&self) -> Result<Option<Version>> {
        let args: Vec<&str> = self.version_args.iter().map(String::as_str).collect();
        let output = match self.shell.output(&self.program, &args, None).await {
            Ok(output) => output,
            Err(Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        if !output.success() {
            return Ok(None);
        }
        Ok(parse_version(&output.stdout))
    }

    async fn satisfied(&self) -> Result<bool> {
        match self.installed_version().await? {
            Some(version) if version >= self.minimum => {
                debug!("{} {} satisfies >= {}", self.name, version, self.minimum);
                Ok(true)
            }
            Some(version) => {
                warn!("{} {} is older than required {}", self.name, version, self.minimum);
                Ok(false)
            }
            None => Ok(false),
        }
    }
}

/// First `major.minor.patch` in `text`, ignoring a leading `v` and any
/// suffix after the patch number.
pub fn parse_version(text: &str) -> Option<Version> {
    text.split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .filter_map(|token| {
            let mut parts = token.split('.').filter(|p| !p.is_empty());
            let major = parts.next()?.parse().ok()?;
            let minor = parts.next()?.parse().ok()?;
            let patch = parts.next()?.parse().ok()?;
            Some(Version::new(major, minor, patch))
        })
        .next()
}

#[async_trait]
impl DependencyChecker for BinaryDependency {
    async fn check_version(&self, should_install: bool) -> Result<bool> {
        if self.satisfied().await? {
            return Ok(true);
        }
        let Some(install) = self.install.as_ref().filter(|_| should_install) else {
            return Ok(false);
        };
        let Some((program, args)) = install.split_first() else {
            return Ok(false);
        };

        info!("Installing dependency {}", self.name);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.shell.run(program, &args).await?;
        self.satisfied().await
    }
}
