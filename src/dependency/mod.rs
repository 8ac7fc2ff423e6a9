// Pre-flight gate for the external binaries a run needs.

pub mod binary;

pub use binary::BinaryDependency;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::debug;

use crate::{Error, Result};

#[async_trait]
pub trait DependencyChecker: Send + Sync + std::fmt::Debug {
    /// `true` once the dependency is present at a satisfactory version,
    /// installing it first when `should_install` allows.
    async fn check_version(&self, should_install: bool) -> Result<bool>;
}

/// One independent check, titled for progress output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyTask {
    pub title: String,
    pub name: String,
}

#[derive(Debug, Default)]
pub struct DependencyManager {
    checkers: BTreeMap<String, Arc<dyn DependencyChecker>>,
}

impl DependencyManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checker(mut self, name: impl Into<String>, checker: Arc<dyn DependencyChecker>) -> Self {
        self.checkers.insert(name.into(), checker);
        self
    }

    pub fn register(&mut self, name: impl Into<String>, checker: Arc<dyn DependencyChecker>) {
        self.checkers.insert(name.into(), checker);
    }

    /// Fails with `Error::Dependency` unless `name` is registered and
    /// satisfied. An unknown name is a failure, not a skip.
    pub async fn check_dependency(&self, name: &str, should_install: bool) -> Result<()> {
        debug!("Checking for dependency: {}", name);
        let satisfied = match self.checkers.get(name) {
            Some(checker) => checker.check_version(should_install).await?,
            None => false,
        };
        if !satisfied {
            return Err(Error::Dependency {
                name: name.to_string(),
            });
        }
        debug!("Dependency '{}' is found", name);
        Ok(())
    }

    pub fn task_check_dependencies(&self, names: &[String]) -> Vec<DependencyTask> {
        names
            .iter()
            .map(|name| DependencyTask {
                title: format!(
                    "Check dependency: {name} [OS: {}, Arch: {}]",
                    std::env::consts::OS,
                    std::env::consts::ARCH
                ),
                name: name.clone(),
            })
            .collect()
    }

    /// Run every check concurrently; the first failure wins.
    pub async fn check_all(&self, names: &[String]) -> Result<()> {
        let tasks = self.task_check_dependencies(names);
        try_join_all(tasks.iter().map(|task| async move {
            debug!("{}", task.title);
            self.check_dependency(&task.name, true).await
        }))
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::StaticDependency;

    #[tokio::test]
    async fn test_registered_dependency_passes() {
        let manager = DependencyManager::new()
            .with_checker("kubectl", Arc::new(StaticDependency::present()));
        manager.check_dependency("kubectl", true).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_dependency_fails() {
        let manager = DependencyManager::new();
        match manager.check_dependency("helm", true).await {
            Err(Error::Dependency { name }) => assert_eq!(name, "helm"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_install_only_when_allowed() {
        let missing = Arc::new(StaticDependency::installable());
        let manager = DependencyManager::new().with_checker("helm", missing.clone());

        assert!(manager.check_dependency("helm", false).await.is_err());
        assert_eq!(missing.installs(), 0);
        manager.check_dependency("helm", true).await.unwrap();
        assert_eq!(missing.installs(), 1);
    }

    #[tokio::test]
    async fn test_check_all_reports_first_missing() {
        let manager = DependencyManager::new()
            .with_checker("kubectl", Arc::new(StaticDependency::present()))
            .with_checker("helm", Arc::new(StaticDependency::absent()));

        let names = vec!["kubectl".to_string(), "helm".to_string()];
        let tasks = manager.task_check_dependencies(&names);
        assert_eq!(tasks.len(), 2);
        assert!(tasks[0].title.starts_with("Check dependency: kubectl [OS: "));

        match manager.check_all(&names).await {
            Err(Error::Dependency { name }) => assert_eq!(name, "helm"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
