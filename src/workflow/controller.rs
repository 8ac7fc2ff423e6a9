use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use super::event::Observer;
use super::state::{RunContext, State, StateHandle, StateStatus};
use super::states::Command;
use crate::dependency::DependencyManager;
use crate::lease::{Lease, LeaseManager};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Runs one named state sequence under a lease.
///
/// The dependency gate runs first, then the lease is created and acquired,
/// then the states run strictly one after another. The lease is released on
/// every path once it was acquired, and a lease lost to a failed renewal
/// stops the sequence before the next state.
pub struct StateController {
    name: String,
    run_id: Uuid,
    states: Vec<StateHandle>,
    status: ControllerStatus,
    leases: Arc<LeaseManager>,
    dependencies: Option<(Arc<DependencyManager>, Vec<String>)>,
    context: RunContext,
}

impl StateController {
    pub fn new(name: impl Into<String>, leases: Arc<LeaseManager>, context: RunContext) -> Self {
        Self {
            name: name.into(),
            run_id: Uuid::new_v4(),
            states: Vec::new(),
            status: ControllerStatus::Pending,
            leases,
            dependencies: None,
            context,
        }
    }

    /// Controller for `command` with its fixed state sequence.
    pub fn for_command(command: Command, leases: Arc<LeaseManager>, context: RunContext) -> Self {
        command
            .sequence()
            .into_iter()
            .fold(Self::new(command.sequence_name(), leases, context), |controller, kind| {
                controller.with_state(kind.build())
            })
    }

    pub fn with_state(mut self, state: Box<dyn State>) -> Self {
        self.states.push(StateHandle::new(state));
        self
    }

    /// Gate the run on `required` binaries being present.
    pub fn with_dependencies(mut self, manager: Arc<DependencyManager>, required: Vec<String>) -> Self {
        self.dependencies = Some((manager, required));
        self
    }

    /// Subscribe `observer` to every state, after any earlier subscribers.
    pub fn subscribe(&mut self, observer: Arc<dyn Observer>) {
        for state in &mut self.states {
            state.subscribe(observer.clone());
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ControllerStatus {
        self.status
    }

    pub fn state_names(&self) -> Vec<String> {
        self.states.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn state_statuses(&self) -> Vec<(String, StateStatus)> {
        self.states
            .iter()
            .map(|s| (s.name().to_string(), s.status()))
            .collect()
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub async fn run(&mut self) -> Result<()> {
        info!("Running {} ({})", self.name, self.run_id);
        match self.prepare().await {
            Ok(lease) => self.run_under(lease).await,
            Err(e) => {
                error!("{} could not start: {}", self.name, e);
                self.status = ControllerStatus::Failed;
                Err(e)
            }
        }
    }

    async fn prepare(&mut self) -> Result<Lease> {
        if let Some((manager, required)) = &self.dependencies {
            manager.check_all(required).await?;
        }
        let lease = self.leases.create().await?;
        lease.acquire().await?;
        self.context
            .set_namespace(lease.namespace().map(str::to_string));
        Ok(lease)
    }

    async fn run_under(&mut self, lease: Lease) -> Result<()> {
        self.status = ControllerStatus::Running;
        let result = self.run_states(&lease).await;
        let released = lease.release().await;

        match result {
            Ok(()) => {
                if let Err(release_error) = released {
                    self.status = ControllerStatus::Failed;
                    error!("{} failed to release its lease: {}", self.name, release_error);
                    return Err(release_error);
                }
                self.status = ControllerStatus::Succeeded;
                info!("{} succeeded", self.name);
                Ok(())
            }
            Err(e) => {
                if let Err(release_error) = released {
                    warn!("Failed to release lease after error: {}", release_error);
                }
                self.status = ControllerStatus::Failed;
                error!("{} failed: {}", self.name, e);
                Err(e)
            }
        }
    }

    async fn run_states(&mut self, lease: &Lease) -> Result<()> {
        for state in &mut self.states {
            lease.ensure_held()?;
            state.run(&self.context).await?;
        }
        // a lease lost during the last state still fails the run
        lease.ensure_held()
    }
}
