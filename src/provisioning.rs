//! Trainer VM provisioning workflow
//!
//! `NotProvisioned -> Provisioning -> Provisioned -> Cloning -> Cloned`, with
//! `Failed` reachable from either in-flight state. Commands validate and move
//! the batch into the in-flight state synchronously, then hand the external
//! call to a background task. The task's completion only lands if the batch
//! still exists, still carries the same workflow generation, and is still in
//! the in-flight state it left behind.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::events::{EventBus, WorkflowEvent};
use crate::models::*;
use crate::store::EntityStore;
use crate::tasks::BackgroundTasks;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub batch_id: String,
    pub batch_name: String,
    pub vm_type: VmType,
    pub templates: Vec<TemplateAssignment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneRequest {
    pub batch_id: String,
    pub admin: VmInstance,
    pub count: u32,
}

/// External VM backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Bring up the trainer VM.
    async fn provision_admin(&self, request: ProvisionRequest) -> Result<VmInstance>;

    /// Duplicate the configured trainer VM `count` times.
    async fn clone_admin(&self, request: CloneRequest) -> Result<Vec<VmInstance>>;
}

/// Backend that always succeeds after a fixed delay
pub struct SimulatedProvisioner {
    provision_delay: Duration,
    clone_delay: Duration,
}

impl SimulatedProvisioner {
    pub fn new(provision_delay: Duration, clone_delay: Duration) -> Self {
        Self {
            provision_delay,
            clone_delay,
        }
    }
}

#[async_trait]
impl Provisioner for SimulatedProvisioner {
    async fn provision_admin(&self, request: ProvisionRequest) -> Result<VmInstance> {
        tokio::time::sleep(self.provision_delay).await;
        let base = request
            .templates
            .first()
            .map(|t| t.instance_name.trim().to_string())
            .unwrap_or_else(|| slug(&request.batch_name));
        Ok(VmInstance::new(format!("{}-trainer", base), InstanceRole::Admin))
    }

    async fn clone_admin(&self, request: CloneRequest) -> Result<Vec<VmInstance>> {
        tokio::time::sleep(self.clone_delay).await;
        let base = request.admin.name.trim_end_matches("-trainer");
        Ok((1..=request.count)
            .map(|n| VmInstance::new(format!("{}-{:02}", base, n), InstanceRole::Participant))
            .collect())
    }
}

fn slug(name: &str) -> String {
    let slug: String = name
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    slug.trim_matches('-').to_string()
}

/// Handle to the trainer VM console. The trainer configures the VM by hand;
/// nothing about the workflow changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsoleSession {
    pub batch_id: String,
    pub instance_id: String,
    pub instance_name: String,
}

pub struct ProvisioningWorkflow {
    store: Arc<EntityStore>,
    provisioner: Arc<dyn Provisioner>,
    tasks: Arc<BackgroundTasks>,
    events: EventBus,
}

impl ProvisioningWorkflow {
    pub(crate) fn new(
        store: Arc<EntityStore>,
        provisioner: Arc<dyn Provisioner>,
        tasks: Arc<BackgroundTasks>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            provisioner,
            tasks,
            events,
        }
    }

    /// Start provisioning the trainer VM. Valid from `NotProvisioned`, or
    /// from a failed provision as a retry.
    pub fn provision_admin(&self, batch_id: &str) -> Result<()> {
        self.tasks.ensure_running()?;

        let mut dispatch = None;
        self.store.update(batch_id, |batch| {
            let name = batch.name.clone();
            let config = batch.vm_config_mut()?;
            match &config.state {
                ProvisioningState::NotProvisioned
                | ProvisioningState::Failed {
                    stage: ProvisioningStage::Provision,
                    ..
                } => {}
                other => return Err(Error::invalid_state(other, "NotProvisioned")),
            }
            config.ensure_complete()?;

            config.state = ProvisioningState::Provisioning;
            dispatch = Some((
                config.generation,
                ProvisionRequest {
                    batch_id: batch_id.to_string(),
                    batch_name: name,
                    vm_type: config.vm_type,
                    templates: config.templates.clone(),
                },
            ));
            Ok(())
        })
        .inspect_err(|e| tracing::warn!(batch = %batch_id, error = %e, "Provision rejected"))?;

        let Some((generation, request)) = dispatch else {
            return Err(Error::VmConfigMissing(batch_id.to_string()));
        };

        tracing::info!(batch = %batch_id, generation, "Provisioning trainer VM");
        self.events.publish(WorkflowEvent::ProvisioningStarted {
            batch_id: batch_id.to_string(),
        });

        let store = self.store.clone();
        let events = self.events.clone();
        let provisioner = self.provisioner.clone();
        let target = batch_id.to_string();
        self.tasks.spawn(batch_id, move |cancel| async move {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(batch = %target, "Provisioning cancelled");
                    return;
                }
                outcome = provisioner.provision_admin(request) => outcome,
            };
            complete_provision(&store, &events, &target, generation, outcome);
        });

        Ok(())
    }

    /// Open the trainer VM console. Requires a provisioned trainer VM.
    pub fn launch_console(&self, batch_id: &str) -> Result<ConsoleSession> {
        let batch = self.store.get_batch(batch_id)?;
        let config = batch.vm_config()?;
        if !config.state.admin_vm_provisioned() {
            tracing::warn!(batch = %batch_id, state = %config.state, "Console launch rejected");
            return Err(Error::invalid_state(&config.state, "Provisioned"));
        }
        let admin = config
            .admin_instance()
            .ok_or_else(|| Error::Provisioning(format!("batch {} has no trainer VM", batch_id)))?;

        let session = ConsoleSession {
            batch_id: batch_id.to_string(),
            instance_id: admin.id.clone(),
            instance_name: admin.name.clone(),
        };
        tracing::info!(batch = %batch_id, vm = %admin.name, "Trainer console launched");
        self.events.publish(WorkflowEvent::ConsoleLaunched {
            batch_id: batch_id.to_string(),
            instance_id: admin.id.clone(),
        });
        Ok(session)
    }

    /// Clone the trainer VM once per participant. Valid from `Provisioned`,
    /// or from a failed clone as a retry.
    pub fn clone_for_batch(&self, batch_id: &str) -> Result<()> {
        self.tasks.ensure_running()?;

        let mut dispatch = None;
        self.store.update(batch_id, |batch| {
            let config = batch.vm_config_mut()?;
            match &config.state {
                ProvisioningState::Provisioned
                | ProvisioningState::Failed {
                    stage: ProvisioningStage::Clone,
                    ..
                } => {}
                other => return Err(Error::invalid_state(other, "Provisioned")),
            }
            let admin = config
                .admin_instance()
                .cloned()
                .ok_or_else(|| Error::Provisioning("trainer VM record is missing".into()))?;

            config.state = ProvisioningState::Cloning;
            dispatch = Some((
                config.generation,
                CloneRequest {
                    batch_id: batch_id.to_string(),
                    admin,
                    count: config.participant_count,
                },
            ));
            Ok(())
        })
        .inspect_err(|e| tracing::warn!(batch = %batch_id, error = %e, "Clone rejected"))?;

        let Some((generation, request)) = dispatch else {
            return Err(Error::VmConfigMissing(batch_id.to_string()));
        };

        tracing::info!(batch = %batch_id, count = request.count, "Cloning trainer VM");
        self.events.publish(WorkflowEvent::CloningStarted {
            batch_id: batch_id.to_string(),
            count: request.count,
        });

        let store = self.store.clone();
        let events = self.events.clone();
        let provisioner = self.provisioner.clone();
        let target = batch_id.to_string();
        self.tasks.spawn(batch_id, move |cancel| async move {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(batch = %target, "Cloning cancelled");
                    return;
                }
                outcome = provisioner.clone_admin(request) => outcome,
            };
            complete_clone(&store, &events, &target, generation, outcome);
        });

        Ok(())
    }

    /// Re-run whichever stage failed.
    pub fn retry(&self, batch_id: &str) -> Result<()> {
        let batch = self.store.get_batch(batch_id)?;
        let state = &batch.vm_config()?.state;
        match state.failed_stage() {
            Some(ProvisioningStage::Provision) => self.provision_admin(batch_id),
            Some(ProvisioningStage::Clone) => self.clone_for_batch(batch_id),
            None => Err(Error::invalid_state(state, "Failed")),
        }
    }

    /// Throw away the fleet and approvals and start the workflow over.
    /// Pending completions for the batch are cancelled, and any that slip
    /// through are discarded by the generation check.
    pub fn reset_workflow(&self, batch_id: &str) -> Result<()> {
        self.store.update(batch_id, |batch| {
            if batch.status == BatchStatus::Active {
                return Err(Error::invalid_state(batch.status, "Draft or AwaitingApproval"));
            }
            batch.vm_config_mut()?.reset_workflow();
            batch.status = BatchStatus::Draft;
            for student in batch.students.iter_mut() {
                student.vm_status = StudentVmStatus::Unset;
            }
            Ok(())
        })?;
        self.tasks.cancel_batch(batch_id);

        tracing::info!(batch = %batch_id, "Workflow reset");
        self.events.publish(WorkflowEvent::WorkflowReset {
            batch_id: batch_id.to_string(),
        });
        Ok(())
    }
}

fn in_flight<'a>(batch: &'a mut Batch, generation: u64, expected: &ProvisioningState) -> Option<&'a mut VmConfig> {
    batch
        .vm_config
        .as_mut()
        .filter(|c| c.generation == generation && &c.state == expected)
}

pub(crate) fn complete_provision(
    store: &EntityStore,
    events: &EventBus,
    batch_id: &str,
    generation: u64,
    outcome: Result<VmInstance>,
) {
    match outcome {
        Ok(instance) => {
            let instance_id = instance.id.clone();
            let applied = store.apply_if(batch_id, |batch| {
                let Some(config) = in_flight(batch, generation, &ProvisioningState::Provisioning) else {
                    return false;
                };
                config.instances.retain(|i| i.role != InstanceRole::Admin);
                config.instances.push(instance);
                config.state = ProvisioningState::Provisioned;
                true
            });
            if applied {
                tracing::info!(batch = %batch_id, vm = %instance_id, "Trainer VM provisioned");
                events.publish(WorkflowEvent::AdminVmProvisioned {
                    batch_id: batch_id.to_string(),
                    instance_id,
                });
            } else {
                tracing::debug!(batch = %batch_id, "Stale provisioning completion ignored");
            }
        }
        Err(e) => fail_stage(store, events, batch_id, generation, ProvisioningStage::Provision, e),
    }
}

pub(crate) fn complete_clone(
    store: &EntityStore,
    events: &EventBus,
    batch_id: &str,
    generation: u64,
    outcome: Result<Vec<VmInstance>>,
) {
    match outcome {
        Ok(clones) => {
            let count = clones.len();
            let applied = store.apply_if(batch_id, |batch| {
                let student_ids: Vec<String> = batch.students.iter().map(|s| s.id.clone()).collect();
                let Some(config) = in_flight(batch, generation, &ProvisioningState::Cloning) else {
                    return false;
                };
                config.instances.retain(|i| i.role != InstanceRole::Participant);

                let mut assigned = Vec::new();
                for (n, mut instance) in clones.into_iter().enumerate() {
                    instance.student_id = student_ids.get(n).cloned();
                    if let Some(id) = &instance.student_id {
                        assigned.push(id.clone());
                    }
                    config.instances.push(instance);
                }
                config.state = ProvisioningState::Cloned;

                for student in batch.students.iter_mut() {
                    if assigned.contains(&student.id) {
                        student.vm_status = StudentVmStatus::Running;
                    }
                }
                true
            });
            if applied {
                tracing::info!(batch = %batch_id, count, "Trainer VM cloned");
                events.publish(WorkflowEvent::Cloned {
                    batch_id: batch_id.to_string(),
                    count,
                });
            } else {
                tracing::debug!(batch = %batch_id, "Stale clone completion ignored");
            }
        }
        Err(e) => fail_stage(store, events, batch_id, generation, ProvisioningStage::Clone, e),
    }
}

fn fail_stage(
    store: &EntityStore,
    events: &EventBus,
    batch_id: &str,
    generation: u64,
    stage: ProvisioningStage,
    error: Error,
) {
    let expected = match stage {
        ProvisioningStage::Provision => ProvisioningState::Provisioning,
        ProvisioningStage::Clone => ProvisioningState::Cloning,
    };
    let reason = error.to_string();
    let applied = store.apply_if(batch_id, |batch| {
        let Some(config) = in_flight(batch, generation, &expected) else {
            return false;
        };
        config.state = ProvisioningState::Failed {
            stage,
            reason: reason.clone(),
        };
        true
    });
    if applied {
        tracing::warn!(batch = %batch_id, %stage, error = %reason, "Workflow stage failed");
        events.publish(WorkflowEvent::StageFailed {
            batch_id: batch_id.to_string(),
            stage,
            reason,
        });
    } else {
        tracing::debug!(batch = %batch_id, %stage, "Stale failure ignored");
    }
}
