//! Context snapshot read by the rule table

use serde::Serialize;

use super::Location;
use crate::models::{Batch, BatchStatus, ProvisioningStage, ProvisioningState};
use crate::store::EntityStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainerVmStatus {
    #[default]
    NotProvisioned,
    Provisioning,
    Provisioned,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloneStatus {
    #[default]
    NotStarted,
    Cloning,
    Cloned,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalProgress {
    #[default]
    NotRequested,
    Pending,
    Rejected,
    Approved,
}

/// Split the workflow state into trainer and clone halves.
pub fn workflow_status(state: &ProvisioningState) -> (TrainerVmStatus, CloneStatus) {
    match state {
        ProvisioningState::NotProvisioned => (TrainerVmStatus::NotProvisioned, CloneStatus::NotStarted),
        ProvisioningState::Provisioning => (TrainerVmStatus::Provisioning, CloneStatus::NotStarted),
        ProvisioningState::Provisioned => (TrainerVmStatus::Provisioned, CloneStatus::NotStarted),
        ProvisioningState::Cloning => (TrainerVmStatus::Provisioned, CloneStatus::Cloning),
        ProvisioningState::Cloned => (TrainerVmStatus::Provisioned, CloneStatus::Cloned),
        ProvisioningState::Failed {
            stage: ProvisioningStage::Provision,
            ..
        } => (TrainerVmStatus::Failed, CloneStatus::NotStarted),
        ProvisioningState::Failed {
            stage: ProvisioningStage::Clone,
            ..
        } => (TrainerVmStatus::Provisioned, CloneStatus::Failed),
    }
}

/// Flags describing the batch on screen
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct BatchFlags {
    pub batch_id: String,
    /// VM config exists and every entry is complete
    pub has_vms: bool,
    pub has_students: bool,
    pub has_course: bool,
    pub trainer_vm: TrainerVmStatus,
    pub clone: CloneStatus,
    pub vm_entry_count: usize,
    pub approval: ApprovalProgress,
    pub active: bool,
}

impl BatchFlags {
    pub fn from_batch(batch: &Batch) -> Self {
        let config = batch.vm_config.as_ref();
        let (trainer_vm, clone) = config
            .map(|c| workflow_status(&c.state))
            .unwrap_or_default();

        let approval = match config.map(|c| c.approval) {
            Some(a) if a.is_approved() => ApprovalProgress::Approved,
            Some(a) if a.any_rejected() => ApprovalProgress::Rejected,
            Some(a) if a.requested => ApprovalProgress::Pending,
            _ => ApprovalProgress::NotRequested,
        };

        Self {
            batch_id: batch.id.clone(),
            has_vms: config.is_some_and(|c| c.is_complete()),
            has_students: batch.has_students(),
            has_course: batch.has_course(),
            trainer_vm,
            clone,
            vm_entry_count: config.map_or(0, |c| c.templates.len()),
            approval,
            active: batch.status == BatchStatus::Active,
        }
    }
}

/// Derived, read-only view of console state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ContextSnapshot {
    pub has_batches: bool,
    pub has_templates: bool,
    /// Present when the location is a batch details view of a known batch
    pub batch: Option<BatchFlags>,
}

impl ContextSnapshot {
    pub fn capture(store: &EntityStore, location: &Location) -> Self {
        let batch = location
            .batch_id()
            .and_then(|id| store.get_batch(id).ok())
            .map(|b| BatchFlags::from_batch(&b));

        Self {
            has_batches: store.batch_count() > 0,
            has_templates: store.template_count() > 0,
            batch,
        }
    }
}
