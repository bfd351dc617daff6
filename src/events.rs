//! Workflow notifications published to observers

use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{ApprovalParty, GateDecision, ProvisioningStage};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    ProvisioningStarted { batch_id: String },
    AdminVmProvisioned { batch_id: String, instance_id: String },
    ConsoleLaunched { batch_id: String, instance_id: String },
    CloningStarted { batch_id: String, count: u32 },
    Cloned { batch_id: String, count: usize },
    StageFailed { batch_id: String, stage: ProvisioningStage, reason: String },
    ApprovalRequested { batch_id: String },
    GateDecided { batch_id: String, party: ApprovalParty, decision: GateDecision },
    BatchActivated { batch_id: String },
    WorkflowReset { batch_id: String },
}

impl WorkflowEvent {
    pub fn batch_id(&self) -> &str {
        match self {
            WorkflowEvent::ProvisioningStarted { batch_id }
            | WorkflowEvent::AdminVmProvisioned { batch_id, .. }
            | WorkflowEvent::ConsoleLaunched { batch_id, .. }
            | WorkflowEvent::CloningStarted { batch_id, .. }
            | WorkflowEvent::Cloned { batch_id, .. }
            | WorkflowEvent::StageFailed { batch_id, .. }
            | WorkflowEvent::ApprovalRequested { batch_id }
            | WorkflowEvent::GateDecided { batch_id, .. }
            | WorkflowEvent::BatchActivated { batch_id }
            | WorkflowEvent::WorkflowReset { batch_id } => batch_id,
        }
    }
}

/// Cloneable publishing handle
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: WorkflowEvent) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }
}
