//! VM lab configuration for a batch, including workflow and approval state

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::schedule::DayWindows;
use crate::{Error, Result};

/// One VM per participant, or one VM per template per participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmType {
    #[default]
    Single,
    Multi,
}

impl std::fmt::Display for VmType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VmType::Single => write!(f, "single"),
            VmType::Multi => write!(f, "multi"),
        }
    }
}

impl std::str::FromStr for VmType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(VmType::Single),
            "multi" => Ok(VmType::Multi),
            other => Err(Error::Validation(format!("unknown VM type: {}", other))),
        }
    }
}

/// A template slot in the VM config
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateAssignment {
    pub template_id: String,
    pub instance_name: String,
}

impl TemplateAssignment {
    pub fn new(template_id: impl Into<String>, instance_name: impl Into<String>) -> Self {
        Self {
            template_id: template_id.into(),
            instance_name: instance_name.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.template_id.trim().is_empty() && !self.instance_name.trim().is_empty()
    }
}

/// Decision recorded by one approving party
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateDecision {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for GateDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateDecision::Pending => write!(f, "pending"),
            GateDecision::Approved => write!(f, "approved"),
            GateDecision::Rejected => write!(f, "rejected"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalParty {
    CloudAdda,
    CompanyAdmin,
}

impl ApprovalParty {
    pub const ALL: [ApprovalParty; 2] = [ApprovalParty::CloudAdda, ApprovalParty::CompanyAdmin];
}

impl std::fmt::Display for ApprovalParty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalParty::CloudAdda => write!(f, "cloud_adda"),
            ApprovalParty::CompanyAdmin => write!(f, "company_admin"),
        }
    }
}

/// Two independent sign-offs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApprovalStatus {
    pub requested: bool,
    pub cloud_adda: GateDecision,
    pub company_admin: GateDecision,
}

impl ApprovalStatus {
    pub fn gate(&self, party: ApprovalParty) -> GateDecision {
        match party {
            ApprovalParty::CloudAdda => self.cloud_adda,
            ApprovalParty::CompanyAdmin => self.company_admin,
        }
    }

    pub fn set_gate(&mut self, party: ApprovalParty, decision: GateDecision) {
        match party {
            ApprovalParty::CloudAdda => self.cloud_adda = decision,
            ApprovalParty::CompanyAdmin => self.company_admin = decision,
        }
    }

    /// Both gates approved.
    pub fn is_approved(&self) -> bool {
        self.cloud_adda == GateDecision::Approved && self.company_admin == GateDecision::Approved
    }

    pub fn any_rejected(&self) -> bool {
        self.cloud_adda == GateDecision::Rejected || self.company_admin == GateDecision::Rejected
    }

    pub fn is_pending(&self) -> bool {
        self.requested && !self.is_approved() && !self.any_rejected()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisioningStage {
    Provision,
    Clone,
}

impl std::fmt::Display for ProvisioningStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisioningStage::Provision => write!(f, "provision"),
            ProvisioningStage::Clone => write!(f, "clone"),
        }
    }
}

/// Trainer VM lifecycle. Normal operation only ever moves forward; a
/// `Failed` stage is re-entered by retrying that stage.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProvisioningState {
    #[default]
    NotProvisioned,
    Provisioning,
    Provisioned,
    Cloning,
    Cloned,
    Failed {
        stage: ProvisioningStage,
        reason: String,
    },
}

impl ProvisioningState {
    /// The trainer VM exists and can be configured or cloned.
    pub fn admin_vm_provisioned(&self) -> bool {
        matches!(
            self,
            ProvisioningState::Provisioned
                | ProvisioningState::Cloning
                | ProvisioningState::Cloned
                | ProvisioningState::Failed {
                    stage: ProvisioningStage::Clone,
                    ..
                }
        )
    }

    pub fn admin_vm_cloned(&self) -> bool {
        matches!(self, ProvisioningState::Cloned)
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, ProvisioningState::Provisioning | ProvisioningState::Cloning)
    }

    pub fn failed_stage(&self) -> Option<ProvisioningStage> {
        match self {
            ProvisioningState::Failed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisioningState::NotProvisioned => write!(f, "NotProvisioned"),
            ProvisioningState::Provisioning => write!(f, "Provisioning"),
            ProvisioningState::Provisioned => write!(f, "Provisioned"),
            ProvisioningState::Cloning => write!(f, "Cloning"),
            ProvisioningState::Cloned => write!(f, "Cloned"),
            ProvisioningState::Failed { stage, .. } => write!(f, "Failed({})", stage),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceRole {
    Admin,
    Participant,
}

/// A provisioned VM belonging to the batch's fleet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmInstance {
    pub id: String,
    pub name: String,
    pub role: InstanceRole,
    /// Student this participant VM is handed to
    pub student_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl VmInstance {
    pub fn new(name: impl Into<String>, role: InstanceRole) -> Self {
        Self {
            id: format!("vm-{}", uuid::Uuid::new_v4()),
            name: name.into(),
            role,
            student_id: None,
            created_at: Utc::now(),
        }
    }
}

/// VM configuration sub-state of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmConfig {
    pub vm_type: VmType,
    pub templates: Vec<TemplateAssignment>,
    pub participant_count: u32,
    pub admin_count: u32,
    pub vm_start_date: Option<NaiveDate>,
    pub vm_end_date: Option<NaiveDate>,
    pub day_windows: DayWindows,
    pub state: ProvisioningState,
    pub approval: ApprovalStatus,
    pub instances: Vec<VmInstance>,
    /// Bumped on every workflow reset; async completions carry the value
    /// they were dispatched under.
    pub generation: u64,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            vm_type: VmType::Single,
            templates: Vec::new(),
            participant_count: 1,
            admin_count: 1,
            vm_start_date: None,
            vm_end_date: None,
            day_windows: DayWindows::default(),
            state: ProvisioningState::NotProvisioned,
            approval: ApprovalStatus::default(),
            instances: Vec::new(),
            generation: 0,
        }
    }
}

impl VmConfig {
    /// At least one template slot, and every slot has both fields.
    pub fn is_complete(&self) -> bool {
        !self.templates.is_empty() && self.templates.iter().all(TemplateAssignment::is_complete)
    }

    pub fn total_vms(&self) -> crate::Result<u64> {
        crate::pricing::total_vms(
            self.vm_type,
            self.templates.len(),
            self.participant_count,
            self.admin_count,
        )
    }

    pub fn admin_instance(&self) -> Option<&VmInstance> {
        self.instances.iter().find(|i| i.role == InstanceRole::Admin)
    }

    pub fn participant_instances(&self) -> impl Iterator<Item = &VmInstance> {
        self.instances.iter().filter(|i| i.role == InstanceRole::Participant)
    }

    pub fn validate(&self) -> Result<()> {
        if self.participant_count < 1 {
            return Err(Error::Validation("participant count must be at least 1".into()));
        }
        if let (Some(start), Some(end)) = (self.vm_start_date, self.vm_end_date) {
            if start > end {
                return Err(Error::Validation(format!(
                    "VM start date {} is after end date {}",
                    start, end
                )));
            }
        }
        Ok(())
    }

    /// Require a complete config before provisioning or approval.
    pub fn ensure_complete(&self) -> Result<()> {
        if self.templates.is_empty() {
            return Err(Error::Validation("at least one VM template is required".into()));
        }
        if let Some(pos) = self.templates.iter().position(|t| !t.is_complete()) {
            return Err(Error::Validation(format!(
                "VM entry {} needs both a template and an instance name",
                pos + 1
            )));
        }
        Ok(())
    }

    pub fn apply(&mut self, patch: VmConfigPatch) -> Result<()> {
        if patch.touches_fleet() && self.state != ProvisioningState::NotProvisioned {
            return Err(Error::invalid_state(&self.state, "NotProvisioned"));
        }

        if let Some(vm_type) = patch.vm_type {
            self.vm_type = vm_type;
        }
        if let Some(templates) = patch.templates {
            self.templates = templates;
        }
        if let Some(count) = patch.participant_count {
            self.participant_count = count;
        }
        if let Some(count) = patch.admin_count {
            self.admin_count = count;
        }
        if let Some(start) = patch.vm_start_date {
            self.vm_start_date = start;
        }
        if let Some(end) = patch.vm_end_date {
            self.vm_end_date = end;
        }

        match (self.vm_start_date, self.vm_end_date) {
            (Some(start), Some(end)) => self.day_windows.retain_range(start, end),
            _ => self.day_windows.clear(),
        }

        self.validate()
    }

    /// Back to a fresh workflow; fleet settings are kept.
    pub fn reset_workflow(&mut self) {
        self.state = ProvisioningState::NotProvisioned;
        self.approval = ApprovalStatus::default();
        self.instances.clear();
        self.generation += 1;
    }
}

/// Partial VM config update. Nested `Option` on dates lets a caller clear them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VmConfigPatch {
    pub vm_type: Option<VmType>,
    pub templates: Option<Vec<TemplateAssignment>>,
    pub participant_count: Option<u32>,
    pub admin_count: Option<u32>,
    pub vm_start_date: Option<Option<NaiveDate>>,
    pub vm_end_date: Option<Option<NaiveDate>>,
}

impl VmConfigPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vm_type(mut self, vm_type: VmType) -> Self {
        self.vm_type = Some(vm_type);
        self
    }

    pub fn templates(mut self, templates: Vec<TemplateAssignment>) -> Self {
        self.templates = Some(templates);
        self
    }

    pub fn participants(mut self, count: u32) -> Self {
        self.participant_count = Some(count);
        self
    }

    pub fn admins(mut self, count: u32) -> Self {
        self.admin_count = Some(count);
        self
    }

    pub fn dates(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.vm_start_date = Some(Some(start));
        self.vm_end_date = Some(Some(end));
        self
    }

    /// Whether the patch changes what gets provisioned.
    pub fn touches_fleet(&self) -> bool {
        self.vm_type.is_some()
            || self.templates.is_some()
            || self.participant_count.is_some()
            || self.admin_count.is_some()
    }
}
