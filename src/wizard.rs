//! Multi-step batch creation
//!
//! `Details -> Schedule -> VirtualMachines -> Review`. The batch record is
//! created when the schedule is committed; the VM step edits that record.
//! A step that fails validation leaves both the wizard and the store as they
//! were.

use std::sync::Arc;

use serde::Serialize;

use crate::models::*;
use crate::pricing::{self, PricingBreakdown, PricingInput, PricingRates};
use crate::store::EntityStore;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    Details,
    Schedule,
    VirtualMachines,
    Review,
}

impl std::fmt::Display for WizardStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WizardStep::Details => write!(f, "Details"),
            WizardStep::Schedule => write!(f, "Schedule"),
            WizardStep::VirtualMachines => write!(f, "VirtualMachines"),
            WizardStep::Review => write!(f, "Review"),
        }
    }
}

/// First wizard page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailsForm {
    pub name: String,
    pub description: Option<String>,
    pub seat_count: u32,
    pub medium: Medium,
    pub settings: BatchSettings,
    pub course_id: Option<String>,
}

impl DetailsForm {
    pub fn new(name: impl Into<String>, seat_count: u32) -> Self {
        Self {
            name: name.into(),
            description: None,
            seat_count,
            medium: Medium::default(),
            settings: BatchSettings::default(),
            course_id: None,
        }
    }

    pub fn medium(mut self, medium: Medium) -> Self {
        self.medium = medium;
        self
    }

    pub fn course(mut self, course_id: impl Into<String>) -> Self {
        self.course_id = Some(course_id.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("batch name is required".into()));
        }
        if self.seat_count < 1 {
            return Err(Error::Validation("seat count must be at least 1".into()));
        }
        Ok(())
    }
}

/// Final page: the created batch and what its VM lab will cost
#[derive(Debug, Clone, Serialize)]
pub struct BatchReview {
    pub batch: Batch,
    pub pricing: PricingBreakdown,
}

pub struct BatchWizard {
    store: Arc<EntityStore>,
    rates: PricingRates,
    step: WizardStep,
    details: Option<DetailsForm>,
    batch_id: Option<String>,
}

impl BatchWizard {
    pub fn new(store: Arc<EntityStore>, rates: PricingRates) -> Self {
        Self {
            store,
            rates,
            step: WizardStep::Details,
            details: None,
            batch_id: None,
        }
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    /// Set once the schedule step has been committed.
    pub fn batch_id(&self) -> Option<&str> {
        self.batch_id.as_deref()
    }

    fn expect_step(&self, expected: WizardStep) -> Result<()> {
        if self.step != expected {
            return Err(Error::invalid_state(self.step, expected.to_string()));
        }
        Ok(())
    }

    pub fn submit_details(&mut self, form: DetailsForm) -> Result<()> {
        self.expect_step(WizardStep::Details)?;
        form.validate()?;

        // Revisiting details after the batch exists edits it in place
        if let Some(id) = &self.batch_id {
            let patch = BatchPatch {
                name: Some(form.name.clone()),
                description: Some(form.description.clone()),
                seat_count: Some(form.seat_count),
                medium: Some(form.medium),
                settings: Some(form.settings),
                course_id: Some(form.course_id.clone()),
                ..Default::default()
            };
            self.store.update_batch(id, patch)?;
        }

        self.details = Some(form);
        self.step = WizardStep::Schedule;
        Ok(())
    }

    /// Commit the schedule, creating the batch on first pass.
    pub fn submit_schedule(&mut self, schedule: BatchSchedule) -> Result<String> {
        self.expect_step(WizardStep::Schedule)?;
        schedule.validate()?;

        let id = match &self.batch_id {
            Some(id) => {
                self.store.update_batch(id, BatchPatch::default().schedule(schedule))?;
                id.clone()
            }
            None => {
                let form = self
                    .details
                    .clone()
                    .ok_or_else(|| Error::invalid_state(self.step, "Details"))?;
                let draft = NewBatch {
                    name: form.name,
                    description: form.description,
                    schedule,
                    seat_count: form.seat_count,
                    medium: form.medium,
                    settings: form.settings,
                    course_id: form.course_id,
                };
                self.store.add_batch(draft)?
            }
        };

        self.batch_id = Some(id.clone());
        self.step = WizardStep::VirtualMachines;
        Ok(id)
    }

    /// Commit the VM lab. The merged configuration must be complete.
    pub fn submit_vms(&mut self, patch: VmConfigPatch) -> Result<()> {
        self.expect_step(WizardStep::VirtualMachines)?;
        let id = self
            .batch_id
            .clone()
            .ok_or_else(|| Error::invalid_state(self.step, "Schedule"))?;

        let mut merged = self
            .store
            .get_batch(&id)?
            .vm_config
            .unwrap_or_default();
        merged.apply(patch.clone())?;
        merged.ensure_complete()?;

        self.store.update_vm_config(&id, patch)?;
        self.step = WizardStep::Review;
        Ok(())
    }

    /// Step back one page. Nothing already committed is undone.
    pub fn back(&mut self) -> WizardStep {
        self.step = match self.step {
            WizardStep::Details | WizardStep::Schedule => WizardStep::Details,
            WizardStep::VirtualMachines => WizardStep::Schedule,
            WizardStep::Review => WizardStep::VirtualMachines,
        };
        self.step
    }

    pub fn review(&self) -> Result<BatchReview> {
        self.expect_step(WizardStep::Review)?;
        let id = self
            .batch_id
            .as_deref()
            .ok_or_else(|| Error::invalid_state(self.step, "Schedule"))?;
        let batch = self.store.get_batch(id)?;
        let pricing = pricing::estimate(&PricingInput::from(batch.vm_config()?), &self.rates)?;
        Ok(BatchReview { batch, pricing })
    }
}
