//! Console facade: the command surface over batches, the VM workflow,
//! approvals and the suggestion panel

use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::approval::{ApprovalGate, Approver, SimulatedApprover};
use crate::config::ConsoleConfig;
use crate::events::{EventBus, WorkflowEvent};
use crate::models::*;
use crate::pricing::{self, PricingBreakdown, PricingInput};
use crate::provisioning::{ConsoleSession, Provisioner, ProvisioningWorkflow, SimulatedProvisioner};
use crate::schedule::{DaySchedule, TimeWindow};
use crate::store::EntityStore;
use crate::suggestions::{ContextSnapshot, Location, Navigation, Suggestion, SuggestionPanel};
use crate::tasks::BackgroundTasks;
use crate::wizard::BatchWizard;
use crate::Result;

/// Owns the entity store and every workflow component
pub struct Console {
    config: ConsoleConfig,
    store: Arc<EntityStore>,
    events: EventBus,
    tasks: Arc<BackgroundTasks>,
    provisioning: ProvisioningWorkflow,
    approval: ApprovalGate,
    panel: Mutex<SuggestionPanel>,
}

impl Console {
    /// Create a console with simulated backends. Must run inside a tokio runtime.
    pub fn new(config: ConsoleConfig) -> Result<Self> {
        let provisioner = Arc::new(SimulatedProvisioner::new(
            config.provision_delay(),
            config.clone_delay(),
        ));
        let approver = Arc::new(SimulatedApprover::new(
            config.cloud_adda_delay(),
            config.company_admin_delay(),
        ));
        Self::with_backends(config, provisioner, approver)
    }

    /// Create a console with custom VM and approval backends
    pub fn with_backends(
        config: ConsoleConfig,
        provisioner: Arc<dyn Provisioner>,
        approver: Arc<dyn Approver>,
    ) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(EntityStore::with_default_window(config.default_window));
        let events = EventBus::new(config.event_capacity);
        let tasks = Arc::new(BackgroundTasks::current()?);

        let provisioning =
            ProvisioningWorkflow::new(store.clone(), provisioner, tasks.clone(), events.clone());
        let approval = ApprovalGate::new(store.clone(), approver, tasks.clone(), events.clone());

        tracing::debug!(?config, "Console initialized");
        Ok(Self {
            config,
            store,
            events,
            tasks,
            provisioning,
            approval,
            panel: Mutex::new(SuggestionPanel::new()),
        })
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    /// Shared handle to the underlying store
    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    /// Receive workflow events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    // ===== Batches =====

    /// Create a batch directly, bypassing the wizard
    pub fn add_batch(&self, draft: NewBatch) -> Result<String> {
        self.store.add_batch(draft)
    }

    /// Start the multi-step creation flow
    pub fn wizard(&self) -> BatchWizard {
        BatchWizard::new(self.store.clone(), self.config.pricing)
    }

    pub fn batch(&self, id: &str) -> Result<Batch> {
        self.store.get_batch(id)
    }

    pub fn batches(&self) -> Vec<Batch> {
        self.store.list_batches()
    }

    /// List all batches with their workflow state
    pub fn batch_summaries(&self) -> Vec<BatchSummary> {
        self.store.list_batches().iter().map(BatchSummary::from).collect()
    }

    pub fn update_batch(&self, id: &str, patch: BatchPatch) -> Result<Batch> {
        self.store.update_batch(id, patch)
    }

    // ===== Students =====

    pub fn add_student(&self, batch_id: &str, student: NewStudent) -> Result<String> {
        self.store.add_student(batch_id, student)
    }

    pub fn remove_student(&self, batch_id: &str, student_id: &str) -> Result<()> {
        self.store.remove_student(batch_id, student_id)
    }

    pub fn update_student(&self, batch_id: &str, student_id: &str, patch: StudentPatch) -> Result<Student> {
        self.store.update_student(batch_id, student_id, patch)
    }

    // ===== VM configuration =====

    pub fn update_vm_config(&self, batch_id: &str, patch: VmConfigPatch) -> Result<VmConfig> {
        self.store.update_vm_config(batch_id, patch)
    }

    pub fn set_day_window(&self, batch_id: &str, date: NaiveDate, window: TimeWindow) -> Result<()> {
        self.store.set_day_window(batch_id, date, window)
    }

    pub fn apply_window_to_all(&self, batch_id: &str, source: NaiveDate) -> Result<()> {
        self.store.apply_window_to_all(batch_id, source)
    }

    pub fn day_schedules(&self, batch_id: &str) -> Result<Vec<DaySchedule>> {
        self.store.day_schedules(batch_id)
    }

    pub fn register_template(&self, template: VmTemplate) -> Result<String> {
        self.store.register_template(template)
    }

    pub fn templates(&self) -> Vec<VmTemplate> {
        self.store.templates()
    }

    /// Current cost estimate for a batch's VM lab
    pub fn pricing(&self, batch_id: &str) -> Result<PricingBreakdown> {
        let batch = self.store.get_batch(batch_id)?;
        let input = PricingInput::from(batch.vm_config()?);
        pricing::estimate(&input, &self.config.pricing)
    }

    // ===== VM workflow =====

    pub fn provision_admin(&self, batch_id: &str) -> Result<()> {
        self.provisioning.provision_admin(batch_id)
    }

    pub fn launch_console(&self, batch_id: &str) -> Result<ConsoleSession> {
        self.provisioning.launch_console(batch_id)
    }

    pub fn clone_for_batch(&self, batch_id: &str) -> Result<()> {
        self.provisioning.clone_for_batch(batch_id)
    }

    /// Re-run the failed provisioning or cloning stage
    pub fn retry(&self, batch_id: &str) -> Result<()> {
        self.provisioning.retry(batch_id)
    }

    pub fn reset_workflow(&self, batch_id: &str) -> Result<()> {
        self.provisioning.reset_workflow(batch_id)
    }

    // ===== Approval =====

    pub fn request_approval(&self, batch_id: &str) -> Result<()> {
        self.approval.request_approval(batch_id)
    }

    pub fn approval_status(&self, batch_id: &str) -> Result<ApprovalStatus> {
        self.approval.approval_status(batch_id)
    }

    pub fn activate_batch(&self, batch_id: &str) -> Result<()> {
        self.approval.activate_batch(batch_id)
    }

    // ===== Suggestion panel =====

    /// Snapshot of the state suggestions are derived from
    pub fn context(&self, location: &Location) -> ContextSnapshot {
        ContextSnapshot::capture(&self.store, location)
    }

    /// Move to a new view and return its visible suggestions
    pub fn navigate(&self, location: Location) -> Vec<Suggestion> {
        let ctx = self.context(&location);
        let mut panel = self.panel.lock();
        panel.refresh(location, &ctx);
        panel.visible()
    }

    /// Visible suggestions for the current view, recomputed from current state
    pub fn suggestions(&self) -> Vec<Suggestion> {
        let location = self.location();
        self.navigate(location)
    }

    pub fn location(&self) -> Location {
        self.panel.lock().location().clone()
    }

    pub fn is_panel_open(&self) -> bool {
        self.panel.lock().is_open()
    }

    pub fn open_panel(&self) {
        self.panel.lock().open();
    }

    pub fn close_panel(&self) {
        self.panel.lock().close();
    }

    pub fn toggle_panel(&self) -> bool {
        self.panel.lock().toggle()
    }

    pub fn dismiss(&self, suggestion_id: &str) {
        self.panel.lock().dismiss(suggestion_id);
    }

    pub fn reset_dismissed(&self) {
        self.panel.lock().reset_dismissed();
    }

    /// Act on a suggestion and follow its navigation
    pub fn select_suggestion(&self, suggestion_id: &str) -> Option<Navigation> {
        self.suggestions();
        let navigation = self.panel.lock().select(suggestion_id)?;
        match &navigation {
            Navigation::Navigate(location) | Navigation::FocusTab { location, .. } => {
                self.navigate(location.clone());
            }
            Navigation::Stay => {}
        }
        Some(navigation)
    }

    // ===== Lifecycle =====

    /// Background tasks still running
    pub fn pending_tasks(&self) -> usize {
        self.tasks.pending()
    }

    /// Cancel every pending task and wait for them to finish. Workflow
    /// commands fail with `ShutDown` afterwards.
    pub async fn shutdown(&self) {
        tracing::info!(pending = self.tasks.pending(), "Shutting down console");
        self.tasks.shutdown().await;
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        self.tasks.cancel_all();
    }
}

/// One row of the batch list
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub id: String,
    pub name: String,
    pub status: BatchStatus,
    pub students: usize,
    pub seats: u32,
    pub workflow: Option<ProvisioningState>,
}

impl From<&Batch> for BatchSummary {
    fn from(batch: &Batch) -> Self {
        Self {
            id: batch.id.clone(),
            name: batch.name.clone(),
            status: batch.status,
            students: batch.students.len(),
            seats: batch.seat_count,
            workflow: batch.vm_config.as_ref().map(|c| c.state.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suggestions::BatchTab;
    use crate::Error;
    use std::time::Duration;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn console() -> Console {
        Console::new(ConsoleConfig::default()).unwrap()
    }

    #[test]
    fn test_requires_runtime() {
        assert!(matches!(Console::new(ConsoleConfig::default()), Err(Error::Runtime(_))));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = ConsoleConfig::builder().event_capacity(0).build();
        assert!(matches!(Console::new(config), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_pricing_for_batch() {
        let console = console();
        let id = console
            .add_batch(NewBatch::new("Pricing", BatchSchedule::new(date(1), date(5))))
            .unwrap();
        assert!(matches!(console.pricing(&id), Err(Error::VmConfigMissing(_))));

        console
            .update_vm_config(
                &id,
                VmConfigPatch::new()
                    .templates(vec![TemplateAssignment::new("t", "lab")])
                    .participants(10)
                    .dates(date(1), date(5)),
            )
            .unwrap();
        assert_eq!(console.pricing(&id).unwrap().total, 3185);
    }

    #[tokio::test]
    async fn test_batch_summaries() {
        let console = console();
        let id = console
            .add_batch(NewBatch::new("Summary", BatchSchedule::new(date(1), date(5))).seats(3))
            .unwrap();
        console.add_student(&id, NewStudent::new("Kim", "kim@example.com")).unwrap();

        let rows = console.batch_summaries();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].students, 1);
        assert_eq!(rows[0].seats, 3);
        assert!(rows[0].workflow.is_none());
    }

    #[tokio::test]
    async fn test_panel_follows_navigation() {
        let console = console();
        assert!(!console.is_panel_open());
        assert!(console.toggle_panel());

        let list = console.navigate(Location::Batches);
        assert_eq!(list[0].id, "create-first-batch");

        let nav = console.select_suggestion("create-first-batch").unwrap();
        assert_eq!(nav, Navigation::Navigate(Location::CreateBatch));
        assert_eq!(console.location(), Location::CreateBatch);

        console.navigate(Location::Batches);
        assert!(console.suggestions().is_empty());
        console.reset_dismissed();
        assert_eq!(console.suggestions().len(), 1);
    }

    #[tokio::test]
    async fn test_tab_suggestion_focuses_batch() {
        let console = console();
        let id = console
            .add_batch(NewBatch::new("Tabs", BatchSchedule::new(date(1), date(5))))
            .unwrap();
        console.navigate(Location::batch(&id));

        let nav = console.select_suggestion("configure-batch-vms").unwrap();
        assert_eq!(
            nav,
            Navigation::FocusTab {
                location: Location::batch(&id),
                tab: BatchTab::Vms,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_rejects_commands() {
        let console = console();
        let id = console
            .add_batch(NewBatch::new("Shutdown", BatchSchedule::new(date(1), date(5))))
            .unwrap();
        console
            .update_vm_config(&id, VmConfigPatch::new().templates(vec![TemplateAssignment::new("t", "lab")]))
            .unwrap();
        console.provision_admin(&id).unwrap();
        assert_eq!(console.pending_tasks(), 1);

        console.shutdown().await;
        assert_eq!(console.pending_tasks(), 0);
        assert!(matches!(console.request_approval(&id), Err(Error::ShutDown)));

        tokio::time::sleep(Duration::from_secs(10)).await;
        let state = console.batch(&id).unwrap().vm_config.unwrap().state;
        assert_eq!(state, ProvisioningState::Provisioning);
    }
}
