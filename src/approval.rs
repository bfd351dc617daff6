//! Two-party approval gate
//!
//! Each party reviews independently and the two decisions may land in any
//! order. Only rejected gates, and pending gates whose reviewer call failed,
//! are re-dispatched by a repeat request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::events::{EventBus, WorkflowEvent};
use crate::models::*;
use crate::store::EntityStore;
use crate::tasks::BackgroundTasks;
use crate::{Error, Result};

/// External approving party
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Approver: Send + Sync {
    /// Ask `party` to review the batch. `Pending` means no decision was made.
    async fn review(&self, party: ApprovalParty, batch_id: String) -> Result<GateDecision>;
}

/// Approves everything after a per-party delay
pub struct SimulatedApprover {
    cloud_adda_delay: Duration,
    company_admin_delay: Duration,
}

impl SimulatedApprover {
    pub fn new(cloud_adda_delay: Duration, company_admin_delay: Duration) -> Self {
        Self {
            cloud_adda_delay,
            company_admin_delay,
        }
    }
}

#[async_trait]
impl Approver for SimulatedApprover {
    async fn review(&self, party: ApprovalParty, _batch_id: String) -> Result<GateDecision> {
        let delay = match party {
            ApprovalParty::CloudAdda => self.cloud_adda_delay,
            ApprovalParty::CompanyAdmin => self.company_admin_delay,
        };
        tokio::time::sleep(delay).await;
        Ok(GateDecision::Approved)
    }
}

/// Reviews currently running, with the workflow generation they belong to
type InFlight = Arc<Mutex<HashMap<(String, ApprovalParty), u64>>>;

pub struct ApprovalGate {
    store: Arc<EntityStore>,
    approver: Arc<dyn Approver>,
    tasks: Arc<BackgroundTasks>,
    events: EventBus,
    in_flight: InFlight,
}

impl ApprovalGate {
    pub(crate) fn new(
        store: Arc<EntityStore>,
        approver: Arc<dyn Approver>,
        tasks: Arc<BackgroundTasks>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            approver,
            tasks,
            events,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Ask both parties for sign-off.
    ///
    /// The first call marks the batch `AwaitingApproval` and dispatches both
    /// reviews. Later calls only re-dispatch gates that were rejected or
    /// whose review ended without a decision; otherwise they are a no-op.
    pub fn request_approval(&self, batch_id: &str) -> Result<()> {
        self.tasks.ensure_running()?;

        let mut in_flight = self.in_flight.lock();
        let mut dispatch = Vec::new();
        let mut generation = 0;
        let mut first = false;

        self.store
            .update(batch_id, |batch| {
                if batch.status == BatchStatus::Active {
                    return Err(Error::invalid_state(batch.status, "Draft or AwaitingApproval"));
                }
                let config = batch.vm_config_mut()?;
                config.ensure_complete()?;

                generation = config.generation;
                first = !config.approval.requested;
                config.approval.requested = true;

                for party in ApprovalParty::ALL {
                    let running = in_flight.get(&(batch_id.to_string(), party)) == Some(&generation);
                    match config.approval.gate(party) {
                        GateDecision::Approved => {}
                        GateDecision::Rejected => {
                            config.approval.set_gate(party, GateDecision::Pending);
                            dispatch.push(party);
                        }
                        GateDecision::Pending if !running => dispatch.push(party),
                        GateDecision::Pending => {}
                    }
                }
                batch.status = BatchStatus::AwaitingApproval;
                Ok(())
            })
            .inspect_err(|e| tracing::warn!(batch = %batch_id, error = %e, "Approval request rejected"))?;

        if dispatch.is_empty() {
            tracing::debug!(batch = %batch_id, "Approval already requested");
            return Ok(());
        }

        tracing::info!(batch = %batch_id, parties = dispatch.len(), first, "Approval requested");
        self.events.publish(WorkflowEvent::ApprovalRequested {
            batch_id: batch_id.to_string(),
        });

        for party in dispatch {
            in_flight.insert((batch_id.to_string(), party), generation);

            let store = self.store.clone();
            let events = self.events.clone();
            let approver = self.approver.clone();
            let registry = self.in_flight.clone();
            let target = batch_id.to_string();
            self.tasks.spawn(batch_id, move |cancel| async move {
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => {
                        release(&registry, &target, party, generation);
                        tracing::debug!(batch = %target, %party, "Review cancelled");
                        return;
                    }
                    outcome = approver.review(party, target.clone()) => outcome,
                };
                // Decision lands before the slot frees up, so a concurrent
                // request sees either a running review or a decided gate
                complete_review(&store, &events, &target, generation, party, outcome);
                release(&registry, &target, party, generation);
            });
        }
        Ok(())
    }

    pub fn approval_status(&self, batch_id: &str) -> Result<ApprovalStatus> {
        Ok(self.store.get_batch(batch_id)?.vm_config()?.approval)
    }

    /// Promote a dual-approved batch to `Active`.
    pub fn activate_batch(&self, batch_id: &str) -> Result<()> {
        self.store
            .update(batch_id, |batch| {
                if batch.status == BatchStatus::Active {
                    return Err(Error::invalid_state(batch.status, "AwaitingApproval"));
                }
                if !batch.is_activatable() {
                    return Err(Error::NotActivatable(batch.id.clone()));
                }
                batch.status = BatchStatus::Active;
                Ok(())
            })
            .inspect_err(|e| tracing::warn!(batch = %batch_id, error = %e, "Activation rejected"))?;

        tracing::info!(batch = %batch_id, "Batch activated");
        self.events.publish(WorkflowEvent::BatchActivated {
            batch_id: batch_id.to_string(),
        });
        Ok(())
    }
}

fn release(registry: &InFlight, batch_id: &str, party: ApprovalParty, generation: u64) {
    let mut running = registry.lock();
    let key = (batch_id.to_string(), party);
    if running.get(&key) == Some(&generation) {
        running.remove(&key);
    }
}

pub(crate) fn complete_review(
    store: &EntityStore,
    events: &EventBus,
    batch_id: &str,
    generation: u64,
    party: ApprovalParty,
    outcome: Result<GateDecision>,
) {
    let decision = match outcome {
        Ok(GateDecision::Pending) => {
            tracing::info!(batch = %batch_id, %party, "Review ended without a decision");
            return;
        }
        Ok(decision) => decision,
        Err(e) => {
            tracing::warn!(batch = %batch_id, %party, error = %e, "Review failed");
            return;
        }
    };

    let applied = store.apply_if(batch_id, |batch| {
        let Some(config) = batch.vm_config.as_mut() else {
            return false;
        };
        if config.generation != generation
            || !config.approval.requested
            || config.approval.gate(party) != GateDecision::Pending
        {
            return false;
        }
        config.approval.set_gate(party, decision);
        true
    });

    if applied {
        tracing::info!(batch = %batch_id, %party, %decision, "Gate decided");
        events.publish(WorkflowEvent::GateDecided {
            batch_id: batch_id.to_string(),
            party,
            decision,
        });
    } else {
        tracing::debug!(batch = %batch_id, %party, "Stale review ignored");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, d).unwrap()
    }

    fn seeded_store() -> (Arc<EntityStore>, String) {
        let store = Arc::new(EntityStore::new());
        let id = store
            .add_batch(NewBatch::new("Data Lab", BatchSchedule::new(date(1), date(9))))
            .unwrap();
        store
            .update_vm_config(
                &id,
                VmConfigPatch::new().templates(vec![TemplateAssignment::new("tmpl-py", "py-lab")]),
            )
            .unwrap();
        (store, id)
    }

    fn gate(store: Arc<EntityStore>, approver: impl Approver + 'static) -> ApprovalGate {
        let tasks = Arc::new(BackgroundTasks::current().unwrap());
        ApprovalGate::new(store, Arc::new(approver), tasks, EventBus::new(16))
    }

    fn simulated() -> SimulatedApprover {
        SimulatedApprover::new(Duration::from_secs(2), Duration::from_secs(4))
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_gates_approve() {
        let (store, id) = seeded_store();
        let gate = gate(store.clone(), simulated());

        gate.request_approval(&id).unwrap();
        assert_eq!(store.get_batch(&id).unwrap().status, BatchStatus::AwaitingApproval);
        assert!(gate.approval_status(&id).unwrap().is_pending());

        tokio::time::sleep(Duration::from_secs(3)).await;
        let status = gate.approval_status(&id).unwrap();
        assert_eq!(status.cloud_adda, GateDecision::Approved);
        assert_eq!(status.company_admin, GateDecision::Pending);
        assert!(matches!(gate.activate_batch(&id), Err(Error::NotActivatable(_))));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(gate.approval_status(&id).unwrap().is_approved());
        gate.activate_batch(&id).unwrap();
        assert_eq!(store.get_batch(&id).unwrap().status, BatchStatus::Active);
        assert!(gate.activate_batch(&id).unwrap_err().is_precondition());
        assert!(gate.request_approval(&id).unwrap_err().is_precondition());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gates_land_out_of_order() {
        let (store, id) = seeded_store();
        let gate = gate(
            store.clone(),
            SimulatedApprover::new(Duration::from_secs(5), Duration::from_secs(1)),
        );

        gate.request_approval(&id).unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        let status = gate.approval_status(&id).unwrap();
        assert_eq!(status.company_admin, GateDecision::Approved);
        assert_eq!(status.cloud_adda, GateDecision::Pending);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(store.get_batch(&id).unwrap().is_activatable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_request_is_noop() {
        let (store, id) = seeded_store();
        let mut mock = MockApprover::new();
        mock.expect_review().times(2).returning(|_, _| Ok(GateDecision::Approved));
        let gate = gate(store.clone(), mock);

        gate.request_approval(&id).unwrap();
        gate.request_approval(&id).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        gate.request_approval(&id).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(gate.approval_status(&id).unwrap().is_approved());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_landing_review_not_redispatched() {
        let (store, id) = seeded_store();
        let reviews = Arc::new(AtomicUsize::new(0));
        let counter = reviews.clone();
        let mut mock = MockApprover::new();
        mock.expect_review().returning(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(GateDecision::Approved)
        });
        let gate = gate(store.clone(), mock);

        tokio::time::timeout(Duration::from_secs(10), async {
            while !gate.approval_status(&id).unwrap().is_approved() {
                gate.request_approval(&id).unwrap();
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert_eq!(reviews.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_blocks_and_rerequest_rearms() {
        let (store, id) = seeded_store();
        let company_calls = Arc::new(AtomicUsize::new(0));
        let cloud_calls = Arc::new(AtomicUsize::new(0));
        let (company, cloud) = (company_calls.clone(), cloud_calls.clone());

        let mut mock = MockApprover::new();
        mock.expect_review().returning(move |party, _| match party {
            ApprovalParty::CloudAdda => {
                cloud.fetch_add(1, Ordering::SeqCst);
                Ok(GateDecision::Approved)
            }
            ApprovalParty::CompanyAdmin => {
                if company.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok(GateDecision::Rejected)
                } else {
                    Ok(GateDecision::Approved)
                }
            }
        });
        let gate = gate(store.clone(), mock);

        gate.request_approval(&id).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let status = gate.approval_status(&id).unwrap();
        assert!(status.any_rejected());
        assert!(!status.is_pending());
        assert!(matches!(gate.activate_batch(&id), Err(Error::NotActivatable(_))));

        gate.request_approval(&id).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(gate.approval_status(&id).unwrap().is_approved());
        assert_eq!(cloud_calls.load(Ordering::SeqCst), 1);
        assert_eq!(company_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_review_is_redispatched() {
        let (store, id) = seeded_store();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut mock = MockApprover::new();
        mock.expect_review().returning(move |party, _| {
            if party == ApprovalParty::CloudAdda && counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::Approval("reviewer unreachable".into()))
            } else {
                Ok(GateDecision::Approved)
            }
        });
        let gate = gate(store.clone(), mock);

        gate.request_approval(&id).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let status = gate.approval_status(&id).unwrap();
        assert_eq!(status.cloud_adda, GateDecision::Pending);
        assert_eq!(status.company_admin, GateDecision::Approved);

        gate.request_approval(&id).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(gate.approval_status(&id).unwrap().is_approved());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_requires_complete_config() {
        let store = Arc::new(EntityStore::new());
        let id = store
            .add_batch(NewBatch::new("Bare", BatchSchedule::new(date(1), date(2))))
            .unwrap();
        let gate = gate(store.clone(), simulated());

        assert!(gate.request_approval(&id).unwrap_err().is_validation());
        let batch = store.get_batch(&id).unwrap();
        assert_eq!(batch.status, BatchStatus::Draft);
        assert!(matches!(gate.request_approval("batch-missing"), Err(Error::BatchNotFound(_))));
    }

    #[test]
    fn test_stale_review_is_noop() {
        let (store, id) = seeded_store();
        let events = EventBus::new(4);

        // Not requested yet
        complete_review(&store, &events, &id, 0, ApprovalParty::CloudAdda, Ok(GateDecision::Approved));
        assert_eq!(
            store.get_batch(&id).unwrap().vm_config.unwrap().approval.cloud_adda,
            GateDecision::Pending
        );

        store
            .update(&id, |b| {
                b.vm_config_mut()?.approval.requested = true;
                Ok(())
            })
            .unwrap();
        // Old generation
        complete_review(&store, &events, &id, 3, ApprovalParty::CloudAdda, Ok(GateDecision::Approved));
        assert_eq!(
            store.get_batch(&id).unwrap().vm_config.unwrap().approval.cloud_adda,
            GateDecision::Pending
        );

        complete_review(&store, &events, &id, 0, ApprovalParty::CloudAdda, Ok(GateDecision::Approved));
        // Already decided
        complete_review(&store, &events, &id, 0, ApprovalParty::CloudAdda, Ok(GateDecision::Rejected));
        assert_eq!(
            store.get_batch(&id).unwrap().vm_config.unwrap().approval.cloud_adda,
            GateDecision::Approved
        );
    }
}
