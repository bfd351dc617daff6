//! Rule table and priority resolution
//!
//! Each rule pairs the locations it applies to with a predicate over the
//! context snapshot. Matching rules contribute their suggestion; the result is
//! sorted by priority, highest first, with ties kept in table order.

use once_cell::sync::Lazy;
use serde::Serialize;

use super::context::{ApprovalProgress, BatchFlags, CloneStatus, ContextSnapshot, TrainerVmStatus};
use super::location::{BatchTab, Location, SuggestionAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    GettingStarted,
    Setup,
    VmLab,
    Enrollment,
    Approval,
    Overview,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::GettingStarted => write!(f, "getting started"),
            Category::Setup => write!(f, "setup"),
            Category::VmLab => write!(f, "vm lab"),
            Category::Enrollment => write!(f, "enrollment"),
            Category::Approval => write!(f, "approval"),
            Category::Overview => write!(f, "overview"),
        }
    }
}

/// A derived "next action" prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    /// Stable key used for dismissal
    pub id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub action: SuggestionAction,
    pub category: Category,
    /// Higher is more urgent
    pub priority: i32,
}

/// Where a rule applies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutePattern {
    Exact(Location),
    /// Any `/batches/{id}` view
    BatchDetails,
}

impl RoutePattern {
    pub fn matches(&self, location: &Location) -> bool {
        match self {
            RoutePattern::Exact(expected) => expected == location,
            RoutePattern::BatchDetails => location.batch_id().is_some(),
        }
    }
}

struct Rule {
    routes: Vec<RoutePattern>,
    when: fn(&ContextSnapshot) -> bool,
    template: Suggestion,
}

impl Rule {
    fn new(routes: Vec<RoutePattern>, when: fn(&ContextSnapshot) -> bool, template: Suggestion) -> Self {
        Self { routes, when, template }
    }

    fn applies(&self, location: &Location, ctx: &ContextSnapshot) -> bool {
        self.routes.iter().any(|r| r.matches(location)) && (self.when)(ctx)
    }
}

fn exact(locations: &[Location]) -> Vec<RoutePattern> {
    locations.iter().cloned().map(RoutePattern::Exact).collect()
}

fn batch_details() -> Vec<RoutePattern> {
    vec![RoutePattern::BatchDetails]
}

fn batch_flag(ctx: &ContextSnapshot, f: impl Fn(&BatchFlags) -> bool) -> bool {
    ctx.batch.as_ref().is_some_and(f)
}

fn suggestion(
    id: &'static str,
    title: &'static str,
    description: &'static str,
    action: SuggestionAction,
    category: Category,
    priority: i32,
) -> Suggestion {
    Suggestion {
        id,
        title,
        description,
        action,
        category,
        priority,
    }
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    use SuggestionAction::{Navigate, Tab};

    vec![
        // Dashboard and batch list
        Rule::new(
            exact(&[Location::Dashboard, Location::Batches]),
            |ctx| !ctx.has_batches,
            suggestion(
                "create-first-batch",
                "Create your first batch",
                "Set up a cohort with a schedule, seats and a VM lab.",
                Navigate(Location::CreateBatch),
                Category::GettingStarted,
                100,
            ),
        ),
        Rule::new(
            exact(&[Location::Dashboard, Location::CreateBatch, Location::VmTemplates]),
            |ctx| !ctx.has_templates,
            suggestion(
                "add-vm-template",
                "Add a VM template",
                "Batches provision their lab VMs from templates in the catalog.",
                Navigate(Location::VmTemplates),
                Category::Setup,
                90,
            ),
        ),
        Rule::new(
            exact(&[Location::Dashboard]),
            |ctx| ctx.has_batches,
            suggestion(
                "review-batches",
                "Review your batches",
                "Check provisioning and approval progress across batches.",
                Navigate(Location::Batches),
                Category::Overview,
                20,
            ),
        ),
        Rule::new(
            exact(&[Location::Batches]),
            |ctx| ctx.has_batches,
            suggestion(
                "create-another-batch",
                "Create another batch",
                "Start a new cohort from the batch wizard.",
                Navigate(Location::CreateBatch),
                Category::Overview,
                10,
            ),
        ),
        // Batch details: VM lab
        Rule::new(
            batch_details(),
            |ctx| batch_flag(ctx, |b| b.vm_entry_count == 0),
            suggestion(
                "configure-batch-vms",
                "Configure the VM lab",
                "Pick templates and participant counts for this batch.",
                Tab(BatchTab::Vms),
                Category::VmLab,
                90,
            ),
        ),
        Rule::new(
            batch_details(),
            |ctx| batch_flag(ctx, |b| b.vm_entry_count > 0 && !b.has_vms),
            suggestion(
                "complete-vm-entries",
                "Finish the VM entries",
                "Every VM entry needs a template and an instance name.",
                Tab(BatchTab::Vms),
                Category::VmLab,
                65,
            ),
        ),
        Rule::new(
            batch_details(),
            |ctx| batch_flag(ctx, |b| b.trainer_vm == TrainerVmStatus::Failed),
            suggestion(
                "retry-trainer-vm",
                "Retry trainer VM provisioning",
                "The last provisioning attempt failed.",
                Tab(BatchTab::Vms),
                Category::VmLab,
                95,
            ),
        ),
        Rule::new(
            batch_details(),
            |ctx| batch_flag(ctx, |b| b.has_vms && b.trainer_vm == TrainerVmStatus::NotProvisioned),
            suggestion(
                "provision-trainer-vm",
                "Provision the trainer VM",
                "Bring up the trainer VM so it can be configured and cloned.",
                Tab(BatchTab::Vms),
                Category::VmLab,
                85,
            ),
        ),
        Rule::new(
            batch_details(),
            |ctx| batch_flag(ctx, |b| b.trainer_vm == TrainerVmStatus::Provisioning),
            suggestion(
                "trainer-vm-provisioning",
                "Trainer VM is provisioning",
                "This usually takes a few seconds.",
                SuggestionAction::None,
                Category::VmLab,
                40,
            ),
        ),
        Rule::new(
            batch_details(),
            |ctx| {
                batch_flag(ctx, |b| {
                    b.trainer_vm == TrainerVmStatus::Provisioned && b.clone == CloneStatus::NotStarted
                })
            },
            suggestion(
                "configure-trainer-vm",
                "Configure the trainer VM",
                "Open the console and install what participants will need.",
                Tab(BatchTab::Vms),
                Category::VmLab,
                80,
            ),
        ),
        Rule::new(
            batch_details(),
            |ctx| {
                batch_flag(ctx, |b| {
                    b.trainer_vm == TrainerVmStatus::Provisioned && b.clone == CloneStatus::NotStarted
                })
            },
            suggestion(
                "clone-trainer-vm",
                "Clone VMs for participants",
                "Duplicate the configured trainer VM once per participant.",
                Tab(BatchTab::Vms),
                Category::VmLab,
                80,
            ),
        ),
        Rule::new(
            batch_details(),
            |ctx| batch_flag(ctx, |b| b.clone == CloneStatus::Failed),
            suggestion(
                "retry-clone",
                "Retry cloning",
                "Cloning the trainer VM failed; the trainer VM is intact.",
                Tab(BatchTab::Vms),
                Category::VmLab,
                95,
            ),
        ),
        // Batch details: people and content
        Rule::new(
            batch_details(),
            |ctx| batch_flag(ctx, |b| !b.has_students),
            suggestion(
                "enroll-students",
                "Enroll students",
                "Cloned VMs are handed to students in enrollment order.",
                Tab(BatchTab::Students),
                Category::Enrollment,
                70,
            ),
        ),
        Rule::new(
            batch_details(),
            |ctx| batch_flag(ctx, |b| !b.has_course),
            suggestion(
                "assign-course",
                "Assign a course",
                "Link the curriculum this batch will follow.",
                Tab(BatchTab::Course),
                Category::Enrollment,
                60,
            ),
        ),
        // Batch details: approval
        Rule::new(
            batch_details(),
            |ctx| {
                batch_flag(ctx, |b| {
                    b.clone == CloneStatus::Cloned && b.approval == ApprovalProgress::NotRequested
                })
            },
            suggestion(
                "request-approval",
                "Request approval",
                "CloudAdda and the company admin both sign off before launch.",
                Tab(BatchTab::Approval),
                Category::Approval,
                75,
            ),
        ),
        Rule::new(
            batch_details(),
            |ctx| batch_flag(ctx, |b| b.approval == ApprovalProgress::Pending),
            suggestion(
                "awaiting-approval",
                "Waiting for approval",
                "Both parties have been asked to review this batch.",
                SuggestionAction::None,
                Category::Approval,
                30,
            ),
        ),
        Rule::new(
            batch_details(),
            |ctx| batch_flag(ctx, |b| b.approval == ApprovalProgress::Rejected),
            suggestion(
                "approval-rejected",
                "Approval was rejected",
                "Adjust the batch and request approval again.",
                Tab(BatchTab::Approval),
                Category::Approval,
                95,
            ),
        ),
        Rule::new(
            batch_details(),
            |ctx| batch_flag(ctx, |b| b.approval == ApprovalProgress::Approved && !b.active),
            suggestion(
                "activate-batch",
                "Activate the batch",
                "Both approvals are in.",
                Tab(BatchTab::Overview),
                Category::Approval,
                88,
            ),
        ),
    ]
});

/// Suggestions for `location`, most urgent first. Dismissal is not applied.
pub fn suggest(location: &Location, ctx: &ContextSnapshot) -> Vec<Suggestion> {
    let mut matched: Vec<Suggestion> = RULES
        .iter()
        .filter(|rule| rule.applies(location, ctx))
        .map(|rule| rule.template.clone())
        .collect();
    // sort_by is stable; equal priorities keep table order
    matched.sort_by(|a, b| b.priority.cmp(&a.priority));
    matched
}

/// Every suggestion id in table order.
pub fn rule_ids() -> Vec<&'static str> {
    RULES.iter().map(|rule| rule.template.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn ids(list: &[Suggestion]) -> Vec<&'static str> {
        list.iter().map(|s| s.id).collect()
    }

    fn on_batch(flags: BatchFlags) -> (Location, ContextSnapshot) {
        let location = Location::batch(flags.batch_id.clone());
        let ctx = ContextSnapshot {
            has_batches: true,
            has_templates: true,
            batch: Some(flags),
        };
        (location, ctx)
    }

    fn configured() -> BatchFlags {
        BatchFlags {
            batch_id: "batch-1".into(),
            has_vms: true,
            has_students: true,
            has_course: true,
            vm_entry_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_rule_ids_unique() {
        let all = rule_ids();
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), all.len());
    }

    #[test]
    fn test_empty_batches_route() {
        let ctx = ContextSnapshot::default();
        let list = suggest(&Location::Batches, &ctx);
        assert_eq!(ids(&list), vec!["create-first-batch"]);

        let list = suggest(&Location::Dashboard, &ctx);
        assert_eq!(ids(&list), vec!["create-first-batch", "add-vm-template"]);
        assert_eq!(list[0].action, SuggestionAction::Navigate(Location::CreateBatch));
    }

    #[test]
    fn test_dashboard_with_batches() {
        let ctx = ContextSnapshot {
            has_batches: true,
            has_templates: true,
            batch: None,
        };
        assert_eq!(ids(&suggest(&Location::Dashboard, &ctx)), vec!["review-batches"]);
        assert!(suggest(&Location::Settings, &ctx).is_empty());
    }

    #[test]
    fn test_new_batch_suggestions() {
        let (location, ctx) = on_batch(BatchFlags {
            batch_id: "batch-1".into(),
            ..Default::default()
        });
        assert_eq!(
            ids(&suggest(&location, &ctx)),
            vec!["configure-batch-vms", "enroll-students", "assign-course"]
        );
    }

    #[test]
    fn test_equal_priority_keeps_table_order() {
        let (location, ctx) = on_batch(BatchFlags {
            trainer_vm: TrainerVmStatus::Provisioned,
            ..configured()
        });
        let list = suggest(&location, &ctx);
        assert_eq!(ids(&list), vec!["configure-trainer-vm", "clone-trainer-vm"]);
        assert_eq!(list[0].priority, list[1].priority);
    }

    #[test]
    fn test_sorted_descending() {
        let (location, ctx) = on_batch(BatchFlags {
            batch_id: "batch-1".into(),
            vm_entry_count: 2,
            trainer_vm: TrainerVmStatus::Failed,
            ..Default::default()
        });
        let list = suggest(&location, &ctx);
        assert_eq!(
            ids(&list),
            vec!["retry-trainer-vm", "enroll-students", "complete-vm-entries", "assign-course"]
        );
        assert!(list.windows(2).all(|w| w[0].priority >= w[1].priority));
    }

    #[test]
    fn test_approval_rules() {
        let (location, ctx) = on_batch(BatchFlags {
            trainer_vm: TrainerVmStatus::Provisioned,
            clone: CloneStatus::Cloned,
            ..configured()
        });
        assert_eq!(ids(&suggest(&location, &ctx)), vec!["request-approval"]);

        let (location, ctx) = on_batch(BatchFlags {
            trainer_vm: TrainerVmStatus::Provisioned,
            clone: CloneStatus::Cloned,
            approval: ApprovalProgress::Approved,
            ..configured()
        });
        assert_eq!(ids(&suggest(&location, &ctx)), vec!["activate-batch"]);

        let (location, ctx) = on_batch(BatchFlags {
            approval: ApprovalProgress::Approved,
            active: true,
            clone: CloneStatus::Cloned,
            trainer_vm: TrainerVmStatus::Provisioned,
            ..configured()
        });
        assert!(suggest(&location, &ctx).is_empty());
    }

    #[test]
    fn test_batch_rules_need_batch_context() {
        let ctx = ContextSnapshot {
            has_batches: true,
            has_templates: true,
            batch: None,
        };
        assert!(suggest(&Location::batch("batch-gone"), &ctx).is_empty());
    }

    #[test]
    fn test_pure() {
        let (location, ctx) = on_batch(configured());
        assert_eq!(suggest(&location, &ctx), suggest(&location, &ctx));
    }
}
