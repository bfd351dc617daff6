//! batch-console CLI - price VM labs, inspect suggestions, run the workflow

use std::path::PathBuf;

use batch_console::models::*;
use batch_console::pricing::{self, PricingInput};
use batch_console::suggestions::{
    suggest, ApprovalProgress, BatchFlags, CloneStatus, ContextSnapshot, Location, Suggestion,
    TrainerVmStatus,
};
use batch_console::{Console, ConsoleConfig, DetailsForm, Error, Result, WorkflowEvent};
use chrono::{Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tabled::{Table, Tabled};
use tokio::sync::broadcast::{self, error::RecvError};

#[derive(Parser)]
#[command(name = "batch-console")]
#[command(about = "Training batch and VM lab workflow console")]
#[command(version)]
struct Cli {
    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate the rental cost of a VM lab
    Pricing {
        #[arg(long, default_value = "single")]
        vm_type: VmType,
        /// Number of template entries
        #[arg(long, default_value = "1")]
        templates: usize,
        #[arg(short, long, default_value = "1")]
        participants: u32,
        #[arg(short, long, default_value = "1")]
        admins: u32,
        /// First rental day (YYYY-MM-DD)
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Last rental day (YYYY-MM-DD)
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show suggestions for a route and a synthetic context
    Suggest {
        /// Route path, e.g. / or /batches/batch-1
        #[arg(short, long, default_value = "/")]
        route: String,
        #[arg(long)]
        has_batches: bool,
        #[arg(long)]
        has_templates: bool,
        /// VM entries are complete (batch routes)
        #[arg(long)]
        has_vms: bool,
        #[arg(long)]
        has_students: bool,
        #[arg(long)]
        has_course: bool,
        #[arg(long, value_enum, default_value = "not-provisioned")]
        trainer_vm: TrainerArg,
        #[arg(long, value_enum, default_value = "not-started")]
        clone: CloneArg,
        #[arg(long, value_enum, default_value = "not-requested")]
        approval: ApprovalArg,
        /// Number of VM entries
        #[arg(long, default_value = "0")]
        vm_entries: usize,
        #[arg(long)]
        active: bool,
    },
    /// Walk a batch through creation, provisioning, cloning and approval
    Demo {
        #[arg(short, long, default_value = "Demo Batch")]
        name: String,
        #[arg(short, long, default_value = "3")]
        participants: u32,
        /// Students to enroll
        #[arg(short, long, default_value = "3")]
        students: u32,
        /// Skip simulated delays
        #[arg(long)]
        fast: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TrainerArg {
    NotProvisioned,
    Provisioning,
    Provisioned,
    Failed,
}

#[derive(Clone, Copy, ValueEnum)]
enum CloneArg {
    NotStarted,
    Cloning,
    Cloned,
    Failed,
}

#[derive(Clone, Copy, ValueEnum)]
enum ApprovalArg {
    NotRequested,
    Pending,
    Rejected,
    Approved,
}

impl From<TrainerArg> for TrainerVmStatus {
    fn from(arg: TrainerArg) -> Self {
        match arg {
            TrainerArg::NotProvisioned => TrainerVmStatus::NotProvisioned,
            TrainerArg::Provisioning => TrainerVmStatus::Provisioning,
            TrainerArg::Provisioned => TrainerVmStatus::Provisioned,
            TrainerArg::Failed => TrainerVmStatus::Failed,
        }
    }
}

impl From<CloneArg> for CloneStatus {
    fn from(arg: CloneArg) -> Self {
        match arg {
            CloneArg::NotStarted => CloneStatus::NotStarted,
            CloneArg::Cloning => CloneStatus::Cloning,
            CloneArg::Cloned => CloneStatus::Cloned,
            CloneArg::Failed => CloneStatus::Failed,
        }
    }
}

impl From<ApprovalArg> for ApprovalProgress {
    fn from(arg: ApprovalArg) -> Self {
        match arg {
            ApprovalArg::NotRequested => ApprovalProgress::NotRequested,
            ApprovalArg::Pending => ApprovalProgress::Pending,
            ApprovalArg::Rejected => ApprovalProgress::Rejected,
            ApprovalArg::Approved => ApprovalProgress::Approved,
        }
    }
}

// Table display structs
#[derive(Tabled)]
struct CostRow {
    #[tabled(rename = "Item")]
    item: &'static str,
    #[tabled(rename = "Amount")]
    amount: u64,
}

#[derive(Tabled)]
struct SuggestionRow {
    #[tabled(rename = "Priority")]
    priority: i32,
    #[tabled(rename = "ID")]
    id: &'static str,
    #[tabled(rename = "Title")]
    title: &'static str,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Action")]
    action: String,
}

#[derive(Tabled)]
struct VmRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Role")]
    role: String,
    #[tabled(rename = "Student")]
    student: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { "debug" } else { "info" };
    let directive: tracing_subscriber::filter::Directive = format!("batch_console={}", level)
        .parse()
        .map_err(|e| Error::Config(format!("log filter: {}", e)))?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .init();

    let config = match &cli.config {
        Some(path) => ConsoleConfig::from_json_file(path)?,
        None => ConsoleConfig::default(),
    };

    match cli.command {
        Commands::Pricing {
            vm_type,
            templates,
            participants,
            admins,
            start,
            end,
            json,
        } => {
            let input = PricingInput {
                vm_type,
                template_count: templates,
                participant_count: participants,
                admin_count: admins,
                vm_start_date: start,
                vm_end_date: end,
            };
            let breakdown = pricing::estimate(&input, &config.pricing)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&breakdown)?);
            } else {
                let rows = vec![
                    CostRow { item: "VMs", amount: breakdown.total_vms },
                    CostRow { item: "Days", amount: breakdown.days },
                    CostRow { item: "VM cost", amount: breakdown.vm_cost },
                    CostRow { item: "Storage", amount: breakdown.storage_cost },
                    CostRow { item: "Network", amount: breakdown.network_cost },
                    CostRow { item: "Support", amount: breakdown.support_cost },
                    CostRow { item: "Total", amount: breakdown.total },
                ];
                println!("{}", Table::new(rows));
            }
        }
        Commands::Suggest {
            route,
            has_batches,
            has_templates,
            has_vms,
            has_students,
            has_course,
            trainer_vm,
            clone,
            approval,
            vm_entries,
            active,
        } => {
            let location: Location = route.parse()?;
            let batch = location.batch_id().map(|id| BatchFlags {
                batch_id: id.to_string(),
                has_vms,
                has_students,
                has_course,
                trainer_vm: trainer_vm.into(),
                clone: clone.into(),
                vm_entry_count: vm_entries,
                approval: approval.into(),
                active,
            });
            let ctx = ContextSnapshot {
                has_batches,
                has_templates,
                batch,
            };
            print_suggestions(&suggest(&location, &ctx));
        }
        Commands::Demo {
            name,
            participants,
            students,
            fast,
        } => {
            let config = if fast {
                ConsoleConfig {
                    provision_delay_ms: 0,
                    clone_delay_ms: 0,
                    cloud_adda_delay_ms: 0,
                    company_admin_delay_ms: 0,
                    ..config
                }
            } else {
                config
            };
            run_demo(config, name, participants, students).await?;
        }
    }

    Ok(())
}

fn print_suggestions(list: &[Suggestion]) {
    if list.is_empty() {
        println!("No suggestions.");
        return;
    }
    let rows: Vec<SuggestionRow> = list
        .iter()
        .map(|s| SuggestionRow {
            priority: s.priority,
            id: s.id,
            title: s.title,
            category: s.category.to_string(),
            action: s.action.to_string(),
        })
        .collect();
    println!("{}", Table::new(rows));
}

/// Print events until one matches `done`.
async fn wait_for(
    rx: &mut broadcast::Receiver<WorkflowEvent>,
    done: impl Fn(&WorkflowEvent) -> bool,
) -> Result<WorkflowEvent> {
    loop {
        match rx.recv().await {
            Ok(event) => {
                println!("  event: {}", serde_json::to_string(&event)?);
                if let WorkflowEvent::StageFailed { reason, .. } = &event {
                    return Err(Error::Provisioning(reason.clone()));
                }
                if done(&event) {
                    return Ok(event);
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event stream lagged");
            }
            Err(RecvError::Closed) => {
                return Err(Error::Runtime("event stream closed".into()));
            }
        }
    }
}

async fn run_demo(config: ConsoleConfig, name: String, participants: u32, students: u32) -> Result<()> {
    let console = Console::new(config)?;
    let mut rx = console.subscribe();
    console.open_panel();

    println!("== Dashboard");
    print_suggestions(&console.navigate(Location::Dashboard));

    let template = console.register_template(
        VmTemplate::new("ubuntu-22.04", "Ubuntu 22.04 LTS")
            .with_description("Docker and VS Code preinstalled"),
    )?;

    println!("\n== Creating batch '{}'", name);
    let start = Utc::now().date_naive();
    let end = start + Duration::days(4);
    let mut wizard = console.wizard();
    wizard.submit_details(DetailsForm::new(&name, students.max(participants)).course("course-intro"))?;
    let id = wizard.submit_schedule(BatchSchedule::new(start, end))?;
    wizard.submit_vms(
        VmConfigPatch::new()
            .templates(vec![TemplateAssignment::new(&template, "lab")])
            .participants(participants)
            .dates(start, end),
    )?;
    let review = wizard.review()?;
    println!(
        "  {} VMs for {} days, estimated total {}",
        review.pricing.total_vms, review.pricing.days, review.pricing.total
    );

    for n in 1..=students {
        console.add_student(
            &id,
            NewStudent::new(format!("Student {}", n), format!("student{}@example.com", n)),
        )?;
    }

    println!("\n== Batch details");
    print_suggestions(&console.navigate(Location::batch(&id)));

    println!("\n== Provisioning trainer VM");
    console.provision_admin(&id)?;
    wait_for(&mut rx, |e| matches!(e, WorkflowEvent::AdminVmProvisioned { .. })).await?;
    let session = console.launch_console(&id)?;
    println!("  console open on {}", session.instance_name);
    print_suggestions(&console.suggestions());

    println!("\n== Cloning for participants");
    console.clone_for_batch(&id)?;
    wait_for(&mut rx, |e| matches!(e, WorkflowEvent::Cloned { .. })).await?;

    let batch = console.batch(&id)?;
    let config = batch.vm_config()?;
    let rows: Vec<VmRow> = config
        .instances
        .iter()
        .map(|vm| VmRow {
            name: vm.name.clone(),
            role: format!("{:?}", vm.role).to_lowercase(),
            student: vm
                .student_id
                .as_deref()
                .and_then(|sid| batch.student(sid))
                .map(|s| s.name.clone())
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    println!("{}", Table::new(rows));
    print_suggestions(&console.suggestions());

    println!("\n== Requesting approval");
    console.request_approval(&id)?;
    while !console.approval_status(&id)?.is_approved() {
        wait_for(&mut rx, |e| matches!(e, WorkflowEvent::GateDecided { .. })).await?;
        if console.approval_status(&id)?.any_rejected() {
            return Err(Error::Approval("batch was rejected".into()));
        }
    }
    print_suggestions(&console.suggestions());

    console.activate_batch(&id)?;
    println!("\n== Batch {} is {}", id, console.batch(&id)?.status);
    print_suggestions(&console.suggestions());

    console.shutdown().await;
    Ok(())
}
