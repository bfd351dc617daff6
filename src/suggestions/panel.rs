//! Suggestion panel state: open flag, dismissals, live list

use std::collections::{BTreeSet, HashSet};

use super::context::ContextSnapshot;
use super::engine::{suggest, Suggestion};
use super::location::{BatchTab, Location, SuggestionAction};

/// Where selecting a suggestion takes the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Stay,
    Navigate(Location),
    FocusTab { location: Location, tab: BatchTab },
}

#[derive(Debug, Default)]
pub struct SuggestionPanel {
    is_open: bool,
    dismissed: HashSet<String>,
    completed_actions: BTreeSet<String>,
    location: Location,
    live: Vec<Suggestion>,
}

impl SuggestionPanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn open(&mut self) {
        self.is_open = true;
    }

    pub fn close(&mut self) {
        self.is_open = false;
    }

    pub fn toggle(&mut self) -> bool {
        self.is_open = !self.is_open;
        self.is_open
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Hide a suggestion for the rest of the session.
    pub fn dismiss(&mut self, id: &str) {
        if self.dismissed.insert(id.to_string()) {
            tracing::debug!(suggestion = %id, "Suggestion dismissed");
        }
    }

    pub fn is_dismissed(&self, id: &str) -> bool {
        self.dismissed.contains(id)
    }

    pub fn reset_dismissed(&mut self) {
        self.dismissed.clear();
    }

    pub fn completed_actions(&self) -> &BTreeSet<String> {
        &self.completed_actions
    }

    /// Recompute the list for a new location or changed state.
    pub fn refresh(&mut self, location: Location, ctx: &ContextSnapshot) {
        self.live = suggest(&location, ctx);
        self.location = location;
    }

    /// The live list minus dismissed entries.
    pub fn visible(&self) -> Vec<Suggestion> {
        self.live
            .iter()
            .filter(|s| !self.dismissed.contains(s.id))
            .cloned()
            .collect()
    }

    /// Act on a visible suggestion. The suggestion is dismissed either way.
    pub fn select(&mut self, id: &str) -> Option<Navigation> {
        let suggestion = self
            .live
            .iter()
            .find(|s| s.id == id && !self.dismissed.contains(s.id))?
            .clone();

        self.dismiss(id);
        if suggestion.action != SuggestionAction::None {
            self.completed_actions.insert(suggestion.action.to_string());
        }

        let navigation = match suggestion.action {
            SuggestionAction::None => Navigation::Stay,
            SuggestionAction::Tab(tab) => match self.location.batch_id() {
                Some(batch_id) => Navigation::FocusTab {
                    location: Location::batch(batch_id),
                    tab,
                },
                None => Navigation::Stay,
            },
            SuggestionAction::Navigate(location) => Navigation::Navigate(location),
        };
        tracing::debug!(suggestion = %id, ?navigation, "Suggestion selected");
        Some(navigation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suggestions::BatchFlags;

    fn empty() -> ContextSnapshot {
        ContextSnapshot::default()
    }

    fn batch_ctx() -> ContextSnapshot {
        ContextSnapshot {
            has_batches: true,
            has_templates: true,
            batch: Some(BatchFlags {
                batch_id: "batch-7".into(),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_open_close_toggle() {
        let mut panel = SuggestionPanel::new();
        assert!(!panel.is_open());
        assert!(panel.toggle());
        panel.close();
        assert!(!panel.is_open());
        panel.open();
        assert!(panel.is_open());
    }

    #[test]
    fn test_dismissal_survives_refresh() {
        let mut panel = SuggestionPanel::new();
        panel.refresh(Location::Dashboard, &empty());
        assert_eq!(panel.visible().len(), 2);

        panel.dismiss("create-first-batch");
        for _ in 0..3 {
            panel.refresh(Location::Dashboard, &empty());
            assert!(panel.visible().iter().all(|s| s.id != "create-first-batch"));
        }
        panel.refresh(Location::Batches, &empty());
        assert!(panel.visible().is_empty());

        panel.reset_dismissed();
        panel.refresh(Location::Batches, &empty());
        assert_eq!(panel.visible()[0].id, "create-first-batch");
    }

    #[test]
    fn test_select_route_action() {
        let mut panel = SuggestionPanel::new();
        panel.refresh(Location::Dashboard, &empty());

        let nav = panel.select("add-vm-template").unwrap();
        assert_eq!(nav, Navigation::Navigate(Location::VmTemplates));
        assert!(panel.is_dismissed("add-vm-template"));
        assert!(panel.completed_actions().contains("/vm-templates"));
        assert!(panel.select("add-vm-template").is_none());
    }

    #[test]
    fn test_select_tab_action() {
        let mut panel = SuggestionPanel::new();
        panel.refresh(Location::batch("batch-7"), &batch_ctx());

        let nav = panel.select("enroll-students").unwrap();
        assert_eq!(
            nav,
            Navigation::FocusTab {
                location: Location::batch("batch-7"),
                tab: BatchTab::Students,
            }
        );
        assert!(panel.completed_actions().contains("tab:students"));
    }

    #[test]
    fn test_select_none_action_only_dismisses() {
        let mut panel = SuggestionPanel::new();
        let mut ctx = batch_ctx();
        if let Some(flags) = ctx.batch.as_mut() {
            flags.trainer_vm = crate::suggestions::TrainerVmStatus::Provisioning;
        }
        panel.refresh(Location::batch("batch-7"), &ctx);

        assert_eq!(panel.select("trainer-vm-provisioning"), Some(Navigation::Stay));
        assert!(panel.is_dismissed("trainer-vm-provisioning"));
        assert!(panel.completed_actions().is_empty());
    }

    #[test]
    fn test_select_unknown() {
        let mut panel = SuggestionPanel::new();
        panel.refresh(Location::Dashboard, &empty());
        assert!(panel.select("does-not-exist").is_none());
        assert!(panel.completed_actions().is_empty());
    }
}
