//! Rental cost estimate for a batch's VM fleet
//!
//! Everything here is pure: the same input always yields the same breakdown,
//! so callers recompute on every query instead of caching.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::{VmConfig, VmType};
use crate::{Error, Result};

/// Per-unit rates. Defaults are per VM per day, plus a flat support fee per day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingRates {
    pub vm_per_day: u64,
    pub storage_per_day: u64,
    pub network_per_day: u64,
    pub support_per_day: u64,
}

impl Default for PricingRates {
    fn default() -> Self {
        Self {
            vm_per_day: 50,
            storage_per_day: 5,
            network_per_day: 2,
            support_per_day: 10,
        }
    }
}

/// The form state the estimate is derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingInput {
    pub vm_type: VmType,
    pub template_count: usize,
    pub participant_count: u32,
    pub admin_count: u32,
    pub vm_start_date: Option<NaiveDate>,
    pub vm_end_date: Option<NaiveDate>,
}

impl From<&VmConfig> for PricingInput {
    fn from(config: &VmConfig) -> Self {
        Self {
            vm_type: config.vm_type,
            template_count: config.templates.len(),
            participant_count: config.participant_count,
            admin_count: config.admin_count,
            vm_start_date: config.vm_start_date,
            vm_end_date: config.vm_end_date,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PricingBreakdown {
    pub vm_cost: u64,
    pub storage_cost: u64,
    pub network_cost: u64,
    pub support_cost: u64,
    pub total_vms: u64,
    pub days: u64,
    pub total: u64,
}

/// `(multi ? templates : 1) * participants + admins`
pub fn total_vms(vm_type: VmType, template_count: usize, participant_count: u32, admin_count: u32) -> Result<u64> {
    let per_participant = match vm_type {
        VmType::Single => 1,
        VmType::Multi => u64::try_from(template_count).map_err(|_| too_large("template count"))?,
    };
    per_participant
        .checked_mul(u64::from(participant_count))
        .and_then(|n| n.checked_add(u64::from(admin_count)))
        .ok_or_else(|| too_large("VM count"))
}

fn too_large(what: &str) -> Error {
    Error::Validation(format!("{} is too large to price", what))
}

/// `vms * rate * days`, failing instead of wrapping.
fn line_cost(vms: u64, rate: u64, days: u64, item: &str) -> Result<u64> {
    vms.checked_mul(rate)
        .and_then(|n| n.checked_mul(days))
        .ok_or_else(|| too_large(item))
}

/// Inclusive day count; zero when either date is missing or the range is inverted.
pub fn rental_days(start: Option<NaiveDate>, end: Option<NaiveDate>) -> u64 {
    match (start, end) {
        (Some(start), Some(end)) if end >= start => (end - start).num_days() as u64 + 1,
        _ => 0,
    }
}

/// Fails with `Error::Validation` when the fleet or range is too large to
/// represent the cost.
pub fn estimate(input: &PricingInput, rates: &PricingRates) -> Result<PricingBreakdown> {
    let total_vms = total_vms(
        input.vm_type,
        input.template_count,
        input.participant_count,
        input.admin_count,
    )?;
    let days = rental_days(input.vm_start_date, input.vm_end_date);

    let vm_cost = line_cost(total_vms, rates.vm_per_day, days, "VM cost")?;
    let storage_cost = line_cost(total_vms, rates.storage_per_day, days, "storage cost")?;
    let network_cost = line_cost(total_vms, rates.network_per_day, days, "network cost")?;
    let support_cost = line_cost(1, rates.support_per_day, days, "support cost")?;

    let total = [vm_cost, storage_cost, network_cost, support_cost]
        .into_iter()
        .try_fold(0u64, u64::checked_add)
        .ok_or_else(|| too_large("total cost"))?;

    Ok(PricingBreakdown {
        vm_cost,
        storage_cost,
        network_cost,
        support_cost,
        total_vms,
        days,
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn single(participants: u32, admins: u32) -> PricingInput {
        PricingInput {
            vm_type: VmType::Single,
            template_count: 1,
            participant_count: participants,
            admin_count: admins,
            vm_start_date: Some(date(1)),
            vm_end_date: Some(date(5)),
        }
    }

    #[test]
    fn test_reference_estimate() {
        let b = estimate(&single(10, 1), &PricingRates::default()).unwrap();
        assert_eq!(b.days, 5);
        assert_eq!(b.total_vms, 11);
        assert_eq!(b.vm_cost, 2750);
        assert_eq!(b.storage_cost, 275);
        assert_eq!(b.network_cost, 110);
        assert_eq!(b.support_cost, 50);
        assert_eq!(b.total, 3185);
    }

    #[test]
    fn test_multi_counts_templates() {
        let input = PricingInput {
            vm_type: VmType::Multi,
            template_count: 3,
            ..single(4, 2)
        };
        assert_eq!(estimate(&input, &PricingRates::default()).unwrap().total_vms, 14);
    }

    #[test]
    fn test_single_ignores_template_count() {
        let input = PricingInput {
            template_count: 3,
            ..single(4, 0)
        };
        assert_eq!(estimate(&input, &PricingRates::default()).unwrap().total_vms, 4);
    }

    #[test]
    fn test_missing_dates_cost_nothing() {
        let input = PricingInput {
            vm_end_date: None,
            ..single(10, 1)
        };
        let b = estimate(&input, &PricingRates::default()).unwrap();
        assert_eq!(b.days, 0);
        assert_eq!(b.total, 0);
        assert_eq!(b.total_vms, 11);
    }

    #[test]
    fn test_same_day_counts_once() {
        assert_eq!(rental_days(Some(date(3)), Some(date(3))), 1);
        assert_eq!(rental_days(Some(date(3)), Some(date(2))), 0);
    }

    #[test]
    fn test_estimate_is_repeatable() {
        let input = single(7, 1);
        let rates = PricingRates::default();
        assert_eq!(estimate(&input, &rates).unwrap(), estimate(&input, &rates).unwrap());
    }

    #[test]
    fn test_huge_fleet_is_rejected() {
        let input = PricingInput {
            vm_type: VmType::Multi,
            template_count: 1_000_000,
            participant_count: u32::MAX,
            admin_count: 0,
            vm_start_date: NaiveDate::from_ymd_opt(2000, 1, 1),
            vm_end_date: NaiveDate::from_ymd_opt(2100, 1, 1),
        };
        let err = estimate(&input, &PricingRates::default()).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_vm_count_overflow() {
        assert!(total_vms(VmType::Multi, usize::MAX, u32::MAX, u32::MAX).is_err());
        assert_eq!(
            total_vms(VmType::Single, 0, u32::MAX, u32::MAX).unwrap(),
            2 * u64::from(u32::MAX)
        );
    }

    #[test]
    fn test_total_overflow_without_line_overflow() {
        let rates = PricingRates {
            vm_per_day: u64::MAX / 2,
            storage_per_day: u64::MAX / 2,
            network_per_day: 0,
            support_per_day: 0,
        };
        let input = PricingInput {
            vm_end_date: Some(date(1)),
            ..single(1, 0)
        };
        assert!(estimate(&input, &rates).is_ok());
        let input = PricingInput { admin_count: 1, ..input };
        assert!(estimate(&input, &rates).unwrap_err().is_validation());
    }
}
