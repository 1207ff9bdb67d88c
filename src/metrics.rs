//! Derived metrics over a live building snapshot.
//!
//! Everything here is pure and total: inputs were already coerced by
//! [`crate::telemetry`], so there is nothing left to fail on.

use crate::telemetry::{UnitSnapshot, UnitsSnapshot};
use serde::Serialize;
use std::fmt;

/// Credit below which a unit is critical.
pub const CRITICAL_CREDIT: f64 = 500.0;
/// Credit below which a unit needs attention.
pub const LOW_CREDIT: f64 = 1000.0;
/// Instantaneous power (W) above which consumption is flagged.
pub const HIGH_POWER_W: f64 = 1500.0;

/// Building level aggregates, formatted with two decimals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildingStats {
    pub total_units: usize,
    pub total_power: String,
    pub avg_current: String,
    pub total_credit: String,
    pub total_remaining_energy: String,
}

pub fn compute_building_stats(units: &UnitsSnapshot) -> BuildingStats {
    let count = units.len();
    let sum = |f: fn(&UnitSnapshot) -> f64| units.values().map(f).sum::<f64>();
    let avg_current = if count == 0 {
        0.0
    } else {
        sum(|u| u.current) / count as f64
    };

    BuildingStats {
        total_units: count,
        total_power: two_decimals(sum(|u| u.power)),
        avg_current: two_decimals(avg_current),
        total_credit: two_decimals(sum(|u| u.remaining_credit)),
        total_remaining_energy: two_decimals(sum(|u| u.remaining_energy)),
    }
}

fn two_decimals(v: f64) -> String {
    format!("{v:.2}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Active,
    Warning,
    Critical,
    Inactive,
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitStatus::Active => "active",
            UnitStatus::Warning => "warning",
            UnitStatus::Critical => "critical",
            UnitStatus::Inactive => "inactive",
        };
        f.write_str(s)
    }
}

/// Priority: inactive, then critical credit, then low credit or high power.
/// Low credit and high power together are still only a warning.
pub fn classify_unit_status(unit: &UnitSnapshot) -> UnitStatus {
    if !unit.is_active {
        UnitStatus::Inactive
    } else if unit.remaining_credit < CRITICAL_CREDIT {
        UnitStatus::Critical
    } else if unit.remaining_credit < LOW_CREDIT || unit.power > HIGH_POWER_W {
        UnitStatus::Warning
    } else {
        UnitStatus::Active
    }
}

/// Alert lines for the dashboard banner, in unit order. A unit contributes
/// at most one credit alert and at most one consumption alert.
pub fn collect_alerts(units: &UnitsSnapshot) -> Vec<String> {
    let mut alerts = Vec::new();
    for (unit_id, unit) in units {
        let credit = unit.remaining_credit;
        if credit < CRITICAL_CREDIT {
            alerts.push(format!("{unit_id}: Critical - Low credit (₦{credit})"));
        } else if credit < LOW_CREDIT {
            alerts.push(format!("{unit_id}: Warning - Low credit (₦{credit})"));
        }
        if unit.power > HIGH_POWER_W {
            alerts.push(format!(
                "{unit_id}: High consumption detected ({:.2}W)",
                unit.power
            ));
        }
    }
    alerts
}

/// Tenant-facing status that never reveals the credit balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OperationalStatus {
    Disconnected,
    Critical,
    #[serde(rename = "Attention Required")]
    AttentionRequired,
    Operational,
}

impl OperationalStatus {
    pub fn label(self) -> &'static str {
        match self {
            OperationalStatus::Disconnected => "Disconnected",
            OperationalStatus::Critical => "Critical",
            OperationalStatus::AttentionRequired => "Attention Required",
            OperationalStatus::Operational => "Operational",
        }
    }

    /// Higher is more urgent.
    pub fn priority(self) -> u8 {
        match self {
            OperationalStatus::Disconnected => 3,
            OperationalStatus::Critical => 2,
            OperationalStatus::AttentionRequired => 1,
            OperationalStatus::Operational => 0,
        }
    }

    pub fn action_text(self) -> &'static str {
        match self {
            OperationalStatus::Disconnected => "Immediate restoration required",
            OperationalStatus::Critical => "Contact tenant immediately for credit top-up",
            OperationalStatus::AttentionRequired => {
                "Send notification to tenant for credit top-up"
            }
            OperationalStatus::Operational => "Maintain regular monitoring schedule",
        }
    }
}

impl fmt::Display for OperationalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionableStatus {
    pub status: OperationalStatus,
    pub action_text: &'static str,
    pub priority: u8,
}

pub fn derive_actionable_status(unit: &UnitSnapshot) -> ActionableStatus {
    let credit = unit.remaining_credit;
    let status = if credit == 0.0 {
        OperationalStatus::Disconnected
    } else if credit < CRITICAL_CREDIT {
        OperationalStatus::Critical
    } else if credit < LOW_CREDIT {
        OperationalStatus::AttentionRequired
    } else {
        OperationalStatus::Operational
    };
    ActionableStatus {
        status,
        action_text: status.action_text(),
        priority: status.priority(),
    }
}

/// Report-facing name: `unit_001` becomes `House 001`.
pub fn unit_display_name(unit_id: &str) -> String {
    unit_id.replacen("unit_", "House ", 1)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionItem {
    pub unit: String,
    pub issue: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
}

/// Data behind the "actions" section of a building report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActionableInsights {
    pub immediate: Vec<ActionItem>,
    pub attention: Vec<ActionItem>,
    pub operational: usize,
    pub recommendations: Vec<String>,
}

pub fn actionable_insights(units: &UnitsSnapshot) -> ActionableInsights {
    let mut insights = ActionableInsights::default();

    for (unit_id, unit) in units {
        let name = unit_display_name(unit_id);
        let item = |issue: String, action: &str, since: Option<String>| ActionItem {
            unit: name.clone(),
            issue,
            action: action.to_string(),
            since,
        };

        let status = derive_actionable_status(unit).status;
        match status {
            OperationalStatus::Disconnected => insights.immediate.push(item(
                "Service Interruption".into(),
                status.action_text(),
                unit.timestamp.clone(),
            )),
            OperationalStatus::Critical => insights.immediate.push(item(
                "Critical Low Credit".into(),
                status.action_text(),
                None,
            )),
            OperationalStatus::AttentionRequired => insights.attention.push(item(
                "Low Credit Warning".into(),
                status.action_text(),
                None,
            )),
            OperationalStatus::Operational => insights.operational += 1,
        }

        if unit.power > HIGH_POWER_W {
            insights.attention.push(item(
                format!("High Power Consumption ({:.2}W)", unit.power),
                "Monitor for potential issues or anomalies",
                None,
            ));
        }
    }

    if !insights.immediate.is_empty() {
        insights
            .recommendations
            .push("Priority: Address disconnected units immediately to restore service".into());
    }
    if insights.immediate.len() + insights.attention.len() > 3 {
        insights
            .recommendations
            .push("Consider implementing automated credit alerts for tenants".into());
    }
    if !units.is_empty() && insights.operational == units.len() {
        insights
            .recommendations
            .push("All units operational - maintain regular monitoring schedule".into());
    }

    insights
}
