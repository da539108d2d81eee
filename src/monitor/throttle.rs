use crate::monitor::{MonitorConfig, ResourceSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const MIN_DELAY_MULTIPLIER: f64 = 1.25;
const MAX_DELAY_MULTIPLIER: f64 = 4.0;

/// What the orchestrator should do about current load
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ThrottleAction {
    None,
    /// Stretch inter-request delays by `multiplier`
    IncreaseDelay { multiplier: f64 },
    /// Close `by` tabs
    ReduceTabs { by: u32 },
    /// Stop starting new work until load drops
    Pause,
    /// Halt all work
    Stop,
}

impl ThrottleAction {
    /// Apply the severity ladder to a snapshot. The first matching rung wins.
    pub fn evaluate(snapshot: &ResourceSnapshot, config: &MonitorConfig) -> (Self, String) {
        let cpu = snapshot.cpu_percent;
        let memory = snapshot.memory_percent;
        let cpu_critical = cpu >= config.cpu_critical_percent;
        let memory_critical = memory >= config.memory_critical_percent;

        if memory >= config.memory_pressure_critical_percent {
            return (
                ThrottleAction::Stop,
                format!("critical memory pressure at {:.1}%", memory),
            );
        }
        if cpu_critical && memory_critical {
            return (
                ThrottleAction::Stop,
                format!("cpu {:.1}% and memory {:.1}% both critical", cpu, memory),
            );
        }
        if cpu_critical {
            return (ThrottleAction::Pause, format!("cpu critical at {:.1}%", cpu));
        }
        if memory_critical || snapshot.memory_pressure {
            let by = ((snapshot.tab_count as f64) * 0.25).ceil().max(1.0) as u32;
            return (
                ThrottleAction::ReduceTabs { by },
                format!("memory high at {:.1}%", memory),
            );
        }

        let cpu_excess = cpu - config.cpu_warning_percent;
        let memory_excess = memory - config.memory_warning_percent;
        if cpu_excess >= 0.0 || memory_excess >= 0.0 {
            let excess = cpu_excess.max(memory_excess);
            let multiplier = (1.0 + excess / 10.0).clamp(MIN_DELAY_MULTIPLIER, MAX_DELAY_MULTIPLIER);
            return (
                ThrottleAction::IncreaseDelay { multiplier },
                format!("load {:.1} points above warning", excess),
            );
        }

        if snapshot.tab_count >= config.max_tabs {
            return (
                ThrottleAction::ReduceTabs { by: 1 },
                format!("tab limit {} reached", config.max_tabs),
            );
        }

        (ThrottleAction::None, "load normal".to_string())
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ThrottleAction::None)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ThrottleAction::None => "none",
            ThrottleAction::IncreaseDelay { .. } => "increase-delay",
            ThrottleAction::ReduceTabs { .. } => "reduce-tabs",
            ThrottleAction::Pause => "pause",
            ThrottleAction::Stop => "stop",
        }
    }
}

/// Published with `throttle:recommended`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleRecommendation {
    pub action: ThrottleAction,
    pub reason: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub tab_count: u32,
    pub timestamp: DateTime<Utc>,
}

impl ThrottleRecommendation {
    pub fn for_snapshot(snapshot: &ResourceSnapshot, config: &MonitorConfig) -> Self {
        let (action, reason) = ThrottleAction::evaluate(snapshot, config);
        Self {
            action,
            reason,
            cpu_percent: snapshot.cpu_percent,
            memory_percent: snapshot.memory_percent,
            tab_count: snapshot.tab_count,
            timestamp: snapshot.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(cpu: f64, memory: f64, tabs: u32) -> ResourceSnapshot {
        let config = MonitorConfig::default();
        ResourceSnapshot {
            cpu_percent: cpu,
            memory_percent: memory,
            memory_used: 0,
            memory_total: 0,
            memory_available: 0,
            tab_count: tabs,
            memory_pressure: memory >= config.memory_pressure_percent,
            timestamp: Utc::now(),
        }
    }

    fn action(cpu: f64, memory: f64, tabs: u32) -> ThrottleAction {
        ThrottleAction::evaluate(&snapshot(cpu, memory, tabs), &MonitorConfig::default()).0
    }

    #[test]
    fn test_ladder_order() {
        assert_eq!(action(10.0, 96.0, 4), ThrottleAction::Stop);
        assert_eq!(action(95.0, 91.0, 4), ThrottleAction::Stop);
        assert_eq!(action(95.0, 20.0, 4), ThrottleAction::Pause);
        assert_eq!(action(10.0, 91.0, 8), ThrottleAction::ReduceTabs { by: 2 });
        assert_eq!(action(10.0, 86.0, 0), ThrottleAction::ReduceTabs { by: 1 });
        assert_eq!(action(10.0, 20.0, 10), ThrottleAction::ReduceTabs { by: 1 });
        assert_eq!(action(10.0, 20.0, 3), ThrottleAction::None);
    }

    #[test]
    fn test_increase_delay_scales_with_excess() {
        match action(85.0, 20.0, 1) {
            ThrottleAction::IncreaseDelay { multiplier } => {
                assert!((multiplier - 2.5).abs() < 1e-9)
            }
            other => panic!("unexpected {:?}", other),
        }
        match action(71.0, 20.0, 1) {
            ThrottleAction::IncreaseDelay { multiplier } => {
                assert!((multiplier - 1.25).abs() < 1e-9)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_action_wire_format() {
        let json = serde_json::to_value(ThrottleAction::ReduceTabs { by: 2 }).unwrap();
        assert_eq!(json["action"], "reduce-tabs");
        assert_eq!(json["by"], 2);
        assert_eq!(ThrottleAction::Pause.name(), "pause");
    }
}
