//! Access decision engine
//!
//! Plate text in, GRANTED / DENIED / FAILED out. Side effects per outcome:
//! - GRANTED: gate trigger, then one ENTRY log row
//! - DENIED: one DENIED log row, gate untouched
//! - FAILED: nothing
//!
//! A registry failure is reported as an error, never as DENIED.

use crate::domain::error::RegistryError;
use crate::domain::types::{plate_candidate, AccessLogEntry, DecisionStatus};
use crate::io::registry::Registry;
use crate::services::gate::GateStateMachine;
use std::sync::Arc;
use tracing::{info, warn};

pub const MSG_NO_PLATE: &str = "No Plate Detected";
pub const MSG_UNREGISTERED: &str = "Unregistered Vehicle";

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub status: DecisionStatus,
    pub plate_text: Option<String>,
    pub employee_name: Option<String>,
    pub message: String,
    pub gate_triggered: bool,
    /// The row appended to the access log, if any
    pub log: Option<AccessLogEntry>,
}

impl Decision {
    fn failed() -> Self {
        Self {
            status: DecisionStatus::Failed,
            plate_text: None,
            employee_name: None,
            message: MSG_NO_PLATE.to_string(),
            gate_triggered: false,
            log: None,
        }
    }
}

pub struct AccessDecisionEngine {
    registry: Arc<dyn Registry>,
    gate: GateStateMachine,
    min_plate_len: usize,
}

impl AccessDecisionEngine {
    pub fn new(registry: Arc<dyn Registry>, gate: GateStateMachine, min_plate_len: usize) -> Self {
        Self { registry, gate, min_plate_len }
    }

    pub async fn decide(&self, plate_text: Option<&str>) -> Result<Decision, RegistryError> {
        let Some(plate) = plate_text.and_then(|raw| plate_candidate(raw, self.min_plate_len))
        else {
            return Ok(Decision::failed());
        };

        let owner = self.registry.find_employee_by_plate(&plate).await.map_err(|e| {
            warn!(plate = %plate, error = %e, "registry_lookup_failed");
            e
        })?;

        match owner {
            Some(owner) => {
                let generation = self.gate.trigger();
                let entry = AccessLogEntry::entry(owner.employee_id, &plate);
                self.registry.append_log(&entry).await.map_err(|e| {
                    warn!(plate = %plate, generation = %generation, error = %e, "access_log_append_failed");
                    e
                })?;

                info!(
                    plate = %plate,
                    employee_id = %owner.employee_id,
                    name = %owner.name,
                    "access_granted"
                );
                Ok(Decision {
                    status: DecisionStatus::Granted,
                    plate_text: Some(plate),
                    message: format!("Authorized: {}", owner.name),
                    employee_name: Some(owner.name),
                    gate_triggered: true,
                    log: Some(entry),
                })
            }
            None => {
                let entry = AccessLogEntry::denied(&plate);
                self.registry.append_log(&entry).await.map_err(|e| {
                    warn!(plate = %plate, error = %e, "access_log_append_failed");
                    e
                })?;

                info!(plate = %plate, "access_denied");
                Ok(Decision {
                    status: DecisionStatus::Denied,
                    plate_text: Some(plate),
                    employee_name: None,
                    message: MSG_UNREGISTERED.to_string(),
                    gate_triggered: false,
                    log: Some(entry),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{
        AccessAction, AccessLogView, EmployeeId, EmployeeWithPlate, NewEmployee, PlateOwner,
    };
    use crate::infra::metrics::Metrics;
    use crate::io::registry::SqliteRegistry;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Every call fails as if the database were gone
    struct DownRegistry;

    #[async_trait]
    impl Registry for DownRegistry {
        async fn find_employee_by_plate(&self, _: &str) -> Result<Option<PlateOwner>, RegistryError> {
            Err(RegistryError::Unavailable("database is locked".into()))
        }
        async fn append_log(&self, _: &AccessLogEntry) -> Result<(), RegistryError> {
            Err(RegistryError::Unavailable("database is locked".into()))
        }
        async fn list_recent_logs(&self, _: usize) -> Result<Vec<AccessLogView>, RegistryError> {
            Err(RegistryError::Unavailable("database is locked".into()))
        }
        async fn list_employees_with_plates(&self) -> Result<Vec<EmployeeWithPlate>, RegistryError> {
            Err(RegistryError::Unavailable("database is locked".into()))
        }
        async fn add_employee(&self, _: NewEmployee) -> Result<EmployeeWithPlate, RegistryError> {
            Err(RegistryError::Unavailable("database is locked".into()))
        }
        async fn delete_employee(&self, _: EmployeeId) -> Result<(), RegistryError> {
            Err(RegistryError::Unavailable("database is locked".into()))
        }
    }

    fn gate() -> GateStateMachine {
        GateStateMachine::new(Duration::from_secs(10), Arc::new(Metrics::new()))
    }

    async fn registry_with(plate: &str) -> Arc<SqliteRegistry> {
        let registry = Arc::new(SqliteRegistry::open_in_memory().unwrap());
        registry
            .add_employee(NewEmployee {
                name: "Ana".into(),
                position: "Driver".into(),
                plate: Some(plate.into()),
            })
            .await
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_hit_grants_and_triggers() {
        let registry = registry_with("XYZ123").await;
        let gate = gate();
        let engine = AccessDecisionEngine::new(registry.clone(), gate.clone(), 3);

        let decision = engine.decide(Some("xyz 123")).await.unwrap();
        assert_eq!(decision.status, DecisionStatus::Granted);
        assert_eq!(decision.message, "Authorized: Ana");
        assert_eq!(decision.employee_name.as_deref(), Some("Ana"));
        assert!(decision.gate_triggered);
        assert!(gate.status());
        assert_eq!(gate.generation(), 1);

        let logs = registry.list_recent_logs(10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, AccessAction::Entry);
        assert_eq!(logs[0].plate_text.as_deref(), Some("XYZ123"));
        assert_eq!(decision.log.unwrap().detail, "Automated Entry");
    }

    #[tokio::test]
    async fn test_miss_denies_without_trigger() {
        let registry = registry_with("XYZ123").await;
        let gate = gate();
        let engine = AccessDecisionEngine::new(registry.clone(), gate.clone(), 3);

        let decision = engine.decide(Some("QQQ111")).await.unwrap();
        assert_eq!(decision.status, DecisionStatus::Denied);
        assert_eq!(decision.message, MSG_UNREGISTERED);
        assert!(!decision.gate_triggered);
        assert!(!gate.status());
        assert_eq!(gate.generation(), 0);

        let logs = registry.list_recent_logs(10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, AccessAction::Denied);
        assert_eq!(logs[0].name, "Visitor");
    }

    #[tokio::test]
    async fn test_absent_or_noise_fails_without_side_effects() {
        let registry = registry_with("XYZ123").await;
        let gate = gate();
        let engine = AccessDecisionEngine::new(registry.clone(), gate.clone(), 3);

        for input in [None, Some(""), Some("A1"), Some("-- -")] {
            let decision = engine.decide(input).await.unwrap();
            assert_eq!(decision.status, DecisionStatus::Failed);
            assert_eq!(decision.message, MSG_NO_PLATE);
            assert!(decision.log.is_none());
        }
        assert!(registry.list_recent_logs(10).await.unwrap().is_empty());
        assert!(!gate.status());
    }

    #[tokio::test]
    async fn test_registry_failure_is_not_denied() {
        let gate = gate();
        let engine = AccessDecisionEngine::new(Arc::new(DownRegistry), gate.clone(), 3);

        let result = engine.decide(Some("XYZ123")).await;
        assert!(matches!(result, Err(RegistryError::Unavailable(_))));
        assert!(!gate.status());
    }
}
