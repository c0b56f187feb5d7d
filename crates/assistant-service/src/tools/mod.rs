//! Built-in registrations: device-action relays plus two tools answered on
//! the server.
pub mod alarms;
pub mod calculate;
pub mod feedback;
pub mod reminders;
pub mod settings;
pub mod time;

use crate::registry::{Registration, Registry};
use std::time::Duration;

pub fn default_registrations() -> Vec<Registration> {
    let mut registrations = alarms::registrations();
    registrations.extend(reminders::registrations());
    registrations.push(settings::registration());
    registrations.push(feedback::registration());
    registrations.push(calculate::registration());
    registrations.push(time::registration());
    registrations
}

pub fn default_registry() -> Registry {
    Registry::new(default_registrations())
}

pub fn registry_with_action_timeout(timeout: Duration) -> Registry {
    default_registry().with_action_timeout(timeout)
}

#[cfg(test)]
pub(crate) fn test_context(actions: &[&str]) -> crate::registry::ToolContext {
    use crate::quota::QuotaLedger;
    use crate::session::SessionParams;
    use crate::store::MemoryStore;
    use crate::widgets::WidgetContext;
    use std::sync::Arc;

    let params = SessionParams {
        actions: actions.iter().map(|a| a.to_string()).collect(),
        ..SessionParams::default()
    };
    crate::registry::ToolContext {
        params: Arc::new(params),
        ledger: QuotaLedger::new(Arc::new(MemoryStore::new()), 1),
        widgets: Arc::new(tokio::sync::Mutex::new(WidgetContext::default())),
        thread_id: "00000000-0000-0000-0000-000000000001".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_builds() {
        let registry = default_registry();
        assert_eq!(registry.len(), 11);
        assert!(registry.is_action("set_alarm"));
        assert!(registry.is_action("get_alarms"));
        assert!(!registry.is_action("calculate"));
    }

    #[test]
    fn test_plain_client_sees_one_set_alarm() {
        let registry = default_registry();
        let defs = registry.definitions_for_capabilities(&[]);
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names.iter().filter(|n| **n == "set_alarm").count(), 1);
        assert!(!names.contains(&"send_feedback"));
        assert!(names.contains(&"calculate"));
    }
}
