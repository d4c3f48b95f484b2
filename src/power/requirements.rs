//! Per-kind power requirement tracking over a shared native request

use std::sync::Arc;

use tracing::debug;

use crate::{
    error::{Error, Result},
    system::{PowerRequestHandle, PowerRequestKind, SystemService},
};

/// Tracks which requirement kinds are asserted and holds the one native
/// request they share.
///
/// The request is created on the first transition to "required" and never
/// recreated while any kind is still set; closing releases it exactly once.
pub struct PowerRequirements {
    system: Arc<dyn SystemService>,
    reason: String,
    request: Option<Box<dyn PowerRequestHandle>>,
    display_required: bool,
    system_required: bool,
    closed: bool,
}

impl PowerRequirements {
    pub fn new(system: Arc<dyn SystemService>, reason: impl Into<String>) -> Self {
        Self {
            system,
            reason: reason.into(),
            request: None,
            display_required: false,
            system_required: false,
            closed: false,
        }
    }

    pub fn get(&self, kind: PowerRequestKind) -> bool {
        match kind {
            PowerRequestKind::DisplayRequired => self.display_required,
            PowerRequestKind::SystemRequired => self.system_required,
        }
    }

    /// Assert or withdraw a requirement kind.
    ///
    /// Returns whether anything changed; native failures propagate and leave
    /// the tracked state untouched.
    pub fn set(&mut self, kind: PowerRequestKind, on: bool) -> Result<bool> {
        if self.closed {
            return Err(Error::Closed("power requirements"));
        }
        if self.get(kind) == on {
            return Ok(false);
        }

        if self.request.is_none() {
            self.request = Some(self.system.create_power_request(&self.reason)?);
        }
        let request = self.request.as_ref().expect("request initialized above");

        if on {
            request.set(kind)?;
        } else {
            request.clear(kind)?;
        }

        match kind {
            PowerRequestKind::DisplayRequired => self.display_required = on,
            PowerRequestKind::SystemRequired => self.system_required = on,
        }
        debug!("power requirement {:?} set to {}", kind, on);
        Ok(true)
    }

    /// Release the shared request. Idempotent; later `set` calls fail.
    pub fn close(&mut self) {
        if !self.closed {
            self.request = None;
            self.closed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::FakeSystem;

    fn requirements_with(system: &Arc<FakeSystem>) -> PowerRequirements {
        PowerRequirements::new(Arc::clone(system) as Arc<dyn SystemService>, "busy")
    }

    #[test]
    fn creates_one_request_shared_across_kinds() {
        let system = Arc::new(FakeSystem::new());
        let mut requirements = requirements_with(&system);

        assert!(requirements.set(PowerRequestKind::DisplayRequired, true).unwrap());
        assert!(requirements.set(PowerRequestKind::SystemRequired, true).unwrap());

        assert_eq!(system.power_requests_created(), 1);
        assert_eq!(
            system.power_request_calls(),
            vec![
                (PowerRequestKind::DisplayRequired, true),
                (PowerRequestKind::SystemRequired, true),
            ]
        );
    }

    #[test]
    fn unchanged_value_is_a_no_op() {
        let system = Arc::new(FakeSystem::new());
        let mut requirements = requirements_with(&system);

        assert!(requirements.set(PowerRequestKind::DisplayRequired, true).unwrap());
        assert!(!requirements.set(PowerRequestKind::DisplayRequired, true).unwrap());
        assert_eq!(system.power_request_calls().len(), 1);

        // Turning a kind off that was never on creates nothing.
        let mut fresh = requirements_with(&system);
        assert!(!fresh.set(PowerRequestKind::SystemRequired, false).unwrap());
        assert_eq!(system.power_requests_created(), 1);
    }

    #[test]
    fn clearing_issues_a_clear_call() {
        let system = Arc::new(FakeSystem::new());
        let mut requirements = requirements_with(&system);

        requirements.set(PowerRequestKind::DisplayRequired, true).unwrap();
        requirements.set(PowerRequestKind::DisplayRequired, false).unwrap();

        assert_eq!(
            system.power_request_calls(),
            vec![
                (PowerRequestKind::DisplayRequired, true),
                (PowerRequestKind::DisplayRequired, false),
            ]
        );
        assert_eq!(system.power_requests_released(), 0);
    }

    #[test]
    fn native_failure_propagates_and_leaves_state_unchanged() {
        let system = Arc::new(FakeSystem::new());
        let mut requirements = requirements_with(&system);
        system.fail_power_calls(true);

        let err = requirements.set(PowerRequestKind::DisplayRequired, true).unwrap_err();
        assert!(matches!(err, Error::Native { .. }));
        assert!(!requirements.get(PowerRequestKind::DisplayRequired));

        system.fail_power_calls(false);
        assert!(requirements.set(PowerRequestKind::DisplayRequired, true).unwrap());
        assert_eq!(system.power_requests_created(), 1);
    }

    #[test]
    fn create_failure_propagates() {
        let system = Arc::new(FakeSystem::new());
        let mut requirements = requirements_with(&system);
        system.fail_power_create(true);

        let err = requirements.set(PowerRequestKind::SystemRequired, true).unwrap_err();
        assert!(matches!(err, Error::Native { .. }));
        assert_eq!(system.power_requests_created(), 0);
    }

    #[test]
    fn close_releases_exactly_once() {
        let system = Arc::new(FakeSystem::new());
        let mut requirements = requirements_with(&system);

        requirements.set(PowerRequestKind::DisplayRequired, true).unwrap();
        requirements.set(PowerRequestKind::SystemRequired, true).unwrap();

        requirements.close();
        requirements.close();
        assert_eq!(system.power_requests_released(), 1);

        let err = requirements.set(PowerRequestKind::DisplayRequired, false).unwrap_err();
        assert!(matches!(err, Error::Closed(_)));
    }
}
