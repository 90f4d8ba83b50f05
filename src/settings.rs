//! Settings records for the three supervisors, validated once at
//! construction time.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::SettingsError;
use crate::hooks::{Hooks, NoopHooks};
use crate::service::ServiceRef;

/// Settings for a [`Group`](crate::Group) of services.
#[derive(Default)]
pub struct GroupSettings {
    /// Group name, used for hooks and errors. Defaults to `"group"` in
    /// messages when left empty.
    pub name: String,
    /// Services to start and stop in parallel. Their order only matters
    /// for the stability of aggregated error messages.
    pub services: Vec<ServiceRef>,
    /// Hooks called around each service lifecycle step. Group hooks are
    /// called from parallel tasks and must be safe to call so. Defaults
    /// to [`NoopHooks`] when left unset.
    pub hooks: Option<Arc<dyn Hooks>>,
}

impl GroupSettings {
    pub(crate) fn validate(&self) -> Result<(), SettingsError> {
        if self.services.is_empty() {
            return Err(SettingsError::NoService);
        }
        validate_services_are_unique(&self.services)
    }
}

/// Settings for a [`Sequence`](crate::Sequence) of services.
#[derive(Default)]
pub struct SequenceSettings {
    /// Sequence name, used for hooks and errors. Defaults to
    /// `"sequence"` in messages when left empty.
    pub name: String,
    /// Services in the order they must start.
    pub services_start: Vec<ServiceRef>,
    /// Services in the order they must stop. Must hold exactly the
    /// services of `services_start`.
    pub services_stop: Vec<ServiceRef>,
    /// Hooks called around each service lifecycle step. Defaults to
    /// [`NoopHooks`] when left unset.
    pub hooks: Option<Arc<dyn Hooks>>,
}

impl SequenceSettings {
    pub(crate) fn validate(&self) -> Result<(), SettingsError> {
        if self.services_start.is_empty() {
            return Err(SettingsError::NoServiceStart);
        }
        if self.services_stop.is_empty() {
            return Err(SettingsError::NoServiceStop);
        }
        validate_services_are_unique(&self.services_start)?;
        validate_services_are_unique(&self.services_stop)?;

        let start: HashSet<&str> = self.services_start.iter().map(|s| s.name()).collect();
        let stop: HashSet<&str> = self.services_stop.iter().map(|s| s.name()).collect();
        if start != stop {
            return Err(SettingsError::StartStopMismatch {
                start: and_service_names(&self.services_start),
                stop: and_service_names(&self.services_stop),
            });
        }
        Ok(())
    }
}

/// Settings for a [`Restarter`](crate::Restarter).
pub struct RestarterSettings {
    /// The service to supervise and restart on crash.
    pub service: ServiceRef,
    /// Hooks called when the service starts, stops, crashes and
    /// restarts. Defaults to [`NoopHooks`] when left unset.
    pub hooks: Option<Arc<dyn Hooks>>,
}

pub(crate) fn hooks_or_noop(hooks: Option<Arc<dyn Hooks>>) -> Arc<dyn Hooks> {
    hooks.unwrap_or_else(|| Arc::new(NoopHooks))
}

fn validate_services_are_unique(services: &[ServiceRef]) -> Result<(), SettingsError> {
    // Count duplicates in first-appearance order.
    let mut names: Vec<&str> = Vec::new();
    let mut counts: Vec<usize> = Vec::new();
    for service in services {
        let name = service.name();
        match names.iter().position(|existing| *existing == name) {
            Some(i) => counts[i] += 1,
            None => {
                names.push(name);
                counts.push(1);
            }
        }
    }

    let mut details: Vec<String> = Vec::new();
    for (name, count) in names.iter().zip(&counts) {
        match count {
            1 => {}
            2 => details.push(format!("{name} is duplicated twice")),
            n => details.push(format!("{name} is duplicated {n} times")),
        }
    }

    match details.len() {
        0 => Ok(()),
        1 => Err(SettingsError::NotUnique {
            details: format!("service {}", details[0]),
        }),
        _ => Err(SettingsError::NotUnique {
            details: format!("services {}", and_join(&details)),
        }),
    }
}

fn and_service_names(services: &[ServiceRef]) -> String {
    let names: Vec<String> = services.iter().map(|s| s.name().to_owned()).collect();
    and_join(&names)
}

/// Joins strings as "A, B and C".
fn and_join<S: AsRef<str>>(strings: &[S]) -> String {
    let mut result = String::new();
    for (i, s) in strings.iter().enumerate() {
        if i > 0 {
            if i < strings.len() - 1 {
                result.push_str(", ");
            } else {
                result.push_str(" and ");
            }
        }
        result.push_str(s.as_ref());
    }
    result
}
