//! Priority-ordered dispatch of lifecycle events to validators.

use crate::event::{EventError, LifecycleEvent};
use crate::{BoxError, CoreError};
use sluice_schema::{Phase, ValidationResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A pluggable check subscribed to one or more lifecycle phases.
pub trait Validator: Send + Sync {
    fn name(&self) -> &str;

    /// Phases this validator handles, each with a priority. Higher runs first.
    fn subscribed_phases(&self) -> Vec<(Phase, i32)>;

    /// Inspect the event and add errors or warnings to it.
    ///
    /// Returning an error other than [`EventError`] is not fatal: it becomes
    /// a single error result attributed to this validator.
    fn handle(&self, event: &mut LifecycleEvent<'_>) -> Result<(), BoxError>;
}

type HandlerFn = dyn Fn(&mut LifecycleEvent<'_>) -> Result<(), BoxError> + Send + Sync;

/// A validator built from a closure, for small one-phase checks.
pub struct FnValidator {
    name: String,
    phases: Vec<(Phase, i32)>,
    handler: Box<HandlerFn>,
}

impl FnValidator {
    pub fn new<F>(name: &str, phase: Phase, priority: i32, handler: F) -> Self
    where
        F: Fn(&mut LifecycleEvent<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_owned(),
            phases: vec![(phase, priority)],
            handler: Box::new(handler),
        }
    }

    #[must_use]
    pub fn also_on(mut self, phase: Phase, priority: i32) -> Self {
        self.phases.push((phase, priority));
        self
    }
}

impl Validator for FnValidator {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribed_phases(&self) -> Vec<(Phase, i32)> {
        self.phases.clone()
    }

    fn handle(&self, event: &mut LifecycleEvent<'_>) -> Result<(), BoxError> {
        (self.handler)(event)
    }
}

#[derive(Clone)]
struct Listener {
    priority: i32,
    validator: Arc<dyn Validator>,
}

/// Static table of `phase -> [listener]`, each list sorted by descending
/// priority. Ties keep registration order.
#[derive(Clone, Default)]
pub struct ValidatorPipeline {
    listeners: HashMap<Phase, Vec<Listener>>,
}

impl ValidatorPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, validator: Arc<dyn Validator>) {
        for (phase, priority) in validator.subscribed_phases() {
            let list = self.listeners.entry(phase).or_default();
            list.push(Listener {
                priority,
                validator: Arc::clone(&validator),
            });
            // Stable sort keeps insertion order within one priority.
            list.sort_by_key(|l| std::cmp::Reverse(l.priority));
        }
        debug!("registered validator {}", validator.name());
    }

    #[must_use]
    pub fn with(mut self, validator: impl Validator + 'static) -> Self {
        self.register(Arc::new(validator));
        self
    }

    /// Validator names subscribed to `phase`, in dispatch order.
    pub fn listeners(&self, phase: Phase) -> Vec<&str> {
        self.listeners
            .get(&phase)
            .map(|l| l.iter().map(|l| l.validator.name()).collect())
            .unwrap_or_default()
    }

    /// Run every validator for the event's phase without judging the outcome.
    ///
    /// Stops early once a validator stops propagation. Event API misuse is
    /// returned immediately; any other validator failure is recorded on the
    /// event as an error result and dispatch continues.
    pub fn run(&self, event: &mut LifecycleEvent<'_>) -> Result<(), EventError> {
        let phase = event.phase();
        let Some(listeners) = self.listeners.get(&phase) else {
            return Ok(());
        };

        for listener in listeners {
            if event.is_propagation_stopped() {
                debug!("{phase}: propagation stopped before {}", listener.validator.name());
                break;
            }
            let name = listener.validator.name();
            debug!("{phase}: running {name} (priority {})", listener.priority);

            let outcome = listener.validator.handle(event);
            if let Some(misuse) = event.take_misuse() {
                return Err(misuse);
            }
            if let Err(e) = outcome {
                if let Some(misuse) = e.downcast_ref::<EventError>() {
                    return Err(misuse.clone());
                }
                warn!("{phase}: validator {name} failed: {e}");
                event.add_result(ValidationResult::single_error(format!("{name} failed: {e}")));
            }
        }
        Ok(())
    }

    /// Run the validators and turn any accumulated result into an error.
    pub fn dispatch(&self, event: &mut LifecycleEvent<'_>) -> Result<(), CoreError> {
        self.run(event)?;
        if event.results().is_empty() {
            return Ok(());
        }
        Err(CoreError::Validation {
            phase: event.phase(),
            results: event.results().to_vec(),
        })
    }
}
