//! Step registry
//!
//! Maps step text to handlers. Registering the same text again replaces the
//! earlier handler: the last registration wins and only it fires. Each
//! override is logged so shadowed steps are visible in test output.

use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct StepRegistry<H> {
    handlers: HashMap<String, H>,
    order: Vec<String>,
    overrides: usize,
}

impl<H> Default for StepRegistry<H> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
            order: Vec::new(),
            overrides: 0,
        }
    }
}

impl<H> StepRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `step`, returning the handler it replaced.
    pub fn register(&mut self, step: impl Into<String>, handler: H) -> Option<H> {
        let step = step.into();
        let replaced = self.handlers.insert(step.clone(), handler);
        if replaced.is_some() {
            self.overrides += 1;
            warn!(step = step.as_str(), "step re-registered, later definition wins");
        } else {
            debug!(step = step.as_str(), "step registered");
            self.order.push(step);
        }
        replaced
    }

    pub fn resolve(&self, step: &str) -> Option<&H> {
        self.handlers.get(step)
    }

    pub fn contains(&self, step: &str) -> bool {
        self.handlers.contains_key(step)
    }

    /// Registered step texts in first-registration order.
    pub fn steps(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn override_count(&self) -> usize {
        self.overrides
    }

    /// Absorb `other`'s steps; on collisions `other` wins.
    pub fn extend(&mut self, other: StepRegistry<H>) {
        let StepRegistry {
            mut handlers,
            order,
            ..
        } = other;
        for step in order {
            if let Some(handler) = handlers.remove(&step) {
                self.register(step, handler);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_registration_wins() {
        let mut registry: StepRegistry<fn() -> &'static str> = StepRegistry::new();
        assert!(registry.register("the function is invoked", || "base").is_none());
        let replaced = registry.register("the function is invoked", || "extended");

        assert_eq!(replaced.map(|h| h()), Some("base"));
        assert_eq!(registry.resolve("the function is invoked").map(|h| h()), Some("extended"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.override_count(), 1);
    }

    #[test]
    fn extension_module_overrides_base_steps() {
        let mut base = StepRegistry::new();
        base.register("a file is uploaded", 1);
        base.register("the queue receives a message", 2);

        let mut extension = StepRegistry::new();
        extension.register("the queue receives a message", 20);
        extension.register("the SLA is met", 30);

        base.extend(extension);
        assert_eq!(base.resolve("the queue receives a message"), Some(&20));
        assert_eq!(base.resolve("a file is uploaded"), Some(&1));
        assert_eq!(
            base.steps().collect::<Vec<_>>(),
            vec!["a file is uploaded", "the queue receives a message", "the SLA is met"]
        );
        assert!(!base.contains("unknown step"));
    }
}
