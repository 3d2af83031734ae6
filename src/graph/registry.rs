//! Processor factory registry: maps a graph-definition `class:` name to a
//! constructor, so `Graph::build` can instantiate processors it has never
//! seen the concrete type of (spec.md §4.6 `Build` step 1).

use std::collections::HashMap;

use crate::error::{AxonError, Result};
use crate::processor::Processor;

/// Constructs one fresh, unconfigured processor instance.
pub type ProcessorFactory = Box<dyn Fn() -> Box<dyn Processor> + Send + Sync>;

#[derive(Default)]
pub struct ProcessorRegistry {
    factories: HashMap<String, ProcessorFactory>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, class: impl Into<String>, factory: impl Fn() -> Box<dyn Processor> + Send + Sync + 'static) {
        self.factories.insert(class.into(), Box::new(factory));
    }

    pub fn create(&self, class: &str) -> Result<Box<dyn Processor>> {
        self.factories.get(class).map(|factory| factory()).ok_or_else(|| AxonError::UnknownClass(class.to_string()))
    }

    pub fn is_registered(&self, class: &str) -> bool {
        self.factories.contains_key(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{GlobalContext, ProcessingContext};
    use crate::processor::ProcessorPorts;

    struct Echo {
        ports: ProcessorPorts,
    }

    impl Processor for Echo {
        fn create_ports(&mut self) -> Result<()> {
            Ok(())
        }
        fn process(&mut self, _ctx: &ProcessingContext) -> Result<()> {
            Ok(())
        }
        fn ports(&self) -> &ProcessorPorts {
            &self.ports
        }
        fn ports_mut(&mut self) -> &mut ProcessorPorts {
            &mut self.ports
        }
    }

    #[test]
    fn creates_registered_class() {
        let mut registry = ProcessorRegistry::new();
        registry.register("Echo", || {
            Box::new(Echo { ports: ProcessorPorts::new() }) as Box<dyn Processor>
        });
        assert!(registry.is_registered("Echo"));
        let mut processor = registry.create("Echo").unwrap();
        assert!(processor.configure(&serde_yaml::Value::Null, &GlobalContext::new(serde_yaml::Value::Null)).is_ok());
    }

    #[test]
    fn unknown_class_is_an_error() {
        let registry = ProcessorRegistry::new();
        assert!(registry.create("DoesNotExist").is_err());
    }
}
