/*!
 * Appender Factory
 * Type-tag registry that builds sinks from appender definitions
 */

use super::json_lines::JsonLinesAppender;
use super::memory::MemoryAppender;
use super::text::TextAppender;
use super::traits::Appender;
use crate::config::AppenderDefinition;
use crate::core::AppenderError;
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::Arc;

pub const TEXT_APPENDER: &str = "text";
pub const MEMORY_APPENDER: &str = "memory";
pub const JSON_LINES_APPENDER: &str = "json-lines";

/// Builds a sink for one definition
pub type AppenderConstructor =
    dyn Fn(&AppenderDefinition) -> Result<Arc<dyn Appender>, AppenderError> + Send + Sync;

/// Registry of appender constructors keyed by type tag
pub struct AppenderFactory {
    constructors: DashMap<String, Arc<AppenderConstructor>, RandomState>,
    memory: Arc<DashMap<String, Arc<MemoryAppender>, RandomState>>,
}

impl Default for AppenderFactory {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl AppenderFactory {
    /// Registry without any constructors
    pub fn empty() -> Self {
        Self {
            constructors: DashMap::with_hasher(RandomState::new()),
            memory: Arc::new(DashMap::with_hasher(RandomState::new())),
        }
    }

    /// Registry with the `text`, `memory` and `json-lines` types
    pub fn with_builtins() -> Self {
        let factory = Self::empty();

        factory.register(TEXT_APPENDER, |definition| {
            Ok(Arc::new(TextAppender::from_definition(definition)?) as Arc<dyn Appender>)
        });

        let memory = Arc::clone(&factory.memory);
        factory.register(MEMORY_APPENDER, move |definition| {
            let appender = Arc::new(MemoryAppender::from_definition(definition)?);
            memory.insert(definition.name.clone(), Arc::clone(&appender));
            Ok(appender as Arc<dyn Appender>)
        });

        factory.register(JSON_LINES_APPENDER, |definition| {
            Ok(Arc::new(JsonLinesAppender::from_definition(definition)?) as Arc<dyn Appender>)
        });

        factory
    }

    /// Register (or replace) the constructor for `kind`
    pub fn register<F>(&self, kind: &str, constructor: F)
    where
        F: Fn(&AppenderDefinition) -> Result<Arc<dyn Appender>, AppenderError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors
            .insert(kind.to_string(), Arc::new(constructor));
    }

    pub fn create(&self, definition: &AppenderDefinition) -> Result<Arc<dyn Appender>, AppenderError> {
        // Clone out of the map so user constructors never run under a shard lock
        let constructor = self
            .constructors
            .get(&definition.kind)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| AppenderError::UnknownType(definition.kind.clone()))?;
        constructor(definition)
    }

    pub fn is_registered(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.constructors.iter().map(|e| e.key().clone()).collect();
        kinds.sort();
        kinds
    }

    /// Most recent built-in memory appender created under `name`
    pub fn memory_appender(&self, name: &str) -> Option<Arc<MemoryAppender>> {
        self.memory.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Drop the lookup entry for `name` if it still points at `sink`
    pub(crate) fn forget(&self, name: &str, sink: &Arc<dyn Appender>) {
        let sink = Arc::as_ptr(sink) as *const ();
        self.memory
            .remove_if(name, |_, memory| Arc::as_ptr(memory) as *const () == sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appender::traits::MockAppender;

    #[test]
    fn test_builtins_registered() {
        let factory = AppenderFactory::with_builtins();
        assert_eq!(factory.kinds(), vec!["json-lines", "memory", "text"]);
    }

    #[test]
    fn test_unknown_type() {
        let factory = AppenderFactory::empty();
        let result = factory.create(&AppenderDefinition::new("x", "jdbc"));
        assert!(matches!(result, Err(AppenderError::UnknownType(kind)) if kind == "jdbc"));
    }

    #[test]
    fn test_memory_appender_lookup() {
        let factory = AppenderFactory::with_builtins();
        factory
            .create(&AppenderDefinition::new("mem", MEMORY_APPENDER))
            .unwrap();
        assert!(factory.memory_appender("mem").is_some());
        assert!(factory.memory_appender("other").is_none());
    }

    #[test]
    fn test_forget_only_matching_sink() {
        let factory = AppenderFactory::with_builtins();
        let definition = AppenderDefinition::new("mem", MEMORY_APPENDER);
        let old = factory.create(&definition).unwrap();
        let current = factory.create(&definition).unwrap();

        factory.forget("mem", &old);
        assert!(factory.memory_appender("mem").is_some());

        factory.forget("mem", &current);
        assert!(factory.memory_appender("mem").is_none());
    }

    #[test]
    fn test_custom_constructor() {
        let factory = AppenderFactory::empty();
        factory.register("mock", |_| Ok(Arc::new(MockAppender::new()) as Arc<dyn Appender>));
        assert!(factory.is_registered("mock"));
        assert!(factory.create(&AppenderDefinition::new("m", "mock")).is_ok());
    }
}
