/*!
 * Appender Pattern Mapper
 *
 * Built wholesale on each configuration apply and read-only afterwards.
 * Entries are deduplicated by regex text: the same pattern declared twice for
 * one monitor shares one compiled entry whose appender set is the union.
 */

use super::pattern::{qualified_name, AppenderPattern};
use crate::core::PatternError;
use ahash::AHashMap;
use regex::RegexSet;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Accumulates (monitor, pattern, appender) triples
#[derive(Debug, Default)]
pub struct AppenderPatternMapperBuilder {
    regexes: Vec<String>,
    appenders: Vec<BTreeSet<Arc<str>>>,
    index: AHashMap<String, usize>,
}

impl AppenderPatternMapperBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `appender` for the monitors `pattern` selects relative to `monitor`
    pub fn add(&mut self, monitor: &str, pattern: &str, appender: &str) -> Result<(), PatternError> {
        let pattern: AppenderPattern = pattern.parse()?;
        let regex = pattern.regex_for(monitor);

        let slot = match self.index.get(&regex) {
            Some(slot) => *slot,
            None => {
                let slot = self.regexes.len();
                self.index.insert(regex.clone(), slot);
                self.regexes.push(regex);
                self.appenders.push(BTreeSet::new());
                slot
            }
        };
        self.appenders[slot].insert(Arc::from(appender));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.regexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regexes.is_empty()
    }

    pub fn build(self) -> Result<AppenderPatternMapper, PatternError> {
        let set = RegexSet::new(&self.regexes).map_err(|e| PatternError::Compile {
            pattern: self.regexes.join(" | "),
            reason: e.to_string(),
        })?;
        Ok(AppenderPatternMapper {
            set,
            appenders: self.appenders,
        })
    }
}

/// Resolves the appenders that apply to a monitor name
#[derive(Debug, Clone)]
pub struct AppenderPatternMapper {
    set: RegexSet,
    appenders: Vec<BTreeSet<Arc<str>>>,
}

impl Default for AppenderPatternMapper {
    fn default() -> Self {
        Self {
            set: RegexSet::empty(),
            appenders: Vec::new(),
        }
    }
}

impl AppenderPatternMapper {
    pub fn builder() -> AppenderPatternMapperBuilder {
        AppenderPatternMapperBuilder::new()
    }

    /// Union of the appenders of every entry matching `monitor`, sorted by name
    pub fn get_appenders_for_monitor(&self, monitor: &str) -> Vec<Arc<str>> {
        if self.appenders.is_empty() {
            return Vec::new();
        }
        let name = qualified_name(monitor);
        let mut result: BTreeSet<Arc<str>> = BTreeSet::new();
        for slot in self.set.matches(&name).into_iter() {
            result.extend(self.appenders[slot].iter().cloned());
        }
        result.into_iter().collect()
    }

    /// Whether any entry matches `monitor`
    pub fn has_match(&self, monitor: &str) -> bool {
        !self.appenders.is_empty() && self.set.is_match(&qualified_name(monitor))
    }

    /// Every appender name referenced by any entry
    pub fn referenced_appenders(&self) -> BTreeSet<Arc<str>> {
        self.appenders.iter().flatten().cloned().collect()
    }

    pub fn entry_count(&self) -> usize {
        self.appenders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(list: Vec<Arc<str>>) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parent_and_descendants() {
        let mut builder = AppenderPatternMapper::builder();
        builder.add("A", "./**", "all").unwrap();
        builder.add("A", "/*", "kids").unwrap();
        let mapper = builder.build().unwrap();

        assert_eq!(names(mapper.get_appenders_for_monitor("A")), vec!["all"]);
        assert_eq!(names(mapper.get_appenders_for_monitor("A.B")), vec!["all", "kids"]);
        assert_eq!(names(mapper.get_appenders_for_monitor("A.B.C")), vec!["all"]);
        assert!(mapper.get_appenders_for_monitor("B").is_empty());
    }

    #[test]
    fn test_dedup_by_regex_text() {
        let mut builder = AppenderPatternMapper::builder();
        builder.add("Orders", ".", "text").unwrap();
        builder.add("Orders", ".", "jsonl").unwrap();
        builder.add("Orders", ".", "text").unwrap();
        assert_eq!(builder.len(), 1);

        let mapper = builder.build().unwrap();
        assert_eq!(
            names(mapper.get_appenders_for_monitor("Orders")),
            vec!["jsonl", "text"]
        );
        assert_eq!(mapper.referenced_appenders().len(), 2);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let mut builder = AppenderPatternMapper::builder();
        assert!(builder.add("A", "A.B", "text").is_err());
        assert!(builder.is_empty());
    }

    #[test]
    fn test_empty_mapper() {
        let mapper = AppenderPatternMapper::default();
        assert!(!mapper.has_match("anything"));
        assert!(mapper.get_appenders_for_monitor("anything").is_empty());
    }
}
