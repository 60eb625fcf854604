//! The confdict — the two-dimensional string map driving initialization.
//!
//! A [`Confdict`] maps section names to [`ConfSection`]s; a section maps
//! plain string keys to raw string values. Keys may themselves contain dots
//! (`versionmanager.folder`), which the prefix helpers in
//! [`crate::config::helpers`] know how to group.

use std::collections::BTreeMap;
use std::collections::btree_map;

use serde::Serialize;

/// A single section: key → raw string value.
pub type ConfSection = BTreeMap<String, String>;

/// Name of the section holding this crate's own configuration keys.
pub const META_SECTION: &str = "rootstock";

/// Meta key listing the modules to initialize.
pub(crate) const MODULES_KEY: &str = "modules";
/// Meta key naming the base file of an adjustment file.
pub(crate) const BASED_ON_KEY: &str = "based_on";
/// Meta key selecting the level for [`crate::logger`].
pub(crate) const LOG_LEVEL_KEY: &str = "log_level";

/// Section name → section, with deterministic iteration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Confdict {
    sections: BTreeMap<String, ConfSection>,
}

impl Confdict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow a section, if present.
    pub fn section(&self, name: &str) -> Option<&ConfSection> {
        self.sections.get(name)
    }

    /// Borrow a section mutably, creating it when absent.
    pub fn section_mut(&mut self, name: &str) -> &mut ConfSection {
        self.sections.entry(name.to_string()).or_default()
    }

    /// Look up a single value.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections.get(section)?.get(key).map(String::as_str)
    }

    /// Set a single value, creating the section when absent.
    pub fn insert(
        &mut self,
        section: &str,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Option<String> {
        self.section_mut(section).insert(key.into(), value.into())
    }

    /// Remove a key from a section. Returns the removed value, if any.
    pub fn remove_key(&mut self, section: &str, key: &str) -> Option<String> {
        self.sections.get_mut(section)?.remove(key)
    }

    /// Remove a whole section. Returns the removed section, if any.
    pub fn remove_section(&mut self, name: &str) -> Option<ConfSection> {
        self.sections.remove(name)
    }

    pub fn contains_section(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    /// Iterate over all sections in name order.
    pub fn sections(&self) -> impl Iterator<Item = (&str, &ConfSection)> {
        self.sections.iter().map(|(name, s)| (name.as_str(), s))
    }

    /// Layer every key of `overrides` on top of this confdict, creating
    /// sections as needed. Later values win.
    pub fn apply_overrides(&mut self, overrides: &Confdict) {
        for (section, keys) in overrides.sections() {
            let target = self.section_mut(section);
            for (key, value) in keys {
                target.insert(key.clone(), value.clone());
            }
        }
    }

    /// Number of sections.
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

impl FromIterator<(String, ConfSection)> for Confdict {
    fn from_iter<I: IntoIterator<Item = (String, ConfSection)>>(iter: I) -> Self {
        Self {
            sections: iter.into_iter().collect(),
        }
    }
}

impl From<BTreeMap<String, ConfSection>> for Confdict {
    fn from(sections: BTreeMap<String, ConfSection>) -> Self {
        Self { sections }
    }
}

impl IntoIterator for Confdict {
    type Item = (String, ConfSection);
    type IntoIter = btree_map::IntoIter<String, ConfSection>;

    fn into_iter(self) -> Self::IntoIter {
        self.sections.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(pairs: &[(&str, &str)]) -> ConfSection {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn insert_and_get() {
        let mut conf = Confdict::new();
        conf.insert("db", "url", "sqlite:///app.db");
        assert_eq!(conf.get("db", "url"), Some("sqlite:///app.db"));
        assert_eq!(conf.get("db", "missing"), None);
        assert_eq!(conf.get("missing", "url"), None);
    }

    #[test]
    fn overrides_create_and_replace() {
        let mut base = Confdict::new();
        base.insert("db", "url", "old");
        base.insert("db", "pool", "5");

        let mut overrides = Confdict::new();
        overrides.insert("db", "url", "new");
        overrides.insert("mail", "host", "localhost");

        base.apply_overrides(&overrides);
        assert_eq!(base.get("db", "url"), Some("new"));
        assert_eq!(base.get("db", "pool"), Some("5"));
        assert_eq!(base.get("mail", "host"), Some("localhost"));
    }

    #[test]
    fn remove_key_and_section() {
        let mut conf: Confdict = [("db".to_string(), section(&[("url", "x")]))]
            .into_iter()
            .collect();
        assert_eq!(conf.remove_key("db", "url"), Some("x".to_string()));
        assert_eq!(conf.remove_key("db", "url"), None);
        assert!(conf.remove_section("db").is_some());
        assert!(!conf.contains_section("db"));
    }

    #[test]
    fn serializes_as_plain_map() {
        let mut conf = Confdict::new();
        conf.insert("db", "url", "x");
        let json = serde_json::to_string(&conf).unwrap();
        assert_eq!(json, r#"{"db":{"url":"x"}}"#);
    }
}
