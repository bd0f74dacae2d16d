//! Datastore records

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::key::Key;
use super::value::Value;
use super::KEY_PROPERTY;

/// A stored record: its key plus named property values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: Key,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl Record {
    /// Creates a record with no properties
    pub fn new(key: Key) -> Self {
        Self {
            key,
            properties: BTreeMap::new(),
        }
    }

    /// Builder-style property setter
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Resolves a property as filters and sorts see it; the reserved key
    /// property yields the record key.
    pub fn value_of(&self, property: &str) -> Option<Cow<'_, Value>> {
        if property == KEY_PROPERTY {
            return Some(Cow::Owned(Value::Key(self.key.clone())));
        }
        self.properties.get(property).map(Cow::Borrowed)
    }

    /// Copy of this record carrying only the key.
    pub fn key_only(&self) -> Record {
        Record::new(self.key.clone())
    }

    /// Copy of this record restricted to `fields`; missing fields are skipped.
    pub fn project(&self, fields: &[String]) -> Record {
        let properties = fields
            .iter()
            .filter_map(|f| self.properties.get(f).map(|v| (f.clone(), v.clone())))
            .collect();
        Record {
            key: self.key.clone(),
            properties,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_of_key_property() {
        let record = Record::new(Key::new("Book", 1)).with("title", "Dune");
        assert_eq!(
            record.value_of(KEY_PROPERTY).unwrap().into_owned(),
            Value::Key(Key::new("Book", 1))
        );
        assert_eq!(record.value_of("title").unwrap().as_text(), Some("Dune"));
        assert!(record.value_of("isbn").is_none());
    }

    #[test]
    fn test_project() {
        let record = Record::new(Key::new("Book", 1))
            .with("title", "Dune")
            .with("isbn", "123");
        let projected = record.project(&["isbn".to_string(), "missing".to_string()]);
        assert_eq!(projected.properties.len(), 1);
        assert_eq!(projected.get("isbn"), Some(&Value::from("123")));
    }
}
