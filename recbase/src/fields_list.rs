//! Ordered field collection with id and name lookups.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::fields::Field;
use crate::id::field_id;
use crate::registry::{FieldTypeRegistry, builtin};
use crate::tools::security::{LOWER_ALPHANUM, random_string_with_alphabet};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldsList(Vec<Field>);

impl FieldsList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields(fields: impl IntoIterator<Item = Field>) -> Self {
        let mut list = Self::new();
        for field in fields {
            list.add(field);
        }
        list
    }

    /// Appends `field`, or replaces the field with the same id in place.
    ///
    /// Fields without id get one derived from their type and name.
    pub fn add(&mut self, field: Field) {
        let field = self.with_id(field);
        match self.0.iter_mut().find(|f| f.id() == field.id()) {
            Some(existing) => *existing = field,
            None => self.0.push(field),
        }
    }

    /// Same as [`add`](Self::add) but inserts new fields at `pos`.
    pub fn add_at(&mut self, pos: usize, field: Field) {
        let field = self.with_id(field);
        if let Some(existing) = self.0.iter_mut().find(|f| f.id() == field.id()) {
            *existing = field;
            return;
        }
        let pos = pos.min(self.0.len());
        self.0.insert(pos, field);
    }

    fn with_id(&self, mut field: Field) -> Field {
        if !field.id().is_empty() {
            return field;
        }
        let mut id = field_id(field.type_name(), field.name());
        while self.get_by_id(&id).is_some() {
            id = format!("{}{}", field_id(field.type_name(), field.name()), random_string_with_alphabet(5, LOWER_ALPHANUM));
        }
        field.set_id(id);
        field
    }

    pub fn get_by_id(&self, id: &str) -> Option<&Field> {
        self.0.iter().find(|f| f.id() == id)
    }

    pub fn get_by_id_mut(&mut self, id: &str) -> Option<&mut Field> {
        self.0.iter_mut().find(|f| f.id() == id)
    }

    /// Case-insensitive name lookup.
    pub fn get_by_name(&self, name: &str) -> Option<&Field> {
        self.0.iter().find(|f| f.name().eq_ignore_ascii_case(name))
    }

    pub fn get_by_name_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.0.iter_mut().find(|f| f.name().eq_ignore_ascii_case(name))
    }

    pub fn remove_by_id(&mut self, id: &str) -> Option<Field> {
        let pos = self.0.iter().position(|f| f.id() == id)?;
        Some(self.0.remove(pos))
    }

    pub fn remove_by_name(&mut self, name: &str) -> Option<Field> {
        let pos = self.0.iter().position(|f| f.name().eq_ignore_ascii_case(name))?;
        Some(self.0.remove(pos))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Field> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Field> {
        self.0.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Field] {
        &self.0
    }

    pub fn field_names(&self) -> Vec<String> {
        self.0.iter().map(|f| f.name().to_string()).collect()
    }

    pub fn to_json(&self) -> serde_json::Result<Value> {
        self.0.iter().map(Field::to_json).collect::<serde_json::Result<Vec<_>>>().map(Value::Array)
    }

    pub fn from_json(registry: &FieldTypeRegistry, value: Value) -> serde_json::Result<Self> {
        registry.load_fields(value).map(Self)
    }
}

impl<'a> IntoIterator for &'a FieldsList {
    type Item = &'a Field;
    type IntoIter = std::slice::Iter<'a, Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for FieldsList {
    type Item = Field;
    type IntoIter = std::vec::IntoIter<Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl Serialize for FieldsList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

impl<'de> Deserialize<'de> for FieldsList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(builtin(), value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{NumberField, TextField};

    #[test]
    fn test_generated_ids_are_unique() {
        let mut list = FieldsList::new();
        list.add(TextField::new("title").into());
        list.add(TextField::new("title").into());
        assert_eq!(list.len(), 2);
        assert_ne!(list.as_slice()[0].id(), list.as_slice()[1].id());
        assert_eq!(list.as_slice()[0].id(), field_id("text", "title"));
    }

    #[test]
    fn test_add_replaces_same_id() {
        let mut list = FieldsList::new();
        let mut field: Field = NumberField::new("qty").into();
        field.set_id("f1");
        list.add(field.clone());
        field.set_name("amount");
        list.add(field);
        assert_eq!(list.len(), 1);
        assert!(list.get_by_name("AMOUNT").is_some());
        assert!(list.get_by_name("qty").is_none());
    }

    #[test]
    fn test_json_decoding_through_registry() {
        let mut list = FieldsList::new();
        list.add(TextField::primary_id().into());
        list.add(NumberField::new("qty").into());
        let decoded: FieldsList = serde_json::from_value(list.to_json().unwrap()).unwrap();
        assert_eq!(decoded, list);
    }
}
