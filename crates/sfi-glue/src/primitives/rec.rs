//! Named-field record.
//!
//! Inserts append unsorted; the field array is sorted lazily on the first
//! lookup through [`Rec::get`] and then searched with a binary search.
//! Field names are canonicalized so that `"sample_rate"` and `"sample-rate"`
//! name the same field.

use super::{Category, Proxy, Seq, Value};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// Replace every byte outside `[A-Za-z0-9]` with `-`.
pub fn canonical_field_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
struct Field {
    name: String,
    value: Value,
}

/// Record of named, typed values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "Vec<(String, Value)>", into = "Vec<(String, Value)>")]
pub struct Rec {
    fields: Vec<Field>,
    sorted: bool,
}

impl From<Vec<(String, Value)>> for Rec {
    fn from(fields: Vec<(String, Value)>) -> Self {
        let mut rec = Rec::new();
        for (name, value) in fields {
            rec.set(&name, value);
        }
        rec.sort();
        rec
    }
}

impl From<Rec> for Vec<(String, Value)> {
    fn from(mut rec: Rec) -> Self {
        rec.sort();
        rec.fields.into_iter().map(|f| (f.name, f.value)).collect()
    }
}

impl Default for Rec {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Rec {
    fn eq(&self, other: &Self) -> bool {
        if self.fields.len() != other.fields.len() {
            return false;
        }
        self.fields
            .iter()
            .all(|f| other.lookup(&f.name) == Some(&f.value))
    }
}

impl Rec {
    pub fn new() -> Self {
        Self {
            fields: Vec::new(),
            sorted: true,
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Set a field, replacing any previous value stored under the same name.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        let name = canonical_field_name(name);
        let value = value.into();
        if let Some(index) = self.position(&name) {
            self.fields[index].value = value;
            return;
        }
        let keeps_order = self
            .fields
            .last()
            .map(|last| last.name.as_str() < name.as_str())
            .unwrap_or(true);
        self.sorted &= keeps_order;
        self.fields.push(Field { name, value });
    }

    /// Look up a field, sorting first if an unsorted insert happened.
    pub fn get(&mut self, name: &str) -> Option<&Value> {
        self.sort();
        let name = canonical_field_name(name);
        let index = self.binary_search(&name).ok()?;
        Some(&self.fields[index].value)
    }

    /// Look up a field without reordering the record.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        let name = canonical_field_name(name);
        self.position(&name).map(|index| &self.fields[index].value)
    }

    /// Remove a field, returning its value.
    pub fn forget(&mut self, name: &str) -> Option<Value> {
        let name = canonical_field_name(name);
        let index = self.position(&name)?;
        Some(self.fields.remove(index).value)
    }

    pub fn clear(&mut self) {
        self.fields.clear();
        self.sorted = true;
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Sort fields by name. Cheap when already sorted.
    pub fn sort(&mut self) {
        if !self.sorted {
            self.fields.sort_by(|a, b| a.name.cmp(&b.name));
            self.sorted = true;
        }
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|f| (f.name.as_str(), &f.value))
    }

    /// Verify that every `(name, category)` pair is present with that category.
    pub fn check(&self, fields: &[(&str, Category)]) -> bool {
        fields.iter().all(|(name, category)| {
            self.lookup(name)
                .map(|value| value.category() == *category)
                .unwrap_or(false)
        })
    }

    /// Duplicate the record and every nested container.
    pub fn deep_copy(&self) -> Rec {
        Rec {
            fields: self
                .fields
                .iter()
                .map(|f| Field {
                    name: f.name.clone(),
                    value: f.value.deep_copy(),
                })
                .collect(),
            sorted: self.sorted,
        }
    }

    /// Take another reference to a shared record.
    pub fn shallow_share(this: &Rc<Rec>) -> Rc<Rec> {
        Rc::clone(this)
    }

    pub fn get_bool(&self, name: &str) -> bool {
        self.lookup(name).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn get_int(&self, name: &str) -> i32 {
        self.lookup(name).and_then(Value::as_int).unwrap_or(0)
    }

    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.lookup(name).and_then(Value::as_str)
    }

    pub fn get_proxy(&self, name: &str) -> Proxy {
        self.lookup(name).and_then(Value::as_proxy).unwrap_or(0)
    }

    pub fn get_seq(&self, name: &str) -> Option<&Rc<Seq>> {
        self.lookup(name).and_then(Value::as_seq)
    }

    fn position(&self, canonical: &str) -> Option<usize> {
        if self.sorted {
            self.binary_search(canonical).ok()
        } else {
            self.fields.iter().position(|f| f.name == canonical)
        }
    }

    fn binary_search(&self, canonical: &str) -> std::result::Result<usize, usize> {
        self.fields
            .binary_search_by(|f| f.name.as_str().cmp(canonical))
    }
}
