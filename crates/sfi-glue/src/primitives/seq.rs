//! Ordered value sequence.

use super::{Proxy, Rec, Value};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// Growable ordered array of typed values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Seq {
    elements: Vec<Value>,
}

impl Seq {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a sequence of strings.
    pub fn from_strings<I, S>(strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        strings
            .into_iter()
            .map(|s| Value::String(s.into()))
            .collect()
    }

    /// Collect the string elements, skipping anything else.
    pub fn to_strings(&self) -> Vec<String> {
        self.elements
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    pub fn append(&mut self, value: impl Into<Value>) {
        self.elements.push(value.into());
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.elements.get(index)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn clear(&mut self) {
        self.elements.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.elements.iter()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.elements
    }

    pub fn set(&mut self, index: usize, value: Value) -> bool {
        match self.elements.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Duplicate the sequence and every nested container.
    pub fn deep_copy(&self) -> Seq {
        self.elements.iter().map(Value::deep_copy).collect()
    }

    /// Take another reference to a shared sequence.
    pub fn shallow_share(this: &Rc<Seq>) -> Rc<Seq> {
        Rc::clone(this)
    }

    pub fn get_bool(&self, index: usize) -> bool {
        self.get(index).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn get_int(&self, index: usize) -> i32 {
        self.get(index).and_then(Value::as_int).unwrap_or(0)
    }

    pub fn get_num(&self, index: usize) -> i64 {
        self.get(index).and_then(Value::as_num).unwrap_or(0)
    }

    pub fn get_string(&self, index: usize) -> Option<&str> {
        self.get(index).and_then(Value::as_str)
    }

    pub fn get_proxy(&self, index: usize) -> Proxy {
        self.get(index).and_then(Value::as_proxy).unwrap_or(0)
    }

    pub fn get_seq(&self, index: usize) -> Option<&Rc<Seq>> {
        self.get(index).and_then(Value::as_seq)
    }

    pub fn get_rec(&self, index: usize) -> Option<&Rc<Rec>> {
        self.get(index).and_then(Value::as_rec)
    }
}

impl FromIterator<Value> for Seq {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        Self {
            elements: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Seq {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.into_iter()
    }
}

impl<'a> IntoIterator for &'a Seq {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_typed_get() {
        let mut seq = Seq::new();
        seq.append(7);
        seq.append("seven");
        seq.append(Value::Proxy(9));

        assert_eq!(seq.len(), 3);
        assert_eq!(seq.get_int(0), 7);
        assert_eq!(seq.get_string(1), Some("seven"));
        assert_eq!(seq.get_proxy(2), 9);
        // mistyped and out of range reads fall back to defaults
        assert_eq!(seq.get_int(1), 0);
        assert_eq!(seq.get_proxy(10), 0);
    }

    #[test]
    fn test_string_conversion() {
        let seq = Seq::from_strings(["a", "b"]);
        assert_eq!(seq.to_strings(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_shallow_share_sees_same_elements() {
        let shared = Rc::new(Seq::from_strings(["x"]));
        let other = Seq::shallow_share(&shared);
        assert!(Rc::ptr_eq(&shared, &other));
        assert_eq!(Rc::strong_count(&shared), 2);
    }

    #[test]
    fn test_deep_copy_nested() {
        let mut inner = Seq::new();
        inner.append(1);
        let mut outer = Seq::new();
        outer.append(inner);

        let copy = outer.deep_copy();
        assert_eq!(copy, outer);
        assert!(!Rc::ptr_eq(
            outer.get_seq(0).unwrap(),
            copy.get_seq(0).unwrap()
        ));
    }
}
