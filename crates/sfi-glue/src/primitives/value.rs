//! Tagged value model carried by glue messages.
//!
//! Containers (`Seq`, `Rec`) are held behind `Rc`, so `Clone` on a [`Value`]
//! shares them. Use [`Value::deep_copy`] when an independent tree is needed.

use super::{Rec, Seq};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// Opaque handle of a remote object. Zero never names an object.
pub type Proxy = u64;

/// Single-character scalar category of a value or parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Category {
    #[default]
    None,
    Bool,
    Int,
    Num,
    Real,
    String,
    Choice,
    Proxy,
    Seq,
    Rec,
    BBlock,
    FBlock,
    PSpec,
}

impl Category {
    pub fn as_char(self) -> char {
        match self {
            Category::None => '\0',
            Category::Bool => 'b',
            Category::Int => 'i',
            Category::Num => 'n',
            Category::Real => 'r',
            Category::String => 's',
            Category::Choice => 'c',
            Category::Proxy => 'p',
            Category::Seq => 'Q',
            Category::Rec => 'R',
            Category::BBlock => 'B',
            Category::FBlock => 'F',
            Category::PSpec => 'P',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        Some(match c {
            '\0' => Category::None,
            'b' => Category::Bool,
            'i' => Category::Int,
            'n' => Category::Num,
            'r' => Category::Real,
            's' => Category::String,
            'c' => Category::Choice,
            'p' => Category::Proxy,
            'Q' => Category::Seq,
            'R' => Category::Rec,
            'B' => Category::BBlock,
            'F' => Category::FBlock,
            'P' => Category::PSpec,
            _ => return None,
        })
    }
}

/// Description of a property or procedure parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub category: Category,
    #[serde(default)]
    pub nick: String,
    #[serde(default)]
    pub blurb: String,
    /// Colon separated option flags, e.g. `":r:w:G:"`.
    #[serde(default)]
    pub hints: String,
    #[serde(default)]
    pub default: Value,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, category: Category) -> Self {
        Self {
            name: name.into(),
            category,
            nick: String::new(),
            blurb: String::new(),
            hints: String::new(),
            default: Value::None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = default;
        self
    }

    pub fn with_blurb(mut self, blurb: impl Into<String>) -> Self {
        self.blurb = blurb.into();
        self
    }

    pub fn with_hints(mut self, hints: impl Into<String>) -> Self {
        self.hints = hints.into();
        self
    }

    /// Whether `value` is acceptable for this parameter.
    pub fn accepts(&self, value: &Value) -> bool {
        value.category() == self.category
    }
}

/// A typed value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "lowercase")]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i32),
    Num(i64),
    Real(#[serde(with = "float_repr")] f64),
    String(String),
    Choice(String),
    Proxy(Proxy),
    Seq(Rc<Seq>),
    Rec(Rc<Rec>),
    BBlock(Vec<u8>),
    FBlock(#[serde(with = "float_repr::block")] Vec<f32>),
    PSpec(Box<ParamSpec>),
}

/// JSON has no literals for non-finite numbers. They travel as the strings
/// `"inf"`, `"-inf"` and `"nan"`.
mod float_repr {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    impl Repr {
        fn encode(value: f64) -> Self {
            if value.is_nan() {
                Repr::Text("nan".into())
            } else if value.is_infinite() {
                Repr::Text(if value > 0.0 { "inf" } else { "-inf" }.into())
            } else {
                Repr::Number(value)
            }
        }

        fn decode<E: serde::de::Error>(self) -> Result<f64, E> {
            match self {
                Repr::Number(value) => Ok(value),
                Repr::Text(text) => match text.as_str() {
                    "inf" => Ok(f64::INFINITY),
                    "-inf" => Ok(f64::NEG_INFINITY),
                    "nan" => Ok(f64::NAN),
                    other => Err(E::custom(format!("invalid real: {other:?}"))),
                },
            }
        }
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        Repr::encode(*value).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Repr::deserialize(deserializer)?.decode()
    }

    pub mod block {
        use super::Repr;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(block: &[f32], serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_seq(block.iter().map(|value| Repr::encode(f64::from(*value))))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f32>, D::Error> {
            Vec::<Repr>::deserialize(deserializer)?
                .into_iter()
                .map(|repr| repr.decode::<D::Error>().map(|value| value as f32))
                .collect()
        }
    }
}

impl Value {
    pub fn choice(choice: impl Into<String>) -> Self {
        Value::Choice(choice.into())
    }

    pub fn category(&self) -> Category {
        match self {
            Value::None => Category::None,
            Value::Bool(_) => Category::Bool,
            Value::Int(_) => Category::Int,
            Value::Num(_) => Category::Num,
            Value::Real(_) => Category::Real,
            Value::String(_) => Category::String,
            Value::Choice(_) => Category::Choice,
            Value::Proxy(_) => Category::Proxy,
            Value::Seq(_) => Category::Seq,
            Value::Rec(_) => Category::Rec,
            Value::BBlock(_) => Category::BBlock,
            Value::FBlock(_) => Category::FBlock,
            Value::PSpec(_) => Category::PSpec,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Copy the value, recursively duplicating nested containers.
    pub fn deep_copy(&self) -> Value {
        match self {
            Value::Seq(seq) => Value::Seq(Rc::new(seq.deep_copy())),
            Value::Rec(rec) => Value::Rec(Rc::new(rec.deep_copy())),
            other => other.clone(),
        }
    }

    /// Share the value. Containers are reference counted, scalars are copied.
    pub fn shallow_share(&self) -> Value {
        self.clone()
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_num(&self) -> Option<i64> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_choice(&self) -> Option<&str> {
        match self {
            Value::Choice(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_proxy(&self) -> Option<Proxy> {
        match self {
            Value::Proxy(p) => Some(*p),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&Rc<Seq>> {
        match self {
            Value::Seq(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_rec(&self) -> Option<&Rc<Rec>> {
        match self {
            Value::Rec(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_bblock(&self) -> Option<&[u8]> {
        match self {
            Value::BBlock(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_fblock(&self) -> Option<&[f32]> {
        match self {
            Value::FBlock(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_pspec(&self) -> Option<&ParamSpec> {
        match self {
            Value::PSpec(p) => Some(p),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Num(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Seq> for Value {
    fn from(v: Seq) -> Self {
        Value::Seq(Rc::new(v))
    }
}

impl From<Rec> for Value {
    fn from(v: Rec) -> Self {
        Value::Rec(Rc::new(v))
    }
}

impl From<ParamSpec> for Value {
    fn from(v: ParamSpec) -> Self {
        Value::PSpec(Box::new(v))
    }
}
