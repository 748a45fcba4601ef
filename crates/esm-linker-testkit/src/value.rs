//! Script values of the test engine.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// A value produced by test module code.
///
/// Objects are shared: clones alias the same property map, so a loader that
/// decorates an `import.meta` object is observed by the module.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TestValue {
    /// `undefined`.
    #[default]
    Undefined,
    /// A number literal.
    Number(f64),
    /// A string literal.
    String(String),
    /// A property bag (namespace, `import.meta`).
    Object(Rc<RefCell<BTreeMap<String, TestValue>>>),
}

impl TestValue {
    /// A new empty object.
    pub fn object() -> Self {
        Self::Object(Rc::new(RefCell::new(BTreeMap::new())))
    }

    /// An object with the given properties.
    pub fn object_from<K: Into<String>>(
        properties: impl IntoIterator<Item = (K, TestValue)>,
    ) -> Self {
        let map = properties
            .into_iter()
            .map(|(key, value)| (key.into(), value))
            .collect();
        Self::Object(Rc::new(RefCell::new(map)))
    }

    /// A string value.
    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    /// Property `key` of an object; `Undefined` otherwise.
    pub fn get(&self, key: &str) -> TestValue {
        match self {
            Self::Object(properties) => properties.borrow().get(key).cloned().unwrap_or_default(),
            _ => Self::Undefined,
        }
    }

    /// Set property `key` on an object. Returns `false` for non-objects.
    pub fn set(&self, key: impl Into<String>, value: TestValue) -> bool {
        match self {
            Self::Object(properties) => {
                properties.borrow_mut().insert(key.into(), value);
                true
            }
            _ => false,
        }
    }

    /// Property names of an object, sorted.
    pub fn keys(&self) -> Vec<String> {
        match self {
            Self::Object(properties) => properties.borrow().keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// The number, if this is one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns `true` for `undefined`.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Returns `true` if both values are the same object.
    pub fn same_object(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for TestValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
            Self::Object(_) => f.write_str("[object Object]"),
        }
    }
}
