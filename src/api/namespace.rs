//! The variable namespace shared with evaluated code.

use hashbrown::HashMap;

use crate::runtime::Value;

/// Name/value bindings handed to an evaluation, and (for [`exec`]) the
/// bindings it leaves behind.
///
/// [`exec`]: super::Sandbox::exec
///
/// # Example
///
/// ```
/// use cordon::api::Namespace;
/// use cordon::runtime::Value;
///
/// let mut ns = Namespace::new();
/// ns.set("qty", Value::Int(4));
/// assert!(ns.get("qty").is_some());
/// ```
#[derive(Default)]
pub struct Namespace {
    vars: HashMap<String, Value>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.remove(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub(crate) fn replace_all(&mut self, bindings: Vec<(String, Value)>) {
        self.vars = bindings.into_iter().collect();
    }
}

impl<S: Into<String>> FromIterator<(S, Value)> for Namespace {
    fn from_iter<T: IntoIterator<Item = (S, Value)>>(iter: T) -> Self {
        Self {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}
