use mlua::Lua;
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A typed value shared between steps. Exactly one variant is active;
/// integers and floats are kept apart so scripts see the same subtype they
/// stored.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableValue {
    Integer(i64),
    Float(f64),
    String(String),
}

#[derive(Debug, thiserror::Error)]
#[error("`{name}` is not a valid variable name")]
pub struct InvalidVariableName {
    pub name: String,
}

/// Identifier naming a context variable. Must match
/// `[A-Za-z_][A-Za-z0-9_]*`; ordering is lexicographic so name sets iterate
/// in a stable order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VariableName(String);

impl VariableName {
    pub fn new(name: &str) -> Result<Self, InvalidVariableName> {
        let mut chars = name.chars();
        let valid = match chars.next() {
            Some(first) => {
                (first.is_ascii_alphabetic() || first == '_')
                    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            None => false,
        };
        if valid {
            Ok(Self(name.to_string()))
        } else {
            Err(InvalidVariableName {
                name: name.to_string(),
            })
        }
    }

    // Callers must pass a well-formed identifier.
    pub(crate) fn new_unchecked(name: &str) -> Self {
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VariableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for VariableName {
    type Err = InvalidVariableName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for VariableName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for VariableName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Callback run once per step against the freshly created script
/// environment, before the script itself. Lets the embedding application
/// inject its own helper commands.
pub type StepSetup = dyn Fn(&Lua) -> mlua::Result<()> + Send + Sync;

/// Named variables shared across the steps of a sequence, plus the optional
/// per-step setup hook.
#[derive(Clone, Default)]
pub struct Context {
    variables: BTreeMap<VariableName, VariableValue>,
    step_setup: Option<Arc<StepSetup>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: VariableName, value: VariableValue) {
        self.variables.insert(name, value);
    }

    /// Looks up a variable. Accepts `&VariableName` or a plain `&str`.
    pub fn get<Q>(&self, name: &Q) -> Option<&VariableValue>
    where
        VariableName: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.variables.get(name)
    }

    pub fn remove<Q>(&mut self, name: &Q) -> Option<VariableValue>
    where
        VariableName: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.variables.remove(name)
    }

    /// Variables in lexicographic name order.
    pub fn variables(&self) -> impl Iterator<Item = (&VariableName, &VariableValue)> {
        self.variables.iter()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn set_step_setup<F>(&mut self, setup: F)
    where
        F: Fn(&Lua) -> mlua::Result<()> + Send + Sync + 'static,
    {
        self.step_setup = Some(Arc::new(setup));
    }

    pub(crate) fn step_setup(&self) -> Option<&Arc<StepSetup>> {
        self.step_setup.as_ref()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("variables", &self.variables)
            .field("step_setup", &self.step_setup.is_some())
            .finish()
    }
}
