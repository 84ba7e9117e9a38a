// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Reflection-free call-site descriptions.
//!
//! Languages with runtime reflection derive cache keys by inspecting the
//! wrapped function's live argument bindings. Here the contract is explicit:
//! the caller describes the call once — module, function, positional pairs in
//! declaration order, keyword pairs, declared defaults — and key derivation
//! works off that description. Binding resolution merges defaults, then
//! positional values, then keyword values, later sources winning.

use std::collections::BTreeMap;
use std::fmt;

/// A stringified argument value.
///
/// `Text` covers scalar arguments; `Keys` is a key list, which is what the
/// multi-key decorator reads its requested batch from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArgValue {
    /// A scalar argument, already rendered to text.
    Text(String),
    /// A list of cache keys.
    Keys(Vec<String>),
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Keys(keys) => write!(f, "{keys:?}"),
        }
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<String>> for ArgValue {
    fn from(value: Vec<String>) -> Self {
        Self::Keys(value)
    }
}

/// Describes one invocation of a decorated function.
///
/// Positional arguments keep their declaration order (it matters for derived
/// keys and receiver skipping); keyword arguments are held sorted so derived
/// keys are stable under insertion-order changes.
///
/// # Examples
///
/// ```
/// use restash::CallSite;
///
/// let call = CallSite::new(module_path!(), "load_user")
///     .arg("user_id", "42")
///     .kwarg("with_profile", "true");
/// ```
#[derive(Clone, Debug)]
pub struct CallSite<'a> {
    module: &'a str,
    function: &'a str,
    args: Vec<(&'a str, ArgValue)>,
    kwargs: BTreeMap<&'a str, ArgValue>,
    defaults: BTreeMap<&'a str, ArgValue>,
}

impl<'a> CallSite<'a> {
    /// Creates a call description for the named function.
    #[must_use]
    pub fn new(module: &'a str, function: &'a str) -> Self {
        Self {
            module,
            function,
            args: Vec::new(),
            kwargs: BTreeMap::new(),
            defaults: BTreeMap::new(),
        }
    }

    /// Appends a positional argument.
    #[must_use]
    pub fn arg(mut self, name: &'a str, value: impl Into<ArgValue>) -> Self {
        self.args.push((name, value.into()));
        self
    }

    /// Adds a keyword argument.
    #[must_use]
    pub fn kwarg(mut self, name: &'a str, value: impl Into<ArgValue>) -> Self {
        self.kwargs.insert(name, value.into());
        self
    }

    /// Declares a parameter default, used only when no positional or keyword
    /// value binds the same name.
    #[must_use]
    pub fn default_arg(mut self, name: &'a str, value: impl Into<ArgValue>) -> Self {
        self.defaults.insert(name, value.into());
        self
    }

    /// The module the decorated function lives in.
    #[must_use]
    pub fn module(&self) -> &str {
        self.module
    }

    /// The decorated function's name.
    #[must_use]
    pub fn function(&self) -> &str {
        self.function
    }

    /// Resolves the effective bindings: defaults, overridden by positional
    /// values, overridden by keyword values.
    #[must_use]
    pub fn bindings(&self) -> BTreeMap<&'a str, &ArgValue> {
        let mut bindings: BTreeMap<&'a str, &ArgValue> = BTreeMap::new();
        for (name, value) in &self.defaults {
            bindings.insert(name, value);
        }
        for (name, value) in &self.args {
            bindings.insert(name, value);
        }
        for (name, value) in &self.kwargs {
            bindings.insert(name, value);
        }
        bindings
    }

    /// Positional values in declaration order.
    pub(crate) fn positional(&self) -> impl Iterator<Item = &ArgValue> {
        self.args.iter().map(|(_, value)| value)
    }

    /// Keyword pairs, sorted by name.
    pub(crate) fn kwargs(&self) -> &BTreeMap<&'a str, ArgValue> {
        &self.kwargs
    }

    /// Looks up a key-list binding by name.
    #[must_use]
    pub fn key_list(&self, name: &str) -> Option<&Vec<String>> {
        match self.bindings().get(name) {
            Some(ArgValue::Keys(keys)) => Some(keys),
            _ => None,
        }
    }
}
