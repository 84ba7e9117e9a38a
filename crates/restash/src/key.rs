// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cache key derivation.

use crate::call::CallSite;

/// The key strategy configured on a decorator.
///
/// Derivation produces one opaque string per distinct call. Equal inputs
/// always produce equal keys; distinct inputs producing distinct keys is
/// best-effort, since the derived form is a string rendering of the
/// arguments rather than a bijective encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeySpec {
    /// Derive the key from the call description: module, function, positional
    /// values, and keyword pairs sorted by name.
    Derived {
        /// Drop the first positional value (a receiver such as `self`), so
        /// calls on different instances share one key.
        skip_receiver: bool,
    },
    /// Use this key unconditionally, ignoring the call description.
    Explicit(String),
    /// Use the value bound to the named argument as the key.
    FromArg(&'static str),
}

impl Default for KeySpec {
    fn default() -> Self {
        Self::Derived { skip_receiver: false }
    }
}

impl KeySpec {
    /// Produces the cache key for one call.
    ///
    /// # Panics
    ///
    /// Panics for [`KeySpec::FromArg`] when the call's bindings lack the named
    /// argument. That is a mismatch between the decorator configuration and
    /// the call description, a programmer error surfaced eagerly.
    #[must_use]
    pub fn key_for(&self, call: &CallSite<'_>) -> String {
        match self {
            Self::Derived { skip_receiver } => derived(call, *skip_receiver),
            Self::Explicit(key) => key.clone(),
            Self::FromArg(name) => call
                .bindings()
                .get(name)
                .unwrap_or_else(|| {
                    panic!(
                        "cached call {}.{} has no argument named {name:?} to derive the key from",
                        call.module(),
                        call.function()
                    )
                })
                .to_string(),
        }
    }
}

/// Renders `module.function(positional,...)kwarg=value,...` with keyword
/// pairs in name order, so insertion order never changes the key.
fn derived(call: &CallSite<'_>, skip_receiver: bool) -> String {
    let mut key = format!("{}.{}(", call.module(), call.function());
    for value in call.positional().skip(usize::from(skip_receiver)) {
        key.push_str(&format!("{value},"));
    }
    key.push(')');
    for (name, value) in call.kwargs() {
        key.push_str(&format!("{name}={value},"));
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call() -> CallSite<'static> {
        CallSite::new("app.users", "load").arg("user_id", "42").kwarg("b", "2").kwarg("a", "1")
    }

    #[test]
    fn derivation_is_idempotent() {
        let spec = KeySpec::default();
        assert_eq!(spec.key_for(&call()), spec.key_for(&call()));
    }

    #[test]
    fn keyword_insertion_order_does_not_change_the_key() {
        let forward = CallSite::new("app", "f").kwarg("a", "1").kwarg("b", "2");
        let reversed = CallSite::new("app", "f").kwarg("b", "2").kwarg("a", "1");

        let spec = KeySpec::default();
        assert_eq!(spec.key_for(&forward), spec.key_for(&reversed));
    }

    #[test]
    fn distinct_arguments_produce_distinct_keys() {
        let spec = KeySpec::default();
        let one = spec.key_for(&CallSite::new("app", "f").arg("id", "1"));
        let two = spec.key_for(&CallSite::new("app", "f").arg("id", "2"));
        assert_ne!(one, two);
    }

    #[test]
    fn skip_receiver_shares_keys_across_instances() {
        let spec = KeySpec::Derived { skip_receiver: true };
        let first = CallSite::new("app", "method").arg("self", "instance-1").arg("id", "7");
        let second = CallSite::new("app", "method").arg("self", "instance-2").arg("id", "7");
        assert_eq!(spec.key_for(&first), spec.key_for(&second));

        let kept = KeySpec::default();
        assert_ne!(kept.key_for(&first), kept.key_for(&second));
    }

    #[test]
    fn explicit_key_ignores_the_call() {
        let spec = KeySpec::Explicit("fixed".to_owned());
        assert_eq!(spec.key_for(&call()), "fixed");
    }

    #[test]
    fn from_arg_reads_the_binding() {
        let spec = KeySpec::FromArg("user_id");
        assert_eq!(spec.key_for(&call()), "42");
    }

    #[test]
    fn from_arg_reads_defaults_when_unbound() {
        let spec = KeySpec::FromArg("region");
        let call = CallSite::new("app", "f").default_arg("region", "eu");
        assert_eq!(spec.key_for(&call), "eu");
    }

    #[test]
    #[should_panic(expected = "no argument named")]
    fn from_arg_panics_on_missing_binding() {
        let spec = KeySpec::FromArg("absent");
        let _ = spec.key_for(&call());
    }
}
