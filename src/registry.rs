//! Explicit factory registry — the replacement for import-by-string.
//!
//! Configuration values frequently name the thing to construct
//! (`versionmanager = assets.versioning.Mercurial`). Instead of resolving
//! such dotted paths through runtime reflection, constructors are
//! registered up front under their dotted name; [`parse_call`] and
//! [`parse_object`] then resolve names against the [`Registry`] only.

use std::any::Any;
use std::collections::BTreeMap;

use crate::confdict::ConfSection;
use crate::config::helpers::{extract_conf, parse_list};
use crate::error::InitError;

/// A value extracted from a confdict and handed to a [`Factory`]:
/// either a plain string or a multi-line value split into a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfValue {
    Str(String),
    List(Vec<String>),
}

impl ConfValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value),
            Self::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::Str(_) => None,
            Self::List(values) => Some(values),
        }
    }
}

impl From<&str> for ConfValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for ConfValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<Vec<String>> for ConfValue {
    fn from(values: Vec<String>) -> Self {
        Self::List(values)
    }
}

/// Positional and keyword arguments for a factory invocation.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    pub args: Vec<ConfValue>,
    pub kwargs: BTreeMap<String, ConfValue>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_args(args: impl IntoIterator<Item = ConfValue>) -> Self {
        Self {
            args: args.into_iter().collect(),
            kwargs: BTreeMap::new(),
        }
    }

    pub fn arg(&self, index: usize) -> Option<&ConfValue> {
        self.args.get(index)
    }

    pub fn kwarg(&self, name: &str) -> Option<&ConfValue> {
        self.kwargs.get(name)
    }
}

/// The object a factory builds; callers downcast to the concrete type.
pub type AnyObject = Box<dyn Any + Send + Sync>;

/// Builds an object from confdict-sourced arguments.
///
/// Implemented for free by any matching closure:
///
/// `|args: &CallArgs| -> Result<AnyObject, InitError>`
pub trait Factory: Send + Sync {
    fn build(&self, args: &CallArgs) -> Result<AnyObject, InitError>;
}

impl<F> Factory for F
where
    F: Fn(&CallArgs) -> Result<AnyObject, InitError> + Send + Sync,
{
    fn build(&self, args: &CallArgs) -> Result<AnyObject, InitError> {
        self(args)
    }
}

/// Dotted name → factory.
#[derive(Default)]
pub struct Registry {
    factories: BTreeMap<String, Box<dyn Factory>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under its dotted name. Registering the same name
    /// twice is an error.
    pub fn register(
        &mut self,
        path: impl Into<String>,
        factory: impl Factory + 'static,
    ) -> Result<(), InitError> {
        let path = path.into();
        if self.factories.contains_key(&path) {
            return Err(InitError::config(format!(
                "factory {path:?} is already registered"
            )));
        }
        self.factories.insert(path, Box::new(factory));
        Ok(())
    }

    /// Resolve a dotted name to its factory. Unknown names error, like a
    /// failed import would.
    pub fn get(&self, path: &str) -> Result<&dyn Factory, InitError> {
        self.factories
            .get(path)
            .map(|factory| factory.as_ref())
            .ok_or_else(|| InitError::config(format!("no factory registered under {path:?}")))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.factories.contains_key(path)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

/// Parse a call specification string and invoke the named factory.
///
/// The grammar is `path.to.factory(a, b, key=value)`; a bare path without
/// parentheses invokes the factory with only the `extra` arguments. All
/// literal arguments are passed as strings. Caller-supplied positional
/// arguments come first, literal positional arguments are appended; literal
/// keyword arguments override caller-supplied ones.
pub fn parse_call(
    registry: &Registry,
    value: &str,
    extra: CallArgs,
) -> Result<AnyObject, InitError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(InitError::config("empty call specification".to_string()));
    }
    let mut call = extra;
    let path = match value.split_once('(') {
        None => value,
        Some((path, rest)) => {
            let literal = rest.trim().strip_suffix(')').ok_or_else(|| {
                InitError::config(format!(
                    "call specification {value:?} misses its closing parenthesis"
                ))
            })?;
            if !literal.trim().is_empty() {
                for part in literal.split(',') {
                    let part = part.trim();
                    if part.is_empty() {
                        return Err(InitError::config(format!(
                            "call specification {value:?} contains an empty argument"
                        )));
                    }
                    match part.split_once('=') {
                        Some((key, arg)) => {
                            call.kwargs
                                .insert(key.trim().to_string(), arg.trim().into());
                        }
                        None => call.args.push(part.into()),
                    }
                }
            }
            path.trim()
        }
    };
    registry.get(path)?.build(&call)
}

/// Create an object from a confdict.
///
/// When `conf[key]` contains a parenthesis it is treated as a terse call
/// specification and handed to [`parse_call`]. Otherwise the value is
/// resolved as a factory name and every sibling key sharing the `key.`
/// prefix becomes a keyword argument; multi-line values are converted to
/// lists first:
///
/// ```text
/// versionmanager = assets.versioning.mercurial
/// versionmanager.folder = /usr/share/versionmanager
/// versionmanager.repos =
///     /var/www/project
///     /var/www/library1
/// ```
pub fn parse_object(
    registry: &Registry,
    conf: &ConfSection,
    key: &str,
) -> Result<AnyObject, InitError> {
    parse_object_with(registry, conf, key, CallArgs::new())
}

/// Same as [`parse_object`], with caller-supplied extra arguments.
pub fn parse_object_with(
    registry: &Registry,
    conf: &ConfSection,
    key: &str,
    extra: CallArgs,
) -> Result<AnyObject, InitError> {
    let value = conf
        .get(key)
        .ok_or_else(|| InitError::config(format!("no object configured under {key:?}")))?;
    if value.contains('(') {
        return parse_call(registry, value, extra);
    }
    let mut call = extra;
    let prefix = format!("{key}.");
    for (sub_key, sub_value) in extract_conf(conf, &prefix) {
        let parsed = if sub_value.contains('\n') {
            ConfValue::List(parse_list(&sub_value))
        } else {
            ConfValue::Str(sub_value)
        };
        call.kwargs.insert(sub_key, parsed);
    }
    registry.get(value.trim())?.build(&call)
}

/// Downcast a factory-built object to its concrete type.
pub fn downcast<T: 'static>(object: AnyObject) -> Result<T, InitError> {
    object
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| {
            InitError::config(format!(
                "factory produced an unexpected type (wanted {})",
                std::any::type_name::<T>()
            ))
        })
}

/// [`parse_object`] plus [`downcast`] in one step.
pub fn parse_object_as<T: 'static>(
    registry: &Registry,
    conf: &ConfSection,
    key: &str,
) -> Result<T, InitError> {
    downcast(parse_object(registry, conf, key)?)
}
