//! rootstock — configuration-driven module initialization.
//!
//! Feed a two-dimensional string configuration (a [`Confdict`], usually
//! parsed from a file with [`parse_config_file`]) and a set of registered
//! [`Module`]s into [`init`]; every selected module is initialized exactly
//! once, in dependency order. Modules request each other's results through
//! [`InitContext::load`], which initializes the target on demand and
//! detects dependency loops.
//!
//! The supporting cast:
//!
//! - [`config::helpers`] — coercion of raw confdict strings into typed
//!   values (booleans, lists, durations, datetimes, host:port pairs) and
//!   the cache-folder helper.
//! - [`Registry`] — explicit factories replacing import-by-string, driven
//!   by [`parse_call`] / [`parse_object`].
//! - [`DependencySolver`] — topological ordering of declared module
//!   dependencies.
//! - [`parse_config_file`] — INI-style files with interpolation and
//!   `based_on` adjustment layers.

pub mod confdict;
pub mod config;
pub mod dependency;
pub mod error;
pub mod initializer;
pub mod logger;
pub mod registry;

pub use confdict::{ConfSection, Confdict, META_SECTION};
pub use config::helpers::{
    expand_home, extract_conf, extract_conf_with, init_cache_folder, parse_bool, parse_datetime,
    parse_host_port, parse_list, parse_time_interval,
};
pub use config::parser::{parse_config_file, parse_config_str};
pub use dependency::DependencySolver;
pub use error::{BoxedError, InitError};
pub use initializer::{
    Configured, ConfiguredModule, InitContext, InitOptions, Module, ModuleRegistry, init,
    init_from_file, init_from_file_with,
};
pub use registry::{
    AnyObject, CallArgs, ConfValue, Factory, Registry, downcast, parse_call, parse_object,
    parse_object_as, parse_object_with,
};
