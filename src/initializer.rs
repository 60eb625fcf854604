//! Dependency-ordered module initialization.
//!
//! # Module model
//!
//! A [`Module`] is a named, initializable unit. Its [`init`](Module::init)
//! hook receives an [`InitContext`] scoped to the confdict section named
//! after the module and returns an opaque [`ConfiguredModule`] that other
//! modules may request. Lookups of other modules go through
//! [`InitContext::load`], which initializes the target on demand — the
//! dependency graph is discovered lazily, and re-entering a module that is
//! still in progress fails with [`InitError::DependencyLoop`].
//!
//! Each module is initialized at most once per [`init`] call; repeated
//! lookups return the cached result. All bookkeeping lives in a
//! per-invocation context, so independent bootstrap runs can coexist in
//! one process.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::confdict::{ConfSection, Confdict, META_SECTION, MODULES_KEY};
use crate::config::helpers::parse_list;
use crate::config::parser::parse_config_file;
use crate::dependency::DependencySolver;
use crate::error::InitError;
use crate::registry::Registry;

/// The opaque result of a module's [`Module::init`] hook.
///
/// Modules define their own configured type and implement `into_any` as
/// `{ self }` so dependents can downcast through
/// [`InitContext::load_as`] or [`Configured::get_as`].
pub trait ConfiguredModule: Send + Sync + 'static {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// A named, initializable unit.
pub trait Module: Send + Sync {
    /// Unique name; also the confdict section this module is scoped to.
    fn name(&self) -> &str;

    /// Modules to initialize before this one. Entries that are not
    /// registered (or not selected) are skipped — a mandatory dependency
    /// should be requested through [`InitContext::load`] instead, which
    /// fails loudly.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Initialize this module.
    fn init(&self, ctx: &mut InitContext<'_, '_>) -> Result<Arc<dyn ConfiguredModule>, InitError>;
}

/// The modules known to an [`init`] run, in registration order.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Arc<dyn Module>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module. Registering a name twice is an error.
    pub fn register(&mut self, module: impl Module + 'static) -> Result<(), InitError> {
        if self.contains(module.name()) {
            return Err(InitError::config(format!(
                "module {:?} is already registered",
                module.name()
            )));
        }
        self.modules.push(Arc::new(module));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.iter().any(|module| module.name() == name)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.modules
            .iter()
            .map(|module| module.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    fn get(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules
            .iter()
            .find(|module| module.name() == name)
            .cloned()
    }
}

/// Options for [`init_from_file_with`].
pub struct InitOptions {
    /// Values layered over the parsed file before initialization.
    pub overrides: Confdict,
    /// Replaces the meta `modules` key when set.
    pub modules: Option<Vec<String>>,
    /// Initialize the tracing subscriber from the confdict.
    pub init_logging: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            overrides: Confdict::new(),
            modules: None,
            init_logging: true,
        }
    }
}

enum ModuleState {
    InProgress,
    Done(Arc<dyn ConfiguredModule>),
}

struct Initializer<'a> {
    confdict: &'a Confdict,
    modules: &'a ModuleRegistry,
    registry: &'a Registry,
    /// Modules selected for eager initialization (the meta `modules`
    /// filter, or everything registered).
    targets: BTreeSet<String>,
    states: HashMap<String, ModuleState>,
    /// Chain of in-progress initializations, for loop diagnostics.
    stack: Vec<String>,
}

impl<'a> Initializer<'a> {
    fn load(&mut self, name: &str) -> Result<Arc<dyn ConfiguredModule>, InitError> {
        match self.states.get(name) {
            Some(ModuleState::Done(configured)) => return Ok(configured.clone()),
            Some(ModuleState::InProgress) => {
                let start = self
                    .stack
                    .iter()
                    .position(|entry| entry == name)
                    .unwrap_or(0);
                let mut cycle: Vec<String> = self.stack[start..].to_vec();
                cycle.push(name.to_string());
                return Err(InitError::DependencyLoop(cycle));
            }
            None => {}
        }

        let module = self
            .modules
            .get(name)
            .ok_or_else(|| InitError::config(format!("unknown module {name:?}")))?;
        self.states
            .insert(name.to_string(), ModuleState::InProgress);
        self.stack.push(name.to_string());
        let result = self.run_module(&module);
        self.stack.pop();

        match result {
            Ok(configured) => {
                debug!(module = name, "module initialized");
                self.states
                    .insert(name.to_string(), ModuleState::Done(configured.clone()));
                Ok(configured)
            }
            Err(err) => {
                self.states.remove(name);
                Err(wrap_module_error(name, err))
            }
        }
    }

    fn run_module(
        &mut self,
        module: &Arc<dyn Module>,
    ) -> Result<Arc<dyn ConfiguredModule>, InitError> {
        for dep in module.dependencies() {
            if !self.modules.contains(&dep) || !self.targets.contains(&dep) {
                debug!(
                    module = module.name(),
                    dependency = dep.as_str(),
                    "declared dependency not selected, skipping"
                );
                continue;
            }
            self.load(&dep)?;
        }
        let name = module.name().to_string();
        let conf = self.confdict.section(&name).cloned().unwrap_or_default();
        let mut ctx = InitContext {
            name,
            conf,
            initializer: self,
        };
        module.init(&mut ctx)
    }

    fn into_done(self) -> BTreeMap<String, Arc<dyn ConfiguredModule>> {
        self.states
            .into_iter()
            .filter_map(|(name, state)| match state {
                ModuleState::Done(configured) => Some((name, configured)),
                ModuleState::InProgress => None,
            })
            .collect()
    }
}

/// Keep loop errors and already-attributed failures intact; everything
/// else becomes the failure of the named module.
fn wrap_module_error(name: &str, err: InitError) -> InitError {
    match err {
        err @ (InitError::DependencyLoop(_) | InitError::Module { .. }) => err,
        other => InitError::module(name, other),
    }
}

/// The per-module view handed to [`Module::init`].
pub struct InitContext<'a, 'b> {
    name: String,
    conf: ConfSection,
    initializer: &'a mut Initializer<'b>,
}

impl InitContext<'_, '_> {
    /// Name of the module being initialized.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// This module's own confdict section. Empty when the confdict has no
    /// section of the module's name.
    pub fn conf(&self) -> &ConfSection {
        &self.conf
    }

    /// The full configuration, for modules that need to look beyond their
    /// own section.
    pub fn confdict(&self) -> &Confdict {
        self.initializer.confdict
    }

    /// The factory registry, for [`crate::registry::parse_object`] and
    /// friends.
    pub fn registry(&self) -> &Registry {
        self.initializer.registry
    }

    /// Request another module's configured result, initializing it on
    /// demand. Requesting a module that is itself waiting on the current
    /// one fails with [`InitError::DependencyLoop`].
    pub fn load(&mut self, name: &str) -> Result<Arc<dyn ConfiguredModule>, InitError> {
        self.initializer.load(name)
    }

    /// [`load`](Self::load) plus a downcast to the concrete configured
    /// type.
    pub fn load_as<T: Any + Send + Sync>(&mut self, name: &str) -> Result<Arc<T>, InitError> {
        let configured = self.load(name)?;
        configured.into_any().downcast::<T>().map_err(|_| {
            InitError::config(format!(
                "module {name:?} has an unexpected configured type (wanted {})",
                std::any::type_name::<T>()
            ))
        })
    }
}

/// The result of a successful [`init`] run: a snapshot of the confdict
/// plus every configured module.
pub struct Configured {
    conf: Confdict,
    modules: BTreeMap<String, Arc<dyn ConfiguredModule>>,
}

impl std::fmt::Debug for Configured {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configured")
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Configured {
    /// The configuration the modules were initialized from.
    pub fn conf(&self) -> &Confdict {
        &self.conf
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ConfiguredModule>> {
        self.modules.get(name)
    }

    /// Fetch a configured module downcast to its concrete type.
    pub fn get_as<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, InitError> {
        let configured = self
            .modules
            .get(name)
            .ok_or_else(|| InitError::config(format!("module {name:?} was not initialized")))?;
        configured.clone().into_any().downcast::<T>().map_err(|_| {
            InitError::config(format!(
                "module {name:?} has an unexpected configured type (wanted {})",
                std::any::type_name::<T>()
            ))
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Names of all initialized modules.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Initialize all selected modules of `modules` against `confdict`.
///
/// The meta section's `modules` key narrows the selection; without it,
/// every registered module is initialized. Declared dependencies order the
/// eager pass; lookups through [`InitContext::load`] may pull in further
/// modules on demand.
pub fn init(
    confdict: &Confdict,
    modules: &ModuleRegistry,
    registry: &Registry,
) -> Result<Configured, InitError> {
    let filter = confdict
        .get(META_SECTION, MODULES_KEY)
        .map(|value| parse_list(value));
    if let Some(filter) = &filter {
        let missing: Vec<&str> = filter
            .iter()
            .filter(|name| !modules.contains(name))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(InitError::config(format!(
                "could not find the following modules:\n - {}",
                missing.join("\n - ")
            )));
        }
    }
    let targets: Vec<String> = filter.unwrap_or_else(|| modules.names());

    let mut solver = DependencySolver::new();
    for name in &targets {
        solver.add(name.clone());
        let module = modules.get(name).expect("selected modules are registered");
        for dep in module.dependencies() {
            solver.add_dependency(name.clone(), dep);
        }
    }
    let order = solver.solve()?;

    let mut initializer = Initializer {
        confdict,
        modules,
        registry,
        targets: targets.iter().cloned().collect(),
        states: HashMap::new(),
        stack: Vec::new(),
    };
    for name in &order {
        if !initializer.targets.contains(name) {
            continue;
        }
        initializer.load(name)?;
    }
    Ok(Configured {
        conf: confdict.clone(),
        modules: initializer.into_done(),
    })
}

/// Read configuration from `path` and initialize, like [`init`].
pub fn init_from_file(
    path: &Path,
    modules: &ModuleRegistry,
    registry: &Registry,
) -> Result<Configured, InitError> {
    init_from_file_with(path, modules, registry, &InitOptions::default())
}

/// [`init_from_file`] with overrides, a module selection and control over
/// logging setup.
pub fn init_from_file_with(
    path: &Path,
    modules: &ModuleRegistry,
    registry: &Registry,
    options: &InitOptions,
) -> Result<Configured, InitError> {
    let mut confdict = parse_config_file(path)?;
    confdict.apply_overrides(&options.overrides);
    if let Some(selected) = &options.modules {
        confdict.insert(META_SECTION, MODULES_KEY, selected.join("\n"));
    }
    if options.init_logging {
        crate::logger::init_from_confdict(&confdict)?;
    }
    init(&confdict, modules, registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Plain {
        name: &'static str,
        deps: Vec<String>,
        invocations: Arc<AtomicUsize>,
    }

    struct PlainConf {
        greeting: String,
    }

    impl ConfiguredModule for PlainConf {
        fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    impl Module for Plain {
        fn name(&self) -> &str {
            self.name
        }

        fn dependencies(&self) -> Vec<String> {
            self.deps.clone()
        }

        fn init(
            &self,
            ctx: &mut InitContext<'_, '_>,
        ) -> Result<Arc<dyn ConfiguredModule>, InitError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            let greeting = ctx
                .conf()
                .get("greeting")
                .cloned()
                .unwrap_or_else(|| "hello".to_string());
            Ok(Arc::new(PlainConf { greeting }))
        }
    }

    fn plain(name: &'static str, counter: &Arc<AtomicUsize>) -> Plain {
        Plain {
            name,
            deps: Vec::new(),
            invocations: counter.clone(),
        }
    }

    #[test]
    fn empty_run() {
        let configured = init(&Confdict::new(), &ModuleRegistry::new(), &Registry::new()).unwrap();
        assert!(configured.is_empty());
    }

    #[test]
    fn single_module_sees_its_section() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut modules = ModuleRegistry::new();
        modules.register(plain("greeter", &counter)).unwrap();

        let mut confdict = Confdict::new();
        confdict.insert("greeter", "greeting", "servus");

        let configured = init(&confdict, &modules, &Registry::new()).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let conf = configured.get_as::<PlainConf>("greeter").unwrap();
        assert_eq!(conf.greeting, "servus");
    }

    #[test]
    fn duplicate_module_registration_errors() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut modules = ModuleRegistry::new();
        modules.register(plain("greeter", &counter)).unwrap();
        assert!(modules.register(plain("greeter", &counter)).is_err());
    }

    #[test]
    fn filter_selects_subset() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut modules = ModuleRegistry::new();
        modules.register(plain("a", &counter)).unwrap();
        modules.register(plain("b", &counter)).unwrap();

        let mut confdict = Confdict::new();
        confdict.insert(META_SECTION, MODULES_KEY, "a");

        let configured = init(&confdict, &modules, &Registry::new()).unwrap();
        assert!(configured.contains("a"));
        assert!(!configured.contains("b"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn filter_with_unknown_name_initializes_nothing() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut modules = ModuleRegistry::new();
        modules.register(plain("a", &counter)).unwrap();

        let mut confdict = Confdict::new();
        confdict.insert(META_SECTION, MODULES_KEY, "a\nghost");

        let result = init(&confdict, &modules, &Registry::new());
        assert!(matches!(result, Err(InitError::Config(message)) if message.contains("ghost")));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn declared_dependencies_order_initialization() {
        let order: Arc<std::sync::Mutex<Vec<String>>> = Arc::default();

        struct Recording {
            name: &'static str,
            deps: Vec<String>,
            order: Arc<std::sync::Mutex<Vec<String>>>,
        }

        impl Module for Recording {
            fn name(&self) -> &str {
                self.name
            }
            fn dependencies(&self) -> Vec<String> {
                self.deps.clone()
            }
            fn init(
                &self,
                _ctx: &mut InitContext<'_, '_>,
            ) -> Result<Arc<dyn ConfiguredModule>, InitError> {
                self.order.lock().unwrap().push(self.name.to_string());
                Ok(Arc::new(PlainConf {
                    greeting: String::new(),
                }))
            }
        }

        let mut modules = ModuleRegistry::new();
        modules
            .register(Recording {
                name: "app",
                deps: vec!["db".to_string()],
                order: order.clone(),
            })
            .unwrap();
        modules
            .register(Recording {
                name: "db",
                deps: Vec::new(),
                order: order.clone(),
            })
            .unwrap();

        init(&Confdict::new(), &modules, &Registry::new()).unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["db", "app"]);
    }

    #[test]
    fn module_failure_is_attributed() {
        struct Failing;
        impl Module for Failing {
            fn name(&self) -> &str {
                "broken"
            }
            fn init(
                &self,
                _ctx: &mut InitContext<'_, '_>,
            ) -> Result<Arc<dyn ConfiguredModule>, InitError> {
                Err(InitError::config("nope"))
            }
        }

        let mut modules = ModuleRegistry::new();
        modules.register(Failing).unwrap();
        let result = init(&Confdict::new(), &modules, &Registry::new());
        match result {
            Err(InitError::Module { module, source }) => {
                assert_eq!(module, "broken");
                assert!(source.to_string().contains("nope"));
            }
            other => panic!("expected module error, got {other:?}"),
        }
    }
}
