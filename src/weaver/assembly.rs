//! Whole-module weaving.
//!
//! [`AssemblyWeaver`] drives a run over one [`Module`]:
//!
//! 1. A [`SymbolResolver`] is built for the module, loading every dependency. A missing
//!    dependency aborts the run before anything is modified.
//! 2. Every method is planned in parallel: anonymous types and methods without a body are
//!    skipped, the remaining methods are checked against the [`PolicyResolver`] for each enabled
//!    [`Concern`].
//! 3. Plans are applied one method at a time, exception logging first and profiling second, so a
//!    method carrying both measures its exception handler as well.
//!
//! The outcome of every method is collected in a [`WeaveReport`]. A failing method is recorded
//! and the run continues with the next one.

use std::{fmt, sync::Arc};

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::{
    metadata::{
        typesystem::{RuntimeEnvironment, SymbolResolver},
        MethodDef, Module, TypeDef,
    },
    weaver::{Concern, LoggingMode, MethodWeaver, PolicyResolver, WeaveConfig},
    Error, Result,
};

/// Writes a woven module back to its persistent form.
///
/// Implemented by the serialization collaborator; the weaver only hands over the module.
pub trait ModuleSerializer {
    /// Persist `module`.
    ///
    /// # Errors
    /// Implementation specific.
    fn serialize(&mut self, module: &Module) -> Result<()>;
}

/// Why a method was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The declaring type is compiler generated (no namespace)
    AnonymousType,
    /// The method has no body
    NoBody,
    /// No enabled concern applies to the method
    NotEligible,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AnonymousType => f.write_str("anonymous type"),
            SkipReason::NoBody => f.write_str("no body"),
            SkipReason::NotEligible => f.write_str("not eligible"),
        }
    }
}

/// What happened to one method.
#[derive(Debug)]
pub enum WeaveOutcome {
    /// Every planned concern was applied, in order
    Woven(Vec<Concern>),
    /// Nothing was planned
    Skipped(SkipReason),
    /// Applying `concern` failed; `applied` lists the concerns committed before it
    Failed {
        /// Concerns already woven into the body
        applied: Vec<Concern>,
        /// The concern that failed
        concern: Concern,
        /// Cause of the failure
        error: Error,
    },
}

/// The outcome of one method, keyed by its declaring type.
#[derive(Debug)]
pub struct MethodReport {
    /// Full name of the declaring type
    pub type_name: String,
    /// Method name
    pub method_name: String,
    /// What happened
    pub outcome: WeaveOutcome,
}

/// Result of a weaving run.
///
/// # Usage
///
/// ```rust,no_run
/// use cilweave::weaver::{AssemblyWeaver, WeaveConfig};
/// use cilweave::{metadata::Module, Domain};
/// use std::sync::Arc;
///
/// # fn example(mut module: Module) -> cilweave::Result<()> {
/// let weaver = AssemblyWeaver::new(WeaveConfig::all(), Arc::new(Domain::new()));
/// let report = weaver.weave(&mut module)?;
///
/// if report.is_complete_success() {
///     println!("Wove {} methods", report.woven_count());
/// } else {
///     println!("Wove {} methods, {} failed", report.woven_count(), report.failed_count());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct WeaveReport {
    methods: Vec<MethodReport>,
    woven_count: usize,
    skipped_count: usize,
    failed_count: usize,
}

impl WeaveReport {
    /// An empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded methods in module order.
    #[must_use]
    pub fn methods(&self) -> &[MethodReport] {
        &self.methods
    }

    /// Outcome recorded for `type_name::method_name`.
    #[must_use]
    pub fn outcome(&self, type_name: &str, method_name: &str) -> Option<&WeaveOutcome> {
        self.methods
            .iter()
            .find(|m| m.type_name == type_name && m.method_name == method_name)
            .map(|m| &m.outcome)
    }

    /// Number of methods with every planned concern applied.
    #[must_use]
    pub fn woven_count(&self) -> usize {
        self.woven_count
    }

    /// Number of methods left alone.
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.skipped_count
    }

    /// Number of methods where a weave failed.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failed_count
    }

    /// Whether no weave failed.
    #[must_use]
    pub fn is_complete_success(&self) -> bool {
        self.failed_count == 0
    }

    fn record(&mut self, type_name: String, method_name: String, outcome: WeaveOutcome) {
        match outcome {
            WeaveOutcome::Woven(_) => self.woven_count += 1,
            WeaveOutcome::Skipped(_) => self.skipped_count += 1,
            WeaveOutcome::Failed { .. } => self.failed_count += 1,
        }
        self.methods.push(MethodReport {
            type_name,
            method_name,
            outcome,
        });
    }
}

struct MethodPlan {
    type_index: usize,
    method_index: usize,
    type_name: String,
    method_name: String,
    decision: std::result::Result<Vec<Concern>, SkipReason>,
}

/// Applies the configured concerns to every eligible method of a module.
pub struct AssemblyWeaver {
    config: WeaveConfig,
    env: Arc<dyn RuntimeEnvironment>,
}

impl AssemblyWeaver {
    /// A weaver resolving types through `env`.
    pub fn new(config: WeaveConfig, env: Arc<dyn RuntimeEnvironment>) -> Self {
        AssemblyWeaver { config, env }
    }

    /// The run configuration.
    #[must_use]
    pub fn config(&self) -> &WeaveConfig {
        &self.config
    }

    /// Weave `module` in place.
    ///
    /// # Errors
    /// Returns [`Error::DependencyNotFound`] if a referenced assembly cannot be located; the
    /// module is unchanged in that case. Per-method failures are recorded in the report instead.
    pub fn weave(&self, module: &mut Module) -> Result<WeaveReport> {
        let resolver =
            SymbolResolver::new(module, self.env.clone(), &self.config.dependency_directories)?;

        let plans = self.plan(module, &resolver);
        let mut report = WeaveReport::new();

        for plan in plans {
            let outcome = match plan.decision {
                Err(reason) => {
                    debug!("Skipping {}::{} ({})", plan.type_name, plan.method_name, reason);
                    WeaveOutcome::Skipped(reason)
                }
                Ok(concerns) => {
                    let method = &mut module.types[plan.type_index].methods[plan.method_index];
                    self.apply(&resolver, method, concerns)
                }
            };

            if let WeaveOutcome::Failed { concern, error, .. } = &outcome {
                warn!(
                    "Failed to weave {} into {}::{}: {}",
                    concern, plan.type_name, plan.method_name, error
                );
            }
            report.record(plan.type_name, plan.method_name, outcome);
        }

        info!(
            "Wove {} of {} methods in {} ({} skipped, {} failed)",
            report.woven_count(),
            report.methods().len(),
            module.name,
            report.skipped_count(),
            report.failed_count()
        );
        Ok(report)
    }

    /// Weave `module` and hand it to `serializer`.
    ///
    /// # Errors
    /// Returns the errors of [`AssemblyWeaver::weave`] and of the serializer.
    pub fn reweave(
        &self,
        module: &mut Module,
        serializer: &mut dyn ModuleSerializer,
    ) -> Result<WeaveReport> {
        let report = self.weave(module)?;
        serializer.serialize(module)?;
        Ok(report)
    }

    fn plan(&self, module: &Module, resolver: &SymbolResolver) -> Vec<MethodPlan> {
        let policy = PolicyResolver::new(resolver);

        module
            .types
            .par_iter()
            .enumerate()
            .flat_map_iter(|(type_index, type_def)| {
                let policy = &policy;
                type_def
                    .methods
                    .iter()
                    .enumerate()
                    .map(move |(method_index, method)| MethodPlan {
                        type_index,
                        method_index,
                        type_name: type_def.full_name(),
                        method_name: method.name.clone(),
                        decision: self.decide(policy, type_def, method),
                    })
            })
            .collect()
    }

    fn decide(
        &self,
        policy: &PolicyResolver<'_>,
        type_def: &TypeDef,
        method: &MethodDef,
    ) -> std::result::Result<Vec<Concern>, SkipReason> {
        if type_def.is_anonymous() {
            return Err(SkipReason::AnonymousType);
        }
        if !method.has_body() {
            return Err(SkipReason::NoBody);
        }

        let mut concerns = Vec::with_capacity(2);
        if self.config.enable_logging
            && (policy.should_enable(method, type_def, Concern::Logging)
                || (self.config.include_test_methods
                    && method.has_custom_attribute(&self.config.test_method_attribute)))
        {
            concerns.push(Concern::Logging);
        }
        if self.config.enable_profiling
            && (!self.config.filter_profiling
                || policy.should_enable(method, type_def, Concern::Profiling))
        {
            concerns.push(Concern::Profiling);
        }

        if concerns.is_empty() {
            Err(SkipReason::NotEligible)
        } else {
            Ok(concerns)
        }
    }

    fn apply(
        &self,
        resolver: &SymbolResolver,
        method: &mut MethodDef,
        concerns: Vec<Concern>,
    ) -> WeaveOutcome {
        let mut applied = Vec::with_capacity(concerns.len());
        let mut weaver = MethodWeaver::new(resolver, method);

        for concern in concerns {
            let result = match concern {
                Concern::Logging => match self.config.logging_mode {
                    LoggingMode::Catch => {
                        weaver.wrap_catch(&self.config.exception_type, &self.config.handler_type)
                    }
                    LoggingMode::Rethrow => {
                        weaver.wrap_rethrow(&self.config.exception_type, &self.config.handler_type)
                    }
                },
                Concern::Profiling => weaver.wrap_measure(&self.config.profiler_type),
            };

            if let Err(error) = result {
                return WeaveOutcome::Failed {
                    applied,
                    concern,
                    error,
                };
            }
            applied.push(concern);
        }

        WeaveOutcome::Woven(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::{method::ExceptionHandlerFlags, TypeRef},
        test::{fixture_domain, fixture_module, PROFILER},
        weaver::{ENABLE_LOGGING_ATTRIBUTE, TEST_METHOD_ATTRIBUTE},
    };

    fn handler_flags(module: &Module, type_name: &str, method: &str) -> Vec<ExceptionHandlerFlags> {
        module
            .find_method(type_name, method)
            .and_then(|m| m.body.as_ref())
            .map(|b| b.exception_handlers.iter().map(|h| h.flags).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_logging_only_run() -> Result<()> {
        let mut module = fixture_module();
        let weaver = AssemblyWeaver::new(WeaveConfig::logging_only(), Arc::new(fixture_domain()));
        let report = weaver.weave(&mut module)?;

        assert!(report.is_complete_success());
        assert!(matches!(
            report.outcome("App.Calculator", "Add"),
            Some(WeaveOutcome::Woven(c)) if c == &[Concern::Logging]
        ));
        assert!(matches!(
            report.outcome("App.Calculator", "Describe"),
            Some(WeaveOutcome::Skipped(SkipReason::NotEligible))
        ));
        assert!(matches!(
            report.outcome("App.Calculator", "Compute"),
            Some(WeaveOutcome::Skipped(SkipReason::NoBody))
        ));
        assert!(matches!(
            report.outcome("App.Calculator/<>c", "Lambda"),
            Some(WeaveOutcome::Skipped(SkipReason::AnonymousType))
        ));
        assert_eq!(
            handler_flags(&module, "App.Calculator", "Add"),
            vec![ExceptionHandlerFlags::EXCEPTION]
        );
        assert!(handler_flags(&module, "App.Calculator", "Describe").is_empty());
        Ok(())
    }

    #[test]
    fn test_logging_before_profiling() -> Result<()> {
        let mut module = fixture_module();
        let config = WeaveConfig {
            filter_profiling: false,
            ..WeaveConfig::all()
        };
        let report = AssemblyWeaver::new(config, Arc::new(fixture_domain())).weave(&mut module)?;

        assert!(matches!(
            report.outcome("App.Calculator", "Add"),
            Some(WeaveOutcome::Woven(c)) if c == &[Concern::Logging, Concern::Profiling]
        ));
        // The catch region is nested inside the finally region added afterwards.
        assert_eq!(
            handler_flags(&module, "App.Calculator", "Add"),
            vec![ExceptionHandlerFlags::EXCEPTION, ExceptionHandlerFlags::FINALLY]
        );
        assert!(matches!(
            report.outcome("App.Calculator", "Describe"),
            Some(WeaveOutcome::Woven(c)) if c == &[Concern::Profiling]
        ));
        Ok(())
    }

    #[test]
    fn test_profiling_filter() -> Result<()> {
        let mut module = fixture_module();
        let report = AssemblyWeaver::new(WeaveConfig::profiling_only(), Arc::new(fixture_domain()))
            .weave(&mut module)?;

        // Only Describe carries the profiling marker.
        assert_eq!(report.woven_count(), 1);
        assert!(matches!(
            report.outcome("App.Calculator", "Describe"),
            Some(WeaveOutcome::Woven(_))
        ));
        Ok(())
    }

    #[test]
    fn test_test_methods_logged() -> Result<()> {
        let mut module = fixture_module();
        let test_type = TypeDef::new("App.Tests", "CalculatorTests").with_method(
            MethodDef::new("Adds", TypeRef::void())
                .with_attribute(TEST_METHOD_ATTRIBUTE)
                .with_body(crate::test::void_body()),
        );
        module.types.push(test_type);

        let mut config = WeaveConfig::logging_only();
        let report = AssemblyWeaver::new(config.clone(), Arc::new(fixture_domain()))
            .weave(&mut module.clone())?;
        assert!(matches!(
            report.outcome("App.Tests.CalculatorTests", "Adds"),
            Some(WeaveOutcome::Woven(_))
        ));

        config.include_test_methods = false;
        let report =
            AssemblyWeaver::new(config, Arc::new(fixture_domain())).weave(&mut module)?;
        assert!(matches!(
            report.outcome("App.Tests.CalculatorTests", "Adds"),
            Some(WeaveOutcome::Skipped(SkipReason::NotEligible))
        ));
        Ok(())
    }

    #[test]
    fn test_failure_is_recorded_and_run_continues() -> Result<()> {
        let mut module = fixture_module();
        let config = WeaveConfig {
            handler_type: TypeRef::new(PROFILER),
            filter_profiling: false,
            ..WeaveConfig::all()
        };
        let report = AssemblyWeaver::new(config, Arc::new(fixture_domain())).weave(&mut module)?;

        assert!(!report.is_complete_success());
        assert!(matches!(
            report.outcome("App.Calculator", "Add"),
            Some(WeaveOutcome::Failed {
                applied,
                concern: Concern::Logging,
                error: Error::MemberResolution { .. },
            }) if applied.is_empty()
        ));
        assert!(handler_flags(&module, "App.Calculator", "Add").is_empty());
        assert!(matches!(
            report.outcome("App.Calculator", "Describe"),
            Some(WeaveOutcome::Woven(_))
        ));
        Ok(())
    }

    #[test]
    fn test_missing_dependency_aborts() {
        let mut module = fixture_module().with_reference("App.Missing");
        let before = module.clone();
        let result =
            AssemblyWeaver::new(WeaveConfig::all(), Arc::new(fixture_domain())).weave(&mut module);

        assert!(matches!(result, Err(Error::DependencyNotFound { name }) if name == "App.Missing"));
        assert_eq!(module, before);
    }

    #[test]
    fn test_reweave_hands_module_to_serializer() -> Result<()> {
        struct Capture(Vec<usize>);
        impl ModuleSerializer for Capture {
            fn serialize(&mut self, module: &Module) -> Result<()> {
                let regions: usize = module
                    .types
                    .iter()
                    .flat_map(|t| &t.methods)
                    .filter_map(|m| m.body.as_ref())
                    .map(|b| b.exception_handlers.len())
                    .sum();
                self.0.push(regions);
                Ok(())
            }
        }

        let mut module = fixture_module();
        let mut capture = Capture(Vec::new());
        let weaver = AssemblyWeaver::new(WeaveConfig::logging_only(), Arc::new(fixture_domain()));
        weaver.reweave(&mut module, &mut capture)?;

        assert_eq!(capture.0, vec![1]);
        assert!(module
            .find_method("App.Calculator", "Add")
            .is_some_and(|m| m.has_custom_attribute(ENABLE_LOGGING_ATTRIBUTE)));
        Ok(())
    }
}
