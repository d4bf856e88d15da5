//! Attribute-driven eligibility of methods for instrumentation.
//!
//! Each [`Concern`] is controlled by an enable/disable attribute pair that may be applied to a
//! type or to a method. Attributes are looked up on the live view of the method, so markers
//! inherited from base types and overridden members count. When the live member cannot be found
//! the decision falls back to the attributes recorded directly in metadata.

use log::{debug, warn};

use crate::metadata::{
    typesystem::{ResolvedMember, SymbolResolver},
    MethodDef, TypeDef,
};

/// Marker enabling exception logging.
pub const ENABLE_LOGGING_ATTRIBUTE: &str =
    "CilWeave.Target.Attributes.EnableExceptionLoggingAttribute";
/// Marker disabling exception logging.
pub const DISABLE_LOGGING_ATTRIBUTE: &str =
    "CilWeave.Target.Attributes.DisableExceptionLoggingAttribute";
/// Marker enabling profiling.
pub const ENABLE_PROFILING_ATTRIBUTE: &str =
    "CilWeave.Target.Attributes.EnablePerformanceProfilerAttribute";
/// Marker disabling profiling.
pub const DISABLE_PROFILING_ATTRIBUTE: &str =
    "CilWeave.Target.Attributes.DisablePerformanceProfilerAttribute";

/// A cross-cutting behavior that can be woven into a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Concern {
    /// Exception interception through a handler
    Logging,
    /// Start/Stop measurement through a profiler
    Profiling,
}

impl Concern {
    /// Full name of the attribute enabling this concern.
    #[must_use]
    pub fn enable_attribute(self) -> &'static str {
        match self {
            Concern::Logging => ENABLE_LOGGING_ATTRIBUTE,
            Concern::Profiling => ENABLE_PROFILING_ATTRIBUTE,
        }
    }

    /// Full name of the attribute disabling this concern.
    #[must_use]
    pub fn disable_attribute(self) -> &'static str {
        match self {
            Concern::Logging => DISABLE_LOGGING_ATTRIBUTE,
            Concern::Profiling => DISABLE_PROFILING_ATTRIBUTE,
        }
    }
}

impl std::fmt::Display for Concern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Concern::Logging => f.write_str("exception logging"),
            Concern::Profiling => f.write_str("profiling"),
        }
    }
}

/// Decides whether a concern applies to a method.
///
/// A disable marker on the method always wins. Otherwise the concern applies when the method or
/// its declaring type carries the enable marker. Disable markers on the type itself are not
/// consulted.
///
/// # Examples
///
/// ```rust
/// use cilweave::metadata::{typesystem::{Domain, SymbolResolver}, MethodDef, Module, TypeDef, TypeRef};
/// use cilweave::weaver::{Concern, PolicyResolver};
/// use std::sync::Arc;
///
/// let service = TypeDef::new("App", "Service")
///     .with_attribute(Concern::Logging.enable_attribute())
///     .with_method(MethodDef::new("Run", TypeRef::void()));
/// let module = Module::new("App").with_type(service.clone());
/// let resolver = SymbolResolver::new(&module, Arc::new(Domain::new()), &[])?;
///
/// let policy = PolicyResolver::new(&resolver);
/// assert!(policy.should_enable(&service.methods[0], &service, Concern::Logging));
/// assert!(!policy.should_enable(&service.methods[0], &service, Concern::Profiling));
/// # Ok::<(), cilweave::Error>(())
/// ```
pub struct PolicyResolver<'a> {
    resolver: &'a SymbolResolver,
}

impl<'a> PolicyResolver<'a> {
    /// Create a policy resolver on top of `resolver`.
    #[must_use]
    pub fn new(resolver: &'a SymbolResolver) -> Self {
        PolicyResolver { resolver }
    }

    /// Whether `concern` applies to `method` declared by `declaring`.
    #[must_use]
    pub fn should_enable(&self, method: &MethodDef, declaring: &TypeDef, concern: Concern) -> bool {
        match self.resolver.resolve_method(method, declaring) {
            Ok(Some(resolved)) => Self::live_decision(&resolved, concern),
            Ok(None) => {
                debug!(
                    "{}::{} has no live counterpart, using metadata attributes for {}",
                    declaring.full_name(),
                    method.name,
                    concern
                );
                Self::metadata_decision(method, declaring, concern)
            }
            Err(e) => {
                warn!(
                    "Could not resolve {}::{} ({}), using metadata attributes for {}",
                    declaring.full_name(),
                    method.name,
                    e,
                    concern
                );
                Self::metadata_decision(method, declaring, concern)
            }
        }
    }

    fn live_decision(resolved: &ResolvedMember, concern: Concern) -> bool {
        let live = &resolved.declaring_type;
        let member = &resolved.member;
        decide(
            live.member_has_attribute(member, concern.disable_attribute(), true),
            live.member_has_attribute(member, concern.enable_attribute(), true),
            live.has_attribute(concern.enable_attribute(), true),
        )
    }

    fn metadata_decision(method: &MethodDef, declaring: &TypeDef, concern: Concern) -> bool {
        decide(
            method.has_custom_attribute(concern.disable_attribute()),
            method.has_custom_attribute(concern.enable_attribute()),
            declaring.has_custom_attribute(concern.enable_attribute()),
        )
    }
}

fn decide(method_disable: bool, method_enable: bool, type_enable: bool) -> bool {
    if method_disable {
        return false;
    }
    method_enable || type_enable
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::metadata::{
        typesystem::{Domain, LiveAssembly, LiveMember, LiveTypeBuilder},
        Module, TypeRef,
    };

    fn run() -> MethodDef {
        MethodDef::new("Run", TypeRef::void())
    }

    fn decide_for(type_def: TypeDef, domain: Domain, concern: Concern) -> bool {
        let module = Module::new("App").with_reference("Lib").with_type(type_def.clone());
        let resolver = SymbolResolver::new(&module, Arc::new(domain), &[]).expect("resolver");
        PolicyResolver::new(&resolver).should_enable(&type_def.methods[0], &type_def, concern)
    }

    fn domain_with_lib() -> Domain {
        let domain = Domain::new();
        domain.add_loaded(Arc::new(LiveAssembly::new("Lib")));
        domain
    }

    #[test]
    fn test_disable_on_method_wins() {
        let type_def = TypeDef::new("App", "Service")
            .with_attribute(ENABLE_LOGGING_ATTRIBUTE)
            .with_method(run().with_attribute(DISABLE_LOGGING_ATTRIBUTE));
        assert!(!decide_for(type_def, domain_with_lib(), Concern::Logging));
    }

    #[test]
    fn test_type_enable_inherited_by_method() {
        let type_def = TypeDef::new("App", "Service")
            .with_attribute(ENABLE_PROFILING_ATTRIBUTE)
            .with_method(run());
        assert!(decide_for(type_def.clone(), domain_with_lib(), Concern::Profiling));
        assert!(!decide_for(type_def, domain_with_lib(), Concern::Logging));
    }

    #[test]
    fn test_method_enable_with_type_disable() {
        let type_def = TypeDef::new("App", "Service")
            .with_attribute(DISABLE_LOGGING_ATTRIBUTE)
            .with_method(run().with_attribute(ENABLE_LOGGING_ATTRIBUTE));
        assert!(decide_for(type_def, domain_with_lib(), Concern::Logging));
    }

    #[test]
    fn test_type_disable_does_not_cancel_type_enable() {
        let type_def = TypeDef::new("App", "Service")
            .with_attribute(ENABLE_LOGGING_ATTRIBUTE)
            .with_attribute(DISABLE_LOGGING_ATTRIBUTE)
            .with_method(run());
        assert!(decide_for(type_def.clone(), domain_with_lib(), Concern::Logging));

        // Same outcome through the metadata fallback.
        assert!(PolicyResolver::metadata_decision(
            &type_def.methods[0],
            &type_def,
            Concern::Logging
        ));
    }

    #[test]
    fn test_type_disable_without_enable() {
        let type_def = TypeDef::new("App", "Service")
            .with_attribute(DISABLE_LOGGING_ATTRIBUTE)
            .with_method(run());
        assert!(!decide_for(type_def, domain_with_lib(), Concern::Logging));
    }

    #[test]
    fn test_enable_inherited_from_base_type() {
        let domain = Domain::new();
        let lib = LiveAssembly::new("Lib");
        lib.add_type(
            LiveTypeBuilder::new("Lib", "LoggedBase")
                .attribute(ENABLE_LOGGING_ATTRIBUTE, true)
                .member(LiveMember::method("Run", &[], "System.Void").with_virtual())
                .build(),
        );
        domain.add_loaded(Arc::new(lib));

        let type_def = TypeDef::new("App", "Service")
            .with_base(TypeRef::new("Lib.LoggedBase"))
            .with_method(run().with_virtual());
        assert!(decide_for(type_def, domain, Concern::Logging));
    }

    #[test]
    fn test_array_parameter_keeps_inherited_markers() {
        let domain = Domain::new();
        let lib = LiveAssembly::new("Lib");
        lib.add_type(
            LiveTypeBuilder::new("Lib", "LoggedBase")
                .attribute(ENABLE_LOGGING_ATTRIBUTE, true)
                .build(),
        );
        domain.add_loaded(Arc::new(lib));

        let type_def = TypeDef::new("App", "Program")
            .with_base(TypeRef::new("Lib.LoggedBase"))
            .with_method(
                MethodDef::new("Main", TypeRef::void())
                    .with_static()
                    .with_parameter("args", TypeRef::new("System.String[]")),
            );
        assert!(decide_for(type_def, domain, Concern::Logging));
    }

    #[test]
    fn test_disable_inherited_from_overridden_member() {
        let domain = Domain::new();
        let lib = LiveAssembly::new("Lib");
        lib.add_type(
            LiveTypeBuilder::new("Lib", "QuietBase")
                .member(
                    LiveMember::method("Run", &[], "System.Void")
                        .with_virtual()
                        .with_attribute(DISABLE_LOGGING_ATTRIBUTE, true),
                )
                .build(),
        );
        domain.add_loaded(Arc::new(lib));

        let type_def = TypeDef::new("App", "Service")
            .with_base(TypeRef::new("Lib.QuietBase"))
            .with_attribute(ENABLE_LOGGING_ATTRIBUTE)
            .with_method(run().with_virtual());
        assert!(!decide_for(type_def, domain, Concern::Logging));
    }

    #[test]
    fn test_fallback_to_metadata_when_unresolvable() {
        // The parameter type is unknown, so the live member cannot be matched.
        let type_def = TypeDef::new("App", "Service").with_method(
            run()
                .with_parameter("value", TypeRef::new("Missing.Type"))
                .with_attribute(ENABLE_LOGGING_ATTRIBUTE),
        );
        assert!(decide_for(type_def.clone(), domain_with_lib(), Concern::Logging));
        assert!(!decide_for(type_def, domain_with_lib(), Concern::Profiling));
    }
}
