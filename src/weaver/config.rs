//! Weaving configuration
//!
//! This module provides the options of a weaving run: which concerns are applied, how exceptions
//! are intercepted, which handler and profiler types are called and where dependencies are looked
//! up.

use std::path::PathBuf;

use crate::metadata::TypeRef;

/// Full name of the MSTest test method marker.
pub const TEST_METHOD_ATTRIBUTE: &str =
    "Microsoft.VisualStudio.TestTools.UnitTesting.TestMethodAttribute";

/// Default exception kind intercepted by exception logging.
pub const DEFAULT_EXCEPTION_TYPE: &str = "System.Exception";

/// Default handler invoked for intercepted exceptions.
pub const DEFAULT_HANDLER_TYPE: &str = "CilWeave.Handlers.TestContextExceptionLogger";

/// Default profiler wrapped around measured methods.
pub const DEFAULT_PROFILER_TYPE: &str = "CilWeave.Handlers.PerformanceLogger";

/// How exception logging treats an intercepted exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// Call the handler, then return normally
    Catch,
    /// Call the handler, then re-raise the exception
    Rethrow,
}

/// Configuration of a weaving run
///
/// Logging is applied before profiling, so a method with both concerns measures the time spent
/// in its exception handler as well.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct WeaveConfig {
    /// Apply exception logging to eligible methods
    pub enable_logging: bool,

    /// Apply profiling to eligible methods
    pub enable_profiling: bool,

    /// Swallow or re-raise intercepted exceptions
    pub logging_mode: LoggingMode,

    /// Restrict profiling to methods whose attributes enable it.
    /// When false every method with a body is profiled.
    pub filter_profiling: bool,

    /// Log exceptions of methods carrying `test_method_attribute` even without enable markers
    pub include_test_methods: bool,

    /// Full name of the test method marker
    pub test_method_attribute: String,

    /// Exception kind caught by the logging handler region
    pub exception_type: TypeRef,

    /// Type providing `Handle(exception, instance, method)`
    pub handler_type: TypeRef,

    /// Type providing `Start()` and `Stop()`, constructed from the current method
    pub profiler_type: TypeRef,

    /// Extra directories probed for dependencies after the module's own directory
    pub dependency_directories: Vec<PathBuf>,
}

impl Default for WeaveConfig {
    fn default() -> Self {
        Self {
            enable_logging: true,
            enable_profiling: false,
            logging_mode: LoggingMode::Rethrow,
            filter_profiling: true,
            include_test_methods: true,
            test_method_attribute: TEST_METHOD_ATTRIBUTE.to_string(),
            exception_type: TypeRef::new(DEFAULT_EXCEPTION_TYPE),
            handler_type: TypeRef::new(DEFAULT_HANDLER_TYPE),
            profiler_type: TypeRef::new(DEFAULT_PROFILER_TYPE),
            dependency_directories: Vec::new(),
        }
    }
}

impl WeaveConfig {
    /// Creates a configuration applying exception logging only
    #[must_use]
    pub fn logging_only() -> Self {
        Self::default()
    }

    /// Creates a configuration applying profiling only
    #[must_use]
    pub fn profiling_only() -> Self {
        Self {
            enable_logging: false,
            enable_profiling: true,
            ..Self::default()
        }
    }

    /// Creates a configuration applying both concerns
    #[must_use]
    pub fn all() -> Self {
        Self {
            enable_logging: true,
            enable_profiling: true,
            ..Self::default()
        }
    }

    /// Set the logging mode
    #[must_use]
    pub fn with_logging_mode(mut self, mode: LoggingMode) -> Self {
        self.logging_mode = mode;
        self
    }

    /// Add a dependency search directory
    #[must_use]
    pub fn with_dependency_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dependency_directories.push(dir.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WeaveConfig::default();
        assert!(config.enable_logging);
        assert!(!config.enable_profiling);
        assert_eq!(config.logging_mode, LoggingMode::Rethrow);
        assert!(config.filter_profiling);
        assert_eq!(config.exception_type.full_name(), "System.Exception");
    }

    #[test]
    fn test_presets() {
        let profiling = WeaveConfig::profiling_only();
        assert!(!profiling.enable_logging);
        assert!(profiling.enable_profiling);

        let all = WeaveConfig::all()
            .with_logging_mode(LoggingMode::Catch)
            .with_dependency_directory("/opt/lib");
        assert!(all.enable_logging && all.enable_profiling);
        assert_eq!(all.logging_mode, LoggingMode::Catch);
        assert_eq!(all.dependency_directories, vec![PathBuf::from("/opt/lib")]);
    }
}
