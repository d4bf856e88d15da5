use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// # Error Categories
///
/// ## Resolution Errors
/// - [`Error::DependencyNotFound`] - A referenced assembly could not be located; fatal for a run
/// - [`Error::TypeResolution`] - A type reference could not be resolved in strict mode
/// - [`Error::MemberResolution`] - A handler or profiler type lacks the expected members
/// - [`Error::RecursionLimit`] - Generic instantiations nested deeper than supported
///
/// ## Structural Errors
/// - [`Error::Malformed`] - A method body or builder input violates the body invariants
/// - [`Error::NotSupported`] - The runtime environment cannot provide an image for a file
/// - [`Error::FileError`] - Filesystem I/O errors while probing dependencies
///
/// ## Emulation Errors
/// - [`Error::Emulation`] - The verification interpreter hit invalid code
/// - [`Error::StepLimit`] - The verification interpreter exceeded its step budget
///
/// # Examples
///
/// ```rust,no_run
/// use cilweave::{metadata::Module, Domain, Error, SymbolResolver};
/// use std::sync::Arc;
///
/// let module = Module::new("App").with_path("bin/App.dll").with_reference("App.Core");
/// match SymbolResolver::new(&module, Arc::new(Domain::new()), &[]) {
///     Ok(_) => println!("all dependencies located"),
///     Err(Error::DependencyNotFound { name }) => eprintln!("missing assembly {name}"),
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A dependency of the target assembly could not be located.
    ///
    /// Raised while constructing a [`crate::SymbolResolver`]: the dependency was neither
    /// already loaded in the runtime environment nor present as `<name>.dll` / `<name>.exe`
    /// in any search directory. No weaving is meaningful without a consistent type universe,
    /// so the whole run is aborted.
    #[error("Assembly {name} not found")]
    DependencyNotFound {
        /// Simple name of the missing assembly
        name: String,
    },

    /// A type reference could not be resolved and the caller demanded strictness.
    ///
    /// The associated value is the normalized (runtime dialect) name that was looked up.
    #[error("Type [{0}] could not be loaded")]
    TypeResolution(String),

    /// A handler or profiler type does not expose the member shape the weaver emits calls to.
    ///
    /// Fails the weave of the current method only; the method body is left untouched.
    #[error("Type [{type_name}] has no usable member {member}")]
    MemberResolution {
        /// Runtime name of the type that was inspected
        type_name: String,
        /// Description of the member that was expected
        member: String,
    },

    /// A method body or builder input is structurally invalid.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The runtime environment has no loadable image for the requested file.
    #[error("This file type is not supported")]
    NotSupported,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Recursion limit reached while resolving nested generic instantiations.
    #[error("Reach the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    /// The verification interpreter encountered code it cannot execute.
    #[error("Emulation failed: {0}")]
    Emulation(String),

    /// The verification interpreter exceeded its configured step budget.
    #[error("Emulation exceeded {0} steps")]
    StepLimit(u64),
}
