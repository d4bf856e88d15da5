//! Runtime environments providing the live type universe.
//!
//! A [`RuntimeEnvironment`] answers three questions for the [`crate::SymbolResolver`]: which types
//! are built in, which assemblies are already loaded, and how to load an assembly from a file.
//! [`Domain`] is the in-memory implementation. It is seeded with the core library types the
//! weaver itself relies on, and hosts register the dependency images it may load by file name;
//! decoding real binaries is left to the module-loading collaborator.

use std::{io, path::Path, sync::Arc};

use dashmap::DashMap;
use log::debug;

use crate::{
    metadata::typesystem::{LiveAssembly, LiveMember, LiveTypeBuilder, LiveTypeRc},
    Error, Result,
};

/// Simple name of the core library.
pub const CORLIB_NAME: &str = "mscorlib";

/// Source of built-in types and loadable assemblies.
pub trait RuntimeEnvironment: Send + Sync {
    /// Simple name of this environment's core library.
    fn corlib_name(&self) -> &str {
        CORLIB_NAME
    }

    /// A built-in type by runtime-dialect full name.
    fn builtin_type(&self, full_name: &str) -> Option<LiveTypeRc>;

    /// An assembly that is already loaded, by simple name.
    fn loaded_assembly(&self, name: &str) -> Option<Arc<LiveAssembly>>;

    /// Load the assembly stored at `path`.
    ///
    /// # Errors
    /// Returns [`Error::FileError`] if the file cannot be accessed and [`Error::NotSupported`] if
    /// its content is not a loadable assembly.
    fn load_from(&self, path: &Path) -> Result<Arc<LiveAssembly>>;
}

/// In-memory runtime environment.
///
/// # Examples
///
/// ```rust
/// use cilweave::metadata::typesystem::{Domain, LiveAssembly, RuntimeEnvironment};
/// use std::sync::Arc;
///
/// let domain = Domain::new();
/// assert!(domain.builtin_type("System.Int32").is_some());
///
/// domain.register_image("Lib.dll", Arc::new(LiveAssembly::new("Lib")));
/// assert!(domain.loaded_assembly("Lib").is_none());
/// ```
pub struct Domain {
    corlib: Arc<LiveAssembly>,
    loaded: DashMap<String, Arc<LiveAssembly>>,
    images: DashMap<String, Arc<LiveAssembly>>,
}

impl Default for Domain {
    fn default() -> Self {
        Self::new()
    }
}

impl Domain {
    /// A domain with the seeded core library and nothing else loaded.
    #[must_use]
    pub fn new() -> Self {
        Domain {
            corlib: Arc::new(seed_corlib()),
            loaded: DashMap::new(),
            images: DashMap::new(),
        }
    }

    /// The core library.
    #[must_use]
    pub fn corlib(&self) -> &Arc<LiveAssembly> {
        &self.corlib
    }

    /// Add a type to the core library.
    pub fn add_builtin(&self, live_type: LiveTypeRc) {
        self.corlib.add_type(live_type);
    }

    /// Mark `assembly` as already loaded.
    pub fn add_loaded(&self, assembly: Arc<LiveAssembly>) {
        self.loaded.insert(assembly.name.clone(), assembly);
    }

    /// Make `assembly` loadable from any file named `file_name`.
    pub fn register_image(&self, file_name: &str, assembly: Arc<LiveAssembly>) {
        self.images.insert(file_name.to_string(), assembly);
    }
}

impl RuntimeEnvironment for Domain {
    fn builtin_type(&self, full_name: &str) -> Option<LiveTypeRc> {
        self.corlib.get(full_name)
    }

    fn loaded_assembly(&self, name: &str) -> Option<Arc<LiveAssembly>> {
        if name == self.corlib.name {
            return Some(self.corlib.clone());
        }
        self.loaded.get(name).map(|entry| entry.value().clone())
    }

    fn load_from(&self, path: &Path) -> Result<Arc<LiveAssembly>> {
        if !path.is_file() {
            return Err(Error::FileError(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            )));
        }

        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or(Error::NotSupported)?;
        let assembly = self
            .images
            .get(file_name)
            .map(|entry| entry.value().clone())
            .ok_or(Error::NotSupported)?;

        debug!("Loaded {} from {}", assembly.name, path.display());
        self.add_loaded(assembly.clone());
        Ok(assembly)
    }
}

fn seed_corlib() -> LiveAssembly {
    let corlib = LiveAssembly::new(CORLIB_NAME);
    let system = |name: &str| LiveTypeBuilder::new("System", name).assembly(CORLIB_NAME);

    let object = system("Object")
        .member(LiveMember::constructor(&[]))
        .member(LiveMember::method("ToString", &[], "System.String").with_virtual())
        .build();
    let value_type = system("ValueType").base(&object).build();
    corlib.add_type(object.clone());
    corlib.add_type(value_type.clone());

    for primitive in [
        "Void", "Boolean", "Char", "SByte", "Byte", "Int16", "UInt16", "Int32", "UInt32", "Int64",
        "UInt64", "Single", "Double", "IntPtr", "UIntPtr", "Decimal",
    ] {
        corlib.add_type(system(primitive).base(&value_type).build());
    }
    corlib.add_type(system("String").base(&object).build());
    corlib.add_type(system("Array").base(&object).build());
    corlib.add_type(
        system("Attribute")
            .base(&object)
            .member(LiveMember::constructor(&[]))
            .build(),
    );

    let exception = system("Exception")
        .base(&object)
        .member(LiveMember::constructor(&[]))
        .member(LiveMember::constructor(&["System.String"]))
        .build();
    let system_exception = system("SystemException")
        .base(&exception)
        .member(LiveMember::constructor(&[]))
        .build();
    corlib.add_type(exception);
    corlib.add_type(system_exception.clone());
    for derived in [
        "InvalidOperationException",
        "ArgumentException",
        "NullReferenceException",
        "NotSupportedException",
    ] {
        corlib.add_type(
            system(derived)
                .base(&system_exception)
                .member(LiveMember::constructor(&[]))
                .member(LiveMember::constructor(&["System.String"]))
                .build(),
        );
    }

    let reflection = |name: &str| LiveTypeBuilder::new("System.Reflection", name).assembly(CORLIB_NAME);
    let member_info = reflection("MemberInfo")
        .base(&object)
        .member(LiveMember::method("get_Name", &[], "System.String").with_virtual())
        .build();
    corlib.add_type(member_info.clone());
    corlib.add_type(
        reflection("MethodBase")
            .base(&member_info)
            .member(
                LiveMember::method("GetCurrentMethod", &[], "System.Reflection.MethodBase")
                    .with_static(),
            )
            .build(),
    );

    let generic = |ns: &str, name: &str, arity: usize| {
        LiveTypeBuilder::new(ns, name)
            .assembly(CORLIB_NAME)
            .generic_arity(arity)
    };
    corlib.add_type(
        generic("System.Collections.Generic", "List`1", 1)
            .base(&object)
            .member(LiveMember::constructor(&[]))
            .build(),
    );
    corlib.add_type(
        generic("System.Collections.Generic", "Dictionary`2", 2)
            .base(&object)
            .member(LiveMember::constructor(&[]))
            .build(),
    );
    corlib.add_type(generic("System", "Nullable`1", 1).base(&value_type).build());

    corlib
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_corlib() {
        let domain = Domain::new();
        let method_base = domain.builtin_type("System.Reflection.MethodBase");
        assert!(method_base
            .as_ref()
            .and_then(|t| t.find_member("GetCurrentMethod", true, &[]))
            .is_some());

        let invalid = domain.builtin_type("System.InvalidOperationException");
        assert!(invalid.is_some_and(|t| t.is_subclass_of("System.Exception")));
        assert_eq!(
            domain.builtin_type("System.Nullable`1").map(|t| t.generic_arity),
            Some(1)
        );
        assert!(domain.loaded_assembly(CORLIB_NAME).is_some());
    }

    #[test]
    fn test_load_from_registered_image() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("Lib.dll");
        std::fs::write(&path, b"MZ")?;

        let domain = Domain::new();
        domain.register_image("Lib.dll", Arc::new(LiveAssembly::new("Lib")));

        let loaded = domain.load_from(&path)?;
        assert_eq!(loaded.name, "Lib");
        assert!(domain.loaded_assembly("Lib").is_some());
        Ok(())
    }

    #[test]
    fn test_load_from_failures() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let domain = Domain::new();

        let missing = domain.load_from(&dir.path().join("Missing.dll"));
        assert!(matches!(missing, Err(Error::FileError(_))));

        let unknown = dir.path().join("Unknown.dll");
        std::fs::write(&unknown, b"MZ")?;
        assert!(matches!(domain.load_from(&unknown), Err(Error::NotSupported)));
        Ok(())
    }
}
