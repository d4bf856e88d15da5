use std::sync::Arc;

use crate::{
    metadata::{
        method::{MethodBody, MethodBodyBuilder, OpCode},
        typesystem::{Domain, LiveAssembly, LiveMember, LiveTypeBuilder, SymbolResolver},
        MethodDef, Module, TypeDef, TypeRef,
    },
    weaver::{ENABLE_LOGGING_ATTRIBUTE, ENABLE_PROFILING_ATTRIBUTE},
    Result,
};

pub const HANDLERS_ASSEMBLY: &str = "CilWeave.Handlers";
pub const EXCEPTION: &str = "System.Exception";
pub const HANDLER: &str = "CilWeave.Handlers.TestContextExceptionLogger";
pub const PROFILER: &str = "CilWeave.Handlers.PerformanceLogger";

const INT32: &str = "System.Int32";

// Helper function to create the handler library woven code calls into
pub fn handlers_assembly() -> LiveAssembly {
    let assembly = LiveAssembly::new(HANDLERS_ASSEMBLY);
    assembly.add_type(
        LiveTypeBuilder::new(HANDLERS_ASSEMBLY, "TestContextExceptionLogger")
            .assembly(HANDLERS_ASSEMBLY)
            .member(LiveMember::constructor(&[]))
            .member(LiveMember::method(
                "Handle",
                &[EXCEPTION, "System.Object", "System.Reflection.MethodBase"],
                "System.Void",
            ))
            .build(),
    );
    assembly.add_type(
        LiveTypeBuilder::new(HANDLERS_ASSEMBLY, "PerformanceLogger")
            .assembly(HANDLERS_ASSEMBLY)
            .member(LiveMember::constructor(&["System.Reflection.MethodBase"]))
            .member(LiveMember::method("Start", &[], "System.Void"))
            .member(LiveMember::method("Stop", &[], "System.Void"))
            .build(),
    );
    assembly
}

// Helper function to create a domain with the handler library loaded
pub fn fixture_domain() -> Domain {
    let domain = Domain::new();
    domain.add_loaded(Arc::new(handlers_assembly()));
    domain
}

// Helper function to create `static int Add(int a, int b)` without locals
pub fn add_method() -> MethodDef {
    let body = MethodBodyBuilder::new()
        .ldarg(0)
        .ldarg(1)
        .op(OpCode::Add)
        .ret()
        .build()
        .expect("valid body");
    MethodDef::new("Add", TypeRef::new(INT32))
        .with_static()
        .with_parameter("a", TypeRef::new(INT32))
        .with_parameter("b", TypeRef::new(INT32))
        .with_attribute(ENABLE_LOGGING_ATTRIBUTE)
        .with_body(body)
}

// Helper function to create `static int Pick(int x)` with `returns` ret instructions.
// Every branch targets a ret directly and every path returns `x`.
pub fn multi_return_method(returns: usize) -> MethodDef {
    let mut builder = MethodBodyBuilder::new().ldarg(0);
    for k in 1..returns {
        let label = format!("r{k}");
        builder = builder
            .op(OpCode::Dup)
            .ldc_i4(k as i32)
            .op(OpCode::Ceq)
            .branch(OpCode::Brtrue, &label);
    }
    builder = builder.ret();
    for k in 1..returns {
        builder = builder.label(&format!("r{k}")).ret();
    }

    MethodDef::new("Pick", TypeRef::new(INT32))
        .with_static()
        .with_parameter("x", TypeRef::new(INT32))
        .with_body(builder.build().expect("valid body"))
}

// Helper function to create a body doing nothing
pub fn void_body() -> MethodBody {
    MethodBodyBuilder::new()
        .op(OpCode::Nop)
        .ret()
        .build()
        .expect("valid body")
}

// Helper function to create the module most weaver tests run against
pub fn fixture_module() -> Module {
    let calculator = TypeDef::new("App", "Calculator")
        .with_method(add_method())
        .with_method(
            MethodDef::new("Describe", TypeRef::void())
                .with_attribute(ENABLE_PROFILING_ATTRIBUTE)
                .with_body(void_body()),
        )
        .with_method(
            MethodDef::new("Compute", TypeRef::new(INT32))
                .with_virtual()
                .with_attribute(ENABLE_LOGGING_ATTRIBUTE),
        );
    let closure = TypeDef::nested("App.Calculator", "<>c").with_method(
        MethodDef::new("Lambda", TypeRef::void())
            .with_attribute(ENABLE_LOGGING_ATTRIBUTE)
            .with_body(void_body()),
    );

    Module::new("App")
        .with_reference("mscorlib")
        .with_reference(HANDLERS_ASSEMBLY)
        .with_type(calculator)
        .with_type(closure)
}

// Helper function to create a resolver over `module` using the fixture domain
pub fn fixture_resolver(module: &Module) -> Result<SymbolResolver> {
    SymbolResolver::new(module, Arc::new(fixture_domain()), &[])
}
