//! An HLSL compiler driver.
//!
//! A [`Compiler`] runs source text and dxc-style arguments through a [`Pipeline`] and hands
//! back a [`CompileResult`] holding the diagnostics and, on success, the compiled [`Object`].
//! `#include` directives are resolved through an [`IncludeHandler`] supplied by the caller.
//!
//! ```no_run
//! use mach_dxc::{Compiler, MemoryIncludeHandler};
//!
//! let mut compiler = Compiler::new()?;
//! let mut includes = MemoryIncludeHandler::new().with_file("tint.hlsli", "#define TINT 0.5");
//! let result = compiler.compile(
//!     "#include \"tint.hlsli\"\nfloat4 main() : SV_Target { return TINT; }",
//!     &["-E", "main", "-T", "ps_6_0"],
//!     Some(&mut includes),
//! );
//! if let Some(diagnostics) = result.error() {
//!     eprint!("{diagnostics}");
//! }
//! let object = result.into_result()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod compiler;
mod config;
mod diagnostic;
mod enums;
mod error;
mod include;
mod logger;
mod object;
mod pipeline;
mod registry;
mod result;
mod source;

pub mod backend;
pub mod frontend;
pub mod intrinsics;
pub mod ir;
pub mod types;

pub use compiler::*;
pub use config::*;
pub use diagnostic::*;
pub use enums::*;
pub use error::*;
pub use include::*;
pub use logger::*;
pub use object::*;
pub use pipeline::*;
pub use registry::Registry;
pub use result::*;
pub use source::{Encoding, SourceBuffer, TranslationUnit};
