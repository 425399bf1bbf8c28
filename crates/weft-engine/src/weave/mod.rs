//! Code transformer
//!
//! Weaving runs in two passes per method: [`ir`] lowers the matched advice
//! into a wrapper IR, then [`codegen`] turns that IR into a `Code` attribute
//! with full stack map frames. [`mixin`] attaches mixins, and [`class`]
//! drives both over a whole class file. [`simulate`] executes the IR
//! directly so the wrapper protocol can be checked without a JVM.

pub mod class;
pub mod codegen;
pub mod ir;
pub mod mixin;
pub mod simulate;

pub use class::{weave_class, WeaveContext, WeaveSummary};
pub use codegen::generate_wrapper;
pub use ir::{build_wrap_ir, delegate_name, WrapIr, DELEGATE_SUFFIX};
pub use mixin::{apply_mixins, MIXIN_FIELD_PREFIX};
pub use simulate::{AdviceRuntime, HeapObject, Invocation, Thrown, Value};
