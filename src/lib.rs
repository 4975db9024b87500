//! sysyc-mid: the SSA-form mid-end for a SysY-extended C-subset compiler.
//!
//! This crate owns the IR data model (the Value/User/Use graph and the
//! nominal type system), the construction API, the five-stage pass
//! manager, and the analysis/optimization passes that run over it. It
//! consumes whatever an external IR builder feeds into [`Module`]'s
//! `create_*` API and hands the optimized graph to a back-end visitor;
//! lexing, parsing, semantic analysis, and code generation all live
//! outside this crate.

pub mod analysis;
pub mod builder;
pub mod diagnostics;
pub mod error;
pub mod module;
pub mod pass_dce;
pub mod pass_global;
pub mod pass_inline;
pub mod pass_instcombine;
pub mod pass_loop;
pub mod pass_misc;
pub mod pass_sccp;
pub mod pass_ssa;
pub mod passes;
pub mod printer;
pub mod registry;
pub mod types;
pub mod value;
pub mod verification;

pub use builder::InsertGuard;
pub use error::{MidError, MidResult};
pub use module::Module;
pub use passes::{AnyPass, BlockPass, FunctionPass, ModulePass, PassManager, PassManagerConfig, Stage};
pub use printer::print_module;
pub use registry::register_all_passes;
pub use types::{TypeCtx, TypeId};
pub use value::{BinOp, Linkage, Loc, UnOp, ValueId, ValueKind};
pub use verification::{verify_module, VerificationError};
