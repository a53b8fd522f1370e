//!
//! Type inference for the Gavotte front-end: Hindley–Milner with
//! dependent indexed types, implicit generalisation and mutually
//! recursive bindings.
//!
//! The engine consumes already-parsed judgments (`term : type`), one
//! rule call at a time, and accumulates structured diagnostics instead
//! of aborting. Scope-introducing rules hand back premise tokens whose
//! concluding functions discharge the assumptions again; see
//! [`infer::Engine`].

pub mod ctx;
pub mod fresh;
pub mod infer;
pub mod module;
pub mod report;
pub mod subst;
pub mod term;
pub mod types;
pub mod unify;

pub use infer::{Conclusion, CtorDecl, Engine, Judgment};
pub use module::{ModuleSignature, Qualification};
pub use report::{Report, Reporter, Rule, Status};
pub use term::{Term, TermPtr};
pub use types::{Fixity, Index, Mono, MonoPtr, Poly, Sort, TypeCon, TypeVar, arrow, arrow_con};
