//!
//! Unification over resolved monotypes.
//!
//! Failures bind nothing further but roll nothing back: partial
//! refinements stay in the store so later attempts surface consistent
//! follow-up diagnostics instead of cascading mismatches.

use tracing::trace;
use ustr::Ustr;

use crate::{
    fresh::FreshSupply,
    report::Status,
    subst::SubstStore,
    term::{Term, TermPtr, Ties},
    types::{Index, Mono, MonoPtr, TypeCon, TypeVar},
};

/// Unify `a` with `b`, refining `store` in place.
pub fn unify(a: &MonoPtr, b: &MonoPtr, store: &mut SubstStore, fresh: &FreshSupply) -> Status {
    Unifier {
        store,
        fresh,
        ties: Ties::default(),
    }
    .mono(a, b)
}

struct Unifier<'a> {
    store: &'a mut SubstStore,
    fresh: &'a FreshSupply,
    ties: Ties,
}

impl Unifier<'_> {
    fn mono(&mut self, a: &MonoPtr, b: &MonoPtr) -> Status {
        stacker::maybe_grow(32 * 1024, 1024 * 1024, || self.mono_impl(a, b))
    }

    fn mono_impl(&mut self, a: &MonoPtr, b: &MonoPtr) -> Status {
        let a = self.store.find(a);
        let b = self.store.find(b);
        trace!("unifying {a} with {b}");
        match (&*a, &*b) {
            (Mono::Var(x), Mono::Var(y)) if x == y => Status::Ok,
            (Mono::Var(v), _) => self.bind(*v, &b),
            (_, Mono::Var(v)) => self.bind(*v, &a),
            (Mono::Indexed(b0, i0), Mono::Indexed(b1, i1)) => self.indexed(b0, i0, b1, i1),
            (Mono::Indexed(b0, i0), _) => self.indexed(b0, i0, &b, &[]),
            (_, Mono::Indexed(b1, i1)) => self.indexed(&a, &[], b1, i1),
            (Mono::Con(x), Mono::Con(y)) => constants(x, y),
            (Mono::Sort(x), Mono::Sort(y)) => {
                if x == y {
                    Status::Ok
                } else {
                    Status::KindConstantMismatch
                }
            }
            (Mono::App(h0, args0), Mono::App(h1, args1)) => {
                let status = self.mono(h0, h1);
                if !status.is_ok() {
                    return status;
                }
                if args0.len() != args1.len() {
                    return Status::ParamLengthMismatch;
                }
                for (x, y) in args0.iter().zip(args1) {
                    let status = self.mono(x, y);
                    if !status.is_ok() {
                        return status;
                    }
                }
                Status::Ok
            }
            _ => Status::ConstantMismatch,
        }
    }

    fn bind(&mut self, v: TypeVar, t: &MonoPtr) -> Status {
        if self.store.occurs(v, t) {
            return Status::OccursCheckFailed;
        }
        self.store.add(v, t.clone());
        Status::Ok
    }

    fn indexed(
        &mut self,
        base0: &MonoPtr,
        indices0: &[Index],
        base1: &MonoPtr,
        indices1: &[Index],
    ) -> Status {
        let status = self.mono(base0, base1);
        if !status.is_ok() {
            return status;
        }
        if indices0.len() != indices1.len() {
            return Status::IndexLengthMismatch;
        }
        for (x, y) in indices0.iter().zip(indices1) {
            let status = self.mono(&x.ty, &y.ty);
            if !status.is_ok() {
                return status;
            }
            let status = self.reference(&x.reference, &y.reference);
            if !status.is_ok() {
                return status;
            }
        }
        Status::Ok
    }

    /// Beta-equivalence of index references. Constants match by name,
    /// bound variables through scoped ties, and flexible minted
    /// variables are solved through the store.
    fn reference(&mut self, a: &TermPtr, b: &TermPtr) -> Status {
        let a = Term::reduce(&self.store.resolve_ref(a));
        let b = Term::reduce(&self.store.resolve_ref(b));
        trace!("matching index reference {a} against {b}");
        match (&*a, &*b) {
            (Term::Var(x), Term::Var(y)) if x == y || self.ties.is_tied(*x, *y) => Status::Ok,
            (Term::Var(x), _) if self.fresh.is_minted(*x) => self.bind_ref(*x, &b),
            (_, Term::Var(y)) if self.fresh.is_minted(*y) => self.bind_ref(*y, &a),
            (Term::Con(x), Term::Con(y)) => {
                if x == y {
                    Status::Ok
                } else {
                    Status::ConstantMismatch
                }
            }
            (
                Term::Ctor {
                    name: n0,
                    args: args0,
                },
                Term::Ctor {
                    name: n1,
                    args: args1,
                },
            ) => {
                if n0 != n1 {
                    return Status::ConstantMismatch;
                }
                if args0.len() != args1.len() {
                    return Status::MemsLengthMismatch;
                }
                for (x, y) in args0.iter().zip(args1) {
                    let status = self.reference(x, y);
                    if !status.is_ok() {
                        return status;
                    }
                }
                Status::Ok
            }
            (Term::App(f0, a0), Term::App(f1, a1)) => {
                let status = self.reference(f0, f1);
                if !status.is_ok() {
                    return status;
                }
                self.reference(a0, a1)
            }
            (Term::Abs(x, b0), Term::Abs(y, b1)) => {
                let frame = self.ties.enter(*x, *y);
                let status = self.reference(b0, b1);
                self.ties.exit(*x, *y, frame);
                status
            }
            (
                Term::Prim { text: t0, ty: ty0 },
                Term::Prim { text: t1, ty: ty1 },
            ) => {
                if t0 != t1 {
                    return Status::ConstantMismatch;
                }
                self.mono(ty0, ty1)
            }
            _ => Status::ConstantMismatch,
        }
    }

    fn bind_ref(&mut self, x: Ustr, t: &TermPtr) -> Status {
        if t.free_vars().contains(&x) {
            return Status::OccursCheckFailed;
        }
        self.store.add_ref(x, t.clone());
        Status::Ok
    }
}

fn constants(x: &TypeCon, y: &TypeCon) -> Status {
    if x.name != y.name {
        Status::ConstantMismatch
    } else if x.sort != y.sort {
        Status::KindConstantMismatch
    } else if x.arity != y.arity {
        Status::ParamLengthMismatch
    } else {
        Status::Ok
    }
}
