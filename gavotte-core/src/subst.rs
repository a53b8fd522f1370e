use rustc_hash::FxHashMapRand;
use tracing::trace;
use ustr::Ustr;

use crate::{
    term::{Term, TermPtr},
    types::{Index, Mono, MonoPtr, TypeVar},
};

/// Dense, path-compressing map from type variables to monotypes, plus
/// the solutions of flexible value-level index variables.
#[derive(Debug, Default)]
pub struct SubstStore {
    /// Slot `i` holds the binding of type variable `i`, if any.
    slots: Vec<Option<MonoPtr>>,
    /// Bindings of flexible index variables.
    refs: FxHashMapRand<Ustr, TermPtr>,
}

impl SubstStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `v ↦ t`. Double-binding a slot or binding a variable to
    /// itself breaks the acyclicity invariant, so both are asserted.
    pub fn add(&mut self, v: TypeVar, t: MonoPtr) {
        assert!(
            !matches!(&*t, Mono::Var(w) if *w == v),
            "binding {v} to itself"
        );
        if self.slots.len() <= v.index() {
            self.slots.resize(v.index() + 1, None);
        }
        let slot = &mut self.slots[v.index()];
        assert!(slot.is_none(), "slot {v} is already bound");
        trace!("binding {v} ↦ {t}");
        *slot = Some(t);
    }

    /// Raw lookup, no resolution.
    pub fn get(&self, v: TypeVar) -> Option<&MonoPtr> {
        self.slots.get(v.index()).and_then(Option::as_ref)
    }

    /// Representative monotype of `t`: every bound variable inside,
    /// including those in index types and index references, is replaced
    /// by its binding. Resolved slots are compressed in place.
    pub fn find(&mut self, t: &MonoPtr) -> MonoPtr {
        stacker::maybe_grow(32 * 1024, 1024 * 1024, || match &**t {
            Mono::Var(v) => match self.get(*v).cloned() {
                Some(binding) => {
                    let resolved = self.find(&binding);
                    self.slots[v.index()] = Some(resolved.clone());
                    resolved
                }
                None => t.clone(),
            },
            Mono::Con(_) | Mono::Sort(_) | Mono::Invalid => t.clone(),
            Mono::App(head, args) => {
                let head = self.find(head);
                let args: Vec<_> = args.iter().map(|arg| self.find(arg)).collect();
                Mono::app(head, args)
            }
            Mono::Indexed(base, indices) => {
                let base = self.find(base);
                let indices: Vec<_> = indices
                    .iter()
                    .map(|index| {
                        Index::new(self.resolve_ref(&index.reference), self.find(&index.ty))
                    })
                    .collect();
                Mono::indexed(base, indices)
            }
        })
    }

    /// Does `v` appear free in the representative of `t`?
    pub fn occurs(&mut self, v: TypeVar, t: &MonoPtr) -> bool {
        self.find(t).free_vars().contains(&v)
    }

    /// Record a solution for a flexible index variable.
    pub fn add_ref(&mut self, name: Ustr, t: TermPtr) {
        debug_assert!(
            !t.free_vars().contains(&name),
            "binding index variable {name} to a term containing it"
        );
        trace!("binding index variable {name} ↦ {t}");
        let previous = self.refs.insert(name, t);
        assert!(previous.is_none(), "index variable {name} is already bound");
    }

    pub fn ref_binding(&self, name: Ustr) -> Option<&TermPtr> {
        self.refs.get(&name)
    }

    /// Substitute solved index variables throughout a reference.
    pub fn resolve_ref(&self, t: &TermPtr) -> TermPtr {
        match &**t {
            Term::Var(x) => match self.refs.get(x) {
                Some(binding) => self.resolve_ref(binding),
                None => t.clone(),
            },
            Term::Con(_) | Term::Prim { .. } | Term::Invalid => t.clone(),
            Term::App(fun, arg) => Term::app(self.resolve_ref(fun), self.resolve_ref(arg)),
            Term::Abs(binder, body) => Term::abs(*binder, self.resolve_ref(body)),
            Term::Let { name, bound, body } => {
                Term::let_in(*name, self.resolve_ref(bound), self.resolve_ref(body))
            }
            Term::Rec { bindings, body } => Term::rec(
                bindings
                    .iter()
                    .map(|(name, expr)| (*name, self.resolve_ref(expr))),
                self.resolve_ref(body),
            ),
            Term::Ctor { name, args } => {
                Term::ctor(*name, args.iter().map(|arg| self.resolve_ref(arg)))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::test::*;
    use crate::types::arrow;

    #[test]
    fn it_resolves_chains() {
        let mut store = SubstStore::new();
        let (a, b) = (TypeVar(0), TypeVar(1));
        store.add(a, Mono::var(b));
        store.add(b, int());
        assert_eq!(store.find(&Mono::var(a)), int());
    }

    #[test]
    fn find_is_idempotent() {
        let mut store = SubstStore::new();
        let (a, b, c) = (TypeVar(0), TypeVar(1), TypeVar(2));
        store.add(a, arrow(Mono::var(b), int()));
        store.add(b, Mono::var(c));
        let once = store.find(&Mono::var(a));
        let twice = store.find(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn it_compresses_paths() {
        let mut store = SubstStore::new();
        let (a, b) = (TypeVar(0), TypeVar(1));
        store.add(a, Mono::var(b));
        store.add(b, int());
        let _ = store.find(&Mono::var(a));
        assert_eq!(store.get(a), Some(&int()));
    }

    #[test]
    fn it_resolves_inside_indices() {
        let mut store = SubstStore::new();
        let a = TypeVar(0);
        let n = ustr::ustr("$0");
        store.add(a, uint());
        store.add_ref(n, succ(zero()));
        let ty = sized_list(Mono::var(a), crate::term::Term::var(n));
        assert_eq!(store.find(&ty), sized_list(uint(), succ(zero())));
    }

    #[test]
    fn it_detects_occurrence() {
        let mut store = SubstStore::new();
        let (a, b) = (TypeVar(0), TypeVar(1));
        store.add(b, arrow(Mono::var(a), int()));
        assert!(store.occurs(a, &Mono::var(b)));
        assert!(!store.occurs(TypeVar(2), &Mono::var(b)));
    }

    #[test]
    #[should_panic(expected = "already bound")]
    fn it_rejects_double_binding() {
        let mut store = SubstStore::new();
        store.add(TypeVar(0), int());
        store.add(TypeVar(0), uint());
    }
}
