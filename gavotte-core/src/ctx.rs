use archery::RcK;
use rpds::{HashTrieMap, Vector};
use rustc_hash::{FxHashSetRand, FxRandomState};
use tracing::trace;
use ustr::Ustr;

use crate::types::{Poly, TypeVar};

pub type Map<K, V> = HashTrieMap<K, V, RcK, FxRandomState>;

/// Scoped mapping from identifiers to polytypes. Rules shadow a name on
/// entering a premise and remove it on discharge, so each name carries
/// its own LIFO shadow stack.
#[derive(Clone)]
pub struct Context {
    bindings: Map<Ustr, Vector<Poly>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("bindings", &self.bindings.iter().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            bindings: Map::new_with_hasher_and_ptr_kind(FxRandomState::new()),
        }
    }

    /// Push a binding for `name`, shadowing any current one.
    pub fn shadow(&mut self, name: Ustr, sigma: Poly) {
        trace!("shadowing {name} : {sigma}");
        let mut stack = self.bindings.get(&name).cloned().unwrap_or_default();
        stack.push_back_mut(sigma);
        self.bindings.insert_mut(name, stack);
    }

    /// Pop the most recent binding for `name`.
    pub fn remove(&mut self, name: Ustr) -> Option<Poly> {
        let mut stack = self.bindings.get(&name)?.clone();
        let top = stack.last().cloned();
        stack.drop_last_mut();
        if stack.is_empty() {
            self.bindings.remove_mut(&name);
        } else {
            self.bindings.insert_mut(name, stack);
        }
        trace!("removed {name}");
        top
    }

    /// Innermost binding for `name`.
    pub fn get(&self, name: Ustr) -> Option<&Poly> {
        self.bindings.get(&name).and_then(|stack| stack.last())
    }

    /// How many bindings currently stack on `name`.
    pub fn depth(&self, name: Ustr) -> usize {
        self.bindings.get(&name).map_or(0, |stack| stack.len())
    }

    pub fn names(&self) -> impl Iterator<Item = &Ustr> {
        self.bindings.keys()
    }

    /// Type variables free in some binding, shadowed entries included:
    /// an assumption pending restoration still pins its variables.
    pub fn free_type_vars(&self) -> FxHashSetRand<TypeVar> {
        let mut free = FxHashSetRand::default();
        for (_, stack) in self.bindings.iter() {
            for sigma in stack.iter() {
                let mut vars = sigma.body.free_vars();
                for (v, _) in &sigma.binders {
                    vars.remove(v);
                }
                free.extend(vars);
            }
        }
        free
    }
}
