use rustc_hash::FxHashMapRand;
use tracing::trace;
use ustr::Ustr;

use crate::types::TypeVar;

/// Monotonic allocators for type variables and value-level index
/// variables. Each engine owns its own supply; names encode the
/// counter, so two variables from one supply never collide.
#[derive(Debug, Default)]
pub struct FreshSupply {
    next_type: usize,
    next_ref: usize,
    ranks: FxHashMapRand<Ustr, usize>,
}

impl FreshSupply {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_var(&mut self) -> TypeVar {
        let var = TypeVar(self.next_type);
        self.next_type += 1;
        trace!("minted type variable {var}");
        var
    }

    pub fn num_new_vars(&mut self, n: usize) -> Vec<TypeVar> {
        (0..n).map(|_| self.new_var()).collect()
    }

    /// Mint a value-level index variable.
    pub fn new_ref(&mut self) -> Ustr {
        let rank = self.next_ref;
        self.next_ref += 1;
        let name = ustr::ustr(&format!("${rank}"));
        self.ranks.insert(name, rank);
        trace!("minted index variable {name}");
        name
    }

    /// Mint rank of an engine-minted name, if it is one.
    pub fn rank(&self, name: Ustr) -> Option<usize> {
        self.ranks.get(&name).copied()
    }

    pub fn is_minted(&self, name: Ustr) -> bool {
        self.ranks.contains_key(&name)
    }

    /// Slot count the substitution store must be able to address.
    pub fn type_vars_minted(&self) -> usize {
        self.next_type
    }
}
