use std::rc::Rc;

use rustc_hash::{FxHashMapRand, FxHashSetRand};
use smallvec::SmallVec;
use ustr::Ustr;

use crate::term::{Term, TermPtr};

pub type MonoPtr = Rc<Mono>;

/// Sorts classify types: `*` holds types of values, `*1` holds types of
/// types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sort {
    Star,
    Star1,
}

impl Sort {
    /// Universes above `*1` collapse until the surface language needs them.
    pub fn succ(self) -> Sort {
        match self {
            Sort::Star => Sort::Star1,
            Sort::Star1 => Sort::Star1,
        }
    }
}

impl std::fmt::Display for Sort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sort::Star => write!(f, "*"),
            Sort::Star1 => write!(f, "*1"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fixity {
    Prefix,
    Infix,
    Enclosing,
}

/// A named type constant with a fixed arity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeCon {
    pub name: Ustr,
    pub fixity: Fixity,
    pub arity: usize,
    pub sort: Sort,
}

impl TypeCon {
    pub fn new(name: impl Into<Ustr>, fixity: Fixity, arity: usize, sort: Sort) -> Self {
        Self {
            name: name.into(),
            fixity,
            arity,
            sort,
        }
    }

    /// Arity-0 value-type constant.
    pub fn atom(name: impl Into<Ustr>) -> Self {
        Self::new(name, Fixity::Prefix, 0, Sort::Star)
    }
}

/// A uniquely numbered type variable.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeVar(pub(crate) usize);

impl TypeVar {
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for TypeVar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "?{}", self.0)
    }
}

/// An index judgment `reference : ty` attached to a dependent type.
///
/// The reference is a value-level expression; the order of indices on a
/// type is observable and drives positional matching in unification.
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    pub reference: TermPtr,
    pub ty: MonoPtr,
}

impl Index {
    pub fn new(reference: TermPtr, ty: MonoPtr) -> Self {
        Self { reference, ty }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mono {
    /// Named type constant.
    Con(TypeCon),
    /// Unification variable.
    Var(TypeVar),
    /// Head applied to arguments.
    App(MonoPtr, SmallVec<MonoPtr, 4>),
    /// Dependent type: a base monotype refined by ordered value-level
    /// indices.
    Indexed(MonoPtr, SmallVec<Index, 2>),
    /// Sorts can themselves stand in type position.
    Sort(Sort),
    /// Garbage payload of a failed conclusion.
    Invalid,
}

impl Mono {
    pub fn con(con: TypeCon) -> MonoPtr {
        Rc::new(Mono::Con(con))
    }

    /// Arity-0 value-type constant.
    pub fn con0(name: impl Into<Ustr>) -> MonoPtr {
        Rc::new(Mono::Con(TypeCon::atom(name)))
    }

    pub fn var(v: TypeVar) -> MonoPtr {
        Rc::new(Mono::Var(v))
    }

    pub fn app<I: IntoIterator<Item = MonoPtr>>(head: MonoPtr, args: I) -> MonoPtr {
        Rc::new(Mono::App(head, args.into_iter().collect()))
    }

    pub fn indexed<I: IntoIterator<Item = Index>>(base: MonoPtr, indices: I) -> MonoPtr {
        Rc::new(Mono::Indexed(base, indices.into_iter().collect()))
    }

    pub fn sort(sort: Sort) -> MonoPtr {
        Rc::new(Mono::Sort(sort))
    }

    pub fn invalid() -> MonoPtr {
        Rc::new(Mono::Invalid)
    }

    /// Type variables occurring free in this monotype.
    pub fn free_vars_into(&self, acc: &mut FxHashSetRand<TypeVar>) {
        match self {
            Mono::Con(_) | Mono::Sort(_) | Mono::Invalid => {}
            Mono::Var(v) => {
                acc.insert(*v);
            }
            Mono::App(head, args) => {
                head.free_vars_into(acc);
                for arg in args {
                    arg.free_vars_into(acc);
                }
            }
            Mono::Indexed(base, indices) => {
                base.free_vars_into(acc);
                for index in indices {
                    index.ty.free_vars_into(acc);
                }
            }
        }
    }

    pub fn free_vars(&self) -> FxHashSetRand<TypeVar> {
        let mut acc = FxHashSetRand::default();
        self.free_vars_into(&mut acc);
        acc
    }

    /// Value-level variables occurring free in index positions, each
    /// paired with the type of the first index judgment it occurs in.
    /// First-occurrence order over a left-to-right walk.
    pub fn index_vars_into(&self, seen: &mut FxHashSetRand<Ustr>, acc: &mut Vec<(Ustr, MonoPtr)>) {
        match self {
            Mono::Con(_) | Mono::Var(_) | Mono::Sort(_) | Mono::Invalid => {}
            Mono::App(head, args) => {
                head.index_vars_into(seen, acc);
                for arg in args {
                    arg.index_vars_into(seen, acc);
                }
            }
            Mono::Indexed(base, indices) => {
                base.index_vars_into(seen, acc);
                for index in indices {
                    for name in index.reference.free_vars() {
                        if seen.insert(name) {
                            acc.push((name, index.ty.clone()));
                        }
                    }
                    index.ty.index_vars_into(seen, acc);
                }
            }
        }
    }

    pub fn index_vars(&self) -> Vec<(Ustr, MonoPtr)> {
        let mut seen = FxHashSetRand::default();
        let mut acc = Vec::new();
        self.index_vars_into(&mut seen, &mut acc);
        acc
    }

    /// Replace type variables according to `map`.
    pub fn subst_vars(this: &MonoPtr, map: &FxHashMapRand<TypeVar, MonoPtr>) -> MonoPtr {
        match &**this {
            Mono::Var(v) => map.get(v).cloned().unwrap_or_else(|| this.clone()),
            Mono::Con(_) | Mono::Sort(_) | Mono::Invalid => this.clone(),
            Mono::App(head, args) => Mono::app(
                Mono::subst_vars(head, map),
                args.iter().map(|arg| Mono::subst_vars(arg, map)),
            ),
            Mono::Indexed(base, indices) => Mono::indexed(
                Mono::subst_vars(base, map),
                indices.iter().map(|index| {
                    Index::new(index.reference.clone(), Mono::subst_vars(&index.ty, map))
                }),
            ),
        }
    }

    /// Replace free occurrences of the value-level variable `from` inside
    /// index references with `to`.
    pub fn rename_ref(this: &MonoPtr, from: Ustr, to: &TermPtr) -> MonoPtr {
        match &**this {
            Mono::Con(_) | Mono::Var(_) | Mono::Sort(_) | Mono::Invalid => this.clone(),
            Mono::App(head, args) => Mono::app(
                Mono::rename_ref(head, from, to),
                args.iter().map(|arg| Mono::rename_ref(arg, from, to)),
            ),
            Mono::Indexed(base, indices) => Mono::indexed(
                Mono::rename_ref(base, from, to),
                indices.iter().map(|index| {
                    Index::new(
                        Term::subst(&index.reference, from, to),
                        Mono::rename_ref(&index.ty, from, to),
                    )
                }),
            ),
        }
    }

    /// Equality up to a bijective renaming of type variables and of free
    /// value-level variables in index references.
    pub fn alpha_eq(a: &MonoPtr, b: &MonoPtr) -> bool {
        let mut tymap = Bijection::default();
        let mut refmap = Bijection::default();
        alpha_eq_impl(a, b, &mut tymap, &mut refmap)
    }
}

pub(crate) struct Bijection<T: Copy + Eq + std::hash::Hash> {
    fwd: FxHashMapRand<T, T>,
    bwd: FxHashMapRand<T, T>,
}

impl<T: Copy + Eq + std::hash::Hash> Default for Bijection<T> {
    fn default() -> Self {
        Self {
            fwd: FxHashMapRand::default(),
            bwd: FxHashMapRand::default(),
        }
    }
}

impl<T: Copy + Eq + std::hash::Hash> Bijection<T> {
    /// Tie `a` to `b`, failing if either side is already tied elsewhere.
    pub(crate) fn tie(&mut self, a: T, b: T) -> bool {
        match (self.fwd.get(&a), self.bwd.get(&b)) {
            (None, None) => {
                self.fwd.insert(a, b);
                self.bwd.insert(b, a);
                true
            }
            (Some(x), Some(y)) => *x == b && *y == a,
            _ => false,
        }
    }
}

fn alpha_eq_impl(
    a: &MonoPtr,
    b: &MonoPtr,
    tymap: &mut Bijection<TypeVar>,
    refmap: &mut Bijection<Ustr>,
) -> bool {
    match (&**a, &**b) {
        (Mono::Con(x), Mono::Con(y)) => x == y,
        (Mono::Sort(x), Mono::Sort(y)) => x == y,
        (Mono::Var(x), Mono::Var(y)) => tymap.tie(*x, *y),
        (Mono::App(h0, args0), Mono::App(h1, args1)) => {
            args0.len() == args1.len()
                && alpha_eq_impl(h0, h1, tymap, refmap)
                && args0
                    .iter()
                    .zip(args1)
                    .all(|(x, y)| alpha_eq_impl(x, y, tymap, refmap))
        }
        (Mono::Indexed(b0, i0), Mono::Indexed(b1, i1)) => {
            i0.len() == i1.len()
                && alpha_eq_impl(b0, b1, tymap, refmap)
                && i0.iter().zip(i1).all(|(x, y)| {
                    alpha_eq_impl(&x.ty, &y.ty, tymap, refmap)
                        && Term::bijective_eq(&x.reference, &y.reference, refmap)
                })
        }
        _ => false,
    }
}

/// `∀ binders. Π indices. body`. A polytype with no binders of either
/// kind is a plain monotype wrapper.
#[derive(Debug, Clone, PartialEq)]
pub struct Poly {
    pub binders: SmallVec<(TypeVar, Sort), 4>,
    pub indices: SmallVec<(Ustr, MonoPtr), 2>,
    pub body: MonoPtr,
}

impl Poly {
    pub fn mono(body: MonoPtr) -> Self {
        Self {
            binders: SmallVec::new(),
            indices: SmallVec::new(),
            body,
        }
    }

    pub fn new<B, I>(binders: B, indices: I, body: MonoPtr) -> Self
    where
        B: IntoIterator<Item = (TypeVar, Sort)>,
        I: IntoIterator<Item = (Ustr, MonoPtr)>,
    {
        Self {
            binders: binders.into_iter().collect(),
            indices: indices.into_iter().collect(),
            body,
        }
    }

    pub fn is_mono(&self) -> bool {
        self.binders.is_empty() && self.indices.is_empty()
    }
}

impl std::fmt::Display for Poly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.binders.is_empty() {
            write!(f, "∀")?;
            for (v, _) in &self.binders {
                write!(f, " {v}")?;
            }
            write!(f, ". ")?;
        }
        for (name, ty) in &self.indices {
            write!(f, "Π({name} : {ty}). ")?;
        }
        write!(f, "{}", self.body)
    }
}

/// The function arrow, modelled as an infix constant of arity 2.
pub fn arrow_con() -> TypeCon {
    TypeCon::new("→", Fixity::Infix, 2, Sort::Star)
}

pub fn arrow(lhs: MonoPtr, rhs: MonoPtr) -> MonoPtr {
    Mono::app(Mono::con(arrow_con()), [lhs, rhs])
}

impl std::fmt::Display for Mono {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mono::Con(c) => write!(f, "{}", c.name),
            Mono::Var(v) => write!(f, "{v}"),
            Mono::Sort(s) => write!(f, "{s}"),
            Mono::Invalid => write!(f, "<invalid>"),
            Mono::App(head, args) => match &**head {
                Mono::Con(c) if c.fixity == Fixity::Infix && args.len() == 2 => {
                    write!(f, "({} {} {})", args[0], c.name, args[1])
                }
                Mono::Con(c) if c.fixity == Fixity::Enclosing => {
                    let (open, close) = enclosing_pair(c.name);
                    write!(f, "{open}")?;
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{arg}")?;
                    }
                    write!(f, "{close}")
                }
                _ => {
                    write!(f, "{head}(")?;
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{arg}")?;
                    }
                    write!(f, ")")
                }
            },
            Mono::Indexed(base, indices) => {
                let enclosed = match &**base {
                    Mono::App(head, args) => match &**head {
                        Mono::Con(c) if c.fixity == Fixity::Enclosing => Some((c.name, args)),
                        _ => None,
                    },
                    _ => None,
                };
                let write_refs = |f: &mut std::fmt::Formatter<'_>| -> std::fmt::Result {
                    for (i, index) in indices.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", index.reference)?;
                    }
                    Ok(())
                };
                match enclosed {
                    Some((name, args)) => {
                        let (open, close) = enclosing_pair(name);
                        write!(f, "{open}")?;
                        for (i, arg) in args.iter().enumerate() {
                            if i > 0 {
                                write!(f, ", ")?;
                            }
                            write!(f, "{arg}")?;
                        }
                        write!(f, "; ")?;
                        write_refs(f)?;
                        write!(f, "{close}")
                    }
                    None => {
                        write!(f, "({base}; ")?;
                        write_refs(f)?;
                        write!(f, ")")
                    }
                }
            }
        }
    }
}

/// Split an enclosing constant's name into its bracket halves.
fn enclosing_pair(name: Ustr) -> (String, String) {
    let chars: Vec<char> = name.chars().collect();
    let mid = chars.len() / 2;
    (
        chars[..mid].iter().collect(),
        chars[mid..].iter().collect(),
    )
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::term::Term;

    pub(crate) fn int() -> MonoPtr {
        Mono::con0("Int")
    }

    pub(crate) fn uint() -> MonoPtr {
        Mono::con0("Uint")
    }

    pub(crate) fn list_con() -> TypeCon {
        TypeCon::new("[]", Fixity::Enclosing, 1, Sort::Star)
    }

    pub(crate) fn list(elem: MonoPtr) -> MonoPtr {
        Mono::app(Mono::con(list_con()), [elem])
    }

    pub(crate) fn sized_list(elem: MonoPtr, len: TermPtr) -> MonoPtr {
        Mono::indexed(list(elem), [Index::new(len, uint())])
    }

    pub(crate) fn zero() -> TermPtr {
        Term::con("0")
    }

    pub(crate) fn succ(n: TermPtr) -> TermPtr {
        Term::ctor("Succ", [n])
    }

    #[test]
    fn it_displays_arrows_infix() {
        let ty = arrow(int(), arrow(int(), int()));
        assert_eq!(ty.to_string(), "(Int → (Int → Int))");
    }

    #[test]
    fn it_displays_indexed_lists() {
        let ty = sized_list(uint(), succ(zero()));
        assert_eq!(ty.to_string(), "[Uint; Succ(0)]");
    }

    #[test]
    fn it_collects_free_vars() {
        let a = TypeVar(0);
        let b = TypeVar(1);
        let ty = arrow(Mono::var(a), sized_list(Mono::var(b), zero()));
        let free = ty.free_vars();
        assert!(free.contains(&a));
        assert!(free.contains(&b));
        assert_eq!(free.len(), 2);
    }

    #[test]
    fn it_collects_index_vars_in_order() {
        let n = ustr::ustr("n");
        let m = ustr::ustr("m");
        let ty = arrow(
            sized_list(int(), succ(Term::var(n))),
            sized_list(int(), Term::var(m)),
        );
        let vars: Vec<_> = ty.index_vars().into_iter().map(|(v, _)| v).collect();
        assert_eq!(vars, vec![n, m]);
    }

    #[test]
    fn it_substitutes_type_vars() {
        let a = TypeVar(0);
        let mut map = FxHashMapRand::default();
        map.insert(a, int());
        let ty = arrow(Mono::var(a), Mono::var(TypeVar(1)));
        let out = Mono::subst_vars(&ty, &map);
        assert_eq!(out, arrow(int(), Mono::var(TypeVar(1))));
    }

    #[test]
    fn it_compares_up_to_renaming() {
        let a = arrow(Mono::var(TypeVar(0)), Mono::var(TypeVar(1)));
        let b = arrow(Mono::var(TypeVar(7)), Mono::var(TypeVar(3)));
        let c = arrow(Mono::var(TypeVar(7)), Mono::var(TypeVar(7)));
        assert!(Mono::alpha_eq(&a, &b));
        assert!(!Mono::alpha_eq(&a, &c));
    }
}
