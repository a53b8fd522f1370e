use std::rc::Rc;

use dynforest::{Connection, Handle as ConnHandle};
use rustc_hash::{FxHashMapRand, FxHashSetRand};
use smallvec::SmallVec;
use ustr::Ustr;

use crate::types::{Bijection, MonoPtr};

pub type TermPtr = Rc<Term>;

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// Named constant.
    Con(Ustr),
    /// Named variable.
    Var(Ustr),
    /// Application.
    App(TermPtr, TermPtr),
    /// Abstraction over a binder.
    Abs(Ustr, TermPtr),
    /// Let binding.
    Let {
        name: Ustr,
        bound: TermPtr,
        body: TermPtr,
    },
    /// Mutually recursive block.
    Rec {
        bindings: Vec<(Ustr, TermPtr)>,
        body: TermPtr,
    },
    /// Data-constructor application.
    Ctor {
        name: Ustr,
        args: SmallVec<TermPtr, 4>,
    },
    /// Literal carrying its own type.
    Prim { text: Ustr, ty: MonoPtr },
    /// Garbage payload of a failed conclusion.
    Invalid,
}

impl Term {
    pub fn con(name: impl Into<Ustr>) -> TermPtr {
        Rc::new(Term::Con(name.into()))
    }

    pub fn var(name: impl Into<Ustr>) -> TermPtr {
        Rc::new(Term::Var(name.into()))
    }

    pub fn app(fun: TermPtr, arg: TermPtr) -> TermPtr {
        Rc::new(Term::App(fun, arg))
    }

    pub fn abs(binder: impl Into<Ustr>, body: TermPtr) -> TermPtr {
        Rc::new(Term::Abs(binder.into(), body))
    }

    pub fn let_in(name: impl Into<Ustr>, bound: TermPtr, body: TermPtr) -> TermPtr {
        Rc::new(Term::Let {
            name: name.into(),
            bound,
            body,
        })
    }

    pub fn rec<I>(bindings: I, body: TermPtr) -> TermPtr
    where
        I: IntoIterator<Item = (Ustr, TermPtr)>,
    {
        Rc::new(Term::Rec {
            bindings: bindings.into_iter().collect(),
            body,
        })
    }

    pub fn ctor<I>(name: impl Into<Ustr>, args: I) -> TermPtr
    where
        I: IntoIterator<Item = TermPtr>,
    {
        Rc::new(Term::Ctor {
            name: name.into(),
            args: args.into_iter().collect(),
        })
    }

    pub fn prim(text: impl Into<Ustr>, ty: MonoPtr) -> TermPtr {
        Rc::new(Term::Prim {
            text: text.into(),
            ty,
        })
    }

    pub fn invalid() -> TermPtr {
        Rc::new(Term::Invalid)
    }

    /// Free variables in first-occurrence order over a left-to-right walk.
    pub fn free_vars(&self) -> Vec<Ustr> {
        let mut bound = Vec::new();
        let mut seen = FxHashSetRand::default();
        let mut acc = Vec::new();
        self.free_vars_impl(&mut bound, &mut seen, &mut acc);
        acc
    }

    fn free_vars_impl(
        &self,
        bound: &mut Vec<Ustr>,
        seen: &mut FxHashSetRand<Ustr>,
        acc: &mut Vec<Ustr>,
    ) {
        match self {
            Term::Con(_) | Term::Prim { .. } | Term::Invalid => {}
            Term::Var(x) => {
                if !bound.contains(x) && seen.insert(*x) {
                    acc.push(*x);
                }
            }
            Term::App(fun, arg) => {
                fun.free_vars_impl(bound, seen, acc);
                arg.free_vars_impl(bound, seen, acc);
            }
            Term::Abs(binder, body) => {
                bound.push(*binder);
                body.free_vars_impl(bound, seen, acc);
                bound.pop();
            }
            Term::Let {
                name,
                bound: expr,
                body,
            } => {
                expr.free_vars_impl(bound, seen, acc);
                bound.push(*name);
                body.free_vars_impl(bound, seen, acc);
                bound.pop();
            }
            Term::Rec { bindings, body } => {
                for (name, _) in bindings {
                    bound.push(*name);
                }
                for (_, expr) in bindings {
                    expr.free_vars_impl(bound, seen, acc);
                }
                body.free_vars_impl(bound, seen, acc);
                for _ in bindings {
                    bound.pop();
                }
            }
            Term::Ctor { args, .. } => {
                for arg in args {
                    arg.free_vars_impl(bound, seen, acc);
                }
            }
        }
    }

    /// Replace free occurrences of `from` with `to`. Minted binders are
    /// globally unique, so no capture renaming is needed.
    pub fn subst(this: &TermPtr, from: Ustr, to: &TermPtr) -> TermPtr {
        match &**this {
            Term::Var(x) if *x == from => to.clone(),
            Term::Var(_) | Term::Con(_) | Term::Prim { .. } | Term::Invalid => this.clone(),
            Term::App(fun, arg) => {
                Term::app(Term::subst(fun, from, to), Term::subst(arg, from, to))
            }
            Term::Abs(binder, body) => {
                if *binder == from {
                    this.clone()
                } else {
                    Term::abs(*binder, Term::subst(body, from, to))
                }
            }
            Term::Let { name, bound, body } => {
                let bound = Term::subst(bound, from, to);
                let body = if *name == from {
                    body.clone()
                } else {
                    Term::subst(body, from, to)
                };
                Term::let_in(*name, bound, body)
            }
            Term::Rec { bindings, body } => {
                if bindings.iter().any(|(name, _)| *name == from) {
                    this.clone()
                } else {
                    Term::rec(
                        bindings
                            .iter()
                            .map(|(name, expr)| (*name, Term::subst(expr, from, to))),
                        Term::subst(body, from, to),
                    )
                }
            }
            Term::Ctor { name, args } => {
                Term::ctor(*name, args.iter().map(|arg| Term::subst(arg, from, to)))
            }
        }
    }

    /// Head beta reduction: applied abstractions and let bindings unfold
    /// until the head is stuck.
    pub fn reduce(this: &TermPtr) -> TermPtr {
        stacker::maybe_grow(32 * 1024, 1024 * 1024, || match &**this {
            Term::App(fun, arg) => {
                let fun = Term::reduce(fun);
                match &*fun {
                    Term::Abs(binder, body) => Term::reduce(&Term::subst(body, *binder, arg)),
                    _ => Term::app(fun, arg.clone()),
                }
            }
            Term::Let { name, bound, body } => Term::reduce(&Term::subst(body, *name, bound)),
            _ => this.clone(),
        })
    }

    pub fn is_alpha_equivalent(&self, other: &Self) -> bool {
        self.alpha_equivalence_impl(other, &mut Ties::default())
    }

    fn alpha_equivalence_impl(&self, other: &Self, ties: &mut Ties) -> bool {
        match (self, other) {
            (Term::Var(a), Term::Var(b)) => a == b || ties.is_tied(*a, *b),
            (Term::Con(a), Term::Con(b)) => a == b,
            (
                Term::Prim { text: t0, ty: ty0 },
                Term::Prim { text: t1, ty: ty1 },
            ) => t0 == t1 && ty0 == ty1,
            (Term::App(f0, a0), Term::App(f1, a1)) => {
                f0.alpha_equivalence_impl(f1, ties) && a0.alpha_equivalence_impl(a1, ties)
            }
            (Term::Abs(x, b0), Term::Abs(y, b1)) => {
                ties.with(*x, *y, |ties| b0.alpha_equivalence_impl(b1, ties))
            }
            (
                Term::Let {
                    name: n0,
                    bound: e0,
                    body: b0,
                },
                Term::Let {
                    name: n1,
                    bound: e1,
                    body: b1,
                },
            ) => {
                e0.alpha_equivalence_impl(e1, ties)
                    && ties.with(*n0, *n1, |ties| b0.alpha_equivalence_impl(b1, ties))
            }
            (
                Term::Rec {
                    bindings: bs0,
                    body: b0,
                },
                Term::Rec {
                    bindings: bs1,
                    body: b1,
                },
            ) => {
                if bs0.len() != bs1.len() {
                    return false;
                }
                let pairs: Vec<_> = bs0
                    .iter()
                    .zip(bs1)
                    .map(|((n0, _), (n1, _))| (*n0, *n1))
                    .collect();
                with_ties(ties, &pairs, &mut |ties| {
                    bs0.iter()
                        .zip(bs1)
                        .all(|((_, e0), (_, e1))| e0.alpha_equivalence_impl(e1, ties))
                        && b0.alpha_equivalence_impl(b1, ties)
                })
            }
            (
                Term::Ctor {
                    name: n0,
                    args: a0,
                },
                Term::Ctor {
                    name: n1,
                    args: a1,
                },
            ) => {
                n0 == n1
                    && a0.len() == a1.len()
                    && a0
                        .iter()
                        .zip(a1)
                        .all(|(x, y)| x.alpha_equivalence_impl(y, ties))
            }
            (Term::Invalid, Term::Invalid) => true,
            _ => false,
        }
    }

    /// Structural equality modulo a bijective renaming of variables,
    /// shared with monotype alpha equivalence.
    pub(crate) fn bijective_eq(a: &TermPtr, b: &TermPtr, map: &mut Bijection<Ustr>) -> bool {
        match (&**a, &**b) {
            (Term::Var(x), Term::Var(y)) => map.tie(*x, *y),
            (Term::Con(x), Term::Con(y)) => x == y,
            (
                Term::Prim { text: t0, ty: ty0 },
                Term::Prim { text: t1, ty: ty1 },
            ) => t0 == t1 && ty0 == ty1,
            (Term::App(f0, a0), Term::App(f1, a1)) => {
                Term::bijective_eq(f0, f1, map) && Term::bijective_eq(a0, a1, map)
            }
            (Term::Abs(x, b0), Term::Abs(y, b1)) => {
                map.tie(*x, *y) && Term::bijective_eq(b0, b1, map)
            }
            (
                Term::Ctor {
                    name: n0,
                    args: a0,
                },
                Term::Ctor {
                    name: n1,
                    args: a1,
                },
            ) => {
                n0 == n1
                    && a0.len() == a1.len()
                    && a0
                        .iter()
                        .zip(a1)
                        .all(|(x, y)| Term::bijective_eq(x, y, map))
            }
            _ => false,
        }
    }
}

/// Scoped connectivity ties between bound variables on the two sides of
/// an equivalence check.
#[derive(Default)]
pub(crate) struct Ties(FxHashMapRand<Ustr, ConnHandle>);

/// Keeps one scoped tie alive; handed back to [`Ties::exit`].
pub(crate) struct TieFrame {
    _conn: Connection,
    old_a: Option<ConnHandle>,
    old_b: Option<ConnHandle>,
}

impl Ties {
    /// Tie `a` to `b`, shadowing any outer ties for either name, until
    /// the returned frame is passed back to [`Ties::exit`].
    pub(crate) fn enter(&mut self, a: Ustr, b: Ustr) -> TieFrame {
        let ha = ConnHandle::default();
        let hb = ConnHandle::default();
        let conn = ha.connect(&hb);
        debug_assert!(conn.is_some());
        let old_a = self.0.insert(a, ha);
        let old_b = if a == b { None } else { self.0.insert(b, hb) };
        TieFrame {
            _conn: conn.expect("fresh handles always connect"),
            old_a,
            old_b,
        }
    }

    pub(crate) fn exit(&mut self, a: Ustr, b: Ustr, frame: TieFrame) {
        if a != b {
            restore(&mut self.0, b, frame.old_b);
        }
        restore(&mut self.0, a, frame.old_a);
    }

    /// Tie `a` to `b` for the duration of `f`.
    pub(crate) fn with<R>(&mut self, a: Ustr, b: Ustr, f: impl FnOnce(&mut Self) -> R) -> R {
        let frame = self.enter(a, b);
        let res = f(self);
        self.exit(a, b, frame);
        res
    }

    pub(crate) fn is_tied(&self, a: Ustr, b: Ustr) -> bool {
        match (self.0.get(&a), self.0.get(&b)) {
            (Some(ha), Some(hb)) => ha.is_connected(hb),
            _ => false,
        }
    }
}

fn restore(map: &mut FxHashMapRand<Ustr, ConnHandle>, key: Ustr, old: Option<ConnHandle>) {
    match old {
        Some(handle) => {
            map.insert(key, handle);
        }
        None => {
            map.remove(&key);
        }
    }
}

fn with_ties<R>(
    ties: &mut Ties,
    pairs: &[(Ustr, Ustr)],
    f: &mut impl FnMut(&mut Ties) -> R,
) -> R {
    match pairs.split_first() {
        None => f(ties),
        Some(((a, b), rest)) => ties.with(*a, *b, |ties| with_ties(ties, rest, f)),
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Con(x) | Term::Var(x) => write!(f, "{x}"),
            Term::App(fun, arg) => write!(f, "({fun} {arg})"),
            Term::Abs(binder, body) => write!(f, "λ{binder}.{body}"),
            Term::Let { name, bound, body } => {
                write!(f, "let {name} = {bound} in {body}")
            }
            Term::Rec { bindings, body } => {
                write!(f, "rec ")?;
                for (i, (name, expr)) in bindings.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name} = {expr}")?;
                }
                write!(f, " in {body}")
            }
            Term::Ctor { name, args } => {
                if args.is_empty() {
                    return write!(f, "{name}");
                }
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Term::Prim { text, .. } => write!(f, "{text}"),
            Term::Invalid => write!(f, "<invalid>"),
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    pub(crate) fn lam<F, const N: usize>(names: [&str; N], body: F) -> TermPtr
    where
        F: FnOnce([TermPtr; N]) -> TermPtr,
    {
        let names = names.map(ustr::ustr);
        let vars = names.map(Term::var);
        let body = body(vars);
        names
            .into_iter()
            .rev()
            .fold(body, |body, binding| Term::abs(binding, body))
    }

    pub(crate) fn app<const N: usize>(fun: TermPtr, args: [TermPtr; N]) -> TermPtr {
        args.into_iter().fold(fun, Term::app)
    }

    #[test]
    fn it_checks_simple_equivalence() {
        let idx = lam(["x"], |[x]| x);
        let idy = lam(["y"], |[y]| y);
        assert!(idx.is_alpha_equivalent(&idy));
    }

    #[test]
    fn it_distinguishes_shadowed_binders() {
        let inner = lam(["x", "x"], |[_, x]| x);
        let takes_inner = lam(["y", "z"], |[_, z]| z);
        let takes_outer = lam(["y", "z"], |[y, _]| y);
        assert!(inner.is_alpha_equivalent(&takes_inner));
        assert!(!inner.is_alpha_equivalent(&takes_outer));
    }

    #[test]
    fn it_reduces_head_redexes() {
        let k = lam(["x", "z"], |[x, _]| x);
        let term = app(k, [Term::con("A"), Term::con("B")]);
        assert_eq!(Term::reduce(&term), Term::con("A"));
    }

    #[test]
    fn it_reduces_lets() {
        let term = Term::let_in("x", Term::con("0"), Term::var("x"));
        assert_eq!(Term::reduce(&term), Term::con("0"));
    }

    #[test]
    fn it_substitutes_without_touching_binders() {
        let body = lam(["x"], |[x]| app(x, [Term::var("y")]));
        let out = Term::subst(&body, ustr::ustr("y"), &Term::con("0"));
        assert!(out.is_alpha_equivalent(&lam(["x"], |[x]| app(x, [Term::con("0")]))));
        let shadowed = lam(["y"], |[y]| y);
        let kept = Term::subst(&shadowed, ustr::ustr("y"), &Term::con("0"));
        assert_eq!(kept, shadowed);
    }

    #[test]
    fn it_lists_free_vars_in_order() {
        let term = app(Term::var("f"), [Term::var("a"), Term::var("f"), Term::var("b")]);
        let free = term.free_vars();
        assert_eq!(
            free,
            vec![ustr::ustr("f"), ustr::ustr("a"), ustr::ustr("b")]
        );
    }

    #[test]
    fn it_scopes_rec_names_over_all_bodies() {
        let term = Term::rec(
            [
                (ustr::ustr("f"), lam(["x"], |[x]| app(Term::var("g"), [x]))),
                (ustr::ustr("g"), lam(["x"], |[x]| app(Term::var("f"), [x]))),
            ],
            Term::var("f"),
        );
        assert!(term.free_vars().is_empty());
    }
}
