//!
//! The inference engine: rule implementations over parsed judgments.
//!
//! Scope-introducing rules hand back a premise token instead of a
//! discharger closure; the caller passes the token plus the body
//! judgment to the matching concluding function, which pops the
//! assumptions again. Every path through a rule restores the context,
//! failing ones included.

use rustc_hash::{FxHashMapRand, FxHashSetRand};
use tracing::trace;
use ustr::Ustr;

use crate::{
    ctx::Context,
    fresh::FreshSupply,
    report::{Report, Reporter, Rule, Status},
    subst::SubstStore,
    term::{Term, TermPtr},
    types::{Mono, MonoPtr, Poly, Sort, TypeCon, TypeVar, arrow},
    unify,
};

/// `expression : type`, as supplied by the parser or a prior conclusion.
#[derive(Debug, Clone)]
pub struct Judgment {
    pub term: TermPtr,
    pub ty: MonoPtr,
}

impl Judgment {
    pub fn new(term: TermPtr, ty: MonoPtr) -> Self {
        Self { term, ty }
    }
}

/// Result of a rule. When the status is non-OK the expression and type
/// payloads are garbage and must not be consumed.
#[derive(Debug, Clone)]
pub struct Conclusion {
    pub term: TermPtr,
    pub ty: MonoPtr,
    pub status: Status,
}

impl Conclusion {
    fn ok(term: TermPtr, ty: MonoPtr) -> Self {
        Self {
            term,
            ty,
            status: Status::Ok,
        }
    }

    fn fail(status: Status) -> Self {
        Self {
            term: Term::invalid(),
            ty: Mono::invalid(),
            status,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    pub fn judgment(&self) -> Judgment {
        Judgment::new(self.term.clone(), self.ty.clone())
    }
}

/// A declared data constructor: owning type plus signature.
#[derive(Debug, Clone)]
pub struct CtorDecl {
    pub owner: Ustr,
    pub signature: Poly,
}

/// Pending `Abs` premise: the parameter is shadowed until discharged.
#[derive(Debug)]
pub struct AbsPremise {
    param: Ustr,
    param_ty: TypeVar,
}

/// Pending `Let` premise.
#[derive(Debug)]
pub struct LetPremise {
    name: Ustr,
    bound: Judgment,
}

/// Pending `Rec` premise: tentative variables are shadowed until the
/// definition judgments arrive.
#[derive(Debug)]
pub struct RecPremise {
    names: Vec<Ustr>,
    tentative: Vec<TypeVar>,
}

/// `Rec` after its definitions: generalised bindings are shadowed until
/// the body judgment arrives. A poisoned premise skipped that stage.
#[derive(Debug)]
pub struct RecBody {
    names: Vec<Ustr>,
    defs: Vec<Judgment>,
    poisoned: bool,
}

pub struct Engine {
    pub(crate) ctx: Context,
    pub(crate) store: SubstStore,
    pub(crate) fresh: FreshSupply,
    pub(crate) reporter: Reporter,
    pub(crate) types: FxHashMapRand<Ustr, TypeCon>,
    pub(crate) ctors: FxHashMapRand<Ustr, CtorDecl>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            ctx: Context::new(),
            store: SubstStore::new(),
            fresh: FreshSupply::new(),
            reporter: Reporter::new(),
            types: FxHashMapRand::default(),
            ctors: FxHashMapRand::default(),
        }
    }

    pub fn new_var(&mut self) -> TypeVar {
        self.fresh.new_var()
    }

    pub fn num_new_vars(&mut self, n: usize) -> Vec<TypeVar> {
        self.fresh.num_new_vars(n)
    }

    pub fn new_ref(&mut self) -> Ustr {
        self.fresh.new_ref()
    }

    /// Install an assumption directly.
    pub fn shadow(&mut self, name: Ustr, sigma: Poly) {
        self.ctx.shadow(name, sigma);
    }

    /// Pop the most recent assumption for `name`.
    pub fn remove(&mut self, name: Ustr) -> Option<Poly> {
        self.ctx.remove(name)
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn find(&mut self, t: &MonoPtr) -> MonoPtr {
        self.store.find(t)
    }

    /// Unify two monotypes, reporting on failure.
    pub fn unify(&mut self, a: &MonoPtr, b: &MonoPtr) -> Status {
        let status = self.unify_quiet(a, b);
        if !status.is_ok() {
            self.reporter.report(
                Report::new(Rule::Unify, status).with_types([a.clone(), b.clone()]),
            );
        }
        status
    }

    fn unify_quiet(&mut self, a: &MonoPtr, b: &MonoPtr) -> Status {
        unify::unify(a, b, &mut self.store, &self.fresh)
    }

    pub fn has_errors(&self) -> bool {
        self.reporter.has_errors()
    }

    pub fn reports(&self) -> &[Report] {
        self.reporter.reports()
    }

    /// Look up `name`, instantiating its polytype.
    pub fn var(&mut self, name: Ustr) -> Conclusion {
        trace!("rule var on {name}");
        let Some(sigma) = self.ctx.get(name).cloned() else {
            self.reporter.report(
                Report::new(Rule::Var, Status::NameNotInContext).with_names([name]),
            );
            return Conclusion::fail(Status::NameNotInContext);
        };
        let mono = self.instantiate(&sigma);
        Conclusion::ok(Term::var(name), mono)
    }

    /// Apply `fun` to `arg` through a fresh result variable.
    pub fn app(&mut self, fun: &Judgment, arg: &Judgment) -> Conclusion {
        trace!("rule app on {} : {}", fun.term, fun.ty);
        let result = Mono::var(self.fresh.new_var());
        let expected = arrow(arg.ty.clone(), result.clone());
        let status = self.unify_quiet(&fun.ty, &expected);
        if !status.is_ok() {
            self.reporter.report(
                Report::new(Rule::App, status)
                    .with_types([fun.ty.clone(), arg.ty.clone()])
                    .with_terms([fun.term.clone(), arg.term.clone()]),
            );
            return Conclusion::fail(status);
        }
        let ty = self.store.find(&result);
        Conclusion::ok(Term::app(fun.term.clone(), arg.term.clone()), ty)
    }

    /// Enter an abstraction premise: the parameter is assumed at a fresh
    /// variable until [`Engine::abs_conclude`] discharges it.
    pub fn abs(&mut self, param: Ustr) -> AbsPremise {
        trace!("rule abs on {param}");
        let param_ty = self.fresh.new_var();
        self.ctx.shadow(param, Poly::mono(Mono::var(param_ty)));
        AbsPremise { param, param_ty }
    }

    pub fn abs_conclude(&mut self, premise: AbsPremise, body: &Judgment) -> Conclusion {
        let AbsPremise { param, param_ty } = premise;
        self.ctx.remove(param);
        let binder = self.fresh.new_ref();
        let rebound = Term::subst(&body.term, param, &Term::var(binder));
        let ty = arrow(Mono::var(param_ty), body.ty.clone());
        Conclusion::ok(Term::abs(binder, rebound), self.store.find(&ty))
    }

    /// Enter a let premise: the name is assumed at the generalisation of
    /// the bound judgment's type until [`Engine::let_conclude`].
    pub fn let_bind(&mut self, name: Ustr, bound: &Judgment) -> LetPremise {
        trace!("rule let on {name}");
        let sigma = self.generalize(&bound.ty);
        self.ctx.shadow(name, sigma);
        LetPremise {
            name,
            bound: bound.clone(),
        }
    }

    pub fn let_conclude(&mut self, premise: LetPremise, body: &Judgment) -> Conclusion {
        let LetPremise { name, bound } = premise;
        self.ctx.remove(name);
        let ty = self.store.find(&body.ty);
        Conclusion::ok(Term::let_in(name, bound.term, body.term.clone()), ty)
    }

    /// Enter a recursive block: each name is assumed at a fresh
    /// tentative variable until the definitions arrive.
    pub fn rec(&mut self, names: &[Ustr]) -> RecPremise {
        trace!("rule rec on {names:?}");
        let tentative = self.fresh.num_new_vars(names.len());
        for (name, v) in names.iter().zip(&tentative) {
            self.ctx.shadow(*name, Poly::mono(Mono::var(*v)));
        }
        RecPremise {
            names: names.to_vec(),
            tentative,
        }
    }

    /// Discharge the tentative assumptions and re-assume each name at
    /// the generalisation of its judged type.
    pub fn rec_define(&mut self, premise: RecPremise, defs: &[Judgment]) -> RecBody {
        let RecPremise { names, tentative } = premise;
        for name in &names {
            self.ctx.remove(*name);
        }
        if defs.len() != names.len() {
            self.reporter.report(
                Report::new(Rule::Rec, Status::RecArgsLengthMismatch)
                    .with_names(names.iter().copied()),
            );
            return RecBody {
                names,
                defs: Vec::new(),
                poisoned: true,
            };
        }
        // recursive occurrences were constrained against the tentative
        // variables; reconcile those before generalising
        for (v, def) in tentative.iter().zip(defs) {
            let status = self.unify_quiet(&Mono::var(*v), &def.ty);
            if !status.is_ok() {
                self.reporter.report(
                    Report::new(Rule::Rec, status)
                        .with_types([Mono::var(*v), def.ty.clone()])
                        .with_terms([def.term.clone()]),
                );
            }
        }
        for (name, def) in names.iter().zip(defs) {
            let sigma = self.generalize(&def.ty);
            self.ctx.shadow(*name, sigma);
        }
        RecBody {
            names,
            defs: defs.to_vec(),
            poisoned: false,
        }
    }

    pub fn rec_conclude(&mut self, premise: RecBody, body: &Judgment) -> Conclusion {
        let RecBody {
            names,
            defs,
            poisoned,
        } = premise;
        if poisoned {
            return Conclusion::fail(Status::RecArgsLengthMismatch);
        }
        for name in &names {
            self.ctx.remove(*name);
        }
        let ty = self.store.find(&body.ty);
        let bindings = names
            .iter()
            .copied()
            .zip(defs.into_iter().map(|def| def.term));
        Conclusion::ok(Term::rec(bindings, body.term.clone()), ty)
    }

    /// A literal concludes at the type it carries; no context lookup.
    pub fn primitive(&mut self, lit: &TermPtr) -> Conclusion {
        match &**lit {
            Term::Prim { ty, .. } => Conclusion::ok(lit.clone(), ty.clone()),
            _ => {
                self.reporter.report(
                    Report::new(Rule::Primitive, Status::Unsupported).with_terms([lit.clone()]),
                );
                Conclusion::fail(Status::Unsupported)
            }
        }
    }

    /// Apply a declared data constructor to its argument judgments.
    pub fn ctor_app(&mut self, name: Ustr, args: &[Judgment]) -> Conclusion {
        let Some(decl) = self.ctors.get(&name).cloned() else {
            self.reporter.report(
                Report::new(Rule::App, Status::UndefinedConstructor).with_names([name]),
            );
            return Conclusion::fail(Status::UndefinedConstructor);
        };
        let mut ty = self.instantiate(&decl.signature);
        for arg in args {
            let result = Mono::var(self.fresh.new_var());
            let status = self.unify_quiet(&ty, &arrow(arg.ty.clone(), result.clone()));
            if !status.is_ok() {
                self.reporter.report(
                    Report::new(Rule::App, status)
                        .with_types([ty, arg.ty.clone()])
                        .with_names([name]),
                );
                return Conclusion::fail(status);
            }
            ty = self.store.find(&result);
        }
        Conclusion::ok(Term::ctor(name, args.iter().map(|arg| arg.term.clone())), ty)
    }

    /// Walk a whole expression, dispatching the rules over its
    /// structure. Scope-introducing forms are entered and discharged
    /// here; a failing sub-derivation still unwinds its premises before
    /// the failure propagates.
    pub fn infer_term(&mut self, term: &TermPtr) -> Conclusion {
        stacker::maybe_grow(32 * 1024, 1024 * 1024, || self.infer_term_impl(term))
    }

    fn infer_term_impl(&mut self, term: &TermPtr) -> Conclusion {
        match &**term {
            Term::Var(name) => self.var(*name),
            Term::Con(name) => {
                let conclusion = self.var(*name);
                if conclusion.is_ok() {
                    Conclusion::ok(term.clone(), conclusion.ty)
                } else {
                    conclusion
                }
            }
            Term::Prim { .. } => self.primitive(term),
            Term::App(fun, arg) => {
                let fun = self.infer_term(fun);
                if !fun.is_ok() {
                    return fun;
                }
                let arg = self.infer_term(arg);
                if !arg.is_ok() {
                    return arg;
                }
                self.app(&fun.judgment(), &arg.judgment())
            }
            Term::Abs(param, body) => {
                let premise = self.abs(*param);
                let body = self.infer_term(body);
                let conclusion = self.abs_conclude(premise, &body.judgment());
                if body.is_ok() { conclusion } else { body }
            }
            Term::Let { name, bound, body } => {
                let bound = self.infer_term(bound);
                if !bound.is_ok() {
                    return bound;
                }
                let premise = self.let_bind(*name, &bound.judgment());
                let body = self.infer_term(body);
                let conclusion = self.let_conclude(premise, &body.judgment());
                if body.is_ok() { conclusion } else { body }
            }
            Term::Rec { bindings, body } => {
                let names: Vec<Ustr> = bindings.iter().map(|(name, _)| *name).collect();
                let premise = self.rec(&names);
                let mut defs = Vec::with_capacity(bindings.len());
                for (_, def) in bindings {
                    let def = self.infer_term(def);
                    if !def.is_ok() {
                        // the premise never reaches rec_define; pop its
                        // tentative assumptions here
                        for name in &names {
                            self.ctx.remove(*name);
                        }
                        return def;
                    }
                    defs.push(def.judgment());
                }
                let stage = self.rec_define(premise, &defs);
                let body = self.infer_term(body);
                let conclusion = self.rec_conclude(stage, &body.judgment());
                if body.is_ok() { conclusion } else { body }
            }
            Term::Ctor { name, args } => {
                let mut judged = Vec::with_capacity(args.len());
                for arg in args {
                    let arg = self.infer_term(arg);
                    if !arg.is_ok() {
                        return arg;
                    }
                    judged.push(arg.judgment());
                }
                self.ctor_app(*name, &judged)
            }
            Term::Invalid => self.unsupported(Rule::Infer, term),
        }
    }

    /// Stub conclusion for term forms whose rules are not built yet
    /// (type-class dictionaries, modality annotations).
    pub fn unsupported(&mut self, during: Rule, term: &TermPtr) -> Conclusion {
        self.reporter
            .report(Report::new(during, Status::Unsupported).with_terms([term.clone()]));
        Conclusion::fail(Status::Unsupported)
    }

    /// Close `m` over every type variable free in it but not in the
    /// context, and over every value-level variable free in its index
    /// positions. Binder order is the mint order.
    pub fn generalize(&mut self, m: &MonoPtr) -> Poly {
        let body = self.store.find(m);
        let mut env_free = FxHashSetRand::default();
        for v in self.ctx.free_type_vars() {
            self.store.find(&Mono::var(v)).free_vars_into(&mut env_free);
        }
        let mut binders: Vec<TypeVar> = body
            .free_vars()
            .into_iter()
            .filter(|v| !env_free.contains(v))
            .collect();
        binders.sort();
        let mut indices = body.index_vars();
        indices.sort_by_key(|(name, _)| match self.fresh.rank(*name) {
            Some(rank) => (0usize, rank, *name),
            None => (1, 0, *name),
        });
        let sigma = Poly::new(
            binders.into_iter().map(|v| (v, Sort::Star)),
            indices,
            body,
        );
        trace!("generalised {m} to {sigma}");
        sigma
    }

    /// Open `sigma` with fresh type and index variables.
    pub fn instantiate(&mut self, sigma: &Poly) -> MonoPtr {
        let mut map = FxHashMapRand::default();
        for (v, _) in &sigma.binders {
            map.insert(*v, Mono::var(self.fresh.new_var()));
        }
        let mut body = Mono::subst_vars(&sigma.body, &map);
        for (name, _) in &sigma.indices {
            let fresh_name = self.fresh.new_ref();
            body = Mono::rename_ref(&body, *name, &Term::var(fresh_name));
        }
        trace!("instantiated {sigma} to {body}");
        body
    }

    /// Declare a type constant.
    pub fn declare_type(&mut self, con: TypeCon) -> Status {
        self.declare_type_during(Rule::Export, con)
    }

    pub(crate) fn declare_type_during(&mut self, rule: Rule, con: TypeCon) -> Status {
        if self.types.contains_key(&con.name) {
            self.reporter
                .report(Report::new(rule, Status::TypeRedef).with_names([con.name]));
            return Status::TypeRedef;
        }
        self.types.insert(con.name, con);
        Status::Ok
    }

    /// Declare a data constructor of a previously declared type.
    pub fn declare_ctor(&mut self, owner: Ustr, name: Ustr, signature: Poly) -> Status {
        self.declare_ctor_during(Rule::Export, owner, name, signature)
    }

    pub(crate) fn declare_ctor_during(
        &mut self,
        rule: Rule,
        owner: Ustr,
        name: Ustr,
        signature: Poly,
    ) -> Status {
        if !self.types.contains_key(&owner) {
            self.reporter
                .report(Report::new(rule, Status::UndefinedType).with_names([owner, name]));
            return Status::UndefinedType;
        }
        if self.ctors.contains_key(&name) {
            self.reporter
                .report(Report::new(rule, Status::ConstructorRedef).with_names([name]));
            return Status::ConstructorRedef;
        }
        self.ctors.insert(name, CtorDecl { owner, signature });
        Status::Ok
    }
}
