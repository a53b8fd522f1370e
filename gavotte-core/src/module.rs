//!
//! Module-level export and import: a restricted form of generalisation
//! over whole declaration groups. Signatures travel by value between
//! engines; nothing is resolved from disk.

use rustc_hash::FxHashMapRand;
use tracing::trace;
use ustr::Ustr;

use crate::{
    infer::{CtorDecl, Engine},
    report::{Report, Rule, Status},
    types::{Mono, Poly, Sort, TypeCon},
};

/// Whether imported names are reachable without their alias prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qualification {
    Qualified,
    Open,
}

/// The exported namespace of one module.
#[derive(Debug, Clone)]
pub struct ModuleSignature {
    pub name: Ustr,
    pub functions: FxHashMapRand<Ustr, Poly>,
    pub types: FxHashMapRand<Ustr, TypeCon>,
    pub ctors: FxHashMapRand<Ustr, CtorDecl>,
}

impl ModuleSignature {
    fn new(name: Ustr) -> Self {
        Self {
            name,
            functions: FxHashMapRand::default(),
            types: FxHashMapRand::default(),
            ctors: FxHashMapRand::default(),
        }
    }
}

impl Engine {
    /// Pre-install every name a module will export at the most general
    /// polytype `∀v. v`, so declaration groups can reference each other
    /// before their own types are known.
    pub fn begin_module(&mut self, names: &[Ustr]) {
        for name in names {
            if self.ctx.depth(*name) > 0 {
                self.reporter.report(
                    Report::new(Rule::Export, Status::IllegalShadow).with_names([*name]),
                );
                continue;
            }
            let v = self.fresh.new_var();
            self.ctx
                .shadow(*name, Poly::new([(v, Sort::Star)], [], Mono::var(v)));
        }
    }

    /// Resolve a module's exported surface: each declared type with its
    /// enumerated constructors, and each function name, which must have
    /// exactly one context binding.
    pub fn export(
        &mut self,
        module: Ustr,
        functions: &[Ustr],
        types: &[(Ustr, Vec<Ustr>)],
    ) -> ModuleSignature {
        trace!("exporting module {module}");
        let mut sig = ModuleSignature::new(module);
        for (ty_name, ctor_names) in types {
            let Some(con) = self.types.get(ty_name).copied() else {
                self.reporter.report(
                    Report::new(Rule::Export, Status::UndefinedType).with_names([*ty_name]),
                );
                continue;
            };
            sig.types.insert(*ty_name, con);
            for ctor_name in ctor_names {
                match self.ctors.get(ctor_name) {
                    Some(decl) if decl.owner == *ty_name => {
                        sig.ctors.insert(*ctor_name, decl.clone());
                    }
                    _ => {
                        self.reporter.report(
                            Report::new(Rule::Export, Status::UndefinedConstructor)
                                .with_names([*ty_name, *ctor_name]),
                        );
                    }
                }
            }
        }
        for name in functions {
            match self.ctx.depth(*name) {
                0 => {
                    self.reporter.report(
                        Report::new(Rule::Export, Status::UndefinedFunction).with_names([*name]),
                    );
                }
                1 => {
                    // popped while generalising: a binding must not pin
                    // its own variables
                    let sigma = self
                        .ctx
                        .remove(*name)
                        .expect("depth-one binding is present");
                    let sigma = if sigma.is_mono() {
                        self.generalize(&sigma.body)
                    } else {
                        sigma
                    };
                    self.ctx.shadow(*name, sigma.clone());
                    sig.functions.insert(*name, sigma);
                }
                _ => {
                    self.reporter.report(
                        Report::new(Rule::Export, Status::AmbiguousFunction).with_names([*name]),
                    );
                }
            }
        }
        sig
    }

    /// Merge an exported namespace into the current context under
    /// `alias`. Open imports also install the bare names.
    pub fn import(&mut self, sig: &ModuleSignature, qualification: Qualification, alias: Ustr) {
        trace!("importing module {} as {alias}", sig.name);
        for (name, sigma) in sig.functions.iter() {
            let qualified = ustr::ustr(&format!("{alias}.{name}"));
            self.install_import(qualified, sigma.clone());
            if qualification == Qualification::Open {
                self.install_import(*name, sigma.clone());
            }
        }
        for (_, con) in sig.types.iter() {
            self.declare_type_during(Rule::Import, *con);
        }
        for (name, decl) in sig.ctors.iter() {
            self.declare_ctor_during(Rule::Import, decl.owner, *name, decl.signature.clone());
        }
    }

    fn install_import(&mut self, name: Ustr, sigma: Poly) {
        if self.ctx.depth(name) > 0 {
            self.reporter
                .report(Report::new(Rule::Import, Status::IllegalShadow).with_names([name]));
            return;
        }
        self.ctx.shadow(name, sigma);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::term::Term;
    use crate::types::test::*;
    use crate::types::{Fixity, Mono, arrow};

    fn engine() -> Engine {
        _ = tracing_subscriber::fmt::try_init();
        Engine::new()
    }

    fn n(name: &str) -> Ustr {
        ustr::ustr(name)
    }

    fn declare_nat(engine: &mut Engine) {
        engine.declare_type(TypeCon::atom("Nat"));
        let nat = Mono::con0("Nat");
        engine.declare_ctor(n("Nat"), n("Zero"), Poly::mono(nat.clone()));
        engine.declare_ctor(n("Nat"), n("Succ"), Poly::mono(arrow(nat.clone(), nat)));
    }

    /// One whole module: pre-declared exports, an inferred definition
    /// that replaces its pre-declaration, then export.
    fn nat_module() -> (Engine, ModuleSignature) {
        let mut engine = engine();
        engine.begin_module(&[n("one")]);
        declare_nat(&mut engine);

        // module body: one = Succ Zero
        let zero = engine.ctor_app(n("Zero"), &[]);
        let one = engine.ctor_app(n("Succ"), &[zero.judgment()]);
        assert!(one.is_ok());
        engine.remove(n("one"));
        engine.shadow(n("one"), Poly::mono(one.ty.clone()));

        let sig = engine.export(
            n("nat"),
            &[n("one")],
            &[(n("Nat"), vec![n("Zero"), n("Succ")])],
        );
        assert!(!engine.has_errors());
        (engine, sig)
    }

    #[test]
    fn it_exports_types_and_functions() {
        let (_, sig) = nat_module();
        assert_eq!(sig.name, n("nat"));
        assert!(sig.types.contains_key(&n("Nat")));
        assert!(sig.ctors.contains_key(&n("Zero")));
        assert!(sig.ctors.contains_key(&n("Succ")));
        let sigma = sig.functions.get(&n("one")).unwrap();
        assert_eq!(sigma.body, Mono::con0("Nat"));
    }

    #[test]
    fn pre_declared_exports_reference_each_other() {
        let mut engine = engine();
        engine.begin_module(&[n("half"), n("double")]);
        // double's body can already mention half: ∀v.v opens at any use
        let half = engine.var(n("half"));
        assert!(half.is_ok());
        let two = engine.primitive(&Term::prim("2", int()));
        let applied = engine.app(&half.judgment(), &two.judgment());
        assert!(applied.is_ok());
        assert!(!engine.has_errors());
    }

    #[test]
    fn it_reports_missing_exports() {
        let mut engine = engine();
        declare_nat(&mut engine);
        let sig = engine.export(
            n("nat"),
            &[n("one")],
            &[
                (n("Nat"), vec![n("Zero"), n("Three")]),
                (n("Bool"), vec![]),
            ],
        );
        let statuses: Vec<_> = engine.reports().iter().map(|r| r.status).collect();
        assert!(statuses.contains(&Status::UndefinedFunction));
        assert!(statuses.contains(&Status::UndefinedConstructor));
        assert!(statuses.contains(&Status::UndefinedType));
        assert!(!sig.functions.contains_key(&n("one")));
        assert!(!sig.types.contains_key(&n("Bool")));
    }

    #[test]
    fn it_rejects_shadowed_exports() {
        let mut engine = engine();
        engine.shadow(n("one"), Poly::mono(int()));
        engine.shadow(n("one"), Poly::mono(uint()));
        let sig = engine.export(n("nat"), &[n("one")], &[]);
        assert_eq!(
            engine.reports()[0].status,
            Status::AmbiguousFunction
        );
        assert!(!sig.functions.contains_key(&n("one")));
    }

    #[test]
    fn it_reports_illegal_shadowing_on_begin() {
        let mut engine = engine();
        engine.shadow(n("one"), Poly::mono(int()));
        engine.begin_module(&[n("one")]);
        assert_eq!(engine.reports()[0].status, Status::IllegalShadow);
        assert_eq!(engine.reports()[0].during, Rule::Export);
    }

    #[test]
    fn it_imports_qualified() {
        let (_, sig) = nat_module();
        let mut engine = engine();
        engine.import(&sig, Qualification::Qualified, n("nat"));
        assert!(!engine.has_errors());
        let qualified = engine.var(n("nat.one"));
        assert!(qualified.is_ok());
        let bare = engine.var(n("one"));
        assert_eq!(bare.status, Status::NameNotInContext);
        // constructors arrived too
        let zero = engine.ctor_app(n("Zero"), &[]);
        assert!(zero.is_ok());
    }

    #[test]
    fn it_imports_open() {
        let (_, sig) = nat_module();
        let mut engine = engine();
        engine.import(&sig, Qualification::Open, n("nat"));
        let bare = engine.var(n("one"));
        assert!(bare.is_ok());
        assert_eq!(engine.find(&bare.ty), Mono::con0("Nat"));
    }

    #[test]
    fn it_reports_import_collisions() {
        let (_, sig) = nat_module();
        let mut engine = engine();
        engine.shadow(n("one"), Poly::mono(int()));
        engine.import(&sig, Qualification::Open, n("nat"));
        let statuses: Vec<_> = engine.reports().iter().map(|r| r.status).collect();
        assert!(statuses.contains(&Status::IllegalShadow));
        // the existing binding is untouched
        let one = engine.var(n("one"));
        assert_eq!(engine.find(&one.ty), int());
    }

    #[test]
    fn it_reports_type_clashes_on_reimport() {
        let (_, sig) = nat_module();
        let mut engine = engine();
        let clashing = TypeCon::new("Nat", Fixity::Prefix, 1, Sort::Star);
        engine.declare_type(clashing);
        engine.import(&sig, Qualification::Qualified, n("nat"));
        let statuses: Vec<_> = engine.reports().iter().map(|r| r.status).collect();
        assert!(statuses.contains(&Status::TypeRedef));
    }

    #[test]
    fn it_generalises_monomorphic_exports() {
        let mut engine = engine();
        let a = engine.new_var();
        engine.shadow(n("id"), Poly::mono(arrow(Mono::var(a), Mono::var(a))));
        let sig = engine.export(n("m"), &[n("id")], &[]);
        let sigma = sig.functions.get(&n("id")).unwrap();
        assert_eq!(sigma.binders.len(), 1);
    }
}
