use smallvec::SmallVec;
use thiserror::Error;
use ustr::Ustr;

use crate::{term::TermPtr, types::MonoPtr};

/// Outcome of a single rule application or unification step.
///
/// Statuses travel as values inside [`Conclusion`](crate::infer::Conclusion)s
/// and [`Report`]s; they are never raised as errors across rule calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Status {
    #[error("ok")]
    Ok,
    #[error("constant mismatch")]
    ConstantMismatch,
    #[error("kind constant mismatch")]
    KindConstantMismatch,
    #[error("parameter length mismatch")]
    ParamLengthMismatch,
    #[error("index length mismatch")]
    IndexLengthMismatch,
    #[error("member length mismatch")]
    MemsLengthMismatch,
    #[error("occurs check failed")]
    OccursCheckFailed,
    #[error("name not in context")]
    NameNotInContext,
    #[error("recursive binding count mismatch")]
    RecArgsLengthMismatch,
    #[error("type redefined")]
    TypeRedef,
    #[error("constructor redefined")]
    ConstructorRedef,
    #[error("undefined type")]
    UndefinedType,
    #[error("undefined constructor")]
    UndefinedConstructor,
    #[error("undefined function")]
    UndefinedFunction,
    #[error("ambiguous function")]
    AmbiguousFunction,
    #[error("illegal shadowing")]
    IllegalShadow,
    #[error("not yet supported")]
    Unsupported,
}

impl Status {
    pub fn is_ok(self) -> bool {
        matches!(self, Status::Ok)
    }
}

/// The rule a report was raised during.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rule {
    Var,
    App,
    Abs,
    Let,
    Rec,
    Primitive,
    Gen,
    Inst,
    Unify,
    Find,
    Infer,
    Export,
    Import,
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Rule::Var => "var",
            Rule::App => "app",
            Rule::Abs => "abs",
            Rule::Let => "let",
            Rule::Rec => "rec",
            Rule::Primitive => "primitive",
            Rule::Gen => "gen",
            Rule::Inst => "inst",
            Rule::Unify => "unify",
            Rule::Find => "find",
            Rule::Infer => "infer",
            Rule::Export => "export",
            Rule::Import => "import",
        };
        write!(f, "{name}")
    }
}

/// One diagnostic: the rule it was raised during, the status, and the
/// operands involved. Renders as `"<rule>: <status>; <operands>"`.
#[derive(Debug, Clone)]
pub struct Report {
    pub during: Rule,
    pub status: Status,
    pub types: SmallVec<MonoPtr, 2>,
    pub terms: SmallVec<TermPtr, 2>,
    pub names: SmallVec<Ustr, 2>,
}

impl Report {
    pub fn new(during: Rule, status: Status) -> Self {
        Self {
            during,
            status,
            types: SmallVec::new(),
            terms: SmallVec::new(),
            names: SmallVec::new(),
        }
    }

    pub fn with_types<I: IntoIterator<Item = MonoPtr>>(mut self, types: I) -> Self {
        self.types.extend(types);
        self
    }

    pub fn with_terms<I: IntoIterator<Item = TermPtr>>(mut self, terms: I) -> Self {
        self.terms.extend(terms);
        self
    }

    pub fn with_names<I: IntoIterator<Item = Ustr>>(mut self, names: I) -> Self {
        self.names.extend(names);
        self
    }
}

impl std::fmt::Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.during, self.status)?;
        let mut sep = "; ";
        for ty in &self.types {
            write!(f, "{sep}{ty}")?;
            sep = ", ";
        }
        for term in &self.terms {
            write!(f, "{sep}{term}")?;
            sep = ", ";
        }
        for name in &self.names {
            write!(f, "{sep}{name}")?;
            sep = ", ";
        }
        Ok(())
    }
}

/// Ordered sink of reports. Rules append on every non-OK status; the
/// engine keeps running so one session can surface several diagnostics.
#[derive(Debug, Default)]
pub struct Reporter {
    reports: Vec<Report>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, report: Report) {
        tracing::error!("{report}");
        self.reports.push(report);
    }

    pub fn has_errors(&self) -> bool {
        !self.reports.is_empty()
    }

    pub fn reports(&self) -> &[Report] {
        &self.reports
    }
}
