// SPDX-License-Identifier: MPL-2.0

//! The dependency expression model and checker (§4.5): atoms,
//! and-of-or expressions, and evaluation against a [`PackageView`] of
//! the database in one of several lookup scopes.

use std::fmt;

use depkg_version::Version;
use thiserror::Error;

mod parse;

pub use parse::ParseError;

/// A version constraint applied to an [`Atom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// `<<`
    StrictlyEarlier,
    /// `<=`
    EarlierOrEqual,
    /// `=`
    Exact,
    /// `>=`
    LaterOrEqual,
    /// `>>`
    StrictlyLater,
}

impl Relation {
    pub fn holds(&self, lhs: &Version, rhs: &Version) -> bool {
        use std::cmp::Ordering::*;
        let ord = lhs.cmp(rhs);
        match self {
            Relation::StrictlyEarlier => ord == Less,
            Relation::EarlierOrEqual => ord != Greater,
            Relation::Exact => ord == Equal,
            Relation::LaterOrEqual => ord != Less,
            Relation::StrictlyLater => ord == Greater,
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Relation::StrictlyEarlier => "<<",
            Relation::EarlierOrEqual => "<=",
            Relation::Exact => "=",
            Relation::LaterOrEqual => ">=",
            Relation::StrictlyLater => ">>",
        };
        f.write_str(s)
    }
}

/// `(pkgname, arch-qualifier?, version-constraint?, arch-restriction?)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
    pub name: String,
    pub arch_qualifier: Option<String>,
    pub constraint: Option<(Relation, Version)>,
    pub arch_restriction: Vec<String>,
}

impl Atom {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arch_qualifier: None,
            constraint: None,
            arch_restriction: Vec::new(),
        }
    }

    /// Does `candidate` (name, arch, version) satisfy this atom, ignoring
    /// any arch-restriction filtering (a build-profile concern not
    /// modeled here)?
    pub fn matches(&self, candidate_name: &str, candidate_arch: &str, candidate_version: Option<&Version>) -> bool {
        if self.name != candidate_name {
            return false;
        }
        if let Some(qualifier) = &self.arch_qualifier {
            if qualifier != "any" && qualifier != candidate_arch {
                return false;
            }
        }
        match (&self.constraint, candidate_version) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some((relation, wanted)), Some(have)) => relation.holds(have, wanted),
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(q) = &self.arch_qualifier {
            write!(f, ":{q}")?;
        }
        if let Some((rel, ver)) = &self.constraint {
            write!(f, " ({rel} {ver})")?;
        }
        Ok(())
    }
}

/// An and-of-or relationship expression: the outer `Vec` is a
/// conjunction, each inner `Vec` a disjunction of [`Atom`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyExpression(pub Vec<Vec<Atom>>);

impl DependencyExpression {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        parse::parse_expression(text)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn atoms(&self) -> impl Iterator<Item = &Atom> {
        self.0.iter().flatten()
    }
}

/// The scope a checker evaluates an expression against: which of a
/// candidate package's slots (or pending-operation intent) counts as
/// "present" for satisfaction purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalScope {
    /// Only packages already `installed` satisfy atoms.
    Installed,
    /// Packages present in the available database satisfy atoms,
    /// whether or not installed yet.
    Available,
    /// Packages the scheduler intends to bring to a satisfying state
    /// this session (includes queued-but-not-yet-configured) satisfy
    /// atoms. Used for `Defer` classification.
    ByIsToBe,
    /// Any package with files on disk right now, including a
    /// half-installed or unpacked-but-not-configured slot. Wider than
    /// `Installed`: `Conflicts` forbids simultaneous unpacking even
    /// before the other side finishes configuring, unlike `Breaks`.
    Present,
}

/// A queryable view of the package database, implemented by
/// `depkg-db`'s `PackageSet` and by test doubles here.
pub trait PackageView {
    /// Every `(name, architecture, version)` a package in `scope`
    /// presents, including virtual names it provides.
    fn candidates(&self, name: &str, scope: EvalScope) -> Vec<Candidate>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub arch: String,
    pub version: Option<Version>,
    /// True if this candidate satisfies `name` only via a `Provides`
    /// declaration, not as the concrete package itself. Provided
    /// names never carry a version, so a versioned atom against a
    /// provider never matches (dpkg semantics).
    pub via_provides: bool,
}

/// Outcome of evaluating an expression or a single atom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Satisfied now.
    Ok,
    /// Not satisfied, but could become so once pending operations
    /// complete (used during scheduling, not for a final decision).
    Defer(String),
    /// Permanently violated; no scheduling order fixes this.
    Halt(String),
}

impl Verdict {
    pub fn is_ok(&self) -> bool {
        matches!(self, Verdict::Ok)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
}

fn atom_satisfied(atom: &Atom, view: &impl PackageView, scope: EvalScope) -> bool {
    view.candidates(&atom.name, scope).iter().any(|c| {
        if c.via_provides && atom.constraint.is_some() {
            return false;
        }
        atom.matches(&c.name, &c.arch, c.version.as_ref())
    })
}

/// Evaluate a `Depends`/`Recommends`/`Pre-Depends`-style expression:
/// conjunction of disjunctions, each disjunction satisfied if any one
/// atom is.
pub fn check(expr: &DependencyExpression, view: &impl PackageView, scope: EvalScope) -> Verdict {
    let mut reasons = Vec::new();
    for disjunction in &expr.0 {
        let satisfied = disjunction.iter().any(|atom| atom_satisfied(atom, view, scope));
        if !satisfied {
            let alternatives = disjunction.iter().map(Atom::to_string).collect::<Vec<_>>().join(" | ");
            reasons.push(format!("none of {alternatives} is satisfied"));
        }
    }
    if reasons.is_empty() {
        return Verdict::Ok;
    }
    // An unsatisfied clause can still be resolved by a pending operation
    // under `ByIsToBe`; under the narrower `Installed`/`Available` scopes
    // the caller is asking "right now", so treat it as deferrable only
    // when the broader scope was the one actually requested.
    match scope {
        EvalScope::ByIsToBe => Verdict::Defer(reasons.join("; ")),
        _ => Verdict::Halt(reasons.join("; ")),
    }
}

/// Evaluate a `Conflicts` expression: satisfied (i.e. no conflict) iff
/// no atom in any clause matches a candidate with files on disk right
/// now. `Conflicts` forbids coexistence even with a half-installed or
/// unpacked-but-unconfigured package, so it checks `EvalScope::Present`.
pub fn check_conflicts(expr: &DependencyExpression, view: &impl PackageView) -> Verdict {
    check_negated(expr, view, EvalScope::Present, "conflicts with")
}

/// Evaluate a `Breaks` expression: like `Conflicts`, but only forbids
/// coexistence with a package that is fully `installed` — a merely
/// unpacked or half-installed one doesn't yet trigger it.
pub fn check_breaks(expr: &DependencyExpression, view: &impl PackageView) -> Verdict {
    check_negated(expr, view, EvalScope::Installed, "breaks")
}

fn check_negated(expr: &DependencyExpression, view: &impl PackageView, scope: EvalScope, verb: &str) -> Verdict {
    for disjunction in &expr.0 {
        for atom in disjunction {
            if atom_satisfied(atom, view, scope) {
                return Verdict::Halt(format!("{verb} installed package matching {atom}"));
            }
        }
    }
    Verdict::Ok
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeDb(Vec<Candidate>);

    impl PackageView for FakeDb {
        fn candidates(&self, name: &str, _scope: EvalScope) -> Vec<Candidate> {
            self.0.iter().filter(|c| c.name == name).cloned().collect()
        }
    }

    fn installed(name: &str, version: &str) -> Candidate {
        Candidate {
            name: name.to_string(),
            arch: "amd64".to_string(),
            version: Some(depkg_version::parse(version).unwrap()),
            via_provides: false,
        }
    }

    #[test]
    fn simple_depends_satisfied() {
        let expr = DependencyExpression::parse("foo (>= 1.0)").unwrap();
        let db = FakeDb(vec![installed("foo", "1.2")]);
        assert_eq!(check(&expr, &db, EvalScope::Installed), Verdict::Ok);
    }

    #[test]
    fn unsatisfied_version_halts_under_installed_scope() {
        let expr = DependencyExpression::parse("foo (>= 2.0)").unwrap();
        let db = FakeDb(vec![installed("foo", "1.2")]);
        assert!(matches!(check(&expr, &db, EvalScope::Installed), Verdict::Halt(_)));
    }

    #[test]
    fn unsatisfied_disjunction_defers_under_by_is_to_be() {
        let expr = DependencyExpression::parse("foo | bar").unwrap();
        let db = FakeDb(vec![]);
        assert!(matches!(check(&expr, &db, EvalScope::ByIsToBe), Verdict::Defer(_)));
    }

    #[test]
    fn disjunction_satisfied_by_either_alternative() {
        let expr = DependencyExpression::parse("foo | bar").unwrap();
        let db = FakeDb(vec![installed("bar", "1.0")]);
        assert_eq!(check(&expr, &db, EvalScope::Installed), Verdict::Ok);
    }

    #[test]
    fn conflicts_halts_on_match() {
        let expr = DependencyExpression::parse("foo").unwrap();
        let db = FakeDb(vec![installed("foo", "1.0")]);
        assert!(matches!(check_conflicts(&expr, &db), Verdict::Halt(_)));
    }

    #[test]
    fn conflicts_ok_without_match() {
        let expr = DependencyExpression::parse("foo").unwrap();
        let db = FakeDb(vec![]);
        assert_eq!(check_conflicts(&expr, &db), Verdict::Ok);
    }

    #[test]
    fn versioned_atom_never_matches_a_provided_name() {
        let expr = DependencyExpression::parse("foo (>= 1.0)").unwrap();
        let db = FakeDb(vec![Candidate {
            name: "foo".to_string(),
            arch: "amd64".to_string(),
            version: None,
            via_provides: true,
        }]);
        assert!(matches!(check(&expr, &db, EvalScope::Installed), Verdict::Halt(_)));
    }
}
