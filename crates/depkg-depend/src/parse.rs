// SPDX-License-Identifier: MPL-2.0

//! Grammar: `expr := clause (",": clause)*`, `clause := atom ("|" atom)*`,
//! `atom := name (":" arch-qualifier)? ("(" relation version ")")?
//! ("[" arch-restriction+ "]")?`. Matches the `Depends`-family field
//! syntax assumed by §4.2's field registry.

use thiserror::Error;

use crate::{Atom, DependencyExpression, Relation};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty dependency atom")]
    EmptyAtom,
    #[error("empty package name in atom {0:?}")]
    EmptyName(String),
    #[error("malformed version constraint in atom {0:?}")]
    MalformedConstraint(String),
    #[error("unknown relation operator {0:?}")]
    UnknownRelation(String),
    #[error("invalid version in constraint: {0}")]
    InvalidVersion(#[from] depkg_version::Error),
    #[error("unterminated architecture restriction in atom {0:?}")]
    UnterminatedArchRestriction(String),
}

pub fn parse_expression(text: &str) -> Result<DependencyExpression, ParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(DependencyExpression::default());
    }
    let mut clauses = Vec::new();
    for clause in text.split(',') {
        let clause = clause.trim();
        if clause.is_empty() {
            continue;
        }
        let mut atoms = Vec::new();
        for atom_text in clause.split('|') {
            atoms.push(parse_atom(atom_text.trim())?);
        }
        clauses.push(atoms);
    }
    Ok(DependencyExpression(clauses))
}

fn parse_atom(text: &str) -> Result<Atom, ParseError> {
    if text.is_empty() {
        return Err(ParseError::EmptyAtom);
    }

    let (head, arch_restriction) = if let Some(open) = text.find('[') {
        let close = text
            .find(']')
            .ok_or_else(|| ParseError::UnterminatedArchRestriction(text.to_string()))?;
        let restriction = text[open + 1..close]
            .split_whitespace()
            .map(str::to_string)
            .collect();
        (text[..open].trim(), restriction)
    } else {
        (text, Vec::new())
    };

    let (head, constraint) = if let Some(open) = head.find('(') {
        let close = head
            .find(')')
            .ok_or_else(|| ParseError::MalformedConstraint(text.to_string()))?;
        let inner = head[open + 1..close].trim();
        (head[..open].trim(), Some(parse_constraint(inner, text)?))
    } else {
        (head.trim(), None)
    };

    let (name, arch_qualifier) = match head.split_once(':') {
        Some((name, qualifier)) => (name.trim(), Some(qualifier.trim().to_string())),
        None => (head.trim(), None),
    };

    if name.is_empty() {
        return Err(ParseError::EmptyName(text.to_string()));
    }

    Ok(Atom {
        name: name.to_string(),
        arch_qualifier,
        constraint,
        arch_restriction,
    })
}

fn parse_constraint(inner: &str, context: &str) -> Result<(Relation, depkg_version::Version), ParseError> {
    let mut parts = inner.splitn(2, char::is_whitespace);
    let op = parts.next().ok_or_else(|| ParseError::MalformedConstraint(context.to_string()))?;
    let version = parts
        .next()
        .ok_or_else(|| ParseError::MalformedConstraint(context.to_string()))?
        .trim();

    let relation = match op {
        "<<" => Relation::StrictlyEarlier,
        "<=" => Relation::EarlierOrEqual,
        "=" => Relation::Exact,
        ">=" => Relation::LaterOrEqual,
        ">>" => Relation::StrictlyLater,
        // Accept the deprecated single-character forms dpkg still parses.
        "<" => Relation::EarlierOrEqual,
        ">" => Relation::LaterOrEqual,
        other => return Err(ParseError::UnknownRelation(other.to_string())),
    };

    let version = depkg_version::parse(version)?;
    Ok((relation, version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_name() {
        let expr = parse_expression("foo").unwrap();
        assert_eq!(expr.0, vec![vec![Atom::new("foo")]]);
    }

    #[test]
    fn parses_conjunction_and_disjunction() {
        let expr = parse_expression("foo, bar | baz").unwrap();
        assert_eq!(expr.0.len(), 2);
        assert_eq!(expr.0[1].len(), 2);
    }

    #[test]
    fn parses_version_constraint() {
        let expr = parse_expression("foo (>= 1.2-3)").unwrap();
        let atom = &expr.0[0][0];
        assert!(matches!(atom.constraint, Some((Relation::LaterOrEqual, _))));
    }

    #[test]
    fn parses_arch_qualifier_and_restriction() {
        let expr = parse_expression("foo:any [linux-any]").unwrap();
        let atom = &expr.0[0][0];
        assert_eq!(atom.arch_qualifier.as_deref(), Some("any"));
        assert_eq!(atom.arch_restriction, vec!["linux-any".to_string()]);
    }

    #[test]
    fn rejects_unknown_relation() {
        assert!(matches!(
            parse_expression("foo (~= 1.0)"),
            Err(ParseError::UnknownRelation(_))
        ));
    }

    #[test]
    fn empty_expression_is_empty() {
        assert!(parse_expression("").unwrap().is_empty());
        assert!(parse_expression("   ").unwrap().is_empty());
    }
}
