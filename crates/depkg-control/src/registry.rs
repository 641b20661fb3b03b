// SPDX-License-Identifier: MPL-2.0

//! Static registry mapping known control-stanza field names to their
//! decoded shape. `depkg-db` uses this to decide how to interpret a
//! [`crate::Stanza`] field; fields absent from the registry are kept
//! verbatim as part of the stanza's "arbitrary extra fields" tail.

/// The decoded shape of a known field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Single-line free text (e.g. `Maintainer`).
    Text,
    /// Multi-line free text, continuation lines are part of the value
    /// (e.g. `Description`).
    Multiline,
    /// Comma-separated list of simple tokens (e.g. `Conffiles`).
    List,
    /// Comma-separated and-of-or dependency expression (e.g. `Depends`).
    Relation,
    /// `yes`/`no` (e.g. `Essential`).
    Bool,
}

/// `(field name, kind)` pairs for every field the engine interprets.
/// Order is irrelevant; lookup is by case-insensitive name.
pub const KNOWN_FIELDS: &[(&str, FieldKind)] = &[
    ("Package", FieldKind::Text),
    ("Source", FieldKind::Text),
    ("Version", FieldKind::Text),
    ("Architecture", FieldKind::Text),
    ("Multi-Arch", FieldKind::Text),
    ("Maintainer", FieldKind::Text),
    ("Installed-Size", FieldKind::Text),
    ("Homepage", FieldKind::Text),
    ("Section", FieldKind::Text),
    ("Priority", FieldKind::Text),
    ("Essential", FieldKind::Bool),
    ("Description", FieldKind::Multiline),
    ("Depends", FieldKind::Relation),
    ("Pre-Depends", FieldKind::Relation),
    ("Recommends", FieldKind::Relation),
    ("Suggests", FieldKind::Relation),
    ("Enhances", FieldKind::Relation),
    ("Conflicts", FieldKind::Relation),
    ("Breaks", FieldKind::Relation),
    ("Replaces", FieldKind::Relation),
    ("Provides", FieldKind::Relation),
    ("Conffiles", FieldKind::List),
    ("Triggers", FieldKind::List),
    ("Status", FieldKind::Text),
];

/// Look up the decoded shape of a known field name, case-insensitively.
pub fn classify(name: &str) -> Option<FieldKind> {
    KNOWN_FIELDS
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(name))
        .map(|(_, kind)| *kind)
}

/// Is this field one the engine understands, vs. an opaque pass-through?
pub fn is_known(name: &str) -> bool {
    classify(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_fields_case_insensitively() {
        assert_eq!(classify("depends"), Some(FieldKind::Relation));
        assert_eq!(classify("DEPENDS"), Some(FieldKind::Relation));
    }

    #[test]
    fn unknown_field_is_unclassified() {
        assert_eq!(classify("X-Custom-Field"), None);
        assert!(!is_known("X-Custom-Field"));
    }
}
