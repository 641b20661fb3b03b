// SPDX-License-Identifier: MPL-2.0

//! RFC-822-style control stanza parsing: streams `Name: value` fields,
//! grouped into blank-line-separated paragraphs, into an ordered,
//! case-insensitive [`Stanza`] structure that can be serialized back
//! out faithfully enough for round-trip (`format(parse(s))` reparses
//! to the same [`Stanza`]).

use std::io::BufRead;

use thiserror::Error;

pub mod registry;

/// One control-stanza field, preserving original-case name and the
/// logical (continuation-joined) value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: String,
}

/// An ordered, case-insensitive-lookup set of fields making up one
/// paragraph of the control grammar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stanza {
    fields: Vec<Field>,
}

impl Stanza {
    pub fn new() -> Self {
        Self::default()
    }

    /// Case-insensitive field lookup, first match (duplicates are
    /// rejected at parse time so there is at most one).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| f.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Insert or replace a field, preserving first-seen position on
    /// replace and append order on insert.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(existing) = self.fields.iter_mut().find(|f| f.name.eq_ignore_ascii_case(name)) {
            existing.value = value;
        } else {
            self.fields.push(Field {
                name: name.to_string(),
                value,
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Comma-separated list field, each element trimmed.
    pub fn get_list(&self, name: &str) -> Vec<String> {
        match self.get(name) {
            Some(value) => value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => Vec::new(),
        }
    }

    /// `yes`/`no` boolean field, per the `Essential` convention.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name)?.trim() {
            "yes" => Some(true),
            "no" => Some(false),
            _ => None,
        }
    }

    /// Serialize this stanza back to control-file text, including the
    /// trailing blank line that separates paragraphs.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for field in &self.fields {
            let mut lines = field.value.split('\n');
            if let Some(first) = lines.next() {
                out.push_str(&field.name);
                out.push_str(": ");
                out.push_str(first);
                out.push('\n');
            }
            for line in lines {
                out.push(' ');
                if line.is_empty() {
                    out.push('.');
                } else {
                    out.push_str(line);
                }
                out.push('\n');
            }
        }
        out.push('\n');
        out
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("line {0}: continuation line has no preceding field")]
    DanglingContinuation(usize),
    #[error("line {0}: expected 'Name: value', got {1:?}")]
    MalformedField(usize, String),
    #[error("line {0}: duplicate field {1:?} in stanza")]
    DuplicateField(usize, String),
    #[error("line {0}: empty field name")]
    EmptyFieldName(usize),
    #[error("io error: {0}")]
    Io(String),
}

/// Streaming reader over control stanzas; one [`Stanza`] per call to
/// [`next_stanza`](Self::next_stanza), or use the `Iterator` impl.
pub struct StanzaReader<R> {
    reader: R,
    line_no: usize,
    done: bool,
}

impl<R: BufRead> StanzaReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_no: 0,
            done: false,
        }
    }

    pub fn next_stanza(&mut self) -> Result<Option<Stanza>, Error> {
        if self.done {
            return Ok(None);
        }

        let mut stanza = Stanza::new();
        let mut current: Option<usize> = None; // index into stanza.fields of the field under construction

        loop {
            let mut raw = String::new();
            let bytes_read = self
                .reader
                .read_line(&mut raw)
                .map_err(|e| Error::Io(e.to_string()))?;
            if bytes_read == 0 {
                self.done = true;
                break;
            }
            self.line_no += 1;
            let line = raw.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                // Blank line: paragraph terminator, unless we haven't
                // started a stanza yet (tolerate leading blank lines).
                if stanza.is_empty() && current.is_none() {
                    continue;
                }
                break;
            }

            if line.starts_with(' ') || line.starts_with('\t') {
                let Some(idx) = current else {
                    return Err(Error::DanglingContinuation(self.line_no));
                };
                let content = line[1..].trim_end();
                let content = if content == "." { "" } else { content };
                stanza.fields[idx].value.push('\n');
                stanza.fields[idx].value.push_str(content);
                continue;
            }

            let Some((name, value)) = line.split_once(':') else {
                return Err(Error::MalformedField(self.line_no, line.to_string()));
            };
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::EmptyFieldName(self.line_no));
            }
            if stanza.fields.iter().any(|f| f.name.eq_ignore_ascii_case(name)) {
                return Err(Error::DuplicateField(self.line_no, name.to_string()));
            }

            stanza.fields.push(Field {
                name: name.to_string(),
                value: value.trim().trim_end().to_string(),
            });
            current = Some(stanza.fields.len() - 1);
        }

        if stanza.is_empty() {
            Ok(None)
        } else {
            Ok(Some(stanza))
        }
    }
}

impl<R: BufRead> Iterator for StanzaReader<R> {
    type Item = Result<Stanza, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_stanza().transpose()
    }
}

/// Parse every stanza out of a buffered reader, eagerly.
pub fn parse_all<R: BufRead>(reader: R) -> Result<Vec<Stanza>, Error> {
    StanzaReader::new(reader).collect()
}

/// Serialize a sequence of stanzas, separated per [`Stanza::to_text`].
pub fn format_all(stanzas: &[Stanza]) -> String {
    stanzas.iter().map(Stanza::to_text).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_single_stanza() {
        let text = "Package: foo\nVersion: 1.0\nDescription: does a thing\n continues here\n";
        let stanzas = parse_all(Cursor::new(text)).unwrap();
        assert_eq!(stanzas.len(), 1);
        assert_eq!(stanzas[0].get("package"), Some("foo"));
        assert_eq!(stanzas[0].get("Version"), Some("1.0"));
        assert_eq!(stanzas[0].get("Description"), Some("does a thing\ncontinues here"));
    }

    #[test]
    fn parses_multiple_stanzas_separated_by_blank_line() {
        let text = "Package: foo\nVersion: 1.0\n\nPackage: bar\nVersion: 2.0\n";
        let stanzas = parse_all(Cursor::new(text)).unwrap();
        assert_eq!(stanzas.len(), 2);
        assert_eq!(stanzas[1].get("Package"), Some("bar"));
    }

    #[test]
    fn rejects_duplicate_fields() {
        let text = "Package: foo\nPackage: bar\n";
        let err = parse_all(Cursor::new(text)).unwrap_err();
        assert!(matches!(err, Error::DuplicateField(2, _)));
    }

    #[test]
    fn rejects_dangling_continuation() {
        let text = " continuation\n";
        let err = parse_all(Cursor::new(text)).unwrap_err();
        assert!(matches!(err, Error::DanglingContinuation(1)));
    }

    #[test]
    fn round_trips_through_text() {
        let text = "Package: foo\nDepends: a, b\nDescription: line one\n line two\n";
        let stanzas = parse_all(Cursor::new(text)).unwrap();
        let rendered = format_all(&stanzas);
        let reparsed = parse_all(Cursor::new(rendered)).unwrap();
        assert_eq!(stanzas, reparsed);
    }

    #[test]
    fn list_and_bool_helpers() {
        let text = "Package: foo\nDepends: a, b , c\nEssential: yes\n";
        let stanza = parse_all(Cursor::new(text)).unwrap().remove(0);
        assert_eq!(stanza.get_list("Depends"), vec!["a", "b", "c"]);
        assert_eq!(stanza.get_bool("Essential"), Some(true));
    }

    #[test]
    fn case_insensitive_field_names() {
        let mut stanza = Stanza::new();
        stanza.set("Package", "foo");
        assert_eq!(stanza.get("package"), Some("foo"));
        assert_eq!(stanza.get("PACKAGE"), Some("foo"));
    }
}
