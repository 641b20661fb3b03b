// SPDX-License-Identifier: MPL-2.0

//! Diversion records: a registered rename that redirects every package
//! but one (or no package, for a local diversion) from installing
//! content at `contested` to installing it at `redirected` instead.

use std::fmt;

/// A diversion of `contested` to `redirected`, held by `package`
/// (`None` means a local diversion, not owned by any package).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diversion {
    pub contested: String,
    pub redirected: String,
    pub package: Option<String>,
}

impl Diversion {
    pub fn new(contested: impl Into<String>, redirected: impl Into<String>, package: Option<String>) -> Self {
        Self {
            contested: crate::path::normalize(&contested.into()),
            redirected: crate::path::normalize(&redirected.into()),
            package,
        }
    }

    pub fn is_local(&self) -> bool {
        self.package.is_none()
    }

    /// Does `package` get to use `self.contested` unredirected?
    pub fn holder_is(&self, package: &str) -> bool {
        self.package.as_deref() == Some(package)
    }

    /// Serialize as the three-line `diversions` record format (§6):
    /// `contested\nredirected\npackage-or-colon\n`.
    pub fn to_record(&self) -> String {
        format!(
            "{}\n{}\n{}\n",
            self.contested,
            self.redirected,
            self.package.as_deref().unwrap_or(":")
        )
    }

    /// Parse one three-line record. `lines` must yield exactly three
    /// non-empty lines (trailing newline already stripped by caller).
    pub fn parse_record(lines: [&str; 3]) -> Result<Self, ParseError> {
        let [contested, redirected, package] = lines;
        if contested.is_empty() || redirected.is_empty() {
            return Err(ParseError::EmptyPath);
        }
        let package = if package == ":" { None } else { Some(package.to_string()) };
        Ok(Diversion::new(contested, redirected, package))
    }
}

impl fmt::Display for Diversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.contested, self.redirected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("diversion record has an empty path")]
    EmptyPath,
}

/// Parse a whole `diversions` file: records are not required to appear
/// in any particular order, but each is exactly three lines.
pub fn parse_file(text: &str) -> Result<Vec<Diversion>, ParseError> {
    let lines: Vec<&str> = text.lines().collect();
    let mut out = Vec::with_capacity(lines.len() / 3);
    for chunk in lines.chunks(3) {
        if chunk.len() < 3 {
            break;
        }
        out.push(Diversion::parse_record([chunk[0], chunk[1], chunk[2]])?);
    }
    Ok(out)
}

pub fn format_file(diversions: &[Diversion]) -> String {
    diversions.iter().map(Diversion::to_record).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_local_diversion() {
        let d = Diversion::new("/etc/foo.conf", "/etc/foo.conf.dpkg-divert", None);
        let text = format_file(&[d.clone()]);
        let parsed = parse_file(&text).unwrap();
        assert_eq!(parsed, vec![d]);
    }

    #[test]
    fn round_trips_owned_diversion() {
        let d = Diversion::new("/usr/bin/foo", "/usr/bin/foo.real", Some("bar".to_string()));
        let text = format_file(&[d.clone()]);
        let parsed = parse_file(&text).unwrap();
        assert_eq!(parsed[0].package.as_deref(), Some("bar"));
    }
}
