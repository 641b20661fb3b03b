// SPDX-License-Identifier: MPL-2.0

//! Administrator stat overrides: `(uid, gid, mode)` applied at unpack
//! time in place of the archive's own ownership/permission metadata.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatOverride {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

impl StatOverride {
    /// Serialize as the space-separated `uid gid mode path` line format (§6).
    pub fn to_line(&self, path: &str) -> String {
        format!("{} {} {:o} {}\n", self.uid, self.gid, self.mode, path)
    }

    pub fn parse_line(line: &str) -> Result<(String, Self), ParseError> {
        let mut parts = line.split_whitespace();
        let uid = parts.next().ok_or(ParseError::Malformed)?;
        let gid = parts.next().ok_or(ParseError::Malformed)?;
        let mode = parts.next().ok_or(ParseError::Malformed)?;
        let path = parts.next().ok_or(ParseError::Malformed)?;
        if parts.next().is_some() {
            return Err(ParseError::Malformed);
        }
        let uid: u32 = uid.parse().map_err(|_| ParseError::Malformed)?;
        let gid: u32 = gid.parse().map_err(|_| ParseError::Malformed)?;
        let mode = u32::from_str_radix(mode, 8).map_err(|_| ParseError::Malformed)?;
        Ok((crate::path::normalize(path), StatOverride { uid, gid, mode }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed statoverride line")]
    Malformed,
}

pub fn parse_file(text: &str) -> Result<Vec<(String, StatOverride)>, ParseError> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(StatOverride::parse_line)
        .collect()
}

pub fn format_file(entries: &[(String, StatOverride)]) -> String {
    entries.iter().map(|(path, so)| so.to_line(path)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let entries = vec![(
            "/usr/bin/sudo".to_string(),
            StatOverride {
                uid: 0,
                gid: 0,
                mode: 0o4755,
            },
        )];
        let text = format_file(&entries);
        let parsed = parse_file(&text).unwrap();
        assert_eq!(parsed, entries);
    }

    #[test]
    fn rejects_malformed_line() {
        assert_eq!(StatOverride::parse_line("0 0 x /foo"), Err(ParseError::Malformed));
    }
}
