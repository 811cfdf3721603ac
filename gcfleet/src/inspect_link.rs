// gcfleet/src/inspect_link.rs
//
// §4.1 InspectLink — a pure value object, no I/O.
//
// Real inspect links arrive in one of two shapes:
//   - a `steam://rungame/730/.../+csgo_econ_action_preview%20S<s>A<a>D<d>`
//     (or `M<m>A<a>D<d>`) context-menu string
//   - a pre-split `{s, a, d, m}` tuple the caller already parsed
//
// Neither is a well-formed `key=value&...` URL, so this is hand-rolled
// rather than pulled through a general URL-parsing crate.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FleetError;

/// `{s, a, d, m}` per spec.md §3: exactly one of `s`/`m` is the non-"0"
/// owner identifier; `a` and `d` are always present.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InspectLink {
    pub s: String,
    pub a: String,
    pub d: String,
    pub m: String,
}

impl fmt::Display for InspectLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.m != "0" {
            write!(f, "M{}A{}D{}", self.m, self.a, self.d)
        } else {
            write!(f, "S{}A{}D{}", self.s, self.a, self.d)
        }
    }
}

impl InspectLink {
    /// Build from already-split fields, validating the invariants in
    /// spec.md §3. Any field not supplied by the caller should be passed
    /// as `"0"` (the link's own "absent" sentinel).
    pub fn from_fields(s: &str, a: &str, d: &str, m: &str) -> Result<Self, FleetError> {
        let link = InspectLink { s: s.to_string(), a: a.to_string(), d: d.to_string(), m: m.to_string() };
        link.validate()?;
        Ok(link)
    }

    /// Re-checks spec.md §3's invariants on a link built by some other
    /// route (e.g. deserialized straight off the wire) that skipped
    /// `from_fields`/`parse`.
    pub fn validate(&self) -> Result<(), FleetError> {
        let has_owner = self.s != "0" && !self.s.is_empty();
        let has_market = self.m != "0" && !self.m.is_empty();
        if has_owner == has_market {
            // neither set, or both set — exactly one must be the owner
            return Err(FleetError::InvalidLink("exactly one of s/m must be set".into()));
        }
        if self.a.is_empty() || self.a == "0" {
            return Err(FleetError::InvalidLink("missing asset id (a)".into()));
        }
        if self.d.is_empty() {
            return Err(FleetError::InvalidLink("missing proof token (d)".into()));
        }
        Ok(())
    }

    /// Parse a `steam://...csgo_econ_action_preview%20S...A...D...` (or the
    /// `M...A...D...` market variant) string, percent-decoded or not.
    pub fn parse(raw: &str) -> Result<Self, FleetError> {
        let decoded = percent_decode(raw);
        let payload = decoded
            .rsplit(' ')
            .next()
            .ok_or_else(|| FleetError::InvalidLink("empty link".into()))?;

        let mut s = "0".to_string();
        let mut m = "0".to_string();
        let mut a = String::new();
        let mut d = String::new();

        let mut rest = payload;
        loop {
            let (tag, tail) = match rest.char_indices().next() {
                Some((_, c)) if c == 'S' || c == 'A' || c == 'D' || c == 'M' => {
                    (c, &rest[1..])
                }
                _ => break,
            };
            let next_boundary = tail
                .char_indices()
                .find(|(_, c)| matches!(c, 'S' | 'A' | 'D' | 'M'))
                .map(|(i, _)| i)
                .unwrap_or(tail.len());
            let (value, remainder) = tail.split_at(next_boundary);
            match tag {
                'S' => s = value.to_string(),
                'M' => m = value.to_string(),
                'A' => a = value.to_string(),
                'D' => d = value.to_string(),
                _ => unreachable!(),
            }
            rest = remainder;
            if rest.is_empty() {
                break;
            }
        }

        Self::from_fields(&s, &a, &d, &m)
    }
}

/// Minimal percent-decoder — inspect links only ever carry `%NN` triplets
/// for a handful of ASCII punctuation characters (the URL crate would pull
/// in a generic IRI-validating parser for no benefit here).
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_owner_link() {
        let link = InspectLink::parse("steam://rungame/730/76561202255233023/+csgo_econ_action_preview S76561198000000000A123456D789").unwrap();
        assert_eq!(link.s, "76561198000000000");
        assert_eq!(link.a, "123456");
        assert_eq!(link.d, "789");
        assert_eq!(link.m, "0");
    }

    #[test]
    fn parses_market_link() {
        let link = InspectLink::parse("+csgo_econ_action_preview M1122334455A123456D789").unwrap();
        assert_eq!(link.m, "1122334455");
        assert_eq!(link.s, "0");
    }

    #[test]
    fn parses_percent_encoded() {
        let link = InspectLink::parse("...%20S76561198000000000A123456D789").unwrap();
        assert_eq!(link.a, "123456");
    }

    #[test]
    fn rejects_both_owner_fields_set() {
        assert!(InspectLink::from_fields("1", "2", "3", "4").is_err());
    }

    #[test]
    fn rejects_neither_owner_field_set() {
        assert!(InspectLink::from_fields("0", "2", "3", "0").is_err());
    }

    #[test]
    fn rejects_missing_asset_or_proof() {
        assert!(InspectLink::from_fields("1", "0", "3", "0").is_err());
        assert!(InspectLink::from_fields("1", "2", "", "0").is_err());
    }
}
