//! X.500 distinguished names.
//!
//! Trust anchor info files spell CA subjects the way OpenSSL prints them,
//! i.e., `/C=xx/O=Org/CN=Name`, while the subjects handed to us by the
//! surrounding service are in RFC 2253 form, i.e., `CN=Name,O=Org,C=xx`.
//! The type [`DistinguishedName`] parses both and compares them
//! structurally so that different spellings of the same name are equal.

use std::{error, fmt, hash};
use std::cmp::Ordering;
use std::str::FromStr;


//------------ DistinguishedName ---------------------------------------------

/// A parsed distinguished name.
///
/// The relative distinguished names are kept in RFC 2253 order, i.e., the
/// most specific one comes first. Attribute types are normalized to upper
/// case and the components of a multi-valued RDN are sorted, so the
/// derived `Eq`, `Ord`, and `Hash` implementations compare names
/// structurally. Attribute values compare without regard to case or
/// repeated white space.
///
/// The `Display` implementation produces the canonical RFC 2253 string.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DistinguishedName {
    rdns: Vec<Rdn>,
}

impl DistinguishedName {
    /// Parses a name in OpenSSL’s slash-separated form.
    ///
    /// The string must start with a slash. Each slash-separated segment
    /// starts a new RDN if it looks like `type=value`. Otherwise the slash
    /// is considered part of the previous value. Within a segment, a plus
    /// sign followed by `type=value` starts another component of a
    /// multi-valued RDN.
    pub fn from_openssl(s: &str) -> Result<Self, DnError> {
        let s = s.trim();
        let s = match s.strip_prefix('/') {
            Some(s) => s,
            None => return Err(DnError::new(DnErrorKind::MissingSlash, s))
        };
        if s.is_empty() {
            return Err(DnError::new(DnErrorKind::Empty, s))
        }

        // Collect type and value pairs in the order given. The values may
        // still grow, so they only become AVAs at the end.
        let mut rdns: Vec<Vec<(String, String)>> = Vec::new();
        for segment in s.split('/') {
            for (idx, part) in segment.split('+').enumerate() {
                match split_openssl(part) {
                    Some(pair) => {
                        if idx == 0 {
                            rdns.push(vec![pair])
                        }
                        else if let Some(last) = rdns.last_mut() {
                            last.push(pair)
                        }
                    }
                    None => {
                        let last = rdns.last_mut().and_then(|rdn| {
                            rdn.last_mut()
                        }).ok_or_else(|| {
                            DnError::new(DnErrorKind::MissingType, s)
                        })?;
                        last.1.push(if idx == 0 { '/' } else { '+' });
                        last.1.push_str(part);
                    }
                }
            }
        }
        Ok(DistinguishedName {
            rdns: rdns.into_iter().rev().map(|rdn| {
                Rdn::new(
                    rdn.into_iter().map(|(key, value)| {
                        Ava::new(key, value)
                    }).collect()
                )
            }).collect()
        })
    }

    /// Parses a name in RFC 2253 form.
    ///
    /// Both backslash escapes (including hex pairs) and quoted values are
    /// understood. White space around separators is insignificant.
    pub fn from_rfc2253(s: &str) -> Result<Self, DnError> {
        let mut parser = Rfc2253Parser {
            src: s,
            chars: s.trim().chars().peekable(),
        };
        if parser.chars.peek().is_none() {
            return Err(DnError::new(DnErrorKind::Empty, s))
        }
        let mut rdns = Vec::new();
        let mut current = Vec::new();
        loop {
            current.push(parser.take_ava()?);
            match parser.chars.next() {
                Some('+') => { }
                Some(',') | Some(';') => {
                    rdns.push(Rdn::new(std::mem::take(&mut current)));
                }
                None => {
                    rdns.push(Rdn::new(current));
                    break
                }
                Some(_) => {
                    return Err(parser.error(DnErrorKind::BadValue))
                }
            }
        }
        Ok(DistinguishedName { rdns })
    }

    /// Returns the number of relative distinguished names.
    pub fn len(&self) -> usize {
        self.rdns.len()
    }

    /// Returns whether the name has no RDNs.
    ///
    /// Names created through the parsing functions are never empty.
    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }
}


//--- FromStr

impl FromStr for DistinguishedName {
    type Err = DnError;

    /// Parses either form.
    ///
    /// A leading slash selects the OpenSSL form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim_start().starts_with('/') {
            Self::from_openssl(s)
        }
        else {
            Self::from_rfc2253(s)
        }
    }
}


//--- Display

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (idx, rdn) in self.rdns.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            for (idx, ava) in rdn.avas.iter().enumerate() {
                if idx > 0 {
                    f.write_str("+")?;
                }
                write!(f, "{}=", ava.key)?;
                write_escaped(&ava.value, f)?;
            }
        }
        Ok(())
    }
}


//------------ Rdn -----------------------------------------------------------

/// A relative distinguished name.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
struct Rdn {
    avas: Vec<Ava>,
}

impl Rdn {
    fn new(mut avas: Vec<Ava>) -> Self {
        avas.sort();
        Rdn { avas }
    }
}


//------------ Ava -----------------------------------------------------------

/// An attribute value assertion.
///
/// Values are compared ignoring case and runs of white space, the way
/// X.500 matches directory strings. The original spelling is kept for
/// display.
#[derive(Clone, Debug)]
struct Ava {
    key: String,
    value: String,

    /// The value used for comparison.
    folded: String,
}

impl Ava {
    fn new(key: String, value: String) -> Self {
        let folded = value.split_whitespace().map(str::to_lowercase)
            .collect::<Vec<_>>().join(" ");
        Ava { key, value, folded }
    }
}

impl PartialEq for Ava {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.folded == other.folded
    }
}

impl Eq for Ava { }

impl PartialOrd for Ava {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ava {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key).then_with(|| {
            self.folded.cmp(&other.folded)
        })
    }
}

impl hash::Hash for Ava {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.folded.hash(state);
    }
}

/// Splits an OpenSSL segment into type and value.
///
/// Returns `None` if the segment doesn’t start with a valid attribute
/// type followed by an equals sign.
fn split_openssl(segment: &str) -> Option<(String, String)> {
    let (key, value) = segment.split_once('=')?;
    let key = key.trim();
    if !is_attribute_type(key) {
        return None
    }
    Some((normalize_type(key), value.trim().into()))
}


//------------ Rfc2253Parser -------------------------------------------------

struct Rfc2253Parser<'a> {
    src: &'a str,
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Rfc2253Parser<'a> {
    fn error(&self, kind: DnErrorKind) -> DnError {
        DnError::new(kind, self.src)
    }

    fn skip_space(&mut self) {
        while self.chars.next_if(|ch| *ch == ' ').is_some() { }
    }

    fn take_ava(&mut self) -> Result<Ava, DnError> {
        self.skip_space();
        let mut key = String::new();
        loop {
            match self.chars.next() {
                Some('=') => break,
                Some(ch) => key.push(ch),
                None => return Err(self.error(DnErrorKind::MissingEquals))
            }
        }
        let key = key.trim();
        if !is_attribute_type(key) {
            return Err(self.error(DnErrorKind::MissingType))
        }
        self.skip_space();
        let value = match self.chars.peek() {
            Some('"') => self.take_quoted()?,
            _ => self.take_plain()?,
        };
        Ok(Ava::new(normalize_type(key), value))
    }

    /// Takes a quoted value, leaving the iterator at the next separator.
    fn take_quoted(&mut self) -> Result<String, DnError> {
        self.chars.next();
        let mut buf = Vec::new();
        loop {
            match self.chars.next() {
                Some('"') => break,
                Some('\\') => self.take_escape(&mut buf)?,
                Some(ch) => push_char(&mut buf, ch),
                None => {
                    return Err(self.error(DnErrorKind::UnterminatedQuote))
                }
            }
        }
        self.skip_space();
        let keep = buf.len();
        self.finish_value(buf, keep)
    }

    /// Takes an unquoted value, leaving the iterator at the separator.
    fn take_plain(&mut self) -> Result<String, DnError> {
        let mut buf = Vec::new();

        // Escaped trailing spaces are significant, so we need to remember
        // how much of the buffer must not be trimmed.
        let mut keep = 0;
        while let Some(ch) = self.chars.next_if(|ch| {
            !matches!(*ch, ',' | '+' | ';')
        }) {
            if ch == '\\' {
                self.take_escape(&mut buf)?;
                keep = buf.len();
            }
            else {
                push_char(&mut buf, ch);
            }
        }
        self.finish_value(buf, keep)
    }

    fn take_escape(&mut self, buf: &mut Vec<u8>) -> Result<(), DnError> {
        let first = match self.chars.next() {
            Some(ch) => ch,
            None => return Err(self.error(DnErrorKind::BadEscape))
        };
        if let Some(high) = first.to_digit(16) {
            let low = self.chars.next().and_then(|ch| ch.to_digit(16));
            match low {
                Some(low) => buf.push((high * 16 + low) as u8),
                None => return Err(self.error(DnErrorKind::BadEscape))
            }
        }
        else {
            push_char(buf, first);
        }
        Ok(())
    }

    fn finish_value(
        &self, mut buf: Vec<u8>, keep: usize
    ) -> Result<String, DnError> {
        while buf.len() > keep && buf.last() == Some(&b' ') {
            buf.pop();
        }
        String::from_utf8(buf).map_err(|_| {
            self.error(DnErrorKind::BadValue)
        })
    }
}


//------------ Helpers -------------------------------------------------------

fn push_char(buf: &mut Vec<u8>, ch: char) {
    let mut tmp = [0u8; 4];
    buf.extend_from_slice(ch.encode_utf8(&mut tmp).as_bytes());
}

/// Returns whether `key` is a keyword or an OID.
fn is_attribute_type(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(ch) if ch.is_ascii_alphanumeric() => { }
        _ => return false
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '.' || ch == '-')
}

/// Normalizes an attribute type.
///
/// Keywords are upper-cased and a few common aliases are folded.
fn normalize_type(key: &str) -> String {
    let key = key.trim();
    let key = match key.strip_prefix("OID.").or_else(|| {
        key.strip_prefix("oid.")
    }) {
        Some(oid) => oid,
        None => key,
    };
    let upper = key.to_ascii_uppercase();
    match upper.as_str() {
        "E" | "EMAIL" => "EMAILADDRESS".into(),
        "S" => "ST".into(),
        "USERID" => "UID".into(),
        _ => upper
    }
}

/// Writes a value with the escaping of RFC 2253, section 2.4.
fn write_escaped(value: &str, f: &mut fmt::Formatter) -> fmt::Result {
    let last = value.chars().count().saturating_sub(1);
    for (idx, ch) in value.chars().enumerate() {
        let escape = match ch {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' => true,
            '#' => idx == 0,
            ' ' => idx == 0 || idx == last,
            _ => false,
        };
        if escape {
            f.write_str("\\")?;
        }
        write!(f, "{}", ch)?;
    }
    Ok(())
}


//------------ DnError -------------------------------------------------------

/// A string could not be parsed into a distinguished name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DnError {
    kind: DnErrorKind,
    src: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DnErrorKind {
    /// The name is empty.
    Empty,

    /// An OpenSSL-style name doesn’t start with a slash.
    MissingSlash,

    /// A component lacks a valid attribute type.
    MissingType,

    /// A component lacks the equals sign.
    MissingEquals,

    /// A quoted value lacks its closing quote.
    UnterminatedQuote,

    /// A backslash escape is incomplete or invalid.
    BadEscape,

    /// A value is malformed.
    BadValue,
}

impl DnError {
    fn new(kind: DnErrorKind, src: &str) -> Self {
        DnError { kind, src: src.into() }
    }

    pub fn kind(&self) -> DnErrorKind {
        self.kind
    }
}

impl fmt::Display for DnError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self.kind {
            DnErrorKind::Empty => "empty name",
            DnErrorKind::MissingSlash => "expected leading slash",
            DnErrorKind::MissingType => "missing attribute type",
            DnErrorKind::MissingEquals => "missing '='",
            DnErrorKind::UnterminatedQuote => "missing end quote",
            DnErrorKind::BadEscape => "invalid escape sequence",
            DnErrorKind::BadValue => "invalid attribute value",
        };
        write!(f, "invalid distinguished name '{}': {}", self.src, msg)
    }
}

impl error::Error for DnError { }


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;

    fn dn(s: &str) -> DistinguishedName {
        DistinguishedName::from_str(s).unwrap()
    }

    #[test]
    fn openssl_to_rfc2253() {
        assert_eq!(
            dn("/C=NL/O=NIKHEF/CN=NIKHEF medium-security \
                certification auth").to_string(),
            "CN=NIKHEF medium-security certification auth,O=NIKHEF,C=NL"
        );
        assert_eq!(
            dn("/DC=ch/DC=cern/CN=CERN Grid Certification Authority")
                .to_string(),
            "CN=CERN Grid Certification Authority,DC=cern,DC=ch"
        );
    }

    #[test]
    fn spellings_compare_equal() {
        assert_eq!(
            dn("/C=xx/O=Org/CN=Name"),
            dn("CN=Name, O=Org, C=xx")
        );
        assert_eq!(dn("cn=Name,o=Org,c=xx"), dn("CN=Name,O=Org,C=xx"));
        assert_eq!(
            dn("CN=Name,emailAddress=ca@example.org,C=xx"),
            dn("/C=xx/E=ca@example.org/CN=Name")
        );
        assert_ne!(dn("CN=Name,O=Org,C=xx"), dn("CN=Name,O=Org,C=yy"));
        assert_ne!(dn("CN=Name,O=Org"), dn("O=Org,CN=Name"));
    }

    #[test]
    fn values_ignore_case_and_spacing() {
        assert_eq!(dn("cn=ca a,o=test,c=xx"), dn("CN=CA A,O=Test,C=XX"));
        assert_eq!(dn("/C=XX/O=Test/CN=CA  A"), dn("CN=ca a, O=TEST, C=xx"));
        assert_ne!(dn("CN=CA A,C=xx"), dn("CN=CA B,C=xx"));

        // The original spelling is kept for display.
        assert_eq!(dn("cn=ca a,c=xx").to_string(), "CN=ca a,C=xx");

        let mut set = std::collections::HashSet::new();
        set.insert(dn("/C=XX/O=Test/CN=CA A"));
        assert!(set.contains(&dn("cn=ca a,o=test,c=xx")));
    }

    #[test]
    fn openssl_slash_in_value() {
        let name = dn("/C=DE/O=GermanGrid/CN=GridKa-CA/http://gridka.de");
        assert_eq!(name.len(), 3);
        assert_eq!(
            name.to_string(),
            "CN=GridKa-CA/http://gridka.de,O=GermanGrid,C=DE"
        );
    }

    #[test]
    fn openssl_multi_valued() {
        let name = dn("/C=xx/O=Org+OU=Unit/CN=Name");
        assert_eq!(name.len(), 3);
        assert_eq!(name.to_string(), "CN=Name,O=Org+OU=Unit,C=xx");
        assert_eq!(name, dn("CN=Name,OU=Unit+O=Org,C=xx"));
    }

    #[test]
    fn rfc2253_escapes() {
        let name = dn(r#"CN=Doe\, John,O="Acme, Inc.",C=xx"#);
        assert_eq!(name.len(), 3);
        assert_eq!(name.to_string(), r"CN=Doe\, John,O=Acme\, Inc.,C=xx");
        assert_eq!(dn(&name.to_string()), name);
        assert_eq!(name, dn("/C=xx/O=Acme, Inc./CN=Doe, John"));

        assert_eq!(dn(r"CN=Caf\C3\A9,C=xx").to_string(), "CN=Café,C=xx");

        let name = dn(r"CN=\#hash\ ,C=xx");
        assert_eq!(name.to_string(), r"CN=\#hash\ ,C=xx");
    }

    #[test]
    fn bad_names() {
        assert_eq!(
            DistinguishedName::from_openssl("C=xx").unwrap_err().kind(),
            DnErrorKind::MissingSlash
        );
        assert_eq!(
            DistinguishedName::from_openssl("/").unwrap_err().kind(),
            DnErrorKind::Empty
        );
        assert_eq!(
            DistinguishedName::from_openssl("/foo/C=xx")
                .unwrap_err().kind(),
            DnErrorKind::MissingType
        );
        assert_eq!(
            DistinguishedName::from_rfc2253("").unwrap_err().kind(),
            DnErrorKind::Empty
        );
        assert_eq!(
            DistinguishedName::from_rfc2253("CN").unwrap_err().kind(),
            DnErrorKind::MissingEquals
        );
        assert_eq!(
            DistinguishedName::from_rfc2253("CN=\"foo").unwrap_err().kind(),
            DnErrorKind::UnterminatedQuote
        );
        assert_eq!(
            DistinguishedName::from_rfc2253("CN=foo\\").unwrap_err().kind(),
            DnErrorKind::BadEscape
        );
    }
}
