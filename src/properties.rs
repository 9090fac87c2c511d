//! Reading `key = value` property files.
//!
//! Both trust anchor info files and the VO-CA-AP policy file use the
//! venerable Java properties syntax: comment lines start with `#` or `!`,
//! key and value are separated by the first unescaped `=`, `:`, or white
//! space, and a trailing backslash continues the logical line on the next
//! physical line.
//!
//! Unlike the Java original, the reader keeps every entry in file order,
//! including repeated keys, so that callers can reject duplicates.

use std::{error, fmt, fs, io};
use std::path::Path;


//------------ Properties ----------------------------------------------------

/// The entries of a property file in file order.
#[derive(Clone, Debug, Default)]
pub struct Properties {
    entries: Vec<Property>,
}

impl Properties {
    /// Reads and parses the file at the given path.
    ///
    /// The file is read in full before parsing starts.
    pub fn read(path: &Path) -> Result<Self, PropertiesError> {
        let content = fs::read_to_string(path).map_err(|err| {
            PropertiesError::Io(err)
        })?;
        Self::parse(&content)
    }

    /// Parses properties from a string.
    pub fn parse(content: &str) -> Result<Self, PropertiesError> {
        let mut entries = Vec::new();
        let mut lines = content.lines().enumerate();
        while let Some((idx, line)) = lines.next() {
            let line = trim_start(line);
            if line.is_empty() || line.starts_with('#') || line.starts_with('!')
            {
                continue
            }
            let mut logical = String::from(line);
            while ends_with_continuation(&logical) {
                logical.pop();
                match lines.next() {
                    Some((_, next)) => logical.push_str(trim_start(next)),
                    None => break
                }
            }
            entries.push(Property::from_logical_line(&logical, idx + 1)?);
        }
        Ok(Properties { entries })
    }

    /// Returns the value of the last entry with the given key.
    ///
    /// This mimics the behaviour of Java’s `Properties` class where later
    /// entries overwrite earlier ones.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().rev().find(|item| {
            item.key == key
        }).map(|item| item.value.as_str())
    }

    /// Returns an iterator over all entries in file order.
    pub fn iter(&self) -> std::slice::Iter<Property> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a Properties {
    type Item = &'a Property;
    type IntoIter = std::slice::Iter<'a, Property>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}


//------------ Property ------------------------------------------------------

/// A single entry of a property file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Property {
    /// The decoded key.
    pub key: String,

    /// The decoded value.
    pub value: String,

    /// The number of the line the entry starts on, starting at 1.
    pub line: usize,
}

impl Property {
    fn from_logical_line(
        line: &str, line_no: usize
    ) -> Result<Self, PropertiesError> {
        let mut key_end = line.len();
        let mut value_start = line.len();
        let mut escaped = false;
        let mut has_sep = false;
        for (pos, ch) in line.char_indices() {
            if escaped {
                escaped = false;
                continue
            }
            match ch {
                '\\' => escaped = true,
                '=' | ':' => {
                    key_end = pos;
                    value_start = pos + 1;
                    has_sep = true;
                    break
                }
                ' ' | '\t' | '\x0c' => {
                    key_end = pos;
                    value_start = pos + 1;
                    break
                }
                _ => { }
            }
        }

        // After white space, one = or : may still follow.
        let mut rest = trim_start(&line[value_start..]);
        if !has_sep {
            if let Some(stripped) = rest.strip_prefix(['=', ':']) {
                rest = trim_start(stripped);
            }
        }

        Ok(Property {
            key: unescape(&line[..key_end], line_no)?,
            value: unescape(rest, line_no)?,
            line: line_no,
        })
    }
}


//------------ Helpers -------------------------------------------------------

fn trim_start(s: &str) -> &str {
    s.trim_start_matches([' ', '\t', '\x0c'])
}

/// Returns whether a line ends in an odd number of backslashes.
fn ends_with_continuation(line: &str) -> bool {
    line.bytes().rev().take_while(|ch| *ch == b'\\').count() % 2 == 1
}

/// Decodes backslash escapes.
fn unescape(s: &str, line: usize) -> Result<String, PropertiesError> {
    let mut res = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            res.push(ch);
            continue
        }
        match chars.next() {
            Some('t') => res.push('\t'),
            Some('n') => res.push('\n'),
            Some('r') => res.push('\r'),
            Some('f') => res.push('\x0c'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let ch = u32::from_str_radix(&hex, 16).ok().filter(|_| {
                    hex.len() == 4
                }).and_then(char::from_u32).ok_or(
                    PropertiesError::BadUnicodeEscape { line }
                )?;
                res.push(ch)
            }
            Some(ch) => res.push(ch),
            None => { }
        }
    }
    Ok(res)
}


//------------ PropertiesError -----------------------------------------------

/// Reading a property file has failed.
#[derive(Debug)]
pub enum PropertiesError {
    /// Reading the file failed.
    Io(io::Error),

    /// A `\u` escape sequence was malformed.
    BadUnicodeEscape { line: usize },
}

impl fmt::Display for PropertiesError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            PropertiesError::Io(ref err) => err.fmt(f),
            PropertiesError::BadUnicodeEscape { line } => {
                write!(f, "line {}: malformed \\uXXXX escape", line)
            }
        }
    }
}

impl error::Error for PropertiesError { }


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;

    fn entries(content: &str) -> Vec<(String, String, usize)> {
        Properties::parse(content).unwrap().iter().map(|item| {
            (item.key.clone(), item.value.clone(), item.line)
        }).collect()
    }

    #[test]
    fn separators() {
        assert_eq!(
            entries("a=1\nb = 2\nc: 3\nd 4\n  e\t=\t5\nf\n"),
            vec![
                ("a".into(), "1".into(), 1),
                ("b".into(), "2".into(), 2),
                ("c".into(), "3".into(), 3),
                ("d".into(), "4".into(), 4),
                ("e".into(), "5".into(), 5),
                ("f".into(), "".into(), 6),
            ]
        );
    }

    #[test]
    fn comments_and_blank_lines() {
        assert_eq!(
            entries("# comment\n\n   ! also a comment\nkey = value\n"),
            vec![("key".into(), "value".into(), 4)]
        );
        assert!(Properties::parse("").unwrap().is_empty());
        assert!(Properties::parse("\n\n# nothing\n").unwrap().is_empty());
    }

    #[test]
    fn continuation_lines() {
        let props = Properties::parse(
            "subjectdn = \"/C=xx/CN=One\", \\\n    \"/C=xx/CN=Two\"\n\
             next = 1\n"
        ).unwrap();
        assert_eq!(
            props.get("subjectdn"),
            Some("\"/C=xx/CN=One\", \"/C=xx/CN=Two\"")
        );
        assert_eq!(props.iter().nth(1).unwrap().line, 3);

        // An even number of backslashes doesn’t continue.
        let props = Properties::parse("a = x\\\\\nb = y\n").unwrap();
        assert_eq!(props.get("a"), Some("x\\"));
        assert_eq!(props.get("b"), Some("y"));
    }

    #[test]
    fn escapes() {
        let props = Properties::parse(
            "\"-\" = file:a.info\nkey\\ with\\=sep = v\\u00e4l\\tue\n"
        ).unwrap();
        assert_eq!(props.get("\"-\""), Some("file:a.info"));
        assert_eq!(props.get("key with=sep"), Some("väl\tue"));
        assert!(matches!(
            Properties::parse("a = \\u00zz\n"),
            Err(PropertiesError::BadUnicodeEscape { line: 1 })
        ));
    }

    #[test]
    fn repeated_keys() {
        let props = Properties::parse("a = 1\na = 2\n").unwrap();
        assert_eq!(props.len(), 2);
        assert_eq!(props.get("a"), Some("2"));
    }
}
