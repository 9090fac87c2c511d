//! Authentication profiles and their info files.
//!
//! An authentication profile is a named group of certification
//! authorities that share an assurance level. Each profile is defined by
//! an info file that looks like this:
//!
//! ```text
//! alias = policy-igtf-classic
//! subjectdn = "/C=xx/O=Org/CN=First CA", \
//!     "/C=xx/O=Org/CN=Second CA"
//! ```
//!
//! The CA subjects are given in OpenSSL’s slash-separated order and are
//! converted into [`DistinguishedName`]s when the file is parsed.
//!
//! Parsing is hidden behind the [`ParseProfile`] trait so that both the
//! [repository][crate::repository] and the
//! [VO-CA-AP parser][crate::vocaap] can be handed an alternative
//! implementation.

use std::{error, fmt, fs, hash, io};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use log::debug;
use crate::dn::{DistinguishedName, DnError};
use crate::properties::{Properties, PropertiesError};


//------------ Configuration -------------------------------------------------

/// The key holding the profile’s alias.
const ALIAS_KEY: &str = "alias";

/// The key holding the list of CA subjects.
const SUBJECT_KEY: &str = "subjectdn";


//------------ AuthenticationProfile -----------------------------------------

/// A named set of trusted CA subjects.
///
/// Profiles are identified by their alias alone. Two profiles with the
/// same alias compare equal even if their subject sets differ.
#[derive(Clone, Debug)]
pub struct AuthenticationProfile {
    /// The alias of the profile.
    alias: String,

    /// The subjects of the CAs that are part of this profile.
    subjects: BTreeSet<DistinguishedName>,
}

impl AuthenticationProfile {
    /// Creates a new profile from an alias and a list of subjects.
    pub fn new(
        alias: impl Into<String>,
        subjects: impl IntoIterator<Item = DistinguishedName>,
    ) -> Self {
        AuthenticationProfile {
            alias: alias.into(),
            subjects: subjects.into_iter().collect(),
        }
    }

    /// Returns the alias of the profile.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Returns the set of CA subjects of the profile.
    pub fn subjects(&self) -> &BTreeSet<DistinguishedName> {
        &self.subjects
    }

    /// Returns whether the given CA subject is part of the profile.
    pub fn contains_subject(&self, subject: &DistinguishedName) -> bool {
        self.subjects.contains(subject)
    }
}


//--- PartialEq, Eq, PartialOrd, Ord, and Hash

impl PartialEq for AuthenticationProfile {
    fn eq(&self, other: &Self) -> bool {
        self.alias == other.alias
    }
}

impl Eq for AuthenticationProfile { }

impl PartialOrd for AuthenticationProfile {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AuthenticationProfile {
    fn cmp(&self, other: &Self) -> Ordering {
        self.alias.cmp(&other.alias)
    }
}

impl hash::Hash for AuthenticationProfile {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.alias.hash(state)
    }
}


//--- Display

impl fmt::Display for AuthenticationProfile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.alias)
    }
}


//------------ ParseProfile --------------------------------------------------

/// A type that can turn a file into an authentication profile.
pub trait ParseProfile: Send + Sync {
    /// Parses the profile file at `path`.
    fn parse(&self, path: &Path) -> Result<AuthenticationProfile, ProfileError>;
}


//------------ InfoFileParser ------------------------------------------------

/// The parser for standard info files.
#[derive(Clone, Copy, Debug, Default)]
pub struct InfoFileParser;

impl InfoFileParser {
    /// Creates a profile from already parsed properties.
    ///
    /// The `path` is only used in error messages.
    pub fn from_properties(
        props: &Properties, path: &Path,
    ) -> Result<AuthenticationProfile, ProfileError> {
        let alias = props.get(ALIAS_KEY).ok_or_else(|| {
            ProfileError::new(path, ProfileErrorKind::MissingKey(ALIAS_KEY))
        })?.trim();
        if alias.is_empty() {
            return Err(ProfileError::new(path, ProfileErrorKind::EmptyAlias))
        }
        let subjects = props.get(SUBJECT_KEY).ok_or_else(|| {
            ProfileError::new(path, ProfileErrorKind::MissingKey(SUBJECT_KEY))
        })?;
        let subjects = parse_subject_list(subjects).map_err(|kind| {
            ProfileError::new(path, kind)
        })?;
        if subjects.is_empty() {
            return Err(ProfileError::new(path, ProfileErrorKind::NoSubjects))
        }
        Ok(AuthenticationProfile::new(alias, subjects))
    }
}

impl ParseProfile for InfoFileParser {
    fn parse(
        &self, path: &Path
    ) -> Result<AuthenticationProfile, ProfileError> {
        match fs::metadata(path) {
            Ok(metadata) => {
                if !metadata.is_file() {
                    return Err(
                        ProfileError::new(path, ProfileErrorKind::NotAFile)
                    )
                }
            }
            Err(err) => {
                let kind = if err.kind() == io::ErrorKind::NotFound {
                    ProfileErrorKind::NotFound
                }
                else {
                    ProfileErrorKind::Io(err)
                };
                return Err(ProfileError::new(path, kind))
            }
        }
        let props = Properties::read(path).map_err(|err| {
            ProfileError::new(path, match err {
                PropertiesError::Io(err) => ProfileErrorKind::Io(err),
                err => ProfileErrorKind::Syntax(err),
            })
        })?;
        let res = Self::from_properties(&props, path)?;
        debug!(
            "Parsed profile '{}' with {} CA subjects from {}.",
            res.alias(), res.subjects().len(), path.display()
        );
        Ok(res)
    }
}


//------------ parse_subject_list --------------------------------------------

/// Parses the value of the `subjectdn` key.
///
/// The value is a comma-separated list of double-quoted DNs in OpenSSL
/// order. Commas within quotes don’t separate. Backslashes and quotes are
/// stripped from each token as is surrounding white space. Empty tokens
/// are skipped.
fn parse_subject_list(
    value: &str
) -> Result<Vec<DistinguishedName>, ProfileErrorKind> {
    let mut res = Vec::new();
    let mut token = String::new();
    let mut quoted = false;
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                match chars.next() {
                    Some('"') | None => { }
                    Some(ch) => token.push(ch),
                }
            }
            '"' => quoted = !quoted,
            ',' if !quoted => {
                push_subject(&mut res, &token)?;
                token.clear();
            }
            _ => token.push(ch)
        }
    }
    if quoted {
        return Err(ProfileErrorKind::MissingEndQuote)
    }
    push_subject(&mut res, &token)?;
    Ok(res)
}

fn push_subject(
    target: &mut Vec<DistinguishedName>, token: &str
) -> Result<(), ProfileErrorKind> {
    let token = token.trim();
    if !token.is_empty() {
        target.push(
            DistinguishedName::from_openssl(token).map_err(
                ProfileErrorKind::BadSubject
            )?
        );
    }
    Ok(())
}


//------------ ProfileError --------------------------------------------------

/// An info file could not be turned into a profile.
#[derive(Debug)]
pub struct ProfileError {
    path: PathBuf,
    kind: ProfileErrorKind,
}

/// What exactly went wrong with an info file.
#[derive(Debug)]
pub enum ProfileErrorKind {
    /// The file does not exist.
    NotFound,

    /// The path exists but is not a regular file.
    NotAFile,

    /// Reading the file failed.
    Io(io::Error),

    /// The property syntax was broken.
    Syntax(PropertiesError),

    /// A required key is missing.
    MissingKey(&'static str),

    /// The alias is empty.
    EmptyAlias,

    /// The list of CA subjects is empty.
    NoSubjects,

    /// A quoted CA subject lacks its closing quote.
    MissingEndQuote,

    /// A CA subject could not be parsed.
    BadSubject(DnError),
}

impl ProfileError {
    pub fn new(path: &Path, kind: ProfileErrorKind) -> Self {
        ProfileError { path: path.into(), kind }
    }

    /// Returns the path of the offending file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> &ProfileErrorKind {
        &self.kind
    }
}

impl fmt::Display for ProfileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: ", self.path.display())?;
        match self.kind {
            ProfileErrorKind::NotFound => f.write_str("no such file"),
            ProfileErrorKind::NotAFile => f.write_str("not a regular file"),
            ProfileErrorKind::Io(ref err) => err.fmt(f),
            ProfileErrorKind::Syntax(ref err) => err.fmt(f),
            ProfileErrorKind::MissingKey(key) => {
                write!(f, "missing required key '{}'", key)
            }
            ProfileErrorKind::EmptyAlias => f.write_str("empty alias"),
            ProfileErrorKind::NoSubjects => {
                f.write_str("no CA subjects listed")
            }
            ProfileErrorKind::MissingEndQuote => {
                write!(f, "missing end quote in '{}'", SUBJECT_KEY)
            }
            ProfileErrorKind::BadSubject(ref err) => err.fmt(f),
        }
    }
}

impl error::Error for ProfileError { }


//============ Tests =========================================================
