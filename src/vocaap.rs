//! Parsing the VO-CA-AP policy file.
//!
//! The VO-CA-AP file assigns lists of authentication profiles to VOs. It
//! uses property file syntax with one rule per key:
//!
//! ```text
//! "-" = file:policy-igtf-classic.info
//! /atlas = file:policy-igtf-classic.info, file:policy-igtf-mics.info
//! /* = file:policy-igtf-classic.info,file:policy-igtf-slcs.info
//! ```
//!
//! The key `"-"`, including the quotes, selects the policy for requests
//! that don’t assert a VO, `/*` selects the policy for all VOs without a
//! rule of their own, and `/name` selects the policy for VO `name`.
//!
//! Each value token names an info file in the trust anchor directory. The
//! files are parsed with the same [`ParseProfile`] implementation used by
//! the repository.

use std::{error, fmt, io};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use log::{debug, info};
use regex::Regex;
use crate::policy::{DuplicateTarget, PolicySet, PolicyTarget, ProfilePolicy};
use crate::profile::{AuthenticationProfile, ParseProfile, ProfileError};
use crate::properties::{Properties, PropertiesError};
use crate::reload::Build;
use crate::repository::INFO_SUFFIX;


//------------ Configuration -------------------------------------------------

/// The key for the policy applying to requests without a VO.
const ANY_CERTIFICATE_KEY: &str = "\"-\"";

/// The key for the policy applying to VOs without their own rule.
const ANY_VO_KEY: &str = "/*";

/// The prefix of a value token.
const FILE_PREFIX: &str = "file:";

/// Returns the pattern VO keys have to match.
///
/// VO names are restricted to ASCII word characters, dots, and dashes.
fn vo_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^/(?-u:\w)(?-u:[\w.-])+$"
        ).expect("invalid VO key pattern")
    })
}


//------------ VoCaApParser --------------------------------------------------

/// The parser for a VO-CA-AP file.
#[derive(Clone)]
pub struct VoCaApParser {
    /// The path of the VO-CA-AP file.
    path: PathBuf,

    /// The directory info files are resolved against.
    ca_dir: PathBuf,

    /// The parser for the info files.
    parser: Arc<dyn ParseProfile>,
}

impl VoCaApParser {
    pub fn new(
        path: PathBuf, ca_dir: PathBuf, parser: Arc<dyn ParseProfile>
    ) -> Self {
        VoCaApParser { path, ca_dir, parser }
    }

    /// Reads and parses the VO-CA-AP file.
    pub fn parse(&self) -> Result<PolicySet, PolicyError> {
        let props = Properties::read(&self.path).map_err(|err| {
            self.error(None, match err {
                PropertiesError::Io(err) => PolicyErrorKind::Io(err),
                err => PolicyErrorKind::Syntax(err),
            })
        })?;
        let res = self.parse_properties(&props)?;
        info!(
            "Loaded {} VO policies from {}{}{}.",
            res.vo_policy_count(), self.path.display(),
            if res.any_vo_policy().is_some() { ", any-VO policy" }
            else { "" },
            if res.any_certificate_policy().is_some() {
                ", any-certificate policy"
            }
            else { "" },
        );
        Ok(res)
    }

    /// Creates a policy set from already parsed properties.
    pub fn parse_properties(
        &self, props: &Properties
    ) -> Result<PolicySet, PolicyError> {
        let mut profiles = HashMap::new();
        let mut rules = Vec::with_capacity(props.len());
        let mut lines = Vec::with_capacity(props.len());
        for item in props {
            let target = parse_key(&item.key).ok_or_else(|| {
                self.error(
                    Some(item.line), PolicyErrorKind::BadKey(item.key.clone())
                )
            })?;
            let policy = self.parse_value(&item.value, &mut profiles).map_err(
                |kind| self.error(Some(item.line), kind)
            )?;
            debug!("Policy for {}: {}", target, policy);
            rules.push((target, policy));
            lines.push(item.line);
        }
        PolicySet::from_rules(rules).map_err(|err| {
            let line = lines.get(err.index).copied();
            self.error(line, PolicyErrorKind::DuplicateTarget(err))
        })
    }

    /// Parses the value of a rule into a policy.
    ///
    /// Profiles already parsed for earlier rules are taken from
    /// `profiles`.
    fn parse_value(
        &self,
        value: &str,
        profiles: &mut HashMap<String, Arc<AuthenticationProfile>>,
    ) -> Result<ProfilePolicy, PolicyErrorKind> {
        let mut res = Vec::new();
        for token in value.split(',').map(str::trim) {
            if token.is_empty() {
                continue
            }
            let name = parse_token(token).ok_or_else(|| {
                PolicyErrorKind::BadToken(token.into())
            })?;
            let profile = match profiles.get(name) {
                Some(profile) => profile.clone(),
                None => {
                    let profile = Arc::new(
                        self.parser.parse(&self.ca_dir.join(name)).map_err(
                            PolicyErrorKind::Profile
                        )?
                    );
                    profiles.insert(name.into(), profile.clone());
                    profile
                }
            };
            res.push(profile)
        }
        if res.is_empty() {
            return Err(PolicyErrorKind::EmptyValue)
        }
        Ok(ProfilePolicy::new(res))
    }

    fn error(&self, line: Option<usize>, kind: PolicyErrorKind) -> PolicyError {
        PolicyError { path: self.path.clone(), line, kind }
    }
}

impl Build for VoCaApParser {
    type Output = PolicySet;
    type Error = PolicyError;

    fn build(&self) -> Result<PolicySet, PolicyError> {
        self.parse()
    }

    fn describe(&self) -> String {
        format!("VO-CA-AP policies from {}", self.path.display())
    }
}

impl fmt::Debug for VoCaApParser {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("VoCaApParser")
            .field("path", &self.path)
            .field("ca_dir", &self.ca_dir)
            .finish()
    }
}


//------------ Helpers -------------------------------------------------------

/// Converts a key into a policy target.
fn parse_key(key: &str) -> Option<PolicyTarget> {
    if key == ANY_CERTIFICATE_KEY {
        Some(PolicyTarget::AnyCertificate)
    }
    else if key == ANY_VO_KEY {
        Some(PolicyTarget::AnyVo)
    }
    else if vo_key_pattern().is_match(key) {
        Some(PolicyTarget::Vo(key[1..].into()))
    }
    else {
        None
    }
}

/// Returns the file name of a `file:` token.
fn parse_token(token: &str) -> Option<&str> {
    let name = token.strip_prefix(FILE_PREFIX)?;
    let alias = name.strip_suffix(INFO_SUFFIX)?;
    if alias.is_empty() || name.contains(['/', '\\']) {
        return None
    }
    Some(name)
}


//------------ PolicyError ---------------------------------------------------

/// The VO-CA-AP file could not be turned into a policy set.
#[derive(Debug)]
pub struct PolicyError {
    path: PathBuf,
    line: Option<usize>,
    kind: PolicyErrorKind,
}

/// What exactly went wrong with a VO-CA-AP file.
#[derive(Debug)]
pub enum PolicyErrorKind {
    /// Reading the file failed.
    Io(io::Error),

    /// The property syntax was broken.
    Syntax(PropertiesError),

    /// A key was neither `"-"`, `/*`, nor a valid VO name.
    BadKey(String),

    /// A target appeared more than once.
    DuplicateTarget(DuplicateTarget),

    /// A rule had no value tokens.
    EmptyValue,

    /// A value token was not of the form `file:<name>.info`.
    BadToken(String),

    /// A referenced info file could not be parsed.
    Profile(ProfileError),
}

impl PolicyError {
    /// Returns the line of the offending rule if known.
    pub fn line(&self) -> Option<usize> {
        self.line
    }

    pub fn kind(&self) -> &PolicyErrorKind {
        &self.kind
    }
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}: ", self.path.display(), line)?,
            None => write!(f, "{}: ", self.path.display())?,
        }
        match self.kind {
            PolicyErrorKind::Io(ref err) => err.fmt(f),
            PolicyErrorKind::Syntax(ref err) => err.fmt(f),
            PolicyErrorKind::BadKey(ref key) => {
                write!(f, "unsupported key '{}'", key)
            }
            PolicyErrorKind::DuplicateTarget(ref err) => err.fmt(f),
            PolicyErrorKind::EmptyValue => f.write_str("empty rule"),
            PolicyErrorKind::BadToken(ref token) => {
                write!(
                    f, "invalid token '{}', expected '{}<name>{}'",
                    token, FILE_PREFIX, INFO_SUFFIX
                )
            }
            PolicyErrorKind::Profile(ref err) => err.fmt(f),
        }
    }
}

impl error::Error for PolicyError { }


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;
    use crate::profile::{InfoFileParser, ProfileErrorKind};

    fn root() -> &'static Path {
        Path::new(env!("CARGO_MANIFEST_DIR"))
    }

    fn fixture_parser(name: &str) -> VoCaApParser {
        VoCaApParser::new(
            root().join("test/vo-ca-ap").join(name),
            root().join("test/profiles"),
            Arc::new(InfoFileParser)
        )
    }

    fn parse_str(content: &str) -> Result<PolicySet, PolicyError> {
        fixture_parser("inline.conf").parse_properties(
            &Properties::parse(content).unwrap()
        )
    }

    fn aliases(policy: &ProfilePolicy) -> Vec<&str> {
        policy.profiles().iter().map(|p| p.alias()).collect()
    }

    #[test]
    fn keys() {
        assert_eq!(parse_key("\"-\""), Some(PolicyTarget::AnyCertificate));
        assert_eq!(parse_key("/*"), Some(PolicyTarget::AnyVo));
        assert_eq!(parse_key("/atlas"), Some(PolicyTarget::Vo("atlas".into())));
        assert_eq!(
            parse_key("/vo.example-org"),
            Some(PolicyTarget::Vo("vo.example-org".into()))
        );
        assert_eq!(parse_key("-"), None);
        assert_eq!(parse_key("atlas"), None);
        assert_eq!(parse_key("/a"), None);
        assert_eq!(parse_key("/.atlas"), None);
        assert_eq!(parse_key("/at/las"), None);
        assert_eq!(parse_key("/**"), None);
        assert_eq!(parse_key("/atlasé"), None);
        assert_eq!(parse_key("/ätlas"), None);
        assert_eq!(
            parse_key("/at_las2"), Some(PolicyTarget::Vo("at_las2".into()))
        );
    }

    #[test]
    fn non_ascii_vo_key() {
        let err = parse_str("/atlasé = file:policy-igtf-classic.info\n")
            .unwrap_err();
        assert!(matches!(err.kind(), PolicyErrorKind::BadKey(_)));
    }

    #[test]
    fn tokens() {
        assert_eq!(parse_token("file:policy-a.info"), Some("policy-a.info"));
        assert_eq!(parse_token("policy-a.info"), None);
        assert_eq!(parse_token("file:policy-a"), None);
        assert_eq!(parse_token("file:.info"), None);
        assert_eq!(parse_token("file:../policy-a.info"), None);
        assert_eq!(parse_token("file:/etc/policy-a.info"), None);
    }

    #[test]
    fn empty_file() {
        let set = fixture_parser("empty.conf").parse().unwrap();
        assert_eq!(set.vo_policy_count(), 0);
        assert!(set.any_vo_policy().is_none());
        assert!(set.any_certificate_policy().is_none());
    }

    #[test]
    fn full_file() {
        let set = fixture_parser("full.conf").parse().unwrap();
        assert_eq!(
            aliases(set.any_certificate_policy().unwrap()),
            vec!["policy-igtf-classic"]
        );
        assert_eq!(
            aliases(set.vo_policy("atlas").unwrap()),
            vec!["policy-igtf-classic", "policy-igtf-mics"]
        );
        assert_eq!(
            aliases(set.vo_policy("dteam").unwrap()),
            vec!["policy-igtf-slcs"]
        );
        assert_eq!(
            aliases(set.any_vo_policy().unwrap()),
            vec!["policy-igtf-classic", "policy-igtf-slcs"]
        );
        assert!(set.vo_policy("cms").is_none());

        // The classic profile is parsed once and shared.
        assert!(Arc::ptr_eq(
            &set.any_certificate_policy().unwrap().profiles()[0],
            &set.vo_policy("atlas").unwrap().profiles()[0],
        ));
    }

    #[test]
    fn duplicate_any_certificate() {
        let err = fixture_parser("duplicate-any-cert.conf").parse()
            .unwrap_err();
        assert_eq!(err.line(), Some(3));
        assert!(matches!(
            err.kind(),
            PolicyErrorKind::DuplicateTarget(DuplicateTarget {
                target: PolicyTarget::AnyCertificate, ..
            })
        ));
    }

    #[test]
    fn duplicate_keys() {
        let err = parse_str(
            "/* = file:policy-igtf-classic.info\n\
             /* = file:policy-igtf-slcs.info\n"
        ).unwrap_err();
        assert_eq!(err.line(), Some(2));
        assert!(matches!(
            err.kind(),
            PolicyErrorKind::DuplicateTarget(DuplicateTarget {
                target: PolicyTarget::AnyVo, ..
            })
        ));

        let err = parse_str(
            "/atlas = file:policy-igtf-classic.info\n\
             /dteam = file:policy-igtf-slcs.info\n\
             /atlas = file:policy-igtf-slcs.info\n"
        ).unwrap_err();
        assert_eq!(err.line(), Some(3));
    }

    #[test]
    fn bad_rules() {
        let err = parse_str("atlas = file:policy-igtf-classic.info\n")
            .unwrap_err();
        assert!(matches!(err.kind(), PolicyErrorKind::BadKey(_)));
        assert_eq!(err.line(), Some(1));

        let err = parse_str(
            "# comment\n/atlas = policy-igtf-classic.info\n"
        ).unwrap_err();
        assert!(matches!(err.kind(), PolicyErrorKind::BadToken(_)));
        assert_eq!(err.line(), Some(2));

        let err = parse_str("/atlas =\n").unwrap_err();
        assert!(matches!(err.kind(), PolicyErrorKind::EmptyValue));

        let err = parse_str("/atlas = file:policy-igtf-none.info\n")
            .unwrap_err();
        match err.kind() {
            PolicyErrorKind::Profile(err) => {
                assert!(matches!(err.kind(), ProfileErrorKind::NotFound))
            }
            kind => panic!("unexpected error {:?}", kind)
        }
    }

    #[test]
    fn missing_file() {
        let err = fixture_parser("does-not-exist.conf").parse().unwrap_err();
        assert!(matches!(err.kind(), PolicyErrorKind::Io(_)));
        assert_eq!(err.line(), None);
    }

    #[test]
    fn display_reparses() {
        let set = fixture_parser("full.conf").parse().unwrap();
        let again = parse_str(&set.to_string()).unwrap();
        assert_eq!(set.to_string(), again.to_string());
    }

    #[test]
    fn build_from_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("policy-a.info"),
            "alias = policy-a\nsubjectdn = \"/C=xx/CN=A\"\n"
        ).unwrap();
        let path = dir.path().join("vo-ca-ap");
        fs::write(&path, "\"-\" = file:policy-a.info\n").unwrap();
        let parser = VoCaApParser::new(
            path, dir.path().into(), Arc::new(InfoFileParser)
        );
        let set = parser.build().unwrap();
        assert!(
            set.any_certificate_policy().unwrap().supports_alias("policy-a")
        );
        assert!(parser.describe().contains("vo-ca-ap"));
    }
}
