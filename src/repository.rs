//! The repository of authentication profiles.
//!
//! The repository is built by scanning the trust anchor directory for
//! info files matching a glob pattern, parsing each of them, and indexing
//! the resulting profiles by alias and by CA subject.
//!
//! A repository is immutable. If the directory changes, a new repository
//! is built via [`RepositoryBuilder`] and swapped in through a
//! [`Reloadable`][crate::reload::Reloadable].

use std::{error, fmt, fs, io};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use globset::{Glob, GlobMatcher};
use log::{debug, info};
use crate::dn::DistinguishedName;
use crate::profile::{AuthenticationProfile, ParseProfile, ProfileError};
use crate::reload::Build;


//------------ Configuration -------------------------------------------------

/// The default pattern for profile info files.
pub const DEFAULT_PATTERN: &str = "policy-*.info";

/// The suffix of info files.
pub const INFO_SUFFIX: &str = ".info";


//------------ ProfileRepository ---------------------------------------------

/// All authentication profiles from the trust anchor directory.
#[derive(Clone, Debug)]
pub struct ProfileRepository {
    /// The directory the profiles were loaded from.
    dir: PathBuf,

    /// The pattern used to select info files.
    pattern: String,

    /// The profiles keyed by their alias.
    by_alias: BTreeMap<String, Arc<AuthenticationProfile>>,

    /// The profiles containing a CA subject keyed by that subject.
    ///
    /// The profiles in each list are ordered by alias.
    by_subject: HashMap<DistinguishedName, Vec<Arc<AuthenticationProfile>>>,
}

impl ProfileRepository {
    /// Loads the repository from a directory.
    ///
    /// All regular files in `dir` whose name matches `pattern` are parsed
    /// with `parser`. Loading fails if any of them fails to parse, if no
    /// file matches, or if two files declare the same alias.
    pub fn load(
        dir: &Path,
        pattern: &str,
        parser: &dyn ParseProfile,
    ) -> Result<Self, RepositoryError> {
        if pattern.is_empty() {
            return Err(RepositoryError::EmptyPattern)
        }
        let matcher = Glob::new(pattern).map_err(|err| {
            RepositoryError::BadPattern {
                pattern: pattern.into(), err
            }
        })?.compile_matcher();

        let mut paths = Self::matching_files(dir, &matcher)?;
        if paths.is_empty() {
            return Err(RepositoryError::NoProfiles {
                dir: dir.into(), pattern: pattern.into()
            })
        }
        paths.sort();

        let mut by_alias = BTreeMap::new();
        let mut sources: HashMap<String, PathBuf> = HashMap::new();
        for path in paths {
            let profile = parser.parse(&path)?;
            if let Some(first) = sources.get(profile.alias()) {
                return Err(RepositoryError::DuplicateAlias {
                    alias: profile.alias().into(),
                    first: first.clone(),
                    second: path,
                })
            }
            sources.insert(profile.alias().into(), path);
            by_alias.insert(profile.alias().into(), Arc::new(profile));
        }

        // by_alias iterates in alias order, so the subject lists end up
        // sorted, too.
        let mut by_subject = HashMap::<_, Vec<_>>::new();
        for profile in by_alias.values() {
            for subject in profile.subjects() {
                by_subject.entry(
                    subject.clone()
                ).or_default().push(profile.clone());
            }
        }

        info!(
            "Loaded {} authentication profiles covering {} CA subjects \
             from {}.",
            by_alias.len(), by_subject.len(), dir.display()
        );
        Ok(ProfileRepository {
            dir: dir.into(),
            pattern: pattern.into(),
            by_alias,
            by_subject,
        })
    }

    /// Returns the regular files in `dir` whose name matches.
    fn matching_files(
        dir: &Path, matcher: &GlobMatcher
    ) -> Result<Vec<PathBuf>, RepositoryError> {
        match fs::metadata(dir) {
            Ok(metadata) => {
                if !metadata.is_dir() {
                    return Err(RepositoryError::NotADirectory(dir.into()))
                }
            }
            Err(err) => {
                return Err(RepositoryError::Dir { path: dir.into(), err })
            }
        }
        let entries = fs::read_dir(dir).map_err(|err| {
            RepositoryError::Dir { path: dir.into(), err }
        })?;

        let mut res = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| {
                RepositoryError::Dir { path: dir.into(), err }
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue
            }
            let name = entry.file_name();
            if !matcher.is_match(Path::new(&name)) {
                continue
            }
            debug!("Found info file {}.", path.display());
            res.push(path)
        }
        Ok(res)
    }

    /// Returns the profile with the given alias.
    pub fn find_by_alias(
        &self, alias: &str
    ) -> Option<&Arc<AuthenticationProfile>> {
        self.by_alias.get(alias)
    }

    /// Returns the profile defined by the info file with the given name.
    ///
    /// The alias is the file name without the `.info` suffix. Fails if
    /// the name doesn’t have that suffix.
    pub fn find_by_filename(
        &self, filename: &str
    ) -> Result<Option<&Arc<AuthenticationProfile>>, BadFilename> {
        let alias = filename.strip_suffix(INFO_SUFFIX).ok_or_else(|| {
            BadFilename(filename.into())
        })?;
        Ok(self.find_by_alias(alias))
    }

    /// Returns all profiles that contain the given CA subject.
    ///
    /// The profiles are ordered by alias. If the subject isn’t part of
    /// any profile, the slice is empty.
    pub fn find_for_subject(
        &self, subject: &DistinguishedName
    ) -> &[Arc<AuthenticationProfile>] {
        self.by_subject.get(subject).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns an iterator over all profiles in alias order.
    pub fn profiles(
        &self
    ) -> impl Iterator<Item = &Arc<AuthenticationProfile>> + '_ {
        self.by_alias.values()
    }

    /// Returns the number of profiles.
    pub fn len(&self) -> usize {
        self.by_alias.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_alias.is_empty()
    }

    /// Returns the directory the repository was loaded from.
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Returns the pattern used to select info files.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}


//------------ RepositoryBuilder ---------------------------------------------

/// Builds a repository from its configuration.
#[derive(Clone)]
pub struct RepositoryBuilder {
    dir: PathBuf,
    pattern: String,
    parser: Arc<dyn ParseProfile>,
}

impl RepositoryBuilder {
    pub fn new(
        dir: PathBuf, pattern: String, parser: Arc<dyn ParseProfile>
    ) -> Self {
        RepositoryBuilder { dir, pattern, parser }
    }
}

impl Build for RepositoryBuilder {
    type Output = ProfileRepository;
    type Error = RepositoryError;

    fn build(&self) -> Result<ProfileRepository, RepositoryError> {
        ProfileRepository::load(&self.dir, &self.pattern, &*self.parser)
    }

    fn describe(&self) -> String {
        format!("authentication profiles from {}", self.dir.display())
    }
}

impl fmt::Debug for RepositoryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RepositoryBuilder")
            .field("dir", &self.dir)
            .field("pattern", &self.pattern)
            .finish()
    }
}


//------------ RepositoryError -----------------------------------------------

/// Loading the repository failed.
#[derive(Debug)]
pub enum RepositoryError {
    /// The file pattern was empty.
    EmptyPattern,

    /// The file pattern was not a valid glob.
    BadPattern { pattern: String, err: globset::Error },

    /// The path exists but is not a directory.
    NotADirectory(PathBuf),

    /// The directory could not be read.
    Dir { path: PathBuf, err: io::Error },

    /// No file in the directory matched the pattern.
    NoProfiles { dir: PathBuf, pattern: String },

    /// An info file could not be parsed.
    Profile(ProfileError),

    /// Two info files declared the same alias.
    DuplicateAlias { alias: String, first: PathBuf, second: PathBuf },
}

impl From<ProfileError> for RepositoryError {
    fn from(err: ProfileError) -> Self {
        RepositoryError::Profile(err)
    }
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            RepositoryError::EmptyPattern => {
                f.write_str("empty info file pattern")
            }
            RepositoryError::BadPattern { ref pattern, ref err } => {
                write!(f, "invalid info file pattern '{}': {}", pattern, err)
            }
            RepositoryError::NotADirectory(ref path) => {
                write!(f, "{}: not a directory", path.display())
            }
            RepositoryError::Dir { ref path, ref err } => {
                write!(f, "{}: {}", path.display(), err)
            }
            RepositoryError::NoProfiles { ref dir, ref pattern } => {
                write!(
                    f, "{}: no files matching '{}'", dir.display(), pattern
                )
            }
            RepositoryError::Profile(ref err) => err.fmt(f),
            RepositoryError::DuplicateAlias {
                ref alias, ref first, ref second
            } => {
                write!(
                    f, "alias '{}' declared in both {} and {}",
                    alias, first.display(), second.display()
                )
            }
        }
    }
}

impl error::Error for RepositoryError { }


//------------ BadFilename ---------------------------------------------------

/// A file name lacked the `.info` suffix.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BadFilename(pub String);

impl fmt::Display for BadFilename {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "'{}' does not end in '{}'", self.0, INFO_SUFFIX)
    }
}

impl error::Error for BadFilename { }


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use std::str::FromStr;
    use crate::profile::{InfoFileParser, ProfileErrorKind};

    const CERN: &str =
        "/DC=ch/DC=cern/CN=CERN Grid Certification Authority";
    const NIKHEF: &str =
        "/C=NL/O=NIKHEF/CN=NIKHEF medium-security certification auth";
    const SLCS: &str = "/C=xx/O=Example/CN=Example SLCS CA";

    fn fixtures() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("test/profiles")
    }

    fn dn(s: &str) -> DistinguishedName {
        DistinguishedName::from_str(s).unwrap()
    }

    fn load_fixtures() -> ProfileRepository {
        ProfileRepository::load(
            &fixtures(), DEFAULT_PATTERN, &InfoFileParser
        ).unwrap()
    }

    fn write_info(dir: &Path, name: &str, alias: &str, subjects: &[&str]) {
        let subjects: Vec<_> = subjects.iter().map(|s| {
            format!("\"{}\"", s)
        }).collect();
        fs::write(
            dir.join(name),
            format!("alias = {}\nsubjectdn = {}\n", alias, subjects.join(", "))
        ).unwrap();
    }

    #[test]
    fn load_directory() {
        let repo = load_fixtures();
        assert_eq!(repo.len(), 3);
        assert_eq!(
            repo.profiles().map(|p| p.alias()).collect::<Vec<_>>(),
            vec!["policy-igtf-classic", "policy-igtf-mics", "policy-igtf-slcs"]
        );
        assert_eq!(repo.pattern(), DEFAULT_PATTERN);
        assert_eq!(repo.directory(), fixtures());

        // Example-GridCA.info doesn’t match the pattern.
        assert!(repo.find_by_alias("Example-GridCA").is_none());
    }

    #[test]
    fn lookups() {
        let repo = load_fixtures();
        let classic = repo.find_by_alias("policy-igtf-classic").unwrap();
        assert_eq!(classic.subjects().len(), 3);
        assert!(classic.contains_subject(&dn(NIKHEF)));
        assert_eq!(
            repo.find_by_filename("policy-igtf-slcs.info").unwrap()
                .unwrap().alias(),
            "policy-igtf-slcs"
        );
        assert!(repo.find_by_filename("policy-igtf-none.info")
            .unwrap().is_none());
        assert_eq!(
            repo.find_by_filename("policy-igtf-slcs").unwrap_err(),
            BadFilename("policy-igtf-slcs".into())
        );

        assert_eq!(
            repo.find_for_subject(&dn(CERN)).iter().map(|p| {
                p.alias()
            }).collect::<Vec<_>>(),
            vec!["policy-igtf-classic", "policy-igtf-mics"]
        );
        assert_eq!(
            repo.find_for_subject(&dn(SLCS)).iter().map(|p| {
                p.alias()
            }).collect::<Vec<_>>(),
            vec!["policy-igtf-slcs"]
        );
        assert!(
            repo.find_for_subject(&dn("/C=xx/CN=Unknown")).is_empty()
        );

        // Different spellings of the same subject find the same profiles.
        assert_eq!(
            repo.find_for_subject(&dn(
                "CN=CERN Grid Certification Authority,DC=cern,DC=ch"
            )).len(),
            2
        );
    }

    #[test]
    fn subject_index_is_inverse() {
        let repo = load_fixtures();
        for profile in repo.profiles() {
            for subject in profile.subjects() {
                assert!(repo.find_for_subject(subject).contains(profile));
            }
        }
        let mut count = 0;
        for (subject, profiles) in &repo.by_subject {
            for profile in profiles {
                assert!(profile.contains_subject(subject));
                count += 1;
            }
        }
        assert_eq!(
            count,
            repo.profiles().map(|p| p.subjects().len()).sum::<usize>()
        );
    }

    #[test]
    fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        write_info(
            dir.path(), "policy-test.info", "policy-test",
            &["/C=xx/O=Test/CN=Test CA", "/C=xx/O=Test/CN=Other CA"]
        );
        let repo = ProfileRepository::load(
            dir.path(), DEFAULT_PATTERN, &InfoFileParser
        ).unwrap();
        let profile = repo.find_by_alias("policy-test").unwrap();
        assert_eq!(
            profile.subjects().iter().map(ToString::to_string)
                .collect::<Vec<_>>(),
            vec!["CN=Other CA,O=Test,C=xx", "CN=Test CA,O=Test,C=xx"]
        );
    }

    #[test]
    fn custom_pattern() {
        let repo = ProfileRepository::load(
            &fixtures(), "*.info", &InfoFileParser
        ).unwrap();
        assert_eq!(repo.len(), 4);
        assert!(repo.find_by_alias("Example-GridCA").is_some());

        // Example Grid CA is in two profiles now.
        assert_eq!(
            repo.find_for_subject(&dn(
                "/C=xx/O=Example/CN=Example Grid CA, Second Edition"
            )).len(),
            2
        );
    }

    #[test]
    fn load_failures() {
        assert!(matches!(
            ProfileRepository::load(&fixtures(), "", &InfoFileParser),
            Err(RepositoryError::EmptyPattern)
        ));
        assert!(matches!(
            ProfileRepository::load(&fixtures(), "policy-[.info", &InfoFileParser),
            Err(RepositoryError::BadPattern { .. })
        ));
        assert!(matches!(
            ProfileRepository::load(
                &fixtures(), "nothing-*.info", &InfoFileParser
            ),
            Err(RepositoryError::NoProfiles { .. })
        ));
        assert!(matches!(
            ProfileRepository::load(
                &fixtures().join("does-not-exist"), DEFAULT_PATTERN,
                &InfoFileParser
            ),
            Err(RepositoryError::Dir { .. })
        ));
        assert!(matches!(
            ProfileRepository::load(
                &fixtures().join("policy-igtf-slcs.info"), DEFAULT_PATTERN,
                &InfoFileParser
            ),
            Err(RepositoryError::NotADirectory(_))
        ));
    }

    #[test]
    fn broken_file_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        write_info(dir.path(), "policy-good.info", "policy-good", &[SLCS]);
        fs::write(
            dir.path().join("policy-bad.info"), "subjectdn = \"/C=xx/CN=X\"\n"
        ).unwrap();
        match ProfileRepository::load(
            dir.path(), DEFAULT_PATTERN, &InfoFileParser
        ) {
            Err(RepositoryError::Profile(err)) => {
                assert!(matches!(
                    err.kind(), ProfileErrorKind::MissingKey("alias")
                ));
                assert_eq!(err.path(), dir.path().join("policy-bad.info"));
            }
            res => panic!("unexpected result {:?}", res)
        }
    }

    #[test]
    fn duplicate_alias() {
        let dir = tempfile::tempdir().unwrap();
        write_info(dir.path(), "policy-a.info", "policy-same", &[SLCS]);
        write_info(dir.path(), "policy-b.info", "policy-same", &[CERN]);
        match ProfileRepository::load(
            dir.path(), DEFAULT_PATTERN, &InfoFileParser
        ) {
            Err(RepositoryError::DuplicateAlias { alias, first, second }) => {
                assert_eq!(alias, "policy-same");
                assert_eq!(first, dir.path().join("policy-a.info"));
                assert_eq!(second, dir.path().join("policy-b.info"));
            }
            res => panic!("unexpected result {:?}", res)
        }
    }

    #[test]
    fn directories_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_info(dir.path(), "policy-a.info", "policy-a", &[SLCS]);
        fs::create_dir(dir.path().join("policy-dir.info")).unwrap();
        let repo = ProfileRepository::load(
            dir.path(), DEFAULT_PATTERN, &InfoFileParser
        ).unwrap();
        assert_eq!(repo.len(), 1);
    }

    #[test]
    fn builder() {
        let builder = RepositoryBuilder::new(
            fixtures(), DEFAULT_PATTERN.into(), Arc::new(InfoFileParser)
        );
        assert_eq!(builder.build().unwrap().len(), 3);
        assert!(builder.describe().contains("test/profiles"));
    }
}
