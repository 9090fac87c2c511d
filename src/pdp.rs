//! The policy decision point.
//!
//! The [`ProfilePdp`] decides whether a CA is acceptable, either for a
//! request that doesn’t assert a VO or for a request on behalf of a
//! specific VO. It combines a snapshot of the profile repository with a
//! snapshot of the policy set.
//!
//! The [`SharedPdp`] keeps both parts in reloadable holders and hands out
//! fresh decision points for each request.

use std::{error, fmt};
use std::sync::Arc;
use log::{debug, warn};
use crate::config::Config;
use crate::dn::DistinguishedName;
use crate::policy::{PolicySet, ProfilePolicy};
use crate::profile::{AuthenticationProfile, InfoFileParser, ParseProfile};
use crate::reload::Reloadable;
use crate::repository::{
    ProfileRepository, RepositoryBuilder, RepositoryError
};
use crate::vocaap::{PolicyError, VoCaApParser};


//------------ Decision ------------------------------------------------------

/// The outcome of a policy decision.
#[derive(Clone, Debug)]
pub struct Decision {
    /// The CA subject the decision is about.
    principal: DistinguishedName,

    /// The profile that allowed the CA, if it was allowed.
    profile: Option<Arc<AuthenticationProfile>>,
}

impl Decision {
    /// Creates a decision allowing the CA because of `profile`.
    pub fn allow(
        principal: DistinguishedName, profile: Arc<AuthenticationProfile>
    ) -> Self {
        Decision { principal, profile: Some(profile) }
    }

    /// Creates a decision denying the CA.
    pub fn deny(principal: DistinguishedName) -> Self {
        Decision { principal, profile: None }
    }

    pub fn principal(&self) -> &DistinguishedName {
        &self.principal
    }

    /// Returns the profile that allowed the CA.
    ///
    /// Returns `None` if the CA was denied.
    pub fn profile(&self) -> Option<&Arc<AuthenticationProfile>> {
        self.profile.as_ref()
    }

    pub fn is_allowed(&self) -> bool {
        self.profile.is_some()
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.profile {
            Some(ref profile) => {
                write!(f, "allow {} ({})", self.principal, profile)
            }
            None => write!(f, "deny {}", self.principal),
        }
    }
}


//------------ ProfilePdp ----------------------------------------------------

/// Decides on CAs based on a repository and a policy set.
#[derive(Clone, Debug)]
pub struct ProfilePdp {
    repository: Arc<ProfileRepository>,
    policies: Arc<PolicySet>,
}

impl ProfilePdp {
    pub fn new(
        repository: Arc<ProfileRepository>, policies: Arc<PolicySet>
    ) -> Self {
        ProfilePdp { repository, policies }
    }

    pub fn repository(&self) -> &ProfileRepository {
        &self.repository
    }

    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    /// Decides on a CA for a request without a VO.
    ///
    /// Only the any-certificate policy is considered. If there is none,
    /// the CA is denied. If the CA isn’t part of any profile at all, a
    /// trust error is returned instead of a decision.
    pub fn is_ca_allowed(
        &self, principal: &DistinguishedName
    ) -> Result<Decision, TrustError> {
        let candidates = self.candidates(principal)?;
        let res = Self::evaluate(
            principal, candidates, self.policies.any_certificate_policy()
        );
        debug!("No VO: {}", res);
        Ok(res)
    }

    /// Decides on a CA for a request on behalf of `vo`.
    ///
    /// If the VO has its own policy and that policy allows the CA, it is
    /// allowed. Otherwise the any-VO policy decides. If there is none,
    /// the CA is denied.
    pub fn is_ca_allowed_for_vo(
        &self, principal: &DistinguishedName, vo: &str,
    ) -> Result<Decision, TrustError> {
        let candidates = self.candidates(principal)?;
        if let Some(policy) = self.policies.vo_policy(vo) {
            if let Some(profile) = policy.supports_at_least_one(candidates) {
                let res = Decision::allow(principal.clone(), profile.clone());
                debug!("VO {}: {}", vo, res);
                return Ok(res)
            }
        }
        let res = Self::evaluate(
            principal, candidates, self.policies.any_vo_policy()
        );
        debug!("VO {}: {}", vo, res);
        Ok(res)
    }

    /// Decides on a CA for a request with or without a VO.
    pub fn decide(
        &self, principal: &DistinguishedName, vo: Option<&str>
    ) -> Result<Decision, TrustError> {
        match vo {
            Some(vo) => self.is_ca_allowed_for_vo(principal, vo),
            None => self.is_ca_allowed(principal),
        }
    }

    /// Returns the profiles of a CA or a trust error if there are none.
    fn candidates(
        &self, principal: &DistinguishedName
    ) -> Result<&[Arc<AuthenticationProfile>], TrustError> {
        let res = self.repository.find_for_subject(principal);
        if res.is_empty() {
            let err = TrustError { principal: principal.clone() };
            warn!("{}", err);
            Err(err)
        }
        else {
            Ok(res)
        }
    }

    fn evaluate(
        principal: &DistinguishedName,
        candidates: &[Arc<AuthenticationProfile>],
        policy: Option<&ProfilePolicy>,
    ) -> Decision {
        match policy.and_then(|policy| {
            policy.supports_at_least_one(candidates)
        }) {
            Some(profile) => Decision::allow(principal.clone(), profile.clone()),
            None => Decision::deny(principal.clone()),
        }
    }
}


//------------ SharedPdp -----------------------------------------------------

/// The reloadable state behind the decision point.
#[derive(Debug)]
pub struct SharedPdp {
    repository: Reloadable<RepositoryBuilder>,
    policies: Reloadable<VoCaApParser>,
}

impl SharedPdp {
    /// Creates the shared state from its two holders.
    pub fn new(
        repository: Reloadable<RepositoryBuilder>,
        policies: Reloadable<VoCaApParser>,
    ) -> Self {
        SharedPdp { repository, policies }
    }

    /// Loads the repository and policies as configured.
    ///
    /// Info files are parsed with `parser`.
    pub fn load(
        config: &Config, parser: Arc<dyn ParseProfile>
    ) -> Result<Self, LoadError> {
        let repository = Reloadable::new(RepositoryBuilder::new(
            config.ca_dir.clone(), config.info_pattern.clone(),
            parser.clone(),
        ))?;
        let policies = Reloadable::new(VoCaApParser::new(
            config.vo_ca_ap_file.clone(), config.ca_dir.clone(), parser
        ))?;
        Ok(Self::new(repository, policies))
    }

    /// Loads the repository and policies using standard info files.
    pub fn from_config(config: &Config) -> Result<Self, LoadError> {
        Self::load(config, Arc::new(InfoFileParser))
    }

    /// Returns a decision point using the current snapshots.
    pub fn pdp(&self) -> ProfilePdp {
        ProfilePdp::new(self.repository.get(), self.policies.get())
    }

    /// Reloads both the repository and the policies.
    ///
    /// Each part is only replaced if reloading it succeeds. The first
    /// error is returned.
    pub fn reload(&self) -> Result<(), LoadError> {
        let repository = self.repository.reload();
        let policies = self.policies.reload();
        repository?;
        policies?;
        Ok(())
    }
}


//------------ TrustError ----------------------------------------------------

/// A CA is not part of any known authentication profile.
#[derive(Clone, Debug)]
pub struct TrustError {
    principal: DistinguishedName,
}

impl TrustError {
    pub fn principal(&self) -> &DistinguishedName {
        &self.principal
    }
}

impl fmt::Display for TrustError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f, "CA '{}' is not part of any authentication profile",
            self.principal
        )
    }
}

impl error::Error for TrustError { }


//------------ LoadError -----------------------------------------------------

/// Loading the repository or the policies failed.
#[derive(Debug)]
pub enum LoadError {
    Repository(RepositoryError),
    Policy(PolicyError),
}

impl From<RepositoryError> for LoadError {
    fn from(err: RepositoryError) -> Self {
        LoadError::Repository(err)
    }
}

impl From<PolicyError> for LoadError {
    fn from(err: PolicyError) -> Self {
        LoadError::Policy(err)
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            LoadError::Repository(ref err) => err.fmt(f),
            LoadError::Policy(ref err) => err.fmt(f),
        }
    }
}

impl error::Error for LoadError { }


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;
    use std::path::Path;
    use std::str::FromStr;
    use crate::policy::PolicyTarget;

    const A: &str = "/C=xx/O=Test/CN=CA A";
    const B: &str = "/C=xx/O=Test/CN=CA B";
    const C: &str = "/C=xx/O=Test/CN=CA C";

    fn dn(s: &str) -> DistinguishedName {
        DistinguishedName::from_str(s).unwrap()
    }

    fn write_info(dir: &Path, alias: &str, subjects: &[&str]) {
        let subjects: Vec<_> = subjects.iter().map(|s| {
            format!("\"{}\"", s)
        }).collect();
        fs::write(
            dir.join(format!("{}.info", alias)),
            format!("alias = {}\nsubjectdn = {}\n", alias, subjects.join(", "))
        ).unwrap();
    }

    /// Creates classic with A and slcs with B plus the given policy file.
    fn setup(vo_ca_ap: &str) -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        write_info(dir.path(), "policy-classic", &[A]);
        write_info(dir.path(), "policy-slcs", &[B]);
        fs::write(dir.path().join("vo-ca-ap"), vo_ca_ap).unwrap();
        let mut config = Config::default();
        config.ca_dir = dir.path().into();
        config.vo_ca_ap_file = dir.path().join("vo-ca-ap");
        (dir, config)
    }

    fn alias(decision: &Decision) -> Option<&str> {
        decision.profile().map(|profile| profile.alias())
    }

    #[test]
    fn scenario() {
        let (_dir, config) = setup(
            "/* = file:policy-classic.info,file:policy-slcs.info\n\
             \"-\" = file:policy-classic.info\n"
        );
        let pdp = SharedPdp::from_config(&config).unwrap().pdp();

        let res = pdp.is_ca_allowed(&dn(A)).unwrap();
        assert!(res.is_allowed());
        assert_eq!(alias(&res), Some("policy-classic"));
        assert_eq!(res.principal(), &dn(A));

        let res = pdp.is_ca_allowed_for_vo(&dn(B), "anyvo-not-listed")
            .unwrap();
        assert_eq!(alias(&res), Some("policy-slcs"));

        let err = pdp.is_ca_allowed(&dn(C)).unwrap_err();
        assert_eq!(err.principal(), &dn(C));
        assert!(pdp.is_ca_allowed_for_vo(&dn(C), "atlas").is_err());

        // B is known but not in the any-certificate policy.
        assert!(!pdp.is_ca_allowed(&dn(B)).unwrap().is_allowed());
    }

    #[test]
    fn subject_spelling_is_irrelevant() {
        let (_dir, config) = setup("\"-\" = file:policy-classic.info\n");
        let pdp = SharedPdp::from_config(&config).unwrap().pdp();
        let res = pdp.is_ca_allowed(&dn("cn=ca a,o=test,c=xx")).unwrap();
        assert_eq!(alias(&res), Some("policy-classic"));
        assert!(pdp.is_ca_allowed(&dn("CN=CA  A, O=TEST, C=XX")).is_ok());
    }

    #[test]
    fn vo_precedence() {
        let (_dir, config) = setup(
            "/atlas = file:policy-classic.info\n\
             /* = file:policy-slcs.info\n"
        );
        let pdp = SharedPdp::from_config(&config).unwrap().pdp();

        // VO policy allows.
        assert_eq!(
            alias(&pdp.is_ca_allowed_for_vo(&dn(A), "atlas").unwrap()),
            Some("policy-classic")
        );

        // VO policy denies, any-VO policy allows.
        assert_eq!(
            alias(&pdp.is_ca_allowed_for_vo(&dn(B), "atlas").unwrap()),
            Some("policy-slcs")
        );

        // No VO policy, any-VO policy denies.
        assert!(
            !pdp.is_ca_allowed_for_vo(&dn(A), "dteam").unwrap().is_allowed()
        );

        // No any-certificate policy.
        assert!(!pdp.is_ca_allowed(&dn(A)).unwrap().is_allowed());
        assert!(!pdp.decide(&dn(A), None).unwrap().is_allowed());
        assert!(pdp.decide(&dn(A), Some("atlas")).unwrap().is_allowed());
    }

    #[test]
    fn vo_deny_without_fallback() {
        let (_dir, config) = setup("/atlas = file:policy-classic.info\n");
        let pdp = SharedPdp::from_config(&config).unwrap().pdp();
        let res = pdp.is_ca_allowed_for_vo(&dn(B), "atlas").unwrap();
        assert!(!res.is_allowed());
        assert!(res.profile().is_none());
        assert!(
            !pdp.is_ca_allowed_for_vo(&dn(A), "other").unwrap().is_allowed()
        );
    }

    #[test]
    fn empty_policies_deny() {
        let (_dir, config) = setup("# nothing\n");
        let pdp = SharedPdp::from_config(&config).unwrap().pdp();
        assert!(!pdp.is_ca_allowed(&dn(A)).unwrap().is_allowed());
        assert!(
            !pdp.is_ca_allowed_for_vo(&dn(A), "atlas").unwrap().is_allowed()
        );
        assert!(pdp.policies().any_vo_policy().is_none());
    }

    #[test]
    fn ambiguous_subject_uses_policy_order() {
        let (dir, config) = setup(
            "\"-\" = file:policy-slcs.info,file:policy-classic.info\n"
        );
        write_info(dir.path(), "policy-both", &[A, B]);
        let pdp = SharedPdp::from_config(&config).unwrap().pdp();
        assert_eq!(pdp.repository().find_for_subject(&dn(A)).len(), 2);
        assert_eq!(
            alias(&pdp.is_ca_allowed(&dn(A)).unwrap()),
            Some("policy-classic")
        );
    }

    #[test]
    fn fail_safe_reload() {
        let (dir, config) = setup("\"-\" = file:policy-classic.info\n");
        let shared = SharedPdp::from_config(&config).unwrap();
        assert!(shared.pdp().is_ca_allowed(&dn(A)).unwrap().is_allowed());

        // Break the policy file: the old policies stay.
        fs::write(
            dir.path().join("vo-ca-ap"),
            "\"-\" = file:policy-classic.info\n\"-\" = file:policy-slcs.info\n"
        ).unwrap();
        assert!(matches!(shared.reload(), Err(LoadError::Policy(_))));
        let pdp = shared.pdp();
        assert!(pdp.is_ca_allowed(&dn(A)).unwrap().is_allowed());
        assert!(!pdp.is_ca_allowed(&dn(B)).unwrap().is_allowed());

        // Fix it again: the new policies apply.
        fs::write(
            dir.path().join("vo-ca-ap"), "\"-\" = file:policy-slcs.info\n"
        ).unwrap();
        shared.reload().unwrap();
        let pdp = shared.pdp();
        assert!(!pdp.is_ca_allowed(&dn(A)).unwrap().is_allowed());
        assert!(pdp.is_ca_allowed(&dn(B)).unwrap().is_allowed());
    }

    #[test]
    fn repository_reload() {
        let (dir, mut config) = setup("\"-\" = file:policy-classic.info\n");
        config.info_pattern = "*.info".into();
        let shared = SharedPdp::from_config(&config).unwrap();
        assert!(shared.pdp().is_ca_allowed(&dn(C)).is_err());

        write_info(dir.path(), "policy-classic", &[A, C]);
        shared.reload().unwrap();
        assert!(shared.pdp().is_ca_allowed(&dn(C)).unwrap().is_allowed());

        // A broken info file keeps the old repository.
        fs::write(dir.path().join("policy-broken.info"), "alias = x\n")
            .unwrap();
        assert!(matches!(shared.reload(), Err(LoadError::Repository(_))));
        assert!(shared.pdp().is_ca_allowed(&dn(C)).unwrap().is_allowed());
    }

    #[test]
    fn decision_display() {
        let profile = Arc::new(AuthenticationProfile::new("policy-a", None));
        assert_eq!(
            Decision::allow(dn(A), profile).to_string(),
            "allow CN=CA A,O=Test,C=xx (policy-a)"
        );
        assert_eq!(
            Decision::deny(dn(A)).to_string(), "deny CN=CA A,O=Test,C=xx"
        );
    }

    #[test]
    fn policy_set_from_rules() {
        let repo = Arc::new(ProfileRepository::load(
            &Path::new(env!("CARGO_MANIFEST_DIR")).join("test/profiles"),
            crate::repository::DEFAULT_PATTERN, &InfoFileParser
        ).unwrap());
        let slcs = repo.find_by_alias("policy-igtf-slcs").unwrap().clone();
        let policies = PolicySet::from_rules(vec![
            (PolicyTarget::Vo("dteam".into()), ProfilePolicy::new([slcs])),
        ]).unwrap();
        let pdp = ProfilePdp::new(repo, Arc::new(policies));
        assert!(pdp.is_ca_allowed_for_vo(
            &dn("/C=xx/O=Example/CN=Example SLCS CA"), "dteam"
        ).unwrap().is_allowed());
    }
}
