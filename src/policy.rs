//! Authentication profile policies.
//!
//! A [`ProfilePolicy`] is the list of profiles acceptable for one target.
//! The [`PolicySet`] collects the policies for all targets: individual
//! VOs, any VO not listed otherwise, and requests that don’t assert a VO
//! at all.

use std::{error, fmt};
use std::collections::HashMap;
use std::sync::Arc;
use crate::profile::AuthenticationProfile;


//------------ ProfilePolicy -------------------------------------------------

/// The profiles acceptable for one target.
///
/// The profiles are kept in the order they were declared in. This order
/// breaks ties in [`supports_at_least_one`][Self::supports_at_least_one].
#[derive(Clone, Debug, Default)]
pub struct ProfilePolicy {
    profiles: Vec<Arc<AuthenticationProfile>>,
}

impl ProfilePolicy {
    /// Creates a new policy from a list of profiles.
    ///
    /// If a profile appears more than once, only the first occurrence is
    /// kept.
    pub fn new(
        profiles: impl IntoIterator<Item = Arc<AuthenticationProfile>>
    ) -> Self {
        let mut res: Vec<Arc<AuthenticationProfile>> = Vec::new();
        for profile in profiles {
            if !res.contains(&profile) {
                res.push(profile)
            }
        }
        ProfilePolicy { profiles: res }
    }

    /// Returns the profiles of this policy in declaration order.
    pub fn profiles(&self) -> &[Arc<AuthenticationProfile>] {
        &self.profiles
    }

    /// Returns whether the profile with the given alias is supported.
    pub fn supports_alias(&self, alias: &str) -> bool {
        self.profiles.iter().any(|profile| profile.alias() == alias)
    }

    /// Returns whether the given profile is supported.
    pub fn supports_profile(&self, profile: &AuthenticationProfile) -> bool {
        self.supports_alias(profile.alias())
    }

    /// Returns a candidate profile supported by this policy.
    ///
    /// If more than one of the candidates is supported, the one declared
    /// first in the policy wins. Returns `None` if none of the candidates
    /// is supported.
    ///
    /// The returned reference is one of the candidates, not the policy’s
    /// own profile value.
    pub fn supports_at_least_one<'a>(
        &self,
        candidates: &'a [Arc<AuthenticationProfile>]
    ) -> Option<&'a Arc<AuthenticationProfile>> {
        self.profiles.iter().find_map(|profile| {
            candidates.iter().find(|candidate| {
                candidate.alias() == profile.alias()
            })
        })
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}


//--- Display

impl fmt::Display for ProfilePolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (idx, profile) in self.profiles.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "file:{}.info", profile.alias())?;
        }
        Ok(())
    }
}


//------------ PolicyTarget --------------------------------------------------

/// The requests a policy applies to.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum PolicyTarget {
    /// Requests that don’t assert a VO.
    AnyCertificate,

    /// Requests for a VO that has no policy of its own.
    AnyVo,

    /// Requests for the given VO.
    Vo(String),
}

impl fmt::Display for PolicyTarget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            PolicyTarget::AnyCertificate => f.write_str("\"-\""),
            PolicyTarget::AnyVo => f.write_str("/*"),
            PolicyTarget::Vo(ref name) => write!(f, "/{}", name),
        }
    }
}


//------------ PolicySet -----------------------------------------------------

/// The complete set of policies.
///
/// A policy set is immutable. It is created in one go via
/// [`from_rules`][Self::from_rules] which rejects duplicate targets.
#[derive(Clone, Debug, Default)]
pub struct PolicySet {
    /// The VO-specific policies in declaration order.
    vo_policies: Vec<(String, ProfilePolicy)>,

    /// An index from VO name into `vo_policies`.
    vo_index: HashMap<String, usize>,

    /// The policy for VOs without a specific policy.
    any_vo: Option<ProfilePolicy>,

    /// The policy for requests without a VO.
    any_certificate: Option<ProfilePolicy>,
}

impl PolicySet {
    /// Creates a policy set without any policies.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a policy set from a sequence of rules.
    ///
    /// Each target may appear only once. Otherwise, an error is returned
    /// that names the offending target and its position in `rules`.
    pub fn from_rules(
        rules: impl IntoIterator<Item = (PolicyTarget, ProfilePolicy)>
    ) -> Result<Self, DuplicateTarget> {
        let mut res = Self::empty();
        for (index, (target, policy)) in rules.into_iter().enumerate() {
            match target {
                PolicyTarget::AnyCertificate => {
                    if res.any_certificate.is_some() {
                        return Err(DuplicateTarget { target, index })
                    }
                    res.any_certificate = Some(policy);
                }
                PolicyTarget::AnyVo => {
                    if res.any_vo.is_some() {
                        return Err(DuplicateTarget { target, index })
                    }
                    res.any_vo = Some(policy);
                }
                PolicyTarget::Vo(name) => {
                    if res.vo_index.contains_key(&name) {
                        return Err(DuplicateTarget {
                            target: PolicyTarget::Vo(name), index
                        })
                    }
                    res.vo_index.insert(name.clone(), res.vo_policies.len());
                    res.vo_policies.push((name, policy));
                }
            }
        }
        Ok(res)
    }

    /// Returns the policy for the given VO if there is one.
    pub fn vo_policy(&self, vo: &str) -> Option<&ProfilePolicy> {
        self.vo_index.get(vo).map(|&idx| &self.vo_policies[idx].1)
    }

    /// Returns an iterator over all VO-specific policies.
    pub fn vo_policies(
        &self
    ) -> impl Iterator<Item = (&str, &ProfilePolicy)> + '_ {
        self.vo_policies.iter().map(|(name, policy)| (name.as_str(), policy))
    }

    /// Returns the number of VO-specific policies.
    pub fn vo_policy_count(&self) -> usize {
        self.vo_policies.len()
    }

    /// Returns the policy for VOs without a specific policy.
    pub fn any_vo_policy(&self) -> Option<&ProfilePolicy> {
        self.any_vo.as_ref()
    }

    /// Returns the policy for requests without a VO.
    pub fn any_certificate_policy(&self) -> Option<&ProfilePolicy> {
        self.any_certificate.as_ref()
    }
}


//--- Display

/// Renders the set in VO-CA-AP file syntax.
impl fmt::Display for PolicySet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(policy) = self.any_certificate.as_ref() {
            writeln!(f, "{} = {}", PolicyTarget::AnyCertificate, policy)?;
        }
        for (name, policy) in &self.vo_policies {
            writeln!(f, "/{} = {}", name, policy)?;
        }
        if let Some(policy) = self.any_vo.as_ref() {
            writeln!(f, "{} = {}", PolicyTarget::AnyVo, policy)?;
        }
        Ok(())
    }
}


//------------ DuplicateTarget -----------------------------------------------

/// A policy set contained more than one rule for a target.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DuplicateTarget {
    /// The target that appeared again.
    pub target: PolicyTarget,

    /// The position of the second rule in the sequence.
    pub index: usize,
}

impl fmt::Display for DuplicateTarget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "duplicate rule for {}", self.target)
    }
}

impl error::Error for DuplicateTarget { }


//============ Tests =========================================================
