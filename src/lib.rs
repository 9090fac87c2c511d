//! Authentication profile policy decisions.
//!
//! This crate decides whether the certification authority that issued a
//! certificate is acceptable, either for any request or for requests on
//! behalf of a virtual organization (VO). CAs are grouped into
//! authentication profiles defined by info files in the trust anchor
//! directory, and the VO-CA-AP file assigns profiles to VOs.
//!
//! The application itself, via `main.rs`, is only a very tiny frontend.

pub use self::config::Config;
pub use self::error::{ExitError, Failed};
pub use self::operation::Operation;

pub mod config;
pub mod dn;
pub mod error;
pub mod log;
pub mod operation;
pub mod pdp;
pub mod policy;
pub mod profile;
pub mod properties;
pub mod reload;
pub mod repository;
pub mod utils;
pub mod vocaap;
