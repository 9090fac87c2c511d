//! What authprofile can do for you.
//!
//! This module implements all the commands users can ask authprofile to
//! perform. They are encapsulated in the type [`Operation`] which can
//! determine the command from the command line arguments and then execute
//! it.

// Some functions here have unnecessarily wrapped return types for
// consistency.
#![allow(clippy::unnecessary_wraps)]

use std::{io, thread};
use std::io::{BufRead, Write};
use std::str::FromStr;
use std::sync::{mpsc, Arc};
use std::sync::mpsc::RecvTimeoutError;
use clap::{Args, ArgMatches, FromArgMatches, Parser};
use log::{debug, error, info};
use crate::config::Config;
use crate::dn::DistinguishedName;
use crate::error::{ExitError, Failed};
use crate::log::Logger;
use crate::pdp::{Decision, SharedPdp, TrustError};
use crate::profile::{AuthenticationProfile, InfoFileParser};
use crate::repository::ProfileRepository;
use crate::vocaap::VoCaApParser;


//------------ Operation -----------------------------------------------------

/// The command to execute.
///
/// This type collects all the commands we have defined plus any possible
/// extra configuration they support.
///
/// You can create a value from the command line arguments. First, you add
/// all necessary sub-commands and arguments to a clap `Command` via
/// [`config_args`][Self::config_args] and then process the argument
/// matches into a value in [`from_arg_matches`][Self::from_arg_matches].
/// Finally, you can execute the created command through the
/// [`run`][Self::run] method.
pub enum Operation {
    Check(Check),
    Profiles(Profiles),
    Policies(Policies),
    Serve(Serve),
    PrintConfig(PrintConfig),
}

impl Operation {
    /// Prepares everything.
    ///
    /// Call this before doing anything else.
    pub fn prepare() -> Result<(), Failed> {
        Logger::init()
    }

    /// Adds the command configuration to a clap app.
    pub fn config_args(app: clap::Command) -> clap::Command {
        let app = Check::config_args(app);
        let app = Profiles::config_args(app);
        let app = Policies::config_args(app);
        let app = Serve::config_args(app);
        PrintConfig::config_args(app)
    }

    /// Creates a command from clap matches.
    pub fn from_arg_matches(
        matches: &ArgMatches,
        config: &mut Config
    ) -> Result<Self, Failed> {
        Ok(match matches.subcommand() {
            Some(("check", matches)) => {
                Operation::Check(Check::from_arg_matches(matches)?)
            }
            Some(("profiles", matches)) => {
                Operation::Profiles(Profiles::from_arg_matches(matches)?)
            }
            Some(("policies", matches)) => {
                Operation::Policies(Policies::from_arg_matches(matches)?)
            }
            Some(("serve", matches)) => {
                Operation::Serve(Serve::from_arg_matches(matches, config)?)
            }
            Some(("config", matches)) => {
                Operation::PrintConfig(
                    PrintConfig::from_arg_matches(matches, config)?
                )
            }
            _ => {
                error!(
                    "Failed: a command is required.\n\
                     \nCommonly used commands are:\
                     \n   check     Decides whether a CA is acceptable\
                     \n   profiles  Lists the authentication profiles\
                     \n   policies  Shows the VO-CA-AP policies\
                     \n   serve     Answers decision requests from stdin\
                     \n\
                     \nSee authprofile -h for a usage summary."
                );
                return Err(Failed)
            }
        })
    }

    /// Runs the command.
    pub fn run(self, config: Config) -> Result<(), ExitError> {
        match self {
            Operation::Check(cmd) => cmd.run(config),
            Operation::Profiles(cmd) => cmd.run(config),
            Operation::Policies(cmd) => cmd.run(config),
            Operation::Serve(cmd) => cmd.run(config),
            Operation::PrintConfig(cmd) => cmd.run(config),
        }
    }
}


//------------ Check ---------------------------------------------------------

/// Decide whether a single CA is acceptable.
#[derive(Clone, Debug, Parser)]
pub struct Check {
    /// The subject of the CA in OpenSSL or RFC 2253 form
    #[arg(value_name = "SUBJECT")]
    subject: String,

    /// The VO the request is made for
    #[arg(long, value_name = "NAME")]
    vo: Option<String>,
}

impl Check {
    /// Adds the command configuration to a clap app.
    pub fn config_args(app: clap::Command) -> clap::Command {
        app.subcommand(
            Check::augment_args(
                clap::Command::new("check")
                    .about("Decides whether a CA is acceptable")
                    .after_help(AFTER_HELP)
            )
        )
    }

    /// Creates a command from clap matches.
    pub fn from_arg_matches(matches: &ArgMatches) -> Result<Self, Failed> {
        parse_args(matches)
    }

    /// Prints the decision for the CA.
    ///
    /// Returns an error if the CA is denied or unknown so that the exit
    /// code reflects the decision.
    fn run(self, config: Config) -> Result<(), ExitError> {
        Logger::switch_logging(&config, false)?;
        let subject = parse_subject(&self.subject)?;
        let shared = load_shared(&config)?;
        let res = shared.pdp().decide(&subject, self.vo.as_deref());
        println!("{}", format_answer(&res));
        match res {
            Ok(decision) if decision.is_allowed() => Ok(()),
            Ok(_) => Err(ExitError::Denied),
            Err(_) => Err(ExitError::Untrusted),
        }
    }
}


//------------ Profiles ------------------------------------------------------

/// List the authentication profiles.
#[derive(Clone, Debug, Parser)]
pub struct Profiles {
    /// Only show the profiles containing this CA subject
    #[arg(long, value_name = "SUBJECT", conflicts_with = "alias")]
    subject: Option<String>,

    /// Only show the profile with this alias
    #[arg(long, value_name = "NAME")]
    alias: Option<String>,
}

impl Profiles {
    /// Adds the command configuration to a clap app.
    pub fn config_args(app: clap::Command) -> clap::Command {
        app.subcommand(
            Profiles::augment_args(
                clap::Command::new("profiles")
                    .about("Lists the authentication profiles")
                    .after_help(AFTER_HELP)
            )
        )
    }

    /// Creates a command from clap matches.
    pub fn from_arg_matches(matches: &ArgMatches) -> Result<Self, Failed> {
        parse_args(matches)
    }

    /// Prints the selected profiles with their CA subjects.
    fn run(self, config: Config) -> Result<(), ExitError> {
        Logger::switch_logging(&config, false)?;
        let repository = match ProfileRepository::load(
            &config.ca_dir, &config.info_pattern, &InfoFileParser
        ) {
            Ok(repository) => repository,
            Err(err) => {
                error!("{}", err);
                return Err(ExitError::Generic)
            }
        };
        let selected: Vec<_> = if let Some(subject) = self.subject {
            let subject = parse_subject(&subject)?;
            repository.find_for_subject(&subject).to_vec()
        }
        else if let Some(alias) = self.alias {
            match repository.find_by_alias(&alias) {
                Some(profile) => vec![profile.clone()],
                None => {
                    error!("No profile with alias '{}'.", alias);
                    return Err(ExitError::Generic)
                }
            }
        }
        else {
            repository.profiles().cloned().collect()
        };

        let stdout = io::stdout();
        let mut stdout = stdout.lock();
        for profile in &selected {
            if let Err(err) = write_profile(&mut stdout, profile) {
                error!("Failed to write output: {}", err);
                return Err(ExitError::Generic)
            }
        }
        Ok(())
    }
}

/// Writes a profile and its subjects.
fn write_profile(
    target: &mut impl Write, profile: &AuthenticationProfile
) -> Result<(), io::Error> {
    writeln!(target, "{}", profile.alias())?;
    for subject in profile.subjects() {
        writeln!(target, "    {}", subject)?;
    }
    Ok(())
}


//------------ Policies ------------------------------------------------------

/// Show the policies of the VO-CA-AP file.
#[derive(Clone, Copy, Debug)]
pub struct Policies;

impl Policies {
    /// Adds the command configuration to a clap app.
    pub fn config_args(app: clap::Command) -> clap::Command {
        app.subcommand(clap::Command::new("policies")
            .about("Parses and shows the VO-CA-AP policies")
            .after_help(AFTER_HELP)
        )
    }

    /// Creates a command from clap matches.
    pub fn from_arg_matches(_matches: &ArgMatches) -> Result<Self, Failed> {
        Ok(Policies)
    }

    /// Prints the parsed policy set in VO-CA-AP syntax.
    fn run(self, config: Config) -> Result<(), ExitError> {
        Logger::switch_logging(&config, false)?;
        let parser = VoCaApParser::new(
            config.vo_ca_ap_file, config.ca_dir, Arc::new(InfoFileParser)
        );
        match parser.parse() {
            Ok(policies) => {
                print!("{}", policies);
                Ok(())
            }
            Err(err) => {
                error!("{}", err);
                Err(ExitError::Generic)
            }
        }
    }
}


//------------ Serve ---------------------------------------------------------

/// Answer decision requests read from stdin.
///
/// Each request is a line with the CA subject, optionally followed by a
/// tab and the VO name. Each answer is a line starting with `ALLOW`,
/// `DENY`, `UNTRUSTED`, or `ERROR`.
#[derive(Clone, Copy, Debug)]
pub struct Serve;

impl Serve {
    /// Adds the command configuration to a clap app.
    pub fn config_args(app: clap::Command) -> clap::Command {
        app.subcommand(
            Config::server_args(
                clap::Command::new("serve")
                    .about("Answers decision requests from stdin")
                    .after_help(AFTER_HELP)
            )
        )
    }

    /// Creates a command from clap matches.
    pub fn from_arg_matches(
        matches: &ArgMatches,
        config: &mut Config,
    ) -> Result<Self, Failed> {
        config.apply_server_arg_matches(matches)?;
        Ok(Serve)
    }

    /// Answers requests until stdin is closed.
    ///
    /// Trust anchors and policies are reloaded in a separate thread every
    /// `refresh` seconds.
    fn run(self, config: Config) -> Result<(), ExitError> {
        Logger::switch_logging(&config, true)?;
        let shared = Arc::new(load_shared(&config)?);

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let reloader = {
            let shared = shared.clone();
            let refresh = config.refresh;
            thread::spawn(move || {
                loop {
                    match stop_rx.recv_timeout(refresh) {
                        Err(RecvTimeoutError::Timeout) => {
                            debug!("Reloading trust anchors and policies.");
                            // Failures are logged and the old state kept.
                            let _ = shared.reload();
                        }
                        _ => break
                    }
                }
            })
        };
        info!("Ready to answer requests.");

        let res = answer_requests(
            &shared, io::stdin().lock(), io::stdout().lock()
        );
        drop(stop_tx);
        let _ = reloader.join();
        res.map_err(|err| {
            error!("Failed to process requests: {}", err);
            ExitError::Generic
        })
    }
}

/// Answers each request line from `input` with a line to `output`.
fn answer_requests(
    shared: &SharedPdp, input: impl BufRead, mut output: impl Write
) -> Result<(), io::Error> {
    for line in input.lines() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue
        }
        let (subject, vo) = match line.split_once('\t') {
            Some((subject, vo)) => {
                let vo = vo.trim();
                (subject, if vo.is_empty() { None } else { Some(vo) })
            }
            None => (line, None)
        };
        match DistinguishedName::from_str(subject.trim()) {
            Ok(subject) => {
                let res = shared.pdp().decide(&subject, vo);
                writeln!(output, "{}", format_answer(&res))?;
            }
            Err(err) => {
                writeln!(output, "ERROR\t{}", err)?;
            }
        }
        output.flush()?;
    }
    Ok(())
}


//------------ PrintConfig ---------------------------------------------------

/// Shows the current configuration.
pub struct PrintConfig;

impl PrintConfig {
    /// Adds the command configuration to a clap app.
    pub fn config_args(app: clap::Command) -> clap::Command {
        app.subcommand(Config::server_args(clap::Command::new("config")
            .about("Prints the current config and exits")
            .after_help(AFTER_HELP)
        ))
    }

    /// Creates a command from clap matches.
    pub fn from_arg_matches(
        matches: &ArgMatches,
        config: &mut Config,
    ) -> Result<Self, Failed> {
        config.apply_server_arg_matches(matches)?;
        Ok(PrintConfig)
    }

    /// Prints the current configuration to stdout and exits.
    fn run(self, config: Config) -> Result<(), ExitError> {
        println!("{}", config);
        Ok(())
    }
}


//------------ Helpers -------------------------------------------------------

/// Converts arg matches into a derived argument struct.
fn parse_args<T: FromArgMatches>(matches: &ArgMatches) -> Result<T, Failed> {
    T::from_arg_matches(matches).map_err(|err| {
        error!("Failed to process command line: {}", err);
        Failed
    })
}

/// Parses a CA subject given on the command line.
fn parse_subject(subject: &str) -> Result<DistinguishedName, Failed> {
    DistinguishedName::from_str(subject).map_err(|err| {
        error!("Invalid CA subject '{}': {}", subject, err);
        Failed
    })
}

/// Loads trust anchors and policies as configured.
fn load_shared(config: &Config) -> Result<SharedPdp, Failed> {
    SharedPdp::from_config(config).map_err(|err| {
        error!("{}", err);
        Failed
    })
}

/// Formats the outcome of a decision as an answer line.
fn format_answer(res: &Result<Decision, TrustError>) -> String {
    match res {
        Ok(decision) => match decision.profile() {
            Some(profile) => {
                format!("ALLOW\t{}\t{}", profile, decision.principal())
            }
            None => format!("DENY\t{}", decision.principal()),
        }
        Err(err) => format!("UNTRUSTED\t{}", err.principal()),
    }
}


//------------ Constants -----------------------------------------------------

/// The after help message pointing to the main help.
const AFTER_HELP: &str =
    "Additional global options are available. \
    Please consult 'authprofile --help' for those.";


//============ Tests =========================================================
