//! Parsing Options.
//! `tokennet [--config FILE] [--output FILE] <analyze|compare|sensitivity|reach|eval> ...`

use std::path::PathBuf;

use anyhow::{Result, anyhow, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};

use crate::analysis::ImpactMetric;

#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    /// Incidence matrix, invariants, basis and connectivity diagnostics.
    Analyze {
        model: PathBuf,
        dot: Option<PathBuf>,
    },
    /// Signature equivalence, optionally witness isomorphism and behavioral comparison.
    Compare {
        left: PathBuf,
        right: PathBuf,
        witness: Option<PathBuf>,
        behavior: bool,
    },
    Sensitivity {
        model: PathBuf,
        metric: Option<ImpactMetric>,
    },
    /// Bounded search for a marking; unlisted places keep their initial count.
    Reach {
        model: PathBuf,
        target: Vec<(String, i64)>,
        max_steps: Option<usize>,
    },
    Eval {
        expression: String,
        bindings: Vec<(String, String)>,
    },
}

fn model_arg(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .required(true)
        .value_name("MODEL")
        .value_parser(clap::value_parser!(PathBuf))
        .help(help)
}

fn make_options_parser() -> Command {
    Command::new("tokennet")
        .version("v0.1.0")
        .about("Structural and behavioral analysis of guarded token-flow nets")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .global(true)
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf))
                .help("TOML analysis configuration; defaults apply when absent"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .global(true)
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Path to file where the report will be stored (text, plus FILE.json)"),
        )
        .subcommand(
            Command::new("analyze")
                .about("Structural analysis of one model")
                .arg(model_arg("model", "Model document (.json or .ron)"))
                .arg(
                    Arg::new("dot")
                        .long("dot")
                        .value_name("FILE")
                        .value_parser(clap::value_parser!(PathBuf))
                        .help("Also write a Graphviz rendering"),
                ),
        )
        .subcommand(
            Command::new("compare")
                .about("Compare two models")
                .arg(model_arg("left", "First model document"))
                .arg(model_arg("right", "Second model document"))
                .arg(
                    Arg::new("witness")
                        .short('w')
                        .long("witness")
                        .value_name("FILE")
                        .value_parser(clap::value_parser!(PathBuf))
                        .help("JSON place/transition mapping to verify as an isomorphism"),
                )
                .arg(
                    Arg::new("behavior")
                        .short('b')
                        .long("behavior")
                        .action(ArgAction::SetTrue)
                        .help("Discover a place mapping from trajectories and check equivalence"),
                ),
        )
        .subcommand(
            Command::new("sensitivity")
                .about("Deletion, rate and marking sensitivity")
                .arg(model_arg("model", "Model document (.json or .ron)"))
                .arg(
                    Arg::new("metric")
                        .short('m')
                        .long("metric")
                        .value_parser(["pointwise", "token_mass"])
                        .help("Overrides the configured impact metric"),
                ),
        )
        .subcommand(
            Command::new("reach")
                .about("Search for a firing sequence reaching a marking")
                .arg(model_arg("model", "Model document (.json or .ron)"))
                .arg(
                    Arg::new("set")
                        .long("set")
                        .value_name("PLACE=COUNT")
                        .action(ArgAction::Append)
                        .help("Token count of a place in the target marking; repeatable"),
                )
                .arg(
                    Arg::new("max-steps")
                        .long("max-steps")
                        .value_name("N")
                        .value_parser(clap::value_parser!(usize))
                        .help("Overrides the configured max_reach_steps"),
                ),
        )
        .subcommand(
            Command::new("eval")
                .about("Evaluate a guard expression")
                .arg(Arg::new("expression").required(true).value_name("EXPR"))
                .arg(
                    Arg::new("bind")
                        .long("bind")
                        .value_name("NAME=VALUE")
                        .action(ArgAction::Append)
                        .help("Bind an identifier; repeatable"),
                ),
        )
}

#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub task: Task,
    pub config: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

impl Options {
    /// `args[0]` is the binary name.
    pub fn parse_from_args<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = make_options_parser().try_get_matches_from(args)?;
        let config = matches.get_one::<PathBuf>("config").cloned();
        let output = matches.get_one::<PathBuf>("output").cloned();

        let task = match matches.subcommand() {
            Some(("analyze", sub)) => Task::Analyze {
                model: path(sub, "model")?,
                dot: sub.get_one::<PathBuf>("dot").cloned(),
            },
            Some(("compare", sub)) => Task::Compare {
                left: path(sub, "left")?,
                right: path(sub, "right")?,
                witness: sub.get_one::<PathBuf>("witness").cloned(),
                behavior: sub.get_flag("behavior"),
            },
            Some(("sensitivity", sub)) => Task::Sensitivity {
                model: path(sub, "model")?,
                metric: match sub.get_one::<String>("metric").map(String::as_str) {
                    Some("pointwise") => Some(ImpactMetric::Pointwise),
                    Some("token_mass") => Some(ImpactMetric::TokenMass),
                    Some(other) => bail!("unsupported metric `{other}`"),
                    None => None,
                },
            },
            Some(("reach", sub)) => Task::Reach {
                model: path(sub, "model")?,
                target: sub
                    .get_many::<String>("set")
                    .into_iter()
                    .flatten()
                    .map(|raw| parse_target(raw))
                    .collect::<Result<_>>()?,
                max_steps: sub.get_one::<usize>("max-steps").copied(),
            },
            Some(("eval", sub)) => Task::Eval {
                expression: sub
                    .get_one::<String>("expression")
                    .cloned()
                    .ok_or_else(|| anyhow!("missing expression"))?,
                bindings: sub
                    .get_many::<String>("bind")
                    .into_iter()
                    .flatten()
                    .map(|raw| parse_binding(raw))
                    .collect::<Result<_>>()?,
            },
            _ => bail!("unsupported subcommand"),
        };

        Ok(Options {
            task,
            config,
            output,
        })
    }
}

fn path(matches: &ArgMatches, name: &str) -> Result<PathBuf> {
    matches
        .get_one::<PathBuf>(name)
        .cloned()
        .ok_or_else(|| anyhow!("missing argument `{name}`"))
}

fn parse_binding(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => bail!("binding `{raw}` is not of the form NAME=VALUE"),
    }
}

fn parse_target(raw: &str) -> Result<(String, i64)> {
    let (place, count) = parse_binding(raw)?;
    let count = count
        .trim()
        .parse::<i64>()
        .map_err(|_| anyhow!("token count in `{raw}` is not an integer"))?;
    Ok((place, count))
}
