//! Command-line grammar
//!
//! The grammar is the base options plus the options of every registered
//! winsys and renderer, whichever ends up selected. `-w` and `-r` may come
//! anywhere, so the parser has to accept all of them in a single pass.
//! Parsing yields the options in command-line order; routing them is up to
//! the driver.

use std::ffi::OsString;

use clap::parser::ValueSource;
use clap::{Arg, ArgAction, ArgMatches, Command};
use thiserror::Error;

use crate::registry::{Descriptor, OptionSpec, Registry};

/// Letters the base grammar owns
pub const BASE_OPTIONS: [char; 4] = ['h', 'L', 'w', 'r'];

#[derive(Error, Debug)]
pub enum UsageError {
    #[error("unknown winsys \"{0}\"")]
    UnknownWinsys(String),

    #[error("unknown renderer \"{0}\"")]
    UnknownRenderer(String),

    #[error("no winsys available")]
    NoWinsys,

    #[error("no renderer available")]
    NoRenderer,

    #[error("option -{0} is not understood by the selected winsys or renderer")]
    UnhandledOption(char),

    #[error("the winsys must be selected before any winsys or renderer options")]
    WinsysAfterOptions,

    #[error("the renderer must be selected before any winsys or renderer options")]
    RendererAfterOptions,

    #[error("invalid value \"{value}\" for -{opt}: {reason}")]
    InvalidValue {
        opt: char,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Parse(#[from] clap::Error),
}

/// Two registry entries asking for the same option letter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub short: char,
    /// Entry whose option made it into the grammar, `None` for a base option
    pub kept: Option<&'static str>,
    pub dropped: &'static str,
}

/// Merged option grammar
#[derive(Debug, Clone, Default)]
pub struct OptionGrammar {
    pub options: Vec<OptionSpec>,
    pub conflicts: Vec<Conflict>,
}

impl OptionGrammar {
    /// Union of every entry's options, winsys entries first
    pub fn merge<W: Descriptor, R: Descriptor>(winsyses: &Registry<W>, renderers: &Registry<R>) -> Self {
        let owners = winsyses
            .entries()
            .iter()
            .map(|d| (d.name(), d.options()))
            .chain(renderers.entries().iter().map(|d| (d.name(), d.options())));
        Self::from_owners(owners)
    }

    fn from_owners<I>(owners: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, &'static [OptionSpec])>,
    {
        let mut grammar = Self::default();
        let mut owner_of: Vec<(char, &'static str)> = Vec::new();

        for (name, options) in owners {
            for spec in options {
                if BASE_OPTIONS.contains(&spec.short) {
                    grammar.conflicts.push(Conflict {
                        short: spec.short,
                        kept: None,
                        dropped: name,
                    });
                    continue;
                }

                let taken = owner_of
                    .iter()
                    .find(|(short, _)| *short == spec.short)
                    .map(|(_, owner)| *owner)
                    .or_else(|| {
                        // Same id under another letter would clash inside clap
                        grammar
                            .options
                            .iter()
                            .position(|o| o.id == spec.id)
                            .map(|i| owner_of[i].1)
                    });
                if let Some(kept) = taken {
                    grammar.conflicts.push(Conflict {
                        short: spec.short,
                        kept: Some(kept),
                        dropped: name,
                    });
                    continue;
                }

                owner_of.push((spec.short, name));
                grammar.options.push(*spec);
            }
        }

        grammar
    }

    pub fn find(&self, short: char) -> Option<&OptionSpec> {
        self.options.iter().find(|o| o.short == short)
    }
}

/// One command-line item, in the order given
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliEvent {
    Help,
    List,
    Winsys(String),
    Renderer(String),
    Option(char, String),
}

pub fn command(grammar: &OptionGrammar) -> Command {
    let mut cmd = Command::new("stereo-cube")
        .disable_help_flag(true)
        .disable_version_flag(true)
        .arg(Arg::new("help").short('h').action(ArgAction::SetTrue))
        .arg(Arg::new("list").short('L').action(ArgAction::SetTrue))
        .arg(
            Arg::new("winsys")
                .short('w')
                .value_name("WINSYS")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("renderer")
                .short('r')
                .value_name("RENDERER")
                .action(ArgAction::Append),
        );

    for spec in &grammar.options {
        cmd = cmd.arg(
            Arg::new(spec.id)
                .short(spec.short)
                .value_name(spec.value_name)
                .help(spec.help)
                .action(ArgAction::Append),
        );
    }

    cmd
}

fn flag_event(matches: &ArgMatches, id: &str, event: CliEvent) -> Option<(usize, CliEvent)> {
    if matches.value_source(id) != Some(ValueSource::CommandLine) {
        return None;
    }
    matches.index_of(id).map(|index| (index, event))
}

fn value_events<F>(matches: &ArgMatches, id: &str, make: F) -> Vec<(usize, CliEvent)>
where
    F: Fn(String) -> CliEvent,
{
    match (matches.indices_of(id), matches.get_many::<String>(id)) {
        (Some(indices), Some(values)) => indices.zip(values).map(|(i, v)| (i, make(v.clone()))).collect(),
        _ => Vec::new(),
    }
}

/// Parse `args` (program name first) into events in command-line order
pub fn parse<I, T>(grammar: &OptionGrammar, args: I) -> Result<Vec<CliEvent>, UsageError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = command(grammar).try_get_matches_from(args)?;

    let mut events: Vec<(usize, CliEvent)> = Vec::new();
    events.extend(flag_event(&matches, "help", CliEvent::Help));
    events.extend(flag_event(&matches, "list", CliEvent::List));
    events.extend(value_events(&matches, "winsys", CliEvent::Winsys));
    events.extend(value_events(&matches, "renderer", CliEvent::Renderer));
    for spec in &grammar.options {
        let short = spec.short;
        events.extend(value_events(&matches, spec.id, |value| CliEvent::Option(short, value)));
    }

    events.sort_by_key(|(index, _)| *index);
    Ok(events.into_iter().map(|(_, event)| event).collect())
}

fn option_line(out: &mut String, short: char, value_name: &str, help: &str) {
    let arg = if value_name.is_empty() {
        String::new()
    } else {
        format!("<{}>", value_name)
    };
    out.push_str(&format!("  -{} {:<14} {}\n", short, arg, help));
}

fn section<D: Descriptor>(out: &mut String, kind: &str, registry: &Registry<D>) {
    for entry in registry.entries() {
        if entry.options().is_empty() {
            continue;
        }
        out.push_str(&format!("\n{} \"{}\" options:\n", kind, entry.name()));
        for spec in entry.options() {
            option_line(out, spec.short, spec.value_name, spec.help);
        }
    }
}

/// Help text listing the base options and every entry's options
pub fn usage<W: Descriptor, R: Descriptor>(winsyses: &Registry<W>, renderers: &Registry<R>) -> String {
    let mut out = String::from("usage: stereo-cube [OPTION]...\n\n");
    option_line(&mut out, 'h', "", "Show this help message");
    option_line(&mut out, 'L', "", "List the available winsys and renderers");
    option_line(&mut out, 'w', "WINSYS", "Select the winsys");
    option_line(&mut out, 'r', "RENDERER", "Select the renderer");
    section(&mut out, "Winsys", winsyses);
    section(&mut out, "Renderer", renderers);
    out
}

/// Names for `-L`
pub fn listing<W: Descriptor, R: Descriptor>(winsyses: &Registry<W>, renderers: &Registry<R>) -> String {
    let mut out = String::from("Winsys:\n");
    for name in winsyses.list() {
        out.push_str(&format!("  {}\n", name));
    }
    out.push_str("Renderers:\n");
    for name in renderers.list() {
        out.push_str(&format!("  {}\n", name));
    }
    out
}
