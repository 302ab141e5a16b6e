use anyhow::Result;
use clap::{value_parser, Arg, ArgAction, Command};

use whybusy::commands;
use whybusy::core::monitor::Topic;

fn build_cli() -> Command {
    let topic_names: Vec<&'static str> = Topic::ALL.iter().map(|t| t.as_str()).collect();

    Command::new("whybusy")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Explains why your GPU and system are busy")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("watch")
                .about("Stream live monitoring events as JSON lines")
                .arg(
                    Arg::new("interval")
                        .short('i')
                        .long("interval")
                        .value_name("MS")
                        .help("Minimum age in milliseconds before metrics are re-sampled")
                        .value_parser(value_parser!(u64)),
                )
                .arg(
                    Arg::new("topic")
                        .short('t')
                        .long("topic")
                        .value_name("NAME")
                        .help("Only print events of this topic (repeatable)")
                        .value_parser(topic_names)
                        .action(ArgAction::Append),
                ),
        )
        .subcommand(
            Command::new("summary")
                .about("Collect once and explain the current load")
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Print the full metrics as JSON")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("classify")
                .about("Show how a process would be classified")
                .arg(
                    Arg::new("name")
                        .help("Process name")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::new("cmdline")
                        .long("cmdline")
                        .value_name("COMMAND")
                        .help("Full command line of the process"),
                )
                .arg(
                    Arg::new("exe")
                        .long("exe")
                        .value_name("PATH")
                        .help("Executable path of the process"),
                )
                .arg(
                    Arg::new("system")
                        .long("system")
                        .help("Use every rule group, as for the top-process list")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Print the classification as JSON")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(Command::new("config").about("Show the effective configuration"))
}

fn main() -> Result<()> {
    whybusy::init_logging();

    let matches = build_cli().get_matches();

    match matches.subcommand() {
        Some(("watch", sub_matches)) => commands::watch::execute(sub_matches),
        Some(("summary", sub_matches)) => commands::summary::execute(sub_matches),
        Some(("classify", sub_matches)) => commands::classify::execute(sub_matches),
        Some(("config", _)) => commands::config::execute(),
        _ => {
            println!("Use 'whybusy --help' for more information.");
            Ok(())
        }
    }
}
