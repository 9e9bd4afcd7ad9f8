use clap::{Arg, ArgAction, ArgMatches, Command};
use droy::{lexer::tokenize, parser::parse, repl, runner, EvaluatorConfig};
use std::fs;
use std::path::Path;
use std::process;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() {
    let matches = Command::new("droy")
        .about("Interpreter for the Droy scripting language")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("file")
                .help("The script file to execute")
                .value_name("FILE")
                .index(1),
        )
        .arg(
            Arg::new("args")
                .help("Arguments passed to the script as @argv")
                .value_name("ARGS")
                .index(2)
                .num_args(0..)
                .trailing_var_arg(true)
                .allow_hyphen_values(true),
        )
        .arg(
            Arg::new("interactive")
                .short('i')
                .long("interactive")
                .help("Start in interactive REPL mode")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("recursion-limit")
                .long("recursion-limit")
                .value_name("N")
                .help("Maximum depth of nested function calls")
                .value_parser(clap::value_parser!(usize))
                .default_value("1000"),
        )
        .arg(
            Arg::new("lenient")
                .long("lenient")
                .help("Evaluate division by zero and mismatched arithmetic to null")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Log interpreter activity to stderr")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("tokens")
                .long("tokens")
                .help("Print the token stream instead of running")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("ast")
                .long("ast")
                .help("Print the parsed program instead of running")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    init_logging(matches.get_flag("verbose"));

    let config = build_config(&matches);
    match matches.get_one::<String>("file") {
        Some(file_path) if !matches.get_flag("interactive") => {
            process::exit(run_file(file_path, &matches, config));
        }
        _ => repl::start(config),
    }
}

/// Logs go to stderr so program output stays clean. `DROY_LOG` sets the
/// filter; `--verbose` forces `debug`.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("DROY_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

fn build_config(matches: &ArgMatches) -> EvaluatorConfig {
    let mut config = EvaluatorConfig {
        lenient_arithmetic: matches.get_flag("lenient"),
        argv: matches
            .get_many::<String>("args")
            .map(|args| args.cloned().collect())
            .unwrap_or_default(),
        ..EvaluatorConfig::default()
    };
    if let Some(limit) = matches.get_one::<usize>("recursion-limit") {
        config.recursion_limit = *limit;
    }
    if let Some(dir) = matches
        .get_one::<String>("file")
        .and_then(|file| Path::new(file).parent())
        .filter(|dir| !dir.as_os_str().is_empty())
    {
        config.base_dir = dir.to_path_buf();
    }
    config
}

fn run_file(path: &str, matches: &ArgMatches, config: EvaluatorConfig) -> i32 {
    let path = Path::new(path);

    if !path.exists() {
        eprintln!("Error: File '{}' not found", path.display());
        return 66;
    }

    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error reading file '{}': {}", path.display(), e);
            return 66;
        }
    };
    let filename = path.to_string_lossy();

    if matches.get_flag("tokens") || matches.get_flag("ast") {
        return dump(&source, &filename, matches.get_flag("tokens"));
    }
    runner::run(&source, Some(&filename), config)
}

fn dump(source: &str, filename: &str, tokens_only: bool) -> i32 {
    let (tokens, lex_errors) = tokenize(source);
    if tokens_only {
        for token in &tokens {
            println!("{:>4}:{:<3} {:?} {:?}", token.line, token.column, token.token_type, token.lexeme);
        }
        droy::error::report_all(&lex_errors, source, Some(filename));
        return if lex_errors.is_empty() { 0 } else { runner::EXIT_DATA_ERROR };
    }

    let (program, parse_errors) = parse(tokens);
    println!("{:#?}", program);
    let mut errors = lex_errors;
    errors.extend(parse_errors);
    droy::error::report_all(&errors, source, Some(filename));
    if errors.is_empty() {
        0
    } else {
        runner::EXIT_DATA_ERROR
    }
}
