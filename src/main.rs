use clap::{App, Arg};
use log::info;
use satmodel::backend::BackendKind;
use satmodel::formula::dimacs::parse;
use satmodel::formula::Formula;
use satmodel::*;
use std::fs::File;
use std::time::Duration;

fn main() {
    env_logger::init();

    let matches = App::new("satmodel")
        .arg(Arg::with_name("INPUT").help("input file (in CNF), stdin if absent").index(1))
        .arg(
            Arg::with_name("backend")
                .long("backend")
                .takes_value(true)
                .possible_values(&["cdcl", "brute-force", "portfolio"])
                .default_value("cdcl")
                .help("engine used to solve the formula"),
        )
        .arg(
            Arg::with_name("threads")
                .long("threads")
                .takes_value(true)
                .help("worker threads (portfolio only)"),
        )
        .arg(Arg::with_name("seed").long("seed").takes_value(true).help("random seed"))
        .arg(
            Arg::with_name("timeout")
                .long("timeout")
                .takes_value(true)
                .help("time limit in seconds"),
        )
        .arg(
            Arg::with_name("output")
                .long("output")
                .takes_value(true)
                .help("also write the formula back out as CNF to this file"),
        )
        .get_matches();

    let mut config = Config::default();
    let parsed = (|| -> std::result::Result<(), String> {
        if let Some(backend) = matches.value_of("backend") {
            config.backend = backend.parse::<BackendKind>()?;
        }
        if let Some(threads) = matches.value_of("threads") {
            config.threads = threads.parse().map_err(|_| format!("invalid thread count '{}'", threads))?;
        }
        if let Some(seed) = matches.value_of("seed") {
            config.seed = Some(seed.parse().map_err(|_| format!("invalid seed '{}'", seed))?);
        }
        if let Some(timeout) = matches.value_of("timeout") {
            config.time_limit = Some(parse_timeout(timeout)?);
        }
        Ok(())
    })();
    if let Err(e) = parsed {
        eprintln!("error: {}", e);
        std::process::exit(-1);
    }

    let f = if let Some(path) = matches.value_of("INPUT") {
        parse_from_file(path)
    } else {
        parse(std::io::stdin())
    };

    match f.and_then(|f| run(f, config, matches.value_of("output"))) {
        Ok(result) => {
            let exit_code = match result {
                SatResult::Satisfiable => 0,
                SatResult::Unsatisfiable => 1,
                SatResult::Undecided => 2,
            };
            std::process::exit(exit_code);
        }
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(-1);
        }
    }
}

/// Seconds, fractional allowed. Limits too large for a `Duration` are capped.
fn parse_timeout(timeout: &str) -> std::result::Result<Duration, String> {
    match timeout.parse::<f64>() {
        Ok(secs) if secs.is_nan() || secs < 0.0 => Err(format!("invalid timeout '{}'", timeout)),
        Ok(secs) => Ok(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)),
        Err(_) => Err(format!("invalid timeout '{}'", timeout)),
    }
}

fn parse_from_file(path: &str) -> Result<Formula> {
    let file = File::open(path)?;
    parse(file)
}

fn run(f: Formula, config: Config, output: Option<&str>) -> Result<SatResult> {
    let mut model = Model::with_config(config);
    while model.num_variables() < f.num_variables() {
        model.new_variable();
    }
    for clause in f.clauses() {
        model.add_clause(clause.literals().copied());
    }
    info!("read {} variables, {} clauses", f.num_variables(), f.num_clauses());

    if let Some(path) = output {
        model.write_dimacs(File::create(path)?)?;
    }

    let result = model.solve()?;
    match result {
        SatResult::Satisfiable => {
            println!("s SATISFIABLE");
            let values: Vec<String> = (1..=f.num_variables())
                .map(|v| {
                    let l = Variable(v).positive();
                    let l = if model.var_value(Variable(v)) { l } else { l.negated() };
                    l.to_dimacs().to_string()
                })
                .collect();
            for chunk in values.chunks(10) {
                println!("v {}", chunk.join(" "));
            }
            println!("v 0");
        }
        SatResult::Unsatisfiable => println!("s UNSATISFIABLE"),
        SatResult::Undecided => println!("s UNKNOWN"),
    }
    Ok(result)
}
