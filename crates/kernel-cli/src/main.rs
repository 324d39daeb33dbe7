use std::env;
use std::net::SocketAddr;

use contracts::ScenarioConfig;
use kernel_api::{serve, EngineApi};
use kernel_core::scenario::generated_scenario;

fn print_usage() {
    println!("kernel-cli <command>");
    println!("commands:");
    println!("  status");
    println!("  reference");
    println!("    runs the built-in reference scenario to convergence and prints each round");
    println!("  simulate <run_id> <seed> [actors] [items] [sqlite_path]");
    println!("    runs a deterministic generated scenario to convergence and persists to sqlite");
    println!("  serve [addr]");
    println!("    default addr: 127.0.0.1:8080");
}

fn parse_u64(value: Option<&String>, label: &str) -> Result<u64, String> {
    let raw = value.ok_or_else(|| format!("missing {label}"))?;
    raw.parse::<u64>().map_err(|_| format!("invalid {label}: {raw}"))
}

fn parse_usize_or(value: Option<&String>, label: &str, fallback: usize) -> Result<usize, String> {
    match value {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| format!("invalid {label}: {raw}")),
        None => Ok(fallback),
    }
}

fn parse_socket_addr(value: Option<&String>) -> Result<SocketAddr, String> {
    let raw = value.map(String::as_str).unwrap_or("127.0.0.1:8080");
    raw.parse::<SocketAddr>()
        .map_err(|_| format!("invalid addr: {raw}"))
}

fn default_sqlite_path() -> String {
    env::var("NEGOTIATION_SQLITE_PATH")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "negotiation_runs.sqlite".to_string())
}

fn parse_sqlite_path(value: Option<&String>) -> String {
    value
        .map(String::to_string)
        .filter(|path| !path.trim().is_empty())
        .unwrap_or_else(default_sqlite_path)
}

fn print_history(api: &EngineApi) {
    for round in 0..api.round_count() {
        if let Some(report) = api.round_report(round) {
            print!("{report}");
        }
    }
}

fn run_reference() -> Result<(), String> {
    let mut api = EngineApi::from_config(ScenarioConfig::default())
        .map_err(|err| format!("failed to build reference scenario: {err}"))?;
    let (status, committed) = api
        .run_to_convergence()
        .map_err(|err| format!("run aborted: {err}"))?;
    print_history(&api);
    println!("committed={committed} {status}");
    Ok(())
}

fn run_simulation(args: &[String]) -> Result<(), String> {
    let run_id = args
        .get(2)
        .cloned()
        .ok_or_else(|| "missing run_id".to_string())?;
    let seed = parse_u64(args.get(3), "seed")?;
    let num_actors = parse_usize_or(args.get(4), "actors", 9)?;
    let num_items = parse_usize_or(args.get(5), "items", 5)?;
    let sqlite_path = parse_sqlite_path(args.get(6));

    let mut config = generated_scenario(seed, num_actors, num_items);
    config.run_id = run_id.clone();

    let mut api =
        EngineApi::from_config(config).map_err(|err| format!("invalid scenario: {err}"))?;
    api.attach_sqlite_store(&sqlite_path)
        .map_err(|err| format!("failed to attach sqlite store: {err}"))?;
    api.initialize_run_storage(true)
        .map_err(|err| format!("failed to initialize run storage: {err}"))?;

    let (status, committed) = api
        .run_to_convergence()
        .map_err(|err| format!("run aborted: {err}"))?;

    if let Some(error) = api.last_persistence_error() {
        return Err(format!("persistence error after simulation: {error}"));
    }

    println!(
        "simulated run_id={run_id} seed={seed} committed={committed} round={}/{} converged={} sqlite={sqlite_path}",
        status.round, status.max_rounds, status.converged
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str);

    match command {
        Some("status") => match EngineApi::from_config(ScenarioConfig::default()) {
            Ok(api) => println!("{}", api.status()),
            Err(err) => {
                eprintln!("error: {err}");
                std::process::exit(1);
            }
        },
        Some("reference") => {
            if let Err(err) = run_reference() {
                eprintln!("error: {err}");
                std::process::exit(1);
            }
        }
        Some("simulate") => {
            if let Err(err) = run_simulation(&args) {
                eprintln!("error: {err}");
                print_usage();
                std::process::exit(2);
            }
        }
        Some("serve") => match parse_socket_addr(args.get(2)) {
            Ok(addr) => {
                println!("serving api on http://{addr}");
                if let Err(err) = serve(addr).await {
                    eprintln!("server error: {err}");
                    std::process::exit(1);
                }
            }
            Err(err) => {
                eprintln!("error: {err}");
                print_usage();
                std::process::exit(2);
            }
        },
        _ => {
            print_usage();
        }
    }
}
