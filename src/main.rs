//! Trebuchet search CLI - Run a topology search from JSON configuration.

use std::path::PathBuf;

use serde::Serialize;
use trebuchet_search::{
    compute::evolution::{CmaEsSearch, GeneticSearch},
    schema::{
        BestIndividual, CmaEsSearchConfig, GeneticSearchConfig, SearchConfig, SearchStats,
    },
};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <config.json> [--json]", args[0]);
        eprintln!();
        eprintln!("Run a trebuchet topology search from JSON configuration.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  config.json  Path to search configuration file");
        eprintln!("  --json       Print the full result as JSON instead of a summary");
        eprintln!();
        eprintln!("Example configuration is generated with --example [ga|cmaes].");
        eprintln!("Set RUST_LOG=info to follow generation progress.");
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_config(args.get(2).map(String::as_str).unwrap_or("ga"));
        return;
    }

    let config_path = PathBuf::from(&args[1]);
    let as_json = args.iter().skip(2).any(|a| a == "--json");

    let config = SearchConfig::from_json_file(&config_path).unwrap_or_else(|e| {
        eprintln!("Error loading config: {}", e);
        std::process::exit(1);
    });

    match config {
        SearchConfig::GeneticAlgorithm(ga) => run_genetic(ga, as_json),
        SearchConfig::CmaEs(cma) => run_cmaes(cma, as_json),
    }
}

fn run_genetic(config: GeneticSearchConfig, as_json: bool) {
    if !as_json {
        println!("Genetic Topology Search");
        println!("=======================");
        println!("Population: {}", config.population_size);
        println!("Generations: {}", config.generations);
        println!("Elites: {}", config.elite_count);
        println!("Mutation rate: {}", config.mutation_rate);
        println!("Max force: {}", config.limits.max_force);
        println!("Seed: {}", config.seed);
        println!();
    }

    let mut search = GeneticSearch::new(config).unwrap_or_else(|e| {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    });
    let result = search.run();

    if as_json {
        print_json(&result);
    } else {
        print_summary(result.best.as_ref(), &result.stats);
    }
}

fn run_cmaes(config: CmaEsSearchConfig, as_json: bool) {
    let mut search = CmaEsSearch::new(config).unwrap_or_else(|e| {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    });

    if !as_json {
        let encoding = search.encoding();
        println!("CMA-ES Topology Search");
        println!("======================");
        println!("Particles: {} (fixed)", encoding.particle_count());
        println!(
            "Encoding dimension: {} ({} binary, {} continuous)",
            encoding.dim(),
            encoding.binary_len(),
            encoding.continuous_len()
        );
        println!("Population size: {}", search.strategy().lambda());
        println!();
    }

    let result = search.run().unwrap_or_else(|e| {
        eprintln!("Search failed: {}", e);
        std::process::exit(1);
    });

    if as_json {
        print_json(&result);
    } else {
        print_summary(result.best.as_ref(), &result.stats);
        println!("Final sigma: {:.3e}", result.final_sigma);
    }
}

fn print_summary(best: Option<&BestIndividual>, stats: &SearchStats) {
    println!("Search complete ({:?})", stats.stop_reason);
    println!("  Generations: {}", stats.generations);
    println!(
        "  Evaluations: {} ({:.1}/s)",
        stats.total_evaluations, stats.evaluations_per_second
    );
    println!("  Time: {:.2}s", stats.elapsed_seconds);
    println!();

    match best {
        Some(best) if best.result.fitness > 0.0 => {
            println!("Best design:");
            println!("  Range: {:.2}", best.result.range);
            println!("  Peak load: {:.2}", best.result.peak_load);
            println!("  Found in generation: {}", best.generation);
            if let Some(evaluation) = best.evaluation {
                println!("  Found at evaluation: {}", evaluation);
            }
            println!("  Particles: {}", best.result.num_particles);
            println!("  Constraints: {}", best.result.num_constraints);
        }
        _ => println!("No valid designs found"),
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing result: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_example_config(kind: &str) {
    let config = match kind {
        "ga" => SearchConfig::GeneticAlgorithm(GeneticSearchConfig::default()),
        "cmaes" => SearchConfig::CmaEs(CmaEsSearchConfig::default()),
        other => {
            eprintln!("Unknown example '{}': expected ga or cmaes", other);
            std::process::exit(1);
        }
    };
    print_json(&config);
}
