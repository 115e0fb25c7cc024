#![deny(warnings)]

//! Headless CLI: builds an engine, exposes the console-surface operations
//! through flags, runs a number of simulated seconds and prints a summary.

use anyhow::{anyhow, Context, Result};
use sim_core::{ActionId, ActionKind, Operative, StatVector};
use sim_runtime::{Automation, Engine, EngineConfig, CYCLES_PER_SECOND, MAX_CATCHUP_SECONDS};
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Default)]
struct Args {
    seconds: u32,
    seed: Option<u64>,
    start: Option<String>,
    skill: Option<String>,
    auto_low: Option<String>,
    auto_high: Option<String>,
    low: Option<f64>,
    high: Option<f64>,
    automate: bool,
    list_skills: bool,
    list_actions: bool,
    load: Option<String>,
    save: Option<String>,
    packages: Option<String>,
    log: Option<String>,
}

fn parse_args() -> Args {
    let mut args = Args {
        seconds: 600,
        ..Args::default()
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--seconds" => args.seconds = it.next().and_then(|s| s.parse().ok()).unwrap_or(600),
            "--seed" => args.seed = it.next().and_then(|s| s.parse().ok()),
            "--start" => args.start = it.next(),
            "--skill" => args.skill = it.next(),
            "--auto-low" => args.auto_low = it.next(),
            "--auto-high" => args.auto_high = it.next(),
            "--low" => args.low = it.next().and_then(|s| s.parse().ok()),
            "--high" => args.high = it.next().and_then(|s| s.parse().ok()),
            "--automate" => args.automate = true,
            "--list-skills" => args.list_skills = true,
            "--list-actions" => args.list_actions = true,
            "--load" => args.load = it.next(),
            "--save" => args.save = it.next(),
            "--packages" => args.packages = it.next(),
            "--log" => args.log = it.next(),
            _ => {}
        }
    }
    args
}

/// Parse a "kind:Name" pair, e.g. "contract:Surveillance".
fn parse_action(spec: &str) -> Result<ActionId> {
    let (kind, name) = spec
        .split_once(':')
        .ok_or_else(|| anyhow!("expected kind:Name, got '{spec}'"))?;
    let kind = match kind.to_ascii_lowercase().as_str() {
        "contract" => ActionKind::Contract,
        "operation" => ActionKind::Operation,
        "blackop" => ActionKind::BlackOp,
        "general" => ActionKind::General,
        other => return Err(anyhow!("unknown action kind '{other}'")),
    };
    Ok(ActionId::new(kind, name))
}

/// Parse a "Name:count" skill upgrade request.
fn parse_skill(spec: &str) -> Result<(String, u64)> {
    let (name, count) = spec
        .split_once(':')
        .ok_or_else(|| anyhow!("expected Name:count, got '{spec}'"))?;
    let count = count
        .parse::<u64>()
        .with_context(|| format!("bad upgrade count in '{spec}'"))?;
    Ok((name.to_string(), count))
}

fn default_operative() -> Operative {
    Operative::new(
        StatVector {
            hacking: 100.0,
            strength: 100.0,
            defense: 100.0,
            dexterity: 100.0,
            agility: 100.0,
            charisma: 100.0,
            intelligence: 100.0,
        },
        100.0,
    )
}

fn main() -> Result<()> {
    let args = parse_args();

    // Logging setup; --log overrides the environment filter (this is the
    // log-category toggle surface).
    let filter = match &args.log {
        Some(spec) => EnvFilter::new(spec),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = EngineConfig {
        rng_seed: args.seed.unwrap_or(42),
        ..EngineConfig::default()
    };
    info!(seconds = args.seconds, seed = config.rng_seed, "starting division sim");

    let mut engine = match &args.load {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading save '{path}'"))?;
            persistence::restore_engine(config, default_operative(), &text)?
        }
        None => Engine::new(config, default_operative()),
    };

    if args.list_actions {
        for id in engine.catalog().ids() {
            println!("{id}");
        }
        return Ok(());
    }
    if args.list_skills {
        for skill in &engine.skill_catalog().skills {
            let level = engine.skill_level(&skill.name);
            println!(
                "{} | level {} | next cost {}",
                skill.name,
                level,
                skill_cost_hint(&engine, &skill.name)
            );
        }
        return Ok(());
    }

    if let Some(spec) = &args.skill {
        let (name, count) = parse_skill(spec)?;
        match engine.upgrade_skill(&name, count) {
            Ok(up) => println!("upgraded {name} by {} for {} sp", up.count, up.cost),
            Err(reason) => println!("skill upgrade rejected: {reason}"),
        }
    }

    if args.auto_low.is_some() || args.auto_high.is_some() {
        let automation = Automation {
            enabled: args.automate,
            stamina_low: args.low.unwrap_or(10.0),
            stamina_high: args.high.unwrap_or(30.0),
            low_action: args.auto_low.as_deref().map(parse_action).transpose()?,
            high_action: args.auto_high.as_deref().map(parse_action).transpose()?,
        };
        engine
            .set_automation(automation)
            .map_err(|reason| anyhow!("{reason}"))?;
    }

    if let Some(spec) = &args.start {
        let id = parse_action(spec)?;
        engine
            .start_action(id)
            .map_err(|reason| anyhow!("{reason}"))?;
    }

    if let Some(root) = &args.packages {
        let shared = Arc::new(Mutex::new(engine));
        let mut host = modkit::ScriptHost::new(Arc::clone(&shared));
        host.load_packages(root)?;
        host.run_packages()?;
        drop(host);
        engine = Arc::try_unwrap(shared)
            .map_err(|_| anyhow!("script host still holds the engine"))?
            .into_inner()
            .unwrap_or_else(|e| e.into_inner());
    }

    let mut left = args.seconds;
    while left > 0 {
        let batch = left.min(MAX_CATCHUP_SECONDS);
        engine.store_cycles(batch * CYCLES_PER_SECOND);
        engine
            .process()
            .map_err(|violation| anyhow!("fatal: {violation}"))?;
        left -= batch;
    }

    println!(
        "Division | rank: {:.1} | sp: {} | money: ${} | stamina: {:.1}/{:.1} | team: {} (lost {}) | black ops: {}",
        engine.rank(),
        engine.skill_points(),
        engine.money(),
        engine.stamina(),
        engine.max_stamina(),
        engine.team_size(),
        engine.team_lost(),
        engine.num_black_ops_complete(),
    );
    for city in engine.cities() {
        println!(
            "City {} | pop: {:.3e} (est {:.3e}) | comms: {} | chaos: {:.2}",
            city.name, city.pop, city.pop_est, city.comms, city.chaos
        );
    }

    if let Some(path) = &args.save {
        let text = persistence::save_engine(&engine)?;
        std::fs::write(path, text).with_context(|| format!("writing save '{path}'"))?;
        println!("saved to {path}");
    }

    Ok(())
}

fn skill_cost_hint(engine: &Engine, name: &str) -> String {
    match engine.max_skill_upgrade(name) {
        Ok(count) if count > 0 => format!("affordable x{count}"),
        Ok(_) => "unaffordable".to_string(),
        Err(_) => "?".to_string(),
    }
}
