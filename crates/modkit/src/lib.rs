#![deny(warnings)]

//! Rhai scripting bridge over the engine.
//!
//! Scripts are untrusted: every fallible operation returns a
//! `{success, message}` map so an invalid request fails cleanly inside the
//! script instead of aborting it. Only `get_action` throws, per its
//! contract. Script packages are directories holding `metadata.yaml` and
//! `script.rhai`.

use rhai::{Dynamic, Engine as ScriptEngine, EvalAltResult, Map};
use serde::Deserialize;
use sim_core::{ActionId, ActionKind};
use sim_runtime::{Automation, Engine, FatalError, OpError};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

/// Errors raised by the bridge itself (not by script-visible operations).
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Bad package metadata.
    #[error("invalid metadata: {0}")]
    InvalidMeta(String),
    /// Filesystem failure while loading packages.
    #[error("io error: {0}")]
    Io(String),
    /// Script compilation or evaluation failure.
    #[error("rhai error: {0}")]
    Rhai(String),
}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        BridgeError::Io(e.to_string())
    }
}

impl From<Box<EvalAltResult>> for BridgeError {
    fn from(e: Box<EvalAltResult>) -> Self {
        BridgeError::Rhai(e.to_string())
    }
}

impl From<rhai::ParseError> for BridgeError {
    fn from(e: rhai::ParseError) -> Self {
        BridgeError::Rhai(e.to_string())
    }
}

/// Metadata for a script package.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageMeta {
    /// Stable package id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Package version string.
    pub version: String,
    /// Optional declared hooks.
    pub hooks: Option<Vec<String>>,
}

/// A discovered script package.
#[derive(Debug, Clone)]
pub struct ScriptPackage {
    /// Parsed metadata.
    pub meta: PackageMeta,
    /// Package directory.
    pub dir: PathBuf,
    /// Path to `script.rhai`.
    pub script_path: PathBuf,
}

/// One command inside a batched submission.
#[derive(Clone, Debug)]
pub enum BatchCommand {
    /// Start an action.
    Start(ActionId),
    /// Stop the active action.
    Stop,
    /// Buy skill levels.
    UpgradeSkill {
        /// Skill name.
        name: String,
        /// Levels to buy.
        count: u64,
    },
    /// Assign team members to an action.
    SetTeam {
        /// Target action.
        id: ActionId,
        /// Members to assign.
        count: u32,
    },
    /// Install an automation configuration.
    Automation(Automation),
    /// Bank cycles and process a batch.
    Process {
        /// Cycles to bank first.
        cycles: u32,
    },
}

/// Per-item outcomes plus the fatal error that aborted the batch, if any.
#[derive(Debug)]
pub struct BatchReport {
    /// One entry per executed command, in submission order.
    pub outcomes: Vec<Result<String, OpError>>,
    /// Set when a fatal invariant violation aborted the batch.
    pub fatal: Option<FatalError>,
}

/// Execute commands in order, isolating per-item validation failures.
///
/// An invalid item records its own error and the batch continues; only a
/// fatal invariant violation aborts the remainder, reported once.
pub fn run_batch(engine: &Arc<Mutex<Engine>>, commands: &[BatchCommand]) -> BatchReport {
    let mut outcomes = Vec::with_capacity(commands.len());
    let mut fatal = None;
    let mut guard = engine.lock().unwrap_or_else(|e| e.into_inner());
    for command in commands {
        match command {
            BatchCommand::Start(id) => {
                outcomes.push(guard.start_action(id.clone()).map(|()| format!("started {id}")));
            }
            BatchCommand::Stop => {
                guard.stop_action();
                outcomes.push(Ok("stopped".to_string()));
            }
            BatchCommand::UpgradeSkill { name, count } => {
                outcomes.push(
                    guard
                        .upgrade_skill(name, *count)
                        .map(|up| format!("{name} +{} for {} sp", up.count, up.cost)),
                );
            }
            BatchCommand::SetTeam { id, count } => {
                outcomes.push(
                    guard
                        .set_team_count(id, *count)
                        .map(|assigned| format!("{id} team set to {assigned}")),
                );
            }
            BatchCommand::Automation(automation) => {
                outcomes.push(
                    guard
                        .set_automation(automation.clone())
                        .map(|()| "automation configured".to_string()),
                );
            }
            BatchCommand::Process { cycles } => {
                guard.store_cycles(*cycles);
                match guard.process() {
                    Ok(seconds) => outcomes.push(Ok(format!("processed {seconds}s"))),
                    Err(violation) => {
                        error!(%violation, "fatal error aborted batch");
                        fatal = Some(violation);
                        break;
                    }
                }
            }
        }
    }
    BatchReport { outcomes, fatal }
}

fn ok_map(message: impl Into<String>) -> Map {
    let mut map = Map::new();
    map.insert("success".into(), Dynamic::from(true));
    map.insert("message".into(), Dynamic::from(message.into()));
    map
}

fn err_map(message: impl ToString) -> Map {
    let mut map = Map::new();
    map.insert("success".into(), Dynamic::from(false));
    map.insert("message".into(), Dynamic::from(message.to_string()));
    map
}

fn parse_kind(kind: &str) -> Option<ActionKind> {
    match kind.to_ascii_lowercase().as_str() {
        "contract" => Some(ActionKind::Contract),
        "operation" => Some(ActionKind::Operation),
        "blackop" | "black op" => Some(ActionKind::BlackOp),
        "general" => Some(ActionKind::General),
        _ => None,
    }
}

fn parse_id(kind: &str, name: &str) -> Result<ActionId, Map> {
    match parse_kind(kind) {
        Some(kind) => Ok(ActionId::new(kind, name)),
        None => Err(err_map(format!("unknown action kind: {kind}"))),
    }
}

/// The scripting host: a rhai engine with the bridge API registered over a
/// shared simulation engine.
pub struct ScriptHost {
    engine: Arc<Mutex<Engine>>,
    rhai: ScriptEngine,
    packages: Vec<ScriptPackage>,
}

impl ScriptHost {
    /// Build a host and register the bridge API.
    pub fn new(engine: Arc<Mutex<Engine>>) -> Self {
        let mut rhai = ScriptEngine::new();

        let shared = Arc::clone(&engine);
        rhai.register_fn("start_action", move |kind: &str, name: &str| -> Map {
            let id = match parse_id(kind, name) {
                Ok(id) => id,
                Err(map) => return map,
            };
            let mut guard = shared.lock().unwrap_or_else(|e| e.into_inner());
            match guard.start_action(id.clone()) {
                Ok(()) => ok_map(format!("started {id}")),
                Err(reason) => err_map(reason),
            }
        });

        let shared = Arc::clone(&engine);
        rhai.register_fn("stop_action", move || {
            let mut guard = shared.lock().unwrap_or_else(|e| e.into_inner());
            guard.stop_action();
        });

        let shared = Arc::clone(&engine);
        rhai.register_fn("upgrade_skill", move |name: &str, count: i64| -> Map {
            if count <= 0 {
                return err_map("upgrade count must be a positive integer");
            }
            let mut guard = shared.lock().unwrap_or_else(|e| e.into_inner());
            match guard.upgrade_skill(name, count as u64) {
                Ok(up) => ok_map(format!("{name} upgraded by {} for {} sp", up.count, up.cost)),
                Err(reason) => err_map(reason),
            }
        });

        let shared = Arc::clone(&engine);
        rhai.register_fn("get_success_range", move |kind: &str, name: &str| -> Map {
            let id = match parse_id(kind, name) {
                Ok(id) => id,
                Err(map) => return map,
            };
            let guard = shared.lock().unwrap_or_else(|e| e.into_inner());
            match guard.success_range(&id) {
                Ok((min, max)) => {
                    let mut map = ok_map("ok");
                    map.insert("min".into(), Dynamic::from(min));
                    map.insert("max".into(), Dynamic::from(max));
                    map
                }
                Err(reason) => err_map(reason),
            }
        });

        let shared = Arc::clone(&engine);
        rhai.register_fn(
            "get_action",
            move |kind: &str, name: &str| -> Result<Map, Box<EvalAltResult>> {
                let id = parse_id(kind, name)
                    .map_err(|_| format!("unknown action kind: {kind}"))?;
                let guard = shared.lock().unwrap_or_else(|e| e.into_inner());
                guard
                    .action_def(&id)
                    .map_err(|reason| reason.to_string())?;
                let state = guard
                    .action_state(&id)
                    .cloned()
                    .unwrap_or_else(|| sim_core::ActionState::new(0.0));
                let mut map = Map::new();
                map.insert("kind".into(), Dynamic::from(id.kind.to_string()));
                map.insert("name".into(), Dynamic::from(id.name.clone()));
                map.insert("level".into(), Dynamic::from(i64::from(state.level)));
                map.insert(
                    "max_level".into(),
                    Dynamic::from(i64::from(state.max_level())),
                );
                map.insert("count".into(), Dynamic::from(state.count));
                map.insert(
                    "successes".into(),
                    Dynamic::from(i64::from(state.successes)),
                );
                map.insert("failures".into(), Dynamic::from(i64::from(state.failures)));
                map.insert(
                    "team_count".into(),
                    Dynamic::from(i64::from(state.team_count)),
                );
                Ok(map)
            },
        );

        let shared = Arc::clone(&engine);
        rhai.register_fn("set_team", move |kind: &str, name: &str, count: i64| -> Map {
            let id = match parse_id(kind, name) {
                Ok(id) => id,
                Err(map) => return map,
            };
            let mut guard = shared.lock().unwrap_or_else(|e| e.into_inner());
            match guard.set_team_count(&id, count.max(0) as u32) {
                Ok(assigned) => ok_map(format!("team set to {assigned}")),
                Err(reason) => err_map(reason),
            }
        });

        let shared = Arc::clone(&engine);
        rhai.register_fn("travel", move |city: &str| -> Map {
            let mut guard = shared.lock().unwrap_or_else(|e| e.into_inner());
            match guard.travel(city) {
                Ok(()) => ok_map(format!("moved to {city}")),
                Err(reason) => err_map(reason),
            }
        });

        let shared = Arc::clone(&engine);
        rhai.register_fn("skill_level", move |name: &str| -> i64 {
            let guard = shared.lock().unwrap_or_else(|e| e.into_inner());
            i64::from(guard.skill_level(name))
        });

        let shared = Arc::clone(&engine);
        rhai.register_fn("rank", move || -> f64 {
            let guard = shared.lock().unwrap_or_else(|e| e.into_inner());
            guard.rank()
        });

        let shared = Arc::clone(&engine);
        rhai.register_fn("stamina", move || -> f64 {
            let guard = shared.lock().unwrap_or_else(|e| e.into_inner());
            guard.stamina()
        });

        // The waiter grabs the shared tick handle and parks outside the
        // engine lock, so the host loop keeps ticking.
        let shared = Arc::clone(&engine);
        rhai.register_fn("wait_next_tick", move |timeout_ms: i64| -> bool {
            let tick = {
                let guard = shared.lock().unwrap_or_else(|e| e.into_inner());
                guard.tick_handle()
            };
            tick.wait_next(Duration::from_millis(timeout_ms.max(0) as u64))
        });

        Self {
            engine,
            rhai,
            packages: Vec::new(),
        }
    }

    /// The shared simulation engine.
    pub fn engine(&self) -> &Arc<Mutex<Engine>> {
        &self.engine
    }

    /// Evaluate a script against the bridge API.
    pub fn eval(&self, script: &str) -> Result<Dynamic, BridgeError> {
        let ast = self.rhai.compile(script)?;
        Ok(self.rhai.eval_ast::<Dynamic>(&ast)?)
    }

    /// Discovered packages.
    pub fn packages(&self) -> &[ScriptPackage] {
        &self.packages
    }

    /// Scan a directory for `metadata.yaml` + `script.rhai` packages.
    pub fn load_packages<P: AsRef<Path>>(&mut self, root: P) -> Result<usize, BridgeError> {
        self.packages.clear();
        let entries = fs::read_dir(root.as_ref())?;
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let dir = entry.path();
            let meta_path = dir.join("metadata.yaml");
            let script_path = dir.join("script.rhai");
            if !meta_path.exists() || !script_path.exists() {
                continue;
            }
            let meta_text = fs::read_to_string(&meta_path)?;
            let meta: PackageMeta = serde_yaml::from_str(&meta_text)
                .map_err(|e| BridgeError::InvalidMeta(e.to_string()))?;
            info!(id = %meta.id, "script package loaded");
            self.packages.push(ScriptPackage {
                meta,
                dir,
                script_path,
            });
        }
        Ok(self.packages.len())
    }

    /// Run every loaded package's script.
    pub fn run_packages(&self) -> Result<(), BridgeError> {
        for package in &self.packages {
            let script = fs::read_to_string(&package.script_path)?;
            let _ = self.eval(&script)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_core::{Operative, StatVector};
    use sim_runtime::EngineConfig;

    fn host() -> ScriptHost {
        let stats = StatVector {
            hacking: 100.0,
            strength: 100.0,
            defense: 100.0,
            dexterity: 100.0,
            agility: 100.0,
            charisma: 100.0,
            intelligence: 100.0,
        };
        let engine = Engine::new(EngineConfig::default(), Operative::new(stats, 100.0));
        ScriptHost::new(Arc::new(Mutex::new(engine)))
    }

    fn map_success(value: &Dynamic) -> bool {
        value
            .clone()
            .cast::<Map>()
            .get("success")
            .map(|v| v.as_bool().unwrap_or(false))
            .unwrap_or(false)
    }

    #[test]
    fn scripts_can_start_and_stop_actions() {
        let host = host();
        let result = host
            .eval("start_action(\"contract\", \"Surveillance\")")
            .unwrap();
        assert!(map_success(&result));
        {
            let guard = host.engine().lock().unwrap();
            assert!(guard.action().is_some());
        }
        let _ = host.eval("stop_action()").unwrap();
        let guard = host.engine().lock().unwrap();
        assert!(guard.action().is_none());
    }

    #[test]
    fn invalid_requests_fail_inside_the_script() {
        let host = host();
        let result = host
            .eval("start_action(\"contract\", \"No Such Contract\")")
            .unwrap();
        assert!(!map_success(&result));
        let result = host.eval("upgrade_skill(\"Intuition\", 10)").unwrap();
        assert!(!map_success(&result), "no skill points yet");
        let result = host.eval("upgrade_skill(\"Intuition\", -3)").unwrap();
        assert!(!map_success(&result));
    }

    #[test]
    fn get_action_throws_on_unknown_identity() {
        let host = host();
        assert!(host.eval("get_action(\"contract\", \"Ghost\")").is_err());
        let result = host.eval("get_action(\"contract\", \"Surveillance\")").unwrap();
        let map = result.cast::<Map>();
        assert_eq!(map.get("level").unwrap().as_int().unwrap(), 1);
    }

    #[test]
    fn success_range_is_ordered() {
        let host = host();
        let result = host
            .eval("get_success_range(\"contract\", \"Surveillance\")")
            .unwrap();
        let map = result.cast::<Map>();
        let min = map.get("min").unwrap().as_float().unwrap();
        let max = map.get("max").unwrap().as_float().unwrap();
        assert!(min >= 0.0 && max <= 1.0 && min <= max);
    }

    #[test]
    fn batches_isolate_per_item_failures() {
        let host = host();
        let commands = vec![
            BatchCommand::Start(ActionId::new(ActionKind::Contract, "Ghost")),
            BatchCommand::Start(ActionId::new(ActionKind::Contract, "Surveillance")),
            BatchCommand::UpgradeSkill {
                name: "No Such Skill".to_string(),
                count: 1,
            },
            BatchCommand::Stop,
        ];
        let report = run_batch(host.engine(), &commands);
        assert!(report.fatal.is_none());
        assert_eq!(report.outcomes.len(), 4);
        assert!(report.outcomes[0].is_err());
        assert!(report.outcomes[1].is_ok());
        assert!(report.outcomes[2].is_err());
        assert!(report.outcomes[3].is_ok());
    }

    #[test]
    fn packages_load_from_a_directory() {
        let root = std::env::temp_dir().join(format!("modkit-pkg-{}", std::process::id()));
        let dir = root.join("demo");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("metadata.yaml"),
            "id: demo\nname: Demo\nversion: \"0.1\"\n",
        )
        .unwrap();
        fs::write(dir.join("script.rhai"), "rank()").unwrap();

        let mut host = host();
        let loaded = host.load_packages(&root).unwrap();
        assert_eq!(loaded, 1);
        assert_eq!(host.packages()[0].meta.id, "demo");
        host.run_packages().unwrap();
        fs::remove_dir_all(&root).ok();
    }
}
