#![deny(warnings)]

//! The division engine: owns all mutable state, composes the resolver and
//! city model, and runs the tick scheduler, automation controller and
//! rank/skill-point progression.
//!
//! Single-threaded and cooperative: a host loop banks real-time cycles via
//! [`Engine::store_cycles`] and drives [`Engine::process`] at a fixed
//! cadence. All "in-progress" work is a progress accumulator advanced once
//! per processed batch; nothing blocks.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sim_actions::{self as actions, ResolveCtx, Unavailable};
use sim_core::{
    catalog, ActionId, ActionKind, ActionRef, ActionState, Catalog, City, CityImpact,
    GeneralEffect, MultiplierKind, Operative, SkillCatalog,
};
use sim_skills::{self as skills, MultiplierSet, SkillError};
use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Real-time cycles that make up one simulated second.
pub const CYCLES_PER_SECOND: u32 = 5;
/// Cap on seconds consumed per `process` call, bounding catch-up after the
/// host was backgrounded.
pub const MAX_CATCHUP_SECONDS: u32 = 5;
/// Fraction of max stamina regenerated per simulated second.
pub const STAMINA_REGEN_FRAC: f64 = 0.0085;
/// Max-rank needed per skill point.
pub const RANKS_PER_SKILL_POINT: f64 = 3.0;

const TRAINING_STAMINA_BONUS: f64 = 0.5;
const RECOVERY_HEAL_FRAC: f64 = 0.25;
const RECOVERY_STAMINA_BANK: f64 = 5.0;
const FIELD_ANALYSIS_RANK: f64 = 0.1;
const INCITE_CHAOS_CURRENT: f64 = 10.0;
const INCITE_CHAOS_OTHERS: f64 = 1.0;
const INCITE_COUNT_GAIN: f64 = 1.0;
const DIPLOMACY_CHARISMA_EXP: f64 = 0.3;

/// Input-validation failures, returned as structured results so untrusted
/// callers (scripts) receive a clean error without aborting.
#[derive(Debug, Error, PartialEq)]
pub enum OpError {
    /// No catalog entry with that identity.
    #[error("unknown action: {0}")]
    UnknownAction(String),
    /// No skill with that name.
    #[error("unknown skill: {0}")]
    UnknownSkill(String),
    /// No city with that name.
    #[error("unknown city: {0}")]
    UnknownCity(String),
    /// The action exists but cannot currently be started.
    #[error(transparent)]
    Unavailable(#[from] Unavailable),
    /// Skill upgrade rejected.
    #[error(transparent)]
    Skill(#[from] SkillError),
    /// Automation target missing or of a kind that never auto-repeats.
    #[error("invalid automation target: {0}")]
    InvalidAutomationTarget(String),
}

/// Invariant violations. These indicate a catalog or logic defect, not a
/// caller mistake: the offending call path aborts and the error is
/// surfaced to the top-level reporter.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FatalError {
    /// A non-finite value reached a numeric mutator.
    #[error("non-finite value in {0} mutation")]
    NonFinite(&'static str),
}

/// One-slot tick notification.
///
/// `notify` bumps a generation counter; `wait_next` blocks until the
/// generation changes. At most one notification is pending: waiters that
/// arrive between ticks all share it, none queue.
#[derive(Debug, Default)]
pub struct TickSignal {
    generation: Mutex<u64>,
    cv: Condvar,
}

impl TickSignal {
    /// Wake every current waiter.
    pub fn notify(&self) {
        let mut generation = self
            .generation
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *generation = generation.wrapping_add(1);
        self.cv.notify_all();
    }

    /// Block until the next `notify` or the timeout. Returns whether a
    /// tick was observed.
    pub fn wait_next(&self, timeout: Duration) -> bool {
        let generation = self
            .generation
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let start = *generation;
        let (_guard, result) = self
            .cv
            .wait_timeout_while(generation, timeout, |g| *g == start)
            .unwrap_or_else(|e| e.into_inner());
        !result.timed_out()
    }
}

/// Hysteresis controller switching the active action on stamina bounds.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Automation {
    /// Whether the controller runs at all.
    pub enabled: bool,
    /// Switch to `low_action` at or below this stamina.
    pub stamina_low: f64,
    /// Switch to `high_action` at or above this stamina.
    pub stamina_high: f64,
    /// Target when stamina is low.
    pub low_action: Option<ActionId>,
    /// Target when stamina is high.
    pub high_action: Option<ActionId>,
}

/// Engine construction parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seed for the deterministic RNG.
    pub rng_seed: u64,
    /// Global skill cost multiplier (prestige effects plug in here).
    pub skill_cost_mult: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rng_seed: 42,
            skill_cost_mult: 1.0,
        }
    }
}

/// Per-action counters preserved across save/restore.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedAction {
    /// Canonical action identity.
    pub id: ActionId,
    /// Lifetime successes.
    pub successes: u32,
    /// Lifetime failures.
    pub failures: u32,
    /// Current level.
    pub level: u32,
    /// Auto-level flag.
    pub auto_level: bool,
    /// Assigned team members.
    pub team_count: u32,
    /// Available instances.
    pub count: f64,
}

/// The allow-listed engine fields that persist.
///
/// Anything derivable (aggregated multipliers, max stamina, max level) is
/// deliberately absent and recomputed on restore.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SaveState {
    /// Current rank.
    pub rank: f64,
    /// Highest rank ever reached.
    pub max_rank: f64,
    /// Unspent skill points.
    pub skill_points: u64,
    /// Lifetime skill points (threshold gate).
    pub total_skill_points: u64,
    /// Current stamina.
    pub stamina: f64,
    /// Banked bonus stamina.
    pub stamina_bonus: f64,
    /// Permanent max-stamina bonus from training.
    pub training_bonus: f64,
    /// Earned money.
    pub money: Decimal,
    /// Banked real-time cycles.
    pub stored_cycles: u32,
    /// Team size (humans + sleeves).
    pub team_size: u32,
    /// Lifetime team losses.
    pub team_lost: u64,
    /// Supporting sleeves.
    pub sleeve_size: u32,
    /// Completed black-op ordinal.
    pub num_black_ops_complete: u32,
    /// Current city name.
    pub city: String,
    /// Active action, if any.
    pub action: Option<ActionId>,
    /// Automation configuration.
    pub automation: Automation,
    /// Per-city state.
    pub cities: Vec<City>,
    /// Per-action counters.
    pub actions: Vec<SavedAction>,
    /// Per-skill levels.
    pub skills: Vec<(String, u32)>,
}

/// Errors restoring a save.
#[derive(Debug, Error, PartialEq)]
pub enum RestoreError {
    /// A saved action identity has no catalog entry.
    #[error("saved action has no catalog entry: {0}")]
    UnknownAction(String),
    /// A saved skill name has no catalog entry.
    #[error("saved skill has no catalog entry: {0}")]
    UnknownSkill(String),
    /// A saved city name has no catalog entry.
    #[error("saved city has no catalog entry: {0}")]
    UnknownCity(String),
}

struct Resolution {
    success: bool,
    stamina_cost: f64,
    rank_delta: f64,
    damage: f64,
    money: Decimal,
    impact: Option<CityImpact>,
    effect: Option<GeneralEffect>,
    team_used: u32,
    min_casualties: u32,
    is_black_op: bool,
}

/// The division object: all mutable state lives here.
pub struct Engine {
    config: EngineConfig,
    catalog: Catalog,
    skill_catalog: SkillCatalog,
    /// The character actions resolve against.
    pub operative: Operative,
    cities: Vec<City>,
    current_city: usize,
    action_states: BTreeMap<ActionId, ActionState>,
    skill_levels: BTreeMap<String, u32>,
    mults: MultiplierSet,
    rank: f64,
    max_rank: f64,
    skill_points: u64,
    total_skill_points: u64,
    stamina: f64,
    stamina_bonus: f64,
    training_bonus: f64,
    money: Decimal,
    team_size: u32,
    team_lost: u64,
    sleeve_size: u32,
    pending_sleeve_shocks: u32,
    hospitalizations: u32,
    num_black_ops_complete: u32,
    action: Option<ActionId>,
    action_time_current: u64,
    action_time_to_complete: u64,
    action_time_overflow: u64,
    stored_cycles: u32,
    automation: Automation,
    event_countdown: u32,
    rng: ChaCha8Rng,
    tick: Arc<TickSignal>,
}

impl Engine {
    /// Build an engine over the standard catalogs.
    pub fn new(config: EngineConfig, operative: Operative) -> Self {
        let action_catalog = catalog::standard_catalog();
        let skill_catalog = catalog::standard_skills();
        let cities = catalog::standard_cities();
        let mut rng = ChaCha8Rng::seed_from_u64(config.rng_seed);
        let event_countdown = actions::roll_event_countdown(&mut rng);

        let mut action_states = BTreeMap::new();
        for id in action_catalog.ids() {
            let initial = match action_catalog.get(&id) {
                Some(entry) => entry.common().map(|c| c.initial_count).unwrap_or(0.0),
                None => 0.0,
            };
            action_states.insert(id, ActionState::new(initial));
        }

        let mut engine = Self {
            config,
            catalog: action_catalog,
            skill_catalog,
            operative,
            cities,
            current_city: 0,
            action_states,
            skill_levels: BTreeMap::new(),
            mults: MultiplierSet::identity(),
            rank: 0.0,
            max_rank: 0.0,
            skill_points: 0,
            total_skill_points: 0,
            stamina: 0.0,
            stamina_bonus: 0.0,
            training_bonus: 0.0,
            money: Decimal::ZERO,
            team_size: 0,
            team_lost: 0,
            sleeve_size: 0,
            pending_sleeve_shocks: 0,
            hospitalizations: 0,
            num_black_ops_complete: 0,
            action: None,
            action_time_current: 0,
            action_time_to_complete: 0,
            action_time_overflow: 0,
            stored_cycles: 0,
            automation: Automation::default(),
            event_countdown,
            rng,
            tick: Arc::new(TickSignal::default()),
        };
        engine.stamina = engine.max_stamina();
        engine
    }

    /// Current rank.
    pub fn rank(&self) -> f64 {
        self.rank
    }

    /// Highest rank ever reached.
    pub fn max_rank(&self) -> f64 {
        self.max_rank
    }

    /// Unspent skill points.
    pub fn skill_points(&self) -> u64 {
        self.skill_points
    }

    /// Lifetime skill points.
    pub fn total_skill_points(&self) -> u64 {
        self.total_skill_points
    }

    /// Earned money.
    pub fn money(&self) -> Decimal {
        self.money
    }

    /// Current stamina.
    pub fn stamina(&self) -> f64 {
        self.stamina
    }

    /// Maximum stamina, derived from effective agility, skill multipliers
    /// and the permanent training bonus.
    pub fn max_stamina(&self) -> f64 {
        let eff = self.operative.effective_stats(
            self.mults.get(MultiplierKind::EffCombat),
            self.mults.get(MultiplierKind::EffCharisma),
        );
        eff.agility.max(0.0).powf(0.8) * self.mults.get(MultiplierKind::MaxStamina)
            + self.training_bonus
    }

    /// Team size (humans + sleeves).
    pub fn team_size(&self) -> u32 {
        self.team_size
    }

    /// Lifetime team losses.
    pub fn team_lost(&self) -> u64 {
        self.team_lost
    }

    /// Supporting sleeves currently in the team.
    pub fn sleeve_size(&self) -> u32 {
        self.sleeve_size
    }

    /// Times the operative was hospitalized.
    pub fn hospitalizations(&self) -> u32 {
        self.hospitalizations
    }

    /// Completed black-op ordinal.
    pub fn num_black_ops_complete(&self) -> u32 {
        self.num_black_ops_complete
    }

    /// The active action, if any.
    pub fn action(&self) -> Option<&ActionId> {
        self.action.as_ref()
    }

    /// All cities.
    pub fn cities(&self) -> &[City] {
        &self.cities
    }

    /// The current city.
    pub fn current_city(&self) -> &City {
        &self.cities[self.current_city]
    }

    /// The immutable action catalog.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The immutable skill catalog.
    pub fn skill_catalog(&self) -> &SkillCatalog {
        &self.skill_catalog
    }

    /// Aggregated skill multipliers.
    pub fn multipliers(&self) -> &MultiplierSet {
        &self.mults
    }

    /// Per-identity mutable counters.
    pub fn action_state(&self, id: &ActionId) -> Option<&ActionState> {
        self.action_states.get(id)
    }

    /// Current level of a skill (0 when unbought).
    pub fn skill_level(&self, name: &str) -> u32 {
        self.skill_levels.get(name).copied().unwrap_or(0)
    }

    /// Automation configuration.
    pub fn automation(&self) -> &Automation {
        &self.automation
    }

    /// Shared handle for tick-boundary waiters.
    pub fn tick_handle(&self) -> Arc<TickSignal> {
        Arc::clone(&self.tick)
    }

    fn resolve_ctx(&self) -> ResolveCtx<'_> {
        ResolveCtx {
            mults: &self.mults,
            city: &self.cities[self.current_city],
            team_size: self.team_size,
            sleeve_size: self.sleeve_size,
            stamina: self.stamina,
            max_stamina: self.max_stamina(),
            rank: self.rank,
            num_black_ops_complete: self.num_black_ops_complete,
        }
    }

    fn lookup(&self, id: &ActionId) -> Result<ActionRef<'_>, OpError> {
        self.catalog
            .get(id)
            .ok_or_else(|| OpError::UnknownAction(id.to_string()))
    }

    /// Catalog entry for an identity; errors on unknown identities.
    pub fn action_def(&self, id: &ActionId) -> Result<ActionRef<'_>, OpError> {
        self.lookup(id)
    }

    /// Estimated success-chance bounds for an identity.
    pub fn success_range(&self, id: &ActionId) -> Result<(f64, f64), OpError> {
        let action = self.lookup(id)?;
        let state = self
            .action_states
            .get(id)
            .cloned()
            .unwrap_or_else(|| ActionState::new(0.0));
        Ok(actions::success_range(
            action,
            &state,
            &self.operative,
            &self.resolve_ctx(),
        ))
    }

    /// Start an action after an availability check.
    pub fn start_action(&mut self, id: ActionId) -> Result<(), OpError> {
        let state = self
            .action_states
            .get(&id)
            .cloned()
            .unwrap_or_else(|| ActionState::new(0.0));
        let seconds = {
            let action = self.lookup(&id)?;
            let ctx = self.resolve_ctx();
            actions::availability(action, &state, &ctx)?;
            actions::action_time(action, &state, &self.operative, &ctx)
        };
        // Accumulated overflow only survives an immediate restart of the
        // same action.
        if self.action.as_ref() != Some(&id) {
            self.action_time_overflow = 0;
        }
        info!(action = %id, seconds, "action started");
        self.action = Some(id);
        self.action_time_current = 0;
        self.action_time_to_complete = seconds;
        Ok(())
    }

    /// Stop the active action. No partial-completion credit is retained.
    pub fn stop_action(&mut self) {
        if let Some(id) = self.action.take() {
            info!(action = %id, "action stopped");
        }
        self.action_time_current = 0;
        self.action_time_to_complete = 0;
        self.action_time_overflow = 0;
    }

    /// External interruption: the player began unrelated work. Forces Idle
    /// and disables automation so it does not fight the player.
    pub fn interrupt(&mut self) {
        if self.automation.enabled {
            warn!("external interruption: automation disabled");
            self.automation.enabled = false;
        }
        self.stop_action();
    }

    /// Move to another city, stopping any active action.
    pub fn travel(&mut self, city: &str) -> Result<(), OpError> {
        let index = self
            .cities
            .iter()
            .position(|c| c.name == city)
            .ok_or_else(|| OpError::UnknownCity(city.to_string()))?;
        self.stop_action();
        self.current_city = index;
        Ok(())
    }

    /// Assign team members to a team action; clamps to the current team.
    pub fn set_team_count(&mut self, id: &ActionId, count: u32) -> Result<u32, OpError> {
        let action = self.lookup(id)?;
        if !action.is_team_action() {
            return Err(OpError::UnknownAction(format!("{id} takes no team")));
        }
        let clamped = count.min(self.team_size);
        if let Some(state) = self.action_states.get_mut(id) {
            state.team_count = clamped;
        }
        Ok(clamped)
    }

    /// Toggle auto-leveling for a levelable action.
    pub fn set_auto_level(&mut self, id: &ActionId, auto: bool) -> Result<(), OpError> {
        let action = self.lookup(id)?;
        if !action.is_levelable() {
            return Err(OpError::UnknownAction(format!("{id} has no levels")));
        }
        if let Some(state) = self.action_states.get_mut(id) {
            state.auto_level = auto;
            if auto {
                state.level = state.max_level();
            }
        }
        Ok(())
    }

    /// Set the level of a levelable action, clamped to the unlocked max.
    pub fn set_level(&mut self, id: &ActionId, level: u32) -> Result<u32, OpError> {
        let action = self.lookup(id)?;
        if !action.is_levelable() {
            return Err(OpError::UnknownAction(format!("{id} has no levels")));
        }
        let Some(state) = self.action_states.get_mut(id) else {
            return Err(OpError::UnknownAction(id.to_string()));
        };
        let clamped = level.clamp(1, state.max_level());
        state.level = clamped;
        state.auto_level = false;
        Ok(clamped)
    }

    /// Validate and install an automation configuration.
    pub fn set_automation(&mut self, automation: Automation) -> Result<(), OpError> {
        for target in [&automation.low_action, &automation.high_action] {
            if let Some(id) = target {
                let action = self.lookup(id)?;
                if matches!(action, ActionRef::BlackOp(_)) {
                    return Err(OpError::InvalidAutomationTarget(id.to_string()));
                }
            }
        }
        self.automation = automation;
        Ok(())
    }

    /// Buy skill levels, recomputing all multipliers on success.
    pub fn upgrade_skill(&mut self, name: &str, count: u64) -> Result<skills::Upgrade, OpError> {
        let def = self
            .skill_catalog
            .get(name)
            .ok_or_else(|| OpError::UnknownSkill(name.to_string()))?;
        let level = self.skill_levels.get(name).copied().unwrap_or(0);
        let upgrade = skills::can_upgrade(
            def,
            level,
            self.skill_points,
            count,
            self.config.skill_cost_mult,
        )?;
        self.skill_points -= upgrade.cost;
        let new_level = level.saturating_add(upgrade.count.min(u64::from(u32::MAX)) as u32);
        self.skill_levels.insert(name.to_string(), new_level);
        self.mults = MultiplierSet::aggregate(&self.skill_catalog, &self.skill_levels);
        self.stamina = self.stamina.min(self.max_stamina());
        info!(skill = name, level = new_level, cost = upgrade.cost, "skill upgraded");
        Ok(upgrade)
    }

    /// Largest affordable upgrade for a skill with the current points.
    pub fn max_skill_upgrade(&self, name: &str) -> Result<u64, OpError> {
        let def = self
            .skill_catalog
            .get(name)
            .ok_or_else(|| OpError::UnknownSkill(name.to_string()))?;
        let level = self.skill_levels.get(name).copied().unwrap_or(0);
        let mut count = skills::max_upgrade_count(
            def,
            level,
            self.skill_points,
            self.config.skill_cost_mult,
        );
        if let Some(max_level) = def.max_level {
            count = count.min(u64::from(max_level.saturating_sub(level)));
        }
        Ok(count)
    }

    /// A supporting sleeve joins the team.
    pub fn sleeve_join(&mut self) {
        self.sleeve_size += 1;
        self.team_size += 1;
    }

    /// A supporting sleeve leaves the team.
    pub fn sleeve_leave(&mut self) {
        if self.sleeve_size == 0 {
            return;
        }
        self.sleeve_size -= 1;
        self.team_size = self.team_size.saturating_sub(1).max(self.sleeve_size);
    }

    /// Drain the pending sleeve-shock counter for the external subsystem.
    pub fn take_sleeve_shocks(&mut self) -> u32 {
        std::mem::take(&mut self.pending_sleeve_shocks)
    }

    /// Apply a rank delta, flooring at 0 and banking skill points earned
    /// at every `RANKS_PER_SKILL_POINT` of max rank.
    pub fn change_rank(&mut self, delta: f64) -> Result<(), FatalError> {
        if !delta.is_finite() {
            return Err(FatalError::NonFinite("rank"));
        }
        self.rank = (self.rank + delta).max(0.0);
        if self.rank > self.max_rank {
            self.max_rank = self.rank;
        }
        let earned = (self.max_rank / RANKS_PER_SKILL_POINT).floor() as u64;
        if earned > self.total_skill_points {
            self.skill_points += earned - self.total_skill_points;
            self.total_skill_points = earned;
        }
        Ok(())
    }

    /// Damage the operative; hospitalizes (and fully heals) on collapse.
    /// Returns whether hospitalization happened.
    pub fn take_damage(&mut self, damage: f64) -> Result<bool, FatalError> {
        if !damage.is_finite() {
            return Err(FatalError::NonFinite("hp"));
        }
        self.operative.hp -= damage.max(0.0);
        if self.operative.hp <= 0.0 {
            self.hospitalizations += 1;
            self.operative.hp = self.operative.max_hp;
            warn!(count = self.hospitalizations, "operative hospitalized");
            return Ok(true);
        }
        Ok(false)
    }

    /// Bank real-time cycles for the next `process` call.
    pub fn store_cycles(&mut self, cycles: u32) {
        self.stored_cycles = self.stored_cycles.saturating_add(cycles);
    }

    /// Convert banked cycles into simulated seconds and advance everything.
    /// Returns the number of seconds processed (0 when below one second).
    pub fn process(&mut self) -> Result<u32, FatalError> {
        if self.stored_cycles < CYCLES_PER_SECOND {
            return Ok(0);
        }
        let seconds = (self.stored_cycles / CYCLES_PER_SECOND).min(MAX_CATCHUP_SECONDS);
        self.stored_cycles -= seconds * CYCLES_PER_SECOND;

        // Stamina exhausted during the previous batch forces Idle before
        // any new progress is credited.
        if self.action.is_some() && self.stamina <= 0.0 {
            info!("stamina exhausted, going idle");
            self.stop_action();
        }

        self.regen_stamina(seconds);
        self.regen_counts(seconds);
        for city in &mut self.cities {
            actions::decay_chaos(city, seconds);
        }
        self.tick_random_event(seconds);
        self.advance_action(seconds)?;
        self.run_automation();
        self.tick.notify();
        Ok(seconds)
    }

    fn regen_stamina(&mut self, seconds: u32) {
        let max = self.max_stamina();
        let gain_mult = self.mults.get(MultiplierKind::StaminaGain);
        for _ in 0..seconds {
            let mut gain = STAMINA_REGEN_FRAC * max * gain_mult;
            if self.stamina_bonus > 0.0 {
                let extra = gain.min(self.stamina_bonus);
                self.stamina_bonus -= extra;
                gain += extra;
            }
            self.stamina = (self.stamina + gain).min(max);
        }
    }

    fn regen_counts(&mut self, seconds: u32) {
        for (id, state) in &mut self.action_states {
            if let Some(entry) = self.catalog.get(id) {
                if let Some(common) = entry.common() {
                    state.count += common.count_growth * f64::from(seconds);
                }
            }
        }
    }

    fn tick_random_event(&mut self, seconds: u32) {
        if self.event_countdown > seconds {
            self.event_countdown -= seconds;
            return;
        }
        actions::run_random_event(&mut self.cities, &mut self.rng);
        self.event_countdown = actions::roll_event_countdown(&mut self.rng);
    }

    fn advance_action(&mut self, seconds: u32) -> Result<(), FatalError> {
        let Some(id) = self.action.clone() else {
            return Ok(());
        };
        self.action_time_current += u64::from(seconds) + self.action_time_overflow;
        self.action_time_overflow = 0;
        if self.action_time_current < self.action_time_to_complete {
            return Ok(());
        }
        let overflow = self.action_time_current - self.action_time_to_complete;
        self.complete_action(id, overflow)
    }

    fn complete_action(&mut self, id: ActionId, overflow: u64) -> Result<(), FatalError> {
        let Some(mut state) = self.action_states.get(&id).cloned() else {
            self.stop_action();
            return Ok(());
        };
        if self.catalog.get(&id).is_none() {
            self.stop_action();
            return Ok(());
        }

        let resolution = {
            let Some(action) = self.catalog.get(&id) else {
                return Ok(());
            };
            let ctx = ResolveCtx {
                mults: &self.mults,
                city: &self.cities[self.current_city],
                team_size: self.team_size,
                sleeve_size: self.sleeve_size,
                stamina: self.stamina,
                max_stamina: self.max_stamina(),
                rank: self.rank,
                num_black_ops_complete: self.num_black_ops_complete,
            };
            let outcome =
                actions::attempt(action, &mut state, &self.operative, &ctx, &mut self.rng);
            let success = outcome.success;
            match action {
                ActionRef::Contract(c) => Resolution {
                    success,
                    stamina_cost: c.common.stamina_cost,
                    rank_delta: if success {
                        actions::rank_reward(&c.common, state.level)
                    } else {
                        -c.common.rank_loss
                    },
                    damage: if success {
                        0.0
                    } else {
                        actions::failure_damage(&c.common, state.level)
                    },
                    money: if success {
                        actions::contract_money(
                            c.base_money,
                            &c.common,
                            state.level,
                            ctx.mults.get(MultiplierKind::Money),
                        )
                    } else {
                        Decimal::ZERO
                    },
                    impact: None,
                    effect: None,
                    team_used: 0,
                    min_casualties: 0,
                    is_black_op: false,
                },
                ActionRef::Operation(o) => Resolution {
                    success,
                    stamina_cost: o.common.stamina_cost,
                    rank_delta: if success {
                        actions::rank_reward(&o.common, state.level)
                    } else {
                        -o.common.rank_loss
                    },
                    damage: if success {
                        0.0
                    } else {
                        actions::failure_damage(&o.common, state.level)
                    },
                    money: Decimal::ZERO,
                    impact: success.then_some(o.impact),
                    effect: None,
                    team_used: state.team_count.min(ctx.team_size),
                    min_casualties: 0,
                    is_black_op: false,
                },
                ActionRef::BlackOp(b) => Resolution {
                    success,
                    stamina_cost: b.common.stamina_cost,
                    rank_delta: if success {
                        b.common.rank_gain
                    } else {
                        -b.common.rank_loss
                    },
                    damage: if success {
                        0.0
                    } else {
                        actions::failure_damage(&b.common, 1)
                    },
                    money: Decimal::ZERO,
                    impact: None,
                    effect: None,
                    team_used: state.team_count.min(ctx.team_size),
                    min_casualties: 1,
                    is_black_op: true,
                },
                ActionRef::General(g) => Resolution {
                    success,
                    stamina_cost: g.stamina_cost,
                    rank_delta: 0.0,
                    damage: 0.0,
                    money: Decimal::ZERO,
                    impact: None,
                    effect: Some(g.effect),
                    team_used: 0,
                    min_casualties: 0,
                    is_black_op: false,
                },
            }
        };

        self.stamina = (self.stamina - resolution.stamina_cost).max(0.0);
        if resolution.rank_delta != 0.0 {
            self.change_rank(resolution.rank_delta)?;
        }
        if resolution.money > Decimal::ZERO {
            self.money += resolution.money;
        }
        if resolution.damage > 0.0 {
            self.take_damage(resolution.damage)?;
        }
        if resolution.team_used > 0 {
            let casualties = actions::resolve_casualties(
                resolution.team_used,
                resolution.success,
                resolution.min_casualties,
                &mut self.team_size,
                self.sleeve_size,
                &mut self.rng,
            );
            self.team_lost += u64::from(casualties.deaths);
            self.pending_sleeve_shocks += casualties.shocked_sleeves;
            // The assignment cannot exceed the shrunken team.
            state.team_count = state.team_count.min(self.team_size);
        }
        if let Some(impact) = resolution.impact {
            let estimate_mult = self.mults.get(MultiplierKind::SuccessChanceEstimate);
            actions::apply_city_impact(
                &mut self.cities[self.current_city],
                impact,
                estimate_mult,
                &mut self.rng,
            );
        }
        if let Some(effect) = resolution.effect {
            self.apply_general_effect(effect, resolution.success)?;
        }
        if resolution.success && resolution.is_black_op {
            self.num_black_ops_complete += 1;
        }
        debug!(action = %id, success = resolution.success, "action completed");

        self.action_states.insert(id.clone(), state.clone());

        if resolution.is_black_op {
            // Black op completion is terminal, success or not.
            self.stop_action();
            return Ok(());
        }

        // Auto-repeat while still available, carrying unconsumed time into
        // the next run of the same action.
        let next_seconds = match self.catalog.get(&id) {
            Some(action) => {
                let ctx = self.resolve_ctx();
                match actions::availability(action, &state, &ctx) {
                    Ok(()) => Some(actions::action_time(action, &state, &self.operative, &ctx)),
                    Err(reason) => {
                        info!(action = %id, %reason, "no longer available, going idle");
                        None
                    }
                }
            }
            None => None,
        };
        match next_seconds {
            Some(seconds) => {
                self.action_time_current = 0;
                self.action_time_to_complete = seconds;
                self.action_time_overflow = overflow;
            }
            None => self.stop_action(),
        }
        Ok(())
    }

    fn apply_general_effect(
        &mut self,
        effect: GeneralEffect,
        success: bool,
    ) -> Result<(), FatalError> {
        match effect {
            GeneralEffect::Training => {
                self.training_bonus += TRAINING_STAMINA_BONUS;
            }
            GeneralEffect::FieldAnalysis => {
                let estimate_mult = self.mults.get(MultiplierKind::SuccessChanceEstimate);
                actions::improve_estimate(&mut self.cities[self.current_city], estimate_mult);
                self.change_rank(FIELD_ANALYSIS_RANK)?;
            }
            GeneralEffect::Recruitment => {
                if success {
                    self.team_size += 1;
                    info!(team_size = self.team_size, "recruit joined");
                }
            }
            GeneralEffect::Diplomacy => {
                let eff = self.operative.effective_stats(
                    self.mults.get(MultiplierKind::EffCombat),
                    self.mults.get(MultiplierKind::EffCharisma),
                );
                let fraction =
                    (eff.charisma.max(0.0).powf(DIPLOMACY_CHARISMA_EXP) / 100.0).min(1.0);
                let city = &mut self.cities[self.current_city];
                city.chaos = (city.chaos * (1.0 - fraction)).max(0.0);
            }
            GeneralEffect::Recovery => {
                let heal = self.operative.max_hp * RECOVERY_HEAL_FRAC;
                self.operative.hp = (self.operative.hp + heal).min(self.operative.max_hp);
                self.stamina_bonus += RECOVERY_STAMINA_BANK;
            }
            GeneralEffect::InciteUnrest => {
                for (index, city) in self.cities.iter_mut().enumerate() {
                    let amount = if index == self.current_city {
                        INCITE_CHAOS_CURRENT
                    } else {
                        INCITE_CHAOS_OTHERS
                    };
                    actions::add_chaos(city, amount);
                }
                for (aid, state) in &mut self.action_states {
                    if matches!(aid.kind, ActionKind::Contract | ActionKind::Operation) {
                        state.count += INCITE_COUNT_GAIN;
                    }
                }
            }
        }
        Ok(())
    }

    fn run_automation(&mut self) {
        if !self.automation.enabled {
            return;
        }
        let target = if self.stamina <= self.automation.stamina_low {
            self.automation.low_action.clone()
        } else if self.stamina >= self.automation.stamina_high {
            self.automation.high_action.clone()
        } else {
            None
        };
        let Some(target) = target else {
            return;
        };
        // Never force a restart of an already-running target.
        if self.action.as_ref() == Some(&target) {
            return;
        }
        if let Err(reason) = self.start_action(target.clone()) {
            debug!(action = %target, %reason, "automation target unavailable");
        }
    }

    /// Snapshot the allow-listed persistent fields.
    pub fn to_save(&self) -> SaveState {
        SaveState {
            rank: self.rank,
            max_rank: self.max_rank,
            skill_points: self.skill_points,
            total_skill_points: self.total_skill_points,
            stamina: self.stamina,
            stamina_bonus: self.stamina_bonus,
            training_bonus: self.training_bonus,
            money: self.money,
            stored_cycles: self.stored_cycles,
            team_size: self.team_size,
            team_lost: self.team_lost,
            sleeve_size: self.sleeve_size,
            num_black_ops_complete: self.num_black_ops_complete,
            city: self.cities[self.current_city].name.clone(),
            action: self.action.clone(),
            automation: self.automation.clone(),
            cities: self.cities.clone(),
            actions: self
                .action_states
                .iter()
                .map(|(id, s)| SavedAction {
                    id: id.clone(),
                    successes: s.successes,
                    failures: s.failures,
                    level: s.level,
                    auto_level: s.auto_level,
                    team_count: s.team_count,
                    count: s.count,
                })
                .collect(),
            skills: self
                .skill_levels
                .iter()
                .map(|(name, level)| (name.clone(), *level))
                .collect(),
        }
    }

    /// Rebuild an engine from a save: fresh catalogs with the saved
    /// counters overlaid, derived state recomputed.
    pub fn restore(
        config: EngineConfig,
        operative: Operative,
        save: SaveState,
    ) -> Result<Self, RestoreError> {
        let mut engine = Self::new(config, operative);
        engine.rank = save.rank.max(0.0);
        engine.max_rank = save.max_rank.max(engine.rank);
        engine.skill_points = save.skill_points;
        engine.total_skill_points = save.total_skill_points;
        engine.stamina_bonus = save.stamina_bonus.max(0.0);
        engine.training_bonus = save.training_bonus.max(0.0);
        engine.money = save.money;
        engine.stored_cycles = save.stored_cycles;
        engine.team_size = save.team_size;
        engine.team_lost = save.team_lost;
        engine.sleeve_size = save.sleeve_size.min(save.team_size);
        engine.num_black_ops_complete = save.num_black_ops_complete;

        for saved_city in save.cities {
            let name = saved_city.name.clone();
            match engine.cities.iter_mut().find(|c| c.name == name) {
                Some(city) => *city = saved_city,
                None => return Err(RestoreError::UnknownCity(name)),
            }
        }
        engine.current_city = engine
            .cities
            .iter()
            .position(|c| c.name == save.city)
            .ok_or(RestoreError::UnknownCity(save.city))?;

        for saved in save.actions {
            let Some(state) = engine.action_states.get_mut(&saved.id) else {
                return Err(RestoreError::UnknownAction(saved.id.to_string()));
            };
            state.successes = saved.successes;
            state.failures = saved.failures;
            state.auto_level = saved.auto_level;
            state.team_count = saved.team_count;
            state.count = saved.count.max(0.0);
            state.level = saved.level.max(1);
            if state.auto_level {
                state.level = state.max_level();
            }
        }

        for (name, level) in save.skills {
            if engine.skill_catalog.get(&name).is_none() {
                return Err(RestoreError::UnknownSkill(name));
            }
            engine.skill_levels.insert(name, level);
        }
        engine.mults = MultiplierSet::aggregate(&engine.skill_catalog, &engine.skill_levels);
        engine.stamina = save.stamina.clamp(0.0, engine.max_stamina());
        engine.automation = save.automation;

        if let Some(id) = save.action {
            if let Err(reason) = engine.start_action(id.clone()) {
                warn!(action = %id, %reason, "saved action no longer startable");
            }
        }
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_core::StatVector;

    fn operative(stat: f64) -> Operative {
        Operative::new(
            StatVector {
                hacking: stat,
                strength: stat,
                defense: stat,
                dexterity: stat,
                agility: stat,
                charisma: stat,
                intelligence: stat,
            },
            100.0,
        )
    }

    fn engine() -> Engine {
        Engine::new(EngineConfig::default(), operative(100.0))
    }

    fn contract() -> ActionId {
        ActionId::new(ActionKind::Contract, "Surveillance")
    }

    fn training() -> ActionId {
        ActionId::new(ActionKind::General, "Training")
    }

    fn run_seconds(engine: &mut Engine, seconds: u32) {
        let mut left = seconds;
        while left > 0 {
            let batch = left.min(MAX_CATCHUP_SECONDS);
            engine.store_cycles(batch * CYCLES_PER_SECOND);
            engine.process().unwrap();
            left -= batch;
        }
    }

    #[test]
    fn cycles_convert_with_catchup_cap() {
        let mut e = engine();
        e.store_cycles(100);
        assert_eq!(e.process().unwrap(), 5);
        assert_eq!(e.stored_cycles, 75);
        assert_eq!(e.process().unwrap(), 5);
        e.stored_cycles = 4;
        assert_eq!(e.process().unwrap(), 0);
        assert_eq!(e.stored_cycles, 4);
    }

    #[test]
    fn zero_stamina_forces_idle_on_next_process() {
        let mut e = engine();
        e.start_action(contract()).unwrap();
        assert!(e.action().is_some());
        e.stamina = 0.0;
        e.store_cycles(CYCLES_PER_SECOND);
        e.process().unwrap();
        assert!(e.action().is_none());
    }

    #[test]
    fn contracts_auto_repeat_and_pay() {
        let mut e = engine();
        e.start_action(contract()).unwrap();
        let ttc = e.action_time_to_complete;
        run_seconds(&mut e, (ttc as u32) * 3 + 3);
        let state = e.action_state(&contract()).unwrap();
        assert!(state.successes + state.failures >= 3);
        assert!(e.action().is_some(), "contract should re-arm");
        if state.successes > 0 {
            assert!(e.money() > Decimal::ZERO);
            assert!(e.rank() > 0.0);
        }
    }

    #[test]
    fn overflow_carries_into_the_next_run_only() {
        let mut e = engine();
        e.start_action(training()).unwrap();
        let ttc = e.action_time_to_complete;
        // Overshoot the completion boundary by a couple of seconds.
        e.action_time_current = ttc - 1;
        e.store_cycles(3 * CYCLES_PER_SECOND);
        e.process().unwrap();
        assert!(e.action().is_some());
        assert_eq!(e.action_time_overflow, 2);
        // Starting a different action discards the banked overflow.
        e.start_action(contract()).unwrap();
        assert_eq!(e.action_time_overflow, 0);
    }

    #[test]
    fn black_ops_gate_on_ordinal_and_rank() {
        let mut e = engine();
        let first = ActionId::new(ActionKind::BlackOp, "Operation Nightfall");
        let second = ActionId::new(ActionKind::BlackOp, "Operation Vermilion");
        assert!(matches!(
            e.start_action(second.clone()),
            Err(OpError::Unavailable(Unavailable::OutOfOrder))
        ));
        assert!(matches!(
            e.start_action(first.clone()),
            Err(OpError::Unavailable(Unavailable::RankTooLow { .. }))
        ));
        e.change_rank(2_000.0).unwrap();
        e.start_action(first).unwrap();
        assert!(e.action().is_some());
    }

    #[test]
    fn black_op_completion_is_terminal() {
        let mut e = engine();
        e.change_rank(2_000.0).unwrap();
        // Max the operative out so the attempt all but certainly succeeds.
        e.operative = operative(1.0e9);
        e.stamina = e.max_stamina();
        let first = ActionId::new(ActionKind::BlackOp, "Operation Nightfall");
        e.start_action(first.clone()).unwrap();
        e.action_time_current = e.action_time_to_complete;
        e.complete_action(first, 0).unwrap();
        assert!(e.action().is_none());
        assert_eq!(e.num_black_ops_complete(), 1);
    }

    #[test]
    fn rank_thresholds_bank_skill_points() {
        let mut e = engine();
        e.change_rank(10.0).unwrap();
        assert_eq!(e.skill_points(), 3);
        assert_eq!(e.total_skill_points(), 3);
        // Losing rank never claws points back; regaining it earns nothing new.
        e.change_rank(-10.0).unwrap();
        e.change_rank(8.0).unwrap();
        assert_eq!(e.skill_points(), 3);
        e.change_rank(4.0).unwrap();
        assert_eq!(e.skill_points(), 4);
    }

    #[test]
    fn non_finite_rank_delta_is_fatal() {
        let mut e = engine();
        assert_eq!(
            e.change_rank(f64::NAN),
            Err(FatalError::NonFinite("rank"))
        );
        assert_eq!(
            e.take_damage(f64::INFINITY),
            Err(FatalError::NonFinite("hp"))
        );
    }

    #[test]
    fn automation_hysteresis() {
        let mut e = Engine::new(EngineConfig::default(), operative(200.0));
        assert!(e.max_stamina() > 50.0);
        let low = training();
        let high = contract();
        e.set_automation(Automation {
            enabled: true,
            stamina_low: 10.0,
            stamina_high: 50.0,
            low_action: Some(low.clone()),
            high_action: Some(high.clone()),
        })
        .unwrap();

        e.stamina = 5.0;
        e.store_cycles(CYCLES_PER_SECOND);
        e.process().unwrap();
        assert_eq!(e.action(), Some(&low));

        e.stamina = 60.0;
        e.store_cycles(CYCLES_PER_SECOND);
        e.process().unwrap();
        assert_eq!(e.action(), Some(&high));

        // Between thresholds nothing switches; at the low bound an already
        // running target is not restarted.
        e.stamina = 30.0;
        let before = e.action_time_current;
        e.store_cycles(CYCLES_PER_SECOND);
        e.process().unwrap();
        assert_eq!(e.action(), Some(&high));
        assert!(e.action_time_current > before || e.action_time_to_complete == 0);

        e.stamina = 5.0;
        e.store_cycles(CYCLES_PER_SECOND);
        e.process().unwrap();
        assert_eq!(e.action(), Some(&low));
        let progressed = e.action_time_current;
        e.stamina = 5.0;
        e.store_cycles(CYCLES_PER_SECOND);
        e.process().unwrap();
        assert_eq!(e.action(), Some(&low));
        assert!(e.action_time_current > progressed || e.action_time_current > 0);
    }

    #[test]
    fn blackop_automation_targets_are_rejected() {
        let mut e = engine();
        let err = e.set_automation(Automation {
            enabled: true,
            stamina_low: 10.0,
            stamina_high: 50.0,
            low_action: Some(ActionId::new(ActionKind::BlackOp, "Operation Nightfall")),
            high_action: None,
        });
        assert!(matches!(err, Err(OpError::InvalidAutomationTarget(_))));
    }

    #[test]
    fn interruption_disables_automation() {
        let mut e = engine();
        e.set_automation(Automation {
            enabled: true,
            stamina_low: 1.0,
            stamina_high: 1.0e9,
            low_action: None,
            high_action: Some(training()),
        })
        .unwrap();
        e.start_action(contract()).unwrap();
        e.interrupt();
        assert!(e.action().is_none());
        assert!(!e.automation().enabled);
    }

    #[test]
    fn sleeves_share_the_team_but_never_underflow() {
        let mut e = engine();
        e.sleeve_join();
        e.sleeve_join();
        assert_eq!(e.team_size(), 2);
        assert_eq!(e.sleeve_size(), 2);
        e.sleeve_leave();
        e.sleeve_leave();
        e.sleeve_leave();
        assert_eq!(e.sleeve_size(), 0);
        assert!(e.team_size() >= e.sleeve_size());
    }

    #[test]
    fn upgrade_skill_spends_points_and_recomputes_multipliers() {
        let mut e = engine();
        e.change_rank(300.0).unwrap();
        let points = e.skill_points();
        let up = e.upgrade_skill("Intuition", 2).unwrap();
        assert_eq!(e.skill_points(), points - up.cost);
        assert!(
            e.multipliers().get(MultiplierKind::SuccessChanceAll) > 1.0
        );
        assert!(matches!(
            e.upgrade_skill("No Such Skill", 1),
            Err(OpError::UnknownSkill(_))
        ));
        assert!(matches!(
            e.upgrade_skill("Intuition", 0),
            Err(OpError::Skill(SkillError::InvalidCount))
        ));
    }

    #[test]
    fn stamina_stays_within_bounds_over_long_runs() {
        let mut e = engine();
        e.start_action(contract()).unwrap();
        for _ in 0..2_000 {
            e.store_cycles(CYCLES_PER_SECOND);
            e.process().unwrap();
            assert!(e.stamina() >= 0.0);
            assert!(e.stamina() <= e.max_stamina() + 1e-9);
            for city in e.cities() {
                assert!(city.pop >= 0.0 && city.chaos >= 0.0);
            }
        }
    }

    #[test]
    fn travel_switches_city_and_stops_work() {
        let mut e = engine();
        e.start_action(contract()).unwrap();
        e.travel("Caldera").unwrap();
        assert_eq!(e.current_city().name, "Caldera");
        assert!(e.action().is_none());
        assert!(matches!(
            e.travel("Atlantis"),
            Err(OpError::UnknownCity(_))
        ));
    }

    #[test]
    fn save_roundtrip_preserves_allow_listed_fields() {
        let mut e = engine();
        e.change_rank(500.0).unwrap();
        e.upgrade_skill("Intuition", 3).unwrap();
        e.sleeve_join();
        e.start_action(contract()).unwrap();
        run_seconds(&mut e, 120);
        let save = e.to_save();

        let restored =
            Engine::restore(EngineConfig::default(), operative(100.0), save.clone()).unwrap();
        assert_eq!(restored.rank(), e.rank());
        assert_eq!(restored.skill_points(), e.skill_points());
        assert_eq!(restored.skill_level("Intuition"), 3);
        assert_eq!(restored.team_size(), e.team_size());
        // Derived state is recomputed, not restored.
        assert_eq!(
            restored.multipliers().get(MultiplierKind::SuccessChanceAll),
            e.multipliers().get(MultiplierKind::SuccessChanceAll)
        );
        let state = restored.action_state(&contract()).unwrap();
        let live = e.action_state(&contract()).unwrap();
        assert_eq!(state.successes, live.successes);
        assert_eq!(state.count, live.count);
    }

    #[test]
    fn restore_rejects_unknown_identities() {
        let e = engine();
        let mut save = e.to_save();
        save.actions.push(SavedAction {
            id: ActionId::new(ActionKind::Contract, "Ghost"),
            successes: 0,
            failures: 0,
            level: 1,
            auto_level: true,
            team_count: 0,
            count: 0.0,
        });
        assert!(matches!(
            Engine::restore(EngineConfig::default(), operative(100.0), save),
            Err(RestoreError::UnknownAction(_))
        ));
    }

    #[test]
    fn tick_signal_is_one_slot() {
        use std::thread;
        let e = engine();
        let signal = e.tick_handle();
        assert!(!signal.wait_next(Duration::from_millis(10)));
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait_next(Duration::from_secs(5)))
        };
        // Give the waiter time to park, then tick.
        thread::sleep(Duration::from_millis(50));
        signal.notify();
        assert!(waiter.join().unwrap());
        // A notification with no waiter is not queued for the next call.
        signal.notify();
        signal.notify();
        assert!(!signal.wait_next(Duration::from_millis(10)));
    }
}
