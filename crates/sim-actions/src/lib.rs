#![deny(warnings)]

//! Per-variant action algorithms and the city model.
//!
//! This crate is stateless: every function reads an explicit
//! [`ResolveCtx`] plus the operative, and mutates only what it is handed.
//! The engine (sim-runtime) owns all state and sequences these calls.

use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use sim_core::{
    ActionCommon, ActionRef, ActionState, City, CityImpact, GeneralEffect, MultiplierKind,
    Operative, StatVector,
};
use sim_skills::MultiplierSet;
use thiserror::Error;
use tracing::debug;

/// Tunable resolution constants, grouped for calibration against
/// reference outputs.
pub mod consts {
    /// Chaos level above which operation success degrades.
    pub const CHAOS_THRESHOLD: f64 = 50.0;
    /// Exponent of the difficulty-derived time multiplier.
    pub const TIME_DIFFICULTY_EXP: f64 = 0.28;
    /// Linear divisor of the difficulty-derived time multiplier.
    pub const TIME_DIFFICULTY_LINEAR: f64 = 650.0;
    /// Team-size success bonus exponent.
    pub const TEAM_BONUS_EXP: f64 = 0.05;
    /// Fraction of true population one estimate-improving success moves.
    pub const ESTIMATE_CONVERGENCE: f64 = 0.003;
    /// Fraction of current chaos lost per simulated second.
    pub const CHAOS_DECAY_RATE: f64 = 0.0005;
    /// Charisma exponent for recruitment time and success.
    pub const RECRUITMENT_CHARISMA_EXP: f64 = 0.45;
    /// Random-event countdown bounds, inclusive, in simulated seconds.
    pub const EVENT_COUNTDOWN_SECS: (u32, u32) = (300, 600);
    /// Migration transfer fraction bounds, inclusive.
    pub const MIGRATION_PCT: (f64, f64) = (0.05, 0.2);
    /// Chance a migration also carries a community unit.
    pub const MIGRATION_COMMUNITY_CHANCE: f64 = 0.05;
    /// Transfer amplification when a community migrates along.
    pub const MIGRATION_COMMUNITY_AMP: f64 = 1.5;
}

/// Success-chance computation mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChanceMode {
    /// Use the operative's actual effective stats.
    Actual,
    /// Blend actual stats with population-estimate-derived proxies.
    Estimated,
}

/// Read-only engine state required by the resolver.
#[derive(Clone, Copy, Debug)]
pub struct ResolveCtx<'a> {
    /// Aggregated skill multipliers.
    pub mults: &'a MultiplierSet,
    /// The current city.
    pub city: &'a City,
    /// Total team members (humans + supporting sleeves).
    pub team_size: u32,
    /// Supporting sleeves inside the team.
    pub sleeve_size: u32,
    /// Current stamina.
    pub stamina: f64,
    /// Maximum stamina.
    pub max_stamina: f64,
    /// Current rank.
    pub rank: f64,
    /// Completed black-op ordinal (gates ordering).
    pub num_black_ops_complete: u32,
}

/// Reasons an action cannot currently be started.
#[derive(Debug, Error, PartialEq)]
pub enum Unavailable {
    /// The action's available-instance pool is empty.
    #[error("no instances of this action remain")]
    Exhausted,
    /// Black ops must complete in strictly increasing ordinal order.
    #[error("black ops must be completed in order")]
    OutOfOrder,
    /// Rank below the black op's requirement.
    #[error("rank {have:.0} is below the required {need:.0}")]
    RankTooLow {
        /// Required rank.
        need: f64,
        /// Current rank.
        have: f64,
    },
    /// Raids need at least one community in the current city.
    #[error("the current city has no communities to raid")]
    NoCommunities,
}

/// Gate an action against the current engine state.
pub fn availability(
    action: ActionRef<'_>,
    state: &ActionState,
    ctx: &ResolveCtx<'_>,
) -> Result<(), Unavailable> {
    match action {
        ActionRef::General(_) => Ok(()),
        ActionRef::Contract(_) => {
            if state.count < 1.0 {
                return Err(Unavailable::Exhausted);
            }
            Ok(())
        }
        ActionRef::Operation(o) => {
            if state.count < 1.0 {
                return Err(Unavailable::Exhausted);
            }
            if matches!(o.impact, CityImpact::Raid { .. }) && ctx.city.comms == 0 {
                return Err(Unavailable::NoCommunities);
            }
            Ok(())
        }
        ActionRef::BlackOp(b) => {
            if b.n != ctx.num_black_ops_complete {
                return Err(Unavailable::OutOfOrder);
            }
            if ctx.rank < b.reqd_rank {
                return Err(Unavailable::RankTooLow {
                    need: b.reqd_rank,
                    have: ctx.rank,
                });
            }
            Ok(())
        }
    }
}

/// Current difficulty of a levelable mission.
pub fn difficulty(common: &ActionCommon, level: u32) -> f64 {
    common.base_difficulty * common.difficulty_fac.powi(level.saturating_sub(1) as i32)
}

fn time_factor(d: f64) -> f64 {
    d.powf(consts::TIME_DIFFICULTY_EXP) + d / consts::TIME_DIFFICULTY_LINEAR
}

/// Seconds to complete one attempt, after skill scaling. Always >= 1.
pub fn action_time(
    action: ActionRef<'_>,
    state: &ActionState,
    operative: &Operative,
    ctx: &ResolveCtx<'_>,
) -> u64 {
    let time_mult = ctx.mults.get(MultiplierKind::ActionTime).max(0.0);
    let raw = match action {
        ActionRef::General(g) => match g.effect {
            GeneralEffect::Recruitment => {
                let cha = effective(operative, ctx).charisma.max(0.0);
                g.base_seconds as f64
                    / (1.0 + cha.powf(consts::RECRUITMENT_CHARISMA_EXP) / 10.0)
            }
            _ => g.base_seconds as f64,
        },
        ActionRef::Contract(c) => mission_time(&c.common, state.level),
        ActionRef::Operation(o) => mission_time(&o.common, state.level),
        ActionRef::BlackOp(b) => mission_time(&b.common, state.level),
    };
    (raw * time_mult).ceil().max(1.0) as u64
}

/// Base seconds scaled by the difficulty-derived multiplier, normalized so
/// the catalog's `base_seconds` is the level-1 time.
fn mission_time(common: &ActionCommon, level: u32) -> f64 {
    common.base_seconds as f64 * time_factor(difficulty(common, level))
        / time_factor(common.base_difficulty)
}

fn effective(operative: &Operative, ctx: &ResolveCtx<'_>) -> StatVector {
    operative.effective_stats(
        ctx.mults.get(MultiplierKind::EffCombat),
        ctx.mults.get(MultiplierKind::EffCharisma),
    )
}

/// How well the current city's population estimate matches reality, in
/// (0, 1]; 1 means a perfect estimate.
pub fn estimate_accuracy(city: &City) -> f64 {
    let (lo, hi) = if city.pop <= city.pop_est {
        (city.pop, city.pop_est)
    } else {
        (city.pop_est, city.pop)
    };
    if hi <= 0.0 {
        return 1.0;
    }
    (lo / hi).clamp(0.0, 1.0)
}

fn stamina_penalty(ctx: &ResolveCtx<'_>) -> f64 {
    if ctx.max_stamina <= 0.0 {
        return 1.0;
    }
    let frac = (ctx.stamina / ctx.max_stamina).clamp(0.0, 1.0);
    if frac < 0.5 {
        0.5 + frac
    } else {
        1.0
    }
}

/// Probability of success in [0, 1].
pub fn success_chance(
    action: ActionRef<'_>,
    state: &ActionState,
    operative: &Operative,
    ctx: &ResolveCtx<'_>,
    mode: ChanceMode,
) -> f64 {
    let common = match action {
        ActionRef::General(g) => {
            return match g.effect {
                GeneralEffect::Recruitment => {
                    let cha = effective(operative, ctx).charisma.max(0.0);
                    (cha.powf(consts::RECRUITMENT_CHARISMA_EXP)
                        / f64::from(ctx.team_size + 1))
                    .clamp(0.0, 1.0)
                }
                _ => 1.0,
            };
        }
        ActionRef::Contract(c) => &c.common,
        ActionRef::Operation(o) => &o.common,
        ActionRef::BlackOp(b) => &b.common,
    };

    // A raid against a community-free city cannot succeed, whatever the
    // operative's stats are.
    if let ActionRef::Operation(o) = action {
        if matches!(o.impact, CityImpact::Raid { .. }) && ctx.city.comms == 0 {
            return 0.0;
        }
    }

    let eff = effective(operative, ctx);
    let actual = eff.as_array();
    let weights = common.weights.as_array();
    let decays = common.decays.as_array();
    let accuracy = estimate_accuracy(ctx.city);

    let mut raw = 0.0;
    for i in 0..StatVector::DIMS {
        let stat = match mode {
            ChanceMode::Actual => actual[i],
            // Blend the actual stat with a population-estimate-derived
            // proxy through the per-action decay weight.
            ChanceMode::Estimated => {
                decays[i] * actual[i] + (1.0 - decays[i]) * actual[i] * accuracy
            }
        };
        raw += weights[i] * stat.max(0.0);
    }

    let mut chance = raw / difficulty(common, state.level);

    let kind_mult = match action {
        ActionRef::Contract(_) => ctx.mults.get(MultiplierKind::SuccessChanceContract),
        ActionRef::Operation(_) => ctx.mults.get(MultiplierKind::SuccessChanceOperation),
        ActionRef::BlackOp(_) => ctx.mults.get(MultiplierKind::SuccessChanceBlackOp),
        ActionRef::General(_) => 1.0,
    };
    chance *= kind_mult;
    if common.is_stealth {
        chance *= ctx.mults.get(MultiplierKind::SuccessChanceStealth);
    }
    if common.is_kill {
        chance *= ctx.mults.get(MultiplierKind::SuccessChanceKill);
    }

    if action.is_team_action() {
        let used = state.team_count.min(ctx.team_size);
        if used > 0 {
            chance *= f64::from(used).powf(consts::TEAM_BONUS_EXP);
        }
    }

    if matches!(action, ActionRef::Operation(_)) && ctx.city.chaos > consts::CHAOS_THRESHOLD {
        chance /= (1.0 + (ctx.city.chaos - consts::CHAOS_THRESHOLD)).sqrt();
    }

    chance *= stamina_penalty(ctx);
    chance += ctx.mults.get(MultiplierKind::SuccessChanceAll) - 1.0;
    chance.clamp(0.0, 1.0)
}

/// Estimated success chance widened by the current estimate error.
pub fn success_range(
    action: ActionRef<'_>,
    state: &ActionState,
    operative: &Operative,
    ctx: &ResolveCtx<'_>,
) -> (f64, f64) {
    let est = success_chance(action, state, operative, ctx, ChanceMode::Estimated);
    let spread = 1.0 - estimate_accuracy(ctx.city);
    let lo = (est * (1.0 - spread)).clamp(0.0, 1.0);
    let hi = (est * (1.0 + spread)).clamp(0.0, 1.0);
    (lo, hi)
}

/// Outcome of one resolved attempt.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AttemptOutcome {
    /// Whether the Bernoulli trial succeeded.
    pub success: bool,
    /// The chance it was rolled against.
    pub chance: f64,
}

/// Resolve one attempt: Bernoulli trial against the actual success chance.
///
/// Decrements `count` (mission kinds), bumps the success/failure counter,
/// and re-snaps the level when `auto_level` is set.
pub fn attempt<R: Rng + ?Sized>(
    action: ActionRef<'_>,
    state: &mut ActionState,
    operative: &Operative,
    ctx: &ResolveCtx<'_>,
    rng: &mut R,
) -> AttemptOutcome {
    let chance = success_chance(action, state, operative, ctx, ChanceMode::Actual);
    let success = rng.gen::<f64>() < chance;
    if !matches!(action, ActionRef::General(_)) {
        state.count = (state.count - 1.0).max(0.0);
    }
    if success {
        state.successes = state.successes.saturating_add(1);
    } else {
        state.failures = state.failures.saturating_add(1);
    }
    if action.is_levelable() && state.auto_level {
        state.level = state.max_level();
    }
    debug!(action = %action.id(), chance, success, "attempt resolved");
    AttemptOutcome { success, chance }
}

/// Rank gained for a success at the given level.
pub fn rank_reward(common: &ActionCommon, level: u32) -> f64 {
    common.rank_gain * common.reward_fac.powi(level.saturating_sub(1) as i32)
}

/// Money paid for a contract success at the given level.
pub fn contract_money(base_money: Decimal, common: &ActionCommon, level: u32, money_mult: f64) -> Decimal {
    let growth = common.reward_fac.powi(level.saturating_sub(1) as i32) * money_mult;
    base_money * Decimal::from_f64(growth).unwrap_or(Decimal::ONE)
}

/// HP lost on a failure, scaled by the current difficulty.
pub fn failure_damage(common: &ActionCommon, level: u32) -> f64 {
    common.hp_loss * (difficulty(common, level) / common.base_difficulty)
}

/// Result of a casualty resolution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Casualties {
    /// Total team losses rolled.
    pub deaths: u32,
    /// Human members actually removed from the team.
    pub human_deaths: u32,
    /// Supporting sleeves shocked instead of removed.
    pub shocked_sleeves: u32,
}

/// Roll and apply team casualties for a completed team action.
///
/// `team_size` is clamped so the team never shrinks below the current
/// sleeve support; sleeves are shocked, not removed.
pub fn resolve_casualties<R: Rng + ?Sized>(
    used: u32,
    success: bool,
    min_casualties: u32,
    team_size: &mut u32,
    sleeve_size: u32,
    rng: &mut R,
) -> Casualties {
    if used == 0 {
        return Casualties::default();
    }
    let severity = if success { 0.5 } else { 1.0 };
    let radius = f64::from(used) * severity;
    let worst_case = if severity < 1.0 {
        radius.ceil()
    } else {
        radius.floor()
    } as u32;
    let lo = min_casualties.min(worst_case);
    let deaths = rng.gen_range(lo..=worst_case);
    let humans_available = team_size.saturating_sub(sleeve_size);
    let human_deaths = deaths.min(humans_available);
    let shocked_sleeves = deaths - human_deaths;
    *team_size = team_size.saturating_sub(human_deaths).max(sleeve_size);
    debug!(deaths, human_deaths, shocked_sleeves, "casualties resolved");
    Casualties {
        deaths,
        human_deaths,
        shocked_sleeves,
    }
}

/// How a population change propagates into the player-visible estimate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PopPolicy {
    /// Floor the population at 1 instead of 0.
    pub non_zero: bool,
    /// Move the estimate by the same fraction.
    pub change_estimate: bool,
}

/// Change a city's population by a signed fraction of its current value.
pub fn change_population_pct(city: &mut City, pct: f64, policy: PopPolicy) {
    let floor = if policy.non_zero { 1.0 } else { 0.0 };
    city.pop = (city.pop * (1.0 + pct)).max(floor);
    if policy.change_estimate {
        city.pop_est = (city.pop_est * (1.0 + pct)).max(0.0);
    }
}

/// Change a city's population by a signed count; the estimate moves by the
/// same count plus a bounded random offset.
pub fn change_population_count<R: Rng + ?Sized>(
    city: &mut City,
    delta: f64,
    est_offset: f64,
    rng: &mut R,
) {
    city.pop = (city.pop + delta).max(0.0);
    let offset = if est_offset > 0.0 {
        rng.gen_range(-est_offset..=est_offset)
    } else {
        0.0
    };
    city.pop_est = (city.pop_est + delta + offset).max(0.0);
}

/// Converge the estimate toward the true population, never overshooting.
pub fn improve_estimate(city: &mut City, accuracy_mult: f64) {
    let step = city.pop * consts::ESTIMATE_CONVERGENCE * accuracy_mult.max(0.0);
    let err = city.pop - city.pop_est;
    if err.abs() <= step {
        city.pop_est = city.pop;
    } else {
        city.pop_est += step.copysign(err);
    }
    city.pop_est = city.pop_est.max(0.0);
}

/// Raise a city's chaos by a fixed amount.
pub fn add_chaos(city: &mut City, amount: f64) {
    city.chaos = (city.chaos + amount).max(0.0);
}

/// Apply the slow chaos decay for a batch of simulated seconds.
pub fn decay_chaos(city: &mut City, seconds: u32) {
    let factor = (1.0 - consts::CHAOS_DECAY_RATE).powi(seconds as i32);
    city.chaos = (city.chaos * factor).max(0.0);
}

/// Apply an operation's city impact after a success.
pub fn apply_city_impact<R: Rng + ?Sized>(
    city: &mut City,
    impact: CityImpact,
    estimate_mult: f64,
    rng: &mut R,
) {
    match impact {
        CityImpact::ImproveEstimate => improve_estimate(city, estimate_mult),
        CityImpact::Strike { pop_pct, chaos } => {
            change_population_pct(
                city,
                -pop_pct,
                PopPolicy {
                    non_zero: true,
                    change_estimate: true,
                },
            );
            add_chaos(city, chaos);
        }
        CityImpact::Eliminate { est_offset } => {
            change_population_count(city, -1.0, est_offset, rng);
        }
        CityImpact::Raid { pop_pct, chaos } => {
            city.comms = city.comms.saturating_sub(1);
            change_population_pct(
                city,
                -pop_pct,
                PopPolicy {
                    non_zero: true,
                    change_estimate: true,
                },
            );
            add_chaos(city, chaos);
        }
        CityImpact::None => {}
    }
}

/// One weighted random city event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CityEvent {
    /// A new community forms in the destination city.
    NewCommunity,
    /// A community relocates from source to destination.
    CommunityMigration,
    /// Organic population growth in the destination city.
    OrganicGrowth,
    /// Population migrates from source to destination.
    Migration,
    /// A riot spikes chaos in the destination city.
    Riot,
    /// Population decline in the destination city.
    Decline,
}

/// Fresh random-event countdown, in simulated seconds.
pub fn roll_event_countdown<R: Rng + ?Sized>(rng: &mut R) -> u32 {
    let (lo, hi) = consts::EVENT_COUNTDOWN_SECS;
    rng.gen_range(lo..=hi)
}

/// Pick two distinct cities and one outcome from the cumulative table.
/// Returns `None` for the ~10% no-event band.
pub fn run_random_event<R: Rng + ?Sized>(cities: &mut [City], rng: &mut R) -> Option<CityEvent> {
    if cities.len() < 2 {
        return None;
    }
    let source = rng.gen_range(0..cities.len());
    let mut dest = rng.gen_range(0..cities.len() - 1);
    if dest >= source {
        dest += 1;
    }
    let roll: f64 = rng.gen();
    let event = if roll < 0.05 {
        cities[dest].comms += 1;
        change_population_pct(
            &mut cities[dest],
            rng.gen_range(0.001..=0.004),
            PopPolicy {
                non_zero: false,
                change_estimate: false,
            },
        );
        CityEvent::NewCommunity
    } else if roll < 0.10 {
        if cities[source].comms > 0 {
            cities[source].comms -= 1;
            cities[dest].comms += 1;
        }
        let moved = cities[source].pop * rng.gen_range(0.01..=0.03);
        cities[source].pop = (cities[source].pop - moved).max(0.0);
        cities[dest].pop += moved;
        CityEvent::CommunityMigration
    } else if roll < 0.30 {
        change_population_pct(
            &mut cities[dest],
            rng.gen_range(0.004..=0.012),
            PopPolicy {
                non_zero: false,
                change_estimate: false,
            },
        );
        CityEvent::OrganicGrowth
    } else if roll < 0.50 {
        trigger_migration(cities, source, rng);
        CityEvent::Migration
    } else if roll < 0.70 {
        add_chaos(&mut cities[dest], rng.gen_range(1.0..=5.0));
        CityEvent::Riot
    } else if roll < 0.90 {
        change_population_pct(
            &mut cities[dest],
            -rng.gen_range(0.004..=0.012),
            PopPolicy {
                non_zero: false,
                change_estimate: false,
            },
        );
        CityEvent::Decline
    } else {
        return None;
    };
    debug!(?event, source, dest, "city event");
    Some(event)
}

/// Transfer a random share of `source`'s population to another city.
///
/// 5% of the time one community unit migrates along and the transferred
/// share is amplified.
pub fn trigger_migration<R: Rng + ?Sized>(cities: &mut [City], source: usize, rng: &mut R) {
    if cities.len() < 2 || source >= cities.len() {
        return;
    }
    let mut dest = rng.gen_range(0..cities.len() - 1);
    if dest >= source {
        dest += 1;
    }
    let (lo, hi) = consts::MIGRATION_PCT;
    let mut pct = rng.gen_range(lo..=hi);
    if rng.gen::<f64>() < consts::MIGRATION_COMMUNITY_CHANCE {
        pct = (pct * consts::MIGRATION_COMMUNITY_AMP).min(1.0);
        if cities[source].comms > 0 {
            cities[source].comms -= 1;
            cities[dest].comms += 1;
        }
    }
    let moved = cities[source].pop * pct;
    cities[source].pop = (cities[source].pop - moved).max(0.0);
    cities[dest].pop += moved;
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use sim_core::catalog::{standard_catalog, standard_cities};
    use sim_core::{ActionId, ActionKind};

    fn operative() -> Operative {
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

    fn ctx<'a>(mults: &'a MultiplierSet, city: &'a City) -> ResolveCtx<'a> {
        ResolveCtx {
            mults,
            city,
            team_size: 0,
            sleeve_size: 0,
            stamina: 100.0,
            max_stamina: 100.0,
            rank: 0.0,
            num_black_ops_complete: 0,
        }
    }

    #[test]
    fn raid_without_communities_is_hopeless() {
        let catalog = standard_catalog();
        let mults = MultiplierSet::identity();
        let mut city = standard_cities().remove(0);
        city.comms = 0;
        let raid = catalog
            .get(&ActionId::new(ActionKind::Operation, "Raid"))
            .unwrap();
        let state = ActionState::new(5.0);
        let c = ctx(&mults, &city);
        assert_eq!(
            success_chance(raid, &state, &operative(), &c, ChanceMode::Actual),
            0.0
        );
        assert_eq!(availability(raid, &state, &c), Err(Unavailable::NoCommunities));
        city.comms = 1;
        let c = ctx(&mults, &city);
        assert!(success_chance(raid, &state, &operative(), &c, ChanceMode::Actual) > 0.0);
    }

    #[test]
    fn black_op_ordering_is_enforced() {
        let catalog = standard_catalog();
        let mults = MultiplierSet::identity();
        let city = standard_cities().remove(0);
        let second = catalog
            .get(&ActionId::new(ActionKind::BlackOp, "Operation Vermilion"))
            .unwrap();
        let state = ActionState::new(1.0);
        let mut c = ctx(&mults, &city);
        c.rank = 1.0e9;
        assert_eq!(availability(second, &state, &c), Err(Unavailable::OutOfOrder));
        c.num_black_ops_complete = 1;
        assert_eq!(availability(second, &state, &c), Ok(()));
        c.rank = 0.0;
        assert!(matches!(
            availability(second, &state, &c),
            Err(Unavailable::RankTooLow { .. })
        ));
    }

    #[test]
    fn worst_case_on_success_is_half_team_rounded_up() {
        // Team of 10, success, min 0: radius 5.0, worst case ceil(5.0) = 5.
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..200 {
            let mut team_size = 10;
            let c = resolve_casualties(10, true, 0, &mut team_size, 0, &mut rng);
            assert!(c.deaths <= 5);
            assert_eq!(team_size, 10 - c.human_deaths);
        }
    }

    #[test]
    fn black_ops_always_lose_at_least_one() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..100 {
            let mut team_size = 8;
            let c = resolve_casualties(8, false, 1, &mut team_size, 0, &mut rng);
            assert!(c.deaths >= 1);
            assert!(c.deaths <= 8);
        }
    }

    #[test]
    fn sleeves_are_shocked_not_removed() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..200 {
            let mut team_size = 4;
            let sleeves = 3;
            let c = resolve_casualties(4, false, 0, &mut team_size, sleeves, &mut rng);
            assert!(team_size >= sleeves);
            assert_eq!(c.human_deaths + c.shocked_sleeves, c.deaths);
            assert!(c.human_deaths <= 1);
        }
    }

    #[test]
    fn estimate_converges_without_overshoot() {
        let mut city = standard_cities().remove(0);
        city.pop = 1.0e9;
        city.pop_est = 0.5e9;
        for _ in 0..10_000 {
            improve_estimate(&mut city, 1.0);
        }
        assert_eq!(city.pop_est, city.pop);
    }

    #[test]
    fn migration_conserves_population() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut cities = standard_cities();
        let before: f64 = cities.iter().map(|c| c.pop).sum();
        for i in 0..cities.len() {
            trigger_migration(&mut cities, i, &mut rng);
        }
        let after: f64 = cities.iter().map(|c| c.pop).sum();
        assert!((before - after).abs() < before * 1e-9);
    }

    #[test]
    fn chaos_decays_toward_zero() {
        let mut city = standard_cities().remove(0);
        city.chaos = 100.0;
        decay_chaos(&mut city, 5);
        assert!(city.chaos < 100.0);
        for _ in 0..100_000 {
            decay_chaos(&mut city, 5);
        }
        assert!(city.chaos >= 0.0 && city.chaos < 1e-6);
    }

    #[test]
    fn operations_suffer_above_the_chaos_threshold() {
        let catalog = standard_catalog();
        let mults = MultiplierSet::identity();
        let mut city = standard_cities().remove(0);
        let sting = catalog
            .get(&ActionId::new(ActionKind::Operation, "Sting"))
            .unwrap();
        let state = ActionState::new(10.0);
        city.chaos = 0.0;
        let calm = success_chance(sting, &state, &operative(), &ctx(&mults, &city), ChanceMode::Actual);
        city.chaos = consts::CHAOS_THRESHOLD + 80.0;
        let rowdy = success_chance(sting, &state, &operative(), &ctx(&mults, &city), ChanceMode::Actual);
        assert!(rowdy < calm);
    }

    #[test]
    fn estimated_chance_discounts_bad_estimates() {
        let catalog = standard_catalog();
        let mults = MultiplierSet::identity();
        let mut city = standard_cities().remove(0);
        city.pop = 1.0e9;
        city.pop_est = 1.0e9;
        let contract = catalog
            .get(&ActionId::new(ActionKind::Contract, "Surveillance"))
            .unwrap();
        let state = ActionState::new(25.0);
        let exact = success_chance(
            contract,
            &state,
            &operative(),
            &ctx(&mults, &city),
            ChanceMode::Estimated,
        );
        city.pop_est = 0.2e9;
        let fuzzy = success_chance(
            contract,
            &state,
            &operative(),
            &ctx(&mults, &city),
            ChanceMode::Estimated,
        );
        assert!(fuzzy < exact);
        let actual = success_chance(
            contract,
            &state,
            &operative(),
            &ctx(&mults, &city),
            ChanceMode::Actual,
        );
        assert!((actual - exact).abs() < 1e-12);
    }

    #[test]
    fn attempt_decrements_count_and_counts_outcomes() {
        let catalog = standard_catalog();
        let mults = MultiplierSet::identity();
        let city = standard_cities().remove(0);
        let contract = catalog
            .get(&ActionId::new(ActionKind::Contract, "Surveillance"))
            .unwrap();
        let mut state = ActionState::new(5.0);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let c = ctx(&mults, &city);
        for _ in 0..5 {
            attempt(contract, &mut state, &operative(), &c, &mut rng);
        }
        assert_eq!(state.count, 0.0);
        assert_eq!(state.successes + state.failures, 5);
        // Attempts keep flooring at zero.
        attempt(contract, &mut state, &operative(), &c, &mut rng);
        assert_eq!(state.count, 0.0);
    }

    proptest! {
        #[test]
        fn success_chance_is_always_a_probability(
            stat in 0.0f64..1.0e7,
            chaos in 0.0f64..1.0e4,
            pop_est in 0.0f64..2.0e9,
            level in 1u32..200,
            team in 0u32..500,
        ) {
            let catalog = standard_catalog();
            let mults = MultiplierSet::identity();
            let mut city = standard_cities().remove(0);
            city.chaos = chaos;
            city.pop_est = pop_est;
            let op = Operative::new(
                StatVector {
                    hacking: stat, strength: stat, defense: stat, dexterity: stat,
                    agility: stat, charisma: stat, intelligence: stat,
                },
                100.0,
            );
            let mut c = ctx(&mults, &city);
            c.team_size = team;
            for id in catalog.ids() {
                let action = catalog.get(&id).unwrap();
                let mut state = ActionState::new(10.0);
                if action.common().is_some() {
                    state.level = level;
                }
                state.team_count = team;
                for mode in [ChanceMode::Actual, ChanceMode::Estimated] {
                    let p = success_chance(action, &state, &op, &c, mode);
                    prop_assert!((0.0..=1.0).contains(&p), "{id}: {p}");
                }
                let (lo, hi) = success_range(action, &state, &op, &c);
                prop_assert!(lo >= 0.0 && hi <= 1.0 && lo <= hi);
            }
        }

        #[test]
        fn casualties_respect_bounds(
            used in 1u32..200,
            team in 0u32..300,
            sleeves in 0u32..100,
            success in proptest::bool::ANY,
            min in 0u32..2,
            seed in 0u64..1_000,
        ) {
            let sleeves = sleeves.min(team);
            let mut team_size = team;
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let c = resolve_casualties(used, success, min, &mut team_size, sleeves, &mut rng);
            prop_assert!(c.deaths <= used);
            prop_assert!(team_size >= sleeves);
            prop_assert!(team_size <= team);
            prop_assert_eq!(c.human_deaths + c.shocked_sleeves, c.deaths);
        }

        #[test]
        fn random_events_preserve_city_invariants(seed in 0u64..500, rounds in 1usize..60) {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut cities = standard_cities();
            for _ in 0..rounds {
                run_random_event(&mut cities, &mut rng);
                for city in &cities {
                    prop_assert!(city.pop >= 0.0);
                    prop_assert!(city.pop_est >= 0.0);
                    prop_assert!(city.chaos >= 0.0);
                }
            }
        }

        #[test]
        fn action_time_is_at_least_one_second(level in 1u32..300) {
            let catalog = standard_catalog();
            let mults = MultiplierSet::identity();
            let city = standard_cities().remove(0);
            let c = ctx(&mults, &city);
            for id in catalog.ids() {
                let action = catalog.get(&id).unwrap();
                let mut state = ActionState::new(10.0);
                state.level = level;
                prop_assert!(action_time(action, &state, &operative(), &c) >= 1);
            }
        }
    }
}
