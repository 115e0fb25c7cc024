#![deny(warnings)]

//! Skill upgrade pricing and multiplier aggregation.
//!
//! This crate provides validated utilities for:
//! - Closed-form (non-iterative) upgrade cost over arbitrarily large counts
//! - The exact inverse: largest affordable upgrade count for a budget
//! - Aggregating active skill multipliers from leveled skills

use sim_core::{MultiplierKind, SkillCatalog, SkillDef};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors produced by skill operations.
///
/// These are input-validation failures: callers (including untrusted
/// scripts) receive them as structured results, never aborts.
#[derive(Debug, Error, PartialEq)]
pub enum SkillError {
    /// No skill with that name exists.
    #[error("unknown skill: {0}")]
    UnknownSkill(String),
    /// Upgrade count must be a positive integer.
    #[error("upgrade count must be a positive integer")]
    InvalidCount,
    /// The requested levels would exceed the skill's cap.
    #[error("skill '{name}' is capped at level {max_level}")]
    MaxLevelExceeded {
        /// Skill name.
        name: String,
        /// The cap.
        max_level: u32,
    },
    /// Not enough skill points for the priced upgrade.
    #[error("insufficient skill points: need {need}, have {have}")]
    InsufficientPoints {
        /// Points required.
        need: u64,
        /// Points available.
        have: u64,
    },
}

/// A priced, accepted upgrade request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Upgrade {
    /// Levels to purchase.
    pub count: u64,
    /// Total cost in skill points.
    pub cost: u64,
}

/// Cost of buying `count` levels starting from `current_level`.
///
/// Closed-form sum of the arithmetic series
/// `sum_{i=0}^{count-1} (base_cost + cost_inc * (current_level + i))`,
/// rounded once at the end rather than per level. The single rounding
/// trades a bounded approximation error for O(1) pricing of arbitrarily
/// large counts; `max_upgrade_count` corrects for it by probing.
pub fn calculate_cost(def: &SkillDef, current_level: u32, count: u64, global_mult: f64) -> u64 {
    if count == 0 {
        return 0;
    }
    let n = count as f64;
    let level = f64::from(current_level);
    let per_level = def.base_cost + def.cost_inc * (level + (n - 1.0) / 2.0);
    let cost = (n * global_mult * per_level).round();
    if !cost.is_finite() || cost >= u64::MAX as f64 {
        return u64::MAX;
    }
    cost.max(0.0) as u64
}

/// Largest `count` whose exact cost does not exceed `budget`.
///
/// Inverts `calculate_cost` via the quadratic formula (ignoring rounding),
/// then corrects the candidate against the exact cost, because the
/// closed-form inverse is not exact under end-rounding.
pub fn max_upgrade_count(def: &SkillDef, current_level: u32, budget: u64, global_mult: f64) -> u64 {
    if budget == 0 || global_mult <= 0.0 {
        return 0;
    }
    let level = f64::from(current_level);
    let b = budget as f64 / global_mult;
    let est = if def.cost_inc == 0.0 {
        b / def.base_cost
    } else {
        // budget ~= a*c^2 + q*c with a = cost_inc/2, q = base + inc*(level - 1/2)
        let a = def.cost_inc / 2.0;
        let q = def.base_cost + def.cost_inc * (level - 0.5);
        (-q + (q * q + 4.0 * a * b).sqrt()) / (2.0 * a)
    };
    if !est.is_finite() {
        return 0;
    }
    let candidate = est.floor().max(0.0) as u64;
    let mut best = 0;
    for cand in [candidate.saturating_sub(1), candidate, candidate + 1] {
        if cand >= 1 && calculate_cost(def, current_level, cand, global_mult) <= budget {
            best = best.max(cand);
        }
    }
    best
}

/// Validate and price an upgrade request.
pub fn can_upgrade(
    def: &SkillDef,
    current_level: u32,
    skill_points: u64,
    count: u64,
    global_mult: f64,
) -> Result<Upgrade, SkillError> {
    if count == 0 {
        return Err(SkillError::InvalidCount);
    }
    if let Some(max_level) = def.max_level {
        if u64::from(current_level) + count > u64::from(max_level) {
            return Err(SkillError::MaxLevelExceeded {
                name: def.name.clone(),
                max_level,
            });
        }
    }
    let cost = calculate_cost(def, current_level, count, global_mult);
    if cost > skill_points {
        return Err(SkillError::InsufficientPoints {
            need: cost,
            have: skill_points,
        });
    }
    Ok(Upgrade { count, cost })
}

/// Aggregated multiplier totals from every leveled skill.
///
/// Recomputed from scratch whenever any skill level changes; never
/// serialized (it is derivable state).
#[derive(Clone, Debug, PartialEq)]
pub struct MultiplierSet {
    totals: BTreeMap<MultiplierKind, f64>,
}

impl MultiplierSet {
    /// The identity set: every multiplier is 1.
    pub fn identity() -> Self {
        Self {
            totals: BTreeMap::new(),
        }
    }

    /// Recompute all totals from the catalog and current levels.
    ///
    /// For every skill with level > 0, each contribution applies
    /// `1 + value * level / 100` multiplicatively onto the per-kind
    /// running total, clamped to >= 0.
    pub fn aggregate(catalog: &SkillCatalog, levels: &BTreeMap<String, u32>) -> Self {
        let mut totals: BTreeMap<MultiplierKind, f64> = BTreeMap::new();
        for def in &catalog.skills {
            let level = levels.get(&def.name).copied().unwrap_or(0);
            if level == 0 {
                continue;
            }
            for &(kind, value) in &def.contributions {
                let entry = totals.entry(kind).or_insert(1.0);
                *entry = (*entry * (1.0 + value * f64::from(level) / 100.0)).max(0.0);
            }
        }
        Self { totals }
    }

    /// Current total for one multiplier channel (1 when untouched).
    pub fn get(&self, kind: MultiplierKind) -> f64 {
        self.totals.get(&kind).copied().unwrap_or(1.0)
    }
}

impl Default for MultiplierSet {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sim_core::catalog::standard_skills;

    fn def(base_cost: f64, cost_inc: f64, max_level: Option<u32>) -> SkillDef {
        SkillDef {
            name: "Test".to_string(),
            base_cost,
            cost_inc,
            max_level,
            contributions: vec![],
        }
    }

    #[test]
    fn single_level_from_zero_costs_base() {
        // base 3, inc 2.1, level 0, count 1 => exactly 3.
        let d = def(3.0, 2.1, None);
        assert_eq!(calculate_cost(&d, 0, 1, 1.0), 3);
    }

    #[test]
    fn cost_matches_per_level_sum() {
        let d = def(3.0, 2.1, None);
        // Sum of rounded-once series from level 5, 4 levels:
        // 4 * (3 + 2.1*(5 + 1.5)) = 4 * 16.65 = 66.6 -> 67
        assert_eq!(calculate_cost(&d, 5, 4, 1.0), 67);
    }

    #[test]
    fn inverse_corrects_rounding() {
        let d = def(3.0, 2.1, None);
        for budget in [0u64, 1, 2, 3, 4, 10, 67, 1000, 123_456] {
            let count = max_upgrade_count(&d, 5, budget, 1.0);
            if count > 0 {
                assert!(calculate_cost(&d, 5, count, 1.0) <= budget);
            }
            assert!(calculate_cost(&d, 5, count + 1, 1.0) > budget);
        }
    }

    #[test]
    fn upgrade_rejections() {
        let d = def(3.0, 2.1, Some(10));
        assert_eq!(can_upgrade(&d, 0, 100, 0, 1.0), Err(SkillError::InvalidCount));
        assert!(matches!(
            can_upgrade(&d, 8, 1_000_000, 3, 1.0),
            Err(SkillError::MaxLevelExceeded { .. })
        ));
        assert!(matches!(
            can_upgrade(&d, 0, 1, 2, 1.0),
            Err(SkillError::InsufficientPoints { .. })
        ));
        let up = can_upgrade(&d, 0, 100, 2, 1.0).unwrap();
        assert_eq!(up.count, 2);
        assert_eq!(up.cost, calculate_cost(&d, 0, 2, 1.0));
    }

    #[test]
    fn aggregation_applies_percent_per_level() {
        let catalog = standard_skills();
        let mut levels = BTreeMap::new();
        levels.insert("Intuition".to_string(), 10u32);
        levels.insert("Overclock".to_string(), 50u32);
        let mults = MultiplierSet::aggregate(&catalog, &levels);
        assert!((mults.get(MultiplierKind::SuccessChanceAll) - 1.3).abs() < 1e-9);
        assert!((mults.get(MultiplierKind::ActionTime) - 0.5).abs() < 1e-9);
        // Untouched channels stay at identity.
        assert_eq!(mults.get(MultiplierKind::Money), 1.0);
    }

    #[test]
    fn aggregation_clamps_at_zero() {
        let catalog = SkillCatalog {
            skills: vec![SkillDef {
                name: "Drain".to_string(),
                base_cost: 1.0,
                cost_inc: 0.0,
                max_level: None,
                contributions: vec![(MultiplierKind::ActionTime, -1.0)],
            }],
        };
        let mut levels = BTreeMap::new();
        levels.insert("Drain".to_string(), 250u32);
        let mults = MultiplierSet::aggregate(&catalog, &levels);
        assert_eq!(mults.get(MultiplierKind::ActionTime), 0.0);
    }

    proptest! {
        #[test]
        fn inverse_of_cost_is_exact(
            level in 0u32..500,
            count in 1u64..5_000,
            base in 1.0f64..50.0,
            inc in 0.0f64..10.0,
        ) {
            let d = def(base, inc, None);
            let budget = calculate_cost(&d, level, count, 1.0);
            prop_assert_eq!(max_upgrade_count(&d, level, budget, 1.0), count);
        }

        #[test]
        fn cost_is_monotonic_in_count(level in 0u32..100, count in 1u64..1_000) {
            let d = def(3.0, 2.1, None);
            let c1 = calculate_cost(&d, level, count, 1.0);
            let c2 = calculate_cost(&d, level, count + 1, 1.0);
            prop_assert!(c2 >= c1);
        }

        #[test]
        fn multipliers_never_negative(level in 0u32..10_000) {
            let catalog = standard_skills();
            let mut levels = BTreeMap::new();
            for s in &catalog.skills {
                levels.insert(s.name.clone(), level);
            }
            let mults = MultiplierSet::aggregate(&catalog, &levels);
            for kind in MultiplierKind::ALL {
                prop_assert!(mults.get(kind) >= 0.0);
            }
        }
    }
}
