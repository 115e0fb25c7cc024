//! Statically defined standard catalogs: actions, skills, cities.
//!
//! Numbers here are gameplay tuning data. They are validated by
//! `validate_catalog`/`validate_skills` at engine construction.

use crate::{
    ActionCommon, BlackOpDef, Catalog, City, CityImpact, ContractDef, GeneralDef, GeneralEffect,
    MultiplierKind, OperationDef, SkillCatalog, SkillDef, StatVector,
};
use rust_decimal::Decimal;

fn weights(
    hacking: f64,
    strength: f64,
    defense: f64,
    dexterity: f64,
    agility: f64,
    charisma: f64,
    intelligence: f64,
) -> StatVector {
    StatVector {
        hacking,
        strength,
        defense,
        dexterity,
        agility,
        charisma,
        intelligence,
    }
}

fn flat_decay(combat: f64, other: f64) -> StatVector {
    StatVector {
        hacking: other,
        strength: combat,
        defense: combat,
        dexterity: combat,
        agility: combat,
        charisma: other,
        intelligence: other,
    }
}

fn mission(name: &str, base_difficulty: f64, w: StatVector, d: StatVector) -> ActionCommon {
    ActionCommon {
        name: name.to_string(),
        base_difficulty,
        difficulty_fac: 1.02,
        reward_fac: 1.04,
        rank_gain: 0.3,
        rank_loss: 0.1,
        hp_loss: 0.5,
        weights: w,
        decays: d,
        base_seconds: 30,
        stamina_cost: 1.0,
        count_growth: 1.0 / 1800.0,
        initial_count: 25.0,
        is_stealth: false,
        is_kill: false,
    }
}

/// The standard action catalog.
pub fn standard_catalog() -> Catalog {
    let contracts = vec![
        ContractDef {
            common: ActionCommon {
                is_stealth: true,
                ..mission(
                    "Surveillance",
                    125.0,
                    weights(0.1, 0.0, 0.0, 0.35, 0.35, 0.1, 0.1),
                    flat_decay(0.9, 0.8),
                )
            },
            base_money: Decimal::new(240_000, 0),
        },
        ContractDef {
            common: ActionCommon {
                rank_gain: 0.9,
                rank_loss: 0.2,
                hp_loss: 1.0,
                base_seconds: 45,
                stamina_cost: 1.5,
                initial_count: 20.0,
                count_growth: 1.0 / 2400.0,
                is_kill: true,
                ..mission(
                    "Courier Intercept",
                    250.0,
                    weights(0.0, 0.15, 0.15, 0.25, 0.25, 0.1, 0.1),
                    flat_decay(0.85, 0.75),
                )
            },
            base_money: Decimal::new(600_000, 0),
        },
        ContractDef {
            common: ActionCommon {
                rank_gain: 0.6,
                rank_loss: 0.15,
                hp_loss: 1.0,
                base_seconds: 40,
                stamina_cost: 1.5,
                initial_count: 20.0,
                count_growth: 1.0 / 2400.0,
                is_kill: true,
                ..mission(
                    "Asset Recovery",
                    200.0,
                    weights(0.05, 0.2, 0.15, 0.25, 0.2, 0.05, 0.1),
                    flat_decay(0.85, 0.75),
                )
            },
            base_money: Decimal::new(450_000, 0),
        },
    ];

    let op = |name: &str, diff: f64, w: StatVector| ActionCommon {
        difficulty_fac: 1.03,
        reward_fac: 1.07,
        base_seconds: 60,
        stamina_cost: 3.0,
        initial_count: 10.0,
        count_growth: 1.0 / 3600.0,
        ..mission(name, diff, w, flat_decay(0.85, 0.7))
    };
    let operations = vec![
        OperationDef {
            common: ActionCommon {
                rank_gain: 2.2,
                rank_loss: 0.4,
                hp_loss: 0.0,
                is_stealth: true,
                ..op(
                    "Investigation",
                    400.0,
                    weights(0.25, 0.0, 0.0, 0.2, 0.1, 0.25, 0.2),
                )
            },
            impact: CityImpact::ImproveEstimate,
        },
        OperationDef {
            common: ActionCommon {
                rank_gain: 4.4,
                rank_loss: 0.8,
                hp_loss: 2.0,
                base_seconds: 120,
                is_stealth: true,
                ..op(
                    "Undercover",
                    500.0,
                    weights(0.2, 0.05, 0.05, 0.2, 0.2, 0.2, 0.1),
                )
            },
            impact: CityImpact::ImproveEstimate,
        },
        OperationDef {
            common: ActionCommon {
                rank_gain: 5.5,
                rank_loss: 1.1,
                hp_loss: 2.5,
                base_seconds: 120,
                is_stealth: true,
                ..op(
                    "Sting",
                    650.0,
                    weights(0.25, 0.05, 0.05, 0.25, 0.1, 0.2, 0.1),
                )
            },
            impact: CityImpact::Strike {
                pop_pct: 0.001,
                chaos: 0.1,
            },
        },
        OperationDef {
            common: ActionCommon {
                rank_gain: 11.0,
                rank_loss: 2.2,
                hp_loss: 4.0,
                base_seconds: 150,
                stamina_cost: 4.0,
                is_stealth: true,
                is_kill: true,
                ..op(
                    "Silent Takedown",
                    1000.0,
                    weights(0.1, 0.15, 0.1, 0.25, 0.25, 0.05, 0.1),
                )
            },
            impact: CityImpact::Strike {
                pop_pct: 0.005,
                chaos: 0.1,
            },
        },
        OperationDef {
            common: ActionCommon {
                rank_gain: 22.0,
                rank_loss: 4.4,
                hp_loss: 5.0,
                base_seconds: 180,
                stamina_cost: 4.0,
                difficulty_fac: 1.06,
                initial_count: 5.0,
                count_growth: 1.0 / 7200.0,
                is_stealth: true,
                is_kill: true,
                ..op(
                    "Assassination",
                    1500.0,
                    weights(0.1, 0.1, 0.1, 0.3, 0.2, 0.05, 0.15),
                )
            },
            impact: CityImpact::Eliminate { est_offset: 3.0 },
        },
        OperationDef {
            common: ActionCommon {
                rank_gain: 55.0,
                rank_loss: 11.0,
                hp_loss: 50.0,
                base_seconds: 240,
                stamina_cost: 6.0,
                initial_count: 5.0,
                count_growth: 1.0 / 7200.0,
                is_kill: true,
                ..op("Raid", 800.0, weights(0.1, 0.2, 0.2, 0.2, 0.2, 0.0, 0.1))
            },
            impact: CityImpact::Raid {
                pop_pct: 0.05,
                chaos: 5.0,
            },
        },
    ];

    let black_op = |name: &str, n: u32, diff: f64, reqd_rank: f64, rank_gain: f64| BlackOpDef {
        common: ActionCommon {
            rank_gain,
            rank_loss: rank_gain / 2.0,
            hp_loss: 10.0 + 8.0 * f64::from(n),
            base_seconds: 300,
            stamina_cost: 10.0,
            initial_count: 1.0,
            count_growth: 0.0,
            is_stealth: false,
            is_kill: true,
            ..mission(
                name,
                diff,
                weights(0.1, 0.15, 0.15, 0.2, 0.2, 0.05, 0.15),
                flat_decay(0.8, 0.7),
            )
        },
        n,
        reqd_rank,
    };
    let black_ops = vec![
        black_op("Operation Nightfall", 0, 1_500.0, 1_000.0, 10.0),
        black_op("Operation Vermilion", 1, 2_500.0, 2_500.0, 20.0),
        black_op("Operation Hollow Crown", 2, 4_000.0, 5_000.0, 40.0),
        black_op("Operation Glasshouse", 3, 6_500.0, 10_000.0, 80.0),
        black_op("Operation Last Ember", 4, 10_000.0, 25_000.0, 160.0),
        black_op("Operation Silent Sun", 5, 15_000.0, 50_000.0, 320.0),
    ];

    let general = |name: &str, base_seconds: u64, stamina_cost: f64, effect: GeneralEffect| {
        GeneralDef {
            name: name.to_string(),
            base_seconds,
            stamina_cost,
            effect,
        }
    };
    let generals = vec![
        general("Training", 30, 0.5, GeneralEffect::Training),
        general("Field Analysis", 30, 0.5, GeneralEffect::FieldAnalysis),
        general("Recruitment", 300, 0.5, GeneralEffect::Recruitment),
        general("Diplomacy", 60, 1.0, GeneralEffect::Diplomacy),
        general("Recovery", 60, 0.0, GeneralEffect::Recovery),
        general("Incite Unrest", 60, 1.0, GeneralEffect::InciteUnrest),
    ];

    Catalog {
        contracts,
        operations,
        black_ops,
        generals,
    }
}

/// The standard skill catalog.
pub fn standard_skills() -> SkillCatalog {
    let skill = |name: &str,
                 base_cost: f64,
                 cost_inc: f64,
                 max_level: Option<u32>,
                 contributions: Vec<(MultiplierKind, f64)>| SkillDef {
        name: name.to_string(),
        base_cost,
        cost_inc,
        max_level,
        contributions,
    };
    SkillCatalog {
        skills: vec![
            skill(
                "Intuition",
                3.0,
                2.1,
                None,
                vec![(MultiplierKind::SuccessChanceAll, 3.0)],
            ),
            skill(
                "Cloak",
                2.0,
                1.1,
                Some(25),
                vec![(MultiplierKind::SuccessChanceStealth, 5.5)],
            ),
            skill(
                "Executioner",
                2.0,
                2.1,
                Some(25),
                vec![(MultiplierKind::SuccessChanceKill, 5.5)],
            ),
            skill(
                "Tracer",
                4.0,
                2.1,
                None,
                vec![(MultiplierKind::SuccessChanceContract, 4.0)],
            ),
            skill(
                "Observer",
                4.0,
                2.1,
                None,
                vec![
                    (MultiplierKind::SuccessChanceOperation, 4.0),
                    (MultiplierKind::SuccessChanceBlackOp, 4.0),
                ],
            ),
            skill(
                "Overclock",
                3.0,
                1.4,
                Some(90),
                vec![(MultiplierKind::ActionTime, -1.0)],
            ),
            skill(
                "Datamancer",
                5.0,
                2.0,
                None,
                vec![(MultiplierKind::SuccessChanceEstimate, 5.0)],
            ),
            skill(
                "Conditioning",
                2.0,
                2.1,
                None,
                vec![(MultiplierKind::EffCombat, 2.0)],
            ),
            skill(
                "Negotiator",
                2.0,
                2.1,
                None,
                vec![(MultiplierKind::EffCharisma, 3.0)],
            ),
            skill(
                "Endurance",
                2.0,
                2.1,
                None,
                vec![
                    (MultiplierKind::MaxStamina, 2.0),
                    (MultiplierKind::StaminaGain, 1.0),
                ],
            ),
            skill(
                "Midas",
                2.0,
                2.5,
                None,
                vec![(MultiplierKind::Money, 10.0)],
            ),
        ],
    }
}

/// The six standard cities at their starting state.
pub fn standard_cities() -> Vec<City> {
    let city = |name: &str, pop: f64, pop_est: f64, comms: u32| City {
        name: name.to_string(),
        pop,
        pop_est,
        comms,
        chaos: 0.0,
    };
    vec![
        city("Meridian", 1.20e9, 1.05e9, 5),
        city("Kestrel Bay", 1.50e9, 1.62e9, 12),
        city("Northgate", 1.10e9, 0.98e9, 8),
        city("Caldera", 0.90e9, 1.01e9, 20),
        city("Sable Point", 1.40e9, 1.30e9, 3),
        city("Veldt", 1.00e9, 1.08e9, 10),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_sum_to_one() {
        let catalog = standard_catalog();
        for c in &catalog.contracts {
            assert!((c.common.weights.sum() - 1.0).abs() < 1e-9, "{}", c.common.name);
        }
        for o in &catalog.operations {
            assert!((o.common.weights.sum() - 1.0).abs() < 1e-9, "{}", o.common.name);
        }
        for b in &catalog.black_ops {
            assert!((b.common.weights.sum() - 1.0).abs() < 1e-9, "{}", b.common.name);
        }
    }

    #[test]
    fn black_op_ranks_increase() {
        let catalog = standard_catalog();
        for pair in catalog.black_ops.windows(2) {
            assert!(pair[0].reqd_rank < pair[1].reqd_rank);
        }
    }

    #[test]
    fn six_cities_with_positive_population() {
        let cities = standard_cities();
        assert_eq!(cities.len(), 6);
        for c in &cities {
            assert!(c.pop > 0.0 && c.pop_est > 0.0);
        }
    }
}
