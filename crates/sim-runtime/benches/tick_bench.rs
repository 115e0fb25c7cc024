use criterion::{criterion_group, criterion_main, Criterion};
use sim_core::{ActionId, ActionKind, Operative, StatVector};
use sim_runtime::{Engine, EngineConfig, CYCLES_PER_SECOND};

fn build_engine() -> Engine {
    let stats = StatVector {
        hacking: 100.0,
        strength: 100.0,
        defense: 100.0,
        dexterity: 100.0,
        agility: 100.0,
        charisma: 100.0,
        intelligence: 100.0,
    };
    let mut engine = Engine::new(EngineConfig::default(), Operative::new(stats, 100.0));
    engine
        .start_action(ActionId::new(ActionKind::Contract, "Surveillance"))
        .expect("contract should start");
    engine
}

fn bench_ticks(c: &mut Criterion) {
    let mut engine = build_engine();
    c.bench_function("process_one_second", |b| {
        b.iter(|| {
            engine.store_cycles(CYCLES_PER_SECOND);
            let _ = engine.process();
        })
    });
}

criterion_group!(benches, bench_ticks);
criterion_main!(benches);
