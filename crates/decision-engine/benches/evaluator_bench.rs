//! 评估性能基准测试
//!
//! 覆盖操作符比较、条件树评估（有无条件缓存）以及整次引擎运行。

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use decision_engine::{
    Almanac, AlmanacOptions, CompiledTree, Condition, ConditionTree, Engine, EngineConfig,
    ExecutionMode, OperatorRegistry, Rule,
};
use serde_json::{json, Value};
use std::hint::black_box;
use std::sync::Arc;

fn bench_operators(c: &mut Criterion) {
    let mut group = c.benchmark_group("operators");
    let registry = OperatorRegistry::with_defaults();

    let cases: Vec<(&str, Value, Value)> = vec![
        ("equal", json!(1000), json!(1000)),
        ("greater_than", json!(1000), json!(500)),
        ("in", json!("b"), json!(["a", "b", "c", "d", "e"])),
        ("contains", json!("hello world"), json!("world")),
        ("regex", json!("user@example.com"), json!(r"^[\w.]+@[\w.]+$")),
    ];

    for (op, fact, compare) in &cases {
        group.bench_function(*op, |b| {
            b.iter(|| registry.evaluate(black_box(op), black_box(fact), black_box(compare)))
        });
    }

    group.finish();
}

fn wide_tree(width: usize) -> CompiledTree {
    let children = (0..width)
        .map(|i| {
            Condition::new("order", "greater_than_inclusive", i as i64)
                .with_path("$.amount")
                .into()
        })
        .collect();
    CompiledTree::compile(&ConditionTree::all(children)).unwrap()
}

fn order_almanac(cache_conditions: bool) -> Almanac {
    let almanac = Almanac::new(AlmanacOptions {
        cache_conditions,
        ..Default::default()
    });
    almanac.add_value("order", json!({"amount": 10_000, "currency": "EUR"}));
    almanac
}

fn bench_tree(c: &mut Criterion) {
    let mut group = c.benchmark_group("condition_tree");
    let registry = OperatorRegistry::with_defaults();

    for width in [4, 16, 64] {
        let tree = wide_tree(width);
        group.bench_with_input(BenchmarkId::new("uncached", width), &tree, |b, tree| {
            let almanac = order_almanac(false);
            b.iter(|| tree.evaluate(black_box(&almanac), &registry))
        });
        group.bench_with_input(BenchmarkId::new("cached", width), &tree, |b, tree| {
            let almanac = order_almanac(true);
            b.iter(|| tree.evaluate(black_box(&almanac), &registry))
        });
    }

    group.finish();
}

fn bench_engine_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_run");
    let runtime = tokio::runtime::Runtime::new().unwrap();

    for execution in [ExecutionMode::Sequential, ExecutionMode::Parallel] {
        let engine = Engine::new(EngineConfig {
            execution,
            workers: 4,
            ..Default::default()
        });
        let rules = (0..50)
            .map(|i| {
                Rule::new(
                    format!("rule_{}", i),
                    ConditionTree::all(vec![
                        Condition::new("event", "equal", "PURCHASE").with_path("$.type").into(),
                        Condition::new("order", "greater_than_inclusive", 100 + i)
                            .with_path("$.amount")
                            .into(),
                    ]),
                )
                .with_priority(i % 5)
            })
            .collect();
        engine.add_rules(rules).unwrap();

        group.bench_function(format!("{:?}", execution), |b| {
            b.iter(|| {
                let almanac = Almanac::from_values([
                    ("event", json!({"type": "PURCHASE"})),
                    ("order", json!({"amount": 120})),
                ]);
                runtime.block_on(engine.run(Arc::new(almanac))).unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_operators, bench_tree, bench_engine_run);
criterion_main!(benches);
