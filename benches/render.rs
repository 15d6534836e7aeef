use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::sync::LazyLock;
use std::time::Duration;

use mustache_vm::debug::EvalTracer;
use mustache_vm::json_host::render_to_string;
use mustache_vm::resolver::InMemoryResolver;
use mustache_vm::Program;
use serde_json::json;

// -----------------------------------------------------------------------------
// Test data
// -----------------------------------------------------------------------------

const SMALL_TEMPLATE: &str = "{{#items}}{{name}}: {{value}}\n{{/items}}";
static LARGE_ITEMS: LazyLock<serde_json::Value> = LazyLock::new(|| {
    let items: Vec<_> = (0..1_000)
        .map(|i| json!({"name": format!("item{i}"), "value": i}))
        .collect();
    json!({"items": items})
});

// -----------------------------------------------------------------------------
// 1. Compilation benchmarks – how fast can we turn source into a Program?
// -----------------------------------------------------------------------------

fn bench_compile(c: &mut Criterion) {
    let resolver = InMemoryResolver::new();
    let cases = [
        ("plain_text", "just plain text, no tags at all"),
        ("single_variable", "Hello, {{name}}!"),
        ("section", SMALL_TEMPLATE),
        (
            "nested_sections",
            "{{#groups}}[{{#items}}{{.}}{{/items}}]{{/groups}}",
        ),
    ];

    let mut group = c.benchmark_group("compile");
    for (name, tpl) in cases {
        group.bench_function(name, |b| {
            b.iter(|| Program::compile_str("bench", black_box(tpl), &resolver).unwrap())
        });
    }
    group.finish();
}

// -----------------------------------------------------------------------------
// 2. Render benchmarks – runtime cost of evaluating an already-compiled
//    Program, the steady state a compile-once/render-many host actually pays.
// -----------------------------------------------------------------------------

fn bench_render(c: &mut Criterion) {
    let resolver = InMemoryResolver::new();

    let small_program =
        Program::compile_str("bench", SMALL_TEMPLATE, &resolver).unwrap();
    let small_data = json!({"items": [{"name": "a", "value": 1}, {"name": "b", "value": 2}]});

    let large_program = Program::compile_str("bench", SMALL_TEMPLATE, &resolver).unwrap();

    let mut group = c.benchmark_group("render");
    group.bench_function("small_list", |b| {
        b.iter(|| {
            render_to_string(
                &small_program,
                black_box(small_data.clone()),
                EvalTracer::new(false),
            )
            .unwrap()
        })
    });
    group.bench_function("thousand_item_list", |b| {
        b.iter(|| {
            render_to_string(
                &large_program,
                black_box(LARGE_ITEMS.clone()),
                EvalTracer::new(false),
            )
            .unwrap()
        })
    });
    group.finish();
}

// -----------------------------------------------------------------------------
// 3. Partial resolution – cost of the directory-walk dedup cache warming up
//    versus serving a cache hit on a repeated reference.
// -----------------------------------------------------------------------------

fn bench_partials(c: &mut Criterion) {
    let resolver = InMemoryResolver::new().with("row", "{{name}}\n");

    let mut group = c.benchmark_group("partials");
    group.bench_function("single_reference", |b| {
        b.iter(|| Program::compile_str("bench", black_box("{{>row}}"), &resolver).unwrap())
    });
    group.bench_function("repeated_reference_dedup", |b| {
        b.iter(|| {
            Program::compile_str(
                "bench",
                black_box("{{>row}}{{>row}}{{>row}}{{>row}}{{>row}}"),
                &resolver,
            )
            .unwrap()
        })
    });
    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .configure_from_args()
        .sample_size(200)
        .measurement_time(Duration::from_secs(5));
    targets = bench_compile, bench_render, bench_partials
}
criterion_main!(benches);
