//! Benchmarks for template expansion and foreach projection
//!
//! This benchmark measures:
//! - Expansion of short and reference-heavy templates
//! - Recursive expansion of nested webhook params
//! - Foreach aggregation over response arrays of growing size

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::{json, Value};

use datamap_runtime::definition::ForeachSpec;
use datamap_runtime::projector::{bind_response, run_foreach};
use datamap_runtime::template::{self, Scopes};

fn invocation_scopes() -> Scopes<'static> {
    let mut scopes = Scopes::for_invocation(
        json!({"category": "science", "limit": 5, "city": "San Francisco"}),
        json!({"api_key": "k-123", "units": "metric"}),
    );
    bind_response(
        &mut scopes,
        &json!([{"category": "Math", "question": "2+2?", "answer": "4"}]),
    );
    scopes
}

fn bench_expand(c: &mut Criterion) {
    let scopes = invocation_scopes();
    let mut group = c.benchmark_group("template_expansion");

    let cases = [
        ("plain", "No markers in this response at all."),
        ("single", "Weather for ${args.city}"),
        (
            "many",
            "Category ${response[0].category}: ${response[0].question} — ${response[0].answer} (${args.limit}, ${global.units}, ${args.missing || \"n/a\"})",
        ),
    ];
    for (name, text) in cases {
        group.bench_with_input(BenchmarkId::new("expand", name), &text, |b, t| {
            b.iter(|| template::expand(black_box(t), &scopes))
        });
    }

    group.bench_function("expand_url", |b| {
        b.iter(|| {
            template::expand_url(
                black_box("https://api.example/v1/trivia?category=${args.city}&key=${global.api_key}"),
                &scopes,
            )
        })
    });

    let params = json!({
        "q": "${args.category}",
        "filters": {"units": "${global.units}", "limit": "${args.limit}"},
        "tags": ["${args.city}", "static"]
    });
    group.bench_function("expand_value", |b| {
        b.iter(|| template::expand_value(black_box(&params), &scopes))
    });

    group.finish();
}

fn bench_foreach(c: &mut Criterion) {
    let mut group = c.benchmark_group("foreach_projection");
    let spec = ForeachSpec::new("results", "formatted", "${this.index}: ${this.title} (${this.score}); ");

    for size in [10usize, 100, 1000] {
        let items: Vec<Value> = (0..size)
            .map(|i| json!({"title": format!("Item {}", i), "score": i}))
            .collect();
        let body = json!({ "results": items });
        let scopes = Scopes::for_invocation(json!({}), json!({}));

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("items", size), &body, |b, body| {
            b.iter(|| run_foreach(&spec, black_box(body), &scopes))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_expand, bench_foreach);
criterion_main!(benches);
