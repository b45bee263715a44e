//! Performance benchmarks for the inliner
//!
//! Run with: cargo bench
//!
//! These benchmarks measure:
//! - Fixture loading and IR building
//! - Monomorphic inlining as the number of call sites grows
//! - Polymorphic dispatch as the number of arms grows
//! - Bounded self-recursive inlining

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use quicksilver_inliner::fixture::Fixture;
use quicksilver_inliner::{inline_job, InlineContext, InlinerConfig};

/// `f` calling `g(x, i)` at `sites` profiled call sites
fn monomorphic_fixture(sites: usize) -> String {
    let mut ir = vec![
        r#"{ "op": "ArgIn", "dst": "r0", "slot": 1 }"#.to_string(),
        r#"{ "op": "ArgIn", "dst": "r1", "slot": 2 }"#.to_string(),
    ];
    let mut call_sites = Vec::new();
    for site in 0..sites {
        let k = 10 + 2 * site;
        ir.push(format!(r##"{{ "op": "LdConstI4", "dst": "r{}", "src1": "#{}" }}"##, k, site));
        ir.push(format!(
            r#"{{ "op": "CallI", "dst": "r{}", "src1": "r2", "args": ["r0", "r1", "r{}"], "profile": {} }}"#,
            k + 1,
            k,
            site
        ));
        call_sites.push(format!(r#""{}": "g""#, site));
    }
    ir.push(r#"{ "op": "Ret", "src1": "r1" }"#.to_string());
    format!(
        r#"{{
            "entry": "f",
            "functions": [
                {{ "body": {{ "name": "f", "function_number": 1, "in_params_count": 2, "locals_count": {} }},
                   "call_sites": {{ {} }},
                   "ir": [ {} ] }},
                {{ "body": {{ "name": "g", "function_number": 2, "in_params_count": 3 }},
                   "ir": [
                     {{ "op": "ArgIn", "dst": "r0", "slot": 2 }},
                     {{ "op": "ArgIn", "dst": "r1", "slot": 3 }},
                     {{ "op": "Mul", "dst": "r2", "src1": "r0", "src2": "r1" }},
                     {{ "op": "Ret", "src1": "r2" }}
                   ] }}
            ]
        }}"#,
        12 + 2 * sites,
        call_sites.join(", "),
        ir.join(",\n")
    )
}

/// `f` calling one site that saw `arms` different callees
fn polymorphic_fixture(arms: usize) -> String {
    let names: Vec<String> = (0..arms).map(|i| format!(r#""arm{}""#, i)).collect();
    let bodies: Vec<String> = (0..arms)
        .map(|i| {
            format!(
                r##"{{ "body": {{ "name": "arm{i}", "function_number": {n}, "in_params_count": 1 }},
                      "ir": [ {{ "op": "LdConstI4", "dst": "r0", "src1": "#{i}" }}, {{ "op": "Ret", "src1": "r0" }} ] }}"##,
                i = i,
                n = 10 + i
            )
        })
        .collect();
    format!(
        r#"{{
            "entry": "f",
            "functions": [
                {{ "body": {{ "name": "f", "function_number": 1, "in_params_count": 1, "locals_count": 4 }},
                   "call_sites": {{ "0": [ {} ] }},
                   "ir": [
                     {{ "op": "ArgIn", "dst": "r0", "slot": 1 }},
                     {{ "op": "CallI", "dst": "r2", "src1": "r1", "args": ["r0"], "profile": 0 }},
                     {{ "op": "Ret", "src1": "r2" }}
                   ] }},
                {}
            ]
        }}"#,
        names.join(", "),
        bodies.join(",\n")
    )
}

const RECURSIVE: &str = r#"{
    "entry": "f",
    "functions": [
        { "body": { "name": "f", "function_number": 1, "in_params_count": 2, "locals_count": 4 },
          "call_sites": { "0": "f" },
          "ir": [
            { "op": "ArgIn", "dst": "r0", "slot": 1 },
            { "op": "ArgIn", "dst": "r1", "slot": 2 },
            { "op": "CallI", "dst": "r3", "src1": "r2", "args": ["r0", "r1"], "profile": 0 },
            { "op": "Ret", "src1": "r3" }
          ] }
    ]
}"#;

fn inline_fixture(fixture: &Fixture, ctx: &InlineContext, config: &InlinerConfig) {
    let decider = fixture.decider();
    let builder = fixture.ir_builder();
    let mut job = fixture.build_job().unwrap();
    let stats = inline_job(&mut job, ctx, config, &decider, &builder).unwrap();
    black_box((job, stats));
}

/// Benchmark: parsing, validating and building the entry function
fn bench_fixture_load(c: &mut Criterion) {
    let json = monomorphic_fixture(16);
    let mut group = c.benchmark_group("fixture");
    group.throughput(Throughput::Bytes(json.len() as u64));
    group.bench_function("parse", |b| b.iter(|| Fixture::from_json_str(black_box(&json)).unwrap()));

    let fixture = Fixture::from_json_str(&json).unwrap();
    group.bench_function("build_job", |b| b.iter(|| black_box(fixture.build_job().unwrap())));
    group.finish();
}

/// Benchmark: one callee inlined at a growing number of sites
fn bench_monomorphic(c: &mut Criterion) {
    let ctx = InlineContext::default();
    let config = InlinerConfig::default();
    let mut group = c.benchmark_group("monomorphic");
    for sites in [1usize, 8, 32].iter() {
        let fixture = Fixture::from_json_str(&monomorphic_fixture(*sites)).unwrap();
        group.throughput(Throughput::Elements(*sites as u64));
        group.bench_with_input(BenchmarkId::new("call_sites", sites), sites, |b, _| {
            b.iter(|| inline_fixture(&fixture, &ctx, &config))
        });
    }
    group.finish();
}

/// Benchmark: dispatch over two to four arms
fn bench_polymorphic(c: &mut Criterion) {
    let ctx = InlineContext::default();
    let config = InlinerConfig::default();
    let mut group = c.benchmark_group("polymorphic");
    for arms in [2usize, 3, 4].iter() {
        let fixture = Fixture::from_json_str(&polymorphic_fixture(*arms)).unwrap();
        group.bench_with_input(BenchmarkId::new("arms", arms), arms, |b, _| {
            b.iter(|| inline_fixture(&fixture, &ctx, &config))
        });
    }
    group.finish();
}

/// Benchmark: recursion up to the configured depth, IR already built
fn bench_recursive(c: &mut Criterion) {
    let ctx = InlineContext::default();
    let config = InlinerConfig::default();
    let fixture = Fixture::from_json_str(RECURSIVE).unwrap();
    let decider = fixture.decider();
    let builder = fixture.ir_builder();
    c.bench_function("recursive", |b| {
        b.iter_batched(
            || fixture.build_job().unwrap(),
            |mut job| inline_job(&mut job, &ctx, &config, &decider, &builder).unwrap(),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench_fixture_load,
    bench_monomorphic,
    bench_polymorphic,
    bench_recursive
);

criterion_main!(benches);
