use std::hint::black_box;

use axum::http::Method;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use seitenwerk::content::{text::extract_text, Document, Node};
use seitenwerk::router::{Registry, RouteKind, RouteOptions};

fn build_registry(routes: usize) -> Registry {
    (0..routes)
        .fold(Registry::builder(), |builder, i| {
            builder.view(
                &format!("/section{}/:id/details", i),
                RouteOptions::new().priority((i % 3) as i32),
                |_| Ok(String::new()),
            )
        })
        .view("/docs/*", RouteOptions::new().priority(-1), |_| Ok(String::new()))
        .build()
        .unwrap()
}

fn bench_route_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("route_resolution");

    for routes in [10usize, 100, 1000].iter() {
        let registry = build_registry(*routes);
        let last = format!("/section{}/42/details", routes - 1);
        group.bench_with_input(BenchmarkId::new("last_route", routes), &last, |b, path| {
            b.iter(|| registry.routes().resolve(&Method::GET, black_box(path), RouteKind::Page).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("wildcard", routes), &"/docs/a/b/c", |b, path| {
            b.iter(|| registry.routes().resolve(&Method::GET, black_box(path), RouteKind::Page).unwrap())
        });
    }

    group.finish();
}

fn bench_text_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("text_extraction");

    for paragraphs in [10usize, 100, 1000].iter() {
        let doc = Document::new(
            (0..*paragraphs)
                .map(|i| {
                    Node::new("paragraph")
                        .with_children(vec![Node::text(format!("Absatz {} mit etwas Text", i)), Node::new("linebreak")])
                })
                .collect(),
        );
        group.bench_with_input(BenchmarkId::from_parameter(paragraphs), &doc, |b, doc| {
            b.iter(|| extract_text(black_box(&doc.root)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_route_resolution, bench_text_extraction);
criterion_main!(benches);
