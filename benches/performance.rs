use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use prism::{CacheConfig, ResponseCache, UpstreamResolver, UpstreamsConfig};
use std::time::Duration;

fn benchmark_upstream_resolution(c: &mut Criterion) {
    let resolver = UpstreamResolver::new(&UpstreamsConfig::default()).unwrap();

    let paths = [
        "/courses/42",
        "/series/7/items",
        "/users/42",
        "/users/42/enrollments",
        "/unknown/path",
    ];

    c.bench_function("resolve_known_paths", |b| {
        b.iter(|| {
            for path in &paths {
                black_box(resolver.resolve(black_box(path)));
            }
        })
    });

    c.bench_function("resolve_course_path", |b| {
        b.iter(|| black_box(resolver.resolve(black_box("/courses/42"))))
    });

    c.bench_function("resolve_enrollment_path", |b| {
        b.iter(|| black_box(resolver.resolve(black_box("/users/42/enrollments"))))
    });
}

fn benchmark_response_cache(c: &mut Criterion) {
    let cache = ResponseCache::new(CacheConfig {
        ttl: Duration::from_secs(300),
        include_query: true,
        max_body_size: 1024 * 1024,
    });

    let body = Bytes::from(vec![b'x'; 4096]);
    cache.set(
        "GET:/courses".to_string(),
        body.clone(),
        Some("application/json".to_string()),
    );

    c.bench_function("cache_hit", |b| {
        b.iter(|| black_box(cache.get(black_box("GET:/courses"))))
    });

    c.bench_function("cache_miss", |b| {
        b.iter(|| black_box(cache.get(black_box("GET:/absent"))))
    });

    c.bench_function("cache_set_overwrite", |b| {
        b.iter(|| {
            cache.set(
                "GET:/courses".to_string(),
                black_box(body.clone()),
                Some("application/json".to_string()),
            )
        })
    });
}

fn benchmark_cache_key_generation(c: &mut Criterion) {
    use pingora_http::RequestHeader;

    let cache = ResponseCache::new(CacheConfig::default());
    let req = RequestHeader::build("GET", b"/courses/42?page=2&limit=10", None).unwrap();

    c.bench_function("cache_key_generation", |b| {
        b.iter(|| black_box(cache.cache_key(black_box(&req))))
    });
}

criterion_group!(
    benches,
    benchmark_upstream_resolution,
    benchmark_response_cache,
    benchmark_cache_key_generation
);
criterion_main!(benches);
