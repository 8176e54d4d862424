use std::hint::black_box;
use std::sync::Arc;

use brrtframe::router::Router;
use brrtframe::{InjectRequest, Instance, RouterConfig};
use criterion::{criterion_group, criterion_main, Criterion};
use http::Method;
use serde_json::json;

fn zoo_router() -> Router<&'static str> {
    let routes = [
        (Method::GET, "/", "root_handler"),
        (Method::GET, "/zoo/animals", "get_animals"),
        (Method::POST, "/zoo/animals", "create_animal"),
        (Method::GET, "/zoo/animals/:id", "get_animal"),
        (Method::PUT, "/zoo/animals/:id", "update_animal"),
        (Method::GET, "/zoo/animals/:id/toys/:toy_id", "animal_toy"),
        (
            Method::GET,
            "/zoo/:category/animals/:id/habitats/:habitat_id/sections/:section_id",
            "habitat_section",
        ),
        (
            Method::POST,
            "/inventory/:warehouse_id/feeds/:feed_id/items/:item_id/batches/:batch_id",
            "post_item_batch",
        ),
        (Method::GET, "/complex/:a/:b/:c/:d/:e/:f/:g/:h/:i", "complex_many_params"),
        (Method::GET, "/static/*", "static_files"),
    ];
    let mut router = Router::new(RouterConfig::default());
    for (method, path, name) in routes {
        router
            .register(method, path, Arc::new(name))
            .expect("bench routes are valid");
    }
    router
}

fn bench_route_lookup(c: &mut Criterion) {
    let router = zoo_router();
    c.bench_function("route_match", |b| {
        let test_paths = [
            (Method::GET, "/zoo/animals/123"),
            (Method::GET, "/zoo/animals/123/toys/456"),
            (Method::GET, "/zoo/cats/animals/123/habitats/88/sections/5"),
            (Method::POST, "/inventory/1/feeds/2/items/3/batches/4"),
            (Method::GET, "/complex/1/2/3/4/5/6/7/8/9"),
            (Method::GET, "/static/css/site.css"),
        ];
        b.iter(|| {
            for (method, path) in &test_paths {
                black_box(router.find(method, path));
            }
        })
    });
}

fn bench_inject_pipeline(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let app = Instance::new();
    app.get("/zoo/animals/:id", |req, _reply| async move {
        Ok(json!({"id": req.param("id")}))
    })
    .expect("route registers");
    runtime.block_on(app.ready()).expect("instance boots");

    c.bench_function("inject_get_animal", |b| {
        b.iter(|| {
            let res = runtime
                .block_on(app.inject(InjectRequest::get("/zoo/animals/123")))
                .expect("inject succeeds");
            black_box(res);
        })
    });
}

criterion_group!(benches, bench_route_lookup, bench_inject_pipeline);
criterion_main!(benches);
