mod common;

use std::sync::Arc;

use brrtframe::{
    FrameworkConfig, FrameworkError, InjectRequest, Instance, LifecycleState, PluginOptions,
    RouterConfig,
};
use common::Recorder;
use http::StatusCode;
use serde_json::json;
use tokio::sync::Notify;

fn users_app() -> Instance {
    let app = Instance::new();
    app.register(
        |users: Instance, _opts: PluginOptions| async move {
            users.get("/:id", |req, _reply| async move {
                Ok(json!({"id": req.param("id"), "context": req.context_name()}))
            })?;
            Ok(())
        },
        PluginOptions::new().name("users").prefix("/users"),
    )
    .unwrap();
    app
}

#[tokio::test]
async fn test_inject_matches_param_route() {
    let app = users_app();
    let res = app.inject(InjectRequest::get("/users/42")).await.unwrap();
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json().unwrap(), json!({"id": "42", "context": "users"}));
    assert!(res
        .header("content-type")
        .unwrap()
        .starts_with("application/json"));
}

#[tokio::test]
async fn test_ready_runs_plugins_once() {
    let rec = Recorder::new();
    let app = Instance::new();
    let plugin_rec = rec.clone();
    app.register(
        move |_p: Instance, _opts: PluginOptions| async move {
            plugin_rec.push("loaded");
            Ok(())
        },
        PluginOptions::new(),
    )
    .unwrap();

    app.ready().await.unwrap();
    app.ready().await.unwrap();
    app.inject(InjectRequest::get("/")).await.unwrap();
    assert_eq!(rec.count("loaded"), 1);
    assert_eq!(app.state(), LifecycleState::Ready);
}

#[tokio::test]
async fn test_registration_after_ready_is_rejected() {
    let app = users_app();
    app.ready().await.unwrap();

    let err = app
        .get("/late", |_req, _reply| async { Ok(json!(1)) })
        .unwrap_err();
    assert!(matches!(err, FrameworkError::AlreadyStarted { operation: "route" }));
    let err = app
        .register(
            |_p: Instance, _opts: PluginOptions| async { Ok(()) },
            PluginOptions::new(),
        )
        .unwrap_err();
    assert!(matches!(err, FrameworkError::AlreadyStarted { .. }));
}

#[tokio::test]
async fn test_closed_instance_rejects_everything() {
    let app = users_app();
    app.ready().await.unwrap();
    app.close().await.unwrap();

    assert_eq!(app.state(), LifecycleState::Closed);
    assert!(matches!(
        app.inject(InjectRequest::get("/users/1")).await,
        Err(FrameworkError::Closed)
    ));
    assert!(matches!(app.ready().await, Err(FrameworkError::Closed)));
    assert!(matches!(
        app.decorate("x", json!(1)),
        Err(FrameworkError::Closed)
    ));
}

#[tokio::test]
async fn test_duplicate_route_fails_ready() {
    let app = Instance::new();
    app.get("/a/:x", |_req, _reply| async { Ok(json!(1)) })
        .unwrap();
    app.get("/a/:y", |_req, _reply| async { Ok(json!(2)) })
        .unwrap();
    let err = app.ready().await.unwrap_err();
    assert!(matches!(err, FrameworkError::DuplicateRoute { ref path, .. } if path == "/a/:y"));
}

#[tokio::test]
async fn test_all_registers_every_method() {
    let app = Instance::new();
    app.all("/any", |req, _reply| async move { Ok(json!(req.method().as_str())) })
        .unwrap();
    for request in [
        InjectRequest::get("/any"),
        InjectRequest::post("/any"),
        InjectRequest::put("/any"),
        InjectRequest::delete("/any"),
        InjectRequest::patch("/any"),
        InjectRequest::options("/any"),
    ] {
        let method = request.method.clone();
        let res = app.inject(request).await.unwrap();
        assert_eq!(res.status, StatusCode::OK, "{method}");
        assert_eq!(res.text(), method.as_str());
    }
}

#[tokio::test]
async fn test_overlong_param_is_414() {
    let config = FrameworkConfig {
        router: RouterConfig {
            max_param_length: 5,
            ..RouterConfig::default()
        },
        ..FrameworkConfig::default()
    };
    let app = Instance::with_config(config);
    app.get("/p/:v", |_req, _reply| async { Ok(json!("ok")) })
        .unwrap();

    let short = app.inject(InjectRequest::get("/p/abc")).await.unwrap();
    assert_eq!(short.status, StatusCode::OK);
    let long = app.inject(InjectRequest::get("/p/abcdefgh")).await.unwrap();
    assert_eq!(long.status, StatusCode::URI_TOO_LONG);
}

#[tokio::test]
async fn test_trailing_slash_option() {
    let strict = Instance::new();
    strict.get("/users", |_req, _reply| async { Ok(json!("ok")) })
        .unwrap();
    let res = strict.inject(InjectRequest::get("/users/")).await.unwrap();
    assert_eq!(res.status, StatusCode::NOT_FOUND);

    let lenient = Instance::with_config(FrameworkConfig {
        router: RouterConfig {
            ignore_trailing_slash: true,
            ..RouterConfig::default()
        },
        ..FrameworkConfig::default()
    });
    lenient
        .get("/users", |_req, _reply| async { Ok(json!("ok")) })
        .unwrap();
    let res = lenient.inject(InjectRequest::get("/users/")).await.unwrap();
    assert_eq!(res.status, StatusCode::OK);
}

#[tokio::test]
async fn test_request_id_header_is_honoured() {
    let app = Instance::new();
    app.get("/id", |req, _reply| async move { Ok(json!(req.id().to_string())) })
        .unwrap();

    let upstream = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    let res = app
        .inject(InjectRequest::get("/id").header("request-id", upstream))
        .await
        .unwrap();
    assert_eq!(res.text(), upstream);

    let generated = app.inject(InjectRequest::get("/id")).await.unwrap();
    assert_eq!(generated.text().len(), 26);
    assert_ne!(generated.text(), upstream);
}

#[tokio::test]
async fn test_query_string_is_parsed() {
    let app = Instance::new();
    app.get("/search", |req, _reply| async move {
        Ok(json!({"q": req.query_param("q"), "query": req.query()}))
    })
    .unwrap();
    let res = app
        .inject(InjectRequest::get("/search?q=hello+world&x=%2F"))
        .await
        .unwrap();
    assert_eq!(
        res.json().unwrap(),
        json!({"q": "hello world", "query": {"q": "hello world", "x": "/"}})
    );
}

#[tokio::test]
async fn test_relative_route_url_is_rooted() {
    let app = Instance::new();
    app.get("users", |_req, _reply| async { Ok(json!("root users")) })
        .unwrap();
    app.register(
        |v1: Instance, _opts: PluginOptions| async move {
            v1.get("users", |_req, _reply| async { Ok(json!("v1 users")) })?;
            Ok(())
        },
        PluginOptions::new().prefix("/v1"),
    )
    .unwrap();

    app.ready().await.unwrap();
    let root = app.inject(InjectRequest::get("/users")).await.unwrap();
    assert_eq!(root.text(), "root users");
    let v1 = app.inject(InjectRequest::get("/v1/users")).await.unwrap();
    assert_eq!(v1.text(), "v1 users");
}

#[tokio::test]
async fn test_close_during_loading_stays_closed() {
    let app = Instance::new();
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let (plugin_started, plugin_release) = (Arc::clone(&started), Arc::clone(&release));
    app.register(
        move |_p: Instance, _opts: PluginOptions| async move {
            plugin_started.notify_one();
            plugin_release.notified().await;
            Ok(())
        },
        PluginOptions::new().name("slow"),
    )
    .unwrap();

    let (loaded, closed) = tokio::join!(app.ready(), async {
        started.notified().await;
        let closed = app.close().await;
        release.notify_one();
        closed
    });

    closed.unwrap();
    assert!(matches!(loaded, Err(FrameworkError::Closed)));
    assert_eq!(app.state(), LifecycleState::Closed);
    assert!(matches!(app.ready().await, Err(FrameworkError::Closed)));
}

#[tokio::test]
async fn test_case_insensitive_route_keeps_param_casing() {
    let app = Instance::with_config(FrameworkConfig {
        router: RouterConfig {
            case_sensitive: false,
            ..RouterConfig::default()
        },
        ..FrameworkConfig::default()
    });
    app.get("/Files/:name", |req, _reply| async move { Ok(json!(req.param("name"))) })
        .unwrap();

    let res = app.inject(InjectRequest::get("/FILES/ReadMe.MD")).await.unwrap();
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.text(), "ReadMe.MD");
}
