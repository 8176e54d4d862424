mod common;

use std::sync::Arc;
use std::time::Duration;

use brrtframe::{
    DecoratorTarget, DecoratorValue, FrameworkConfig, FrameworkError, Hook, InjectRequest,
    Instance, LifecycleState, PluginOptions,
};
use common::Recorder;
use http::StatusCode;
use serde_json::{json, Value};

#[tokio::test]
async fn test_decorators_flow_down_not_up_or_sideways() {
    let app = Instance::new();
    app.decorate("root_only", json!(1)).unwrap();

    app.register(
        |a: Instance, _opts: PluginOptions| async move {
            assert!(a.has_decorator("root_only"));
            a.decorate("db", json!("postgres"))?;
            a.register(
                |a1: Instance, _opts: PluginOptions| async move {
                    assert!(a1.has_decorator("db"));
                    assert_eq!(a1.decoration_json("db"), Some(json!("postgres")));
                    Ok(())
                },
                PluginOptions::new(),
            )?;
            Ok(())
        },
        PluginOptions::new().name("a"),
    )
    .unwrap();
    app.register(
        |b: Instance, _opts: PluginOptions| async move {
            assert!(!b.has_decorator("db"));
            // Siblings may reuse a name the other sibling declared.
            b.decorate("db", json!("mysql"))?;
            Ok(())
        },
        PluginOptions::new().name("b"),
    )
    .unwrap();

    app.ready().await.unwrap();
    assert!(!app.has_decorator("db"));
    assert!(app.has_decorator("root_only"));
}

#[tokio::test]
async fn test_parent_decorations_added_before_ready_are_inherited() {
    let rec = Recorder::new();
    let app = Instance::new();
    let child_rec = rec.clone();
    app.register(
        move |child: Instance, _opts: PluginOptions| async move {
            // Declared by the parent after this plugin was registered.
            if child.has_decorator("late") {
                child_rec.push("saw late decorator");
            }
            child.get("/late", |req, _reply| async move {
                Ok(req
                    .instance_decoration("late")
                    .and_then(|v| v.as_json().cloned())
                    .unwrap_or(Value::Null))
            })?;
            Ok(())
        },
        PluginOptions::new(),
    )
    .unwrap();
    app.decorate("late", json!("visible")).unwrap();
    app.add_hook(Hook::on_send(|_req, reply, body| async move {
        reply.header("x-root-hook", "1")?;
        Ok(body)
    }))
    .unwrap();

    let res = app.inject(InjectRequest::get("/late")).await.unwrap();
    assert_eq!(res.json().unwrap(), json!("visible"));
    assert_eq!(res.header("x-root-hook"), Some("1"));
    assert_eq!(rec.entries(), vec!["saw late decorator"]);
}

#[tokio::test]
async fn test_redeclaring_an_inherited_decorator_fails_ready() {
    let app = Instance::new();
    app.decorate("db", json!("pg")).unwrap();
    app.register(
        |child: Instance, _opts: PluginOptions| async move {
            child.decorate("db", json!("other"))?;
            Ok(())
        },
        PluginOptions::new(),
    )
    .unwrap();

    let err = app.ready().await.unwrap_err();
    assert!(matches!(
        err,
        FrameworkError::DuplicateDecorator {
            target: DecoratorTarget::Instance,
            ..
        }
    ));
    assert_eq!(app.state(), LifecycleState::Failed);

    // The outcome is cached.
    assert!(matches!(
        app.ready().await,
        Err(FrameworkError::DuplicateDecorator { .. })
    ));
}

#[test]
fn test_decorator_dependencies() {
    let app = Instance::new();
    let err = app
        .decorate_with(DecoratorTarget::Instance, "cache", json!({}), &["redis"])
        .unwrap_err();
    assert!(matches!(
        err,
        FrameworkError::MissingDecoratorDependency { ref dependency, .. } if dependency == "redis"
    ));

    app.decorate("redis", json!("redis://localhost")).unwrap();
    app.decorate_with(DecoratorTarget::Instance, "cache", json!({}), &["redis"])
        .unwrap();
    assert!(app.has_decorator("cache"));
}

#[tokio::test]
async fn test_shared_service_decorator_downcasts() {
    struct Counter(std::sync::atomic::AtomicUsize);

    let app = Instance::new();
    app.decorate(
        "counter",
        DecoratorValue::shared(Counter(std::sync::atomic::AtomicUsize::new(0))),
    )
    .unwrap();
    app.get("/hit", |req, _reply| async move {
        let counter = req
            .instance_decoration("counter")
            .and_then(|v| v.downcast::<Counter>())
            .ok_or_else(|| FrameworkError::Internal("no counter".into()))?;
        let n = counter.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        Ok(json!(n))
    })
    .unwrap();

    app.inject(InjectRequest::get("/hit")).await.unwrap();
    let res = app.inject(InjectRequest::get("/hit")).await.unwrap();
    assert_eq!(res.json().unwrap(), json!(2));
    let counter: Arc<Counter> = app.decoration_as("counter").unwrap();
    assert_eq!(counter.0.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_request_and_reply_decorations_are_per_request() {
    let app = Instance::new();
    app.decorate_request("user", Value::Null).unwrap();
    app.decorate_reply("served_by", json!("default")).unwrap();
    app.add_hook(Hook::on_request(|req, reply| async move {
        if let Some(name) = req.header("x-user") {
            req.set_decoration("user", json!(name))?;
            reply.set_decoration("served_by", json!("auth"))?;
        }
        Ok(())
    }))
    .unwrap();
    app.get("/me", |req, reply| async move {
        Ok(json!({
            "user": req.decoration_json("user"),
            "served_by": reply.decoration_json("served_by"),
        }))
    })
    .unwrap();

    let named = app
        .inject(InjectRequest::get("/me").header("x-user", "ada"))
        .await
        .unwrap();
    assert_eq!(
        named.json().unwrap(),
        json!({"user": "ada", "served_by": "auth"})
    );
    let anonymous = app.inject(InjectRequest::get("/me")).await.unwrap();
    assert_eq!(
        anonymous.json().unwrap(),
        json!({"user": null, "served_by": "default"})
    );
}

#[tokio::test]
async fn test_undeclared_request_decoration_is_rejected() {
    let app = Instance::new();
    app.get("/", |req, _reply| async move {
        req.set_decoration("nope", json!(1))?;
        Ok(Value::Null)
    })
    .unwrap();
    let res = app.inject(InjectRequest::get("/")).await.unwrap();
    assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_prefixes_accumulate() {
    let app = Instance::new();
    app.register(
        |api: Instance, _opts: PluginOptions| async move {
            assert_eq!(api.prefix(), "/api");
            api.register(
                |v1: Instance, _opts: PluginOptions| async move {
                    assert_eq!(v1.prefix(), "/api/v1");
                    v1.get("/", |_req, _reply| async { Ok(json!("v1 index")) })?;
                    v1.get("/items/:id", |req, _reply| async move {
                        Ok(json!({"id": req.param("id"), "route": req.route_url()}))
                    })?;
                    Ok(())
                },
                PluginOptions::new().prefix("v1"),
            )?;
            Ok(())
        },
        PluginOptions::new().prefix("/api/"),
    )
    .unwrap();

    let index = app.inject(InjectRequest::get("/api/v1")).await.unwrap();
    assert_eq!(index.text(), "v1 index");
    let item = app.inject(InjectRequest::get("/api/v1/items/9")).await.unwrap();
    assert_eq!(
        item.json().unwrap(),
        json!({"id": "9", "route": "/api/v1/items/:id"})
    );
}

#[tokio::test]
async fn test_error_handler_is_scoped_to_subtree() {
    let app = Instance::new();
    app.get("/root-fail", |_req, _reply| async {
        Err::<Value, _>(FrameworkError::Internal("root broke".into()))
    })
    .unwrap();
    app.register(
        |child: Instance, _opts: PluginOptions| async move {
            child.set_error_handler(|err, _req, reply| async move {
                reply.code(StatusCode::SERVICE_UNAVAILABLE);
                Ok(json!({"custom": err.to_string()}))
            })?;
            child.get("/fail", |_req, _reply| async {
                Err::<Value, _>(FrameworkError::Internal("child broke".into()))
            })?;
            Ok(())
        },
        PluginOptions::new().prefix("/child"),
    )
    .unwrap();

    let child = app.inject(InjectRequest::get("/child/fail")).await.unwrap();
    assert_eq!(child.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(child.json().unwrap(), json!({"custom": "child broke"}));

    let root = app.inject(InjectRequest::get("/root-fail")).await.unwrap();
    assert_eq!(root.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(root.json().unwrap()["message"], "root broke");
}

#[tokio::test]
async fn test_not_found_handler_by_longest_prefix() {
    let rec = Recorder::new();
    let app = Instance::new();
    app.add_hook(rec.on_error("onError")).unwrap();
    app.register(
        |api: Instance, _opts: PluginOptions| async move {
            api.set_not_found_handler(|req, _reply| async move {
                Ok(json!({"api_missing": req.path()}))
            })?;
            Ok(())
        },
        PluginOptions::new().prefix("/api"),
    )
    .unwrap();

    let scoped = app.inject(InjectRequest::get("/api/nope")).await.unwrap();
    assert_eq!(scoped.status, StatusCode::NOT_FOUND);
    assert_eq!(scoped.json().unwrap(), json!({"api_missing": "/api/nope"}));

    let fallback = app.inject(InjectRequest::get("/apix")).await.unwrap();
    assert_eq!(fallback.status, StatusCode::NOT_FOUND);
    assert_eq!(
        fallback.json().unwrap(),
        json!({
            "statusCode": 404,
            "error": "Not Found",
            "message": "Route GET:/apix not found"
        })
    );
    assert_eq!(rec.count("onError"), 0);
}

#[tokio::test]
async fn test_plugin_failure_is_wrapped_and_cached() {
    let app = Instance::new();
    app.register(
        |_broken: Instance, _opts: PluginOptions| async move {
            Err(FrameworkError::Internal("db unreachable".into()))
        },
        PluginOptions::new().name("database"),
    )
    .unwrap();

    let err = app.ready().await.unwrap_err();
    match err {
        FrameworkError::PluginFailed { plugin, message } => {
            assert_eq!(plugin, "database");
            assert_eq!(message, "db unreachable");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(matches!(
        app.inject(InjectRequest::get("/")).await,
        Err(FrameworkError::PluginFailed { .. })
    ));
}

#[tokio::test]
async fn test_plugin_timeout() {
    let config = FrameworkConfig {
        plugin_timeout_ms: 20,
        ..FrameworkConfig::default()
    };
    let app = Instance::with_config(config);
    app.register(
        |_slow: Instance, _opts: PluginOptions| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        },
        PluginOptions::new().name("slow"),
    )
    .unwrap();

    let err = app.ready().await.unwrap_err();
    assert!(matches!(
        err,
        FrameworkError::PluginTimeout { ref plugin, timeout_ms: 20 } if plugin == "slow"
    ));
}

#[tokio::test]
async fn test_plugins_load_breadth_first() {
    let rec = Recorder::new();
    let app = Instance::new();

    let a_rec = rec.clone();
    app.register(
        move |a: Instance, _opts: PluginOptions| async move {
            a_rec.push("a");
            let a1_rec = a_rec.clone();
            a.register(
                move |_a1: Instance, _opts: PluginOptions| async move {
                    a1_rec.push("a1");
                    Ok(())
                },
                PluginOptions::new(),
            )?;
            Ok(())
        },
        PluginOptions::new(),
    )
    .unwrap();
    let b_rec = rec.clone();
    app.register(
        move |_b: Instance, _opts: PluginOptions| async move {
            b_rec.push("b");
            Ok(())
        },
        PluginOptions::new(),
    )
    .unwrap();

    app.ready().await.unwrap();
    assert_eq!(rec.entries(), vec!["a", "b", "a1"]);
}
