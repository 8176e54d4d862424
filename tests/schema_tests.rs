use std::collections::BTreeMap;
use std::sync::Arc;

use brrtframe::{
    FrameworkError, InjectRequest, Instance, PluginOptions, RouteOptions, RouteSchema,
    SchemaDefinition, ValidationIssue, Validator,
};
use http::{Method, StatusCode};
use serde_json::{json, Value};

fn user_schema() -> RouteSchema {
    RouteSchema {
        body: Some(json!({
            "type": "object",
            "properties": {"name": {"type": "string"}, "age": {"type": "integer", "minimum": 0}},
            "required": ["name"]
        })),
        ..RouteSchema::default()
    }
}

#[tokio::test]
async fn test_invalid_body_is_400_and_handler_not_called() {
    let app = Instance::new();
    app.route(
        RouteOptions::new(Method::POST, "/users", |req, _reply| async move {
            Ok(json!({"created": req.body()["name"]}))
        })
        .schema(user_schema()),
    )
    .unwrap();

    let bad = app
        .inject(InjectRequest::post("/users").json(&json!({"age": -1})))
        .await
        .unwrap();
    assert_eq!(bad.status, StatusCode::BAD_REQUEST);
    let body = bad.json().unwrap();
    assert_eq!(body["statusCode"], 400);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("body validation failed"));

    let good = app
        .inject(InjectRequest::post("/users").json(&json!({"name": "ada", "age": 36})))
        .await
        .unwrap();
    assert_eq!(good.status, StatusCode::OK);
    assert_eq!(good.json().unwrap(), json!({"created": "ada"}));
}

#[tokio::test]
async fn test_params_and_querystring_are_coerced() {
    let app = Instance::new();
    let schema = RouteSchema {
        params: Some(json!({
            "type": "object",
            "properties": {"id": {"type": "integer"}}
        })),
        querystring: Some(json!({
            "type": "object",
            "properties": {
                "verbose": {"type": "boolean"},
                "tags": {"type": "array", "items": {"type": "string"}},
                "limit": {"type": "integer", "maximum": 50}
            }
        })),
        ..RouteSchema::default()
    };
    app.route(
        RouteOptions::new(Method::GET, "/items/:id", |req, _reply| async move {
            Ok(json!({"params": req.params(), "query": req.query()}))
        })
        .schema(schema),
    )
    .unwrap();

    let res = app
        .inject(InjectRequest::get("/items/42?verbose=true&tags=a&tags=b&limit=10"))
        .await
        .unwrap();
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(
        res.json().unwrap(),
        json!({
            "params": {"id": 42},
            "query": {"verbose": true, "tags": ["a", "b"], "limit": 10}
        })
    );

    let not_a_number = app.inject(InjectRequest::get("/items/abc")).await.unwrap();
    assert_eq!(not_a_number.status, StatusCode::BAD_REQUEST);

    let too_big = app
        .inject(InjectRequest::get("/items/1?limit=500"))
        .await
        .unwrap();
    assert_eq!(too_big.status, StatusCode::BAD_REQUEST);
    assert!(too_big.json().unwrap()["message"]
        .as_str()
        .unwrap()
        .starts_with("querystring validation failed"));
}

#[tokio::test]
async fn test_params_stay_strings_without_schema() {
    let app = Instance::new();
    app.get("/items/:id", |req, _reply| async move { Ok(req.params()) })
        .unwrap();
    let res = app.inject(InjectRequest::get("/items/42")).await.unwrap();
    assert_eq!(res.json().unwrap(), json!({"id": "42"}));
}

#[tokio::test]
async fn test_required_header() {
    let app = Instance::new();
    let schema = RouteSchema {
        headers: Some(json!({
            "type": "object",
            "properties": {"x-api-version": {"type": "integer"}},
            "required": ["x-api-version"]
        })),
        ..RouteSchema::default()
    };
    app.route(
        RouteOptions::new(Method::GET, "/v", |_req, _reply| async { Ok(json!("ok")) })
            .schema(schema),
    )
    .unwrap();

    let missing = app.inject(InjectRequest::get("/v")).await.unwrap();
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);
    let present = app
        .inject(InjectRequest::get("/v").header("X-Api-Version", "2"))
        .await
        .unwrap();
    assert_eq!(present.status, StatusCode::OK);
}

#[tokio::test]
async fn test_response_schema_mismatch_is_500() {
    let app = Instance::new();
    let mut response = BTreeMap::new();
    response.insert(
        "2xx".to_string(),
        json!({"type": "object", "required": ["id"]}),
    );
    let schema = RouteSchema {
        response,
        ..RouteSchema::default()
    };
    app.route(
        RouteOptions::new(Method::GET, "/thing/:ok", |req, _reply| async move {
            if req.param("ok") == Some("yes") {
                Ok(json!({"id": 1}))
            } else {
                Ok(json!({"name": "no id"}))
            }
        })
        .schema(schema),
    )
    .unwrap();

    let ok = app.inject(InjectRequest::get("/thing/yes")).await.unwrap();
    assert_eq!(ok.status, StatusCode::OK);
    let broken = app.inject(InjectRequest::get("/thing/no")).await.unwrap();
    assert_eq!(broken.status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_shared_schema_ref_resolves_in_subtree() {
    let app = Instance::new();
    app.add_schema(json!({
        "$id": "point",
        "type": "object",
        "properties": {"x": {"type": "number"}, "y": {"type": "number"}},
        "required": ["x", "y"]
    }))
    .unwrap();
    app.register(
        |geo: Instance, _opts: PluginOptions| async move {
            assert!(geo.get_schemas().contains_key("point"));
            geo.route(
                RouteOptions::new(Method::POST, "/points", |req, _reply| async move {
                    Ok(req.body())
                })
                .schema(RouteSchema {
                    body: Some(json!({"$ref": "point#"})),
                    ..RouteSchema::default()
                }),
            )?;
            Ok(())
        },
        PluginOptions::new().prefix("/geo"),
    )
    .unwrap();

    let ok = app
        .inject(InjectRequest::post("/geo/points").json(&json!({"x": 1, "y": 2.5})))
        .await
        .unwrap();
    assert_eq!(ok.status, StatusCode::OK);
    let bad = app
        .inject(InjectRequest::post("/geo/points").json(&json!({"x": 1})))
        .await
        .unwrap();
    assert_eq!(bad.status, StatusCode::BAD_REQUEST);
}

#[test]
fn test_shared_schema_registration_errors() {
    let app = Instance::new();
    assert!(matches!(
        app.add_schema(json!({"type": "string"})),
        Err(FrameworkError::MissingSchemaId)
    ));
    app.add_schema(json!({"$id": "s", "type": "string"})).unwrap();
    assert!(matches!(
        app.add_schema(json!({"$id": "s", "type": "number"})),
        Err(FrameworkError::DuplicateSchema(ref id)) if id == "s"
    ));
}

#[tokio::test]
async fn test_invalid_schema_fails_ready() {
    let app = Instance::new();
    app.route(
        RouteOptions::new(Method::POST, "/x", |_req, _reply| async { Ok(Value::Null) }).schema(
            RouteSchema {
                body: Some(json!({"type": 12})),
                ..RouteSchema::default()
            },
        ),
    )
    .unwrap();
    let err = app.ready().await.unwrap_err();
    assert!(matches!(
        err,
        FrameworkError::SchemaCompilation { ref part, .. } if part == "body"
    ));
}

#[tokio::test]
async fn test_custom_schema_compiler() {
    struct NonEmptyObject;

    impl Validator for NonEmptyObject {
        fn validate(&self, value: &Value) -> Result<(), Vec<ValidationIssue>> {
            match value.as_object() {
                Some(obj) if !obj.is_empty() => Ok(()),
                _ => Err(vec![ValidationIssue::new("", "custom", "empty object")]),
            }
        }
    }

    fn compile(definition: &SchemaDefinition<'_>) -> anyhow::Result<Arc<dyn Validator>> {
        assert_eq!(definition.url, "/c");
        Ok(Arc::new(NonEmptyObject))
    }

    let app = Instance::new();
    app.set_schema_compiler(compile).unwrap();
    app.route(
        RouteOptions::new(Method::POST, "/c", |_req, _reply| async { Ok(json!("ok")) }).schema(
            RouteSchema {
                body: Some(json!({"anything": "goes"})),
                ..RouteSchema::default()
            },
        ),
    )
    .unwrap();

    let empty = app
        .inject(InjectRequest::post("/c").json(&json!({})))
        .await
        .unwrap();
    assert_eq!(empty.status, StatusCode::BAD_REQUEST);
    let full = app
        .inject(InjectRequest::post("/c").json(&json!({"a": 1})))
        .await
        .unwrap();
    assert_eq!(full.status, StatusCode::OK);
}
