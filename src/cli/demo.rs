//! Demo application served by the binary.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use http::{Method, StatusCode};
use parking_lot::RwLock;
use serde_json::{json, Value};

use crate::config::FrameworkConfig;
use crate::context::PluginOptions;
use crate::decorator::DecoratorValue;
use crate::error::{FrameworkError, Result};
use crate::hooks::Hook;
use crate::instance::Instance;
use crate::route::RouteOptions;
use crate::schema::RouteSchema;

/// In-memory user store shared through an instance decorator.
#[derive(Debug, Default)]
pub struct UserStore {
    next_id: AtomicU64,
    users: RwLock<BTreeMap<u64, Value>>,
}

impl UserStore {
    pub fn insert(&self, mut user: Value) -> Value {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(obj) = user.as_object_mut() {
            obj.insert("id".to_string(), json!(id));
        }
        self.users.write().insert(id, user.clone());
        user
    }

    pub fn get(&self, id: u64) -> Option<Value> {
        self.users.read().get(&id).cloned()
    }

    pub fn list(&self) -> Vec<Value> {
        self.users.read().values().cloned().collect()
    }
}

/// Build the demo instance: a health route, a static catch-all and a `/users`
/// plugin with its own store, schemas and `x-response-time` header.
///
/// # Errors
///
/// Registration errors (none are expected for the fixed demo routes).
pub fn build_demo_app(config: FrameworkConfig) -> Result<Instance> {
    let app = Instance::with_config(config);

    app.decorate("version", json!(env!("CARGO_PKG_VERSION")))?
        .add_schema(json!({
            "$id": "user",
            "type": "object",
            "properties": {
                "name": {"type": "string", "minLength": 1},
                "email": {"type": "string"}
            },
            "required": ["name"]
        }))?
        .get("/health", |req, _reply| async move {
            let version = req.instance_decoration("version").and_then(|v| v.as_json().cloned());
            Ok(json!({"status": "ok", "version": version}))
        })?
        .get("/static/*", |req, _reply| async move {
            Ok(json!({"file": req.param("*")}))
        })?;

    app.register(users_plugin, PluginOptions::new().name("users").prefix("/users"))?;
    Ok(app)
}

async fn users_plugin(users: Instance, _opts: PluginOptions) -> Result<()> {
    users.decorate("users", DecoratorValue::shared(UserStore::default()))?;
    users.add_hook(Hook::on_send(|_req, reply, payload| async move {
        reply.header("x-served-by", "users")?;
        Ok(payload)
    }))?;

    users.get("/", |req, _reply| async move {
        Ok(Value::Array(store(&req)?.list()))
    })?;

    let params = RouteSchema {
        params: Some(json!({
            "type": "object",
            "properties": {"id": {"type": "integer", "minimum": 1}}
        })),
        ..RouteSchema::default()
    };
    users.route(
        RouteOptions::new(Method::GET, "/:id", |req, _reply| async move {
            let id = req.params()["id"].as_u64().unwrap_or_default();
            store(&req)?.get(id).ok_or_else(|| FrameworkError::Http {
                status: StatusCode::NOT_FOUND.as_u16(),
                message: format!("user {id} not found"),
            })
        })
        .schema(params),
    )?;

    let create = RouteSchema {
        body: Some(json!({"$ref": "user#"})),
        ..RouteSchema::default()
    };
    users.route(
        RouteOptions::new(Method::POST, "/", |req, reply| async move {
            let user = store(&req)?.insert(req.body());
            reply.code(StatusCode::CREATED);
            Ok(user)
        })
        .schema(create),
    )?;
    Ok(())
}

fn store(req: &crate::request::Request) -> Result<std::sync::Arc<UserStore>> {
    req.instance_decoration("users")
        .and_then(|v| v.downcast::<UserStore>())
        .ok_or_else(|| FrameworkError::Internal("users store missing".to_string()))
}
