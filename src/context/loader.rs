//! Breadth-first plugin loading and route registration.
//!
//! `load` drives the tree from `Registering` to `Ready`:
//!
//! 1. Run pending plugins in breadth-first order. A plugin only runs after its
//!    parent's work has settled; plugins registered while loading (at any depth)
//!    are picked up on the next scan.
//! 2. Freeze the arena and build one [`ContextView`] per context.
//! 3. Register every declared route, context by context in breadth-first order:
//!    `onRoute` hooks, schema compilation, router insertion.
//!
//! The first error aborts the traversal and leaves the tree `Failed`. A tree
//! closed mid-load stays `Closed` and `load` reports `Closed`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use super::{ContextId, ContextView, LifecycleState, PluginFn, PluginOptions, ROOT};
use crate::error::{FrameworkError, Result};
use crate::hooks::executor::{guarded, run_on_route};
use crate::instance::{Instance, Shared};
use crate::lifecycle::App;
use crate::route::{join_prefix, RouteOptions, RouteRecord};
use crate::router::Router;
use crate::schema::CompiledSchemas;

/// Load every plugin, freeze the tree and build the application.
pub(crate) async fn load(shared: Arc<Shared>) -> Result<Arc<App>> {
    {
        let mut registry = shared.registry.lock();
        match registry.state {
            LifecycleState::Closed => return Err(FrameworkError::Closed),
            LifecycleState::Registering => registry.state = LifecycleState::Loading,
            _ => return Err(FrameworkError::NotReady),
        }
    }

    match build(&shared).await {
        Ok(app) => {
            {
                let mut registry = shared.registry.lock();
                // close() may have run while plugins were loading.
                if registry.state == LifecycleState::Closed {
                    return Err(FrameworkError::Closed);
                }
                registry.state = LifecycleState::Ready;
            }
            // L3: instance ready
            info!(routes_count = app.router().len(), "Instance ready");
            Ok(Arc::new(app))
        }
        Err(err) => {
            let mut registry = shared.registry.lock();
            if registry.state != LifecycleState::Closed {
                registry.state = LifecycleState::Failed;
            }
            error!(error = %err, "Instance failed to start");
            Err(err)
        }
    }
}

async fn build(shared: &Arc<Shared>) -> Result<App> {
    while let Some((id, plugin, options)) = next_plugin(shared) {
        run_plugin(shared, id, plugin, options).await?;
    }

    let (views, pending) = freeze(shared)?;

    let mut router = Router::new(shared.config.router.clone());
    for (id, routes) in pending {
        let view = &views[id];
        for options in routes {
            register_route(&mut router, view, options)?;
        }
    }

    Ok(App::new(
        router,
        Arc::clone(&views[ROOT]),
        &views,
        shared.config.clone(),
    ))
}

/// Shallowest pending plugin, taken out of its node.
fn next_plugin(shared: &Shared) -> Option<(ContextId, PluginFn, PluginOptions)> {
    let mut registry = shared.registry.lock();
    let id = registry
        .bfs_order()
        .into_iter()
        .find(|&id| registry.node(id).plugin.is_some())?;
    let (plugin, options) = registry.node_mut(id).plugin.take()?;
    Some((id, plugin, options))
}

async fn run_plugin(
    shared: &Arc<Shared>,
    id: ContextId,
    plugin: PluginFn,
    options: PluginOptions,
) -> Result<()> {
    let name = shared.registry.lock().node(id).name.clone();
    let timeout_ms = shared.config.plugin_timeout_ms;
    // L4: plugin loading
    debug!(plugin = %name, context = id, "Loading plugin");

    let work = guarded("plugin", plugin(Instance::from_parts(Arc::clone(shared), id), options));
    let outcome = if timeout_ms == 0 {
        work.await
    } else {
        match tokio::time::timeout(Duration::from_millis(timeout_ms), work).await {
            Ok(outcome) => outcome,
            Err(_) => {
                return Err(FrameworkError::PluginTimeout {
                    plugin: name,
                    timeout_ms,
                })
            }
        }
    };

    outcome.map_err(|err| {
        if err.is_registration_error() {
            err
        } else {
            FrameworkError::PluginFailed {
                plugin: name.clone(),
                message: err.to_string(),
            }
        }
    })?;
    info!(plugin = %name, context = id, "Plugin loaded");
    Ok(())
}

type Frozen = (Vec<Arc<ContextView>>, Vec<(ContextId, Vec<RouteOptions>)>);

/// Stop registration, snapshot every context and take the pending routes.
fn freeze(shared: &Shared) -> Result<Frozen> {
    let mut registry = shared.registry.lock();
    if registry.state == LifecycleState::Closed {
        return Err(FrameworkError::Closed);
    }
    registry.state = LifecycleState::Ready;

    let views: Vec<Arc<ContextView>> = (0..registry.nodes.len())
        .map(|id| Arc::new(ContextView::build(&registry, id)))
        .collect();
    let pending = registry
        .bfs_order()
        .into_iter()
        .map(|id| (id, std::mem::take(&mut registry.node_mut(id).routes)))
        .collect();
    Ok((views, pending))
}

fn register_route(
    router: &mut Router<RouteRecord>,
    view: &Arc<ContextView>,
    mut options: RouteOptions,
) -> Result<()> {
    options.prefix.clone_from(&view.prefix);
    run_on_route(&view.hooks.on_route, &mut options)?;

    let url = join_prefix(&options.prefix, &options.url);
    let mut hooks = view.hooks.clone();
    hooks.extend_from(&options.hooks);

    for method in &options.methods {
        let schemas = CompiledSchemas::compile(
            view.compiler.as_ref(),
            &options.schema,
            method,
            &url,
            &view.shared_schemas,
        )?;
        let record = RouteRecord {
            method: method.clone(),
            url: url.clone(),
            handler: Arc::clone(&options.handler),
            schemas,
            hooks: hooks.clone(),
            parsers: view.parsers.with_overrides(&options.parsers),
            config: options.config.clone(),
            context: Arc::clone(view),
        };
        router.register(method.clone(), &url, Arc::new(record))?;
    }
    Ok(())
}
