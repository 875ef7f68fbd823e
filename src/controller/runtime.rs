//! Controller runtime
//!
//! Wires the application reconciler into the Kubernetes watch machinery:
//! level-triggered reconciliation of DataApplications, re-triggering on
//! plotter status changes through the owner labels, finalizer-based
//! teardown, and status writes guarded by a semantic diff.

use futures::StreamExt;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::finalizer::{finalizer, Error as FinalizerError, Event};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::{Client, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::crd::{
    DataApplication, Plotter, APPLICATION_NAMESPACE_LABEL, APPLICATION_NAME_LABEL,
};
use crate::error::{Error, ErrorAction, Result};

use super::reconciler::{ApplicationReconciler, ReconcileOutcome};

/// Shared context of the control loop
pub struct Context {
    pub client: Client,
    pub reconciler: ApplicationReconciler,
}

/// Run the controller until the watch streams end
pub async fn run(client: Client, reconciler: ApplicationReconciler) -> Result<()> {
    let apps: Api<DataApplication> = Api::all(client.clone());
    let plotters: Api<Plotter> = Api::namespaced(
        client.clone(),
        &reconciler.config.control_plane_namespace,
    );
    let context = Arc::new(Context { client, reconciler });

    info!("starting the DataApplication controller");
    Controller::new(apps, watcher::Config::default())
        .watches(plotters, watcher::Config::default(), plotter_to_application)
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => info!(object = %object.name, "reconciled"),
                Err(err) => error!(error = %err, "reconciliation failed"),
            }
        })
        .await;
    Ok(())
}

/// Map a plotter event back to its owning application via the owner labels
fn plotter_to_application(plotter: Plotter) -> Option<ObjectRef<DataApplication>> {
    let labels = plotter.metadata.labels.as_ref()?;
    let name = labels.get(APPLICATION_NAME_LABEL)?;
    let namespace = labels.get(APPLICATION_NAMESPACE_LABEL)?;
    Some(ObjectRef::new(name).within(namespace))
}

/// Top-level reconcile entry invoked by the controller
async fn reconcile(app: Arc<DataApplication>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = app.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<DataApplication> = Api::namespaced(ctx.client.clone(), &namespace);
    let finalizer_name = ctx.reconciler.config.finalizer_name();

    finalizer(&api, &finalizer_name, app, |event| async {
        match event {
            Event::Apply(app) => apply(app, &ctx).await,
            Event::Cleanup(app) => cleanup(app, &ctx).await,
        }
    })
    .await
    .map_err(|err| match err {
        FinalizerError::ApplyFailed(inner) | FinalizerError::CleanupFailed(inner) => inner,
        FinalizerError::AddFinalizer(inner) | FinalizerError::RemoveFinalizer(inner) => {
            Error::Kube(inner)
        }
        other => Error::Internal(other.to_string()),
    })
}

/// Reconcile a live application and persist the status when it changed
async fn apply(app: Arc<DataApplication>, ctx: &Context) -> Result<Action> {
    let mut working = (*app).clone();
    let outcome = ctx.reconciler.reconcile(&mut working).await;

    // The status carries the user-visible conditions even when the
    // reconciliation failed; write it before propagating the error.
    update_status(&app, &working, ctx).await?;

    match outcome {
        Ok(ReconcileOutcome::Done) => Ok(Action::await_change()),
        Ok(ReconcileOutcome::RequeueAfter(delay)) => Ok(Action::requeue(delay)),
        Err(err) => Err(err),
    }
}

/// Tear down external resources before the object goes away.
/// No status is written during deletion.
async fn cleanup(app: Arc<DataApplication>, ctx: &Context) -> Result<Action> {
    let mut working = (*app).clone();
    info!(application = %working.name(), "application is being deleted");
    ctx.reconciler
        .delete_external_resources(&mut working)
        .await?;
    Ok(Action::await_change())
}

/// Patch the status subresource if it differs from the observed one
async fn update_status(
    observed: &DataApplication,
    desired: &DataApplication,
    ctx: &Context,
) -> Result<()> {
    let before = serde_json::to_value(&observed.status)?;
    let after = serde_json::to_value(&desired.status)?;
    if before == after {
        return Ok(());
    }
    let namespace = desired.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<DataApplication> = Api::namespaced(ctx.client.clone(), &namespace);
    let patch = serde_json::json!({ "status": desired.status });
    api.patch_status(
        desired.name(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

/// Requeue policy applied when reconciliation returns an error
fn error_policy(app: Arc<DataApplication>, err: &Error, _ctx: Arc<Context>) -> Action {
    match err.action() {
        ErrorAction::RequeueWithBackoff => {
            warn!(application = %app.name(), error = %err, "requeueing with backoff");
            Action::requeue(Duration::from_secs(10))
        }
        ErrorAction::RequeueAfter(delay) => Action::requeue(delay),
        ErrorAction::NoRequeue => {
            warn!(application = %app.name(), error = %err, "not requeueing, waiting for changes");
            Action::await_change()
        }
    }
}
