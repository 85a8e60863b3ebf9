// ── Device service families ──
//
// Each family defines the controller trait a host implements, the
// service wrapping it, the command routings it answers, and a periodic
// reporting task.

pub mod mediaplayer;
pub mod numericsensor;
pub mod outbinswitch;
pub mod outlvlswitch;
pub mod thermostat;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::adapter::Adapter;
use crate::error::CoreError;
use crate::service::Service;
use crate::task::Task;

/// Task that polls every enabled service of type `S` whose name starts
/// with `family`. Held back until the adapter is initialized.
pub(crate) fn polling_task<S, F, Fut>(
    adapter: &Arc<Adapter>,
    family: &str,
    interval: Duration,
    poll: F,
) -> Task
where
    S: Service,
    F: Fn(Arc<S>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), CoreError>> + Send + 'static,
{
    let voters = [adapter.initialized_voter(), adapter.services_voter(family)];
    let prefix = family.to_owned();
    let adapter = Arc::clone(adapter);
    let poll = Arc::new(poll);
    Task::new(
        move || {
            let adapter = Arc::clone(&adapter);
            let poll = Arc::clone(&poll);
            let prefix = prefix.clone();
            async move {
                for service in adapter.services("") {
                    if !service.specification().enabled || !service.name().starts_with(&prefix) {
                        continue;
                    }
                    let Ok(service) = service.as_any().downcast::<S>() else {
                        continue;
                    };
                    let name = service.name().to_owned();
                    if let Err(e) = poll(service).await {
                        warn!(service = %name, error = %e, "periodic report failed");
                    }
                }
            }
        },
        interval,
    )
    .named(&format!("{}_report", family.trim_end_matches('_')))
    .with_voters(voters)
}
