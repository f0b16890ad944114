//! Driver spawns and runs the relay actor task

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::relay::coordinator::{LinkInput, RelayCore};
use crate::relay::{RelayCommand, RelayState};
use crate::types::{EncounterId, Role};
use crate::{RelayError, Result, RoleResolver, TokenProvider};

/// Result of spawning the actor
pub struct DriverChannels {
    /// Command sender, fire-and-forget
    pub commands: mpsc::UnboundedSender<RelayCommand>,
    /// Receiver for state snapshots
    pub state: watch::Receiver<Arc<RelayState>>,
    /// Cancellation token for graceful shutdown
    pub cancel: CancellationToken,
}

/// Owns the [`RelayCore`] on a single task.
///
/// Commands, session events and produced samples are all applied on that
/// task, one at a time, so state is never mutated concurrently. Role and
/// token lookups run beside it and report back, so a slow collaborator never
/// holds up `stop` or a newer `start`.
pub(crate) struct Driver;

impl Driver {
    pub(crate) fn spawn(
        core: RelayCore,
        state: watch::Receiver<Arc<RelayState>>,
        tokens: Arc<dyn TokenProvider>,
        roles: Arc<dyn RoleResolver>,
        cancel: CancellationToken,
    ) -> DriverChannels {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let cancel_actor = cancel.clone();

        tokio::spawn(async move {
            Self::actor_task(core, commands_rx, tokens, roles, cancel_actor).await;
        });

        DriverChannels { commands: commands_tx, state, cancel }
    }

    async fn actor_task(
        mut core: RelayCore,
        mut commands: mpsc::UnboundedReceiver<RelayCommand>,
        tokens: Arc<dyn TokenProvider>,
        roles: Arc<dyn RoleResolver>,
        cancel: CancellationToken,
    ) {
        info!("Relay actor started");
        let mut handled = 0u64;
        let mut resolution: Option<Resolution> = None;

        loop {
            let input = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Relay actor cancelled");
                    break;
                }
                command = commands.recv() => match command {
                    Some(command) => Input::Command(command),
                    None => {
                        debug!("All relay handles dropped, shutting down");
                        break;
                    }
                },
                resolved = answer(&mut resolution) => Input::Resolved(resolved),
                input = core.next_input() => Input::Link(input),
            };

            handled += 1;
            match input {
                Input::Command(command) => {
                    trace!(?command, "Relay command");
                    match command {
                        RelayCommand::Start(encounter) => {
                            if core.is_tracking(&encounter) {
                                debug!(%encounter, "Encounter already started");
                                continue;
                            }
                            abandon(&mut resolution);
                            core.prepare(encounter.clone());
                            resolution = Some(Resolution::spawn(
                                encounter,
                                Arc::clone(&tokens),
                                Arc::clone(&roles),
                                &cancel,
                            ));
                        }
                        RelayCommand::SetSharing(enabled) => core.set_sharing(enabled),
                        RelayCommand::Stop => {
                            abandon(&mut resolution);
                            core.stop();
                        }
                        RelayCommand::Sample(sample) => core.on_location_sample(sample),
                    }
                }
                Input::Resolved(resolved) => {
                    let Some(done) = resolution.take() else { continue };
                    debug!(encounter = %done.encounter, ok = resolved.is_ok(), "Collaborators answered");
                    match resolved {
                        Ok((role, token)) => core.begin(role, token),
                        Err(e) => core.fail_start(e),
                    }
                }
                Input::Link(input) => core.handle(input),
            }
        }

        abandon(&mut resolution);
        core.teardown();
        info!("Relay actor ended (handled {} inputs)", handled);
    }
}

enum Input {
    Command(RelayCommand),
    Resolved(Result<(Role, Option<String>)>),
    Link(LinkInput),
}

/// Role and token lookup for the encounter being started.
struct Resolution {
    encounter: EncounterId,
    cancel: CancellationToken,
    answer: oneshot::Receiver<Result<(Role, Option<String>)>>,
}

impl Resolution {
    fn spawn(
        encounter: EncounterId,
        tokens: Arc<dyn TokenProvider>,
        roles: Arc<dyn RoleResolver>,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let task_cancel = cancel.clone();
        let task_encounter = encounter.clone();
        let (answer_tx, answer) = oneshot::channel();

        tokio::spawn(async move {
            tokio::select! {
                _ = task_cancel.cancelled() => {
                    debug!(encounter = %task_encounter, "Collaborator lookup abandoned");
                }
                resolved = resolve(&task_encounter, &*tokens, &*roles) => {
                    let _ = answer_tx.send(resolved);
                }
            }
        });

        Self { encounter, cancel, answer }
    }
}

fn abandon(resolution: &mut Option<Resolution>) {
    if let Some(stale) = resolution.take() {
        debug!(encounter = %stale.encounter, "Abandoning collaborator lookup");
        stale.cancel.cancel();
    }
}

/// Pending forever while nothing is being resolved.
async fn answer(resolution: &mut Option<Resolution>) -> Result<(Role, Option<String>)> {
    let Some(pending) = resolution.as_mut() else {
        return std::future::pending().await;
    };
    match (&mut pending.answer).await {
        Ok(resolved) => resolved,
        Err(_) => Err(RelayError::collaborator("collaborator lookup", "ended without an answer")),
    }
}

async fn resolve(
    encounter: &EncounterId,
    tokens: &dyn TokenProvider,
    roles: &dyn RoleResolver,
) -> Result<(Role, Option<String>)> {
    let role = roles.role_for(encounter).await?;
    let token = tokens.bearer_token().await?;
    Ok((role, token))
}
