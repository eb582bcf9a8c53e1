//! Instance lifecycle controller.
//!
//! `Session` owns all session state and is its only writer. Operator actions
//! (`submit_credentials`, `request_stop`) run one-shot backend calls; status
//! polls run in the background and are applied one at a time through
//! `next_update`.
//!
//! Every poll is stamped with a generation. Starting or superseding a poll
//! bumps the generation, and outcomes carrying an older one are discarded, so a
//! late "running" can never revive the display after a stop was requested.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::api::InstanceBackend;
use crate::error::{ApiError, SessionError};
use crate::models::{Credentials, InstanceDetails, VmStatus};
use crate::notify::{Notification, Notifier, DEFAULT_NOTIFICATION_TTL};
use crate::poller::{poll_until_state, PollHandle, DEFAULT_POLL_INTERVAL};
use crate::status::{map_to_color, status_label, ColorCategory};

/// Where the session is in the launch/stop flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingCredentials,
    Provisioning,
    WaitingForRunning,
    Ready,
    Stopping,
    WaitingForStopped,
}

/// Step shown by the two-step front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Credentials,
    Status,
}

/// State a poll waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Running,
    Stopped,
}

impl Target {
    pub fn as_raw(self) -> &'static str {
        match self {
            Target::Running => "running",
            Target::Stopped => "stopped",
        }
    }
}

/// Derived presentation of the current status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayState {
    pub status_color: ColorCategory,
    pub status_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub phase: Phase,
    pub step: Step,
    pub instance: Option<InstanceDetails>,
    /// Latest status from any source; always replaced wholesale.
    pub status: VmStatus,
    pub instance_type: String,
    pub region: String,
    pub instance_link: String,
    pub loading: bool,
    /// The most recent poll has completed.
    pub ready: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: Phase::AwaitingCredentials,
            step: Step::Credentials,
            instance: None,
            status: VmStatus::launching(),
            instance_type: String::new(),
            region: String::new(),
            instance_link: String::new(),
            loading: false,
            ready: false,
        }
    }
}

impl SessionState {
    /// Falls back to the label of the raw token when the backend sent no name.
    pub fn display(&self) -> DisplayState {
        let status_name = if self.status.name.is_empty() {
            status_label(&self.status.raw).to_string()
        } else {
            self.status.name.clone()
        };
        DisplayState {
            status_color: map_to_color(&self.status.raw),
            status_name,
        }
    }

    /// Whether the submit/stop controls are shown. They are hidden only once
    /// the instance is ready and reports the running code.
    pub fn show_actions(&self) -> bool {
        !self.ready || !self.status.is_running()
    }

    pub fn instance_url(&self) -> Option<String> {
        if self.instance_link.is_empty() {
            None
        } else {
            Some(format!("http://{}", self.instance_link))
        }
    }
}

/// Result of applying one poll outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update {
    /// A status arrived that is not the target yet.
    Progress,
    /// The target state was observed and the poll has ended.
    Reached(Target),
    /// The poll failed and has ended.
    Failed,
    /// The outcome belonged to a superseded poll and was ignored.
    Stale,
}

struct ActivePoll {
    generation: u64,
    target: Target,
    handle: PollHandle<VmStatus, ApiError>,
}

pub struct Session<B: InstanceBackend, N: Notifier> {
    backend: Arc<B>,
    notifier: N,
    poll_interval: Duration,
    notification_ttl: Duration,
    credentials: Option<Credentials>,
    state: SessionState,
    poll: Option<ActivePoll>,
    generation: u64,
}

impl<B: InstanceBackend, N: Notifier> Session<B, N> {
    pub fn new(backend: Arc<B>, notifier: N) -> Self {
        Self {
            backend,
            notifier,
            poll_interval: DEFAULT_POLL_INTERVAL,
            notification_ttl: DEFAULT_NOTIFICATION_TTL,
            credentials: None,
            state: SessionState::default(),
            poll: None,
            generation: 0,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_notification_ttl(mut self, ttl: Duration) -> Self {
        self.notification_ttl = ttl;
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_polling(&self) -> bool {
        self.poll.is_some()
    }

    /// Generation of the newest poll.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Provision an instance with the given credentials and start waiting for
    /// it to run.
    ///
    /// Validation failures are returned without any network call or
    /// notification. Backend failures are notified and return `Ok`.
    ///
    /// Submitting again while waiting for running after the poll has failed
    /// resumes polling the existing instance instead of creating another one.
    pub async fn submit_credentials(
        &mut self,
        credentials: Credentials,
    ) -> Result<(), SessionError> {
        let resume = self.state.phase == Phase::WaitingForRunning
            && self.poll.is_none()
            && self.state.instance.is_some();
        if self.state.phase != Phase::AwaitingCredentials && !resume {
            return Err(SessionError::InvalidPhase {
                action: "submit credentials",
                phase: self.state.phase,
            });
        }
        credentials.validate()?;

        self.supersede_poll();
        if resume {
            info!("Resuming wait for running instance");
            self.credentials = Some(credentials);
            self.start_poll(Target::Running);
            return Ok(());
        }

        self.state.phase = Phase::Provisioning;
        self.state.loading = true;
        info!(client_id = %credentials.client_id, "Provisioning instance");

        match self.backend.create_instance(&credentials).await {
            Ok(details) => {
                info!(
                    instance_id = %details.instance_id,
                    instance_type = %details.instance_type,
                    region = %details.region,
                    "Instance created"
                );
                self.state.instance_type = details.instance_type.clone();
                self.state.region = details.region.clone();
                self.state.instance = Some(details);
                self.state.step = Step::Status;
                self.state.phase = Phase::WaitingForRunning;
                self.credentials = Some(credentials);
                self.start_poll(Target::Running);
            }
            Err(e) => {
                self.state.phase = Phase::AwaitingCredentials;
                self.state.step = Step::Credentials;
                self.fail(e);
            }
        }
        Ok(())
    }

    /// Stop the instance, then wait for it to report stopped.
    ///
    /// The poll toward "stopped" starts once the stop call has settled,
    /// whether it succeeded or not.
    pub async fn request_stop(&mut self) -> Result<(), SessionError> {
        let (Some(instance), Some(credentials)) = (&self.state.instance, &self.credentials) else {
            return Err(SessionError::NoInstance);
        };
        match self.state.phase {
            Phase::WaitingForRunning | Phase::Ready | Phase::WaitingForStopped => {}
            phase => {
                return Err(SessionError::InvalidPhase {
                    action: "stop the instance",
                    phase,
                })
            }
        }
        let instance_id = instance.instance_id.clone();
        let credentials = credentials.clone();

        self.supersede_poll();
        self.state.phase = Phase::Stopping;
        self.state.loading = true;
        info!(instance_id = %instance_id, "Stopping instance");

        let outcome = self.backend.stop_instance(&credentials, &instance_id).await;
        match outcome {
            Ok(status) => self.apply_status(status),
            Err(e) => self.fail(e),
        }

        self.state.ready = false;
        self.state.phase = Phase::WaitingForStopped;
        self.start_poll(Target::Stopped);
        Ok(())
    }

    /// Wait for the active poll's next outcome and apply it.
    ///
    /// Returns `None` when no poll is active.
    pub async fn next_update(&mut self) -> Option<Update> {
        let poll = self.poll.as_mut()?;
        let generation = poll.generation;

        match poll.handle.next().await {
            Some(outcome) => Some(self.apply_poll_outcome(generation, outcome)),
            None => {
                debug!(generation, "Poll ended without a result");
                self.poll = None;
                self.state.loading = false;
                None
            }
        }
    }

    /// Apply poll outcomes until the active poll ends.
    pub async fn settle(&mut self) -> Option<Update> {
        let mut last = None;
        while let Some(update) = self.next_update().await {
            last = Some(update);
            if matches!(update, Update::Reached(_) | Update::Failed) {
                break;
            }
        }
        last
    }

    pub(crate) fn apply_poll_outcome(
        &mut self,
        generation: u64,
        outcome: Result<VmStatus, ApiError>,
    ) -> Update {
        let target = match &self.poll {
            Some(poll) if poll.generation == generation && generation == self.generation => {
                poll.target
            }
            _ => {
                debug!(
                    generation,
                    current = self.generation,
                    "Discarding outcome of superseded poll"
                );
                return Update::Stale;
            }
        };

        match outcome {
            Ok(status) => {
                let reached = status.raw == target.as_raw();
                debug!(generation, status = %status.raw, target = target.as_raw(), "Poll result");
                self.apply_status(status);
                if !reached {
                    self.state.loading = true;
                    return Update::Progress;
                }
                self.finish_poll();
                self.state.phase = match target {
                    Target::Running => Phase::Ready,
                    Target::Stopped => Phase::AwaitingCredentials,
                };
                info!(target = target.as_raw(), "Instance reached target state");
                Update::Reached(target)
            }
            Err(e) => {
                self.finish_poll();
                self.fail(e);
                Update::Failed
            }
        }
    }

    /// Replace the working status and the fields derived from it.
    fn apply_status(&mut self, status: VmStatus) {
        self.state.instance_type = status.instance_type.clone();
        self.state.region = status.region.clone();
        self.state.instance_link = status.public_ip.clone();
        self.state.status = status;
    }

    fn start_poll(&mut self, target: Target) {
        let (Some(instance), Some(credentials)) = (&self.state.instance, &self.credentials) else {
            return;
        };
        self.generation += 1;
        let handle = poll_until_state(
            self.backend.clone(),
            credentials.clone(),
            instance.instance_id.clone(),
            target.as_raw(),
            self.poll_interval,
        );
        debug!(
            generation = self.generation,
            instance_id = %instance.instance_id,
            target = target.as_raw(),
            "Polling started"
        );
        self.poll = Some(ActivePoll {
            generation: self.generation,
            target,
            handle,
        });
        self.state.ready = false;
        self.state.loading = true;
    }

    fn supersede_poll(&mut self) {
        if let Some(poll) = self.poll.take() {
            poll.handle.cancel();
            debug!(generation = poll.generation, "Poll superseded");
        }
        self.generation += 1;
    }

    fn finish_poll(&mut self) {
        self.poll = None;
        self.state.loading = false;
        self.state.ready = true;
    }

    fn fail(&mut self, e: ApiError) {
        warn!(status = e.status(), error = %e, "Backend call failed");
        self.state.loading = false;
        self.notifier
            .notify(Notification::new(e.notification_text(), self.notification_ttl));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        application_error, instance, transport_error, vm_status, Call, ScriptedBackend,
    };
    use tokio::sync::mpsc;

    type TestSession = Session<ScriptedBackend, mpsc::UnboundedSender<Notification>>;

    fn session(
        backend: ScriptedBackend,
    ) -> (
        TestSession,
        Arc<ScriptedBackend>,
        mpsc::UnboundedReceiver<Notification>,
    ) {
        let backend = Arc::new(backend);
        let (tx, rx) = mpsc::unbounded_channel();
        (Session::new(backend.clone(), tx), backend, rx)
    }

    fn launched() -> ScriptedBackend {
        let backend = ScriptedBackend::new();
        backend.push_create(Ok(instance("i-1", "t2.micro", "us-east-1")));
        backend
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_records_instance_and_waits_for_running() {
        let (mut session, _, mut notes) = session(launched());

        session
            .submit_credentials(Credentials::new("A", "B"))
            .await
            .unwrap();

        let state = session.state();
        assert_eq!(state.phase, Phase::WaitingForRunning);
        assert_eq!(state.step, Step::Status);
        assert_eq!(state.instance, Some(instance("i-1", "t2.micro", "us-east-1")));
        assert_eq!(state.instance_type, "t2.micro");
        assert_eq!(state.region, "us-east-1");
        assert!(state.loading);
        assert!(!state.ready);
        assert!(session.is_polling());
        assert!(notes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalid_credentials_make_no_call() {
        let (mut session, backend, mut notes) = session(launched());

        let err = session
            .submit_credentials(Credentials::new("A", ""))
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Validation(_)));
        assert_eq!(session.state().phase, Phase::AwaitingCredentials);
        assert!(backend.calls().is_empty());
        assert!(notes.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_status_marks_ready() {
        let backend = launched();
        backend
            .push_status(Ok(vm_status(0, "pending", "")))
            .push_status(Ok(vm_status(16, "running", "1.2.3.4")));
        let (mut session, backend, _notes) = session(backend);

        session
            .submit_credentials(Credentials::new("A", "B"))
            .await
            .unwrap();

        assert_eq!(session.next_update().await, Some(Update::Progress));
        assert_eq!(session.state().phase, Phase::WaitingForRunning);
        assert!(session.state().loading);
        assert_eq!(
            session.state().display().status_color,
            ColorCategory::MutedPending
        );

        assert_eq!(
            session.next_update().await,
            Some(Update::Reached(Target::Running))
        );
        let state = session.state();
        assert_eq!(state.phase, Phase::Ready);
        assert!(state.ready);
        assert!(!state.loading);
        assert!(!state.show_actions());
        assert_eq!(state.instance_url().as_deref(), Some("http://1.2.3.4"));
        assert!(!session.is_polling());
        assert_eq!(session.next_update().await, None);
        assert_eq!(backend.status_calls(), 2);
    }

    #[test]
    fn test_show_actions_rule() {
        let mut state = SessionState::default();
        for (ready, code, expected) in [
            (false, 0, true),
            (false, 16, true),
            (true, 0, true),
            (true, 80, true),
            (true, 16, false),
        ] {
            state.ready = ready;
            state.status.code = code;
            assert_eq!(state.show_actions(), expected, "ready={ready} code={code}");
        }
    }

    #[tokio::test]
    async fn test_create_failure_notifies_and_stays_awaiting() {
        let backend = ScriptedBackend::new();
        backend.push_create(Err(application_error(
            "/ec2/create-vm",
            401,
            "You don't have permissions to perform this operation",
        )));
        let (mut session, _, mut notes) = session(backend);

        session
            .submit_credentials(Credentials::new("A", "B"))
            .await
            .unwrap();

        assert_eq!(session.state().phase, Phase::AwaitingCredentials);
        assert_eq!(session.state().step, Step::Credentials);
        assert!(!session.state().loading);
        assert!(!session.is_polling());
        assert_eq!(
            notes.try_recv().unwrap().message,
            "You don't have permissions to perform this operation"
        );
        assert!(notes.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_failure_keeps_phase() {
        let backend = launched();
        backend
            .push_status(Ok(vm_status(0, "pending", "")))
            .push_status(Err(transport_error("/ec2/check-status")));
        let (mut session, _, mut notes) = session(backend);

        session
            .submit_credentials(Credentials::new("A", "B"))
            .await
            .unwrap();

        assert_eq!(session.settle().await, Some(Update::Failed));
        assert_eq!(session.state().phase, Phase::WaitingForRunning);
        assert!(!session.state().loading);
        assert!(!session.is_polling());
        assert_eq!(notes.try_recv().unwrap().message, "Unknown error");
        assert!(notes.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_polls_toward_stopped_even_when_stop_fails() {
        let backend = launched();
        backend
            .push_status(Ok(vm_status(16, "running", "1.2.3.4")))
            .push_stop(Err(transport_error("/ec2/stop-instance")))
            .push_status(Ok(vm_status(64, "stopping", "1.2.3.4")))
            .push_status(Ok(vm_status(80, "stopped", "")));
        let (mut session, backend, mut notes) = session(backend);

        session
            .submit_credentials(Credentials::new("A", "B"))
            .await
            .unwrap();
        assert_eq!(session.settle().await, Some(Update::Reached(Target::Running)));

        session.request_stop().await.unwrap();
        assert_eq!(session.state().phase, Phase::WaitingForStopped);
        assert!(!session.state().ready);
        assert!(session.is_polling());
        assert_eq!(notes.try_recv().unwrap().message, "Unknown error");

        assert_eq!(session.settle().await, Some(Update::Reached(Target::Stopped)));
        let state = session.state();
        assert_eq!(state.phase, Phase::AwaitingCredentials);
        assert_eq!(state.display().status_color, ColorCategory::MutedStopped);
        assert!(state.show_actions());
        assert!(state.instance_url().is_none());
        assert_eq!(
            backend.calls(),
            vec![
                Call::Create {
                    client_id: "A".to_string()
                },
                Call::Status {
                    instance_id: "i-1".to_string()
                },
                Call::Stop {
                    instance_id: "i-1".to_string()
                },
                Call::Status {
                    instance_id: "i-1".to_string()
                },
                Call::Status {
                    instance_id: "i-1".to_string()
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_result_updates_display() {
        let backend = launched();
        backend
            .push_status(Ok(vm_status(16, "running", "1.2.3.4")))
            .push_stop(Ok(vm_status(64, "stopping", "1.2.3.4")));
        let (mut session, _, _notes) = session(backend);

        session
            .submit_credentials(Credentials::new("A", "B"))
            .await
            .unwrap();
        session.settle().await;
        session.request_stop().await.unwrap();

        let state = session.state();
        assert_eq!(state.status.raw, "stopping");
        assert_eq!(state.display().status_color, ColorCategory::MutedPending);
        assert_eq!(state.display().status_name, "Stopping server");
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_poll_results_are_ignored() {
        let backend = launched();
        backend.push_stop(Ok(vm_status(64, "stopping", "")));
        let (mut session, _, _notes) = session(backend);

        session
            .submit_credentials(Credentials::new("A", "B"))
            .await
            .unwrap();
        let waiting_for_running = session.generation();

        session.request_stop().await.unwrap();
        assert!(session.generation() > waiting_for_running);

        let running = Ok(vm_status(16, "running", "1.2.3.4"));
        let update = session.apply_poll_outcome(waiting_for_running, running);

        assert_eq!(update, Update::Stale);
        let state = session.state();
        assert_eq!(state.phase, Phase::WaitingForStopped);
        assert_eq!(state.status.raw, "stopping");
        assert!(!state.ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_answer_in_flight_during_stop_is_dropped() {
        let backend = launched();
        backend
            .push_status_after(Duration::from_secs(3), Ok(vm_status(16, "running", "1.2.3.4")))
            .push_stop(Ok(vm_status(64, "stopping", "1.2.3.4")));
        let (mut session, backend, _notes) = session(backend);

        session
            .submit_credentials(Credentials::new("A", "B"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(backend.status_calls(), 1);

        session.request_stop().await.unwrap();
        let next = tokio::time::timeout(Duration::from_secs(30), session.next_update()).await;

        // The stopped poll never gets an answer; the running one must not leak in.
        assert!(next.is_err());
        let state = session.state();
        assert_eq!(state.phase, Phase::WaitingForStopped);
        assert_eq!(state.status.raw, "stopping");
        assert!(!state.ready);
        assert!(state.show_actions());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubmit_after_failed_poll_resumes_without_new_instance() {
        let backend = launched();
        backend
            .push_status(Ok(vm_status(0, "pending", "")))
            .push_status(Err(transport_error("/ec2/check-status")));
        let (mut session, backend, mut notes) = session(backend);

        session
            .submit_credentials(Credentials::new("A", "B"))
            .await
            .unwrap();
        assert_eq!(session.settle().await, Some(Update::Failed));
        assert_eq!(notes.try_recv().unwrap().message, "Unknown error");

        backend.push_status(Ok(vm_status(16, "running", "1.2.3.4")));
        session
            .submit_credentials(Credentials::new("A", "B"))
            .await
            .unwrap();
        assert!(session.is_polling());
        assert!(session.state().loading);
        assert_eq!(session.state().phase, Phase::WaitingForRunning);

        assert_eq!(session.settle().await, Some(Update::Reached(Target::Running)));
        assert_eq!(session.state().phase, Phase::Ready);
        let creates = backend
            .calls()
            .into_iter()
            .filter(|call| matches!(call, Call::Create { .. }))
            .count();
        assert_eq!(creates, 1);
        assert_eq!(backend.status_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_relaunch_returns_to_credentials_step() {
        let backend = launched();
        backend
            .push_status(Ok(vm_status(16, "running", "1.2.3.4")))
            .push_stop(Ok(vm_status(64, "stopping", "1.2.3.4")))
            .push_status(Ok(vm_status(80, "stopped", "")))
            .push_create(Err(transport_error("/ec2/create-vm")));
        let (mut session, _, mut notes) = session(backend);

        session
            .submit_credentials(Credentials::new("A", "B"))
            .await
            .unwrap();
        session.settle().await;
        session.request_stop().await.unwrap();
        assert_eq!(session.settle().await, Some(Update::Reached(Target::Stopped)));
        assert_eq!(session.state().step, Step::Status);

        session
            .submit_credentials(Credentials::new("A", "B"))
            .await
            .unwrap();

        assert_eq!(session.state().phase, Phase::AwaitingCredentials);
        assert_eq!(session.state().step, Step::Credentials);
        assert_eq!(notes.try_recv().unwrap().message, "Unknown error");
    }

    #[test]
    fn test_display_name_falls_back_to_token_label() {
        let mut state = SessionState::default();
        assert_eq!(state.display().status_name, "Launching server");

        state.status.raw = "stopped".to_string();
        state.status.name = String::new();
        assert_eq!(state.display().status_name, "Server stopped");

        state.status.name = "Custom".to_string();
        assert_eq!(state.display().status_name, "Custom");
    }

    #[tokio::test]
    async fn test_stop_without_instance_is_rejected() {
        let (mut session, backend, _notes) = session(ScriptedBackend::new());

        assert_eq!(session.request_stop().await, Err(SessionError::NoInstance));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_submit_is_rejected_while_instance_is_active() {
        let (mut session, backend, _notes) = session(launched());

        session
            .submit_credentials(Credentials::new("A", "B"))
            .await
            .unwrap();
        let err = session
            .submit_credentials(Credentials::new("A", "B"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            SessionError::InvalidPhase {
                action: "submit credentials",
                phase: Phase::WaitingForRunning,
            }
        );
        let creates = backend
            .calls()
            .into_iter()
            .filter(|call| matches!(call, Call::Create { .. }))
            .count();
        assert_eq!(creates, 1);
    }
}
