//! Session state machine
//!
//! [`SessionManager`] owns the hardware gateway, the negotiator and the control
//! side of the render gate. It lives on the control thread: every public method
//! takes `&mut self`, so transitions are serialized by construction. Platform
//! notifications are queued and applied in arrival order by [`SessionManager::pump`].

use std::collections::VecDeque;
use std::sync::Arc;

use super::bridge::{AudioProcessor, RenderShared, RenderStats, Renderer};
use super::config::{validate_buffer_size, RouteChangePolicy, SessionConfig};
use super::error::SessionError;
use super::negotiator::{NegotiatedParameters, NegotiationError, ParameterNegotiator};
use super::state::SessionState;
use crate::gateway::{HardwareGateway, Notification};

/// Control-domain event handlers implemented by the consumer.
///
/// All methods run on the control thread.
pub trait SessionDelegate {
    /// The session was interrupted (phone call, another app took the hardware)
    fn interruption_started(&mut self);

    /// The session is running again after an interruption
    fn interruption_ended(&mut self);

    /// The interruption ended but the hardware could not be re-activated.
    /// The session stays interrupted; [`SessionManager::resume`] can retry.
    fn reactivation_failed(&mut self, _error: &SessionError) {}

    /// A running session hit a fatal error and was forced back to idle
    fn session_failed(&mut self, _error: &SessionError) {}

    /// New operating parameters are in effect
    fn parameters_changed(&mut self, _params: &NegotiatedParameters) {}
}

/// Owns the lifecycle of one audio hardware session.
pub struct SessionManager<G: HardwareGateway, D: SessionDelegate> {
    config: SessionConfig,
    gateway: G,
    delegate: D,
    negotiator: ParameterNegotiator,
    shared: Arc<RenderShared>,
    state: SessionState,
    pending: VecDeque<Notification>,
    last_error: Option<SessionError>,
}

impl<G: HardwareGateway, D: SessionDelegate> SessionManager<G, D> {
    /// Create a manager and hand the render bridge for `processor` to the gateway
    pub fn new<P>(
        config: SessionConfig,
        mut gateway: G,
        delegate: D,
        processor: P,
    ) -> Result<Self, SessionError>
    where
        P: AudioProcessor + 'static,
    {
        config.validate()?;

        let shared = RenderShared::new();
        gateway.attach_renderer(Renderer::new(Box::new(processor), Arc::clone(&shared)));

        log::info!(
            "Audio session created: {}, {} ms, >= {} Hz, {} channel(s)",
            config.category.name(),
            config.preferred_buffer_size_ms,
            config.preferred_min_sample_rate,
            config.channels
        );

        Ok(Self {
            config,
            gateway,
            delegate,
            negotiator: ParameterNegotiator::new(Arc::clone(&shared)),
            shared,
            state: SessionState::Idle,
            pending: VecDeque::new(),
            last_error: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    /// Whether ticks currently reach the processor
    pub fn is_rendering(&self) -> bool {
        self.shared.is_open()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn preferred_buffer_size_ms(&self) -> u32 {
        self.config.preferred_buffer_size_ms
    }

    /// Parameters the render path is currently using
    pub fn parameters(&self) -> Option<Arc<NegotiatedParameters>> {
        self.negotiator.current()
    }

    pub fn stats(&self) -> RenderStats {
        self.shared.stats()
    }

    /// The most recent error reported through a return value or the delegate
    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    pub fn delegate(&self) -> &D {
        &self.delegate
    }

    pub fn delegate_mut(&mut self) -> &mut D {
        &mut self.delegate
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn gateway_mut(&mut self) -> &mut G {
        &mut self.gateway
    }

    /// Activate the hardware and start processing.
    ///
    /// A no-op if already running. On failure the session is idle again and
    /// `start` may be retried.
    pub fn start(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Idle => {}
            SessionState::Running => return Ok(()),
            state => {
                return Err(SessionError::InvalidState {
                    operation: "start",
                    state,
                })
            }
        }

        // Anything queued while idle belongs to no run
        self.pending.clear();
        while self.gateway.poll_notification().is_some() {}

        self.transition(SessionState::Starting);
        let result = self.activate();
        match &result {
            Ok(()) => self.transition(SessionState::Running),
            Err(e) => {
                log::warn!("Failed to start audio session: {}", e);
                self.last_error = Some(e.clone());
                self.transition(SessionState::Idle);
            }
        }

        self.pump();
        result
    }

    /// Stop processing and release the hardware.
    ///
    /// Once this returns the processor will not be called again. Stopping an idle
    /// session does nothing.
    pub fn stop(&mut self) {
        if self.state == SessionState::Idle {
            return;
        }

        self.transition(SessionState::Stopping);
        self.shutdown();
        self.transition(SessionState::Idle);
    }

    /// Re-activate an interrupted session without waiting for the platform to
    /// say so
    pub fn resume(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Interrupted {
            return Err(SessionError::InvalidState {
                operation: "resume",
                state: self.state,
            });
        }
        self.reactivate()
    }

    /// Change the preferred buffer size. Renegotiates immediately when active;
    /// a failed renegotiation stops the session.
    pub fn set_preferred_buffer_size_ms(&mut self, buffer_size_ms: u32) -> Result<(), SessionError> {
        validate_buffer_size(buffer_size_ms)?;
        if buffer_size_ms == self.config.preferred_buffer_size_ms {
            return Ok(());
        }

        log::info!(
            "Preferred buffer size {} ms -> {} ms",
            self.config.preferred_buffer_size_ms,
            buffer_size_ms
        );
        self.config.preferred_buffer_size_ms = buffer_size_ms;
        if self.state == SessionState::Idle {
            return Ok(());
        }

        if let Err(e) = self.renegotiate() {
            self.fail(e.clone());
            return Err(e);
        }
        Ok(())
    }

    /// Queue a notification and apply everything pending
    pub fn handle_notification(&mut self, notification: Notification) {
        self.pending.push_back(notification);
        self.pump();
    }

    /// Collect notifications from the gateway and apply them in arrival order.
    /// Returns the number applied.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
            while let Some(notification) = self.gateway.poll_notification() {
                self.pending.push_back(notification);
            }
            let Some(notification) = self.pending.pop_front() else {
                break;
            };
            self.apply(notification);
            handled += 1;
        }
        handled
    }

    fn apply(&mut self, notification: Notification) {
        log::debug!("Notification {:?} while {}", notification, self.state);

        match (notification, self.state) {
            (_, SessionState::Idle) => {}
            (Notification::InterruptionBegan, SessionState::Running) => {
                self.shared.close();
                self.transition(SessionState::Interrupted);
                self.delegate.interruption_started();
            }
            (Notification::InterruptionEnded { should_resume }, SessionState::Interrupted) => {
                if should_resume {
                    // Failure is reported through the delegate
                    let _ = self.reactivate();
                } else {
                    log::info!("Interruption ended without resume, staying interrupted");
                }
            }
            (Notification::RouteChanged, _) => self.route_changed(),
            (Notification::HardwareReset, _) => self.hardware_reset(),
            _ => {}
        }
    }

    fn transition(&mut self, next: SessionState) {
        log::info!("Audio session {} -> {}", self.state, next);
        self.state = next;
    }

    /// Activate the gateway, negotiate and open the render gate
    fn activate(&mut self) -> Result<(), SessionError> {
        let request = ParameterNegotiator::request(&self.config);
        let granted = self.gateway.activate(&request)?;

        let params = match self.negotiator.apply(&self.config, &granted) {
            Ok(params) => params,
            Err(e) => {
                self.gateway.deactivate();
                return Err(e.into());
            }
        };

        self.shared.open();
        self.delegate.parameters_changed(&params);
        Ok(())
    }

    fn reactivate(&mut self) -> Result<(), SessionError> {
        match self.activate() {
            Ok(()) => {
                self.transition(SessionState::Running);
                self.delegate.interruption_ended();
                Ok(())
            }
            Err(e) => {
                log::warn!("Could not re-activate after interruption: {}", e);
                self.last_error = Some(e.clone());
                self.delegate.reactivation_failed(&e);
                Err(e)
            }
        }
    }

    fn renegotiate(&mut self) -> Result<(), SessionError> {
        let request = ParameterNegotiator::request(&self.config);
        let granted = self
            .gateway
            .reconfigure(&request)
            .map_err(NegotiationError::from)?;
        let params = self.negotiator.apply(&self.config, &granted)?;
        self.delegate.parameters_changed(&params);
        Ok(())
    }

    fn route_changed(&mut self) {
        if self.config.route_change_policy == RouteChangePolicy::OnFormatChange {
            match self.gateway.current_format() {
                Ok(format) if !self.negotiator.differs_from_current(&format) => {
                    log::debug!("Route changed, hardware format unchanged");
                    return;
                }
                Ok(_) => {}
                Err(e) => log::debug!("Could not read hardware format: {}", e),
            }
        }

        log::info!("Audio route changed, renegotiating");
        if let Err(e) = self.renegotiate() {
            self.fail(e);
        }
    }

    fn hardware_reset(&mut self) {
        log::warn!("Audio hardware was reset");
        self.shared.close();
        self.gateway.deactivate();

        // An interrupted session re-activates when the interruption ends
        if self.state != SessionState::Running {
            return;
        }
        if let Err(e) = self.activate() {
            self.fail(e);
        }
    }

    /// Tear down a failed run and report it
    fn fail(&mut self, error: SessionError) {
        log::error!("Audio session failed: {}", error);
        self.shutdown();
        self.transition(SessionState::Idle);
        self.last_error = Some(error.clone());
        self.delegate.session_failed(&error);
    }

    /// Drain the render path, release the hardware and drop stale notifications
    fn shutdown(&mut self) {
        self.shared.close();
        self.gateway.deactivate();
        self.pending.clear();
        while self.gateway.poll_notification().is_some() {}
    }
}

impl<G: HardwareGateway, D: SessionDelegate> Drop for SessionManager<G, D> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::FakeGateway;
    use crate::session::{ConfigError, MAX_BUFFER_SIZE_MS};
    use crate::session::{BufferView, SessionCategory};
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
    use std::thread;

    #[derive(Default)]
    struct Recorder {
        started: usize,
        ended: usize,
        reactivation_failures: usize,
        failures: usize,
        parameter_changes: Vec<NegotiatedParameters>,
    }

    impl SessionDelegate for Recorder {
        fn interruption_started(&mut self) {
            self.started += 1;
        }

        fn interruption_ended(&mut self) {
            self.ended += 1;
        }

        fn reactivation_failed(&mut self, _error: &SessionError) {
            self.reactivation_failures += 1;
        }

        fn session_failed(&mut self, _error: &SessionError) {
            self.failures += 1;
        }

        fn parameters_changed(&mut self, params: &NegotiatedParameters) {
            self.parameter_changes.push(*params);
        }
    }

    /// Processor that counts calls and remembers what it was last given
    #[derive(Clone, Default)]
    struct Probe {
        calls: Arc<AtomicUsize>,
        sample_rate: Arc<AtomicU32>,
        frames: Arc<AtomicUsize>,
    }

    impl Probe {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn processor(&self) -> impl AudioProcessor + 'static {
            let probe = self.clone();
            move |view: &mut BufferView<'_>| {
                probe.calls.fetch_add(1, Ordering::SeqCst);
                probe.sample_rate.store(view.sample_rate(), Ordering::SeqCst);
                probe.frames.store(view.frames(), Ordering::SeqCst);
                for channel in view.channels_mut() {
                    channel.fill(0.5);
                }
                true
            }
        }
    }

    fn config() -> SessionConfig {
        SessionConfig::new(SessionCategory::Playback, 12, 44100, 2)
    }

    fn manager(gateway: &FakeGateway, probe: &Probe) -> SessionManager<FakeGateway, Recorder> {
        SessionManager::new(
            config(),
            gateway.clone(),
            Recorder::default(),
            probe.processor(),
        )
        .unwrap()
    }

    #[test]
    fn test_start_negotiates_granted_format() {
        let gateway = FakeGateway::new(48000.0).with_buffer_duration(10.67);
        let probe = Probe::default();
        let mut session = manager(&gateway, &probe);

        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Running);
        assert!(session.is_rendering());

        let params = session.parameters().unwrap();
        assert_eq!(params.sample_rate, 48000);
        assert_eq!(params.frames_per_tick, 512);
        assert_eq!(params.channels, 2);

        let out = gateway.tick().unwrap();
        assert!(out.produced);
        assert_eq!(probe.calls(), 1);
        assert_eq!(probe.frames.load(Ordering::SeqCst), 512);
        assert!(out.samples.iter().all(|&s| s == 0.5));
        assert_eq!(session.delegate().parameter_changes.len(), 1);
    }

    #[test]
    fn test_activation_failure_stays_idle() {
        let gateway = FakeGateway::new(48000.0);
        gateway.set_activation_fails(true);
        let probe = Probe::default();
        let mut session = manager(&gateway, &probe);

        let result = session.start();
        assert!(matches!(result, Err(SessionError::Activation(_))));
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.delegate().started, 0);
        assert_eq!(session.delegate().ended, 0);
        assert_eq!(session.delegate().failures, 0);

        // Recoverable
        gateway.set_activation_fails(false);
        session.start().unwrap();
        assert!(session.is_running());
    }

    #[test]
    fn test_negotiation_failure_on_start() {
        let gateway = FakeGateway::new(0.0);
        let probe = Probe::default();
        let mut session = manager(&gateway, &probe);

        assert!(matches!(
            session.start(),
            Err(SessionError::Negotiation(_))
        ));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!gateway.is_active());
    }

    #[test]
    fn test_stop_prevents_further_callbacks() {
        let gateway = FakeGateway::new(48000.0);
        let probe = Probe::default();
        let mut session = manager(&gateway, &probe);

        session.start().unwrap();
        session.stop();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!gateway.is_active());

        let out = gateway.force_tick();
        assert!(!out.produced);
        assert!(out.is_silent());
        assert_eq!(probe.calls(), 0);
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let gateway = FakeGateway::new(48000.0);
        let probe = Probe::default();
        let mut session = manager(&gateway, &probe);

        session.stop();
        session.stop();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(gateway.deactivations(), 0);
    }

    #[test]
    fn test_stop_waits_for_tick_in_flight() {
        let gateway = FakeGateway::new(48000.0).with_buffer_duration(1.0);
        let probe = Probe::default();
        let mut session = manager(&gateway, &probe);
        session.start().unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let ticker = {
            let gateway = gateway.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    gateway.force_tick();
                }
            })
        };

        while probe.calls() < 10 {
            thread::yield_now();
        }
        session.stop();
        let calls_at_stop = probe.calls();

        for _ in 0..1000 {
            thread::yield_now();
        }
        done.store(true, Ordering::SeqCst);
        ticker.join().unwrap();

        assert_eq!(probe.calls(), calls_at_stop);
        assert_eq!(session.stats().callbacks, calls_at_stop as u64);
    }

    #[test]
    fn test_interruption_cycle() {
        let gateway = FakeGateway::new(48000.0);
        let probe = Probe::default();
        let mut session = manager(&gateway, &probe);
        session.start().unwrap();
        gateway.tick().unwrap();

        gateway.push_notification(Notification::InterruptionBegan);
        assert_eq!(session.pump(), 1);
        assert_eq!(session.state(), SessionState::Interrupted);
        assert_eq!(session.delegate().started, 1);
        assert!(!session.is_rendering());

        // Hardware stopped ticking; a stray tick is silence
        assert!(gateway.tick().is_none());
        let out = gateway.force_tick();
        assert!(out.is_silent());
        assert_eq!(probe.calls(), 1);

        gateway.push_notification(Notification::InterruptionEnded { should_resume: true });
        session.pump();
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(session.delegate().ended, 1);
        assert_eq!(session.delegate().started, 1);

        let out = gateway.tick().unwrap();
        assert!(out.produced);
        assert_eq!(probe.calls(), 2);
        assert_eq!(probe.sample_rate.load(Ordering::SeqCst), 48000);
    }

    #[test]
    fn test_reactivation_failure_stays_interrupted() {
        let gateway = FakeGateway::new(48000.0);
        let probe = Probe::default();
        let mut session = manager(&gateway, &probe);
        session.start().unwrap();

        session.handle_notification(Notification::InterruptionBegan);
        gateway.set_activation_fails(true);
        session.handle_notification(Notification::InterruptionEnded { should_resume: true });

        assert_eq!(session.state(), SessionState::Interrupted);
        assert_eq!(session.delegate().ended, 0);
        assert_eq!(session.delegate().reactivation_failures, 1);
        assert!(session.last_error().is_some());
        assert!(gateway.tick().is_none());

        gateway.set_activation_fails(false);
        session.resume().unwrap();
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(session.delegate().ended, 1);
    }

    #[test]
    fn test_interruption_end_without_resume() {
        let gateway = FakeGateway::new(48000.0);
        let probe = Probe::default();
        let mut session = manager(&gateway, &probe);
        session.start().unwrap();

        session.handle_notification(Notification::InterruptionBegan);
        session.handle_notification(Notification::InterruptionEnded { should_resume: false });
        assert_eq!(session.state(), SessionState::Interrupted);
        assert_eq!(gateway.activations(), 1);

        session.resume().unwrap();
        assert!(session.is_running());
        assert!(matches!(
            session.resume(),
            Err(SessionError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_notifications_apply_in_order() {
        let gateway = FakeGateway::new(48000.0);
        let probe = Probe::default();
        let mut session = manager(&gateway, &probe);
        session.start().unwrap();

        gateway.push_notification(Notification::InterruptionBegan);
        gateway.push_notification(Notification::InterruptionEnded { should_resume: true });
        gateway.push_notification(Notification::InterruptionBegan);

        assert_eq!(session.pump(), 3);
        assert_eq!(session.state(), SessionState::Interrupted);
        assert_eq!(session.delegate().started, 2);
        assert_eq!(session.delegate().ended, 1);
    }

    #[test]
    fn test_route_change_renegotiates_once() {
        let gateway = FakeGateway::new(48000.0);
        let probe = Probe::default();
        let mut session = manager(&gateway, &probe);
        session.start().unwrap();
        gateway.tick().unwrap();
        assert_eq!(probe.frames.load(Ordering::SeqCst), 576);

        gateway.set_hardware_format(44100.0, None);
        gateway.push_notification(Notification::RouteChanged);
        session.pump();

        assert_eq!(gateway.reconfigurations(), 1);
        assert_eq!(session.delegate().parameter_changes.len(), 2);
        assert_eq!(session.state(), SessionState::Running);

        gateway.tick().unwrap();
        assert_eq!(probe.sample_rate.load(Ordering::SeqCst), 44100);
        assert_eq!(probe.frames.load(Ordering::SeqCst), 529);
    }

    #[test]
    fn test_route_change_skipped_when_format_unchanged() {
        let gateway = FakeGateway::new(48000.0);
        let probe = Probe::default();
        let mut session = SessionManager::new(
            config().with_route_change_policy(RouteChangePolicy::OnFormatChange),
            gateway.clone(),
            Recorder::default(),
            probe.processor(),
        )
        .unwrap();
        session.start().unwrap();

        session.handle_notification(Notification::RouteChanged);
        assert_eq!(gateway.reconfigurations(), 0);

        gateway.set_hardware_format(96000.0, None);
        session.handle_notification(Notification::RouteChanged);
        assert_eq!(gateway.reconfigurations(), 1);
        assert_eq!(session.parameters().unwrap().sample_rate, 96000);
    }

    #[test]
    fn test_route_change_failure_forces_idle() {
        let gateway = FakeGateway::new(48000.0);
        let probe = Probe::default();
        let mut session = manager(&gateway, &probe);
        session.start().unwrap();

        gateway.set_reconfigure_fails(true);
        session.handle_notification(Notification::RouteChanged);

        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.delegate().failures, 1);
        assert!(matches!(
            session.last_error(),
            Some(SessionError::Negotiation(NegotiationError::Gateway(_)))
        ));
        assert!(!gateway.is_active());

        gateway.force_tick();
        assert_eq!(probe.calls(), 0);
    }

    #[test]
    fn test_notifications_ignored_when_idle() {
        let gateway = FakeGateway::new(48000.0);
        let probe = Probe::default();
        let mut session = manager(&gateway, &probe);

        session.handle_notification(Notification::InterruptionBegan);
        session.handle_notification(Notification::RouteChanged);
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.delegate().started, 0);
        assert_eq!(gateway.reconfigurations(), 0);
    }

    #[test]
    fn test_buffer_size_change_applies_live() {
        let gateway = FakeGateway::new(48000.0);
        let probe = Probe::default();
        let mut session = manager(&gateway, &probe);
        session.start().unwrap();

        session.set_preferred_buffer_size_ms(5).unwrap();
        assert_eq!(session.preferred_buffer_size_ms(), 5);
        assert_eq!(session.parameters().unwrap().frames_per_tick, 240);
        assert_eq!(gateway.last_request().unwrap().buffer_duration_ms, 5.0);

        gateway.tick().unwrap();
        assert_eq!(probe.frames.load(Ordering::SeqCst), 240);

        assert!(matches!(
            session.set_preferred_buffer_size_ms(0),
            Err(SessionError::Config(ConfigError::ZeroBufferSize))
        ));
        assert!(matches!(
            session.set_preferred_buffer_size_ms(1000),
            Err(SessionError::Config(ConfigError::BufferSizeTooLarge(1000)))
        ));
        assert_eq!(session.preferred_buffer_size_ms(), 5);
        assert!(session.is_running());
    }

    #[test]
    fn test_largest_buffer_size_starts() {
        let gateway = FakeGateway::new(192000.0);
        let probe = Probe::default();
        let mut session = SessionManager::new(
            SessionConfig::new(SessionCategory::Playback, MAX_BUFFER_SIZE_MS, 44100, 2),
            gateway.clone(),
            Recorder::default(),
            probe.processor(),
        )
        .unwrap();

        session.start().unwrap();
        assert_eq!(session.parameters().unwrap().frames_per_tick, 19200);
    }

    #[test]
    fn test_start_discards_notifications_from_before() {
        let gateway = FakeGateway::new(48000.0);
        let probe = Probe::default();
        let mut session = manager(&gateway, &probe);

        gateway.push_notification(Notification::InterruptionBegan);
        session.start().unwrap();

        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(session.delegate().started, 0);
        assert!(gateway.tick().unwrap().produced);
    }

    #[test]
    fn test_route_changes_while_ticking_keep_view_consistent() {
        let gateway = FakeGateway::new(48000.0);
        let torn = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let processor = {
            let torn = Arc::clone(&torn);
            let calls = Arc::clone(&calls);
            move |view: &mut BufferView<'_>| {
                calls.fetch_add(1, Ordering::SeqCst);
                match (view.frames(), view.sample_rate()) {
                    (480, 48000) | (441, 44100) => {}
                    _ => {
                        torn.fetch_add(1, Ordering::SeqCst);
                    }
                }
                true
            }
        };
        let mut session = SessionManager::new(
            SessionConfig::new(SessionCategory::Playback, 10, 44100, 2),
            gateway.clone(),
            Recorder::default(),
            processor,
        )
        .unwrap();
        session.start().unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let ticker = {
            let gateway = gateway.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    gateway.force_tick();
                }
            })
        };

        for round in 0..2000 {
            let rate = if round % 2 == 0 { 44100.0 } else { 48000.0 };
            gateway.set_hardware_format(rate, None);
            session.handle_notification(Notification::RouteChanged);
        }
        while calls.load(Ordering::SeqCst) == 0 {
            thread::yield_now();
        }
        done.store(true, Ordering::SeqCst);
        ticker.join().unwrap();

        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(torn.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_buffer_size_change_when_idle_is_stored() {
        let gateway = FakeGateway::new(48000.0);
        let probe = Probe::default();
        let mut session = manager(&gateway, &probe);

        session.set_preferred_buffer_size_ms(20).unwrap();
        assert_eq!(gateway.reconfigurations(), 0);

        session.start().unwrap();
        assert_eq!(session.parameters().unwrap().frames_per_tick, 960);
    }

    #[test]
    fn test_hardware_reset_reactivates() {
        let gateway = FakeGateway::new(48000.0);
        let probe = Probe::default();
        let mut session = manager(&gateway, &probe);
        session.start().unwrap();

        gateway.push_notification(Notification::HardwareReset);
        assert!(gateway.tick().is_none());
        session.pump();

        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(gateway.activations(), 2);
        assert!(gateway.tick().unwrap().produced);
    }

    #[test]
    fn test_hardware_reset_failure_forces_idle() {
        let gateway = FakeGateway::new(48000.0);
        let probe = Probe::default();
        let mut session = manager(&gateway, &probe);
        session.start().unwrap();

        gateway.set_activation_fails(true);
        session.handle_notification(Notification::HardwareReset);
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.delegate().failures, 1);
    }

    #[test]
    fn test_silent_verdict_overrides_input() {
        let gateway = FakeGateway::new(48000.0);
        gateway.set_input_level(0.9);
        let mut session = SessionManager::new(
            SessionConfig::new(SessionCategory::PlayAndRecord, 10, 44100, 1),
            gateway.clone(),
            Recorder::default(),
            |view: &mut BufferView<'_>| {
                assert!(view.channel(0).iter().all(|&s| s == 0.9));
                view.channel_mut(0).fill(0.3);
                false
            },
        )
        .unwrap();
        session.start().unwrap();

        let out = gateway.tick().unwrap();
        assert!(!out.produced);
        assert!(out.is_silent());
        assert_eq!(session.stats().silent_ticks, 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let gateway = FakeGateway::new(48000.0);
        let probe = Probe::default();
        let result = SessionManager::new(
            SessionConfig::new(SessionCategory::Playback, 12, 44100, 0),
            gateway,
            Recorder::default(),
            probe.processor(),
        );
        assert!(matches!(
            result,
            Err(SessionError::Config(ConfigError::NoChannels))
        ));
    }

    #[test]
    fn test_drop_stops_session() {
        let gateway = FakeGateway::new(48000.0);
        let probe = Probe::default();
        {
            let mut session = manager(&gateway, &probe);
            session.start().unwrap();
        }
        assert!(!gateway.is_active());
        gateway.force_tick();
        assert_eq!(probe.calls(), 0);
    }
}
