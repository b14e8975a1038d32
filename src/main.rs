//! audio-session - demo host
//!
//! Plays a sine tone through a cpal-backed session for a configured number of
//! seconds, pumping platform notifications on the main thread. Settings are read
//! from (and written back to) the platform config directory.

use std::f32::consts::TAU;
use std::thread;
use std::time::{Duration, Instant};

use audio_session::gateway::CpalGateway;
use audio_session::session::{
    AudioProcessor, BufferView, NegotiatedParameters, SessionDelegate, SessionError,
    SessionManager,
};
use audio_session::settings::AppSettings;

/// How often notifications are pumped on the control thread
const PUMP_INTERVAL: Duration = Duration::from_millis(20);

/// Sine oscillator running on the real-time thread
struct Tone {
    phase: f32,
    frequency: f32,
    gain: f32,
}

impl Tone {
    fn new(frequency: f32, gain: f32) -> Self {
        Self {
            phase: 0.0,
            frequency,
            gain,
        }
    }
}

impl AudioProcessor for Tone {
    fn process(&mut self, buffers: &mut BufferView<'_>) -> bool {
        if self.gain <= 0.0 {
            return false;
        }

        let step = TAU * self.frequency / buffers.sample_rate() as f32;
        for frame in 0..buffers.frames() {
            let sample = self.phase.sin() * self.gain;
            self.phase = (self.phase + step) % TAU;
            for channel in 0..buffers.channels() {
                buffers.channel_mut(channel)[frame] = sample;
            }
        }
        true
    }
}

/// Logs session events
struct Console;

impl SessionDelegate for Console {
    fn interruption_started(&mut self) {
        log::info!("Interruption started");
    }

    fn interruption_ended(&mut self) {
        log::info!("Interruption ended");
    }

    fn reactivation_failed(&mut self, error: &SessionError) {
        log::warn!("Still interrupted: {}", error);
    }

    fn session_failed(&mut self, error: &SessionError) {
        log::error!("Session stopped: {}", error);
    }

    fn parameters_changed(&mut self, params: &NegotiatedParameters) {
        log::info!(
            "Running at {} Hz, {} frames per tick",
            params.sample_rate,
            params.frames_per_tick
        );
    }
}

fn main() -> Result<(), SessionError> {
    env_logger::init();
    log::info!("Starting audio-session");

    let settings = AppSettings::load();

    let mut session = SessionManager::new(
        settings.session.clone(),
        CpalGateway::new(settings.device.clone()),
        Console,
        Tone::new(settings.tone_hz, settings.gain),
    )?;
    session.start()?;
    log::info!("{}", session.gateway().status);

    let deadline = Instant::now() + Duration::from_secs(settings.run_seconds);
    while Instant::now() < deadline && session.state().is_active() {
        session.pump();
        thread::sleep(PUMP_INTERVAL);
    }

    session.stop();

    let stats = session.stats();
    log::info!(
        "Rendered {} ticks ({} silent, {} skipped, {} mismatched)",
        stats.callbacks,
        stats.silent_ticks,
        stats.skipped_ticks,
        stats.mismatched_ticks
    );

    settings.save();
    Ok(())
}
