//! Deterministic in-process gateway
//!
//! Stands in for the platform audio service: it grants formats from a scripted
//! hardware capability, queues synthetic notifications and delivers ticks only
//! when the test (or host) asks for one. Clones share the same hardware.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{GatewayError, GrantedFormat, HardwareGateway, HardwareRequest, Notification};
use crate::session::Renderer;

/// Frames delivered by a forced tick before anything was negotiated
const DEFAULT_TICK_FRAMES: usize = 512;

/// Result of one synthetic tick
#[derive(Debug, Clone)]
pub struct TickOutput {
    /// Planar output, `frames` samples per channel
    pub samples: Vec<f32>,
    pub frames: usize,
    pub channels: usize,
    /// The bridge reported audible output
    pub produced: bool,
}

impl TickOutput {
    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|&s| s == 0.0)
    }
}

struct FakeHardware {
    sample_rate: f64,
    /// `None` honours whatever duration is requested
    buffer_duration_ms: Option<f64>,
    output_channels: u16,
    input_channels: u16,

    fail_activation: bool,
    fail_reconfigure: bool,

    active: bool,
    request: Option<HardwareRequest>,
    granted: Option<GrantedFormat>,

    activations: usize,
    deactivations: usize,
    reconfigurations: usize,

    notifications: VecDeque<Notification>,
    input_level: f32,
    host_time: u64,
}

impl FakeHardware {
    fn grant(&self, request: &HardwareRequest) -> GrantedFormat {
        GrantedFormat {
            sample_rate: self.sample_rate,
            buffer_duration_ms: self
                .buffer_duration_ms
                .unwrap_or(request.buffer_duration_ms),
            output_channels: self.output_channels,
            input_channels: if request.category.has_input() {
                self.input_channels
            } else {
                0
            },
        }
    }
}

/// Scriptable hardware gateway
#[derive(Clone)]
pub struct FakeGateway {
    hardware: Arc<Mutex<FakeHardware>>,
    renderer: Arc<Mutex<Option<Renderer>>>,
}

impl FakeGateway {
    /// Hardware running at `sample_rate` that grants any requested buffer duration
    pub fn new(sample_rate: f64) -> Self {
        Self {
            hardware: Arc::new(Mutex::new(FakeHardware {
                sample_rate,
                buffer_duration_ms: None,
                output_channels: 2,
                input_channels: 1,
                fail_activation: false,
                fail_reconfigure: false,
                active: false,
                request: None,
                granted: None,
                activations: 0,
                deactivations: 0,
                reconfigurations: 0,
                notifications: VecDeque::new(),
                input_level: 0.0,
                host_time: 0,
            })),
            renderer: Arc::new(Mutex::new(None)),
        }
    }

    /// Override the buffer duration the hardware grants
    pub fn with_buffer_duration(self, buffer_duration_ms: f64) -> Self {
        self.hardware().buffer_duration_ms = Some(buffer_duration_ms);
        self
    }

    fn hardware(&self) -> MutexGuard<'_, FakeHardware> {
        self.hardware.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change what the hardware can do. Takes effect on the next activation or
    /// reconfiguration; `current_format` reports it immediately.
    pub fn set_hardware_format(&self, sample_rate: f64, buffer_duration_ms: Option<f64>) {
        let mut hw = self.hardware();
        hw.sample_rate = sample_rate;
        hw.buffer_duration_ms = buffer_duration_ms;
    }

    pub fn set_activation_fails(&self, fails: bool) {
        self.hardware().fail_activation = fails;
    }

    pub fn set_reconfigure_fails(&self, fails: bool) {
        self.hardware().fail_reconfigure = fails;
    }

    /// Constant value captured input buffers are filled with
    pub fn set_input_level(&self, level: f32) {
        self.hardware().input_level = level;
    }

    /// Queue a notification as the platform would deliver it.
    ///
    /// Interruptions and resets stop the hardware, like the real service does.
    pub fn push_notification(&self, notification: Notification) {
        let mut hw = self.hardware();
        if matches!(
            notification,
            Notification::InterruptionBegan | Notification::HardwareReset
        ) {
            hw.active = false;
        }
        hw.notifications.push_back(notification);
    }

    pub fn is_active(&self) -> bool {
        self.hardware().active
    }

    pub fn activations(&self) -> usize {
        self.hardware().activations
    }

    pub fn deactivations(&self) -> usize {
        self.hardware().deactivations
    }

    pub fn reconfigurations(&self) -> usize {
        self.hardware().reconfigurations
    }

    pub fn last_request(&self) -> Option<HardwareRequest> {
        self.hardware().request.clone()
    }

    /// Deliver one tick if the hardware is running
    pub fn tick(&self) -> Option<TickOutput> {
        if !self.is_active() {
            return None;
        }
        Some(self.force_tick())
    }

    /// Deliver one tick regardless of the hardware state
    pub fn force_tick(&self) -> TickOutput {
        let (frames, channels, input_level, host_time) = {
            let mut hw = self.hardware();
            let frames = hw
                .granted
                .map(|g| (g.sample_rate * g.buffer_duration_ms / 1000.0).round() as usize)
                .unwrap_or(DEFAULT_TICK_FRAMES);
            let channels = hw.request.as_ref().map(|r| r.channels as usize).unwrap_or(1);
            let host_time = hw.host_time;
            let tick_ns = (frames as f64 * 1e9 / hw.sample_rate.max(1.0)) as u64;
            hw.host_time += tick_ns;
            (frames, channels, hw.input_level, host_time)
        };

        let mut samples = vec![input_level; frames * channels];
        let produced = match self
            .renderer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            Some(renderer) => renderer.render(&mut samples, frames, host_time),
            None => {
                samples.fill(0.0);
                false
            }
        };

        TickOutput {
            samples,
            frames,
            channels,
            produced,
        }
    }
}

impl HardwareGateway for FakeGateway {
    fn attach_renderer(&mut self, renderer: Renderer) {
        *self.renderer.lock().unwrap_or_else(PoisonError::into_inner) = Some(renderer);
    }

    fn activate(&mut self, request: &HardwareRequest) -> Result<GrantedFormat, GatewayError> {
        let mut hw = self.hardware();
        hw.activations += 1;
        hw.request = Some(request.clone());
        if hw.fail_activation {
            hw.active = false;
            return Err(GatewayError::Rejected("activation refused".to_string()));
        }

        let granted = hw.grant(request);
        hw.granted = Some(granted);
        hw.active = true;
        Ok(granted)
    }

    fn deactivate(&mut self) {
        let mut hw = self.hardware();
        hw.deactivations += 1;
        hw.active = false;
    }

    fn reconfigure(&mut self, request: &HardwareRequest) -> Result<GrantedFormat, GatewayError> {
        let mut hw = self.hardware();
        hw.reconfigurations += 1;
        hw.request = Some(request.clone());
        if hw.fail_reconfigure {
            return Err(GatewayError::Rejected("no usable format".to_string()));
        }

        let granted = hw.grant(request);
        hw.granted = Some(granted);
        Ok(granted)
    }

    fn current_format(&self) -> Result<GrantedFormat, GatewayError> {
        let hw = self.hardware();
        match &hw.request {
            Some(request) => Ok(hw.grant(request)),
            None => Err(GatewayError::Inactive),
        }
    }

    fn poll_notification(&mut self) -> Option<Notification> {
        self.hardware().notifications.pop_front()
    }
}
