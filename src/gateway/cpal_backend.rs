//! Hardware gateway over cpal
//!
//! Activation opens an output stream (and, for recording categories, an input
//! stream) on the selected device. The output callback is the tick source: it
//! pulls captured input from an [`InputRing`], runs the [`Renderer`] on a planar
//! scratch buffer and interleaves the result into the device buffer. Device
//! buffers rarely match the negotiated tick, so ticks are rendered whole and any
//! frames the device did not take are carried into the next callback.
//!
//! cpal has no interruption or route notifications. Stream errors that mean the
//! device went away are reported as [`Notification::HardwareReset`], and a change
//! of the system default output device is reported as
//! [`Notification::RouteChanged`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};

use super::ring::{InputConsumer, InputProducer, InputRing, NotificationQueue, NotificationSender};
use super::{GatewayError, GrantedFormat, HardwareGateway, HardwareRequest, Notification};
use crate::session::Renderer;

/// How often the default output device is checked for a route change
const ROUTE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Captured input the ring can hold, in ticks
const INPUT_RING_TICKS: usize = 8;

/// Scratch buffer headroom over the granted tick size
const SCRATCH_TICKS: usize = 4;

fn backend_error(e: impl std::fmt::Display) -> GatewayError {
    GatewayError::Backend(e.to_string())
}

/// Output config chosen for a request, plus the tick size it implies
struct OutputChoice {
    config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    frames: u32,
}

impl OutputChoice {
    fn granted(&self) -> GrantedFormat {
        let sample_rate = self.config.sample_rate.0 as f64;
        GrantedFormat {
            sample_rate,
            buffer_duration_ms: self.frames as f64 * 1000.0 / sample_rate,
            output_channels: self.config.channels,
            input_channels: 0,
        }
    }
}

/// Gateway backed by the platform's default cpal host
pub struct CpalGateway {
    host: cpal::Host,

    /// Output device to use; `None` follows the system default
    device_name: Option<String>,

    /// Real-time bridge, shared with the output callback
    renderer: Arc<Mutex<Option<Renderer>>>,

    output_stream: Option<cpal::Stream>,
    input_stream: Option<cpal::Stream>,

    request: Option<HardwareRequest>,

    /// Name of the device the streams were opened on
    active_device: Option<String>,
    last_route_check: Instant,

    notifications: NotificationQueue,

    /// Status message
    pub status: String,
}

impl CpalGateway {
    /// Create a gateway for the named output device, or the default one
    pub fn new(device_name: Option<String>) -> Self {
        let host = cpal::default_host();
        let device_count = host
            .output_devices()
            .map(|devices| devices.count())
            .unwrap_or(0);

        Self {
            host,
            device_name,
            renderer: Arc::new(Mutex::new(None)),
            output_stream: None,
            input_stream: None,
            request: None,
            active_device: None,
            last_route_check: Instant::now(),
            notifications: NotificationQueue::new(64),
            status: if device_count > 0 {
                format!("Found {} output device(s)", device_count)
            } else {
                "No output devices found".to_string()
            },
        }
    }

    /// Names of the available output devices
    pub fn output_devices(&self) -> Vec<String> {
        self.host
            .output_devices()
            .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
            .unwrap_or_default()
    }

    pub fn is_active(&self) -> bool {
        self.output_stream.is_some()
    }

    fn output_device(&self) -> Result<cpal::Device, GatewayError> {
        match &self.device_name {
            Some(name) => self
                .host
                .output_devices()
                .map_err(backend_error)?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or(GatewayError::NoDevice),
            None => self
                .host
                .default_output_device()
                .ok_or(GatewayError::NoDevice),
        }
    }

    /// Pick the device config closest to the request
    fn choose_output(
        device: &cpal::Device,
        request: &HardwareRequest,
    ) -> Result<OutputChoice, GatewayError> {
        let default = device.default_output_config().map_err(backend_error)?;
        let mut supported = default.clone();

        if default.sample_rate().0 < request.min_sample_rate {
            // Same format and layout at the preferred minimum rate, if the device has one
            let ranges = device
                .supported_output_configs()
                .map(|ranges| ranges.collect::<Vec<_>>())
                .unwrap_or_default();
            for range in ranges {
                if range.sample_format() == default.sample_format()
                    && range.channels() == default.channels()
                    && range.min_sample_rate().0 <= request.min_sample_rate
                    && range.max_sample_rate().0 >= request.min_sample_rate
                {
                    supported = range.with_sample_rate(cpal::SampleRate(request.min_sample_rate));
                    break;
                }
            }
        }

        let rate = supported.sample_rate().0;
        let wanted = (rate as f64 * request.buffer_duration_ms / 1000.0).round() as u32;
        let frames = match supported.buffer_size() {
            cpal::SupportedBufferSize::Range { min, max } => wanted.max(*min).min(*max),
            cpal::SupportedBufferSize::Unknown => wanted,
        }
        .max(1);

        let mut config: cpal::StreamConfig = supported.config();
        config.buffer_size = cpal::BufferSize::Fixed(frames);

        Ok(OutputChoice {
            config,
            sample_format: supported.sample_format(),
            frames,
        })
    }

    fn error_callback(sender: NotificationSender) -> impl FnMut(cpal::StreamError) + Send + 'static {
        move |err| match err {
            cpal::StreamError::DeviceNotAvailable => {
                log::warn!("Audio device no longer available");
                sender.send(Notification::HardwareReset);
            }
            other => log::error!("Audio error: {}", other),
        }
    }

    /// Open a capture stream at `sample_rate`. Recording is optional: failures
    /// leave the session output-only.
    fn open_input(
        &self,
        sample_rate: u32,
        frames: u32,
    ) -> Option<(cpal::Stream, InputConsumer, u16)> {
        let device = self.host.default_input_device()?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        log::info!("Using input device: {}", device_name);

        let supported = match device.default_input_config() {
            Ok(c) => c,
            Err(e) => {
                log::warn!("No input config: {}", e);
                return None;
            }
        };

        let channels = supported.channels();
        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Fixed(frames),
        };

        let (mut producer, consumer) =
            InputRing::new(frames as usize * INPUT_RING_TICKS, channels as usize).split();
        let on_error = Self::error_callback(self.notifications.sender());

        let stream_result = match supported.sample_format() {
            cpal::SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    producer.push_slice(data);
                },
                on_error,
                None,
            ),
            cpal::SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    capture_i16(&mut producer, data);
                },
                on_error,
                None,
            ),
            format => {
                log::warn!("Unsupported input format: {:?}", format);
                return None;
            }
        };

        let stream = match stream_result {
            Ok(s) => s,
            Err(e) => {
                log::warn!("Could not open input stream: {}", e);
                return None;
            }
        };
        if let Err(e) = stream.play() {
            log::warn!("Could not start input stream: {}", e);
            return None;
        }

        Some((stream, consumer, channels))
    }

    fn build_output<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut path: OutputPath,
        on_error: impl FnMut(cpal::StreamError) + Send + 'static,
    ) -> Result<cpal::Stream, cpal::BuildStreamError>
    where
        T: SizedSample + FromSample<f32>,
    {
        let device_channels = config.channels as usize;
        device.build_output_stream(
            config,
            move |data: &mut [T], info: &cpal::OutputCallbackInfo| {
                path.fill(data, device_channels, info);
            },
            on_error,
            None,
        )
    }

    fn open(&mut self, request: &HardwareRequest) -> Result<GrantedFormat, GatewayError> {
        let device = self.output_device()?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        log::info!("Using output device: {}", device_name);

        let choice = Self::choose_output(&device, request)?;
        let mut granted = choice.granted();
        log::info!("Audio config: {:?}", choice.config);

        let input = if request.category.has_input() {
            self.open_input(choice.config.sample_rate.0, choice.frames)
        } else {
            None
        };
        let (input_stream, input_consumer) = match input {
            Some((stream, consumer, channels)) => {
                granted.input_channels = channels;
                (Some(stream), Some(consumer))
            }
            None => (None, None),
        };

        let channels = request.channels.max(1) as usize;
        let max_frames = choice.frames as usize * SCRATCH_TICKS;
        let path = OutputPath {
            renderer: Arc::clone(&self.renderer),
            scratch: vec![0.0; max_frames * channels],
            channels,
            max_frames,
            pass_frames: 0,
            cursor: 0,
            sample_rate: choice.config.sample_rate.0,
            input: input_consumer,
            emit: request.category.has_output(),
            origin: None,
        };
        let on_error = Self::error_callback(self.notifications.sender());

        let stream = match choice.sample_format {
            cpal::SampleFormat::F32 => {
                Self::build_output::<f32>(&device, &choice.config, path, on_error)
            }
            cpal::SampleFormat::I16 => {
                Self::build_output::<i16>(&device, &choice.config, path, on_error)
            }
            format => {
                return Err(GatewayError::Rejected(format!(
                    "Unsupported format: {:?}",
                    format
                )))
            }
        }
        .map_err(backend_error)?;

        stream.play().map_err(backend_error)?;

        self.output_stream = Some(stream);
        self.input_stream = input_stream;
        self.active_device = Some(device_name.clone());
        self.status = format!("Playing: {}", device_name);
        Ok(granted)
    }

    fn close_streams(&mut self) {
        if let Some(stream) = self.input_stream.take() {
            if let Err(e) = stream.pause() {
                log::debug!("Pausing input stream failed: {}", e);
            }
        }
        if let Some(stream) = self.output_stream.take() {
            if let Err(e) = stream.pause() {
                log::debug!("Pausing output stream failed: {}", e);
            }
        }
    }

    /// Report a change of the default output device while following the default
    fn check_route(&mut self) -> Option<Notification> {
        if self.device_name.is_some() || !self.is_active() {
            return None;
        }
        if self.last_route_check.elapsed() < ROUTE_POLL_INTERVAL {
            return None;
        }
        self.last_route_check = Instant::now();

        let current = self.host.default_output_device()?.name().ok()?;
        if self.active_device.as_deref() == Some(current.as_str()) {
            return None;
        }
        log::info!("Default output device changed to {}", current);
        Some(Notification::RouteChanged)
    }
}

impl HardwareGateway for CpalGateway {
    fn attach_renderer(&mut self, renderer: Renderer) {
        *self.renderer.lock().unwrap_or_else(PoisonError::into_inner) = Some(renderer);
    }

    fn activate(&mut self, request: &HardwareRequest) -> Result<GrantedFormat, GatewayError> {
        self.close_streams();
        self.request = Some(request.clone());

        let result = self.open(request);
        if let Err(e) = &result {
            self.status = format!("Error: {}", e);
        }
        result
    }

    fn deactivate(&mut self) {
        self.close_streams();
        self.notifications.clear();
        self.status = "Stopped".to_string();
        log::info!("Audio streams closed");
    }

    fn reconfigure(&mut self, request: &HardwareRequest) -> Result<GrantedFormat, GatewayError> {
        // cpal streams are fixed at build time: rebuild them
        if self.is_active() {
            return self.activate(request);
        }

        self.request = Some(request.clone());
        let device = self.output_device()?;
        Ok(Self::choose_output(&device, request)?.granted())
    }

    fn current_format(&self) -> Result<GrantedFormat, GatewayError> {
        let request = self.request.as_ref().ok_or(GatewayError::Inactive)?;
        let device = self.output_device()?;
        Ok(Self::choose_output(&device, request)?.granted())
    }

    fn poll_notification(&mut self) -> Option<Notification> {
        self.notifications.pop().or_else(|| self.check_route())
    }
}

/// Convert captured i16 samples and push them into the ring
fn capture_i16(producer: &mut InputProducer, data: &[i16]) {
    for &sample in data {
        producer.push(sample as f32 / 32768.0);
    }
}

/// State owned by the output callback
struct OutputPath {
    renderer: Arc<Mutex<Option<Renderer>>>,
    /// Planar tick buffer, `channels * max_frames`
    scratch: Vec<f32>,
    channels: usize,
    max_frames: usize,
    /// Frames in the last rendered tick
    pass_frames: usize,
    /// Next frame of the last tick to hand to the device
    cursor: usize,
    sample_rate: u32,
    input: Option<InputConsumer>,
    /// False for record-only categories: render, but keep the device silent
    emit: bool,
    origin: Option<cpal::StreamInstant>,
}

impl OutputPath {
    fn fill<T>(&mut self, data: &mut [T], device_channels: usize, info: &cpal::OutputCallbackInfo)
    where
        T: SizedSample + FromSample<f32>,
    {
        let playback = info.timestamp().playback;
        let origin = *self.origin.get_or_insert(playback);
        let host_time = playback
            .duration_since(&origin)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        self.render_into(data, device_channels, host_time);
    }

    /// Fill interleaved device samples from whole ticks, rendering a new one
    /// whenever the previous tick is used up
    fn render_into<T>(&mut self, data: &mut [T], device_channels: usize, host_time: u64)
    where
        T: SizedSample + FromSample<f32>,
    {
        let device_channels = device_channels.max(1);
        let total = data.len() / device_channels;
        let mut written = 0;

        while written < total {
            if self.cursor >= self.pass_frames {
                let offset = written as u64 * 1_000_000_000 / self.sample_rate.max(1) as u64;
                self.render_tick(total - written, host_time + offset);
            }

            let frames = (self.pass_frames - self.cursor).min(total - written);
            let pass = self.pass_frames;
            let planar = &self.scratch[..pass * self.channels];
            for frame in 0..frames {
                let source = self.cursor + frame;
                let target = (written + frame) * device_channels;
                for channel in 0..device_channels {
                    let sample = if channel < self.channels {
                        planar[channel * pass + source]
                    } else if self.channels == 1 {
                        planar[source]
                    } else {
                        0.0
                    };
                    data[target + channel] = T::from_sample(sample);
                }
            }
            self.cursor += frames;
            written += frames;
        }

        for sample in &mut data[total * device_channels..] {
            *sample = T::EQUILIBRIUM;
        }
    }

    /// Render one tick into the scratch buffer.
    ///
    /// The tick is sized by the published parameters. Without usable parameters a
    /// silent pass covering `wanted` frames is produced instead.
    fn render_tick(&mut self, wanted: usize, host_time: u64) {
        // Only the previous stream's callback can hold this lock
        let mut guard = self.renderer.try_lock().ok();
        let renderer = guard.as_mut().and_then(|guard| guard.as_mut());

        let frames = match renderer.as_ref().and_then(|r| r.frames_per_tick()) {
            Some(frames) if frames > 0 && frames <= self.max_frames => frames,
            _ => wanted.clamp(1, self.max_frames),
        };
        let planar = &mut self.scratch[..frames * self.channels];

        match &mut self.input {
            Some(input) => {
                input.read_planar(planar, self.channels, frames);
            }
            None => planar.fill(0.0),
        }

        let produced = match renderer {
            Some(renderer) => renderer.render(planar, frames, host_time),
            None => false,
        };
        if !produced || !self.emit {
            planar.fill(0.0);
        }

        self.pass_frames = frames;
        self.cursor = 0;
    }
}
