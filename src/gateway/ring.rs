//! Queues between the gateway's threads
//!
//! Captured input and hardware notifications arrive on threads the platform owns.
//! Both are handed over through `ringbuf` SPSC rings:
//! - [`InputRing`] carries interleaved input samples from the capture callback
//!   to the output callback, which de-interleaves them into the planar tick buffer.
//!   It is lock-free on both sides.
//! - [`NotificationQueue`] carries notifications from stream error callbacks to
//!   the control thread. Several callbacks may send, so the producer half sits
//!   behind a `Mutex`; the control thread pops without locking.
//!
//! A full ring drops the newest data.

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, PoisonError,
};

use super::Notification;

/// Producer half of the input ring (owned by the capture callback)
pub struct InputProducer {
    producer: ringbuf::HeapProd<f32>,
    dropped: Arc<AtomicU64>,
}

impl InputProducer {
    /// Push one sample. Dropped if the ring is full.
    #[inline]
    pub fn push(&mut self, sample: f32) {
        if self.producer.try_push(sample).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Push interleaved samples
    #[inline]
    pub fn push_slice(&mut self, samples: &[f32]) {
        let pushed = self.producer.push_slice(samples);
        if pushed < samples.len() {
            self.dropped
                .fetch_add((samples.len() - pushed) as u64, Ordering::Relaxed);
        }
    }
}

/// Consumer half of the input ring (owned by the render callback)
pub struct InputConsumer {
    consumer: ringbuf::HeapCons<f32>,
    /// Interleaved channel count of the captured stream
    channels: usize,
    dropped: Arc<AtomicU64>,
}

impl InputConsumer {
    /// De-interleave up to `frames` frames into the planar buffer `out`.
    ///
    /// Captured channel `c` lands in output channel `c`; mono input is copied to
    /// every channel. Frames not yet captured are zero. Returns frames read.
    pub fn read_planar(&mut self, out: &mut [f32], out_channels: usize, frames: usize) -> usize {
        let available = (self.consumer.occupied_len() / self.channels.max(1)).min(frames);

        for frame in 0..available {
            for channel in 0..self.channels {
                let sample = self.consumer.try_pop().unwrap_or(0.0);
                if self.channels == 1 {
                    for target in 0..out_channels {
                        out[target * frames + frame] = sample;
                    }
                } else if channel < out_channels {
                    out[channel * frames + frame] = sample;
                }
            }
            // Output channels the capture doesn't have
            if self.channels > 1 {
                for target in self.channels..out_channels {
                    out[target * frames + frame] = 0.0;
                }
            }
        }

        for channel in 0..out_channels {
            out[channel * frames + available..(channel + 1) * frames].fill(0.0);
        }
        available
    }

    /// Samples lost because the render side fell behind
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// SPSC ring for captured input, split once into its two halves
pub struct InputRing {
    producer: InputProducer,
    consumer: InputConsumer,
}

impl InputRing {
    /// Ring holding `capacity_frames` frames of `channels` interleaved samples
    pub fn new(capacity_frames: usize, channels: usize) -> Self {
        let rb = HeapRb::<f32>::new((capacity_frames * channels).max(1));
        let (prod, cons) = rb.split();
        let dropped = Arc::new(AtomicU64::new(0));

        Self {
            producer: InputProducer {
                producer: prod,
                dropped: Arc::clone(&dropped),
            },
            consumer: InputConsumer {
                consumer: cons,
                channels,
                dropped,
            },
        }
    }

    pub fn split(self) -> (InputProducer, InputConsumer) {
        (self.producer, self.consumer)
    }
}

/// Sending side of a [`NotificationQueue`]. Cheap to clone; each stream error
/// callback owns one.
#[derive(Clone)]
pub struct NotificationSender {
    producer: Arc<Mutex<ringbuf::HeapProd<Notification>>>,
}

impl NotificationSender {
    /// Queue a notification. Returns false if the queue is full.
    pub fn send(&self, notification: Notification) -> bool {
        self.producer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_push(notification)
            .is_ok()
    }
}

/// Notifications raised on platform threads, drained on the control thread
pub struct NotificationQueue {
    consumer: ringbuf::HeapCons<Notification>,
    sender: NotificationSender,
}

impl NotificationQueue {
    pub fn new(capacity: usize) -> Self {
        let rb = HeapRb::<Notification>::new(capacity.max(1));
        let (prod, cons) = rb.split();

        Self {
            consumer: cons,
            sender: NotificationSender {
                producer: Arc::new(Mutex::new(prod)),
            },
        }
    }

    pub fn sender(&self) -> NotificationSender {
        self.sender.clone()
    }

    pub fn pop(&mut self) -> Option<Notification> {
        self.consumer.try_pop()
    }

    /// Discard everything queued
    pub fn clear(&mut self) {
        while self.consumer.try_pop().is_some() {}
    }
}
