// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::audio::{mixer::AudioMixer, AudioError, Route, Source, DEFAULT_DEVICE};

/// Requests handled by the output thread, which owns the cpal stream.
enum Control {
    Resume(Sender<Result<(), AudioError>>),
}

/// An output backed by a cpal device. The stream lives on its own thread and mixes sources
/// inside the device callback.
pub struct Output {
    /// The device name.
    name: String,
    /// The device's default sample rate.
    sample_rate: u32,
    num_channels: u16,
    /// New sources for the callback's mixer.
    source_tx: Sender<Box<dyn Source>>,
    /// Dropped to shut the output thread down.
    control_tx: Option<Sender<Control>>,
    resumed: AtomicBool,
    routes: Arc<AtomicUsize>,
    output_thread: Option<thread::JoinHandle<()>>,
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}, Rate={})",
            self.name, self.num_channels, self.sample_rate
        )
    }
}

impl Output {
    /// Lists the names of the output devices of every available host.
    pub fn list() -> Result<Vec<String>, AudioError> {
        let mut names = Vec::new();
        for host_id in cpal::available_hosts() {
            let host = match cpal::host_from_id(host_id) {
                Ok(host) => host,
                Err(e) => {
                    error!(err = %e, host = host_id.name(), "Unable to open host");
                    continue;
                }
            };
            let devices = match host.output_devices() {
                Ok(devices) => devices,
                Err(e) => {
                    error!(err = %e, host = host_id.name(), "Unable to list devices for host");
                    continue;
                }
            };

            for device in devices {
                match device.name() {
                    Ok(name) => names.push(name),
                    Err(e) => warn!(err = %e, host = host_id.name(), "Skipping unnamed device"),
                }
            }
        }
        Ok(names)
    }

    /// Opens the named output device, or the system default for "default".
    pub fn get(name: &str) -> Result<Output, AudioError> {
        let host = cpal::default_host();
        let device = if name == DEFAULT_DEVICE {
            host.default_output_device()
                .ok_or(AudioError::NoDefaultDevice)?
        } else {
            host.output_devices()?
                .find(|device| device.name().is_ok_and(|device_name| device_name == name))
                .ok_or_else(|| AudioError::DeviceNotFound(name.to_string()))?
        };
        let device_name = device.name().unwrap_or_else(|_| name.to_string());

        let supported = device.default_output_config()?;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();
        let sample_rate = config.sample_rate.0;
        let num_channels = config.channels;

        let (source_tx, source_rx) = crossbeam_channel::unbounded();
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let output_thread = thread::spawn(move || {
            run_output_thread(
                device,
                config,
                sample_format,
                source_rx,
                control_rx,
                ready_tx,
            )
        });
        ready_rx.recv().map_err(|_| AudioError::OutputClosed)??;

        info!(
            device = device_name,
            sample_rate, num_channels, "Opened audio output."
        );
        Ok(Output {
            name: device_name,
            sample_rate,
            num_channels,
            source_tx,
            control_tx: Some(control_tx),
            resumed: AtomicBool::new(false),
            routes: Arc::new(AtomicUsize::new(0)),
            output_thread: Some(output_thread),
        })
    }
}

impl super::Output for Output {
    fn resume(&self) -> Result<(), AudioError> {
        if self.resumed.load(Ordering::SeqCst) {
            return Ok(());
        }

        let control_tx = self.control_tx.as_ref().ok_or(AudioError::OutputClosed)?;
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        control_tx
            .send(Control::Resume(reply_tx))
            .map_err(|_| AudioError::OutputClosed)?;
        reply_rx.recv().map_err(|_| AudioError::OutputClosed)??;

        self.resumed.store(true, Ordering::SeqCst);
        info!(device = self.name, "Audio output resumed.");
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn route(&self) -> Route {
        Route::connect(self.routes.clone())
    }

    fn live_routes(&self) -> usize {
        self.routes.load(Ordering::SeqCst)
    }

    fn add_source(&self, source: Box<dyn Source>) {
        if self.source_tx.send(source).is_err() {
            error!(device = self.name, "Audio output is closed, dropping source.");
        }
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        // Closing the control channel ends the output thread, which drops the stream.
        self.control_tx.take();
        if let Some(thread) = self.output_thread.take() {
            let _ = thread.join();
        }
    }
}

/// Builds the stream, reports readiness, then serves control requests until the output is
/// dropped.
fn run_output_thread(
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    source_rx: Receiver<Box<dyn Source>>,
    control_rx: Receiver<Control>,
    ready_tx: Sender<Result<(), AudioError>>,
) {
    let stream = match build_stream(&device, &config, sample_format, source_rx) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));

    for control in control_rx.iter() {
        match control {
            Control::Resume(reply) => {
                let _ = reply.send(stream.play().map_err(AudioError::from));
            }
        }
    }
    debug!("Audio output thread exiting.");
}

fn build_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    source_rx: Receiver<Box<dyn Source>>,
) -> Result<cpal::Stream, AudioError> {
    match sample_format {
        cpal::SampleFormat::F32 => build_typed_stream::<f32>(device, config, source_rx),
        cpal::SampleFormat::I16 => build_typed_stream::<i16>(device, config, source_rx),
        cpal::SampleFormat::I32 => build_typed_stream::<i32>(device, config, source_rx),
        cpal::SampleFormat::U16 => build_typed_stream::<u16>(device, config, source_rx),
        other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    }
}

/// Mixes into an f32 scratch buffer and converts to the device's sample type.
fn build_typed_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    source_rx: Receiver<Box<dyn Source>>,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut mixer = AudioMixer::new(config.channels, config.sample_rate.0);
    let mut scratch: Vec<f32> = Vec::new();

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            while let Ok(source) = source_rx.try_recv() {
                mixer.add_source(source);
            }
            scratch.resize(data.len(), 0.0);
            mixer.process_into(&mut scratch);
            for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
                *dst = T::from_sample(src);
            }
        },
        |err| error!(err = %err, "CPAL output stream error"),
        None,
    )?;
    Ok(stream)
}
