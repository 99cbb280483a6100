// crates/layercut-engine/src/audio_out.rs
//
// Live audio output over rodio. One sink per playing audio layer; the
// offset slice is cut from the PCM directly instead of relying on sink
// seeking, so scheduling is exact regardless of source support.
//
// The output stream is opened lazily on the first start request: a
// machine without an audio device still edits and exports fine, it just
// plays silently.

use std::collections::HashMap;

use rodio::buffer::SamplesBuffer;
use tracing::warn;
use uuid::Uuid;

use layercut_core::audio::{AudioBuffer, StretchCache};
use layercut_core::error::SessionError;

enum StreamState {
    Untried,
    Open(rodio::OutputStream),
    Failed,
}

pub struct LiveAudioOutput {
    stream:  StreamState,
    sinks:   HashMap<Uuid, rodio::Sink>,
    stretch: StretchCache,
}

impl LiveAudioOutput {
    pub fn new() -> Self {
        Self { stream: StreamState::Untried, sinks: HashMap::new(), stretch: StretchCache::new() }
    }

    fn stream(&mut self) -> Result<&rodio::OutputStream, SessionError> {
        if matches!(self.stream, StreamState::Untried) {
            self.stream = match rodio::OutputStreamBuilder::open_default_stream() {
                Ok(s) => StreamState::Open(s),
                Err(e) => {
                    warn!("[audio] no output device: {e}");
                    StreamState::Failed
                }
            };
        }
        match &self.stream {
            StreamState::Open(s) => Ok(s),
            _ => Err(SessionError::AudioContextUnavailable("no output device".into())),
        }
    }

    /// Schedule `layer`'s buffer from `offset_s` seconds in, at `speed`.
    /// Called by the scheduler at most once per layer per playback session.
    pub fn start_layer(
        &mut self,
        layer:    Uuid,
        buffer:   &AudioBuffer,
        speed:    f32,
        offset_s: f64,
    ) -> Result<(), SessionError> {
        let source = if (speed - 1.0).abs() > 1e-3 {
            self.stretch.get_or_stretch(buffer, speed)
        } else {
            std::sync::Arc::new(buffer.clone())
        };

        let at = ((offset_s.max(0.0)) * source.sample_rate as f64) as usize;
        if at >= source.len_samples() {
            return Ok(()); // offset past the end, nothing to play
        }
        let channels = source.channels().max(1);
        let mut interleaved = Vec::with_capacity((source.len_samples() - at) * channels as usize);
        for i in at..source.len_samples() {
            for plane in &source.planes {
                interleaved.push(plane[i]);
            }
        }
        let rate = source.sample_rate;

        let stream = self.stream()?;
        let sink = rodio::Sink::connect_new(stream.mixer());
        sink.append(SamplesBuffer::new(channels, rate, interleaved));
        sink.play();
        // Replacing an existing sink drops (and silences) the old one.
        self.sinks.insert(layer, sink);
        Ok(())
    }

    pub fn is_started(&self, layer: Uuid) -> bool {
        self.sinks.contains_key(&layer)
    }

    pub fn stop_layer(&mut self, layer: Uuid) {
        self.sinks.remove(&layer);
    }

    /// Stop every playing source. Pause and seek both land here: a seek
    /// invalidates the playback session, so sources are rebuilt from the
    /// new offset on the next tick.
    pub fn stop_all(&mut self) {
        self.sinks.clear();
    }

    /// Drop cached stretch derivatives of a released buffer.
    pub fn purge_stretch(&mut self, buffer_id: Uuid) {
        self.stretch.purge(buffer_id);
    }
}

impl Default for LiveAudioOutput {
    fn default() -> Self {
        Self::new()
    }
}
