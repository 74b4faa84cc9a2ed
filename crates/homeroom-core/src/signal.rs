//! Completion signal catalog and dispatch.
//!
//! Signals are synthesized: [`describe`] turns a [`CompletionSignal`] into a
//! [`SignalDescriptor`] (a list of tones plus an optional visual flourish) and a
//! [`SignalPlayer`] renders it. Only the context that executed a phase
//! completion dispatches; followers observing the resulting state never do.
//!
//! Playback failures are logged and swallowed. The timer never depends on the
//! signal succeeding.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::SignalError;
use crate::timer::Settings;

/// Selectable completion sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompletionSignal {
    #[default]
    Bell,
    Chime,
    Digital,
    Gentle,
    Alarm,
    Silent,
}

impl CompletionSignal {
    pub const ALL: [CompletionSignal; 6] = [
        CompletionSignal::Bell,
        CompletionSignal::Chime,
        CompletionSignal::Digital,
        CompletionSignal::Gentle,
        CompletionSignal::Alarm,
        CompletionSignal::Silent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionSignal::Bell => "bell",
            CompletionSignal::Chime => "chime",
            CompletionSignal::Digital => "digital",
            CompletionSignal::Gentle => "gentle",
            CompletionSignal::Alarm => "alarm",
            CompletionSignal::Silent => "silent",
        }
    }
}

impl std::str::FromStr for CompletionSignal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CompletionSignal::ALL
            .into_iter()
            .find(|signal| signal.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown completion signal: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Square,
    Triangle,
    Sawtooth,
}

/// One synthesized tone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tone {
    pub waveform: Waveform,
    pub frequency_hz: f32,
    /// Start offset from the beginning of the signal.
    pub offset_ms: u32,
    pub duration_ms: u32,
    /// 0.0 .. 1.0, already scaled by the configured volume.
    pub gain: f32,
}

/// Everything a player needs to render one completion signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDescriptor {
    pub signal: CompletionSignal,
    pub tones: Vec<Tone>,
    pub flourish: bool,
}

impl SignalDescriptor {
    /// Total length of the tone sequence.
    pub fn duration_ms(&self) -> u32 {
        self.tones
            .iter()
            .map(|t| t.offset_ms + t.duration_ms)
            .max()
            .unwrap_or(0)
    }

    pub fn is_audible(&self) -> bool {
        self.tones.iter().any(|t| t.gain > 0.0)
    }
}

/// Build the descriptor for a signal. Pure; no I/O.
pub fn describe(signal: CompletionSignal, volume: u8, flourish: bool) -> SignalDescriptor {
    let scale = f32::from(volume.min(100)) / 100.0;
    let tone = |waveform, frequency_hz, offset_ms, duration_ms, gain: f32| Tone {
        waveform,
        frequency_hz,
        offset_ms,
        duration_ms,
        gain: gain * scale,
    };

    let tones = match signal {
        CompletionSignal::Bell => vec![
            tone(Waveform::Sine, 880.0, 0, 600, 0.6),
            tone(Waveform::Sine, 1320.0, 0, 400, 0.25),
        ],
        CompletionSignal::Chime => vec![
            tone(Waveform::Sine, 1046.5, 0, 300, 0.5),
            tone(Waveform::Sine, 1318.5, 180, 300, 0.5),
            tone(Waveform::Sine, 1568.0, 360, 450, 0.5),
        ],
        CompletionSignal::Digital => (0..3)
            .map(|i| tone(Waveform::Square, 1000.0, i * 200, 100, 0.3))
            .collect(),
        CompletionSignal::Gentle => vec![
            tone(Waveform::Triangle, 523.25, 0, 800, 0.4),
            tone(Waveform::Triangle, 659.25, 400, 800, 0.35),
        ],
        CompletionSignal::Alarm => (0..4)
            .map(|i| {
                let freq = if i % 2 == 0 { 880.0 } else { 660.0 };
                tone(Waveform::Sawtooth, freq, i * 150, 150, 0.45)
            })
            .collect(),
        CompletionSignal::Silent => Vec::new(),
    };

    SignalDescriptor {
        signal,
        tones,
        flourish,
    }
}

/// Renders a descriptor. Implementations own the platform audio/visual output.
pub trait SignalPlayer: Send {
    fn play(&mut self, descriptor: &SignalDescriptor) -> Result<(), SignalError>;
}

/// Player that does nothing. Used by headless contexts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPlayer;

impl SignalPlayer for NullPlayer {
    fn play(&mut self, _descriptor: &SignalDescriptor) -> Result<(), SignalError> {
        Ok(())
    }
}

/// Player that records every descriptor it is asked to play.
///
/// Clones share the same log, so a test can keep one handle and give the
/// other to a context.
#[derive(Debug, Default, Clone)]
pub struct RecordingPlayer {
    played: Arc<Mutex<Vec<SignalDescriptor>>>,
    fail: bool,
}

impl RecordingPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A player whose every playback fails after being recorded.
    pub fn failing() -> Self {
        Self {
            played: Arc::default(),
            fail: true,
        }
    }

    pub fn played(&self) -> Vec<SignalDescriptor> {
        self.played
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn count(&self) -> usize {
        self.played.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl SignalPlayer for RecordingPlayer {
    fn play(&mut self, descriptor: &SignalDescriptor) -> Result<(), SignalError> {
        self.played
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(descriptor.clone());
        if self.fail {
            return Err(SignalError::Unavailable("audio blocked".into()));
        }
        Ok(())
    }
}

/// Fires one signal per locally executed completion.
pub struct SignalDispatcher {
    player: Box<dyn SignalPlayer>,
    dispatched: u64,
}

impl SignalDispatcher {
    pub fn new(player: Box<dyn SignalPlayer>) -> Self {
        Self {
            player,
            dispatched: 0,
        }
    }

    /// Describe and play the signal selected in `settings`.
    ///
    /// Returns whether playback succeeded. Failures are logged, never
    /// propagated.
    pub fn dispatch(&mut self, settings: &Settings) -> bool {
        let descriptor = describe(
            settings.completion_signal,
            settings.signal_volume,
            settings.presentation.visual_flourish,
        );
        self.dispatched += 1;
        match self.player.play(&descriptor) {
            Ok(()) => {
                tracing::debug!(signal = descriptor.signal.as_str(), "completion signal played");
                true
            }
            Err(e) => {
                tracing::warn!(signal = descriptor.signal.as_str(), error = %e, "completion signal failed");
                false
            }
        }
    }

    /// Number of dispatch attempts so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }
}

impl std::fmt::Debug for SignalDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalDispatcher")
            .field("dispatched", &self.dispatched)
            .finish_non_exhaustive()
    }
}
