/// Kind of hardware port on the active audio route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    BuiltInMic,
    BuiltInSpeaker,
    BuiltInReceiver,
    WiredHeadphones,
    WiredHeadsetMic,
    /// Hands-free profile: bidirectional, low bandwidth.
    BluetoothHfp,
    /// Stereo playback profile: output only.
    BluetoothA2dp,
    BluetoothLe,
    UsbAudio,
    LineIn,
    LineOut,
    Other,
}

impl PortKind {
    pub fn is_wireless(&self) -> bool {
        matches!(self, Self::BluetoothHfp | Self::BluetoothA2dp | Self::BluetoothLe)
    }

    /// Whether audio on this output stays out of the room, so it cannot leak
    /// back into the microphone.
    pub fn is_private_monitor(&self) -> bool {
        matches!(
            self,
            Self::WiredHeadphones
                | Self::BluetoothHfp
                | Self::BluetoothA2dp
                | Self::BluetoothLe
                | Self::UsbAudio
                | Self::LineOut
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePort {
    pub id: String,
    pub name: String,
    pub kind: PortKind,
}

/// Snapshot of the active input and output ports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioRoute {
    pub inputs: Vec<RoutePort>,
    pub outputs: Vec<RoutePort>,
}

impl AudioRoute {
    pub fn has_input(&self) -> bool {
        !self.inputs.is_empty()
    }

    pub fn is_wireless_output(&self) -> bool {
        self.outputs.iter().any(|p| p.kind.is_wireless())
    }

    pub fn has_monitoring_output(&self) -> bool {
        self.outputs.iter().any(|p| p.kind.is_private_monitor())
    }
}

/// Sample rate and channel count of a stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamFormat {
    pub sample_rate: f64,
    pub channels: u16,
}

impl StreamFormat {
    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0.0 && self.sample_rate.is_finite() && self.channels > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordPermission {
    Undetermined,
    Denied,
    Granted,
}

/// Session category options requested for simultaneous playback and capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub allow_bluetooth_hfp: bool,
    pub allow_bluetooth_a2dp: bool,
    pub default_to_speaker: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            allow_bluetooth_hfp: true,
            allow_bluetooth_a2dp: true,
            default_to_speaker: false,
        }
    }
}

/// Audio-session interruption notification (e.g. an incoming call).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    Began,
    Ended { should_resume: bool },
}
