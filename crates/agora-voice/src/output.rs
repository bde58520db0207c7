//! Voice I/O interface

/// Audio transmit control provided by the voice stack
pub trait VoiceOutput {
    fn set_transmit_enabled(&mut self, enabled: bool);

    fn is_currently_transmitting(&self) -> bool;
}

/// In-process voice output: transmits while enabled and the user speaks
#[derive(Debug, Clone, Default)]
pub struct LocalVoiceOutput {
    enabled: bool,
    speaking: bool,
    /// Number of transmit toggles applied
    pub toggles: u64,
}

impl LocalVoiceOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_speaking(&mut self, speaking: bool) {
        self.speaking = speaking;
    }

    pub fn is_transmit_enabled(&self) -> bool {
        self.enabled
    }
}

impl VoiceOutput for LocalVoiceOutput {
    fn set_transmit_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            self.toggles += 1;
        }
        self.enabled = enabled;
    }

    fn is_currently_transmitting(&self) -> bool {
        self.enabled && self.speaking
    }
}
