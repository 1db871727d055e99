//! Hardware Parameters
//!
//! Brightness and max current are write-only from the client's point of view:
//! the panel remembers the last value the user set so its labels can show it,
//! and nothing is ever read back from the device.

/// Last locally set hardware parameters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParameterPanel {
    /// Brightness percentage (0-100)
    pub brightness: Option<u8>,
    /// Max LED current in milliamps
    pub max_current: Option<u32>,
}

impl ParameterPanel {
    /// e.g. `"Brightness: 75%"`, `None` until a value is set
    #[must_use]
    pub fn brightness_label(&self) -> Option<String> {
        self.brightness.map(|b| format!("Brightness: {b}%"))
    }

    /// e.g. `"Max current: 500 mA"`, `None` until a value is set
    #[must_use]
    pub fn max_current_label(&self) -> Option<String> {
        self.max_current.map(|c| format!("Max current: {c} mA"))
    }
}
