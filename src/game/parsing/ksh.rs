//! Pre-split chart representation handed to the importer.
//!
//! Tokenizing raw chart text into blocks and ticks happens upstream; this
//! module only fixes the shape of that hand-off (and its JSON form) plus the
//! small scalar conversions chart values need.

use serde::{Deserialize, Serialize};

pub const NUM_BUTTON_LANES: usize = 4;
pub const NUM_FX_LANES: usize = 2;
pub const NUM_LASER_LANES: usize = 2;

/// Number of distinct laser positions minus one; position chars map onto
/// `0..=LASER_POSITION_STEPS`.
const LASER_POSITION_STEPS: u32 = 50;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KshChart {
    /// Header `key=value` pairs, in file order.
    pub settings: Vec<(String, String)>,
    pub blocks: Vec<KshBlock>,
    pub fx_defines: Vec<KshEffectDefinition>,
    pub filter_defines: Vec<KshEffectDefinition>,
}

impl KshChart {
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn tick_count(&self) -> usize {
        self.blocks.iter().map(|b| b.ticks.len()).sum()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KshEffectDefinition {
    pub name: String,
    /// Raw `key=value` parameters; `type` names the base effect.
    pub parameters: Vec<(String, String)>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KshBlock {
    pub ticks: Vec<KshTick>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KshTick {
    /// Inline options attached to this tick, in file order.
    pub settings: Vec<(String, String)>,
    pub buttons: [char; NUM_BUTTON_LANES],
    pub fx: [char; NUM_FX_LANES],
    pub laser: [char; NUM_LASER_LANES],
    /// Auxiliary field following the lane columns (spin annotations).
    pub add: String,
}

impl Default for KshTick {
    fn default() -> Self {
        Self {
            settings: Vec::new(),
            buttons: ['0'; NUM_BUTTON_LANES],
            fx: ['0'; NUM_FX_LANES],
            laser: ['-'; NUM_LASER_LANES],
            add: String::new(),
        }
    }
}

impl KshTick {
    /// Builds a tick from a `bbbb|ff|ll` line, the layout charts use.
    /// Missing columns keep their idle defaults.
    pub fn from_columns(line: &str) -> Self {
        let mut tick = Self::default();
        let mut parts = line.splitn(3, '|');
        if let Some(buttons) = parts.next() {
            for (slot, c) in tick.buttons.iter_mut().zip(buttons.chars()) {
                *slot = c;
            }
        }
        if let Some(fx) = parts.next() {
            for (slot, c) in tick.fx.iter_mut().zip(fx.chars()) {
                *slot = c;
            }
        }
        if let Some(rest) = parts.next() {
            let mut chars = rest.chars();
            for slot in tick.laser.iter_mut() {
                if let Some(c) = chars.next() {
                    *slot = c;
                }
            }
            tick.add = chars.as_str().to_string();
        }
        tick
    }

    pub fn with_setting(mut self, key: &str, value: &str) -> Self {
        self.settings.push((key.to_string(), value.to_string()));
        self
    }

    /// Character for one of the six button-style lanes (4 BT then 2 FX).
    pub fn button_lane(&self, lane: usize) -> char {
        if lane < NUM_BUTTON_LANES {
            self.buttons[lane]
        } else {
            self.fx[lane - NUM_BUTTON_LANES]
        }
    }
}

/// Maps a laser position character onto `[0, 1]`.
pub fn translate_laser_char(c: char) -> f32 {
    let index = match c {
        '0'..='9' => c as u32 - '0' as u32,
        'A'..='Z' => c as u32 - 'A' as u32 + 10,
        'a'..='o' => c as u32 - 'a' as u32 + 36,
        _ => 0,
    };
    index as f32 / LASER_POSITION_STEPS as f32
}

/// Integer prefix of `s` (after leading whitespace); 0 when there is none.
pub fn leading_int(s: &str) -> i32 {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == digits_start {
        return 0;
    }
    s[..end]
        .parse::<i64>()
        .map(|v| v.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
        .unwrap_or(0)
}

/// Floating point prefix of `s`; 0.0 when there is none.
pub fn leading_float(s: &str) -> f64 {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    let mut seen_digit = false;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
        seen_digit = true;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
            seen_digit = true;
        }
    }
    if !seen_digit {
        return 0.0;
    }
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            end = exp_end;
        }
    }
    s[..end].parse::<f64>().unwrap_or(0.0)
}
