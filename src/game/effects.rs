use log::warn;
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::game::parsing::ksh::{KshChart, KshEffectDefinition, leading_float, leading_int};

/// First id handed out to chart-defined effects. Everything below is reserved
/// for built-in kinds.
pub const USER_DEFINED_BASE: u16 = 0x40;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum EffectKind {
    #[default]
    None,
    Retrigger,
    Flanger,
    Phaser,
    Gate,
    TapeStop,
    Bitcrush,
    Wobble,
    SideChain,
    Echo,
    Panning,
    PitchShift,
    LowPassFilter,
    HighPassFilter,
    PeakingFilter,
    UserDefined(u16),
}

const BUILTIN_EFFECTS: [(&str, EffectKind); 15] = [
    ("None", EffectKind::None),
    ("Retrigger", EffectKind::Retrigger),
    ("Flanger", EffectKind::Flanger),
    ("Phaser", EffectKind::Phaser),
    ("Gate", EffectKind::Gate),
    ("TapeStop", EffectKind::TapeStop),
    ("BitCrusher", EffectKind::Bitcrush),
    ("Wobble", EffectKind::Wobble),
    ("SideChain", EffectKind::SideChain),
    ("Echo", EffectKind::Echo),
    ("Panning", EffectKind::Panning),
    ("PitchShift", EffectKind::PitchShift),
    ("LPF", EffectKind::LowPassFilter),
    ("HPF", EffectKind::HighPassFilter),
    ("PEAK", EffectKind::PeakingFilter),
];

/// Looks up one of the built-in effect names. Chart-defined names are not
/// consulted here.
pub fn resolve_builtin(name: &str) -> Option<EffectKind> {
    BUILTIN_EFFECTS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, kind)| *kind)
}

/// The parameter an FX hold carries when the chart did not override it.
pub const fn default_button_param(kind: EffectKind) -> i16 {
    match kind {
        EffectKind::Bitcrush => 4,
        EffectKind::Gate => 8,
        EffectKind::Retrigger => 8,
        EffectKind::Phaser => 2000,
        EffectKind::Flanger => 2000,
        EffectKind::Wobble => 12,
        EffectKind::SideChain => 8,
        EffectKind::TapeStop => 50,
        _ => 0,
    }
}

// --- Name -> kind mapping ---

#[derive(Debug, Clone)]
pub struct EffectTypeMap {
    names: FxHashMap<String, EffectKind>,
    next_custom: u16,
}

impl Default for EffectTypeMap {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl EffectTypeMap {
    pub fn with_builtins() -> Self {
        let names = BUILTIN_EFFECTS
            .iter()
            .map(|(name, kind)| ((*name).to_string(), *kind))
            .collect();
        Self {
            names,
            next_custom: USER_DEFINED_BASE,
        }
    }

    pub fn find(&self, name: &str) -> Option<EffectKind> {
        self.names.get(name).copied()
    }

    /// Returns the kind already mapped to `name`, or assigns the next free
    /// user-defined id. Ids are stable for the lifetime of the map.
    pub fn find_or_register(&mut self, name: &str) -> EffectKind {
        if let Some(kind) = self.find(name) {
            return kind;
        }
        let kind = EffectKind::UserDefined(self.next_custom);
        self.next_custom = self.next_custom.saturating_add(1);
        self.names.insert(name.to_string(), kind);
        kind
    }
}

// --- Parameter tokens ---

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ParamValue {
    Float(f32),
    Ratio(f32),
    Samples(i32),
    Int(i32),
}

impl ParamValue {
    /// Floats and ratios are both fractional values and may be paired in a range.
    fn same_class(self, other: Self) -> bool {
        matches!(
            (self, other),
            (Self::Float(_) | Self::Ratio(_), Self::Float(_) | Self::Ratio(_))
                | (Self::Samples(_), Self::Samples(_))
                | (Self::Int(_), Self::Int(_))
        )
    }

    fn is_fractional(self) -> bool {
        matches!(self, Self::Float(_) | Self::Ratio(_))
    }

    fn as_f32(self) -> f32 {
        match self {
            Self::Float(v) | Self::Ratio(v) => v,
            Self::Samples(v) | Self::Int(v) => v as f32,
        }
    }

    fn as_duration(self) -> EffectDuration {
        match self {
            Self::Float(v) | Self::Ratio(v) => EffectDuration::Rate(v),
            Self::Samples(v) | Self::Int(v) => EffectDuration::Time(v),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ParamToken {
    Single(ParamValue),
    Range(ParamValue, ParamValue),
}

impl ParamToken {
    fn first(self) -> ParamValue {
        match self {
            Self::Single(v) | Self::Range(v, _) => v,
        }
    }

    fn map<T>(self, f: impl Fn(ParamValue) -> T) -> EffectParam<T> {
        match self {
            Self::Single(v) => EffectParam::Scalar(f(v)),
            Self::Range(a, b) => EffectParam::Range(f(a), f(b)),
        }
    }

    fn to_float_param(self) -> EffectParam<f32> {
        self.map(ParamValue::as_f32)
    }

    fn to_duration_param(self) -> EffectParam<EffectDuration> {
        self.map(ParamValue::as_duration)
    }

    fn to_samples_param(self) -> Option<EffectParam<i32>> {
        match self.first() {
            ParamValue::Samples(_) => Some(self.map(|v| match v {
                ParamValue::Samples(n) => n,
                other => other.as_f32() as i32,
            })),
            _ => None,
        }
    }
}

/// Classifies a single parameter value. Checked in order: a '.' makes it a
/// float, a '/' a ratio, a "samples" suffix a sample count, otherwise an int.
pub fn parse_param(text: &str) -> ParamValue {
    let text = text.trim();
    if text.contains('.') {
        ParamValue::Float(leading_float(text) as f32)
    } else if let Some((num, den)) = text.split_once('/') {
        let den = leading_float(den);
        let ratio = if den == 0.0 { 0.0 } else { leading_float(num) / den };
        ParamValue::Ratio(ratio as f32)
    } else if text.contains("samples") {
        ParamValue::Samples(leading_int(text))
    } else {
        ParamValue::Int(leading_int(text))
    }
}

/// Parses a parameter that may be a `low-high` range. The separating dash is
/// searched from the second character on so that a leading sign stays part
/// of the first value.
pub fn parse_token(text: &str) -> ParamToken {
    let split = text
        .get(1..)
        .and_then(|rest| rest.find('-'))
        .map(|i| i + 1);
    match split {
        Some(at) => ParamToken::Range(parse_param(&text[..at]), parse_param(&text[at + 1..])),
        None => ParamToken::Single(parse_param(text)),
    }
}

// --- Effect descriptors ---

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub enum EffectParam<T> {
    Scalar(T),
    Range(T, T),
}

/// Effect periods are either a fraction of a beat or an absolute time in ms.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub enum EffectDuration {
    Rate(f32),
    Time(i32),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum EffectParams {
    None,
    Bitcrush {
        reduction: EffectParam<i32>,
    },
    Gate {
        gate: EffectParam<f32>,
    },
    Retrigger {
        gate: EffectParam<f32>,
        reset: EffectParam<EffectDuration>,
    },
    Echo {
        feedback: EffectParam<f32>,
    },
    Flanger {
        depth: EffectParam<f32>,
    },
    Wobble {
        lo_freq: EffectParam<f32>,
        hi_freq: EffectParam<f32>,
        q: EffectParam<f32>,
    },
    Panning {
        panning: EffectParam<f32>,
    },
    PitchShift {
        amount: EffectParam<f32>,
    },
    Filter {
        freq: EffectParam<f32>,
        q: EffectParam<f32>,
        gain: EffectParam<f32>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AudioEffect {
    pub kind: EffectKind,
    pub duration: EffectParam<EffectDuration>,
    pub mix: EffectParam<f32>,
    pub params: EffectParams,
}

impl AudioEffect {
    /// Factory defaults for a kind. Custom definitions start from these and
    /// only override what they name.
    pub fn default_for(kind: EffectKind) -> Self {
        use EffectParam::{Range, Scalar};
        let mut effect = Self {
            kind,
            duration: Scalar(EffectDuration::Rate(0.25)),
            mix: Range(0.0, 1.0),
            params: EffectParams::None,
        };
        match kind {
            EffectKind::Bitcrush => {
                effect.params = EffectParams::Bitcrush {
                    reduction: Range(0, 45),
                };
            }
            EffectKind::Gate => {
                effect.duration = Scalar(EffectDuration::Rate(0.5));
                effect.params = EffectParams::Gate { gate: Scalar(0.5) };
            }
            EffectKind::Retrigger => {
                effect.duration = Scalar(EffectDuration::Rate(0.125));
                effect.params = EffectParams::Retrigger {
                    gate: Scalar(0.7),
                    reset: Scalar(EffectDuration::Rate(0.5)),
                };
            }
            EffectKind::Echo => {
                effect.params = EffectParams::Echo {
                    feedback: Scalar(0.6),
                };
            }
            EffectKind::Flanger => {
                effect.duration = Scalar(EffectDuration::Rate(2.0));
                effect.params = EffectParams::Flanger {
                    depth: Range(10.0, 40.0),
                };
            }
            EffectKind::Phaser => {
                effect.duration = Scalar(EffectDuration::Rate(0.5));
            }
            EffectKind::Wobble => {
                effect.duration = Scalar(EffectDuration::Rate(1.0 / 12.0));
                effect.params = EffectParams::Wobble {
                    lo_freq: Scalar(500.0),
                    hi_freq: Scalar(20000.0),
                    q: Scalar(1.414),
                };
            }
            EffectKind::TapeStop => {
                effect.duration = Scalar(EffectDuration::Time(50));
            }
            EffectKind::Panning => {
                effect.params = EffectParams::Panning {
                    panning: Scalar(0.0),
                };
            }
            EffectKind::PitchShift => {
                effect.params = EffectParams::PitchShift {
                    amount: Range(0.0, 12.0),
                };
            }
            EffectKind::LowPassFilter => {
                effect.params = EffectParams::Filter {
                    freq: Range(10000.0, 700.0),
                    q: Scalar(1.0),
                    gain: Scalar(0.0),
                };
            }
            EffectKind::HighPassFilter => {
                effect.params = EffectParams::Filter {
                    freq: Range(80.0, 2000.0),
                    q: Scalar(1.0),
                    gain: Scalar(0.0),
                };
            }
            EffectKind::PeakingFilter => {
                effect.params = EffectParams::Filter {
                    freq: Range(80.0, 8000.0),
                    q: Scalar(1.0),
                    gain: Scalar(20.0),
                };
            }
            EffectKind::SideChain | EffectKind::None | EffectKind::UserDefined(_) => {}
        }
        effect
    }
}

/// Builds a chart-defined effect from its `key=value` definition. The `type`
/// key picks the base kind; a definition without a usable type degrades to
/// the `None` effect.
pub fn build_effect(def: &KshEffectDefinition) -> AudioEffect {
    let mut base: Option<AudioEffect> = None;
    let mut params: FxHashMap<&str, ParamToken> = FxHashMap::default();

    for (key, value) in &def.parameters {
        if key == "type" {
            match resolve_builtin(value.trim()) {
                Some(kind) => base = Some(AudioEffect::default_for(kind)),
                None => warn!(
                    "Unknown base effect type '{value}' for custom effect '{}'",
                    def.name
                ),
            }
            continue;
        }
        let token = parse_token(value);
        if let ParamToken::Range(a, b) = token
            && !a.same_class(b)
        {
            warn!(
                "Non matching parameter types in range '{value}' for key '{key}' of effect '{}'",
                def.name
            );
            continue;
        }
        params.insert(key.as_str(), token);
    }

    let Some(mut effect) = base else {
        warn!("Type not set for custom effect '{}'", def.name);
        return AudioEffect::default_for(EffectKind::None);
    };

    let float = |name: &str| params.get(name).map(|t| t.to_float_param());
    let duration = |name: &str| params.get(name).map(|t| t.to_duration_param());

    if let Some(mix) = float("mix") {
        effect.mix = mix;
    }

    match (&mut effect.params, effect.kind) {
        (EffectParams::PitchShift { amount }, _) => {
            if let Some(v) = float("pitch") {
                *amount = v;
            }
        }
        (EffectParams::Bitcrush { reduction }, _) => {
            if let Some(v) = params.get("amount").and_then(|t| t.to_samples_param()) {
                *reduction = v;
            }
        }
        (EffectParams::Echo { feedback }, _) => {
            if let Some(v) = duration("waveLength") {
                effect.duration = v;
            }
            if let Some(v) = float("feedbackLevel") {
                *feedback = v;
            }
        }
        (EffectParams::Flanger { .. }, _) => {
            if let Some(v) = duration("period") {
                effect.duration = v;
            }
        }
        (EffectParams::Gate { gate }, _) => {
            if let Some(v) = duration("waveLength") {
                effect.duration = v;
            }
            if let Some(v) = float("rate") {
                *gate = v;
            }
        }
        (EffectParams::Retrigger { gate, reset }, _) => {
            if let Some(v) = duration("waveLength") {
                effect.duration = v;
            }
            if let Some(v) = float("rate") {
                *gate = v;
            }
            if let Some(v) = duration("updatePeriod") {
                *reset = v;
            }
        }
        (EffectParams::Wobble { lo_freq, hi_freq, q }, _) => {
            if let Some(v) = duration("waveLength") {
                effect.duration = v;
            }
            if let Some(v) = float("loFreq") {
                *lo_freq = v;
            }
            if let Some(v) = float("hiFreq") {
                *hi_freq = v;
            }
            if let Some(v) = float("Q") {
                *q = v;
            }
        }
        (EffectParams::None, EffectKind::TapeStop) => {
            if let Some(v) = duration("speed") {
                effect.duration = v;
            }
        }
        _ => {}
    }

    effect
}

// --- Registry ---

/// Immutable view of every effect and filter name a chart can refer to.
/// Built once from the chart's definitions and handed to the importer.
#[derive(Debug, Clone, Default)]
pub struct EffectRegistry {
    effect_types: EffectTypeMap,
    filter_types: EffectTypeMap,
    custom_effects: FxHashMap<EffectKind, AudioEffect>,
    custom_filters: FxHashMap<EffectKind, AudioEffect>,
}

impl EffectRegistry {
    pub fn from_chart(chart: &KshChart) -> Self {
        let mut registry = Self::default();
        for def in &chart.fx_defines {
            let kind = registry.effect_types.find_or_register(&def.name);
            if !registry.custom_effects.contains_key(&kind) {
                registry.custom_effects.insert(kind, build_effect(def));
            }
        }
        for def in &chart.filter_defines {
            let kind = registry.filter_types.find_or_register(&def.name);
            if !registry.custom_filters.contains_key(&kind) {
                registry.custom_filters.insert(kind, build_effect(def));
            }
        }
        registry
    }

    pub fn effect_kind(&self, name: &str) -> Option<EffectKind> {
        self.effect_types.find(name)
    }

    pub fn custom_effect(&self, kind: EffectKind) -> Option<&AudioEffect> {
        self.custom_effects.get(&kind)
    }

    pub fn custom_filter(&self, kind: EffectKind) -> Option<&AudioEffect> {
        self.custom_filters.get(&kind)
    }

    pub fn custom_effect_count(&self) -> usize {
        self.custom_effects.len()
    }

    /// Resolves a laser filter name. Unknown names warn and map to `None`.
    pub fn parse_filter_type(&self, name: &str) -> EffectKind {
        match name {
            "hpf1" => EffectKind::HighPassFilter,
            "lpf1" => EffectKind::LowPassFilter,
            "fx;bitc" | "bitc" => EffectKind::Bitcrush,
            "peak" => EffectKind::PeakingFilter,
            other => self.filter_types.find(other).unwrap_or_else(|| {
                warn!("Unknown filter type: {other}");
                EffectKind::None
            }),
        }
    }
}
