use crate::game::timing::{JudgementWindows, MapTime};
use log::{info, warn};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

const CONFIG_PATH: &str = "kshcore.ini";

// --- Minimal INI reader ---
#[derive(Debug, Default)]
pub struct SimpleIni {
    sections: HashMap<String, HashMap<String, String>>,
}

impl SimpleIni {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<(), std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        self.parse_str(&content);
        Ok(())
    }

    pub fn parse_str(&mut self, content: &str) {
        self.sections.clear();

        let mut current_section: Option<String> = None;

        for raw_line in content.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            // Section header: [SectionName]
            if line.starts_with('[') && line.ends_with(']') && line.len() >= 2 {
                let name = &line[1..line.len() - 1];
                let section = name.trim().to_string();
                current_section = Some(section.clone());
                self.sections.entry(section).or_default();
                continue;
            }

            // Key/value pair: key=value
            if let Some(eq_idx) = line.find('=') {
                let (key_raw, value_raw) = line.split_at(eq_idx);
                let key = key_raw.trim();
                if key.is_empty() {
                    continue;
                }
                let value = value_raw[1..].trim().to_string();
                let section = current_section.clone().unwrap_or_default();
                self.sections
                    .entry(section)
                    .or_default()
                    .insert(key.to_string(), value);
            }
        }
    }

    pub fn get(&self, section: &str, key: &str) -> Option<String> {
        self.sections.get(section).and_then(|s| s.get(key)).cloned()
    }

    pub fn has(&self, section: &str, key: &str) -> bool {
        self.sections
            .get(section)
            .is_some_and(|s| s.contains_key(key))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    const fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "Off",
            Self::Error => "Error",
            Self::Warn => "Warn",
            Self::Info => "Info",
            Self::Debug => "Debug",
            Self::Trace => "Trace",
        }
    }

    pub const fn as_level_filter(self) -> log::LevelFilter {
        match self {
            Self::Off => log::LevelFilter::Off,
            Self::Error => log::LevelFilter::Error,
            Self::Warn => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::Trace => log::LevelFilter::Trace,
        }
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    pub log_level: LogLevel,
    pub autoplay: bool,
    /// Simulation frame length in ms.
    pub frame_step_ms: MapTime,
    pub pretty_json: bool,
    pub judgement: JudgementWindows,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Warn,
            autoplay: true,
            frame_step_ms: 16,
            pretty_json: true,
            judgement: JudgementWindows::default(),
        }
    }
}

const KNOWN_KEYS: [(&str, &str); 8] = [
    ("Options", "Autoplay"),
    ("Options", "FrameStepMs"),
    ("Options", "LogLevel"),
    ("Options", "PrettyJson"),
    ("Judgement", "GoodWindowMs"),
    ("Judgement", "LaserHitWindowMs"),
    ("Judgement", "LaserMissTimeoutMs"),
    ("Judgement", "PerfectWindowMs"),
];

impl Config {
    /// Reads every known key, falling back to defaults for anything missing
    /// or unparsable.
    pub fn from_ini(conf: &SimpleIni) -> Self {
        let default = Self::default();
        let window = |key: &str, fallback: MapTime| {
            conf.get("Judgement", key)
                .and_then(|v| v.parse::<MapTime>().ok())
                .filter(|&v| v > 0)
                .unwrap_or(fallback)
        };

        let mut judgement = JudgementWindows {
            perfect_ms: window("PerfectWindowMs", default.judgement.perfect_ms),
            good_ms: window("GoodWindowMs", default.judgement.good_ms),
            laser_hit_ms: window("LaserHitWindowMs", default.judgement.laser_hit_ms),
            laser_miss_timeout_ms: window("LaserMissTimeoutMs", default.judgement.laser_miss_timeout_ms),
        };
        if judgement.perfect_ms > judgement.good_ms {
            warn!(
                "PerfectWindowMs ({}) exceeds GoodWindowMs ({}); clamping.",
                judgement.perfect_ms, judgement.good_ms
            );
            judgement.perfect_ms = judgement.good_ms;
        }

        Self {
            log_level: conf
                .get("Options", "LogLevel")
                .and_then(|v| LogLevel::from_str(&v).ok())
                .unwrap_or(default.log_level),
            autoplay: conf
                .get("Options", "Autoplay")
                .and_then(|v| v.parse::<u8>().ok())
                .map_or(default.autoplay, |v| v != 0),
            frame_step_ms: conf
                .get("Options", "FrameStepMs")
                .and_then(|v| v.parse::<MapTime>().ok())
                .filter(|&v| v > 0)
                .unwrap_or(default.frame_step_ms),
            pretty_json: conf
                .get("Options", "PrettyJson")
                .and_then(|v| v.parse::<u8>().ok())
                .map_or(default.pretty_json, |v| v != 0),
            judgement,
        }
    }

    fn to_ini_string(&self) -> String {
        let mut content = String::new();

        // [Options] section - keys in alphabetical order
        content.push_str("[Options]\n");
        content.push_str(&format!("Autoplay={}\n", if self.autoplay { "1" } else { "0" }));
        content.push_str(&format!("FrameStepMs={}\n", self.frame_step_ms));
        content.push_str(&format!("LogLevel={}\n", self.log_level.as_str()));
        content.push_str(&format!(
            "PrettyJson={}\n",
            if self.pretty_json { "1" } else { "0" }
        ));
        content.push('\n');

        content.push_str("[Judgement]\n");
        content.push_str(&format!("GoodWindowMs={}\n", self.judgement.good_ms));
        content.push_str(&format!("LaserHitWindowMs={}\n", self.judgement.laser_hit_ms));
        content.push_str(&format!(
            "LaserMissTimeoutMs={}\n",
            self.judgement.laser_miss_timeout_ms
        ));
        content.push_str(&format!("PerfectWindowMs={}\n", self.judgement.perfect_ms));
        content
    }
}

static CONFIG: std::sync::LazyLock<Mutex<Config>> =
    std::sync::LazyLock::new(|| Mutex::new(Config::default()));

// --- File I/O ---

fn create_default_config_file() -> Result<(), std::io::Error> {
    info!("'{CONFIG_PATH}' not found, creating with default values.");
    std::fs::write(CONFIG_PATH, Config::default().to_ini_string())
}

pub fn load() {
    if !Path::new(CONFIG_PATH).exists()
        && let Err(e) = create_default_config_file()
    {
        warn!("Failed to create default config file: {e}");
    }

    let mut conf = SimpleIni::new();
    match conf.load(CONFIG_PATH) {
        Ok(()) => {
            let cfg = Config::from_ini(&conf);
            *CONFIG.lock().unwrap() = cfg;
            info!("Configuration loaded from '{CONFIG_PATH}'.");

            let missing = KNOWN_KEYS
                .iter()
                .any(|(section, key)| !conf.has(section, key));
            if missing {
                match std::fs::write(CONFIG_PATH, cfg.to_ini_string()) {
                    Ok(()) => info!("'{CONFIG_PATH}' updated with default values for any missing fields."),
                    Err(e) => warn!("Failed to update '{CONFIG_PATH}': {e}"),
                }
            } else {
                info!("Configuration OK; no write needed.");
            }
        }
        Err(e) => {
            warn!("Failed to load '{CONFIG_PATH}': {e}. Using default values.");
        }
    }
}

pub fn get() -> Config {
    *CONFIG.lock().unwrap()
}
