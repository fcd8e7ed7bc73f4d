use std::path::PathBuf;
use std::sync::Arc;

use kshcore::config;
use kshcore::game::chart::{Chart, ObjectState};
use kshcore::game::effects::EffectRegistry;
use kshcore::game::parsing::{import_chart, ksh::KshChart};
use kshcore::game::playback::Playback;
use kshcore::game::scoring::{ScoreEvent, Scoring};
use log::{error, info};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ObjectCounts {
    singles: usize,
    holds: usize,
    lasers: usize,
    events: usize,
}

#[derive(Debug, Serialize)]
struct RunSummary<'a> {
    title: &'a str,
    artist: &'a str,
    effector: &'a str,
    level: u8,
    difficulty: u8,
    bpm: &'a str,
    timing_points: usize,
    custom_effects: usize,
    objects: ObjectCounts,
    autoplay: bool,
    score: u32,
    max_score: u32,
    max_combo: u32,
    final_combo: u32,
    misses: usize,
    mean_hit_delta: f64,
    end_time: i64,
}

fn counts(chart: &Chart) -> ObjectCounts {
    ObjectCounts {
        singles: chart.count_where(|o| matches!(o, ObjectState::Single(_))),
        holds: chart.count_where(|o| matches!(o, ObjectState::Hold(_))),
        lasers: chart.count_where(|o| matches!(o, ObjectState::Laser(_))),
        events: chart.count_where(|o| matches!(o, ObjectState::Event(_))),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install logger immediately, then set runtime max level from config after loading it.
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Trace)
        .try_init();
    // Startup default when config is missing or malformed.
    log::set_max_level(log::LevelFilter::Warn);

    config::load();
    let cfg = config::get();
    log::set_max_level(cfg.log_level.as_level_filter());

    let Some(path) = std::env::args_os().nth(1).map(PathBuf::from) else {
        error!("Usage: kshcore <chart.json>");
        return Err("missing chart path".into());
    };

    let text = std::fs::read_to_string(&path)?;
    let ksh: KshChart = serde_json::from_str(&text)?;
    info!(
        "Read '{}': {} blocks, {} ticks.",
        path.display(),
        ksh.blocks.len(),
        ksh.tick_count()
    );

    let registry = EffectRegistry::from_chart(&ksh);
    let chart = Arc::new(import_chart(&ksh, &registry)?);

    let start = chart.timing_points.first().map_or(0, |tp| tp.time).min(0);
    let mut scoring = Scoring::new(Arc::clone(&chart), cfg.judgement);
    scoring.autoplay = cfg.autoplay;
    scoring.bind_playback(Playback::new(start));

    let mut misses = 0;
    while !scoring.playback().is_some_and(|p| p.is_finished(&chart)) {
        misses += scoring
            .tick(cfg.frame_step_ms)
            .iter()
            .filter(|e| matches!(e, ScoreEvent::Miss { .. }))
            .count();
    }
    let end_time = scoring.playback().map_or(start, Playback::time);
    info!(
        "Finished at {end_time}ms: {}/{} points, max combo {}.",
        scoring.current_hit_score, scoring.current_max_score, scoring.max_combo
    );

    let settings = &chart.settings;
    let summary = RunSummary {
        title: &settings.title,
        artist: &settings.artist,
        effector: &settings.effector,
        level: settings.level,
        difficulty: settings.difficulty,
        bpm: &settings.bpm,
        timing_points: chart.timing_points.len(),
        custom_effects: registry.custom_effect_count(),
        objects: counts(&chart),
        autoplay: scoring.autoplay,
        score: scoring.current_hit_score,
        max_score: scoring.current_max_score,
        max_combo: scoring.max_combo,
        final_combo: scoring.current_combo,
        misses,
        mean_hit_delta: scoring.mean_hit_delta(),
        end_time,
    };
    let json = if cfg.pretty_json {
        serde_json::to_string_pretty(&summary)?
    } else {
        serde_json::to_string(&summary)?
    };
    println!("{json}");
    Ok(())
}
