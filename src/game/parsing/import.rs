//! Materializes a pre-split chart into the absolute-time object model.
//!
//! One pass over the tick stream. Each tick first applies its inline options
//! (tempo, signature, effect selection, events), then advances six button
//! lane builders and two laser lane builders. Builders only ever look at the
//! current tick and their own carried state.

use std::time::Instant;

use log::{debug, info, warn};

use crate::game::chart::{
    Chart, ChartSettings, ChartStop, EventData, EventObject, HoldObject, LaneHideTogglePoint,
    LaserFlags, LaserObject, NUM_BUTTON_LANES, NUM_LASER_LANES, ObjectId, ObjectState,
    SingleObject, Spin, SpinType, TrackRollBehaviour, ZoomControlPoint, sort_objects,
};
use crate::game::effects::{EffectKind, EffectRegistry, default_button_param};
use crate::game::parsing::error::ImportError;
use crate::game::parsing::ksh::{KshChart, KshTick, leading_float, leading_int, translate_laser_char};
use crate::game::timing::{GridPos, MapTime, TimingChange, TimingPoint, TimingResolver};

/// First FX lane among the six button lanes.
const FX_LANE_BASE: usize = 4;

const GATE_PARAMS: [i16; 6] = [4, 8, 16, 32, 12, 24];
const RETRIGGER_PARAMS: [i16; 5] = [8, 16, 32, 12, 24];

/// Effect picked for an FX lane through `fx-l`/`fx-r`, plus any parameter
/// override still pending for the next chip or hold on that lane.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
struct FxSelection {
    kind: EffectKind,
    params: [Option<i16>; 2],
}

impl FxSelection {
    fn override_params(&self) -> Option<[i16; 2]> {
        self.params[0].map(|p0| [p0, self.params[1].unwrap_or(0)])
    }
}

#[derive(Copy, Clone, Debug)]
struct HoldBuilder {
    start: MapTime,
    ticks: u32,
    /// False for codes that always produce a standalone chip.
    fine_snap: bool,
    effect_kind: EffectKind,
    effect_params: [i16; 2],
    sample_index: Option<u8>,
    /// Hold this one continues after an effect change.
    prev: Option<ObjectId>,
}

impl HoldBuilder {
    #[inline(always)]
    fn is_hold(&self) -> bool {
        self.fine_snap && self.ticks > 0
    }
}

#[derive(Copy, Clone, Debug)]
struct LaserBuilder {
    start: MapTime,
    start_pos: f32,
    /// Longest duration still treated as a slam, from the tempo at start.
    slam_threshold: MapTime,
    extended: bool,
    spin: Option<Spin>,
    prev: Option<ObjectId>,
}

struct ChartBuilder<'a> {
    registry: &'a EffectRegistry,
    resolver: TimingResolver,
    chart: Chart,
    holds: [Option<HoldBuilder>; NUM_BUTTON_LANES],
    fx: [FxSelection; 2],
    lasers: [Option<LaserBuilder>; NUM_LASER_LANES],
    laser_range: [bool; NUM_LASER_LANES],
    sample_index: u8,
}

/// Builds the object model for `ksh`. Fails only when the chart cannot be
/// placed on a timeline; everything else is logged and skipped.
pub fn import_chart(ksh: &KshChart, registry: &EffectRegistry) -> Result<Chart, ImportError> {
    let started = Instant::now();

    let settings = parse_header(ksh, registry)?;
    let tempo = ksh
        .setting("t")
        .ok_or(ImportError::MissingHeader { key: "t" })?;
    let first = TimingPoint::from_bpm(settings.offset, parse_bpm(tempo)?);

    let mut builder = ChartBuilder::new(registry, first, settings);
    let total_ticks = ksh.tick_count();
    let mut seen = 0;
    for (block_index, block) in ksh.blocks.iter().enumerate() {
        let ticks_in_block = block.ticks.len() as u32;
        for (tick_index, tick) in block.ticks.iter().enumerate() {
            seen += 1;
            let pos = GridPos {
                block: block_index as u32,
                tick: tick_index as u32,
                ticks_in_block,
            };
            builder.process_tick(pos, tick, seen == total_ticks)?;
        }
    }

    let chart = builder.finish();
    info!(
        "Imported '{}': {} objects, {} timing points, {} ticks in {:?}",
        chart.settings.title,
        chart.objects.len(),
        chart.timing_points.len(),
        total_ticks,
        started.elapsed()
    );
    Ok(chart)
}

impl<'a> ChartBuilder<'a> {
    fn new(registry: &'a EffectRegistry, first: TimingPoint, settings: ChartSettings) -> Self {
        let chart = Chart {
            settings,
            lane_toggle_points: vec![LaneHideTogglePoint {
                time: 0,
                duration: 1,
            }],
            ..Chart::default()
        };
        Self {
            registry,
            resolver: TimingResolver::new(first),
            chart,
            holds: [None; NUM_BUTTON_LANES],
            fx: [FxSelection::default(); 2],
            lasers: [None; NUM_LASER_LANES],
            laser_range: [false; NUM_LASER_LANES],
            sample_index: 0,
        }
    }

    fn finish(mut self) -> Chart {
        sort_objects(&mut self.chart.objects);
        self.chart.timing_points = self.resolver.into_points();
        self.chart
    }

    fn push(&mut self, object: ObjectState) -> ObjectId {
        self.chart.objects.push(object);
        ObjectId(self.chart.objects.len() - 1)
    }

    fn push_event(&mut self, time: MapTime, data: EventData) {
        self.push(ObjectState::Event(EventObject { time, data }));
    }

    fn process_tick(&mut self, pos: GridPos, tick: &KshTick, last_tick: bool) -> Result<(), ImportError> {
        let time = self.resolver.to_absolute_time(pos);
        let split = self.apply_settings(time, pos, tick)?;

        for lane in 0..NUM_BUTTON_LANES {
            self.update_button_lane(lane, tick.button_lane(lane), time, split[lane], last_tick);
        }

        let spin = if tick.add.starts_with('@') {
            parse_spin(&tick.add, pos)
        } else {
            None
        };
        for lane in 0..NUM_LASER_LANES {
            self.update_laser_lane(lane, tick.laser[lane], time, spin);
        }
        Ok(())
    }

    /// Applies the tick's inline options. Returns, per button lane, whether
    /// an effect change should cut a running hold at this tick.
    fn apply_settings(
        &mut self,
        time: MapTime,
        pos: GridPos,
        tick: &KshTick,
    ) -> Result<[bool; NUM_BUTTON_LANES], ImportError> {
        let mut split = [false; NUM_BUTTON_LANES];

        for (key, value) in &tick.settings {
            match key.as_str() {
                "beat" => {
                    let (numerator, denominator) =
                        parse_beat(value).ok_or_else(|| ImportError::MalformedBeat {
                            block: pos.block as usize,
                            tick: pos.tick as usize,
                            value: value.clone(),
                        })?;
                    self.resolver.insert_or_update(
                        time,
                        pos,
                        TimingChange {
                            numerator: Some(numerator),
                            denominator: Some(denominator),
                            ..TimingChange::default()
                        },
                    );
                }
                "t" => {
                    let bpm = parse_bpm(value)?;
                    self.resolver.insert_or_update(
                        time,
                        pos,
                        TimingChange {
                            beat_duration: Some(60000.0 / bpm),
                            ..TimingChange::default()
                        },
                    );
                }
                "laserrange_l" => self.laser_range[0] = true,
                "laserrange_r" => self.laser_range[1] = true,
                "fx-l" | "fx-r" => {
                    let side = usize::from(key == "fx-r");
                    self.fx[side] = self.parse_fx_selection(value);
                    split[FX_LANE_BASE + side] = true;
                }
                "fx-l_param1" | "fx-r_param1" => {
                    let side = usize::from(key == "fx-r_param1");
                    self.fx[side].params[0] = Some(clamp_param(leading_int(value)));
                    split[FX_LANE_BASE + side] = true;
                }
                "filtertype" => {
                    let kind = self.registry.parse_filter_type(value);
                    self.push_event(time, EventData::LaserEffectType(kind));
                }
                "pfiltergain" => {
                    self.push_event(time, EventData::LaserEffectMix(percent(value)));
                }
                "chokkakuvol" => {
                    self.push_event(time, EventData::SlamVolume(percent(value)));
                }
                "zoom_bottom" | "zoom_top" => {
                    self.chart.zoom_points.push(ZoomControlPoint {
                        time,
                        index: u8::from(key == "zoom_top"),
                        zoom: percent(value),
                    });
                }
                "lane_toggle" => {
                    self.chart.lane_toggle_points.push(LaneHideTogglePoint {
                        time,
                        duration: leading_int(value).max(0) as u32,
                    });
                }
                "tilt" => {
                    self.push_event(time, EventData::TrackRollBehaviour(parse_tilt(value)));
                }
                "fx_sample" => {
                    let index = match self.chart.sample_paths.iter().position(|p| p == value) {
                        Some(index) => index,
                        None => {
                            self.chart.sample_paths.push(value.clone());
                            self.chart.sample_paths.len() - 1
                        }
                    };
                    self.sample_index = u8::try_from(index).unwrap_or(u8::MAX);
                }
                "stop" => {
                    let beat = self.resolver.active().beat_duration;
                    let duration = leading_int(value) as f64 / 192.0 * beat * 4.0;
                    self.chart.chart_stops.push(ChartStop {
                        time,
                        duration: duration as MapTime,
                    });
                }
                _ => {
                    warn!("Unknown chart option at {}:{}: {}", pos.block, pos.tick, key);
                }
            }
        }

        Ok(split)
    }

    /// `Name[;param1[;param2]]`. An empty name clears the selection.
    fn parse_fx_selection(&self, value: &str) -> FxSelection {
        let (name, params) = match value.split_once(';') {
            Some((name, params)) => (name.trim(), Some(params)),
            None => (value.trim(), None),
        };
        if name.is_empty() {
            return FxSelection::default();
        }
        let Some(kind) = self.registry.effect_kind(name) else {
            warn!("Unknown effect name in chart: {name}");
            return FxSelection::default();
        };

        let mut selection = FxSelection {
            kind,
            params: [None; 2],
        };
        if let Some(params) = params {
            match params.split_once(';') {
                Some((a, b)) => {
                    selection.params = [
                        Some(clamp_param(leading_int(a))),
                        Some(clamp_param(leading_int(b))),
                    ];
                }
                None => selection.params[0] = Some(clamp_param(leading_int(params))),
            }
        }
        selection
    }

    fn update_button_lane(&mut self, lane: usize, c: char, time: MapTime, split: bool, last_tick: bool) {
        let mut continues = None;
        if split && self.holds[lane].is_some_and(|h| h.is_hold()) {
            continues = self.emit_button(lane, time);
        }

        match (c, self.holds[lane]) {
            ('0', state) => {
                if state.is_some() {
                    self.emit_button(lane, time);
                }
                if lane >= FX_LANE_BASE {
                    self.fx[lane - FX_LANE_BASE].params = [None; 2];
                }
            }
            (_, None) => {
                self.holds[lane] = Some(self.open_button(lane, c, time, continues));
            }
            (_, Some(state)) if !state.fine_snap => {
                self.emit_button(lane, time);
                self.holds[lane] = Some(self.open_button(lane, c, time, None));
            }
            (_, Some(_)) => {
                if let Some(state) = self.holds[lane].as_mut() {
                    state.ticks += 1;
                }
            }
        }

        if last_tick && self.holds[lane].is_some() {
            self.emit_button(lane, time);
        }
    }

    fn open_button(&self, lane: usize, c: char, time: MapTime, prev: Option<ObjectId>) -> HoldBuilder {
        let mut state = HoldBuilder {
            start: time,
            ticks: 0,
            fine_snap: c != '1',
            effect_kind: EffectKind::None,
            effect_params: [0; 2],
            sample_index: None,
            prev,
        };
        if lane < FX_LANE_BASE {
            return state;
        }

        let fx = self.fx[lane - FX_LANE_BASE];
        state.fine_snap = c != '2' && c != '3';
        let (kind, params) = match c {
            'B' => (EffectKind::Bitcrush, [fx.params[0].unwrap_or(5), 0]),
            'G'..='L' => (EffectKind::Gate, [GATE_PARAMS[c as usize - 'G' as usize], 0]),
            'S'..='W' => (EffectKind::Retrigger, [RETRIGGER_PARAMS[c as usize - 'S' as usize], 0]),
            'Q' => (EffectKind::Phaser, [0, 0]),
            'F' => (EffectKind::Flanger, [5000, 0]),
            'X' => (EffectKind::Wobble, [12, 0]),
            'D' => (EffectKind::SideChain, [0, 0]),
            'A' => (EffectKind::TapeStop, fx.override_params().unwrap_or([50, 0])),
            '3' => {
                state.sample_index = Some(self.sample_index);
                (EffectKind::None, [0, 0])
            }
            _ => (
                fx.kind,
                fx.override_params()
                    .unwrap_or([default_button_param(fx.kind), 0]),
            ),
        };
        state.effect_kind = kind;
        state.effect_params = params;
        state
    }

    /// Closes the lane's builder at `time`. Returns the id when a hold was
    /// produced, so a continuation can link to it.
    fn emit_button(&mut self, lane: usize, time: MapTime) -> Option<ObjectId> {
        let state = self.holds[lane].take()?;
        if !state.is_hold() {
            self.push(ObjectState::Single(SingleObject {
                time: state.start,
                lane,
                sample_index: state.sample_index,
            }));
            return None;
        }

        let id = self.push(ObjectState::Hold(HoldObject {
            time: state.start,
            lane,
            duration: time - state.start,
            effect_kind: state.effect_kind,
            effect_params: state.effect_params,
            prev: state.prev,
            next: None,
        }));
        if let Some(prev) = state.prev
            && let ObjectState::Hold(hold) = &mut self.chart.objects[prev.0]
        {
            hold.next = Some(id);
        }
        Some(id)
    }

    fn update_laser_lane(&mut self, lane: usize, c: char, time: MapTime, spin: Option<Spin>) {
        match c {
            '-' => {
                if self.lasers[lane].take().is_some() {
                    self.laser_range[lane] = false;
                }
            }
            // Duration is measured when the segment closes.
            ':' => {}
            _ => {
                let position = translate_laser_char(c);
                let prev = self.lasers[lane]
                    .take()
                    .map(|state| self.close_laser(lane, state, time, position));

                // Charts place the segment after a slam one tick late.
                let start = match prev.map(|id| self.chart.objects[id.0]) {
                    Some(ObjectState::Laser(slam)) if slam.is_instant() => slam.time,
                    _ => time,
                };
                let beat = self.resolver.active().beat_duration;
                self.lasers[lane] = Some(LaserBuilder {
                    start,
                    start_pos: position,
                    slam_threshold: (beat / 8.0).ceil() as MapTime,
                    extended: self.laser_range[lane],
                    spin,
                    prev,
                });
            }
        }
    }

    fn close_laser(&mut self, lane: usize, state: LaserBuilder, time: MapTime, end_pos: f32) -> ObjectId {
        let duration = time - state.start;
        let mut flags = LaserFlags::empty();
        if state.extended {
            flags |= LaserFlags::EXTENDED;
        }
        let mut spin = None;
        if duration <= state.slam_threshold && end_pos != state.start_pos {
            flags |= LaserFlags::INSTANT;
            spin = state.spin;
        }

        let id = self.push(ObjectState::Laser(LaserObject {
            time: state.start,
            lane,
            duration,
            points: [state.start_pos, end_pos],
            flags,
            spin,
            prev: state.prev,
            next: None,
        }));

        if let Some(prev) = state.prev
            && let ObjectState::Laser(segment) = &mut self.chart.objects[prev.0]
        {
            let actual = state.start - segment.time;
            if segment.duration != actual {
                debug!(
                    "Laser lane {lane}: segment at {} resized {} -> {}",
                    segment.time, segment.duration, actual
                );
                segment.duration = actual;
            }
            segment.next = Some(id);
        }
        id
    }
}

fn parse_header(ksh: &KshChart, registry: &EffectRegistry) -> Result<ChartSettings, ImportError> {
    if ksh.setting("t").is_none() {
        return Err(ImportError::MissingHeader { key: "t" });
    }
    if ksh.setting("o").is_none() {
        return Err(ImportError::MissingHeader { key: "o" });
    }

    let mut settings = ChartSettings {
        laser_effect_mix: 1.0,
        slam_volume: 1.0,
        ..ChartSettings::default()
    };
    for (key, value) in &ksh.settings {
        match key.as_str() {
            "title" => settings.title = value.clone(),
            "artist" => settings.artist = value.clone(),
            "effect" => settings.effector = value.clone(),
            "illustrator" => settings.illustrator = value.clone(),
            "t" => settings.bpm = value.clone(),
            "jacket" => settings.jacket_path = value.clone(),
            "bg" => settings.background = value.clone(),
            "layer" => settings.foreground = value.clone(),
            "m" => match value.split_once(';') {
                Some((no_fx, fx)) => {
                    settings.audio_no_fx = no_fx.to_string();
                    settings.audio_fx = fx.split(';').next().unwrap_or_default().to_string();
                }
                None => settings.audio_no_fx = value.clone(),
            },
            "o" => settings.offset = MapTime::from(leading_int(value)),
            "filtertype" => settings.laser_effect_type = registry.parse_filter_type(value),
            "pfiltergain" => settings.laser_effect_mix = percent(value),
            "chokkakuvol" => settings.slam_volume = percent(value),
            "level" => settings.level = leading_int(value).clamp(0, u8::MAX as i32) as u8,
            "difficulty" => {
                settings.difficulty = match value.as_str() {
                    "challenge" => 1,
                    "extended" => 2,
                    "infinite" => 3,
                    _ => 0,
                };
            }
            "po" => settings.preview_offset = MapTime::from(leading_int(value)),
            "plength" => settings.preview_duration = MapTime::from(leading_int(value)),
            "total" => settings.total = leading_int(value).max(0) as u32,
            _ => debug!("Ignoring chart header {key}={value}"),
        }
    }
    Ok(settings)
}

/// Leading number of a tempo value (`t=120-240` reads as 120).
fn parse_bpm(value: &str) -> Result<f64, ImportError> {
    let bpm = leading_float(value);
    if bpm.is_finite() && bpm > 0.0 {
        Ok(bpm)
    } else {
        Err(ImportError::InvalidTempo {
            value: value.to_string(),
        })
    }
}

fn parse_beat(value: &str) -> Option<(u32, u32)> {
    let (n, d) = value.split_once('/')?;
    let numerator = u32::try_from(leading_int(n)).ok().filter(|&v| v > 0)?;
    let denominator = u32::try_from(leading_int(d)).ok().filter(|&v| v > 0)?;
    Some((numerator, denominator))
}

fn parse_tilt(value: &str) -> TrackRollBehaviour {
    let (mut roll, rest) = match value.find("keep_") {
        Some(at) => (TrackRollBehaviour::KEEP, &value[at + "keep_".len()..]),
        None => (TrackRollBehaviour::empty(), value),
    };
    match rest {
        "normal" => roll |= TrackRollBehaviour::NORMAL,
        "bigger" => roll |= TrackRollBehaviour::BIGGER,
        "biggest" => roll |= TrackRollBehaviour::BIGGEST,
        _ => {}
    }
    roll
}

/// `@<type><speed>`: `(`/`)` full spins, `<`/`>` quarter spins, speed in
/// 192nd notes.
fn parse_spin(add: &str, pos: GridPos) -> Option<Spin> {
    let mut chars = add.strip_prefix('@')?.chars();
    let marker = chars.next();
    let (kind, direction) = match marker {
        Some('(') => (SpinType::Full, -1.0),
        Some(')') => (SpinType::Full, 1.0),
        Some('<') => (SpinType::Quarter, -1.0),
        Some('>') => (SpinType::Quarter, 1.0),
        _ => {
            warn!("Unsupported spin '{}' at {}:{}", add, pos.block, pos.tick);
            return None;
        }
    };
    let digits: String = chars.take_while(char::is_ascii_digit).collect();
    let Ok(speed) = digits.parse::<u32>() else {
        warn!("Spin without speed '{}' at {}:{}", add, pos.block, pos.tick);
        return None;
    };
    let duration = match kind {
        SpinType::Full => speed * 3 / 4,
        SpinType::Quarter => speed,
    };
    Some(Spin {
        kind,
        direction,
        duration,
    })
}

#[inline(always)]
fn percent(value: &str) -> f32 {
    leading_int(value) as f32 / 100.0
}

#[inline(always)]
fn clamp_param(v: i32) -> i16 {
    v.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::parsing::ksh::{KshBlock, KshEffectDefinition};

    fn ksh(header: &[(&str, &str)], blocks: Vec<Vec<KshTick>>) -> KshChart {
        KshChart {
            settings: header
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            blocks: blocks.into_iter().map(|ticks| KshBlock { ticks }).collect(),
            ..KshChart::default()
        }
    }

    fn lines(rows: &[&str]) -> Vec<KshTick> {
        rows.iter().map(|r| KshTick::from_columns(r)).collect()
    }

    fn import(chart: &KshChart) -> Chart {
        let registry = EffectRegistry::from_chart(chart);
        import_chart(chart, &registry).expect("chart imports")
    }

    const HEADER: &[(&str, &str)] = &[("title", "Test"), ("t", "120"), ("o", "0")];

    fn holds(chart: &Chart) -> Vec<HoldObject> {
        chart
            .objects
            .iter()
            .filter_map(|o| match o {
                ObjectState::Hold(h) => Some(*h),
                _ => None,
            })
            .collect()
    }

    fn lasers(chart: &Chart) -> Vec<(ObjectId, LaserObject)> {
        chart
            .ids()
            .filter_map(|id| match chart.object(id) {
                ObjectState::Laser(l) => Some((id, *l)),
                _ => None,
            })
            .collect()
    }

    fn assert_chains_contiguous(chart: &Chart) {
        for obj in &chart.objects {
            let (_, next) = obj.links();
            if let Some(next) = next {
                let next = chart.object(next);
                assert_eq!(
                    next.time(),
                    obj.end_time(),
                    "chain link {obj:?} -> {next:?} is not contiguous"
                );
                assert!(next.links().0.is_some(), "next must link back");
            }
        }
    }

    #[test]
    fn missing_tempo_or_offset_is_an_error() {
        let chart = ksh(&[("o", "0")], vec![lines(&["0000|00|--"])]);
        let err = import_chart(&chart, &EffectRegistry::default()).unwrap_err();
        assert_eq!(err, ImportError::MissingHeader { key: "t" });

        let chart = ksh(&[("t", "120")], vec![lines(&["0000|00|--"])]);
        let err = import_chart(&chart, &EffectRegistry::default()).unwrap_err();
        assert_eq!(err, ImportError::MissingHeader { key: "o" });
    }

    #[test]
    fn invalid_tempo_is_an_error() {
        let chart = ksh(&[("t", "fast"), ("o", "0")], vec![lines(&["0000|00|--"])]);
        assert!(matches!(
            import_chart(&chart, &EffectRegistry::default()),
            Err(ImportError::InvalidTempo { .. })
        ));
    }

    #[test]
    fn malformed_beat_reports_position() {
        let mut ticks = lines(&["0000|00|--", "0000|00|--"]);
        ticks[1] = ticks[1].clone().with_setting("beat", "34");
        let chart = ksh(HEADER, vec![ticks]);
        let err = import_chart(&chart, &EffectRegistry::default()).unwrap_err();
        assert_eq!(
            err,
            ImportError::MalformedBeat {
                block: 0,
                tick: 1,
                value: "34".to_string()
            }
        );
    }

    #[test]
    fn header_metadata() {
        let chart = ksh(
            &[
                ("title", "Song"),
                ("artist", "Someone"),
                ("t", "150"),
                ("o", "-35"),
                ("m", "song_nofx.ogg;song_fx.ogg;extra"),
                ("difficulty", "extended"),
                ("level", "17"),
                ("pfiltergain", "50"),
                ("filtertype", "lpf1"),
            ],
            vec![lines(&["0000|00|--"])],
        );
        let chart = import(&chart);
        let s = &chart.settings;
        assert_eq!(s.title, "Song");
        assert_eq!(s.offset, -35);
        assert_eq!(s.audio_no_fx, "song_nofx.ogg");
        assert_eq!(s.audio_fx, "song_fx.ogg");
        assert_eq!(s.difficulty, 2);
        assert_eq!(s.level, 17);
        assert_eq!(s.laser_effect_mix, 0.5);
        assert_eq!(s.laser_effect_type, EffectKind::LowPassFilter);
        assert_eq!(chart.timing_points[0].time, -35);
        assert_eq!(chart.timing_points[0].beat_duration, 400.0);
    }

    #[test]
    fn first_timing_point_from_header() {
        let chart = import(&ksh(HEADER, vec![lines(&["0000|00|--"])]));
        let tp = chart.timing_points[0];
        assert_eq!(tp.beat_duration, 500.0);
        assert_eq!(tp.numerator, 4);
        assert_eq!(tp.bar_duration(), 2000.0);
        assert_eq!(chart.lane_toggle_points[0], LaneHideTogglePoint { time: 0, duration: 1 });
    }

    #[test]
    fn chips_and_holds() {
        // 4 ticks per block at 120 BPM: 500ms per tick.
        let chart = import(&ksh(
            HEADER,
            vec![
                lines(&["1000|00|--", "0000|00|--", "0200|00|--", "0200|00|--"]),
                lines(&["0000|00|--", "1000|00|--", "1000|00|--", "0000|00|--"]),
            ],
        ));

        let singles: Vec<(MapTime, usize)> = chart
            .objects
            .iter()
            .filter_map(|o| match o {
                ObjectState::Single(s) => Some((s.time, s.lane)),
                _ => None,
            })
            .collect();
        assert_eq!(singles, vec![(0, 0), (2500, 0), (3000, 0)], "repeated '1' codes stay separate chips");

        let holds = holds(&chart);
        assert_eq!(holds.len(), 1);
        assert_eq!((holds[0].time, holds[0].lane, holds[0].duration), (1000, 1, 1000));
    }

    #[test]
    fn single_tick_long_code_is_a_chip() {
        let chart = import(&ksh(HEADER, vec![lines(&["0020|00|--", "0000|00|--"])]));
        assert!(
            matches!(chart.objects[..], [ObjectState::Single(SingleObject { lane: 2, .. })]),
            "a one-tick hold has no duration: {:?}",
            chart.objects
        );
    }

    #[test]
    fn fx_letters_pick_effects() {
        let chart = import(&ksh(
            HEADER,
            vec![lines(&[
                "0000|GB|--",
                "0000|GB|--",
                "0000|00|--",
                "0000|TX|--",
                "0000|TX|--",
                "0000|00|--",
            ])],
        ));
        let effects: Vec<(usize, EffectKind, [i16; 2])> = holds(&chart)
            .iter()
            .map(|h| (h.lane, h.effect_kind, h.effect_params))
            .collect();
        assert_eq!(
            effects,
            vec![
                (4, EffectKind::Gate, [4, 0]),
                (5, EffectKind::Bitcrush, [5, 0]),
                (4, EffectKind::Retrigger, [16, 0]),
                (5, EffectKind::Wobble, [12, 0]),
            ]
        );
    }

    #[test]
    fn fx_param_override_applies_until_lane_idles() {
        let mut ticks = lines(&["0000|B0|--", "0000|B0|--", "0000|00|--", "0000|B0|--", "0000|B0|--", "0000|00|--"]);
        ticks[0] = ticks[0].clone().with_setting("fx-l_param1", "12");
        let chart = import(&ksh(HEADER, vec![ticks]));
        let params: Vec<[i16; 2]> = holds(&chart).iter().map(|h| h.effect_params).collect();
        assert_eq!(params, vec![[12, 0], [5, 0]]);
    }

    #[test]
    fn effect_change_mid_hold_links_a_continuation() {
        let mut ticks = lines(&[
            "0000|10|--",
            "0000|10|--",
            "0000|10|--",
            "0000|10|--",
            "0000|00|--",
            "0000|00|--",
            "0000|00|--",
            "0000|00|--",
        ]);
        ticks[0] = ticks[0].clone().with_setting("fx-l", "Retrigger;16");
        ticks[2] = ticks[2].clone().with_setting("fx-l", "Echo");
        let chart = import(&ksh(HEADER, vec![ticks]));

        let holds = holds(&chart);
        assert_eq!(holds.len(), 2, "{:?}", chart.objects);
        let (first, second) = (holds[0], holds[1]);
        assert_eq!((first.time, first.duration), (0, 500));
        assert_eq!(first.effect_kind, EffectKind::Retrigger);
        assert_eq!(first.effect_params, [16, 0]);
        assert_eq!((second.time, second.duration), (500, 500));
        assert_eq!(second.effect_kind, EffectKind::Echo);
        assert_eq!(first.next, Some(ObjectId(1)));
        assert_eq!(second.prev, Some(ObjectId(0)));
        assert_chains_contiguous(&chart);
    }

    #[test]
    fn selection_on_one_fx_lane_leaves_the_other_intact() {
        let mut ticks = lines(&["0000|11|--", "0000|11|--", "0000|11|--", "0000|11|--", "0000|00|--"]);
        ticks[2] = ticks[2].clone().with_setting("fx-r", "Flanger");
        let chart = import(&ksh(HEADER, vec![ticks]));
        let lanes: Vec<usize> = holds(&chart).iter().map(|h| h.lane).collect();
        assert_eq!(lanes.iter().filter(|&&l| l == 4).count(), 1);
        assert_eq!(lanes.iter().filter(|&&l| l == 5).count(), 2);
    }

    #[test]
    fn custom_effect_selection() {
        let mut chart = ksh(HEADER, vec![lines(&["0000|10|--", "0000|10|--", "0000|00|--"])]);
        chart.blocks[0].ticks[0] = chart.blocks[0].ticks[0].clone().with_setting("fx-l", "MyCrush;3");
        chart.fx_defines.push(KshEffectDefinition {
            name: "MyCrush".to_string(),
            parameters: vec![("type".to_string(), "BitCrusher".to_string())],
        });
        let chart = import(&chart);
        let hold = holds(&chart)[0];
        assert!(matches!(hold.effect_kind, EffectKind::UserDefined(_)));
        assert_eq!(hold.effect_params, [3, 0]);
    }

    #[test]
    fn hold_open_at_chart_end_is_closed() {
        let chart = import(&ksh(HEADER, vec![lines(&["0002|00|--", "0002|00|--", "0002|00|--", "0002|00|--"])]));
        let holds = holds(&chart);
        assert_eq!(holds.len(), 1);
        assert_eq!((holds[0].time, holds[0].duration), (0, 1500));
    }

    #[test]
    fn slam_is_flagged_instant_and_next_segment_aligns() {
        // 32 ticks per block at 120 BPM: 62.5ms per tick, slam threshold 63ms.
        let mut rows = vec!["0000|00|--"; 32];
        rows[0] = "0000|00|0-";
        rows[1] = "0000|00|o-";
        for row in rows.iter_mut().take(8).skip(2) {
            *row = "0000|00|:-";
        }
        rows[8] = "0000|00|o-";
        let mut ticks = lines(&rows);
        ticks[0].add = "@(192".to_string();
        let chart = import(&ksh(HEADER, vec![ticks]));

        let lasers = lasers(&chart);
        assert_eq!(lasers.len(), 2, "{:?}", chart.objects);
        let (slam_id, slam) = lasers[0];
        let (follow_id, follow) = lasers[1];
        assert!(slam.is_instant());
        assert_eq!(slam.points, [0.0, 1.0]);
        assert_eq!(
            slam.spin,
            Some(Spin {
                kind: SpinType::Full,
                direction: -1.0,
                duration: 144
            })
        );
        assert_eq!(follow.time, slam.time, "segment after a slam starts at the slam");
        assert_eq!(follow.duration, 500);
        assert!(!follow.is_instant());
        assert_eq!(slam.next, Some(follow_id));
        assert_eq!(follow.prev, Some(slam_id));
        assert_chains_contiguous(&chart);
    }

    #[test]
    fn slow_sweep_is_not_instant() {
        let mut rows = vec!["0000|00|-:"; 8];
        rows[0] = "0000|00|-0";
        rows[7] = "0000|00|-o";
        let mut ticks = lines(&rows);
        ticks[0] = ticks[0].clone().with_setting("laserrange_r", "2x");
        let chart = import(&ksh(HEADER, vec![ticks]));
        let lasers = lasers(&chart);
        assert_eq!(lasers.len(), 1);
        let (_, sweep) = lasers[0];
        assert_eq!(sweep.lane, 1);
        assert_eq!((sweep.time, sweep.duration), (0, 1750));
        assert!(!sweep.is_instant());
        assert!(sweep.flags.contains(LaserFlags::EXTENDED));
    }

    #[test]
    fn equal_endpoints_are_never_a_slam() {
        let mut rows = vec!["0000|00|--"; 32];
        rows[0] = "0000|00|5-";
        rows[1] = "0000|00|5-";
        let chart = import(&ksh(HEADER, vec![lines(&rows)]));
        let lasers = lasers(&chart);
        assert_eq!(lasers.len(), 1);
        assert!(!lasers[0].1.is_instant());
    }

    #[test]
    fn tempo_change_moves_later_objects() {
        let mut ticks = lines(&["1000|00|--", "0000|00|--", "0100|00|--", "0000|00|--"]);
        ticks[2] = ticks[2].clone().with_setting("t", "240");
        let next = lines(&["0010|00|--", "0000|00|--", "0001|00|--", "0000|00|--"]);
        let chart = import(&ksh(HEADER, vec![ticks, next]));

        let times: Vec<MapTime> = chart
            .objects
            .iter()
            .filter(|o| matches!(o, ObjectState::Single(_)))
            .map(ObjectState::time)
            .collect();
        // Half a 2000ms bar, then half a 1000ms bar, then a 1000ms bar.
        assert_eq!(times, vec![0, 1000, 1500, 2000]);
        assert_eq!(chart.timing_points.len(), 2);
        assert!(chart.timing_points.windows(2).all(|w| w[0].time < w[1].time));
    }

    #[test]
    fn signature_change() {
        let mut ticks = lines(&["1000|00|--"]);
        ticks[0] = ticks[0].clone().with_setting("beat", "3/4");
        let chart = import(&ksh(HEADER, vec![ticks, lines(&["1000|00|--"]), lines(&["0000|00|--"])]));
        assert_eq!(chart.timing_points.len(), 1, "change at an existing point updates it");
        assert_eq!(chart.timing_points[0].numerator, 3);
        assert_eq!(chart.timing_points[0].denominator, 4);
        assert_eq!(chart.objects[1].time(), 1500);
    }

    #[test]
    fn inline_options_produce_events_and_points() {
        let mut ticks = lines(&["0000|00|--", "0000|03|--", "0000|00|--", "0000|00|--"]);
        ticks[0] = ticks[0]
            .clone()
            .with_setting("tilt", "keep_bigger")
            .with_setting("filtertype", "peak")
            .with_setting("chokkakuvol", "40")
            .with_setting("zoom_top", "150")
            .with_setting("lane_toggle", "96")
            .with_setting("what_is_this", "1");
        ticks[1] = ticks[1]
            .clone()
            .with_setting("fx_sample", "clap.wav")
            .with_setting("stop", "48");
        ticks[2] = ticks[2].clone().with_setting("fx_sample", "clap.wav");
        let chart = import(&ksh(HEADER, vec![ticks]));

        let events: Vec<EventData> = chart
            .objects
            .iter()
            .filter_map(|o| match o {
                ObjectState::Event(e) => Some(e.data),
                _ => None,
            })
            .collect();
        assert_eq!(
            events,
            vec![
                EventData::TrackRollBehaviour(TrackRollBehaviour::KEEP | TrackRollBehaviour::BIGGER),
                EventData::LaserEffectType(EffectKind::PeakingFilter),
                EventData::SlamVolume(0.4),
            ]
        );
        assert_eq!(chart.zoom_points, vec![ZoomControlPoint { time: 0, index: 1, zoom: 1.5 }]);
        assert_eq!(chart.lane_toggle_points.len(), 2);
        assert_eq!(chart.lane_toggle_points[1].duration, 96);
        assert_eq!(chart.chart_stops, vec![ChartStop { time: 500, duration: 500 }]);
        assert_eq!(chart.sample_paths, vec!["clap.wav".to_string()]);

        let sampled = chart.objects.iter().find_map(|o| match o {
            ObjectState::Single(s) if s.lane == 5 => Some(s.sample_index),
            _ => None,
        });
        assert_eq!(sampled, Some(Some(0)));
    }

    #[test]
    fn objects_are_time_sorted_with_valid_chains() {
        let mut rows: Vec<&str> = Vec::new();
        for i in 0..64 {
            rows.push(match i % 8 {
                0 => "1002|20|0o",
                1 => "0102|02|o0",
                2 => "0012|B0|:-",
                3 => "0000|B1|:0",
                4 => "1000|00|0:",
                5 => "0100|00|o:",
                6 => "0010|22|::",
                _ => "0001|00|-o",
            });
        }
        let mut blocks: Vec<Vec<KshTick>> = rows.chunks(16).map(lines).collect();
        blocks[1][4] = blocks[1][4].clone().with_setting("t", "173");
        blocks[2][7] = blocks[2][7].clone().with_setting("beat", "7/8");
        blocks[2][9] = blocks[2][9].clone().with_setting("fx-l", "Gate;8");
        let chart = import(&ksh(HEADER, blocks));

        assert!(!chart.objects.is_empty());
        assert!(
            chart.objects.windows(2).all(|w| w[0].time() <= w[1].time()),
            "objects must be sorted by time"
        );
        assert_chains_contiguous(&chart);
        for (_, laser) in lasers(&chart) {
            let beat = chart.timing_point_at(laser.time).beat_duration;
            if laser.is_instant() {
                assert_ne!(laser.points[0], laser.points[1]);
                assert!(laser.next.is_none() || laser.duration <= (beat / 8.0).ceil() as MapTime);
            }
        }
    }
}
