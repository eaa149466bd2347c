//! Picks a display mode for the next refresh period from the cadence
//! preferences of the currently visible layers. The policy restricts which
//! modes are eligible; the content-based selectors score the eligible modes
//! against the layer votes.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

/// Index of a hardware display configuration.
pub type ConfigId = usize;

// Eligible remainder slack when checking whether a layer period is an exact
// multiple of the display period.
const CADENCE_MARGIN_NS: i64 = 800_000;
// Score floor: cadences needing more display frames than this score too low
// to matter.
const MAX_FRAMES_TO_FIT: i64 = 10;
// Acceptable distance from an integer ratio in the legacy selector.
const RATIO_MARGIN: f32 = 0.05;
const FPS_EPSILON: f32 = 0.001;

/// Raw hardware mode description, as reported by the display backend.
#[derive(Clone, Copy, Debug)]
pub struct InputConfig {
    pub config_id: ConfigId,
    pub config_group: i32,
    pub vsync_period: i64,
}

/// One selectable refresh rate.
#[derive(Clone, Debug, PartialEq)]
pub struct RefreshRate {
    pub config_id: ConfigId,
    pub vsync_period: i64,
    pub config_group: i32,
    pub name: String,
    pub fps: f32,
}

impl RefreshRate {
    fn in_policy(&self, min_fps: f32, max_fps: f32) -> bool {
        min_fps - FPS_EPSILON <= self.fps && self.fps <= max_fps + FPS_EPSILON
    }
}

/// Constraints from the policy layer: which mode to prefer by default and
/// the fps band the selector may roam in.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Policy {
    pub default_config: ConfigId,
    pub min_fps: f32,
    pub max_fps: f32,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PolicyError {
    /// The default config is unknown or outside the requested fps range.
    /// State is unchanged on rejection.
    #[error("bad policy value")]
    BadValue,
}

/// How strongly a layer cares about the chosen rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerVoteType {
    NoVote,
    Min,
    Max,
    /// Cadence inferred from observed buffer timestamps.
    Heuristic,
    /// The app named a rate but tolerates approximation.
    ExplicitDefault,
    /// The app named a rate and wants it, or an exact multiple of it.
    ExplicitExactOrMultiple,
}

#[derive(Clone, Debug)]
pub struct LayerRequirement {
    pub name: String,
    pub vote: LayerVoteType,
    pub desired_refresh_rate: f32,
    pub weight: f32,
}

struct SelectorState {
    refresh_rates: BTreeMap<ConfigId, RefreshRate>,
    current: ConfigId,
    policy: Policy,
    // Config ids eligible under the policy, sorted by descending vsync
    // period, i.e. ascending fps. Never empty: the default config always
    // qualifies.
    available: Vec<ConfigId>,
    min_supported: ConfigId,
    max_supported: ConfigId,
}

impl SelectorState {
    fn rate(&self, id: ConfigId) -> &RefreshRate {
        &self.refresh_rates[&id]
    }

    fn rebuild_available(&mut self) {
        let group = self.rate(self.policy.default_config).config_group;
        let mut available: Vec<ConfigId> = self
            .refresh_rates
            .values()
            .filter(|rate| {
                rate.config_group == group
                    && rate.in_policy(self.policy.min_fps, self.policy.max_fps)
            })
            .map(|rate| rate.config_id)
            .collect();
        available.sort_by(|a, b| self.rate(*b).vsync_period.cmp(&self.rate(*a).vsync_period));
        assert!(
            !available.is_empty(),
            "no compatible display configs for default={} min={} max={}",
            self.policy.default_config,
            self.policy.min_fps,
            self.policy.max_fps
        );
        self.available = available;
    }
}

/// Holds the display mode table and serves per-frame mode selection.
pub struct RefreshRateSelector {
    state: Mutex<SelectorState>,
}

impl RefreshRateSelector {
    /// Panics when `configs` is empty or `current` names no config; there is
    /// no meaningful recovery from a display without modes.
    pub fn new(configs: &[InputConfig], current: ConfigId) -> Self {
        assert!(!configs.is_empty(), "display reported no configs");

        let mut refresh_rates = BTreeMap::new();
        for config in configs {
            let fps = 1e9f32 / config.vsync_period as f32;
            refresh_rates.insert(
                config.config_id,
                RefreshRate {
                    config_id: config.config_id,
                    vsync_period: config.vsync_period,
                    config_group: config.config_group,
                    name: format!("{fps:.0}fps"),
                    fps,
                },
            );
        }
        assert!(
            refresh_rates.contains_key(&current),
            "current config {current} is not in the config table"
        );

        let mut by_period: Vec<&RefreshRate> = refresh_rates.values().collect();
        by_period.sort_by(|a, b| b.vsync_period.cmp(&a.vsync_period));
        let min_supported = by_period.first().expect("config table is never empty").config_id;
        let max_supported = by_period.last().expect("config table is never empty").config_id;

        let mut state = SelectorState {
            current,
            policy: Policy {
                default_config: current,
                min_fps: 0.0,
                max_fps: f32::MAX,
            },
            refresh_rates,
            available: Vec::new(),
            min_supported,
            max_supported,
        };
        state.rebuild_available();

        Self {
            state: Mutex::new(state),
        }
    }

    pub fn current_refresh_rate(&self) -> RefreshRate {
        let state = self.state.lock();
        state.rate(state.current).clone()
    }

    pub fn set_current_config_id(&self, config_id: ConfigId) {
        let mut state = self.state.lock();
        assert!(
            state.refresh_rates.contains_key(&config_id),
            "unknown config id {config_id}"
        );
        state.current = config_id;
    }

    pub fn all_refresh_rates(&self) -> Vec<RefreshRate> {
        self.state.lock().refresh_rates.values().cloned().collect()
    }

    pub fn policy(&self) -> Policy {
        self.state.lock().policy
    }

    /// Installs a new policy, or rejects it leaving the old one in place.
    pub fn set_policy(
        &self,
        default_config: ConfigId,
        min_fps: f32,
        max_fps: f32,
    ) -> Result<(), PolicyError> {
        let mut state = self.state.lock();
        let requested = Policy {
            default_config,
            min_fps,
            max_fps,
        };
        if requested == state.policy {
            return Ok(());
        }
        let Some(default_rate) = state.refresh_rates.get(&default_config) else {
            return Err(PolicyError::BadValue);
        };
        if !default_rate.in_policy(min_fps, max_fps) {
            return Err(PolicyError::BadValue);
        }
        state.policy = requested;
        state.rebuild_available();
        debug!(default_config, min_fps, max_fps, "installed refresh rate policy");
        Ok(())
    }

    pub fn is_config_allowed(&self, config_id: ConfigId) -> bool {
        self.state.lock().available.contains(&config_id)
    }

    /// Slowest rate the hardware supports, ignoring the policy.
    pub fn min_supported_refresh_rate(&self) -> RefreshRate {
        let state = self.state.lock();
        state.rate(state.min_supported).clone()
    }

    /// Fastest rate the hardware supports, ignoring the policy.
    pub fn max_supported_refresh_rate(&self) -> RefreshRate {
        let state = self.state.lock();
        state.rate(state.max_supported).clone()
    }

    /// Slowest rate the policy allows.
    pub fn min_refresh_rate_by_policy(&self) -> RefreshRate {
        let state = self.state.lock();
        let id = *state.available.first().expect("available list is never empty");
        state.rate(id).clone()
    }

    /// Fastest rate the policy allows.
    pub fn max_refresh_rate_by_policy(&self) -> RefreshRate {
        let state = self.state.lock();
        let id = *state.available.last().expect("available list is never empty");
        state.rate(id).clone()
    }

    /// Legacy selector: picks the available rate closest to the highest
    /// voted content fps, preferring rates that divide evenly into the
    /// content cadence.
    pub fn refresh_rate_for_content(&self, layers: &[LayerRequirement]) -> RefreshRate {
        let state = self.state.lock();

        let mut content_framerate = 0;
        let mut explicit_content_framerate = 0;
        for layer in layers {
            let desired = layer.desired_refresh_rate.round() as i32;
            if layer.vote == LayerVoteType::ExplicitDefault
                || layer.vote == LayerVoteType::ExplicitExactOrMultiple
            {
                explicit_content_framerate = explicit_content_framerate.max(desired);
            } else {
                content_framerate = content_framerate.max(desired);
            }
        }
        if explicit_content_framerate != 0 {
            content_framerate = explicit_content_framerate;
        } else if content_framerate == 0 {
            content_framerate = state.rate(state.max_supported).fps.round() as i32;
        }

        let nearest = state
            .available
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                let da = (state.rate(**a).fps - content_framerate as f32).abs();
                let db = (state.rate(**b).fps - content_framerate as f32).abs();
                da.partial_cmp(&db).unwrap()
            })
            .map(|(index, _)| index)
            .expect("available list is never empty");

        // Some content aligns better on a faster rate: 45fps content fits
        // 90Hz exactly but not 60Hz. Scan upward for an integer ratio, but
        // keep the nearest rate when nothing aligns.
        let ratio_off = |fps: f32| {
            let ratio = fps / content_framerate as f32;
            (ratio.round() - ratio).abs() > RATIO_MARGIN
        };
        let mut best = nearest;
        if ratio_off(state.rate(state.available[nearest]).fps) {
            for index in nearest..state.available.len() {
                if !ratio_off(state.rate(state.available[index]).fps) {
                    best = index;
                    break;
                }
            }
        }
        state.rate(state.available[best]).clone()
    }

    /// Content-based selector, v2: scores every eligible rate against every
    /// voting layer and returns the best fit.
    pub fn refresh_rate_for_content_v2(&self, layers: &[LayerRequirement]) -> RefreshRate {
        let state = self.state.lock();

        let mut no_vote_layers = 0;
        let mut min_vote_layers = 0;
        let mut max_vote_layers = 0;
        let mut explicit_default_layers = 0;
        let mut explicit_exact_or_multiple_layers = 0;
        for layer in layers {
            match layer.vote {
                LayerVoteType::NoVote => no_vote_layers += 1,
                LayerVoteType::Min => min_vote_layers += 1,
                LayerVoteType::Max => max_vote_layers += 1,
                LayerVoteType::Heuristic => {}
                LayerVoteType::ExplicitDefault => explicit_default_layers += 1,
                LayerVoteType::ExplicitExactOrMultiple => explicit_exact_or_multiple_layers += 1,
            }
        }

        // Only if every layer is passive do we drop to the floor.
        if no_vote_layers + min_vote_layers == layers.len() {
            let id = *state.available.first().expect("available list is never empty");
            return state.rate(id).clone();
        }
        // Max votes win outright unless an explicit vote is in play.
        if max_vote_layers > 0 && explicit_default_layers + explicit_exact_or_multiple_layers == 0 {
            let id = *state.available.last().expect("available list is never empty");
            return state.rate(id).clone();
        }

        let mut scores: Vec<(ConfigId, f32)> =
            state.available.iter().map(|id| (*id, 0.0f32)).collect();

        for layer in layers {
            if matches!(
                layer.vote,
                LayerVoteType::NoVote | LayerVoteType::Min | LayerVoteType::Max
            ) {
                continue;
            }

            // Explicit votes outrank heuristics, and exact-or-multiple votes
            // outrank plain explicit ones.
            let mut weight = layer.weight;
            if explicit_default_layers + explicit_exact_or_multiple_layers > 0
                && layer.vote == LayerVoteType::Heuristic
            {
                weight /= 2.0;
            }
            if explicit_exact_or_multiple_layers > 0
                && matches!(
                    layer.vote,
                    LayerVoteType::Heuristic | LayerVoteType::ExplicitDefault
                )
            {
                weight /= 2.0;
            }

            for (config_id, overall_score) in scores.iter_mut() {
                let display_period = state.rate(*config_id).vsync_period;
                let layer_period = (1e9f32 / layer.desired_refresh_rate).round() as i64;

                // How many display vsyncs one layer frame spans.
                let mut frames_quot = layer_period / display_period;
                let mut frames_rem = layer_period % display_period;
                if frames_rem <= CADENCE_MARGIN_NS
                    || (display_period - frames_rem).abs() <= CADENCE_MARGIN_NS
                {
                    frames_quot += 1;
                    frames_rem = 0;
                }

                let layer_score = if frames_rem == 0 {
                    weight
                } else if frames_quot == 0 {
                    // Layer wants a faster rate than the display offers.
                    weight * (layer_period as f32 / display_period as f32)
                        / (MAX_FRAMES_TO_FIT + 1) as f32
                } else {
                    // Slower than the display: count how many frames until
                    // the cadence drifts out of the margin.
                    let mut diff = (frames_rem - (display_period - frames_rem)).abs();
                    let mut iter = 2;
                    while diff > CADENCE_MARGIN_NS && iter < MAX_FRAMES_TO_FIT {
                        diff -= display_period - diff;
                        iter += 1;
                    }
                    weight / iter as f32
                };

                debug!(
                    layer = %layer.name,
                    rate = %state.rate(*config_id).name,
                    layer_score,
                    "scored layer against rate"
                );
                *overall_score += layer_score;
            }
        }

        // Ascending fps iteration plus a strict comparison: ties go to the
        // slowest qualifying rate.
        let mut max_score = 0.0f32;
        let mut best: Option<ConfigId> = None;
        for (config_id, score) in &scores {
            if *score > max_score {
                max_score = *score;
                best = Some(*config_id);
            }
        }

        match best {
            Some(config_id) => state.rate(config_id).clone(),
            None => state.rate(state.current).clone(),
        }
    }
}
