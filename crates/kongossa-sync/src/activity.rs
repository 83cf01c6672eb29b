//! TTU activity clock.
//!
//! Each tunnel carries an energy scalar `rho` that follows its load. From
//! `rho` and a step counter we derive a coherence `phi ∈ [0, 1]`, a damping
//! `gamma = exp(-4 phi)` and a discrete [`Phase`]. The phase picks the
//! refresh interval the sync engine polls at: calm tunnels are polled
//! rarely, hot ones often.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use kongossa_shared::constants::ACTIVITY_STEP_SECS;
use kongossa_shared::TunnelId;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Calm,
    Active,
    Hot,
    Viral,
}

impl Phase {
    /// Upper bounds (exclusive) of the calm, active and hot bands.
    pub const THRESHOLDS: [f64; 3] = [0.3, 0.6, 0.85];

    pub fn from_phi(phi: f64) -> Self {
        if phi.is_nan() || phi < Self::THRESHOLDS[0] {
            Self::Calm
        } else if phi < Self::THRESHOLDS[1] {
            Self::Active
        } else if phi < Self::THRESHOLDS[2] {
            Self::Hot
        } else {
            Self::Viral
        }
    }

    /// Recommended poll interval; shrinks as intensity rises.
    pub fn refresh_interval(&self) -> Duration {
        match self {
            Self::Calm => Duration::from_secs(7),
            Self::Active => Duration::from_secs(5),
            Self::Hot => Duration::from_secs(3),
            Self::Viral => Duration::from_secs(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What drives `rho`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityMode {
    /// Exponential moving average of presence + churn.
    #[default]
    Presence,
    /// Each local event injects energy; every step dissipates it.
    Push,
}

impl FromStr for ActivityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "presence" => Ok(Self::Presence),
            "push" => Ok(Self::Push),
            other => Err(format!("unknown activity mode: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActivityConfig {
    pub mode: ActivityMode,
    /// EMA weight of the previous `rho` in presence mode.
    pub decay: f64,
    /// Energy added per local event in push mode.
    pub injection: f64,
    /// Per-step multiplier in push mode.
    pub dissipation: f64,
    pub rho_max: f64,
    pub base_curvature: f64,
    pub amplitude: f64,
    pub frequency: f64,
    pub steepness: f64,
    pub midpoint: f64,
    /// Signal (participants + new messages) that maps to `rho_max`.
    pub signal_saturation: f64,
    /// Minimum time between two steps of the same clock.
    pub min_step: Duration,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            mode: ActivityMode::Presence,
            decay: 0.98,
            injection: 0.15,
            dissipation: 0.995,
            rho_max: 1.2,
            base_curvature: 10.0,
            amplitude: 5.0,
            frequency: 0.1,
            steepness: 4.0,
            midpoint: 0.5,
            signal_saturation: 10.0,
            min_step: Duration::from_secs(ACTIVITY_STEP_SECS),
        }
    }
}

impl ActivityConfig {
    fn clamp_rho(&self, rho: f64) -> f64 {
        if rho.is_nan() {
            return 0.0;
        }
        rho.clamp(0.0, self.rho_max.max(0.0))
    }
}

// ---------------------------------------------------------------------------
// Pure evaluation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coherence {
    pub phi: f64,
    pub gamma: f64,
    pub phase: Phase,
}

/// Derive coherence from `(rho, tick)`. Deterministic, and `phi`/`gamma`
/// stay in `[0, 1]` / `[e^-4, 1]` whatever the inputs.
pub fn evaluate(config: &ActivityConfig, rho: f64, tick: u64) -> Coherence {
    let rho = config.clamp_rho(rho);
    let curvature = config.base_curvature + config.amplitude * (tick as f64 * config.frequency).sin();
    let raw = 0.5 + 0.5 * (config.steepness * (rho - config.midpoint)).tanh() - curvature / 200.0;
    let phi = if raw.is_nan() { 0.0 } else { raw.clamp(0.0, 1.0) };
    let gamma = (-4.0 * phi).exp();

    Coherence {
        phi,
        gamma,
        phase: Phase::from_phi(phi),
    }
}

// ---------------------------------------------------------------------------
// Per-tunnel clock
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ActivityState {
    pub rho: f64,
    pub tick: u64,
    pub phi: f64,
    pub gamma: f64,
    pub phase: Phase,
    #[serde(skip)]
    pub last_tick: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct ActivityClock {
    config: Arc<ActivityConfig>,
    state: ActivityState,
    pending_signal: f64,
}

impl ActivityClock {
    pub fn new(config: Arc<ActivityConfig>) -> Self {
        let coherence = evaluate(&config, 0.0, 0);
        Self {
            config,
            state: ActivityState {
                rho: 0.0,
                tick: 0,
                phi: coherence.phi,
                gamma: coherence.gamma,
                phase: coherence.phase,
                last_tick: None,
            },
            pending_signal: 0.0,
        }
    }

    pub fn state(&self) -> &ActivityState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    /// Push mode: add energy right away, clamped to `[0, rho_max]`.
    pub fn inject(&mut self, amount: f64) {
        self.state.rho = self.config.clamp_rho(self.state.rho + amount);
    }

    /// Record a local event. Only push mode reacts; in presence mode the
    /// message already reaches the clock through store churn.
    pub fn nudge(&mut self) {
        if self.config.mode == ActivityMode::Push {
            self.inject(self.config.injection);
        }
    }

    /// Messages that arrived since the last step (local or merged).
    pub fn record_churn(&mut self, messages: usize) {
        if self.config.mode == ActivityMode::Presence {
            self.pending_signal += messages as f64;
        }
    }

    /// Advance one step if `min_step` has elapsed since the last one.
    /// `present` is the current participant count. Returns whether a step
    /// happened.
    pub fn step(&mut self, now: Instant, present: usize) -> bool {
        if let Some(last) = self.state.last_tick {
            if now.saturating_duration_since(last) < self.config.min_step {
                return false;
            }
        }

        let cfg = &self.config;
        let rho = match cfg.mode {
            ActivityMode::Presence => {
                let signal = present as f64 + std::mem::take(&mut self.pending_signal);
                let saturation = if cfg.signal_saturation > 0.0 { cfg.signal_saturation } else { 1.0 };
                let normalized = (signal / saturation).clamp(0.0, 1.0) * cfg.rho_max;
                self.state.rho * cfg.decay + (1.0 - cfg.decay) * normalized
            }
            ActivityMode::Push => self.state.rho * cfg.dissipation,
        };

        self.state.rho = cfg.clamp_rho(rho);
        self.state.tick = self.state.tick.wrapping_add(1);
        self.state.last_tick = Some(now);

        let coherence = evaluate(cfg, self.state.rho, self.state.tick);
        self.state.phi = coherence.phi;
        self.state.gamma = coherence.gamma;
        self.state.phase = coherence.phase;
        true
    }
}

// ---------------------------------------------------------------------------
// Node-wide registry
// ---------------------------------------------------------------------------

/// All clocks of a node. Cloning shares the same registry.
#[derive(Clone)]
pub struct ActivityClocks {
    config: Arc<ActivityConfig>,
    clocks: Arc<Mutex<HashMap<TunnelId, ActivityClock>>>,
}

impl ActivityClocks {
    pub fn new(config: ActivityConfig) -> Self {
        Self {
            config: Arc::new(config),
            clocks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &ActivityConfig {
        &self.config
    }

    pub async fn nudge(&self, tunnel: &TunnelId) {
        let mut clocks = self.clocks.lock().await;
        clocks
            .entry(tunnel.clone())
            .or_insert_with(|| ActivityClock::new(self.config.clone()))
            .nudge();
    }

    pub async fn record_churn(&self, churn: &HashMap<TunnelId, usize>) {
        let mut clocks = self.clocks.lock().await;
        for (tunnel, &count) in churn {
            if count == 0 && !clocks.contains_key(tunnel) {
                continue;
            }
            clocks
                .entry(tunnel.clone())
                .or_insert_with(|| ActivityClock::new(self.config.clone()))
                .record_churn(count);
        }
    }

    /// Step every known clock plus any tunnel listed in `present`.
    /// Returns how many clocks actually stepped.
    pub async fn step_all(&self, now: Instant, present: &HashMap<TunnelId, usize>) -> usize {
        let mut clocks = self.clocks.lock().await;
        for tunnel in present.keys() {
            clocks
                .entry(tunnel.clone())
                .or_insert_with(|| ActivityClock::new(self.config.clone()));
        }

        let mut stepped = 0;
        for (tunnel, clock) in clocks.iter_mut() {
            let count = present.get(tunnel).copied().unwrap_or(0);
            let before = clock.phase();
            if clock.step(now, count) {
                stepped += 1;
                if clock.phase() != before {
                    debug!(
                        tunnel = %tunnel,
                        from = ?before,
                        to = ?clock.phase(),
                        rho = clock.state().rho,
                        "tunnel phase changed"
                    );
                }
            }
        }
        stepped
    }

    pub async fn state(&self, tunnel: &TunnelId) -> Option<ActivityState> {
        self.clocks.lock().await.get(tunnel).map(|c| c.state().clone())
    }

    /// Interval of the hottest tunnel; calm when nothing is tracked.
    pub async fn recommended_interval(&self) -> Duration {
        self.clocks
            .lock()
            .await
            .values()
            .map(|c| c.phase().refresh_interval())
            .min()
            .unwrap_or_else(|| Phase::Calm.refresh_interval())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tunnel() -> TunnelId {
        "1d5fa7b32c7096501b6c".parse().unwrap()
    }

    #[test]
    fn test_phase_bands() {
        assert_eq!(Phase::from_phi(0.0), Phase::Calm);
        assert_eq!(Phase::from_phi(0.2999), Phase::Calm);
        assert_eq!(Phase::from_phi(0.3), Phase::Active);
        assert_eq!(Phase::from_phi(0.5999), Phase::Active);
        assert_eq!(Phase::from_phi(0.6), Phase::Hot);
        assert_eq!(Phase::from_phi(0.85), Phase::Viral);
        assert_eq!(Phase::from_phi(1.0), Phase::Viral);
    }

    #[test]
    fn test_refresh_interval_monotonic() {
        let phases = [Phase::Calm, Phase::Active, Phase::Hot, Phase::Viral];
        for pair in phases.windows(2) {
            assert!(pair[0].refresh_interval() > pair[1].refresh_interval());
        }
        for phase in phases {
            let secs = phase.refresh_interval().as_secs();
            assert!((1..=7).contains(&secs));
        }
    }

    #[test]
    fn test_evaluate_deterministic() {
        let cfg = ActivityConfig::default();
        assert_eq!(evaluate(&cfg, 0.7, 42), evaluate(&cfg, 0.7, 42));
    }

    #[test]
    fn test_idle_is_calm_and_saturated_is_viral() {
        let cfg = ActivityConfig::default();
        assert_eq!(evaluate(&cfg, 0.0, 0).phase, Phase::Calm);
        assert_eq!(evaluate(&cfg, cfg.rho_max, 0).phase, Phase::Viral);
    }

    #[test]
    fn test_step_respects_min_interval() {
        let mut clock = ActivityClock::new(Arc::new(ActivityConfig::default()));
        let t0 = Instant::now();
        assert!(clock.step(t0, 3));
        assert!(!clock.step(t0 + Duration::from_secs(1), 3));
        assert!(clock.step(t0 + Duration::from_secs(3), 3));
        assert_eq!(clock.state().tick, 2);
    }

    #[test]
    fn test_presence_raises_then_decays() {
        let mut clock = ActivityClock::new(Arc::new(ActivityConfig::default()));
        let mut now = Instant::now();
        for _ in 0..500 {
            clock.step(now, 10);
            now += Duration::from_secs(3);
        }
        let busy = clock.state().rho;
        assert!(busy > 1.0, "rho = {busy}");
        assert_eq!(clock.phase(), Phase::Viral);

        for _ in 0..500 {
            clock.step(now, 0);
            now += Duration::from_secs(3);
        }
        assert!(clock.state().rho < 0.1);
        assert_eq!(clock.phase(), Phase::Calm);
    }

    #[test]
    fn test_push_injection_and_dissipation() {
        let cfg = ActivityConfig {
            mode: ActivityMode::Push,
            ..ActivityConfig::default()
        };
        let mut clock = ActivityClock::new(Arc::new(cfg));
        for _ in 0..100 {
            clock.nudge();
        }
        assert_eq!(clock.state().rho, 1.2);

        let now = Instant::now();
        clock.step(now, 0);
        assert!((clock.state().rho - 1.2 * 0.995).abs() < 1e-12);
    }

    #[test]
    fn test_presence_nudge_leaves_signal_to_churn() {
        let cfg = Arc::new(ActivityConfig::default());
        let now = Instant::now();

        let mut nudged = ActivityClock::new(cfg.clone());
        nudged.nudge();
        nudged.record_churn(1);
        nudged.step(now, 0);

        let mut merged = ActivityClock::new(cfg);
        merged.record_churn(1);
        merged.step(now, 0);

        assert!(nudged.state().rho > 0.0);
        assert_eq!(nudged.state().rho, merged.state().rho);
    }

    #[tokio::test]
    async fn test_recommended_interval_follows_hottest() {
        let clocks = ActivityClocks::new(ActivityConfig {
            mode: ActivityMode::Push,
            ..ActivityConfig::default()
        });
        assert_eq!(clocks.recommended_interval().await, Duration::from_secs(7));

        for _ in 0..20 {
            clocks.nudge(&tunnel()).await;
        }
        clocks.step_all(Instant::now(), &HashMap::new()).await;
        assert_eq!(clocks.recommended_interval().await, Duration::from_secs(1));
    }

    proptest! {
        #[test]
        fn prop_bounds_hold(rho in proptest::num::f64::ANY, tick in any::<u64>()) {
            let c = evaluate(&ActivityConfig::default(), rho, tick);
            prop_assert!((0.0..=1.0).contains(&c.phi));
            prop_assert!(c.gamma > 0.0 && c.gamma <= 1.0);
            prop_assert_eq!(c.phase, Phase::from_phi(c.phi));
        }

        #[test]
        fn prop_bands_exhaustive(phi in 0.0f64..=1.0) {
            let phase = Phase::from_phi(phi);
            let expected = Phase::THRESHOLDS.iter().filter(|t| phi >= **t).count();
            prop_assert_eq!(phase as usize, expected);
        }

        #[test]
        fn prop_clock_stays_bounded(signals in proptest::collection::vec(0usize..1000, 1..200), push in any::<bool>()) {
            let mode = if push { ActivityMode::Push } else { ActivityMode::Presence };
            let cfg = Arc::new(ActivityConfig { mode, ..ActivityConfig::default() });
            let mut clock = ActivityClock::new(cfg.clone());
            let mut now = Instant::now();
            for s in signals {
                for _ in 0..(s % 7) {
                    clock.nudge();
                }
                clock.step(now, s);
                now += cfg.min_step;
                let st = clock.state();
                prop_assert!(st.rho >= 0.0 && st.rho <= cfg.rho_max);
                prop_assert!((0.0..=1.0).contains(&st.phi));
                prop_assert!(st.gamma > 0.0 && st.gamma <= 1.0);
            }
        }
    }
}
