//! Loading state machine and the border-signal feedback cycle.

/// Whether a load is currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
}

/// Tracks the in-flight load and the navigation generation.
///
/// Cancellation is advisory: bumping the generation invalidates payload
/// delivery for older requests, while their eventual completion is
/// still allowed to settle the loading flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadStateMachine {
    state: LoadState,
    generation: u64,
}

impl LoadStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, LoadState::Loading)
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    /// The generation a request must carry for its payload to still be
    /// authoritative at completion time.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Enters `Loading` if idle. Returns whether the transition
    /// happened; the caller starts visual feedback only in that case.
    pub fn begin(&mut self) -> bool {
        if self.is_loading() {
            return false;
        }

        self.state = LoadState::Loading;
        true
    }

    /// Settles the flag once a request finalizes. Stale completions are
    /// allowed here; they must be filtered at payload delivery instead.
    pub fn finish(&mut self) {
        self.state = LoadState::Idle;
    }

    /// Invalidates any outstanding request and forces `Idle`. Called
    /// when a new primary navigation starts.
    pub fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.state = LoadState::Idle;
    }

    /// Spinner-control override: force the loading indicator on.
    pub fn force_loading(&mut self) {
        self.state = LoadState::Loading;
    }

    /// Spinner-control override: force idle. Idempotent, safe even if
    /// no fetch was ever started.
    pub fn force_idle(&mut self) {
        self.state = LoadState::Idle;
    }

    /// True when a completion for `generation` is still authoritative.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }
}

/// Visual signals shown on the viewer border.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderSignal {
    /// Briefly shown at the start of each feedback interval.
    Busy,
    /// Shown while a load is in flight between busy blinks.
    Active,
    /// Shown once loading stops.
    Idle,
}

impl BorderSignal {
    pub fn color(self) -> &'static str {
        match self {
            Self::Busy => "red",
            Self::Active => "green",
            Self::Idle => "silver",
        }
    }
}

/// Length of one busy/active feedback interval.
pub const CYCLE_INTERVAL_MS: u64 = 800;
/// How long the busy signal holds before reverting to active.
pub const REVERT_DELAY_MS: u64 = 400;

/// Explicit stepper for the feedback cycle.
///
/// The cycle starts on the active signal, then blinks busy for the
/// first `REVERT_DELAY_MS` of every subsequent interval until loading
/// stops. Advancing is driven by elapsed milliseconds so the cycle is
/// testable without timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalCycle {
    running: bool,
    position_ms: u64,
}

impl Default for SignalCycle {
    fn default() -> Self {
        Self::stopped()
    }
}

impl SignalCycle {
    pub fn start() -> Self {
        Self {
            running: true,
            position_ms: 0,
        }
    }

    pub fn stopped() -> Self {
        Self {
            running: false,
            position_ms: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Advances the cycle and returns the signal to display now.
    /// Once `loading` is false the cycle stops and reports `Idle`.
    pub fn advance(&mut self, elapsed_ms: u64, loading: bool) -> BorderSignal {
        if !loading {
            *self = Self::stopped();
            return BorderSignal::Idle;
        }

        if !self.running {
            *self = Self::start();
        }

        self.position_ms = self.position_ms.saturating_add(elapsed_ms);
        if self.position_ms < CYCLE_INTERVAL_MS {
            return BorderSignal::Active;
        }

        if self.position_ms % CYCLE_INTERVAL_MS < REVERT_DELAY_MS {
            BorderSignal::Busy
        } else {
            BorderSignal::Active
        }
    }
}
