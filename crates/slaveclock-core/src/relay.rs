//! Relay outputs for the two excitation lines.
//!
//! Each line is a relay closing A (or B) to the clock's common return. The
//! relay board may be active-low, so "energized" and "pin high" are kept
//! apart: [`OutputPin`] speaks electrical levels, [`RelayLine`] speaks
//! energized / de-energized through its [`ActiveLevel`].
//!
//! Every line is driven to de-energized when it is constructed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

/// Errors raised while switching a relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Writing to the GPIO sysfs tree failed.
    #[error("GPIO{gpio} I/O error at {path}: {source}")]
    Io {
        /// GPIO number being driven.
        gpio: u32,
        /// File that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A simulated pin was told to fail.
    #[error("simulated pin failure on {0}")]
    Simulated(String),
}

/// Digital output pin, in electrical terms.
pub trait OutputPin: Send {
    /// Drive the pin high (logic 1).
    fn set_high(&mut self) -> Result<(), RelayError>;

    /// Drive the pin low (logic 0).
    fn set_low(&mut self) -> Result<(), RelayError>;

    /// Whether the pin was last driven high.
    fn is_set_high(&self) -> bool;

    /// Drive the pin to a specific level.
    fn set_state(&mut self, high: bool) -> Result<(), RelayError> {
        if high { self.set_high() } else { self.set_low() }
    }
}

/// Which electrical level energizes a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveLevel {
    /// Pin high energizes the relay.
    High,
    /// Pin low energizes the relay (typical opto-isolated boards).
    Low,
}

impl ActiveLevel {
    /// Map the `active_high` config flag.
    pub const fn from_active_high(active_high: bool) -> Self {
        if active_high { Self::High } else { Self::Low }
    }

    /// Electrical level that yields the requested relay state.
    pub const fn pin_level(self, energized: bool) -> bool {
        match self {
            Self::High => energized,
            Self::Low => !energized,
        }
    }
}

/// The two switched excitation lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    /// Line A.
    A,
    /// Line B.
    B,
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => f.write_str("A"),
            Self::B => f.write_str("B"),
        }
    }
}

/// A relay on one excitation line.
pub struct RelayLine {
    line: Line,
    level: ActiveLevel,
    pin: Mutex<Box<dyn OutputPin>>,
    energized: AtomicBool,
    activations: AtomicU64,
}

impl fmt::Debug for RelayLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayLine")
            .field("line", &self.line)
            .field("level", &self.level)
            .field("energized", &self.is_on())
            .field("activations", &self.activations())
            .finish_non_exhaustive()
    }
}

impl RelayLine {
    /// Wrap `pin` as the relay for `line` and drive it de-energized.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError`] if the initial off write fails.
    pub fn new(
        line: Line,
        pin: Box<dyn OutputPin>,
        level: ActiveLevel,
    ) -> Result<Self, RelayError> {
        let relay = Self {
            line,
            level,
            pin: Mutex::new(pin),
            energized: AtomicBool::new(false),
            activations: AtomicU64::new(0),
        };
        relay.off()?;
        Ok(relay)
    }

    /// Which line this relay switches.
    pub const fn line(&self) -> Line {
        self.line
    }

    /// Energize the relay.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError`] if the pin write fails.
    pub fn on(&self) -> Result<(), RelayError> {
        self.drive(true)?;
        self.activations.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// De-energize the relay.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError`] if the pin write fails.
    pub fn off(&self) -> Result<(), RelayError> {
        self.drive(false)
    }

    /// Whether the relay is currently energized.
    pub fn is_on(&self) -> bool {
        self.energized.load(Ordering::Acquire)
    }

    /// How many times the relay has been energized.
    pub fn activations(&self) -> u64 {
        self.activations.load(Ordering::Acquire)
    }

    fn drive(&self, energized: bool) -> Result<(), RelayError> {
        let mut pin = self.pin.lock().unwrap_or_else(PoisonError::into_inner);
        pin.set_state(self.level.pin_level(energized))?;
        self.energized.store(energized, Ordering::Release);
        debug!(line = %self.line, energized, "Relay switched");
        Ok(())
    }
}

/// Both excitation relays.
#[derive(Debug)]
pub struct RelayPair {
    a: RelayLine,
    b: RelayLine,
}

impl RelayPair {
    /// Pair up the two relays.
    pub const fn new(a: RelayLine, b: RelayLine) -> Self {
        Self { a, b }
    }

    /// Relay on line A.
    pub const fn a(&self) -> &RelayLine {
        &self.a
    }

    /// Relay on line B.
    pub const fn b(&self) -> &RelayLine {
        &self.b
    }

    /// Whether either relay is energized.
    pub fn any_on(&self) -> bool {
        self.a.is_on() || self.b.is_on()
    }

    /// De-energize both relays.
    ///
    /// Both are attempted even if the first fails; the first error is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError`] if either write fails.
    pub fn all_off(&self) -> Result<(), RelayError> {
        let a = self.a.off();
        let b = self.b.off();
        if let Err(ref e) = a {
            warn!(line = %Line::A, error = %e, "Failed to de-energize relay");
        }
        if let Err(ref e) = b {
            warn!(line = %Line::B, error = %e, "Failed to de-energize relay");
        }
        a.and(b)
    }
}

// ---------------------------------------------------------------------------
// Linux sysfs GPIO
// ---------------------------------------------------------------------------

/// Output pin driven through `/sys/class/gpio`.
#[derive(Debug)]
pub struct SysfsPin {
    gpio: u32,
    value_path: PathBuf,
    high: bool,
}

impl SysfsPin {
    /// Export `gpio` under `root` (if needed) and configure it as an output.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Io`] if export or direction setup fails.
    pub fn open(root: &Path, gpio: u32) -> Result<Self, RelayError> {
        let pin_dir = root.join(format!("gpio{gpio}"));
        if !pin_dir.exists() {
            write_sysfs(gpio, &root.join("export"), &gpio.to_string())?;
        }
        write_sysfs(gpio, &pin_dir.join("direction"), "out")?;
        Ok(Self {
            gpio,
            value_path: pin_dir.join("value"),
            high: false,
        })
    }
}

impl OutputPin for SysfsPin {
    fn set_high(&mut self) -> Result<(), RelayError> {
        write_sysfs(self.gpio, &self.value_path, "1")?;
        self.high = true;
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), RelayError> {
        write_sysfs(self.gpio, &self.value_path, "0")?;
        self.high = false;
        Ok(())
    }

    fn is_set_high(&self) -> bool {
        self.high
    }
}

fn write_sysfs(gpio: u32, path: &Path, value: &str) -> Result<(), RelayError> {
    std::fs::write(path, value).map_err(|source| RelayError::Io {
        gpio,
        path: path.to_path_buf(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Simulated
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SimulatedState {
    high: AtomicBool,
    failing: AtomicBool,
}

/// In-memory pin. Clones share state so a test can keep a handle.
#[derive(Debug, Clone)]
pub struct SimulatedPin {
    name: String,
    state: Arc<SimulatedState>,
}

impl SimulatedPin {
    /// Create a pin that starts low.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(SimulatedState::default()),
        }
    }

    /// Current electrical level.
    pub fn is_high(&self) -> bool {
        self.state.high.load(Ordering::Acquire)
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::Release);
    }

    fn write(&self, high: bool) -> Result<(), RelayError> {
        if self.state.failing.load(Ordering::Acquire) {
            return Err(RelayError::Simulated(self.name.clone()));
        }
        self.state.high.store(high, Ordering::Release);
        Ok(())
    }
}

impl OutputPin for SimulatedPin {
    fn set_high(&mut self) -> Result<(), RelayError> {
        self.write(true)
    }

    fn set_low(&mut self) -> Result<(), RelayError> {
        self.write(false)
    }

    fn is_set_high(&self) -> bool {
        self.is_high()
    }
}

/// Build a relay pair on simulated pins, returning handles to both pins.
///
/// # Errors
///
/// Returns [`RelayError`] only if the initial off write fails, which a
/// fresh simulated pin never does.
pub fn simulated_pair(
    level: ActiveLevel,
) -> Result<(RelayPair, SimulatedPin, SimulatedPin), RelayError> {
    let pin_a = SimulatedPin::new("A");
    let pin_b = SimulatedPin::new("B");
    let pair = RelayPair::new(
        RelayLine::new(Line::A, Box::new(pin_a.clone()), level)?,
        RelayLine::new(Line::B, Box::new(pin_b.clone()), level)?,
    );
    Ok((pair, pin_a, pin_b))
}
