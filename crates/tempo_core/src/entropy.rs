//! Controllable entropy source.
//!
//! An [`EntropySequence`] replays a fixed list of values in `[0, 1)`, wrapping
//! around when it reaches the end. Draw `i` is always `values[i % len]`, so a
//! test can assert exact outputs for exact inputs instead of statistical
//! properties over many trials.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::ambient::{self, EntropyOverride};
use crate::error::{HarnessError, Result};

/// Anything that can stand in for the ambient random function.
pub trait EntropySource {
    /// Draw the next value in `[0, 1)`.
    fn draw(&self) -> Result<f64>;
}

/// Replays a pre-programmed sequence of values.
///
/// Clones share the cursor, so a clone handed to code under test and the
/// test's own handle agree on [`EntropySequence::draw_count`].
#[derive(Clone)]
pub struct EntropySequence {
    values: Rc<[f64]>,
    cursor: Rc<Cell<usize>>,
}

impl EntropySequence {
    /// Build a sequence.
    ///
    /// An empty list is accepted; drawing from it fails with
    /// [`HarnessError::EmptySequence`].
    ///
    /// # Errors
    /// [`HarnessError::InvalidArgument`] if any value is not a finite number in `[0, 1)`.
    pub fn new(values: impl Into<Vec<f64>>) -> Result<Self> {
        let values = values.into();
        if let Some((index, bad)) = values
            .iter()
            .enumerate()
            .find(|(_, v)| !(v.is_finite() && (0.0..1.0).contains(*v)))
        {
            return Err(HarnessError::InvalidArgument(format!(
                "entropy value {bad} at index {index} is outside [0, 1)"
            )));
        }
        Ok(Self {
            values: values.into(),
            cursor: Rc::new(Cell::new(0)),
        })
    }

    /// A sequence with no values; every draw fails.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            values: Rc::from(Vec::new()),
            cursor: Rc::new(Cell::new(0)),
        }
    }

    /// Build a sequence and install it as the ambient random function.
    ///
    /// The previous ambient function comes back when the returned guard drops,
    /// including when a test panics.
    pub fn with_sequence(values: impl Into<Vec<f64>>) -> Result<ScopedEntropy> {
        let sequence = Self::new(values)?;
        let guard = ambient::override_entropy(Rc::new(sequence.clone()));
        tracing::debug!(values = sequence.values.len(), "Installed entropy sequence");
        Ok(ScopedEntropy {
            sequence,
            _guard: guard,
        })
    }

    /// Return `values[cursor % len]` and advance the cursor.
    ///
    /// # Errors
    /// [`HarnessError::EmptySequence`] if no values were configured. The
    /// cursor does not move in that case.
    pub fn next(&self) -> Result<f64> {
        if self.values.is_empty() {
            return Err(HarnessError::EmptySequence);
        }
        let cursor = self.cursor.get();
        self.cursor.set(cursor + 1);
        Ok(self.values[cursor % self.values.len()])
    }

    /// Number of successful draws so far.
    #[must_use]
    pub fn draw_count(&self) -> usize {
        self.cursor.get()
    }

    /// Rewind the cursor to the first value.
    pub fn reset(&self) {
        self.cursor.set(0);
    }

    /// The configured values.
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

impl EntropySource for EntropySequence {
    fn draw(&self) -> Result<f64> {
        self.next()
    }
}

impl fmt::Debug for EntropySequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntropySequence")
            .field("values", &self.values)
            .field("draws", &self.cursor.get())
            .finish()
    }
}

/// An [`EntropySequence`] installed as the ambient random function.
///
/// Dereferences to the sequence. Dropping it restores the previous ambient
/// function.
#[must_use = "the sequence is uninstalled as soon as the guard is dropped"]
pub struct ScopedEntropy {
    sequence: EntropySequence,
    _guard: EntropyOverride,
}

impl ScopedEntropy {
    /// Handle to the installed sequence.
    pub fn sequence(&self) -> &EntropySequence {
        &self.sequence
    }
}

impl Deref for ScopedEntropy {
    type Target = EntropySequence;

    fn deref(&self) -> &Self::Target {
        &self.sequence
    }
}

impl fmt::Debug for ScopedEntropy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ScopedEntropy").field(&self.sequence).finish()
    }
}

/// Real entropy used when no override is installed.
pub struct SystemEntropy {
    rng: RefCell<StdRng>,
}

impl SystemEntropy {
    /// Seed from operating-system entropy.
    #[must_use]
    pub fn from_entropy() -> Self {
        Self {
            rng: RefCell::new(StdRng::from_entropy()),
        }
    }

    /// Seed explicitly, for reproducible "real" randomness.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: RefCell::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl EntropySource for SystemEntropy {
    fn draw(&self) -> Result<f64> {
        Ok(self.rng.borrow_mut().gen::<f64>())
    }
}

impl fmt::Debug for SystemEntropy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemEntropy").finish_non_exhaustive()
    }
}
