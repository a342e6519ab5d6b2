//! Example workloads.
//!
//! Small routines that draw from the ambient random function or schedule on
//! the ambient timer, the way application code would. Tests run them under a
//! [`tempo_core::harness::Harness`] to show that their output becomes exact.

use tempo_core::ambient;
use tempo_core::error::{HarnessError, Result};
use tempo_core::operation::{pending_labeled, PendingOperation};

/// Draw `count` scores in `0..100` as `floor(100 * random())`.
pub fn score_from_draws(count: usize) -> Result<Vec<u32>> {
    (0..count)
        .map(|_| ambient::random().map(|r| (r * 100.0).floor() as u32))
        .collect()
}

/// Roll a die with `sides` faces, returning `1..=sides`.
pub fn roll_die(sides: u32) -> Result<u32> {
    if sides == 0 {
        return Err(HarnessError::InvalidArgument("a die needs at least one side".into()));
    }
    let r = ambient::random()?;
    Ok((r * f64::from(sides)).floor() as u32 + 1)
}

/// `true` when the draw falls below `probability`.
pub fn coin_flip(probability: f64) -> Result<bool> {
    Ok(ambient::random()? < probability)
}

/// Fisher-Yates shuffle in place. Draws `len - 1` values.
pub fn shuffle<T>(items: &mut [T]) -> Result<()> {
    for i in (1..items.len()).rev() {
        let r = ambient::random()?;
        let j = ((r * (i + 1) as f64).floor() as usize).min(i);
        items.swap(i, j);
    }
    Ok(())
}

/// Pick from a weighted table with a single draw.
///
/// # Errors
/// [`HarnessError::InvalidArgument`] for an empty table, a negative weight,
/// or weights that sum to zero.
pub fn weighted_pick<T>(table: &[(T, f64)]) -> Result<&T> {
    if table.iter().any(|(_, w)| *w < 0.0 || !w.is_finite()) {
        return Err(HarnessError::InvalidArgument(
            "weights must be finite and non-negative".into(),
        ));
    }
    let total: f64 = table.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return Err(HarnessError::InvalidArgument(
            "weighted table needs a positive total weight".into(),
        ));
    }

    let roll = ambient::random()? * total;
    let mut cumulative = 0.0;
    for (item, weight) in table {
        cumulative += weight;
        if roll < cumulative {
            return Ok(item);
        }
    }
    // Rounding can leave `roll` a hair above the last boundary.
    table
        .iter()
        .rev()
        .find(|(_, w)| *w > 0.0)
        .map(|(item, _)| item)
        .ok_or_else(|| HarnessError::InvalidState("no positive weight found".into()))
}

/// A delay in `[min_ms, max_ms)` from one draw.
pub fn random_delay_ms(min_ms: u64, max_ms: u64) -> Result<u64> {
    if max_ms <= min_ms {
        return Err(HarnessError::InvalidArgument(format!(
            "empty delay range {min_ms}..{max_ms}"
        )));
    }
    let span = (max_ms - min_ms) as f64;
    Ok(min_ms + (ambient::random()? * span).floor() as u64)
}

/// Resolve with `value` after a random delay in `[min_ms, max_ms)`, using the
/// ambient timer.
pub fn delayed_fetch<T: 'static>(
    label: &str,
    value: T,
    min_ms: u64,
    max_ms: u64,
) -> Result<PendingOperation<T>> {
    let delay = random_delay_ms(min_ms, max_ms)?;
    let (operation, resolver) = pending_labeled(Some(label.to_string()));
    ambient::set_timeout(delay, move || {
        resolver.resolve(value);
    });
    tracing::trace!(label, delay, "Scheduled delayed fetch");
    Ok(operation)
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempo_core::harness::Harness;

    #[test]
    fn test_scores_from_known_sequence() {
        let _harness = Harness::with_entropy(vec![0.8, 0.2, 0.42]).unwrap();
        let scores = score_from_draws(3).unwrap();

        assert_eq!(scores, vec![80, 20, 42]);
        assert_eq!(scores.iter().sum::<u32>(), 142);
    }

    #[test]
    fn test_roll_die_bounds() {
        let _harness = Harness::with_entropy(vec![0.0, 0.999_999]).unwrap();
        assert_eq!(roll_die(6).unwrap(), 1);
        assert_eq!(roll_die(6).unwrap(), 6);
        assert!(roll_die(0).is_err());
    }

    #[test]
    fn test_coin_flip_threshold() {
        let _harness = Harness::with_entropy(vec![0.49, 0.5]).unwrap();
        assert!(coin_flip(0.5).unwrap());
        assert!(!coin_flip(0.5).unwrap());
    }

    #[test]
    fn test_shuffle_is_exact_for_sequence() {
        let harness = Harness::with_entropy(vec![0.0]).unwrap();
        let mut items = vec![1, 2, 3, 4];
        shuffle(&mut items).unwrap();

        // j = 0 every step: swap(3,0), swap(2,0), swap(1,0).
        assert_eq!(items, vec![2, 3, 4, 1]);
        assert_eq!(harness.entropy().draw_count(), 3);
    }

    #[test]
    fn test_shuffle_with_high_draws_keeps_order() {
        let _harness = Harness::with_entropy(vec![0.99]).unwrap();
        let mut items = vec!['a', 'b', 'c'];
        shuffle(&mut items).unwrap();
        assert_eq!(items, vec!['a', 'b', 'c']);
    }

    #[test]
    fn test_weighted_pick_boundaries() {
        let table = [("common", 70.0), ("rare", 25.0), ("legendary", 5.0)];
        let _harness = Harness::with_entropy(vec![0.1, 0.7, 0.96]).unwrap();

        assert_eq!(*weighted_pick(&table).unwrap(), "common");
        assert_eq!(*weighted_pick(&table).unwrap(), "rare");
        assert_eq!(*weighted_pick(&table).unwrap(), "legendary");
    }

    #[test]
    fn test_weighted_pick_rejects_bad_tables() {
        let _harness = Harness::with_entropy(vec![0.5]).unwrap();
        let empty: [(&str, f64); 0] = [];
        assert!(weighted_pick(&empty).is_err());
        assert!(weighted_pick(&[("x", 0.0)]).is_err());
        assert!(weighted_pick(&[("x", -1.0), ("y", 2.0)]).is_err());
    }

    #[test]
    fn test_random_delay_range() {
        let _harness = Harness::with_entropy(vec![0.5]).unwrap();
        assert_eq!(random_delay_ms(100, 300).unwrap(), 200);
        assert!(random_delay_ms(5, 5).is_err());
    }

    #[test]
    fn test_delayed_fetch_settles_on_virtual_time() {
        let harness = Harness::with_entropy(vec![0.25]).unwrap();
        let op = delayed_fetch("user", 42, 0, 400).unwrap();

        harness.clock().advance(99).unwrap();
        assert!(op.is_pending());
        harness.clock().advance(1).unwrap();
        assert_eq!(op.value(), Some(42));
    }
}
