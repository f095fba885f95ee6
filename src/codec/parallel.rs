//! Parallel map that preserves input order.
//!
//! Each unit reports `(original index, result)`; results are put back into
//! input order before returning, so scheduling is never observable in the
//! output. The first error recorded wins and units that have not started
//! yet are skipped.

use parking_lot::Mutex;
use rayon::prelude::*;

/// Apply `f` to every item on the rayon pool and return results in input order.
pub fn par_map_ordered<T, R, E, F>(items: &[T], f: F) -> Result<Vec<R>, E>
where
    T: Sync,
    R: Send,
    E: Send,
    F: Fn(&T) -> Result<R, E> + Sync + Send,
{
    match items.len() {
        0 => return Ok(Vec::new()),
        1 => return f(&items[0]).map(|r| vec![r]),
        _ => {}
    }

    let first_error: Mutex<Option<E>> = Mutex::new(None);

    let tagged: Vec<(usize, R)> = items
        .par_iter()
        .enumerate()
        .filter_map(|(index, item)| {
            if first_error.lock().is_some() {
                return None;
            }
            match f(item) {
                Ok(result) => Some((index, result)),
                Err(e) => {
                    let mut slot = first_error.lock();
                    if slot.is_none() {
                        *slot = Some(e);
                    }
                    None
                }
            }
        })
        .collect();

    if let Some(e) = first_error.into_inner() {
        return Err(e);
    }

    let mut slots: Vec<Option<R>> = (0..items.len()).map(|_| None).collect();
    for (index, result) in tagged {
        slots[index] = Some(result);
    }
    Ok(slots.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_preserves_order_under_uneven_work() {
        let items: Vec<u64> = (0..64).collect();
        let out = par_map_ordered(&items, |&i| {
            // Later items finish first.
            std::thread::sleep(Duration::from_micros(64 - i));
            Ok::<_, ()>(i * 10)
        })
        .unwrap();
        assert_eq!(out, items.iter().map(|i| i * 10).collect::<Vec<_>>());
    }

    #[test]
    fn test_error_propagates_and_stops_new_work() {
        let items: Vec<usize> = (0..10_000).collect();
        let started = AtomicUsize::new(0);
        let result = par_map_ordered(&items, |&i| {
            started.fetch_add(1, Ordering::SeqCst);
            if i == 0 {
                Err(format!("unit {i} failed"))
            } else {
                std::thread::sleep(Duration::from_micros(50));
                Ok(i)
            }
        });
        assert_eq!(result.unwrap_err(), "unit 0 failed");
        assert!(started.load(Ordering::SeqCst) < items.len());
    }

    #[test]
    fn test_empty_and_single() {
        let empty: Vec<u8> = Vec::new();
        assert!(par_map_ordered(&empty, |&b| Ok::<_, ()>(b)).unwrap().is_empty());
        assert_eq!(par_map_ordered(&[7u8], |&b| Ok::<_, ()>(b + 1)).unwrap(), vec![8]);
    }
}
