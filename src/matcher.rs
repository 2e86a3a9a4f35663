use crate::types::Point;
use pathfinding::{kuhn_munkres::kuhn_munkres_min, matrix::Matrix};

const MAX_DISTANCE: i64 = 1000000;

/// Assign head candidates to animal slots, minimizing the squared
/// displacement from each slot's previous position. Returns one entry
/// per slot; slots left without a candidate get None and the caller
/// falls back to the previous chain.
pub fn assign_candidates(
    candidates: &[Point],
    previous: &[Option<Point>],
    frame_number: u32,
) -> Vec<Option<Point>> {
    let slot_count = previous.len();
    if candidates.len() < slot_count {
        let missing = slot_count - candidates.len();
        for _ in 0..missing {
            metrics::increment_counter!("count.unmatched_animal_slots");
        }
        log::warn!(
            "Frame {}: {} of {} animals detected",
            frame_number,
            candidates.len(),
            slot_count
        );
    }
    if slot_count == 1 {
        return vec![candidates.first().copied()];
    }

    let mut assigned = vec![None; slot_count];
    if candidates.is_empty() {
        return assigned;
    }
    let weights = distance_matrix(candidates, previous);
    let (_, assignment) = kuhn_munkres_min(&weights);
    for (candidate_idx, slot_idx) in assignment.iter().enumerate() {
        if candidate_idx >= candidates.len() || *slot_idx >= slot_count {
            continue;
        }
        assigned[*slot_idx] = Some(candidates[candidate_idx]);
    }
    assigned
}

fn distance(candidate: &Point, previous: Option<&Point>) -> i64 {
    match previous {
        Some(p) => {
            let dx = candidate.x - p.x;
            let dy = candidate.y - p.y;
            (dx * dx + dy * dy) as i64
        }
        None => MAX_DISTANCE,
    }
}

fn distance_matrix(candidates: &[Point], previous: &[Option<Point>]) -> Matrix<i64> {
    let n = candidates.len().max(previous.len());
    let mut distances = Matrix::new(n, n, 0);
    for candidate_idx in 0..n {
        for slot_idx in 0..n {
            let distance_ref = distances.get_mut((candidate_idx, slot_idx)).unwrap();
            *distance_ref = if candidate_idx >= candidates.len() || slot_idx >= previous.len() {
                MAX_DISTANCE
            } else {
                distance(
                    &candidates[candidate_idx],
                    previous[slot_idx].as_ref(),
                )
            }
        }
    }
    distances
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_keep_their_identity() {
        let previous = vec![Some(Point::new(0.0, 0.0)), Some(Point::new(10.0, 10.0))];
        // candidates arrive in swapped order
        let candidates = vec![Point::new(10.2, 10.1), Point::new(0.1, 0.0)];
        let assigned = assign_candidates(&candidates, &previous, 7);
        assert_eq!(assigned[0], Some(Point::new(0.1, 0.0)));
        assert_eq!(assigned[1], Some(Point::new(10.2, 10.1)));
    }

    #[test]
    fn missing_candidate_leaves_the_far_slot_empty() {
        let previous = vec![Some(Point::new(0.0, 0.0)), Some(Point::new(50.0, 50.0))];
        let candidates = vec![Point::new(49.0, 50.0)];
        let assigned = assign_candidates(&candidates, &previous, 7);
        assert_eq!(assigned[0], None);
        assert_eq!(assigned[1], Some(Point::new(49.0, 50.0)));
    }

    #[test]
    fn fresh_slots_take_one_candidate_each() {
        let previous = vec![None, None];
        let candidates = vec![Point::new(1.0, 1.0), Point::new(20.0, 20.0)];
        let assigned = assign_candidates(&candidates, &previous, 0);
        assert!(assigned[0].is_some());
        assert!(assigned[1].is_some());
        assert_ne!(assigned[0], assigned[1]);
    }

    #[test]
    fn single_slot_takes_the_best_candidate() {
        let previous = vec![Some(Point::new(5.0, 5.0))];
        let candidates = vec![Point::new(7.0, 7.0), Point::new(30.0, 30.0)];
        let assigned = assign_candidates(&candidates, &previous, 3);
        assert_eq!(assigned, vec![Some(Point::new(7.0, 7.0))]);
        assert_eq!(assign_candidates(&[], &previous, 4), vec![None]);
    }
}
