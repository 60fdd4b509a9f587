use log::trace;

use crate::{
    misc::FloatingPoint,
    polyline::{Polyline, TracePoint},
    solve::SolverOptions,
};

/// How a popped fragment's endpoint pairs with a partner's endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum JoinMode {
    TailHead,
    TailTail,
    HeadHead,
    HeadTail,
}

/// Merge curve fragments produced on the two sides of the splitting
/// hyperplane `axis = value` into longer polylines.
///
/// Two fragments join when each contributes an endpoint lying on the plane
/// and the two endpoints coincide within tolerance. Endpoints that stand in
/// for collapsed sub-tolerance boxes carry a widened tolerance, since their
/// position is only known to subdivision accuracy. Fragments whose ends meet
/// each other are recognized as closed loops and emitted as-is.
pub fn stitch_across<T: FloatingPoint>(
    left: Vec<Polyline<T>>,
    right: Vec<Polyline<T>>,
    axis: usize,
    value: T,
    options: &SolverOptions<T>,
) -> Vec<Polyline<T>> {
    let strict = options.numeric_tolerance * T::from_f64(10.0).unwrap();
    let relaxed = options.subdivision_tolerance * T::from_f64(2.0).unwrap();
    let endpoint_tolerance = |p: &TracePoint<T>| {
        if p.is_midpoint() && options.relaxed_midpoint_merge {
            relaxed
        } else {
            strict
        }
    };
    let on_plane =
        |p: &TracePoint<T>| (p.coords()[axis] - value).abs() <= endpoint_tolerance(p);
    let matches = |a: &TracePoint<T>, b: &TracePoint<T>| {
        on_plane(a) && on_plane(b) && a.distance_to(b) <= endpoint_tolerance(a).max(endpoint_tolerance(b))
    };

    let mut worklist: Vec<Polyline<T>> = left
        .into_iter()
        .chain(right)
        .filter(|p| !p.is_empty())
        .collect();
    let mut finished = Vec::new();

    while let Some(mut current) = worklist.pop() {
        if current.is_closed(strict) {
            finished.push(current);
            continue;
        }

        let found = worklist.iter().enumerate().find_map(|(i, other)| {
            let head = current.first().unwrap();
            let tail = current.last().unwrap();
            let other_head = other.first().unwrap();
            let other_tail = other.last().unwrap();
            if matches(tail, other_head) {
                Some((i, JoinMode::TailHead))
            } else if matches(tail, other_tail) {
                Some((i, JoinMode::TailTail))
            } else if matches(head, other_head) {
                Some((i, JoinMode::HeadHead))
            } else if matches(head, other_tail) {
                Some((i, JoinMode::HeadTail))
            } else {
                None
            }
        });

        match found {
            Some((i, mode)) => {
                let mut partner = worklist.swap_remove(i);
                trace!("joining fragments ({:?})", mode);
                match mode {
                    JoinMode::TailHead => append(&mut current, partner),
                    JoinMode::TailTail => {
                        partner.reverse();
                        append(&mut current, partner);
                    }
                    JoinMode::HeadHead => {
                        current.reverse();
                        append(&mut current, partner);
                    }
                    JoinMode::HeadTail => {
                        std::mem::swap(&mut current, &mut partner);
                        append(&mut current, partner);
                    }
                }
                worklist.push(current);
            }
            None => finished.push(current),
        }
    }
    finished
}

/// Append `partner` to `current`, dropping the duplicated junction point. A
/// single-point partner is kept instead; it becomes the new merge-capable
/// endpoint.
fn append<T: FloatingPoint>(current: &mut Polyline<T>, partner: Polyline<T>) {
    if partner.len() <= 1 {
        if let Some(p) = partner.first() {
            current.push(p.clone());
        }
    } else {
        current.extend_dropping_first(partner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    fn pt(x: f64, y: f64) -> TracePoint<f64> {
        TracePoint::new(DVector::from_vec(vec![x, y]))
    }

    fn mid(x: f64, y: f64) -> TracePoint<f64> {
        TracePoint::subdivision_midpoint(DVector::from_vec(vec![x, y]))
    }

    #[test]
    fn fragments_meeting_on_the_plane_are_joined() {
        let a = Polyline::new(vec![pt(0.2, 0.2), pt(0.5, 0.5)]);
        let b = Polyline::new(vec![pt(0.5, 0.5), pt(0.8, 0.8)]);
        let out = stitch_across(vec![a], vec![b], 0, 0.5, &SolverOptions::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), 3);
    }

    #[test]
    fn reversed_fragments_are_joined_too() {
        let a = Polyline::new(vec![pt(0.2, 0.2), pt(0.5, 0.5)]);
        let b = Polyline::new(vec![pt(0.8, 0.8), pt(0.5, 0.5)]);
        let out = stitch_across(vec![a], vec![b], 0, 0.5, &SolverOptions::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), 3);
        let first = out[0].first().unwrap().coords()[0];
        let last = out[0].last().unwrap().coords()[0];
        assert!((first - 0.2).abs() < 1e-12 || (first - 0.8).abs() < 1e-12);
        assert!((last - 0.2).abs() < 1e-12 || (last - 0.8).abs() < 1e-12);
        assert!(first != last);
    }

    #[test]
    fn untouched_fragments_pass_through() {
        let a = Polyline::new(vec![pt(0.1, 0.1), pt(0.3, 0.3)]);
        let out = stitch_across(vec![a.clone()], vec![], 0, 0.5, &SolverOptions::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0], a);
    }

    #[test]
    fn halves_of_a_loop_close_up() {
        let a = Polyline::new(vec![pt(0.5, 0.2), pt(0.3, 0.5), pt(0.5, 0.8)]);
        let b = Polyline::new(vec![pt(0.5, 0.8), pt(0.7, 0.5), pt(0.5, 0.2)]);
        let out = stitch_across(vec![a], vec![b], 0, 0.5, &SolverOptions::default());
        assert_eq!(out.len(), 1);
        assert!(out[0].is_closed(1e-7));
    }

    #[test]
    fn midpoint_endpoints_merge_under_the_widened_tolerance() {
        let a = Polyline::new(vec![pt(0.2, 0.2), mid(0.505, 0.5)]);
        let b = Polyline::new(vec![pt(0.5, 0.508), pt(0.8, 0.8)]);

        let relaxed = SolverOptions::default();
        let out = stitch_across(
            vec![a.clone()],
            vec![b.clone()],
            0,
            0.5,
            &relaxed,
        );
        assert_eq!(out.len(), 1);

        let strict = SolverOptions {
            relaxed_midpoint_merge: false,
            ..SolverOptions::default()
        };
        let out = stitch_across(vec![a], vec![b], 0, 0.5, &strict);
        assert_eq!(out.len(), 2);
    }
}
