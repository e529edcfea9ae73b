//! Job progress reporting.
//!
//! One reporter lives for the duration of one export job. It enforces the
//! progress contract at a single choke point: values forwarded to the
//! observer are in [0, 1], monotonically non-decreasing, throttled below the
//! terminal value, and the terminal 1.0 is delivered exactly once.

/// Minimum advance between forwarded intermediate reports.
const MIN_STEP: f64 = 0.01;

/// Intermediate reports are capped here; only [`ProgressReporter::finish`]
/// emits 1.0.
const INTERMEDIATE_CAP: f64 = 0.99;

pub struct ProgressReporter {
    observer: Box<dyn FnMut(f64)>,
    last: f64,
    reported_any: bool,
    finished: bool,
}

impl ProgressReporter {
    pub fn new(observer: impl FnMut(f64) + 'static) -> Self {
        Self {
            observer: Box::new(observer),
            last: 0.0,
            reported_any: false,
            finished: false,
        }
    }

    /// A reporter that drops all reports.
    pub fn sink() -> Self {
        Self::new(|_| {})
    }

    /// Report an intermediate fraction. Regressions and sub-throttle advances
    /// are dropped; values are clamped below the terminal 1.0.
    pub fn report(&mut self, fraction: f64) {
        if self.finished {
            return;
        }
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, INTERMEDIATE_CAP)
        } else {
            return;
        };
        if self.reported_any && fraction < self.last + MIN_STEP {
            return;
        }
        self.last = fraction;
        self.reported_any = true;
        (self.observer)(fraction);
    }

    /// Deliver the terminal 1.0. Idempotent; later calls (and later reports)
    /// are no-ops.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.last = 1.0;
        (self.observer)(1.0);
    }

    pub fn fraction(&self) -> f64 {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    fn collecting_reporter() -> (ProgressReporter, Rc<RefCell<Vec<f64>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let reporter = ProgressReporter::new(move |f| sink.borrow_mut().push(f));
        (reporter, seen)
    }

    #[test]
    fn reports_are_monotonic_and_end_at_one() {
        let (mut rep, seen) = collecting_reporter();
        for f in [0.0, 0.2, 0.1, 0.5, 0.4, 0.9, 2.0] {
            rep.report(f);
        }
        rep.finish();

        let seen = seen.borrow();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
        assert_eq!(*seen.last().unwrap(), 1.0);
        assert_eq!(seen.iter().filter(|f| **f == 1.0).count(), 1);
    }

    #[test]
    fn finish_is_emitted_exactly_once() {
        let (mut rep, seen) = collecting_reporter();
        rep.report(0.5);
        rep.finish();
        rep.finish();
        rep.report(0.7);
        assert_eq!(seen.borrow().iter().filter(|f| **f == 1.0).count(), 1);
        assert_eq!(rep.fraction(), 1.0);
    }

    #[test]
    fn sub_step_advances_are_throttled() {
        let (mut rep, seen) = collecting_reporter();
        rep.report(0.5);
        rep.report(0.501);
        rep.report(0.502);
        rep.report(0.52);
        assert_eq!(seen.borrow().as_slice(), &[0.5, 0.52]);
    }

    #[test]
    fn intermediate_values_never_reach_one() {
        let (mut rep, seen) = collecting_reporter();
        rep.report(1.0);
        rep.report(5.0);
        assert!(seen.borrow().iter().all(|f| *f <= INTERMEDIATE_CAP));
    }

    #[test]
    fn non_finite_values_are_dropped() {
        let (mut rep, seen) = collecting_reporter();
        rep.report(f64::NAN);
        rep.report(f64::INFINITY);
        rep.finish();
        assert_eq!(seen.borrow().as_slice(), &[1.0]);
    }
}
