use super::{ContinuousSolver, OdeProblem, Solution, SolveError};

/// Classic fourth-order Runge–Kutta with a fixed step; the last step is shortened to land on `end`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rk4Solver {
    pub step: f64,
}

impl Rk4Solver {
    pub fn new(step: f64) -> Self {
        Self { step }
    }
}

impl Default for Rk4Solver {
    fn default() -> Self {
        Self { step: 0.01 }
    }
}

impl ContinuousSolver for Rk4Solver {
    fn solve(&self, problem: &OdeProblem) -> Result<Solution, SolveError> {
        let (start, end) = (problem.start, problem.end);
        if !start.is_finite() || !end.is_finite() || end < start {
            return Err(SolveError::InvalidTimeSpan { start, end });
        }
        if !self.step.is_finite() || self.step <= 0.0 {
            return Err(SolveError::InvalidStep(self.step));
        }

        let n = problem.dimension();
        let steps = ((end - start) / self.step).ceil() as usize;
        let mut times = Vec::with_capacity(steps + 1);
        let mut states = Vec::with_capacity(steps + 1);

        let mut state = problem.initial.clone();
        let mut time = start;
        times.push(time);
        states.push(state.clone());

        let mut k1 = vec![0.0; n];
        let mut k2 = vec![0.0; n];
        let mut k3 = vec![0.0; n];
        let mut k4 = vec![0.0; n];
        let mut scratch = vec![0.0; n];

        for i in 0..steps {
            let h = (end - time).min(self.step);
            if h <= 0.0 {
                break;
            }

            problem.derivative(&state, &mut k1);
            axpy(&state, &k1, h / 2.0, &mut scratch);
            problem.derivative(&scratch, &mut k2);
            axpy(&state, &k2, h / 2.0, &mut scratch);
            problem.derivative(&scratch, &mut k3);
            axpy(&state, &k3, h, &mut scratch);
            problem.derivative(&scratch, &mut k4);

            for j in 0..n {
                state[j] += h / 6.0 * (k1[j] + 2.0 * k2[j] + 2.0 * k3[j] + k4[j]);
            }
            time = if i + 1 == steps { end } else { time + h };

            if state.iter().any(|v| !v.is_finite()) {
                return Err(SolveError::NonFiniteState { time });
            }
            times.push(time);
            states.push(state.clone());
        }

        log::debug!(
            "rk4: {} places, {} reactions, {} steps over [{}, {}]",
            n,
            problem.reactions.len(),
            times.len() - 1,
            start,
            end
        );
        Ok(Solution::new(problem.places.clone(), times, states))
    }
}

fn axpy(base: &[f64], slope: &[f64], h: f64, out: &mut [f64]) {
    for ((o, b), s) in out.iter_mut().zip(base).zip(slope) {
        *o = b + h * s;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{ModelBuilder, Place, Transition};

    fn decay(rate: f64) -> OdeProblem {
        let model = ModelBuilder::new("decay")
            .place(Place::token("A", 1))
            .place(Place::token("B", 0))
            .transition(Transition::new("t").with_rate(rate))
            .flow("A", "t")
            .flow("t", "B")
            .build()
            .unwrap();
        OdeProblem::from_model(&model, 1.0)
    }

    #[test]
    fn matches_exponential_decay() {
        let solution = Rk4Solver::new(0.01).solve(&decay(1.0)).unwrap();
        let a = solution.final_value("A").unwrap();
        let b = solution.final_value("B").unwrap();
        assert!((a - (-1.0f64).exp()).abs() < 1e-8);
        assert!((a + b - 1.0).abs() < 1e-12);
        assert_eq!(*solution.times().last().unwrap(), 1.0);
        assert_eq!(solution.len(), 101);
    }

    #[test]
    fn uneven_span_ends_exactly() {
        let solution = Rk4Solver::new(0.3).solve(&decay(1.0)).unwrap();
        assert_eq!(solution.times().len(), 5);
        assert_eq!(*solution.times().last().unwrap(), 1.0);
    }

    #[test]
    fn rejects_bad_parameters() {
        let mut problem = decay(1.0);
        assert_eq!(
            Rk4Solver::new(0.0).solve(&problem),
            Err(SolveError::InvalidStep(0.0))
        );
        problem.end = -1.0;
        assert!(matches!(
            Rk4Solver::default().solve(&problem),
            Err(SolveError::InvalidTimeSpan { .. })
        ));
    }

    #[test]
    fn blow_up_is_reported() {
        let model = ModelBuilder::new("explode")
            .place(Place::token("X", 10))
            .transition(Transition::new("grow").with_rate(10.0))
            .flow("X", "grow")
            .flow("X", "grow")
            .flow("grow", "X")
            .flow("grow", "X")
            .flow("grow", "X")
            .build()
            .unwrap();
        let problem = OdeProblem::from_model(&model, 10.0);
        assert!(matches!(
            Rk4Solver::new(0.1).solve(&problem),
            Err(SolveError::NonFiniteState { .. })
        ));
    }
}
