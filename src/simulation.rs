use crate::cost::CostFunction;
use crate::dynamics::Dynamics;
use crate::mppi::{Planner, PlannerError};
use crate::noise::NoiseModel;
use crate::recorder::Recorder;
use crate::{Control, ControlSequence, SimRng, State};
use rand::Rng;
use std::f64::consts::FRAC_PI_2;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("planner failed at step {step}")]
    Planner {
        step: usize,
        #[source]
        source: PlannerError,
    },
    #[error("planner returned {got} controls at step {step}, expected {expected}")]
    PlanLength {
        step: usize,
        expected: usize,
        got: usize,
    },
    #[error("actuation covariance is singular")]
    SingularCovariance,
    #[error("initial control sequence is empty")]
    EmptyHorizon,
}

/// 終了理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// 安全半径を超えた
    Safety,
    /// 予定のステップ数を終えた
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    Running,
    Terminated(Termination),
}

#[derive(Debug, Clone, Copy)]
pub struct LoopParams {
    /// シミュレーションのステップ数 Tsim
    pub steps: usize,
    pub dt: f64,
    pub lambda: f64,
    /// 位置のノルムがこれ以上になったら打ち切る
    pub r_exit: f64,
    sigma_inv: na::Matrix2<f64>,
}

impl LoopParams {
    pub fn new(
        steps: usize,
        dt: f64,
        lambda: f64,
        r_exit: f64,
        sigma: na::Matrix2<f64>,
    ) -> Result<Self, SimError> {
        let sigma_inv = sigma.try_inverse().ok_or(SimError::SingularCovariance)?;
        Ok(Self {
            steps,
            dt,
            lambda,
            r_exit,
            sigma_inv,
        })
    }

    // (λ/2) uᵀ Σ⁻¹ u
    fn control_effort(&self, u: &Control) -> f64 {
        self.lambda / 2.0 * u.dot(&(self.sigma_inv * u))
    }
}

/// 初期状態
///
/// 半径 2 の円の右半分からランダムに位置を選び、反時計回りの接線方向を向く。
pub fn random_initial_state(rng: &mut SimRng) -> State {
    const START_RADIUS: f64 = 2.0;
    let theta = rng.gen_range(-FRAC_PI_2..FRAC_PI_2);
    State::new(
        START_RADIUS * theta.cos(),
        START_RADIUS * theta.sin(),
        theta + FRAC_PI_2,
        0.0,
    )
}

/// 初期解を1列左にずらし、末尾は最後の列を複製する
///
/// 長さ T は変わらない。
pub fn shift_warm_start(u_n: &ControlSequence) -> ControlSequence {
    let t = u_n.ncols();
    ControlSequence::from_fn(t, |r, c| u_n[(r, (c + 1).min(t - 1))])
}

/// 閉ループシミュレーション
///
/// 各ステップでプランナを呼び、最初の入力だけにノイズを加えて実システムに適用する。
pub struct Simulation<P, D, C> {
    planner: P,
    dynamics: D,
    cost: C,
    noise: NoiseModel,
    params: LoopParams,
    x: State,
    u_n: ControlSequence,
    status: LoopStatus,
    recorder: Recorder,
}

impl<P: Planner, D: Dynamics, C: CostFunction> Simulation<P, D, C> {
    /// 初期解 u0 の列数がホライゾン T になる (1 以上)
    pub fn new(
        planner: P,
        dynamics: D,
        cost: C,
        noise: NoiseModel,
        params: LoopParams,
        x0: State,
        u0: ControlSequence,
    ) -> Result<Self, SimError> {
        if u0.ncols() == 0 {
            return Err(SimError::EmptyHorizon);
        }
        let status = if params.steps == 0 {
            LoopStatus::Terminated(Termination::Complete)
        } else {
            LoopStatus::Running
        };
        Ok(Self {
            planner,
            dynamics,
            cost,
            noise,
            params,
            x: x0,
            u_n: u0,
            status,
            recorder: Recorder::new(x0),
        })
    }

    pub fn warm_start(&self) -> &ControlSequence {
        &self.u_n
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn planner(&self) -> &P {
        &self.planner
    }

    pub fn into_recorder(self) -> Recorder {
        self.recorder
    }

    /// 1ステップ進める
    ///
    /// 終了済みなら何もしない (プランナも呼ばない)。
    pub fn step(&mut self, rng: &mut SimRng) -> Result<LoopStatus, SimError> {
        if self.status != LoopStatus::Running {
            return Ok(self.status);
        }
        let k = self.recorder.steps();
        let horizon = self.u_n.ncols();

        let plan = self
            .planner
            .plan(&self.x, &self.u_n, rng)
            .map_err(|source| SimError::Planner { step: k, source })?;
        if plan.controls.ncols() != horizon {
            return Err(SimError::PlanLength {
                step: k,
                expected: horizon,
                got: plan.controls.ncols(),
            });
        }

        let (eps, w) = self.noise.draw(rng);

        // 実システムにはノイズ付きの入力を加える
        let u_k: Control = plan.controls.column(0).into_owned();
        let x_next = self.x + self.dynamics.derivative(&self.x, &(u_k + eps)) * self.params.dt + w;

        // コストは遷移後の状態と同じステップの入力で評価する
        let cost =
            (self.cost.running(&x_next) + self.params.control_effort(&u_k)) * self.params.dt;
        self.recorder.record(x_next, u_k, cost);
        self.x = x_next;
        self.u_n = shift_warm_start(&plan.controls);

        let r = self.x.fixed_rows::<2>(0).norm();
        log::debug!(
            "step {:4}: u = [{:6.3}, {:6.3}], x = [{:6.3}, {:6.3}, {:6.3}, {:6.3}], cost = {:.3}",
            k,
            u_k[0],
            u_k[1],
            self.x[0],
            self.x[1],
            self.x[2],
            self.x[3],
            self.recorder.total_cost()
        );

        if r >= self.params.r_exit {
            log::warn!(
                "major violation of safety at step {}: |p| = {:.3} >= {:.3}, simulation ended prematurely",
                k,
                r,
                self.params.r_exit
            );
            self.status = LoopStatus::Terminated(Termination::Safety);
        } else if self.recorder.steps() >= self.params.steps {
            self.status = LoopStatus::Terminated(Termination::Complete);
        }
        Ok(self.status)
    }

    /// 終了するまで回す
    pub fn run(&mut self, rng: &mut SimRng) -> Result<Termination, SimError> {
        loop {
            if let LoopStatus::Terminated(reason) = self.step(rng)? {
                log::info!(
                    "simulation terminated ({:?}) after {} steps, total cost {:.3}",
                    reason,
                    self.recorder.steps(),
                    self.recorder.total_cost()
                );
                return Ok(reason);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::{CostKind, CostParams, TrackCost};
    use crate::dynamics::Unicycle;
    use crate::mppi::Plan;
    use crate::seeded_rng;
    use approx::assert_relative_eq;

    // 初期解をそのまま返すプランナ
    #[derive(Default)]
    struct Passthrough {
        calls: usize,
        fail_at: Option<usize>,
    }

    impl Planner for Passthrough {
        fn plan(
            &mut self,
            x: &State,
            warm_start: &ControlSequence,
            _rng: &mut SimRng,
        ) -> Result<Plan, PlannerError> {
            if self.fail_at == Some(self.calls) {
                return Err(PlannerError::InvalidControl);
            }
            self.calls += 1;
            Ok(Plan {
                trajectory: vec![*x],
                controls: warm_start.clone(),
                sample_costs: Vec::new(),
            })
        }
    }

    // 初期解の長さを変えてしまう壊れたプランナ
    struct Truncating;

    impl Planner for Truncating {
        fn plan(
            &mut self,
            _x: &State,
            warm_start: &ControlSequence,
            _rng: &mut SimRng,
        ) -> Result<Plan, PlannerError> {
            Ok(Plan {
                trajectory: Vec::new(),
                controls: warm_start.columns(0, 1).into_owned(),
                sample_costs: Vec::new(),
            })
        }
    }

    fn sim<P: Planner>(
        planner: P,
        noise: NoiseModel,
        steps: usize,
        r_exit: f64,
        x0: State,
        horizon: usize,
    ) -> Simulation<P, Unicycle, TrackCost> {
        let sigma = na::Matrix2::identity() * 0.01;
        let params = LoopParams::new(steps, 0.05, 0.1, r_exit, sigma).unwrap();
        Simulation::new(
            planner,
            Unicycle,
            TrackCost::new(CostKind::Hard, CostParams::default()),
            noise,
            params,
            x0,
            ControlSequence::from_element(horizon, 1.0),
        )
        .unwrap()
    }

    #[test]
    fn initial_state_starts_on_the_circle_facing_along_it() {
        let mut rng = seeded_rng(100);
        for _ in 0..50 {
            let x = random_initial_state(&mut rng);
            assert_relative_eq!(x.fixed_rows::<2>(0).norm(), 2.0, epsilon = 1e-12);
            assert!(x[0] >= 0.0);
            assert!((0.0..std::f64::consts::PI).contains(&x[2]));
            assert_eq!(x[3], 0.0);
            // 接線方向
            let heading = na::Vector2::new(x[2].cos(), x[2].sin());
            assert!(heading.dot(&x.fixed_rows::<2>(0)).abs() < 1e-9);
        }
    }

    #[test]
    fn shift_drops_first_and_repeats_last() {
        let u = ControlSequence::from_row_slice(&[1., 2., 3., 4., 5., 10., 20., 30., 40., 50.]);
        let next = shift_warm_start(&u);
        assert_eq!(next.ncols(), 5);
        for i in 0..4 {
            assert_eq!(next.column(i), u.column(i + 1));
        }
        assert_eq!(next.column(4), u.column(4));
    }

    #[test]
    fn shift_keeps_length_one() {
        let u = ControlSequence::from_element(1, 7.0);
        assert_eq!(shift_warm_start(&u), u);
    }

    #[test]
    fn one_noise_free_step_is_euler() {
        let x0 = State::new(2.0, 0.0, 0.0, 0.0);
        let mut s = sim(Passthrough::default(), NoiseModel::disabled(), 1, 5.0, x0, 3);
        let reason = s.run(&mut seeded_rng(0)).unwrap();
        assert_eq!(reason, Termination::Complete);

        let u = Control::new(1.0, 1.0);
        let expected = x0 + Unicycle.derivative(&x0, &u) * 0.05;
        assert_eq!(s.recorder().trajectory(), &[x0, expected]);
        assert_eq!(s.recorder().controls(), &[u]);
        assert_eq!(s.warm_start().ncols(), 3);
    }

    #[test]
    fn cost_uses_post_transition_state_and_applied_control() {
        let x0 = State::new(2.0, 0.0, 0.0, 0.0);
        let mut s = sim(Passthrough::default(), NoiseModel::disabled(), 1, 5.0, x0, 3);
        s.run(&mut seeded_rng(0)).unwrap();

        let x1 = s.recorder().trajectory()[1];
        let cost = TrackCost::new(CostKind::Hard, CostParams::default());
        // u = [1, 1], Σ⁻¹ = 100 I
        let expected = (cost.running(&x1) + 0.1 / 2.0 * 200.0) * 0.05;
        assert_relative_eq!(s.recorder().total_cost(), expected, max_relative = 1e-12);
    }

    #[test]
    fn early_exit_stops_planning() {
        let x0 = State::new(2.0, 0.0, 0.0, 0.0);
        let mut s = sim(Passthrough::default(), NoiseModel::disabled(), 100, 1.0, x0, 3);
        let reason = s.run(&mut seeded_rng(0)).unwrap();
        assert_eq!(reason, Termination::Safety);
        assert_eq!(s.planner().calls, 1);
        assert_eq!(s.recorder().trajectory().len(), 2);

        // 終了後は何も起きない
        let status = s.step(&mut seeded_rng(0)).unwrap();
        assert_eq!(status, LoopStatus::Terminated(Termination::Safety));
        assert_eq!(s.planner().calls, 1);
        assert_eq!(s.recorder().steps(), 1);
    }

    #[test]
    fn safety_abort_mid_run_keeps_history() {
        // 前進し続けていずれ半径 3 を越える
        let x0 = State::new(2.0, 0.0, 0.0, 1.0);
        let mut s = sim(Passthrough::default(), NoiseModel::disabled(), 1000, 3.0, x0, 4);
        let reason = s.run(&mut seeded_rng(0)).unwrap();
        assert_eq!(reason, Termination::Safety);

        let steps = s.planner().calls;
        let traj = s.recorder().trajectory();
        assert!(steps < 1000);
        assert_eq!(traj.len(), steps + 1);
        assert!(traj[steps].fixed_rows::<2>(0).norm() >= 3.0);
        assert!(traj[..steps].iter().all(|x| x.fixed_rows::<2>(0).norm() < 3.0));
    }

    #[test]
    fn runs_to_completion_with_noise() {
        let x0 = State::new(2.0, 0.0, std::f64::consts::FRAC_PI_2, 0.0);
        let noise = NoiseModel::from_intensities(0.01, 1.0, 0.05).unwrap();
        let mut s = sim(Passthrough::default(), noise, 20, 100.0, x0, 5);
        assert_eq!(s.run(&mut seeded_rng(4)).unwrap(), Termination::Complete);
        assert_eq!(s.planner().calls, 20);
        assert_eq!(s.recorder().trajectory().len(), 21);
        assert_eq!(s.warm_start().ncols(), 5);
        // 記録されるのはノイズを加える前の入力
        assert!(s
            .recorder()
            .controls()
            .iter()
            .all(|u| *u == Control::new(1.0, 1.0)));
    }

    #[test]
    fn accumulated_cost_never_decreases() {
        let x0 = State::new(2.0, 0.0, 0.3, 0.5);
        let noise = NoiseModel::from_intensities(0.01, 2.0, 0.05).unwrap();
        let mut s = sim(Passthrough::default(), noise, 50, 100.0, x0, 5);
        s.run(&mut seeded_rng(11)).unwrap();
        let costs = s.recorder().cumulative_costs();
        assert_eq!(costs.len(), 50);
        assert!(costs.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn same_seed_gives_identical_runs() {
        let x0 = State::new(2.0, 0.0, 1.0, 0.0);
        let run = |seed| {
            let noise = NoiseModel::from_intensities(0.05, 1.0, 0.05).unwrap();
            let mut s = sim(Passthrough::default(), noise, 30, 100.0, x0, 5);
            s.run(&mut seeded_rng(seed)).unwrap();
            s.into_recorder()
        };
        let (a, b) = (run(100), run(100));
        assert_eq!(a.trajectory(), b.trajectory());
        assert_eq!(a.total_cost().to_bits(), b.total_cost().to_bits());
        assert_ne!(a.trajectory(), run(101).trajectory());
    }

    #[test]
    fn planner_failure_propagates_and_keeps_history() {
        let planner = Passthrough {
            calls: 0,
            fail_at: Some(2),
        };
        let x0 = State::new(2.0, 0.0, 0.0, 0.0);
        let mut s = sim(planner, NoiseModel::disabled(), 10, 100.0, x0, 3);
        let err = s.run(&mut seeded_rng(0)).unwrap_err();
        assert!(matches!(err, SimError::Planner { step: 2, .. }));
        assert_eq!(s.recorder().steps(), 2);
        assert_eq!(s.recorder().trajectory().len(), 3);
    }

    #[test]
    fn plan_of_wrong_length_is_rejected() {
        let mut s = sim(Truncating, NoiseModel::disabled(), 10, 100.0, State::zeros(), 3);
        let err = s.step(&mut seeded_rng(0)).unwrap_err();
        assert!(matches!(
            err,
            SimError::PlanLength {
                step: 0,
                expected: 3,
                got: 1
            }
        ));
        assert_eq!(s.recorder().steps(), 0);
    }

    #[test]
    fn empty_initial_controls_are_rejected() {
        let params = LoopParams::new(10, 0.05, 0.1, 5.0, na::Matrix2::identity()).unwrap();
        let result = Simulation::new(
            Passthrough::default(),
            Unicycle,
            TrackCost::new(CostKind::Hard, CostParams::default()),
            NoiseModel::disabled(),
            params,
            State::zeros(),
            ControlSequence::zeros(0),
        );
        assert!(matches!(result, Err(SimError::EmptyHorizon)));
    }

    #[test]
    fn singular_sigma_is_rejected() {
        assert!(matches!(
            LoopParams::new(1, 0.05, 0.1, 5.0, na::Matrix2::zeros()),
            Err(SimError::SingularCovariance)
        ));
    }
}
