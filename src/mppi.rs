use crate::cost::CostFunction;
use crate::dynamics::Dynamics;
use crate::gaussian::{CovarianceError, Gaussian};
use crate::{Control, ControlSequence, SimRng, State};
use rayon::prelude::*;

#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("sampling covariance is invalid: {0}")]
    Covariance(#[from] CovarianceError),
    #[error("sampling covariance is singular")]
    SingularCovariance,
    #[error("importance weights are degenerate (sum = {0})")]
    DegenerateWeights(f64),
    #[error("optimized control is not finite")]
    InvalidControl,
    #[error("warm start has {got} columns, expected {expected}")]
    HorizonMismatch { expected: usize, got: usize },
}

/// プランナの出力
#[derive(Debug, Clone)]
pub struct Plan {
    /// 最適化後の入力列によるノイズなしの予測軌道 (T + 1 点)
    pub trajectory: Vec<State>,
    /// 最適化後の入力列 (T 列)
    pub controls: ControlSequence,
    /// サンプルごとのコスト (診断用)
    pub sample_costs: Vec<f64>,
}

/// 後退ホライゾン制御のプランナ
///
/// 現在の状態と初期解から最適化した入力列を返す。入力は借用のみで書き換えない。
/// 乱数は呼び出し側のストリームを使う。
pub trait Planner {
    fn plan(
        &mut self,
        x: &State,
        warm_start: &ControlSequence,
        rng: &mut SimRng,
    ) -> Result<Plan, PlannerError>;
}

#[derive(Debug, Clone, Copy)]
pub struct MppiParams {
    /// サンプル数 K
    pub samples: usize,
    /// ホライゾン T
    pub horizon: usize,
    /// 温度 λ
    pub lambda: f64,
    /// サンプリング分散の倍率 ν
    pub nu: f64,
    pub dt: f64,
    /// サンプルの統計をログに出す
    pub verbose: bool,
}

// MPPI (Model Predictive Path Integral) controller
pub struct Mppi<D, C> {
    dynamics: D,
    cost: C,
    params: MppiParams,
    sigma_inv: na::Matrix2<f64>,
    dist: Gaussian<2>,
}

impl<D: Dynamics, C: CostFunction> Mppi<D, C> {
    pub fn new(
        dynamics: D,
        cost: C,
        sigma: na::Matrix2<f64>,
        params: MppiParams,
    ) -> Result<Self, PlannerError> {
        let sigma_inv = sigma
            .try_inverse()
            .ok_or(PlannerError::SingularCovariance)?;
        let dist = Gaussian::zero_mean(sigma * params.nu)?;
        Ok(Self {
            dynamics,
            cost,
            params,
            sigma_inv,
            dist,
        })
    }

    // 入力列に沿ったノイズなしのロールアウト
    fn rollout(&self, x: &State, u_n: &ControlSequence) -> Vec<State> {
        let mut traj = Vec::with_capacity(u_n.ncols() + 1);
        traj.push(*x);
        for u in u_n.column_iter() {
            let x_c = traj[traj.len() - 1];
            traj.push(self.dynamics.step(&x_c, &u.into_owned(), self.params.dt));
        }
        traj
    }

    // 1サンプルのコスト
    fn sample_cost(&self, x: &State, u_n: &ControlSequence, eps: &ControlSequence) -> f64 {
        let MppiParams { lambda, nu, dt, .. } = self.params;
        let (cost, x_t) = u_n.column_iter().zip(eps.column_iter()).fold(
            (0.0, *x),
            |(c, x_c), (u, e)| {
                let u: Control = u.into_owned();
                let e: Control = e.into_owned();
                // 状態の更新
                let x_n = self.dynamics.step(&x_c, &(u + e), dt);
                // 入力コスト
                let control_term = lambda
                    * (0.5 * (1.0 - 1.0 / nu) * e.dot(&(self.sigma_inv * e))
                        + u.dot(&(self.sigma_inv * e))
                        + 0.5 * u.dot(&(self.sigma_inv * u)));
                // コストの累積
                (c + (self.cost.running(&x_n) + control_term) * dt, x_n)
            },
        );
        cost + self.cost.terminal(&x_t)
    }
}

impl<D: Dynamics, C: CostFunction> Planner for Mppi<D, C> {
    // MPPIの実装
    fn plan(
        &mut self,
        x: &State,
        u_n: &ControlSequence,
        rng: &mut SimRng,
    ) -> Result<Plan, PlannerError> {
        let MppiParams {
            samples,
            horizon,
            lambda,
            ..
        } = self.params;
        if u_n.ncols() != horizon {
            return Err(PlannerError::HorizonMismatch {
                expected: horizon,
                got: u_n.ncols(),
            });
        }

        // 乱数は逐次に引く (並列部の外で消費してスレッド数に依らず再現させる)
        let eps_k: Vec<ControlSequence> = (0..samples)
            .map(|_| {
                let mut eps = ControlSequence::zeros(horizon);
                for mut col in eps.column_iter_mut() {
                    col.copy_from(&self.dist.sample(rng));
                }
                eps
            })
            .collect();

        // 並列処理でコストの計算を行う
        let c_k: Vec<f64> = eps_k
            .par_iter()
            .map(|eps| self.sample_cost(x, u_n, eps))
            .collect();

        // 重みの計算 (最小コストで正規化してアンダーフローを防ぐ)
        let c_min = c_k.iter().copied().fold(f64::INFINITY, f64::min);
        let w_k: Vec<f64> = c_k
            .par_iter()
            .map(|c| (-(c - c_min) / lambda).exp())
            .collect();
        let sum: f64 = w_k.iter().sum();
        // 正規化項
        if sum == 0.0 || !sum.is_finite() {
            return Err(PlannerError::DegenerateWeights(sum));
        }

        // 重み付け平均 (加算順は固定、逐次に足す)
        let du = w_k
            .iter()
            .zip(eps_k.iter())
            .fold(ControlSequence::zeros(horizon), |acc, (w, eps)| {
                acc + eps * (*w / sum)
            });
        let controls = u_n + du;

        // u が 不正値の場合は終了
        if controls.iter().any(|u| !u.is_finite()) {
            return Err(PlannerError::InvalidControl);
        }

        if self.params.verbose {
            let mean = c_k.iter().sum::<f64>() / samples as f64;
            let ess = sum * sum / w_k.iter().map(|w| w * w).sum::<f64>();
            log::debug!(
                "mppi: cost min {:.3} mean {:.3}, effective samples {:.1}/{}",
                c_min,
                mean,
                ess,
                samples
            );
        }

        Ok(Plan {
            trajectory: self.rollout(x, &controls),
            controls,
            sample_costs: c_k,
        })
    }
}
