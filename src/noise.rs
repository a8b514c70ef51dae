use crate::gaussian::{CovarianceError, Gaussian};
use crate::{Control, SimRng, State};

/// 実システムに加わる外乱
///
/// 入力ノイズ eps はプランナからは見えず、最初の入力に加算される。
/// プロセスノイズ w は状態更新後に直接加算される。
#[derive(Debug, Clone)]
pub struct NoiseModel {
    actuation: Gaussian<2>,
    process: Gaussian<4>,
}

impl NoiseModel {
    pub fn new(
        actuation_cov: na::Matrix2<f64>,
        process_cov: na::Matrix4<f64>,
    ) -> Result<Self, CovarianceError> {
        Ok(Self {
            actuation: Gaussian::zero_mean(actuation_cov)?,
            process: Gaussian::zero_mean(process_cov)?,
        })
    }

    /// eps ~ N(0, mu I), w ~ N(0, Wk)
    pub fn from_intensities(mu: f64, add_noise: f64, dt: f64) -> Result<Self, CovarianceError> {
        Self::new(
            na::Matrix2::identity() * mu,
            Self::process_covariance(dt, add_noise),
        )
    }

    /// ノイズなし (全てのサンプルが 0)
    pub fn disabled() -> Self {
        Self {
            actuation: Gaussian::degenerate(),
            process: Gaussian::degenerate(),
        }
    }

    /// 入力ノイズだけを止める
    pub fn without_actuation(mut self) -> Self {
        self.actuation = Gaussian::degenerate();
        self
    }

    /// Wk = intensity * dt * diag(0, 0, 1, 1)
    ///
    /// 位置成分には直接ノイズを加えない。
    pub fn process_covariance(dt: f64, intensity: f64) -> na::Matrix4<f64> {
        na::Matrix4::from_diagonal(&na::Vector4::new(0.0, 0.0, 1.0, 1.0)) * (dt * intensity)
    }

    /// 1ステップ分の (eps, w) を引く
    pub fn draw(&self, rng: &mut SimRng) -> (Control, State) {
        let eps = self.actuation.sample(rng);
        let w = self.process.sample(rng);
        (eps, w)
    }
}
