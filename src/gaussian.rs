use rand::Rng;
use rand_distr::StandardNormal;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CovarianceError {
    #[error("covariance contains a non-finite entry")]
    NonFinite,
    #[error("covariance is not symmetric")]
    NotSymmetric,
    #[error("covariance has a negative eigenvalue ({0:e})")]
    NotPositiveSemidefinite(f64),
}

/// 多変量正規分布 N(mean, cov)
///
/// 共分散は半正定値であればよく、特異でも構わない
/// (位置成分にノイズが乗らないプロセスノイズなど)。
/// サンプリングには固有値分解から作った平方根 L (L Lᵀ = cov) を使う。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gaussian<const D: usize> {
    pub mean: na::SVector<f64, D>,
    pub cov: na::SMatrix<f64, D, D>,
    factor: na::SMatrix<f64, D, D>,
}

impl<const D: usize> Gaussian<D> {
    const SYMMETRY_TOL: f64 = 1e-9;

    pub fn new(
        mean: na::SVector<f64, D>,
        cov: na::SMatrix<f64, D, D>,
    ) -> Result<Self, CovarianceError> {
        if mean.iter().chain(cov.iter()).any(|v| !v.is_finite()) {
            return Err(CovarianceError::NonFinite);
        }
        if (cov - cov.transpose()).amax() > Self::SYMMETRY_TOL * cov.amax().max(1.0) {
            return Err(CovarianceError::NotSymmetric);
        }
        // 固定長の一般の D では固有値分解が使えないので動的行列で計算する
        let eigen = na::DMatrix::from_iterator(D, D, cov.iter().copied()).symmetric_eigen();
        let tol = Self::SYMMETRY_TOL * cov.amax().max(1.0);
        if let Some(min) = eigen.eigenvalues.iter().copied().reduce(f64::min) {
            if min < -tol {
                return Err(CovarianceError::NotPositiveSemidefinite(min));
            }
        }
        // 丸め誤差で負になった固有値は 0 とみなす
        let sqrt = eigen.eigenvalues.map(|l| l.max(0.0).sqrt());
        let factor = eigen.eigenvectors * na::DMatrix::from_diagonal(&sqrt);
        let factor = na::SMatrix::<f64, D, D>::from_iterator(factor.iter().copied());
        Ok(Self { mean, cov, factor })
    }

    pub fn zero_mean(cov: na::SMatrix<f64, D, D>) -> Result<Self, CovarianceError> {
        Self::new(na::SVector::zeros(), cov)
    }

    /// 平均・共分散ともに 0 の退化した分布 (常に 0 を返す)
    pub fn degenerate() -> Self {
        Self {
            mean: na::SVector::zeros(),
            cov: na::SMatrix::zeros(),
            factor: na::SMatrix::zeros(),
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> na::SVector<f64, D> {
        let z = na::SVector::<f64, D>::from_fn(|_, _| rng.sample(StandardNormal));
        self.mean + self.factor * z
    }
}
