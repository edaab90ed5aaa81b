//! Autoregressive state matrix
//!
//! The state matrix `A = ML LT` with `ML = Σyx F⁻` and `LT = F⁻ᵀ` is a low rank
//! product. It is applied either as a single multiplication with the dense `A`
//! ([Strategy::Classic]) or as the sequence of the two thin multiplications
//! ([Strategy::Factored]). Which one is faster depends on the matrix shapes, so the
//! two strategies are timed once when the state matrix is created.

use nalgebra::{DMatrix, DVector};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use std::{fmt, hint, time::Instant};

/// Number of trial vectors for the strategy benchmark
pub const BENCHMARK_SIZE: usize = 10;
/// Seed of the benchmark trial vectors
pub const BENCHMARK_SEED: u64 = 1;

/// State matrix evaluation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// multiplication with the dense matrix `A`
    Classic,
    /// multiplication with `LT` followed by multiplication with `ML`
    Factored,
}
impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Classic => write!(f, "classic"),
            Strategy::Factored => write!(f, "factored"),
        }
    }
}

/// Strategy benchmark results in seconds per vector
#[derive(Debug, Clone, Copy)]
pub struct Benchmark {
    pub classic: f64,
    pub factored: f64,
}
impl Benchmark {
    /// The fastest strategy, [Strategy::Classic] on a tie
    pub fn fastest(&self) -> Strategy {
        if self.classic > self.factored {
            Strategy::Factored
        } else {
            Strategy::Classic
        }
    }
}

/// Linear predictor of the next phase state
#[derive(Debug, Clone)]
pub struct StateMatrix {
    ml: DMatrix<f64>,
    lt: DMatrix<f64>,
    a: DMatrix<f64>,
    strategy: Strategy,
}
impl StateMatrix {
    /// Creates the state matrix from the cross-time covariance and the inverse factor
    /// of the covariance, selecting the fastest evaluation strategy
    pub fn new(cov_yx: &DMatrix<f64>, inv_factor_xx: &DMatrix<f64>) -> Self {
        let mut this = Self::with_strategy(cov_yx, inv_factor_xx, Strategy::Classic);
        let benchmark = this.benchmark(BENCHMARK_SIZE, BENCHMARK_SEED);
        log::debug!("classic:  {:0.3e}s", benchmark.classic);
        log::debug!("factored: {:0.3e}s", benchmark.factored);
        this.strategy = benchmark.fastest();
        log::info!("state matrix {:?}: {} strategy", this.shape(), this.strategy);
        this
    }
    /// Creates the state matrix with the given evaluation strategy
    pub fn with_strategy(
        cov_yx: &DMatrix<f64>,
        inv_factor_xx: &DMatrix<f64>,
        strategy: Strategy,
    ) -> Self {
        let ml = cov_yx * inv_factor_xx;
        let lt = inv_factor_xx.transpose();
        let a = &ml * &lt;
        Self { ml, lt, a, strategy }
    }
    /// Times both strategies on `ntests` random vectors
    pub fn benchmark(&self, ntests: usize, seed: u64) -> Benchmark {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let x = DMatrix::<f64>::from_distribution(self.shape().1, ntests, &StandardNormal, &mut rng);
        let now = Instant::now();
        hint::black_box(self.dot_factored(&x));
        let factored = now.elapsed().as_secs_f64();
        let now = Instant::now();
        hint::black_box(self.dot_classic(&x));
        let classic = now.elapsed().as_secs_f64();
        let ntests = ntests.max(1) as f64;
        Benchmark {
            classic: classic / ntests,
            factored: factored / ntests,
        }
    }
    fn dot_classic(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        &self.a * x
    }
    fn dot_factored(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        &self.ml * (&self.lt * x)
    }
    /// Applies the state matrix to a batch of column vectors
    pub fn dot_batch(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        match self.strategy {
            Strategy::Classic => self.dot_classic(x),
            Strategy::Factored => self.dot_factored(x),
        }
    }
    /// Applies the state matrix to a vector
    pub fn dot(&self, x: &DVector<f64>) -> DVector<f64> {
        match self.strategy {
            Strategy::Classic => &self.a * x,
            Strategy::Factored => &self.ml * (&self.lt * x),
        }
    }
    /// (rows,columns) of the state matrix
    pub fn shape(&self) -> (usize, usize) {
        self.a.shape()
    }
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }
    /// Returns the dense state matrix
    pub fn as_matrix(&self) -> &DMatrix<f64> {
        &self.a
    }
    /// Rank of the low rank product
    pub fn rank(&self) -> usize {
        self.lt.nrows()
    }
}
