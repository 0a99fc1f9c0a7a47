//! Graph optimization using Levenberg-Marquardt.
//!
//! Minimizes the weighted squared error of all relative-pose constraints:
//!
//! ```text
//! F(x) = Σ e_ijᵀ · Ω_ij · e_ij
//! e_ij = log(Z_ij⁻¹ · T_i⁻¹ · T_j)
//! ```
//!
//! Poses are updated on the right, `T ← T · exp(δ)`, which gives the
//! first-order edge Jacobians:
//!
//! ```text
//! ∂e/∂δ_j = I
//! ∂e/∂δ_i = -Ad(T_j⁻¹ · T_i)
//! ```
//!
//! Fixed vertices (always vertex 0) are left out of the parameter vector so
//! the gauge freedom is removed. Each iteration solves the damped normal
//! equations `(H + λ·D) δ = -b`; a step is kept only if it lowers F.
//!
//! Solving works on a copy of the estimates. [`GraphOptimizer::solve`] only
//! reads the graph, so callers can solve under a read lock and commit the
//! result under a short write lock.

use std::collections::VecDeque;

use nalgebra::{DMatrix, DVector, Isometry3, Matrix6, Vector6};
use serde::{Deserialize, Serialize};

use super::pose_graph::PoseGraph;
use crate::core::math::{adjoint, se3_exp, se3_log};
use crate::error::{Error, Result};

/// Result of graph optimization.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationResult {
    /// Number of iterations performed.
    pub iterations: u32,

    /// Initial chi-squared error.
    pub initial_error: f64,

    /// Final chi-squared error.
    pub final_error: f64,

    /// Whether the optimization converged.
    pub converged: bool,

    /// Reason for termination.
    pub termination_reason: TerminationReason,
}

/// Reason for optimization termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Error change below threshold.
    Converged,

    /// Maximum iterations reached.
    MaxIterations,

    /// No step lowered the error before damping saturated.
    NoImprovement,

    /// Linear system solve failed after at least one iteration.
    SolveFailed,
}

/// Refined poses of the free vertices plus statistics.
#[derive(Debug, Clone)]
pub struct GraphSolution {
    /// (vertex id, refined pose) for every free vertex.
    pub estimates: Vec<(u64, Isometry3<f64>)>,
    /// Statistics.
    pub result: OptimizationResult,
}

/// Configuration for graph optimization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphOptimizerConfig {
    /// Maximum number of iterations.
    pub max_iterations: u32,

    /// Relative chi-squared change below which optimization stops.
    pub convergence_threshold: f64,

    /// Initial Levenberg-Marquardt damping.
    pub initial_lambda: f64,

    /// Damping multiplier on rejected steps (and divisor on accepted ones).
    pub lambda_factor: f64,

    /// Damping ceiling; reaching it ends the run.
    pub max_lambda: f64,
}

impl Default for GraphOptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            convergence_threshold: 1e-9,
            initial_lambda: 1e-4,
            lambda_factor: 10.0,
            max_lambda: 1e10,
        }
    }
}

impl GraphOptimizerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::InvalidParameter(
                "optimizer max_iterations must be at least 1".into(),
            ));
        }
        if !(self.initial_lambda > 0.0 && self.lambda_factor > 1.0) {
            return Err(Error::InvalidParameter(
                "optimizer needs initial_lambda > 0 and lambda_factor > 1".into(),
            ));
        }
        Ok(())
    }
}

/// Graph optimizer using Levenberg-Marquardt.
#[derive(Debug, Clone)]
pub struct GraphOptimizer {
    config: GraphOptimizerConfig,
}

impl GraphOptimizer {
    /// Create a new graph optimizer.
    pub fn new(config: GraphOptimizerConfig) -> Self {
        Self { config }
    }

    /// Get the current configuration.
    pub fn config(&self) -> &GraphOptimizerConfig {
        &self.config
    }

    /// Optimize the graph in place.
    ///
    /// On failure the graph is left exactly as it was.
    pub fn optimize(&self, graph: &mut PoseGraph) -> Result<OptimizationResult> {
        let solution = self.solve(graph)?;
        graph.commit_estimates(&solution.estimates)?;
        Ok(solution.result)
    }

    /// Compute refined estimates without touching the graph.
    ///
    /// Fails when no iteration can be performed: no edges, no free vertex,
    /// a free vertex with no path to a fixed one, or a singular first solve.
    pub fn solve(&self, graph: &PoseGraph) -> Result<GraphSolution> {
        if graph.edge_count() == 0 {
            return Err(Error::OptimizationFailure("graph has no edges".into()));
        }

        let layout = ParameterLayout::new(graph);
        if layout.free_count == 0 {
            return Err(Error::OptimizationFailure("graph has no free vertices".into()));
        }
        if let Some(id) = unanchored_vertex(graph) {
            return Err(Error::OptimizationFailure(format!(
                "vertex {} is not connected to a fixed vertex",
                id
            )));
        }

        let mut poses: Vec<Isometry3<f64>> =
            graph.vertices().iter().map(|v| v.pose.to_isometry()).collect();

        let initial_error = chi_squared(graph, &poses);
        let mut current_error = initial_error;
        let mut lambda = self.config.initial_lambda;
        let mut iterations = 0;
        let mut termination_reason = TerminationReason::MaxIterations;

        'outer: while iterations < self.config.max_iterations {
            let (h, b) = build_linear_system(graph, &poses, &layout);

            loop {
                let Some(delta) = solve_damped(&h, &b, lambda) else {
                    if iterations == 0 {
                        return Err(Error::OptimizationFailure(
                            "linear system is singular".into(),
                        ));
                    }
                    termination_reason = TerminationReason::SolveFailed;
                    break 'outer;
                };

                let candidate = apply_update(&poses, &delta, &layout);
                let new_error = chi_squared(graph, &candidate);

                if new_error < current_error {
                    iterations += 1;
                    poses = candidate;
                    lambda = (lambda / self.config.lambda_factor).max(1e-12);

                    let relative_change = (current_error - new_error) / current_error.max(1e-300);
                    current_error = new_error;
                    if relative_change < self.config.convergence_threshold || current_error < 1e-18 {
                        termination_reason = TerminationReason::Converged;
                        break 'outer;
                    }
                    break;
                }

                lambda *= self.config.lambda_factor;
                if lambda > self.config.max_lambda {
                    // Already at a minimum: the attempt still counts
                    iterations += 1;
                    termination_reason = TerminationReason::NoImprovement;
                    break 'outer;
                }
            }
        }

        let estimates = graph
            .vertices()
            .iter()
            .filter(|v| layout.index[v.id as usize].is_some())
            .map(|v| (v.id, poses[v.id as usize]))
            .collect();

        let converged = matches!(
            termination_reason,
            TerminationReason::Converged | TerminationReason::NoImprovement
        );

        log::debug!(
            "Graph optimization: {} iterations, chi2 {:.6} -> {:.6} ({:?})",
            iterations,
            initial_error,
            current_error,
            termination_reason
        );

        Ok(GraphSolution {
            estimates,
            result: OptimizationResult {
                iterations,
                initial_error,
                final_error: current_error,
                converged,
                termination_reason,
            },
        })
    }

    /// Chi-squared error of the graph's current estimates.
    pub fn chi_squared(&self, graph: &PoseGraph) -> f64 {
        let poses: Vec<Isometry3<f64>> =
            graph.vertices().iter().map(|v| v.pose.to_isometry()).collect();
        chi_squared(graph, &poses)
    }
}

/// Mapping from vertex id to parameter block.
struct ParameterLayout {
    /// Block index per vertex id; `None` for fixed vertices.
    index: Vec<Option<usize>>,
    free_count: usize,
}

impl ParameterLayout {
    fn new(graph: &PoseGraph) -> Self {
        let mut free_count = 0;
        let index = graph
            .vertices()
            .iter()
            .map(|v| {
                if v.fixed {
                    None
                } else {
                    free_count += 1;
                    Some(free_count - 1)
                }
            })
            .collect();
        Self { index, free_count }
    }

    #[inline]
    fn dim(&self) -> usize {
        self.free_count * 6
    }
}

/// First free vertex that cannot reach a fixed vertex through edges.
fn unanchored_vertex(graph: &PoseGraph) -> Option<u64> {
    let n = graph.vertex_count();
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
    for e in graph.edges() {
        adjacency[e.from as usize].push(e.to as usize);
        adjacency[e.to as usize].push(e.from as usize);
    }

    let mut reached = vec![false; n];
    let mut queue: VecDeque<usize> = graph
        .vertices()
        .iter()
        .filter(|v| v.fixed)
        .map(|v| v.id as usize)
        .collect();
    for &i in &queue {
        reached[i] = true;
    }

    while let Some(i) = queue.pop_front() {
        for &j in &adjacency[i] {
            if !reached[j] {
                reached[j] = true;
                queue.push_back(j);
            }
        }
    }

    reached.iter().position(|r| !r).map(|i| i as u64)
}

/// Edge residual `log(Z⁻¹ · T_i⁻¹ · T_j)`.
#[inline]
fn edge_error(measurement: &Isometry3<f64>, ti: &Isometry3<f64>, tj: &Isometry3<f64>) -> Vector6<f64> {
    se3_log(&(measurement.inverse() * ti.inverse() * tj))
}

fn chi_squared(graph: &PoseGraph, poses: &[Isometry3<f64>]) -> f64 {
    graph
        .edges()
        .iter()
        .map(|e| {
            let err = edge_error(&e.measurement, &poses[e.from as usize], &poses[e.to as usize]);
            (err.transpose() * e.information * err)[(0, 0)]
        })
        .sum()
}

/// Accumulate `H = Σ Jᵀ Ω J` and `b = Σ Jᵀ Ω e` over all edges.
fn build_linear_system(
    graph: &PoseGraph,
    poses: &[Isometry3<f64>],
    layout: &ParameterLayout,
) -> (DMatrix<f64>, DVector<f64>) {
    let dim = layout.dim();
    let mut h = DMatrix::zeros(dim, dim);
    let mut b = DVector::zeros(dim);

    for e in graph.edges() {
        let (ti, tj) = (&poses[e.from as usize], &poses[e.to as usize]);
        let err = edge_error(&e.measurement, ti, tj);

        let ji: Matrix6<f64> = -adjoint(&(tj.inverse() * ti));
        let jj: Matrix6<f64> = Matrix6::identity();

        let blocks = [
            (layout.index[e.from as usize], ji),
            (layout.index[e.to as usize], jj),
        ];

        for (row_block, j_row) in &blocks {
            let Some(r) = row_block else { continue };
            let jt_omega = j_row.transpose() * e.information;

            let mut b_block = b.fixed_rows_mut::<6>(r * 6);
            b_block += jt_omega * err;

            for (col_block, j_col) in &blocks {
                let Some(c) = col_block else { continue };
                let mut h_block = h.fixed_view_mut::<6, 6>(r * 6, c * 6);
                h_block += jt_omega * j_col;
            }
        }
    }

    (h, b)
}

/// Solve `(H + λ·diag(max(H_kk, 1))) δ = -b`, Cholesky first, LU as fallback.
fn solve_damped(h: &DMatrix<f64>, b: &DVector<f64>, lambda: f64) -> Option<DVector<f64>> {
    let mut damped = h.clone();
    for k in 0..damped.nrows() {
        damped[(k, k)] += lambda * h[(k, k)].max(1.0);
    }
    let rhs = -b;

    let delta = match damped.clone().cholesky() {
        Some(chol) => chol.solve(&rhs),
        None => damped.lu().solve(&rhs)?,
    };

    delta.iter().all(|v| v.is_finite()).then_some(delta)
}

/// Right-multiply every free pose by `exp(δ)`.
fn apply_update(
    poses: &[Isometry3<f64>],
    delta: &DVector<f64>,
    layout: &ParameterLayout,
) -> Vec<Isometry3<f64>> {
    poses
        .iter()
        .zip(&layout.index)
        .map(|(pose, block)| match block {
            Some(k) => {
                let xi = Vector6::from_iterator(delta.rows(k * 6, 6).iter().copied());
                let mut updated = pose * se3_exp(&xi);
                updated.rotation.renormalize();
                updated
            }
            None => *pose,
        })
        .collect()
}
