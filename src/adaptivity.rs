//! The adaptive solve loop `Init → {Assemble → Solve → Estimate → Refine} × N → Finalize`.
use crate::assembly::{ElementAssembler, GlobalSystem};
use crate::config::{AmrConfig, FlaggingStrategy};
use crate::error_estimation::{ErrorEstimator, ErrorVector};
use crate::mesh::refinement::{MeshRefinement, RefinementStats};
use crate::mesh::Mesh;
use crate::system::EquationSystem;
use amrfem_sparse::LinearSolveReport;
use eyre::{eyre, WrapErr};
use log::info;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdaptivePhase {
    Init,
    Assemble,
    Solve,
    Estimate,
    Refine,
    Finalize,
}

/// Summary of one pass through assembly and solve.
#[derive(Clone, Debug, PartialEq)]
pub struct StepReport {
    pub step: usize,
    pub n_active_elements: usize,
    pub n_dofs: usize,
    pub linear_report: LinearSolveReport,
    /// Global error estimate, absent when the step was not estimated.
    pub error_estimate: Option<f64>,
    /// Changes made to the mesh after the step, absent for the final step.
    pub refinement: Option<RefinementStats>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AdaptiveReport {
    pub steps: Vec<StepReport>,
    /// Whether the loop ended because the estimate fell below the error tolerance.
    pub reached_tolerance: bool,
    /// Refinement requests dropped at the maximum level over the whole run.
    pub capped_count: usize,
}

/// State passed to the per-step callback once a step is solved (and estimated).
pub struct StepView<'a> {
    pub step: usize,
    pub mesh: &'a Mesh,
    pub system: &'a EquationSystem,
    pub linear_report: &'a LinearSolveReport,
    pub error: Option<&'a ErrorVector>,
}

/// Drives an [`EquationSystem`] through repeated solves and mesh adaptation.
#[derive(Debug, Clone)]
pub struct AdaptiveLoop {
    config: AmrConfig,
    refinement: MeshRefinement,
    variable: usize,
}

impl AdaptiveLoop {
    pub fn new(config: AmrConfig) -> eyre::Result<Self> {
        config.validate().wrap_err("invalid adaptive loop configuration")?;
        Ok(Self {
            refinement: config.mesh_refinement(),
            config,
            variable: 0,
        })
    }

    /// Selects the variable whose error drives refinement.
    pub fn with_variable(self, variable: usize) -> Self {
        Self { variable, ..self }
    }

    pub fn config(&self) -> &AmrConfig {
        &self.config
    }

    pub fn refinement(&self) -> &MeshRefinement {
        &self.refinement
    }

    /// Runs the loop until `max_r_steps` steps are solved or the estimate reaches the tolerance.
    ///
    /// `on_step` is called after every step has been solved and, unless it is the final one,
    /// estimated. The system is initialized on the mesh, and refinements are applied to the
    /// mesh in place.
    pub fn run<A, E, F>(
        &mut self,
        mesh: &mut Mesh,
        system: &mut EquationSystem,
        assembler: &A,
        estimator: &E,
        mut on_step: F,
    ) -> eyre::Result<AdaptiveReport>
    where
        A: ElementAssembler,
        E: ErrorEstimator + ?Sized,
        F: FnMut(&StepView) -> eyre::Result<()>,
    {
        let mut solver = self.config.linear_solver.build();
        let mut report = AdaptiveReport {
            steps: Vec::new(),
            reached_tolerance: false,
            capped_count: 0,
        };
        let mut step = 0;
        let mut global: Option<GlobalSystem> = None;
        let mut linear_report: Option<LinearSolveReport> = None;
        let mut error: Option<ErrorVector> = None;
        let mut phase = AdaptivePhase::Init;

        loop {
            phase = match phase {
                AdaptivePhase::Init => {
                    system
                        .init(mesh)
                        .wrap_err("failed to distribute dofs on the initial mesh")?;
                    system.set_linear_settings(self.config.solver_settings());
                    AdaptivePhase::Assemble
                }
                AdaptivePhase::Assemble => {
                    global = Some(
                        system
                            .assemble(mesh, assembler)
                            .wrap_err_with(|| format!("assembly failed in step {step}"))?,
                    );
                    AdaptivePhase::Solve
                }
                AdaptivePhase::Solve => {
                    let assembled = global
                        .take()
                        .ok_or_else(|| eyre!("no assembled system to solve in step {step}"))?;
                    let solved = system
                        .solve_assembled(&assembled, &mut solver)
                        .wrap_err_with(|| format!("linear solve failed in step {step}"))?;
                    linear_report = Some(solved);
                    report.steps.push(StepReport {
                        step,
                        n_active_elements: mesh.n_active_elements(),
                        n_dofs: system.n_dofs(),
                        linear_report: solved,
                        error_estimate: None,
                        refinement: None,
                    });
                    if step + 1 >= self.config.max_r_steps || self.config.uniform_refine {
                        self.finish_step(step, mesh, system, &linear_report, None, &mut on_step)?;
                        if step + 1 >= self.config.max_r_steps {
                            AdaptivePhase::Finalize
                        } else {
                            AdaptivePhase::Refine
                        }
                    } else {
                        AdaptivePhase::Estimate
                    }
                }
                AdaptivePhase::Estimate => {
                    let estimated = estimator
                        .estimate_error(mesh, system, self.variable)
                        .wrap_err_with(|| format!("error estimation failed in step {step}"))?;
                    let estimate = estimated.l2_norm();
                    if let Some(last) = report.steps.last_mut() {
                        last.error_estimate = Some(estimate);
                    }
                    info!(
                        "Step {}: error estimate {:e}, mean {:e}, variance {:e}",
                        step,
                        estimate,
                        estimated.mean(),
                        estimated.variance()
                    );
                    self.finish_step(step, mesh, system, &linear_report, Some(&estimated), &mut on_step)?;
                    error = Some(estimated);
                    if estimate < self.config.error_tolerance {
                        report.reached_tolerance = true;
                        AdaptivePhase::Finalize
                    } else {
                        AdaptivePhase::Refine
                    }
                }
                AdaptivePhase::Refine => {
                    let old_mesh = mesh.clone();
                    let stats = if self.config.uniform_refine {
                        self.refinement.uniformly_refine(mesh, 1)?
                    } else {
                        let error = error
                            .take()
                            .ok_or_else(|| eyre!("no error estimate to refine by in step {step}"))?;
                        match self.config.flagging {
                            FlaggingStrategy::ElemFraction => {
                                self.refinement.flag_elements_by_elem_fraction(mesh, &error)?
                            }
                            FlaggingStrategy::ErrorFraction => {
                                self.refinement.flag_elements_by_error_fraction(mesh, &error)?
                            }
                        };
                        self.refinement.refine_and_coarsen_elements(mesh)?
                    };
                    if let Some(last) = report.steps.last_mut() {
                        last.refinement = Some(stats);
                    }
                    system
                        .reinit(&old_mesh, mesh)
                        .wrap_err_with(|| format!("failed to transfer the solution after step {step}"))?;
                    step += 1;
                    AdaptivePhase::Assemble
                }
                AdaptivePhase::Finalize => break,
            };
        }

        report.capped_count = self.refinement.capped_count();
        info!(
            "Adaptive loop finished after {} step(s) with {} dofs on {} active elements",
            report.steps.len(),
            system.n_dofs(),
            mesh.n_active_elements()
        );
        Ok(report)
    }

    fn finish_step<F>(
        &self,
        step: usize,
        mesh: &Mesh,
        system: &EquationSystem,
        linear_report: &Option<LinearSolveReport>,
        error: Option<&ErrorVector>,
        on_step: &mut F,
    ) -> eyre::Result<()>
    where
        F: FnMut(&StepView) -> eyre::Result<()>,
    {
        let linear_report = linear_report
            .as_ref()
            .ok_or_else(|| eyre!("step {step} finished without a linear solve"))?;
        info!(
            "Step {}: {} active elements, {} dofs, linear solve {} iterations with residual {:e}",
            step,
            mesh.n_active_elements(),
            system.n_dofs(),
            linear_report.iterations,
            linear_report.final_residual
        );
        on_step(&StepView {
            step,
            mesh,
            system,
            linear_report,
            error,
        })
    }
}
