//! Ownership of the discrete solution together with linear, nonlinear and transient solves.
use crate::assembly::{assemble_system, AssemblyContext, ElementAssembler, GlobalSystem};
use crate::dof_map::DofMap;
use crate::fe::evaluate_field_derivative;
use crate::mesh::Mesh;
use crate::projection::project_solution;
use crate::AmrError;
use amrfem_sparse::{LinearSolveReport, LinearSolver, SolverSettings};
use log::{debug, warn};
use nalgebra::{DVector, Point3};
use serde::{Deserialize, Serialize};

/// Settings for the outer Newton loop of [`EquationSystem::solve_nonlinear`].
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NonlinearSettings {
    pub max_iterations: usize,
    /// Bound on both the norm of the update and the final linear residual.
    pub tolerance: f64,
    /// Linear tolerance of the first iteration. Later iterations use
    /// `min(residual², initial_linear_tolerance)` of the previous linear solve.
    pub initial_linear_tolerance: f64,
}

impl Default for NonlinearSettings {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            tolerance: 1e-3,
            initial_linear_tolerance: 1e-6,
        }
    }
}

/// Outcome of a nonlinear solve. Not converging is a status, not an error.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct NonlinearReport {
    pub iterations: usize,
    pub converged: bool,
    /// Euclidean norm of the last update.
    pub final_delta_norm: f64,
    pub final_linear_residual: f64,
}

/// A solution field on a mesh together with its dof map and time-stepping state.
#[derive(Clone, Debug)]
pub struct EquationSystem {
    name: String,
    dof_map: DofMap,
    solution: DVector<f64>,
    old_solution: DVector<f64>,
    time: f64,
    linear_settings: SolverSettings,
    last_linear_report: Option<LinearSolveReport>,
}

impl EquationSystem {
    /// Creates a system from a dof map with its variables and persistent constraints.
    ///
    /// The system has no dofs until [`init`](Self::init) is called.
    pub fn new(name: impl Into<String>, dof_map: DofMap) -> Self {
        Self {
            name: name.into(),
            dof_map,
            solution: DVector::zeros(0),
            old_solution: DVector::zeros(0),
            time: 0.0,
            linear_settings: SolverSettings::default(),
            last_linear_report: None,
        }
    }

    /// Distributes dofs on the mesh and resets the solution to zero with constraints enforced.
    pub fn init(&mut self, mesh: &Mesh) -> Result<(), AmrError> {
        self.dof_map.distribute_dofs(mesh)?;
        self.solution = DVector::zeros(self.dof_map.n_dofs());
        self.dof_map.enforce_constraints_exactly(&mut self.solution);
        self.old_solution = self.solution.clone();
        self.last_linear_report = None;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dof_map(&self) -> &DofMap {
        &self.dof_map
    }

    pub fn n_dofs(&self) -> usize {
        self.dof_map.n_dofs()
    }

    pub fn solution(&self) -> &DVector<f64> {
        &self.solution
    }

    /// Replaces the solution, e.g. by an interpolated initial condition.
    pub fn set_solution(&mut self, solution: DVector<f64>) -> Result<(), AmrError> {
        if solution.len() != self.n_dofs() {
            return Err(AmrError::InvalidConfiguration(format!(
                "solution of length {} does not match the {} dofs of system {}",
                solution.len(),
                self.n_dofs(),
                self.name
            )));
        }
        self.solution = solution;
        Ok(())
    }

    pub fn old_solution(&self) -> &DVector<f64> {
        &self.old_solution
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn linear_settings(&self) -> &SolverSettings {
        &self.linear_settings
    }

    pub fn set_linear_settings(&mut self, settings: SolverSettings) {
        self.linear_settings = settings;
    }

    /// The report of the most recent linear solve since the last [`init`](Self::init).
    pub fn last_linear_report(&self) -> Option<&LinearSolveReport> {
        self.last_linear_report.as_ref()
    }

    pub fn assembly_context<'a>(&'a self, mesh: &'a Mesh) -> AssemblyContext<'a> {
        AssemblyContext {
            mesh,
            dof_map: &self.dof_map,
            solution: &self.solution,
            old_solution: Some(&self.old_solution),
        }
    }

    /// Assembles the constrained global system around the current solution.
    pub fn assemble<A: ElementAssembler>(&self, mesh: &Mesh, assembler: &A) -> Result<GlobalSystem, AmrError> {
        assemble_system(assembler, &self.assembly_context(mesh), &mesh.active_element_ids())
    }

    /// Assembles, solves and enforces the constraints on the new solution.
    ///
    /// The current solution is the initial guess of iterative solvers.
    pub fn solve<A, S>(&mut self, mesh: &Mesh, assembler: &A, solver: &mut S) -> Result<LinearSolveReport, AmrError>
    where
        A: ElementAssembler,
        S: LinearSolver + ?Sized,
    {
        let system = self.assemble(mesh, assembler)?;
        self.solve_assembled(&system, solver)
    }

    /// Solves an already assembled global system and enforces the constraints on the result.
    pub fn solve_assembled<S>(&mut self, system: &GlobalSystem, solver: &mut S) -> Result<LinearSolveReport, AmrError>
    where
        S: LinearSolver + ?Sized,
    {
        let mut x = self.solution.clone();
        let report = solver.solve(&system.matrix, &system.rhs, &mut x, &self.linear_settings)?;
        if report.converged {
            debug!(
                "{} solver converged for system {} in {} iterations, residual {:e}",
                solver.name(),
                self.name,
                report.iterations,
                report.final_residual
            );
        } else {
            warn!(
                "{} solver did not converge for system {} within {} iterations, residual {:e}",
                solver.name(),
                self.name,
                report.iterations,
                report.final_residual
            );
        }
        self.dof_map.enforce_constraints_exactly(&mut x);
        self.solution = x;
        self.last_linear_report = Some(report);
        Ok(report)
    }

    /// Newton iteration in which every assembly linearizes around the current iterate.
    ///
    /// Iteration stops when both the norm of the update and the residual of the last linear
    /// solve are below the tolerance. The linear tolerance of the system is modified during the
    /// iteration and restored afterwards.
    pub fn solve_nonlinear<A, S>(
        &mut self,
        mesh: &Mesh,
        assembler: &A,
        solver: &mut S,
        settings: &NonlinearSettings,
    ) -> Result<NonlinearReport, AmrError>
    where
        A: ElementAssembler,
        S: LinearSolver + ?Sized,
    {
        let initial_settings = self.linear_settings;
        self.linear_settings.tolerance = settings.initial_linear_tolerance;

        let mut report = NonlinearReport {
            iterations: 0,
            converged: false,
            final_delta_norm: f64::INFINITY,
            final_linear_residual: f64::INFINITY,
        };
        for iteration in 0..settings.max_iterations {
            let previous = self.solution.clone();
            let linear_report = match self.solve(mesh, assembler, solver) {
                Ok(linear_report) => linear_report,
                Err(err) => {
                    self.linear_settings = initial_settings;
                    return Err(err);
                }
            };
            let delta_norm = (&self.solution - previous).norm();
            report.iterations = iteration + 1;
            report.final_delta_norm = delta_norm;
            report.final_linear_residual = linear_report.final_residual;
            debug!(
                "Newton iteration {} of system {}: |du| = {:e}, linear residual {:e} after {} iterations",
                iteration, self.name, delta_norm, linear_report.final_residual, linear_report.iterations
            );

            if delta_norm < settings.tolerance && linear_report.final_residual < settings.tolerance {
                report.converged = true;
                break;
            }
            self.linear_settings.tolerance = linear_report
                .final_residual
                .powi(2)
                .min(settings.initial_linear_tolerance);
        }

        self.linear_settings = initial_settings;
        if !report.converged {
            warn!(
                "Newton iteration of system {} did not converge within {} iterations (|du| = {:e})",
                self.name, settings.max_iterations, report.final_delta_norm
            );
        }
        Ok(report)
    }

    /// Moves to the next time level: the current solution becomes the old one.
    pub fn advance_time_step(&mut self, dt: f64) {
        self.old_solution.copy_from(&self.solution);
        self.time += dt;
    }

    /// Redistributes dofs after the mesh has changed and projects both the current and the old
    /// solution onto the new space.
    ///
    /// `old_mesh` must be the mesh the system was last distributed on. On error the system is
    /// left unchanged.
    pub fn reinit(&mut self, old_mesh: &Mesh, new_mesh: &Mesh) -> Result<(), AmrError> {
        let mut new_dof_map = self.dof_map.clone();
        new_dof_map.distribute_dofs(new_mesh)?;
        let solution = project_solution(old_mesh, &self.dof_map, &self.solution, new_mesh, &new_dof_map)?;
        let old_solution = project_solution(old_mesh, &self.dof_map, &self.old_solution, new_mesh, &new_dof_map)?;
        debug!(
            "Reinitialized system {}: {} -> {} dofs",
            self.name,
            self.dof_map.n_dofs(),
            new_dof_map.n_dofs()
        );
        self.dof_map = new_dof_map;
        self.solution = solution;
        self.old_solution = old_solution;
        Ok(())
    }

    /// Value of a variable at a physical point, or `None` outside of the mesh.
    pub fn point_value(&self, mesh: &Mesh, variable: usize, x: &Point3<f64>) -> Option<f64> {
        let element = mesh.locate_active_element(x)?;
        let coefficients = self.dof_map.local_solution(element, variable, &self.solution);
        Some(evaluate_field_derivative(
            self.dof_map.basis(variable),
            &mesh.element_box(element),
            &coefficients,
            x,
            [0, 0, 0],
        ))
    }
}
