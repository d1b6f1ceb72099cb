use crate::assembly::local::{AssemblyContext, ElementAssembler, ElementContribution};
use crate::mesh::ElementId;
use crate::AmrError;
use log::debug;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rayon::prelude::*;
use std::cell::RefCell;
use thread_local::ThreadLocal;

/// A global system `A x = b`.
#[derive(Clone, Debug, PartialEq)]
pub struct GlobalSystem {
    pub matrix: CsrMatrix<f64>,
    pub rhs: DVector<f64>,
}

/// Accumulates element contributions by global index.
///
/// Entries are collected as triplets and summed when the accumulator is flushed into CSR form,
/// so contributions may be added in any order.
#[derive(Clone, Debug)]
pub struct SystemAccumulator {
    coo: CooMatrix<f64>,
    rhs: DVector<f64>,
}

impl SystemAccumulator {
    pub fn new(n_dofs: usize) -> Self {
        Self {
            coo: CooMatrix::new(n_dofs, n_dofs),
            rhs: DVector::zeros(n_dofs),
        }
    }

    pub fn n_dofs(&self) -> usize {
        self.rhs.len()
    }

    /// Adds a square block whose rows and columns are given by `dofs`.
    pub fn add_matrix(&mut self, dofs: &[usize], matrix: &DMatrix<f64>) {
        self.add_rectangular_matrix(dofs, dofs, matrix);
    }

    pub fn add_rectangular_matrix(&mut self, row_dofs: &[usize], col_dofs: &[usize], matrix: &DMatrix<f64>) {
        assert_eq!(matrix.nrows(), row_dofs.len());
        assert_eq!(matrix.ncols(), col_dofs.len());
        for (j, &col) in col_dofs.iter().enumerate() {
            for (i, &row) in row_dofs.iter().enumerate() {
                let value = matrix[(i, j)];
                if value != 0.0 {
                    self.coo.push(row, col, value);
                }
            }
        }
    }

    pub fn add_vector(&mut self, dofs: &[usize], vector: &DVector<f64>) {
        assert_eq!(vector.len(), dofs.len());
        for (&dof, value) in dofs.iter().zip(vector.iter()) {
            self.rhs[dof] += value;
        }
    }

    /// Adds an element contribution, including its coupling blocks.
    pub fn add_contribution(&mut self, contribution: &ElementContribution) {
        self.add_matrix(&contribution.dof_indices, &contribution.matrix);
        self.add_vector(&contribution.dof_indices, &contribution.vector);
        for block in &contribution.couplings {
            self.add_rectangular_matrix(&block.row_dofs, &block.col_dofs, &block.matrix);
        }
    }

    /// Sums duplicate entries and produces the CSR system.
    pub fn finalize(self) -> GlobalSystem {
        let matrix = CsrMatrix::from(&self.coo);
        GlobalSystem { matrix, rhs: self.rhs }
    }
}

/// Assembles the global system of all elements in `element_order`.
///
/// Element contributions are computed in parallel, each thread using its own workspace, and
/// constrained dofs are eliminated per element. The contributions are then scattered
/// sequentially in the given order. The first failing element aborts the pass.
pub fn assemble_system<A>(
    assembler: &A,
    context: &AssemblyContext,
    element_order: &[ElementId],
) -> Result<GlobalSystem, AmrError>
where
    A: ElementAssembler,
{
    let dof_map = context.dof_map;
    let workspaces: ThreadLocal<RefCell<A::Workspace>> = ThreadLocal::new();

    let contributions = element_order
        .par_iter()
        .with_min_len(16)
        .map(|&element| {
            let workspace = workspaces.get_or_try(|| assembler.new_workspace(dof_map).map(RefCell::new))?;
            let workspace = &mut *workspace.borrow_mut();
            let mut contribution = ElementContribution::default();
            assembler.assemble_element(context, workspace, element, &mut contribution)?;
            constrain_contribution(context, &mut contribution);
            Ok(contribution)
        })
        .collect::<Result<Vec<_>, AmrError>>()?;

    let mut accumulator = SystemAccumulator::new(dof_map.n_dofs());
    for contribution in &contributions {
        accumulator.add_contribution(contribution);
    }
    let system = accumulator.finalize();
    debug!(
        "Assembled {} elements into a system with {} dofs and {} nonzeros",
        element_order.len(),
        system.rhs.len(),
        system.matrix.nnz()
    );
    Ok(system)
}

fn constrain_contribution(context: &AssemblyContext, contribution: &mut ElementContribution) {
    let dof_map = context.dof_map;
    dof_map.constrain_element_matrix_and_vector(
        &mut contribution.matrix,
        &mut contribution.vector,
        &mut contribution.dof_indices,
    );

    let mut corrections = Vec::new();
    for block in &mut contribution.couplings {
        let correction = dof_map.constrain_coupling_matrix(&mut block.matrix, &mut block.row_dofs, &mut block.col_dofs);
        if correction.iter().any(|&c| c != 0.0) {
            corrections.push((block.row_dofs.clone(), correction));
        }
    }

    // Coupling corrections only touch rows, which are then folded into the element vector
    for (rows, correction) in corrections {
        for (dof, value) in rows.iter().zip(correction.iter()) {
            match contribution.dof_indices.iter().position(|d| d == dof) {
                Some(local) => contribution.vector[local] += value,
                None => {
                    let n = contribution.dof_indices.len();
                    contribution.dof_indices.push(*dof);
                    contribution.matrix.resize_mut(n + 1, n + 1, 0.0);
                    contribution.vector.resize_vertically_mut(n + 1, 0.0);
                    contribution.vector[n] += value;
                }
            }
        }
    }
}
