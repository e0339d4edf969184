// This code is part of Qiskit.
//
// (C) Copyright IBM 2025
//
// This code is licensed under the Apache License, Version 2.0. You may
// obtain a copy of this license in the LICENSE.txt file in the root directory
// of this source tree or at http://www.apache.org/licenses/LICENSE-2.0.
//
// Any modifications or derivative works of this code must retain this
// copyright notice, and modified files need to carry a notice indicating
// that they have been altered from the originals.

use approx::AbsDiffEq;
use ndarray::linalg::kron;
use ndarray::{array, Array2};
use num_complex::Complex64;
use thiserror::Error;

use crate::pauli_list::LabelError;

#[derive(Error, Debug)]
pub enum OperatorError {
    #[error("operators must be square, not {0:?}")]
    NotSquare([usize; 2]),
    #[error("mismatched operator dimensions: {left}, {right}")]
    MismatchedDimensions { left: usize, right: usize },
    #[error("cannot divide an operator by zero")]
    DivisionByZero,
    #[error(transparent)]
    BadLabel(#[from] LabelError),
}

/// A dense square complex matrix with the small slice of operator algebra that the sparse
/// Pauli-sum representation converts into and is tested against.
///
/// `compose` follows the circuit-order convention: `a.compose(&b)` applies `a` first, so its
/// matrix is `b . a`.  `dot` is the plain matrix product `a . b`.
#[derive(Clone, Debug, PartialEq)]
pub struct Operator {
    data: Array2<Complex64>,
}

impl Operator {
    /// Wrap a dense matrix, rejecting non-square input.
    pub fn new(data: Array2<Complex64>) -> Result<Self, OperatorError> {
        if data.nrows() != data.ncols() {
            return Err(OperatorError::NotSquare([data.nrows(), data.ncols()]));
        }
        Ok(Self { data })
    }

    /// The identity operator on `num_qubits` qubits.
    pub fn identity(num_qubits: usize) -> Self {
        Self {
            data: Array2::eye(1 << num_qubits),
        }
    }

    /// Build the dense matrix of a phase-free dense Pauli label by Kronecker expansion.
    pub fn from_label(label: &str) -> Result<Self, OperatorError> {
        let c = |re: f64, im: f64| Complex64::new(re, im);
        let mut data = array![[c(1.0, 0.0)]];
        for letter in label.chars() {
            let single = match letter {
                'I' => array![[c(1.0, 0.0), c(0.0, 0.0)], [c(0.0, 0.0), c(1.0, 0.0)]],
                'X' => array![[c(0.0, 0.0), c(1.0, 0.0)], [c(1.0, 0.0), c(0.0, 0.0)]],
                'Y' => array![[c(0.0, 0.0), c(0.0, -1.0)], [c(0.0, 1.0), c(0.0, 0.0)]],
                'Z' => array![[c(1.0, 0.0), c(0.0, 0.0)], [c(0.0, 0.0), c(-1.0, 0.0)]],
                _ => return Err(LabelError::OutsideAlphabet.into()),
            };
            data = kron(&data, &single);
        }
        Ok(Self { data })
    }

    /// The underlying matrix.
    #[inline]
    pub fn data(&self) -> &Array2<Complex64> {
        &self.data
    }

    /// The side length of the matrix.
    #[inline]
    pub fn dim(&self) -> usize {
        self.data.nrows()
    }

    fn check_dim(&self, other: &Self) -> Result<(), OperatorError> {
        if self.dim() != other.dim() {
            return Err(OperatorError::MismatchedDimensions {
                left: self.dim(),
                right: other.dim(),
            });
        }
        Ok(())
    }

    /// Apply `self` first, then `other`: the matrix `other . self`.
    pub fn compose(&self, other: &Self) -> Result<Self, OperatorError> {
        self.check_dim(other)?;
        Ok(Self {
            data: other.data.dot(&self.data),
        })
    }

    /// The matrix product `self . other`.
    pub fn dot(&self, other: &Self) -> Result<Self, OperatorError> {
        self.check_dim(other)?;
        Ok(Self {
            data: self.data.dot(&other.data),
        })
    }

    /// Kronecker product with `other` as the lower-index register.
    pub fn tensor(&self, other: &Self) -> Self {
        Self {
            data: kron(&self.data, &other.data),
        }
    }

    /// Kronecker product with `other` as the higher-index register.
    pub fn expand(&self, other: &Self) -> Self {
        Self {
            data: kron(&other.data, &self.data),
        }
    }

    pub fn add(&self, other: &Self) -> Result<Self, OperatorError> {
        self.check_dim(other)?;
        Ok(Self {
            data: &self.data + &other.data,
        })
    }

    pub fn sub(&self, other: &Self) -> Result<Self, OperatorError> {
        self.check_dim(other)?;
        Ok(Self {
            data: &self.data - &other.data,
        })
    }

    pub fn mul(&self, scalar: Complex64) -> Self {
        Self {
            data: self.data.mapv(|value| value * scalar),
        }
    }

    pub fn div(&self, scalar: Complex64) -> Result<Self, OperatorError> {
        if scalar == Complex64::new(0.0, 0.0) {
            return Err(OperatorError::DivisionByZero);
        }
        Ok(self.mul(scalar.finv()))
    }

    pub fn adjoint(&self) -> Self {
        Self {
            data: self.data.t().mapv(|value| value.conj()),
        }
    }

    pub fn transpose(&self) -> Self {
        Self {
            data: self.data.t().to_owned(),
        }
    }

    pub fn conjugate(&self) -> Self {
        Self {
            data: self.data.mapv(|value| value.conj()),
        }
    }
}

impl AbsDiffEq for Operator {
    type Epsilon = f64;

    fn default_epsilon() -> f64 {
        f64::EPSILON
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: f64) -> bool {
        self.dim() == other.dim() && self.data.abs_diff_eq(&other.data, epsilon)
    }
}
