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

//! Sparse Pauli-operator algebra in the ZX-symplectic representation.
//!
//! The central type is [SparsePauliOp], a weighted sum of multi-qubit Pauli terms.  The terms
//! themselves live in a [PauliList], which owns the symplectic bit-array representation and the
//! phase bookkeeping of Pauli multiplication; [Operator] is the dense-matrix form the sparse
//! types convert to and from.

pub mod operator;
pub mod pauli_list;
pub mod sparse_pauli_op;

pub use operator::{Operator, OperatorError};
pub use pauli_list::{ArithmeticError, CoherenceError, LabelError, PauliList};
pub use sparse_pauli_op::{CsrMatrix, DecomposeError, SparsePauliOp, SparseTermView};
