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

use hashbrown::HashSet;

use itertools::izip;
use ndarray::{Array2, ArrayView1, ArrayView2};
use thiserror::Error;

/// Error cases stemming from data coherence at the point of entry into [PauliList] from
/// user-provided raw arrays.
#[derive(Error, Debug)]
pub enum CoherenceError {
    #[error("`z` and `x` must have the same shape, got {z:?} and {x:?}")]
    MismatchedArrays { z: [usize; 2], x: [usize; 2] },
    #[error("`phases` ({phases}) must be the same length as the number of terms ({terms})")]
    MismatchedPhaseCount { phases: usize, terms: usize },
    #[error("`coeffs` ({coeffs}) must be the same length as `paulis` ({paulis})")]
    MismatchedCoeffCount { coeffs: usize, paulis: usize },
    #[error("phase exponents must be in the range 0 through 3")]
    PhaseOutOfRange,
    #[error("a Pauli list must contain at least one term")]
    EmptyList,
}

/// An error related to processing of a dense string label.
#[derive(Error, Debug)]
pub enum LabelError {
    #[error("labels must only contain letters from the alphabet 'IXYZ'")]
    OutsideAlphabet,
    #[error("label has no Pauli characters")]
    EmptyLabel,
    #[error("label with length {label} does not match operator width {num_qubits}")]
    WrongLengthDense { num_qubits: usize, label: usize },
    #[error("no labels provided")]
    NoLabels,
}

/// Errors raised by binary operations between lists, and by qubit-subset embedding.
#[derive(Error, Debug)]
pub enum ArithmeticError {
    #[error("mismatched numbers of qubits: {left}, {right}")]
    MismatchedQubits { left: usize, right: usize },
    #[error("index {index} is out of range for a {num_qubits}-qubit operator")]
    BadQubitIndex { index: usize, num_qubits: usize },
    #[error("index {index} is duplicated in a single specifier")]
    DuplicateQubitIndex { index: usize },
    #[error("'qargs' has {qargs} entries but the operand acts on {qubits} qubits")]
    MismatchedQargCount { qargs: usize, qubits: usize },
    #[error("cannot embed a {current}-qubit operator into {target} qubits")]
    NotEnoughQubits { current: usize, target: usize },
    #[error("cannot divide an operator by zero")]
    DivisionByZero,
    #[error("cannot sum an empty sequence of operators")]
    EmptySum,
}

/// A list of Pauli terms in the dense ZX-symplectic representation.
///
/// Each term is `(-i)^q . Z^z . X^x`, where `z` and `x` are rows of the two Boolean arrays and
/// `q` is the term's entry in `phases`, interpreted modulo 4.  A single-qubit `Y` is stored as
/// `z = x = true` with one factor of `-i` accounted for in `q`; the "group phase" of a term,
/// which is what a label prefix like `-i` denotes, is therefore `q` minus the number of `Y`s,
/// modulo 4.
///
/// Qubit 0 is the rightmost character of a dense label, matching the column at index 0 of the
/// arrays.
#[derive(Clone, Debug, PartialEq)]
pub struct PauliList {
    num_qubits: usize,
    z: Array2<bool>,
    x: Array2<bool>,
    phases: Vec<u8>,
}

/// Map a group-phase exponent onto its label prefix.  The exponent convention is `(-i)^g`.
fn group_phase_prefix(group_phase: u8) -> &'static str {
    match group_phase % 4 {
        0 => "",
        1 => "-i",
        2 => "-",
        3 => "i",
        _ => unreachable!("`x % 4` has only four values"),
    }
}

/// The number of `Y` factors in one ZX row pair, modulo 4.
fn num_ys(z: &ArrayView1<bool>, x: &ArrayView1<bool>) -> u8 {
    let count: usize = izip!(z, x).filter(|(&z, &x)| z && x).count();
    (count % 4) as u8
}

impl PauliList {
    /// Create a new Pauli list from the raw components that make it up.
    ///
    /// This checks the input values for data coherence on entry.  If you are certain you have the
    /// correct values, you can call [new_unchecked] instead.
    pub fn new(z: Array2<bool>, x: Array2<bool>, phases: Vec<u8>) -> Result<Self, CoherenceError> {
        if z.shape() != x.shape() {
            return Err(CoherenceError::MismatchedArrays {
                z: [z.nrows(), z.ncols()],
                x: [x.nrows(), x.ncols()],
            });
        }
        if phases.len() != z.nrows() {
            return Err(CoherenceError::MismatchedPhaseCount {
                phases: phases.len(),
                terms: z.nrows(),
            });
        }
        if z.nrows() == 0 {
            return Err(CoherenceError::EmptyList);
        }
        if phases.iter().any(|&phase| phase > 3) {
            return Err(CoherenceError::PhaseOutOfRange);
        }
        // SAFETY: we've just done the coherence checks.
        Ok(unsafe { Self::new_unchecked(z, x, phases) })
    }

    /// Create a new [PauliList] from the raw components without checking data coherence.
    ///
    /// # Safety
    ///
    /// It is up to the caller to ensure that the data-coherence requirements, as enumerated in
    /// the struct-level documentation, have been upheld.
    #[inline(always)]
    pub unsafe fn new_unchecked(z: Array2<bool>, x: Array2<bool>, phases: Vec<u8>) -> Self {
        Self {
            num_qubits: z.ncols(),
            z,
            x,
            phases,
        }
    }

    /// Parse a list of dense string labels into a [PauliList].
    ///
    /// Every label must have the same number of Pauli characters, and may carry one of the phase
    /// prefixes `+`, `-`, `i`, `+i` or `-i`.
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Result<Self, LabelError> {
        let Some(first) = labels.first() else {
            return Err(LabelError::NoLabels);
        };
        let (_, _, first_body) = parse_label(first.as_ref())?;
        let num_qubits = first_body.len();
        let mut z = Vec::with_capacity(labels.len() * num_qubits);
        let mut x = Vec::with_capacity(labels.len() * num_qubits);
        let mut phases = Vec::with_capacity(labels.len());
        for label in labels {
            let (group_phase, ys, body) = parse_label(label.as_ref())?;
            if body.len() != num_qubits {
                return Err(LabelError::WrongLengthDense {
                    num_qubits,
                    label: body.len(),
                });
            }
            // Continuity with the storage convention: qubit 0 is the rightmost character.
            for &letter in body.iter().rev() {
                z.push(matches!(letter, b'Z' | b'Y'));
                x.push(matches!(letter, b'X' | b'Y'));
            }
            phases.push((group_phase + ys) % 4);
        }
        let num_terms = labels.len();
        let z = Array2::from_shape_vec((num_terms, num_qubits), z)
            .expect("row-major buffer matches the array shape");
        let x = Array2::from_shape_vec((num_terms, num_qubits), x)
            .expect("row-major buffer matches the array shape");
        // SAFETY: parsing constructed coherent same-shape rows with phases below 4.
        Ok(unsafe { Self::new_unchecked(z, x, phases) })
    }

    /// Parse a single dense string label into a one-term [PauliList].
    pub fn from_label(label: &str) -> Result<Self, LabelError> {
        Self::from_labels(&[label])
    }

    /// The single identity term on `num_qubits` qubits.
    pub fn identity(num_qubits: usize) -> Self {
        // SAFETY: an all-`I` row with phase 0 is trivially coherent.
        unsafe {
            Self::new_unchecked(
                Array2::from_elem((1, num_qubits), false),
                Array2::from_elem((1, num_qubits), false),
                vec![0],
            )
        }
    }

    /// Get the number of qubits the Paulis are defined on.
    #[inline]
    pub fn num_qubits(&self) -> usize {
        self.num_qubits
    }

    /// Get the number of terms in the list.
    #[inline]
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// The internal phase exponents, one per term, in the `(-i)^q` convention.
    #[inline]
    pub fn phases(&self) -> &[u8] {
        &self.phases
    }

    /// The symplectic Z components, one row per term.
    #[inline]
    pub fn z(&self) -> ArrayView2<'_, bool> {
        self.z.view()
    }

    /// The symplectic X components, one row per term.
    #[inline]
    pub fn x(&self) -> ArrayView2<'_, bool> {
        self.x.view()
    }

    /// The group phase of the term at `index`, i.e. the phase its label prefix would show.
    pub fn group_phase(&self, index: usize) -> u8 {
        let ys = num_ys(&self.z.row(index), &self.x.row(index));
        (self.phases[index] + 4 - ys) % 4
    }

    /// The group phases of every term, in storage order.
    pub fn group_phases(&self) -> Vec<u8> {
        (0..self.len()).map(|i| self.group_phase(i)).collect()
    }

    /// Reset every term to group phase 0, returning the group phases that were removed.
    ///
    /// The caller is responsible for accounting for the removed `(-i)^g` factors elsewhere;
    /// [crate::sparse_pauli_op::SparsePauliOp] folds them into its coefficients.
    pub fn normalize_phases(&mut self) -> Vec<u8> {
        let removed = self.group_phases();
        for (i, phase) in self.phases.iter_mut().enumerate() {
            *phase = num_ys(&self.z.row(i), &self.x.row(i));
        }
        removed
    }

    /// The dense string label of the term at `index`, including any group-phase prefix.
    pub fn label_of(&self, index: usize) -> String {
        let prefix = group_phase_prefix(self.group_phase(index));
        let mut out = String::with_capacity(prefix.len() + self.num_qubits);
        out.push_str(prefix);
        for (&z, &x) in izip!(self.z.row(index), self.x.row(index)).rev() {
            out.push(match (z, x) {
                (false, false) => 'I',
                (false, true) => 'X',
                (true, false) => 'Z',
                (true, true) => 'Y',
            });
        }
        out
    }

    /// The dense string labels of every term, in storage order.
    pub fn to_labels(&self) -> Vec<String> {
        (0..self.len()).map(|i| self.label_of(i)).collect()
    }

    /// Concatenate the terms of two equal-width lists, `self` first.
    pub fn concatenate(&self, other: &Self) -> Result<Self, ArithmeticError> {
        if self.num_qubits != other.num_qubits {
            return Err(ArithmeticError::MismatchedQubits {
                left: self.num_qubits,
                right: other.num_qubits,
            });
        }
        let mut z = self.z.iter().copied().collect::<Vec<_>>();
        z.extend(other.z.iter().copied());
        let mut x = self.x.iter().copied().collect::<Vec<_>>();
        x.extend(other.x.iter().copied());
        let mut phases = self.phases.clone();
        phases.extend_from_slice(&other.phases);
        let shape = (self.len() + other.len(), self.num_qubits);
        // SAFETY: both inputs were coherent and the shapes line up by construction.
        Ok(unsafe {
            Self::new_unchecked(
                Array2::from_shape_vec(shape, z).expect("row-major buffer matches the array shape"),
                Array2::from_shape_vec(shape, x).expect("row-major buffer matches the array shape"),
                phases,
            )
        })
    }

    /// Keep only the terms at the given row indices, in the given order.
    ///
    /// # Panics
    ///
    /// If any index is out of bounds.
    pub fn select(&self, indices: &[usize]) -> Self {
        let mut z = Vec::with_capacity(indices.len() * self.num_qubits);
        let mut x = Vec::with_capacity(indices.len() * self.num_qubits);
        let mut phases = Vec::with_capacity(indices.len());
        for &index in indices {
            z.extend(self.z.row(index));
            x.extend(self.x.row(index));
            phases.push(self.phases[index]);
        }
        let shape = (indices.len(), self.num_qubits);
        // SAFETY: rows are copied verbatim from a coherent list.
        unsafe {
            Self::new_unchecked(
                Array2::from_shape_vec(shape, z).expect("row-major buffer matches the array shape"),
                Array2::from_shape_vec(shape, x).expect("row-major buffer matches the array shape"),
                phases,
            )
        }
    }

    /// Term-by-term products over the cross product of two lists.
    ///
    /// The result has `self.len() * other.len()` terms, with the pair `(i, j)` stored at row
    /// `i * other.len() + j`.  With `front` set, the pair multiplies as `self[i] . other[j]`
    /// (right-to-left operator application, the `dot` convention); without it, as
    /// `other[j] . self[i]` (the `compose` convention).
    pub fn product_cross(&self, other: &Self, front: bool) -> Result<Self, ArithmeticError> {
        if self.num_qubits != other.num_qubits {
            return Err(ArithmeticError::MismatchedQubits {
                left: self.num_qubits,
                right: other.num_qubits,
            });
        }
        let num_terms = self.len() * other.len();
        let mut z = Vec::with_capacity(num_terms * self.num_qubits);
        let mut x = Vec::with_capacity(num_terms * self.num_qubits);
        let mut phases = Vec::with_capacity(num_terms);
        for i in 0..self.len() {
            for j in 0..other.len() {
                let (left, right) = if front { (i, j) } else { (j, i) };
                let (za, xa, qa, zb, xb, qb) = if front {
                    (
                        self.z.row(left),
                        self.x.row(left),
                        self.phases[left],
                        other.z.row(right),
                        other.x.row(right),
                        other.phases[right],
                    )
                } else {
                    (
                        other.z.row(left),
                        other.x.row(left),
                        other.phases[left],
                        self.z.row(right),
                        self.x.row(right),
                        self.phases[right],
                    )
                };
                // `X^xa Z^zb = (-1)^(xa.zb) Z^zb X^xa`, so commuting the inner factors past each
                // other contributes two units of `-i` per anticommuting qubit.
                let mut anticommutations = 0usize;
                for (&za, &xa, &zb, &xb) in izip!(za, xa, zb, xb) {
                    anticommutations += (xa && zb) as usize;
                    z.push(za ^ zb);
                    x.push(xa ^ xb);
                }
                phases.push(((qa as usize + qb as usize + 2 * anticommutations) % 4) as u8);
            }
        }
        let shape = (num_terms, self.num_qubits);
        // SAFETY: the loops above fill exactly `shape` entries with phases below 4.
        Ok(unsafe {
            Self::new_unchecked(
                Array2::from_shape_vec(shape, z).expect("row-major buffer matches the array shape"),
                Array2::from_shape_vec(shape, x).expect("row-major buffer matches the array shape"),
                phases,
            )
        })
    }

    /// Qubit-concatenation over the cross product of two lists, with `other` as the lower-index
    /// register and `self` as the higher.  Row ordering matches [product_cross].
    pub fn tensor_cross(&self, other: &Self) -> Self {
        let num_terms = self.len() * other.len();
        let num_qubits = self.num_qubits + other.num_qubits;
        let mut z = Vec::with_capacity(num_terms * num_qubits);
        let mut x = Vec::with_capacity(num_terms * num_qubits);
        let mut phases = Vec::with_capacity(num_terms);
        for i in 0..self.len() {
            for j in 0..other.len() {
                z.extend(other.z.row(j));
                z.extend(self.z.row(i));
                x.extend(other.x.row(j));
                x.extend(self.x.row(i));
                phases.push((self.phases[i] + other.phases[j]) % 4);
            }
        }
        let shape = (num_terms, num_qubits);
        // SAFETY: rows are concatenations of coherent rows.
        unsafe {
            Self::new_unchecked(
                Array2::from_shape_vec(shape, z).expect("row-major buffer matches the array shape"),
                Array2::from_shape_vec(shape, x).expect("row-major buffer matches the array shape"),
                phases,
            )
        }
    }

    /// The term-wise adjoint.  ZX rows are unchanged; reversing `Z^z X^x` into `X^x Z^z` costs a
    /// sign per qubit where both components are present, and the `(-i)^q` prefix conjugates.
    pub fn adjoint(&self) -> Self {
        self.map_phases(|q, zx_overlap| (4 - q as usize % 4) % 4 + 2 * zx_overlap)
    }

    /// The term-wise transpose.  `X` and `Z` are symmetric, so only the factor reordering sign
    /// appears.
    pub fn transpose(&self) -> Self {
        self.map_phases(|q, zx_overlap| q as usize + 2 * zx_overlap)
    }

    /// The term-wise complex conjugate.  The real `Z^z X^x` part is untouched and the `(-i)^q`
    /// prefix conjugates.
    pub fn conjugate(&self) -> Self {
        self.map_phases(|q, _| (4 - q as usize % 4) % 4)
    }

    fn map_phases(&self, f: impl Fn(u8, usize) -> usize) -> Self {
        let phases = (0..self.len())
            .map(|i| {
                let zx_overlap = izip!(self.z.row(i), self.x.row(i))
                    .filter(|(&z, &x)| z && x)
                    .count();
                (f(self.phases[i], zx_overlap) % 4) as u8
            })
            .collect();
        // SAFETY: only the phases change, and they are reduced modulo 4.
        unsafe { Self::new_unchecked(self.z.clone(), self.x.clone(), phases) }
    }

    /// Embed every term into a wider register, with qubit `k` of `self` mapped onto qubit
    /// `qargs[k]` of the result and identities everywhere else.  Phases are untouched, so the
    /// group phase of each term is preserved.
    pub fn embed(&self, num_qubits: usize, qargs: &[usize]) -> Result<Self, ArithmeticError> {
        if num_qubits < self.num_qubits {
            return Err(ArithmeticError::NotEnoughQubits {
                current: self.num_qubits,
                target: num_qubits,
            });
        }
        if qargs.len() != self.num_qubits {
            return Err(ArithmeticError::MismatchedQargCount {
                qargs: qargs.len(),
                qubits: self.num_qubits,
            });
        }
        let mut seen = HashSet::with_capacity(qargs.len());
        for &index in qargs {
            if index >= num_qubits {
                return Err(ArithmeticError::BadQubitIndex { index, num_qubits });
            }
            if !seen.insert(index) {
                return Err(ArithmeticError::DuplicateQubitIndex { index });
            }
        }
        let mut z = Array2::from_elem((self.len(), num_qubits), false);
        let mut x = Array2::from_elem((self.len(), num_qubits), false);
        for i in 0..self.len() {
            for (k, &target) in qargs.iter().enumerate() {
                z[[i, target]] = self.z[[i, k]];
                x[[i, target]] = self.x[[i, k]];
            }
        }
        // SAFETY: shapes and phases are coherent by construction.
        Ok(unsafe { Self::new_unchecked(z, x, self.phases.clone()) })
    }
}

/// Split a dense label into its group-phase exponent, its Y count modulo 4, and its body.
fn parse_label(label: &str) -> Result<(u8, u8, &[u8]), LabelError> {
    let bytes = label.as_bytes();
    let bytes = bytes.strip_prefix(b"+").unwrap_or(bytes);
    let (negative, bytes) = match bytes.strip_prefix(b"-") {
        Some(rest) => (true, rest),
        None => (false, bytes),
    };
    let (imaginary, body) = match bytes.strip_prefix(b"i") {
        Some(rest) => (true, rest),
        None => (false, bytes),
    };
    if body.is_empty() {
        return Err(LabelError::EmptyLabel);
    }
    if !body.iter().all(|&b| matches!(b, b'I' | b'X' | b'Y' | b'Z')) {
        return Err(LabelError::OutsideAlphabet);
    }
    // `(-i)^g`: 1, -i, -1, i for g = 0, 1, 2, 3.
    let group_phase = match (negative, imaginary) {
        (false, false) => 0,
        (true, true) => 1,
        (true, false) => 2,
        (false, true) => 3,
    };
    let ys = (body.iter().filter(|&&b| b == b'Y').count() % 4) as u8;
    Ok((group_phase, ys, body))
}
