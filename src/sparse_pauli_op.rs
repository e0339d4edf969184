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

use ahash::RandomState;
use indexmap::IndexMap;
use ndarray::{s, Array2, ArrayView1};
use num_complex::Complex64;
use num_traits::Zero;
use thiserror::Error;

use crate::operator::Operator;
use crate::pauli_list::{ArithmeticError, CoherenceError, LabelError, PauliList};

#[derive(Error, Debug)]
pub enum DecomposeError {
    #[error("operators must be square with a power-of-two side length, not {0:?}")]
    BadShape([usize; 2]),
    #[error("{0} is too many qubits to convert to a matrix")]
    TooManyQubits(usize),
}

/// A sparse sum of weighted Pauli terms.
///
/// The terms live in a [PauliList] and the weights in a parallel coefficient array, aligned by
/// index.  Every stored term has group phase 0: any `-1`, `i` or `-i` a term picks up, whether
/// from a label prefix at construction or from the sign rules of Pauli multiplication, is folded
/// into the corresponding coefficient before the instance is handed back.
///
/// All operations are value-semantic and return fresh instances; the one deliberate exception is
/// [iadd], which appends the other operand's terms in place without merging duplicates.  Callers
/// that want deduplication ask for it explicitly with [simplify].
///
/// [iadd]: SparsePauliOp::iadd
/// [simplify]: SparsePauliOp::simplify
#[derive(Clone, Debug, PartialEq)]
pub struct SparsePauliOp {
    paulis: PauliList,
    coeffs: Vec<Complex64>,
}

/// Multiply a coefficient by `(-i)^phase`.
#[inline]
fn mul_neg_i_pow(coeff: Complex64, phase: u8) -> Complex64 {
    match phase % 4 {
        0 => coeff,
        1 => Complex64::new(coeff.im, -coeff.re),
        2 => -coeff,
        3 => Complex64::new(-coeff.im, coeff.re),
        _ => unreachable!("`x % 4` has only four values"),
    }
}

/// Pack one Boolean row into the low bits of a `u64`, column 0 at the LSb.
///
/// Callers must have checked the row is at most 64 entries wide.
fn pack_row(row: ArrayView1<bool>) -> u64 {
    row.iter()
        .enumerate()
        .fold(0, |acc, (i, &bit)| acc | ((bit as u64) << i))
}

/// Pack one Boolean row into 64-bit chunks, for use as a hash key of unbounded width.
fn pack_row_wide(row: ArrayView1<bool>) -> Vec<u64> {
    let mut out = vec![0u64; row.len().div_ceil(64)];
    for (i, &bit) in row.iter().enumerate() {
        out[i / 64] |= (bit as u64) << (i % 64);
    }
    out
}

impl SparsePauliOp {
    /// The default tolerance for treating a merged coefficient as zero.
    pub const ATOL: f64 = 1e-8;

    /// Create a new operator from a term list and an optional coefficient array.
    ///
    /// With no coefficients, every term gets weight 1.  Any group phases carried by the incoming
    /// terms are folded into the coefficients, so `("iZ", 2)` is stored as `("Z", 2i)`.
    pub fn new(
        paulis: PauliList,
        coeffs: Option<Vec<Complex64>>,
    ) -> Result<Self, CoherenceError> {
        let coeffs = match coeffs {
            Some(coeffs) => {
                if coeffs.len() != paulis.len() {
                    return Err(CoherenceError::MismatchedCoeffCount {
                        coeffs: coeffs.len(),
                        paulis: paulis.len(),
                    });
                }
                coeffs
            }
            None => vec![Complex64::new(1.0, 0.0); paulis.len()],
        };
        Ok(Self::from_parts(paulis, coeffs))
    }

    /// Assemble an operator from aligned parts, re-establishing the zero-group-phase invariant.
    fn from_parts(mut paulis: PauliList, mut coeffs: Vec<Complex64>) -> Self {
        debug_assert_eq!(paulis.len(), coeffs.len());
        for (coeff, group_phase) in coeffs.iter_mut().zip(paulis.normalize_phases()) {
            *coeff = mul_neg_i_pow(*coeff, group_phase);
        }
        Self { paulis, coeffs }
    }

    /// Parse a single dense label, phase prefix included, into a one-term operator.
    pub fn from_label(label: &str) -> Result<Self, LabelError> {
        Ok(Self::from_parts(
            PauliList::from_label(label)?,
            vec![Complex64::new(1.0, 0.0)],
        ))
    }

    /// Build an operator from `(label, coefficient)` pairs, preserving their order.
    pub fn from_list<I, S>(pairs: I) -> Result<Self, LabelError>
    where
        I: IntoIterator<Item = (S, Complex64)>,
        S: AsRef<str>,
    {
        let (labels, coeffs): (Vec<S>, Vec<Complex64>) = pairs.into_iter().unzip();
        if labels.is_empty() {
            return Err(LabelError::NoLabels);
        }
        Ok(Self::from_parts(PauliList::from_labels(&labels)?, coeffs))
    }

    /// Wrap an existing term list with all-ones coefficients.
    pub fn from_pauli_list(paulis: PauliList) -> Self {
        let coeffs = vec![Complex64::new(1.0, 0.0); paulis.len()];
        Self::from_parts(paulis, coeffs)
    }

    /// Decompose a dense operator into the Pauli basis.
    ///
    /// This is the blockwise "tensorized" decomposition: at each level the matrix splits into
    /// quadrants whose half-sums and half-differences are the coefficients of `I`, `X`, `Y` and
    /// `Z` on the highest remaining qubit.  Components with magnitude at most `tolerance`
    /// (default [ATOL]) are dropped; if everything is dropped the result is a single identity
    /// term with coefficient 0.
    ///
    /// [ATOL]: SparsePauliOp::ATOL
    pub fn from_operator(
        operator: &Operator,
        tolerance: Option<f64>,
    ) -> Result<Self, DecomposeError> {
        let matrix = operator.data();
        let side = matrix.nrows();
        if side == 0 || !side.is_power_of_two() {
            return Err(DecomposeError::BadShape([side, matrix.ncols()]));
        }
        let num_qubits = side.ilog2() as usize;
        let mut accum = DecomposeAccum {
            num_qubits,
            tolerance: tolerance.unwrap_or(Self::ATOL),
            z: Vec::new(),
            x: Vec::new(),
            phases: Vec::new(),
            coeffs: Vec::new(),
        };
        let mut chain_z = Vec::with_capacity(num_qubits);
        let mut chain_x = Vec::with_capacity(num_qubits);
        decompose_recurse(matrix, &mut chain_z, &mut chain_x, &mut accum);
        if accum.coeffs.is_empty() {
            return Ok(Self::zero(num_qubits));
        }
        let shape = (accum.coeffs.len(), num_qubits);
        let z = Array2::from_shape_vec(shape, accum.z)
            .expect("row-major buffer matches the array shape");
        let x = Array2::from_shape_vec(shape, accum.x)
            .expect("row-major buffer matches the array shape");
        // SAFETY: the recursion emits same-length rows with phases reduced modulo 4.
        let paulis = unsafe { PauliList::new_unchecked(z, x, accum.phases) };
        Ok(Self {
            paulis,
            coeffs: accum.coeffs,
        })
    }

    /// The single identity term with coefficient 0, the canonical "nothing left" operator.
    fn zero(num_qubits: usize) -> Self {
        Self {
            paulis: PauliList::identity(num_qubits),
            coeffs: vec![Complex64::zero()],
        }
    }

    /// Get the number of qubits the operator acts on.
    #[inline]
    pub fn num_qubits(&self) -> usize {
        self.paulis.num_qubits()
    }

    /// Get the number of stored terms.
    #[inline]
    pub fn len(&self) -> usize {
        self.coeffs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.coeffs.is_empty()
    }

    /// The term list.  Every term has group phase 0.
    #[inline]
    pub fn paulis(&self) -> &PauliList {
        &self.paulis
    }

    /// The coefficients, index-aligned with [paulis].
    ///
    /// [paulis]: SparsePauliOp::paulis
    #[inline]
    pub fn coeffs(&self) -> &[Complex64] {
        &self.coeffs
    }

    fn check_qubits(&self, other: &Self) -> Result<(), ArithmeticError> {
        if self.num_qubits() != other.num_qubits() {
            return Err(ArithmeticError::MismatchedQubits {
                left: self.num_qubits(),
                right: other.num_qubits(),
            });
        }
        Ok(())
    }

    /// Resolve an optional qargs specifier into an operand on `self`'s full register.
    fn embedded<'a>(
        &self,
        other: &'a Self,
        qargs: Option<&[usize]>,
    ) -> Result<std::borrow::Cow<'a, Self>, ArithmeticError> {
        match qargs {
            Some(qargs) => Ok(std::borrow::Cow::Owned(
                other.apply_layout(qargs, self.num_qubits())?,
            )),
            None => Ok(std::borrow::Cow::Borrowed(other)),
        }
    }

    /// Term-union addition: the two term lists and coefficient arrays are concatenated, with no
    /// merging of duplicates.  With `qargs`, the other operand is first embedded into `self`'s
    /// register with identities elsewhere.
    pub fn add(&self, other: &Self, qargs: Option<&[usize]>) -> Result<Self, ArithmeticError> {
        let other = self.embedded(other, qargs)?;
        self.check_qubits(&other)?;
        let paulis = self.paulis.concatenate(&other.paulis)?;
        let mut coeffs = self.coeffs.clone();
        coeffs.extend_from_slice(&other.coeffs);
        Ok(Self { paulis, coeffs })
    }

    /// As [add], with the other operand's coefficients negated.
    ///
    /// [add]: SparsePauliOp::add
    pub fn sub(&self, other: &Self, qargs: Option<&[usize]>) -> Result<Self, ArithmeticError> {
        let other = self.embedded(other, qargs)?;
        self.check_qubits(&other)?;
        let paulis = self.paulis.concatenate(&other.paulis)?;
        let mut coeffs = self.coeffs.clone();
        coeffs.extend(other.coeffs.iter().map(|coeff| -coeff));
        Ok(Self { paulis, coeffs })
    }

    /// In-place accumulating add.  Appends the other operand's terms to `self`, duplicates and
    /// all; repeated self-addition grows the term list rather than collapsing it.
    pub fn iadd(&mut self, other: &Self) -> Result<(), ArithmeticError> {
        self.paulis = self.paulis.concatenate(&other.paulis)?;
        self.coeffs.extend_from_slice(&other.coeffs);
        Ok(())
    }

    /// Composition in circuit order: `a.compose(&b)` applies `a` first, so each pair of terms
    /// multiplies as `b_j . a_i`.  The result has `self.len() * other.len()` terms with the sign
    /// of each pairwise product folded into the coefficient.  With `qargs`, the other operand is
    /// embedded into `self`'s register first; identities compose trivially, so the remaining
    /// qubits of `self` pass through untouched.
    pub fn compose(&self, other: &Self, qargs: Option<&[usize]>) -> Result<Self, ArithmeticError> {
        let other = self.embedded(other, qargs)?;
        self.check_qubits(&other)?;
        let paulis = self.paulis.product_cross(&other.paulis, false)?;
        Ok(Self::from_parts(paulis, self.cross_coeffs(&other)))
    }

    /// Right-to-left composition: each pair of terms multiplies as `a_i . b_j`.
    pub fn dot(&self, other: &Self, qargs: Option<&[usize]>) -> Result<Self, ArithmeticError> {
        let other = self.embedded(other, qargs)?;
        self.check_qubits(&other)?;
        let paulis = self.paulis.product_cross(&other.paulis, true)?;
        Ok(Self::from_parts(paulis, self.cross_coeffs(&other)))
    }

    fn cross_coeffs(&self, other: &Self) -> Vec<Complex64> {
        let mut coeffs = Vec::with_capacity(self.len() * other.len());
        for &left in &self.coeffs {
            for &right in &other.coeffs {
                coeffs.push(left * right);
            }
        }
        coeffs
    }

    /// Tensor product with `other` as the lower-index register.
    pub fn tensor(&self, other: &Self) -> Self {
        Self::from_parts(self.paulis.tensor_cross(&other.paulis), self.cross_coeffs(other))
    }

    /// Tensor product with `other` as the higher-index register.
    pub fn expand(&self, other: &Self) -> Self {
        other.tensor(self)
    }

    pub fn adjoint(&self) -> Self {
        let coeffs = self.coeffs.iter().map(|coeff| coeff.conj()).collect();
        Self::from_parts(self.paulis.adjoint(), coeffs)
    }

    pub fn transpose(&self) -> Self {
        Self::from_parts(self.paulis.transpose(), self.coeffs.clone())
    }

    pub fn conjugate(&self) -> Self {
        let coeffs = self.coeffs.iter().map(|coeff| coeff.conj()).collect();
        Self::from_parts(self.paulis.conjugate(), coeffs)
    }

    /// Multiply every coefficient by a scalar.  Multiplying by exactly zero is allowed.
    pub fn mul(&self, scalar: Complex64) -> Self {
        Self {
            paulis: self.paulis.clone(),
            coeffs: self.coeffs.iter().map(|coeff| coeff * scalar).collect(),
        }
    }

    /// Divide every coefficient by a scalar.  Dividing by exactly zero is an error, raised
    /// before any coefficient is touched.
    pub fn div(&self, scalar: Complex64) -> Result<Self, ArithmeticError> {
        if scalar.is_zero() {
            return Err(ArithmeticError::DivisionByZero);
        }
        Ok(self.mul(scalar.finv()))
    }

    pub fn neg(&self) -> Self {
        self.mul(Complex64::new(-1.0, 0.0))
    }

    /// Embed this operator into a wider register, with qubit `k` mapped onto `qargs[k]` and
    /// identities on every other qubit.  This is the subsystem-selection backing of the `qargs`
    /// forms of [add], [sub], [compose] and [dot].
    ///
    /// [add]: SparsePauliOp::add
    /// [sub]: SparsePauliOp::sub
    /// [compose]: SparsePauliOp::compose
    /// [dot]: SparsePauliOp::dot
    pub fn apply_layout(
        &self,
        qargs: &[usize],
        num_qubits: usize,
    ) -> Result<Self, ArithmeticError> {
        Ok(Self {
            paulis: self.paulis.embed(num_qubits, qargs)?,
            coeffs: self.coeffs.clone(),
        })
    }

    /// Merge duplicate Pauli terms and drop the merged coefficients that are zero to within
    /// `tolerance` (default [ATOL]) in both their real and imaginary parts.
    ///
    /// Surviving groups come out sorted by dense label, so two operators that are equal up to
    /// term order simplify to equal values.  If every group is dropped the result is a single
    /// identity term with coefficient 0, never a zero-length operator.
    ///
    /// [ATOL]: SparsePauliOp::ATOL
    pub fn simplify(&self, tolerance: Option<f64>) -> Self {
        let tolerance = tolerance.unwrap_or(Self::ATOL);
        let zs = self.paulis.z();
        let xs = self.paulis.x();
        let mut groups = IndexMap::<(Vec<u64>, Vec<u64>), (usize, Complex64), RandomState>::
            with_capacity_and_hasher(self.len(), RandomState::new());
        for i in 0..self.len() {
            let key = (pack_row_wide(zs.row(i)), pack_row_wide(xs.row(i)));
            groups
                .entry(key)
                .and_modify(|(_, sum)| *sum += self.coeffs[i])
                .or_insert((i, self.coeffs[i]));
        }
        let mut survivors: Vec<(String, usize, Complex64)> = groups
            .into_values()
            .filter(|(_, sum)| sum.re.abs() > tolerance || sum.im.abs() > tolerance)
            .map(|(index, sum)| (self.paulis.label_of(index), index, sum))
            .collect();
        if survivors.is_empty() {
            return Self::zero(self.num_qubits());
        }
        survivors.sort_unstable_by(|left, right| left.0.cmp(&right.0));
        let indices: Vec<usize> = survivors.iter().map(|(_, index, _)| *index).collect();
        let coeffs = survivors.into_iter().map(|(_, _, sum)| sum).collect();
        Self {
            paulis: self.paulis.select(&indices),
            coeffs,
        }
    }

    /// Round the real and imaginary part of every coefficient to zero independently when its
    /// absolute value is at most `tolerance`, then drop the terms whose coefficient became
    /// exactly zero.  Duplicate terms are left unmerged.  If every term is dropped the result is
    /// a single identity term with coefficient 0.
    pub fn chop(&self, tolerance: f64) -> Self {
        let mut indices = Vec::with_capacity(self.len());
        let mut coeffs = Vec::with_capacity(self.len());
        for (i, coeff) in self.coeffs.iter().enumerate() {
            let re = if coeff.re.abs() <= tolerance { 0.0 } else { coeff.re };
            let im = if coeff.im.abs() <= tolerance { 0.0 } else { coeff.im };
            if re == 0.0 && im == 0.0 {
                continue;
            }
            indices.push(i);
            coeffs.push(Complex64::new(re, im));
        }
        if indices.is_empty() {
            return Self::zero(self.num_qubits());
        }
        Self {
            paulis: self.paulis.select(&indices),
            coeffs,
        }
    }

    /// Concatenate a sequence of operators into their sum, preserving argument order.  Fails on
    /// an empty sequence and on mixed qubit counts, before any accumulation.
    pub fn sum(operators: &[Self]) -> Result<Self, ArithmeticError> {
        let Some((first, rest)) = operators.split_first() else {
            return Err(ArithmeticError::EmptySum);
        };
        for other in rest {
            first.check_qubits(other)?;
        }
        let mut out = first.clone();
        for other in rest {
            out.iadd(other)?;
        }
        Ok(out)
    }

    /// Get a view onto one term of the sum.
    ///
    /// # Panics
    ///
    /// If the index is out of bounds.
    pub fn term(&self, index: usize) -> SparseTermView<'_> {
        debug_assert!(index < self.len(), "index {index} out of bounds");
        SparseTermView { op: self, index }
    }

    /// Iterate over the individual terms of the sum, in storage order.
    pub fn iter(&'_ self) -> impl ExactSizeIterator<Item = SparseTermView<'_>> + '_ {
        (0..self.len()).map(|index| SparseTermView { op: self, index })
    }

    /// Iterate over `(label, coefficient)` pairs, in storage order.  Labels never carry a phase
    /// prefix, because stored terms have group phase 0.
    pub fn label_iter(&'_ self) -> impl ExactSizeIterator<Item = (String, Complex64)> + '_ {
        (0..self.len()).map(|i| (self.paulis.label_of(i), self.coeffs[i]))
    }

    /// Materialize [label_iter] as an ordered list.
    ///
    /// [label_iter]: SparsePauliOp::label_iter
    pub fn to_list(&self) -> Vec<(String, Complex64)> {
        self.label_iter().collect()
    }

    fn check_matrix_width(&self) -> Result<(), DecomposeError> {
        if self.num_qubits() > 63 {
            return Err(DecomposeError::TooManyQubits(self.num_qubits()));
        }
        Ok(())
    }

    /// Iterate over the dense matrix of each term, scaled by its coefficient, in storage order.
    pub fn matrix_iter(
        &'_ self,
    ) -> Result<impl ExactSizeIterator<Item = Array2<Complex64>> + '_, DecomposeError> {
        self.check_matrix_width()?;
        Ok((0..self.len()).map(|i| self.dense_term_matrix(i)))
    }

    /// Iterate over a CSR encoding of each term's matrix, in storage order.  A Pauli-term
    /// matrix has exactly one entry per row, so the encoding is exact.
    pub fn sparse_matrix_iter(
        &'_ self,
    ) -> Result<impl ExactSizeIterator<Item = CsrMatrix> + '_, DecomposeError> {
        self.check_matrix_width()?;
        Ok((0..self.len()).map(|i| self.sparse_term_matrix(i)))
    }

    /// Bit-pack the term at `index` into column and parity masks, with the phase pulled into
    /// the coefficient so that it directly scales matrix entries.
    fn term_masks(&self, index: usize) -> (u64, u64, Complex64) {
        let x_like = pack_row(self.paulis.x().row(index));
        let z_like = pack_row(self.paulis.z().row(index));
        let coeff = mul_neg_i_pow(self.coeffs[index], self.paulis.phases()[index]);
        (x_like, z_like, coeff)
    }

    fn dense_term_matrix(&self, index: usize) -> Array2<Complex64> {
        let (x_like, z_like, coeff) = self.term_masks(index);
        let side = 1usize << self.num_qubits();
        let mut out = Array2::zeros((side, side));
        for row in 0..side {
            let col = row ^ x_like as usize;
            out[[row, col]] = if (row as u64 & z_like).count_ones() & 1 == 1 {
                -coeff
            } else {
                coeff
            };
        }
        out
    }

    fn sparse_term_matrix(&self, index: usize) -> CsrMatrix {
        let (x_like, z_like, coeff) = self.term_masks(index);
        let side = 1usize << self.num_qubits();
        let mut data = Vec::with_capacity(side);
        let mut indices = Vec::with_capacity(side);
        for row in 0..side {
            indices.push(row ^ x_like as usize);
            data.push(if (row as u64 & z_like).count_ones() & 1 == 1 {
                -coeff
            } else {
                coeff
            });
        }
        CsrMatrix {
            side,
            data,
            indices,
            indptr: (0..=side).collect(),
        }
    }

    /// Sum every term's matrix into one dense `2^Q x 2^Q` matrix.
    ///
    /// `row ^ x_like` gives the column of each term's entry in a row, and the parity of
    /// `row & z_like` its sign, so each term is accumulated in a single sweep of the rows.
    pub fn to_matrix(&self) -> Result<Array2<Complex64>, DecomposeError> {
        self.check_matrix_width()?;
        let side = 1usize << self.num_qubits();
        let mut out = Array2::zeros((side, side));
        for index in 0..self.len() {
            let (x_like, z_like, coeff) = self.term_masks(index);
            for row in 0..side {
                let col = row ^ x_like as usize;
                out[[row, col]] += if (row as u64 & z_like).count_ones() & 1 == 1 {
                    -coeff
                } else {
                    coeff
                };
            }
        }
        Ok(out)
    }

    /// Convert into the dense-operator representation.
    pub fn to_operator(&self) -> Result<Operator, DecomposeError> {
        Ok(Operator::new(self.to_matrix()?).expect("a Pauli-sum matrix is square"))
    }
}

/// A view onto a single term of a [SparsePauliOp].
#[derive(Clone, Copy, Debug)]
pub struct SparseTermView<'a> {
    op: &'a SparsePauliOp,
    index: usize,
}

impl SparseTermView<'_> {
    #[inline]
    pub fn coeff(&self) -> Complex64 {
        self.op.coeffs[self.index]
    }

    pub fn label(&self) -> String {
        self.op.paulis.label_of(self.index)
    }

    /// Convert this view into an owning single-term [SparsePauliOp] of the same data.
    pub fn to_term(&self) -> SparsePauliOp {
        SparsePauliOp {
            paulis: self.op.paulis.select(&[self.index]),
            coeffs: vec![self.op.coeffs[self.index]],
        }
    }
}

/// A compressed-sparse-row matrix with one entry per row, as produced for single Pauli terms.
#[derive(Clone, Debug, PartialEq)]
pub struct CsrMatrix {
    side: usize,
    data: Vec<Complex64>,
    indices: Vec<usize>,
    indptr: Vec<usize>,
}

impl CsrMatrix {
    #[inline]
    pub fn side(&self) -> usize {
        self.side
    }

    #[inline]
    pub fn data(&self) -> &[Complex64] {
        &self.data
    }

    #[inline]
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    #[inline]
    pub fn indptr(&self) -> &[usize] {
        &self.indptr
    }

    pub fn to_dense(&self) -> Array2<Complex64> {
        let mut out = Array2::zeros((self.side, self.side));
        for row in 0..self.side {
            for entry in self.indptr[row]..self.indptr[row + 1] {
                out[[row, self.indices[entry]]] += self.data[entry];
            }
        }
        out
    }
}

struct DecomposeAccum {
    num_qubits: usize,
    tolerance: f64,
    z: Vec<bool>,
    x: Vec<bool>,
    phases: Vec<u8>,
    coeffs: Vec<Complex64>,
}

impl DecomposeAccum {
    /// Record one fully-decomposed Pauli chain, if its coefficient survives the tolerance.
    /// `chain_z`/`chain_x` hold the per-qubit components from the highest qubit down.
    fn push(&mut self, chain_z: &[bool], chain_x: &[bool], coeff: Complex64) {
        if coeff.norm() <= self.tolerance {
            return;
        }
        debug_assert_eq!(chain_z.len(), self.num_qubits);
        self.z.extend(chain_z.iter().rev());
        self.x.extend(chain_x.iter().rev());
        let ys = chain_z
            .iter()
            .zip(chain_x)
            .filter(|(&z, &x)| z && x)
            .count();
        self.phases.push((ys % 4) as u8);
        self.coeffs.push(coeff);
    }
}

/// One level of the blockwise Pauli decomposition.
///
/// Splitting the matrix on its highest qubit as `M = a(x)I + b(x)X + c(x)Y + d(x)Z` gives
/// `a = (TL + BR)/2`, `b = (TR + BL)/2`, `c = i(TR - BL)/2` and `d = (TL - BR)/2` blockwise,
/// and each block then decomposes recursively over the remaining qubits.
fn decompose_recurse(
    block: &Array2<Complex64>,
    chain_z: &mut Vec<bool>,
    chain_x: &mut Vec<bool>,
    out: &mut DecomposeAccum,
) {
    if block.nrows() == 1 {
        out.push(chain_z, chain_x, block[[0, 0]]);
        return;
    }
    let mid = block.nrows() / 2;
    let tl = block.slice(s![..mid, ..mid]);
    let tr = block.slice(s![..mid, mid..]);
    let bl = block.slice(s![mid.., ..mid]);
    let br = block.slice(s![mid.., mid..]);
    let half = Complex64::new(0.5, 0.0);
    let half_i = Complex64::new(0.0, 0.5);
    let children = [
        ((false, false), (&tl + &br).mapv(|value| value * half)),
        ((false, true), (&tr + &bl).mapv(|value| value * half)),
        ((true, true), (&tr - &bl).mapv(|value| value * half_i)),
        ((true, false), (&tl - &br).mapv(|value| value * half)),
    ];
    for ((z, x), child) in children {
        chain_z.push(z);
        chain_x.push(x);
        decompose_recurse(&child, chain_z, chain_x, out);
        chain_z.pop();
        chain_x.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{Rng, SeedableRng};
    use rand_pcg::Pcg64Mcg;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    fn op_from(pairs: &[(&str, Complex64)]) -> SparsePauliOp {
        SparsePauliOp::from_list(pairs.iter().map(|&(label, coeff)| (label, coeff))).unwrap()
    }

    fn random_op(rng: &mut Pcg64Mcg, num_qubits: usize, num_terms: usize) -> SparsePauliOp {
        let pairs: Vec<(String, Complex64)> = (0..num_terms)
            .map(|_| {
                let label: String = (0..num_qubits)
                    .map(|_| ['I', 'X', 'Y', 'Z'][rng.random_range(0..4)])
                    .collect();
                let coeff = c(rng.random_range(-1.0..1.0), rng.random_range(-1.0..1.0));
                (label, coeff)
            })
            .collect();
        SparsePauliOp::from_list(pairs).unwrap()
    }

    fn assert_zero_group_phases(op: &SparsePauliOp) {
        assert!(op.paulis().group_phases().iter().all(|&phase| phase == 0));
    }

    #[test]
    fn construction_folds_label_phases() {
        let labels = ["I", "X", "Y", "-Z", "iZ", "-iX"];
        let paulis = PauliList::from_labels(&labels).unwrap();
        let op = SparsePauliOp::new(
            paulis.clone(),
            Some((1..=6).map(|k| c(k as f64, 0.0)).collect()),
        )
        .unwrap();
        assert_eq!(
            op.coeffs(),
            &[
                c(1.0, 0.0),
                c(2.0, 0.0),
                c(3.0, 0.0),
                c(-4.0, 0.0),
                c(0.0, 5.0),
                c(0.0, -6.0)
            ]
        );
        assert_eq!(op.paulis().to_labels(), ["I", "X", "Y", "Z", "Z", "X"]);
        assert_zero_group_phases(&op);

        let ones = SparsePauliOp::new(paulis, None).unwrap();
        assert_eq!(
            ones.coeffs(),
            &[
                c(1.0, 0.0),
                c(1.0, 0.0),
                c(1.0, 0.0),
                c(-1.0, 0.0),
                c(0.0, 1.0),
                c(0.0, -1.0)
            ]
        );
    }

    #[test]
    fn construction_rejects_mismatched_coeffs() {
        let paulis = PauliList::from_labels(&["X", "Z"]).unwrap();
        assert!(matches!(
            SparsePauliOp::new(paulis, Some(vec![c(1.0, 0.0)])),
            Err(CoherenceError::MismatchedCoeffCount {
                coeffs: 1,
                paulis: 2
            })
        ));
    }

    #[test]
    fn from_list_round_trip() {
        let pairs = [
            ("XXZ", c(3.0, 0.0)),
            ("IXI", c(5.5, 0.0)),
            ("YZZ", c(0.0, -1.0)),
            ("III", c(23.3333, 0.0)),
        ];
        let op = op_from(&pairs);
        let listed = op.to_list();
        assert_eq!(listed.len(), pairs.len());
        for ((label, coeff), (target_label, target_coeff)) in listed.iter().zip(&pairs) {
            assert_eq!(label, target_label);
            assert_eq!(coeff, target_coeff);
        }
    }

    #[test]
    fn from_list_rejects_empty() {
        let empty: Vec<(&str, Complex64)> = Vec::new();
        assert!(matches!(
            SparsePauliOp::from_list(empty),
            Err(LabelError::NoLabels)
        ));
    }

    #[test]
    fn clones_are_independent() {
        let op = op_from(&[("XY", c(1.0, 0.0))]);
        let mut copy = op.clone();
        copy.iadd(&op).unwrap();
        assert_eq!(op.len(), 1);
        assert_eq!(copy.len(), 2);
        assert_ne!(op, copy);
    }

    #[test]
    fn from_operator_recovers_pauli_labels() {
        for first in ['I', 'X', 'Y', 'Z'] {
            for second in ['I', 'X', 'Y', 'Z'] {
                let label: String = [first, second].iter().collect();
                let dense = Operator::from_label(&label).unwrap();
                let op = SparsePauliOp::from_operator(&dense, None).unwrap();
                assert_eq!(op.to_list(), vec![(label, c(1.0, 0.0))]);
                assert_zero_group_phases(&op);
            }
        }
    }

    #[test]
    fn from_operator_rejects_bad_shapes() {
        let dense = Operator::new(Array2::zeros((3, 3))).unwrap();
        assert!(matches!(
            SparsePauliOp::from_operator(&dense, None),
            Err(DecomposeError::BadShape([3, 3]))
        ));
    }

    #[test]
    fn from_operator_of_zero_matrix_is_identity_zero() {
        let dense = Operator::new(Array2::zeros((4, 4))).unwrap();
        let op = SparsePauliOp::from_operator(&dense, None).unwrap();
        assert_eq!(op.to_list(), vec![("II".to_owned(), c(0.0, 0.0))]);
    }

    #[test]
    fn from_operator_round_trips_random_sums() {
        let mut rng = Pcg64Mcg::seed_from_u64(1994);
        for num_qubits in 1..=3 {
            let op = random_op(&mut rng, num_qubits, 1 << num_qubits).simplify(None);
            let recovered =
                SparsePauliOp::from_operator(&op.to_operator().unwrap(), Some(1e-12)).unwrap();
            assert_abs_diff_eq!(
                recovered.to_operator().unwrap(),
                op.to_operator().unwrap(),
                epsilon = 1e-10
            );
        }
    }

    #[test]
    fn to_matrix_matches_label_expansion() {
        let pairs = [
            ("XI", c(-3.0, 0.0)),
            ("YZ", c(0.0, 4.4)),
            ("YY", c(0.2, -0.1)),
            ("ZZ", c(66.12, 0.0)),
        ];
        let op = op_from(&pairs);
        let mut target = Array2::zeros((4, 4));
        for (label, coeff) in &pairs {
            target = target + Operator::from_label(label).unwrap().data().mapv(|v| v * coeff);
        }
        assert_abs_diff_eq!(
            op.to_operator().unwrap(),
            Operator::new(target).unwrap(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn binary_algebra_matches_dense() {
        let mut rng = Pcg64Mcg::seed_from_u64(1994);
        for num_qubits in 1..=3 {
            let a = random_op(&mut rng, num_qubits, 1 << num_qubits);
            let b = random_op(&mut rng, num_qubits, 1 << num_qubits);
            let dense_a = a.to_operator().unwrap();
            let dense_b = b.to_operator().unwrap();
            let cases: Vec<(SparsePauliOp, Operator)> = vec![
                (a.add(&b, None).unwrap(), dense_a.add(&dense_b).unwrap()),
                (a.sub(&b, None).unwrap(), dense_a.sub(&dense_b).unwrap()),
                (
                    a.compose(&b, None).unwrap(),
                    dense_a.compose(&dense_b).unwrap(),
                ),
                (a.dot(&b, None).unwrap(), dense_a.dot(&dense_b).unwrap()),
                (a.tensor(&b), dense_a.tensor(&dense_b)),
                (a.expand(&b), dense_a.expand(&dense_b)),
            ];
            for (sparse, dense) in cases {
                assert_abs_diff_eq!(sparse.to_operator().unwrap(), dense, epsilon = 1e-12);
                assert_zero_group_phases(&sparse);
            }
        }
    }

    #[test]
    fn unary_algebra_matches_dense() {
        let mut rng = Pcg64Mcg::seed_from_u64(7);
        let scalar = c(-3.0, 4.4);
        for num_qubits in 1..=3 {
            let op = random_op(&mut rng, num_qubits, 1 << num_qubits);
            let dense = op.to_operator().unwrap();
            let cases: Vec<(SparsePauliOp, Operator)> = vec![
                (op.adjoint(), dense.adjoint()),
                (op.transpose(), dense.transpose()),
                (op.conjugate(), dense.conjugate()),
                (op.mul(scalar), dense.mul(scalar)),
                (op.div(scalar).unwrap(), dense.div(scalar).unwrap()),
                (op.neg(), dense.mul(c(-1.0, 0.0))),
            ];
            for (sparse, target) in cases {
                assert_abs_diff_eq!(sparse.to_operator().unwrap(), target, epsilon = 1e-12);
                assert_zero_group_phases(&sparse);
            }
        }
    }

    #[test]
    fn multiply_by_zero_is_allowed() {
        let op = op_from(&[("XZ", c(2.0, -1.0))]);
        let zeroed = op.mul(c(0.0, 0.0));
        assert_eq!(zeroed.coeffs(), &[c(0.0, 0.0)]);
        assert!(matches!(
            op.div(c(0.0, 0.0)),
            Err(ArithmeticError::DivisionByZero)
        ));
    }

    #[test]
    fn mismatched_qubits_fail_fast() {
        let a = op_from(&[("XX", c(1.0, 0.0))]);
        let b = op_from(&[("X", c(1.0, 0.0))]);
        assert!(matches!(
            a.add(&b, None),
            Err(ArithmeticError::MismatchedQubits { left: 2, right: 1 })
        ));
        assert!(matches!(a.compose(&b, None), Err(_)));
    }

    #[test]
    fn apply_layout_matches_dense_kron() {
        let op = op_from(&[("Y", c(2.0, 0.0))]);
        let dense = op.to_operator().unwrap();
        let eye = |qubits: usize| Operator::identity(qubits);
        let targets = [
            (vec![0usize], eye(2).tensor(&dense)),
            (vec![1], eye(1).tensor(&dense).tensor(&eye(1))),
            (vec![2], dense.tensor(&eye(2))),
        ];
        for (qargs, target) in targets {
            let embedded = op.apply_layout(&qargs, 3).unwrap();
            assert_abs_diff_eq!(embedded.to_operator().unwrap(), target, epsilon = 1e-12);
            assert_zero_group_phases(&embedded);
        }
    }

    #[test]
    fn qargs_operations_match_embedded_operand() {
        let mut rng = Pcg64Mcg::seed_from_u64(42);
        let qargs_cases: [&[usize]; 3] = [&[1], &[2, 0], &[0, 2, 1]];
        for qargs in qargs_cases {
            let a = random_op(&mut rng, 3, 8);
            let b = random_op(&mut rng, qargs.len(), 1 << qargs.len());
            let embedded = b.apply_layout(qargs, 3).unwrap();
            for (with_qargs, target) in [
                (a.compose(&b, Some(qargs)), a.compose(&embedded, None)),
                (a.dot(&b, Some(qargs)), a.dot(&embedded, None)),
                (a.add(&b, Some(qargs)), a.add(&embedded, None)),
                (a.sub(&b, Some(qargs)), a.sub(&embedded, None)),
            ] {
                let with_qargs = with_qargs.unwrap();
                assert_eq!(with_qargs, target.unwrap());
                assert_zero_group_phases(&with_qargs);
            }
        }
    }

    #[test]
    fn simplify_merges_and_drops() {
        let op = op_from(&[
            ("IXI", c(3.0, 1.0)),
            ("IXI", c(-3.0, -1.0)),
            ("ZZZ", c(0.0, 0.0)),
            ("III", c(4.0, 0.0)),
            ("III", c(-5.0, 0.0)),
            ("XXX", c(2.2, 0.0)),
            ("XXX", c(0.0, -1.1)),
        ]);
        let target = op_from(&[("III", c(-1.0, 0.0)), ("XXX", c(2.2, -1.1))]);
        let simplified = op.simplify(None);
        assert_eq!(simplified, target.simplify(None));
        assert_eq!(simplified.to_list(), target.to_list());
        assert_zero_group_phases(&simplified);
    }

    #[test]
    fn simplify_is_order_independent() {
        let forward = op_from(&[("XX", c(1.0, 0.0)), ("ZI", c(2.0, 0.0))]);
        let backward = op_from(&[("ZI", c(2.0, 0.0)), ("XX", c(1.0, 0.0))]);
        assert_ne!(forward, backward);
        assert_eq!(forward.simplify(None), backward.simplify(None));
    }

    #[test]
    fn simplify_preserves_matrix_after_accumulation() {
        let mut rng = Pcg64Mcg::seed_from_u64(11);
        for num_adds in 0..4 {
            let mut op = random_op(&mut rng, 2, 4);
            for _ in 0..num_adds {
                let copy = op.clone();
                op.iadd(&copy).unwrap();
            }
            assert_eq!(op.len(), 4 << num_adds);
            let simplified = op.simplify(None);
            assert!(simplified.len() <= 4);
            assert_abs_diff_eq!(
                simplified.to_operator().unwrap(),
                op.to_operator().unwrap(),
                epsilon = 1e-10
            );
        }
    }

    #[test]
    fn simplify_of_nothing_is_identity_zero() {
        let op = op_from(&[("XZ", c(1.0, 0.0)), ("XZ", c(-1.0, 0.0))]);
        let simplified = op.simplify(None);
        assert_eq!(simplified.to_list(), vec![("II".to_owned(), c(0.0, 0.0))]);
    }

    #[test]
    fn chop_truncates_real_and_imaginary_independently() {
        let eps = 1e-10;
        let op = op_from(&[
            ("XYZ", c(eps, eps)),
            ("ZII", c(1.0, eps)),
            ("ZII", c(eps, 1.0)),
            ("YZY", c(1.0, 1.0)),
        ]);
        let chopped = op.chop(eps);
        assert_eq!(chopped.coeffs(), &[c(1.0, 0.0), c(0.0, 1.0), c(1.0, 1.0)]);
        assert_eq!(chopped.paulis().to_labels(), ["ZII", "ZII", "YZY"]);
    }

    #[test]
    fn chop_all_falls_back_to_identity_zero() {
        let eps = 1e-10;
        let op = op_from(&[("X", c(eps, 0.0)), ("Z", c(0.0, eps))]);
        let chopped = op.chop(eps);
        assert_eq!(chopped.to_list(), vec![("I".to_owned(), c(0.0, 0.0))]);
    }

    #[test]
    fn sum_matches_sequential_addition() {
        let mut rng = Pcg64Mcg::seed_from_u64(23);
        for num_ops in 1..=4 {
            let ops: Vec<SparsePauliOp> =
                (0..num_ops).map(|_| random_op(&mut rng, 2, 4)).collect();
            let summed = SparsePauliOp::sum(&ops).unwrap();
            let mut target = ops[0].clone();
            for other in &ops[1..] {
                target = target.add(other, None).unwrap();
            }
            assert_eq!(summed, target);
        }
    }

    #[test]
    fn sum_rejects_bad_input() {
        assert!(matches!(
            SparsePauliOp::sum(&[]),
            Err(ArithmeticError::EmptySum)
        ));
        let ops = [
            op_from(&[("X", c(1.0, 0.0))]),
            op_from(&[("XX", c(1.0, 0.0))]),
        ];
        assert!(matches!(
            SparsePauliOp::sum(&ops),
            Err(ArithmeticError::MismatchedQubits { .. })
        ));
    }

    #[test]
    fn iteration_yields_single_term_operators() {
        let pairs = [
            ("III", c(1.0, 0.0)),
            ("IXI", c(2.0, 0.0)),
            ("IYY", c(3.0, 0.0)),
            ("YIZ", c(4.0, 0.0)),
            ("XYZ", c(5.0, 0.0)),
            ("III", c(6.0, 0.0)),
        ];
        let op = op_from(&pairs);
        assert_eq!(op.iter().len(), pairs.len());
        for (index, view) in op.iter().enumerate() {
            let single = view.to_term();
            assert_eq!(single, op.term(index).to_term());
            assert_eq!(single, op_from(&pairs[index..index + 1]));
            assert_eq!(single.len(), 1);
        }
        // A second pass sees the same sequence.
        let first: Vec<String> = op.iter().map(|view| view.label()).collect();
        let second: Vec<String> = op.iter().map(|view| view.label()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn label_and_matrix_iteration_agree() {
        let pairs = [
            ("II", c(1.0, 0.0)),
            ("XY", c(0.0, 2.0)),
            ("ZZ", c(-3.0, 0.5)),
        ];
        let op = op_from(&pairs);
        let labels: Vec<(String, Complex64)> = op.label_iter().collect();
        assert_eq!(labels.len(), op.iter().len());
        for ((label, coeff), (target_label, target_coeff)) in labels.iter().zip(&pairs) {
            assert_eq!(label, target_label);
            assert_eq!(coeff, target_coeff);
        }
        for (matrix, (label, coeff)) in op.matrix_iter().unwrap().zip(&pairs) {
            let target = Operator::from_label(label).unwrap().data().mapv(|v| v * coeff);
            assert_abs_diff_eq!(
                Operator::new(matrix).unwrap(),
                Operator::new(target).unwrap(),
                epsilon = 1e-12
            );
        }
        for (sparse, dense) in op.sparse_matrix_iter().unwrap().zip(op.matrix_iter().unwrap()) {
            assert_eq!(sparse.to_dense(), dense);
        }
    }

    #[test]
    fn equality_is_order_sensitive() {
        let forward = op_from(&[("XI", c(1.0, 0.0)), ("IZ", c(2.0, 0.0))]);
        let backward = op_from(&[("IZ", c(2.0, 0.0)), ("XI", c(1.0, 0.0))]);
        assert_ne!(forward, backward);
        assert_eq!(forward, forward.clone());
    }
}
