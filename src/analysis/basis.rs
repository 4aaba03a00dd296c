//! 精确 P-不变量基：对 `Cᵀ` 做无分数（整数）Gauss–Jordan 消元求零空间，
//! 每个基向量都是首个非零分量为正的互素整数向量。
use std::collections::BTreeMap;

use num::bigint::BigInt;
use num::integer::Integer;
use num::traits::{One, Signed, ToPrimitive, Zero};

use crate::net::Model;

use super::invariants::{PlaceInvariant, structurally_verify};
use super::matrix::IncidenceMatrix;

/// Integer basis of `{ w | wᵀ C = 0 }`, one invariant per free column.
///
/// Vectors whose entries do not fit in `i64` are skipped with a warning.
pub fn invariant_basis(model: &Model, matrix: &IncidenceMatrix) -> Vec<PlaceInvariant> {
    let places = matrix.places().len();
    let transitions = matrix.transitions().len();
    let mut transposed = vec![vec![BigInt::zero(); places]; transitions];
    for (place, row) in matrix.rows().iter().enumerate() {
        for (transition, value) in row.iter().enumerate() {
            transposed[transition][place] = BigInt::from(*value);
        }
    }

    compute_nullspace(transposed, places)
        .into_iter()
        .filter_map(|vector| {
            let mut weights = BTreeMap::new();
            for (place, value) in vector.iter().enumerate() {
                if value.is_zero() {
                    continue;
                }
                let Some(weight) = value.to_i64() else {
                    log::warn!("basis vector coefficient {} overflows i64, skipped", value);
                    return None;
                };
                weights.insert(matrix.places()[place].clone(), weight);
            }
            let mut invariant = PlaceInvariant::from_weights(model, weights);
            invariant.verified = structurally_verify(&invariant, matrix);
            Some(invariant)
        })
        .collect()
}

/// Fraction-free Gauss–Jordan elimination over the integers.
///
/// Rows are combined as `p * row - f * pivot` and reduced by their gcd, so no
/// rationals are needed. Returns the pivot column of each leading row.
fn eliminate(rows: &mut [Vec<BigInt>], width: usize) -> Vec<usize> {
    let mut pivots = Vec::new();
    for col in 0..width {
        let rank = pivots.len();
        if rank == rows.len() {
            break;
        }
        let Some(found) = (rank..rows.len()).find(|&row| !rows[row][col].is_zero()) else {
            continue;
        };
        rows.swap(rank, found);
        let pivot = rows[rank].clone();

        for (index, row) in rows.iter_mut().enumerate() {
            if index == rank || row[col].is_zero() {
                continue;
            }
            let factor = row[col].clone();
            for (entry, lead) in row.iter_mut().zip(&pivot) {
                *entry = &*entry * &pivot[col] - &factor * lead;
            }
            *row = normalize(std::mem::take(row));
        }
        pivots.push(col);
    }
    pivots
}

/// One primitive integer vector per free column of `rows`.
fn compute_nullspace(mut rows: Vec<Vec<BigInt>>, width: usize) -> Vec<Vec<BigInt>> {
    let pivots = eliminate(&mut rows, width);
    // every pivot divides `scale`, so back-substitution stays integral
    let scale = pivots
        .iter()
        .enumerate()
        .fold(BigInt::one(), |acc, (row, &col)| acc.lcm(&rows[row][col]));

    (0..width)
        .filter(|col| !pivots.contains(col))
        .map(|free| {
            let mut vector = vec![BigInt::zero(); width];
            vector[free] = scale.clone();
            for (row, &col) in pivots.iter().enumerate() {
                let coefficient = &rows[row][free];
                if !coefficient.is_zero() {
                    vector[col] = -(coefficient * (&scale / &rows[row][col]));
                }
            }
            normalize(vector)
        })
        .collect()
}

/// Divides by the gcd and makes the first non-zero entry positive.
fn normalize(mut vector: Vec<BigInt>) -> Vec<BigInt> {
    let gcd = vector
        .iter()
        .filter(|v| !v.is_zero())
        .fold(BigInt::zero(), |acc, v| acc.gcd(v));
    if !gcd.is_zero() && !gcd.is_one() {
        for value in &mut vector {
            *value /= &gcd;
        }
    }
    if vector
        .iter()
        .find(|v| !v.is_zero())
        .is_some_and(|v| v.is_negative())
    {
        for value in &mut vector {
            *value = -value.clone();
        }
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{ModelBuilder, Place, Transition};

    #[test]
    fn cycle_basis_is_the_conservation_law() {
        let model = ModelBuilder::new("cycle")
            .place(Place::token("P1", 5))
            .place(Place::token("P2", 0))
            .transition(Transition::new("forward"))
            .transition(Transition::new("back"))
            .flow("P1", "forward")
            .flow("forward", "P2")
            .flow("P2", "back")
            .flow("back", "P1")
            .build()
            .unwrap();
        let matrix = IncidenceMatrix::build(&model);
        let basis = invariant_basis(&model, &matrix);
        assert_eq!(basis.len(), 1);
        assert_eq!(basis[0].to_string(), "P1 + P2 == 5");
        assert!(basis[0].verified);
    }

    #[test]
    fn weighted_invariant_is_found() {
        // two monomers combine into one dimer: m + 2d is conserved
        let model = ModelBuilder::new("dimer")
            .place(Place::token("m", 4))
            .place(Place::token("d", 1))
            .transition(Transition::new("bind"))
            .flow("m", "bind")
            .flow("m", "bind")
            .flow("bind", "d")
            .build()
            .unwrap();
        let matrix = IncidenceMatrix::build(&model);
        let basis = invariant_basis(&model, &matrix);
        assert_eq!(basis.len(), 1);
        assert_eq!(basis[0].weights.get("d"), Some(&2));
        assert_eq!(basis[0].weights.get("m"), Some(&1));
        assert_eq!(basis[0].value, 6);
    }

    #[test]
    fn unconstrained_places_form_unit_vectors() {
        let model = ModelBuilder::new("idle")
            .place(Place::token("a", 1))
            .place(Place::token("b", 2))
            .build()
            .unwrap();
        let matrix = IncidenceMatrix::build(&model);
        let basis = invariant_basis(&model, &matrix);
        assert_eq!(basis.len(), 2);
        assert_eq!(basis[0].to_string(), "a == 1");
        assert_eq!(basis[1].to_string(), "b == 2");
    }

    #[test]
    fn elimination_stays_integral() {
        // rank-2 system whose rational reduction needs thirds
        let rows = vec![
            vec![BigInt::from(3), BigInt::from(1), BigInt::from(-2), BigInt::from(0)],
            vec![BigInt::from(0), BigInt::from(3), BigInt::from(1), BigInt::from(-1)],
        ];
        let basis = compute_nullspace(rows.clone(), 4);
        assert_eq!(basis.len(), 2);
        for vector in &basis {
            for row in &rows {
                let dot: BigInt = row.iter().zip(vector).map(|(a, b)| a * b).sum();
                assert!(dot.is_zero());
            }
            let gcd = vector.iter().fold(BigInt::zero(), |acc, v| acc.gcd(v));
            assert!(gcd.is_one());
        }
    }

    #[test]
    fn normalization_divides_gcd_and_fixes_sign() {
        let vector = vec![BigInt::from(-4), BigInt::from(0), BigInt::from(6)];
        assert_eq!(
            normalize(vector),
            vec![BigInt::from(2), BigInt::from(0), BigInt::from(-3)]
        );
    }
}
