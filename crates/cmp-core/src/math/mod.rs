//! Shamir secret sharing over the scalar field
//!
//! Pure functions only: polynomials (in the clear and "in the exponent") and
//! Lagrange coefficients over an interpolation domain of party ids.

mod lagrange;
mod polynomial;

pub use lagrange::{lagrange, lagrange_coefficient};
pub use polynomial::{Exponent, Polynomial};
