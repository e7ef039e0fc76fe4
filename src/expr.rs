//! Expression module for representing linear equations.
//!
//! This module defines the restricted expression tree that equation strings are converted into.
//! Only affine structure can be represented, which is what makes the parser a linear-term
//! extractor rather than a general evaluator:
//!
//! - `LinearExpr`: Constants, parameter references, signed sums and scaled terms
//! - `ParamRef`: A reference to a scalar parameter or to one element of a vector parameter
//! - `Term`: A single coefficient × parameter product in the flattened equation
//!
//! # Expression Tree Structure
//! The expression tree is built recursively with each node being one of:
//! - Leaf nodes: Constants and parameter references
//! - Signed sums: `a + b - c`
//! - Scaled terms: `c * expr` where `c` is a folded constant
//!
//! Products of two parameter-dependent expressions, division by a parameter and powers
//! of parameters cannot be built: the combinators return a `ParseError` instead.
//!
//! # Flattening
//! `collect_terms` distributes all scale factors and returns the ordered list of terms
//! together with the constant offset. Repeated references are merged in first-seen order
//! and terms whose coefficients cancel to zero are dropped.

use std::collections::HashMap;
use std::fmt;

use itertools::Itertools;

use crate::errors::ParseError;

/// A reference to a parameter inside an equation.
///
/// Scalar parameters are referenced by bare name (`g1`), elements of vector parameters
/// with call syntax (`v(2)`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParamRef {
    pub name: String,
    pub element: Option<usize>,
}

impl ParamRef {
    /// Reference to a scalar parameter.
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            element: None,
        }
    }

    /// Reference to element `index` of a vector parameter.
    pub fn element(name: impl Into<String>, index: usize) -> Self {
        Self {
            name: name.into(),
            element: Some(index),
        }
    }
}

impl fmt::Display for ParamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.element {
            Some(index) => write!(f, "{}({})", self.name, index),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A signed coefficient multiplying one parameter reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub coefficient: f64,
    pub parameter: ParamRef,
}

impl Term {
    pub fn new(coefficient: f64, parameter: ParamRef) -> Self {
        Self {
            coefficient,
            parameter,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:+}, {})", self.coefficient, self.parameter)
    }
}

/// Sign of an operand inside a sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Plus,
    Minus,
}

impl Sign {
    fn factor(self) -> f64 {
        match self {
            Sign::Plus => 1.0,
            Sign::Minus => -1.0,
        }
    }
}

/// A node of the linear expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum LinearExpr {
    /// A constant floating point value
    Const(f64),
    /// A reference to a parameter
    Param(ParamRef),
    /// Sum of signed operands
    Sum(Vec<(Sign, LinearExpr)>),
    /// A constant factor applied to an expression
    Scaled(f64, Box<LinearExpr>),
}

impl LinearExpr {
    /// Returns the folded value if the expression does not depend on any parameter.
    pub fn constant_value(&self) -> Option<f64> {
        match self {
            LinearExpr::Const(c) => Some(*c),
            LinearExpr::Param(_) => None,
            LinearExpr::Sum(operands) => operands
                .iter()
                .map(|(sign, expr)| expr.constant_value().map(|v| sign.factor() * v))
                .sum(),
            LinearExpr::Scaled(factor, expr) => expr.constant_value().map(|v| factor * v),
        }
    }

    /// Returns true if the expression references at least one parameter.
    pub fn has_parameters(&self) -> bool {
        self.constant_value().is_none()
    }

    /// Combines two expressions into `self + other`.
    pub fn add(self, other: LinearExpr) -> LinearExpr {
        LinearExpr::Sum(vec![(Sign::Plus, self), (Sign::Plus, other)])
    }

    /// Combines two expressions into `self - other`.
    pub fn sub(self, other: LinearExpr) -> LinearExpr {
        LinearExpr::Sum(vec![(Sign::Plus, self), (Sign::Minus, other)])
    }

    /// Negates the expression.
    pub fn neg(self) -> LinearExpr {
        LinearExpr::Sum(vec![(Sign::Minus, self)])
    }

    /// Multiplies two expressions; at least one side must be constant.
    pub fn mul(self, other: LinearExpr) -> Result<LinearExpr, ParseError> {
        match (self.constant_value(), other.constant_value()) {
            (Some(a), Some(b)) => Ok(LinearExpr::Const(a * b)),
            (Some(a), None) => Ok(LinearExpr::Scaled(a, Box::new(other))),
            (None, Some(b)) => Ok(LinearExpr::Scaled(b, Box::new(self))),
            (None, None) => Err(ParseError::Nonlinear {
                lhs: self.to_string(),
                rhs: other.to_string(),
            }),
        }
    }

    /// Divides by a constant expression.
    pub fn div(self, divisor: LinearExpr) -> Result<LinearExpr, ParseError> {
        let Some(d) = divisor.constant_value() else {
            return Err(ParseError::DivisionByParameter(divisor.to_string()));
        };
        if d == 0.0 {
            return Err(ParseError::DivisionByZero);
        }
        match self.constant_value() {
            Some(n) => Ok(LinearExpr::Const(n / d)),
            None => Ok(LinearExpr::Scaled(1.0 / d, Box::new(self))),
        }
    }

    /// Raises a constant to a constant power.
    pub fn pow(self, exponent: LinearExpr) -> Result<LinearExpr, ParseError> {
        match (self.constant_value(), exponent.constant_value()) {
            (Some(base), Some(exp)) => Ok(LinearExpr::Const(base.powf(exp))),
            _ => Err(ParseError::NonlinearPower {
                base: self.to_string(),
                exponent: exponent.to_string(),
            }),
        }
    }

    /// Folds constant subtrees and flattens nested sums and scales.
    pub fn simplify(self) -> LinearExpr {
        if let Some(c) = self.constant_value() {
            return LinearExpr::Const(c);
        }
        match self {
            LinearExpr::Sum(operands) => {
                let mut flat = Vec::with_capacity(operands.len());
                let mut constant = 0.0;
                for (sign, expr) in operands {
                    match expr.simplify() {
                        LinearExpr::Const(c) => constant += sign.factor() * c,
                        LinearExpr::Sum(inner) => {
                            for (inner_sign, inner_expr) in inner {
                                let combined = if inner_sign == sign {
                                    Sign::Plus
                                } else {
                                    Sign::Minus
                                };
                                match inner_expr {
                                    LinearExpr::Const(c) => constant += combined.factor() * c,
                                    other => flat.push((combined, other)),
                                }
                            }
                        }
                        other => flat.push((sign, other)),
                    }
                }
                if constant != 0.0 {
                    flat.push((Sign::Plus, LinearExpr::Const(constant)));
                }
                if flat.len() == 1 && flat[0].0 == Sign::Plus {
                    return flat.remove(0).1;
                }
                LinearExpr::Sum(flat)
            }
            LinearExpr::Scaled(factor, expr) => match expr.simplify() {
                LinearExpr::Scaled(inner, e) => LinearExpr::Scaled(factor * inner, e),
                e if factor == 1.0 => e,
                e => LinearExpr::Scaled(factor, Box::new(e)),
            },
            other => other,
        }
    }

    /// Distributes all factors and returns the merged terms plus the constant offset.
    pub fn collect_terms(&self) -> (Vec<Term>, f64) {
        let mut terms: Vec<Term> = Vec::new();
        let mut positions: HashMap<ParamRef, usize> = HashMap::new();
        let mut offset = 0.0;
        self.accumulate(1.0, &mut terms, &mut positions, &mut offset);
        terms.retain(|term| term.coefficient != 0.0);
        (terms, offset)
    }

    fn accumulate(
        &self,
        scale: f64,
        terms: &mut Vec<Term>,
        positions: &mut HashMap<ParamRef, usize>,
        offset: &mut f64,
    ) {
        match self {
            LinearExpr::Const(c) => *offset += scale * c,
            LinearExpr::Param(param) => match positions.get(param) {
                Some(&idx) => terms[idx].coefficient += scale,
                None => {
                    positions.insert(param.clone(), terms.len());
                    terms.push(Term::new(scale, param.clone()));
                }
            },
            LinearExpr::Sum(operands) => {
                for (sign, expr) in operands {
                    expr.accumulate(scale * sign.factor(), terms, positions, offset);
                }
            }
            LinearExpr::Scaled(factor, expr) => {
                expr.accumulate(scale * factor, terms, positions, offset)
            }
        }
    }
}

impl fmt::Display for LinearExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinearExpr::Const(c) => write!(f, "{}", c),
            LinearExpr::Param(param) => write!(f, "{}", param),
            LinearExpr::Sum(operands) => {
                let rendered = operands
                    .iter()
                    .enumerate()
                    .map(|(i, (sign, expr))| match (i, sign) {
                        (0, Sign::Plus) => format!("{}", expr),
                        (0, Sign::Minus) => format!("-{}", expr),
                        (_, Sign::Plus) => format!(" + {}", expr),
                        (_, Sign::Minus) => format!(" - {}", expr),
                    })
                    .join("");
                write!(f, "({})", rendered)
            }
            LinearExpr::Scaled(factor, expr) => write!(f, "{}*{}", factor, expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(name: &str) -> LinearExpr {
        LinearExpr::Param(ParamRef::scalar(name))
    }

    #[test]
    fn test_constant_folding() {
        let expr = LinearExpr::Const(2.0)
            .mul(LinearExpr::Const(3.0))
            .unwrap()
            .sub(LinearExpr::Const(1.0));
        assert_eq!(expr.constant_value(), Some(5.0));
        assert_eq!(expr.simplify(), LinearExpr::Const(5.0));
    }

    #[test]
    fn test_scaled_sum_distributes() {
        // 2 * (x - 3*y) + 1
        let inner = param("x").sub(LinearExpr::Const(3.0).mul(param("y")).unwrap());
        let expr = LinearExpr::Const(2.0)
            .mul(inner)
            .unwrap()
            .add(LinearExpr::Const(1.0));
        let (terms, offset) = expr.collect_terms();
        assert_eq!(
            terms,
            vec![
                Term::new(2.0, ParamRef::scalar("x")),
                Term::new(-6.0, ParamRef::scalar("y")),
            ]
        );
        assert_eq!(offset, 1.0);
    }

    #[test]
    fn test_repeated_parameter_merges() {
        let expr = param("x").add(param("y")).add(param("x"));
        let (terms, _) = expr.collect_terms();
        assert_eq!(terms[0], Term::new(2.0, ParamRef::scalar("x")));
        assert_eq!(terms[1], Term::new(1.0, ParamRef::scalar("y")));
    }

    #[test]
    fn test_cancelled_parameter_dropped() {
        let expr = param("x").sub(param("x")).add(param("y"));
        let (terms, _) = expr.collect_terms();
        assert_eq!(terms, vec![Term::new(1.0, ParamRef::scalar("y"))]);
    }

    #[test]
    fn test_nonlinear_product_rejected() {
        let result = param("x").mul(param("y"));
        assert!(matches!(result, Err(ParseError::Nonlinear { .. })));
    }

    #[test]
    fn test_division() {
        assert!(matches!(
            param("x").div(param("y")),
            Err(ParseError::DivisionByParameter(_))
        ));
        assert!(matches!(
            param("x").div(LinearExpr::Const(0.0)),
            Err(ParseError::DivisionByZero)
        ));
        let (terms, _) = param("x")
            .div(LinearExpr::Const(4.0))
            .unwrap()
            .collect_terms();
        assert_eq!(terms, vec![Term::new(0.25, ParamRef::scalar("x"))]);
    }

    #[test]
    fn test_power_of_parameter_rejected() {
        assert!(matches!(
            param("x").pow(LinearExpr::Const(2.0)),
            Err(ParseError::NonlinearPower { .. })
        ));
        assert_eq!(
            LinearExpr::Const(2.0)
                .pow(LinearExpr::Const(3.0))
                .unwrap()
                .constant_value(),
            Some(8.0)
        );
    }

    #[test]
    fn test_simplify_flattens_nested_sums() {
        // x - (y - 2)
        let expr = param("x").sub(param("y").sub(LinearExpr::Const(2.0)));
        let simplified = expr.clone().simplify();
        assert_eq!(
            simplified,
            LinearExpr::Sum(vec![
                (Sign::Plus, param("x")),
                (Sign::Minus, param("y")),
                (Sign::Plus, LinearExpr::Const(2.0)),
            ])
        );
        assert_eq!(expr.collect_terms(), simplified.collect_terms());
    }

    #[test]
    fn test_display() {
        let expr = param("x").sub(LinearExpr::Param(ParamRef::element("v", 1)));
        assert_eq!(expr.to_string(), "(x - v(1))");
        assert_eq!(Term::new(-3.0, ParamRef::scalar("g3")).to_string(), "(-3, g3)");
    }
}
