//! Linear equation parsing.
//!
//! This module provides the `Equation` type which represents one row of a linear system:
//! an ordered list of signed (coefficient, parameter) terms plus a constant offset. Equations
//! are parsed once on creation and are immutable afterwards.
//!
//! # Example
//!
//! ```
//! use linsolve::Equation;
//!
//! let eq = Equation::parse("g1 + g2 - 3*g3").unwrap();
//! let coefficients: Vec<f64> = eq.terms().iter().map(|t| t.coefficient).collect();
//! assert_eq!(coefficients, vec![1.0, 1.0, -3.0]);
//! ```
//!
//! # Syntax
//!
//! - Parameters are bare identifiers (`g1`); elements of vector parameters use call syntax (`v(0)`)
//! - Numeric literals, named constants and `+ - * / ^` between constants fold to coefficients
//! - Constant offsets are allowed and are moved to the right-hand side when the system is built

use std::collections::HashMap;

use evalexpr::{build_operator_tree, DefaultNumericTypes};

use crate::convert::build_linear_expr;
use crate::errors::ParseError;
use crate::expr::{ParamRef, Term};
use colored::Colorize;
use itertools::Itertools;

/// Represents a parsed linear equation.
///
/// This struct holds the original equation string and its flattened linear form:
/// - The terms in order of first appearance, with repeated parameters merged
/// - The constant offset that does not multiply any parameter
#[derive(Clone, PartialEq)]
pub struct Equation {
    source: String,
    terms: Vec<Term>,
    offset: f64,
}

impl std::fmt::Debug for Equation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{{\n")?;
        writeln!(f, "    {}: {}\n", "Equation".cyan(), self.source)?;
        writeln!(f, "    {}: {:?}\n", "Terms".cyan(), self.terms)?;
        writeln!(f, "    {}: {}\n", "Offset".cyan(), self.offset)?;
        writeln!(f, "}}")?;
        Ok(())
    }
}

impl std::fmt::Display for Equation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} [{}]",
            self.source,
            "=>".cyan(),
            self.terms.iter().map(|term| term.to_string()).join(", ")
        )?;
        if self.offset != 0.0 {
            write!(f, " {} {:+}", "offset".cyan(), self.offset)?;
        }
        Ok(())
    }
}

impl Equation {
    /// Parses an equation string in which every identifier is a parameter.
    ///
    /// # Arguments
    /// * `source` - The equation as a string (e.g. "3*g1 + g2 - 5*g3")
    ///
    /// # Returns
    /// * `Result<Self, ParseError>` - The parsed equation or an error
    ///
    /// # Example
    /// ```
    /// # use linsolve::Equation;
    /// let eq = Equation::parse("2*(g1 - g2) + 1").unwrap();
    /// assert_eq!(eq.terms()[1].coefficient, -2.0);
    /// assert_eq!(eq.offset(), 1.0);
    /// ```
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        Self::parse_with_constants(source, &HashMap::new())
    }

    /// Parses an equation string, substituting the given named constants.
    ///
    /// # Arguments
    /// * `source` - The equation as a string
    /// * `constants` - Identifiers that denote numeric constants instead of parameters
    ///
    /// # Errors
    /// Returns `ParseError` if:
    /// - The string is not valid expression syntax
    /// - The expression is not affine in its parameters
    /// - No parameter is left after merging terms
    ///
    /// # Example
    /// ```
    /// # use linsolve::Equation;
    /// # use std::collections::HashMap;
    /// let constants = HashMap::from([("gain".to_string(), 4.0)]);
    /// let eq = Equation::parse_with_constants("gain*g1", &constants).unwrap();
    /// assert_eq!(eq.terms()[0].coefficient, 4.0);
    /// ```
    pub fn parse_with_constants(
        source: &str,
        constants: &HashMap<String, f64>,
    ) -> Result<Self, ParseError> {
        let node = build_operator_tree::<DefaultNumericTypes>(source)?;
        let expr = build_linear_expr(&node, constants)?.simplify();
        let (terms, offset) = expr.collect_terms();

        if terms.is_empty() {
            return Err(ParseError::NoParameters);
        }

        Ok(Self {
            source: source.to_string(),
            terms,
            offset,
        })
    }

    /// Returns the original equation string.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the terms in order of first appearance.
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Returns the constant offset.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Returns the referenced parameters in order of first appearance.
    pub fn parameters(&self) -> impl Iterator<Item = &ParamRef> {
        self.terms.iter().map(|term| &term.parameter)
    }

    /// Returns the coefficient of a parameter reference, zero if it does not appear.
    pub fn coefficient(&self, parameter: &ParamRef) -> f64 {
        self.terms
            .iter()
            .find(|term| &term.parameter == parameter)
            .map_or(0.0, |term| term.coefficient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_terms(eq: &Equation) -> Vec<(f64, String)> {
        eq.terms()
            .iter()
            .map(|t| (t.coefficient, t.parameter.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_signed_terms() {
        let eq = Equation::parse("g1+g2-3*g3").unwrap();
        assert_eq!(
            signed_terms(&eq),
            vec![
                (1.0, "g1".to_string()),
                (1.0, "g2".to_string()),
                (-3.0, "g3".to_string()),
            ]
        );
        assert_eq!(eq.offset(), 0.0);
    }

    #[test]
    fn test_parse_scaled_terms() {
        let eq = Equation::parse("3*g1+g2-5*g3").unwrap();
        assert_eq!(
            signed_terms(&eq),
            vec![
                (3.0, "g1".to_string()),
                (1.0, "g2".to_string()),
                (-5.0, "g3".to_string()),
            ]
        );
    }

    #[test]
    fn test_parameter_product_fails() {
        let result = Equation::parse("g1*g2");
        assert!(matches!(result, Err(ParseError::Nonlinear { .. })));
    }

    #[test]
    fn test_division_by_parameter_fails() {
        let result = Equation::parse("g1/g2");
        assert!(matches!(result, Err(ParseError::DivisionByParameter(_))));
    }

    #[test]
    fn test_power_fails() {
        assert!(matches!(
            Equation::parse("g1^2"),
            Err(ParseError::NonlinearPower { .. })
        ));
        let eq = Equation::parse("2^3*g1").unwrap();
        assert_eq!(eq.terms()[0].coefficient, 8.0);
    }

    #[test]
    fn test_unary_minus_and_parentheses() {
        let eq = Equation::parse("-(g1 - 2*g2)/2").unwrap();
        assert_eq!(
            signed_terms(&eq),
            vec![(-0.5, "g1".to_string()), (1.0, "g2".to_string())]
        );
    }

    #[test]
    fn test_repeated_parameter_sums() {
        let eq = Equation::parse("3*g1 + g2 + g1").unwrap();
        assert_eq!(eq.coefficient(&ParamRef::scalar("g1")), 4.0);
        assert_eq!(eq.terms().len(), 2);
    }

    #[test]
    fn test_offset() {
        let eq = Equation::parse("g1 + 5 - 2").unwrap();
        assert_eq!(eq.offset(), 3.0);
    }

    #[test]
    fn test_no_parameters() {
        assert!(matches!(
            Equation::parse("3 + 4"),
            Err(ParseError::NoParameters)
        ));
        assert!(matches!(
            Equation::parse("g1 - g1"),
            Err(ParseError::NoParameters)
        ));
    }

    #[test]
    fn test_invalid_expression() {
        let result = Equation::parse("2*g1 + )");
        assert!(result.is_err());
    }

    #[test]
    fn test_constants() {
        let constants = HashMap::from([("k".to_string(), -2.0)]);
        let eq = Equation::parse_with_constants("k*g1 + k", &constants).unwrap();
        assert_eq!(eq.terms()[0].coefficient, -2.0);
        assert_eq!(eq.offset(), -2.0);
    }

    #[test]
    fn test_parameters_in_first_seen_order() {
        let eq = Equation::parse("z + a + m").unwrap();
        let names: Vec<&str> = eq.parameters().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_debug_and_display_formatting() {
        let eq = Equation::parse("2*g1 - g2 + 1").unwrap();

        let debug_output = format!("{:?}", eq);
        assert!(debug_output.contains("Equation"));
        assert!(debug_output.contains("2*g1 - g2 + 1"));

        let display_output = format!("{}", eq);
        assert!(display_output.contains("(+2, g1)"));
        assert!(display_output.contains("(-1, g2)"));
    }
}
