//! Conversion module for transforming evalexpr AST nodes into linear expressions.
//!
//! This module handles converting the operator tree produced by the evalexpr tokenizer into
//! our own restricted `LinearExpr` tree. The evalexpr tree is never evaluated; it is only
//! walked, and every node is mapped onto a constant, a parameter reference, a signed sum or
//! a scaled term. Anything else is rejected with a `ParseError`.
//!
//! The main entry point is the `build_linear_expr` function which recursively traverses the
//! evalexpr AST and builds up our expression tree.

use std::collections::HashMap;

use crate::{
    errors::ParseError,
    expr::{LinearExpr, ParamRef},
};
use evalexpr::{Node, Operator};

/// Converts an evalexpr AST node into a linear expression.
///
/// # Arguments
/// * `node` - The evalexpr AST node to convert
/// * `constants` - Named constants that are substituted instead of being treated as parameters
///
/// # Returns
/// * `Result<LinearExpr, ParseError>` - The converted expression or an error if the node
///   has no linear meaning
///
/// # Examples of supported operations:
/// * Signed sums: `a + b - c`, `-a`
/// * Scaling by constants: `3*a`, `a/2`, `(a + b)*2`
/// * Constant arithmetic: `2^3*a`, `(1 + 1)*a`
/// * Parameters: `g1`, elements of vector parameters: `v(2)`
pub fn build_linear_expr(
    node: &Node,
    constants: &HashMap<String, f64>,
) -> Result<LinearExpr, ParseError> {
    match node.operator() {
        // Addition operator - folds all children into one sum
        Operator::Add => {
            let children = node.children();
            children
                .iter()
                .skip(1)
                .try_fold(first_child(node, constants)?, |acc, child| {
                    Ok(acc.add(build_linear_expr(child, constants)?))
                })
        }
        Operator::Sub => {
            let (lhs, rhs) = binary_children(node, constants)?;
            Ok(lhs.sub(rhs))
        }
        Operator::Neg => Ok(first_child(node, constants)?.neg()),
        // Multiplication operator - every factor but one must fold to a constant
        Operator::Mul => {
            let children = node.children();
            children
                .iter()
                .skip(1)
                .try_fold(first_child(node, constants)?, |acc, child| {
                    acc.mul(build_linear_expr(child, constants)?)
                })
        }
        Operator::Div => {
            let (lhs, rhs) = binary_children(node, constants)?;
            lhs.div(rhs)
        }
        // Exponentiation - only between constants
        Operator::Exp => {
            let (base, exponent) = binary_children(node, constants)?;
            base.pow(exponent)
        }
        // Constant value - must be numeric
        Operator::Const { value } => match value {
            evalexpr::Value::Float(f) => Ok(LinearExpr::Const(*f)),
            evalexpr::Value::Int(i) => Ok(LinearExpr::Const(*i as f64)),
            _ => Err(ParseError::UnsupportedLiteral(format!("{:?}", value))),
        },
        // Identifiers are named constants or scalar parameter references
        Operator::VariableIdentifierRead { identifier } => {
            match constants.get(identifier.as_str()) {
                Some(value) => Ok(LinearExpr::Const(*value)),
                None => Ok(LinearExpr::Param(ParamRef::scalar(identifier.as_str()))),
            }
        }
        // Call syntax references one element of a vector parameter
        Operator::FunctionIdentifier { identifier } => {
            let argument = first_child(node, constants)?;
            let Some(index) = argument.constant_value() else {
                return Err(ParseError::UnknownFunction(identifier.to_string()));
            };
            if !index.is_finite() || index < 0.0 || index.fract() != 0.0 {
                return Err(ParseError::InvalidElementIndex {
                    parameter: identifier.to_string(),
                    index: index.to_string(),
                });
            }
            Ok(LinearExpr::Param(ParamRef::element(
                identifier.as_str(),
                index as usize,
            )))
        }
        // Root node (and parenthesized groups) - must have exactly one child
        Operator::RootNode => match node.children() {
            [] => Err(ParseError::Empty),
            [child] => build_linear_expr(child, constants),
            children => Err(ParseError::UnsupportedOperator(format!(
                "expected a single expression, found {}",
                children.len()
            ))),
        },
        // Any other operator is unsupported
        operator => Err(ParseError::UnsupportedOperator(format!("{:?}", operator))),
    }
}

fn first_child(node: &Node, constants: &HashMap<String, f64>) -> Result<LinearExpr, ParseError> {
    match node.children().first() {
        Some(child) => build_linear_expr(child, constants),
        None => Err(ParseError::Empty),
    }
}

fn binary_children(
    node: &Node,
    constants: &HashMap<String, f64>,
) -> Result<(LinearExpr, LinearExpr), ParseError> {
    match node.children() {
        [lhs, rhs] => Ok((
            build_linear_expr(lhs, constants)?,
            build_linear_expr(rhs, constants)?,
        )),
        children => Err(ParseError::UnsupportedOperator(format!(
            "{:?} with {} operands",
            node.operator(),
            children.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalexpr::{build_operator_tree, DefaultNumericTypes};

    fn convert(source: &str) -> Result<LinearExpr, ParseError> {
        let node = build_operator_tree::<DefaultNumericTypes>(source)?;
        build_linear_expr(&node, &HashMap::new())
    }

    #[test]
    fn test_parameter_and_constant() {
        let expr = convert("g1 + 2").unwrap();
        let (terms, offset) = expr.collect_terms();
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].parameter, ParamRef::scalar("g1"));
        assert_eq!(offset, 2.0);
    }

    #[test]
    fn test_integer_division_is_real() {
        let expr = convert("1/2*g1").unwrap();
        let (terms, _) = expr.collect_terms();
        assert_eq!(terms[0].coefficient, 0.5);
    }

    #[test]
    fn test_named_constants() {
        let node = build_operator_tree::<DefaultNumericTypes>("a*g1 - b").unwrap();
        let constants = HashMap::from([("a".to_string(), 2.5), ("b".to_string(), 1.0)]);
        let (terms, offset) = build_linear_expr(&node, &constants)
            .unwrap()
            .collect_terms();
        assert_eq!(terms[0].coefficient, 2.5);
        assert_eq!(offset, -1.0);
    }

    #[test]
    fn test_element_reference() {
        let expr = convert("v(2) - 3*v(0)").unwrap();
        let (terms, _) = expr.collect_terms();
        assert_eq!(terms[0].parameter, ParamRef::element("v", 2));
        assert_eq!(terms[1].parameter, ParamRef::element("v", 0));
        assert_eq!(terms[1].coefficient, -3.0);
    }

    #[test]
    fn test_invalid_element_index() {
        assert!(matches!(
            convert("v(1.5)"),
            Err(ParseError::InvalidElementIndex { .. })
        ));
        assert!(matches!(
            convert("v(0 - 1)"),
            Err(ParseError::InvalidElementIndex { .. })
        ));
    }

    #[test]
    fn test_unknown_function() {
        assert!(matches!(
            convert("sin(g1)"),
            Err(ParseError::UnknownFunction(name)) if name == "sin"
        ));
    }

    #[test]
    fn test_unsupported_operator() {
        assert!(matches!(
            convert("g1 == 2"),
            Err(ParseError::UnsupportedOperator(_))
        ));
        assert!(matches!(
            convert("g1 % 2"),
            Err(ParseError::UnsupportedOperator(_))
        ));
    }

    #[test]
    fn test_unsupported_literal() {
        assert!(matches!(
            convert("true"),
            Err(ParseError::UnsupportedLiteral(_))
        ));
    }

    #[test]
    fn test_empty() {
        assert!(convert("").is_err());
        assert!(convert("   ").is_err());
    }
}
