//! Recursive-descent parser for formula strings.
//!
//! ```text
//! expression := term (('+' | '-') term)*
//! term       := factor (('*' | '/') factor)*
//! factor     := ('+' | '-') factor
//!             | base ('^' factor)?
//! base       := '(' expression ')' | number | function factor | variable
//! ```
//!
//! Signs bind looser than `^` (`-2^2` is `-4`), `^` is right-associative, and a
//! function applies to the whole following factor (`sin x^2` is `sin(x^2)`).
//! Identifiers are runs of lowercase ASCII letters; anything that is not a
//! registered function is a variable.
//!
//! Each call to [`ExpressionParser::parse`] owns its own cursor, so one parser
//! can be used from many threads at once.

use thiserror::Error;

use crate::expression::{BinaryOp, ExprNode, Expression};
use crate::function_registry::FunctionRegistry;
use crate::variables::Variable;

/// Maximum nesting of factors before the parser gives up.
const MAX_DEPTH: usize = 256;

/// A syntax error with the byte offset where it was detected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("at position {position}: {message}")]
pub struct ParseError {
    pub position: usize,
    pub message: String,
}

impl ParseError {
    fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

/// Parser bound to a function registry snapshot.
#[derive(Clone, Copy)]
pub struct ExpressionParser<'r> {
    functions: &'r FunctionRegistry,
}

impl<'r> ExpressionParser<'r> {
    pub fn new(functions: &'r FunctionRegistry) -> Self {
        Self { functions }
    }

    /// Compile `source` into an expression.
    pub fn parse(&self, source: &str) -> Result<Expression, ParseError> {
        let mut cursor = Cursor {
            src: source.as_bytes(),
            pos: 0,
            depth: 0,
            functions: self.functions,
        };
        let expr = cursor.parse_expression()?;
        cursor.skip_whitespace();
        if let Some(c) = cursor.peek() {
            return Err(ParseError::new(
                cursor.pos,
                format!("unexpected '{}'", c as char),
            ));
        }
        Ok(expr)
    }
}

/// Convenience wrapper around [`ExpressionParser::parse`].
pub fn parse(source: &str, functions: &FunctionRegistry) -> Result<Expression, ParseError> {
    ExpressionParser::new(functions).parse(source)
}

struct Cursor<'a> {
    src: &'a [u8],
    pos: usize,
    depth: usize,
    functions: &'a FunctionRegistry,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    /// Skip whitespace, then consume `expected` if it is next.
    fn eat(&mut self, expected: u8) -> bool {
        self.skip_whitespace();
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_expression(&mut self) -> Result<Expression, ParseError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = if self.eat(b'+') {
                BinaryOp::Add
            } else if self.eat(b'-') {
                BinaryOp::Sub
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_term()?;
            lhs = Expression::binary(op, lhs, rhs);
        }
    }

    fn parse_term(&mut self) -> Result<Expression, ParseError> {
        let mut lhs = self.parse_factor()?;
        loop {
            let op = if self.eat(b'*') {
                BinaryOp::Mul
            } else if self.eat(b'/') {
                BinaryOp::Div
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_factor()?;
            lhs = Expression::binary(op, lhs, rhs);
        }
    }

    fn parse_factor(&mut self) -> Result<Expression, ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ParseError::new(self.pos, "expression is nested too deeply"));
        }
        let result = self.parse_factor_inner();
        self.depth -= 1;
        result
    }

    fn parse_factor_inner(&mut self) -> Result<Expression, ParseError> {
        if self.eat(b'+') {
            return self.parse_factor();
        }
        if self.eat(b'-') {
            return Ok(self.parse_factor()?.neg());
        }

        let base = self.parse_base()?;
        if self.eat(b'^') {
            let exponent = self.parse_factor()?;
            return Ok(Expression::binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn parse_base(&mut self) -> Result<Expression, ParseError> {
        if self.eat(b'(') {
            let inner = self.parse_expression()?;
            if !self.eat(b')') {
                return Err(self.unexpected("')'"));
            }
            return Ok(inner);
        }

        match self.peek() {
            Some(c) if c.is_ascii_digit() || c == b'.' => self.parse_number(),
            Some(c) if c.is_ascii_lowercase() => self.parse_identifier(),
            _ => Err(self.unexpected("a number, identifier or '('")),
        }
    }

    fn parse_number(&mut self) -> Result<Expression, ParseError> {
        let start = self.pos;
        let mut seen_dot = false;
        while let Some(c) = self.peek() {
            if c == b'.' {
                if seen_dot {
                    return Err(ParseError::new(self.pos, "number has more than one '.'"));
                }
                seen_dot = true;
            } else if !c.is_ascii_digit() {
                break;
            }
            self.pos += 1;
        }
        // The slice is ASCII digits and at most one '.'.
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or_default();
        text.parse::<f64>()
            .map(Expression::constant)
            .map_err(|_| ParseError::new(start, format!("invalid number '{}'", text)))
    }

    fn parse_identifier(&mut self) -> Result<Expression, ParseError> {
        let src = self.src;
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_lowercase()) {
            self.pos += 1;
        }
        let name = std::str::from_utf8(&src[start..self.pos]).unwrap_or_default();

        if let Some(func) = self.functions.get(name) {
            let func = func.clone();
            let arg = self.parse_factor()?;
            return Ok(Expression::call(name, func, arg));
        }

        Ok(match Variable::from_name(name) {
            Some(var) => Expression::variable(var),
            None => Expression::new(ExprNode::Named(name.to_string())),
        })
    }

    fn unexpected(&mut self, wanted: &str) -> ParseError {
        self.skip_whitespace();
        match self.peek() {
            Some(c) => ParseError::new(
                self.pos,
                format!("unexpected '{}', expected {}", c as char, wanted),
            ),
            None => ParseError::new(self.pos, format!("unexpected end of input, expected {}", wanted)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::VariableContext;

    const EPS: f64 = 1e-9;

    fn eval(source: &str) -> f64 {
        let functions = FunctionRegistry::new();
        parse(source, &functions)
            .unwrap_or_else(|e| panic!("failed to parse {:?}: {}", source, e))
            .evaluate(&VariableContext::new())
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("2+3*4"), 14.0);
        assert_eq!(eval("(2+3)*4"), 20.0);
        assert_eq!(eval("10-4-3"), 3.0);
        assert_eq!(eval("16/4/2"), 2.0);
    }

    #[test]
    fn test_power_is_right_associative() {
        assert_eq!(eval("2^3^2"), 512.0);
    }

    #[test]
    fn test_unary_minus_binds_looser_than_power() {
        assert_eq!(eval("-2^2"), -4.0);
        assert_eq!(eval("(-2)^2"), 4.0);
        assert_eq!(eval("2^-1"), 0.5);
        assert_eq!(eval("--3"), 3.0);
        assert_eq!(eval("+-3"), -3.0);
    }

    #[test]
    fn test_whitespace_between_tokens() {
        assert_eq!(eval("  2 +\t3 * ( 1 + 1 ) "), 8.0);
    }

    #[test]
    fn test_decimal_numbers() {
        assert!((eval("1.5*2") - 3.0).abs() < EPS);
        assert!((eval(".5+.25") - 0.75).abs() < EPS);
    }

    #[test]
    fn test_function_applies_to_following_factor() {
        let functions = FunctionRegistry::new();
        let mut ctx = VariableContext::new();
        ctx.x = 3.0;

        // sqrt applies to x^2, not (sqrt x)^2
        let expr = parse("sqrt x^2", &functions).unwrap();
        assert!((expr.evaluate(&ctx) - 3.0).abs() < EPS);

        // Functions nest right to left
        let expr = parse("abs sin -30", &functions).unwrap();
        assert!((expr.evaluate(&ctx) - 0.5).abs() < EPS);

        let expr = parse("sqrt(16) + 1", &functions).unwrap();
        assert!((expr.evaluate(&ctx) - 5.0).abs() < EPS);
    }

    #[test]
    fn test_every_builtin_matches_registry_operator() {
        let functions = FunctionRegistry::new();
        let mut ctx = VariableContext::new();
        ctx.x = 37.0;
        for name in functions.names() {
            let expr = parse(&format!("{} x", name), &functions).unwrap();
            let expected = functions.get(name).unwrap().apply(37.0);
            let actual = expr.evaluate(&ctx);
            assert!((actual - expected).abs() < EPS, "{}: {} != {}", name, actual, expected);
        }
    }

    #[test]
    fn test_sin_theta_in_degrees() {
        let functions = FunctionRegistry::new();
        let mut ctx = VariableContext::new();
        ctx.theta = 30.0;
        let expr = parse("sin theta", &functions).unwrap();
        assert!((expr.evaluate(&ctx) - 0.5).abs() < EPS);
    }

    #[test]
    fn test_registered_function_is_usable() {
        let mut functions = FunctionRegistry::new();
        assert!(functions.register("triple", |v| v * 3.0));
        let expr = parse("triple 2 + 1", &functions).unwrap();
        assert_eq!(expr.evaluate(&VariableContext::new()), 7.0);
    }

    #[test]
    fn test_unknown_identifier_is_variable() {
        let functions = FunctionRegistry::new();
        let mut ctx = VariableContext::new();
        let expr = parse("radius * 2", &functions).unwrap();
        assert_eq!(expr.evaluate(&ctx), 0.0);
        ctx.set("radius", 1.5);
        assert_eq!(expr.evaluate(&ctx), 3.0);
    }

    #[test]
    fn test_numeric_anomalies_are_not_errors() {
        assert!(eval("1/0").is_infinite());
        assert!(eval("log 0").is_nan());
        assert!(eval("log -1").is_nan());
    }

    #[test]
    fn test_trailing_character_is_error() {
        let functions = FunctionRegistry::new();
        let err = parse("2+3)", &functions).unwrap_err();
        assert_eq!(err.position, 3);

        let err = parse("2 3", &functions).unwrap_err();
        assert_eq!(err.position, 2);
    }

    #[test]
    fn test_malformed_input_is_error() {
        let functions = FunctionRegistry::new();
        for source in ["", "2+", "(1+2", "2*/3", "1.2.3", "X+1", "2 # 3", "sin"] {
            assert!(parse(source, &functions).is_err(), "{:?} should fail", source);
        }
    }

    #[test]
    fn test_error_message_names_position() {
        let functions = FunctionRegistry::new();
        let err = parse("1 + $", &functions).unwrap_err();
        assert_eq!(err.position, 4);
        assert!(err.to_string().starts_with("at position 4:"));
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let functions = FunctionRegistry::new();
        let source = format!("{}1{}", "(".repeat(1000), ")".repeat(1000));
        assert!(parse(&source, &functions).is_err());
    }

    #[test]
    fn test_display_round_trips_structure() {
        let functions = FunctionRegistry::new();
        let expr = parse("-2^2", &functions).unwrap();
        assert_eq!(expr.to_string(), "(-(2 ^ 2))");
    }
}
