//! Compiled formulas.
//!
//! An `Expression` is an immutable tree evaluated against a `VariableContext`.
//! Trees are built once by the parser and shared through an `Arc`, so the same
//! expression can be evaluated by any number of sessions at once.
//!
//! Division by zero and `log` of non-positive values are not errors: they
//! yield IEEE-754 infinities/NaN which propagate to the caller.

use std::fmt;
use std::sync::Arc;

use crate::function_registry::UnaryFn;
use crate::variables::{Variable, VariableContext};

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    pub fn symbol(&self) -> char {
        match self {
            BinaryOp::Add => '+',
            BinaryOp::Sub => '-',
            BinaryOp::Mul => '*',
            BinaryOp::Div => '/',
            BinaryOp::Pow => '^',
        }
    }

    fn apply(&self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Pow => a.powf(b),
        }
    }
}

/// A node of the expression tree.
#[derive(Debug, Clone)]
pub enum ExprNode {
    Constant(f64),
    /// One of the built-in slots.
    Variable(Variable),
    /// Any other identifier; reads 0.0 unless the context defines it.
    Named(String),
    Neg(Expression),
    Binary {
        op: BinaryOp,
        lhs: Expression,
        rhs: Expression,
    },
    Call {
        name: String,
        func: UnaryFn,
        arg: Expression,
    },
}

/// Shared handle to an immutable expression tree.
#[derive(Clone)]
pub struct Expression {
    node: Arc<ExprNode>,
}

impl Expression {
    pub fn new(node: ExprNode) -> Self {
        Self {
            node: Arc::new(node),
        }
    }

    pub fn constant(value: f64) -> Self {
        Self::new(ExprNode::Constant(value))
    }

    pub fn variable(var: Variable) -> Self {
        Self::new(ExprNode::Variable(var))
    }

    pub fn binary(op: BinaryOp, lhs: Expression, rhs: Expression) -> Self {
        Self::new(ExprNode::Binary { op, lhs, rhs })
    }

    pub fn neg(&self) -> Self {
        Self::new(ExprNode::Neg(self.clone()))
    }

    pub fn call(name: impl Into<String>, func: UnaryFn, arg: Expression) -> Self {
        Self::new(ExprNode::Call {
            name: name.into(),
            func,
            arg,
        })
    }

    pub fn node(&self) -> &ExprNode {
        &self.node
    }

    /// Evaluate against a context.
    pub fn evaluate(&self, ctx: &VariableContext) -> f64 {
        match &*self.node {
            ExprNode::Constant(v) => *v,
            ExprNode::Variable(var) => ctx.get(*var),
            ExprNode::Named(name) => ctx.get_named(name),
            ExprNode::Neg(inner) => -inner.evaluate(ctx),
            ExprNode::Binary { op, lhs, rhs } => {
                let a = lhs.evaluate(ctx);
                let b = rhs.evaluate(ctx);
                op.apply(a, b)
            }
            ExprNode::Call { func, arg, .. } => func.apply(arg.evaluate(ctx)),
        }
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expression({})", self)
    }
}

/// Fully parenthesised form, e.g. `(2 + (3 * 4))`.
impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.node {
            ExprNode::Constant(v) => write!(f, "{}", v),
            ExprNode::Variable(var) => write!(f, "{}", var),
            ExprNode::Named(name) => f.write_str(name),
            ExprNode::Neg(inner) => write!(f, "(-{})", inner),
            ExprNode::Binary { op, lhs, rhs } => write!(f, "({} {} {})", lhs, op.symbol(), rhs),
            ExprNode::Call { name, arg, .. } => write!(f, "{}({})", name, arg),
        }
    }
}
