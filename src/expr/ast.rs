use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::context::EvalContext;
use super::value::EvalValue;

#[derive(Debug, Clone, PartialEq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A pre-parsed expression AST (spec.md §4.A, §4.B step 5).
///
/// `Expr` (de)serializes as its original source text: the compiler stores
/// configs as JSON/JSONB, and re-parsing a few bytes of expression text on
/// load is cheaper than hand-rolling AST serde and keeps the stored document
/// human-readable.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(EvalValue),
    Path { root: String, segments: Vec<String> },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn source_text(&self) -> String {
        render(self)
    }
}

fn render(expr: &Expr) -> String {
    match expr {
        Expr::Literal(EvalValue::Null) => "null".to_string(),
        Expr::Literal(EvalValue::Bool(b)) => b.to_string(),
        Expr::Literal(EvalValue::Int(i)) => i.to_string(),
        Expr::Literal(EvalValue::Float(f)) => f.to_string(),
        Expr::Literal(EvalValue::Str(s)) => format!("{:?}", s),
        Expr::Path { root, segments } => {
            if segments.is_empty() {
                root.clone()
            } else {
                format!("{}.{}", root, segments.join("."))
            }
        }
        Expr::Binary { op, lhs, rhs } => {
            let op_str = match op {
                BinaryOp::Or => "||",
                BinaryOp::And => "&&",
                BinaryOp::Eq => "==",
                BinaryOp::Ne => "!=",
                BinaryOp::Lt => "<",
                BinaryOp::Le => "<=",
                BinaryOp::Gt => ">",
                BinaryOp::Ge => ">=",
            };
            format!("({} {} {})", render(lhs), op_str, render(rhs))
        }
    }
}

impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source_text())
    }
}

impl<'de> Deserialize<'de> for Expr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse(&text).map_err(|e| serde::de::Error::custom(e.0))
    }
}

pub fn eval(expr: &Expr, ctx: &EvalContext) -> EvalValue {
    match expr {
        Expr::Literal(v) => v.clone(),
        Expr::Path { root, segments } => ctx.resolve(root, segments),
        Expr::Binary { op, lhs, rhs } => eval_binary(op, lhs, rhs, ctx),
    }
}

fn eval_binary(op: &BinaryOp, lhs: &Expr, rhs: &Expr, ctx: &EvalContext) -> EvalValue {
    match op {
        BinaryOp::Or => {
            let l = eval(lhs, ctx);
            if l.truthy() {
                EvalValue::Bool(true)
            } else {
                EvalValue::Bool(eval(rhs, ctx).truthy())
            }
        }
        BinaryOp::And => {
            let l = eval(lhs, ctx);
            if !l.truthy() {
                EvalValue::Bool(false)
            } else {
                EvalValue::Bool(eval(rhs, ctx).truthy())
            }
        }
        BinaryOp::Eq => EvalValue::Bool(eval(lhs, ctx).equals(&eval(rhs, ctx))),
        BinaryOp::Ne => EvalValue::Bool(!eval(lhs, ctx).equals(&eval(rhs, ctx))),
        BinaryOp::Lt => EvalValue::Bool(
            eval(lhs, ctx)
                .compare(&eval(rhs, ctx))
                .map(|o| o.is_lt())
                .unwrap_or(false),
        ),
        BinaryOp::Le => EvalValue::Bool(
            eval(lhs, ctx)
                .compare(&eval(rhs, ctx))
                .map(|o| o.is_le())
                .unwrap_or(false),
        ),
        BinaryOp::Gt => EvalValue::Bool(
            eval(lhs, ctx)
                .compare(&eval(rhs, ctx))
                .map(|o| o.is_gt())
                .unwrap_or(false),
        ),
        BinaryOp::Ge => EvalValue::Bool(
            eval(lhs, ctx)
                .compare(&eval(rhs, ctx))
                .map(|o| o.is_ge())
                .unwrap_or(false),
        ),
    }
}
