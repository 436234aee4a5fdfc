//! 4.A Expression evaluator.
//!
//! `Evaluate(expr, context) -> value` is total and deterministic: the only
//! failure mode is a parse error, surfaced once at compile time (4.B), never
//! at evaluation time.

mod ast;
mod context;
mod lexer;
mod parser;
mod value;

pub use ast::Expr;
pub use context::EvalContext;
pub use parser::ParseError;
pub use value::EvalValue;

/// Parse an expression's source text into a pre-parsed AST. Called once by
/// the compiler (4.B) per `when` string; the runtime never re-parses.
pub fn parse(source: &str) -> Result<Expr, ParseError> {
    parser::Parser::new(source).parse_expr()
}

/// An empty/missing `when` is treated as `true` (spec.md §4.A).
pub fn evaluate(expr: &Expr, ctx: &EvalContext) -> EvalValue {
    ast::eval(expr, ctx)
}

/// `when: None` truthy-evaluates to `true` without touching the AST.
pub fn evaluate_optional(expr: Option<&Expr>, ctx: &EvalContext) -> bool {
    match expr {
        None => true,
        Some(e) => evaluate(e, ctx).truthy(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx_with_age(age: i64) -> EvalContext {
        let mut user_state = serde_json::Map::new();
        user_state.insert("age".to_string(), json!(age));
        EvalContext::new(user_state, json!({}), json!({}))
    }

    #[test]
    fn literal_and_comparison() {
        let expr = parse("user_state.age < 18").unwrap();
        assert!(evaluate(&expr, &ctx_with_age(10)).truthy());
        assert!(!evaluate(&expr, &ctx_with_age(25)).truthy());
    }

    #[test]
    fn undeclared_path_is_null_and_falsy() {
        let expr = parse("user_state.missing").unwrap();
        assert_eq!(evaluate(&expr, &ctx_with_age(1)), EvalValue::Null);
    }

    #[test]
    fn cross_type_equality_never_errors() {
        let expr = parse(r#"user_state.age == "25""#).unwrap();
        // age is a number, RHS a string: cross-type non-numeric comparison -> false, no error
        assert!(!evaluate(&expr, &ctx_with_age(25)).truthy());
    }

    #[test]
    fn short_circuit_or() {
        let expr = parse("true || user_state.missing").unwrap();
        assert!(evaluate(&expr, &ctx_with_age(0)).truthy());
    }

    #[test]
    fn precedence_and_binds_tighter_than_or() {
        let expr = parse("false || true && true").unwrap();
        assert!(evaluate(&expr, &ctx_with_age(0)).truthy());
    }

    #[test]
    fn parens_override_precedence() {
        let expr = parse("(false || true) && false").unwrap();
        assert!(!evaluate(&expr, &ctx_with_age(0)).truthy());
    }

    #[test]
    fn string_lexicographic_ordering() {
        let mut user_state = serde_json::Map::new();
        user_state.insert("name".to_string(), json!("bob"));
        let ctx = EvalContext::new(user_state, json!({}), json!({}));
        let expr = parse(r#"user_state.name < "carl""#).unwrap();
        assert!(evaluate(&expr, &ctx).truthy());
    }

    #[test]
    fn parse_error_on_garbage() {
        assert!(parse("user_state. ==").is_err());
    }
}
