use serde_json::Value as Json;

/// A runtime expression value. Distinct from `serde_json::Value` so the
/// evaluator's type rules (spec.md §4.A) stay explicit rather than
/// inheriting JSON's looser notion of equality.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl EvalValue {
    /// "truthy" coercion: null/0/empty-string are false, everything else true.
    pub fn truthy(&self) -> bool {
        match self {
            EvalValue::Null => false,
            EvalValue::Bool(b) => *b,
            EvalValue::Int(i) => *i != 0,
            EvalValue::Float(f) => *f != 0.0,
            EvalValue::Str(s) => !s.is_empty(),
        }
    }

    pub fn from_json(value: &Json) -> Self {
        match value {
            Json::Null => EvalValue::Null,
            Json::Bool(b) => EvalValue::Bool(*b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    EvalValue::Int(i)
                } else {
                    EvalValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Json::String(s) => EvalValue::Str(s.clone()),
            // Objects/arrays have no scalar representation in the grammar;
            // they are only ever compared for (in)equality by identity-via-JSON.
            Json::Array(_) | Json::Object(_) => EvalValue::Null,
        }
    }

    fn as_numeric(&self) -> Option<f64> {
        match self {
            EvalValue::Int(i) => Some(*i as f64),
            EvalValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// `==` / `!=`: numeric subtypes compare across int/float; anything else
    /// falls back to exact same-type comparison.
    pub fn equals(&self, other: &EvalValue) -> bool {
        if let (Some(a), Some(b)) = (self.as_numeric(), other.as_numeric()) {
            return a == b;
        }
        match (self, other) {
            (EvalValue::Null, EvalValue::Null) => true,
            (EvalValue::Bool(a), EvalValue::Bool(b)) => a == b,
            (EvalValue::Str(a), EvalValue::Str(b)) => a == b,
            _ => false,
        }
    }

    /// `<` `<=` `>` `>=`: defined only for two numerics or two strings
    /// (lexicographic); any other pairing returns `false`, never errors.
    pub fn compare(&self, other: &EvalValue) -> Option<std::cmp::Ordering> {
        if let (Some(a), Some(b)) = (self.as_numeric(), other.as_numeric()) {
            return a.partial_cmp(&b);
        }
        if let (EvalValue::Str(a), EvalValue::Str(b)) = (self, other) {
            return Some(a.cmp(b));
        }
        None
    }
}
