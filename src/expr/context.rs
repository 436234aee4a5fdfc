use serde_json::{Map, Value as Json};

use super::value::EvalValue;

/// Everything a `when` or `assign` expression can read: `user_state.*`,
/// `$event.*` (the client payload), `$run.*` (session metadata).
#[derive(Debug, Clone)]
pub struct EvalContext {
    user_state: Map<String, Json>,
    event: Json,
    run: Json,
}

impl EvalContext {
    pub fn new(user_state: Map<String, Json>, event: Json, run: Json) -> Self {
        Self {
            user_state,
            event,
            run,
        }
    }

    /// Undeclared/missing paths evaluate to `null` (spec.md §4.A), never an error.
    pub fn resolve(&self, root: &str, path: &[String]) -> EvalValue {
        let base = match root {
            "user_state" => Json::Object(self.user_state.clone()),
            "$event" => self.event.clone(),
            "$run" => self.run.clone(),
            _ => return EvalValue::Null,
        };
        let mut current = &base;
        for segment in path {
            match current.get(segment) {
                Some(v) => current = v,
                None => return EvalValue::Null,
            }
        }
        EvalValue::from_json(current)
    }
}
