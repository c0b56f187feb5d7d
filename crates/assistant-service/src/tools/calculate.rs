use crate::registry::repair::{evaluate, format_number};
use crate::registry::{tool_error, FunctionDeclaration, Registration, Schema, ToolContext};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct CalculateInput {
    pub expression: String,
}

pub fn registration() -> Registration {
    Registration::function(
        FunctionDeclaration::new(
            "calculate",
            "Evaluate an arithmetic expression. Supports + - * / % ^ and parentheses. Use this instead of doing \
             arithmetic yourself.",
            Schema::object().required_property(
                "expression",
                Schema::string("The expression to evaluate, e.g. '(3 + 4) * 2.5'."),
            ),
        ),
        |_ctx: ToolContext, input: CalculateInput| async move { calculate(&input.expression) },
        |_: &CalculateInput| "Calculating".to_string(),
    )
}

fn calculate(expression: &str) -> Value {
    match evaluate(expression) {
        Ok(value) => json!({"result": format_number(value)}),
        Err(e) => tool_error(format!("Could not evaluate {:?}: {}", expression, e)),
    }
}
