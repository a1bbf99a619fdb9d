use chromiumoxide::{cdp::js_protocol::runtime, Page};
use serde::de::DeserializeOwned;
use serde_json as json;

use crate::browser::DriverError;

pub async fn evaluate_expression<Output: DeserializeOwned>(
    page: &Page,
    expression: impl Into<String>,
) -> Result<Output, DriverError> {
    let returns: runtime::EvaluateReturns = page
        .execute(
            runtime::EvaluateParams::builder()
                .expression(expression)
                .return_by_value(true)
                .await_promise(true)
                .build()
                .map_err(DriverError::Script)?,
        )
        .await?
        .result;
    if let Some(exception) = returns.exception_details {
        let message = exception
            .exception
            .and_then(|object| object.description)
            .unwrap_or(exception.text);
        return Err(DriverError::Script(message));
    }
    // `undefined` carries no value; treat it like `null`.
    let value = returns.result.value.unwrap_or(json::Value::Null);
    Ok(json::from_value(value)?)
}

/// Calls `function_expression` with JSON-encoded `arguments`.
pub async fn evaluate_function_call<Output: DeserializeOwned>(
    page: &Page,
    function_expression: impl Into<String>,
    arguments: Vec<json::Value>,
) -> Result<Output, DriverError> {
    let expression = function_call_expression(function_expression, arguments)?;
    evaluate_expression(page, expression).await
}

fn function_call_expression(
    function_expression: impl Into<String>,
    arguments: Vec<json::Value>,
) -> Result<String, DriverError> {
    let mut arguments_json = Vec::with_capacity(arguments.len());
    for arg in arguments {
        arguments_json.push(json::to_string(&arg)?);
    }
    Ok(format!(
        "({})({})",
        function_expression.into(),
        arguments_json.join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_call_quotes_arguments() {
        let expression = function_call_expression(
            "(selector, value) => selector + value",
            vec![json::json!("input[name='x']"), json::json!("a\"b")],
        )
        .unwrap();
        assert_eq!(
            expression,
            r#"((selector, value) => selector + value)("input[name='x']", "a\"b")"#
        );
    }
}
