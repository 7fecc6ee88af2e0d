//! Validation of declarative rule definitions before they reach the store.

use serde_json::Value;
use snare_core::constants::{browsers, os};
use snare_core::{Error, Result};
use snare_storage::NewRule;

pub const CHAIN_SEQUENTIAL: &str = "sequential";
pub const CHAIN_NESTED_FORWARD: &str = "nested-forward";

pub fn is_valid_chain_mode(mode: &str) -> bool {
    mode == CHAIN_SEQUENTIAL || mode == CHAIN_NESTED_FORWARD
}

fn non_empty_string(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty()).map(str::to_string)
}

fn string_or(value: &Value, key: &str, default: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// Module references appear either as bare name strings or as objects
/// carrying a "name" key. Unresolvable entries keep an empty name; the
/// dispatcher rejects them when it fails to find a module body.
fn module_name(entry: &Value) -> String {
    match entry {
        Value::String(s) => s.clone(),
        Value::Object(map) => map.get("name").and_then(Value::as_str).unwrap_or("").to_string(),
        _ => String::new(),
    }
}

fn whole_numbers(entries: &[Value], message: &str) -> Result<Vec<u64>> {
    entries
        .iter()
        .map(|v| v.as_u64().ok_or_else(|| Error::TypeMismatch(message.to_string())))
        .collect()
}

/// Validates a rule definition and produces a row ready for insertion.
/// Checks run in a fixed sequence so the first broken field is the one
/// reported.
pub fn parse_rule(data: &Value) -> Result<NewRule> {
    let name = non_empty_string(data, "name")
        .ok_or_else(|| Error::Validation("Invalid rule name".to_string()))?;
    let author = non_empty_string(data, "author")
        .ok_or_else(|| Error::Validation("Invalid author name".to_string()))?;

    let browser = string_or(data, "browser", "");
    if !browsers::is_valid_code(&browser) {
        return Err(Error::Validation("Invalid browser definition".to_string()));
    }
    let os_name = string_or(data, "os", "");
    if !os::is_valid(&os_name) {
        return Err(Error::Validation("Invalid os definition".to_string()));
    }

    let chain_mode = match data.get("chain_mode") {
        None | Some(Value::Null) => CHAIN_SEQUENTIAL.to_string(),
        Some(Value::String(mode)) if is_valid_chain_mode(mode) => mode.clone(),
        Some(_) => {
            return Err(Error::Validation("Invalid chain_mode definition".to_string()));
        }
    };

    let empty = Vec::new();
    let modules: Vec<String> = data
        .get("modules")
        .and_then(Value::as_array)
        .unwrap_or(&empty)
        .iter()
        .map(module_name)
        .collect();
    let order_values = data.get("execution_order").and_then(Value::as_array).unwrap_or(&empty);
    let delay_values = data.get("execution_delay").and_then(Value::as_array).unwrap_or(&empty);

    if order_values.len() != modules.len() {
        return Err(Error::Validation(
            "execution_order is not consistent with the number of modules".to_string(),
        ));
    }
    if delay_values.len() != modules.len() {
        return Err(Error::Validation(
            "execution_delay is not consistent with the number of modules".to_string(),
        ));
    }

    let execution_order: Vec<usize> =
        whole_numbers(order_values, "execution_order entries must be Integers")?
            .into_iter()
            .map(|n| n as usize)
            .collect();
    let execution_delay = whole_numbers(delay_values, "execution_delay entries must be Integers")?;

    Ok(NewRule {
        name,
        author,
        browser,
        browser_version: string_or(data, "browser_version", "ALL"),
        os: os_name,
        os_version: string_or(data, "os_version", "ALL"),
        modules,
        execution_order,
        execution_delay,
        chain_mode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> Value {
        json!({
            "name": "Test Rule",
            "author": "Test Author",
            "browser": "ALL",
            "browser_version": "ALL",
            "os": "Windows",
            "os_version": "ALL",
            "modules": [],
            "execution_order": [],
            "execution_delay": [],
            "chain_mode": "sequential"
        })
    }

    fn err_message(result: Result<NewRule>) -> String {
        match result.unwrap_err() {
            Error::Validation(msg) | Error::TypeMismatch(msg) => msg,
            other => panic!("unexpected error variant: {other}"),
        }
    }

    #[test]
    fn test_valid_minimal_rule() {
        let rule = parse_rule(&minimal()).unwrap();
        assert_eq!(rule.name, "Test Rule");
        assert_eq!(rule.chain_mode, "sequential");
        assert!(rule.modules.is_empty());
    }

    #[test]
    fn test_empty_or_missing_name() {
        let mut data = minimal();
        data["name"] = json!("");
        assert_eq!(err_message(parse_rule(&data)), "Invalid rule name");
        data.as_object_mut().unwrap().remove("name");
        assert_eq!(err_message(parse_rule(&data)), "Invalid rule name");
    }

    #[test]
    fn test_empty_author() {
        let mut data = minimal();
        data["author"] = json!("");
        assert_eq!(err_message(parse_rule(&data)), "Invalid author name");
    }

    #[test]
    fn test_invalid_browser_code() {
        let mut data = minimal();
        data["browser"] = json!("XX");
        assert_eq!(err_message(parse_rule(&data)), "Invalid browser definition");
    }

    #[test]
    fn test_invalid_os_name() {
        let mut data = minimal();
        data["os"] = json!("InvalidOS");
        assert_eq!(err_message(parse_rule(&data)), "Invalid os definition");
    }

    #[test]
    fn test_invalid_chain_mode() {
        let mut data = minimal();
        data["chain_mode"] = json!("invalid");
        assert_eq!(err_message(parse_rule(&data)), "Invalid chain_mode definition");
    }

    #[test]
    fn test_chain_mode_defaults_to_sequential() {
        let mut data = minimal();
        data.as_object_mut().unwrap().remove("chain_mode");
        assert_eq!(parse_rule(&data).unwrap().chain_mode, "sequential");
    }

    #[test]
    fn test_nested_forward_accepted() {
        let mut data = minimal();
        data["chain_mode"] = json!("nested-forward");
        assert_eq!(parse_rule(&data).unwrap().chain_mode, "nested-forward");
    }

    #[test]
    fn test_all_valid_os_names_accepted() {
        for os_name in ["Linux", "Windows", "OSX", "Android", "iOS", "BlackBerry", "ALL"] {
            let mut data = minimal();
            data["os"] = json!(os_name);
            assert!(parse_rule(&data).is_ok(), "os {os_name} rejected");
        }
    }

    #[test]
    fn test_order_length_mismatch() {
        let mut data = minimal();
        data["modules"] = json!([{ "name": "a" }]);
        data["execution_delay"] = json!([0]);
        assert_eq!(
            err_message(parse_rule(&data)),
            "execution_order is not consistent with the number of modules"
        );
    }

    #[test]
    fn test_delay_length_mismatch() {
        let mut data = minimal();
        data["modules"] = json!([{ "name": "a" }]);
        data["execution_order"] = json!([0]);
        assert_eq!(
            err_message(parse_rule(&data)),
            "execution_delay is not consistent with the number of modules"
        );
    }

    #[test]
    fn test_order_entries_must_be_integers() {
        let mut data = minimal();
        data["modules"] = json!([{}]);
        data["execution_order"] = json!(["x"]);
        data["execution_delay"] = json!([0]);
        assert_eq!(err_message(parse_rule(&data)), "execution_order entries must be Integers");
    }

    #[test]
    fn test_delay_entries_must_be_integers() {
        let mut data = minimal();
        data["modules"] = json!([{}]);
        data["execution_order"] = json!([0]);
        data["execution_delay"] = json!(["not_an_int"]);
        assert_eq!(err_message(parse_rule(&data)), "execution_delay entries must be Integers");
    }

    #[test]
    fn test_module_names_from_objects_and_strings() {
        let mut data = minimal();
        data["modules"] = json!([{ "name": "alert_dialog" }, "get_cookie"]);
        data["execution_order"] = json!([0, 1]);
        data["execution_delay"] = json!([0, 0]);
        let rule = parse_rule(&data).unwrap();
        assert_eq!(rule.modules, vec!["alert_dialog", "get_cookie"]);
    }

    #[test]
    fn test_version_defaults_to_all() {
        let mut data = minimal();
        data.as_object_mut().unwrap().remove("browser_version");
        data.as_object_mut().unwrap().remove("os_version");
        let rule = parse_rule(&data).unwrap();
        assert_eq!(rule.browser_version, "ALL");
        assert_eq!(rule.os_version, "ALL");
    }
}
