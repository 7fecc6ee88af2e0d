//! Client-side execution wrappers. Pure string building; the output is only
//! ever executed by the remote agent.

/// Placeholder a module template carries where the previous module's output
/// should be injected. Always quoted in templates.
pub const INPUT_PLACEHOLDER: &str = "<<mod_input>>";

/// A module name/body pair ready for composition.
#[derive(Debug, Clone)]
pub struct WrapModule {
    pub name: String,
    pub body: String,
}

/// Strips leading header-comment lines from a module template; the
/// executable body is kept verbatim. When `replace_input` is set, quoted
/// input placeholders become a bare `mod_input` reference so the generated
/// wrapper can feed the previous output in; otherwise the placeholder stays
/// untouched.
pub fn clean_command_body(body: &str, replace_input: bool) -> String {
    let lines: Vec<&str> = body.lines().collect();
    let first_code = lines
        .iter()
        .position(|l| {
            let t = l.trim_start();
            !t.is_empty() && !t.starts_with("//")
        })
        .unwrap_or(0);
    let mut cleaned = lines[first_code..].join("\n");
    if replace_input {
        cleaned = cleaned
            .replace(&format!("'{}'", INPUT_PLACEHOLDER), "mod_input")
            .replace(&format!("\"{}\"", INPUT_PLACEHOLDER), "mod_input");
    }
    cleaned
}

/// Makes a module label safe to embed in generated function names.
pub fn js_ident(name: &str) -> String {
    let mut ident: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if ident.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(true) {
        ident.insert(0, '_');
    }
    ident
}

fn unique_output_var(name: &str, token: &str) -> String {
    format!("{}_{}_mod_output", name, token)
}

/// Delay-scheduled composition. Each body becomes a uniquely named function
/// `<name>_<token>`; a setTimeout call fires the module at `order[pos]`
/// after `delay[pos]` milliseconds. Only schedule order is guaranteed, not
/// completion order. Every module gets its own `<name>_<token>_mod_output`
/// variable; generic `mod_output` references in the body are rewritten to
/// it.
pub fn sequential(mods: &[WrapModule], order: &[usize], delay: &[u64], token: &str) -> String {
    let mut script = String::new();
    for m in mods {
        let name = js_ident(&m.name);
        let output_var = unique_output_var(&name, token);
        let body = clean_command_body(&m.body, false).replace("mod_output", &output_var);
        script.push_str(&format!("var {};\n", output_var));
        script.push_str(&format!("var {}_{} = function(){{\n{}\n}};\n\n", name, token, body));
    }
    for (pos, idx) in order.iter().enumerate() {
        let Some(m) = mods.get(*idx) else {
            continue;
        };
        let d = delay.get(pos).copied().unwrap_or(0);
        script.push_str(&format!(
            "setTimeout(function(){{{}_{}();}}, {});\n",
            js_ident(&m.name),
            token,
            d
        ));
    }
    script
}

/// Continuation-passing composition. Each module is wrapped as
/// `<name>_<token>(mod_input)` with a companion `<name>_<token>_f` that,
/// guarded by the condition literal for that position, forwards the
/// module's output to the next module in execution order. The last forward
/// target is the literal "null" terminal. Module n+1 never starts before
/// module n completed. `forwards` and `conditions` are parallel to `order`.
pub fn nested_forward(
    mods: &[WrapModule],
    forwards: &[String],
    conditions: &[String],
    order: &[usize],
    token: &str,
) -> String {
    let mut script = String::new();
    for (pos, idx) in order.iter().enumerate() {
        let Some(m) = mods.get(*idx) else {
            continue;
        };
        let name = js_ident(&m.name);
        let output_var = unique_output_var(&name, token);
        let body = clean_command_body(&m.body, true).replace("mod_output", &output_var);
        let condition = conditions.get(pos).map(String::as_str).unwrap_or("true");
        let forward = forwards.get(pos).map(String::as_str).unwrap_or("null");
        let call = if forward == "null" {
            "null;".to_string()
        } else {
            format!("{}(mod_output);", forward)
        };

        script.push_str(&format!("var {};\n", output_var));
        script.push_str(&format!(
            "var {}_{} = function(mod_input){{\n{}\n{}_{}_f({});\n}};\n",
            name, token, body, name, token, output_var
        ));
        script.push_str(&format!(
            "var {}_{}_f = function(mod_output){{\n  if ({}) {{ {} }}\n}};\n\n",
            name, token, condition, call
        ));
    }
    if let Some(first) = order.first().and_then(|&idx| mods.get(idx)) {
        script.push_str(&format!("{}_{}(null);\n", js_ident(&first.name), token));
    }
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(name: &str, body: &str) -> WrapModule {
        WrapModule {
            name: name.to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_clean_keeps_executable_body() {
        let body = "// Alert module\n// posts a dialog\nhook.execute(function() {\nalert(1);\n});";
        let cleaned = clean_command_body(body, false);
        assert!(cleaned.starts_with("hook.execute(function() {"));
        assert!(cleaned.contains("alert(1);"));
        assert!(!cleaned.contains("Alert module"));
    }

    #[test]
    fn test_clean_placeholder_verbatim_without_replace() {
        let body = "var input = '<<mod_input>>';\nuse(input);";
        let cleaned = clean_command_body(body, false);
        assert!(cleaned.contains("'<<mod_input>>'"));
        // idempotent
        assert_eq!(clean_command_body(&cleaned, false), cleaned);
    }

    #[test]
    fn test_clean_replaces_both_quote_styles() {
        let body = "var a = '<<mod_input>>';\nvar b = \"<<mod_input>>\";";
        let cleaned = clean_command_body(body, true);
        assert!(!cleaned.contains("<<mod_input>>"));
        assert_eq!(cleaned, "var a = mod_input;\nvar b = mod_input;");
    }

    #[test]
    fn test_sequential_round_trip() {
        let mods = vec![m("a", "doA();"), m("b", "doB();")];
        let script = sequential(&mods, &[0, 1], &[0, 500], "t");

        assert!(script.contains("var a_t = function(){"));
        assert!(script.contains("var b_t = function(){"));
        assert!(script.contains("setTimeout(function(){a_t();}, 0);"));
        assert!(script.contains("setTimeout(function(){b_t();}, 500);"));
        assert!(script.contains("a_t_mod_output"));
        assert!(script.contains("b_t_mod_output"));
    }

    #[test]
    fn test_sequential_order_permutation() {
        let mods = vec![m("first", "f();"), m("second", "s();")];
        let script = sequential(&mods, &[1, 0], &[100, 200], "tok");
        // position 0 of the order fires mods[1] after 100ms
        let second_call = script.find("setTimeout(function(){second_tok();}, 100);").unwrap();
        let first_call = script.find("setTimeout(function(){first_tok();}, 200);").unwrap();
        assert!(second_call < first_call);
    }

    #[test]
    fn test_sequential_rewrites_output_references() {
        let mods = vec![m("grab", "mod_output = document.title;")];
        let script = sequential(&mods, &[0], &[0], "t1");
        assert!(script.contains("grab_t1_mod_output = document.title;"));
        assert!(script.contains("var grab_t1_mod_output;"));
    }

    #[test]
    fn test_nested_forward_single_module_terminal() {
        let mods = vec![m("only_nf1", "probe();")];
        let script = nested_forward(&mods, &["null".to_string()], &["true".to_string()], &[0], "tk");

        assert!(script.contains("var only_nf1_tk = function(mod_input){"));
        assert!(script.contains("var only_nf1_tk_f = function(mod_output){"));
        assert!(script.contains("only_nf1_tk_mod_output"));
        assert!(script.contains("if (true) { null; }"));
        // chain kickoff
        assert!(script.contains("only_nf1_tk(null);"));
    }

    #[test]
    fn test_nested_forward_chains_in_execution_order() {
        let mods = vec![m("a", "stepA();"), m("b", "stepB();")];
        let forwards = vec!["b_tk".to_string(), "null".to_string()];
        let conditions = vec!["true".to_string(), "true".to_string()];
        let script = nested_forward(&mods, &forwards, &conditions, &[0, 1], "tk");

        // a forwards its output to b, b terminates
        assert!(script.contains("if (true) { b_tk(mod_output); }"));
        assert!(script.contains("a_tk_f(a_tk_mod_output);"));
        assert!(script.contains("b_tk_f(b_tk_mod_output);"));
        assert!(script.trim_end().ends_with("a_tk(null);"));
    }

    #[test]
    fn test_nested_forward_replaces_input_placeholder() {
        let mods = vec![m("use", "var v = '<<mod_input>>';\nconsume(v);")];
        let script = nested_forward(&mods, &["null".to_string()], &["true".to_string()], &[0], "t");
        assert!(script.contains("var v = mod_input;"));
        assert!(!script.contains("<<mod_input>>"));
    }

    #[test]
    fn test_js_ident_sanitizes_labels() {
        assert_eq!(js_ident("alert_dialog"), "alert_dialog");
        assert_eq!(js_ident("autorun:Test Rule"), "autorun_Test_Rule");
        assert_eq!(js_ident("1shot"), "_1shot");
        assert_eq!(js_ident(""), "_");
    }
}
