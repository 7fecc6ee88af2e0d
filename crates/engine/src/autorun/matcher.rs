use snare_storage::Rule;

use super::versions::compare_versions;

/// Splits a version condition like ">= 41" into operator and operand.
/// A bare value means equality. Anything that is not exactly two tokens
/// is treated as a literal equality operand, the same way the rule DSL
/// reads it.
fn split_condition(expr: &str) -> (&str, &str) {
    let mut parts = expr.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(op), Some(ver), None) => (op, ver),
        _ => ("==", expr.trim()),
    }
}

fn dimension_matches(rule_name: &str, rule_version: &str, name: &str, version: &str) -> bool {
    if rule_name != "ALL" && rule_name != name {
        return false;
    }
    if rule_version == "ALL" {
        return true;
    }
    let (op, ver) = split_condition(rule_version);
    compare_versions(version, op, ver)
}

pub fn browser_matches(rule: &Rule, browser: &str, browser_version: &str) -> bool {
    dimension_matches(&rule.browser, &rule.browser_version, browser, browser_version)
}

pub fn os_matches(rule: &Rule, os: &str, os_version: &str) -> bool {
    dimension_matches(&rule.os, &rule.os_version, os, os_version)
}

/// Both dimensions must match for the rule to apply to the agent.
pub fn rule_matches(
    rule: &Rule,
    browser: &str,
    browser_version: &str,
    os: &str,
    os_version: &str,
) -> bool {
    browser_matches(rule, browser, browser_version) && os_matches(rule, os, os_version)
}

/// Ids of all rules matching the reported environment, preserving store
/// order. Empty covers both "no rules" and "no matches"; callers
/// short-circuit on it either way.
pub fn find_matching(
    rules: &[Rule],
    browser: &str,
    browser_version: &str,
    os: &str,
    os_version: &str,
) -> Vec<i64> {
    rules
        .iter()
        .filter(|r| rule_matches(r, browser, browser_version, os, os_version))
        .map(|r| r.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(browser: &str, browser_version: &str, os: &str, os_version: &str) -> Rule {
        Rule {
            id: 1,
            name: "r".to_string(),
            author: "t".to_string(),
            browser: browser.to_string(),
            browser_version: browser_version.to_string(),
            os: os.to_string(),
            os_version: os_version.to_string(),
            modules: vec![],
            execution_order: vec![],
            execution_delay: vec![],
            chain_mode: "sequential".to_string(),
        }
    }

    #[test]
    fn test_all_all_matches_every_environment() {
        let r = rule("ALL", "ALL", "ALL", "ALL");
        assert!(rule_matches(&r, "FF", "41", "Linux", "4.4"));
        assert!(rule_matches(&r, "UN", "0", "BeOS", ""));
    }

    #[test]
    fn test_browser_dimension() {
        let r = rule("FF", "ALL", "ALL", "ALL");
        assert!(rule_matches(&r, "FF", "41", "Linux", "1"));
        assert!(!rule_matches(&r, "C", "41", "Linux", "1"));
    }

    #[test]
    fn test_version_condition_with_operator() {
        let r = rule("FF", ">= 41", "ALL", "ALL");
        assert!(rule_matches(&r, "FF", "41", "Linux", "1"));
        assert!(rule_matches(&r, "FF", "42.0.1", "Linux", "1"));
        assert!(!rule_matches(&r, "FF", "40", "Linux", "1"));
    }

    #[test]
    fn test_bare_version_means_equality() {
        let r = rule("FF", "41", "ALL", "ALL");
        assert!(rule_matches(&r, "FF", "41", "Linux", "1"));
        assert!(!rule_matches(&r, "FF", "41.1", "Linux", "1"));
    }

    #[test]
    fn test_os_dimension() {
        let r = rule("ALL", "ALL", "Windows", "< 10");
        assert!(rule_matches(&r, "IE", "8", "Windows", "7"));
        assert!(!rule_matches(&r, "IE", "8", "Windows", "10"));
        assert!(!rule_matches(&r, "IE", "8", "Linux", "7"));
    }

    #[test]
    fn test_find_matching_preserves_order() {
        let mut r1 = rule("ALL", "ALL", "ALL", "ALL");
        r1.id = 1;
        let mut r2 = rule("C", "ALL", "ALL", "ALL");
        r2.id = 2;
        let mut r3 = rule("FF", "ALL", "ALL", "ALL");
        r3.id = 3;
        let rules = vec![r1, r2, r3];

        assert_eq!(find_matching(&rules, "FF", "41", "Linux", "1"), vec![1, 3]);
        assert_eq!(find_matching(&rules, "C", "100", "OSX", "12"), vec![1, 2]);
        assert_eq!(find_matching(&[], "FF", "41", "Linux", "1"), Vec::<i64>::new());
    }
}
