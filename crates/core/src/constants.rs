//! Browser and OS tables shared by rule validation, environment
//! normalization and bootstrap selection.

pub mod browsers {
    /// Codes accepted in rule definitions.
    pub const CODES: &[&str] = &["ALL", "FF", "C", "IE", "E", "O", "S"];

    /// Code reported when the agent's browser cannot be identified.
    pub const UNKNOWN: &str = "UN";

    pub fn is_valid_code(code: &str) -> bool {
        CODES.contains(&code)
    }

    /// Display name for a browser code. Unrecognized codes have none.
    pub fn friendly_name(code: &str) -> Option<&'static str> {
        match code {
            "FF" => Some("Firefox"),
            "C" => Some("Chrome"),
            "IE" => Some("Internet Explorer"),
            "E" => Some("MSEdge"),
            "O" => Some("Opera"),
            "S" => Some("Safari"),
            "UN" => Some("UNKNOWN"),
            _ => None,
        }
    }
}

pub mod os {
    /// OS names accepted in rule definitions.
    pub const NAMES: &[&str] = &[
        "Linux",
        "Windows",
        "OSX",
        "Android",
        "iOS",
        "BlackBerry",
        "ALL",
    ];

    pub fn is_valid(name: &str) -> bool {
        NAMES.contains(&name)
    }

    /// Normalizes a reported OS string to one of the rule OS names.
    /// Android is checked before Linux since Android agents report both.
    pub fn match_os(reported: &str) -> &'static str {
        let lower = reported.to_lowercase();
        if lower.contains("windows") {
            "Windows"
        } else if lower.contains("osx") || lower.contains("mac") {
            "OSX"
        } else if lower.contains("android") {
            "Android"
        } else if lower.contains("ios") || lower.contains("iphone") || lower.contains("ipad") {
            "iOS"
        } else if lower.contains("blackberry") {
            "BlackBerry"
        } else if lower.contains("linux") {
            "Linux"
        } else {
            "ALL"
        }
    }
}

/// User agents of browsers that cannot run the full hook client and get the
/// staged loader instead. Matching takes the UA's last whitespace token and
/// containment-checks it against each entry in order; first hit wins.
pub const LEGACY_USER_AGENTS: &[&str] = &[
    "Mozilla/4.0 (compatible; MSIE 6.0; Windows NT 5.1; SV1)",
    "Mozilla/4.0 (compatible; MSIE 7.0; Windows NT 6.0; SLCC1)",
    "Mozilla/4.0 (compatible; MSIE 8.0; Windows NT 6.1; Trident/4.0)",
    "Mozilla/5.0 (compatible; MSIE 9.0; Windows NT 6.1; Trident/5.0)",
    "Mozilla/5.0 (compatible; MSIE 10.0; Windows NT 6.2; Trident/6.0)",
    "Mozilla/5.0 (Windows NT 6.1; Trident/7.0; rv:11.0) like Gecko",
];

pub fn is_legacy_user_agent(user_agent: &str) -> bool {
    let Some(token) = user_agent.split_whitespace().last() else {
        return false;
    };
    LEGACY_USER_AGENTS.iter().any(|entry| entry.contains(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_codes() {
        assert!(browsers::is_valid_code("ALL"));
        assert!(browsers::is_valid_code("FF"));
        assert!(!browsers::is_valid_code("XX"));
        assert_eq!(browsers::friendly_name("FF"), Some("Firefox"));
        assert_eq!(browsers::friendly_name("C"), Some("Chrome"));
        assert_eq!(browsers::friendly_name("IE"), Some("Internet Explorer"));
        assert_eq!(browsers::friendly_name("S"), Some("Safari"));
        assert_eq!(browsers::friendly_name("E"), Some("MSEdge"));
        assert_eq!(browsers::friendly_name("UN"), Some("UNKNOWN"));
        assert_eq!(browsers::friendly_name("nope"), None);
    }

    #[test]
    fn test_match_os() {
        assert_eq!(os::match_os("Windows NT 10.0"), "Windows");
        assert_eq!(os::match_os("Intel Mac OS X 10_15"), "OSX");
        assert_eq!(os::match_os("Linux x86_64"), "Linux");
        // Android UAs also carry "Linux"
        assert_eq!(os::match_os("Linux; Android 13"), "Android");
        assert_eq!(os::match_os("iPhone OS 16_5"), "iOS");
        assert_eq!(os::match_os("BlackBerry 9900"), "BlackBerry");
        assert_eq!(os::match_os("BeOS R5"), "ALL");
    }

    #[test]
    fn test_legacy_user_agent_match() {
        assert!(is_legacy_user_agent(
            "Mozilla/4.0 (compatible; MSIE 6.0; Windows NT 5.1; SV1)"
        ));
        // last token containment, not full-string equality
        assert!(is_legacy_user_agent("Something ending in SV1)"));
        assert!(!is_legacy_user_agent(
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 Chrome/120.0 Safari/537.36"
        ));
        assert!(!is_legacy_user_agent(""));
    }
}
