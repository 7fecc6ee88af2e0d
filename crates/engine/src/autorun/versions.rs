use std::cmp::Ordering;

/// Comparison conditions a rule version expression may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    All,
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Condition {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ALL" => Some(Condition::All),
            "==" => Some(Condition::Eq),
            "<" => Some(Condition::Lt),
            "<=" => Some(Condition::Le),
            ">" => Some(Condition::Gt),
            ">=" => Some(Condition::Ge),
            _ => None,
        }
    }
}

/// Compares two dotted version strings under `cond`. "ALL" matches
/// unconditionally; an unrecognized operator never matches. Segments are
/// compared numerically with zero-padding for the shorter side; a
/// non-numeric segment on either side degrades the whole comparison to
/// plain string ordering.
pub fn compare_versions(a: &str, cond: &str, b: &str) -> bool {
    let Some(cond) = Condition::parse(cond) else {
        return false;
    };
    let ord = version_cmp(a, b);
    match cond {
        Condition::All => true,
        Condition::Eq => ord == Ordering::Equal,
        Condition::Lt => ord == Ordering::Less,
        Condition::Le => ord != Ordering::Greater,
        Condition::Gt => ord == Ordering::Greater,
        Condition::Ge => ord != Ordering::Less,
    }
}

fn segments(v: &str) -> Option<Vec<u64>> {
    v.trim().split('.').map(|s| s.parse::<u64>().ok()).collect()
}

fn version_cmp(a: &str, b: &str) -> Ordering {
    let (Some(sa), Some(sb)) = (segments(a), segments(b)) else {
        return a.cmp(b);
    };
    let len = sa.len().max(sb.len());
    for i in 0..len {
        let x = sa.get(i).copied().unwrap_or(0);
        let y = sb.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}
