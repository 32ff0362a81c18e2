use std::cmp::Ordering;
use std::fmt;

/// A conjunction of version constraints such as `>=1.2 <2`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPredicate {
    raw: String,
    constraints: Vec<(Comparator, Vec<u64>)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparator {
    Any,
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

impl VersionPredicate {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut constraints = Vec::new();
        for part in raw.split_whitespace() {
            let (comparator, rest) = if part == "*" {
                (Comparator::Any, "")
            } else if let Some(rest) = part.strip_prefix(">=") {
                (Comparator::Ge, rest)
            } else if let Some(rest) = part.strip_prefix("<=") {
                (Comparator::Le, rest)
            } else if let Some(rest) = part.strip_prefix('>') {
                (Comparator::Gt, rest)
            } else if let Some(rest) = part.strip_prefix('<') {
                (Comparator::Lt, rest)
            } else if let Some(rest) = part.strip_prefix('=') {
                (Comparator::Eq, rest)
            } else {
                (Comparator::Eq, part)
            };
            let version = if comparator == Comparator::Any {
                Vec::new()
            } else {
                parse_version(rest).ok_or_else(|| format!("invalid version constraint '{}'", part))?
            };
            constraints.push((comparator, version));
        }
        if constraints.is_empty() {
            constraints.push((Comparator::Any, Vec::new()));
        }
        Ok(Self {
            raw: raw.trim().to_string(),
            constraints,
        })
    }

    /// Whether `version` satisfies every constraint. Unparseable versions
    /// only satisfy `*`.
    pub fn matches(&self, version: &str) -> bool {
        let parsed = parse_version(version);
        self.constraints.iter().all(|(comparator, wanted)| {
            if *comparator == Comparator::Any {
                return true;
            }
            let Some(actual) = &parsed else {
                return false;
            };
            let order = compare(actual, wanted);
            match comparator {
                Comparator::Any => true,
                Comparator::Eq => order == Ordering::Equal,
                Comparator::Gt => order == Ordering::Greater,
                Comparator::Ge => order != Ordering::Less,
                Comparator::Lt => order == Ordering::Less,
                Comparator::Le => order != Ordering::Greater,
            }
        })
    }
}

impl fmt::Display for VersionPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Dotted numeric prefix; anything after `-` or `+` is ignored
fn parse_version(text: &str) -> Option<Vec<u64>> {
    let core = text.split(['-', '+']).next()?;
    if core.is_empty() {
        return None;
    }
    core.split('.').map(|part| part.parse().ok()).collect()
}

/// Missing trailing components count as zero
fn compare(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let ordering = a.get(i).unwrap_or(&0).cmp(b.get(i).unwrap_or(&0));
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
