/// Name filter shared by QUERY and access-control entries: an exact name,
/// `prefix*`, or `*`. Matching ignores ASCII case.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NamePattern {
    Any,
    Prefix(String),
    Exact(String),
}

impl NamePattern {
    /// `None` for an empty pattern or a `*` anywhere but the end.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if raw == "*" {
            return Some(Self::Any);
        }

        match raw.find('*') {
            None => Some(Self::Exact(raw.to_ascii_uppercase())),
            Some(index) if index == raw.len() - 1 => {
                Some(Self::Prefix(raw[..index].to_ascii_uppercase()))
            }
            Some(_) => None,
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        let name = name.to_ascii_uppercase();
        match self {
            Self::Any => true,
            Self::Prefix(prefix) => name.starts_with(prefix.as_str()),
            Self::Exact(exact) => name == *exact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::NamePattern;

    #[test]
    fn parses_the_three_forms() {
        assert_eq!(NamePattern::parse("*"), Some(NamePattern::Any));
        assert_eq!(
            NamePattern::parse("ord*"),
            Some(NamePattern::Prefix("ORD".to_owned()))
        );
        assert_eq!(
            NamePattern::parse(" Orders "),
            Some(NamePattern::Exact("ORDERS".to_owned()))
        );
    }

    #[test]
    fn rejects_empty_and_inner_wildcards() {
        assert_eq!(NamePattern::parse(""), None);
        assert_eq!(NamePattern::parse("a*b"), None);
        assert_eq!(NamePattern::parse("**"), None);
    }

    #[test]
    fn matching_ignores_case() {
        let prefix = NamePattern::parse("ORD*").expect("prefix should parse");
        assert!(prefix.matches("orders"));
        assert!(prefix.matches("ORD"));
        assert!(!prefix.matches("BORDER"));

        let exact = NamePattern::parse("orders").expect("exact should parse");
        assert!(exact.matches("ORDERS"));
        assert!(!exact.matches("ORDERS2"));
        assert!(NamePattern::Any.matches(""));
    }
}
