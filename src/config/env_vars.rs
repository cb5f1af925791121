use lazy_static::lazy_static;
use regex::{Captures, Regex};

lazy_static! {
    static ref UNIX_VAR: Regex = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").unwrap();
    static ref WINDOWS_VAR: Regex = Regex::new(r"%([A-Za-z_][A-Za-z0-9_()]*)%").unwrap();
}

fn expand_with<F>(pattern: &Regex, input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    pattern
        .replace_all(input, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            lookup(name).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Parse Unix-style environment variables ($VAR and ${VAR})
///
/// Unset variables are left as written so a typo stays visible in logs.
pub fn parse_unix_env_vars(value: &str) -> String {
    expand_with(&UNIX_VAR, value, |name| std::env::var(name).ok())
}

/// Parse Windows-style environment variables (%VAR%)
pub fn parse_windows_env_vars(value: &str) -> String {
    expand_with(&WINDOWS_VAR, value, |name| std::env::var(name).ok())
}

/// Expands both styles of variable reference.
pub fn expand_env_vars(value: &str) -> String {
    let mut result = value.to_string();
    if result.contains('%') {
        result = parse_windows_env_vars(&result);
    }
    if result.contains('$') {
        result = parse_unix_env_vars(&result);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unix_env_vars() {
        std::env::set_var("EVIDENCE_SEEKER_TEST_CASE", "case-042");
        assert_eq!(
            parse_unix_env_vars("/cases/${EVIDENCE_SEEKER_TEST_CASE}/extraction.zip"),
            "/cases/case-042/extraction.zip"
        );
        assert_eq!(
            parse_unix_env_vars("/cases/$EVIDENCE_SEEKER_TEST_CASE/out"),
            "/cases/case-042/out"
        );
    }

    #[test]
    fn test_unset_variables_are_kept() {
        assert_eq!(
            parse_unix_env_vars("$EVIDENCE_SEEKER_SURELY_UNSET/x"),
            "$EVIDENCE_SEEKER_SURELY_UNSET/x"
        );
        assert_eq!(parse_unix_env_vars("cost: $5"), "cost: $5");
    }

    #[test]
    fn test_parse_windows_env_vars() {
        std::env::set_var("EVIDENCE_SEEKER_TEST_DRIVE", "E:");
        assert_eq!(
            parse_windows_env_vars("%EVIDENCE_SEEKER_TEST_DRIVE%\\cases"),
            "E:\\cases"
        );
        assert_eq!(expand_env_vars("100%"), "100%");
    }
}
