use once_cell::sync::Lazy;
use regex::Regex;

/// Token for the source file's name.
pub const TOKEN_FILE: &str = "%F";
pub const TOKEN_DISTRICT: &str = "%D";
pub const TOKEN_GROUP: &str = "%G";
pub const TOKEN_NUMBER: &str = "%N";
pub const TOKEN_YEAR: &str = "%Y";

/// Apply `(token, value)` substitutions in order. Each replaces only the first
/// occurrence of its token in the string produced so far; absent tokens are skipped.
/// There is no escaping, so a value that contains a later token can be substituted again.
pub fn apply<T, V>(template: &str, substitutions: &[(T, V)]) -> String
where
    T: AsRef<str>,
    V: AsRef<str>,
{
    substitutions.iter().fold(template.to_string(), |acc, (token, value)| {
        acc.replacen(token.as_ref(), value.as_ref(), 1)
    })
}

static DRIVE_ID_IN_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)/d/([^/\\]+)(?:/|$)").expect("static regex")
});

/// Extract the id from a URL of the form `.../d/<id>/...` or `.../d/<id>`.
pub fn id_from_url(url: &str) -> Option<&str> {
    DRIVE_ID_IN_URL.captures(url).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// Resolve a template-rule source reference: the embedded id when the value is
/// URL-shaped, otherwise the trimmed value itself is taken as an id.
pub fn source_id(reference: &str) -> Option<&str> {
    let r = reference.trim();
    if r.is_empty() {
        return None;
    }
    Some(id_from_url(r).unwrap_or(r))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_in_order() {
        let out = apply("%F-%D-%Y", &[("%F", "Report"), ("%D", "North"), ("%Y", "2024")]);
        assert_eq!(out, "Report-North-2024");
    }

    #[test]
    fn first_occurrence_only() {
        assert_eq!(apply("%F %F", &[("%F", "x")]), "x %F");
    }

    #[test]
    fn missing_tokens_ignored() {
        assert_eq!(apply("Plain name", &[("%G", "Elfins"), ("%N", "7")]), "Plain name");
    }

    #[test]
    fn later_substitution_sees_earlier_output() {
        // A value containing a later token is consumed by that later substitution.
        assert_eq!(apply("%F", &[("%F", "%D copy"), ("%D", "South")]), "South copy");
    }

    #[test]
    fn url_id_extraction() {
        assert_eq!(id_from_url("https://docs.google.com/spreadsheets/d/1AbC_xyz/edit#gid=0"), Some("1AbC_xyz"));
        assert_eq!(id_from_url("https://docs.google.com/forms/d/FORMID"), Some("FORMID"));
        assert_eq!(id_from_url("https://drive.google.com/drive/folders/abc"), None);
        assert_eq!(id_from_url(""), None);
    }

    #[test]
    fn source_id_falls_back_to_raw() {
        assert_eq!(source_id(" 1RawId "), Some("1RawId"));
        assert_eq!(source_id("https://docs.google.com/document/d/DOC1/view"), Some("DOC1"));
        assert_eq!(source_id("   "), None);
    }
}
