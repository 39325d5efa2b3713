//! Distinguished name helpers
//!
//! New entries are named `<attr>=<slug>.<unix seconds>` below the base DN,
//! where the slug comes from the record's family or full name.

use rolodex_connector::record::{FieldId, Record};

/// Attribute used to name new entries below `base_dn`.
///
/// When the base already uses `uid` for naming, `description` is used so
/// entries do not shadow their parent's naming attribute. Lists always use
/// `description` since `groupOfNames` has no `uid`.
pub fn naming_attribute(base_dn: &str, is_list: bool) -> &'static str {
    let lower = base_dn.to_ascii_lowercase();
    if is_list || lower.starts_with("uid=") || lower.contains(",uid=") {
        "description"
    } else {
        "uid"
    }
}

/// Lowercased ASCII alphanumerics of the family name, or of the full name.
pub fn identity_slug(record: &Record) -> String {
    let slug_of = |field| -> String {
        record
            .text(field)
            .unwrap_or("")
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_lowercase())
            .collect()
    };
    let slug = slug_of(FieldId::FamilyName);
    if slug.is_empty() {
        slug_of(FieldId::FullName)
    } else {
        slug
    }
}

/// Value of the naming attribute for a new entry.
pub fn compose_rdn_value(record: &Record, timestamp: i64) -> String {
    let slug = identity_slug(record);
    if slug.is_empty() {
        timestamp.to_string()
    } else {
        format!("{slug}.{timestamp}")
    }
}

/// `attr=value` joined with the base.
pub fn full_dn(rdn: &str, base_dn: &str) -> String {
    if base_dn.is_empty() {
        rdn.to_string()
    } else {
        format!("{rdn},{base_dn}")
    }
}

/// Whether `attr` takes part in the leading RDN of `dn`.
///
/// Only the entry's own RDN counts; attributes of the base are ignored.
pub fn rdn_uses_attr(dn: &str, attr: &str) -> bool {
    split_unescaped(leading_rdn(dn), '+').any(|ava| {
        ava.split_once('=')
            .is_some_and(|(name, _)| name.trim().eq_ignore_ascii_case(attr))
    })
}

/// Whether two RDNs name the same entry position (case-insensitive).
pub fn same_rdn(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

fn split_unescaped(value: &str, sep: char) -> impl Iterator<Item = &str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, ch) in value.char_indices() {
        match ch {
            '\\' if !escaped => escaped = true,
            c if c == sep && !escaped => {
                parts.push(&value[start..i]);
                start = i + c.len_utf8();
            }
            _ => escaped = false,
        }
    }
    parts.push(&value[start..]);
    parts.into_iter()
}

/// The leading RDN of `dn`, honouring backslash escapes.
pub fn leading_rdn(dn: &str) -> &str {
    let mut escaped = false;
    for (i, ch) in dn.char_indices() {
        match ch {
            '\\' if !escaped => escaped = true,
            ',' if !escaped => return &dn[..i],
            _ => escaped = false,
        }
    }
    dn
}

/// Everything after the leading RDN.
pub fn parent_dn(dn: &str) -> &str {
    let rdn = leading_rdn(dn);
    dn[rdn.len()..].trim_start_matches(',')
}

/// Escape a value for use inside a DN (RFC 4514).
pub fn escape_dn_value(value: &str) -> String {
    let count = value.chars().count();
    let mut result = String::with_capacity(value.len() * 2);

    for (i, ch) in value.chars().enumerate() {
        let is_first = i == 0;
        let is_last = i + 1 == count;

        match ch {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                result.push('\\');
                result.push(ch);
            }
            '\0' => result.push_str("\\00"),
            ' ' if is_first || is_last => result.push_str("\\20"),
            '#' if is_first => result.push_str("\\23"),
            _ => result.push(ch),
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naming_attribute() {
        assert_eq!(naming_attribute("ou=people,dc=example,dc=com", false), "uid");
        assert_eq!(naming_attribute("ou=people,dc=example,dc=com", true), "description");
        assert_eq!(naming_attribute("uid=admin,dc=example,dc=com", false), "description");
        assert_eq!(naming_attribute("ou=book,UID=admin,dc=example", false), "description");
    }

    #[test]
    fn test_identity_slug_prefers_family_name() {
        let record = Record::contact()
            .with_text(FieldId::FamilyName, "O'Brien-Smith")
            .with_text(FieldId::FullName, "Pat O'Brien-Smith");
        assert_eq!(identity_slug(&record), "obriensmith");

        let record = Record::contact().with_text(FieldId::FullName, "Team Ä1");
        assert_eq!(identity_slug(&record), "team1");
    }

    #[test]
    fn test_compose_rdn_value() {
        let record = Record::contact().with_text(FieldId::FamilyName, "Doe");
        assert_eq!(compose_rdn_value(&record, 1_700_000_000), "doe.1700000000");
        assert_eq!(compose_rdn_value(&Record::contact(), 42), "42");
    }

    #[test]
    fn test_rdn_uses_attr() {
        let dn = "cn=Jane Doe+mail=jane@example.com,ou=people,dc=example";
        assert!(rdn_uses_attr(dn, "cn"));
        assert!(rdn_uses_attr(dn, "MAIL"));
        assert!(!rdn_uses_attr(dn, "ou"));
        assert!(!rdn_uses_attr(dn, "sn"));
        assert!(!rdn_uses_attr("uid=jdoe,dc=example", "id"));
        assert!(!rdn_uses_attr(r"cn=a\+mail=b,dc=example", "mail"));
    }

    #[test]
    fn test_same_rdn() {
        assert!(same_rdn("uid=jdoe", "UID=jdoe"));
        assert!(!same_rdn("uid=jdoe", "uid=jdoe.1700000000"));
    }

    #[test]
    fn test_leading_rdn_honours_escapes() {
        assert_eq!(leading_rdn(r"cn=Doe\, Jane,dc=example"), r"cn=Doe\, Jane");
        assert_eq!(leading_rdn("cn=x"), "cn=x");
        assert_eq!(parent_dn(r"cn=Doe\, Jane,dc=example"), "dc=example");
        assert_eq!(parent_dn("cn=x"), "");
    }

    #[test]
    fn test_escape_dn_value() {
        assert_eq!(escape_dn_value("doe.123"), "doe.123");
        assert_eq!(escape_dn_value("Doe, Jane"), r"Doe\, Jane");
        assert_eq!(escape_dn_value(" #x "), r"\20#x\20");
        assert_eq!(escape_dn_value("#x"), r"\23x");
        assert_eq!(escape_dn_value("é "), r"é\20");
    }
}
