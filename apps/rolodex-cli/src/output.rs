//! Human-readable output helpers

use rolodex_connector::record::{FieldValue, Record};

/// Print a key-value pair with consistent formatting
pub fn print_key_value(key: &str, value: &str) {
    println!("  {:<18} {}", format!("{key}:"), value);
}

/// One-line summary of a record: display name and identity.
pub fn record_line(record: &Record) -> String {
    let name = record.display_name().unwrap_or("(no name)");
    let kind = if record.is_list { " [list]" } else { "" };
    match &record.uid {
        Some(uid) => format!("{name}{kind}  <{uid}>"),
        None => format!("{name}{kind}"),
    }
}

/// Print every field of a record.
pub fn print_record(record: &Record) {
    println!();
    if let Some(uid) = &record.uid {
        print_key_value("uid", uid);
    }
    for (field, value) in record.iter() {
        print_key_value(field.as_str(), &format_value(value));
    }
    println!();
}

fn format_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Text(text) => text.replace('\n', " / "),
        FieldValue::TextList(items) => items.join(", "),
        FieldValue::Date(date) => date.to_string(),
        FieldValue::Address(address) => [
            &address.po_box,
            &address.street,
            &address.locality,
            &address.region,
            &address.postal_code,
            &address.country,
        ]
        .into_iter()
        .flatten()
        .cloned()
        .collect::<Vec<_>>()
        .join(", "),
        FieldValue::Bytes(bytes) => format!("({} bytes)", bytes.len()),
        FieldValue::Members(members) => members
            .iter()
            .map(|m| {
                m.name
                    .clone()
                    .or_else(|| m.email.clone())
                    .or_else(|| m.dn.clone())
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>()
            .join(", "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rolodex_connector::record::{FieldId, GroupMember};

    #[test]
    fn test_record_line() {
        let record = Record::contact()
            .with_uid("uid=jdoe,dc=example")
            .with_text(FieldId::FullName, "Jane Doe");
        assert_eq!(record_line(&record), "Jane Doe  <uid=jdoe,dc=example>");
        assert_eq!(record_line(&Record::list()), "(no name) [list]");
    }

    #[test]
    fn test_format_members_prefers_names() {
        let value = FieldValue::Members(vec![
            GroupMember {
                dn: Some("uid=a".to_string()),
                name: Some("Ann".to_string()),
                email: None,
            },
            GroupMember::with_dn("uid=b"),
        ]);
        assert_eq!(format_value(&value), "Ann, uid=b");
    }
}
