//! Entity attribute mapper
//!
//! Translates between [`Record`]s and directory entries using the static
//! attribute table, and computes the minimal change set between two
//! versions of a record.
//!
//! Every encode is pure: the same record always yields the same wire values,
//! and comparing two records compares exactly what would be sent.

pub mod dn;
pub mod table;

use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::debug;

use rolodex_connector::error::{ConnectorError, ConnectorResult};
use rolodex_connector::record::{FieldId, FieldValue, GroupMember, PostalAddress, Record};

use crate::client::{ChangeOp, Modification, WireAttribute, WireEntry};
use crate::schema::SchemaCapabilities;

pub use table::{lookup_attr, lookup_field, rows, AddressPart, AttrKind, AttributeSpec};

/// Object class marking an entry as a contact list.
pub const GROUP_CLASS: &str = "groupOfNames";

/// Attribute holding the short user id of person entries.
pub const UID_ATTR: &str = "uid";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Resolved display names and emails of list members, keyed by lowercased DN.
pub type MemberInfo = HashMap<String, GroupMember>;

/// Result of decoding one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub record: Record,
    /// Object classes present on the entry, as sent by the server.
    pub object_classes: Vec<String>,
    /// Value of the entry's `uid` attribute.
    pub ldap_uid: Option<String>,
}

/// Changes needed to turn one record into another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    pub changes: Vec<Modification>,
    /// A changed attribute names part of the current DN.
    pub identity_change_needed: bool,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && !self.identity_change_needed
    }
}

/// A fully built add request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub dn: String,
    pub attrs: Vec<WireAttribute>,
}

/// Whether an entry's object classes mark it as a contact list.
pub fn is_group_entry(entry: &WireEntry) -> bool {
    entry
        .texts("objectClass")
        .iter()
        .any(|oc| oc.eq_ignore_ascii_case(GROUP_CLASS))
}

/// Member DNs of a list entry.
pub fn member_dns(entry: &WireEntry) -> Vec<String> {
    entry.texts("member")
}

/// Decode a directory entry into a record.
///
/// `members` supplies names and emails for list members that were looked
/// up beforehand; members missing from it keep only their DN.
pub fn decode(entry: &WireEntry, members: &MemberInfo) -> Decoded {
    let object_classes = entry.texts("objectClass");
    let is_list = object_classes
        .iter()
        .any(|oc| oc.eq_ignore_ascii_case(GROUP_CLASS));

    let mut record = if is_list {
        Record::list()
    } else {
        Record::contact()
    };
    record.uid = Some(entry.dn.clone());

    let mut legacy_unit = None;
    for attr in &entry.attrs {
        let Some(spec) = lookup_attr(&attr.name) else {
            continue;
        };
        if !spec.is_readable() || !spec.applies_to(is_list) || attr.values.is_empty() {
            continue;
        }
        decode_attribute(spec, &attr.values, &mut record, members, &mut legacy_unit);
    }

    // ou wins over the unit half of a legacy "Org;Unit" value.
    if let Some(unit) = legacy_unit {
        if record.get(FieldId::OrgUnit).is_none() {
            record.set_text(FieldId::OrgUnit, unit);
        }
    }

    Decoded {
        record,
        object_classes,
        ldap_uid: entry.first_text(UID_ATTR),
    }
}

fn text(value: &[u8]) -> String {
    String::from_utf8_lossy(value).into_owned()
}

fn decode_attribute(
    spec: &AttributeSpec,
    values: &[Vec<u8>],
    record: &mut Record,
    members: &MemberInfo,
    legacy_unit: &mut Option<String>,
) {
    let first = text(&values[0]);
    match spec.kind {
        AttrKind::Scalar(field) => record.set_text(field, first),
        AttrKind::Emails => {
            for (slot, value) in FieldId::EMAILS.iter().zip(values) {
                record.set_text(*slot, text(value));
            }
        }
        AttrKind::Members => {
            let list = values
                .iter()
                .map(|value| {
                    let dn = text(value);
                    match members.get(&dn.to_ascii_lowercase()) {
                        Some(info) => GroupMember {
                            dn: Some(dn),
                            ..info.clone()
                        },
                        None => GroupMember::with_dn(dn),
                    }
                })
                .collect();
            record.set(FieldId::Members, FieldValue::Members(list));
        }
        AttrKind::PhonePair(primary, secondary) => {
            record.set_text(primary, first);
            if let Some(value) = values.get(1) {
                record.set_text(secondary, text(value));
            }
        }
        AttrKind::Organization => match first.split_once(';') {
            Some((org, unit)) => {
                record.set_text(FieldId::Org, org);
                *legacy_unit = Some(unit.to_string());
            }
            None => record.set_text(FieldId::Org, first),
        },
        AttrKind::Label(field) => record.set_text(field, first.replace('$', "\n")),
        AttrKind::AddressPart(field, part) => {
            let mut address = record.address(field).cloned().unwrap_or_default();
            *address_part_mut(&mut address, part) = Some(first);
            record.set(field, FieldValue::Address(address));
        }
        AttrKind::Date(field) => match NaiveDate::parse_from_str(&first, DATE_FORMAT) {
            Ok(date) => record.set(field, FieldValue::Date(date)),
            Err(e) => debug!(attr = spec.attr, value = %first, error = %e, "Ignoring malformed date"),
        },
        AttrKind::Categories => {
            record.set(
                FieldId::CategoryList,
                FieldValue::TextList(values.iter().map(|v| text(v)).collect()),
            );
        }
        AttrKind::Binary(field) => record.set(field, FieldValue::Bytes(values[0].clone())),
    }
}

fn address_part_mut(address: &mut PostalAddress, part: AddressPart) -> &mut Option<String> {
    match part {
        AddressPart::PoBox => &mut address.po_box,
        AddressPart::Street => &mut address.street,
        AddressPart::Locality => &mut address.locality,
        AddressPart::Region => &mut address.region,
        AddressPart::PostalCode => &mut address.postal_code,
        AddressPart::Country => &mut address.country,
    }
}

fn address_part(address: &PostalAddress, part: AddressPart) -> Option<&String> {
    match part {
        AddressPart::PoBox => address.po_box.as_ref(),
        AddressPart::Street => address.street.as_ref(),
        AddressPart::Locality => address.locality.as_ref(),
        AddressPart::Region => address.region.as_ref(),
        AddressPart::PostalCode => address.postal_code.as_ref(),
        AddressPart::Country => address.country.as_ref(),
    }
}

/// Wire values `record` holds for one row. Empty means the attribute is absent.
pub fn encode_values(spec: &AttributeSpec, record: &Record) -> Vec<Vec<u8>> {
    let bytes = |s: &str| s.as_bytes().to_vec();
    match spec.kind {
        AttrKind::Scalar(field) => record.text(field).map(bytes).into_iter().collect(),
        AttrKind::Emails => record.emails().into_iter().map(bytes).collect(),
        AttrKind::Members => record
            .members()
            .iter()
            .filter_map(|m| m.dn.as_deref())
            .map(bytes)
            .collect(),
        AttrKind::PhonePair(primary, secondary) => [primary, secondary]
            .iter()
            .filter_map(|field| record.text(*field))
            .map(bytes)
            .collect(),
        AttrKind::Organization => record.text(FieldId::Org).map(bytes).into_iter().collect(),
        AttrKind::Label(field) => record
            .text(field)
            .map(|label| label.replace("\r\n", "\n").replace('\n', "$").into_bytes())
            .into_iter()
            .collect(),
        AttrKind::AddressPart(field, part) => record
            .address(field)
            .and_then(|address| address_part(address, part))
            .map(|s| bytes(s))
            .into_iter()
            .collect(),
        AttrKind::Date(field) => record
            .date(field)
            .map(|d| d.format(DATE_FORMAT).to_string().into_bytes())
            .into_iter()
            .collect(),
        AttrKind::Categories => record
            .text_list(FieldId::CategoryList)
            .unwrap_or(&[])
            .iter()
            .filter(|c| !c.is_empty())
            .map(|c| bytes(c))
            .collect(),
        AttrKind::Binary(field) => record.bytes(field).map(<[u8]>::to_vec).into_iter().collect(),
    }
}

fn values_equal(spec: &AttributeSpec, a: &[Vec<u8>], b: &[Vec<u8>]) -> bool {
    match spec.kind {
        // Member DNs compare as case-insensitive sets.
        AttrKind::Members => {
            let normalize = |values: &[Vec<u8>]| {
                let mut dns: Vec<String> = values.iter().map(|v| text(v).to_lowercase()).collect();
                dns.sort();
                dns.dedup();
                dns
            };
            normalize(a) == normalize(b)
        }
        _ => a == b,
    }
}

/// Rows written for a record of the given kind on this server.
pub fn writable_rows(
    is_list: bool,
    caps: &SchemaCapabilities,
) -> impl Iterator<Item = &'static AttributeSpec> + '_ {
    rows().filter(move |spec| {
        spec.is_writable() && spec.applies_to(is_list) && spec.supported_by(caps)
    })
}

/// Reject records the server cannot store.
pub fn check_structure(record: &Record) -> ConnectorResult<()> {
    if record.is_list && !record.members().iter().any(|m| m.dn.is_some()) {
        return Err(ConnectorError::structural(
            "a contact list needs at least one member with a directory entry",
        ));
    }
    Ok(())
}

/// Compute the changes turning `current` into `desired`.
///
/// `current.uid` is the entry's DN; a change to an attribute of its leading
/// RDN flags a rename.
pub fn diff(
    current: &Record,
    desired: &Record,
    caps: &SchemaCapabilities,
) -> ConnectorResult<Diff> {
    check_structure(desired)?;

    let current_dn = current.uid.as_deref().unwrap_or("");
    let mut result = Diff::default();

    for spec in writable_rows(desired.is_list, caps) {
        let old_values = encode_values(spec, current);
        let new_values = encode_values(spec, desired);
        if values_equal(spec, &old_values, &new_values) {
            continue;
        }

        let op = if new_values.is_empty() {
            ChangeOp::Delete
        } else if old_values.is_empty() {
            ChangeOp::Add
        } else {
            ChangeOp::Replace
        };

        if !old_values.is_empty() && dn::rdn_uses_attr(current_dn, spec.attr) {
            result.identity_change_needed = true;
        }

        result
            .changes
            .push(Modification::new(op, spec.attr, new_values));
    }

    Ok(result)
}

/// Object classes a new entry of the given kind carries.
pub fn object_classes(is_list: bool, caps: &SchemaCapabilities) -> Vec<&'static str> {
    if is_list {
        return vec!["top", GROUP_CLASS];
    }
    let mut classes = vec!["top", "person", "organizationalPerson", "inetOrgPerson"];
    if caps.cal_entry {
        classes.push("calEntry");
    }
    if caps.evolution_person {
        classes.push("evolutionPerson");
    }
    classes
}

/// Object classes a record of the given kind needs but `existing` lacks.
pub fn missing_object_classes(
    existing: &[String],
    is_list: bool,
    caps: &SchemaCapabilities,
) -> Vec<&'static str> {
    object_classes(is_list, caps)
        .into_iter()
        .filter(|class| *class != "top")
        .filter(|class| !existing.iter().any(|e| e.eq_ignore_ascii_case(class)))
        .collect()
}

/// Build the add request for a new record.
pub fn new_entry(
    record: &Record,
    base_dn: &str,
    caps: &SchemaCapabilities,
    timestamp: i64,
) -> ConnectorResult<NewEntry> {
    check_structure(record)?;

    let naming = dn::naming_attribute(base_dn, record.is_list);
    let value = dn::compose_rdn_value(record, timestamp);
    let rdn = format!("{naming}={}", dn::escape_dn_value(&value));

    let mut attrs = vec![WireAttribute::text(
        "objectClass",
        &object_classes(record.is_list, caps),
    )];
    if !record.is_list {
        attrs.push(WireAttribute::text(UID_ATTR, &[&value]));
    }
    if naming != UID_ATTR {
        attrs.push(WireAttribute::text(naming, &[&value]));
    }

    for spec in writable_rows(record.is_list, caps) {
        let values = encode_values(spec, record);
        if !values.is_empty() {
            attrs.push(WireAttribute::new(spec.attr, values));
        }
    }

    Ok(NewEntry {
        dn: dn::full_dn(&rdn, base_dn),
        attrs,
    })
}

/// RDN an entry is renamed to when a naming attribute changes.
pub fn rename_rdn(
    record: &Record,
    ldap_uid: Option<&str>,
    base_dn: &str,
    timestamp: i64,
) -> String {
    let naming = dn::naming_attribute(base_dn, record.is_list);
    let value = match ldap_uid {
        Some(uid) if !uid.is_empty() => uid.to_string(),
        _ => dn::compose_rdn_value(record, timestamp),
    };
    format!("{naming}={}", dn::escape_dn_value(&value))
}
