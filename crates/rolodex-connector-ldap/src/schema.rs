//! Server capability and schema probing
//!
//! After every (re)connect the root DSE and the subschema entry are read to
//! learn which authentication mechanisms the server offers and which of the
//! optional object classes it knows.

use std::collections::BTreeSet;

use crate::client::WireEntry;
use crate::config::{AUTH_SIMPLE_BINDDN, AUTH_SIMPLE_EMAIL};
use crate::mapper;

/// Optional object classes the server schema defines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchemaCapabilities {
    /// `evolutionPerson` (extended person attributes).
    pub evolution_person: bool,
    /// `calEntry` (calendar URLs).
    pub cal_entry: bool,
}

/// Attributes requested from the root DSE.
pub const ROOT_DSE_ATTRS: [&str; 4] = [
    "supportedControl",
    "supportedExtension",
    "supportedSASLMechanisms",
    "subschemaSubentry",
];

/// Fallback location of the subschema entry.
pub const DEFAULT_SUBSCHEMA_DN: &str = "cn=Subschema";

/// What the root DSE told us about the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootDse {
    pub supported_controls: Vec<String>,
    pub supported_extensions: Vec<String>,
    pub sasl_mechanisms: Vec<String>,
    pub subschema_subentry: Option<String>,
}

impl RootDse {
    pub fn from_entry(entry: &WireEntry) -> Self {
        Self {
            supported_controls: entry.texts("supportedControl"),
            supported_extensions: entry.texts("supportedExtension"),
            sasl_mechanisms: entry.texts("supportedSASLMechanisms"),
            subschema_subentry: entry.first_text("subschemaSubentry"),
        }
    }

    /// Authentication methods hosts may choose from.
    pub fn auth_methods(&self) -> Vec<String> {
        let mut methods = vec![AUTH_SIMPLE_BINDDN.to_string(), AUTH_SIMPLE_EMAIL.to_string()];
        methods.extend(self.sasl_mechanisms.iter().map(|m| format!("sasl/{m}")));
        methods
    }

    /// DN of the subschema entry to read.
    pub fn subschema_dn(&self) -> &str {
        self.subschema_subentry
            .as_deref()
            .unwrap_or(DEFAULT_SUBSCHEMA_DN)
    }
}

/// One parsed `objectClasses` definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectClassDef {
    pub name: String,
    pub must: Vec<String>,
    pub may: Vec<String>,
}

/// Parse an RFC 4512 object class description.
pub fn parse_object_class(definition: &str) -> Option<ObjectClassDef> {
    let name = extract_name(definition)?;
    Some(ObjectClassDef {
        name,
        must: extract_attribute_list(definition, "MUST"),
        may: extract_attribute_list(definition, "MAY"),
    })
}

/// Extract the first NAME from a schema definition.
fn extract_name(definition: &str) -> Option<String> {
    // NAME 'xxx' or NAME ( 'xxx' 'yyy' )
    let name_idx = definition.find("NAME")?;
    let after_name = &definition[name_idx + 4..];

    let quote_start = after_name.find('\'')?;
    let rest = &after_name[quote_start + 1..];
    let quote_end = rest.find('\'')?;
    Some(rest[..quote_end].to_string())
}

/// Extract the attribute list of a MUST or MAY clause.
fn extract_attribute_list(definition: &str, keyword: &str) -> Vec<String> {
    let Some(idx) = find_keyword(definition, keyword) else {
        return Vec::new();
    };
    let after = definition[idx + keyword.len()..].trim_start();

    if let Some(list) = after.strip_prefix('(') {
        // ( attr1 $ attr2 $ attr3 )
        let end = list.find(')').unwrap_or(list.len());
        list[..end]
            .split('$')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect()
    } else {
        after
            .split_whitespace()
            .next()
            .filter(|a| !a.is_empty() && *a != ")")
            .map(|a| vec![a.to_string()])
            .unwrap_or_default()
    }
}

// Keyword as a whole word, so "MAY" does not match inside a description.
fn find_keyword(definition: &str, keyword: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(pos) = definition[from..].find(keyword) {
        let idx = from + pos;
        let before_ok = idx == 0 || definition.as_bytes()[idx - 1].is_ascii_whitespace();
        let end = idx + keyword.len();
        let after_ok = end == definition.len() || definition.as_bytes()[end].is_ascii_whitespace();
        if before_ok && after_ok {
            return Some(idx);
        }
        from = end;
    }
    None
}

/// Object classes whose attributes records can use.
const PERSON_CLASSES: [&str; 6] = [
    "person",
    "organizationalPerson",
    "inetOrgPerson",
    "evolutionPerson",
    "calEntry",
    "groupOfNames",
];

/// Schema facts derived from the subschema entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaInfo {
    pub capabilities: SchemaCapabilities,
    /// Lowercased names of attributes the person classes allow.
    pub attributes: BTreeSet<String>,
}

impl SchemaInfo {
    /// Parse the `objectClasses` values of a subschema entry.
    pub fn from_subschema(entry: &WireEntry) -> Self {
        let mut info = Self::default();
        for definition in entry.texts("objectClasses") {
            let Some(class) = parse_object_class(&definition) else {
                continue;
            };
            if class.name.eq_ignore_ascii_case("evolutionPerson") {
                info.capabilities.evolution_person = true;
            } else if class.name.eq_ignore_ascii_case("calEntry") {
                info.capabilities.cal_entry = true;
            }
            if PERSON_CLASSES
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&class.name))
            {
                info.attributes.extend(
                    class
                        .must
                        .iter()
                        .chain(class.may.iter())
                        .map(|a| a.to_ascii_lowercase()),
                );
            }
        }
        info
    }

    /// Record fields the server can store, by stable name.
    ///
    /// Without a readable schema every row that needs no optional object
    /// class is assumed to be supported.
    pub fn supported_fields(&self) -> Vec<String> {
        let mut fields = BTreeSet::new();
        for spec in mapper::rows() {
            let known = if self.attributes.is_empty() {
                spec.requires.is_none()
            } else {
                self.attributes.contains(&spec.attr.to_ascii_lowercase())
            };
            if known && spec.supported_by(&self.capabilities) {
                fields.extend(spec.fields().into_iter().map(|f| f.as_str().to_string()));
            }
        }
        fields.into_iter().collect()
    }
}
