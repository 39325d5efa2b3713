//! Record model
//!
//! Typed representation of a person or contact list, independent of how any
//! directory names its attributes.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

macro_rules! field_ids {
    ($($(#[$doc:meta])* $variant:ident => $name:literal,)+) => {
        /// Identifier of a record field.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum FieldId {
            $($(#[$doc])* $variant,)+
        }

        impl FieldId {
            /// Every field, in declaration order.
            #[must_use]
            pub fn all() -> &'static [FieldId] {
                &[$(FieldId::$variant,)+]
            }

            /// Get the stable snake_case name used in queries and serialized records.
            #[must_use]
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(FieldId::$variant => $name,)+
                }
            }
        }

        impl FromStr for FieldId {
            type Err = ParseFieldIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(FieldId::$variant),)+
                    _ => Err(ParseFieldIdError(s.to_string())),
                }
            }
        }
    };
}

field_ids! {
    FullName => "full_name",
    GivenName => "given_name",
    FamilyName => "family_name",
    Nickname => "nickname",
    FileAs => "file_as",
    Email1 => "email_1",
    Email2 => "email_2",
    Email3 => "email_3",
    Email4 => "email_4",
    /// Members of a contact list.
    Members => "members",
    PrimaryPhone => "primary_phone",
    BusinessPhone => "business_phone",
    BusinessPhone2 => "business_phone_2",
    HomePhone => "home_phone",
    HomePhone2 => "home_phone_2",
    MobilePhone => "mobile_phone",
    CarPhone => "car_phone",
    BusinessFax => "business_fax",
    HomeFax => "home_fax",
    OtherPhone => "other_phone",
    OtherFax => "other_fax",
    IsdnPhone => "isdn_phone",
    Pager => "pager",
    Radio => "radio",
    Telex => "telex",
    AssistantPhone => "assistant_phone",
    CompanyPhone => "company_phone",
    CallbackPhone => "callback_phone",
    Tty => "tty",
    Org => "org",
    OrgUnit => "org_unit",
    Office => "office",
    Title => "title",
    Role => "role",
    Manager => "manager",
    Assistant => "assistant",
    AddressLabelWork => "address_label_work",
    AddressLabelHome => "address_label_home",
    AddressLabelOther => "address_label_other",
    /// Structured work address.
    AddressWork => "address_work",
    /// Structured home address.
    AddressHome => "address_home",
    Photo => "photo",
    X509Cert => "x509_cert",
    HomepageUrl => "homepage_url",
    Spouse => "spouse",
    Note => "note",
    Anniversary => "anniversary",
    BirthDate => "birth_date",
    Mailer => "mailer",
    CategoryList => "category_list",
    CalendarUri => "calendar_uri",
    FreebusyUrl => "freebusy_url",
    IcsCalendar => "ics_calendar",
}

impl FieldId {
    /// The four email slots, in order.
    pub const EMAILS: [FieldId; 4] = [
        FieldId::Email1,
        FieldId::Email2,
        FieldId::Email3,
        FieldId::Email4,
    ];
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for FieldId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FieldId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// Error parsing a field name.
#[derive(Debug, Clone)]
pub struct ParseFieldIdError(String);

impl fmt::Display for ParseFieldIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown record field '{}'", self.0)
    }
}

impl std::error::Error for ParseFieldIdError {}

/// Structured postal address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostalAddress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub po_box: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl PostalAddress {
    /// True when no part is set.
    pub fn is_empty(&self) -> bool {
        self.po_box.is_none()
            && self.street.is_none()
            && self.locality.is_none()
            && self.region.is_none()
            && self.postal_code.is_none()
            && self.country.is_none()
    }
}

/// One member of a contact list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    /// Directory identity of the member entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl GroupMember {
    /// Create a member referring to a directory entry.
    pub fn with_dn(dn: impl Into<String>) -> Self {
        Self {
            dn: Some(dn.into()),
            ..Self::default()
        }
    }
}

/// Value of a record field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    TextList(Vec<String>),
    Date(NaiveDate),
    Address(PostalAddress),
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    Members(Vec<GroupMember>),
}

impl FieldValue {
    /// Get the text value if this is a text field.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Text forms of the value used for matching; empty for non-text values.
    pub fn match_strings(&self) -> Vec<String> {
        match self {
            FieldValue::Text(s) => vec![s.clone()],
            FieldValue::TextList(list) => list.clone(),
            FieldValue::Date(d) => vec![d.format("%Y-%m-%d").to_string()],
            FieldValue::Address(_) | FieldValue::Bytes(_) | FieldValue::Members(_) => vec![],
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// A person or contact list.
///
/// Text fields are never stored empty: setting an empty string removes the
/// field, so presence always means "present and non-empty".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Directory identity, assigned by the server side on create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Whether this record is a contact list.
    #[serde(default)]
    pub is_list: bool,

    #[serde(default)]
    fields: BTreeMap<FieldId, FieldValue>,
}

impl Record {
    /// Create an empty contact.
    pub fn contact() -> Self {
        Self::default()
    }

    /// Create an empty contact list.
    pub fn list() -> Self {
        Self {
            is_list: true,
            ..Self::default()
        }
    }

    /// Set the identity.
    #[must_use]
    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    /// Set a text field.
    #[must_use]
    pub fn with_text(mut self, field: FieldId, value: impl Into<String>) -> Self {
        self.set_text(field, value);
        self
    }

    /// Set any field.
    #[must_use]
    pub fn with(mut self, field: FieldId, value: FieldValue) -> Self {
        self.set(field, value);
        self
    }

    /// Set any field. Empty text, lists and addresses remove the field instead.
    pub fn set(&mut self, field: FieldId, value: FieldValue) {
        let empty = match &value {
            FieldValue::Text(s) => s.is_empty(),
            FieldValue::TextList(list) => list.is_empty(),
            FieldValue::Address(addr) => addr.is_empty(),
            FieldValue::Bytes(bytes) => bytes.is_empty(),
            FieldValue::Members(members) => members.is_empty(),
            FieldValue::Date(_) => false,
        };
        if empty {
            self.fields.remove(&field);
        } else {
            self.fields.insert(field, value);
        }
    }

    /// Set a text field.
    pub fn set_text(&mut self, field: FieldId, value: impl Into<String>) {
        self.set(field, FieldValue::Text(value.into()));
    }

    /// Remove a field, returning its old value.
    pub fn remove(&mut self, field: FieldId) -> Option<FieldValue> {
        self.fields.remove(&field)
    }

    /// Get a field.
    pub fn get(&self, field: FieldId) -> Option<&FieldValue> {
        self.fields.get(&field)
    }

    /// Get a text field.
    pub fn text(&self, field: FieldId) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_text)
    }

    /// Get a text list field.
    pub fn text_list(&self, field: FieldId) -> Option<&[String]> {
        match self.get(field) {
            Some(FieldValue::TextList(list)) => Some(list),
            _ => None,
        }
    }

    /// Get a date field.
    pub fn date(&self, field: FieldId) -> Option<NaiveDate> {
        match self.get(field) {
            Some(FieldValue::Date(d)) => Some(*d),
            _ => None,
        }
    }

    /// Get a structured address field.
    pub fn address(&self, field: FieldId) -> Option<&PostalAddress> {
        match self.get(field) {
            Some(FieldValue::Address(addr)) => Some(addr),
            _ => None,
        }
    }

    /// Get a binary field.
    pub fn bytes(&self, field: FieldId) -> Option<&[u8]> {
        match self.get(field) {
            Some(FieldValue::Bytes(b)) => Some(b),
            _ => None,
        }
    }

    /// Get the list members.
    pub fn members(&self) -> &[GroupMember] {
        match self.get(FieldId::Members) {
            Some(FieldValue::Members(members)) => members,
            _ => &[],
        }
    }

    /// Email addresses in slot order.
    pub fn emails(&self) -> Vec<&str> {
        FieldId::EMAILS
            .iter()
            .filter_map(|field| self.text(*field))
            .collect()
    }

    /// Iterate over the set fields.
    pub fn iter(&self) -> impl Iterator<Item = (FieldId, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (*k, v))
    }

    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Name to show for this record.
    pub fn display_name(&self) -> Option<&str> {
        self.text(FieldId::FileAs)
            .or_else(|| self.text(FieldId::FullName))
            .or_else(|| self.text(FieldId::Nickname))
    }
}
