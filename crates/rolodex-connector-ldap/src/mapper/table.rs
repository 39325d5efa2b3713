//! Static attribute table
//!
//! One row per directory attribute the mapper understands. Rows are looked
//! up by attribute name when decoding and walked in order when diffing.

use std::collections::HashMap;
use std::sync::LazyLock;

use rolodex_connector::record::FieldId;

use crate::schema::SchemaCapabilities;

/// Object class an attribute depends on beyond the standard person classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    EvolutionPerson,
    CalEntry,
}

/// Which record kinds a row applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applies {
    Contacts,
    Lists,
    Both,
}

/// Direction(s) a row is mapped in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadWrite,
    /// Decoded from the server, never written.
    ReadOnly,
    /// Written to the server, never decoded.
    WriteOnly,
}

/// Component of a structured postal address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressPart {
    PoBox,
    Street,
    Locality,
    Region,
    PostalCode,
    Country,
}

/// How an attribute's values relate to record fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    /// First value maps to one text field.
    Scalar(FieldId),
    /// Up to four values map to the email slots.
    Emails,
    /// Member identities of a contact list.
    Members,
    /// First two values map to a primary and a secondary phone field.
    PhonePair(FieldId, FieldId),
    /// `o`; a legacy `Org;Unit` value also carries the unit.
    Organization,
    /// Multi-line postal label, `$` separated on the wire.
    Label(FieldId),
    /// One part of a structured address.
    AddressPart(FieldId, AddressPart),
    /// Calendar date in `YYYY-MM-DD` form.
    Date(FieldId),
    Categories,
    /// Raw bytes in one binary field.
    Binary(FieldId),
}

/// One row of the attribute table.
#[derive(Debug, Clone, Copy)]
pub struct AttributeSpec {
    pub attr: &'static str,
    pub kind: AttrKind,
    pub applies: Applies,
    pub access: Access,
    pub requires: Option<Extension>,
}

impl AttributeSpec {
    const fn new(attr: &'static str, kind: AttrKind) -> Self {
        Self {
            attr,
            kind,
            applies: Applies::Both,
            access: Access::ReadWrite,
            requires: None,
        }
    }

    const fn contacts(mut self) -> Self {
        self.applies = Applies::Contacts;
        self
    }

    const fn lists(mut self) -> Self {
        self.applies = Applies::Lists;
        self
    }

    const fn read_only(mut self) -> Self {
        self.access = Access::ReadOnly;
        self
    }

    const fn evolve(mut self) -> Self {
        self.requires = Some(Extension::EvolutionPerson);
        self.applies = Applies::Contacts;
        self
    }

    const fn calendar(mut self) -> Self {
        self.requires = Some(Extension::CalEntry);
        self.applies = Applies::Contacts;
        self
    }

    /// Record fields this row reads or writes.
    pub fn fields(&self) -> Vec<FieldId> {
        match self.kind {
            AttrKind::Scalar(f)
            | AttrKind::Label(f)
            | AttrKind::AddressPart(f, _)
            | AttrKind::Date(f)
            | AttrKind::Binary(f) => vec![f],
            AttrKind::Emails => FieldId::EMAILS.to_vec(),
            AttrKind::Members => vec![FieldId::Members],
            AttrKind::PhonePair(a, b) => vec![a, b],
            AttrKind::Organization => vec![FieldId::Org],
            AttrKind::Categories => vec![FieldId::CategoryList],
        }
    }

    /// Whether the row holds plain text values searchable by substring.
    pub fn is_text(&self) -> bool {
        matches!(
            self.kind,
            AttrKind::Scalar(_) | AttrKind::Emails | AttrKind::PhonePair(..) | AttrKind::Organization
        )
    }

    /// Whether the server schema can hold this attribute.
    pub fn supported_by(&self, caps: &SchemaCapabilities) -> bool {
        match self.requires {
            None => true,
            Some(Extension::EvolutionPerson) => caps.evolution_person,
            Some(Extension::CalEntry) => caps.cal_entry,
        }
    }

    /// Whether the row applies to a record of the given kind.
    pub fn applies_to(&self, is_list: bool) -> bool {
        match self.applies {
            Applies::Both => true,
            Applies::Contacts => !is_list,
            Applies::Lists => is_list,
        }
    }

    /// Whether the row's values are written on create and modify.
    pub fn is_writable(&self) -> bool {
        self.access != Access::ReadOnly
    }

    /// Whether the row's values are read back from entries.
    pub fn is_readable(&self) -> bool {
        self.access != Access::WriteOnly
    }
}

use AddressPart as P;
use AttrKind as K;
use FieldId as F;

static TABLE: [AttributeSpec; 53] = [
    // Name and identity
    AttributeSpec::new("cn", K::Scalar(F::FullName)),
    AttributeSpec::new("givenName", K::Scalar(F::GivenName)).contacts(),
    AttributeSpec::new("sn", K::Scalar(F::FamilyName)).contacts(),
    AttributeSpec::new("displayName", K::Scalar(F::Nickname)).contacts(),
    AttributeSpec::new("fileAs", K::Scalar(F::FileAs)).evolve(),
    // Email and membership
    AttributeSpec::new("mail", K::Emails).contacts(),
    AttributeSpec::new("member", K::Members).lists(),
    // Phones
    AttributeSpec::new("primaryPhone", K::Scalar(F::PrimaryPhone)).evolve(),
    AttributeSpec::new("telephoneNumber", K::PhonePair(F::BusinessPhone, F::BusinessPhone2))
        .contacts(),
    AttributeSpec::new("homePhone", K::PhonePair(F::HomePhone, F::HomePhone2)).contacts(),
    AttributeSpec::new("mobile", K::Scalar(F::MobilePhone)).contacts(),
    AttributeSpec::new("carPhone", K::Scalar(F::CarPhone)).evolve(),
    AttributeSpec::new("facsimileTelephoneNumber", K::Scalar(F::BusinessFax)).contacts(),
    AttributeSpec::new("homeFacsimileTelephoneNumber", K::Scalar(F::HomeFax)).evolve(),
    AttributeSpec::new("otherPhone", K::Scalar(F::OtherPhone)).evolve(),
    AttributeSpec::new("otherFacsimileTelephoneNumber", K::Scalar(F::OtherFax)).evolve(),
    AttributeSpec::new("internationaliSDNNumber", K::Scalar(F::IsdnPhone)).contacts(),
    AttributeSpec::new("pager", K::Scalar(F::Pager)).contacts(),
    AttributeSpec::new("radio", K::Scalar(F::Radio)).evolve(),
    AttributeSpec::new("telex", K::Scalar(F::Telex)).evolve(),
    AttributeSpec::new("assistantPhone", K::Scalar(F::AssistantPhone)).evolve(),
    AttributeSpec::new("companyPhone", K::Scalar(F::CompanyPhone)).evolve(),
    AttributeSpec::new("callbackPhone", K::Scalar(F::CallbackPhone)).evolve(),
    AttributeSpec::new("tty", K::Scalar(F::Tty)).evolve(),
    // Organization
    AttributeSpec::new("o", K::Organization).contacts(),
    AttributeSpec::new("ou", K::Scalar(F::OrgUnit)).contacts(),
    AttributeSpec::new("roomNumber", K::Scalar(F::Office)).contacts(),
    AttributeSpec::new("title", K::Scalar(F::Title)).contacts(),
    AttributeSpec::new("businessRole", K::Scalar(F::Role)).evolve(),
    AttributeSpec::new("managerName", K::Scalar(F::Manager)).evolve(),
    AttributeSpec::new("assistantName", K::Scalar(F::Assistant)).evolve(),
    // Addresses
    AttributeSpec::new("postalAddress", K::Label(F::AddressLabelWork)).contacts(),
    AttributeSpec::new("street", K::AddressPart(F::AddressWork, P::Street))
        .contacts()
        .read_only(),
    AttributeSpec::new("l", K::AddressPart(F::AddressWork, P::Locality))
        .contacts()
        .read_only(),
    AttributeSpec::new("st", K::AddressPart(F::AddressWork, P::Region))
        .contacts()
        .read_only(),
    AttributeSpec::new("postOfficeBox", K::AddressPart(F::AddressWork, P::PoBox))
        .contacts()
        .read_only(),
    AttributeSpec::new("postalCode", K::AddressPart(F::AddressWork, P::PostalCode))
        .contacts()
        .read_only(),
    AttributeSpec::new("c", K::AddressPart(F::AddressWork, P::Country))
        .contacts()
        .read_only(),
    AttributeSpec::new("homePostalAddress", K::Label(F::AddressLabelHome)).contacts(),
    AttributeSpec::new(
        "mozillaHomeLocalityName",
        K::AddressPart(F::AddressHome, P::Locality),
    )
    .contacts()
    .read_only(),
    AttributeSpec::new("mozillaHomeState", K::AddressPart(F::AddressHome, P::Region))
        .contacts()
        .read_only(),
    AttributeSpec::new(
        "mozillaHomePostalCode",
        K::AddressPart(F::AddressHome, P::PostalCode),
    )
    .contacts()
    .read_only(),
    AttributeSpec::new(
        "mozillaHomeCountryName",
        K::AddressPart(F::AddressHome, P::Country),
    )
    .contacts()
    .read_only(),
    AttributeSpec::new("otherPostalAddress", K::Label(F::AddressLabelOther)).evolve(),
    // Binary
    AttributeSpec::new("jpegPhoto", K::Binary(F::Photo)).contacts(),
    AttributeSpec::new("userCertificate", K::Binary(F::X509Cert))
        .contacts()
        .read_only(),
    // Misc
    AttributeSpec::new("labeledURI", K::Scalar(F::HomepageUrl)).contacts(),
    AttributeSpec::new("spouseName", K::Scalar(F::Spouse)).evolve(),
    AttributeSpec::new("note", K::Scalar(F::Note)).evolve(),
    AttributeSpec::new("anniversary", K::Date(F::Anniversary)).evolve(),
    AttributeSpec::new("birthDate", K::Date(F::BirthDate)).evolve(),
    AttributeSpec::new("mailer", K::Scalar(F::Mailer)).evolve(),
    AttributeSpec::new("category", K::Categories).evolve(),
];

// Calendar attributes come from calEntry and only apply to people.
static CALENDAR_ROWS: [AttributeSpec; 3] = [
    AttributeSpec::new("calCalURI", K::Scalar(F::CalendarUri)).calendar(),
    AttributeSpec::new("calFBURL", K::Scalar(F::FreebusyUrl)).calendar(),
    AttributeSpec::new("icsCalendar", K::Scalar(F::IcsCalendar)).calendar(),
];

/// Every row, in diff order.
pub fn rows() -> impl Iterator<Item = &'static AttributeSpec> {
    TABLE.iter().chain(CALENDAR_ROWS.iter())
}

static BY_ATTR: LazyLock<HashMap<String, &'static AttributeSpec>> = LazyLock::new(|| {
    rows()
        .map(|spec| (spec.attr.to_ascii_lowercase(), spec))
        .collect()
});

static BY_FIELD: LazyLock<HashMap<FieldId, &'static AttributeSpec>> = LazyLock::new(|| {
    let mut map = HashMap::new();
    for spec in rows() {
        for field in spec.fields() {
            // The first row wins: the label row, not the address parts.
            map.entry(field).or_insert(spec);
        }
    }
    map
});

/// Row for a wire attribute name (case-insensitive, options ignored).
pub fn lookup_attr(name: &str) -> Option<&'static AttributeSpec> {
    let base = crate::client::base_attribute_name(name);
    BY_ATTR.get(&base.to_ascii_lowercase()).copied()
}

/// Row that stores a record field.
pub fn lookup_field(field: FieldId) -> Option<&'static AttributeSpec> {
    BY_FIELD.get(&field).copied()
}
