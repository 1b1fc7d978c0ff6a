// SPDX-License-Identifier: MIT OR Apache-2.0
//! User-attribute adapter.
//!
//! Targeting rules read attributes from a caller-supplied user value.
//! Two capabilities are supported: a dynamic name-to-value lookup
//! ([`UserAttributes`]) and a structured record ([`UserRecord`]) that
//! declares its attribute-bearing fields in a static table. The table
//! is compiled and validated once per concrete type into type-erased
//! accessors; evaluator sets are cached against the same `TypeId`, so
//! the introspection cost is paid at most once per process lifetime
//! per type.

use fdk_error::{ErrorKind, FlagError};
use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

/// Attribute name used for percentage bucketing.
pub(crate) const IDENTIFIER_ATTR: &str = "Identifier";

// ---------------------------------------------------------------------------
// AttrValue
// ---------------------------------------------------------------------------

/// One user attribute value.
///
/// Numeric variants preserve their kind so numeric comparators can use
/// exact integer comparisons instead of always routing through floats.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// Textual attribute.
    Str(String),
    /// Signed integer attribute.
    Int(i64),
    /// Unsigned integer attribute.
    UInt(u64),
    /// Floating-point attribute.
    Float(f64),
    /// Raw byte-sequence attribute (feeds hashed comparators directly).
    Bytes(Vec<u8>),
}

impl AttrValue {
    /// String rendering of the attribute.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        match self {
            Self::Str(s) => Cow::Borrowed(s.as_str()),
            Self::Int(n) => Cow::Owned(n.to_string()),
            Self::UInt(n) => Cow::Owned(n.to_string()),
            Self::Float(f) => Cow::Owned(f.to_string()),
            Self::Bytes(b) => String::from_utf8_lossy(b),
        }
    }

    /// Byte-sequence rendering of the attribute.
    #[must_use]
    pub fn bytes(&self) -> Cow<'_, [u8]> {
        match self {
            Self::Str(s) => Cow::Borrowed(s.as_bytes()),
            Self::Bytes(b) => Cow::Borrowed(b.as_slice()),
            other => Cow::Owned(other.text().into_owned().into_bytes()),
        }
    }

    /// Semver parse of the attribute.
    ///
    /// Only textual attributes can carry a semver; any other kind
    /// yields `None` and therefore never matches a semver comparison.
    #[must_use]
    pub fn parse_semver(&self) -> Option<Result<semver::Version, semver::Error>> {
        match self {
            Self::Str(s) => Some(semver::Version::parse(s.trim())),
            _ => None,
        }
    }

    /// Whether the textual rendering is empty.
    #[must_use]
    pub fn is_empty_text(&self) -> bool {
        matches!(self, Self::Str(s) if s.is_empty()) || matches!(self, Self::Bytes(b) if b.is_empty())
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for AttrValue {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<Vec<u8>> for AttrValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Dynamic attribute-lookup capability.
///
/// Every attribute the evaluator needs goes through [`attribute`]
/// (including `Identifier` for percentage bucketing).
///
/// [`attribute`]: UserAttributes::attribute
pub trait UserAttributes: Send + Sync + 'static {
    /// Return the named attribute, or `None` when absent.
    fn attribute(&self, name: &str) -> Option<AttrValue>;
}

/// Accessor for one attribute-bearing field of a record.
pub enum FieldSource<T: 'static> {
    /// A single named attribute.
    Value(fn(&T) -> Option<AttrValue>),
    /// A custom-attributes bag. At most one per record.
    Bag(fn(&T) -> &HashMap<String, String>),
}

/// One entry of a record's static field table.
pub struct UserField<T: 'static> {
    /// Attribute name. `-` excludes the field from discovery.
    pub name: &'static str,
    /// How the attribute is read off the record.
    pub source: FieldSource<T>,
}

/// Structured-record capability.
///
/// The field table plays the role the source system fills by runtime
/// struct introspection: it is walked once per concrete type, validated
/// (duplicate attribute names and more than one bag are rejected with
/// an ambiguous-user-type error), and compiled into erased accessors.
pub trait UserRecord: Sized + Send + Sync + 'static {
    /// Attribute-bearing fields of this record.
    const FIELDS: &'static [UserField<Self>];
}

// ---------------------------------------------------------------------------
// Canonical user record
// ---------------------------------------------------------------------------

/// The stock user record: identifier plus the common targeting fields
/// and a free-form custom attribute bag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct User {
    /// Unique identifier of the user (drives percentage bucketing).
    pub identifier: String,
    /// Email address.
    pub email: String,
    /// Country.
    pub country: String,
    /// Additional custom attributes.
    pub custom: HashMap<String, String>,
}

impl User {
    /// Create a user with the given identifier.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Self::default()
        }
    }

    /// Set the email attribute.
    #[must_use]
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    /// Set the country attribute.
    #[must_use]
    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.country = country.into();
        self
    }

    /// Add one custom attribute.
    #[must_use]
    pub fn custom(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom.insert(name.into(), value.into());
        self
    }
}

impl UserRecord for User {
    const FIELDS: &'static [UserField<Self>] = &[
        UserField {
            name: "Identifier",
            source: FieldSource::Value(|u| Some(AttrValue::Str(u.identifier.clone()))),
        },
        UserField {
            name: "Email",
            source: FieldSource::Value(|u| Some(AttrValue::Str(u.email.clone()))),
        },
        UserField {
            name: "Country",
            source: FieldSource::Value(|u| Some(AttrValue::Str(u.country.clone()))),
        },
        UserField {
            name: "Custom",
            source: FieldSource::Bag(|u| &u.custom),
        },
    ];
}

// ---------------------------------------------------------------------------
// Compiled schema
// ---------------------------------------------------------------------------

type Accessor = Box<dyn Fn(&dyn Any) -> Option<AttrValue> + Send + Sync>;
type BagAccessor = Box<dyn for<'a> Fn(&'a dyn Any) -> Option<&'a HashMap<String, String>> + Send + Sync>;

/// Type-erased accessor table for one record type.
pub(crate) struct UserSchema {
    accessors: HashMap<&'static str, Accessor>,
    bag: Option<BagAccessor>,
}

impl std::fmt::Debug for UserSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserSchema")
            .field("accessors", &self.accessors.keys().collect::<Vec<_>>())
            .field("bag", &self.bag.is_some())
            .finish()
    }
}

/// A rule's attribute accessor resolved against a schema at evaluator
/// build time, so per-evaluation reads skip the name lookup.
pub(crate) enum BoundAttr {
    /// Named field accessor.
    Field(&'static (dyn Fn(&dyn Any) -> Option<AttrValue> + Send + Sync)),
    /// Custom-bag lookup under a fixed name.
    Bag(
        &'static (dyn for<'a> Fn(&'a dyn Any) -> Option<&'a HashMap<String, String>> + Send + Sync),
        String,
    ),
    /// The schema exposes no such attribute; the rule always skips.
    Missing,
}

impl BoundAttr {
    /// Read the attribute off an erased record instance.
    pub(crate) fn get(&self, user: &dyn Any) -> Option<AttrValue> {
        match self {
            Self::Field(acc) => acc(user),
            Self::Bag(bag, name) => bag(user)?.get(name).map(|s| AttrValue::Str(s.clone())),
            Self::Missing => None,
        }
    }
}

impl UserSchema {
    /// Read one attribute off an erased record instance.
    ///
    /// Named fields shadow the custom bag; a named accessor yielding
    /// `None` means the attribute is absent.
    pub(crate) fn attribute(&self, user: &dyn Any, name: &str) -> Option<AttrValue> {
        if let Some(acc) = self.accessors.get(name) {
            return acc(user);
        }
        let bag = self.bag.as_ref()?;
        bag(user)?.get(name).map(|s| AttrValue::Str(s.clone()))
    }

    /// Resolve the accessor for `name` once, at evaluator build time.
    pub(crate) fn bind(&'static self, name: &str) -> BoundAttr {
        if let Some(acc) = self.accessors.get(name) {
            return BoundAttr::Field(&**acc);
        }
        if let Some(bag) = &self.bag {
            return BoundAttr::Bag(&**bag, name.to_string());
        }
        BoundAttr::Missing
    }

    fn compile<T: UserRecord>() -> Result<Self, FlagError> {
        let type_name = std::any::type_name::<T>();
        let mut accessors: HashMap<&'static str, Accessor> = HashMap::new();
        let mut bag: Option<BagAccessor> = None;

        for field in T::FIELDS {
            match &field.source {
                FieldSource::Value(get) => {
                    if field.name == "-" {
                        continue;
                    }
                    let get = *get;
                    let erased: Accessor =
                        Box::new(move |any| any.downcast_ref::<T>().and_then(get));
                    if accessors.insert(field.name, erased).is_some() {
                        return Err(FlagError::new(
                            ErrorKind::AmbiguousUserType,
                            format!(
                                "user type {type_name} declares attribute {:?} more than once",
                                field.name
                            ),
                        ));
                    }
                }
                FieldSource::Bag(get) => {
                    if bag.is_some() {
                        return Err(FlagError::new(
                            ErrorKind::AmbiguousUserType,
                            format!("user type {type_name} declares more than one custom attribute bag"),
                        ));
                    }
                    let get = *get;
                    let erased: BagAccessor =
                        Box::new(move |any| any.downcast_ref::<T>().map(get));
                    bag = Some(erased);
                }
            }
        }

        Ok(Self { accessors, bag })
    }
}

type SchemaSlot = Result<UserSchema, (ErrorKind, String)>;

fn schema_registry() -> &'static RwLock<HashMap<TypeId, &'static SchemaSlot>> {
    static REGISTRY: OnceLock<RwLock<HashMap<TypeId, &'static SchemaSlot>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Compile (or fetch the cached) schema for `T`.
pub(crate) fn schema_of<T: UserRecord>() -> Result<&'static UserSchema, FlagError> {
    let type_id = TypeId::of::<T>();
    if let Some(slot) = schema_registry()
        .read()
        .expect("user schema registry poisoned")
        .get(&type_id)
    {
        return slot_result(slot);
    }

    let slot: SchemaSlot =
        UserSchema::compile::<T>().map_err(|e| (e.kind, e.message));
    let mut map = schema_registry()
        .write()
        .expect("user schema registry poisoned");
    let entry = map
        .entry(type_id)
        .or_insert_with(|| &*Box::leak(Box::new(slot)));
    slot_result(*entry)
}

fn slot_result(slot: &'static SchemaSlot) -> Result<&'static UserSchema, FlagError> {
    match slot {
        Ok(schema) => Ok(schema),
        Err((kind, message)) => Err(FlagError::new(*kind, message.clone())),
    }
}

// ---------------------------------------------------------------------------
// Erased user handle
// ---------------------------------------------------------------------------

/// How the evaluator should read attributes for a given user type.
pub(crate) enum EvalKind {
    /// Dynamic per-name lookup.
    Lookup,
    /// Compiled record schema.
    Record(&'static UserSchema),
}

/// Borrowed attribute view over one user instance.
pub(crate) enum UserView<'a> {
    Lookup(&'a dyn UserAttributes),
    Record {
        user: &'a dyn Any,
        schema: &'static UserSchema,
    },
}

impl UserView<'_> {
    /// Read one attribute.
    pub(crate) fn attribute(&self, name: &str) -> Option<AttrValue> {
        match self {
            Self::Lookup(user) => user.attribute(name),
            Self::Record { user, schema } => schema.attribute(*user, name),
        }
    }

    /// Text form of the bucketing identifier; empty when absent.
    pub(crate) fn identifier(&self) -> String {
        self.attribute(IDENTIFIER_ATTR)
            .map(|v| v.text().into_owned())
            .unwrap_or_default()
    }
}

pub(crate) trait ErasedUser: Send + Sync {
    fn type_id(&self) -> TypeId;
    fn type_name(&self) -> &'static str;
    fn eval_kind(&self) -> Result<EvalKind, FlagError>;
    fn view(&self) -> Result<UserView<'_>, FlagError>;
}

struct RecordUser<T: UserRecord>(T);

impl<T: UserRecord> ErasedUser for RecordUser<T> {
    fn type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn eval_kind(&self) -> Result<EvalKind, FlagError> {
        schema_of::<T>().map(EvalKind::Record)
    }

    fn view(&self) -> Result<UserView<'_>, FlagError> {
        Ok(UserView::Record {
            user: &self.0,
            schema: schema_of::<T>()?,
        })
    }
}

struct LookupUser<T: UserAttributes>(T);

impl<T: UserAttributes> ErasedUser for LookupUser<T> {
    fn type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn eval_kind(&self) -> Result<EvalKind, FlagError> {
        Ok(EvalKind::Lookup)
    }

    fn view(&self) -> Result<UserView<'_>, FlagError> {
        Ok(UserView::Lookup(&self.0))
    }
}

/// A user bound to a client or snapshot. Cheap to clone and share.
#[derive(Clone)]
pub struct UserHandle {
    inner: Arc<dyn ErasedUser>,
}

impl UserHandle {
    /// Wrap a structured record user.
    pub fn record<T: UserRecord>(user: T) -> Self {
        Self {
            inner: Arc::new(RecordUser(user)),
        }
    }

    /// Wrap a dynamic attribute-lookup user.
    pub fn lookup<T: UserAttributes>(user: T) -> Self {
        Self {
            inner: Arc::new(LookupUser(user)),
        }
    }

    pub(crate) fn type_id(&self) -> TypeId {
        self.inner.type_id()
    }

    pub(crate) fn eval_kind(&self) -> Result<EvalKind, FlagError> {
        self.inner.eval_kind()
    }

    pub(crate) fn view(&self) -> Result<UserView<'_>, FlagError> {
        self.inner.view()
    }

    /// Short description used in evaluation details and logs.
    #[must_use]
    pub fn describe(&self) -> String {
        match self.inner.view() {
            Ok(view) => {
                let id = view.identifier();
                if id.is_empty() {
                    self.inner.type_name().to_string()
                } else {
                    id
                }
            }
            Err(_) => self.inner.type_name().to_string(),
        }
    }
}

impl std::fmt::Debug for UserHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserHandle")
            .field("type", &self.inner.type_name())
            .finish_non_exhaustive()
    }
}

impl From<User> for UserHandle {
    fn from(user: User) -> Self {
        Self::record(user)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_user_named_fields() {
        let user = User::new("u1").email("u1@example.com").country("HU");
        let handle = UserHandle::record(user);
        let view = handle.view().unwrap();
        assert_eq!(view.attribute("Identifier"), Some(AttrValue::Str("u1".into())));
        assert_eq!(
            view.attribute("Email"),
            Some(AttrValue::Str("u1@example.com".into()))
        );
        assert_eq!(view.attribute("Country"), Some(AttrValue::Str("HU".into())));
        assert_eq!(view.identifier(), "u1");
    }

    #[test]
    fn canonical_user_custom_bag() {
        let user = User::new("u1").custom("Plan", "premium");
        let handle = UserHandle::record(user);
        let view = handle.view().unwrap();
        assert_eq!(view.attribute("Plan"), Some(AttrValue::Str("premium".into())));
        assert_eq!(view.attribute("Missing"), None);
    }

    struct DuplicateFields;

    impl UserRecord for DuplicateFields {
        const FIELDS: &'static [UserField<Self>] = &[
            UserField {
                name: "Name",
                source: FieldSource::Value(|_| None),
            },
            UserField {
                name: "Name",
                source: FieldSource::Value(|_| None),
            },
        ];
    }

    #[test]
    fn duplicate_attribute_names_are_ambiguous() {
        let err = schema_of::<DuplicateFields>().unwrap_err();
        assert_eq!(err.kind, fdk_error::ErrorKind::AmbiguousUserType);
        // The failure is cached: a second build reports the same error.
        let again = schema_of::<DuplicateFields>().unwrap_err();
        assert_eq!(again.kind, fdk_error::ErrorKind::AmbiguousUserType);
    }

    struct TwoBags {
        a: HashMap<String, String>,
        b: HashMap<String, String>,
    }

    impl UserRecord for TwoBags {
        const FIELDS: &'static [UserField<Self>] = &[
            UserField {
                name: "A",
                source: FieldSource::Bag(|u| &u.a),
            },
            UserField {
                name: "B",
                source: FieldSource::Bag(|u| &u.b),
            },
        ];
    }

    #[test]
    fn two_bags_are_ambiguous() {
        let err = schema_of::<TwoBags>().unwrap_err();
        assert_eq!(err.kind, fdk_error::ErrorKind::AmbiguousUserType);
    }

    struct Excluded {
        secret: String,
        visible: String,
    }

    impl UserRecord for Excluded {
        const FIELDS: &'static [UserField<Self>] = &[
            UserField {
                name: "-",
                source: FieldSource::Value(|u| Some(AttrValue::Str(u.secret.clone()))),
            },
            UserField {
                name: "Visible",
                source: FieldSource::Value(|u| Some(AttrValue::Str(u.visible.clone()))),
            },
        ];
    }

    #[test]
    fn dash_named_fields_are_excluded() {
        let handle = UserHandle::record(Excluded {
            secret: "hidden".into(),
            visible: "shown".into(),
        });
        let view = handle.view().unwrap();
        assert_eq!(view.attribute("-"), None);
        assert_eq!(view.attribute("Visible"), Some(AttrValue::Str("shown".into())));
    }

    struct NumericUser {
        age: i64,
        score: f64,
    }

    impl UserRecord for NumericUser {
        const FIELDS: &'static [UserField<Self>] = &[
            UserField {
                name: "Age",
                source: FieldSource::Value(|u| Some(AttrValue::Int(u.age))),
            },
            UserField {
                name: "Score",
                source: FieldSource::Value(|u| Some(AttrValue::Float(u.score))),
            },
        ];
    }

    #[test]
    fn numeric_fields_preserve_kind() {
        let handle = UserHandle::record(NumericUser { age: 42, score: 1.5 });
        let view = handle.view().unwrap();
        assert_eq!(view.attribute("Age"), Some(AttrValue::Int(42)));
        assert_eq!(view.attribute("Score"), Some(AttrValue::Float(1.5)));
    }

    struct MapLookup(HashMap<String, String>);

    impl UserAttributes for MapLookup {
        fn attribute(&self, name: &str) -> Option<AttrValue> {
            self.0.get(name).map(|s| AttrValue::Str(s.clone()))
        }
    }

    #[test]
    fn lookup_variant_reads_through_trait() {
        let mut map = HashMap::new();
        map.insert("Identifier".to_string(), "lookup-user".to_string());
        let handle = UserHandle::lookup(MapLookup(map));
        let view = handle.view().unwrap();
        assert_eq!(view.identifier(), "lookup-user");
        assert_eq!(view.attribute("Other"), None);
    }

    #[test]
    fn attr_value_text_forms() {
        assert_eq!(AttrValue::Str("x".into()).text(), "x");
        assert_eq!(AttrValue::Int(-3).text(), "-3");
        assert_eq!(AttrValue::UInt(7).text(), "7");
        assert_eq!(AttrValue::Float(1.5).text(), "1.5");
        assert_eq!(AttrValue::Bytes(b"ab".to_vec()).text(), "ab");
    }

    #[test]
    fn attr_value_semver_only_from_strings() {
        assert!(AttrValue::Str("1.2.3".into()).parse_semver().unwrap().is_ok());
        assert!(AttrValue::Str("junk".into()).parse_semver().unwrap().is_err());
        assert!(AttrValue::Int(1).parse_semver().is_none());
        assert!(AttrValue::Float(1.2).parse_semver().is_none());
    }

    #[test]
    fn handle_describe_prefers_identifier() {
        let handle = UserHandle::record(User::new("desc-user"));
        assert_eq!(handle.describe(), "desc-user");
    }
}
