//! Reference object model probed by the attribute conformance engine.
//!
//! Provides the pieces of the ES object model that property-attribute
//! fixtures observe:
//!
//! - **Property keys**: strings or symbols, with array-index detection
//! - **Property descriptors**: data vs accessor, writable/enumerable/configurable
//! - **Ordinary objects**: own-property table with insertion order,
//!   `[[DefineOwnProperty]]` validation, `[[Delete]]`, `[[OwnPropertyKeys]]`
//! - **Object heap**: handle-addressed arena with prototype-chain walks,
//!   `[[Get]]`/`[[Set]]`, `propertyIsEnumerable`, and the `for-in` key walk
//!
//! There is no interpreter here: accessor getters and setters are never
//! invoked, and function objects are ordinary objects flagged callable.
//! `BTreeMap`/`BTreeSet` keep every walk deterministic.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Serialize/deserialize `BTreeMap<PropertyKey, PropertyDescriptor>` as a
/// sorted sequence of `[key, descriptor]` pairs. serde_json requires string
/// map keys but `PropertyKey` is an enum.
mod properties_as_seq {
    use super::{BTreeMap, PropertyDescriptor, PropertyKey};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<PropertyKey, PropertyDescriptor>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let pairs: Vec<(&PropertyKey, &PropertyDescriptor)> = map.iter().collect();
        pairs.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<PropertyKey, PropertyDescriptor>, D::Error> {
        let pairs: Vec<(PropertyKey, PropertyDescriptor)> = Vec::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// PropertyKey
// ---------------------------------------------------------------------------

/// Unique symbol identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SymbolId(pub u32);

/// A property key: either a string or a symbol.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PropertyKey {
    /// String key.
    String(String),
    /// Symbol key.
    Symbol(SymbolId),
}

impl PropertyKey {
    /// Array index value if this key is a canonical array index
    /// (`"0"`, `"17"`, never `"01"` or `"4294967295"`).
    pub fn array_index(&self) -> Option<u32> {
        let Self::String(s) = self else {
            return None;
        };
        if s.is_empty() || (s.len() > 1 && s.starts_with('0')) {
            return None;
        }
        if !s.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        match s.parse::<u64>() {
            Ok(n) if n < u64::from(u32::MAX) => Some(n as u32),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            Self::Symbol(_) => None,
        }
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Symbol(id) => write!(f, "Symbol({})", id.0),
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for PropertyKey {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

// ---------------------------------------------------------------------------
// ObjectHandle / JsValue
// ---------------------------------------------------------------------------

/// Opaque handle referencing an object on the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHandle(pub u32);

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Runtime value as seen by property probes.
///
/// Function objects are `Object` handles whose ordinary object is callable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JsValue {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Symbol(SymbolId),
    Object(ObjectHandle),
}

impl JsValue {
    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    pub fn as_object(&self) -> Option<ObjectHandle> {
        match self {
            Self::Object(handle) => Some(*handle),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "number",
            Self::Str(_) => "string",
            Self::Symbol(_) => "symbol",
            Self::Object(_) => "object",
        }
    }

    /// SameValue comparison.
    pub fn same_value(&self, other: &Self) -> bool {
        self == other
    }
}

impl fmt::Display for JsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Symbol(id) => write!(f, "Symbol({})", id.0),
            Self::Object(h) => write!(f, "[object#{}]", h.0),
        }
    }
}

// ---------------------------------------------------------------------------
// PropertyDescriptor
// ---------------------------------------------------------------------------

/// Property descriptor: data or accessor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyDescriptor {
    Data {
        value: JsValue,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    },
    Accessor {
        get: Option<ObjectHandle>,
        set: Option<ObjectHandle>,
        enumerable: bool,
        configurable: bool,
    },
}

impl PropertyDescriptor {
    /// Writable, enumerable, configurable data property (plain assignment).
    pub fn data(value: JsValue) -> Self {
        Self::Data {
            value,
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Non-writable, non-enumerable, non-configurable data property.
    pub fn data_frozen(value: JsValue) -> Self {
        Self::Data {
            value,
            writable: false,
            enumerable: false,
            configurable: false,
        }
    }

    /// Writable, non-enumerable, configurable data property; the shape of
    /// built-in methods installed on prototype objects.
    pub fn data_builtin(value: JsValue) -> Self {
        Self::Data {
            value,
            writable: true,
            enumerable: false,
            configurable: true,
        }
    }

    pub fn is_configurable(&self) -> bool {
        match self {
            Self::Data { configurable, .. } | Self::Accessor { configurable, .. } => *configurable,
        }
    }

    pub fn is_enumerable(&self) -> bool {
        match self {
            Self::Data { enumerable, .. } | Self::Accessor { enumerable, .. } => *enumerable,
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data { .. })
    }

    pub fn is_accessor(&self) -> bool {
        matches!(self, Self::Accessor { .. })
    }

    pub fn value(&self) -> Option<&JsValue> {
        match self {
            Self::Data { value, .. } => Some(value),
            Self::Accessor { .. } => None,
        }
    }

    /// Accessors are never writable in the data-property sense.
    pub fn is_writable(&self) -> bool {
        match self {
            Self::Data { writable, .. } => *writable,
            Self::Accessor { .. } => false,
        }
    }
}

// ---------------------------------------------------------------------------
// ObjectError
// ---------------------------------------------------------------------------

/// Errors from object model operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ObjectError {
    #[error("TypeError: {0}")]
    TypeError(String),
    #[error("object#{0} not found")]
    ObjectNotFound(ObjectHandle),
    #[error("TypeError: prototype chain cycle detected")]
    PrototypeCycleDetected,
    #[error("TypeError: prototype chain depth {depth} exceeds max {max}")]
    PrototypeChainTooDeep { depth: u32, max: u32 },
}

// ---------------------------------------------------------------------------
// OrdinaryObject
// ---------------------------------------------------------------------------

/// Maximum prototype chain depth walked before giving up.
pub const MAX_PROTOTYPE_CHAIN_DEPTH: u32 = 1024;

/// An ordinary object with internal slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdinaryObject {
    /// `[[Prototype]]` (None ends the chain).
    pub prototype: Option<ObjectHandle>,
    /// `[[Extensible]]`.
    pub extensible: bool,
    #[serde(with = "properties_as_seq")]
    properties: BTreeMap<PropertyKey, PropertyDescriptor>,
    /// Order in which non-index keys were first defined.
    insertion_order: Vec<PropertyKey>,
    /// Intrinsic tag (`"Function"`, `"Date"`, ...).
    pub class_tag: Option<String>,
    pub callable: bool,
}

impl Default for OrdinaryObject {
    fn default() -> Self {
        Self {
            prototype: None,
            extensible: true,
            properties: BTreeMap::new(),
            insertion_order: Vec::new(),
            class_tag: None,
            callable: false,
        }
    }
}

impl OrdinaryObject {
    pub fn with_prototype(proto: Option<ObjectHandle>) -> Self {
        Self {
            prototype: proto,
            ..Self::default()
        }
    }

    /// `[[GetOwnProperty]](P)`.
    pub fn get_own_property(&self, key: &PropertyKey) -> Option<&PropertyDescriptor> {
        self.properties.get(key)
    }

    pub fn has_own_property(&self, key: &PropertyKey) -> bool {
        self.properties.contains_key(key)
    }

    /// `[[DefineOwnProperty]](P, Desc)`.
    ///
    /// `Ok(false)` means the definition was rejected (non-configurable
    /// conflict or non-extensible object).
    pub fn define_own_property(
        &mut self,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<bool, ObjectError> {
        let Some(current) = self.properties.get(&key) else {
            if !self.extensible {
                return Ok(false);
            }
            self.insertion_order.push(key.clone());
            self.properties.insert(key, desc);
            return Ok(true);
        };

        if !current.is_configurable() {
            if desc.is_configurable() || desc.is_enumerable() != current.is_enumerable() {
                return Ok(false);
            }
            if current.is_data() != desc.is_data() {
                return Ok(false);
            }
            if let (
                PropertyDescriptor::Data {
                    writable: false,
                    value: current_v,
                    ..
                },
                PropertyDescriptor::Data {
                    writable: new_w,
                    value: new_v,
                    ..
                },
            ) = (current, &desc)
                && (*new_w || !current_v.same_value(new_v))
            {
                return Ok(false);
            }
            if let (
                PropertyDescriptor::Accessor {
                    get: cur_get,
                    set: cur_set,
                    ..
                },
                PropertyDescriptor::Accessor {
                    get: new_get,
                    set: new_set,
                    ..
                },
            ) = (current, &desc)
                && (cur_get != new_get || cur_set != new_set)
            {
                return Ok(false);
            }
        }
        self.properties.insert(key, desc);
        Ok(true)
    }

    /// `[[Delete]](P)`; `false` when the property is non-configurable.
    pub fn delete(&mut self, key: &PropertyKey) -> bool {
        match self.properties.get(key) {
            None => true,
            Some(desc) if !desc.is_configurable() => false,
            Some(_) => {
                self.properties.remove(key);
                self.insertion_order.retain(|k| k != key);
                true
            }
        }
    }

    /// `[[OwnPropertyKeys]]()`: array indices ascending, then string keys in
    /// insertion order, then symbols in insertion order.
    pub fn own_property_keys(&self) -> Vec<PropertyKey> {
        let mut index_keys: Vec<(u32, PropertyKey)> = Vec::new();
        let mut str_keys: Vec<PropertyKey> = Vec::new();
        let mut sym_keys: Vec<PropertyKey> = Vec::new();

        for key in &self.insertion_order {
            match key {
                PropertyKey::String(_) => match key.array_index() {
                    Some(n) => index_keys.push((n, key.clone())),
                    None => str_keys.push(key.clone()),
                },
                PropertyKey::Symbol(_) => sym_keys.push(key.clone()),
            }
        }

        index_keys.sort_by_key(|(n, _)| *n);
        let mut result: Vec<PropertyKey> = index_keys.into_iter().map(|(_, k)| k).collect();
        result.extend(str_keys);
        result.extend(sym_keys);
        result
    }

    pub fn prevent_extensions(&mut self) {
        self.extensible = false;
    }
}

// ---------------------------------------------------------------------------
// ObjectHeap
// ---------------------------------------------------------------------------

/// Arena of ordinary objects addressed by `ObjectHandle`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectHeap {
    objects: Vec<OrdinaryObject>,
}

impl ObjectHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, proto: Option<ObjectHandle>) -> ObjectHandle {
        let handle = ObjectHandle(self.objects.len() as u32);
        self.objects.push(OrdinaryObject::with_prototype(proto));
        handle
    }

    /// Allocate a callable object tagged `"Function"`.
    pub fn alloc_function(&mut self, proto: Option<ObjectHandle>) -> ObjectHandle {
        let handle = self.alloc(proto);
        let obj = &mut self.objects[handle.0 as usize];
        obj.callable = true;
        obj.class_tag = Some("Function".to_string());
        handle
    }

    pub fn get(&self, handle: ObjectHandle) -> Result<&OrdinaryObject, ObjectError> {
        self.objects
            .get(handle.0 as usize)
            .ok_or(ObjectError::ObjectNotFound(handle))
    }

    pub fn get_mut(&mut self, handle: ObjectHandle) -> Result<&mut OrdinaryObject, ObjectError> {
        self.objects
            .get_mut(handle.0 as usize)
            .ok_or(ObjectError::ObjectNotFound(handle))
    }

    /// Handles from `handle` up its prototype chain, `handle` first.
    pub fn prototype_chain(&self, handle: ObjectHandle) -> Result<Vec<ObjectHandle>, ObjectError> {
        let mut chain = Vec::new();
        let mut visited = BTreeSet::new();
        let mut current = Some(handle);
        let mut depth: u32 = 0;

        while let Some(h) = current {
            if depth > MAX_PROTOTYPE_CHAIN_DEPTH {
                return Err(ObjectError::PrototypeChainTooDeep {
                    depth,
                    max: MAX_PROTOTYPE_CHAIN_DEPTH,
                });
            }
            if !visited.insert(h) {
                return Err(ObjectError::PrototypeCycleDetected);
            }
            current = self.get(h)?.prototype;
            chain.push(h);
            depth += 1;
        }
        Ok(chain)
    }

    /// `[[Get]](O, P)`, walking the prototype chain. Accessors yield their
    /// getter handle (or `undefined`); they are never invoked here.
    pub fn get_property(
        &self,
        handle: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<JsValue, ObjectError> {
        for h in self.prototype_chain(handle)? {
            if let Some(desc) = self.get(h)?.get_own_property(key) {
                return Ok(match desc {
                    PropertyDescriptor::Data { value, .. } => value.clone(),
                    PropertyDescriptor::Accessor { get, .. } => {
                        get.map_or(JsValue::Undefined, JsValue::Object)
                    }
                });
            }
        }
        Ok(JsValue::Undefined)
    }

    /// `[[Set]](O, P, V)` in sloppy mode: returns `false` instead of throwing
    /// when the assignment is refused.
    pub fn set_property(
        &mut self,
        handle: ObjectHandle,
        key: PropertyKey,
        value: JsValue,
    ) -> Result<bool, ObjectError> {
        let chain = self.prototype_chain(handle)?;
        for (depth, h) in chain.iter().enumerate() {
            let Some(desc) = self.get(*h)?.get_own_property(&key) else {
                continue;
            };
            if desc.is_accessor() || !desc.is_writable() {
                return Ok(false);
            }
            if depth == 0 {
                if let Some(PropertyDescriptor::Data { value: slot, .. }) =
                    self.get_mut(handle)?.properties.get_mut(&key)
                {
                    *slot = value;
                }
                return Ok(true);
            }
            break;
        }
        self.get_mut(handle)?
            .define_own_property(key, PropertyDescriptor::data(value))
    }

    /// `[[HasProperty]](O, P)`, walking the prototype chain.
    pub fn has_property(
        &self,
        handle: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<bool, ObjectError> {
        for h in self.prototype_chain(handle)? {
            if self.get(h)?.has_own_property(key) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn delete_property(
        &mut self,
        handle: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<bool, ObjectError> {
        Ok(self.get_mut(handle)?.delete(key))
    }

    /// `Object.defineProperty(O, P, Desc)`.
    pub fn define_property(
        &mut self,
        handle: ObjectHandle,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<bool, ObjectError> {
        self.get_mut(handle)?.define_own_property(key, desc)
    }

    /// `Object.getOwnPropertyDescriptor(O, P)`.
    pub fn get_own_property_descriptor(
        &self,
        handle: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<Option<PropertyDescriptor>, ObjectError> {
        Ok(self.get(handle)?.get_own_property(key).cloned())
    }

    /// `Object.prototype.propertyIsEnumerable(P)`: own properties only.
    pub fn property_is_enumerable(
        &self,
        handle: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<bool, ObjectError> {
        Ok(self
            .get(handle)?
            .get_own_property(key)
            .is_some_and(PropertyDescriptor::is_enumerable))
    }

    /// `for...in` enumeration: walk the prototype chain collecting enumerable
    /// string keys in `[[OwnPropertyKeys]]` order. A key seen on a nearer
    /// object (enumerable or not) shadows the same key further up.
    pub fn for_in_keys(&self, handle: ObjectHandle) -> Result<Vec<String>, ObjectError> {
        let mut result = Vec::new();
        let mut seen = BTreeSet::<PropertyKey>::new();

        for h in self.prototype_chain(handle)? {
            let obj = self.get(h)?;
            for k in obj.own_property_keys() {
                if !seen.insert(k.clone()) {
                    continue;
                }
                if let PropertyKey::String(ref s) = k
                    && obj.get_own_property(&k).is_some_and(PropertyDescriptor::is_enumerable)
                {
                    result.push(s.clone());
                }
            }
        }
        Ok(result)
    }
}
