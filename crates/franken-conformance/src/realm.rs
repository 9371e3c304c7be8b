//! Minimal intrinsic realm over the reference object model.
//!
//! Only the objects attribute fixtures reach are materialized: the global
//! object, `Object`, `Function`, and `Date` with its prototype methods. Method
//! objects are callable shells; nothing here evaluates script.

use crate::attributes::ReportedAttributes;
use crate::object_model::{
    JsValue, ObjectError, ObjectHandle, ObjectHeap, PropertyDescriptor, PropertyKey,
};
use crate::probe::{AttributeSource, MutableAttributeSource, ProbeError};

/// A runtime that attribute fixtures can run against: property-access
/// primitives plus resolution of dotted target paths from its global object.
pub trait ConformanceRealm: MutableAttributeSource {
    fn resolve(&self, path: &str) -> Result<JsValue, ProbeError>;
}

/// `(name, length)` of every `Date.prototype` method.
pub const DATE_PROTOTYPE_METHODS: &[(&str, i64)] = &[
    ("toString", 0),
    ("toDateString", 0),
    ("toTimeString", 0),
    ("toLocaleString", 0),
    ("toLocaleDateString", 0),
    ("toLocaleTimeString", 0),
    ("valueOf", 0),
    ("getTime", 0),
    ("getFullYear", 0),
    ("getUTCFullYear", 0),
    ("getMonth", 0),
    ("getUTCMonth", 0),
    ("getDate", 0),
    ("getUTCDate", 0),
    ("getDay", 0),
    ("getUTCDay", 0),
    ("getHours", 0),
    ("getUTCHours", 0),
    ("getMinutes", 0),
    ("getUTCMinutes", 0),
    ("getSeconds", 0),
    ("getUTCSeconds", 0),
    ("getMilliseconds", 0),
    ("getUTCMilliseconds", 0),
    ("getTimezoneOffset", 0),
    ("setTime", 1),
    ("setMilliseconds", 1),
    ("setUTCMilliseconds", 1),
    ("setSeconds", 2),
    ("setUTCSeconds", 2),
    ("setMinutes", 3),
    ("setUTCMinutes", 3),
    ("setHours", 4),
    ("setUTCHours", 4),
    ("setDate", 1),
    ("setUTCDate", 1),
    ("setMonth", 2),
    ("setUTCMonth", 2),
    ("setFullYear", 3),
    ("setUTCFullYear", 3),
    ("toUTCString", 0),
];

/// `(name, length)` of the `Date` constructor's own methods.
const DATE_STATIC_METHODS: &[(&str, i64)] = &[("parse", 1), ("UTC", 7), ("now", 0)];

const OBJECT_PROTOTYPE_METHODS: &[(&str, i64)] = &[
    ("toString", 0),
    ("toLocaleString", 0),
    ("valueOf", 0),
    ("hasOwnProperty", 1),
    ("isPrototypeOf", 1),
    ("propertyIsEnumerable", 1),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intrinsics {
    pub object_prototype: ObjectHandle,
    pub function_prototype: ObjectHandle,
    pub object_constructor: ObjectHandle,
    pub function_constructor: ObjectHandle,
    pub date_constructor: ObjectHandle,
    pub date_prototype: ObjectHandle,
}

/// A fresh global environment. Fixtures never share one.
#[derive(Debug, Clone)]
pub struct Realm {
    heap: ObjectHeap,
    global: ObjectHandle,
    intrinsics: Intrinsics,
}

impl Realm {
    pub fn new() -> Result<Self, ObjectError> {
        let mut heap = ObjectHeap::new();
        let object_prototype = heap.alloc(None);
        let function_prototype = heap.alloc_function(Some(object_prototype));
        define_length(&mut heap, function_prototype, 0)?;

        let object_constructor = constructor(&mut heap, function_prototype, object_prototype, 1)?;
        let function_constructor =
            constructor(&mut heap, function_prototype, function_prototype, 1)?;
        install_methods(&mut heap, object_prototype, function_prototype, OBJECT_PROTOTYPE_METHODS)?;

        let date_prototype = heap.alloc(Some(object_prototype));
        let date_constructor = constructor(&mut heap, function_prototype, date_prototype, 7)?;
        install_methods(&mut heap, date_prototype, function_prototype, DATE_PROTOTYPE_METHODS)?;
        install_methods(&mut heap, date_constructor, function_prototype, DATE_STATIC_METHODS)?;

        let global = heap.alloc(Some(object_prototype));
        for (name, handle) in [
            ("Object", object_constructor),
            ("Function", function_constructor),
            ("Date", date_constructor),
        ] {
            heap.define_property(
                global,
                PropertyKey::from(name),
                PropertyDescriptor::data_builtin(JsValue::Object(handle)),
            )?;
        }
        heap.define_property(
            global,
            PropertyKey::from("undefined"),
            PropertyDescriptor::data_frozen(JsValue::Undefined),
        )?;

        Ok(Self {
            heap,
            global,
            intrinsics: Intrinsics {
                object_prototype,
                function_prototype,
                object_constructor,
                function_constructor,
                date_constructor,
                date_prototype,
            },
        })
    }

    pub fn heap(&self) -> &ObjectHeap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut ObjectHeap {
        &mut self.heap
    }

    pub fn global(&self) -> ObjectHandle {
        self.global
    }

    pub fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }
}

fn define_length(heap: &mut ObjectHeap, func: ObjectHandle, length: i64) -> Result<(), ObjectError> {
    heap.define_property(
        func,
        PropertyKey::from("length"),
        PropertyDescriptor::data_frozen(JsValue::Int(length)),
    )?;
    Ok(())
}

/// Constructor function linked both ways with `prototype`.
fn constructor(
    heap: &mut ObjectHeap,
    function_prototype: ObjectHandle,
    prototype: ObjectHandle,
    length: i64,
) -> Result<ObjectHandle, ObjectError> {
    let ctor = heap.alloc_function(Some(function_prototype));
    define_length(heap, ctor, length)?;
    heap.define_property(
        ctor,
        PropertyKey::from("prototype"),
        PropertyDescriptor::data_frozen(JsValue::Object(prototype)),
    )?;
    heap.define_property(
        prototype,
        PropertyKey::from("constructor"),
        PropertyDescriptor::data_builtin(JsValue::Object(ctor)),
    )?;
    Ok(ctor)
}

fn install_methods(
    heap: &mut ObjectHeap,
    holder: ObjectHandle,
    function_prototype: ObjectHandle,
    methods: &[(&str, i64)],
) -> Result<(), ObjectError> {
    for (name, length) in methods {
        let func = heap.alloc_function(Some(function_prototype));
        define_length(heap, func, *length)?;
        heap.define_property(
            holder,
            PropertyKey::from(*name),
            PropertyDescriptor::data_builtin(JsValue::Object(func)),
        )?;
    }
    Ok(())
}

impl AttributeSource for Realm {
    fn own_attributes(
        &self,
        target: &JsValue,
        key: &PropertyKey,
    ) -> Result<Option<ReportedAttributes>, ProbeError> {
        self.heap.own_attributes(target, key)
    }

    fn is_enumerable_direct(&self, target: &JsValue, key: &PropertyKey) -> Result<bool, ProbeError> {
        self.heap.is_enumerable_direct(target, key)
    }

    fn enumeration_keys(&self, target: &JsValue) -> Result<Vec<PropertyKey>, ProbeError> {
        self.heap.enumeration_keys(target)
    }
}

impl MutableAttributeSource for Realm {
    fn get_value(&self, target: &JsValue, key: &PropertyKey) -> Result<JsValue, ProbeError> {
        self.heap.get_value(target, key)
    }

    fn assign(
        &mut self,
        target: &JsValue,
        key: &PropertyKey,
        value: JsValue,
    ) -> Result<bool, ProbeError> {
        self.heap.assign(target, key, value)
    }

    fn delete(&mut self, target: &JsValue, key: &PropertyKey) -> Result<bool, ProbeError> {
        self.heap.delete(target, key)
    }
}

impl ConformanceRealm for Realm {
    /// Resolve `Date.prototype.setSeconds` by successive `[[Get]]`s from the
    /// global object. Every segment must name an existing property and every
    /// intermediate value must be an object.
    fn resolve(&self, path: &str) -> Result<JsValue, ProbeError> {
        let unresolved = |segment: &str| ProbeError::UnresolvedTarget {
            path: path.to_string(),
            segment: segment.to_string(),
        };
        let mut current = JsValue::Object(self.global);
        for segment in path.split('.') {
            if segment.is_empty() {
                return Err(unresolved(segment));
            }
            let Some(handle) = current.as_object() else {
                return Err(unresolved(segment));
            };
            let key = PropertyKey::from(segment);
            if !self.heap.has_property(handle, &key)? {
                return Err(unresolved(segment));
            }
            current = self.heap.get_property(handle, &key)?;
        }
        Ok(current)
    }
}
