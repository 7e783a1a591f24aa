//! Global memory arena of a script environment
//!
//! Objects live in slots addressed by `ObjectId`. A handle carries the
//! generation of its slot, so handles to collected objects are recognized
//! as stale once the slot is reused.
//!
//! Collection is mark-sweep from the roots the environment hands in. It only
//! runs between evaluations: values on the interpreter's stack are not roots.
//! Script allocations and script writes are charged against the
//! `heap_max_objects` budget in slots; host allocations are free.

use crate::ast::FunctionDecl;
use crate::interpreter::{Scope, ScopeRef};
use crate::value::{array_index, format_number};
use crate::{LogLevel, RuntimeLimits, TerminationReason, Value};
use serde_json::{Map, Number, Value as JsonValue};
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Nesting depth beyond which values are treated as cyclic
const MAX_NESTING: usize = 64;

/// 2^53 - 1
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// A stored string takes one extra slot per this many bytes
const STRING_SLOT_BYTES: usize = 64;

/// Allocations after which a collection is worth its cost
const COLLECTION_INTERVAL: usize = 4096;

static NEXT_ARENA: AtomicU32 = AtomicU32::new(1);

/// Handle to an object in an environment's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId {
    arena: u32,
    index: u32,
    generation: u32,
}

/// Builtin error constructors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Error,
    TypeError,
    RangeError,
    ReferenceError,
    SyntaxError,
    DataCloneError,
}

impl ErrorKind {
    pub const CONSTRUCTORS: [ErrorKind; 5] = [
        ErrorKind::Error,
        ErrorKind::TypeError,
        ErrorKind::RangeError,
        ErrorKind::ReferenceError,
        ErrorKind::SyntaxError,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::DataCloneError => "DataCloneError",
        }
    }
}

/// Host functions reachable from script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NativeFunction {
    Console(LogLevel),
    Close,
    PostMessage,
    /// `postMessage` of the connected port at this index
    PortPostMessage(usize),
    ErrorConstructor(ErrorKind),
    JsonStringify,
    JsonParse,
}

#[derive(Debug)]
pub(crate) enum ObjectKind {
    Ordinary,
    Array(Vec<Value>),
    Function {
        decl: Rc<FunctionDecl>,
        closure: ScopeRef,
    },
    Native(NativeFunction),
    Error(ErrorKind),
}

#[derive(Debug)]
pub(crate) struct HeapObject {
    pub kind: ObjectKind,
    // insertion ordered, objects are small
    properties: Vec<(String, Value)>,
}

impl HeapObject {
    pub(crate) fn get(&self, key: &str) -> Option<&Value> {
        self.properties
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    /// Unaccounted write, for host setup
    pub(crate) fn set(&mut self, key: &str, value: Value) {
        match self.properties.iter_mut().find(|(name, _)| name == key) {
            Some((_, slot)) => *slot = value,
            None => self.properties.push((key.to_string(), value)),
        }
    }

    pub(crate) fn is_callable(&self) -> bool {
        matches!(
            self.kind,
            ObjectKind::Function { .. } | ObjectKind::Native(_)
        )
    }

    /// Budget slots this object takes
    fn slots(&self) -> usize {
        let elements: usize = match &self.kind {
            ObjectKind::Array(items) => items.iter().map(stored_slots).sum(),
            _ => 0,
        };
        let properties: usize = self.properties.iter().map(|(_, value)| stored_slots(value)).sum();
        1 + elements + properties
    }

    fn trace(&self, objects: &mut Vec<ObjectId>, scopes: &mut Vec<ScopeRef>) {
        let values = self.properties.iter().map(|(_, value)| value);
        objects.extend(values.filter_map(Value::as_object));
        match &self.kind {
            ObjectKind::Array(items) => objects.extend(items.iter().filter_map(Value::as_object)),
            ObjectKind::Function { closure, .. } => scopes.push(closure.clone()),
            _ => {}
        }
    }
}

/// Slots a value takes once stored in an object
fn stored_slots(value: &Value) -> usize {
    match value {
        Value::String(s) => 1 + s.len() / STRING_SLOT_BYTES,
        _ => 1,
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    /// Slots the object took when the host allocated it; 0 for script objects
    baseline: usize,
    object: Option<HeapObject>,
}

#[derive(Debug)]
pub struct Heap {
    arena: u32,
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    /// Budget slots charged to script code
    used: usize,
    /// Allocations since the last collection
    allocated: usize,
    max_slots: usize,
    max_string_length: usize,
    /// Stands in for collected objects behind stale handles
    tombstone: HeapObject,
}

impl Heap {
    pub(crate) fn new(limits: &RuntimeLimits) -> Self {
        Self {
            arena: NEXT_ARENA.fetch_add(1, Ordering::Relaxed),
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            used: 0,
            allocated: 0,
            max_slots: limits.heap_max_objects,
            max_string_length: match limits.max_string_length {
                0 => usize::MAX,
                n => n,
            },
            tombstone: HeapObject {
                kind: ObjectKind::Ordinary,
                properties: Vec::new(),
            },
        }
    }

    /// Number of live objects, host objects included
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Budget slots currently charged to script code
    pub fn used_slots(&self) -> usize {
        self.used
    }

    pub(crate) fn max_string_length(&self) -> usize {
        self.max_string_length
    }

    /// Whether `value` is a primitive or a live object of this arena
    pub fn owns(&self, value: &Value) -> bool {
        match value {
            Value::Object(id) => self.slot(*id).is_some(),
            _ => true,
        }
    }

    fn slot(&self, id: ObjectId) -> Option<&HeapObject> {
        if id.arena != self.arena {
            return None;
        }
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.object.as_ref()
    }

    /// Charge a script write growing by `grow` and releasing `release` slots
    fn charge(&mut self, grow: usize, release: usize) -> Result<(), TerminationReason> {
        let used = (self.used + grow).saturating_sub(release);
        if grow > release && self.max_slots != 0 && used > self.max_slots {
            return Err(TerminationReason::MemoryLimit);
        }
        self.used = used;
        Ok(())
    }

    /// Allocate an object on behalf of script code
    pub(crate) fn allocate(
        &mut self,
        kind: ObjectKind,
        properties: Vec<(String, Value)>,
    ) -> Result<ObjectId, TerminationReason> {
        let object = HeapObject { kind, properties };
        self.charge(object.slots(), 0)?;
        Ok(self.insert(object, 0))
    }

    /// Allocate a host-owned object; not counted against the limit
    pub(crate) fn allocate_host(
        &mut self,
        kind: ObjectKind,
        properties: Vec<(String, Value)>,
    ) -> ObjectId {
        let object = HeapObject { kind, properties };
        let baseline = object.slots();
        self.insert(object, baseline)
    }

    fn insert(&mut self, object: HeapObject, baseline: usize) -> ObjectId {
        self.live += 1;
        self.allocated += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.baseline = baseline;
            slot.object = Some(object);
            return ObjectId {
                arena: self.arena,
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            baseline,
            object: Some(object),
        });
        ObjectId {
            arena: self.arena,
            index,
            generation: 0,
        }
    }

    pub(crate) fn get(&self, id: ObjectId) -> &HeapObject {
        self.slot(id).unwrap_or(&self.tombstone)
    }

    pub(crate) fn get_mut(&mut self, id: ObjectId) -> &mut HeapObject {
        match self.slots.get_mut(id.index as usize) {
            Some(Slot {
                generation,
                object: Some(object),
                ..
            }) if id.arena == self.arena && *generation == id.generation => object,
            _ => &mut self.tombstone,
        }
    }

    // === Accounted script writes ===

    pub(crate) fn set_property(
        &mut self,
        id: ObjectId,
        key: &str,
        value: Value,
    ) -> Result<(), TerminationReason> {
        let release = self.get(id).get(key).map_or(0, stored_slots);
        self.charge(stored_slots(&value), release)?;
        self.get_mut(id).set(key, value);
        Ok(())
    }

    /// `items[index] = value`, opening holes up to `index`
    pub(crate) fn set_element(
        &mut self,
        id: ObjectId,
        index: usize,
        value: Value,
    ) -> Result<(), TerminationReason> {
        let ObjectKind::Array(items) = &self.get(id).kind else {
            return Ok(());
        };
        let (grow, release) = match items.get(index) {
            Some(old) => (stored_slots(&value), stored_slots(old)),
            None => (index - items.len() + stored_slots(&value), 0),
        };
        self.charge(grow, release)?;

        if let ObjectKind::Array(items) = &mut self.get_mut(id).kind {
            if index >= items.len() {
                items.resize(index + 1, Value::Undefined);
            }
            items[index] = value;
        }
        Ok(())
    }

    pub(crate) fn set_length(&mut self, id: ObjectId, len: usize) -> Result<(), TerminationReason> {
        let ObjectKind::Array(items) = &self.get(id).kind else {
            return Ok(());
        };
        let (grow, release) = match items.get(len..) {
            Some(removed) => (0, removed.iter().map(stored_slots).sum::<usize>()),
            None => (len - items.len(), 0),
        };
        self.charge(grow, release)?;

        if let ObjectKind::Array(items) = &mut self.get_mut(id).kind {
            items.resize(len, Value::Undefined);
        }
        Ok(())
    }

    /// Append to an array; returns the new length
    pub(crate) fn push_elements(
        &mut self,
        id: ObjectId,
        values: Vec<Value>,
    ) -> Result<usize, TerminationReason> {
        self.charge(values.iter().map(stored_slots).sum(), 0)?;
        match &mut self.get_mut(id).kind {
            ObjectKind::Array(items) => {
                items.extend(values);
                Ok(items.len())
            }
            _ => Ok(0),
        }
    }

    pub(crate) fn pop_element(&mut self, id: ObjectId) -> Value {
        let popped = match &mut self.get_mut(id).kind {
            ObjectKind::Array(items) => items.pop(),
            _ => None,
        };
        match popped {
            Some(value) => {
                self.used = self.used.saturating_sub(stored_slots(&value));
                value
            }
            None => Value::Undefined,
        }
    }

    // === Collection ===

    /// Whether a collection before the next run is worth its cost
    pub(crate) fn wants_collection(&self) -> bool {
        self.allocated >= COLLECTION_INTERVAL
            || (self.allocated > 0 && self.max_slots != 0 && self.used * 2 > self.max_slots)
    }

    /// Free every object unreachable from `roots` and the bindings of `scopes`
    ///
    /// Returns the number of objects freed.
    pub(crate) fn collect(&mut self, roots: &[Value], scopes: &[ScopeRef]) -> usize {
        let mut marked = vec![false; self.slots.len()];
        let mut objects: Vec<ObjectId> = roots.iter().filter_map(Value::as_object).collect();
        let mut scopes = scopes.to_vec();
        let mut traced_scopes: HashSet<*const RefCell<Scope>> = HashSet::new();

        loop {
            while let Some(id) = objects.pop() {
                let Some(object) = self.slot(id) else {
                    continue;
                };
                let index = id.index as usize;
                if marked[index] {
                    continue;
                }
                marked[index] = true;
                object.trace(&mut objects, &mut scopes);
            }

            let Some(scope) = scopes.pop() else {
                break;
            };
            if traced_scopes.insert(Rc::as_ptr(&scope)) {
                scopes.extend(Scope::trace(&scope, &mut objects));
            }
        }

        let mut freed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if marked[index] {
                continue;
            }
            let Some(object) = slot.object.take() else {
                continue;
            };
            let charged = object.slots().saturating_sub(slot.baseline);
            self.used = self.used.saturating_sub(charged);
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(index as u32);
            freed += 1;
        }

        self.live -= freed;
        self.allocated = 0;
        freed
    }

    // === Values ===

    pub(crate) fn error_value(
        &mut self,
        kind: ErrorKind,
        message: &str,
    ) -> Result<Value, TerminationReason> {
        let properties = error_properties(kind, message);
        let id = self.allocate(ObjectKind::Error(kind), properties)?;
        Ok(Value::Object(id))
    }

    pub(crate) fn host_error_value(&mut self, kind: ErrorKind, message: &str) -> Value {
        let properties = error_properties(kind, message);
        Value::Object(self.allocate_host(ObjectKind::Error(kind), properties))
    }

    /// Error class of `value`, when it is an error object of this arena
    pub fn error_kind(&self, value: &Value) -> Option<ErrorKind> {
        match &self.slot(value.as_object()?)?.kind {
            ObjectKind::Error(kind) => Some(*kind),
            _ => None,
        }
    }

    /// `typeof`
    pub fn type_of(&self, value: &Value) -> &'static str {
        match value {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Object(id) if self.get(*id).is_callable() => "function",
            Value::Object(_) => "object",
        }
    }

    pub(crate) fn to_number(&self, value: &Value) -> f64 {
        value
            .primitive_number()
            .unwrap_or_else(|| crate::value::string_to_number(&self.display(value)))
    }

    /// ToString, also used to render uncaught exceptions
    ///
    /// Output past the string limit is cut short, so callers that build
    /// script strings from it see an over-long result and reject it.
    pub fn display(&self, value: &Value) -> String {
        let mut out = String::new();
        let mut visits = self.max_string_length;
        self.write_display(value, 0, &mut out, &mut visits);
        out
    }

    fn write_display(&self, value: &Value, depth: usize, out: &mut String, visits: &mut usize) {
        if out.len() > self.max_string_length || *visits == 0 {
            return;
        }
        *visits -= 1;

        let id = match value {
            Value::Object(id) => *id,
            primitive => {
                out.push_str(&primitive.primitive_string().unwrap_or_default());
                return;
            }
        };
        if depth > MAX_NESTING {
            return;
        }

        let object = self.get(id);
        match &object.kind {
            ObjectKind::Ordinary => out.push_str("[object Object]"),
            ObjectKind::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if out.len() > self.max_string_length {
                        break;
                    }
                    if i > 0 {
                        out.push(',');
                    }
                    if !item.is_nullish() {
                        self.write_display(item, depth + 1, out, visits);
                    }
                }
            }
            ObjectKind::Function { decl, .. } => {
                out.push_str("function ");
                out.push_str(decl.name.as_deref().unwrap_or_default());
                out.push_str("() { [code] }");
            }
            ObjectKind::Native(_) => out.push_str("function () { [native code] }"),
            ObjectKind::Error(kind) => {
                let mut part = |key: &str| {
                    let mut text = String::new();
                    if let Some(value) = object.get(key) {
                        self.write_display(value, depth + 1, &mut text, visits);
                    }
                    text
                };
                let name = match object.get("name") {
                    Some(_) => part("name"),
                    None => kind.name().to_string(),
                };
                let message = part("message");
                out.push_str(&name);
                if !message.is_empty() {
                    out.push_str(": ");
                    out.push_str(&message);
                }
            }
        }
    }

    /// Serialize a value for crossing a message port or `JSON.stringify`
    ///
    /// `undefined` and non-finite numbers become `null`; functions can not be
    /// cloned. Documents larger than the string limit are rejected.
    pub(crate) fn to_json(&self, value: &Value) -> Result<JsonValue, String> {
        let mut allowance = self.max_string_length;
        self.to_json_nested(value, 0, &mut allowance)
    }

    fn to_json_nested(
        &self,
        value: &Value,
        depth: usize,
        allowance: &mut usize,
    ) -> Result<JsonValue, String> {
        if depth > MAX_NESTING {
            return Err("value is nested too deeply or is cyclic".to_string());
        }
        let size = match value {
            Value::String(s) => 1 + s.len(),
            _ => 1,
        };
        *allowance = allowance
            .checked_sub(size)
            .ok_or_else(|| "value is too large to serialize".to_string())?;

        let id = match value {
            Value::Undefined | Value::Null => return Ok(JsonValue::Null),
            Value::Bool(b) => return Ok(JsonValue::Bool(*b)),
            Value::Number(n) => return Ok(number_to_json(*n)),
            Value::String(s) => return Ok(JsonValue::String(s.clone())),
            Value::Object(id) => *id,
        };

        let object = self.get(id);
        match &object.kind {
            ObjectKind::Array(items) => items
                .iter()
                .map(|item| self.to_json_nested(item, depth + 1, allowance))
                .collect::<Result<Vec<_>, _>>()
                .map(JsonValue::Array),
            ObjectKind::Ordinary | ObjectKind::Error(_) => {
                let mut map = Map::new();
                for (key, item) in &object.properties {
                    if *item == Value::Undefined {
                        continue;
                    }
                    *allowance = allowance
                        .checked_sub(key.len())
                        .ok_or_else(|| "value is too large to serialize".to_string())?;
                    map.insert(key.clone(), self.to_json_nested(item, depth + 1, allowance)?);
                }
                Ok(JsonValue::Object(map))
            }
            ObjectKind::Function { .. } | ObjectKind::Native(_) => {
                Err("function could not be cloned".to_string())
            }
        }
    }

    /// Materialize a JSON document as script values
    pub(crate) fn from_json(&mut self, json: &JsonValue) -> Result<Value, TerminationReason> {
        let value = match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(s) => Value::String(s.clone()),
            JsonValue::Array(items) => {
                let values = items
                    .iter()
                    .map(|item| self.from_json(item))
                    .collect::<Result<Vec<_>, _>>()?;
                Value::Object(self.allocate(ObjectKind::Array(values), Vec::new())?)
            }
            JsonValue::Object(map) => {
                let mut properties = Vec::with_capacity(map.len());
                for (key, item) in map {
                    properties.push((key.clone(), self.from_json(item)?));
                }
                Value::Object(self.allocate(ObjectKind::Ordinary, properties)?)
            }
        };
        Ok(value)
    }

    /// Property key for an index expression
    pub(crate) fn property_key(&self, key: &Value) -> String {
        match key {
            Value::Number(n) => format_number(*n),
            other => self.display(other),
        }
    }

    /// Array element lookup for integral numeric keys
    pub(crate) fn element(&self, id: ObjectId, key: &Value) -> Option<Value> {
        let ObjectKind::Array(items) = &self.get(id).kind else {
            return None;
        };
        let index = match key {
            Value::Number(n) => array_index(*n)?,
            Value::String(s) => s.parse().ok()?,
            _ => return None,
        };
        Some(items.get(index).cloned().unwrap_or_default())
    }
}

/// Integral numbers serialize without a fraction, like `JSON.stringify`
fn number_to_json(n: f64) -> JsonValue {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return JsonValue::from(n as i64);
    }
    Number::from_f64(n).map_or(JsonValue::Null, JsonValue::Number)
}

fn error_properties(kind: ErrorKind, message: &str) -> Vec<(String, Value)> {
    vec![
        ("name".to_string(), Value::from(kind.name())),
        ("message".to_string(), Value::from(message)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn heap(max_objects: usize) -> Heap {
        Heap::new(&RuntimeLimits {
            heap_max_objects: max_objects,
            ..Default::default()
        })
    }

    #[test]
    fn test_limit_ignores_host_objects() {
        let mut heap = heap(1);
        heap.allocate_host(ObjectKind::Ordinary, Vec::new());
        heap.allocate_host(ObjectKind::Ordinary, Vec::new());

        assert!(heap.allocate(ObjectKind::Ordinary, Vec::new()).is_ok());
        assert_eq!(
            heap.allocate(ObjectKind::Ordinary, Vec::new()),
            Err(TerminationReason::MemoryLimit)
        );
        assert_eq!(heap.len(), 3);
    }

    #[test]
    fn test_collect_frees_unreachable_objects() {
        let mut heap = heap(4);
        let kept = heap.allocate(ObjectKind::Ordinary, Vec::new()).unwrap();
        let child = heap.allocate(ObjectKind::Ordinary, Vec::new()).unwrap();
        heap.set_property(kept, "child", Value::Object(child)).unwrap();
        let garbage = heap.allocate(ObjectKind::Ordinary, Vec::new()).unwrap();
        assert_eq!(heap.used_slots(), 4);
        assert_eq!(
            heap.allocate(ObjectKind::Ordinary, Vec::new()),
            Err(TerminationReason::MemoryLimit)
        );

        assert_eq!(heap.collect(&[Value::Object(kept)], &[]), 1);
        assert_eq!(heap.len(), 2);
        assert_eq!(heap.used_slots(), 3);
        assert!(heap.owns(&Value::Object(child)));
        assert!(!heap.owns(&Value::Object(garbage)));

        // the freed slot is reused under a new generation
        let fresh = heap.allocate(ObjectKind::Ordinary, Vec::new()).unwrap();
        assert_ne!(fresh, garbage);
        assert!(heap.owns(&Value::Object(fresh)));
        assert!(!heap.owns(&Value::Object(garbage)));
    }

    #[test]
    fn test_collect_keeps_host_objects_reachable_from_roots() {
        let mut heap = heap(1);
        let global = heap.allocate_host(ObjectKind::Ordinary, Vec::new());
        let port = heap.allocate_host(ObjectKind::Ordinary, Vec::new());
        heap.get_mut(global).set("self", Value::Object(global));

        assert_eq!(heap.collect(&[Value::Object(global)], &[]), 1);
        assert!(!heap.owns(&Value::Object(port)));
        assert_eq!(heap.used_slots(), 0);
    }

    #[test]
    fn test_array_growth_is_charged() {
        let mut heap = heap(10);
        let id = heap.allocate(ObjectKind::Array(Vec::new()), Vec::new()).unwrap();

        heap.set_element(id, 5, Value::from(1)).unwrap();
        assert_eq!(heap.used_slots(), 7);
        assert_eq!(
            heap.set_element(id, 9, Value::Null),
            Err(TerminationReason::MemoryLimit)
        );

        heap.set_length(id, 2).unwrap();
        assert_eq!(heap.used_slots(), 3);
        assert_eq!(heap.push_elements(id, vec![Value::Null; 3]), Ok(5));
        assert_eq!(heap.pop_element(id), Value::Null);
        assert_eq!(heap.used_slots(), 5);
    }

    #[test]
    fn test_stored_strings_are_charged_by_size() {
        let mut heap = heap(0);
        let id = heap.allocate(ObjectKind::Ordinary, Vec::new()).unwrap();

        heap.set_property(id, "s", Value::from("x".repeat(640))).unwrap();
        assert_eq!(heap.used_slots(), 12);
        heap.set_property(id, "s", Value::from("short")).unwrap();
        assert_eq!(heap.used_slots(), 2);
    }

    #[test]
    fn test_string_limit_bounds_display_and_json() {
        let mut heap = Heap::new(&RuntimeLimits {
            max_string_length: 8,
            ..Default::default()
        });
        let items = vec![Value::from("abcd"); 1000];
        let array = Value::Object(heap.allocate(ObjectKind::Array(items), Vec::new()).unwrap());

        let shown = heap.display(&array);
        assert!(shown.len() > 8 && shown.len() <= 13, "{shown}");
        assert!(heap.to_json(&array).is_err());
        assert!(heap.to_json(&Value::from("abc")).is_ok());
    }

    #[test]
    fn test_json_bridge_keeps_structure() {
        let mut heap = heap(0);
        let document = json!({ "id": 7, "tags": ["a", "b"], "nested": { "ok": true } });

        let value = heap.from_json(&document).unwrap();
        assert_eq!(heap.to_json(&value).unwrap(), document);
        assert_eq!(heap.display(&value), "[object Object]");
    }

    #[test]
    fn test_display_error_and_array() {
        let mut heap = heap(0);
        let error = heap.error_value(ErrorKind::TypeError, "nope").unwrap();
        assert_eq!(heap.display(&error), "TypeError: nope");

        let array = heap
            .allocate(
                ObjectKind::Array(vec![Value::from(1), Value::Null, Value::from("x")]),
                Vec::new(),
            )
            .unwrap();
        assert_eq!(heap.display(&Value::Object(array)), "1,,x");
    }

    #[test]
    fn test_cyclic_value_is_not_serializable() {
        let mut heap = heap(0);
        let id = heap.allocate(ObjectKind::Ordinary, Vec::new()).unwrap();
        heap.get_mut(id).set("me", Value::Object(id));

        assert!(heap.to_json(&Value::Object(id)).is_err());
    }

    #[test]
    fn test_numbers_serialize_like_json_stringify() {
        let heap = heap(0);
        assert_eq!(heap.to_json(&Value::from(3)).unwrap().to_string(), "3");
        assert_eq!(heap.to_json(&Value::Number(-0.0)).unwrap().to_string(), "0");
        assert_eq!(heap.to_json(&Value::Number(1.5)).unwrap().to_string(), "1.5");
        assert_eq!(heap.to_json(&Value::Number(f64::NAN)).unwrap(), JsonValue::Null);
    }
}
