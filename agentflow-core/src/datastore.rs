//! Thread-safe key-value store with atomic compound operations.
//!
//! Keys support dotted nested-path access (`"a.b.c"`) the way the original
//! Python implementation's dict-of-dicts did: the first segment names a
//! top-level slot, remaining segments index into nested JSON objects.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;

/// A thread-safe mapping of string keys to JSON values, with atomic
/// `init`/`update`/`increment`/`append`/`concat`/`operate` primitives.
///
/// Each [`crate::Context`] scope (local, execution, debug) is backed by one
/// independent `DataStore`; callers must not assume atomicity *across*
/// stores, only within one.
pub struct DataStore {
    inner: Mutex<HashMap<String, Value>>,
}

fn split_path(key: &str) -> (&str, Vec<&str>) {
    let mut parts = key.split('.');
    let first = parts.next().unwrap_or("");
    (first, parts.collect())
}

fn get_path(map: &HashMap<String, Value>, key: &str) -> Option<Value> {
    let (first, rest) = split_path(key);
    let mut cur = map.get(first)?;
    for seg in rest {
        cur = cur.get(seg)?;
    }
    Some(cur.clone())
}

fn set_path(map: &mut HashMap<String, Value>, key: &str, value: Value) {
    let (first, rest) = split_path(key);
    if rest.is_empty() {
        map.insert(first.to_string(), value);
        return;
    }
    let mut cur = map
        .entry(first.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    let last = rest.len() - 1;
    for (i, seg) in rest.iter().enumerate() {
        if !cur.is_object() {
            *cur = Value::Object(Map::new());
        }
        let obj = cur.as_object_mut().expect("just normalized to object");
        if i == last {
            obj.insert((*seg).to_string(), value);
            return;
        }
        cur = obj
            .entry((*seg).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

fn delete_path(map: &mut HashMap<String, Value>, key: &str) -> Option<Value> {
    let (first, rest) = split_path(key);
    if rest.is_empty() {
        return map.remove(first);
    }
    let last = rest.len() - 1;
    let mut cur = map.get_mut(first)?;
    for (i, seg) in rest.iter().enumerate() {
        let obj = cur.as_object_mut()?;
        if i == last {
            return obj.remove(*seg);
        }
        cur = obj.get_mut(*seg)?;
    }
    None
}

impl DataStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Read a value, or `None` if the key (or any nested segment) is absent.
    pub fn get(&self, key: &str) -> Option<Value> {
        get_path(&self.lock(), key)
    }

    /// Read a value, falling back to `default` if absent.
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    /// Unconditionally write a value.
    pub fn set(&self, key: &str, value: Value) {
        set_path(&mut self.lock(), key, value);
    }

    /// Whether the key resolves to a value.
    pub fn contains(&self, key: &str) -> bool {
        get_path(&self.lock(), key).is_some()
    }

    /// Remove a key, returning its prior value if present.
    pub fn delete(&self, key: &str) -> Option<Value> {
        delete_path(&mut self.lock(), key)
    }

    /// Set `key` to `value` only if it is currently absent. Returns the
    /// value now stored at `key` either way.
    pub fn init(&self, key: &str, value: Value) -> Value {
        let mut guard = self.lock();
        if let Some(existing) = get_path(&guard, key) {
            existing
        } else {
            set_path(&mut guard, key, value.clone());
            value
        }
    }

    /// Atomically replace `key` with `f(current_value)`, returning the new
    /// value. `f` must not re-enter the store.
    pub fn update(&self, key: &str, f: impl FnOnce(Option<Value>) -> Value) -> Value {
        let mut guard = self.lock();
        let current = get_path(&guard, key);
        let next = f(current);
        set_path(&mut guard, key, next.clone());
        next
    }

    /// Atomically add `n` to the numeric value at `key`, initializing to 0
    /// if absent. Returns the new value.
    pub fn increment(&self, key: &str, n: i64) -> i64 {
        let mut guard = self.lock();
        let current = get_path(&guard, key)
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        let next = current + n;
        set_path(&mut guard, key, Value::from(next));
        next
    }

    /// Atomically subtract `n` from the numeric value at `key`,
    /// initializing to 0 if absent. Returns the new value.
    pub fn decrement(&self, key: &str, n: i64) -> i64 {
        self.increment(key, -n)
    }

    /// Atomically push `value` onto the list at `key`, initializing to `[]`
    /// if absent.
    pub fn append(&self, key: &str, value: Value) {
        let mut guard = self.lock();
        let mut arr = match get_path(&guard, key) {
            Some(Value::Array(a)) => a,
            Some(other) => vec![other],
            None => Vec::new(),
        };
        arr.push(value);
        set_path(&mut guard, key, Value::Array(arr));
    }

    /// Atomically extend the list, or append to the string, at `key`,
    /// based on its current type. Initializes to `[]` or `""` sensibly if
    /// absent (a string `value` initializes a string, anything else
    /// initializes a list).
    pub fn concat(&self, key: &str, value: Value) {
        let mut guard = self.lock();
        match get_path(&guard, key) {
            Some(Value::Array(mut arr)) => {
                match value {
                    Value::Array(more) => arr.extend(more),
                    other => arr.push(other),
                }
                set_path(&mut guard, key, Value::Array(arr));
            }
            Some(Value::String(mut s)) => {
                match value {
                    Value::String(more) => s.push_str(&more),
                    other => s.push_str(&more_to_string(&other)),
                }
                set_path(&mut guard, key, Value::String(s));
            }
            Some(other) => {
                // Existing scalar of another type: promote to a list.
                let mut arr = vec![other];
                match value {
                    Value::Array(more) => arr.extend(more),
                    other => arr.push(other),
                }
                set_path(&mut guard, key, Value::Array(arr));
            }
            None => match value {
                Value::String(_) => set_path(&mut guard, key, value),
                Value::Array(_) => set_path(&mut guard, key, value),
                other => set_path(&mut guard, key, Value::Array(vec![other])),
            },
        }
    }

    /// Atomically read-modify-write a set of keys together. `f` receives a
    /// scratch map pre-populated with the current value of each requested
    /// key (absent keys are simply missing from the map) and must not
    /// call back into this store.
    pub fn operate(&self, keys: &[&str], f: impl FnOnce(&mut HashMap<String, Value>)) {
        let mut guard = self.lock();
        let mut scratch = HashMap::new();
        for k in keys {
            if let Some(v) = get_path(&guard, k) {
                scratch.insert((*k).to_string(), v);
            }
        }
        f(&mut scratch);
        for k in keys {
            match scratch.remove(*k) {
                Some(v) => set_path(&mut guard, k, v),
                None => {
                    delete_path(&mut guard, k);
                }
            }
        }
    }

    /// Snapshot the whole store as a JSON object (used by
    /// `Context::to_json`).
    pub fn to_json(&self) -> Value {
        let guard = self.lock();
        Value::Object(guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

fn more_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}
