//! The value registry: interned host values, their IDs and reference counts.

use std::collections::HashMap;

use gojs_core::{Error, Result};
use tracing::debug;

use crate::value::Value;

/// ID of the simulated JS global object.
pub const GLOBAL_ID: u32 = 5;

/// ID of the jsGo shim object.
pub const JSGO_ID: u32 = 6;

/// First ID handed out for interned values. Everything below is permanent
/// and never reference-counted.
const ID_START: u32 = 10;

/// Three mappings kept consistent: `values` (ID to value), `ids` (identity
/// signature to ID) and `refcounts`. For every interned ID all three hold an
/// entry; dropping the reference count to zero removes all three.
pub(crate) struct Registry {
    idcounter: u32,
    ids: HashMap<usize, u32>,
    values: HashMap<u32, Value>,
    refcounts: HashMap<u32, i32>,
}

impl Registry {
    pub fn new(global: Value, js_go: Value) -> Self {
        let values = HashMap::from([
            (0, Value::Number(f64::NAN)),
            (1, Value::Number(0.0)),
            (2, Value::Null),
            (3, Value::Bool(true)),
            (4, Value::Bool(false)),
            (GLOBAL_ID, global),
            (JSGO_ID, js_go),
        ]);

        Self {
            idcounter: ID_START,
            ids: HashMap::new(),
            values,
            refcounts: HashMap::new(),
        }
    }

    pub fn get(&self, id: u32) -> Option<Value> {
        self.values.get(&id).cloned()
    }

    /// Interns `v` and raises its reference count. Returns the ID and the
    /// NaN-box type tag to store alongside it.
    ///
    /// The distinguished constants never reach this point; a value without
    /// an identity signature here is a host-side programming error.
    pub fn store(&mut self, v: &Value) -> (u32, u32) {
        let signature = v
            .signature()
            .unwrap_or_else(|| panic!("{}: unknown value type", v.kind()));

        let id = match self.ids.get(&signature) {
            Some(&id) => id,
            None => {
                let id = self.idcounter;
                self.idcounter += 1;

                self.values.insert(id, v.clone());
                self.refcounts.insert(id, 0);
                self.ids.insert(signature, id);
                id
            }
        };

        let refcount = self.refcounts.entry(id).or_insert(0);
        *refcount += 1;

        debug!(
            "   storeValue(id={id} typeFlag={} refcount={refcount} signature={signature:#x})",
            v.type_tag()
        );

        (id, v.type_tag())
    }

    /// Drops one reference to `id`; tears the value down at zero.
    pub fn finalize(&mut self, id: u32) -> Result<()> {
        let refcount = self.refcounts.get_mut(&id).ok_or(Error::MissingRef(id))?;
        *refcount -= 1;

        if *refcount == 0 {
            self.refcounts.remove(&id);

            let v = self.values.remove(&id).ok_or(Error::MissingRef(id))?;
            if let Some(signature) = v.signature() {
                self.ids.remove(&signature);
            }

            debug!("{id}: deleting object");
        }

        Ok(())
    }

    #[cfg(test)]
    pub fn refcount(&self, id: u32) -> Option<i32> {
        self.refcounts.get(&id).copied()
    }

    #[cfg(test)]
    pub fn check_invariants(&self) {
        for (&id, v) in &self.values {
            if id < ID_START {
                assert!(!self.refcounts.contains_key(&id), "{id}: permanent ID refcounted");
                continue;
            }

            let signature = v.signature().expect("interned value without signature");
            assert_eq!(self.ids.get(&signature), Some(&id));
            assert!(self.refcounts[&id] >= 1, "{id}: live entry with refcount < 1");
        }
        for (&signature, &id) in &self.ids {
            let v = self.values.get(&id).expect("dangling id entry");
            assert_eq!(v.signature(), Some(signature));
        }
    }
}
