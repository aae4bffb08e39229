//! The stack-pointer ABI: one handler per imported function.
//!
//! Every import arrives as `(sp: u32)`. Arguments sit at fixed 8-byte slots
//! above `sp`; results are written back into the argument area. Handlers
//! never surface errors to the engine: failures are logged and the guest
//! observes them through a success byte, an ENOSYS callback, or missing
//! data. Calls that run guest code (`valueCall`, `valueInvoke`, `valueNew`,
//! `valueGet`) re-fetch the stack pointer before writing results, because
//! the guest may have moved its stack in the meantime.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use gojs_core::{Error, Result};
use parking_lot::{Mutex, RwLock};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, error};

use crate::globals;
use crate::instance::Instance;
use crate::registry::{Registry, GLOBAL_ID, JSGO_ID};
use crate::value::{FuncScope, Value};
use crate::wapc::InvokeContext;

/// NaN header marking a slot that carries a value-table ID instead of a
/// number. The lower two bits of the header word hold the type tag.
pub(crate) const NAN_HEAD: u32 = 0x7FF8_0000;

/// A property key: a name or an array index.
#[derive(Debug)]
pub(crate) enum Key<'a> {
    Name(&'a str),
    Index(i64),
}

/// Implements the JavaScript imports that a program compiled with
/// `GOOS=js GOARCH=wasm` expects from its host.
///
/// One `Module` belongs to one guest instance. All state lives behind short
/// critical sections; no lock is held across a call back into the guest, so
/// imports may re-enter freely.
pub struct Module {
    registry: RwLock<Registry>,
    pub(crate) invoke_ctx: Mutex<InvokeContext>,
    started: Instant,
}

impl Module {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry::new(globals::global(), globals::js_go())),
            invoke_ctx: Mutex::new(InvokeContext::default()),
            started: Instant::now(),
        }
    }

    /// Calls a function registered on the global object, typically one the
    /// guest exposed through `js.FuncOf()`.
    pub fn call(&self, inst: &mut dyn Instance, name: &str, args: &[Value]) -> Result<Value> {
        let global = self.global();
        let Value::Object(obj) = &global else {
            return Err(Error::Type("global is not an object".to_owned()));
        };

        let prop = obj.properties.read().get(name).cloned();
        let Some(f) = prop else {
            return Err(Error::NotFound(name.to_owned()));
        };

        self.reflect_construct(inst, &f, args)
    }

    pub(crate) fn global(&self) -> Value {
        self.registry.read().get(GLOBAL_ID).unwrap_or(Value::Null)
    }

    pub(crate) fn js_go(&self) -> Value {
        self.registry.read().get(JSGO_ID).unwrap_or(Value::Null)
    }

    // ------------------------------------------------------------------
    // Value codec
    // ------------------------------------------------------------------

    /// Reads the 8-byte slot at `addr`: a raw zero is nil, any other
    /// non-NaN float is a number, and a NaN-boxed slot refers to the value
    /// table through its lower word.
    fn load_value(&self, inst: &mut dyn Instance, addr: u32) -> Result<Value> {
        let f = inst.get_f64(addr)?;
        if f == 0.0 {
            return Ok(Value::Null);
        }
        if !f.is_nan() {
            return Ok(Value::Number(f));
        }

        let id = inst.get_u32(addr)?;
        debug!("   loadValue(id={id})");

        Ok(self.registry.read().get(id).unwrap_or(Value::Null))
    }

    fn store_value(&self, inst: &mut dyn Instance, addr: u32, v: Value) -> Result<()> {
        debug!("   storeValue(addr={addr} v={v:?})");

        match &v {
            Value::Number(n) => {
                let n = *n;
                return if n == 0.0 {
                    self.set_nan(inst, addr, 1)
                } else if n.is_nan() {
                    self.set_nan(inst, addr, 0)
                } else {
                    inst.set_f64(addr, n)
                };
            }
            Value::Null => return self.set_nan(inst, addr, 2),
            Value::Bool(true) => return self.set_nan(inst, addr, 3),
            Value::Bool(false) => return self.set_nan(inst, addr, 4),
            _ => {}
        }

        let (id, flag) = self.registry.write().store(&v);
        inst.set_u32(addr + 4, NAN_HEAD | flag)?;
        inst.set_u32(addr, id)
    }

    fn set_nan(&self, inst: &mut dyn Instance, addr: u32, id: u32) -> Result<()> {
        inst.set_u32(addr + 4, NAN_HEAD)?;
        inst.set_u32(addr, id)
    }

    /// Reads a slice descriptor (pointer, length) at `addr`.
    fn load_slice_desc(&self, inst: &mut dyn Instance, addr: u32) -> Result<(u32, u32)> {
        let ptr = inst.get_i64(addr)?;
        let len = inst.get_i64(addr + 8)?;
        debug!("   loadSlice(offset={ptr} length={len})");

        Ok((ptr as u32, len as u32))
    }

    fn load_bytes(&self, inst: &mut dyn Instance, addr: u32) -> Result<Vec<u8>> {
        let (ptr, len) = self.load_slice_desc(inst, addr)?;
        Ok(inst.mem(ptr, len)?.to_vec())
    }

    fn load_string(&self, inst: &mut dyn Instance, addr: u32) -> Result<String> {
        let data = self.load_bytes(inst, addr)?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    /// Reads a slice of value slots referenced by the descriptor at `addr`.
    fn load_values(&self, inst: &mut dyn Instance, addr: u32) -> Result<Vec<Value>> {
        let (ptr, len) = self.load_slice_desc(inst, addr)?;

        let mut values = Vec::with_capacity(len as usize);
        for i in 0..len {
            values.push(self.load_value(inst, ptr + i * 8)?);
        }

        Ok(values)
    }

    // ------------------------------------------------------------------
    // Reflection
    // ------------------------------------------------------------------

    pub(crate) fn reflect_get(&self, v: &Value, key: Key<'_>) -> Result<Value> {
        debug!("   reflectGet(key={key:?})");

        // A nil receiver addresses the global object.
        let global;
        let v = match v {
            Value::Null => {
                global = self.global();
                &global
            }
            _ => v,
        };

        match key {
            Key::Name(name) => match v {
                Value::Object(o) => {
                    Ok(o.properties.read().get(name).cloned().unwrap_or(Value::Null))
                }
                Value::Properties(p) => Ok(p.read().get(name).cloned().unwrap_or(Value::Null)),
                other => Err(Error::Type(format!("{}: not an object", other.kind()))),
            },
            Key::Index(index) => match v {
                Value::Array(a) => {
                    let a = a.read();
                    if index < 0 || index >= a.len() as i64 {
                        return Err(Error::OutOfRange);
                    }
                    Ok(a[index as usize].clone())
                }
                other => Err(Error::Type(format!("{}: not an array", other.kind()))),
            },
        }
    }

    pub(crate) fn reflect_set(&self, v: &Value, key: Key<'_>, value: Value) -> Result<()> {
        debug!("   reflectSet(key={key:?} value={value:?})");

        let global;
        let v = match v {
            Value::Null => {
                global = self.global();
                &global
            }
            _ => v,
        };

        match key {
            Key::Name(name) => match v {
                Value::Object(o) => {
                    o.properties.write().insert(name.to_owned(), value);
                    Ok(())
                }
                Value::Properties(p) => {
                    p.write().insert(name.to_owned(), value);
                    Ok(())
                }
                other => Err(Error::Type(format!("{}: not an object", other.kind()))),
            },
            Key::Index(index) => match v {
                Value::Array(a) => {
                    let mut a = a.write();
                    if index < 0 || index >= a.len() as i64 {
                        return Err(Error::OutOfRange);
                    }
                    a[index as usize] = value;
                    Ok(())
                }
                other => Err(Error::Type(format!("{}: not an array", other.kind()))),
            },
        }
    }

    pub(crate) fn reflect_delete(&self, v: &Value, key: Key<'_>) -> Result<()> {
        debug!("   reflectDelete(key={key:?})");

        let global;
        let v = match v {
            Value::Null => {
                global = self.global();
                &global
            }
            _ => v,
        };

        match key {
            Key::Name(name) => match v {
                Value::Object(o) => {
                    o.properties.write().remove(name);
                    Ok(())
                }
                Value::Properties(p) => {
                    p.write().remove(name);
                    Ok(())
                }
                other => Err(Error::Type(format!("{}: not an object", other.kind()))),
            },
            Key::Index(index) => match v {
                // Deleting an array index shifts the remaining elements left.
                Value::Array(a) => {
                    let mut a = a.write();
                    if index < 0 || index >= a.len() as i64 {
                        return Err(Error::OutOfRange);
                    }
                    a.remove(index as usize);
                    Ok(())
                }
                other => Err(Error::Type(format!("{}: not an array", other.kind()))),
            },
        }
    }

    pub(crate) fn reflect_apply(
        &self,
        inst: &mut dyn Instance,
        v: &Value,
        name: &str,
        args: &[Value],
    ) -> Result<Value> {
        debug!("   reflectApply(name={name})");

        let f = self.reflect_get(v, Key::Name(name))?;
        self.reflect_construct(inst, &f, args)
    }

    pub(crate) fn reflect_construct(
        &self,
        inst: &mut dyn Instance,
        v: &Value,
        args: &[Value],
    ) -> Result<Value> {
        debug!("   reflectConstruct(v={v:?})");

        let Value::Function(f) = v else {
            return Err(Error::Type(format!("{}: not a function", v.kind())));
        };

        let f = f.clone();
        let mut scope = FuncScope {
            module: self,
            instance: inst,
        };

        Ok(f.call(&mut scope, args))
    }

    // ------------------------------------------------------------------
    // Imports: runtime.*
    // ------------------------------------------------------------------

    fn wrap(&self, name: &str, f: impl FnOnce() -> Result<()>) {
        debug!("{name}");
        if let Err(err) = f() {
            error!("{name}: {err}");
        }
    }

    fn not_implemented(&self, name: &str) {
        debug!("{name}: not implemented");
    }

    /// `runtime.wasmExit`
    pub fn wasm_exit(&self, inst: &mut dyn Instance, sp: u32) {
        self.wrap("runtime.wasmExit", || {
            let code = inst.get_u32(sp + 8)?;
            inst.exit(code as i32);
            Ok(())
        });
    }

    /// `runtime.wasmWrite`
    pub fn wasm_write(&self, inst: &mut dyn Instance, sp: u32) {
        self.wrap("runtime.wasmWrite", || {
            let fd = inst.get_i64(sp + 8)?;
            let ptr = inst.get_i64(sp + 16)?;
            let len = inst.get_u32(sp + 24)?;

            let buf = inst.mem(ptr as u32, len)?.to_vec();
            inst.write(fd, &buf)?;
            Ok(())
        });
    }

    /// `runtime.resetMemoryDataView`
    ///
    /// Hosts that grow guest memory re-bind their memory view externally.
    pub fn reset_memory_data_view(&self, _inst: &mut dyn Instance, _sp: u32) {
        self.not_implemented("runtime.resetMemoryDataView");
    }

    /// `runtime.nanotime1`
    pub fn nanotime1(&self, inst: &mut dyn Instance, sp: u32) {
        self.wrap("runtime.nanotime1", || {
            inst.set_i64(sp + 8, self.started.elapsed().as_nanos() as i64)
        });
    }

    /// `runtime.walltime`
    pub fn walltime(&self, inst: &mut dyn Instance, sp: u32) {
        self.wrap("runtime.walltime", || {
            let msec = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as i64;

            inst.set_i64(sp + 8, msec / 1000)?;
            inst.set_u32(sp + 16, ((msec % 1000) * 1_000_000) as u32)
        });
    }

    /// `runtime.scheduleTimeoutEvent`
    pub fn schedule_timeout_event(&self, _inst: &mut dyn Instance, _sp: u32) {
        self.not_implemented("runtime.scheduleTimeoutEvent");
    }

    /// `runtime.clearTimeoutEvent`
    pub fn clear_timeout_event(&self, _inst: &mut dyn Instance, _sp: u32) {
        self.not_implemented("runtime.clearTimeoutEvent");
    }

    /// `runtime.getRandomData`
    pub fn get_random_data(&self, inst: &mut dyn Instance, sp: u32) {
        self.wrap("runtime.getRandomData", || {
            let (ptr, len) = self.load_slice_desc(inst, sp + 8)?;
            let data = inst.mem_mut(ptr, len)?;
            OsRng.fill_bytes(data);
            Ok(())
        });
    }

    // ------------------------------------------------------------------
    // Imports: syscall/js.*
    // ------------------------------------------------------------------

    /// `syscall/js.finalizeRef`
    pub fn finalize_ref(&self, inst: &mut dyn Instance, sp: u32) {
        self.wrap("syscall/js.finalizeRef", || {
            let id = inst.get_u32(sp + 8)?;
            self.registry.write().finalize(id)
        });
    }

    /// `syscall/js.stringVal`
    pub fn string_val(&self, inst: &mut dyn Instance, sp: u32) {
        self.wrap("syscall/js.stringVal", || {
            let s = self.load_string(inst, sp + 8)?;
            self.store_value(inst, sp + 24, Value::from(s))
        });
    }

    /// `syscall/js.valueGet`
    pub fn value_get(&self, inst: &mut dyn Instance, sp: u32) {
        self.wrap("syscall/js.valueGet", || {
            let v = self.load_value(inst, sp + 8)?;
            let name = self.load_string(inst, sp + 16)?;

            let result = self.reflect_get(&v, Key::Name(&name))?;

            let result_sp = inst.get_sp()?;
            self.store_value(inst, result_sp + 32, result)
        });
    }

    /// `syscall/js.valueSet`
    pub fn value_set(&self, inst: &mut dyn Instance, sp: u32) {
        self.wrap("syscall/js.valueSet", || {
            let v = self.load_value(inst, sp + 8)?;
            let name = self.load_string(inst, sp + 16)?;
            let value = self.load_value(inst, sp + 32)?;

            self.reflect_set(&v, Key::Name(&name), value)
        });
    }

    /// `syscall/js.valueDelete`
    pub fn value_delete(&self, inst: &mut dyn Instance, sp: u32) {
        self.wrap("syscall/js.valueDelete", || {
            let v = self.load_value(inst, sp + 8)?;
            let name = self.load_string(inst, sp + 16)?;

            self.reflect_delete(&v, Key::Name(&name))
        });
    }

    /// `syscall/js.valueIndex`
    pub fn value_index(&self, inst: &mut dyn Instance, sp: u32) {
        self.wrap("syscall/js.valueIndex", || {
            let v = self.load_value(inst, sp + 8)?;
            let index = inst.get_i64(sp + 16)?;

            let result = self.reflect_get(&v, Key::Index(index))?;
            self.store_value(inst, sp + 24, result)
        });
    }

    /// `syscall/js.valueSetIndex`
    pub fn value_set_index(&self, inst: &mut dyn Instance, sp: u32) {
        self.wrap("syscall/js.valueSetIndex", || {
            let v = self.load_value(inst, sp + 8)?;
            let index = inst.get_i64(sp + 16)?;
            let value = self.load_value(inst, sp + 24)?;

            self.reflect_set(&v, Key::Index(index), value)
        });
    }

    /// `syscall/js.valueCall`
    pub fn value_call(&self, inst: &mut dyn Instance, sp: u32) {
        debug!("syscall/js.valueCall");

        let result = (|| {
            let v = self.load_value(inst, sp + 8)?;
            let name = self.load_string(inst, sp + 16)?;
            let args = self.load_values(inst, sp + 32)?;

            self.reflect_apply(inst, &v, &name, &args)
        })();

        self.finish_call(inst, "syscall/js.valueCall", result, 56, 64);
    }

    /// `syscall/js.valueInvoke`
    pub fn value_invoke(&self, inst: &mut dyn Instance, sp: u32) {
        debug!("syscall/js.valueInvoke");

        let result = (|| {
            let v = self.load_value(inst, sp + 8)?;
            let args = self.load_values(inst, sp + 16)?;

            self.reflect_construct(inst, &v, &args)
        })();

        self.finish_call(inst, "syscall/js.valueInvoke", result, 40, 48);
    }

    /// `syscall/js.valueNew`
    pub fn value_new(&self, inst: &mut dyn Instance, sp: u32) {
        debug!("syscall/js.valueNew");

        let result = (|| {
            let v = self.load_value(inst, sp + 8)?;
            let args = self.load_values(inst, sp + 16)?;

            self.reflect_construct(inst, &v, &args)
        })();

        self.finish_call(inst, "syscall/js.valueNew", result, 40, 48);
    }

    /// Writes back the outcome of a call/invoke/new import. The stack
    /// pointer is re-fetched first; a failure stores the error rendered as a
    /// string, followed by a zero success byte.
    fn finish_call(
        &self,
        inst: &mut dyn Instance,
        name: &str,
        result: Result<Value>,
        value_off: u32,
        flag_off: u32,
    ) {
        let result_sp = match inst.get_sp() {
            Ok(sp) => sp,
            Err(err) => {
                error!("{name}: {err}");
                return;
            }
        };

        match result {
            Ok(result) => {
                let written = self
                    .store_value(inst, result_sp + value_off, result)
                    .and_then(|_| inst.set_u8(result_sp + flag_off, 1));
                if let Err(err) = written {
                    error!("{name}: {err}");
                }
            }
            Err(err) => {
                error!("{name}: {err}");

                let message = Value::from(err.to_string());
                if self.store_value(inst, result_sp + value_off, message).is_err() {
                    return;
                }
                let _ = inst.set_u8(result_sp + flag_off, 0);
            }
        }
    }

    /// `syscall/js.valueLength`
    pub fn value_length(&self, inst: &mut dyn Instance, sp: u32) {
        self.wrap("syscall/js.valueLength", || {
            let v = self.load_value(inst, sp + 8)?;

            let length = match &v {
                Value::Array(a) => a.read().len(),
                Value::Bytes(b) => b.read().len(),
                Value::String(s) => s.len(),
                other => {
                    return Err(Error::Type(format!(
                        "{}: unknown type for valueLength",
                        other.kind()
                    )))
                }
            };

            inst.set_i64(sp + 16, length as i64)
        });
    }

    /// `syscall/js.valuePrepareString`
    pub fn value_prepare_string(&self, inst: &mut dyn Instance, sp: u32) {
        self.wrap("syscall/js.valuePrepareString", || {
            let v = self.load_value(inst, sp + 8)?;

            let s = match &v {
                Value::Bool(b) => Value::from(b.to_string()),
                Value::Number(n) => Value::from(format!("{n}")),
                Value::String(_) => v.clone(),
                other => {
                    return Err(Error::Type(format!(
                        "{}: unable to convert type to string",
                        other.kind()
                    )))
                }
            };

            let length = s.as_str().map_or(0, str::len);
            self.store_value(inst, sp + 16, s)?;
            inst.set_i64(sp + 24, length as i64)
        });
    }

    /// `syscall/js.valueLoadString`
    pub fn value_load_string(&self, inst: &mut dyn Instance, sp: u32) {
        self.wrap("syscall/js.valueLoadString", || {
            let v = self.load_value(inst, sp + 8)?;
            let Value::String(s) = &v else {
                return Err(Error::Type(format!("{}: type not a string", v.kind())));
            };

            let (ptr, len) = self.load_slice_desc(inst, sp + 16)?;
            let dst = inst.mem_mut(ptr, len)?;

            let n = dst.len().min(s.len());
            dst[..n].copy_from_slice(&s.as_bytes()[..n]);
            Ok(())
        });
    }

    /// `syscall/js.valueInstanceOf`
    pub fn value_instance_of(&self, inst: &mut dyn Instance, sp: u32) {
        self.wrap("syscall/js.valueInstanceOf", || {
            let v = self.load_value(inst, sp + 8)?;
            let t = self.load_value(inst, sp + 16)?;

            let name = match &t {
                Value::Function(f) => f.name(),
                _ => None,
            };

            let matches = matches!(
                (&v, name),
                (Value::Array(_), Some("Array"))
                    | (Value::Object(_), Some("Object"))
                    | (Value::Bytes(_), Some("Uint8Array"))
            );

            inst.set_u8(sp + 24, matches as u8)
        });
    }

    /// `syscall/js.copyBytesToGo`
    pub fn copy_bytes_to_go(&self, inst: &mut dyn Instance, sp: u32) {
        self.wrap("syscall/js.copyBytesToGo", || {
            let (ptr, len) = self.load_slice_desc(inst, sp + 8)?;

            let dst_empty = inst.mem(ptr, len)?.is_empty();

            let v = self.load_value(inst, sp + 32)?;
            let Value::Bytes(src) = &v else {
                return Err(Error::Type(format!("src: {} not a Uint8Array", v.kind())));
            };
            let src = src.read();

            if dst_empty || src.is_empty() {
                return inst.set_u8(sp + 48, 0);
            }

            let dst = inst.mem_mut(ptr, len)?;
            let n = dst.len().min(src.len());
            dst[..n].copy_from_slice(&src[..n]);

            inst.set_i64(sp + 40, n as i64)?;
            inst.set_u8(sp + 48, 1)
        });
    }

    /// `syscall/js.copyBytesToJS`
    pub fn copy_bytes_to_js(&self, inst: &mut dyn Instance, sp: u32) {
        self.wrap("syscall/js.copyBytesToJS", || {
            let v = self.load_value(inst, sp + 8)?;
            let Value::Bytes(dst) = &v else {
                return Err(Error::Type(format!("dst: {} not a Uint8Array", v.kind())));
            };

            let src = self.load_bytes(inst, sp + 16)?;

            let mut dst = dst.write();
            if dst.is_empty() || src.is_empty() {
                drop(dst);
                return inst.set_u8(sp + 48, 0);
            }

            let n = dst.len().min(src.len());
            dst[..n].copy_from_slice(&src[..n]);
            drop(dst);

            inst.set_i64(sp + 40, n as i64)?;
            inst.set_u8(sp + 48, 1)
        });
    }

    /// `debug`
    pub fn debug(&self, _inst: &mut dyn Instance, _sp: u32) {
        self.not_implemented("debug");
    }
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}
