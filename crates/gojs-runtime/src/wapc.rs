//! The waPC layer: guest invocation and the `wapc` global namespace.
//!
//! A waPC exchange is fully synchronous. `Invoke` starts the guest through
//! the ordinary value-call path; the guest reports back by calling
//! `__guest_response` or `__guest_error` on the same stack before
//! `__guest_call` returns. The invocation context is therefore a one-shot
//! latch that is filled during the call and read right after it.

use gojs_core::{Error, Result};

use crate::instance::Instance;
use crate::module::Module;
use crate::value::{Properties, Value};

/// Response state collected from the guest during an `invoke` call.
#[derive(Default)]
pub(crate) struct InvokeContext {
    response: Option<Vec<u8>>,
    error: Option<String>,
}

impl Module {
    /// Calls `operation` on the guest with the given payload and returns the
    /// guest's response payload.
    pub fn invoke(&self, inst: &mut dyn Instance, operation: &str, payload: &[u8]) -> Result<Vec<u8>> {
        *self.invoke_ctx.lock() = InvokeContext::default();

        let result = self.call(
            inst,
            "__guest_call",
            &[Value::from(operation), Value::from(payload.to_vec())],
        )?;

        match result {
            Value::Bool(true) => Ok(self.invoke_ctx.lock().response.take().unwrap_or_default()),
            Value::Bool(false) => Err(Error::Guest(
                self.invoke_ctx.lock().error.take().unwrap_or_default(),
            )),
            other => Err(Error::Type(format!(
                "{}: unexpected response type from __guest_call",
                other.kind()
            ))),
        }
    }

    pub(crate) fn guest_response(&self, data: Vec<u8>) {
        self.invoke_ctx.lock().response = Some(data);
    }

    pub(crate) fn guest_error(&self, message: String) {
        self.invoke_ctx.lock().error = Some(message);
    }
}

/// Builds the `wapc` object on the global.
pub(crate) fn namespace() -> Value {
    let mut props = Properties::new();

    props.insert(
        "__guest_response".to_owned(),
        Value::function(|scope, args| {
            if args.len() == 1 {
                if let Value::Bytes(data) = &args[0] {
                    scope.module.guest_response(data.read().clone());
                }
            }
            Value::Null
        }),
    );

    props.insert(
        "__guest_error".to_owned(),
        Value::function(|scope, args| {
            if args.len() == 1 {
                if let Value::Bytes(data) = &args[0] {
                    scope
                        .module
                        .guest_error(String::from_utf8_lossy(&data.read()).into_owned());
                }
            }
            Value::Null
        }),
    );

    props.insert(
        "__host_call".to_owned(),
        Value::function(|scope, args| {
            let result = host_call(scope.instance, args);
            match result {
                Ok(response) => Value::array(vec![Value::from(response), Value::Null]),
                Err(err) => Value::array(vec![Value::Null, Value::from(err.to_string())]),
            }
        }),
    );

    Value::object(props)
}

fn host_call(inst: &mut dyn Instance, args: &[Value]) -> Result<Vec<u8>> {
    let [binding, namespace, operation, payload] = args else {
        return Err(Error::Type(format!(
            "{}: unexpected number of arguments for __host_call",
            args.len()
        )));
    };

    let as_text = |arg: &Value| -> Result<String> {
        match arg {
            Value::Bytes(data) => Ok(String::from_utf8_lossy(&data.read()).into_owned()),
            other => Err(Error::Type(format!(
                "{}: unexpected type for __host_call parameter",
                other.kind()
            ))),
        }
    };

    let binding = as_text(binding)?;
    let namespace = as_text(namespace)?;
    let operation = as_text(operation)?;

    let Value::Bytes(payload) = payload else {
        return Err(Error::Type(format!(
            "{}: unexpected type for payload parameter",
            payload.kind()
        )));
    };
    let payload = payload.read().clone();

    inst.host_call(&binding, &namespace, &operation, &payload)
}
