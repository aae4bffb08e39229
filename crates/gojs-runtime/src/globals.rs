//! The pre-populated global object graph the guest observes.

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::error;

use crate::value::{Properties, Value};
use crate::wapc;

/// File-system methods that only ever report ENOSYS to their callback.
const FS_STUBS: &[&str] = &[
    "chmod", "chown", "close", "fchmod", "fchown", "fstat", "fsync", "ftruncate", "lchown",
    "link", "lstat", "mkdir", "open", "read", "readdir", "readlink", "rename", "rmdir", "stat",
    "symlink", "truncate", "unlink", "utimes",
];

/// The object delivered to guest callbacks for unsupported operations.
pub(crate) fn enosys() -> Value {
    let mut props = Properties::new();
    props.insert("code".to_owned(), Value::from("ENOSYS"));
    Value::object(props)
}

/// Builds the global object (ID 5).
pub(crate) fn global() -> Value {
    let mut props = Properties::new();

    props.insert(
        "Array".to_owned(),
        Value::constructor("Array", |_, _| Value::array(Vec::new())),
    );

    props.insert(
        "Object".to_owned(),
        Value::constructor("Object", |_, _| Value::object(Properties::new())),
    );

    props.insert(
        "Uint8Array".to_owned(),
        Value::constructor("Uint8Array", |_, args| {
            let length = match args.first() {
                Some(Value::Number(n)) => *n as u32,
                _ => 0,
            };
            Value::bytes(vec![0; length as usize])
        }),
    );

    props.insert(
        "Date".to_owned(),
        Value::constructor("Date", |_, _| {
            let mut date = Properties::new();
            date.insert(
                "getTimezoneOffset".to_owned(),
                Value::function(|_, _| {
                    let offset = chrono::Local::now().offset().local_minus_utc();
                    Value::from(-(offset / 60))
                }),
            );
            Value::object(date)
        }),
    );

    props.insert("crypto".to_owned(), crypto());
    props.insert("fs".to_owned(), fs());
    props.insert("process".to_owned(), process());
    props.insert("wapc".to_owned(), wapc::namespace());

    Value::object(props)
}

/// Builds the jsGo shim object (ID 6).
pub(crate) fn js_go() -> Value {
    let mut props = Properties::new();

    props.insert("_pendingEvent".to_owned(), Value::Null);

    // Called by js.FuncOf(). The returned wrapper parks an event on
    // _pendingEvent, resumes the guest scheduler so it can service the
    // event, and hands back whatever result the guest left on it.
    props.insert(
        "_makeFuncWrapper".to_owned(),
        Value::function(|_, args| {
            let Some(id) = args.first().cloned() else {
                return Value::Null;
            };

            Value::function(move |scope, args| {
                let mut event = Properties::new();
                event.insert("id".to_owned(), id.clone());
                event.insert("this".to_owned(), Value::Null);
                event.insert("args".to_owned(), Value::array(args.to_vec()));
                let event = Value::object(event);

                if let Value::Object(js_go) = scope.module.js_go() {
                    js_go
                        .properties
                        .write()
                        .insert("_pendingEvent".to_owned(), event.clone());
                }

                if let Err(err) = scope.instance.resume() {
                    error!("_makeFuncWrapper: resume: {err}");
                    return Value::Null;
                }

                match &event {
                    Value::Object(event) => event
                        .properties
                        .read()
                        .get("result")
                        .cloned()
                        .unwrap_or(Value::Null),
                    _ => Value::Null,
                }
            })
        }),
    );

    Value::object(props)
}

fn crypto() -> Value {
    let mut props = Properties::new();

    props.insert(
        "getRandomValues".to_owned(),
        Value::function(|_, args| {
            if args.len() != 1 {
                error!("crypto.getRandomValues: {}: invalid number of arguments", args.len());
                return Value::from(0);
            }

            let Value::Bytes(buf) = &args[0] else {
                error!("crypto.getRandomValues: {}: not a Uint8Array", args[0].kind());
                return Value::from(0);
            };

            let mut data = buf.write();
            OsRng.fill_bytes(&mut data);
            Value::from(data.len())
        }),
    );

    Value::object(props)
}

fn fs() -> Value {
    let mut props = Properties::new();

    let mut constants = Properties::new();
    constants.insert("O_WRONLY".to_owned(), Value::from(libc::O_WRONLY));
    constants.insert("O_RDWR".to_owned(), Value::from(libc::O_RDWR));
    constants.insert("O_CREAT".to_owned(), Value::from(libc::O_CREAT));
    constants.insert("O_TRUNC".to_owned(), Value::from(libc::O_TRUNC));
    constants.insert("O_APPEND".to_owned(), Value::from(libc::O_APPEND));
    constants.insert("O_EXCL".to_owned(), Value::from(libc::O_EXCL));
    props.insert("constants".to_owned(), Value::properties(constants));

    props.insert(
        "write".to_owned(),
        Value::function(|scope, args| {
            if args.len() != 6 {
                error!("fs.write: {}: invalid number of arguments", args.len());
                return Value::Null;
            }

            let Value::Number(fd) = args[0] else {
                error!("fs.write: {}: fd not a number", args[0].kind());
                return Value::Null;
            };

            let Value::Bytes(buf) = &args[1] else {
                error!("fs.write: {}: not a Uint8Array", args[1].kind());
                return Value::Null;
            };

            // offset, length and position (args 2..5) are accepted but ignored.

            let Value::Function(callback) = &args[5] else {
                error!("fs.write: {}: callback not a function", args[5].kind());
                return Value::Null;
            };

            let result = {
                let data = buf.read();
                scope.instance.write(fd as i64, &data)
            };

            match result {
                Ok(n) => callback.call(scope, &[Value::Null, Value::from(n)]),
                Err(err) => {
                    error!("fs.write: {err}");
                    callback.call(scope, &[enosys()])
                }
            };

            Value::Null
        }),
    );

    for &name in FS_STUBS {
        props.insert(name.to_owned(), fs_stub(name));
    }

    Value::object(props)
}

fn fs_stub(name: &'static str) -> Value {
    Value::function(move |scope, args| {
        match args.last() {
            Some(Value::Function(callback)) => {
                callback.call(scope, &[enosys()]);
            }
            _ => error!("fs.{name}: missing callback"),
        }
        Value::Null
    })
}

fn process() -> Value {
    let mut props = Properties::new();

    props.insert("pid".to_owned(), Value::from(-1));
    props.insert("ppid".to_owned(), Value::from(-1));

    for name in ["getuid", "getgid", "geteuid", "getegid"] {
        props.insert(name.to_owned(), Value::function(|_, _| Value::from(-1)));
    }

    props.insert(
        "getgroups".to_owned(),
        Value::function(|_, _| Value::array(Vec::new())),
    );
    props.insert("umask".to_owned(), Value::function(|_, _| Value::from(0o22)));
    props.insert("cwd".to_owned(), Value::function(|_, _| Value::from("/")));
    props.insert("chdir".to_owned(), Value::function(|_, _| Value::Null));

    Value::object(props)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Module;
    use crate::testutil::MockInstance;
    use crate::value::FuncScope;

    fn call(module: &Module, inst: &mut MockInstance, target: &Value, args: &[Value]) -> Value {
        let Value::Function(f) = target else {
            panic!("not a function: {target:?}");
        };
        let mut scope = FuncScope {
            module,
            instance: inst,
        };
        f.call(&mut scope, args)
    }

    fn get(v: &Value, name: &str) -> Value {
        match v {
            Value::Object(o) => o.properties.read().get(name).cloned().unwrap(),
            Value::Properties(p) => p.read().get(name).cloned().unwrap(),
            _ => panic!("not an object: {v:?}"),
        }
    }

    #[test]
    fn test_constructors() {
        let module = Module::new();
        let mut inst = MockInstance::new();
        let global = global();

        let arr = call(&module, &mut inst, &get(&global, "Array"), &[]);
        assert!(matches!(arr, Value::Array(ref a) if a.read().is_empty()));

        let obj = call(&module, &mut inst, &get(&global, "Object"), &[]);
        assert!(matches!(obj, Value::Object(_)));

        let bytes = call(&module, &mut inst, &get(&global, "Uint8Array"), &[Value::from(16)]);
        match bytes {
            Value::Bytes(b) => assert_eq!(b.read().len(), 16),
            other => panic!("not a Uint8Array: {other:?}"),
        }

        let empty = call(&module, &mut inst, &get(&global, "Uint8Array"), &[]);
        assert!(matches!(empty, Value::Bytes(ref b) if b.read().is_empty()));
    }

    #[test]
    fn test_date_timezone_offset_is_a_number() {
        let module = Module::new();
        let mut inst = MockInstance::new();
        let global = global();

        let date = call(&module, &mut inst, &get(&global, "Date"), &[]);
        let offset = call(&module, &mut inst, &get(&date, "getTimezoneOffset"), &[]);

        let minutes = offset.as_f64().expect("offset not a number");
        // Real-world offsets stay within UTC-14..UTC+14.
        assert!((-14.0 * 60.0..=14.0 * 60.0).contains(&minutes));
    }

    #[test]
    fn test_crypto_get_random_values() {
        let module = Module::new();
        let mut inst = MockInstance::new();
        let global = global();

        let buf = Value::bytes(vec![0; 32]);
        let crypto = get(&global, "crypto");
        let n = call(&module, &mut inst, &get(&crypto, "getRandomValues"), &[buf.clone()]);
        assert_eq!(n, Value::from(32));

        let Value::Bytes(b) = buf else { unreachable!() };
        assert!(b.read().iter().any(|&x| x != 0), "buffer left zeroed");
    }

    #[test]
    fn test_fs_constants() {
        let global = global();
        let constants = get(&get(&global, "fs"), "constants");

        assert_eq!(get(&constants, "O_WRONLY"), Value::from(libc::O_WRONLY));
        assert_eq!(get(&constants, "O_RDWR"), Value::from(libc::O_RDWR));
        assert_eq!(get(&constants, "O_CREAT"), Value::from(libc::O_CREAT));
        assert_eq!(get(&constants, "O_TRUNC"), Value::from(libc::O_TRUNC));
        assert_eq!(get(&constants, "O_APPEND"), Value::from(libc::O_APPEND));
        assert_eq!(get(&constants, "O_EXCL"), Value::from(libc::O_EXCL));
    }

    #[test]
    fn test_fs_write_success_invokes_callback() {
        let module = Module::new();
        let mut inst = MockInstance::new();
        let global = global();

        let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let callback = Value::function(move |_, args| {
            seen2.lock().extend_from_slice(args);
            Value::Null
        });

        let write = get(&get(&global, "fs"), "write");
        call(
            &module,
            &mut inst,
            &write,
            &[
                Value::from(1),
                Value::bytes(b"hello".to_vec()),
                Value::from(0),
                Value::from(5),
                Value::Null,
                callback,
            ],
        );

        assert_eq!(inst.writes, vec![(1, b"hello".to_vec())]);
        let seen = seen.lock();
        assert_eq!(seen[0], Value::Null);
        assert_eq!(seen[1], Value::from(5));
    }

    #[test]
    fn test_fs_write_bad_fd_reports_enosys() {
        let module = Module::new();
        let mut inst = MockInstance::new();
        let global = global();

        let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let callback = Value::function(move |_, args| {
            seen2.lock().extend_from_slice(args);
            Value::Null
        });

        let write = get(&get(&global, "fs"), "write");
        call(
            &module,
            &mut inst,
            &write,
            &[
                Value::from(7),
                Value::bytes(b"nope".to_vec()),
                Value::from(0),
                Value::from(4),
                Value::Null,
                callback,
            ],
        );

        assert!(inst.writes.is_empty());
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(get(&seen[0], "code"), Value::from("ENOSYS"));
    }

    #[test]
    fn test_fs_stubs_report_enosys() {
        let module = Module::new();
        let mut inst = MockInstance::new();
        let global = global();
        let fs = get(&global, "fs");

        for &name in FS_STUBS {
            let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
            let seen2 = seen.clone();
            let callback = Value::function(move |_, args| {
                seen2.lock().extend_from_slice(args);
                Value::Null
            });

            call(
                &module,
                &mut inst,
                &get(&fs, name),
                &[Value::from("/some/path"), callback],
            );

            let seen = seen.lock();
            assert_eq!(seen.len(), 1, "fs.{name} did not call back");
            assert_eq!(get(&seen[0], "code"), Value::from("ENOSYS"), "fs.{name}");
        }
    }

    #[test]
    fn test_process_identity() {
        let module = Module::new();
        let mut inst = MockInstance::new();
        let process = get(&global(), "process");

        assert_eq!(get(&process, "pid"), Value::from(-1));
        assert_eq!(get(&process, "ppid"), Value::from(-1));

        for name in ["getuid", "getgid", "geteuid", "getegid"] {
            let v = call(&module, &mut inst, &get(&process, name), &[]);
            assert_eq!(v, Value::from(-1), "{name}");
        }

        let groups = call(&module, &mut inst, &get(&process, "getgroups"), &[]);
        assert!(matches!(groups, Value::Array(ref a) if a.read().is_empty()));

        assert_eq!(call(&module, &mut inst, &get(&process, "umask"), &[]), Value::from(0o22));
        assert_eq!(call(&module, &mut inst, &get(&process, "cwd"), &[]), Value::from("/"));
        assert_eq!(call(&module, &mut inst, &get(&process, "chdir"), &[]), Value::Null);
    }

    #[test]
    fn test_pending_event_protocol() {
        let module = Module::new();
        let mut inst = MockInstance::new();
        let js_go = module.js_go();

        let make_wrapper = get(&js_go, "_makeFuncWrapper");
        let wrapper = call(&module, &mut inst, &make_wrapper, &[Value::from(7)]);

        let result = call(&module, &mut inst, &wrapper, &[Value::from(42), Value::from("x")]);
        assert_eq!(result, Value::Null, "no result set by the guest");
        assert_eq!(inst.resumes, 1);

        let event = get(&js_go, "_pendingEvent");
        assert_eq!(get(&event, "id"), Value::from(7));
        assert_eq!(get(&event, "this"), Value::Null);
        match get(&event, "args") {
            Value::Array(a) => {
                let a = a.read();
                assert_eq!(a.len(), 2);
                assert_eq!(a[0], Value::from(42));
                assert_eq!(a[1], Value::from("x"));
            }
            other => panic!("args not an Array: {other:?}"),
        }
    }
}
