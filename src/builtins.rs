//! The built-in host-function group every [`crate::host::HostRegistry`]
//! starts with: `print`, `post`, `get`, `len`, `append`, `remove`, `assert`,
//! `dump`, `str`, `join`, `error`. All eleven live in group 0, addressed by
//! the function ids below; a script sees them as ordinary calls, no
//! different from a host's own `register_fn` additions.

use std::rc::Rc;

use crate::error::{Error, Result};
use crate::host::{HostContext, HostRegistry, Signature};
use crate::value::Value;

pub const GROUP_ID: u8 = 0;

pub const FN_PRINT: u8 = 0;
pub const FN_POST: u8 = 1;
pub const FN_GET: u8 = 2;
pub const FN_LEN: u8 = 3;
pub const FN_APPEND: u8 = 4;
pub const FN_REMOVE: u8 = 5;
pub const FN_ASSERT: u8 = 6;
/// `dump()` needs the VM's own activation-record/value-stack state, which a
/// plain [`HostContext`] cannot see. The VM intercepts this id before
/// dispatching to the registry; the closure registered here only runs if
/// that interception is ever bypassed, so it fails loudly instead of
/// silently doing nothing.
pub const FN_DUMP: u8 = 7;
pub const FN_STR: u8 = 8;
pub const FN_JOIN: u8 = 9;
pub const FN_ERROR: u8 = 10;

pub fn register(registry: &mut HostRegistry) {
    registry.register_in_group(
        "print",
        GROUP_ID,
        FN_PRINT,
        Signature::at_least(0),
        Rc::new(print),
    );
    registry.register_in_group("post", GROUP_ID, FN_POST, Signature::exact(2), Rc::new(post));
    registry.register_in_group("get", GROUP_ID, FN_GET, Signature::exact(1), Rc::new(get));
    registry.register_in_group("len", GROUP_ID, FN_LEN, Signature::exact(1), Rc::new(len));
    registry.register_in_group(
        "append",
        GROUP_ID,
        FN_APPEND,
        Signature::exact(2),
        Rc::new(append),
    );
    registry.register_in_group(
        "remove",
        GROUP_ID,
        FN_REMOVE,
        Signature::exact(2),
        Rc::new(remove),
    );
    registry.register_in_group(
        "assert",
        GROUP_ID,
        FN_ASSERT,
        Signature::range(1, 2),
        Rc::new(assert_fn),
    );
    registry.register_in_group(
        "dump",
        GROUP_ID,
        FN_DUMP,
        Signature::exact(0),
        Rc::new(|_, _| {
            Err(Error::runtime(
                "dump() was dispatched to the host registry instead of being intercepted by the virtual machine",
            ))
        }),
    );
    registry.register_in_group("str", GROUP_ID, FN_STR, Signature::exact(1), Rc::new(str_fn));
    registry.register_in_group(
        "join",
        GROUP_ID,
        FN_JOIN,
        Signature::at_least(2),
        Rc::new(join),
    );
    registry.register_in_group(
        "error",
        GROUP_ID,
        FN_ERROR,
        Signature::exact(1),
        Rc::new(error_fn),
    );
}

fn expect_string<'a>(args: &'a [Value], i: usize, fn_name: &str) -> Result<&'a str> {
    args[i].as_str().ok_or_else(|| {
        Error::runtime(format!(
            "'{}' expects argument {} to be a string, got a {}",
            fn_name,
            i + 1,
            args[i].type_name()
        ))
    })
}

fn print(args: &[Value], ctx: &mut HostContext) -> Result<Value> {
    let mut line = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        line.push_str(&arg.to_print_string());
    }
    ctx.output.push(line);
    Ok(Value::Nil)
}

fn post(args: &[Value], ctx: &mut HostContext) -> Result<Value> {
    let name = expect_string(args, 0, "post")?.to_string();
    let value = args[1].clone();
    ctx.globals.insert(name, value.clone());
    Ok(value)
}

fn get(args: &[Value], ctx: &mut HostContext) -> Result<Value> {
    let name = expect_string(args, 0, "get")?;
    match ctx.globals.get(name) {
        Some(value) => Ok(value.clone()),
        None => Err(Error::UndefinedGlobalVariable(name.to_string())),
    }
}

fn len(args: &[Value], _ctx: &mut HostContext) -> Result<Value> {
    args[0].len().map(|n| Value::Number(n as f64)).ok_or_else(|| {
        Error::runtime(format!(
            "'len' expects a string, list or dictionary, got a {}",
            args[0].type_name()
        ))
    })
}

fn append(args: &[Value], _ctx: &mut HostContext) -> Result<Value> {
    let list = args[0].as_list().ok_or_else(|| {
        Error::runtime(format!(
            "'append' expects a list as its first argument, got a {}",
            args[0].type_name()
        ))
    })?;
    list.borrow_mut().push(args[1].clone());
    Ok(args[0].clone())
}

fn remove(args: &[Value], _ctx: &mut HostContext) -> Result<Value> {
    let list = args[0].as_list().ok_or_else(|| {
        Error::runtime(format!(
            "'remove' expects a list as its first argument, got a {}",
            args[0].type_name()
        ))
    })?;
    let index = args[1]
        .as_number()
        .ok_or_else(|| Error::runtime("'remove' expects a number as its second argument"))?;
    if index.fract() != 0.0 || index < 0.0 {
        return Err(Error::runtime(
            "the index of the element to remove must be a positive integer.",
        ));
    }
    let index = index as usize;
    let mut list = list.borrow_mut();
    if index >= list.len() {
        return Err(Error::runtime(format!(
            "index {} is out of bounds for a list of length {}",
            index,
            list.len()
        )));
    }
    list.remove(index);
    drop(list);
    Ok(args[0].clone())
}

fn assert_fn(args: &[Value], _ctx: &mut HostContext) -> Result<Value> {
    if args[0].to_boolean() {
        return Ok(Value::Nil);
    }
    if args.len() == 2 {
        let message = expect_string(args, 1, "assert")?;
        Err(Error::runtime(format!("user assertion failed: {}.", message)))
    } else {
        Err(Error::runtime("user assertion failed."))
    }
}

fn str_fn(args: &[Value], _ctx: &mut HostContext) -> Result<Value> {
    Ok(Value::string(args[0].to_print_string()))
}

fn join(args: &[Value], _ctx: &mut HostContext) -> Result<Value> {
    let separator = expect_string(args, 0, "join")?;
    let rest = &args[1..];
    let pieces: Vec<String> = if rest.len() == 1 {
        if let Some(list) = rest[0].as_list() {
            list.borrow().iter().map(|v| v.to_print_string()).collect()
        } else {
            vec![rest[0].to_print_string()]
        }
    } else {
        rest.iter().map(|v| v.to_print_string()).collect()
    };
    Ok(Value::string(pieces.join(separator)))
}

fn error_fn(args: &[Value], _ctx: &mut HostContext) -> Result<Value> {
    let message = expect_string(args, 0, "error")?;
    Err(Error::runtime(message.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn run(f: impl Fn(&[Value], &mut HostContext) -> Result<Value>, args: &[Value]) -> Result<Value> {
        let mut globals = HashMap::new();
        let mut output = Vec::new();
        let mut ctx = HostContext {
            globals: &mut globals,
            output: &mut output,
        };
        f(args, &mut ctx)
    }

    #[test]
    fn assert_without_message_uses_the_default_text() {
        let err = run(assert_fn, &[Value::Bool(false)]).unwrap_err();
        assert_eq!(err.to_string(), "user assertion failed.");
    }

    #[test]
    fn assert_with_message_matches_the_documented_format() {
        let err = run(assert_fn, &[Value::Bool(false), Value::string("nope")]).unwrap_err();
        assert_eq!(err.to_string(), "user assertion failed: nope.");
    }

    #[test]
    fn join_joins_a_list_argument() {
        let list = Value::list(vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]);
        let result = run(join, &[Value::string(","), list]).unwrap();
        assert_eq!(result, Value::string("1,2,3"));
    }

    #[test]
    fn join_joins_variadic_arguments_when_not_a_single_list() {
        let result = run(
            join,
            &[Value::string("-"), Value::Number(1.0), Value::Number(2.0)],
        )
        .unwrap();
        assert_eq!(result, Value::string("1-2"));
    }

    #[test]
    fn append_mutates_the_shared_list_in_place() {
        let list = Value::list(vec![Value::Number(1.0)]);
        let alias = list.clone();
        run(append, &[list, Value::Number(2.0)]).unwrap();
        assert_eq!(alias.len(), Some(2));
    }

    #[test]
    fn remove_rejects_a_negative_index() {
        let list = Value::list(vec![Value::Number(1.0)]);
        let err = run(remove, &[list, Value::Number(-1.0)]).unwrap_err();
        assert!(err
            .to_string()
            .contains("must be a positive integer"));
    }
}
