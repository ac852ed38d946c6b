//! The stack-and-activation-record virtual machine: the only piece that
//! actually runs a compiled program.
//!
//! The value stack (`values`) is addressed relative to the current frame's
//! `first_variable_location`: non-negative [`Location`]s are named slots,
//! negative ones index into the register band directly below them. A
//! [`PCallSfL`](OpCode::PCallSfL)/[`PCallSfG`](OpCode::PCallSfG) reserves the
//! callee's register band before its arguments are pushed, so
//! `first_variable_location` always ends up pointing at argument zero.

use std::collections::HashMap;

use crate::bytecode::{read_header, Location, OpCode, Reader};
use crate::builtins;
use crate::error::{Error, Result};
use crate::host::{HostContext, HostRegistry};
use crate::operators;
use crate::value::Value;

/// One call frame. `stack_size_at_call` is where the value stack gets
/// truncated back to on return; `first_variable_location` is the absolute
/// index that named slot 0 resolves to.
#[derive(Debug, Clone, Copy)]
struct ActivationRecord {
    return_ip: usize,
    stack_size_at_call: usize,
    first_variable_location: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Running,
    Paused,
    WaitingForReturn,
    Finished,
}

/// Optional resource ceilings an embedder can install to bound a runaway or
/// adversarial script.
#[derive(Debug, Clone, Copy, Default)]
pub struct Limits {
    pub max_instructions: Option<u64>,
    pub max_recursion_depth: Option<usize>,
}

pub struct Vm {
    bytecode: Vec<u8>,
    cursor: usize,
    values: Vec<Value>,
    activations: Vec<ActivationRecord>,
    globals: HashMap<String, Value>,
    output: Vec<String>,
    state: VmState,
    instructions_executed: u64,
    limits: Limits,
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Vm {
            bytecode: Vec::new(),
            cursor: 0,
            values: Vec::new(),
            activations: Vec::new(),
            globals: HashMap::new(),
            output: Vec::new(),
            state: VmState::Finished,
            instructions_executed: 0,
            limits: Limits::default(),
        }
    }

    pub fn set_limits(&mut self, limits: Limits) {
        self.limits = limits;
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn globals(&self) -> &HashMap<String, Value> {
        &self.globals
    }

    pub fn post(&mut self, name: String, value: Value) {
        self.globals.insert(name, value);
    }

    pub fn get_global(&self, name: &str) -> Result<Value> {
        self.globals
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UndefinedGlobalVariable(name.to_string()))
    }

    pub fn has_global(&self, name: &str) -> bool {
        self.globals.contains_key(name)
    }

    pub fn undefine_global(&mut self, name: &str) {
        self.globals.remove(name);
    }

    /// Drains the accumulated `print` output. Each call starts a fresh line.
    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    /// Loads a freshly compiled program, resetting the value and activation
    /// stacks. Globals survive across loads, matching the original's
    /// lifetime split between a program and the VM that outlives it.
    pub fn load(&mut self, bytecode: Vec<u8>) -> Result<()> {
        let mut reader = Reader::new(&bytecode);
        read_header(&mut reader)?;
        let body_start = reader.cursor;

        self.cursor = body_start;
        self.bytecode = bytecode;
        self.values.clear();
        self.activations.clear();
        self.activations.push(ActivationRecord {
            return_ip: 0,
            stack_size_at_call: 0,
            first_variable_location: 0,
        });
        self.instructions_executed = 0;
        self.state = VmState::Finished;
        Ok(())
    }

    /// Runs the loaded program from wherever the cursor currently sits until
    /// it falls off the end or a resource limit trips.
    pub fn run(&mut self, host: &HostRegistry) -> Result<()> {
        self.state = VmState::Running;
        while self.cursor < self.bytecode.len() && self.state == VmState::Running {
            self.execute_instruction(host)?;
        }
        if self.state == VmState::Running {
            self.state = VmState::Finished;
        }
        Ok(())
    }

    /// Re-entrant call from the host into a script function value, per the
    /// embedding facade's `call()`. Pushes the callee's register band and
    /// arguments, runs until that one frame returns, and restores the prior
    /// cursor — mirroring the original's `callScriptFunction`.
    pub fn call_script_function(
        &mut self,
        function: &Value,
        args: &[Value],
        host: &HostRegistry,
    ) -> Result<Value> {
        let (ip, n_args, n_registers) = match function {
            Value::ScriptFunction {
                ip,
                n_args,
                n_registers,
            } => (*ip, *n_args, *n_registers),
            other => {
                return Err(Error::runtime(format!(
                    "object {} is not callable.",
                    other.to_print_string()
                )))
            }
        };
        if args.len() != n_args as usize {
            return Err(Error::runtime(format!(
                "wrong number of arguments given ({} instead of {}).",
                args.len(),
                n_args
            )));
        }

        self.check_recursion_limit()?;

        let saved_cursor = self.cursor;
        for _ in 0..n_registers {
            self.values.push(Value::Nil);
        }
        for arg in args {
            self.values.push(arg.clone());
        }

        self.activations.push(ActivationRecord {
            return_ip: 0,
            stack_size_at_call: self.values.len() - n_registers as usize - args.len(),
            first_variable_location: self.values.len() - args.len(),
        });
        self.cursor = ip as usize;

        let target_depth = self.activations.len() - 1;
        let saved_state = self.state;
        self.state = VmState::Running;
        while self.activations.len() > target_depth && self.state == VmState::Running {
            self.execute_instruction(host)?;
        }
        self.state = saved_state;
        self.cursor = saved_cursor;

        let result = self.values.pop().unwrap_or(Value::Nil);
        Ok(result)
    }

    fn check_recursion_limit(&self) -> Result<()> {
        if let Some(max) = self.limits.max_recursion_depth {
            if self.activations.len() >= max {
                return Err(Error::RecursionLimitExceeded(max));
            }
        }
        Ok(())
    }

    fn check_instruction_limit(&self) -> Result<()> {
        if let Some(max) = self.limits.max_instructions {
            if self.instructions_executed > max {
                return Err(Error::InstructionLimitExceeded(max));
            }
        }
        Ok(())
    }

    fn frame(&self) -> &ActivationRecord {
        self.activations.last().unwrap()
    }

    fn local_index(&self, loc: Location) -> usize {
        (self.frame().first_variable_location as isize + loc as isize) as usize
    }

    fn local_index_in(&self, activation_index: usize, loc: Location) -> usize {
        (self.activations[activation_index].first_variable_location as isize + loc as isize)
            as usize
    }

    fn get_local(&self, loc: Location) -> Value {
        self.values[self.local_index(loc)].clone()
    }

    fn set_local(&mut self, loc: Location, value: Value) {
        let idx = self.local_index(loc);
        self.values[idx] = value;
    }

    /// Resolves the callee for `PCALL_SF_{L|G}`/`CALL_SF_{L|G}`: `*_G` reads
    /// relative to the outermost (global) frame, `*_L` relative to the
    /// current one.
    fn resolve_callee(&self, loc: Location, is_global: bool) -> Value {
        if is_global {
            let idx = self.local_index_in(0, loc);
            self.values[idx].clone()
        } else {
            self.get_local(loc)
        }
    }

    fn execute_instruction(&mut self, host: &HostRegistry) -> Result<()> {
        let mut reader = Reader::new(&self.bytecode);
        reader.jump_to(self.cursor);
        let op = reader.read_opcode()?;

        match op {
            OpCode::Reg => {
                let n = reader.read_u8()?;
                self.cursor = reader.cursor;
                for _ in 0..n {
                    self.values.push(Value::Nil);
                }
                self.activations.last_mut().unwrap().first_variable_location += n as usize;
            }

            OpCode::Push => {
                self.cursor = reader.cursor;
                self.values.push(Value::Nil);
            }

            OpCode::PushN => {
                let n = reader.read_number()?;
                self.cursor = reader.cursor;
                self.values.push(Value::Number(n));
            }

            OpCode::PushS => {
                let s = reader.read_string()?;
                self.cursor = reader.cursor;
                self.values.push(Value::string(s));
            }

            OpCode::PushB => {
                let b = reader.read_bool()?;
                self.cursor = reader.cursor;
                self.values.push(Value::Bool(b));
            }

            OpCode::Pop => {
                self.cursor = reader.cursor;
                self.values.pop();
            }

            OpCode::PopN => {
                let n = reader.read_u8()? as usize;
                self.cursor = reader.cursor;
                let new_len = self.values.len() - n;
                self.values.truncate(new_len);
            }

            OpCode::PopTo => {
                let loc = reader.read_loc()?;
                self.cursor = reader.cursor;
                let v = self.values.pop().unwrap();
                self.set_local(loc, v);
            }

            OpCode::PushVal => {
                let loc = reader.read_loc()?;
                self.cursor = reader.cursor;
                let v = self.get_local(loc);
                self.values.push(v);
            }

            OpCode::StoreAtNil => {
                let loc = reader.read_loc()?;
                self.cursor = reader.cursor;
                self.set_local(loc, Value::Nil);
            }

            OpCode::StoreAtF => {
                let loc = reader.read_loc()?;
                let ip = reader.read_u32()?;
                let n_args = reader.read_u8()?;
                let n_regs = reader.read_u8()?;
                self.cursor = reader.cursor;
                self.set_local(
                    loc,
                    Value::ScriptFunction {
                        ip,
                        n_args,
                        n_registers: n_regs,
                    },
                );
            }

            OpCode::Move => {
                let a = reader.read_loc()?;
                let b = reader.read_loc()?;
                self.cursor = reader.cursor;
                let v = self.get_local(b);
                self.set_local(a, v);
            }

            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::And | OpCode::Or
            | OpCode::Eq | OpCode::Neq | OpCode::Gr | OpCode::Gre | OpCode::Ls | OpCode::Lse => {
                let t = reader.read_loc()?;
                let a = reader.read_loc()?;
                let b = reader.read_loc()?;
                self.cursor = reader.cursor;
                let left = self.get_local(a);
                let right = self.get_local(b);
                let result = match op {
                    OpCode::Add => operators::add(&left, &right)?,
                    OpCode::Sub => operators::subtract(&left, &right)?,
                    OpCode::Mul => operators::multiply(&left, &right)?,
                    OpCode::Div => operators::divide(&left, &right)?,
                    OpCode::And => operators::and(&left, &right),
                    OpCode::Or => operators::or(&left, &right),
                    OpCode::Eq => operators::equals(&left, &right),
                    OpCode::Neq => operators::not_equals(&left, &right),
                    OpCode::Gr => operators::greater(&left, &right)?,
                    OpCode::Gre => operators::greater_equals(&left, &right)?,
                    OpCode::Ls => operators::lesser(&left, &right)?,
                    OpCode::Lse => operators::lesser_equals(&left, &right)?,
                    _ => unreachable!(),
                };
                self.set_local(t, result);
            }

            OpCode::Not => {
                let t = reader.read_loc()?;
                let a = reader.read_loc()?;
                self.cursor = reader.cursor;
                let v = self.get_local(a);
                self.set_local(t, operators::not(&v));
            }

            OpCode::Negate => {
                let t = reader.read_loc()?;
                let a = reader.read_loc()?;
                self.cursor = reader.cursor;
                let v = self.get_local(a);
                let result = operators::negate(&v)?;
                self.set_local(t, result);
            }

            OpCode::Jump => {
                let target = reader.read_u32()?;
                self.cursor = target as usize;
            }

            OpCode::JumpCond => {
                let loc = reader.read_loc()?;
                let target = reader.read_u32()?;
                self.cursor = reader.cursor;
                if !self.get_local(loc).to_boolean() {
                    self.cursor = target as usize;
                }
            }

            OpCode::ListNew => {
                let t = reader.read_loc()?;
                self.cursor = reader.cursor;
                self.set_local(t, Value::list(Vec::new()));
            }

            OpCode::ListAdd => {
                let list_loc = reader.read_loc()?;
                let elem_loc = reader.read_loc()?;
                self.cursor = reader.cursor;
                let elem = self.get_local(elem_loc);
                let list = self.get_local(list_loc);
                let list_ref = list
                    .as_list()
                    .ok_or_else(|| Error::runtime("LIST_ADD target is not a list"))?;
                list_ref.borrow_mut().push(elem);
            }

            OpCode::DictNew => {
                let t = reader.read_loc()?;
                self.cursor = reader.cursor;
                self.set_local(t, Value::dictionary(Vec::new()));
            }

            OpCode::DictAdd => {
                let dict_loc = reader.read_loc()?;
                let key_loc = reader.read_loc()?;
                let value_loc = reader.read_loc()?;
                self.cursor = reader.cursor;
                let key = self.get_local(key_loc);
                let value = self.get_local(value_loc);
                let dict = self.get_local(dict_loc);
                let dict_ref = dict
                    .as_dictionary()
                    .ok_or_else(|| Error::runtime("DICTIONARY_ADD target is not a dictionary"))?;
                dict_set(dict_ref, key, value);
            }

            OpCode::Get => {
                let target = reader.read_loc()?;
                let cont_loc = reader.read_loc()?;
                let index_loc = reader.read_loc()?;
                self.cursor = reader.cursor;
                let cont = self.get_local(cont_loc);
                let index = self.get_local(index_loc);
                let result = container_get(&cont, &index)?;
                self.set_local(target, result);
            }

            OpCode::Set => {
                let value_loc = reader.read_loc()?;
                let cont_loc = reader.read_loc()?;
                let index_loc = reader.read_loc()?;
                self.cursor = reader.cursor;
                let value = self.get_local(value_loc);
                let cont = self.get_local(cont_loc);
                let index = self.get_local(index_loc);
                container_set(&cont, index, value)?;
            }

            OpCode::PCallSfL | OpCode::PCallSfG => {
                let function_loc = reader.read_loc()?;
                self.cursor = reader.cursor;
                let function = self.resolve_callee(function_loc, op == OpCode::PCallSfG);
                if let Value::ScriptFunction { n_registers, .. } = function {
                    for _ in 0..n_registers {
                        self.values.push(Value::Nil);
                    }
                }
            }

            OpCode::CallSfL | OpCode::CallSfG => {
                let function_loc = reader.read_loc()?;
                let n_args = reader.read_u8()?;
                self.cursor = reader.cursor;
                let function = self.resolve_callee(function_loc, op == OpCode::CallSfG);
                let (ip, expected_args, n_registers) = match function {
                    Value::ScriptFunction {
                        ip,
                        n_args,
                        n_registers,
                    } => (ip, n_args, n_registers),
                    other => {
                        return Err(Error::runtime(format!(
                            "object {} is not callable.",
                            other.to_print_string()
                        )))
                    }
                };
                if n_args != expected_args {
                    return Err(Error::runtime(format!(
                        "wrong number of arguments given ({} instead of {}).",
                        n_args, expected_args
                    )));
                }
                self.check_recursion_limit()?;
                self.activations.push(ActivationRecord {
                    return_ip: self.cursor,
                    stack_size_at_call: self.values.len()
                        - n_registers as usize
                        - n_args as usize,
                    first_variable_location: self.values.len() - n_args as usize,
                });
                self.cursor = ip as usize;
            }

            OpCode::CallHf => {
                let group_id = reader.read_u8()?;
                let function_id = reader.read_u8()?;
                let n_args = reader.read_u8()? as usize;
                self.cursor = reader.cursor;

                let start = self.values.len() - n_args;
                let args: Vec<Value> = self.values[start..].to_vec();

                self.state = VmState::WaitingForReturn;
                let result = if group_id == builtins::GROUP_ID && function_id == builtins::FN_DUMP
                {
                    self.output.push(self.dump_text());
                    Ok(Value::Nil)
                } else {
                    let mut ctx = HostContext {
                        globals: &mut self.globals,
                        output: &mut self.output,
                    };
                    host.call(group_id, function_id, &args, &mut ctx)
                };
                if self.state == VmState::WaitingForReturn {
                    self.state = VmState::Running;
                }

                self.values.truncate(start);
                self.values.push(result?);
            }

            OpCode::Return => {
                let loc = reader.read_loc()?;
                self.cursor = reader.cursor;
                let value = self.get_local(loc);
                let frame = self.activations.pop().unwrap();
                self.values.truncate(frame.stack_size_at_call);
                self.values.push(value);
                self.cursor = frame.return_ip;
            }

            OpCode::ReturnNil => {
                self.cursor = reader.cursor;
                let frame = self.activations.pop().unwrap();
                self.values.truncate(frame.stack_size_at_call);
                self.values.push(Value::Nil);
                self.cursor = frame.return_ip;
            }
        }

        self.instructions_executed += 1;
        self.check_instruction_limit()?;
        Ok(())
    }

    /// The `dump()` builtin's payload: a snapshot of the value and
    /// activation stacks, addresses shown relative to the current frame —
    /// this is the VM's only introspection surface (no tracing/logging
    /// crate backs it, see the embedding facade's design notes).
    fn dump_text(&self) -> String {
        let mut out = String::from("Values-Stack:\n");
        let base = self.frame().first_variable_location as isize;
        for (i, value) in self.values.iter().enumerate() {
            out.push_str(&format!(
                "   {}, {}) {}\n",
                i,
                i as isize - base,
                value.to_print_string()
            ));
        }
        out.push_str("Activations-Stack:\n");
        for (i, activation) in self.activations.iter().enumerate() {
            out.push_str(&format!(
                "   {}) return-index: {}; stack-size: {}; first-variable-loc: {}\n",
                i, activation.return_ip, activation.stack_size_at_call, activation.first_variable_location
            ));
        }
        out
    }
}

fn container_get(cont: &Value, index: &Value) -> Result<Value> {
    if let Some(list) = cont.as_list() {
        let i = positive_integer_index(index)?;
        let list = list.borrow();
        list.get(i)
            .cloned()
            .ok_or_else(|| Error::runtime("index out of list boundaries."))
    } else if let Some(dict) = cont.as_dictionary() {
        let dict = dict.borrow();
        dict.iter()
            .find(|(k, _)| k == index)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| Error::runtime("key not found in dictionary."))
    } else {
        Err(Error::runtime(format!(
            "cannot index into a {}",
            cont.type_name()
        )))
    }
}

fn container_set(cont: &Value, index: Value, value: Value) -> Result<()> {
    if let Some(list) = cont.as_list() {
        let i = positive_integer_index(&index)?;
        let mut list = list.borrow_mut();
        if i >= list.len() {
            return Err(Error::runtime("index out of list boundaries."));
        }
        list[i] = value;
        Ok(())
    } else if let Some(dict) = cont.as_dictionary() {
        dict_set(dict, index, value);
        Ok(())
    } else {
        Err(Error::runtime(format!(
            "cannot index into a {}",
            cont.type_name()
        )))
    }
}

fn positive_integer_index(index: &Value) -> Result<usize> {
    let n = index
        .as_number()
        .ok_or_else(|| Error::runtime("container index must be a number"))?;
    if n.fract() != 0.0 || n < 0.0 {
        return Err(Error::runtime(
            "container index must be a positive integer.",
        ));
    }
    Ok(n as usize)
}

fn dict_set(dict: &crate::value::DictRef, key: Value, value: Value) {
    let mut pairs = dict.borrow_mut();
    if let Some(entry) = pairs.iter_mut().find(|(k, _)| *k == key) {
        entry.1 = value;
    } else {
        pairs.push((key, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_source(source: &str) -> (Vm, Vec<String>) {
        let host = HostRegistry::new();
        let bytecode = crate::compiler::compile(source, &host).unwrap();
        let mut vm = Vm::new();
        vm.load(bytecode).unwrap();
        vm.run(&host).unwrap();
        let output = vm.take_output();
        (vm, output)
    }

    #[test]
    fn evaluates_arithmetic_and_prints_it() {
        let (_, output) = run_source("print(1 + 2 * 3)\n");
        assert_eq!(output, vec!["7"]);
    }

    #[test]
    fn a_discarded_binary_expression_statement_does_not_panic() {
        // `x + y` as a bare top-level statement: both operands are plain
        // variable reads, so nothing but the `Add` opcode itself ever writes
        // to the top-level register it targets. Regression test for a
        // previously-missed register high-water bump that made this panic.
        let (vm, _) = run_source("x = 1\ny = 2\nx + y\n");
        assert_eq!(vm.state(), VmState::Finished);
    }

    #[test]
    fn while_loop_counts_to_three() {
        let (_, output) = run_source("x = 0\nwhile x < 3\n x = x + 1\nend\nprint(x)\n");
        assert_eq!(output, vec!["3"]);
    }

    #[test]
    fn calling_a_function_with_the_wrong_arity_fails_at_runtime() {
        let host = HostRegistry::new();
        let bytecode =
            crate::compiler::compile("def f(a, b)\n return a + b\nend\nf(1)\n", &host).unwrap();
        let mut vm = Vm::new();
        vm.load(bytecode).unwrap();
        let err = vm.run(&host).unwrap_err();
        let message = err.to_string();
        assert!(message.contains('1') && message.contains('2'));
    }

    #[test]
    fn list_append_and_index_round_trip() {
        let (_, output) =
            run_source("l = [1, 2, 3]\nappend(l, 4)\nprint(len(l))\nprint(l[3])\n");
        assert_eq!(output, vec!["4", "4"]);
    }

    #[test]
    fn dictionary_literal_and_element_assignment() {
        let (_, output) = run_source("d = {\"a\": 1}\nd[\"b\"] = 2\nprint(d[\"a\"] + d[\"b\"])\n");
        assert_eq!(output, vec!["3"]);
    }

    #[test]
    fn for_loop_continue_skips_one_iteration() {
        let (_, output) = run_source(
            "for i = 0; i < 3; i = i + 1\n if i == 1\n  continue\n end\n print(i)\nend\n",
        );
        assert_eq!(output, vec!["0", "2"]);
    }

    #[test]
    fn user_assertion_failure_message_matches_the_documented_format() {
        let host = HostRegistry::new();
        let bytecode = crate::compiler::compile("assert(1 == 2, \"nope\")\n", &host).unwrap();
        let mut vm = Vm::new();
        vm.load(bytecode).unwrap();
        let err = vm.run(&host).unwrap_err();
        assert_eq!(err.to_string(), "user assertion failed: nope.");
    }

    #[test]
    fn instruction_limit_trips_on_an_infinite_loop() {
        let host = HostRegistry::new();
        let bytecode = crate::compiler::compile("while true\nend\n", &host).unwrap();
        let mut vm = Vm::new();
        vm.load(bytecode).unwrap();
        vm.set_limits(Limits {
            max_instructions: Some(1000),
            max_recursion_depth: None,
        });
        let err = vm.run(&host).unwrap_err();
        assert!(matches!(err, Error::InstructionLimitExceeded(1000)));
    }
}
