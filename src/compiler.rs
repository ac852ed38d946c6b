//! Single-pass AST -> bytecode compiler.
//!
//! The value stack is split into two regions per activation frame: *named
//! slots* at non-negative locations (globals, locals, arguments, interned
//! literals) and *registers* at negative locations (anonymous intermediates).
//! `compile(node, target)` returns the location actually holding the node's
//! result, which is not always `target` — a bare variable reference returns
//! its own slot regardless of what the caller suggested.

use std::collections::HashMap;

use crate::ast::{Kind, Node};
use crate::bytecode::{write_header, Location, OpCode, Writer, MAX_POP_N_BATCH};
use crate::error::{Error, Result};
use crate::host::HostRegistry;

struct NameSlot {
    key: String,
    emitted: bool,
}

pub struct Compiler<'a> {
    writer: Writer,
    names: Vec<NameSlot>,
    script_functions: HashMap<String, Location>,
    frame_bases: Vec<usize>,
    register_high_water: Vec<u8>,
    loop_unwind_sizes: Vec<usize>,
    continues: Vec<Vec<usize>>,
    breaks: Vec<Vec<usize>>,
    variable_declaration_allowed: bool,
    declare_only: bool,
    host: &'a HostRegistry,
}

pub fn compile(source: &str, host: &HostRegistry) -> Result<Vec<u8>> {
    let tree = crate::parser::Parser::parse(source)?;
    let mut compiler = Compiler {
        writer: Writer::new(),
        names: Vec::new(),
        script_functions: HashMap::new(),
        frame_bases: vec![0],
        register_high_water: vec![0],
        loop_unwind_sizes: Vec::new(),
        continues: Vec::new(),
        breaks: Vec::new(),
        variable_declaration_allowed: false,
        declare_only: false,
        host,
    };

    write_header(&mut compiler.writer);
    compiler.writer.op(OpCode::Reg);
    let reg_patch = compiler.writer.placeholder_u8();

    compiler.compile(&tree, -1)?;

    let top_registers = *compiler.register_high_water.last().unwrap();
    compiler.writer.patch_u8(reg_patch, top_registers);

    Ok(compiler.writer.into_bytes())
}

impl<'a> Compiler<'a> {
    fn frame_base(&self) -> usize {
        *self.frame_bases.last().unwrap()
    }

    fn note_register(&mut self, loc: Location) {
        if loc < 0 {
            let depth = (-(loc as i16)) as u8;
            let top = self.register_high_water.last_mut().unwrap();
            *top = (*top).max(depth);
        }
    }

    fn fresh_register(&self, target: Location) -> Location {
        if target < 0 {
            target - 1
        } else {
            -1
        }
    }

    /// One register deeper than `offer`. The location type is a signed byte,
    /// so this is where an expression nested too deeply to fit the 128
    /// register cap is caught.
    fn next_offer(&self, offer: Location, line: u32) -> Result<Location> {
        offer.checked_sub(1).ok_or_else(|| Error::Semantic {
            line,
            message: "expression needs more registers than the 128-register-per-frame limit allows"
                .to_string(),
        })
    }

    fn find_local(&self, key: &str) -> Option<Location> {
        let base = self.frame_base();
        for i in (base..self.names.len()).rev() {
            if self.names[i].key == key {
                return Some((i - base) as Location);
            }
        }
        None
    }

    fn is_emitted(&self, loc: Location) -> bool {
        let idx = self.frame_base() + loc as usize;
        self.names[idx].emitted
    }

    fn mark_emitted(&mut self, loc: Location) {
        let idx = self.frame_base() + loc as usize;
        self.names[idx].emitted = true;
    }

    /// Declares a brand new named slot in the current frame, checking the
    /// 127-slot cap implied by the signed 8-bit location type.
    fn declare(&mut self, key: String, line: u32) -> Result<Location> {
        let loc = self.names.len() - self.frame_base();
        if loc > i8::MAX as usize {
            return Err(Error::Semantic {
                line,
                message: "too many named slots in this frame (limit 127)".to_string(),
            });
        }
        self.names.push(NameSlot { key, emitted: false });
        Ok(loc as Location)
    }

    /// Pops `names.len() - desired_len` named slots, emitting real `POP`s and
    /// cleaning up the script-function map. Used at block/function exit.
    fn delete_values(&mut self, desired_len: usize) {
        let count = self.names.len() - desired_len;
        self.emit_pop_count(count);
        for slot in self.names.drain(desired_len..) {
            self.script_functions.remove(&slot.key);
        }
    }

    fn emit_pop_count(&mut self, mut count: usize) {
        if count == 0 {
            return;
        }
        if count == 1 {
            self.writer.op(OpCode::Pop);
            return;
        }
        while count > 0 {
            let batch = count.min(MAX_POP_N_BATCH);
            self.writer.op(OpCode::PopN);
            self.writer.small(batch as u8);
            count -= batch;
        }
    }

    /// Runs `compile` over `node` with `declare_only` set: literal interning
    /// and variable auto-declaration still happen for real (that *is* the
    /// declaration being pre-established), but every "computed" node kind
    /// recurses into its children without emitting its own opcode. Used
    /// ahead of a `while`/`for` header and ahead of a call's `PCALL`, so that
    /// any name first introduced inside the pre-walked subtree gets a stable
    /// slot — and, for literals/auto-declared variables, its one real
    /// `PUSH` — before anything that depends on the slot layout staying
    /// contiguous (a loop body, or a callee's reserved register band) is
    /// emitted.
    fn compile_declare_only(&mut self, node: &Node, target: Location) -> Result<()> {
        let saved = self.declare_only;
        self.declare_only = true;
        let result = self.compile(node, target);
        self.declare_only = saved;
        result.map(|_| ())
    }

    /// The children-only half of a declare-only walk for a "computed" node:
    /// forces any literal/variable declarations nested inside without
    /// emitting this node's own opcode.
    fn declare_only_children(&mut self, node: &Node, target: Location) -> Result<Location> {
        match node.kind {
            Kind::FunctionCall => {
                for arg in &node.children {
                    self.compile(arg, target)?;
                }
            }
            Kind::List => {
                for element in &node.children {
                    self.compile(element, target)?;
                }
            }
            Kind::Dictionary => {
                for pair in &node.children {
                    self.compile(&pair.children[0], target)?;
                    self.compile(&pair.children[1], target)?;
                }
            }
            Kind::ContainerElement => {
                self.compile(&node.children[0], target)?;
                self.compile(&node.children[1], target)?;
            }
            Kind::Assignment => {
                let lhs = &node.children[0];
                if lhs.kind == Kind::Variable {
                    self.variable_declaration_allowed = true;
                    let result = self.compile(lhs, target);
                    self.variable_declaration_allowed = false;
                    result?;
                } else {
                    self.compile(&lhs.children[0], target)?;
                    self.compile(&lhs.children[1], target)?;
                }
                self.compile(&node.children[1], target)?;
            }
            Kind::Sum
            | Kind::Difference
            | Kind::Product
            | Kind::Division
            | Kind::And
            | Kind::Or
            | Kind::Equals
            | Kind::NotEquals
            | Kind::Greater
            | Kind::GreaterEquals
            | Kind::Lesser
            | Kind::LesserEquals => {
                self.compile(&node.children[0], target)?;
                self.compile(&node.children[1], target)?;
            }
            Kind::Negation | Kind::Not => {
                self.compile(&node.children[0], target)?;
            }
            _ => {}
        }
        Ok(target)
    }

    /// Interns a literal: reuses the existing slot if this exact literal
    /// already occupies one in the current function, otherwise declares and
    /// emits the push.
    fn intern_literal(
        &mut self,
        key: String,
        line: u32,
        emit: impl FnOnce(&mut Writer),
    ) -> Result<Location> {
        if let Some(loc) = self.find_local(&key) {
            if !self.is_emitted(loc) {
                emit(&mut self.writer);
                self.mark_emitted(loc);
            }
            return Ok(loc);
        }
        let loc = self.declare(key, line)?;
        emit(&mut self.writer);
        self.mark_emitted(loc);
        Ok(loc)
    }

    fn compile_operands(&mut self, nodes: &[&Node], target: Location) -> Result<Vec<Location>> {
        let mut offer = self.fresh_register(target);
        let mut locs = Vec::with_capacity(nodes.len());
        for node in nodes {
            let loc = self.compile(node, offer)?;
            self.note_register(loc);
            if loc == offer {
                offer = self.next_offer(offer, node.line)?;
            }
            locs.push(loc);
        }
        Ok(locs)
    }

    pub fn compile(&mut self, node: &Node, target: Location) -> Result<Location> {
        if self.declare_only && is_computed_kind(node.kind) {
            return self.declare_only_children(node, target);
        }
        match node.kind {
            Kind::Block => self.compile_block(node, target),
            Kind::If => self.compile_if(node, target),
            Kind::While => self.compile_while(node, target),
            Kind::For => self.compile_for(node, target),
            Kind::FunctionDef => self.compile_function_def(node),
            Kind::Return => self.compile_return(node, target),
            Kind::Continue => self.compile_continue(node),
            Kind::Break => self.compile_break(node),
            Kind::FunctionCall => self.compile_call(node, target),
            Kind::Assignment => self.compile_assignment(node, target),
            Kind::ContainerElement => {
                let locs = self.compile_operands(&[&node.children[0], &node.children[1]], target)?;
                self.note_register(target);
                self.writer.op(OpCode::Get);
                self.writer.loc(target);
                self.writer.loc(locs[0]);
                self.writer.loc(locs[1]);
                Ok(target)
            }
            Kind::Variable => self.compile_variable(node),
            Kind::Nil => {
                self.writer.op(OpCode::StoreAtNil);
                self.writer.loc(target);
                Ok(target)
            }
            Kind::Boolean => {
                let key = if node.boolean { "true" } else { "false" }.to_string();
                let boolean = node.boolean;
                self.intern_literal(key, node.line, move |w| {
                    w.op(OpCode::PushB);
                    w.boolean(boolean);
                })
            }
            Kind::Number => {
                let key = format_number_key(node.number);
                let number = node.number;
                self.intern_literal(key, node.line, move |w| {
                    w.op(OpCode::PushN);
                    w.number(number);
                })
            }
            Kind::String => {
                let key = format!("${}", node.text);
                let text = node.text.clone();
                self.intern_literal(key, node.line, move |w| {
                    w.op(OpCode::PushS);
                    w.string(&text);
                })
            }
            Kind::List => self.compile_list(node, target),
            Kind::Dictionary => self.compile_dictionary(node, target),
            Kind::Pair => unreachable!("Pair is only ever visited via compile_dictionary"),
            Kind::Sum => self.compile_binop(node, target, OpCode::Add),
            Kind::Difference => self.compile_binop(node, target, OpCode::Sub),
            Kind::Product => self.compile_binop(node, target, OpCode::Mul),
            Kind::Division => self.compile_binop(node, target, OpCode::Div),
            Kind::And => self.compile_binop(node, target, OpCode::And),
            Kind::Or => self.compile_binop(node, target, OpCode::Or),
            Kind::Equals => self.compile_binop(node, target, OpCode::Eq),
            Kind::NotEquals => self.compile_binop(node, target, OpCode::Neq),
            Kind::Greater => self.compile_comparison(node, target, OpCode::Gr),
            Kind::GreaterEquals => self.compile_comparison(node, target, OpCode::Gre),
            Kind::Lesser => self.compile_comparison(node, target, OpCode::Ls),
            Kind::LesserEquals => self.compile_comparison(node, target, OpCode::Lse),
            Kind::Negation => {
                let loc = self.compile(&node.children[0], self.fresh_register(target))?;
                self.note_register(loc);
                self.note_register(target);
                self.writer.op(OpCode::Negate);
                self.writer.loc(target);
                self.writer.loc(loc);
                Ok(target)
            }
            Kind::Not => {
                let loc = self.compile(&node.children[0], self.fresh_register(target))?;
                self.note_register(loc);
                self.note_register(target);
                self.writer.op(OpCode::Not);
                self.writer.loc(target);
                self.writer.loc(loc);
                Ok(target)
            }
            Kind::Argument => unreachable!("Argument is only ever visited via compile_function_def"),
        }
    }

    fn compile_block(&mut self, node: &Node, target: Location) -> Result<Location> {
        let start_len = self.names.len();
        for child in &node.children {
            self.compile(child, target)?;
        }
        self.delete_values(start_len);
        Ok(target)
    }

    fn compile_if(&mut self, node: &Node, target: Location) -> Result<Location> {
        let cond_loc = self.compile(&node.children[0], self.fresh_register(target))?;
        self.note_register(cond_loc);
        self.writer.op(OpCode::JumpCond);
        self.writer.loc(cond_loc);
        let exit_jump = self.writer.placeholder_u32();

        self.compile(&node.children[1], target)?;

        if node.children.len() == 3 {
            self.writer.op(OpCode::Jump);
            let skip_else = self.writer.placeholder_u32();
            let else_entry = self.writer.len() as u32;
            self.writer.patch_u32(exit_jump, else_entry);
            self.compile(&node.children[2], target)?;
            let after = self.writer.len() as u32;
            self.writer.patch_u32(skip_else, after);
        } else {
            let after = self.writer.len() as u32;
            self.writer.patch_u32(exit_jump, after);
        }
        Ok(target)
    }

    fn compile_while(&mut self, node: &Node, target: Location) -> Result<Location> {
        let cond = &node.children[0];
        let body = &node.children[1];

        self.compile_declare_only(cond, self.fresh_register(target))?;

        let loop_top = self.writer.len() as u32;
        let cond_loc = self.compile(cond, self.fresh_register(target))?;
        self.note_register(cond_loc);
        self.writer.op(OpCode::JumpCond);
        self.writer.loc(cond_loc);
        let exit_jump = self.writer.placeholder_u32();

        self.loop_unwind_sizes.push(self.names.len());
        self.continues.push(Vec::new());
        self.breaks.push(Vec::new());

        let body_start = self.names.len();
        self.compile(body, target)?;
        self.delete_values(body_start);

        self.writer.op(OpCode::Jump);
        self.writer.u32(loop_top);
        let after = self.writer.len() as u32;
        self.writer.patch_u32(exit_jump, after);

        let continues = self.continues.pop().unwrap();
        for at in continues {
            self.writer.patch_u32(at, loop_top);
        }
        let breaks = self.breaks.pop().unwrap();
        for at in breaks {
            self.writer.patch_u32(at, after);
        }
        self.loop_unwind_sizes.pop();
        Ok(target)
    }

    fn compile_for(&mut self, node: &Node, target: Location) -> Result<Location> {
        let init = &node.children[0];
        let cond = &node.children[1];
        let step = &node.children[2];
        let body = &node.children[3];

        self.compile_declare_only(cond, self.fresh_register(target))?;
        self.compile_declare_only(step, target)?;

        self.compile(init, target)?;

        let loop_top = self.writer.len() as u32;
        let cond_loc = self.compile(cond, self.fresh_register(target))?;
        self.note_register(cond_loc);
        self.writer.op(OpCode::JumpCond);
        self.writer.loc(cond_loc);
        let exit_jump = self.writer.placeholder_u32();

        self.loop_unwind_sizes.push(self.names.len());
        self.continues.push(Vec::new());
        self.breaks.push(Vec::new());

        let body_start = self.names.len();
        self.compile(body, target)?;
        self.delete_values(body_start);

        let step_index = self.writer.len() as u32;
        self.compile(step, target)?;

        self.writer.op(OpCode::Jump);
        self.writer.u32(loop_top);
        let after = self.writer.len() as u32;
        self.writer.patch_u32(exit_jump, after);

        let continues = self.continues.pop().unwrap();
        for at in continues {
            self.writer.patch_u32(at, step_index);
        }
        let breaks = self.breaks.pop().unwrap();
        for at in breaks {
            self.writer.patch_u32(at, after);
        }
        self.loop_unwind_sizes.pop();
        Ok(target)
    }

    fn compile_continue(&mut self, node: &Node) -> Result<Location> {
        let unwind_to = *self.loop_unwind_sizes.last().unwrap();
        self.emit_pop_count(self.names.len() - unwind_to);
        self.writer.op(OpCode::Jump);
        let at = self.writer.placeholder_u32();
        self.continues.last_mut().unwrap().push(at);
        let _ = node;
        Ok(0)
    }

    fn compile_break(&mut self, node: &Node) -> Result<Location> {
        let unwind_to = *self.loop_unwind_sizes.last().unwrap();
        self.emit_pop_count(self.names.len() - unwind_to);
        self.writer.op(OpCode::Jump);
        let at = self.writer.placeholder_u32();
        self.breaks.last_mut().unwrap().push(at);
        let _ = node;
        Ok(0)
    }

    fn compile_function_def(&mut self, node: &Node) -> Result<Location> {
        let loc = match self.find_local(&node.text) {
            Some(loc) => loc,
            None => self.declare(node.text.clone(), node.line)?,
        };
        self.script_functions.insert(node.text.clone(), loc);

        self.writer.op(OpCode::StoreAtF);
        self.writer.loc(loc);
        let ip_patch = self.writer.placeholder_u32();
        let n_args = (node.children.len() - 1) as u8;
        self.writer.small(n_args);
        let n_regs_patch = self.writer.placeholder_u8();
        self.mark_emitted(loc);

        self.writer.op(OpCode::Jump);
        let skip_body = self.writer.placeholder_u32();

        let entry_ip = self.writer.len() as u32;
        self.writer.patch_u32(ip_patch, entry_ip);

        let frame_base = self.names.len();
        self.frame_bases.push(frame_base);
        self.register_high_water.push(0);

        for arg in &node.children[..node.children.len() - 1] {
            let arg_loc = self.declare(arg.text.clone(), arg.line)?;
            self.mark_emitted(arg_loc);
        }

        let body = node.children.last().unwrap();
        self.compile(body, -1)?;

        self.writer.op(OpCode::ReturnNil);

        let n_regs = self.register_high_water.pop().unwrap();
        self.writer.patch_u8(n_regs_patch, n_regs);

        self.names.truncate(frame_base);
        self.frame_bases.pop();

        let after = self.writer.len() as u32;
        self.writer.patch_u32(skip_body, after);

        Ok(loc)
    }

    fn compile_return(&mut self, node: &Node, target: Location) -> Result<Location> {
        if let Some(expr) = node.children.first() {
            let loc = self.compile(expr, target)?;
            self.note_register(loc);
            self.writer.op(OpCode::Return);
            self.writer.loc(loc);
        } else {
            self.writer.op(OpCode::ReturnNil);
        }
        Ok(target)
    }

    fn compile_variable(&mut self, node: &Node) -> Result<Location> {
        // A name can already be in `names` without having been pushed for
        // real yet: a declare-only pre-walk stabilizes identifiers that a
        // `while`/`for` header's condition or step assigns to, so the body
        // compiled between them resolves the same slot. The first real
        // encounter — wherever it falls in program order — is responsible
        // for the actual `PUSH`.
        if let Some(loc) = self.find_local(&node.text) {
            if !self.is_emitted(loc) {
                self.writer.op(OpCode::Push);
                self.mark_emitted(loc);
            }
            return Ok(loc);
        }
        if !self.variable_declaration_allowed {
            return Err(Error::Semantic {
                line: node.line,
                message: format!("undefined variable '{}'", node.text),
            });
        }
        let loc = self.declare(node.text.clone(), node.line)?;
        self.writer.op(OpCode::Push);
        self.mark_emitted(loc);
        Ok(loc)
    }

    fn compile_assignment(&mut self, node: &Node, target: Location) -> Result<Location> {
        let lhs = &node.children[0];
        let rhs = &node.children[1];
        match lhs.kind {
            Kind::Variable => {
                self.variable_declaration_allowed = true;
                let var_loc = self.compile_variable(lhs);
                self.variable_declaration_allowed = false;
                let var_loc = var_loc?;

                let result = self.compile(rhs, var_loc)?;
                self.note_register(result);
                if result != var_loc {
                    self.writer.op(OpCode::Move);
                    self.writer.loc(var_loc);
                    self.writer.loc(result);
                }
                Ok(var_loc)
            }
            Kind::ContainerElement => {
                let locs =
                    self.compile_operands(&[&lhs.children[0], &lhs.children[1]], target)?;
                let value_loc = self.compile(rhs, target)?;
                self.note_register(value_loc);
                self.writer.op(OpCode::Set);
                self.writer.loc(value_loc);
                self.writer.loc(locs[0]);
                self.writer.loc(locs[1]);
                Ok(target)
            }
            _ => Err(Error::Semantic {
                line: node.line,
                message: "left-hand side of an assignment must be a variable or x[i]".to_string(),
            }),
        }
    }

    fn compile_binop(&mut self, node: &Node, target: Location, op: OpCode) -> Result<Location> {
        let locs = self.compile_operands(&[&node.children[0], &node.children[1]], target)?;
        self.note_register(target);
        self.writer.op(op);
        self.writer.loc(target);
        self.writer.loc(locs[0]);
        self.writer.loc(locs[1]);
        Ok(target)
    }

    fn compile_comparison(&mut self, node: &Node, target: Location, op: OpCode) -> Result<Location> {
        check_comparison_consistency(node)?;
        self.compile_binop(node, target, op)
    }

    fn compile_list(&mut self, node: &Node, target: Location) -> Result<Location> {
        self.note_register(target);
        self.writer.op(OpCode::ListNew);
        self.writer.loc(target);
        let mut offer = self.fresh_register(target);
        for element in &node.children {
            let loc = self.compile(element, offer)?;
            self.note_register(loc);
            if loc == offer {
                offer = self.next_offer(offer, element.line)?;
            }
            self.writer.op(OpCode::ListAdd);
            self.writer.loc(target);
            self.writer.loc(loc);
        }
        Ok(target)
    }

    fn compile_dictionary(&mut self, node: &Node, target: Location) -> Result<Location> {
        self.note_register(target);
        self.writer.op(OpCode::DictNew);
        self.writer.loc(target);
        let mut offer = self.fresh_register(target);
        for pair in &node.children {
            let key_loc = self.compile(&pair.children[0], offer)?;
            self.note_register(key_loc);
            if key_loc == offer {
                offer = self.next_offer(offer, pair.line)?;
            }
            let value_loc = self.compile(&pair.children[1], offer)?;
            self.note_register(value_loc);
            if value_loc == offer {
                offer = self.next_offer(offer, pair.line)?;
            }
            self.writer.op(OpCode::DictAdd);
            self.writer.loc(target);
            self.writer.loc(key_loc);
            self.writer.loc(value_loc);
        }
        Ok(target)
    }

    fn compile_call(&mut self, node: &Node, target: Location) -> Result<Location> {
        for arg in &node.children {
            self.compile_declare_only(arg, target)?;
        }

        if let Some(loc) = self.find_local(&node.text) {
            return self.compile_script_call(node, target, loc, OpCode::PCallSfL, OpCode::CallSfL);
        }
        if let Some(&loc) = self.script_functions.get(&node.text) {
            return self.compile_script_call(node, target, loc, OpCode::PCallSfG, OpCode::CallSfG);
        }
        if let Some((group_id, function_id, sig)) = self.host.lookup(&node.text) {
            if !sig.accepts(node.children.len()) {
                return Err(Error::Semantic {
                    line: node.line,
                    message: format!(
                        "'{}' expects {} but got {}",
                        node.text,
                        sig.describe(),
                        node.children.len()
                    ),
                });
            }
            let mut arg_locs = Vec::with_capacity(node.children.len());
            let mut offer = self.fresh_register(target);
            for arg in &node.children {
                let loc = self.compile(arg, offer)?;
                self.note_register(loc);
                if loc == offer {
                    offer = self.next_offer(offer, arg.line)?;
                }
                arg_locs.push(loc);
            }
            for loc in &arg_locs {
                self.writer.op(OpCode::PushVal);
                self.writer.loc(*loc);
            }
            self.writer.op(OpCode::CallHf);
            self.writer.small(group_id);
            self.writer.small(function_id);
            self.writer.small(node.children.len() as u8);
            self.note_register(target);
            self.writer.op(OpCode::PopTo);
            self.writer.loc(target);
            return Ok(target);
        }
        Err(Error::Semantic {
            line: node.line,
            message: format!("call to undefined function '{}'", node.text),
        })
    }

    fn compile_script_call(
        &mut self,
        node: &Node,
        target: Location,
        callee_loc: Location,
        pcall: OpCode,
        call: OpCode,
    ) -> Result<Location> {
        self.writer.op(pcall);
        self.writer.loc(callee_loc);

        let mut arg_locs = Vec::with_capacity(node.children.len());
        let mut offer = self.fresh_register(target);
        for arg in &node.children {
            let loc = self.compile(arg, offer)?;
            self.note_register(loc);
            if loc == offer {
                offer = self.next_offer(offer, arg.line)?;
            }
            arg_locs.push(loc);
        }
        for loc in &arg_locs {
            self.writer.op(OpCode::PushVal);
            self.writer.loc(*loc);
        }

        self.writer.op(call);
        self.writer.loc(callee_loc);
        self.writer.small(node.children.len() as u8);

        self.note_register(target);
        self.writer.op(OpCode::PopTo);
        self.writer.loc(target);
        Ok(target)
    }
}

fn format_number_key(n: f64) -> String {
    format!("#{}", n)
}

/// Node kinds whose compilation emits an opcode of its own (as opposed to
/// `Variable`/`Nil`/`Number`/`String`/`Boolean`, whose "emission" is the
/// literal-interning `PUSH` that a declare-only pass must still perform).
fn is_computed_kind(kind: Kind) -> bool {
    matches!(
        kind,
        Kind::FunctionCall
            | Kind::List
            | Kind::Dictionary
            | Kind::ContainerElement
            | Kind::Assignment
            | Kind::Sum
            | Kind::Difference
            | Kind::Product
            | Kind::Division
            | Kind::And
            | Kind::Or
            | Kind::Equals
            | Kind::NotEquals
            | Kind::Greater
            | Kind::GreaterEquals
            | Kind::Lesser
            | Kind::LesserEquals
            | Kind::Negation
            | Kind::Not
    )
}

/// Rejects disequality against `Nil`/`Boolean`, and a numeric-vs-string
/// comparison between two literals — the only case the compiler can catch
/// before runtime, since both operands are already known.
fn check_comparison_consistency(node: &Node) -> Result<()> {
    let a = &node.children[0];
    let b = &node.children[1];
    if a.kind == Kind::Nil || b.kind == Kind::Nil {
        return Err(Error::Semantic {
            line: node.line,
            message: "'nil' cannot be ordered".to_string(),
        });
    }
    if a.kind == Kind::Boolean || b.kind == Kind::Boolean {
        return Err(Error::Semantic {
            line: node.line,
            message: "booleans cannot be ordered".to_string(),
        });
    }
    let numeric_vs_string = matches!(
        (a.kind, b.kind),
        (Kind::Number, Kind::String) | (Kind::String, Kind::Number)
    );
    if numeric_vs_string {
        return Err(Error::Semantic {
            line: node.line,
            message: "cannot order a number against a string".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Reader;

    fn compile_source(source: &str) -> Vec<u8> {
        let host = HostRegistry::new();
        compile(source, &host).unwrap()
    }

    #[test]
    fn emits_a_well_formed_header() {
        let bytes = compile_source("1 + 2\n");
        let mut reader = Reader::new(&bytes);
        let total = crate::bytecode::read_header(&mut reader).unwrap();
        assert_eq!(total as usize, bytes.len());
        assert_eq!(reader.read_opcode().unwrap(), OpCode::Reg);
    }

    #[test]
    fn rejects_wrong_host_arity_at_compile_time() {
        let host = HostRegistry::new();
        let err = compile("len()\n", &host).unwrap_err();
        assert!(matches!(err, Error::Semantic { .. }));
    }

    #[test]
    fn a_discarded_binary_expression_statement_still_reserves_a_register() {
        // `x + y` as a bare statement compiles with target == -1 and both
        // operands are plain variable reads, which return their own named
        // slot rather than consuming the offered register. The opcode that
        // actually writes the sum still writes to -1, so the top-level `REG`
        // count must cover it even though nothing ever reads the result.
        let bytes = compile_source("x = 1\ny = 2\nx + y\n");
        let mut reader = Reader::new(&bytes);
        crate::bytecode::read_header(&mut reader).unwrap();
        assert_eq!(reader.read_opcode().unwrap(), OpCode::Reg);
        let n_registers = reader.read_u8().unwrap();
        assert!(n_registers >= 1, "expected at least 1 register, got {n_registers}");
    }

    #[test]
    fn rejects_a_call_to_an_unknown_function() {
        let host = HostRegistry::new();
        let err = compile("nope()\n", &host).unwrap_err();
        assert!(matches!(err, Error::Semantic { .. }));
    }

    #[test]
    fn rejects_reading_an_undefined_variable() {
        let host = HostRegistry::new();
        let err = compile("print(x)\n", &host).unwrap_err();
        assert!(matches!(err, Error::Semantic { .. }));
    }

    #[test]
    fn rejects_ordering_against_nil() {
        let host = HostRegistry::new();
        let err = compile("x = 1 < nil\n", &host).unwrap_err();
        assert!(matches!(err, Error::Semantic { .. }));
    }
}
