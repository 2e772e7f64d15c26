//! A concrete `Writer` plus an in-process executor, standing in for the
//! class-file/bytecode emission backend the design treats as an external
//! collaborator (§6).
//!
//! Both generic and specialized routines execute over the same uniform,
//! tagged [`Value`] representation for every local slot and stack cell —
//! there is no separate unboxed register file. That's a deliberate
//! simplification for a reference/test backend: the behavior this
//! subsystem actually needs to prove (type guards at specialization
//! boundaries, square-peg recovery, inline-cache growth, if-fusion) shows
//! up as which instructions get emitted and how `unwrap_or_throw` behaves,
//! not as a distinct memory layout. A production backend targeting real
//! unboxed registers would implement the same [`Writer`] contract
//! differently without changing anything upstream of it.

use std::sync::Arc;

use kestrel_core::{Cat, ConstValue, FunctionId, RuntimeError, Value};

use crate::squarepeg::SquarePegException;
use crate::writer::{Label, Writer};

#[derive(Debug, Clone)]
pub enum Instr {
    LoadLocal(u32),
    StoreLocal(u32),
    LoadConst(ConstValue),
    Box,
    UnwrapOrThrow(Cat),
    Jump(Label),
    JumpIfFalse(Label),
    CompareAndBranch(Arc<str>, Label, Label),
    ApplyPrimitive(Arc<str>, u32),
    InvokeStatic(FunctionId, u32),
    InvokeDynamic(u32, u32),
    MakeClosure(FunctionId, Vec<u32>),
    BeginTry(Label, Vec<u32>),
    EndTry,
    Return,
    Pop,
}

/// A finished, runnable routine: its instruction stream plus resolved
/// label positions and the number of local slots its frame needs.
#[derive(Debug, Clone)]
pub struct Routine {
    pub instrs: Vec<Instr>,
    label_positions: Vec<usize>,
    pub local_count: u32,
}

/// Builds one [`Routine`]. A fresh `ReferenceBackend` per routine — the
/// generic routine, the specialized routine, and any recovery
/// continuation inlined into it are each their own instruction stream (the
/// recovery continuation is emitted directly into the specialized
/// routine's stream by codegen, not as a separately linked routine).
pub struct ReferenceBackend {
    instrs: Vec<Instr>,
    labels: Vec<Option<usize>>,
    local_count: u32,
}

impl ReferenceBackend {
    pub fn new(local_count: u32) -> Self {
        ReferenceBackend { instrs: Vec::new(), labels: Vec::new(), local_count }
    }

    pub fn finish(self) -> Routine {
        let label_positions = self
            .labels
            .into_iter()
            .enumerate()
            .map(|(i, pos)| pos.unwrap_or_else(|| panic!("label {i} was never marked")))
            .collect();
        Routine { instrs: self.instrs, label_positions, local_count: self.local_count }
    }
}

impl Writer for ReferenceBackend {
    fn new_label(&mut self) -> Label {
        self.labels.push(None);
        (self.labels.len() - 1) as u32
    }

    fn mark_label(&mut self, label: Label) {
        self.labels[label as usize] = Some(self.instrs.len());
    }

    fn load_local(&mut self, slot: u32, _cat: Cat) {
        self.instrs.push(Instr::LoadLocal(slot));
    }

    fn store_local(&mut self, slot: u32, _cat: Cat) {
        self.instrs.push(Instr::StoreLocal(slot));
    }

    fn load_const(&mut self, value: ConstValue) {
        self.instrs.push(Instr::LoadConst(value));
    }

    fn box_value(&mut self, _from: Cat) {
        self.instrs.push(Instr::Box);
    }

    fn unwrap_or_throw(&mut self, to: Cat) {
        self.instrs.push(Instr::UnwrapOrThrow(to));
    }

    fn jump(&mut self, label: Label) {
        self.instrs.push(Instr::Jump(label));
    }

    fn jump_if_false(&mut self, label: Label) {
        self.instrs.push(Instr::JumpIfFalse(label));
    }

    fn compare_and_branch(&mut self, op: &str, then_label: Label, else_label: Label) {
        self.instrs.push(Instr::CompareAndBranch(Arc::from(op), then_label, else_label));
    }

    fn apply_primitive(&mut self, name: Arc<str>, arity: u32, _result_cat: Cat) {
        self.instrs.push(Instr::ApplyPrimitive(name, arity));
    }

    fn invoke_static(&mut self, function: FunctionId, arg_cats: Vec<Cat>, _ret_cat: Cat) {
        self.instrs.push(Instr::InvokeStatic(function, arg_cats.len() as u32));
    }

    fn invoke_dynamic(&mut self, site: u32, arg_cats: Vec<Cat>, _ret_cat: Cat) {
        self.instrs.push(Instr::InvokeDynamic(site, arg_cats.len() as u32));
    }

    fn make_closure(&mut self, function: FunctionId, copied_slots: Vec<u32>) {
        self.instrs.push(Instr::MakeClosure(function, copied_slots));
    }

    fn begin_try(&mut self, handler: Label, spill_slots: Vec<u32>) {
        self.instrs.push(Instr::BeginTry(handler, spill_slots));
    }

    fn end_try(&mut self) {
        self.instrs.push(Instr::EndTry);
    }

    fn emit_return(&mut self, _cat: Cat) {
        self.instrs.push(Instr::Return);
    }

    fn pop(&mut self) {
        self.instrs.push(Instr::Pop);
    }
}

/// Resolves `InvokeStatic`/`InvokeDynamic`/`MakeClosure`/`ApplyPrimitive`
/// against whatever owns the primitive registry, the function registry,
/// and call sites. `kestrel-compiler`'s own tests use
/// [`crate::primitive::PrimitiveRegistry`] directly and reject calls;
/// `kestrel-runtime` supplies the real thing.
pub trait ExecutionHooks {
    fn apply_primitive(&mut self, name: &str, args: &[Value]) -> Result<Value, RuntimeError>;
    fn invoke_static(&mut self, function: FunctionId, args: &[Value]) -> Result<Value, RuntimeError>;
    fn invoke_dynamic(&mut self, site: u32, closure: &Value, args: &[Value]) -> Result<Value, RuntimeError>;
    fn make_closure(&mut self, function: FunctionId, copied: Vec<Value>) -> Value;
}

/// Runs a routine's instructions to completion (a `Return`) or propagates
/// the first `RuntimeError` raised by a primitive/call.
pub fn execute(
    routine: &Routine,
    mut locals: Vec<Value>,
    hooks: &mut dyn ExecutionHooks,
) -> Result<Value, RuntimeError> {
    let mut stack: Vec<Value> = Vec::new();
    let mut try_handlers: Vec<(usize, Vec<u32>)> = Vec::new();
    let mut pc = 0usize;

    loop {
        match &routine.instrs[pc] {
            Instr::LoadLocal(slot) => {
                stack.push(locals[*slot as usize].clone());
                pc += 1;
            }
            Instr::StoreLocal(slot) => {
                let v = stack.pop().expect("operand stack underflow");
                locals[*slot as usize] = v;
                pc += 1;
            }
            Instr::LoadConst(cv) => {
                stack.push(const_to_value(cv));
                pc += 1;
            }
            Instr::Box => {
                let v = stack.pop().expect("operand stack underflow");
                stack.push(v.boxed());
                pc += 1;
            }
            Instr::UnwrapOrThrow(to) => {
                let v = stack.pop().expect("operand stack underflow");
                let unwrapped = match to {
                    Cat::Int => v.as_int().map(Value::Int),
                    Cat::Bool => v.as_bool().map(Value::Bool),
                    Cat::Ref | Cat::Void => None,
                };
                match unwrapped {
                    Some(ok) => {
                        stack.push(ok);
                        pc += 1;
                    }
                    None => {
                        let spe = SquarePegException::new(v);
                        match try_handlers.pop() {
                            Some((handler_pc, spill)) => {
                                for slot in spill {
                                    locals[slot as usize] = locals[slot as usize].clone().boxed();
                                }
                                stack.clear();
                                stack.push(spe.offending_value);
                                pc = handler_pc;
                            }
                            None => {
                                return Err(RuntimeError::new(format!(
                                    "unrecovered type guard failure: {}",
                                    spe.offending_value
                                )));
                            }
                        }
                    }
                }
            }
            Instr::Jump(label) => pc = routine.label_positions[*label as usize],
            Instr::JumpIfFalse(label) => {
                let v = stack.pop().expect("operand stack underflow");
                if !v.as_bool().unwrap_or(false) {
                    pc = routine.label_positions[*label as usize];
                } else {
                    pc += 1;
                }
            }
            Instr::CompareAndBranch(op, then_label, else_label) => {
                let b = stack.pop().expect("operand stack underflow");
                let a = stack.pop().expect("operand stack underflow");
                let (a, b) = (a.as_int().unwrap_or(0), b.as_int().unwrap_or(0));
                let taken = match op.as_ref() {
                    "<" => a < b,
                    ">" => a > b,
                    "=" => a == b,
                    other => unreachable!("compare_and_branch with non-comparison op `{other}`"),
                };
                pc = routine.label_positions[(if taken { *then_label } else { *else_label }) as usize];
            }
            Instr::ApplyPrimitive(name, arity) => {
                let split_at = stack.len() - *arity as usize;
                let args: Vec<Value> = stack.split_off(split_at);
                let result = hooks.apply_primitive(name, &args)?;
                stack.push(result);
                pc += 1;
            }
            Instr::InvokeStatic(function, arity) => {
                let split_at = stack.len() - *arity as usize;
                let args: Vec<Value> = stack.split_off(split_at);
                let result = hooks.invoke_static(*function, &args)?;
                stack.push(result);
                pc += 1;
            }
            Instr::InvokeDynamic(site, arity) => {
                let split_at = stack.len() - *arity as usize;
                let args: Vec<Value> = stack.split_off(split_at);
                let closure = stack.pop().expect("operand stack underflow: missing closure");
                let result = hooks.invoke_dynamic(*site, &closure, &args)?;
                stack.push(result);
                pc += 1;
            }
            Instr::MakeClosure(function, slots) => {
                let copied: Vec<Value> = slots.iter().map(|&s| locals[s as usize].clone()).collect();
                stack.push(hooks.make_closure(*function, copied));
                pc += 1;
            }
            Instr::BeginTry(handler, spill) => {
                try_handlers.push((routine.label_positions[*handler as usize], spill.clone()));
                pc += 1;
            }
            Instr::EndTry => {
                try_handlers.pop();
                pc += 1;
            }
            Instr::Return => return Ok(stack.pop().expect("operand stack underflow: nothing to return")),
            Instr::Pop => {
                stack.pop();
                pc += 1;
            }
        }
    }
}

fn const_to_value(cv: &ConstValue) -> Value {
    match cv {
        ConstValue::Int(n) => Value::Int(*n),
        ConstValue::Bool(b) => Value::Bool(*b),
        ConstValue::Str(s) => Value::string(s.clone()),
        ConstValue::Null => Value::null(),
    }
}
