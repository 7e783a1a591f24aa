//! Tree-walking interpreter for the script subset
//!
//! Safe points sit at every statement, every loop iteration and every entry
//! into a script function. At a safe point the armed watch is polled for a
//! termination request or an expired budget, then any pending injected
//! exception is raised. Terminations unwind through `catch` and `finally`
//! untouched; thrown values, injected ones included, are catchable.

use crate::ast::{
    AssignOp, BinaryOp, DeclKind, Expr, FunctionDecl, LogicalOp, Program, Stmt, StmtKind, UnaryOp,
};
use crate::context::HostCapabilities;
use crate::global::GlobalScope;
use crate::heap::{ErrorKind, Heap, NativeFunction, ObjectId, ObjectKind};
use crate::report::PendingException;
use crate::value::array_index;
use crate::watch::ArmedWatch;
use crate::{TerminationReason, Value};
use serde_json::Value as JsonValue;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

/// Largest hole an index assignment may open at the end of an array
const MAX_ARRAY_GROWTH: usize = 1 << 16;

/// Nested `eval`/`exec` frames allowed on the native stack
const MAX_NESTING: usize = 512;

pub(crate) type ScopeRef = Rc<RefCell<Scope>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Global,
    Function,
    Block,
}

#[derive(Debug)]
struct Binding {
    value: Value,
    mutable: bool,
}

/// Lexical environment record
#[derive(Debug)]
pub(crate) struct Scope {
    kind: ScopeKind,
    bindings: HashMap<String, Binding>,
    parent: Option<ScopeRef>,
}

impl Scope {
    pub(crate) fn global() -> ScopeRef {
        Rc::new(RefCell::new(Scope {
            kind: ScopeKind::Global,
            bindings: HashMap::new(),
            parent: None,
        }))
    }

    fn child(parent: &ScopeRef, kind: ScopeKind) -> ScopeRef {
        Rc::new(RefCell::new(Scope {
            kind,
            bindings: HashMap::new(),
            parent: Some(parent.clone()),
        }))
    }

    /// Apply `f` to the innermost binding of `name`
    fn with_binding<R>(
        scope: &ScopeRef,
        name: &str,
        f: impl FnOnce(&mut Binding) -> R,
    ) -> Option<R> {
        let mut current = scope.clone();
        loop {
            let parent = {
                let mut frame = current.borrow_mut();
                if let Some(binding) = frame.bindings.get_mut(name) {
                    return Some(f(binding));
                }
                frame.parent.clone()
            };
            current = parent?;
        }
    }

    /// Objects bound in this record, plus the enclosing record
    pub(crate) fn trace(scope: &ScopeRef, objects: &mut Vec<ObjectId>) -> Option<ScopeRef> {
        let scope = scope.borrow();
        objects.extend(scope.bindings.values().filter_map(|binding| binding.value.as_object()));
        scope.parent.clone()
    }

    fn get(scope: &ScopeRef, name: &str) -> Option<Value> {
        Self::with_binding(scope, name, |binding| binding.value.clone())
    }

    /// Nearest function or global scope, where `var` lives
    fn var_scope(scope: &ScopeRef) -> ScopeRef {
        let mut current = scope.clone();
        loop {
            let parent = {
                let frame = current.borrow();
                if frame.kind != ScopeKind::Block {
                    None
                } else {
                    frame.parent.clone()
                }
            };
            match parent {
                Some(parent) => current = parent,
                None => return current,
            }
        }
    }
}

/// How a run ended, before classification by the evaluator
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Completion {
    Normal(Value),
    Return(Value),
    /// `line` is relative to the evaluated source
    Throw { value: Value, line: u32 },
    Terminated(TerminationReason),
}

enum Abrupt {
    Throw(Value),
    Terminate(TerminationReason),
    Return(Value),
    Break,
    Continue,
}

impl From<TerminationReason> for Abrupt {
    fn from(reason: TerminationReason) -> Self {
        Abrupt::Terminate(reason)
    }
}

type Exec<T> = Result<T, Abrupt>;

#[derive(Clone)]
struct Frame {
    scope: ScopeRef,
    this: Value,
}

impl Frame {
    fn block(&self) -> Frame {
        Frame {
            scope: Scope::child(&self.scope, ScopeKind::Block),
            this: self.this.clone(),
        }
    }
}

enum Callee {
    Script(Rc<FunctionDecl>, ScopeRef),
    Native(NativeFunction),
}

pub(crate) struct Interpreter<'a> {
    heap: &'a mut Heap,
    global: &'a GlobalScope,
    pending: &'a PendingException,
    watch: &'a ArmedWatch<'a>,
    max_call_depth: usize,
    depth: usize,
    nesting: usize,
    line: u32,
    throw_line: u32,
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(
        heap: &'a mut Heap,
        global: &'a GlobalScope,
        pending: &'a PendingException,
        watch: &'a ArmedWatch<'a>,
        max_call_depth: usize,
    ) -> Self {
        Self {
            heap,
            global,
            pending,
            watch,
            max_call_depth,
            depth: 0,
            nesting: 0,
            line: 1,
            throw_line: 1,
        }
    }

    pub(crate) fn run_program(&mut self, program: &Program) -> Completion {
        let frame = self.global_frame();
        let mut completion = Value::Undefined;
        let result = self
            .exec_statements(&program.body, &frame, &mut completion)
            .map(|()| completion);
        self.finish(result)
    }

    /// Invoke the global event handler property `handler` with a fresh event
    ///
    /// Passes one safe point first, so a pending exception surfaces even when
    /// the script installed no handler.
    pub(crate) fn dispatch(
        &mut self,
        handler: &str,
        build_event: impl FnOnce(&mut Heap) -> Result<Value, TerminationReason>,
    ) -> Completion {
        let result = self.dispatch_inner(handler, build_event);
        self.finish(result)
    }

    fn dispatch_inner(
        &mut self,
        handler: &str,
        build_event: impl FnOnce(&mut Heap) -> Result<Value, TerminationReason>,
    ) -> Exec<Value> {
        self.safe_point()?;

        let global = self.global.object();
        let listener = self.heap.get(global).get(handler).cloned().unwrap_or_default();
        if !self.is_callable(&listener) {
            return Ok(Value::Undefined);
        }

        let event = build_event(&mut *self.heap)?;
        self.call(&listener, Value::Object(global), vec![event], handler)
    }

    fn finish(&self, result: Exec<Value>) -> Completion {
        match result {
            Ok(value) => Completion::Normal(value),
            Err(Abrupt::Return(value)) => Completion::Return(value),
            Err(Abrupt::Throw(value)) => Completion::Throw {
                value,
                line: self.throw_line,
            },
            Err(Abrupt::Terminate(reason)) => Completion::Terminated(reason),
            // the parser rejects break/continue outside loops
            Err(Abrupt::Break | Abrupt::Continue) => Completion::Normal(Value::Undefined),
        }
    }

    fn global_frame(&self) -> Frame {
        Frame {
            scope: self.global.lexical().clone(),
            this: Value::Object(self.global.object()),
        }
    }

    // === Safe points and errors ===

    fn safe_point(&mut self) -> Exec<()> {
        if let Some(reason) = self.watch.poll() {
            return Err(Abrupt::Terminate(reason));
        }
        if let Some(exception) = self.pending.take() {
            return Err(self.raise(exception));
        }
        Ok(())
    }

    fn raise(&mut self, value: Value) -> Abrupt {
        self.throw_line = self.line;
        Abrupt::Throw(value)
    }

    fn throw_error(&mut self, kind: ErrorKind, message: impl AsRef<str>) -> Abrupt {
        match self.heap.error_value(kind, message.as_ref()) {
            Ok(error) => self.raise(error),
            Err(reason) => Abrupt::Terminate(reason),
        }
    }

    fn stack_overflow(&mut self) -> Abrupt {
        self.throw_error(ErrorKind::RangeError, "Maximum call stack size exceeded")
    }

    /// Checked string result of a script operation
    fn string(&mut self, s: String) -> Exec<Value> {
        if s.len() > self.heap.max_string_length() {
            return Err(self.throw_error(ErrorKind::RangeError, "Invalid string length"));
        }
        Ok(Value::String(s))
    }

    /// Run `f` one native frame deeper
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Exec<T>) -> Exec<T> {
        if self.nesting >= MAX_NESTING {
            return Err(self.stack_overflow());
        }
        self.nesting += 1;
        let result = f(self);
        self.nesting -= 1;
        result
    }

    // === Statements ===

    fn exec_statements(
        &mut self,
        body: &[Stmt],
        frame: &Frame,
        completion: &mut Value,
    ) -> Exec<()> {
        self.hoist(body, frame)?;
        for stmt in body {
            self.exec(stmt, frame, completion)?;
        }
        Ok(())
    }

    fn exec_block(&mut self, body: &[Stmt], frame: &Frame, completion: &mut Value) -> Exec<()> {
        self.exec_statements(body, &frame.block(), completion)
    }

    fn hoist(&mut self, body: &[Stmt], frame: &Frame) -> Exec<()> {
        for stmt in body {
            if let StmtKind::Function(decl) = &stmt.kind {
                let function = self.make_function(decl, &frame.scope)?;
                let name = decl.name.as_deref().unwrap_or_default();
                self.declare_var(frame, name, Some(function))?;
            }
        }
        Ok(())
    }

    fn exec(&mut self, stmt: &Stmt, frame: &Frame, completion: &mut Value) -> Exec<()> {
        self.nested(|this| this.exec_stmt(stmt, frame, completion))
    }

    fn exec_stmt(&mut self, stmt: &Stmt, frame: &Frame, completion: &mut Value) -> Exec<()> {
        self.line = stmt.line;
        self.safe_point()?;

        match &stmt.kind {
            StmtKind::Expr(expr) => {
                *completion = self.eval(expr, frame)?;
            }
            StmtKind::Declare { kind, declarations } => {
                for (name, init) in declarations {
                    let value = match init {
                        Some(expr) => Some(self.eval(expr, frame)?),
                        None => None,
                    };
                    match kind {
                        DeclKind::Var => self.declare_var(frame, name, value)?,
                        _ => self.declare_lexical(frame, *kind, name, value.unwrap_or_default())?,
                    }
                }
            }
            StmtKind::Function(_) | StmtKind::Empty => {}
            StmtKind::Block(body) => self.exec_block(body, frame, completion)?,
            StmtKind::If {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, frame)?.truthy() {
                    self.exec(consequent, frame, completion)?;
                } else if let Some(alternate) = alternate {
                    self.exec(alternate, frame, completion)?;
                }
            }
            StmtKind::While { test, body } => loop {
                self.safe_point()?;
                if !self.eval(test, frame)?.truthy() {
                    break;
                }
                if !self.loop_iteration(body, frame, completion)? {
                    break;
                }
            },
            StmtKind::DoWhile { body, test } => loop {
                self.safe_point()?;
                if !self.loop_iteration(body, frame, completion)? {
                    break;
                }
                if !self.eval(test, frame)?.truthy() {
                    break;
                }
            },
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => {
                let loop_frame = frame.block();
                if let Some(init) = init {
                    self.exec(init, &loop_frame, &mut Value::Undefined)?;
                }
                loop {
                    self.safe_point()?;
                    if let Some(test) = test {
                        if !self.eval(test, &loop_frame)?.truthy() {
                            break;
                        }
                    }
                    if !self.loop_iteration(body, &loop_frame, completion)? {
                        break;
                    }
                    if let Some(update) = update {
                        self.eval(update, &loop_frame)?;
                    }
                }
            }
            StmtKind::Break => return Err(Abrupt::Break),
            StmtKind::Continue => return Err(Abrupt::Continue),
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, frame)?,
                    None => Value::Undefined,
                };
                return Err(Abrupt::Return(value));
            }
            StmtKind::Throw(expr) => {
                let value = self.eval(expr, frame)?;
                return Err(self.raise(value));
            }
            StmtKind::Try {
                block,
                param,
                handler,
                finalizer,
            } => {
                let result = match (self.exec_block(block, frame, completion), handler) {
                    (Err(Abrupt::Throw(exception)), Some(handler)) => {
                        let catch_frame = frame.block();
                        if let Some(param) = param {
                            catch_frame.scope.borrow_mut().bindings.insert(
                                param.clone(),
                                Binding {
                                    value: exception,
                                    mutable: true,
                                },
                            );
                        }
                        self.exec_statements(handler, &catch_frame, completion)
                    }
                    (result, _) => result,
                };

                if let Some(finalizer) = finalizer {
                    if !matches!(result, Err(Abrupt::Terminate(_))) {
                        // finally only changes the outcome when it completes abruptly
                        self.exec_block(finalizer, frame, &mut Value::Undefined)?;
                    }
                }
                result?;
            }
        }
        Ok(())
    }

    /// Run one loop body; false once the loop should stop
    fn loop_iteration(
        &mut self,
        body: &Stmt,
        frame: &Frame,
        completion: &mut Value,
    ) -> Exec<bool> {
        match self.exec(body, frame, completion) {
            Ok(()) | Err(Abrupt::Continue) => Ok(true),
            Err(Abrupt::Break) => Ok(false),
            Err(other) => Err(other),
        }
    }

    fn declare_var(&mut self, frame: &Frame, name: &str, value: Option<Value>) -> Exec<()> {
        let scope = Scope::var_scope(&frame.scope);
        let kind = scope.borrow().kind;
        if kind == ScopeKind::Global {
            let global = self.global.object();
            let declared = self.heap.get(global).get(name).is_some();
            match value {
                Some(value) => self.heap.set_property(global, name, value)?,
                None if !declared => self.heap.set_property(global, name, Value::Undefined)?,
                None => {}
            }
            return Ok(());
        }

        let mut scope = scope.borrow_mut();
        match value {
            Some(value) => {
                scope
                    .bindings
                    .insert(name.to_string(), Binding { value, mutable: true });
            }
            None => {
                scope.bindings.entry(name.to_string()).or_insert(Binding {
                    value: Value::Undefined,
                    mutable: true,
                });
            }
        }
        Ok(())
    }

    fn declare_lexical(
        &mut self,
        frame: &Frame,
        kind: DeclKind,
        name: &str,
        value: Value,
    ) -> Exec<()> {
        let already_declared = frame.scope.borrow().bindings.contains_key(name);
        if already_declared {
            return Err(self.throw_error(
                ErrorKind::SyntaxError,
                format!("Identifier '{name}' has already been declared"),
            ));
        }
        frame.scope.borrow_mut().bindings.insert(
            name.to_string(),
            Binding {
                value,
                mutable: kind != DeclKind::Const,
            },
        );
        Ok(())
    }

    // === Expressions ===

    fn eval(&mut self, expr: &Expr, frame: &Frame) -> Exec<Value> {
        self.nested(|this| this.eval_expr(expr, frame))
    }

    fn eval_expr(&mut self, expr: &Expr, frame: &Frame) -> Exec<Value> {
        let value = match expr {
            Expr::Number(n) => Value::Number(*n),
            Expr::Str(s) => Value::String(s.clone()),
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Null => Value::Null,
            Expr::Undefined => Value::Undefined,
            Expr::This => frame.this.clone(),
            Expr::Ident(name) => self.lookup(name, frame)?,
            Expr::Array(items) => {
                let values = self.eval_args(items, frame)?;
                Value::Object(self.heap.allocate(ObjectKind::Array(values), Vec::new())?)
            }
            Expr::Object(entries) => {
                let mut properties: Vec<(String, Value)> = Vec::with_capacity(entries.len());
                for (key, expr) in entries {
                    let value = self.eval(expr, frame)?;
                    match properties.iter_mut().find(|(name, _)| name == key) {
                        Some((_, slot)) => *slot = value,
                        None => properties.push((key.clone(), value)),
                    }
                }
                Value::Object(self.heap.allocate(ObjectKind::Ordinary, properties)?)
            }
            Expr::Function(decl) => self.make_function(decl, &frame.scope)?,
            Expr::Unary { op, operand } => self.eval_unary(*op, operand, frame)?,
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, frame)?;
                let right = self.eval(right, frame)?;
                self.binary(*op, &left, &right)?
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left, frame)?;
                match (op, left.truthy()) {
                    (LogicalOp::And, true) | (LogicalOp::Or, false) => self.eval(right, frame)?,
                    _ => left,
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, frame)?.truthy() {
                    self.eval(consequent, frame)?
                } else {
                    self.eval(alternate, frame)?
                }
            }
            Expr::Assign { op, target, value } => {
                let value = match op {
                    AssignOp::Assign => self.eval(value, frame)?,
                    AssignOp::Compound(op) => {
                        let current = self.eval(target, frame)?;
                        let operand = self.eval(value, frame)?;
                        self.binary(*op, &current, &operand)?
                    }
                };
                self.assign(target, value.clone(), frame)?;
                value
            }
            Expr::Update {
                increment,
                prefix,
                target,
            } => {
                let current = self.eval(target, frame)?;
                let old = self.heap.to_number(&current);
                let new = if *increment { old + 1.0 } else { old - 1.0 };
                self.assign(target, Value::Number(new), frame)?;
                Value::Number(if *prefix { new } else { old })
            }
            Expr::Member { object, property } => {
                let object = self.eval(object, frame)?;
                self.get_property(&object, property)?
            }
            Expr::Index { object, index } => {
                let object = self.eval(object, frame)?;
                let key = self.eval(index, frame)?;
                match object.as_object().and_then(|id| self.heap.element(id, &key)) {
                    Some(element) => element,
                    None => {
                        let key = self.heap.property_key(&key);
                        self.get_property(&object, &key)?
                    }
                }
            }
            Expr::Call { callee, args } => self.eval_call(callee, args, frame)?,
            Expr::New { callee, args } => self.eval_new(callee, args, frame)?,
        };
        Ok(value)
    }

    fn eval_args(&mut self, args: &[Expr], frame: &Frame) -> Exec<Vec<Value>> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, frame)?);
        }
        Ok(values)
    }

    fn eval_unary(&mut self, op: UnaryOp, operand: &Expr, frame: &Frame) -> Exec<Value> {
        // typeof tolerates undeclared names
        if let (UnaryOp::TypeOf, Expr::Ident(name)) = (op, operand) {
            let value = self.resolve(name, frame).unwrap_or_default();
            return Ok(Value::from(self.heap.type_of(&value)));
        }

        let value = self.eval(operand, frame)?;
        let result = match op {
            UnaryOp::Neg => Value::Number(-self.heap.to_number(&value)),
            UnaryOp::Plus => Value::Number(self.heap.to_number(&value)),
            UnaryOp::Not => Value::Bool(!value.truthy()),
            UnaryOp::TypeOf => Value::from(self.heap.type_of(&value)),
        };
        Ok(result)
    }

    fn make_function(&mut self, decl: &Rc<FunctionDecl>, scope: &ScopeRef) -> Exec<Value> {
        let kind = ObjectKind::Function {
            decl: decl.clone(),
            closure: scope.clone(),
        };
        Ok(Value::Object(self.heap.allocate(kind, Vec::new())?))
    }

    // === Names ===

    fn resolve(&self, name: &str, frame: &Frame) -> Option<Value> {
        Scope::get(&frame.scope, name)
            .or_else(|| self.heap.get(self.global.object()).get(name).cloned())
    }

    fn lookup(&mut self, name: &str, frame: &Frame) -> Exec<Value> {
        match self.resolve(name, frame) {
            Some(value) => Ok(value),
            None => Err(self.throw_error(
                ErrorKind::ReferenceError,
                format!("{name} is not defined"),
            )),
        }
    }

    fn assign(&mut self, target: &Expr, value: Value, frame: &Frame) -> Exec<()> {
        match target {
            Expr::Ident(name) => {
                let assigned = Scope::with_binding(&frame.scope, name, |binding| {
                    if binding.mutable {
                        binding.value = value.clone();
                    }
                    binding.mutable
                });
                match assigned {
                    Some(true) => Ok(()),
                    Some(false) => Err(self.throw_error(
                        ErrorKind::TypeError,
                        "Assignment to constant variable.",
                    )),
                    // sloppy mode: undeclared names land on the global object
                    None => Ok(self.heap.set_property(self.global.object(), name, value)?),
                }
            }
            Expr::Member { object, property } => {
                let object = self.eval(object, frame)?;
                self.set_property(&object, property, value)
            }
            Expr::Index { object, index } => {
                let object = self.eval(object, frame)?;
                let key = self.eval(index, frame)?;
                let key = self.heap.property_key(&key);
                self.set_property(&object, &key, value)
            }
            _ => Err(self.throw_error(
                ErrorKind::SyntaxError,
                "Invalid left-hand side in assignment",
            )),
        }
    }

    // === Properties ===

    fn get_property(&mut self, object: &Value, key: &str) -> Exec<Value> {
        let value = match object {
            Value::Object(id) => {
                let target = self.heap.get(*id);
                if let ObjectKind::Array(items) = &target.kind {
                    if key == "length" {
                        return Ok(Value::Number(items.len() as f64));
                    }
                    if let Ok(index) = key.parse::<usize>() {
                        return Ok(items.get(index).cloned().unwrap_or_default());
                    }
                }
                target.get(key).cloned().unwrap_or_default()
            }
            Value::String(s) if key == "length" => Value::Number(s.chars().count() as f64),
            Value::String(s) => key
                .parse::<usize>()
                .ok()
                .and_then(|index| s.chars().nth(index))
                .map(|c| Value::String(c.to_string()))
                .unwrap_or_default(),
            Value::Undefined | Value::Null => {
                let base = self.heap.display(object);
                return Err(self.throw_error(
                    ErrorKind::TypeError,
                    format!("Cannot read properties of {base} (reading '{key}')"),
                ));
            }
            Value::Bool(_) | Value::Number(_) => Value::Undefined,
        };
        Ok(value)
    }

    fn set_property(&mut self, object: &Value, key: &str, value: Value) -> Exec<()> {
        let id = match object {
            Value::Object(id) => *id,
            Value::Undefined | Value::Null => {
                let base = self.heap.display(object);
                return Err(self.throw_error(
                    ErrorKind::TypeError,
                    format!("Cannot set properties of {base} (setting '{key}')"),
                ));
            }
            // primitives drop property writes
            _ => return Ok(()),
        };

        let len = match &self.heap.get(id).kind {
            ObjectKind::Array(items) => items.len(),
            _ => return Ok(self.heap.set_property(id, key, value)?),
        };
        let limit = len + MAX_ARRAY_GROWTH;

        let written = if key == "length" {
            match array_index(self.heap.to_number(&value)) {
                Some(new_len) if new_len <= limit => self.heap.set_length(id, new_len),
                _ => return Err(self.throw_error(ErrorKind::RangeError, "Invalid array length")),
            }
        } else {
            match key.parse::<usize>() {
                Ok(index) if index < limit => self.heap.set_element(id, index, value),
                Ok(_) => {
                    return Err(self.throw_error(ErrorKind::RangeError, "Invalid array length"));
                }
                Err(_) => self.heap.set_property(id, key, value),
            }
        };
        Ok(written?)
    }

    // === Calls ===

    fn is_callable(&self, value: &Value) -> bool {
        matches!(value, Value::Object(id) if self.heap.get(*id).is_callable())
    }

    fn callee(&self, value: &Value) -> Option<Callee> {
        let id = value.as_object()?;
        match &self.heap.get(id).kind {
            ObjectKind::Function { decl, closure } => {
                Some(Callee::Script(decl.clone(), closure.clone()))
            }
            ObjectKind::Native(native) => Some(Callee::Native(*native)),
            _ => None,
        }
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr], frame: &Frame) -> Exec<Value> {
        let (function, this, name) = match callee {
            Expr::Member { object, property } => {
                let target = self.eval(object, frame)?;
                if let Some(result) = self.array_method(&target, property, args, frame)? {
                    return Ok(result);
                }
                let function = self.get_property(&target, property)?;
                (function, target, property.clone())
            }
            Expr::Index { object, index } => {
                let target = self.eval(object, frame)?;
                let key = self.eval(index, frame)?;
                let key = self.heap.property_key(&key);
                let function = self.get_property(&target, &key)?;
                (function, target, key)
            }
            Expr::Ident(name) => (self.lookup(name, frame)?, Value::Undefined, name.clone()),
            other => (self.eval(other, frame)?, Value::Undefined, "expression".to_string()),
        };

        let args = self.eval_args(args, frame)?;
        self.call(&function, this, args, &name)
    }

    fn call(&mut self, function: &Value, this: Value, args: Vec<Value>, name: &str) -> Exec<Value> {
        match self.callee(function) {
            Some(Callee::Native(native)) => self.call_native(native, args),
            Some(Callee::Script(decl, closure)) => self.call_script(&decl, &closure, this, args),
            None => Err(self.throw_error(
                ErrorKind::TypeError,
                format!("{name} is not a function"),
            )),
        }
    }

    fn call_script(
        &mut self,
        decl: &FunctionDecl,
        closure: &ScopeRef,
        this: Value,
        args: Vec<Value>,
    ) -> Exec<Value> {
        if self.depth >= self.max_call_depth {
            return Err(self.stack_overflow());
        }
        self.safe_point()?;

        let scope = Scope::child(closure, ScopeKind::Function);
        {
            let mut locals = scope.borrow_mut();
            let mut args = args.into_iter();
            for param in &decl.params {
                let value = args.next().unwrap_or_default();
                locals
                    .bindings
                    .insert(param.clone(), Binding { value, mutable: true });
            }
        }
        let this = if this.is_nullish() {
            Value::Object(self.global.object())
        } else {
            this
        };
        let frame = Frame { scope, this };

        let call_line = self.line;
        self.depth += 1;
        let result = self.exec_statements(&decl.body, &frame, &mut Value::Undefined);
        self.depth -= 1;
        self.line = call_line;

        match result {
            Ok(()) => Ok(Value::Undefined),
            Err(Abrupt::Return(value)) => Ok(value),
            Err(other) => Err(other),
        }
    }

    fn eval_new(&mut self, callee: &Expr, args: &[Expr], frame: &Frame) -> Exec<Value> {
        let constructor = self.eval(callee, frame)?;
        let args = self.eval_args(args, frame)?;

        match self.callee(&constructor) {
            Some(Callee::Native(native @ NativeFunction::ErrorConstructor(_))) => {
                self.call_native(native, args)
            }
            Some(Callee::Script(decl, closure)) => {
                let instance = self.heap.allocate(ObjectKind::Ordinary, Vec::new())?;
                let instance = Value::Object(instance);
                let result = self.call_script(&decl, &closure, instance.clone(), args)?;
                Ok(match result {
                    Value::Object(_) => result,
                    _ => instance,
                })
            }
            _ => {
                let name = match callee {
                    Expr::Ident(name) => name.as_str(),
                    _ => "expression",
                };
                Err(self.throw_error(
                    ErrorKind::TypeError,
                    format!("{name} is not a constructor"),
                ))
            }
        }
    }

    /// `push`, `pop` and `join` on arrays
    fn array_method(
        &mut self,
        target: &Value,
        method: &str,
        args: &[Expr],
        frame: &Frame,
    ) -> Exec<Option<Value>> {
        let Some(id) = target.as_object() else {
            return Ok(None);
        };
        if !matches!(self.heap.get(id).kind, ObjectKind::Array(_))
            || !matches!(method, "push" | "pop" | "join")
        {
            return Ok(None);
        }

        let args = self.eval_args(args, frame)?;
        let result = match method {
            "push" => Value::Number(self.heap.push_elements(id, args)? as f64),
            "pop" => self.heap.pop_element(id),
            _ => {
                let separator = match args.first() {
                    Some(separator) if !matches!(separator, Value::Undefined) => {
                        self.heap.display(separator)
                    }
                    _ => ",".to_string(),
                };
                let joined = self.join(id, &separator);
                self.string(joined)?
            }
        };
        Ok(Some(result))
    }

    /// `Array.prototype.join`, cut short once past the string limit
    fn join(&self, id: ObjectId, separator: &str) -> String {
        let ObjectKind::Array(items) = &self.heap.get(id).kind else {
            return String::new();
        };
        let limit = self.heap.max_string_length();
        let mut joined = String::new();
        for (i, item) in items.iter().enumerate() {
            if joined.len() > limit {
                break;
            }
            if i > 0 {
                joined.push_str(separator);
            }
            if !item.is_nullish() {
                joined.push_str(&self.heap.display(item));
            }
        }
        joined
    }

    fn call_native(&mut self, native: NativeFunction, args: Vec<Value>) -> Exec<Value> {
        let first = args.first().cloned().unwrap_or_default();
        match native {
            NativeFunction::Console(level) => {
                let message = args
                    .iter()
                    .map(|arg| self.heap.display(arg))
                    .collect::<Vec<_>>()
                    .join(" ");
                self.global.host().base().log(level, message);
            }
            NativeFunction::Close => self.global.host().base().close(),
            NativeFunction::PostMessage => {
                let message = self.clone_for_port(&first)?;
                if let HostCapabilities::Dedicated(context) = self.global.host() {
                    context.post_message(message);
                }
            }
            NativeFunction::PortPostMessage(index) => {
                let message = self.clone_for_port(&first)?;
                if let HostCapabilities::Shared(context) = self.global.host() {
                    context.post_to_port(index, message);
                }
            }
            NativeFunction::ErrorConstructor(kind) => {
                let message = match &first {
                    Value::Undefined => String::new(),
                    other => self.heap.display(other),
                };
                return Ok(self.heap.error_value(kind, &message)?);
            }
            NativeFunction::JsonStringify => {
                if first == Value::Undefined || self.is_callable(&first) {
                    return Ok(Value::Undefined);
                }
                return match self.heap.to_json(&first) {
                    Ok(json) => self.string(json.to_string()),
                    Err(reason) => Err(self.throw_error(ErrorKind::TypeError, reason)),
                };
            }
            NativeFunction::JsonParse => {
                let text = self.heap.display(&first);
                return match serde_json::from_str::<JsonValue>(&text) {
                    Ok(json) => Ok(self.heap.from_json(&json)?),
                    Err(err) => Err(self.throw_error(
                        ErrorKind::SyntaxError,
                        format!("JSON.parse: {err}"),
                    )),
                };
            }
        }
        Ok(Value::Undefined)
    }

    fn clone_for_port(&mut self, value: &Value) -> Exec<JsonValue> {
        match self.heap.to_json(value) {
            Ok(json) => Ok(json),
            Err(reason) => Err(self.throw_error(ErrorKind::DataCloneError, reason)),
        }
    }

    // === Operators ===

    fn to_primitive(&self, value: &Value) -> Value {
        match value {
            Value::Object(_) => Value::String(self.heap.display(value)),
            other => other.clone(),
        }
    }

    fn binary(&mut self, op: BinaryOp, left: &Value, right: &Value) -> Exec<Value> {
        let number = |value: &Value| self.heap.to_number(value);
        let value = match op {
            BinaryOp::Add => return self.add(left, right),
            BinaryOp::Sub => Value::Number(number(left) - number(right)),
            BinaryOp::Mul => Value::Number(number(left) * number(right)),
            BinaryOp::Div => Value::Number(number(left) / number(right)),
            BinaryOp::Mod => Value::Number(number(left) % number(right)),
            BinaryOp::Lt => Value::Bool(self.compare(left, right) == Some(Ordering::Less)),
            BinaryOp::Gt => Value::Bool(self.compare(left, right) == Some(Ordering::Greater)),
            BinaryOp::Le => Value::Bool(matches!(
                self.compare(left, right),
                Some(Ordering::Less | Ordering::Equal)
            )),
            BinaryOp::Ge => Value::Bool(matches!(
                self.compare(left, right),
                Some(Ordering::Greater | Ordering::Equal)
            )),
            BinaryOp::StrictEq => Value::Bool(left == right),
            BinaryOp::StrictNe => Value::Bool(left != right),
            BinaryOp::Eq => Value::Bool(self.loose_equals(left, right)),
            BinaryOp::Ne => Value::Bool(!self.loose_equals(left, right)),
        };
        Ok(value)
    }

    /// `+`: concatenation once either side is a string, else numeric addition
    fn add(&mut self, left: &Value, right: &Value) -> Exec<Value> {
        let (left, right) = (self.to_primitive(left), self.to_primitive(right));
        if !matches!(left, Value::String(_)) && !matches!(right, Value::String(_)) {
            let sum = self.heap.to_number(&left) + self.heap.to_number(&right);
            return Ok(Value::Number(sum));
        }

        let (left, right) = (self.heap.display(&left), self.heap.display(&right));
        if left.len() + right.len() > self.heap.max_string_length() {
            return Err(self.throw_error(ErrorKind::RangeError, "Invalid string length"));
        }
        Ok(Value::String(left + &right))
    }

    fn compare(&self, left: &Value, right: &Value) -> Option<Ordering> {
        let (left, right) = (self.to_primitive(left), self.to_primitive(right));
        if let (Value::String(a), Value::String(b)) = (&left, &right) {
            return Some(a.cmp(b));
        }
        self.heap
            .to_number(&left)
            .partial_cmp(&self.heap.to_number(&right))
    }

    fn loose_equals(&self, left: &Value, right: &Value) -> bool {
        match (left, right) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
            (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => {
                let (left, right) = (self.to_primitive(left), self.to_primitive(right));
                match (&left, &right) {
                    (Value::String(a), Value::String(b)) => a == b,
                    _ => self.heap.to_number(&left) == self.heap.to_number(&right),
                }
            }
        }
    }
}
