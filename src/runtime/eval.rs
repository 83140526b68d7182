//! Tree-walking evaluator for the guarded IR.
//!
//! One `Interp` lives for a single evaluation: it carries the name policy,
//! the size limits, the wall-clock deadline and the builtin table, all of
//! which are fixed for the whole run. Program state lives in `Scope`
//! chains, not in the interpreter.

use std::cell::RefCell;
use std::rc::Rc;

use hashbrown::HashMap;
use tracing::trace;

use crate::parser::ast::{BoolOp, CmpOp};
use crate::policy::NamePolicy;
use crate::rewriter::ir;
use crate::runtime::builtins;
use crate::runtime::env::{Deadline, Limits, Scope, ScopeRef};
use crate::runtime::error::{EvalError, ResourceError, RuntimeError, RuntimeKind};
use crate::runtime::guards::{
    check_key, guarded_delattr, guarded_delitem, guarded_getattr, guarded_getitem,
    guarded_setattr, guarded_setitem, guarded_unpack, GuardedIter,
};
use crate::runtime::methods;
use crate::runtime::operators;
use crate::runtime::value::{
    BuiltinImpl, Class, Dict, ExceptionValue, Function, Instance, Set, SliceValue, Value,
};

pub type NativeFn = fn(&mut Interp, Vec<Value>, Vec<(String, Value)>) -> Result<Value, EvalError>;

/// Non-error control flow bubbling out of a statement.
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

pub struct Interp<'a> {
    policy: &'a NamePolicy,
    limits: Limits,
    deadline: Deadline,
    builtins: &'a HashMap<String, Value>,
    depth: usize,
    /// The exception being handled, for bare `raise`.
    current_exc: Option<RuntimeError>,
}

impl<'a> Interp<'a> {
    pub fn new(
        policy: &'a NamePolicy,
        limits: Limits,
        deadline: Deadline,
        builtins: &'a HashMap<String, Value>,
    ) -> Self {
        Self {
            policy,
            limits,
            deadline,
            builtins,
            depth: 0,
            current_exc: None,
        }
    }

    pub fn policy(&self) -> &NamePolicy {
        self.policy
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Bound on container growth from appends, extends and comprehensions.
    pub fn check_growth(&self, len: usize) -> Result<(), EvalError> {
        if len > self.limits.max_collection_len {
            Err(ResourceError::CollectionTooLarge {
                len,
                max: self.limits.max_collection_len,
            }
            .into())
        } else {
            Ok(())
        }
    }

    /// Runs a program and returns the value of its trailing expression
    /// statement, or `None` when the program ends some other way.
    pub fn run(&mut self, program: &ir::Program, scope: &ScopeRef) -> Result<Value, EvalError> {
        let mut last = Value::None;
        for stmt in &program.body {
            match &stmt.kind {
                ir::StmtKind::Expr(e) => last = self.eval(scope, e)?,
                _ => {
                    last = Value::None;
                    match self.exec_stmt(scope, stmt)? {
                        Flow::Normal => {}
                        Flow::Return(_) => {
                            return Err(EvalError::type_error("'return' outside function"))
                        }
                        Flow::Break | Flow::Continue => {
                            return Err(EvalError::type_error(
                                "'break' or 'continue' outside loop",
                            ))
                        }
                    }
                }
            }
        }
        Ok(last)
    }

    fn exec_block(&mut self, scope: &ScopeRef, stmts: &[ir::Stmt]) -> Result<Flow, EvalError> {
        for stmt in stmts {
            match self.exec_stmt(scope, stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, scope: &ScopeRef, stmt: &ir::Stmt) -> Result<Flow, EvalError> {
        match &stmt.kind {
            ir::StmtKind::Expr(e) => {
                self.eval(scope, e)?;
                Ok(Flow::Normal)
            }
            ir::StmtKind::Assign { targets, value } => {
                let v = self.eval(scope, value)?;
                for target in targets {
                    self.bind_target(scope, target, v.clone())?;
                }
                Ok(Flow::Normal)
            }
            ir::StmtKind::AugAssign { name, op, value } => {
                let current = scope
                    .get(name)
                    .ok_or_else(|| EvalError::name_error(name))?;
                let rhs = self.eval(scope, value)?;
                let result = operators::binary(*op, &current, &rhs, &self.limits)?;
                scope.set(name.clone(), result);
                Ok(Flow::Normal)
            }
            ir::StmtKind::If { branches, orelse } => {
                for (test, body) in branches {
                    if self.eval(scope, test)?.truthy() {
                        return self.exec_block(scope, body);
                    }
                }
                self.exec_block(scope, orelse)
            }
            ir::StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(scope, iter)?;
                let mut guarded = GuardedIter::new(&iterable, self.deadline)?;
                let mut broke = false;
                while let Some(item) = guarded.next()? {
                    self.bind_target(scope, target, item)?;
                    match self.exec_block(scope, body)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => {
                            broke = true;
                            break;
                        }
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                if !broke {
                    return self.exec_block(scope, orelse);
                }
                Ok(Flow::Normal)
            }
            ir::StmtKind::FuncDef { func } => {
                let value = self.make_function(scope, func)?;
                scope.set(func.name.clone(), value);
                Ok(Flow::Normal)
            }
            ir::StmtKind::ClassDef { name, bases, body } => {
                let mut base_classes = Vec::with_capacity(bases.len());
                for base in bases {
                    match self.eval(scope, base)? {
                        Value::Class(c) => base_classes.push(c),
                        other => {
                            return Err(EvalError::type_error(format!(
                                "class base must be a class, not '{}'",
                                other.type_name()
                            )))
                        }
                    }
                }
                let class_scope = Scope::child(scope);
                match self.exec_block(&class_scope, body)? {
                    Flow::Normal => {}
                    _ => return Err(EvalError::type_error("'return' outside function")),
                }
                let attrs: HashMap<String, Value> = class_scope.bindings().into_iter().collect();
                let class = Value::Class(Rc::new(Class {
                    name: name.clone(),
                    bases: base_classes,
                    attrs: RefCell::new(attrs),
                }));
                scope.set(name.clone(), class);
                Ok(Flow::Normal)
            }
            ir::StmtKind::Return(value) => {
                let v = match value {
                    Some(e) => self.eval(scope, e)?,
                    None => Value::None,
                };
                Ok(Flow::Return(v))
            }
            ir::StmtKind::Delete(targets) => {
                for target in targets {
                    self.delete_target(scope, target)?;
                }
                Ok(Flow::Normal)
            }
            ir::StmtKind::Break => Ok(Flow::Break),
            ir::StmtKind::Continue => Ok(Flow::Continue),
            ir::StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                let outcome = self.exec_try(scope, body, handlers, orelse);
                if !finalbody.is_empty() {
                    // An error or early exit in the finally body replaces
                    // the pending outcome.
                    match self.exec_block(scope, finalbody)? {
                        Flow::Normal => {}
                        flow => return Ok(flow),
                    }
                }
                outcome
            }
            ir::StmtKind::Raise(value) => match value {
                Some(e) => {
                    let v = self.eval(scope, e)?;
                    Err(EvalError::Runtime(to_exception(v)?))
                }
                None => match &self.current_exc {
                    Some(exc) => Err(EvalError::Runtime(exc.clone())),
                    None => Err(EvalError::Runtime(RuntimeError::new(
                        RuntimeKind::Exception,
                        "No active exception to re-raise",
                    ))),
                },
            },
            ir::StmtKind::With { items, body } => {
                // Context-manager protocol methods are not reachable under
                // the policy, so the managed value binds directly.
                for (ctx, target) in items {
                    let v = self.eval(scope, ctx)?;
                    if let Some(target) = target {
                        self.bind_target(scope, target, v)?;
                    }
                }
                self.exec_block(scope, body)
            }
        }
    }

    fn exec_try(
        &mut self,
        scope: &ScopeRef,
        body: &[ir::Stmt],
        handlers: &[ir::Handler],
        orelse: &[ir::Stmt],
    ) -> Result<Flow, EvalError> {
        match self.exec_block(scope, body) {
            Ok(Flow::Normal) => self.exec_block(scope, orelse),
            Ok(flow) => Ok(flow),
            // Only program-level errors are catchable. Denials, resource
            // bounds and timeouts fall through every handler.
            Err(EvalError::Runtime(exc)) => {
                for handler in handlers {
                    if !self.handler_matches(scope, handler, &exc)? {
                        continue;
                    }
                    trace!(kind = exc.kind.name(), "exception caught");
                    if let Some(name) = &handler.name {
                        scope.set(
                            name.clone(),
                            Value::Exception(Rc::new(ExceptionValue {
                                kind: exc.kind,
                                message: exc.message.clone(),
                            })),
                        );
                    }
                    let saved = self.current_exc.replace(exc.clone());
                    let result = self.exec_block(scope, &handler.body);
                    self.current_exc = saved;
                    return result;
                }
                Err(EvalError::Runtime(exc))
            }
            Err(fatal) => Err(fatal),
        }
    }

    fn handler_matches(
        &mut self,
        scope: &ScopeRef,
        handler: &ir::Handler,
        exc: &RuntimeError,
    ) -> Result<bool, EvalError> {
        let Some(exc_type) = &handler.exc_type else {
            return Ok(true);
        };
        let matcher = self.eval(scope, exc_type)?;
        exc_matches(&matcher, exc)
    }

    fn delete_target(&mut self, scope: &ScopeRef, target: &ir::Target) -> Result<(), EvalError> {
        match target {
            ir::Target::Name(name) => {
                if scope.delete(name) {
                    Ok(())
                } else {
                    Err(EvalError::name_error(name))
                }
            }
            ir::Target::Attr { obj, attr } => {
                let obj = self.eval(scope, obj)?;
                guarded_delattr(self.policy, &obj, attr)
            }
            ir::Target::Index { obj, index } => {
                let obj = self.eval(scope, obj)?;
                let index = self.eval(scope, index)?;
                guarded_delitem(self.policy, &obj, &index)
            }
            ir::Target::Nested { .. } => {
                Err(EvalError::type_error("cannot delete a sequence pattern"))
            }
        }
    }

    fn bind_target(
        &mut self,
        scope: &ScopeRef,
        target: &ir::Target,
        value: Value,
    ) -> Result<(), EvalError> {
        match target {
            ir::Target::Name(name) => {
                scope.set(name.clone(), value);
                Ok(())
            }
            ir::Target::Attr { obj, attr } => {
                let obj = self.eval(scope, obj)?;
                guarded_setattr(self.policy, &obj, attr, value)
            }
            ir::Target::Index { obj, index } => {
                let obj = self.eval(scope, obj)?;
                let index = self.eval(scope, index)?;
                guarded_setitem(self.policy, &obj, &index, value)
            }
            ir::Target::Nested { elts, spec } => {
                let items = guarded_unpack(&value, spec, self.deadline)?;
                for (elt, item) in elts.iter().zip(items) {
                    self.bind_target(scope, elt, item)?;
                }
                Ok(())
            }
        }
    }

    pub fn eval(&mut self, scope: &ScopeRef, expr: &ir::Expr) -> Result<Value, EvalError> {
        match &expr.kind {
            ir::ExprKind::NoneLit => Ok(Value::None),
            ir::ExprKind::BoolLit(b) => Ok(Value::Bool(*b)),
            ir::ExprKind::IntLit(n) => Ok(Value::Int(*n)),
            ir::ExprKind::FloatLit(f) => Ok(Value::Float(*f)),
            ir::ExprKind::StrLit(s) => Ok(Value::Str(s.clone())),
            ir::ExprKind::Name(name) => scope
                .get(name)
                .or_else(|| self.builtins.get(name).cloned())
                .ok_or_else(|| EvalError::name_error(name)),
            ir::ExprKind::Tuple(items) => Ok(Value::tuple(self.eval_all(scope, items)?)),
            ir::ExprKind::List(items) => Ok(Value::list(self.eval_all(scope, items)?)),
            ir::ExprKind::Set(items) => {
                let mut out = Set::new();
                for item in self.eval_all(scope, items)? {
                    if !item.is_hashable() {
                        return Err(EvalError::type_error(format!(
                            "unhashable type: '{}'",
                            item.type_name()
                        )));
                    }
                    out.add(item);
                }
                Ok(Value::Set(Rc::new(RefCell::new(out))))
            }
            ir::ExprKind::Dict(entries) => {
                let mut out = Dict::new();
                for (key_expr, value_expr) in entries {
                    let key = self.eval(scope, key_expr)?;
                    if !key.is_hashable() {
                        return Err(EvalError::type_error(format!(
                            "unhashable type: '{}'",
                            key.type_name()
                        )));
                    }
                    let value = self.eval(scope, value_expr)?;
                    out.insert(key, value);
                }
                Ok(Value::Dict(Rc::new(RefCell::new(out))))
            }
            ir::ExprKind::GetAttr { obj, attr } => {
                let obj = self.eval(scope, obj)?;
                guarded_getattr(self.policy, &obj, attr)
            }
            ir::ExprKind::GetItem { obj, index } => {
                let obj = self.eval(scope, obj)?;
                let index = self.eval(scope, index)?;
                guarded_getitem(self.policy, &obj, &index)
            }
            ir::ExprKind::MakeSlice { lower, upper, step } => {
                let part = |me: &mut Self, e: &Option<Box<ir::Expr>>| -> Result<Option<i64>, EvalError> {
                    match e {
                        None => Ok(None),
                        Some(e) => match me.eval(scope, e)? {
                            Value::None => Ok(None),
                            v => v.as_index("slice component").map(Some),
                        },
                    }
                };
                let start = part(self, lower)?;
                let stop = part(self, upper)?;
                let step = part(self, step)?;
                Ok(Value::Slice(Rc::new(SliceValue { start, stop, step })))
            }
            ir::ExprKind::Apply { func, args } => {
                let callee = self.eval(scope, func)?;
                let (pos, kwargs) = self.eval_args(scope, args)?;
                self.call_value(callee, pos, kwargs)
            }
            ir::ExprKind::Binary { op, left, right } => {
                let left = self.eval(scope, left)?;
                let right = self.eval(scope, right)?;
                operators::binary(*op, &left, &right, &self.limits)
            }
            ir::ExprKind::Unary { op, operand } => {
                let operand = self.eval(scope, operand)?;
                operators::unary(*op, &operand)
            }
            ir::ExprKind::BoolChain { op, values } => {
                let mut last = Value::None;
                for value in values {
                    last = self.eval(scope, value)?;
                    let done = match op {
                        BoolOp::And => !last.truthy(),
                        BoolOp::Or => last.truthy(),
                    };
                    if done {
                        break;
                    }
                }
                Ok(last)
            }
            ir::ExprKind::Compare {
                left,
                ops,
                comparators,
            } => {
                let mut left = self.eval(scope, left)?;
                for (op, comparator) in ops.iter().zip(comparators) {
                    let right = self.eval(scope, comparator)?;
                    if !self.compare_values(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            ir::ExprKind::IfElse { test, body, orelse } => {
                if self.eval(scope, test)?.truthy() {
                    self.eval(scope, body)
                } else {
                    self.eval(scope, orelse)
                }
            }
            ir::ExprKind::Lambda(func) => self.make_function(scope, func),
            ir::ExprKind::Comp(comp) => self.eval_comp(scope, comp),
        }
    }

    fn eval_all(&mut self, scope: &ScopeRef, exprs: &[ir::Expr]) -> Result<Vec<Value>, EvalError> {
        exprs.iter().map(|e| self.eval(scope, e)).collect()
    }

    fn eval_args(
        &mut self,
        scope: &ScopeRef,
        args: &[ir::Arg],
    ) -> Result<(Vec<Value>, Vec<(String, Value)>), EvalError> {
        let mut pos = Vec::new();
        let mut kwargs = Vec::new();
        for arg in args {
            match arg {
                ir::Arg::Pos(e) => pos.push(self.eval(scope, e)?),
                ir::Arg::Star(e) => {
                    let v = self.eval(scope, e)?;
                    pos.extend(GuardedIter::new(&v, self.deadline)?.collect()?);
                }
                ir::Arg::Keyword(name, e) => kwargs.push((name.clone(), self.eval(scope, e)?)),
                ir::Arg::KwStar(e) => match self.eval(scope, e)? {
                    Value::Dict(d) => {
                        for (k, v) in d.borrow().iter() {
                            match k {
                                Value::Str(name) => {
                                    check_key(self.policy, k)?;
                                    kwargs.push((name.to_string(), v.clone()));
                                }
                                other => {
                                    return Err(EvalError::type_error(format!(
                                        "keywords must be strings, not '{}'",
                                        other.type_name()
                                    )))
                                }
                            }
                        }
                    }
                    other => {
                        return Err(EvalError::type_error(format!(
                            "argument after ** must be a dict, not '{}'",
                            other.type_name()
                        )))
                    }
                },
            }
        }
        Ok((pos, kwargs))
    }

    fn make_function(&mut self, scope: &ScopeRef, func: &Rc<ir::Func>) -> Result<Value, EvalError> {
        let mut defaults = Vec::with_capacity(func.params.len());
        for param in &func.params {
            defaults.push(match &param.default {
                Some(e) => Some(self.eval(scope, e)?),
                None => None,
            });
        }
        Ok(Value::Function(Rc::new(Function {
            def: func.clone(),
            defaults,
            scope: scope.clone(),
        })))
    }

    pub fn call_value(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, EvalError> {
        self.deadline.check()?;
        if self.depth >= self.limits.max_call_depth {
            return Err(ResourceError::RecursionTooDeep {
                depth: self.depth,
                max: self.limits.max_call_depth,
            }
            .into());
        }
        self.depth += 1;
        let result = self.call_inner(callee, args, kwargs);
        self.depth -= 1;
        result
    }

    fn call_inner(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, EvalError> {
        match callee {
            Value::Builtin(b) => match &b.imp {
                BuiltinImpl::Native(f) => f(self, args, kwargs),
                BuiltinImpl::Stub => Err(EvalError::Denied {
                    name: b.name.to_string(),
                }),
            },
            Value::Function(f) => self.call_function(&f, args, kwargs),
            Value::Method(m) => {
                if let Value::Instance(inst) = &m.recv {
                    match inst.class.lookup(&m.name) {
                        Some(Value::Function(f)) => {
                            let mut with_self = Vec::with_capacity(args.len() + 1);
                            with_self.push(m.recv.clone());
                            with_self.extend(args);
                            self.call_function(&f, with_self, kwargs)
                        }
                        _ => Err(EvalError::attribute_error(&inst.class.name, &m.name)),
                    }
                } else {
                    methods::call_method(self, &m.recv, &m.name, args, kwargs)
                }
            }
            Value::Class(class) => {
                let instance = Value::Instance(Rc::new(Instance {
                    class: class.clone(),
                    attrs: RefCell::new(HashMap::new()),
                }));
                match class.lookup("__init__") {
                    Some(Value::Function(init)) => {
                        let mut with_self = Vec::with_capacity(args.len() + 1);
                        with_self.push(instance.clone());
                        with_self.extend(args);
                        self.call_function(&init, with_self, kwargs)?;
                    }
                    _ => {
                        if !args.is_empty() || !kwargs.is_empty() {
                            return Err(EvalError::type_error(format!(
                                "{}() takes no arguments",
                                class.name
                            )));
                        }
                    }
                }
                Ok(instance)
            }
            Value::ExcType(kind) => {
                let message = match args.len() {
                    0 => String::new(),
                    1 => args[0].to_string(),
                    _ => Value::tuple(args).repr(),
                };
                Ok(Value::Exception(Rc::new(ExceptionValue { kind, message })))
            }
            other => Err(EvalError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(
        &mut self,
        f: &Rc<Function>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, EvalError> {
        let params = &f.def.params;
        if args.len() > params.len() {
            return Err(EvalError::type_error(format!(
                "{}() takes {} positional argument{} but {} were given",
                f.def.name,
                params.len(),
                if params.len() == 1 { "" } else { "s" },
                args.len()
            )));
        }
        let mut bound: Vec<Option<Value>> = args.into_iter().map(Some).collect();
        bound.resize(params.len(), None);
        for (name, value) in kwargs {
            match params.iter().position(|p| p.name == name) {
                Some(idx) => {
                    if bound[idx].is_some() {
                        return Err(EvalError::type_error(format!(
                            "{}() got multiple values for argument '{name}'",
                            f.def.name
                        )));
                    }
                    bound[idx] = Some(value);
                }
                None => {
                    return Err(EvalError::type_error(format!(
                        "{}() got an unexpected keyword argument '{name}'",
                        f.def.name
                    )))
                }
            }
        }
        let scope = Scope::child(&f.scope);
        for (idx, param) in params.iter().enumerate() {
            let value = match bound[idx].take().or_else(|| f.defaults[idx].clone()) {
                Some(v) => v,
                None => {
                    return Err(EvalError::type_error(format!(
                        "{}() missing required argument: '{}'",
                        f.def.name, param.name
                    )))
                }
            };
            scope.set(param.name.clone(), value);
        }
        match &f.def.body {
            ir::FuncBody::Expr(e) => self.eval(&scope, e),
            ir::FuncBody::Block(stmts) => match self.exec_block(&scope, stmts)? {
                Flow::Return(v) => Ok(v),
                Flow::Normal => Ok(Value::None),
                Flow::Break | Flow::Continue => Err(EvalError::type_error(
                    "'break' or 'continue' outside loop",
                )),
            },
        }
    }

    /// One comparison step, dispatching user-defined comparison methods on
    /// instances before the built-in ordering.
    fn compare_values(
        &mut self,
        op: CmpOp,
        left: &Value,
        right: &Value,
    ) -> Result<bool, EvalError> {
        let dunder = match op {
            CmpOp::Eq => Some("__eq__"),
            CmpOp::NotEq => Some("__ne__"),
            CmpOp::Lt => Some("__lt__"),
            CmpOp::Le => Some("__le__"),
            CmpOp::Gt => Some("__gt__"),
            CmpOp::Ge => Some("__ge__"),
            _ => None,
        };
        if let Some(name) = dunder {
            if let Some(result) = self.instance_dunder(left, name, vec![right.clone()])? {
                return Ok(result.truthy());
            }
        }
        if matches!(op, CmpOp::In | CmpOp::NotIn) {
            if let Some(result) =
                self.instance_dunder(right, "__contains__", vec![left.clone()])?
            {
                let found = result.truthy();
                return Ok(if op == CmpOp::In { found } else { !found });
            }
        }
        operators::compare(op, left, right)
    }

    /// Calls `name` on an instance receiver when its class defines it.
    fn instance_dunder(
        &mut self,
        recv: &Value,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, EvalError> {
        let Value::Instance(inst) = recv else {
            return Ok(None);
        };
        let Some(Value::Function(f)) = inst.class.lookup(name) else {
            return Ok(None);
        };
        let mut with_self = Vec::with_capacity(args.len() + 1);
        with_self.push(recv.clone());
        with_self.extend(args);
        self.call_function(&f, with_self, vec![]).map(Some)
    }

    fn eval_comp(&mut self, scope: &ScopeRef, comp: &ir::Comp) -> Result<Value, EvalError> {
        let comp_scope = Scope::child(scope);
        let mut acc = match comp.kind {
            ir::CompKind::List | ir::CompKind::Generator => CompAcc::List(Vec::new()),
            ir::CompKind::Set => CompAcc::Set(Set::new()),
            ir::CompKind::Dict => CompAcc::Dict(Dict::new()),
        };
        self.comp_level(&comp_scope, comp, 0, &mut acc)?;
        Ok(match acc {
            CompAcc::List(items) => Value::list(items),
            CompAcc::Set(set) => Value::Set(Rc::new(RefCell::new(set))),
            CompAcc::Dict(dict) => Value::Dict(Rc::new(RefCell::new(dict))),
        })
    }

    fn comp_level(
        &mut self,
        scope: &ScopeRef,
        comp: &ir::Comp,
        level: usize,
        acc: &mut CompAcc,
    ) -> Result<(), EvalError> {
        let Some(generator) = comp.generators.get(level) else {
            self.check_growth(acc.len() + 1)?;
            match (acc, &comp.key) {
                (CompAcc::Dict(dict), Some(key_expr)) => {
                    let key = self.eval(scope, key_expr)?;
                    if !key.is_hashable() {
                        return Err(EvalError::type_error(format!(
                            "unhashable type: '{}'",
                            key.type_name()
                        )));
                    }
                    let value = self.eval(scope, &comp.elt)?;
                    dict.insert(key, value);
                }
                (CompAcc::List(items), _) => items.push(self.eval(scope, &comp.elt)?),
                (CompAcc::Set(set), _) => {
                    let v = self.eval(scope, &comp.elt)?;
                    if !v.is_hashable() {
                        return Err(EvalError::type_error(format!(
                            "unhashable type: '{}'",
                            v.type_name()
                        )));
                    }
                    set.add(v);
                }
                (CompAcc::Dict(_), None) => {
                    return Err(EvalError::type_error("dict comprehension without a key"))
                }
            }
            return Ok(());
        };
        let iterable = self.eval(scope, &generator.iter)?;
        let mut guarded = GuardedIter::new(&iterable, self.deadline)?;
        'items: while let Some(item) = guarded.next()? {
            self.bind_target(scope, &generator.target, item)?;
            for cond in &generator.ifs {
                if !self.eval(scope, cond)?.truthy() {
                    continue 'items;
                }
            }
            self.comp_level(scope, comp, level + 1, acc)?;
        }
        Ok(())
    }
}

enum CompAcc {
    List(Vec<Value>),
    Set(Set),
    Dict(Dict),
}

impl CompAcc {
    fn len(&self) -> usize {
        match self {
            CompAcc::List(items) => items.len(),
            CompAcc::Set(set) => set.len(),
            CompAcc::Dict(dict) => dict.len(),
        }
    }
}

/// Coerces a raised value into an exception record.
fn to_exception(v: Value) -> Result<RuntimeError, EvalError> {
    match v {
        Value::ExcType(kind) => Ok(RuntimeError::new(kind, "")),
        Value::Exception(e) => Ok(RuntimeError::new(e.kind, e.message.clone())),
        other => Err(EvalError::type_error(format!(
            "exceptions must be exception types or instances, not '{}'",
            other.type_name()
        ))),
    }
}

/// Does an `except` matcher cover this exception?
fn exc_matches(matcher: &Value, exc: &RuntimeError) -> Result<bool, EvalError> {
    match matcher {
        Value::ExcType(kind) => Ok(*kind == RuntimeKind::Exception || *kind == exc.kind),
        Value::Tuple(options) => {
            for option in options.iter() {
                if exc_matches(option, exc)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => Err(EvalError::type_error(format!(
            "catching '{}' is not allowed",
            other.type_name()
        ))),
    }
}

/// Convenience used by the API layer: builds the builtin table, runs the
/// program, returns the trailing expression value.
pub fn run_program(
    program: &ir::Program,
    policy: &NamePolicy,
    limits: Limits,
    deadline: Deadline,
    scope: &ScopeRef,
) -> Result<Value, EvalError> {
    let table = builtins::restricted_builtins();
    let mut interp = Interp::new(policy, limits, deadline, &table);
    interp.run(program, scope)
}
