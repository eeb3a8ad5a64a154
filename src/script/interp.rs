//! Tree-walking evaluator over the `oxc` syntax tree.
//!
//! Every evaluation goes through an [`Interp`], a handle on the owning engine. The
//! engine is never borrowed across a call into script code, so natives invoked from
//! here may compile or render templates themselves.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use oxc_allocator::Allocator;
use oxc_ast::ast::*;
use oxc_span::{GetSpan, Span};
use oxc_syntax::operator::{
    AssignmentOperator, BinaryOperator, LogicalOperator, UnaryOperator, UpdateOperator,
};
use tracing::trace;

use super::builtins;
use super::source::{self, FunctionCode, FunctionNode};
use super::value::{number_to_string, Closure, Value};
use super::ScriptError;
use crate::engine::Engine;

/// Maximum nesting of script function calls (including nested template renders).
pub const MAX_CALL_DEPTH: usize = 64;

type EResult<T> = Result<T, ScriptError>;

// ═══════════════════════════════════════════════════════════════════════════════
// SCOPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
struct Binding {
    value: Value,
    constant: bool,
}

pub struct Scope {
    vars: RefCell<HashMap<String, Binding>>,
    parent: Option<Rc<Scope>>,
    function_scope: bool,
}

impl Scope {
    pub fn global() -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent: None,
            function_scope: true,
        })
    }

    pub fn child(parent: &Rc<Scope>) -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
            function_scope: false,
        })
    }

    fn function(parent: &Rc<Scope>) -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
            function_scope: true,
        })
    }

    /// Copy of this scope's own bindings under the same parent (per-iteration `let`).
    fn duplicate(&self) -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(self.vars.borrow().clone()),
            parent: self.parent.clone(),
            function_scope: self.function_scope,
        })
    }

    pub fn define(&self, name: &str, value: Value) {
        self.declare(name, value, false);
    }

    fn declare(&self, name: &str, value: Value, constant: bool) {
        self.vars
            .borrow_mut()
            .insert(name.to_string(), Binding { value, constant });
    }

    fn has_own(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name)
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(binding) = self.vars.borrow().get(name) {
            return Some(binding.value.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    /// Assign to an existing binding. `Ok(false)` when no scope declares `name`.
    fn assign(&self, name: &str, value: Value) -> EResult<bool> {
        if let Some(binding) = self.vars.borrow_mut().get_mut(name) {
            if binding.constant {
                return Err(ScriptError::type_error(format!(
                    "Assignment to constant variable '{}'",
                    name
                )));
            }
            binding.value = value;
            return Ok(true);
        }
        match &self.parent {
            Some(parent) => parent.assign(name, value),
            None => Ok(false),
        }
    }

    fn nearest_function(self: &Rc<Self>) -> Rc<Scope> {
        let mut scope = self.clone();
        while !scope.function_scope {
            match &scope.parent {
                Some(parent) => scope = parent.clone(),
                None => break,
            }
        }
        scope
    }

    fn root(self: &Rc<Self>) -> Rc<Scope> {
        let mut scope = self.clone();
        while let Some(parent) = scope.parent.clone() {
            scope = parent;
        }
        scope
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INTERPRETER
// ═══════════════════════════════════════════════════════════════════════════════

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

enum Target {
    Var(String),
    Member(Value, String),
}

#[derive(Clone, Copy, PartialEq)]
enum DeclKind {
    Var,
    Let,
    Const,
}

impl From<VariableDeclarationKind> for DeclKind {
    fn from(kind: VariableDeclarationKind) -> Self {
        match kind {
            VariableDeclarationKind::Var => DeclKind::Var,
            VariableDeclarationKind::Const => DeclKind::Const,
            _ => DeclKind::Let,
        }
    }
}

struct DepthGuard<'a>(&'a Cell<usize>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

pub struct Interp {
    engine: Engine,
}

impl Interp {
    pub fn new(engine: &Engine) -> Self {
        Self {
            engine: engine.clone(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Run `source` as a function body whose scope is a child of the globals.
    /// Assignments to undeclared names still land in the globals.
    pub fn run(&self, source: &str) -> EResult<Value> {
        let allocator = Allocator::default();
        let program = source::parse_program(&allocator, source)?;
        let scope = Scope::function(&self.engine.globals());
        Walker::new(self, Rc::from(source)).run_body(&program.body, &scope)
    }

    /// Evaluate a single expression against the global scope.
    pub fn eval(&self, source: &str) -> EResult<Value> {
        let allocator = Allocator::default();
        let expr = source::parse_expression(&allocator, source)?;
        Walker::new(self, Rc::from(source)).eval(&expr, &self.engine.globals())
    }

    /// Create a function value closed over the global scope.
    pub fn instantiate(&self, code: Rc<FunctionCode>) -> Value {
        Value::Function(Rc::new(Closure {
            code,
            scope: self.engine.globals(),
        }))
    }

    pub fn call(&self, callee: &Value, this: Value, args: &[Value]) -> EResult<Value> {
        let depth = self.engine.call_depth();
        if depth.get() >= MAX_CALL_DEPTH {
            return Err(ScriptError::Range(
                "Maximum call stack size exceeded".to_string(),
            ));
        }
        depth.set(depth.get() + 1);
        let _guard = DepthGuard(depth);

        match callee {
            Value::Native(native) => native.call(self, &this, args),
            Value::Function(closure) => self.call_closure(callee, closure, this, args),
            Value::Template(template) => {
                crate::render::call_template(&self.engine, template, args)
                    .map(Value::Component)
                    .map_err(ScriptError::from)
            }
            other => Err(ScriptError::type_error(format!(
                "{} is not a function",
                other.to_display()
            ))),
        }
    }

    fn call_closure(
        &self,
        callee: &Value,
        closure: &Closure,
        this: Value,
        args: &[Value],
    ) -> EResult<Value> {
        let code = &closure.code;
        let allocator = Allocator::default();
        let program = source::parse_program(&allocator, &code.text)?;
        let walker = Walker::new(self, code.text.clone());
        let scope = Scope::function(&closure.scope);
        match source::function_of(&program)? {
            FunctionNode::Function(func) => {
                if func.r#async || func.generator {
                    return Err(ScriptError::type_error(
                        "async and generator functions are not supported",
                    ));
                }
                scope.define("this", this);
                scope.define("arguments", Value::array(args.to_vec()));
                if let Some(id) = &func.id {
                    scope.define(id.name.as_str(), callee.clone());
                }
                walker.bind_params(&func.params, args, &scope)?;
                match &func.body {
                    Some(body) => walker.run_body(&body.statements, &scope),
                    None => Ok(Value::Undefined),
                }
            }
            FunctionNode::Arrow(arrow) => {
                walker.bind_params(&arrow.params, args, &scope)?;
                if !arrow.expression {
                    return walker.run_body(&arrow.body.statements, &scope);
                }
                match arrow.body.statements.first() {
                    Some(Statement::ExpressionStatement(stmt)) => {
                        walker.eval(&stmt.expression, &scope)
                    }
                    _ => Ok(Value::Undefined),
                }
            }
        }
    }
}

/// Value bound by a `catch` clause.
fn error_value(err: &ScriptError) -> Value {
    let (name, message) = match err {
        ScriptError::Thrown(text) => return Value::str(text),
        ScriptError::Syntax { message, .. } => ("SyntaxError", message),
        ScriptError::Reference(message) => ("ReferenceError", message),
        ScriptError::Type(message) => ("TypeError", message),
        ScriptError::Range(message) => ("RangeError", message),
        ScriptError::Host(message) => ("Error", message),
    };
    let error = Value::new_object();
    error.set("name", Value::str(name));
    error.set("message", Value::str(message));
    error
}

fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    (n.trunc() % 4_294_967_296.0) as i64 as u32 as i32
}

fn compound(op: AssignmentOperator) -> Option<BinaryOperator> {
    Some(match op {
        AssignmentOperator::Addition => BinaryOperator::Addition,
        AssignmentOperator::Subtraction => BinaryOperator::Subtraction,
        AssignmentOperator::Multiplication => BinaryOperator::Multiplication,
        AssignmentOperator::Division => BinaryOperator::Division,
        AssignmentOperator::Remainder => BinaryOperator::Remainder,
        AssignmentOperator::Exponential => BinaryOperator::Exponential,
        AssignmentOperator::ShiftLeft => BinaryOperator::ShiftLeft,
        AssignmentOperator::ShiftRight => BinaryOperator::ShiftRight,
        AssignmentOperator::ShiftRightZeroFill => BinaryOperator::ShiftRightZeroFill,
        AssignmentOperator::BitwiseOR => BinaryOperator::BitwiseOR,
        AssignmentOperator::BitwiseXOR => BinaryOperator::BitwiseXOR,
        AssignmentOperator::BitwiseAnd => BinaryOperator::BitwiseAnd,
        _ => return None,
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// WALKER
// ═══════════════════════════════════════════════════════════════════════════════

/// Executes one parsed source text. Spans of the tree index into `text`.
struct Walker<'i> {
    interp: &'i Interp,
    text: Rc<str>,
    nested: RefCell<HashMap<u32, Rc<FunctionCode>>>,
}

impl<'i> Walker<'i> {
    fn new(interp: &'i Interp, text: Rc<str>) -> Self {
        Self {
            interp,
            text,
            nested: RefCell::new(HashMap::new()),
        }
    }

    fn source_of(&self, span: Span) -> &str {
        self.text
            .get(span.start as usize..span.end as usize)
            .unwrap_or_default()
    }

    fn unsupported(&self, what: &str, span: Span) -> ScriptError {
        let mut snippet: String = self.source_of(span).chars().take(40).collect();
        if snippet.len() < self.source_of(span).len() {
            snippet.push_str("...");
        }
        ScriptError::type_error(format!("Unsupported {}: {}", what, snippet))
    }

    fn closure(&self, span: Span, name: Option<String>, method: bool, scope: &Rc<Scope>) -> Value {
        let code = self
            .nested
            .borrow_mut()
            .entry(span.start)
            .or_insert_with(|| FunctionCode::nested(name, self.source_of(span), method))
            .clone();
        Value::Function(Rc::new(Closure {
            code,
            scope: scope.clone(),
        }))
    }

    fn run_body<'a>(&self, stmts: &[Statement<'a>], scope: &Rc<Scope>) -> EResult<Value> {
        self.hoist_vars(stmts, scope);
        match self.exec_block_in(stmts, scope)? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::Undefined),
        }
    }

    fn bind_params<'a>(
        &self,
        params: &FormalParameters<'a>,
        args: &[Value],
        scope: &Rc<Scope>,
    ) -> EResult<()> {
        if params.rest.is_some() {
            return Err(self.unsupported("rest parameter", params.span));
        }
        for (i, param) in params.items.iter().enumerate() {
            let value = args.get(i).cloned().unwrap_or_default();
            self.bind_pattern(&param.pattern, value, DeclKind::Let, scope)?;
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STATEMENTS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Pre-declare `var` bindings of a function body (not descending into nested functions).
    fn hoist_vars<'a>(&self, stmts: &[Statement<'a>], scope: &Rc<Scope>) {
        for stmt in stmts {
            self.hoist_stmt(stmt, scope);
        }
    }

    fn hoist_stmt<'a>(&self, stmt: &Statement<'a>, scope: &Rc<Scope>) {
        match stmt {
            Statement::VariableDeclaration(decl) => hoist_decl(decl, scope),
            Statement::BlockStatement(block) => self.hoist_vars(&block.body, scope),
            Statement::IfStatement(stmt) => {
                self.hoist_stmt(&stmt.consequent, scope);
                if let Some(alternate) = &stmt.alternate {
                    self.hoist_stmt(alternate, scope);
                }
            }
            Statement::ForStatement(stmt) => {
                if let Some(ForStatementInit::VariableDeclaration(decl)) = &stmt.init {
                    hoist_decl(decl, scope);
                }
                self.hoist_stmt(&stmt.body, scope);
            }
            Statement::ForOfStatement(stmt) => {
                if let ForStatementLeft::VariableDeclaration(decl) = &stmt.left {
                    hoist_decl(decl, scope);
                }
                self.hoist_stmt(&stmt.body, scope);
            }
            Statement::ForInStatement(stmt) => {
                if let ForStatementLeft::VariableDeclaration(decl) = &stmt.left {
                    hoist_decl(decl, scope);
                }
                self.hoist_stmt(&stmt.body, scope);
            }
            Statement::WhileStatement(stmt) => self.hoist_stmt(&stmt.body, scope),
            Statement::DoWhileStatement(stmt) => self.hoist_stmt(&stmt.body, scope),
            Statement::TryStatement(stmt) => {
                self.hoist_vars(&stmt.block.body, scope);
                if let Some(handler) = &stmt.handler {
                    self.hoist_vars(&handler.body.body, scope);
                }
                if let Some(finalizer) = &stmt.finalizer {
                    self.hoist_vars(&finalizer.body, scope);
                }
            }
            Statement::SwitchStatement(stmt) => {
                for case in &stmt.cases {
                    self.hoist_vars(&case.consequent, scope);
                }
            }
            _ => {}
        }
    }

    /// Execute statements directly in `scope`, hoisting function declarations first.
    fn exec_block_in<'a>(&self, stmts: &[Statement<'a>], scope: &Rc<Scope>) -> EResult<Flow> {
        for stmt in stmts {
            if let Statement::FunctionDeclaration(func) = stmt {
                if let Some(id) = &func.id {
                    let name = id.name.to_string();
                    let closure = self.closure(func.span, Some(name.clone()), false, scope);
                    scope.define(&name, closure);
                }
            }
        }
        for stmt in stmts {
            match self.exec_stmt(stmt, scope)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt<'a>(&self, stmt: &Statement<'a>, scope: &Rc<Scope>) -> EResult<Flow> {
        self.exec_inner(stmt, scope).map_err(|e| {
            self.interp.engine.record_fault(&self.text, stmt.span().start);
            e
        })
    }

    fn exec_inner<'a>(&self, stmt: &Statement<'a>, scope: &Rc<Scope>) -> EResult<Flow> {
        match stmt {
            Statement::EmptyStatement(_) | Statement::FunctionDeclaration(_) => Ok(Flow::Normal),
            Statement::ExpressionStatement(stmt) => {
                self.eval(&stmt.expression, scope)?;
                Ok(Flow::Normal)
            }
            Statement::VariableDeclaration(decl) => {
                self.declare(decl, scope)?;
                Ok(Flow::Normal)
            }
            Statement::BlockStatement(block) => self.exec_block_in(&block.body, &Scope::child(scope)),
            Statement::IfStatement(stmt) => {
                if self.eval(&stmt.test, scope)?.truthy() {
                    self.exec_stmt(&stmt.consequent, scope)
                } else if let Some(alternate) = &stmt.alternate {
                    self.exec_stmt(alternate, scope)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Statement::ForStatement(stmt) => self.exec_for(stmt, scope),
            Statement::ForOfStatement(stmt) => {
                let subject = self.eval(&stmt.right, scope)?;
                let items = self.iterate(&subject)?;
                self.exec_each(&stmt.left, items, &stmt.body, scope)
            }
            Statement::ForInStatement(stmt) => {
                let subject = self.eval(&stmt.right, scope)?;
                let keys = builtins::own_keys(self.interp, &subject)
                    .into_iter()
                    .map(Value::str)
                    .collect();
                self.exec_each(&stmt.left, keys, &stmt.body, scope)
            }
            Statement::WhileStatement(stmt) => {
                while self.eval(&stmt.test, scope)?.truthy() {
                    match self.exec_stmt(&stmt.body, scope)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Statement::DoWhileStatement(stmt) => {
                loop {
                    match self.exec_stmt(&stmt.body, scope)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if !self.eval(&stmt.test, scope)?.truthy() {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            Statement::ReturnStatement(stmt) => {
                let value = match &stmt.argument {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            Statement::BreakStatement(_) => Ok(Flow::Break),
            Statement::ContinueStatement(_) => Ok(Flow::Continue),
            Statement::ThrowStatement(stmt) => {
                let value = self.eval(&stmt.argument, scope)?;
                Err(ScriptError::Thrown(value.to_display()))
            }
            Statement::TryStatement(stmt) => self.exec_try(stmt, scope),
            Statement::SwitchStatement(stmt) => self.exec_switch(stmt, scope),
            other => Err(self.unsupported("statement", other.span())),
        }
    }

    fn declare<'a>(&self, decl: &VariableDeclaration<'a>, scope: &Rc<Scope>) -> EResult<()> {
        let kind = DeclKind::from(decl.kind);
        for declarator in &decl.declarations {
            match &declarator.init {
                Some(init) => {
                    let value = self.eval(init, scope)?;
                    self.bind_pattern(&declarator.id, value, kind, scope)?;
                }
                // `var x;` keeps an earlier value
                None if kind == DeclKind::Var => {}
                None => self.bind_pattern(&declarator.id, Value::Undefined, kind, scope)?,
            }
        }
        Ok(())
    }

    fn bind(&self, kind: DeclKind, name: &str, value: Value, scope: &Rc<Scope>) -> EResult<()> {
        match kind {
            DeclKind::Var => scope.nearest_function().define(name, value),
            DeclKind::Let => scope.declare(name, value, false),
            DeclKind::Const => scope.declare(name, value, true),
        }
        Ok(())
    }

    fn bind_pattern<'a>(
        &self,
        pattern: &BindingPattern<'a>,
        value: Value,
        kind: DeclKind,
        scope: &Rc<Scope>,
    ) -> EResult<()> {
        match pattern {
            BindingPattern::BindingIdentifier(id) => self.bind(kind, id.name.as_str(), value, scope),
            BindingPattern::ObjectPattern(object) => {
                let mut taken = Vec::new();
                for prop in &object.properties {
                    let key = self.property_key(&prop.key, prop.computed, scope)?;
                    let item = self.interp.get_member(&value, &key)?;
                    self.bind_pattern(&prop.value, item, kind, scope)?;
                    taken.push(key);
                }
                if let Some(rest) = &object.rest {
                    let remaining = Value::new_object();
                    for key in builtins::own_keys(self.interp, &value) {
                        if !taken.contains(&key) {
                            remaining.set(&key, self.interp.get_member(&value, &key)?);
                        }
                    }
                    self.bind_pattern(&rest.argument, remaining, kind, scope)?;
                }
                Ok(())
            }
            BindingPattern::ArrayPattern(array) => {
                let items = self.iterate(&value)?;
                for (i, element) in array.elements.iter().enumerate() {
                    if let Some(pattern) = element {
                        let item = items.get(i).cloned().unwrap_or_default();
                        self.bind_pattern(pattern, item, kind, scope)?;
                    }
                }
                if let Some(rest) = &array.rest {
                    let tail = items.get(array.elements.len()..).unwrap_or_default().to_vec();
                    self.bind_pattern(&rest.argument, Value::array(tail), kind, scope)?;
                }
                Ok(())
            }
            BindingPattern::AssignmentPattern(assign) => {
                let value = match value {
                    Value::Undefined => self.eval(&assign.right, scope)?,
                    other => other,
                };
                self.bind_pattern(&assign.left, value, kind, scope)
            }
        }
    }

    fn exec_for<'a>(&self, stmt: &ForStatement<'a>, scope: &Rc<Scope>) -> EResult<Flow> {
        let mut current = Scope::child(scope);
        match &stmt.init {
            Some(ForStatementInit::VariableDeclaration(decl)) => self.declare(decl, &current)?,
            Some(init) => {
                if let Some(expr) = init.as_expression() {
                    self.eval(expr, &current)?;
                }
            }
            None => {}
        }

        loop {
            if let Some(test) = &stmt.test {
                if !self.eval(test, &current)?.truthy() {
                    break;
                }
            }
            match self.exec_stmt(&stmt.body, &current)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
            // closures created by the body keep the bindings of their own iteration
            current = current.duplicate();
            if let Some(update) = &stmt.update {
                self.eval(update, &current)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_each<'a>(
        &self,
        left: &ForStatementLeft<'a>,
        items: Vec<Value>,
        body: &Statement<'a>,
        scope: &Rc<Scope>,
    ) -> EResult<Flow> {
        for item in items {
            let iteration = Scope::child(scope);
            match left {
                ForStatementLeft::VariableDeclaration(decl) => {
                    let kind = DeclKind::from(decl.kind);
                    for declarator in &decl.declarations {
                        self.bind_pattern(&declarator.id, item.clone(), kind, &iteration)?;
                    }
                }
                ForStatementLeft::AssignmentTargetIdentifier(id) => {
                    self.assign_var(id.name.as_str(), item, &iteration)?
                }
                other => return Err(self.unsupported("loop target", other.span())),
            }
            match self.exec_stmt(body, &iteration)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_try<'a>(&self, stmt: &TryStatement<'a>, scope: &Rc<Scope>) -> EResult<Flow> {
        let result = match (
            self.exec_block_in(&stmt.block.body, &Scope::child(scope)),
            &stmt.handler,
        ) {
            (Err(err), Some(handler)) => {
                trace!(error = %err, "caught");
                self.interp.engine.clear_fault();
                let catch_scope = Scope::child(scope);
                if let Some(param) = &handler.param {
                    self.bind_pattern(&param.pattern, error_value(&err), DeclKind::Let, &catch_scope)?;
                }
                self.exec_block_in(&handler.body.body, &catch_scope)
            }
            (result, _) => result,
        };
        if let Some(finalizer) = &stmt.finalizer {
            match self.exec_block_in(&finalizer.body, &Scope::child(scope))? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        result
    }

    fn exec_switch<'a>(&self, stmt: &SwitchStatement<'a>, scope: &Rc<Scope>) -> EResult<Flow> {
        let subject = self.eval(&stmt.discriminant, scope)?;
        let inner = Scope::child(scope);
        let mut start = None;
        for (i, case) in stmt.cases.iter().enumerate() {
            if let Some(test) = &case.test {
                if self.eval(test, &inner)?.strict_equals(&subject) {
                    start = Some(i);
                    break;
                }
            }
        }
        let start = match start.or_else(|| stmt.cases.iter().position(|case| case.test.is_none())) {
            Some(start) => start,
            None => return Ok(Flow::Normal),
        };
        for case in stmt.cases.iter().skip(start) {
            match self.exec_block_in(&case.consequent, &inner)? {
                Flow::Normal => {}
                Flow::Break => return Ok(Flow::Normal),
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EXPRESSIONS
    // ═══════════════════════════════════════════════════════════════════════════

    fn eval<'a>(&self, expr: &Expression<'a>, scope: &Rc<Scope>) -> EResult<Value> {
        match expr {
            Expression::NumericLiteral(lit) => Ok(Value::Number(lit.value)),
            Expression::StringLiteral(lit) => Ok(Value::str(lit.value.as_str())),
            Expression::BooleanLiteral(lit) => Ok(Value::Bool(lit.value)),
            Expression::NullLiteral(_) => Ok(Value::Null),
            Expression::TemplateLiteral(tpl) => {
                let mut out = String::new();
                for (i, quasi) in tpl.quasis.iter().enumerate() {
                    match &quasi.value.cooked {
                        Some(cooked) => out.push_str(cooked.as_str()),
                        None => out.push_str(quasi.value.raw.as_str()),
                    }
                    if let Some(expr) = tpl.expressions.get(i) {
                        out.push_str(&self.eval(expr, scope)?.to_display());
                    }
                }
                Ok(Value::str(out))
            }
            Expression::Identifier(id) => scope
                .lookup(id.name.as_str())
                .ok_or_else(|| ScriptError::reference(id.name.as_str())),
            Expression::ThisExpression(_) => Ok(scope.lookup("this").unwrap_or_default()),
            Expression::ParenthesizedExpression(paren) => self.eval(&paren.expression, scope),
            Expression::SequenceExpression(seq) => {
                let mut last = Value::Undefined;
                for expr in &seq.expressions {
                    last = self.eval(expr, scope)?;
                }
                Ok(last)
            }
            Expression::ArrayExpression(array) => {
                let mut values = Vec::with_capacity(array.elements.len());
                for element in &array.elements {
                    match element {
                        ArrayExpressionElement::SpreadElement(spread) => {
                            let source = self.eval(&spread.argument, scope)?;
                            values.extend(self.iterate(&source)?);
                        }
                        ArrayExpressionElement::Elision(_) => values.push(Value::Undefined),
                        other => {
                            if let Some(expr) = other.as_expression() {
                                values.push(self.eval(expr, scope)?);
                            }
                        }
                    }
                }
                Ok(Value::array(values))
            }
            Expression::ObjectExpression(object) => self.eval_object(object, scope),
            Expression::FunctionExpression(func) => {
                if func.r#async || func.generator {
                    return Err(self.unsupported("function", func.span));
                }
                let name = func.id.as_ref().map(|id| id.name.to_string());
                Ok(self.closure(func.span, name, false, scope))
            }
            Expression::ArrowFunctionExpression(arrow) => {
                if arrow.r#async {
                    return Err(self.unsupported("function", arrow.span));
                }
                Ok(self.closure(arrow.span, None, false, scope))
            }
            Expression::StaticMemberExpression(_)
            | Expression::ComputedMemberExpression(_)
            | Expression::CallExpression(_) => Ok(self.eval_link(expr, scope)?.unwrap_or_default()),
            Expression::ChainExpression(chain) => {
                let value = match &chain.expression {
                    ChainElement::CallExpression(call) => self.call_link(call, scope)?,
                    ChainElement::StaticMemberExpression(member) => self.static_link(member, scope)?,
                    ChainElement::ComputedMemberExpression(member) => {
                        self.computed_link(member, scope)?
                    }
                    _ => return Err(self.unsupported("expression", chain.span)),
                };
                Ok(value.unwrap_or_default())
            }
            Expression::NewExpression(new) => {
                let callee = self.eval(&new.callee, scope)?;
                let args = self.arguments(&new.arguments, scope)?;
                match &callee {
                    Value::Function(_) => {
                        let this = Value::new_object();
                        let result = self.interp.call(&callee, this.clone(), &args)?;
                        Ok(match result {
                            Value::Object(_) | Value::Array(_) => result,
                            _ => this,
                        })
                    }
                    _ if callee.is_callable() => self.interp.call(&callee, Value::Undefined, &args),
                    _ => Err(ScriptError::type_error(format!(
                        "{} is not a constructor",
                        self.source_of(new.callee.span())
                    ))),
                }
            }
            Expression::UnaryExpression(unary) => self.eval_unary(unary, scope),
            Expression::UpdateExpression(update) => {
                let target = self.simple_target(&update.argument, scope)?;
                let old = self.read_target(&target, scope)?.to_number();
                let new = match update.operator {
                    UpdateOperator::Increment => old + 1.0,
                    UpdateOperator::Decrement => old - 1.0,
                };
                self.write_target(&target, Value::Number(new), scope)?;
                Ok(Value::Number(if update.prefix { new } else { old }))
            }
            Expression::BinaryExpression(binary) => {
                let left = self.eval(&binary.left, scope)?;
                let right = self.eval(&binary.right, scope)?;
                self.interp.binary(binary.operator, &left, &right)
            }
            Expression::LogicalExpression(logical) => {
                let left = self.eval(&logical.left, scope)?;
                let short_circuit = match logical.operator {
                    LogicalOperator::And => !left.truthy(),
                    LogicalOperator::Or => left.truthy(),
                    LogicalOperator::Coalesce => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(&logical.right, scope)
                }
            }
            Expression::ConditionalExpression(cond) => {
                if self.eval(&cond.test, scope)?.truthy() {
                    self.eval(&cond.consequent, scope)
                } else {
                    self.eval(&cond.alternate, scope)
                }
            }
            Expression::AssignmentExpression(assign) => self.eval_assign(assign, scope),
            other => Err(self.unsupported("expression", other.span())),
        }
    }

    fn eval_object<'a>(&self, object: &ObjectExpression<'a>, scope: &Rc<Scope>) -> EResult<Value> {
        let out = Value::new_object();
        for property in &object.properties {
            match property {
                ObjectPropertyKind::ObjectProperty(prop) => {
                    if prop.kind != PropertyKind::Init {
                        return Err(self.unsupported("accessor", prop.span));
                    }
                    let key = self.property_key(&prop.key, prop.computed, scope)?;
                    let value = match &prop.value {
                        Expression::FunctionExpression(func) if prop.method => {
                            self.closure(func.span, Some(key.clone()), true, scope)
                        }
                        value => self.eval(value, scope)?,
                    };
                    out.set(&key, value);
                }
                ObjectPropertyKind::SpreadProperty(spread) => {
                    let source = self.eval(&spread.argument, scope)?;
                    for key in builtins::own_keys(self.interp, &source) {
                        out.set(&key, self.interp.get_member(&source, &key)?);
                    }
                }
            }
        }
        Ok(out)
    }

    fn eval_unary<'a>(&self, unary: &UnaryExpression<'a>, scope: &Rc<Scope>) -> EResult<Value> {
        match (unary.operator, &unary.argument) {
            (UnaryOperator::Typeof, Expression::Identifier(id)) => {
                let value = scope.lookup(id.name.as_str()).unwrap_or_default();
                return Ok(Value::str(value.type_of()));
            }
            (UnaryOperator::Delete, Expression::StaticMemberExpression(member)) => {
                let object = self.eval(&member.object, scope)?;
                return Ok(Value::Bool(delete_key(&object, member.property.name.as_str())));
            }
            (UnaryOperator::Delete, Expression::ComputedMemberExpression(member)) => {
                let object = self.eval(&member.object, scope)?;
                let key = self.eval(&member.expression, scope)?.to_display();
                return Ok(Value::Bool(delete_key(&object, &key)));
            }
            _ => {}
        }
        let value = self.eval(&unary.argument, scope)?;
        Ok(match unary.operator {
            UnaryOperator::LogicalNot => Value::Bool(!value.truthy()),
            UnaryOperator::UnaryNegation => Value::Number(-value.to_number()),
            UnaryOperator::UnaryPlus => Value::Number(value.to_number()),
            UnaryOperator::BitwiseNot => Value::Number(f64::from(!to_int32(value.to_number()))),
            UnaryOperator::Typeof => Value::str(value.type_of()),
            UnaryOperator::Void => Value::Undefined,
            UnaryOperator::Delete => Value::Bool(true),
        })
    }

    fn eval_assign<'a>(&self, assign: &AssignmentExpression<'a>, scope: &Rc<Scope>) -> EResult<Value> {
        let target = match &assign.left {
            AssignmentTarget::AssignmentTargetIdentifier(id) => Target::Var(id.name.to_string()),
            AssignmentTarget::StaticMemberExpression(member) => Target::Member(
                self.eval(&member.object, scope)?,
                member.property.name.to_string(),
            ),
            AssignmentTarget::ComputedMemberExpression(member) => {
                let object = self.eval(&member.object, scope)?;
                let key = self.eval(&member.expression, scope)?.to_display();
                Target::Member(object, key)
            }
            other => return Err(self.unsupported("assignment target", other.span())),
        };
        let value = match assign.operator {
            AssignmentOperator::Assign => self.eval(&assign.right, scope)?,
            AssignmentOperator::LogicalOr
            | AssignmentOperator::LogicalAnd
            | AssignmentOperator::LogicalNullish => {
                let current = self.read_target(&target, scope)?;
                let keep = match assign.operator {
                    AssignmentOperator::LogicalOr => current.truthy(),
                    AssignmentOperator::LogicalAnd => !current.truthy(),
                    _ => !current.is_nullish(),
                };
                if keep {
                    return Ok(current);
                }
                self.eval(&assign.right, scope)?
            }
            op => {
                let binary = compound(op).ok_or_else(|| self.unsupported("operator", assign.span))?;
                let current = self.read_target(&target, scope)?;
                let rhs = self.eval(&assign.right, scope)?;
                self.interp.binary(binary, &current, &rhs)?
            }
        };
        self.write_target(&target, value.clone(), scope)?;
        Ok(value)
    }

    // Member and call links of an optional chain. `None` means the chain short-circuited.

    fn eval_link<'a>(&self, expr: &Expression<'a>, scope: &Rc<Scope>) -> EResult<Option<Value>> {
        match expr {
            Expression::StaticMemberExpression(member) => self.static_link(member, scope),
            Expression::ComputedMemberExpression(member) => self.computed_link(member, scope),
            Expression::CallExpression(call) => self.call_link(call, scope),
            other => self.eval(other, scope).map(Some),
        }
    }

    fn static_link<'a>(
        &self,
        member: &StaticMemberExpression<'a>,
        scope: &Rc<Scope>,
    ) -> EResult<Option<Value>> {
        let object = match self.eval_link(&member.object, scope)? {
            Some(object) => object,
            None => return Ok(None),
        };
        if member.optional && object.is_nullish() {
            return Ok(None);
        }
        self.interp
            .get_member(&object, member.property.name.as_str())
            .map(Some)
    }

    fn computed_link<'a>(
        &self,
        member: &ComputedMemberExpression<'a>,
        scope: &Rc<Scope>,
    ) -> EResult<Option<Value>> {
        let object = match self.eval_link(&member.object, scope)? {
            Some(object) => object,
            None => return Ok(None),
        };
        if member.optional && object.is_nullish() {
            return Ok(None);
        }
        let key = self.eval(&member.expression, scope)?.to_display();
        self.interp.get_member(&object, &key).map(Some)
    }

    fn call_link<'a>(&self, call: &CallExpression<'a>, scope: &Rc<Scope>) -> EResult<Option<Value>> {
        let (this, func) = match &call.callee {
            Expression::StaticMemberExpression(member) => {
                let object = match self.eval_link(&member.object, scope)? {
                    Some(object) => object,
                    None => return Ok(None),
                };
                if member.optional && object.is_nullish() {
                    return Ok(None);
                }
                let func = self.interp.get_member(&object, member.property.name.as_str())?;
                (object, func)
            }
            Expression::ComputedMemberExpression(member) => {
                let object = match self.eval_link(&member.object, scope)? {
                    Some(object) => object,
                    None => return Ok(None),
                };
                if member.optional && object.is_nullish() {
                    return Ok(None);
                }
                let key = self.eval(&member.expression, scope)?.to_display();
                let func = self.interp.get_member(&object, &key)?;
                (object, func)
            }
            callee => match self.eval_link(callee, scope)? {
                Some(func) => (Value::Undefined, func),
                None => return Ok(None),
            },
        };
        if call.optional && func.is_nullish() {
            return Ok(None);
        }
        let description = self.source_of(call.callee.span());
        if !func.is_callable() {
            return Err(ScriptError::type_error(format!(
                "{} is not a function",
                description
            )));
        }
        let args = self.arguments(&call.arguments, scope)?;
        trace!(callee = %description, argc = args.len(), "script call");
        self.interp.call(&func, this, &args).map(Some)
    }

    fn arguments<'a>(&self, args: &[Argument<'a>], scope: &Rc<Scope>) -> EResult<Vec<Value>> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Argument::SpreadElement(spread) => {
                    let source = self.eval(&spread.argument, scope)?;
                    values.extend(self.iterate(&source)?);
                }
                other => {
                    if let Some(expr) = other.as_expression() {
                        values.push(self.eval(expr, scope)?);
                    }
                }
            }
        }
        Ok(values)
    }

    fn property_key<'a>(
        &self,
        key: &PropertyKey<'a>,
        computed: bool,
        scope: &Rc<Scope>,
    ) -> EResult<String> {
        if let (false, PropertyKey::StaticIdentifier(id)) = (computed, key) {
            return Ok(id.name.to_string());
        }
        match key.as_expression() {
            Some(expr) => Ok(self.eval(expr, scope)?.to_display()),
            None => Err(self.unsupported("property key", key.span())),
        }
    }

    /// Items of an iterable value (`for..of`, spread, array patterns).
    fn iterate(&self, value: &Value) -> EResult<Vec<Value>> {
        match value {
            Value::Array(items) => Ok(items.borrow().clone()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.to_string())).collect()),
            other => Err(ScriptError::type_error(format!(
                "{} is not iterable",
                other.to_display()
            ))),
        }
    }

    fn simple_target<'a>(
        &self,
        target: &SimpleAssignmentTarget<'a>,
        scope: &Rc<Scope>,
    ) -> EResult<Target> {
        match target {
            SimpleAssignmentTarget::AssignmentTargetIdentifier(id) => {
                Ok(Target::Var(id.name.to_string()))
            }
            SimpleAssignmentTarget::StaticMemberExpression(member) => Ok(Target::Member(
                self.eval(&member.object, scope)?,
                member.property.name.to_string(),
            )),
            SimpleAssignmentTarget::ComputedMemberExpression(member) => {
                let object = self.eval(&member.object, scope)?;
                let key = self.eval(&member.expression, scope)?.to_display();
                Ok(Target::Member(object, key))
            }
            other => Err(self.unsupported("update target", other.span())),
        }
    }

    fn read_target(&self, target: &Target, scope: &Rc<Scope>) -> EResult<Value> {
        match target {
            Target::Var(name) => scope
                .lookup(name)
                .ok_or_else(|| ScriptError::reference(name)),
            Target::Member(object, key) => self.interp.get_member(object, key),
        }
    }

    fn write_target(&self, target: &Target, value: Value, scope: &Rc<Scope>) -> EResult<()> {
        match target {
            Target::Var(name) => self.assign_var(name, value, scope),
            Target::Member(object, key) => self.interp.set_member(object, key, value),
        }
    }

    /// Assign to a declared binding; undeclared names become globals.
    fn assign_var(&self, name: &str, value: Value, scope: &Rc<Scope>) -> EResult<()> {
        if !scope.assign(name, value.clone())? {
            scope.root().define(name, value);
        }
        Ok(())
    }
}

fn hoist_decl(decl: &VariableDeclaration<'_>, scope: &Rc<Scope>) {
    if decl.kind != VariableDeclarationKind::Var {
        return;
    }
    let mut names = Vec::new();
    for declarator in &decl.declarations {
        binding_names(&declarator.id, &mut names);
    }
    for name in names {
        if !scope.has_own(&name) {
            scope.define(&name, Value::Undefined);
        }
    }
}

fn binding_names(pattern: &BindingPattern<'_>, names: &mut Vec<String>) {
    match pattern {
        BindingPattern::BindingIdentifier(id) => names.push(id.name.to_string()),
        BindingPattern::ObjectPattern(object) => {
            for prop in &object.properties {
                binding_names(&prop.value, names);
            }
            if let Some(rest) = &object.rest {
                binding_names(&rest.argument, names);
            }
        }
        BindingPattern::ArrayPattern(array) => {
            for pattern in array.elements.iter().flatten() {
                binding_names(pattern, names);
            }
            if let Some(rest) = &array.rest {
                binding_names(&rest.argument, names);
            }
        }
        BindingPattern::AssignmentPattern(assign) => binding_names(&assign.left, names),
    }
}

fn delete_key(object: &Value, key: &str) -> bool {
    if let Value::Object(map) = object {
        map.borrow_mut().shift_remove(key);
    }
    true
}

impl Interp {
    // ═══════════════════════════════════════════════════════════════════════════
    // OPERATORS & MEMBERS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn binary(&self, op: BinaryOperator, left: &Value, right: &Value) -> EResult<Value> {
        let numeric = |f: fn(f64, f64) -> f64| Value::Number(f(left.to_number(), right.to_number()));
        let bitwise = |f: fn(i32, i32) -> i32| {
            Value::Number(f64::from(f(to_int32(left.to_number()), to_int32(right.to_number()))))
        };
        Ok(match op {
            BinaryOperator::Addition => {
                let stringy = |v: &Value| !matches!(
                    v,
                    Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_)
                );
                if stringy(left) || stringy(right) {
                    let mut out = left.to_display();
                    out.push_str(&right.to_display());
                    Value::str(out)
                } else {
                    numeric(|a, b| a + b)
                }
            }
            BinaryOperator::Subtraction => numeric(|a, b| a - b),
            BinaryOperator::Multiplication => numeric(|a, b| a * b),
            BinaryOperator::Division => numeric(|a, b| a / b),
            BinaryOperator::Remainder => numeric(|a, b| a % b),
            BinaryOperator::Exponential => numeric(f64::powf),
            BinaryOperator::BitwiseAnd => bitwise(|a, b| a & b),
            BinaryOperator::BitwiseOR => bitwise(|a, b| a | b),
            BinaryOperator::BitwiseXOR => bitwise(|a, b| a ^ b),
            BinaryOperator::ShiftLeft => bitwise(|a, b| a.wrapping_shl(b as u32 & 31)),
            BinaryOperator::ShiftRight => bitwise(|a, b| a.wrapping_shr(b as u32 & 31)),
            BinaryOperator::ShiftRightZeroFill => {
                let value = to_int32(left.to_number()) as u32;
                let shift = to_int32(right.to_number()) as u32 & 31;
                Value::Number(f64::from(value >> shift))
            }
            BinaryOperator::Equality => Value::Bool(left.loose_equals(right)),
            BinaryOperator::Inequality => Value::Bool(!left.loose_equals(right)),
            BinaryOperator::StrictEquality => Value::Bool(left.strict_equals(right)),
            BinaryOperator::StrictInequality => Value::Bool(!left.strict_equals(right)),
            BinaryOperator::LessThan
            | BinaryOperator::LessEqualThan
            | BinaryOperator::GreaterThan
            | BinaryOperator::GreaterEqualThan => {
                let ordering = match (left, right) {
                    (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                    _ => left.to_number().partial_cmp(&right.to_number()),
                };
                Value::Bool(match ordering {
                    None => false,
                    Some(ordering) => match op {
                        BinaryOperator::LessThan => ordering.is_lt(),
                        BinaryOperator::LessEqualThan => ordering.is_le(),
                        BinaryOperator::GreaterThan => ordering.is_gt(),
                        _ => ordering.is_ge(),
                    },
                })
            }
            BinaryOperator::In => {
                let key = left.to_display();
                match right {
                    Value::Object(map) => Value::Bool(map.borrow().contains_key(&key)),
                    Value::Array(items) => Value::Bool(
                        key == "length"
                            || key
                                .parse::<usize>()
                                .map(|i| i < items.borrow().len())
                                .unwrap_or(false),
                    ),
                    Value::Component(component) => Value::Bool(component.has_member(&key)),
                    other => {
                        return Err(ScriptError::type_error(format!(
                            "Cannot use 'in' operator to search for '{}' in {}",
                            key,
                            other.to_display()
                        )))
                    }
                }
            }
            BinaryOperator::Instanceof => {
                return Err(ScriptError::type_error("instanceof is not supported"))
            }
        })
    }

    pub fn get_member(&self, object: &Value, key: &str) -> EResult<Value> {
        match object {
            Value::Undefined | Value::Null => Err(ScriptError::type_error(format!(
                "Cannot read properties of {} (reading '{}')",
                object.to_display(),
                key
            ))),
            Value::Object(map) => {
                if let Some(value) = map.borrow().get(key) {
                    return Ok(value.clone());
                }
                Ok(builtins::object_method(key).unwrap_or(Value::Undefined))
            }
            Value::Array(items) => {
                if key == "length" {
                    return Ok(Value::Number(items.borrow().len() as f64));
                }
                if let Ok(index) = key.parse::<usize>() {
                    return Ok(items.borrow().get(index).cloned().unwrap_or_default());
                }
                Ok(builtins::array_method(key).unwrap_or(Value::Undefined))
            }
            Value::Str(s) => {
                if key == "length" {
                    return Ok(Value::Number(s.chars().count() as f64));
                }
                if let Ok(index) = key.parse::<usize>() {
                    return Ok(s
                        .chars()
                        .nth(index)
                        .map(|c| Value::str(c.to_string()))
                        .unwrap_or_default());
                }
                Ok(builtins::string_method(key).unwrap_or(Value::Undefined))
            }
            Value::Number(_) => Ok(builtins::number_method(key).unwrap_or(Value::Undefined)),
            Value::Bool(_) => Ok(Value::Undefined),
            Value::Function(_) | Value::Native(_) | Value::Template(_) => {
                if let (Value::Template(template), "id") = (object, key) {
                    return Ok(Value::str(&template.id));
                }
                if key == "name" {
                    return Ok(Value::str(match object {
                        Value::Function(closure) => closure.code.name.clone().unwrap_or_default(),
                        Value::Native(native) => native.name.to_string(),
                        Value::Template(template) => template.id.clone(),
                        _ => String::new(),
                    }));
                }
                Ok(builtins::function_method(key).unwrap_or(Value::Undefined))
            }
            Value::Node(id) => builtins::node_get(self, *id, key),
            Value::Component(component) => Ok(component.get_member(key)),
        }
    }

    pub fn set_member(&self, object: &Value, key: &str, value: Value) -> EResult<()> {
        match object {
            Value::Object(map) => {
                map.borrow_mut().insert(key.to_string(), value);
                Ok(())
            }
            Value::Array(items) => {
                let mut items = items.borrow_mut();
                if key == "length" {
                    let len = value.to_number();
                    if len < 0.0 || len.fract() != 0.0 {
                        return Err(ScriptError::Range("Invalid array length".to_string()));
                    }
                    items.resize(len as usize, Value::Undefined);
                    return Ok(());
                }
                match key.parse::<usize>() {
                    Ok(index) => {
                        if index >= items.len() {
                            items.resize(index + 1, Value::Undefined);
                        }
                        items[index] = value;
                        Ok(())
                    }
                    Err(_) => Err(ScriptError::type_error(format!(
                        "Cannot set property '{}' of an array",
                        key
                    ))),
                }
            }
            Value::Node(id) => builtins::node_set(self, *id, key, value),
            Value::Component(component) => {
                component.set_member(key, value);
                Ok(())
            }
            other => Err(ScriptError::type_error(format!(
                "Cannot set properties of {} (setting '{}')",
                other.to_display(),
                key
            ))),
        }
    }

    /// String conversion used for output concatenation.
    pub fn stringify(&self, value: &Value) -> String {
        match value {
            Value::Number(n) => number_to_string(*n),
            other => other.to_display(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::engine::Engine;
    use crate::script::ScriptError;

    fn eval(source: &str) -> String {
        let engine = Engine::new(Config::default());
        let value = engine.interp().run(source).unwrap();
        value.to_display()
    }

    #[test]
    fn test_arithmetic_and_strings() {
        assert_eq!(eval("return 1 + 2 * 3"), "7");
        assert_eq!(eval("return '1' + 2"), "12");
        assert_eq!(eval("return 7 % 3 - 10 / 4"), "-1.5");
        assert_eq!(eval("return `a${1 + 1}b`"), "a2b");
        assert_eq!(eval("return [2 ** 3, 5 & 3, 1 << 4, -1 >>> 28, ~5].join()"), "8,1,16,15,-6");
    }

    #[test]
    fn test_closures_capture_per_iteration_bindings() {
        let out = eval(
            "let fns = []
             for (let i = 0; i < 3; i++) { fns.push(() => i) }
             return fns.map(f => f()).join(',')",
        );
        assert_eq!(out, "0,1,2");
    }

    #[test]
    fn test_var_hoisting_and_function_declarations() {
        assert_eq!(eval("if (true) { var late = 2 } return late"), "2");
        let out = eval(
            "function twice(x) { return helper(x) * 2 }
             function helper(x) { return x + 1 }
             if (true) { var late = twice(1) }
             return late",
        );
        assert_eq!(out, "4");
        assert_eq!(eval("var seen = typeof early; var early = 1; return seen"), "undefined");
    }

    #[test]
    fn test_top_level_var_stays_local() {
        let engine = Engine::new(Config::default());
        let interp = engine.interp();
        interp.run("var local = 1").unwrap();
        assert!(interp.eval("local").is_err());
    }

    #[test]
    fn test_loops_and_flow_control() {
        let out = eval(
            "let out = ''
             for (const x of [1, 2, 3, 4]) { if (x === 2) continue; if (x === 4) break; out += x }
             for (k in { a: 1, b: 2 }) { out += k }
             let n = 0
             while (n < 3) n++
             do { n += 10 } while (n < 20)
             return out + n",
        );
        assert_eq!(out, "13ab23");
    }

    #[test]
    fn test_switch_falls_through_until_break() {
        let out = eval(
            "let out = ''
             for (const v of [1, 2, 9]) {
               switch (v) {
                 case 1: out += 'one'
                 case 2: out += 'two'; break
                 default: out += '?'
               }
             }
             return out",
        );
        assert_eq!(out, "onetwotwo?");
    }

    #[test]
    fn test_try_catch_finally() {
        let out = eval(
            "let log = []
             try { missing() } catch (e) { log.push(e.name) } finally { log.push('done') }
             try { throw 'boom' } catch (e) { log.push(e) }
             try { null.x } catch ({ message }) { log.push(message.length > 0) }
             return log.join()",
        );
        assert_eq!(out, "ReferenceError,done,boom,true");
    }

    #[test]
    fn test_destructuring_spread_and_defaults() {
        let out = eval(
            "const { a, b: { c = 3 } = {}, ...rest } = { a: 1, d: 4, e: 5 }
             const [x, , y = 9, ...tail] = [1, 2, undefined, 4, 5]
             const merged = { ...rest, a }
             return [a, c, Object.keys(rest).join('+'), x, y, tail.join('+'), Object.keys(merged).join('+'), Math.max(...[1, 7, 3])].join()",
        );
        assert_eq!(out, "1,3,d+e,1,9,4+5,d+e+a,7");
    }

    #[test]
    fn test_optional_chaining_and_nullish() {
        let out = eval(
            "const data = { user: null, list: [1], fn: () => 'called' }
             return [data.user?.name, data.user?.name.first, data.fn?.(), data.none?.(), data.list?.[0], data.user ?? 'anon'].join()",
        );
        assert_eq!(out, ",,called,,1,anon");
        assert_eq!(eval("let v = null; v ??= 4; v ||= 5; v &&= v + 1; return v"), "5");
    }

    #[test]
    fn test_this_binding() {
        let out = eval(
            "const obj = { name: 'box', get() { return this.name }, arrow() { return (() => this.name)() } }
             return obj.get() + obj.arrow()",
        );
        assert_eq!(out, "boxbox");
        assert_eq!(eval("function Point(x) { this.x = x } return new Point(3).x"), "3");
    }

    #[test]
    fn test_rest_parameters_are_rejected_on_call() {
        let engine = Engine::new(Config::default());
        let err = engine
            .interp()
            .run("const count = (...nums) => nums.length; return count(1, 2)")
            .unwrap_err();
        assert!(err.to_string().contains("Unsupported rest parameter"), "{}", err);
    }

    #[test]
    fn test_errors() {
        let engine = Engine::new(Config::default());
        let interp = engine.interp();
        assert!(matches!(
            interp.run("return missing + 1"),
            Err(ScriptError::Reference(_))
        ));
        assert!(matches!(
            interp.run("const a = 1; a = 2"),
            Err(ScriptError::Type(_))
        ));
        assert!(matches!(
            interp.run("let o = null; return o.x"),
            Err(ScriptError::Type(_))
        ));
        assert!(matches!(interp.run("return (1"), Err(ScriptError::Syntax { .. })));
        assert!(interp.run("throw 'boom'").unwrap_err().to_string().contains("boom"));
        assert!(interp
            .run("let data = {}; data.nope()")
            .unwrap_err()
            .to_string()
            .contains("data.nope is not a function"));
        assert_eq!(
            interp.run("return typeof nothing").unwrap().to_display(),
            "undefined"
        );
    }

    #[test]
    fn test_sloppy_assignment_creates_global() {
        let engine = Engine::new(Config::default());
        let interp = engine.interp();
        interp.run("counter = 5").unwrap();
        assert_eq!(interp.eval("counter + 1").unwrap().to_display(), "6");
    }

    #[test]
    fn test_failing_statement_is_recorded() {
        let engine = Engine::new(Config::default());
        let source = "let a = 1\nlet b = a.x.y\nreturn b";
        assert!(engine.interp().run(source).is_err());
        let (text, offset) = engine.take_fault().unwrap();
        assert_eq!(&*text, source);
        assert_eq!(offset as usize, source.find("let b").unwrap());
        assert!(engine.take_fault().is_none());
    }
}
