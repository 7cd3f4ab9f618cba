use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::rc::Rc;

use log::{debug, trace};

use crate::ast::{Expr, ExprId, FunctionDecl, Stmt};
use crate::environment::{EnvId, Environments, Slot};
use crate::error::{EmberError, RuntimeErrorKind};
use crate::native::natives;
use crate::resolver::Resolutions;
use crate::token::{Token, TokenType};
use crate::value::{Callable, Class, Function, INITIALIZER_NAME, Instance, Value};

/// Deepest chain of nested calls before a script is stopped.
pub const MAX_CALL_DEPTH: usize = 1024;

/// Stack kept free before `stacker` switches to a new segment.
const RED_ZONE: usize = 100 * 1024;
/// Size of each new stack segment.
const STACK_PER_RECURSION: usize = 1024 * 1024;

fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

/// How a statement finished. `Return` unwinds to the nearest call,
/// `Break` to the nearest loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Normal,
    Return(Value),
    Break,
}

pub struct Interpreter {
    envs: Environments,
    current: EnvId,
    resolutions: Resolutions,
    depth: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        let mut envs = Environments::new();
        let globals = envs.globals();
        for native in natives() {
            let name = native.name;
            envs.define(globals, name, Slot::Callable(Callable::Native(Rc::new(native))));
        }
        Self {
            envs,
            current: globals,
            resolutions: HashMap::new(),
            depth: 0,
        }
    }

    /// Adds scope distances for a newly resolved program. Earlier entries
    /// stay, since functions from previous runs may still be called.
    pub fn set_resolutions(&mut self, resolutions: Resolutions) {
        self.resolutions.extend(resolutions);
    }

    /// Reclaims unreachable environments, then forgets the resolutions of
    /// code that can never run again: everything outside the bodies of
    /// functions that are still alive. Returns the number of environments
    /// reclaimed.
    pub fn collect_garbage(&mut self) -> usize {
        let reclaimed = self.envs.collect();

        let mut reachable = HashSet::new();
        for decl in self.envs.live_declarations() {
            for stmt in &decl.body {
                stmt.collect_ids(&mut reachable);
            }
        }
        let before = self.resolutions.len();
        self.resolutions.retain(|id, _| reachable.contains(id));
        debug!(
            "dropped {} resolutions, {} kept",
            before - self.resolutions.len(),
            self.resolutions.len()
        );
        reclaimed
    }

    /// Names defined in the global scope.
    pub fn variable_names(&self) -> Vec<String> {
        self.envs.variable_names(self.envs.globals())
    }

    /// Scopes currently held in the environment arena.
    pub fn live_environments(&self) -> usize {
        self.envs.live_count()
    }

    /// Runs `statements` in the global scope. Stops at the first runtime
    /// error. Returns the value of the final statement when it is an
    /// expression statement.
    pub fn interpret(
        &mut self,
        statements: &[Stmt],
        out: &mut dyn Write,
    ) -> Result<Option<Value>, EmberError> {
        debug!("interpreting {} statements", statements.len());
        let mut last = None;
        for stmt in statements {
            last = match stmt {
                Stmt::Expression { expression } => Some(self.evaluate(expression, out)?),
                _ => {
                    self.execute(stmt, out)?;
                    None
                }
            };
        }
        Ok(last)
    }

    pub fn execute(&mut self, stmt: &Stmt, out: &mut dyn Write) -> Result<Flow, EmberError> {
        match stmt {
            Stmt::Expression { expression } => {
                self.evaluate(expression, out)?;
                Ok(Flow::Normal)
            }
            Stmt::Let { name, initializer } => {
                let value = match initializer {
                    Some(expr) => Some(self.evaluate(expr, out)?),
                    None => None,
                };
                self.envs
                    .define(self.current, &name.lexeme, Slot::Variable(value));
                Ok(Flow::Normal)
            }
            Stmt::Block { statements } => {
                let env = self.envs.push(self.current);
                let result = self.execute_block(statements, env, out);
                self.end_frame(env);
                result
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition, out)?.is_truthy() {
                    self.execute(then_branch, out)
                } else if let Some(else_stmt) = else_branch {
                    self.execute(else_stmt, out)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { condition, body } => {
                while self.evaluate(condition, out)?.is_truthy() {
                    match self.execute(body, out)? {
                        Flow::Normal => {}
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Break { .. } => Ok(Flow::Break),
            Stmt::Function(decl) => {
                self.envs.capture(self.current);
                let function = self
                    .envs
                    .track(Function::new(Rc::clone(decl), self.current, false));
                self.envs.define(
                    self.current,
                    &decl.name.lexeme,
                    Slot::Callable(Callable::Function(function)),
                );
                Ok(Flow::Normal)
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.evaluate(expr, out)?,
                    None => Value::Nil,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Class {
                name,
                superclass,
                methods,
            } => {
                self.execute_class(name, superclass.as_ref(), methods, out)?;
                Ok(Flow::Normal)
            }
        }
    }

    /// Runs `statements` with `env` as the current scope, restoring the
    /// previous scope however the block exits. The caller owns `env`.
    fn execute_block(
        &mut self,
        statements: &[Stmt],
        env: EnvId,
        out: &mut dyn Write,
    ) -> Result<Flow, EmberError> {
        let previous = self.current;
        self.current = env;

        let mut result = Ok(Flow::Normal);
        for stmt in statements {
            match self.execute(stmt, out) {
                Ok(Flow::Normal) => {}
                other => {
                    result = other;
                    break;
                }
            }
        }

        self.current = previous;
        result
    }

    fn execute_class(
        &mut self,
        name: &Token,
        superclass: Option<&Expr>,
        methods: &[Rc<FunctionDecl>],
        out: &mut dyn Write,
    ) -> Result<(), EmberError> {
        // Placeholder so the name exists while the class is being built.
        self.envs.define_uninitialized(self.current, &name.lexeme);

        let superclass = match superclass {
            Some(expr) => match self.evaluate(expr, out)? {
                Value::Callable(Callable::Class(class)) => Some(class),
                _ => {
                    let token = match expr {
                        Expr::Variable { name, .. } => name,
                        _ => name,
                    };
                    return Err(runtime_error(
                        RuntimeErrorKind::Type,
                        token,
                        "Superclass must be a class",
                    ));
                }
            },
            None => None,
        };

        let method_env = match &superclass {
            Some(class) => {
                let env = self.envs.push(self.current);
                self.envs.define_value(
                    env,
                    "super",
                    Value::Callable(Callable::Class(Rc::clone(class))),
                );
                env
            }
            None => self.current,
        };
        self.envs.capture(method_env);

        let methods = methods
            .iter()
            .map(|decl| {
                let is_initializer = decl.name.lexeme == INITIALIZER_NAME;
                let method = Function::new(Rc::clone(decl), method_env, is_initializer);
                (decl.name.lexeme.clone(), self.envs.track(method))
            })
            .collect();
        if method_env != self.current {
            // Kept alive by the methods from here on.
            self.envs.release(method_env);
        }

        let class = Class {
            name: name.lexeme.clone(),
            superclass,
            methods,
        };
        self.envs.define(
            self.current,
            &name.lexeme,
            Slot::Callable(Callable::Class(Rc::new(class))),
        );
        Ok(())
    }

    pub fn evaluate(&mut self, expr: &Expr, out: &mut dyn Write) -> Result<Value, EmberError> {
        ensure_sufficient_stack(|| self.evaluate_inner(expr, out))
    }

    fn evaluate_inner(&mut self, expr: &Expr, out: &mut dyn Write) -> Result<Value, EmberError> {
        match expr {
            Expr::Literal { value } => Ok(Value::from(value.clone())),
            Expr::Grouping { expression } => self.evaluate(expression, out),
            Expr::Unary { operator, right } => {
                let right = self.evaluate(right, out)?;
                match operator.token_type {
                    TokenType::Minus => match right {
                        Value::Number(n) => Ok(Value::Number(-n)),
                        _ => Err(runtime_error(
                            RuntimeErrorKind::Type,
                            operator,
                            "Operand must be a number",
                        )),
                    },
                    _ => Ok(Value::Bool(!right.is_truthy())),
                }
            }
            Expr::Binary {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left, out)?;
                let right = self.evaluate(right, out)?;
                binary(operator, left, right)
            }
            Expr::Logical {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left, out)?;
                let short_circuit = if operator.token_type == TokenType::Or {
                    left.is_truthy()
                } else {
                    !left.is_truthy()
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.evaluate(right, out)
                }
            }
            Expr::Ternary {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition, out)?.is_truthy() {
                    self.evaluate(then_branch, out)
                } else {
                    self.evaluate(else_branch, out)
                }
            }
            Expr::Variable { id, name } => self.look_up(*id, name),
            Expr::Assign { id, name, value } => {
                let value = self.evaluate(value, out)?;
                match self.resolutions.get(id) {
                    Some(&distance) => {
                        self.envs
                            .assign_at(self.current, distance, name, value.clone());
                    }
                    None => {
                        let globals = self.envs.globals();
                        self.envs.assign(globals, name, value.clone())?;
                    }
                }
                Ok(value)
            }
            Expr::Call {
                callee,
                paren,
                arguments,
            } => {
                let (callee, transient) = self.evaluate_callee(callee, out)?;
                let result = match self.evaluate_arguments(arguments, out) {
                    Ok(args) => self.call(callee, paren, args, out),
                    Err(e) => Err(e),
                };
                if let Some(env) = transient {
                    self.envs.release(env);
                }
                result
            }
            Expr::Get { object, name } => {
                let object = self.evaluate(object, out)?;
                self.get_property(object, name, true)
                    .map(|(value, _)| value)
            }
            Expr::Set {
                object,
                name,
                value,
            } => {
                let Value::Instance(instance) = self.evaluate(object, out)? else {
                    return Err(runtime_error(
                        RuntimeErrorKind::Type,
                        name,
                        "Only instances have fields",
                    ));
                };
                let value = self.evaluate(value, out)?;
                instance.set_field(&name.lexeme, value.clone());
                Ok(value)
            }
            Expr::SelfRef { id, keyword } => self.look_up(*id, keyword),
            Expr::Super {
                id,
                keyword,
                method,
            } => self
                .super_method(*id, keyword, method, true)
                .map(|(value, _)| value),
        }
    }

    fn look_up(&self, id: ExprId, name: &Token) -> Result<Value, EmberError> {
        match self.resolutions.get(&id) {
            Some(&distance) => self.envs.get_at(self.current, distance, name),
            None => self.envs.get(self.envs.globals(), name),
        }
    }

    /// Evaluates the callee of a call. A method called straight off an
    /// instance is bound into a scope that is not captured; it is returned
    /// so the caller can release it once the call is done.
    fn evaluate_callee(
        &mut self,
        callee: &Expr,
        out: &mut dyn Write,
    ) -> Result<(Value, Option<EnvId>), EmberError> {
        match callee {
            Expr::Get { object, name } => {
                let object = self.evaluate(object, out)?;
                self.get_property(object, name, false)
            }
            Expr::Super {
                id,
                keyword,
                method,
            } => self.super_method(*id, keyword, method, false),
            _ => Ok((self.evaluate(callee, out)?, None)),
        }
    }

    fn evaluate_arguments(
        &mut self,
        arguments: &[Expr],
        out: &mut dyn Write,
    ) -> Result<Vec<Value>, EmberError> {
        arguments
            .iter()
            .map(|arg| self.evaluate(arg, out))
            .collect()
    }

    /// Fields shadow methods. Methods come back bound to the instance.
    fn get_property(
        &mut self,
        object: Value,
        name: &Token,
        keep: bool,
    ) -> Result<(Value, Option<EnvId>), EmberError> {
        let Value::Instance(instance) = object else {
            return Err(runtime_error(
                RuntimeErrorKind::Type,
                name,
                "Only instances have properties",
            ));
        };

        if let Some(value) = instance.field(&name.lexeme) {
            return Ok((value, None));
        }

        match instance.class.find_method(&name.lexeme) {
            Some(method) => Ok(self.bound_value(&method, instance, keep)),
            None => Err(runtime_error(
                RuntimeErrorKind::UndefinedProperty,
                name,
                format!("Undefined property '{}'", name.lexeme),
            )),
        }
    }

    fn super_method(
        &mut self,
        id: ExprId,
        keyword: &Token,
        method: &Token,
        keep: bool,
    ) -> Result<(Value, Option<EnvId>), EmberError> {
        let Some(&distance) = self.resolutions.get(&id) else {
            return Err(runtime_error(
                RuntimeErrorKind::UndefinedVariable,
                keyword,
                "Unresolved 'super'",
            ));
        };

        let superclass = self.envs.get_at(self.current, distance, keyword)?;
        let self_token = Token::identifier("self", keyword.span.clone(), keyword.line);
        let instance = self
            .envs
            .get_at(self.current, distance.saturating_sub(1), &self_token)?;

        let (Value::Callable(Callable::Class(superclass)), Value::Instance(instance)) =
            (superclass, instance)
        else {
            return Err(runtime_error(
                RuntimeErrorKind::Type,
                keyword,
                "Invalid use of 'super'",
            ));
        };

        match superclass.find_method(&method.lexeme) {
            Some(found) => Ok(self.bound_value(&found, instance, keep)),
            None => Err(runtime_error(
                RuntimeErrorKind::UndefinedProperty,
                method,
                format!("Undefined property '{}'", method.lexeme),
            )),
        }
    }

    /// A kept method may be stored anywhere, so its scope is handed to the
    /// collector. Otherwise the scope is returned for the caller to release.
    fn bound_value(
        &mut self,
        method: &Function,
        instance: Rc<Instance>,
        keep: bool,
    ) -> (Value, Option<EnvId>) {
        let bound = method.bind(instance, &mut self.envs);
        let env = bound.closure;
        let value = Value::Callable(Callable::Function(bound));
        if keep {
            self.envs.capture(env);
            self.envs.release(env);
            (value, None)
        } else {
            (value, Some(env))
        }
    }

    fn call(
        &mut self,
        callee: Value,
        paren: &Token,
        args: Vec<Value>,
        out: &mut dyn Write,
    ) -> Result<Value, EmberError> {
        let Value::Callable(callable) = callee else {
            return Err(runtime_error(
                RuntimeErrorKind::NotCallable,
                paren,
                format!("Can only call functions and classes, not {}", callee.type_name()),
            ));
        };

        if args.len() != callable.arity() {
            return Err(runtime_error(
                RuntimeErrorKind::Arity,
                paren,
                format!(
                    "Expected {} arguments but got {}",
                    callable.arity(),
                    args.len()
                ),
            ));
        }

        if self.depth >= MAX_CALL_DEPTH {
            return Err(runtime_error(
                RuntimeErrorKind::StackOverflow,
                paren,
                "Stack overflow",
            ));
        }

        match callable {
            Callable::Native(native) => {
                trace!("call native {}", native.name);
                (native.func)(&args, out)
                    .map_err(|message| runtime_error(RuntimeErrorKind::Native, paren, message))
            }
            Callable::Function(function) => self.call_function(&function, args, out),
            Callable::Class(class) => {
                trace!("instantiate {}", class.name);
                let instance = Rc::new(Instance::new(Rc::clone(&class)));
                if let Some(init) = class.find_method(INITIALIZER_NAME) {
                    let bound = init.bind(Rc::clone(&instance), &mut self.envs);
                    let result = self.call_function(&bound, args, out);
                    self.envs.release(bound.closure);
                    result?;
                }
                Ok(Value::Instance(instance))
            }
        }
    }

    fn call_function(
        &mut self,
        function: &Function,
        args: Vec<Value>,
        out: &mut dyn Write,
    ) -> Result<Value, EmberError> {
        trace!("call {} at depth {}", function.name(), self.depth);
        let env = self.envs.push(function.closure);
        for (param, arg) in function.decl.params.iter().zip(args) {
            self.envs.define_value(env, &param.lexeme, arg);
        }

        self.depth += 1;
        let result = self.execute_block(&function.decl.body, env, out);
        self.depth -= 1;
        self.end_frame(env);

        let flow = result?;
        if function.is_initializer {
            let name = &function.decl.name;
            let self_token = Token::identifier("self", name.span.clone(), name.line);
            return self.envs.get_at(function.closure, 0, &self_token);
        }

        match flow {
            Flow::Return(value) => Ok(value),
            Flow::Normal | Flow::Break => Ok(Value::Nil),
        }
    }

    /// Releases a block or call scope and gives the collector a chance to
    /// run, so long loops that create closures stay bounded.
    fn end_frame(&mut self, env: EnvId) {
        self.envs.release(env);
        self.envs.maybe_collect();
    }
}

fn runtime_error(kind: RuntimeErrorKind, token: &Token, message: impl Into<String>) -> EmberError {
    EmberError::Runtime {
        kind,
        message: message.into(),
        span: token.span.clone(),
        line: token.line,
    }
}

fn binary(operator: &Token, left: Value, right: Value) -> Result<Value, EmberError> {
    use Value::{Bool, Number};

    let value = match (operator.token_type, left, right) {
        (TokenType::EqualEqual, l, r) => Bool(l == r),
        (TokenType::BangEqual, l, r) => Bool(l != r),
        (TokenType::Plus, Number(l), Number(r)) => Number(l + r),
        (TokenType::Plus, Value::String(l), r) => Value::String(format!("{}{}", l, r)),
        (TokenType::Plus, l, Value::String(r)) => Value::String(format!("{}{}", l, r)),
        (TokenType::Plus, l, r) => {
            return Err(runtime_error(
                RuntimeErrorKind::Type,
                operator,
                format!(
                    "Operands must be numbers or strings, got {} and {}",
                    l.type_name(),
                    r.type_name()
                ),
            ));
        }
        (TokenType::Minus, Number(l), Number(r)) => Number(l - r),
        (TokenType::Star, Number(l), Number(r)) => Number(l * r),
        (TokenType::Slash, Number(l), Number(r)) => Number(l / r),
        (TokenType::Greater, Number(l), Number(r)) => Bool(l > r),
        (TokenType::GreaterEqual, Number(l), Number(r)) => Bool(l >= r),
        (TokenType::Less, Number(l), Number(r)) => Bool(l < r),
        (TokenType::LessEqual, Number(l), Number(r)) => Bool(l <= r),
        (_, l, r) => {
            return Err(runtime_error(
                RuntimeErrorKind::Type,
                operator,
                format!(
                    "Operands must be numbers, got {} and {}",
                    l.type_name(),
                    r.type_name()
                ),
            ));
        }
    };
    Ok(value)
}
