use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use log::{debug, trace};

use crate::ast::FunctionDecl;
use crate::error::{EmberError, RuntimeErrorKind};
use crate::token::Token;
use crate::value::{Callable, Class, Function, Instance, Value};

/// Arena size (scopes plus tracked functions) that triggers the first
/// collection. Later thresholds double whatever survived.
const FIRST_COLLECTION: usize = 1024;

/// Handle to one scope in the `Environments` arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvId(usize);

/// A stored binding. Variables track whether they were initialized;
/// callables bound by `fn`/`class` are always initialized.
#[derive(Debug, Clone)]
pub enum Slot {
    Variable(Option<Value>),
    Callable(Callable),
}

impl Slot {
    fn value(&self) -> Option<Value> {
        match self {
            Slot::Variable(value) => value.clone(),
            Slot::Callable(callable) => Some(Value::Callable(callable.clone())),
        }
    }
}

#[derive(Debug, Default)]
struct Scope {
    slots: HashMap<String, Slot>,
    parent: Option<EnvId>,
    /// A block or call is still running in this scope.
    active: bool,
    /// A closure may refer to this scope or one of its descendants.
    captured: bool,
    live: bool,
}

/// Arena of scopes. Parent links are handles, so a closure keeps its
/// defining scope alive just by holding an `EnvId` to it.
///
/// A scope nobody captured is reclaimed by `release` as soon as the block
/// or call that created it exits. Captured scopes outlive their frame and
/// are reclaimed by `collect` once no reachable function refers to them.
#[derive(Debug)]
pub struct Environments {
    scopes: Vec<Scope>,
    free: Vec<EnvId>,
    /// Every function created through `track`. Functions held only by the
    /// host (a callee being evaluated, an argument list) are found here.
    functions: Vec<Weak<Function>>,
    next_collection: usize,
}

impl Default for Environments {
    fn default() -> Self {
        Self::new()
    }
}

impl Environments {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope {
                active: true,
                captured: true,
                live: true,
                ..Scope::default()
            }],
            free: Vec::new(),
            functions: Vec::new(),
            next_collection: FIRST_COLLECTION,
        }
    }

    /// The root scope. It has no parent and is never released.
    pub fn globals(&self) -> EnvId {
        EnvId(0)
    }

    /// Creates an active child scope of `parent`. The creator ends it
    /// with `release`.
    pub fn push(&mut self, parent: EnvId) -> EnvId {
        if let Some(id) = self.free.pop() {
            self.scopes[id.0] = Scope {
                parent: Some(parent),
                active: true,
                live: true,
                ..Scope::default()
            };
            return id;
        }
        self.scopes.push(Scope {
            parent: Some(parent),
            active: true,
            live: true,
            ..Scope::default()
        });
        EnvId(self.scopes.len() - 1)
    }

    /// Marks `env` and all of its ancestors as captured, so `release`
    /// leaves them to the collector.
    pub fn capture(&mut self, env: EnvId) {
        let mut current = Some(env);
        while let Some(id) = current {
            let scope = &mut self.scopes[id.0];
            if scope.captured {
                break;
            }
            trace!("capture env {}", id.0);
            scope.captured = true;
            current = scope.parent;
        }
    }

    pub fn is_captured(&self, env: EnvId) -> bool {
        self.scopes[env.0].captured
    }

    /// Ends the frame running in `env`. Uncaptured scopes go straight back
    /// to the arena.
    pub fn release(&mut self, env: EnvId) {
        if env == self.globals() {
            return;
        }
        self.scopes[env.0].active = false;
        if !self.scopes[env.0].captured {
            self.reclaim(env);
        }
    }

    fn reclaim(&mut self, env: EnvId) {
        trace!("reclaim env {}", env.0);
        let scope = &mut self.scopes[env.0];
        scope.slots.clear();
        scope.parent = None;
        scope.active = false;
        scope.captured = false;
        scope.live = false;
        self.free.push(env);
    }

    /// Number of scopes currently in use, captured ones included.
    pub fn live_count(&self) -> usize {
        self.scopes.len() - self.free.len()
    }

    /// Wraps `function` and records it so the collector can see it.
    pub fn track(&mut self, function: Function) -> Rc<Function> {
        let function = Rc::new(function);
        self.functions.push(Rc::downgrade(&function));
        function
    }

    /// Declarations of every function that can still be called.
    pub fn live_declarations(&self) -> Vec<Rc<FunctionDecl>> {
        let mut seen = HashSet::new();
        self.functions
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|function| seen.insert(Rc::as_ptr(&function.decl)))
            .map(|function| Rc::clone(&function.decl))
            .collect()
    }

    /// Collects once the arena has grown past the current threshold.
    pub fn maybe_collect(&mut self) {
        if self.live_count() + self.functions.len() >= self.next_collection {
            self.collect();
        }
    }

    /// Reclaims every captured scope that no running frame and no
    /// reachable function can get to. Returns how many were reclaimed.
    ///
    /// Roots are the active scopes plus any function, class or instance
    /// with more strong references than the arena itself accounts for.
    pub fn collect(&mut self) -> usize {
        let before = self.live_count();

        let mut census = Census::default();
        for scope in self.scopes.iter().filter(|scope| scope.live) {
            for slot in scope.slots.values() {
                census.note_slot(slot);
            }
        }
        census.expand();

        let mut marked = vec![false; self.scopes.len()];
        let mut scopes: Vec<EnvId> = self
            .scopes
            .iter()
            .enumerate()
            .filter(|(_, scope)| scope.live && scope.active)
            .map(|(index, _)| EnvId(index))
            .collect();
        let mut values = census.external();
        for function in self.functions.iter().filter_map(Weak::upgrade) {
            if !census.contains(Rc::as_ptr(&function).cast()) {
                scopes.push(function.closure);
            }
        }

        let mut visited = HashSet::new();
        loop {
            if let Some(id) = scopes.pop() {
                let scope = &self.scopes[id.0];
                if !scope.live || marked[id.0] {
                    continue;
                }
                marked[id.0] = true;
                scopes.extend(scope.parent);
                values.extend(scope.slots.values().filter_map(Slot::value));
            } else if let Some(value) = values.pop() {
                match value {
                    Value::Callable(Callable::Function(function)) => {
                        if visited.insert(Rc::as_ptr(&function).cast::<()>()) {
                            scopes.push(function.closure);
                        }
                    }
                    Value::Callable(Callable::Class(class)) => {
                        if visited.insert(Rc::as_ptr(&class).cast::<()>()) {
                            values.extend(class_edges(&class));
                        }
                    }
                    Value::Instance(instance) => {
                        if visited.insert(Rc::as_ptr(&instance).cast::<()>()) {
                            values.extend(instance_edges(&instance));
                        }
                    }
                    _ => {}
                }
            } else {
                break;
            }
        }
        drop(census);

        for index in 0..self.scopes.len() {
            if self.scopes[index].live && !marked[index] {
                self.reclaim(EnvId(index));
            }
        }
        self.functions.retain(|function| function.strong_count() > 0);

        let after = self.live_count();
        self.next_collection = (2 * (after + self.functions.len())).max(FIRST_COLLECTION);
        debug!("collected {} environments, {} live", before - after, after);
        before - after
    }

    pub fn define(&mut self, env: EnvId, name: &str, slot: Slot) {
        self.scopes[env.0].slots.insert(name.to_string(), slot);
    }

    pub fn define_value(&mut self, env: EnvId, name: &str, value: Value) {
        self.define(env, name, Slot::Variable(Some(value)));
    }

    pub fn define_uninitialized(&mut self, env: EnvId, name: &str) {
        self.define(env, name, Slot::Variable(None));
    }

    /// Looks `name` up through the parent chain.
    pub fn get(&self, env: EnvId, name: &Token) -> Result<Value, EmberError> {
        let mut current = Some(env);
        while let Some(id) = current {
            let scope = &self.scopes[id.0];
            if let Some(slot) = scope.slots.get(&name.lexeme) {
                return read_slot(slot, name);
            }
            current = scope.parent;
        }
        Err(undefined(name))
    }

    /// Reads `name` from the scope exactly `distance` hops up.
    pub fn get_at(&self, env: EnvId, distance: usize, name: &Token) -> Result<Value, EmberError> {
        let scope = &self.scopes[self.ancestor(env, distance).0];
        match scope.slots.get(&name.lexeme) {
            Some(slot) => read_slot(slot, name),
            None => Err(undefined(name)),
        }
    }

    pub fn assign(&mut self, env: EnvId, name: &Token, value: Value) -> Result<(), EmberError> {
        let mut current = Some(env);
        while let Some(id) = current {
            let scope = &mut self.scopes[id.0];
            if let Some(slot) = scope.slots.get_mut(&name.lexeme) {
                *slot = Slot::Variable(Some(value));
                return Ok(());
            }
            current = scope.parent;
        }
        Err(undefined(name))
    }

    pub fn assign_at(&mut self, env: EnvId, distance: usize, name: &Token, value: Value) {
        let target = self.ancestor(env, distance);
        self.scopes[target.0]
            .slots
            .insert(name.lexeme.clone(), Slot::Variable(Some(value)));
    }

    fn ancestor(&self, env: EnvId, distance: usize) -> EnvId {
        let mut current = env;
        for _ in 0..distance {
            match self.scopes[current.0].parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
        current
    }

    /// Names visible from `env`, innermost first, without duplicates.
    pub fn variable_names(&self, env: EnvId) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let mut current = Some(env);
        while let Some(id) = current {
            let scope = &self.scopes[id.0];
            for name in scope.slots.keys() {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
            current = scope.parent;
        }
        names
    }
}

/// Strong references to each heap object that the arena itself holds.
/// Strong counts are read from borrowed references before anything is
/// cloned, so the census never counts its own copies.
#[derive(Default)]
struct Census {
    nodes: HashMap<*const (), Node>,
    pending: Vec<Value>,
}

struct Node {
    strong: usize,
    internal: usize,
    value: Value,
}

impl Census {
    fn note_slot(&mut self, slot: &Slot) {
        match slot {
            Slot::Variable(Some(value)) => self.note_value(value),
            Slot::Variable(None) => {}
            Slot::Callable(callable) => self.note_callable(callable),
        }
    }

    fn note_value(&mut self, value: &Value) {
        match value {
            Value::Callable(callable) => self.note_callable(callable),
            Value::Instance(instance) => self.note(
                Rc::as_ptr(instance).cast(),
                Rc::strong_count(instance),
                || Value::Instance(Rc::clone(instance)),
            ),
            _ => {}
        }
    }

    fn note_callable(&mut self, callable: &Callable) {
        match callable {
            Callable::Function(function) => self.note_function(function),
            Callable::Class(class) => self.note_class(class),
            Callable::Native(_) => {}
        }
    }

    fn note_function(&mut self, function: &Rc<Function>) {
        self.note(Rc::as_ptr(function).cast(), Rc::strong_count(function), || {
            Value::Callable(Callable::Function(Rc::clone(function)))
        });
    }

    fn note_class(&mut self, class: &Rc<Class>) {
        self.note(Rc::as_ptr(class).cast(), Rc::strong_count(class), || {
            Value::Callable(Callable::Class(Rc::clone(class)))
        });
    }

    fn note(&mut self, key: *const (), strong: usize, value: impl FnOnce() -> Value) {
        match self.nodes.entry(key) {
            Entry::Occupied(mut entry) => entry.get_mut().internal += 1,
            Entry::Vacant(entry) => {
                let value = value();
                self.pending.push(value.clone());
                entry.insert(Node {
                    strong,
                    internal: 1,
                    value,
                });
            }
        }
    }

    /// Follows references out of every object seen so far.
    fn expand(&mut self) {
        while let Some(value) = self.pending.pop() {
            match &value {
                Value::Callable(Callable::Class(class)) => {
                    for method in class.methods.values() {
                        self.note_function(method);
                    }
                    if let Some(superclass) = &class.superclass {
                        self.note_class(superclass);
                    }
                }
                Value::Instance(instance) => {
                    self.note_class(&instance.class);
                    for field in instance.fields.borrow().values() {
                        self.note_value(field);
                    }
                }
                _ => {}
            }
        }
    }

    fn contains(&self, key: *const ()) -> bool {
        self.nodes.contains_key(&key)
    }

    /// Objects also referenced from outside the arena.
    fn external(&self) -> Vec<Value> {
        self.nodes
            .values()
            .filter(|node| node.strong > node.internal)
            .map(|node| node.value.clone())
            .collect()
    }
}

fn class_edges(class: &Rc<Class>) -> Vec<Value> {
    let mut edges: Vec<Value> = class
        .methods
        .values()
        .map(|method| Value::Callable(Callable::Function(Rc::clone(method))))
        .collect();
    edges.extend(
        class
            .superclass
            .as_ref()
            .map(|superclass| Value::Callable(Callable::Class(Rc::clone(superclass)))),
    );
    edges
}

fn instance_edges(instance: &Rc<Instance>) -> Vec<Value> {
    let mut edges: Vec<Value> = instance.fields.borrow().values().cloned().collect();
    edges.push(Value::Callable(Callable::Class(Rc::clone(&instance.class))));
    edges
}

fn read_slot(slot: &Slot, name: &Token) -> Result<Value, EmberError> {
    match slot {
        Slot::Variable(Some(value)) => Ok(value.clone()),
        Slot::Variable(None) => Err(EmberError::Runtime {
            kind: RuntimeErrorKind::UninitializedVariable,
            message: format!("Uninitialized variable '{}'", name.lexeme),
            span: name.span.clone(),
            line: name.line,
        }),
        Slot::Callable(callable) => Ok(Value::Callable(callable.clone())),
    }
}

fn undefined(name: &Token) -> EmberError {
    EmberError::Runtime {
        kind: RuntimeErrorKind::UndefinedVariable,
        message: format!("Undefined variable '{}'", name.lexeme),
        span: name.span.clone(),
        line: name.line,
    }
}
