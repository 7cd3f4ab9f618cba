use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use log::{debug, trace};

use crate::ast::{Expr, ExprId, FunctionDecl, Stmt};
use crate::error::EmberError;
use crate::token::Token;
use crate::value::INITIALIZER_NAME;

/// Maps each name-bearing expression to how many scopes up its binding lives.
/// Names without an entry are globals, looked up by name at run time.
pub type Resolutions = HashMap<ExprId, usize>;

/// Tracks function context for validation (return statements)
#[derive(Clone, Copy, PartialEq)]
enum FunctionType {
    None,
    Function,
    Method,
    Initializer,
}

/// Tracks class context for validation (self and super usage)
#[derive(Clone, Copy, PartialEq)]
enum ClassType {
    None,
    Class,
    Subclass,
}

pub struct Resolver {
    /// Stack of scopes. `false` means declared but not yet defined.
    scopes: Vec<HashMap<String, bool>>,
    resolutions: Resolutions,
    current_function: FunctionType,
    current_class: ClassType,
    loop_depth: usize,
    /// Top-level names seen so far, plus any seeded by the session.
    globals: HashSet<String>,
    errors: Vec<EmberError>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves a whole program with no previously known globals.
pub fn resolve(statements: &[Stmt]) -> Result<Resolutions, Vec<EmberError>> {
    Resolver::new().resolve(statements)
}

impl Resolver {
    pub fn new() -> Self {
        Self {
            scopes: Vec::new(),
            resolutions: HashMap::new(),
            current_function: FunctionType::None,
            current_class: ClassType::None,
            loop_depth: 0,
            globals: HashSet::new(),
            errors: Vec::new(),
        }
    }

    /// Seeds the set of names known to exist in the global scope, such as
    /// natives and bindings from earlier REPL submissions.
    pub fn with_globals<I>(globals: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            globals: globals.into_iter().collect(),
            ..Self::new()
        }
    }

    /// Main entry point - resolve all statements
    pub fn resolve(mut self, statements: &[Stmt]) -> Result<Resolutions, Vec<EmberError>> {
        for stmt in statements {
            self.resolve_stmt(stmt);
        }
        debug!(
            "resolved {} local references with {} errors",
            self.resolutions.len(),
            self.errors.len()
        );
        if self.errors.is_empty() {
            Ok(self.resolutions)
        } else {
            Err(self.errors)
        }
    }

    fn error(&mut self, token: &Token, message: String) {
        self.errors.push(EmberError::Resolution {
            message,
            span: token.span.clone(),
            line: token.line,
        });
    }

    fn begin_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn end_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &Token) {
        let Some(scope) = self.scopes.last_mut() else {
            self.globals.insert(name.lexeme.clone());
            return;
        };
        if scope.contains_key(&name.lexeme) {
            let message = format!(
                "Variable '{}' is already declared in this scope",
                name.lexeme
            );
            self.error(name, message);
            return;
        }
        scope.insert(name.lexeme.clone(), false);
    }

    fn define(&mut self, name: &Token) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.lexeme.clone(), true);
        }
    }

    /// Binds a name that is defined on entry, like `self` or `super`.
    fn define_implicit(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), true);
        }
    }

    /// Records the distance to the innermost scope holding `name`.
    ///
    /// A read that lands on a binding still inside its own initializer looks
    /// past it: an outer local or a known global of the same name is what the
    /// initializer sees. Only when neither exists is the read an error.
    fn resolve_local(&mut self, id: ExprId, name: &Token, reading: bool) {
        let mut in_own_initializer = false;

        for (distance, scope) in self.scopes.iter().rev().enumerate() {
            match scope.get(&name.lexeme) {
                Some(false) if reading => in_own_initializer = true,
                Some(_) => {
                    trace!("resolved '{}' at distance {}", name.lexeme, distance);
                    self.resolutions.insert(id, distance);
                    return;
                }
                None => {}
            }
        }

        if in_own_initializer && !self.globals.contains(&name.lexeme) {
            let message = format!(
                "Can't read local variable '{}' in its own initializer",
                name.lexeme
            );
            self.error(name, message);
        }
    }

    fn resolve_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Block { statements } => {
                self.begin_scope();
                for s in statements {
                    self.resolve_stmt(s);
                }
                self.end_scope();
            }
            Stmt::Let { name, initializer } => {
                self.declare(name);
                if let Some(init) = initializer {
                    self.resolve_expr(init);
                }
                self.define(name);
            }
            Stmt::Function(decl) => {
                self.declare(&decl.name);
                self.define(&decl.name);
                self.resolve_function(decl, FunctionType::Function);
            }
            Stmt::Return { keyword, value } => {
                if self.current_function == FunctionType::None {
                    self.error(keyword, "Can't return from top-level code".to_string());
                }
                if let Some(v) = value {
                    if self.current_function == FunctionType::Initializer {
                        self.error(
                            keyword,
                            "Can't return a value from an initializer".to_string(),
                        );
                    }
                    self.resolve_expr(v);
                }
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.resolve_expr(condition);
                self.resolve_stmt(then_branch);
                if let Some(eb) = else_branch {
                    self.resolve_stmt(eb);
                }
            }
            Stmt::While { condition, body } => {
                self.resolve_expr(condition);
                self.loop_depth += 1;
                self.resolve_stmt(body);
                self.loop_depth -= 1;
            }
            Stmt::Break { keyword } => {
                if self.loop_depth == 0 {
                    self.error(keyword, "Can't use 'break' outside of a loop".to_string());
                }
            }
            Stmt::Expression { expression } => {
                self.resolve_expr(expression);
            }
            Stmt::Class {
                name,
                superclass,
                methods,
            } => self.resolve_class(name, superclass.as_ref(), methods),
        }
    }

    fn resolve_class(
        &mut self,
        name: &Token,
        superclass: Option<&Expr>,
        methods: &[Rc<FunctionDecl>],
    ) {
        self.declare(name);
        self.define(name);

        let enclosing_class = self.current_class;
        self.current_class = ClassType::Class;

        if let Some(superclass_expr) = superclass {
            if let Expr::Variable {
                name: superclass_name,
                ..
            } = superclass_expr
                && superclass_name.lexeme == name.lexeme
            {
                self.error(
                    superclass_name,
                    "A class can't inherit from itself".to_string(),
                );
            }
            self.resolve_expr(superclass_expr);

            self.current_class = ClassType::Subclass;
            self.begin_scope();
            self.define_implicit("super");
        }

        self.begin_scope();
        self.define_implicit("self");

        for method in methods {
            let fn_type = if method.name.lexeme == INITIALIZER_NAME {
                FunctionType::Initializer
            } else {
                FunctionType::Method
            };
            self.resolve_function(method, fn_type);
        }

        self.end_scope();
        if superclass.is_some() {
            self.end_scope();
        }

        self.current_class = enclosing_class;
    }

    fn resolve_function(&mut self, decl: &FunctionDecl, fn_type: FunctionType) {
        let enclosing_function = self.current_function;
        let enclosing_loop_depth = self.loop_depth;
        self.current_function = fn_type;
        self.loop_depth = 0;

        self.begin_scope();
        for param in &decl.params {
            self.declare(param);
            self.define(param);
        }
        for stmt in &decl.body {
            self.resolve_stmt(stmt);
        }
        self.end_scope();

        self.current_function = enclosing_function;
        self.loop_depth = enclosing_loop_depth;
    }

    fn resolve_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Variable { id, name } => {
                self.resolve_local(*id, name, true);
            }
            Expr::Assign { id, name, value } => {
                self.resolve_expr(value);
                self.resolve_local(*id, name, false);
            }
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.resolve_expr(left);
                self.resolve_expr(right);
            }
            Expr::Unary { right, .. } => {
                self.resolve_expr(right);
            }
            Expr::Grouping { expression } => {
                self.resolve_expr(expression);
            }
            Expr::Ternary {
                condition,
                then_branch,
                else_branch,
            } => {
                self.resolve_expr(condition);
                self.resolve_expr(then_branch);
                self.resolve_expr(else_branch);
            }
            Expr::Call {
                callee, arguments, ..
            } => {
                self.resolve_expr(callee);
                for arg in arguments {
                    self.resolve_expr(arg);
                }
            }
            Expr::Literal { .. } => {}
            Expr::Get { object, .. } => {
                self.resolve_expr(object);
            }
            Expr::Set { object, value, .. } => {
                self.resolve_expr(value);
                self.resolve_expr(object);
            }
            Expr::SelfRef { id, keyword } => {
                if self.current_class == ClassType::None {
                    self.error(keyword, "Can't use 'self' outside of a class".to_string());
                    return;
                }
                self.resolve_local(*id, keyword, true);
            }
            Expr::Super { id, keyword, .. } => {
                match self.current_class {
                    ClassType::None => {
                        self.error(keyword, "Can't use 'super' outside of a class".to_string());
                        return;
                    }
                    ClassType::Class => {
                        self.error(
                            keyword,
                            "Can't use 'super' in a class with no superclass".to_string(),
                        );
                        return;
                    }
                    ClassType::Subclass => {}
                }
                self.resolve_local(*id, keyword, true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::scanner::Scanner;
    use crate::token::Literal;

    fn parse(source: &str) -> Vec<Stmt> {
        let tokens: Vec<Token> = Scanner::new(source).map(|t| t.unwrap()).collect();
        let mut parser = Parser::new(tokens);
        let statements = parser.parse();
        assert!(parser.take_errors().is_empty());
        statements
    }

    /// Every name reference in source order with its resolved distance.
    fn distances(source: &str) -> Vec<(String, Option<usize>)> {
        let statements = parse(source);
        let resolutions = resolve(&statements).unwrap();
        let mut out = Vec::new();
        for stmt in &statements {
            collect_stmt(stmt, &resolutions, &mut out);
        }
        out
    }

    fn collect_stmt(stmt: &Stmt, res: &Resolutions, out: &mut Vec<(String, Option<usize>)>) {
        match stmt {
            Stmt::Expression { expression } => collect_expr(expression, res, out),
            Stmt::Let { initializer, .. } => {
                if let Some(init) = initializer {
                    collect_expr(init, res, out);
                }
            }
            Stmt::Block { statements } => {
                for s in statements {
                    collect_stmt(s, res, out);
                }
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                collect_expr(condition, res, out);
                collect_stmt(then_branch, res, out);
                if let Some(eb) = else_branch {
                    collect_stmt(eb, res, out);
                }
            }
            Stmt::While { condition, body } => {
                collect_expr(condition, res, out);
                collect_stmt(body, res, out);
            }
            Stmt::Function(decl) => {
                for s in &decl.body {
                    collect_stmt(s, res, out);
                }
            }
            Stmt::Return { value, .. } => {
                if let Some(v) = value {
                    collect_expr(v, res, out);
                }
            }
            Stmt::Class {
                superclass,
                methods,
                ..
            } => {
                if let Some(sc) = superclass {
                    collect_expr(sc, res, out);
                }
                for method in methods {
                    for s in &method.body {
                        collect_stmt(s, res, out);
                    }
                }
            }
            Stmt::Break { .. } => {}
        }
    }

    fn collect_expr(expr: &Expr, res: &Resolutions, out: &mut Vec<(String, Option<usize>)>) {
        match expr {
            Expr::Variable { id, name } => out.push((name.lexeme.clone(), res.get(id).copied())),
            Expr::Assign { id, name, value } => {
                collect_expr(value, res, out);
                out.push((format!("{}=", name.lexeme), res.get(id).copied()));
            }
            Expr::SelfRef { id, .. } => out.push(("self".to_string(), res.get(id).copied())),
            Expr::Super { id, .. } => out.push(("super".to_string(), res.get(id).copied())),
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                collect_expr(left, res, out);
                collect_expr(right, res, out);
            }
            Expr::Ternary {
                condition,
                then_branch,
                else_branch,
            } => {
                collect_expr(condition, res, out);
                collect_expr(then_branch, res, out);
                collect_expr(else_branch, res, out);
            }
            Expr::Unary { right, .. } => collect_expr(right, res, out),
            Expr::Grouping { expression } => collect_expr(expression, res, out),
            Expr::Call {
                callee, arguments, ..
            } => {
                collect_expr(callee, res, out);
                for arg in arguments {
                    collect_expr(arg, res, out);
                }
            }
            Expr::Get { object, .. } => collect_expr(object, res, out),
            Expr::Set { object, value, .. } => {
                collect_expr(value, res, out);
                collect_expr(object, res, out);
            }
            Expr::Literal { .. } => {}
        }
    }

    fn errors(source: &str) -> Vec<String> {
        match resolve(&parse(source)) {
            Ok(_) => Vec::new(),
            Err(errors) => errors.iter().map(|e| e.message()).collect(),
        }
    }

    fn entry(name: &str, distance: Option<usize>) -> (String, Option<usize>) {
        (name.to_string(), distance)
    }

    #[test]
    fn resolver_handles_empty_program() {
        assert!(resolve(&[]).unwrap().is_empty());
    }

    #[test]
    fn resolver_resolves_hand_built_block() {
        // { let a = 1; a; }
        let a = Token::identifier("a", 6..7, 1);
        let reference = Expr::variable(a.clone());
        let Expr::Variable { id, .. } = reference else {
            unreachable!()
        };
        let stmts = vec![Stmt::Block {
            statements: vec![
                Stmt::Let {
                    name: a,
                    initializer: Some(Expr::Literal {
                        value: Literal::Number(1.0),
                    }),
                },
                Stmt::Expression {
                    expression: reference,
                },
            ],
        }];

        let resolutions = resolve(&stmts).unwrap();
        assert_eq!(resolutions.get(&id), Some(&0));
        assert_eq!(resolutions.len(), 1);
    }

    #[test]
    fn globals_are_left_unresolved() {
        assert_eq!(distances("let a = 1; a; a = 2;"), vec![
            entry("a", None),
            entry("a=", None)
        ]);
    }

    #[test]
    fn resolves_enclosing_block_distances() {
        assert_eq!(
            distances("{ let a = 1; { let b = a; { b = a; } } }"),
            vec![entry("a", Some(1)), entry("a", Some(2)), entry("b=", Some(1))]
        );
    }

    #[test]
    fn resolves_parameters_and_closures() {
        let source = "fn outer(n) { let i = 0; fn inner() { i = i + n; return i; } return inner; }";
        assert_eq!(distances(source), vec![
            entry("i", Some(1)),
            entry("n", Some(1)),
            entry("i=", Some(1)),
            entry("i", Some(1)),
            entry("inner", Some(0)),
        ]);
    }

    #[test]
    fn initializer_sees_outer_binding_of_same_name() {
        assert_eq!(distances("{ let x = 1; { let x = x + 1; } }"), vec![entry(
            "x",
            Some(1)
        )]);
    }

    #[test]
    fn initializer_falls_back_to_known_global() {
        assert_eq!(distances("let x = 1; { let x = x + 1; }"), vec![entry(
            "x", None
        )]);
    }

    #[test]
    fn initializer_falls_back_to_seeded_global() {
        let statements = parse("{ let x = x; }");
        let resolver = Resolver::with_globals(vec!["x".to_string()]);
        assert!(resolver.resolve(&statements).is_ok());
    }

    #[test]
    fn errors_on_self_reference_in_initializer() {
        assert_eq!(errors("{ let x = x; }"), vec![
            "Can't read local variable 'x' in its own initializer"
        ]);
    }

    #[test]
    fn errors_on_duplicate_in_same_scope() {
        assert_eq!(errors("{ let a = 1; let a = 2; }"), vec![
            "Variable 'a' is already declared in this scope"
        ]);
        assert_eq!(errors("fn f(a, a) {}"), vec![
            "Variable 'a' is already declared in this scope"
        ]);
    }

    #[test]
    fn allows_shadowing_and_global_redeclaration() {
        assert!(errors("let a = 1; let a = 2; { let a = 3; { let a = 4; } }").is_empty());
    }

    #[test]
    fn errors_on_break_outside_loop() {
        assert_eq!(errors("break;"), vec!["Can't use 'break' outside of a loop"]);
        assert!(errors("while (true) { if (true) break; }").is_empty());
        assert!(errors("for (;;) break;").is_empty());
    }

    #[test]
    fn loop_does_not_extend_into_function_body() {
        assert_eq!(errors("while (true) { fn f() { break; } }"), vec![
            "Can't use 'break' outside of a loop"
        ]);
    }

    #[test]
    fn errors_on_return_outside_function() {
        assert_eq!(errors("return 1;"), vec!["Can't return from top-level code"]);
        assert!(errors("fn f() { return 1; }").is_empty());
    }

    #[test]
    fn errors_on_return_value_in_initializer() {
        assert_eq!(errors("class A { init() { return 1; } }"), vec![
            "Can't return a value from an initializer"
        ]);
        assert!(errors("class A { init() { return; } }").is_empty());
    }

    #[test]
    fn errors_on_self_outside_class() {
        assert_eq!(errors("self;"), vec!["Can't use 'self' outside of a class"]);
        assert_eq!(errors("fn f() { return self; }"), vec![
            "Can't use 'self' outside of a class"
        ]);
    }

    #[test]
    fn errors_on_super_misuse() {
        assert_eq!(errors("super.m();"), vec!["Can't use 'super' outside of a class"]);
        assert_eq!(errors("class A { m() { super.m(); } }"), vec![
            "Can't use 'super' in a class with no superclass"
        ]);
    }

    #[test]
    fn errors_on_class_inheriting_from_itself() {
        assert_eq!(errors("class A < A {}"), vec!["A class can't inherit from itself"]);
    }

    #[test]
    fn resolves_self_and_super_distances() {
        let source = "class A {} class B < A { m() { fn inner() { return self; } return super.m; } }";
        assert_eq!(distances(source), vec![
            entry("A", None),
            entry("self", Some(2)),
            entry("super", Some(2)),
        ]);
    }

    #[test]
    fn collects_multiple_errors_in_one_pass() {
        let found = errors("break; return; { let a = a; }");
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn resolution_error_carries_line() {
        let statements = parse("\n\nbreak;");
        let errs = resolve(&statements).unwrap_err();
        assert_eq!(errs[0].line(), Some(3));
        assert!(matches!(errs[0], EmberError::Resolution { .. }));
    }

    #[test]
    fn resolving_twice_is_deterministic() {
        let statements = parse(
            "fn f(a) { let b = a; { let c = b; while (c) { c = a; } } return b; } \
             class K { m() { return self; } }",
        );
        let first = resolve(&statements).unwrap();
        let second = resolve(&statements).unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }
}
