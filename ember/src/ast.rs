use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::token::{Literal, Token};

static NEXT_EXPR_ID: AtomicU64 = AtomicU64::new(0);

/// Identity of a name-bearing expression node. The resolver keys its output
/// on this, so two textually equal references stay distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(u64);

impl ExprId {
    /// Mints an id that is unique for the lifetime of the process, so ids
    /// from different REPL submissions never collide.
    pub fn fresh() -> Self {
        ExprId(NEXT_EXPR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Binary {
        left: Box<Expr>,
        operator: Token,
        right: Box<Expr>,
    },
    Logical {
        left: Box<Expr>,
        operator: Token,
        right: Box<Expr>,
    },
    Ternary {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
    Unary {
        operator: Token,
        right: Box<Expr>,
    },
    Literal {
        value: Literal,
    },
    Grouping {
        expression: Box<Expr>,
    },
    Variable {
        id: ExprId,
        name: Token,
    },
    Assign {
        id: ExprId,
        name: Token,
        value: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        paren: Token,
        arguments: Vec<Expr>,
    },
    Get {
        object: Box<Expr>,
        name: Token,
    },
    Set {
        object: Box<Expr>,
        name: Token,
        value: Box<Expr>,
    },
    SelfRef {
        id: ExprId,
        keyword: Token,
    },
    Super {
        id: ExprId,
        keyword: Token,
        method: Token,
    },
}

impl Expr {
    pub fn variable(name: Token) -> Self {
        Expr::Variable {
            id: ExprId::fresh(),
            name,
        }
    }

    pub fn assign(name: Token, value: Expr) -> Self {
        Expr::Assign {
            id: ExprId::fresh(),
            name,
            value: Box::new(value),
        }
    }

    pub fn self_ref(keyword: Token) -> Self {
        Expr::SelfRef {
            id: ExprId::fresh(),
            keyword,
        }
    }

    pub fn super_ref(keyword: Token, method: Token) -> Self {
        Expr::Super {
            id: ExprId::fresh(),
            keyword,
            method,
        }
    }

    /// Adds the ids of every name-bearing node in this expression to `ids`.
    pub fn collect_ids(&self, ids: &mut HashSet<ExprId>) {
        match self {
            Expr::Variable { id, .. } | Expr::SelfRef { id, .. } | Expr::Super { id, .. } => {
                ids.insert(*id);
            }
            Expr::Assign { id, value, .. } => {
                ids.insert(*id);
                value.collect_ids(ids);
            }
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                left.collect_ids(ids);
                right.collect_ids(ids);
            }
            Expr::Ternary {
                condition,
                then_branch,
                else_branch,
            } => {
                condition.collect_ids(ids);
                then_branch.collect_ids(ids);
                else_branch.collect_ids(ids);
            }
            Expr::Unary { right, .. } => right.collect_ids(ids),
            Expr::Grouping { expression } => expression.collect_ids(ids),
            Expr::Call {
                callee, arguments, ..
            } => {
                callee.collect_ids(ids);
                for argument in arguments {
                    argument.collect_ids(ids);
                }
            }
            Expr::Get { object, .. } => object.collect_ids(ids),
            Expr::Set { object, value, .. } => {
                object.collect_ids(ids);
                value.collect_ids(ids);
            }
            Expr::Literal { .. } => {}
        }
    }
}

/// A named function or method declaration. Shared through `Rc` so runtime
/// function values point at the declaration instead of copying the body.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: Token,
    pub params: Vec<Token>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expression {
        expression: Expr,
    },
    Let {
        name: Token,
        initializer: Option<Expr>,
    },
    Block {
        statements: Vec<Stmt>,
    },
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        condition: Expr,
        body: Box<Stmt>,
    },
    Break {
        keyword: Token,
    },
    Function(Rc<FunctionDecl>),
    Return {
        keyword: Token,
        value: Option<Expr>,
    },
    Class {
        name: Token,
        superclass: Option<Expr>,
        methods: Vec<Rc<FunctionDecl>>,
    },
}

impl Stmt {
    /// Adds the ids of every name-bearing node in this statement to `ids`,
    /// nested function and method bodies included.
    pub fn collect_ids(&self, ids: &mut HashSet<ExprId>) {
        match self {
            Stmt::Expression { expression } => expression.collect_ids(ids),
            Stmt::Let { initializer, .. } => {
                if let Some(initializer) = initializer {
                    initializer.collect_ids(ids);
                }
            }
            Stmt::Block { statements } => {
                for stmt in statements {
                    stmt.collect_ids(ids);
                }
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                condition.collect_ids(ids);
                then_branch.collect_ids(ids);
                if let Some(else_branch) = else_branch {
                    else_branch.collect_ids(ids);
                }
            }
            Stmt::While { condition, body } => {
                condition.collect_ids(ids);
                body.collect_ids(ids);
            }
            Stmt::Break { .. } => {}
            Stmt::Function(decl) => {
                for stmt in &decl.body {
                    stmt.collect_ids(ids);
                }
            }
            Stmt::Return { value, .. } => {
                if let Some(value) = value {
                    value.collect_ids(ids);
                }
            }
            Stmt::Class {
                superclass,
                methods,
                ..
            } => {
                if let Some(superclass) = superclass {
                    superclass.collect_ids(ids);
                }
                for method in methods {
                    for stmt in &method.body {
                        stmt.collect_ids(ids);
                    }
                }
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Binary {
                left,
                operator,
                right,
            }
            | Expr::Logical {
                left,
                operator,
                right,
            } => write!(f, "({} {} {})", operator.lexeme, left, right),
            Expr::Ternary {
                condition,
                then_branch,
                else_branch,
            } => write!(f, "(?: {} {} {})", condition, then_branch, else_branch),
            Expr::Unary { operator, right } => write!(f, "({} {})", operator.lexeme, right),
            Expr::Literal { value } => match value {
                Literal::String(s) => write!(f, "\"{}\"", s),
                other => write!(f, "{}", other),
            },
            Expr::Grouping { expression } => write!(f, "(group {})", expression),
            Expr::Variable { name, .. } => write!(f, "{}", name.lexeme),
            Expr::Assign { name, value, .. } => write!(f, "(= {} {})", name.lexeme, value),
            Expr::Call {
                callee, arguments, ..
            } => {
                write!(f, "(call {}", callee)?;
                for arg in arguments {
                    write!(f, " {}", arg)?;
                }
                write!(f, ")")
            }
            Expr::Get { object, name } => write!(f, "(. {} {})", object, name.lexeme),
            Expr::Set {
                object,
                name,
                value,
            } => write!(f, "(= (. {} {}) {})", object, name.lexeme, value),
            Expr::SelfRef { .. } => write!(f, "self"),
            Expr::Super { method, .. } => write!(f, "(super {})", method.lexeme),
        }
    }
}

impl fmt::Display for FunctionDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<&str> = self.params.iter().map(|p| p.lexeme.as_str()).collect();
        write!(f, "(fn {} ({})", self.name.lexeme, params.join(" "))?;
        for stmt in &self.body {
            write!(f, " {}", stmt)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Expression { expression } => write!(f, "(; {})", expression),
            Stmt::Let { name, initializer } => match initializer {
                Some(init) => write!(f, "(let {} {})", name.lexeme, init),
                None => write!(f, "(let {})", name.lexeme),
            },
            Stmt::Block { statements } => {
                write!(f, "(block")?;
                for stmt in statements {
                    write!(f, " {}", stmt)?;
                }
                write!(f, ")")
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => match else_branch {
                Some(eb) => write!(f, "(if {} {} {})", condition, then_branch, eb),
                None => write!(f, "(if {} {})", condition, then_branch),
            },
            Stmt::While { condition, body } => write!(f, "(while {} {})", condition, body),
            Stmt::Break { .. } => write!(f, "(break)"),
            Stmt::Function(decl) => write!(f, "{}", decl),
            Stmt::Return { value, .. } => match value {
                Some(v) => write!(f, "(return {})", v),
                None => write!(f, "(return)"),
            },
            Stmt::Class {
                name,
                superclass,
                methods,
            } => {
                write!(f, "(class {}", name.lexeme)?;
                if let Some(sc) = superclass {
                    write!(f, " < {}", sc)?;
                }
                for method in methods {
                    write!(f, " {}", method)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenType;

    fn make_token(token_type: TokenType, lexeme: &str) -> Token {
        Token {
            token_type,
            lexeme: lexeme.to_string(),
            literal: None,
            span: 0..lexeme.len(),
            line: 1,
        }
    }

    fn num(n: f64) -> Box<Expr> {
        Box::new(Expr::Literal {
            value: Literal::Number(n),
        })
    }

    #[test]
    fn fresh_ids_are_distinct() {
        let a = ExprId::fresh();
        let b = ExprId::fresh();
        assert_ne!(a, b);
    }

    #[test]
    fn ids_are_wide_enough_not_to_wrap() {
        assert_eq!(std::mem::size_of::<ExprId>(), 8);
        assert!(ExprId::fresh() < ExprId::fresh());
    }

    #[test]
    fn collect_ids_reaches_into_nested_function_bodies() {
        let inner = Expr::variable(make_token(TokenType::Identifier, "n"));
        let decl = Rc::new(FunctionDecl {
            name: make_token(TokenType::Identifier, "f"),
            params: Vec::new(),
            body: vec![Stmt::Return {
                keyword: make_token(TokenType::Return, "return"),
                value: Some(inner.clone()),
            }],
        });
        let program = vec![
            Stmt::Expression {
                expression: Expr::assign(
                    make_token(TokenType::Identifier, "a"),
                    Expr::variable(make_token(TokenType::Identifier, "b")),
                ),
            },
            Stmt::Function(decl),
        ];

        let mut ids = HashSet::new();
        for stmt in &program {
            stmt.collect_ids(&mut ids);
        }
        assert_eq!(ids.len(), 3);
        let Expr::Variable { id, .. } = inner else {
            unreachable!()
        };
        assert!(ids.contains(&id));
    }

    #[test]
    fn identical_references_get_distinct_identities() {
        let a = Expr::variable(make_token(TokenType::Identifier, "x"));
        let b = Expr::variable(make_token(TokenType::Identifier, "x"));
        assert_ne!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn displays_nested_expression() {
        // -123 * (45.67)
        let expr = Expr::Binary {
            left: Box::new(Expr::Unary {
                operator: make_token(TokenType::Minus, "-"),
                right: num(123.0),
            }),
            operator: make_token(TokenType::Star, "*"),
            right: Box::new(Expr::Grouping {
                expression: num(45.67),
            }),
        };

        assert_eq!(expr.to_string(), "(* (- 123) (group 45.67))");
    }

    #[test]
    fn displays_ternary_expression() {
        let expr = Expr::Ternary {
            condition: Box::new(Expr::Literal {
                value: Literal::Bool(true),
            }),
            then_branch: num(1.0),
            else_branch: num(2.0),
        };

        assert_eq!(expr.to_string(), "(?: true 1 2)");
    }

    #[test]
    fn displays_assign_expression() {
        let expr = Expr::assign(make_token(TokenType::Identifier, "x"), *num(42.0));
        assert_eq!(expr.to_string(), "(= x 42)");
    }

    #[test]
    fn displays_property_access_and_call() {
        let get = Expr::Get {
            object: Box::new(Expr::self_ref(make_token(TokenType::SelfKw, "self"))),
            name: make_token(TokenType::Identifier, "n"),
        };
        let call = Expr::Call {
            callee: Box::new(get),
            paren: make_token(TokenType::RightParen, ")"),
            arguments: vec![*num(1.0), *num(2.0)],
        };
        assert_eq!(call.to_string(), "(call (. self n) 1 2)");
    }

    #[test]
    fn displays_function_statement() {
        let decl = FunctionDecl {
            name: make_token(TokenType::Identifier, "add"),
            params: vec![
                make_token(TokenType::Identifier, "a"),
                make_token(TokenType::Identifier, "b"),
            ],
            body: vec![Stmt::Return {
                keyword: make_token(TokenType::Return, "return"),
                value: Some(Expr::Binary {
                    left: Box::new(Expr::variable(make_token(TokenType::Identifier, "a"))),
                    operator: make_token(TokenType::Plus, "+"),
                    right: Box::new(Expr::variable(make_token(TokenType::Identifier, "b"))),
                }),
            }],
        };
        let stmt = Stmt::Function(Rc::new(decl));
        insta::assert_snapshot!(stmt.to_string(), @"(fn add (a b) (return (+ a b)))");
    }

    #[test]
    fn displays_empty_block() {
        let stmt = Stmt::Block { statements: vec![] };
        assert_eq!(stmt.to_string(), "(block)");
    }
}
