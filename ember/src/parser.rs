use std::rc::Rc;

use log::debug;

use crate::ast::{Expr, FunctionDecl, Stmt};
use crate::error::EmberError;
use crate::token::{Literal, Token, TokenType};

/// Upper bound on parameters and call arguments.
pub const MAX_ARGUMENTS: usize = 255;

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    errors: Vec<EmberError>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            errors: Vec::new(),
        }
    }

    /// Parses every declaration it can. Errors are collected rather than
    /// returned; check `take_errors` afterwards.
    pub fn parse(&mut self) -> Vec<Stmt> {
        let mut statements = Vec::new();
        while !self.is_at_end() {
            if let Some(stmt) = self.declaration() {
                statements.push(stmt);
            }
        }
        debug!(
            "parsed {} statements with {} errors",
            statements.len(),
            self.errors.len()
        );
        statements
    }

    pub fn take_errors(&mut self) -> Vec<EmberError> {
        std::mem::take(&mut self.errors)
    }

    fn declaration(&mut self) -> Option<Stmt> {
        let result = if self.match_types(&[TokenType::Class]) {
            self.class_declaration()
        } else if self.match_types(&[TokenType::Fn]) {
            self.function("function").map(|decl| Stmt::Function(Rc::new(decl)))
        } else if self.match_types(&[TokenType::Let]) {
            self.let_declaration()
        } else {
            self.statement()
        };

        match result {
            Ok(stmt) => Some(stmt),
            Err(e) => {
                self.errors.push(e);
                self.synchronize();
                None
            }
        }
    }

    fn class_declaration(&mut self) -> Result<Stmt, EmberError> {
        let name = self
            .consume(TokenType::Identifier, "Expected class name")?
            .clone();

        let superclass = if self.match_types(&[TokenType::Less]) {
            let super_name = self
                .consume(TokenType::Identifier, "Expected superclass name")?
                .clone();
            Some(Expr::variable(super_name))
        } else {
            None
        };

        self.consume(TokenType::LeftBrace, "Expected '{' after class name")?;

        let mut methods = Vec::new();
        while !self.check(TokenType::RightBrace) && !self.is_at_end() {
            methods.push(Rc::new(self.function("method")?));
        }

        self.consume(TokenType::RightBrace, "Expected '}' after class body")?;
        Ok(Stmt::Class {
            name,
            superclass,
            methods,
        })
    }

    fn function(&mut self, kind: &str) -> Result<FunctionDecl, EmberError> {
        let name = self
            .consume(TokenType::Identifier, &format!("Expected {} name", kind))?
            .clone();
        self.consume(
            TokenType::LeftParen,
            &format!("Expected '(' after {} name", kind),
        )?;

        let mut params = Vec::new();
        if !self.check(TokenType::RightParen) {
            loop {
                if params.len() >= MAX_ARGUMENTS {
                    let error = self.error_at(
                        self.peek(),
                        &format!("Can't have more than {} parameters", MAX_ARGUMENTS),
                    );
                    self.errors.push(error);
                }
                params.push(
                    self.consume(TokenType::Identifier, "Expected parameter name")?
                        .clone(),
                );
                if !self.match_types(&[TokenType::Comma]) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expected ')' after parameters")?;

        self.consume(
            TokenType::LeftBrace,
            &format!("Expected '{{' before {} body", kind),
        )?;
        let body = self.block_statements()?;

        Ok(FunctionDecl { name, params, body })
    }

    fn let_declaration(&mut self) -> Result<Stmt, EmberError> {
        let name = self
            .consume(TokenType::Identifier, "Expected variable name")?
            .clone();

        let initializer = if self.match_types(&[TokenType::Equal]) {
            Some(self.expression()?)
        } else {
            None
        };

        self.consume(
            TokenType::Semicolon,
            "Expected ';' after variable declaration",
        )?;
        Ok(Stmt::Let { name, initializer })
    }

    fn statement(&mut self) -> Result<Stmt, EmberError> {
        if self.match_types(&[TokenType::Break]) {
            self.break_statement()
        } else if self.match_types(&[TokenType::For]) {
            self.for_statement()
        } else if self.match_types(&[TokenType::If]) {
            self.if_statement()
        } else if self.match_types(&[TokenType::Return]) {
            self.return_statement()
        } else if self.match_types(&[TokenType::While]) {
            self.while_statement()
        } else if self.match_types(&[TokenType::LeftBrace]) {
            Ok(Stmt::Block {
                statements: self.block_statements()?,
            })
        } else {
            self.expression_statement()
        }
    }

    // Loop legality is checked by the resolver, which also sees function boundaries.
    fn break_statement(&mut self) -> Result<Stmt, EmberError> {
        let keyword = self.previous().clone();
        self.consume(TokenType::Semicolon, "Expected ';' after 'break'")?;
        Ok(Stmt::Break { keyword })
    }

    fn for_statement(&mut self) -> Result<Stmt, EmberError> {
        self.consume(TokenType::LeftParen, "Expected '(' after 'for'")?;

        // Initializer
        let initializer = if self.match_types(&[TokenType::Semicolon]) {
            None
        } else if self.match_types(&[TokenType::Let]) {
            Some(self.let_declaration()?)
        } else {
            Some(self.expression_statement()?)
        };

        // Condition
        let condition = if self.check(TokenType::Semicolon) {
            Expr::Literal {
                value: Literal::Bool(true),
            }
        } else {
            self.expression()?
        };
        self.consume(TokenType::Semicolon, "Expected ';' after loop condition")?;

        // Increment
        let increment = if self.check(TokenType::RightParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume(TokenType::RightParen, "Expected ')' after 'for' clauses")?;

        let mut body = self.statement()?;

        if let Some(inc) = increment {
            body = Stmt::Block {
                statements: vec![body, Stmt::Expression { expression: inc }],
            };
        }

        body = Stmt::While {
            condition,
            body: Box::new(body),
        };

        if let Some(init) = initializer {
            body = Stmt::Block {
                statements: vec![init, body],
            };
        }

        Ok(body)
    }

    fn while_statement(&mut self) -> Result<Stmt, EmberError> {
        self.consume(TokenType::LeftParen, "Expected '(' after 'while'")?;
        let condition = self.expression()?;
        self.consume(TokenType::RightParen, "Expected ')' after while condition")?;
        let body = Box::new(self.statement()?);

        Ok(Stmt::While { condition, body })
    }

    fn if_statement(&mut self) -> Result<Stmt, EmberError> {
        self.consume(TokenType::LeftParen, "Expected '(' after 'if'")?;
        let condition = self.expression()?;
        self.consume(TokenType::RightParen, "Expected ')' after if condition")?;

        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.match_types(&[TokenType::Else]) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };

        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn return_statement(&mut self) -> Result<Stmt, EmberError> {
        let keyword = self.previous().clone();
        let value = if self.check(TokenType::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume(TokenType::Semicolon, "Expected ';' after return value")?;
        Ok(Stmt::Return { keyword, value })
    }

    fn block_statements(&mut self) -> Result<Vec<Stmt>, EmberError> {
        let mut statements = Vec::new();

        while !self.check(TokenType::RightBrace) && !self.is_at_end() {
            if let Some(stmt) = self.declaration() {
                statements.push(stmt);
            }
        }

        self.consume(TokenType::RightBrace, "Expected '}' at the end of the block")?;
        Ok(statements)
    }

    fn expression_statement(&mut self) -> Result<Stmt, EmberError> {
        let expression = self.expression()?;
        self.consume(TokenType::Semicolon, "Expected ';' after expression")?;
        Ok(Stmt::Expression { expression })
    }

    fn expression(&mut self) -> Result<Expr, EmberError> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Expr, EmberError> {
        let expr = self.ternary()?;

        if self.match_types(&[TokenType::Equal]) {
            let equals = self.previous().clone();
            let value = self.assignment()?;

            return match expr {
                Expr::Variable { name, .. } => Ok(Expr::assign(name, value)),
                Expr::Get { object, name } => Ok(Expr::Set {
                    object,
                    name,
                    value: Box::new(value),
                }),
                other => {
                    // The parser is still in a consistent state, so record and carry on.
                    let error = self.error_at(&equals, "Invalid assignment target");
                    self.errors.push(error);
                    Ok(other)
                }
            };
        }

        Ok(expr)
    }

    fn ternary(&mut self) -> Result<Expr, EmberError> {
        let expr = self.or()?;

        if self.match_types(&[TokenType::Question]) {
            let then_branch = self.expression()?;
            self.consume(
                TokenType::Colon,
                "Expected ':' and else branch for ternary expression",
            )?;
            let else_branch = self.ternary()?;
            return Ok(Expr::Ternary {
                condition: Box::new(expr),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
            });
        }

        Ok(expr)
    }

    fn or(&mut self) -> Result<Expr, EmberError> {
        let mut expr = self.and()?;

        while self.match_types(&[TokenType::Or]) {
            let operator = self.previous().clone();
            let right = self.and()?;
            expr = Expr::Logical {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn and(&mut self) -> Result<Expr, EmberError> {
        let mut expr = self.equality()?;

        while self.match_types(&[TokenType::And]) {
            let operator = self.previous().clone();
            let right = self.equality()?;
            expr = Expr::Logical {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn equality(&mut self) -> Result<Expr, EmberError> {
        self.binary(&[TokenType::BangEqual, TokenType::EqualEqual], Self::comparison)
    }

    fn comparison(&mut self) -> Result<Expr, EmberError> {
        self.binary(
            &[
                TokenType::Greater,
                TokenType::GreaterEqual,
                TokenType::Less,
                TokenType::LessEqual,
            ],
            Self::term,
        )
    }

    fn term(&mut self) -> Result<Expr, EmberError> {
        self.binary(&[TokenType::Minus, TokenType::Plus], Self::factor)
    }

    fn factor(&mut self) -> Result<Expr, EmberError> {
        self.binary(&[TokenType::Slash, TokenType::Star], Self::unary)
    }

    /// Left-associative binary level: `operand (op operand)*`.
    fn binary(
        &mut self,
        operators: &[TokenType],
        operand: fn(&mut Self) -> Result<Expr, EmberError>,
    ) -> Result<Expr, EmberError> {
        let mut expr = operand(self)?;

        while self.match_types(operators) {
            let operator = self.previous().clone();
            let right = operand(self)?;
            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn unary(&mut self) -> Result<Expr, EmberError> {
        if self.match_types(&[TokenType::Bang, TokenType::Minus]) {
            let operator = self.previous().clone();
            let right = self.unary()?;
            return Ok(Expr::Unary {
                operator,
                right: Box::new(right),
            });
        }
        self.call()
    }

    fn call(&mut self) -> Result<Expr, EmberError> {
        let mut expr = self.primary()?;

        loop {
            if self.match_types(&[TokenType::LeftParen]) {
                expr = self.finish_call(expr)?;
            } else if self.match_types(&[TokenType::Dot]) {
                let name = self
                    .consume(TokenType::Identifier, "Expected property name after '.'")?
                    .clone();
                expr = Expr::Get {
                    object: Box::new(expr),
                    name,
                };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn finish_call(&mut self, callee: Expr) -> Result<Expr, EmberError> {
        let mut arguments = Vec::new();
        if !self.check(TokenType::RightParen) {
            loop {
                if arguments.len() >= MAX_ARGUMENTS {
                    let error = self.error_at(
                        self.peek(),
                        &format!("Can't have more than {} arguments", MAX_ARGUMENTS),
                    );
                    self.errors.push(error);
                }
                arguments.push(self.expression()?);
                if !self.match_types(&[TokenType::Comma]) {
                    break;
                }
            }
        }

        let paren = self
            .consume(TokenType::RightParen, "Expected ')' after arguments")?
            .clone();

        Ok(Expr::Call {
            callee: Box::new(callee),
            paren,
            arguments,
        })
    }

    fn primary(&mut self) -> Result<Expr, EmberError> {
        let token = self.peek().clone();
        let expr = match token.token_type {
            TokenType::False => Expr::Literal {
                value: Literal::Bool(false),
            },
            TokenType::True => Expr::Literal {
                value: Literal::Bool(true),
            },
            TokenType::Nil => Expr::Literal {
                value: Literal::Nil,
            },
            TokenType::Number | TokenType::String => {
                let value = token
                    .literal
                    .clone()
                    .ok_or_else(|| self.error_at(&token, "Literal token without a value"))?;
                Expr::Literal { value }
            }
            TokenType::SelfKw => Expr::self_ref(token),
            TokenType::Super => {
                self.advance();
                self.consume(TokenType::Dot, "Expected '.' after 'super'")?;
                let method = self
                    .consume(TokenType::Identifier, "Expected superclass method name")?
                    .clone();
                return Ok(Expr::super_ref(token, method));
            }
            TokenType::Identifier => Expr::variable(token),
            TokenType::LeftParen => {
                self.advance();
                let expression = self.expression()?;
                self.consume(TokenType::RightParen, "Expected ')' after expression")?;
                return Ok(Expr::Grouping {
                    expression: Box::new(expression),
                });
            }
            _ => return Err(self.error_at(&token, "Expected expression")),
        };
        self.advance();
        Ok(expr)
    }

    fn match_types(&mut self, types: &[TokenType]) -> bool {
        for t in types {
            if self.check(*t) {
                self.advance();
                return true;
            }
        }
        false
    }

    fn consume(&mut self, token_type: TokenType, message: &str) -> Result<&Token, EmberError> {
        if self.check(token_type) {
            return Ok(self.advance());
        }
        Err(self.error_at(self.peek(), message))
    }

    fn error_at(&self, token: &Token, message: &str) -> EmberError {
        let location = if token.token_type == TokenType::Eof {
            " at end".to_string()
        } else {
            format!(" at '{}'", token.lexeme)
        };
        EmberError::Parse {
            message: format!("{}{}", message, location),
            span: token.span.clone(),
            line: token.line,
        }
    }

    fn synchronize(&mut self) {
        self.advance();

        while !self.is_at_end() {
            if self.previous().token_type == TokenType::Semicolon {
                return;
            }

            match self.peek().token_type {
                TokenType::Class
                | TokenType::Fn
                | TokenType::Let
                | TokenType::For
                | TokenType::If
                | TokenType::While
                | TokenType::Break
                | TokenType::Return => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    fn check(&self, token_type: TokenType) -> bool {
        if self.is_at_end() {
            return token_type == TokenType::Eof;
        }
        self.peek().token_type == token_type
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn is_at_end(&self) -> bool {
        self.peek().token_type == TokenType::Eof
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current.min(self.tokens.len().saturating_sub(1))]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Scanner;

    fn make_token(token_type: TokenType, lexeme: &str, literal: Option<Literal>) -> Token {
        Token {
            token_type,
            lexeme: lexeme.to_string(),
            literal,
            span: 0..lexeme.len(),
            line: 1,
        }
    }

    fn eof() -> Token {
        make_token(TokenType::Eof, "", None)
    }

    fn parse_source(source: &str) -> (Vec<Stmt>, Vec<EmberError>) {
        let tokens: Vec<Token> = Scanner::new(source).map(|t| t.unwrap()).collect();
        let mut parser = Parser::new(tokens);
        let statements = parser.parse();
        (statements, parser.take_errors())
    }

    fn parse_ok(source: &str) -> Vec<String> {
        let (statements, errors) = parse_source(source);
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
        statements.iter().map(|s| s.to_string()).collect()
    }

    fn parse_errors(source: &str) -> Vec<String> {
        parse_source(source)
            .1
            .iter()
            .map(|e| e.to_string())
            .collect()
    }

    #[test]
    fn parse_eof_only_returns_empty() {
        let mut parser = Parser::new(vec![eof()]);
        assert!(parser.parse().is_empty());
        assert!(parser.take_errors().is_empty());
    }

    #[test]
    fn parses_hand_built_expression_statement() {
        let tokens = vec![
            make_token(TokenType::Number, "1", Some(Literal::Number(1.0))),
            make_token(TokenType::Plus, "+", None),
            make_token(TokenType::Number, "2", Some(Literal::Number(2.0))),
            make_token(TokenType::Semicolon, ";", None),
            eof(),
        ];
        let mut parser = Parser::new(tokens);
        let statements = parser.parse();

        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].to_string(), "(; (+ 1 2))");
    }

    #[test]
    fn respects_arithmetic_precedence() {
        assert_eq!(parse_ok("1 + 2 * 3 - 4 / 2;"), vec![
            "(; (- (+ 1 (* 2 3)) (/ 4 2)))"
        ]);
    }

    #[test]
    fn and_binds_tighter_than_or() {
        assert_eq!(parse_ok("a or b and c;"), vec!["(; (or a (and b c)))"]);
    }

    #[test]
    fn ternary_is_right_associative() {
        assert_eq!(parse_ok("a ? 1 : b ? 2 : 3;"), vec![
            "(; (?: a 1 (?: b 2 3)))"
        ]);
    }

    #[test]
    fn assignment_is_right_associative() {
        assert_eq!(parse_ok("a = b = 1;"), vec!["(; (= a (= b 1)))"]);
    }

    #[test]
    fn property_assignment_becomes_set() {
        assert_eq!(parse_ok("self.count = self.count + 1;"), vec![
            "(; (= (. self count) (+ (. self count) 1)))"
        ]);
    }

    #[test]
    fn parses_chained_calls_and_gets() {
        assert_eq!(parse_ok("a.b(1)(2).c;"), vec![
            "(; (. (call (call (. a b) 1) 2) c))"
        ]);
    }

    #[test]
    fn parses_super_access() {
        assert_eq!(parse_ok("super.greet();"), vec!["(; (call (super greet)))"]);
    }

    #[test]
    fn parses_let_declarations() {
        assert_eq!(parse_ok("let a; let b = \"hi\";"), vec![
            "(let a)",
            "(let b \"hi\")"
        ]);
    }

    #[test]
    fn parses_function_declaration() {
        assert_eq!(parse_ok("fn add(a, b) { return a + b; }"), vec![
            "(fn add (a b) (return (+ a b)))"
        ]);
    }

    #[test]
    fn parses_class_with_superclass_and_methods() {
        let source = "class B < A { init(n) { self.n = n; } get() { return self.n; } }";
        insta::assert_snapshot!(
            parse_ok(source)[0],
            @"(class B < A (fn init (n) (; (= (. self n) n))) (fn get () (return (. self n))))"
        );
    }

    #[test]
    fn parses_if_else_and_while() {
        assert_eq!(
            parse_ok("if (a) b; else c; while (x) { break; }"),
            vec!["(if a (; b) (; c))", "(while x (block (break)))"]
        );
    }

    #[test]
    fn desugars_for_loop_into_while() {
        assert_eq!(
            parse_ok("for (let i = 0; i < 3; i = i + 1) print(i);"),
            vec!["(block (let i 0) (while (< i 3) (block (; (call print i)) (; (= i (+ i 1))))))"]
        );
    }

    #[test]
    fn for_without_clauses_loops_forever() {
        assert_eq!(parse_ok("for (;;) break;"), vec!["(while true (break))"]);
    }

    #[test]
    fn return_without_value() {
        assert_eq!(parse_ok("fn f() { return; }"), vec!["(fn f () (return))"]);
    }

    #[test]
    fn error_on_missing_expression() {
        let errors = parse_errors(";");
        assert_eq!(errors, vec!["[line 1] Parse error: Expected expression at ';'"]);
    }

    #[test]
    fn error_on_unclosed_grouping_reports_at_end() {
        let errors = parse_errors("(1 + 2");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Expected ')' after expression at end"));
    }

    #[test]
    fn invalid_assignment_target_is_recorded_without_aborting() {
        let (statements, errors) = parse_source("1 + 2 = 3; let ok = 1;");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message().contains("Invalid assignment target"));
        assert_eq!(statements.len(), 2);
    }

    #[test]
    fn recovers_and_reports_multiple_errors() {
        let (statements, errors) = parse_source("let = 1;\nlet b = 2;\nprint(;\nlet c = 3;");
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].line(), Some(1));
        assert_eq!(errors[1].line(), Some(3));
        assert_eq!(statements.len(), 2);
    }

    #[test]
    fn missing_semicolon_is_reported() {
        let errors = parse_errors("let a = 1");
        assert_eq!(errors, vec![
            "[line 1] Parse error: Expected ';' after variable declaration at end"
        ]);
    }

    #[test]
    fn ternary_without_else_branch_is_error() {
        let errors = parse_errors("a ? 1;");
        assert!(errors[0].contains("Expected ':'"));
    }

    #[test]
    fn too_many_arguments_is_reported() {
        let args = vec!["1"; MAX_ARGUMENTS + 1].join(", ");
        let (statements, errors) = parse_source(&format!("f({});", args));
        assert_eq!(statements.len(), 1);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message().contains("more than 255 arguments"));
    }

    #[test]
    fn too_many_parameters_is_reported() {
        let params: Vec<String> = (0..=MAX_ARGUMENTS).map(|i| format!("p{}", i)).collect();
        let errors = parse_errors(&format!("fn f({}) {{}}", params.join(", ")));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("more than 255 parameters"));
    }

    #[test]
    fn take_errors_returns_and_clears_errors() {
        let tokens: Vec<Token> = Scanner::new(")").map(|t| t.unwrap()).collect();
        let mut parser = Parser::new(tokens);
        parser.parse();
        assert_eq!(parser.take_errors().len(), 1);
        assert!(parser.take_errors().is_empty());
    }

    #[test]
    fn break_outside_loop_parses() {
        // Rejected later by the resolver.
        assert_eq!(parse_ok("break;"), vec!["(break)"]);
    }
}
