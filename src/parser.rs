//! Recursive-descent parser producing a [`Node`] tree, with constant folding
//! applied as each statement/expression is finished.

use crate::ast::{Kind, Node};
use crate::error::{Error, Result};
use crate::lexer::{Lexer, Token, TokenKind};

#[derive(Clone, Copy, Default)]
struct Context {
    inside_function: bool,
    inside_loop: bool,
}

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Result<Self> {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token()?;
        Ok(Parser { lexer, current })
    }

    pub fn parse(source: &'a str) -> Result<Node> {
        let mut parser = Parser::new(source)?;
        let tree = parser.block(Context::default())?;
        parser.expect(TokenKind::EndOfStream)?;
        Ok(tree)
    }

    fn error(&self) -> Error {
        Error::Syntax {
            line: self.current.line,
            column: self.current.column,
            token_kind: self.current.kind.describe(),
            lexeme: self.current.lexeme.clone(),
        }
    }

    fn advance(&mut self) -> Result<Token> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn accept(&mut self, kind: TokenKind) -> Result<Option<Token>> {
        if self.current.kind == kind {
            Ok(Some(self.advance()?))
        } else {
            Ok(None)
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        if self.current.kind == kind {
            self.advance()
        } else {
            Err(self.error())
        }
    }

    fn skip_newlines(&mut self) -> Result<()> {
        while self.current.kind == TokenKind::Newline {
            self.advance()?;
        }
        Ok(())
    }

    fn end_of_statement(&mut self) -> Result<()> {
        match self.current.kind {
            TokenKind::Newline | TokenKind::Semicolon => {
                self.advance()?;
                Ok(())
            }
            TokenKind::EndOfStream | TokenKind::End | TokenKind::Else => Ok(()),
            _ => Err(self.error()),
        }
    }

    // --- Statements ---------------------------------------------------

    fn block(&mut self, ctx: Context) -> Result<Node> {
        let line = self.current.line;
        let mut block = Node::new(Kind::Block, line);
        loop {
            while matches!(self.current.kind, TokenKind::Newline | TokenKind::Semicolon) {
                self.advance()?;
            }
            if matches!(self.current.kind, TokenKind::EndOfStream | TokenKind::End | TokenKind::Else) {
                break;
            }
            block.push(self.statement(ctx)?);
        }
        Ok(block)
    }

    /// Parses the body of an `if`/`while`/`for`/`def`: either `: stmt` on one
    /// line, or a newline followed by a full `block` terminated by `end`
    /// (the `end` token itself is consumed by the caller).
    fn body(&mut self, ctx: Context) -> Result<Node> {
        if self.accept(TokenKind::Colon)?.is_some() {
            let line = self.current.line;
            let mut block = Node::new(Kind::Block, line);
            block.push(self.statement(ctx)?);
            Ok(block)
        } else {
            self.expect(TokenKind::Newline)?;
            let block = self.block(ctx)?;
            self.expect(TokenKind::End)?;
            Ok(block)
        }
    }

    fn statement(&mut self, ctx: Context) -> Result<Node> {
        let line = self.current.line;
        match self.current.kind {
            TokenKind::If => self.if_statement(ctx),
            TokenKind::While => self.while_statement(ctx),
            TokenKind::For => self.for_statement(ctx),
            TokenKind::Def => {
                if ctx.inside_function {
                    return Err(Error::Semantic {
                        line,
                        message: "nested function definitions are not supported".to_string(),
                    });
                }
                self.function_definition(ctx)
            }
            TokenKind::Return => {
                if !ctx.inside_function {
                    return Err(Error::Semantic {
                        line,
                        message: "'return' outside a function".to_string(),
                    });
                }
                self.advance()?;
                let mut node = Node::new(Kind::Return, line);
                if !matches!(
                    self.current.kind,
                    TokenKind::Newline | TokenKind::Semicolon | TokenKind::EndOfStream | TokenKind::End
                ) {
                    node.push(self.expression()?);
                }
                self.end_of_statement()?;
                Ok(node)
            }
            TokenKind::Continue => {
                if !ctx.inside_loop {
                    return Err(Error::Semantic {
                        line,
                        message: "'continue' outside a loop".to_string(),
                    });
                }
                self.advance()?;
                self.end_of_statement()?;
                Ok(Node::new(Kind::Continue, line))
            }
            TokenKind::Break => {
                if !ctx.inside_loop {
                    return Err(Error::Semantic {
                        line,
                        message: "'break' outside a loop".to_string(),
                    });
                }
                self.advance()?;
                self.end_of_statement()?;
                Ok(Node::new(Kind::Break, line))
            }
            _ => {
                let mut expr = self.expression()?;
                self.end_of_statement()?;
                expr.simplify();
                Ok(expr)
            }
        }
    }

    fn if_statement(&mut self, ctx: Context) -> Result<Node> {
        let line = self.current.line;
        self.advance()?;
        let condition = self.expression()?;
        let then_block = self.body(ctx)?;
        let mut node = Node::new(Kind::If, line).with_children(vec![condition, then_block]);
        if self.current.kind == TokenKind::Else {
            self.advance()?;
            let else_block = if self.current.kind == TokenKind::If {
                let mut wrapper = Node::new(Kind::Block, self.current.line);
                wrapper.push(self.if_statement(ctx)?);
                wrapper
            } else {
                self.body(ctx)?
            };
            node.push(else_block);
        }
        Ok(node)
    }

    fn while_statement(&mut self, ctx: Context) -> Result<Node> {
        let line = self.current.line;
        self.advance()?;
        let condition = self.expression()?;
        let inner = Context {
            inside_loop: true,
            ..ctx
        };
        let body = self.body(inner)?;
        Ok(Node::new(Kind::While, line).with_children(vec![condition, body]))
    }

    fn for_statement(&mut self, ctx: Context) -> Result<Node> {
        let line = self.current.line;
        self.advance()?;
        let init = self.expression()?;
        self.expect(TokenKind::Semicolon)?;
        let cond = self.expression()?;
        self.expect(TokenKind::Semicolon)?;
        let step = self.expression()?;
        let inner = Context {
            inside_loop: true,
            ..ctx
        };
        let body = self.body(inner)?;
        Ok(Node::new(Kind::For, line).with_children(vec![init, cond, step, body]))
    }

    fn function_definition(&mut self, ctx: Context) -> Result<Node> {
        let line = self.current.line;
        self.advance()?;
        let name_tok = self.expect(TokenKind::Identifier)?;
        let mut args = Vec::new();
        if self.accept(TokenKind::LeftParen)?.is_some() {
            if self.current.kind != TokenKind::RightParen {
                loop {
                    let arg_tok = self.expect(TokenKind::Identifier)?;
                    args.push(Node::leaf_string(Kind::Argument, arg_tok.line, arg_tok.lexeme));
                    if self.accept(TokenKind::Comma)?.is_none() {
                        break;
                    }
                }
            }
            self.expect(TokenKind::RightParen)?;
        }
        let inner = Context {
            inside_function: true,
            inside_loop: false,
        };
        let body = self.body(inner)?;
        let mut node = Node::leaf_string(Kind::FunctionDef, line, name_tok.lexeme);
        node.children = args;
        node.push(body);
        let _ = ctx;
        Ok(node)
    }

    // --- Expressions, lowest to highest precedence ---------------------

    fn expression(&mut self) -> Result<Node> {
        let line = self.current.line;
        let mut left = self.and_expression()?;
        match self.current.kind {
            TokenKind::Equal => {
                self.advance()?;
                let right = self.expression()?;
                left = Node::new(Kind::Assignment, line).with_children(vec![left, right]);
            }
            TokenKind::PlusEqual
            | TokenKind::MinusEqual
            | TokenKind::StarEqual
            | TokenKind::SlashEqual => {
                let op_kind = self.current.kind;
                self.advance()?;
                let rhs = self.expression()?;
                let arithmetic_kind = match op_kind {
                    TokenKind::PlusEqual => Kind::Sum,
                    TokenKind::MinusEqual => Kind::Difference,
                    TokenKind::StarEqual => Kind::Product,
                    TokenKind::SlashEqual => Kind::Division,
                    _ => unreachable!(),
                };
                let combined =
                    Node::new(arithmetic_kind, line).with_children(vec![left.clone(), rhs]);
                left = Node::new(Kind::Assignment, line).with_children(vec![left, combined]);
            }
            _ => {}
        }
        left.simplify();
        Ok(left)
    }

    fn and_expression(&mut self) -> Result<Node> {
        let line = self.current.line;
        let mut left = self.or_expression()?;
        while self.current.kind == TokenKind::And {
            self.advance()?;
            let right = self.or_expression()?;
            left = Node::new(Kind::And, line).with_children(vec![left, right]);
            left.simplify();
        }
        Ok(left)
    }

    fn or_expression(&mut self) -> Result<Node> {
        let line = self.current.line;
        let mut left = self.comparison_expression()?;
        while self.current.kind == TokenKind::Or {
            self.advance()?;
            let right = self.comparison_expression()?;
            left = Node::new(Kind::Or, line).with_children(vec![left, right]);
            left.simplify();
        }
        Ok(left)
    }

    fn comparison_expression(&mut self) -> Result<Node> {
        let line = self.current.line;
        let mut left = self.math_expression()?;
        loop {
            let kind = match self.current.kind {
                TokenKind::EqualEqual => Kind::Equals,
                TokenKind::NotEqual => Kind::NotEquals,
                TokenKind::Greater => Kind::Greater,
                TokenKind::GreaterEqual => Kind::GreaterEquals,
                TokenKind::Lesser => Kind::Lesser,
                TokenKind::LesserEqual => Kind::LesserEquals,
                _ => break,
            };
            self.advance()?;
            let right = self.math_expression()?;
            left = Node::new(kind, line).with_children(vec![left, right]);
            left.simplify();
        }
        Ok(left)
    }

    fn math_expression(&mut self) -> Result<Node> {
        let line = self.current.line;
        let mut left = self.term()?;
        loop {
            let kind = match self.current.kind {
                TokenKind::Plus => Kind::Sum,
                TokenKind::Minus => Kind::Difference,
                _ => break,
            };
            self.advance()?;
            let right = self.term()?;
            left = Node::new(kind, line).with_children(vec![left, right]);
            left.simplify();
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Node> {
        let line = self.current.line;
        let mut left = self.implicit_function_call()?;
        loop {
            let kind = match self.current.kind {
                TokenKind::Star => Kind::Product,
                TokenKind::Slash => Kind::Division,
                _ => break,
            };
            self.advance()?;
            let right = self.implicit_function_call()?;
            left = Node::new(kind, line).with_children(vec![left, right]);
            left.simplify();
        }
        Ok(left)
    }

    /// `x.method(args)` sugar: rewrites to a `FunctionCall` whose first
    /// argument is `x`, repeatable for chained calls.
    fn implicit_function_call(&mut self) -> Result<Node> {
        let mut left = self.dereference()?;
        while self.accept(TokenKind::Dot)?.is_some() {
            let line = self.current.line;
            let name_tok = self.expect(TokenKind::Identifier)?;
            let mut call = Node::leaf_string(Kind::FunctionCall, line, name_tok.lexeme);
            call.push(left);
            self.expect(TokenKind::LeftParen)?;
            self.call_arguments(&mut call)?;
            left = call;
        }
        Ok(left)
    }

    fn dereference(&mut self) -> Result<Node> {
        let mut left = self.factor()?;
        while self.accept(TokenKind::LeftSquare)?.is_some() {
            let line = self.current.line;
            let index = self.math_expression()?;
            self.expect(TokenKind::RightSquare)?;
            left = Node::new(Kind::ContainerElement, line).with_children(vec![left, index]);
        }
        Ok(left)
    }

    fn call_arguments(&mut self, call: &mut Node) -> Result<()> {
        if self.current.kind != TokenKind::RightParen {
            loop {
                call.push(self.expression()?);
                if self.accept(TokenKind::Comma)?.is_none() {
                    break;
                }
            }
        }
        self.expect(TokenKind::RightParen)?;
        Ok(())
    }

    fn factor(&mut self) -> Result<Node> {
        let line = self.current.line;
        match self.current.kind {
            TokenKind::Nil => {
                self.advance()?;
                Ok(Node::new(Kind::Nil, line))
            }
            TokenKind::True => {
                self.advance()?;
                Ok(Node::leaf_boolean(line, true))
            }
            TokenKind::False => {
                self.advance()?;
                Ok(Node::leaf_boolean(line, false))
            }
            TokenKind::Number => {
                let tok = self.advance()?;
                Ok(Node::leaf_number(line, tok.number))
            }
            TokenKind::String => {
                let tok = self.advance()?;
                Ok(Node::leaf_string(Kind::String, line, tok.lexeme))
            }
            TokenKind::Identifier => {
                let tok = self.advance()?;
                if self.accept(TokenKind::LeftParen)?.is_some() {
                    let mut call = Node::leaf_string(Kind::FunctionCall, line, tok.lexeme);
                    self.call_arguments(&mut call)?;
                    Ok(call)
                } else {
                    Ok(Node::leaf_string(Kind::Variable, line, tok.lexeme))
                }
            }
            TokenKind::New => {
                self.advance()?;
                let name_tok = self.expect(TokenKind::Identifier)?;
                let mut call =
                    Node::leaf_string(Kind::FunctionCall, line, format!("{}_new", name_tok.lexeme));
                if self.accept(TokenKind::LeftParen)?.is_some() {
                    self.call_arguments(&mut call)?;
                }
                Ok(call)
            }
            TokenKind::LeftParen => {
                self.advance()?;
                let inner = self.expression()?;
                self.expect(TokenKind::RightParen)?;
                Ok(inner)
            }
            TokenKind::Minus => {
                self.advance()?;
                let operand = self.factor()?;
                let mut node = Node::new(Kind::Negation, line).with_children(vec![operand]);
                node.simplify();
                Ok(node)
            }
            TokenKind::Not => {
                self.advance()?;
                let operand = self.math_expression()?;
                let mut node = Node::new(Kind::Not, line).with_children(vec![operand]);
                node.simplify();
                Ok(node)
            }
            TokenKind::LeftSquare => {
                self.advance()?;
                let mut node = Node::new(Kind::List, line);
                if self.current.kind != TokenKind::RightSquare {
                    loop {
                        node.push(self.expression()?);
                        if self.accept(TokenKind::Comma)?.is_none() {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RightSquare)?;
                Ok(node)
            }
            TokenKind::LeftCurly => {
                self.advance()?;
                let mut node = Node::new(Kind::Dictionary, line);
                self.skip_newlines()?;
                if self.current.kind != TokenKind::RightCurly {
                    loop {
                        self.skip_newlines()?;
                        let pair_line = self.current.line;
                        let key = self.expression()?;
                        self.expect(TokenKind::Colon)?;
                        let value = self.expression()?;
                        node.push(Node::new(Kind::Pair, pair_line).with_children(vec![key, value]));
                        self.skip_newlines()?;
                        if self.accept(TokenKind::Comma)?.is_none() {
                            break;
                        }
                        self.skip_newlines()?;
                    }
                }
                self.skip_newlines()?;
                self.expect(TokenKind::RightCurly)?;
                Ok(node)
            }
            _ => Err(self.error()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_compound_assignment_by_desugaring() {
        let tree = Parser::parse("x += 1\n").unwrap();
        let stmt = &tree.children[0];
        assert_eq!(stmt.kind, Kind::Assignment);
        assert_eq!(stmt.children[1].kind, Kind::Sum);
    }

    #[test]
    fn rejects_return_outside_a_function() {
        let err = Parser::parse("return 1\n").unwrap_err();
        assert!(matches!(err, Error::Semantic { .. }));
    }

    #[test]
    fn rejects_nested_function_definitions() {
        let err = Parser::parse("def f()\n  def g()\n  end\nend\n").unwrap_err();
        assert!(matches!(err, Error::Semantic { .. }));
    }

    #[test]
    fn parses_method_call_sugar() {
        let tree = Parser::parse("x.len()\n").unwrap();
        let call = &tree.children[0];
        assert_eq!(call.kind, Kind::FunctionCall);
        assert_eq!(call.text, "len");
        assert_eq!(call.children[0].kind, Kind::Variable);
    }

    #[test]
    fn parses_new_as_constructor_call_sugar() {
        let tree = Parser::parse("new Point(1, 2)\n").unwrap();
        let call = &tree.children[0];
        assert_eq!(call.kind, Kind::FunctionCall);
        assert_eq!(call.text, "Point_new");
    }

    #[test]
    fn for_loop_has_exactly_four_children() {
        let tree = Parser::parse("for i=0; i<3; i=i+1: end\n").unwrap();
        assert_eq!(tree.children[0].kind, Kind::For);
        assert_eq!(tree.children[0].children.len(), 4);
    }
}
